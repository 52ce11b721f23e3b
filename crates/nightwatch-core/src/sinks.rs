//! Side-effect collaborators.
//!
//! The scheduler never owns audio, navigation or hazard objects; the host
//! hands in shared references and the scheduler only calls into them. Any
//! collaborator may be missing, in which case the call is skipped with a
//! warning.
//!
//! Sink methods run after the scheduler has released its state lock, one at
//! a time and in transition order. A sink may call back into the scheduler,
//! e.g. a navigator that reports the terminal context to the
//! `LifecycleGate`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::{GameClock, GameTime};
use crate::lifecycle::ContextId;

/// The threat's audio cue. Implementations must tolerate `start` while
/// already playing and `stop` while already stopped.
pub trait AudioCue: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn set_volume(&self, _volume: f64) {}
}

/// Moves the player into the terminal ("game over") context.
pub trait SceneNavigator: Send + Sync {
    fn goto_terminal(&self, context: &ContextId);
}

/// An unrelated hazard (e.g. the player's light) that the final sequence
/// turns off.
pub trait HazardSuppressor: Send + Sync {
    fn disable(&self);
}

/// The set of collaborators the scheduler talks to.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub clock: Option<Arc<dyn GameClock>>,
    pub audio: Option<Arc<dyn AudioCue>>,
    pub navigator: Option<Arc<dyn SceneNavigator>>,
    pub hazard: Option<Arc<dyn HazardSuppressor>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(mut self, clock: Arc<dyn GameClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_audio(mut self, audio: Arc<dyn AudioCue>) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn SceneNavigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn with_hazard(mut self, hazard: Arc<dyn HazardSuppressor>) -> Self {
        self.hazard = Some(hazard);
        self
    }

    /// Wires every sink to one `RecordingSinks` and returns it for inspection.
    pub fn recording(clock: Arc<dyn GameClock>) -> (Self, Arc<RecordingSinks>) {
        let sinks = Arc::new(RecordingSinks::default());
        let collaborators = Self::new()
            .with_clock(clock)
            .with_audio(sinks.clone())
            .with_navigator(sinks.clone())
            .with_hazard(sinks.clone());
        (collaborators, sinks)
    }

    pub(crate) fn current_time(&self) -> Option<GameTime> {
        match &self.clock {
            Some(clock) => clock.current_time(),
            None => None,
        }
    }

    pub(crate) fn start_audio(&self) {
        match &self.audio {
            Some(audio) => audio.start(),
            None => warn!("audio cue missing; skipping start"),
        }
    }

    pub(crate) fn stop_audio(&self) {
        if let Some(audio) = &self.audio {
            audio.stop();
        }
    }

    pub(crate) fn set_volume(&self, volume: f64) {
        if let Some(audio) = &self.audio {
            audio.set_volume(volume);
        }
    }

    pub(crate) fn goto_terminal(&self, context: &ContextId) {
        match &self.navigator {
            Some(navigator) => navigator.goto_terminal(context),
            None => warn!(%context, "scene navigator missing; cannot open terminal context"),
        }
    }

    pub(crate) fn disable_hazard(&self) {
        match &self.hazard {
            Some(hazard) => hazard.disable(),
            None => warn!("hazard suppressor missing; skipping disable"),
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("clock", &self.clock.is_some())
            .field("audio", &self.audio.is_some())
            .field("navigator", &self.navigator.is_some())
            .field("hazard", &self.hazard.is_some())
            .finish()
    }
}

/// One recorded collaborator call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum SinkCall {
    AudioStart,
    AudioStop,
    SetVolume { volume: f64 },
    HazardDisabled,
    Terminal { context: ContextId },
}

/// Test double implementing every sink trait.
#[derive(Debug, Default)]
pub struct RecordingSinks {
    calls: Mutex<Vec<SinkCall>>,
    playing: AtomicBool,
}

impl RecordingSinks {
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count(&self, call: &SinkCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn terminal_visits(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SinkCall::Terminal { .. }))
            .count()
    }

    fn record(&self, call: SinkCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl AudioCue for RecordingSinks {
    fn start(&self) {
        self.playing.store(true, Ordering::SeqCst);
        self.record(SinkCall::AudioStart);
    }

    fn stop(&self) {
        self.playing.store(false, Ordering::SeqCst);
        self.record(SinkCall::AudioStop);
    }

    fn set_volume(&self, volume: f64) {
        self.record(SinkCall::SetVolume { volume });
    }
}

impl SceneNavigator for RecordingSinks {
    fn goto_terminal(&self, context: &ContextId) {
        self.record(SinkCall::Terminal {
            context: context.clone(),
        });
    }
}

impl HazardSuppressor for RecordingSinks {
    fn disable(&self) {
        self.record(SinkCall::HazardDisabled);
    }
}
