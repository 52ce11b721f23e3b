//! Background threat timeline.
//!
//! `ThreatScheduler` owns a [`ThreatMachine`] behind a single mutex and one
//! tokio task that drives it. The task sleeps for the poll interval, then
//! takes the lock, feeds the machine the elapsed run time and the current
//! game time, and queues the collaborator calls the resulting events need.
//! Public operations take the same lock, so a transition never runs against
//! a stale state, and the lock is never held across a sleep.
//!
//! Collaborator calls run after the state lock is released. They are queued
//! in transition order while the lock is held and executed one at a time by
//! whichever caller gets the runner lock; the runner lock is re-entrant, so
//! a collaborator that calls back into the scheduler runs its own effects
//! inline. Every operation drains the queue before it returns.
//!
//! Each timeline task carries the epoch it was spawned under. Suppression,
//! reset and shutdown bump the epoch (and abort the task) while holding the
//! lock, so a task that wakes afterwards sees the mismatch and exits without
//! touching anything.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use parking_lot::ReentrantMutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::machine::{ThreatMachine, ThreatSnapshot};
use super::state::ThreatState;
use crate::config::NightwatchConfig;
use crate::error::{CoreError, Result};
use crate::events::{EventLog, ThreatEvent, EVENT_LOG_CAPACITY};
use crate::lifecycle::ContextId;
use crate::sinks::Collaborators;

/// A collaborator call owed by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    StartAudio,
    StopAudio,
    DisableHazard,
    GotoTerminal,
}

struct Shared {
    inner: Mutex<Inner>,
    effects: parking_lot::Mutex<VecDeque<Effect>>,
    runner: ReentrantMutex<()>,
    sinks: Collaborators,
    terminal_context: ContextId,
    poll_interval: Duration,
}

struct Inner {
    machine: ThreatMachine,
    epoch: u64,
    timeline: Option<JoinHandle<()>>,
    events: EventLog,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log an event and queue its side effects. Called with the state lock
    /// held, so the queue follows transition order.
    fn dispatch(&self, inner: &mut Inner, event: ThreatEvent) {
        let effects: &[Effect] = match &event {
            ThreatEvent::ThreatSpawned { .. } | ThreatEvent::FinalThreatStarted { .. } => {
                &[Effect::StartAudio]
            }
            ThreatEvent::ThreatDefused { .. }
            | ThreatEvent::Suppressed { .. }
            | ThreatEvent::RunReset { .. } => &[Effect::StopAudio],
            ThreatEvent::FinalSequenceArmed { .. } => &[Effect::StopAudio, Effect::DisableHazard],
            ThreatEvent::GameOver { .. } => &[Effect::StopAudio, Effect::GotoTerminal],
            ThreatEvent::RunStarted { .. }
            | ThreatEvent::SpawnScheduled { .. }
            | ThreatEvent::Rearmed { .. } => &[],
        };
        self.queue(effects);
        inner.events.push(event);
    }

    fn queue(&self, effects: &[Effect]) {
        if !effects.is_empty() {
            self.effects.lock().extend(effects.iter().copied());
        }
    }

    /// Execute queued effects. Must be called without the state lock.
    fn run_effects(&self) {
        let _runner = self.runner.lock();
        loop {
            let next = self.effects.lock().pop_front();
            let Some(effect) = next else { break };
            match effect {
                Effect::StartAudio => self.sinks.start_audio(),
                Effect::StopAudio => self.sinks.stop_audio(),
                Effect::DisableHazard => self.sinks.disable_hazard(),
                Effect::GotoTerminal => self.sinks.goto_terminal(&self.terminal_context),
            }
        }
    }

    /// Run `f` under the state lock, then execute whatever it queued.
    fn transact<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let result = {
            let mut inner = self.lock();
            f(&mut inner)
        };
        self.run_effects();
        result
    }

    /// Invalidate the running timeline, if any.
    fn cancel_timeline(&self, inner: &mut Inner) {
        inner.epoch = inner.epoch.wrapping_add(1);
        if let Some(handle) = inner.timeline.take() {
            handle.abort();
        }
    }
}

/// Drives one run's threat timeline and exposes its operations.
///
/// Dropping the scheduler cancels the timeline and stops the audio cue.
pub struct ThreatScheduler {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl ThreatScheduler {
    /// Create a scheduler on the current tokio runtime. The timeline does
    /// not run until [`start`](Self::start) is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or no runtime is active.
    pub fn new(config: &NightwatchConfig, sinks: Collaborators) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| CoreError::NoRuntime)?;
        Self::with_runtime(config, sinks, runtime)
    }

    /// Create a scheduler that spawns its timeline on `runtime`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid.
    pub fn with_runtime(
        config: &NightwatchConfig,
        sinks: Collaborators,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        sinks.set_volume(config.audio.volume);
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                machine: ThreatMachine::new(config),
                epoch: 0,
                timeline: None,
                events: EventLog::with_capacity(EVENT_LOG_CAPACITY),
            }),
            effects: parking_lot::Mutex::new(VecDeque::new()),
            runner: ReentrantMutex::new(()),
            sinks,
            terminal_context: config.contexts.terminal.clone(),
            poll_interval: config.poll_interval(),
        });
        Ok(Self { shared, runtime })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> ThreatState {
        self.shared.lock().machine.state()
    }

    /// True iff the threat is `Active` or `FinalActive`.
    pub fn is_threat_present(&self) -> bool {
        self.shared.lock().machine.is_threat_present()
    }

    /// Current difficulty progress in `[0, 1]`.
    pub fn query_progress(&self) -> f64 {
        let now = self.shared.sinks.current_time();
        self.shared.lock().machine.progress(now)
    }

    pub fn snapshot(&self) -> ThreatSnapshot {
        let now = self.shared.sinks.current_time();
        self.shared.lock().machine.snapshot(now)
    }

    /// Whether this run has been started and not reset since.
    pub fn has_started(&self) -> bool {
        self.shared.lock().machine.run_started()
    }

    /// Whether a timeline task is currently alive.
    pub fn is_running(&self) -> bool {
        self.shared
            .lock()
            .timeline
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Take every event produced since the last call. Only the most recent
    /// events are kept between drains.
    pub fn drain_events(&self) -> Vec<ThreatEvent> {
        self.shared.lock().events.drain()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Start the run's timeline. Returns false if the run was already
    /// started or is over.
    pub fn start(&self) -> bool {
        self.shared.transact(|inner| {
            let Some(event) = inner.machine.start_run() else {
                return false;
            };
            self.shared.dispatch(inner, event);
            self.spawn_timeline(inner);
            true
        })
    }

    /// Scare away the active threat. No-op unless `Active`.
    pub fn defuse(&self) -> bool {
        self.shared.transact(|inner| match inner.machine.defuse() {
            Some(event) => {
                self.shared.dispatch(inner, event);
                true
            }
            None => {
                debug!(state = ?inner.machine.state(), "defuse ignored");
                false
            }
        })
    }

    /// Arm the final sequence. Idempotent.
    pub fn arm_final_sequence(&self) -> bool {
        self.shared.transact(|inner| match inner.machine.arm_final() {
            Some(event) => {
                self.shared.dispatch(inner, event);
                true
            }
            None => {
                debug!(state = ?inner.machine.state(), "final sequence arm ignored");
                false
            }
        })
    }

    /// Force `SuppressedByContext`. The timeline is cancelled and the cue
    /// stopped before this returns.
    pub fn suppress(&self) -> bool {
        self.shared.transact(|inner| {
            let Some(event) = inner.machine.suppress() else {
                return false;
            };
            self.shared.cancel_timeline(inner);
            self.shared.dispatch(inner, event);
            true
        })
    }

    /// Lift suppression and restart the timeline.
    pub fn rearm(&self) -> bool {
        let now = self.shared.sinks.current_time();
        self.shared.transact(|inner| {
            let events = inner.machine.rearm(now);
            if events.is_empty() {
                return false;
            }
            for event in events {
                self.shared.dispatch(inner, event);
            }
            self.spawn_timeline(inner);
            true
        })
    }

    /// Drop the current run. The scheduler returns to an unstarted
    /// `Dormant`; call [`start`](Self::start) to begin a new run.
    pub fn reset(&self) {
        self.shared.transact(|inner| {
            self.shared.cancel_timeline(inner);
            let event = inner.machine.reset();
            self.shared.dispatch(inner, event);
        });
    }

    /// Cancel the timeline and stop the cue without changing state.
    pub fn shutdown(&self) {
        self.shared.transact(|inner| {
            self.shared.cancel_timeline(inner);
            self.shared.queue(&[Effect::StopAudio]);
        });
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn spawn_timeline(&self, inner: &mut Inner) {
        self.shared.cancel_timeline(inner);
        let epoch = inner.epoch;
        let shared = Arc::clone(&self.shared);
        inner.timeline = Some(self.runtime.spawn(run_timeline(shared, epoch)));
        debug!(epoch, "threat timeline spawned");
    }
}

impl Drop for ThreatScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_timeline(shared: Arc<Shared>, epoch: u64) {
    let mut last = Instant::now();
    loop {
        tokio::time::sleep(shared.poll_interval).await;
        let now = Instant::now();
        let elapsed_ms = u64::try_from(now.duration_since(last).as_millis()).unwrap_or(u64::MAX);
        last = now;

        let game_time = shared.sinks.current_time();
        let finished = shared.transact(|inner| {
            if inner.epoch != epoch {
                debug!(epoch, "stale threat timeline exiting");
                return true;
            }
            let events = inner.machine.tick(elapsed_ms, game_time);
            for event in events {
                shared.dispatch(inner, event);
            }
            let state = inner.machine.state();
            if state.needs_timeline() {
                return false;
            }
            info!(?state, "threat timeline finished");
            true
        });
        if finished {
            return;
        }
    }
}
