//! Context-switch gate for the threat scheduler.
//!
//! The host reports every context (scene/level) change. Some contexts are
//! safe: the threat must not exist there. Top-level contexts (the main menu)
//! are safe and also end the run outright, so the next gameplay context
//! starts a fresh one. Switching between two ordinary contexts never
//! disturbs an episode in progress.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ContextsConfig;
use crate::threat::{ThreatScheduler, ThreatState};

/// Context identifier (scene or level name).
pub type ContextId = String;

/// What the gate did in response to a context change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    /// Entered a safe context; the threat is suspended.
    Suppressed,
    /// Entered a top-level context; the run was dropped.
    Reset,
    /// Left a safe context; the suspended run resumed.
    Rearmed,
    /// Entered gameplay with no run in progress; a new run started.
    Started,
    Unchanged,
}

/// Forces the scheduler into or out of `SuppressedByContext` on context
/// changes.
#[derive(Debug, Clone, Default)]
pub struct LifecycleGate {
    top_level: HashSet<ContextId>,
    safe: HashSet<ContextId>,
    suppressed: bool,
}

impl LifecycleGate {
    /// Top-level contexts are implicitly safe.
    pub fn new<T, S>(top_level: T, safe: S) -> Self
    where
        T: IntoIterator<Item = ContextId>,
        S: IntoIterator<Item = ContextId>,
    {
        Self {
            top_level: top_level.into_iter().collect(),
            safe: safe.into_iter().collect(),
            suppressed: false,
        }
    }

    pub fn from_config(config: &ContextsConfig) -> Self {
        Self::new(config.top_level.iter().cloned(), config.safe.iter().cloned())
    }

    pub fn is_top_level(&self, context: &str) -> bool {
        self.top_level.contains(context)
    }

    pub fn is_safe(&self, context: &str) -> bool {
        self.is_top_level(context) || self.safe.contains(context)
    }

    /// Whether the last context change left the threat suspended.
    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// React to the host entering `context`.
    pub fn on_context_changed(&mut self, context: &str, scheduler: &ThreatScheduler) -> GateAction {
        if self.is_top_level(context) {
            scheduler.suppress();
            scheduler.reset();
            self.suppressed = true;
            info!(context, "top-level context; threat run reset");
            return GateAction::Reset;
        }

        if self.safe.contains(context) {
            self.suppressed = true;
            if scheduler.suppress() {
                info!(context, "safe context; threat suppressed");
                return GateAction::Suppressed;
            }
            return GateAction::Unchanged;
        }

        self.suppressed = false;
        if scheduler.state() == ThreatState::SuppressedByContext {
            if scheduler.rearm() {
                info!(context, "left safe context; threat re-armed");
                return GateAction::Rearmed;
            }
        } else if !scheduler.has_started() && scheduler.start() {
            info!(context, "gameplay context; threat run started");
            return GateAction::Started;
        }
        GateAction::Unchanged
    }
}
