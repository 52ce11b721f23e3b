use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::GameTime;
use crate::progress::SpawnWindow;
use crate::threat::ThreatState;

/// Why a run ended in `GameOver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOverCause {
    /// An active threat was not defused in time.
    SessionTimedOut,
    /// The final sequence ran its course.
    FinalSequence,
}

/// Every state change in the scheduler produces an Event.
/// Hosts poll for events; the scheduler maps them to collaborator calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ThreatEvent {
    RunStarted {
        grace_secs: f64,
        at: DateTime<Utc>,
    },
    /// A cooldown was drawn; the threat spawns when it runs out.
    SpawnScheduled {
        progress: f64,
        window: SpawnWindow,
        wait_secs: f64,
        at: DateTime<Utc>,
    },
    ThreatSpawned {
        session_secs: f64,
        at: DateTime<Utc>,
    },
    ThreatDefused {
        active_for_secs: f64,
        at: DateTime<Utc>,
    },
    FinalSequenceArmed {
        threshold: GameTime,
        at: DateTime<Utc>,
    },
    /// Game time reached the final threshold; the terminal countdown began.
    FinalThreatStarted {
        delay_secs: f64,
        at: DateTime<Utc>,
    },
    GameOver {
        cause: GameOverCause,
        at: DateTime<Utc>,
    },
    Suppressed {
        from: ThreatState,
        at: DateTime<Utc>,
    },
    Rearmed {
        to: ThreatState,
        at: DateTime<Utc>,
    },
    RunReset {
        at: DateTime<Utc>,
    },
}

impl ThreatEvent {
    /// Short name, matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            ThreatEvent::RunStarted { .. } => "RunStarted",
            ThreatEvent::SpawnScheduled { .. } => "SpawnScheduled",
            ThreatEvent::ThreatSpawned { .. } => "ThreatSpawned",
            ThreatEvent::ThreatDefused { .. } => "ThreatDefused",
            ThreatEvent::FinalSequenceArmed { .. } => "FinalSequenceArmed",
            ThreatEvent::FinalThreatStarted { .. } => "FinalThreatStarted",
            ThreatEvent::GameOver { .. } => "GameOver",
            ThreatEvent::Suppressed { .. } => "Suppressed",
            ThreatEvent::Rearmed { .. } => "Rearmed",
            ThreatEvent::RunReset { .. } => "RunReset",
        }
    }
}

/// Events kept for a host that has not drained them yet.
pub(crate) const EVENT_LOG_CAPACITY: usize = 1024;

/// Bounded FIFO of undrained events. When full, the oldest entry is dropped.
#[derive(Debug)]
pub(crate) struct EventLog {
    entries: VecDeque<ThreatEvent>,
    capacity: usize,
    dropped: u64,
}

impl EventLog {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            dropped: 0,
        }
    }

    pub(crate) fn push(&mut self, event: ThreatEvent) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
            if self.dropped == 1 {
                warn!(capacity = self.capacity, "event log full; dropping oldest events until drained");
            }
        }
        self.entries.push_back(event);
    }

    pub(crate) fn drain(&mut self) -> Vec<ThreatEvent> {
        self.dropped = 0;
        self.entries.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Events discarded since the last drain.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }
}
