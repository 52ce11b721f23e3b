use serde::{Deserialize, Serialize};

use crate::clock::GameTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatState {
    /// Run created; waiting out the start-of-run grace delay.
    Dormant,
    WaitingToSpawn,
    Active,
    /// Defused; returns to `WaitingToSpawn` on the next step.
    Scared,
    /// Final sequence armed; waiting for the game-time threshold.
    FinalWaiting,
    FinalActive,
    /// Terminal. Nothing leaves this state within a run.
    GameOver,
    SuppressedByContext,
}

impl ThreatState {
    pub fn is_threat_present(self) -> bool {
        matches!(self, ThreatState::Active | ThreatState::FinalActive)
    }

    /// States from which the final sequence may be armed.
    pub fn accepts_final_sequence(self) -> bool {
        matches!(
            self,
            ThreatState::Dormant
                | ThreatState::WaitingToSpawn
                | ThreatState::Active
                | ThreatState::Scared
        )
    }

    /// Whether the background timeline has anything left to drive.
    pub fn needs_timeline(self) -> bool {
        !matches!(
            self,
            ThreatState::GameOver | ThreatState::SuppressedByContext
        )
    }
}

/// How a threat session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Ran out without a defuse; the run is over.
    TimedOut,
    Defused,
    /// Cut short by the final sequence or a context switch.
    Cancelled,
}

/// One episode of the threat being active.
///
/// Times are milliseconds of run time (time the timeline has been driving
/// this run), not game time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatSession {
    pub started_at_ms: u64,
    pub duration_ms: u64,
    #[serde(default)]
    pub ended_at_ms: Option<u64>,
    #[serde(default)]
    pub outcome: Option<SessionOutcome>,
}

impl ThreatSession {
    pub fn open(started_at_ms: u64, duration_ms: u64) -> Self {
        Self {
            started_at_ms,
            duration_ms,
            ended_at_ms: None,
            outcome: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.outcome.is_none()
    }

    pub fn close(&mut self, outcome: SessionOutcome, now_ms: u64) {
        if self.is_open() {
            self.outcome = Some(outcome);
            self.ended_at_ms = Some(now_ms);
        }
    }

    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        self.ended_at_ms
            .unwrap_or(now_ms)
            .saturating_sub(self.started_at_ms)
    }

    /// Whether the session ended the run.
    pub fn is_terminal(&self) -> bool {
        self.outcome == Some(SessionOutcome::TimedOut)
    }
}

/// The scripted end-of-night override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalSequence {
    /// Game time at which the cue starts.
    pub threshold: GameTime,
    /// Delay after the threshold before the terminal event.
    pub delay_ms: u64,
    pub armed: bool,
    #[serde(default)]
    pub started_at_ms: Option<u64>,
}

impl FinalSequence {
    pub fn new(threshold: GameTime, delay_ms: u64) -> Self {
        Self {
            threshold,
            delay_ms,
            armed: false,
            started_at_ms: None,
        }
    }

    pub fn threshold_reached(&self, now: GameTime) -> bool {
        now >= self.threshold
    }
}
