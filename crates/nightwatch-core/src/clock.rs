//! In-game clock access.
//!
//! The host game owns the clock and advances it; this crate only ever asks
//! "what time is it now?". A clock that cannot answer returns `None`, and
//! callers fall back to the start of the difficulty ramp.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::ConfigError;

/// Elapsed in-game time as an hour/minute pair.
///
/// Written as `"H:MM"` in configuration files (e.g. `"4:40"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GameTime {
    hour: u32,
    minute: u32,
}

impl GameTime {
    /// Latest representable hour.
    pub const MAX_HOUR: u32 = 999;

    /// Returns `None` when `minute` is not in `0..60` or `hour` exceeds
    /// [`MAX_HOUR`](Self::MAX_HOUR).
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (minute < 60 && hour <= Self::MAX_HOUR).then_some(Self { hour, minute })
    }

    /// Saturates at `MAX_HOUR:59`.
    pub fn from_total_minutes(minutes: u32) -> Self {
        let minutes = minutes.min(Self::MAX_HOUR * 60 + 59);
        Self {
            hour: minutes / 60,
            minute: minutes % 60,
        }
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn total_minutes(&self) -> u32 {
        self.hour * 60 + self.minute
    }

    /// Fractional hours, e.g. 4:30 -> 4.5.
    pub fn as_hours(&self) -> f64 {
        self.hour as f64 + self.minute as f64 / 60.0
    }

    pub fn plus_minutes(&self, minutes: u32) -> Self {
        Self::from_total_minutes(self.total_minutes().saturating_add(minutes))
    }
}

impl fmt::Display for GameTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for GameTime {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::ParseFailed(format!("expected game time as H:MM, got '{s}'"));
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.parse().map_err(|_| invalid())?;
        let minute: u32 = minute.parse().map_err(|_| invalid())?;
        GameTime::new(hour, minute).ok_or_else(invalid)
    }
}

impl TryFrom<String> for GameTime {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GameTime> for String {
    fn from(value: GameTime) -> Self {
        value.to_string()
    }
}

/// Read-only view of the host's in-game clock.
pub trait GameClock: Send + Sync {
    /// Current elapsed game time, or `None` if the clock is not available
    /// (e.g. the host has not loaded it yet).
    fn current_time(&self) -> Option<GameTime>;
}

/// A clock whose time is set explicitly. Used by tests and by hosts that
/// push their clock value in rather than exposing it for polling.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Option<GameTime>>,
}

impl ManualClock {
    pub fn new(start: GameTime) -> Self {
        Self {
            now: Mutex::new(Some(start)),
        }
    }

    /// A clock that reports itself as unavailable until `set` is called.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn set(&self, time: GameTime) {
        if let Ok(mut now) = self.now.lock() {
            *now = Some(time);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut now) = self.now.lock() {
            *now = None;
        }
    }

    pub fn advance_minutes(&self, minutes: u32) {
        if let Ok(mut now) = self.now.lock() {
            *now = now.map(|t| t.plus_minutes(minutes));
        }
    }
}

impl GameClock for ManualClock {
    fn current_time(&self) -> Option<GameTime> {
        self.now.lock().ok().and_then(|now| *now)
    }
}

/// A clock that runs game time faster than real time.
///
/// Uses tokio's clock, so it follows paused time in tests.
#[derive(Debug, Clone)]
pub struct ScaledClock {
    start: GameTime,
    minutes_per_second: f64,
    origin: Instant,
}

impl ScaledClock {
    pub fn new(start: GameTime, minutes_per_second: f64) -> Self {
        Self {
            start,
            minutes_per_second: minutes_per_second.max(0.0),
            origin: Instant::now(),
        }
    }
}

impl GameClock for ScaledClock {
    fn current_time(&self) -> Option<GameTime> {
        let elapsed_min = self.origin.elapsed().as_secs_f64() * self.minutes_per_second;
        Some(self.start.plus_minutes(elapsed_min.floor() as u32))
    }
}
