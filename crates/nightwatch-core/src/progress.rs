//! Difficulty ramp.
//!
//! A run's difficulty is a fraction in `[0, 1]` that rises linearly with game
//! time between two configured points. The spawn window (the range a
//! cooldown is drawn from) is interpolated between its initial and final
//! bounds using that fraction.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::GameTime;

/// Maps game time to a progress fraction in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressCurve {
    /// Game time at which the ramp begins (progress 0)
    pub start: GameTime,
    /// Game time at which the ramp ends (progress 1)
    pub end: GameTime,
}

impl ProgressCurve {
    pub fn new(start: GameTime, end: GameTime) -> Self {
        Self { start, end }
    }

    /// Progress at `now`. Times before the ramp map to 0, times after to 1.
    pub fn progress(&self, now: GameTime) -> f64 {
        let span = self.end.as_hours() - self.start.as_hours();
        if span <= 0.0 {
            return if now >= self.end { 1.0 } else { 0.0 };
        }
        ((now.as_hours() - self.start.as_hours()) / span).clamp(0.0, 1.0)
    }

    /// Progress for an optional clock reading. An unavailable clock means
    /// the easiest difficulty.
    pub fn progress_or_default(&self, now: Option<GameTime>) -> f64 {
        now.map(|t| self.progress(t)).unwrap_or(0.0)
    }
}

/// Range, in seconds, that the next cooldown is drawn from.
///
/// `min_secs <= max_secs` always holds; constructing a window with the bounds
/// reversed swaps them.
/// Longest wait, in seconds, the scheduler will ever schedule (one day).
pub const MAX_WAIT_SECS: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnWindow {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl SpawnWindow {
    pub fn new(min_secs: f64, max_secs: f64) -> Self {
        if min_secs > max_secs {
            Self {
                min_secs: max_secs,
                max_secs: min_secs,
            }
        } else {
            Self { min_secs, max_secs }
        }
    }

    /// Draws a cooldown uniformly from the window, clamped to
    /// `[0, MAX_WAIT_SECS]`.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let min = clamp_wait(self.min_secs);
        let max = clamp_wait(self.max_secs).max(min);
        let secs = if max > min { rng.gen_range(min..=max) } else { min };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }

    pub fn contains(&self, secs: f64) -> bool {
        secs >= self.min_secs && secs <= self.max_secs
    }
}

fn clamp_wait(secs: f64) -> f64 {
    if secs.is_nan() {
        0.0
    } else {
        secs.clamp(0.0, MAX_WAIT_SECS)
    }
}

/// Endpoint windows for the ramp: `initial` applies at progress 0 and
/// `last` at progress 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnBounds {
    pub initial: SpawnWindow,
    pub last: SpawnWindow,
}

impl SpawnBounds {
    pub fn new(initial: SpawnWindow, last: SpawnWindow) -> Self {
        Self { initial, last }
    }

    /// Window at `progress`, linearly interpolated per bound.
    pub fn window_at(&self, progress: f64) -> SpawnWindow {
        let p = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        let min = lerp(self.initial.min_secs, self.last.min_secs, p);
        let max = lerp(self.initial.max_secs, self.last.max_secs, p);
        if min > max {
            warn!(min, max, "spawn window bounds reversed; swapping");
        }
        SpawnWindow::new(min, max)
    }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}
