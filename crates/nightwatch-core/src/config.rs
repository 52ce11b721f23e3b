//! TOML-based scheduler configuration.
//!
//! Holds the tuning of one run:
//! - Spawn cooldown bounds at the start and end of the difficulty ramp
//! - The game-time ramp itself
//! - Session length, start-of-run grace and timeline polling granularity
//! - The final sequence threshold and delay
//! - Which contexts suppress or reset the threat
//!
//! Configuration is stored at `~/.config/nightwatch/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::GameTime;
use crate::error::{ConfigError, Result};
use crate::lifecycle::ContextId;
use crate::progress::{ProgressCurve, SpawnBounds, SpawnWindow, MAX_WAIT_SECS};

/// Cooldown bounds, in seconds, between threat spawns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnConfig {
    #[serde(default = "default_initial_min")]
    pub initial_min_secs: f64,
    #[serde(default = "default_initial_max")]
    pub initial_max_secs: f64,
    #[serde(default = "default_final_min")]
    pub final_min_secs: f64,
    #[serde(default = "default_final_max")]
    pub final_max_secs: f64,
}

/// Game-time span over which difficulty ramps from 0 to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RampConfig {
    #[serde(default = "default_ramp_start")]
    pub start: GameTime,
    #[serde(default = "default_ramp_end")]
    pub end: GameTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long an active threat lasts before it ends the run.
    #[serde(default = "default_twenty")]
    pub duration_secs: f64,
    /// Delay between run start and the first cooldown.
    #[serde(default = "default_grace")]
    pub grace_secs: f64,
    /// Granularity at which the timeline re-checks its waits.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalSequenceConfig {
    #[serde(default = "default_final_threshold")]
    pub threshold: GameTime,
    #[serde(default = "default_twenty")]
    pub delay_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextsConfig {
    /// Contexts that end the run outright (main menu).
    #[serde(default = "default_top_level")]
    pub top_level: Vec<ContextId>,
    /// Contexts in which the threat is suspended.
    #[serde(default = "default_safe")]
    pub safe: Vec<ContextId>,
    /// Context opened when the run is lost.
    #[serde(default = "default_terminal")]
    pub terminal: ContextId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_volume")]
    pub volume: f64,
}

/// Scheduler configuration.
///
/// Serialized to/from TOML at `~/.config/nightwatch/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightwatchConfig {
    /// Seed for cooldown draws (None = random).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default)]
    pub spawn: SpawnConfig,
    #[serde(default)]
    pub ramp: RampConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub final_sequence: FinalSequenceConfig,
    #[serde(default)]
    pub contexts: ContextsConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

// Default functions
fn default_initial_min() -> f64 {
    30.0
}
fn default_initial_max() -> f64 {
    60.0
}
fn default_final_min() -> f64 {
    10.0
}
fn default_final_max() -> f64 {
    20.0
}
fn default_twenty() -> f64 {
    20.0
}
fn default_grace() -> f64 {
    3.0
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_ramp_start() -> GameTime {
    GameTime::from_total_minutes(4 * 60)
}
fn default_ramp_end() -> GameTime {
    GameTime::from_total_minutes(9 * 60)
}
fn default_final_threshold() -> GameTime {
    GameTime::from_total_minutes(4 * 60 + 40)
}
fn default_top_level() -> Vec<ContextId> {
    vec!["main_menu".into()]
}
fn default_safe() -> Vec<ContextId> {
    vec!["call_mom".into()]
}
fn default_terminal() -> ContextId {
    "jumpscare".into()
}
fn default_volume() -> f64 {
    0.3
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            initial_min_secs: default_initial_min(),
            initial_max_secs: default_initial_max(),
            final_min_secs: default_final_min(),
            final_max_secs: default_final_max(),
        }
    }
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            start: default_ramp_start(),
            end: default_ramp_end(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_secs: 20.0,
            grace_secs: 3.0,
            poll_interval_ms: 1_000,
        }
    }
}

impl Default for FinalSequenceConfig {
    fn default() -> Self {
        Self {
            threshold: default_final_threshold(),
            delay_secs: 20.0,
        }
    }
}

impl Default for ContextsConfig {
    fn default() -> Self {
        Self {
            top_level: default_top_level(),
            safe: default_safe(),
            terminal: default_terminal(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self { volume: 0.3 }
    }
}

impl Default for NightwatchConfig {
    fn default() -> Self {
        Self {
            seed: None,
            spawn: SpawnConfig::default(),
            ramp: RampConfig::default(),
            session: SessionConfig::default(),
            final_sequence: FinalSequenceConfig::default(),
            contexts: ContextsConfig::default(),
            audio: AudioConfig::default(),
        }
    }
}

/// Returns `~/.config/nightwatch[-dev]/` based on NIGHTWATCH_ENV.
///
/// Set NIGHTWATCH_ENV=dev to use the development directory.
pub fn config_dir() -> PathBuf {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("NIGHTWATCH_ENV").unwrap_or_else(|_| "production".to_string());

    if env == "dev" {
        base_dir.join("nightwatch-dev")
    } else {
        base_dir.join("nightwatch")
    }
}

impl NightwatchConfig {
    pub fn default_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    /// Load from `path`, or return defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or
    /// validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }
                .into())
            }
        };
        let cfg = Self::from_toml(&content)?;
        Ok(cfg)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let cfg: NightwatchConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Persist to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| save_failed(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Check value ranges. Reversed spawn bounds are allowed (they are
    /// swapped when drawn) but logged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = [
            ("spawn.initial_min_secs", self.spawn.initial_min_secs),
            ("spawn.initial_max_secs", self.spawn.initial_max_secs),
            ("spawn.final_min_secs", self.spawn.final_min_secs),
            ("spawn.final_max_secs", self.spawn.final_max_secs),
            ("session.grace_secs", self.session.grace_secs),
            ("final_sequence.delay_secs", self.final_sequence.delay_secs),
        ];
        for (key, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::invalid(key, format!("must be a non-negative number, got {value}")));
            }
        }
        if !self.session.duration_secs.is_finite() || self.session.duration_secs <= 0.0 {
            return Err(ConfigError::invalid("session.duration_secs", "must be positive"));
        }
        let bounded = non_negative
            .into_iter()
            .chain([("session.duration_secs", self.session.duration_secs)]);
        for (key, value) in bounded {
            if value > MAX_WAIT_SECS {
                return Err(ConfigError::invalid(
                    key,
                    format!("must be at most {MAX_WAIT_SECS} seconds, got {value}"),
                ));
            }
        }
        if self.session.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("session.poll_interval_ms", "must be positive"));
        }
        if self.ramp.end <= self.ramp.start {
            return Err(ConfigError::invalid(
                "ramp.end",
                format!("must be after ramp.start ({})", self.ramp.start),
            ));
        }
        if !(0.0..=1.0).contains(&self.audio.volume) {
            return Err(ConfigError::invalid("audio.volume", "must be within 0.0..=1.0"));
        }
        if self.contexts.terminal.trim().is_empty() {
            return Err(ConfigError::invalid("contexts.terminal", "must not be empty"));
        }
        if self.spawn.initial_min_secs > self.spawn.initial_max_secs
            || self.spawn.final_min_secs > self.spawn.final_max_secs
        {
            warn!("spawn min exceeds max; bounds will be swapped when drawn");
        }
        Ok(())
    }

    pub fn spawn_bounds(&self) -> SpawnBounds {
        SpawnBounds::new(
            SpawnWindow::new(self.spawn.initial_min_secs, self.spawn.initial_max_secs),
            SpawnWindow::new(self.spawn.final_min_secs, self.spawn.final_max_secs),
        )
    }

    pub fn progress_curve(&self) -> ProgressCurve {
        ProgressCurve::new(self.ramp.start, self.ramp.end)
    }

    pub fn session_ms(&self) -> u64 {
        secs_to_ms(self.session.duration_secs)
    }

    pub fn grace_ms(&self) -> u64 {
        secs_to_ms(self.session.grace_secs)
    }

    pub fn final_delay_ms(&self) -> u64 {
        secs_to_ms(self.final_sequence.delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.session.poll_interval_ms.max(1))
    }

    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;
                let bad = |e: &dyn std::fmt::Display| ConfigError::invalid(key, e.to_string());

                let new_value = match existing {
                    serde_json::Value::Bool(_) => {
                        serde_json::Value::Bool(value.parse::<bool>().map_err(|e| bad(&e))?)
                    }
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| bad(&format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(bad(&format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| bad(&e))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by dot-separated key. The result is validated
    /// before it replaces `self`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the updated config is invalid.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self)
            .map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: NightwatchConfig =
            serde_json::from_value(json).map_err(|e| ConfigError::invalid(key, e.to_string()))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

fn secs_to_ms(secs: f64) -> u64 {
    (secs.max(0.0) * 1000.0).round() as u64
}
