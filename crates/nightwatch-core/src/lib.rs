//! # Nightwatch Core Library
//!
//! This library decides when a recurring threat is active during a run of
//! the host game: when it spawns, how long it stays, how spawn frequency
//! ramps up as game time advances, how the player defuses it, how a
//! scripted final sequence overrides normal scheduling, and how all of it
//! is suspended in contexts where the threat must not exist.
//!
//! ## Architecture
//!
//! - **Threat Machine**: A pure state machine advanced by `tick()`; every
//!   transition produces a `ThreatEvent`
//! - **Threat Scheduler**: Owns the machine behind one lock and drives it
//!   from a cancellable tokio task
//! - **Lifecycle Gate**: Suppresses, re-arms or resets the run on context
//!   changes
//! - **Progress Curve**: Maps game time to difficulty and spawn windows
//!
//! The game clock, audio, scene navigation and hazard toggles belong to the
//! host and are reached through the traits in [`sinks`] and [`clock`].
//!
//! ## Key Components
//!
//! - [`ThreatScheduler`]: Background timeline and public operations
//! - [`LifecycleGate`]: Context-switch handling
//! - [`NightwatchConfig`]: Scheduler configuration

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod progress;
pub mod sinks;
pub mod threat;

pub use clock::{GameClock, GameTime, ManualClock, ScaledClock};
pub use config::NightwatchConfig;
pub use error::{ConfigError, CoreError};
pub use events::{GameOverCause, ThreatEvent};
pub use lifecycle::{ContextId, GateAction, LifecycleGate};
pub use progress::{ProgressCurve, SpawnBounds, SpawnWindow};
pub use sinks::{AudioCue, Collaborators, HazardSuppressor, RecordingSinks, SceneNavigator, SinkCall};
pub use threat::{
    SessionOutcome, ThreatMachine, ThreatScheduler, ThreatSession, ThreatSnapshot, ThreatState,
};
