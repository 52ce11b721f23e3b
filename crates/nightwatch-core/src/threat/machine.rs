//! Threat state machine.
//!
//! The machine is the transition table and nothing else. It has no threads
//! and no clock of its own: the caller advances it with `tick()`, passing
//! the run time that elapsed and the current game time. External operations
//! (`defuse`, `arm_final`, `suppress`, `rearm`, `reset`) are plain methods.
//! Every transition returns the `ThreatEvent`s it produced; an operation
//! that is not valid in the current state returns nothing and changes
//! nothing.
//!
//! ## State Transitions
//!
//! ```text
//! Dormant -> WaitingToSpawn -> Active -> (Scared -> WaitingToSpawn | GameOver)
//! {Dormant, WaitingToSpawn, Active, Scared} -> FinalWaiting -> FinalActive -> GameOver
//! any -> SuppressedByContext -> (WaitingToSpawn | FinalWaiting)
//! ```

use chrono::Utc;
use rand::SeedableRng;
use rand_pcg::Mcg128Xsl64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::state::{FinalSequence, SessionOutcome, ThreatSession, ThreatState};
use crate::clock::GameTime;
use crate::config::NightwatchConfig;
use crate::events::{GameOverCause, ThreatEvent};
use crate::progress::{ProgressCurve, SpawnBounds, SpawnWindow};

/// Serializable view of the machine at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatSnapshot {
    pub state: ThreatState,
    pub threat_present: bool,
    pub progress: f64,
    /// Window the current (or last) cooldown was drawn from.
    pub window: Option<SpawnWindow>,
    /// Remaining time on the current wait, if any.
    pub remaining_ms: u64,
    pub session: Option<ThreatSession>,
    pub final_armed: bool,
    pub game_over: bool,
    pub run_ms: u64,
    pub spawned: u32,
    pub defused: u32,
}

/// Core threat state machine.
#[derive(Debug)]
pub struct ThreatMachine {
    bounds: SpawnBounds,
    curve: ProgressCurve,
    session_ms: u64,
    grace_ms: u64,
    rng: Mcg128Xsl64,

    state: ThreatState,
    run_started: bool,
    /// Run time driven so far, in milliseconds.
    run_ms: u64,
    /// Remaining time on the current wait (grace, cooldown, session, final delay).
    remaining_ms: u64,
    window: Option<SpawnWindow>,
    session: Option<ThreatSession>,
    last_session: Option<ThreatSession>,
    final_seq: FinalSequence,
    /// One-way within a run: once set, no transition fires again.
    game_over: bool,
    spawned: u32,
    defused: u32,
}

impl ThreatMachine {
    /// Create a machine for a fresh run, in `Dormant`.
    pub fn new(config: &NightwatchConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => Mcg128Xsl64::seed_from_u64(seed),
            None => Mcg128Xsl64::from_entropy(),
        };
        let grace_ms = config.grace_ms();
        Self {
            bounds: config.spawn_bounds(),
            curve: config.progress_curve(),
            session_ms: config.session_ms(),
            grace_ms,
            rng,
            state: ThreatState::Dormant,
            run_started: false,
            run_ms: 0,
            remaining_ms: grace_ms,
            window: None,
            session: None,
            last_session: None,
            final_seq: FinalSequence::new(
                config.final_sequence.threshold,
                config.final_delay_ms(),
            ),
            game_over: false,
            spawned: 0,
            defused: 0,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> ThreatState {
        self.state
    }

    pub fn is_threat_present(&self) -> bool {
        self.state.is_threat_present()
    }

    pub fn is_game_over(&self) -> bool {
        self.game_over
    }

    pub fn final_armed(&self) -> bool {
        self.final_seq.armed
    }

    pub fn run_started(&self) -> bool {
        self.run_started
    }

    pub fn remaining_ms(&self) -> u64 {
        self.remaining_ms
    }

    pub fn window(&self) -> Option<SpawnWindow> {
        self.window
    }

    pub fn session(&self) -> Option<&ThreatSession> {
        self.session.as_ref()
    }

    pub fn last_session(&self) -> Option<&ThreatSession> {
        self.last_session.as_ref()
    }

    pub fn curve(&self) -> &ProgressCurve {
        &self.curve
    }

    /// Progress for a clock reading; an unavailable clock degrades to 0.
    pub fn progress(&self, now: Option<GameTime>) -> f64 {
        if now.is_none() {
            warn!("game clock unavailable; using progress 0");
        }
        self.curve.progress_or_default(now)
    }

    pub fn snapshot(&self, now: Option<GameTime>) -> ThreatSnapshot {
        ThreatSnapshot {
            state: self.state,
            threat_present: self.is_threat_present(),
            progress: self.curve.progress_or_default(now),
            window: self.window,
            remaining_ms: self.remaining_ms,
            session: self.session.clone().or_else(|| self.last_session.clone()),
            final_armed: self.final_seq.armed,
            game_over: self.game_over,
            run_ms: self.run_ms,
            spawned: self.spawned,
            defused: self.defused,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Mark the run as started. Returns `None` if it already was.
    pub fn start_run(&mut self) -> Option<ThreatEvent> {
        if self.run_started || self.game_over {
            return None;
        }
        self.run_started = true;
        info!(grace_ms = self.grace_ms, "threat run started");
        Some(ThreatEvent::RunStarted {
            grace_secs: self.grace_ms as f64 / 1000.0,
            at: Utc::now(),
        })
    }

    /// Advance the timeline by `elapsed_ms` of run time.
    ///
    /// At most one timed transition fires per call. `Scared` resolves to
    /// `WaitingToSpawn` on the first tick after the defuse.
    pub fn tick(&mut self, elapsed_ms: u64, now: Option<GameTime>) -> Vec<ThreatEvent> {
        if self.game_over || !self.state.needs_timeline() {
            return Vec::new();
        }
        self.run_ms = self.run_ms.saturating_add(elapsed_ms);

        match self.state {
            ThreatState::Dormant => {
                if self.count_down(elapsed_ms) {
                    return vec![self.begin_wait(now)];
                }
            }
            ThreatState::WaitingToSpawn => {
                if self.count_down(elapsed_ms) {
                    return self.spawn(now);
                }
            }
            ThreatState::Active => {
                if self.count_down(elapsed_ms) {
                    self.close_session(SessionOutcome::TimedOut);
                    return self
                        .fire_game_over(GameOverCause::SessionTimedOut)
                        .into_iter()
                        .collect();
                }
            }
            ThreatState::Scared => {
                return vec![self.begin_wait(now)];
            }
            ThreatState::FinalWaiting => match now {
                Some(t) if self.final_seq.threshold_reached(t) => {
                    return vec![self.begin_final_countdown(t)];
                }
                Some(_) => {}
                None => warn!("game clock unavailable; final sequence keeps waiting"),
            },
            ThreatState::FinalActive => {
                if self.count_down(elapsed_ms) {
                    return self
                        .fire_game_over(GameOverCause::FinalSequence)
                        .into_iter()
                        .collect();
                }
            }
            ThreatState::GameOver | ThreatState::SuppressedByContext => {}
        }
        Vec::new()
    }

    /// Scare the active threat away. Only valid while `Active`.
    pub fn defuse(&mut self) -> Option<ThreatEvent> {
        if self.game_over || self.state != ThreatState::Active {
            return None;
        }
        let active_for_ms = self
            .session
            .as_ref()
            .map(|s| s.elapsed_ms(self.run_ms))
            .unwrap_or(0);
        self.close_session(SessionOutcome::Defused);
        self.state = ThreatState::Scared;
        self.remaining_ms = 0;
        self.defused += 1;
        info!(active_for_ms, "threat defused");
        Some(ThreatEvent::ThreatDefused {
            active_for_secs: active_for_ms as f64 / 1000.0,
            at: Utc::now(),
        })
    }

    /// Arm the final sequence. Idempotent; rejected once the run is over
    /// or while suppressed.
    pub fn arm_final(&mut self) -> Option<ThreatEvent> {
        if self.game_over || self.final_seq.armed || !self.state.accepts_final_sequence() {
            return None;
        }
        self.close_session(SessionOutcome::Cancelled);
        self.final_seq.armed = true;
        self.state = ThreatState::FinalWaiting;
        self.remaining_ms = 0;
        info!(threshold = %self.final_seq.threshold, "final sequence armed");
        Some(ThreatEvent::FinalSequenceArmed {
            threshold: self.final_seq.threshold,
            at: Utc::now(),
        })
    }

    /// Force `SuppressedByContext`, cancelling any wait or open session.
    /// Repeated calls are no-ops; `GameOver` is never left.
    pub fn suppress(&mut self) -> Option<ThreatEvent> {
        if self.game_over || self.state == ThreatState::SuppressedByContext {
            return None;
        }
        let from = self.state;
        self.close_session(SessionOutcome::Cancelled);
        self.final_seq.started_at_ms = None;
        self.state = ThreatState::SuppressedByContext;
        self.remaining_ms = 0;
        info!(?from, "threat suppressed by context");
        Some(ThreatEvent::Suppressed {
            from,
            at: Utc::now(),
        })
    }

    /// Lift suppression. Normal runs restart from a fresh cooldown; an
    /// armed final sequence goes back to waiting for its threshold.
    pub fn rearm(&mut self, now: Option<GameTime>) -> Vec<ThreatEvent> {
        if self.game_over || self.state != ThreatState::SuppressedByContext {
            return Vec::new();
        }
        self.run_started = true;
        if self.final_seq.armed {
            self.state = ThreatState::FinalWaiting;
            info!("threat re-armed into final sequence");
            return vec![ThreatEvent::Rearmed {
                to: ThreatState::FinalWaiting,
                at: Utc::now(),
            }];
        }
        let mut events = vec![ThreatEvent::Rearmed {
            to: ThreatState::WaitingToSpawn,
            at: Utc::now(),
        }];
        info!("threat re-armed");
        events.push(self.begin_wait(now));
        events
    }

    /// Drop the run entirely. The machine returns to a fresh `Dormant`
    /// that has not been started. Always succeeds.
    pub fn reset(&mut self) -> ThreatEvent {
        self.state = ThreatState::Dormant;
        self.run_started = false;
        self.run_ms = 0;
        self.remaining_ms = self.grace_ms;
        self.window = None;
        self.session = None;
        self.last_session = None;
        self.final_seq = FinalSequence::new(self.final_seq.threshold, self.final_seq.delay_ms);
        self.game_over = false;
        self.spawned = 0;
        self.defused = 0;
        info!("threat run reset");
        ThreatEvent::RunReset { at: Utc::now() }
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Returns true when the current wait has run out.
    fn count_down(&mut self, elapsed_ms: u64) -> bool {
        self.remaining_ms = self.remaining_ms.saturating_sub(elapsed_ms);
        self.remaining_ms == 0
    }

    fn begin_wait(&mut self, now: Option<GameTime>) -> ThreatEvent {
        let progress = self.progress(now);
        let window = self.bounds.window_at(progress);
        let wait = window.draw(&mut self.rng);
        self.window = Some(window);
        self.remaining_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        self.state = ThreatState::WaitingToSpawn;
        debug!(
            progress,
            min_secs = window.min_secs,
            max_secs = window.max_secs,
            wait_secs = wait.as_secs_f64(),
            "next spawn scheduled"
        );
        ThreatEvent::SpawnScheduled {
            progress,
            window,
            wait_secs: wait.as_secs_f64(),
            at: Utc::now(),
        }
    }

    fn spawn(&mut self, now: Option<GameTime>) -> Vec<ThreatEvent> {
        if !self.open_session() {
            return vec![self.begin_wait(now)];
        }
        self.state = ThreatState::Active;
        self.remaining_ms = self.session_ms;
        self.spawned += 1;
        info!(session_ms = self.session_ms, "threat spawned");
        vec![ThreatEvent::ThreatSpawned {
            session_secs: self.session_ms as f64 / 1000.0,
            at: Utc::now(),
        }]
    }

    /// Opens a session. Refuses if one is already open.
    fn open_session(&mut self) -> bool {
        if self.session.as_ref().is_some_and(ThreatSession::is_open) {
            warn!("threat session already open; refusing to open another");
            return false;
        }
        self.session = Some(ThreatSession::open(self.run_ms, self.session_ms));
        true
    }

    fn close_session(&mut self, outcome: SessionOutcome) {
        if let Some(mut session) = self.session.take() {
            session.close(outcome, self.run_ms);
            self.last_session = Some(session);
        }
    }

    fn begin_final_countdown(&mut self, now: GameTime) -> ThreatEvent {
        self.state = ThreatState::FinalActive;
        self.remaining_ms = self.final_seq.delay_ms;
        self.final_seq.started_at_ms = Some(self.run_ms);
        info!(game_time = %now, delay_ms = self.final_seq.delay_ms, "final threat started");
        ThreatEvent::FinalThreatStarted {
            delay_secs: self.final_seq.delay_ms as f64 / 1000.0,
            at: Utc::now(),
        }
    }

    fn fire_game_over(&mut self, cause: GameOverCause) -> Option<ThreatEvent> {
        if self.game_over {
            return None;
        }
        self.game_over = true;
        self.state = ThreatState::GameOver;
        self.remaining_ms = 0;
        info!(?cause, "game over");
        Some(ThreatEvent::GameOver {
            cause,
            at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> Option<GameTime> {
        GameTime::new(h, m)
    }

    /// Fixed 5s cooldown so ticks line up with transitions.
    fn config() -> NightwatchConfig {
        let mut cfg = NightwatchConfig::default();
        cfg.seed = Some(1);
        cfg.spawn.initial_min_secs = 5.0;
        cfg.spawn.initial_max_secs = 5.0;
        cfg.spawn.final_min_secs = 5.0;
        cfg.spawn.final_max_secs = 5.0;
        cfg
    }

    fn run_secs(m: &mut ThreatMachine, secs: u64, now: Option<GameTime>) -> Vec<ThreatEvent> {
        (0..secs).flat_map(|_| m.tick(1_000, now)).collect()
    }

    fn to_active(m: &mut ThreatMachine) {
        m.start_run();
        run_secs(m, 3 + 5, hm(4, 0));
        assert_eq!(m.state(), ThreatState::Active);
    }

    #[test]
    fn grace_then_wait_then_spawn() {
        let mut m = ThreatMachine::new(&config());
        assert_eq!(m.state(), ThreatState::Dormant);
        assert!(m.start_run().is_some());
        assert!(m.start_run().is_none());

        run_secs(&mut m, 2, hm(4, 0));
        assert_eq!(m.state(), ThreatState::Dormant);
        let events = run_secs(&mut m, 1, hm(4, 0));
        assert_eq!(m.state(), ThreatState::WaitingToSpawn);
        assert!(matches!(events[0], ThreatEvent::SpawnScheduled { wait_secs, .. } if wait_secs == 5.0));

        let events = run_secs(&mut m, 5, hm(4, 0));
        assert_eq!(m.state(), ThreatState::Active);
        assert_eq!(events.last().map(ThreatEvent::kind), Some("ThreatSpawned"));
        assert!(m.is_threat_present());
        assert!(m.session().is_some_and(ThreatSession::is_open));
    }

    #[test]
    fn defuse_goes_scared_then_waiting() {
        let mut m = ThreatMachine::new(&config());
        to_active(&mut m);

        assert!(m.defuse().is_some());
        assert_eq!(m.state(), ThreatState::Scared);
        assert!(!m.is_threat_present());
        assert_eq!(m.last_session().and_then(|s| s.outcome), Some(SessionOutcome::Defused));

        let events = m.tick(1_000, hm(4, 0));
        assert_eq!(m.state(), ThreatState::WaitingToSpawn);
        assert_eq!(events[0].kind(), "SpawnScheduled");
    }

    #[test]
    fn defuse_outside_active_changes_nothing() {
        let mut m = ThreatMachine::new(&config());
        assert!(m.defuse().is_none());
        assert_eq!(m.state(), ThreatState::Dormant);

        m.start_run();
        run_secs(&mut m, 3, hm(4, 0));
        assert!(m.defuse().is_none());
        assert_eq!(m.state(), ThreatState::WaitingToSpawn);
    }

    #[test]
    fn session_timeout_is_terminal() {
        let mut m = ThreatMachine::new(&config());
        to_active(&mut m);

        run_secs(&mut m, 19, hm(4, 0));
        assert_eq!(m.state(), ThreatState::Active);
        let events = run_secs(&mut m, 1, hm(4, 0));
        assert_eq!(m.state(), ThreatState::GameOver);
        assert!(matches!(
            events[0],
            ThreatEvent::GameOver { cause: GameOverCause::SessionTimedOut, .. }
        ));
        assert!(m.last_session().is_some_and(ThreatSession::is_terminal));

        assert!(m.defuse().is_none());
        assert!(m.arm_final().is_none());
        assert!(m.suppress().is_none());
        assert!(m.rearm(hm(4, 0)).is_empty());
        assert!(run_secs(&mut m, 30, hm(5, 0)).is_empty());
        assert_eq!(m.state(), ThreatState::GameOver);
    }

    #[test]
    fn arm_final_is_idempotent_and_stops_cycling() {
        let mut m = ThreatMachine::new(&config());
        to_active(&mut m);

        assert!(m.arm_final().is_some());
        assert!(m.arm_final().is_none());
        assert_eq!(m.state(), ThreatState::FinalWaiting);
        assert_eq!(m.last_session().and_then(|s| s.outcome), Some(SessionOutcome::Cancelled));

        // No spawning while waiting for the threshold, no matter how long.
        assert!(run_secs(&mut m, 120, hm(4, 39)).is_empty());
        assert!(m.defuse().is_none());
        assert_eq!(m.state(), ThreatState::FinalWaiting);
    }

    #[test]
    fn final_sequence_fires_after_threshold_and_delay() {
        let mut m = ThreatMachine::new(&config());
        m.start_run();
        m.arm_final();

        let events = m.tick(1_000, hm(4, 40));
        assert_eq!(m.state(), ThreatState::FinalActive);
        assert_eq!(events[0].kind(), "FinalThreatStarted");
        assert!(m.is_threat_present());

        run_secs(&mut m, 19, hm(4, 41));
        assert!(m.defuse().is_none());
        assert_eq!(m.state(), ThreatState::FinalActive);
        let events = run_secs(&mut m, 1, hm(4, 41));
        assert!(matches!(
            events[0],
            ThreatEvent::GameOver { cause: GameOverCause::FinalSequence, .. }
        ));
    }

    #[test]
    fn final_sequence_waits_without_clock() {
        let mut m = ThreatMachine::new(&config());
        m.arm_final();
        assert!(run_secs(&mut m, 5, None).is_empty());
        assert_eq!(m.state(), ThreatState::FinalWaiting);
    }

    #[test]
    fn suppress_is_idempotent_and_rearm_restarts_wait() {
        let mut m = ThreatMachine::new(&config());
        to_active(&mut m);

        let event = m.suppress();
        assert!(matches!(event, Some(ThreatEvent::Suppressed { from: ThreatState::Active, .. })));
        assert!(m.suppress().is_none());
        assert!(!m.is_threat_present());
        assert!(run_secs(&mut m, 60, hm(4, 0)).is_empty());

        let events = m.rearm(hm(4, 0));
        assert_eq!(events.len(), 2);
        assert_eq!(m.state(), ThreatState::WaitingToSpawn);
        assert!(m.session().is_none());
    }

    #[test]
    fn rearm_after_final_goes_back_to_final_waiting() {
        let mut m = ThreatMachine::new(&config());
        m.arm_final();
        m.tick(1_000, hm(4, 45));
        assert_eq!(m.state(), ThreatState::FinalActive);

        m.suppress();
        assert!(m.arm_final().is_none());
        m.rearm(hm(4, 45));
        assert_eq!(m.state(), ThreatState::FinalWaiting);
    }

    #[test]
    fn reset_returns_to_fresh_dormant() {
        let mut m = ThreatMachine::new(&config());
        to_active(&mut m);
        run_secs(&mut m, 20, hm(4, 0));
        assert!(m.is_game_over());

        m.reset();
        assert_eq!(m.state(), ThreatState::Dormant);
        assert!(!m.is_game_over());
        assert!(!m.run_started());
        assert_eq!(m.remaining_ms(), 3_000);
        assert!(m.start_run().is_some());
    }

    #[test]
    fn later_waits_use_narrower_window() {
        let mut cfg = NightwatchConfig::default();
        cfg.seed = Some(3);
        let mut m = ThreatMachine::new(&cfg);
        m.start_run();
        let events = run_secs(&mut m, 3, hm(9, 0));
        match &events[0] {
            ThreatEvent::SpawnScheduled { progress, window, wait_secs, .. } => {
                assert_eq!(*progress, 1.0);
                assert_eq!(*window, SpawnWindow::new(10.0, 20.0));
                assert!(window.contains(*wait_secs));
            }
            other => panic!("Expected SpawnScheduled, got {other:?}"),
        }
    }

    #[test]
    fn snapshot_reports_state() {
        let mut m = ThreatMachine::new(&config());
        to_active(&mut m);
        let snap = m.snapshot(hm(6, 30));
        assert_eq!(snap.state, ThreatState::Active);
        assert!(snap.threat_present);
        assert!((snap.progress - 0.5).abs() < 1e-9);
        assert_eq!(snap.spawned, 1);
        assert_eq!(snap.remaining_ms, 20_000);
    }

    #[test]
    fn oversized_unvalidated_window_waits_at_most_a_day() {
        let mut cfg = config();
        cfg.spawn.initial_min_secs = 1e20;
        cfg.spawn.initial_max_secs = 2e20;
        let mut m = ThreatMachine::new(&cfg);
        m.start_run();
        let events = run_secs(&mut m, 3, hm(4, 0));
        assert_eq!(m.state(), ThreatState::WaitingToSpawn);
        assert_eq!(events[0].kind(), "SpawnScheduled");
        assert_eq!(m.remaining_ms(), 86_400_000);
    }

    #[test]
    fn second_session_is_refused_while_one_is_open() {
        let mut m = ThreatMachine::new(&config());
        to_active(&mut m);
        let open = m.session().cloned();
        assert!(!m.open_session());
        assert_eq!(m.session().cloned(), open);

        // A spawn that finds a session still open reschedules instead.
        let events = m.spawn(hm(4, 0));
        assert_eq!(events[0].kind(), "SpawnScheduled");
        assert_eq!(m.state(), ThreatState::WaitingToSpawn);
        assert_eq!(m.snapshot(hm(4, 0)).spawned, 1);
    }
}
