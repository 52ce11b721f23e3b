//! Integration tests for context-switch handling.

use std::sync::{mpsc, Arc, Mutex, Weak};
use std::time::Duration;

use nightwatch_core::{
    Collaborators, ContextId, GateAction, GameTime, LifecycleGate, ManualClock,
    NightwatchConfig, RecordingSinks, SceneNavigator, ThreatScheduler, ThreatState,
};
use tokio::time::sleep;

fn setup() -> (ThreatScheduler, LifecycleGate, Arc<RecordingSinks>) {
    let mut cfg = NightwatchConfig::default();
    cfg.seed = Some(5);
    cfg.spawn.initial_min_secs = 5.0;
    cfg.spawn.initial_max_secs = 5.0;
    let clock = Arc::new(ManualClock::new(GameTime::new(4, 0).unwrap()));
    let (collaborators, rec) = Collaborators::recording(clock);
    let scheduler = ThreatScheduler::new(&cfg, collaborators).unwrap();
    let gate = LifecycleGate::from_config(&cfg.contexts);
    (scheduler, gate, rec)
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[tokio::test(start_paused = true)]
async fn first_gameplay_context_starts_the_run() {
    let (scheduler, mut gate, _rec) = setup();
    assert_eq!(gate.on_context_changed("bedroom", &scheduler), GateAction::Started);
    assert!(scheduler.has_started());
    assert_eq!(gate.on_context_changed("homework", &scheduler), GateAction::Unchanged);

    sleep(ms(8_500)).await;
    assert_eq!(scheduler.state(), ThreatState::Active);
}

#[tokio::test(start_paused = true)]
async fn switching_between_gameplay_contexts_keeps_the_episode() {
    let (scheduler, mut gate, rec) = setup();
    gate.on_context_changed("bedroom", &scheduler);
    sleep(ms(8_500)).await;
    assert_eq!(scheduler.state(), ThreatState::Active);

    assert_eq!(gate.on_context_changed("fishbowl", &scheduler), GateAction::Unchanged);
    assert_eq!(scheduler.state(), ThreatState::Active);
    assert!(rec.is_playing());
}

#[tokio::test(start_paused = true)]
async fn safe_context_silences_an_active_threat_immediately() {
    let (scheduler, mut gate, rec) = setup();
    gate.on_context_changed("bedroom", &scheduler);
    sleep(ms(8_500)).await;
    assert!(scheduler.is_threat_present());

    assert_eq!(gate.on_context_changed("call_mom", &scheduler), GateAction::Suppressed);
    assert!(!scheduler.is_threat_present());
    assert!(!rec.is_playing());
    assert!(gate.is_suppressed());
    assert_eq!(gate.on_context_changed("call_mom", &scheduler), GateAction::Unchanged);

    sleep(ms(60_000)).await;
    assert_eq!(scheduler.state(), ThreatState::SuppressedByContext);
    assert_eq!(rec.terminal_visits(), 0);

    assert_eq!(gate.on_context_changed("bedroom", &scheduler), GateAction::Rearmed);
    assert!(!gate.is_suppressed());
    assert_eq!(scheduler.state(), ThreatState::WaitingToSpawn);
    sleep(ms(5_500)).await;
    assert_eq!(scheduler.state(), ThreatState::Active);
}

#[tokio::test(start_paused = true)]
async fn top_level_context_resets_and_next_run_starts_fresh() {
    let (scheduler, mut gate, rec) = setup();
    gate.on_context_changed("bedroom", &scheduler);
    sleep(ms(8_500)).await;
    scheduler.arm_final_sequence();

    assert_eq!(gate.on_context_changed("main_menu", &scheduler), GateAction::Reset);
    assert_eq!(scheduler.state(), ThreatState::Dormant);
    assert!(!scheduler.has_started());
    assert!(!rec.is_playing());

    sleep(ms(60_000)).await;
    assert_eq!(scheduler.state(), ThreatState::Dormant);
    assert_eq!(rec.terminal_visits(), 0);

    assert_eq!(gate.on_context_changed("bedroom", &scheduler), GateAction::Started);
    assert!(!scheduler.snapshot().final_armed);
    sleep(ms(2_500)).await;
    assert_eq!(scheduler.state(), ThreatState::Dormant);
    sleep(ms(1_000)).await;
    assert_eq!(scheduler.state(), ThreatState::WaitingToSpawn);
}

#[tokio::test(start_paused = true)]
async fn menu_after_game_over_allows_a_new_run() {
    let (scheduler, mut gate, rec) = setup();
    gate.on_context_changed("bedroom", &scheduler);
    sleep(ms(28_500)).await;
    assert_eq!(scheduler.state(), ThreatState::GameOver);
    assert_eq!(rec.terminal_visits(), 1);

    assert_eq!(gate.on_context_changed("jumpscare", &scheduler), GateAction::Unchanged);
    assert_eq!(gate.on_context_changed("main_menu", &scheduler), GateAction::Reset);
    assert_eq!(gate.on_context_changed("bedroom", &scheduler), GateAction::Started);
    sleep(ms(8_500)).await;
    assert_eq!(scheduler.state(), ThreatState::Active);
}

#[tokio::test(start_paused = true)]
async fn final_sequence_survives_a_safe_room_visit() {
    let (scheduler, mut gate, _rec) = setup();
    gate.on_context_changed("bedroom", &scheduler);
    scheduler.arm_final_sequence();

    gate.on_context_changed("call_mom", &scheduler);
    assert!(!scheduler.arm_final_sequence());
    gate.on_context_changed("bedroom", &scheduler);
    assert_eq!(scheduler.state(), ThreatState::FinalWaiting);
}

/// Navigator that reports the terminal context back to the gate, the way a
/// host's scene-loaded hook would.
#[derive(Default)]
struct ReportingNavigator {
    scheduler: Mutex<Option<Weak<ThreatScheduler>>>,
    gate: Mutex<LifecycleGate>,
    reported: Mutex<Vec<GateAction>>,
}

impl SceneNavigator for ReportingNavigator {
    fn goto_terminal(&self, context: &ContextId) {
        let scheduler = self.scheduler.lock().unwrap().as_ref().and_then(Weak::upgrade);
        if let Some(scheduler) = scheduler {
            let _ = scheduler.snapshot();
            let action = self.gate.lock().unwrap().on_context_changed(context, &scheduler);
            self.reported.lock().unwrap().push(action);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn navigator_may_report_the_terminal_context_back() {
    let mut cfg = NightwatchConfig::default();
    cfg.seed = Some(3);
    cfg.spawn.initial_min_secs = 0.0;
    cfg.spawn.initial_max_secs = 0.0;
    cfg.session.grace_secs = 0.0;
    cfg.session.duration_secs = 0.2;
    cfg.session.poll_interval_ms = 20;
    cfg.contexts.safe.push("jumpscare".to_string());

    let clock = Arc::new(ManualClock::new(GameTime::new(4, 0).unwrap()));
    let rec = Arc::new(RecordingSinks::default());
    let navigator = Arc::new(ReportingNavigator {
        gate: Mutex::new(LifecycleGate::from_config(&cfg.contexts)),
        ..Default::default()
    });
    let collaborators = Collaborators::new()
        .with_clock(clock)
        .with_audio(rec.clone())
        .with_navigator(navigator.clone());
    let scheduler = Arc::new(ThreatScheduler::new(&cfg, collaborators).unwrap());
    *navigator.scheduler.lock().unwrap() = Some(Arc::downgrade(&scheduler));

    assert!(scheduler.start());
    for _ in 0..250 {
        if !navigator.reported.lock().unwrap().is_empty() {
            break;
        }
        sleep(ms(20)).await;
    }
    assert_eq!(*navigator.reported.lock().unwrap(), vec![GateAction::Unchanged]);

    // The state lock must be free for other threads once the navigator returns.
    let (tx, rx) = mpsc::channel();
    let other = Arc::clone(&scheduler);
    std::thread::spawn(move || {
        let _ = tx.send(other.state());
    });
    let state = rx.recv_timeout(Duration::from_secs(3)).expect("scheduler stayed locked");
    assert_eq!(state, ThreatState::GameOver);
    assert!(!rec.is_playing());

    scheduler.reset();
    assert!(scheduler.start());
}
