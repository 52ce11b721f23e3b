use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use nightwatch_core::{
    AudioCue, Collaborators, ContextId, GameTime, HazardSuppressor, LifecycleGate,
    NightwatchConfig, ScaledClock, SceneNavigator, ThreatScheduler, ThreatState,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[derive(Args)]
pub struct RunArgs {
    /// Game time at which the simulation starts (H:MM)
    #[arg(long, default_value = "4:00")]
    start: GameTime,
    /// Game minutes that pass per real second
    #[arg(long, default_value_t = 1.0)]
    minutes_per_second: f64,
    /// Context entered when the simulation starts
    #[arg(long, default_value = "bedroom")]
    context: ContextId,
}

/// Collaborators that only report their calls.
struct ConsoleSinks;

impl AudioCue for ConsoleSinks {
    fn start(&self) {
        info!(target: "nightwatch::audio", "cue playing");
    }

    fn stop(&self) {
        info!(target: "nightwatch::audio", "cue stopped");
    }

    fn set_volume(&self, volume: f64) {
        info!(target: "nightwatch::audio", volume, "cue volume set");
    }
}

impl SceneNavigator for ConsoleSinks {
    fn goto_terminal(&self, context: &ContextId) {
        info!(target: "nightwatch::scene", %context, "loading terminal context");
    }
}

impl HazardSuppressor for ConsoleSinks {
    fn disable(&self) {
        info!(target: "nightwatch::hazard", "hazard disabled");
    }
}

enum Flow {
    Continue,
    Quit,
}

pub fn run(args: RunArgs, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = NightwatchConfig::load(path)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(simulate(config, args))
}

async fn simulate(config: NightwatchConfig, args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let clock = Arc::new(ScaledClock::new(args.start, args.minutes_per_second));
    let console = Arc::new(ConsoleSinks);
    let collaborators = Collaborators::new()
        .with_clock(clock)
        .with_audio(console.clone())
        .with_navigator(console.clone())
        .with_hazard(console);
    let scheduler = ThreatScheduler::new(&config, collaborators)?;
    let mut gate = LifecycleGate::from_config(&config.contexts);

    let action = gate.on_context_changed(&args.context, &scheduler);
    println!("entered {}: {}", args.context, serde_json::to_string(&action)?);
    println!("commands: defuse | final | context <id> | status | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut announced_game_over = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if let Flow::Quit = handle_command(line.trim(), &scheduler, &mut gate)? {
                    break;
                }
            }
            _ = ticker.tick() => {
                print_events(&scheduler)?;
                let game_over = scheduler.state() == ThreatState::GameOver;
                if game_over && !announced_game_over {
                    println!("game over; enter a top-level context to play again");
                }
                announced_game_over = game_over;
            }
        }
    }

    print_events(&scheduler)?;
    scheduler.shutdown();
    Ok(())
}

fn handle_command(
    line: &str,
    scheduler: &ThreatScheduler,
    gate: &mut LifecycleGate,
) -> Result<Flow, Box<dyn std::error::Error>> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (None, _) => {}
        (Some("defuse"), None) => {
            if scheduler.defuse() {
                println!("defused");
            } else {
                println!("nothing to defuse ({})", state_name(scheduler.state())?);
            }
        }
        (Some("final"), None) => {
            if scheduler.arm_final_sequence() {
                println!("final sequence armed");
            } else {
                println!("final sequence not armed ({})", state_name(scheduler.state())?);
            }
        }
        (Some("context"), Some(context)) => {
            let action = gate.on_context_changed(context, scheduler);
            println!("entered {context}: {}", serde_json::to_string(&action)?);
        }
        (Some("status"), None) => {
            println!("{}", serde_json::to_string_pretty(&scheduler.snapshot())?);
        }
        (Some("quit" | "exit"), None) => return Ok(Flow::Quit),
        _ => eprintln!("unknown command: {line}"),
    }
    Ok(Flow::Continue)
}

fn print_events(scheduler: &ThreatScheduler) -> Result<(), serde_json::Error> {
    for event in scheduler.drain_events() {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

fn state_name(state: ThreatState) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(state)?;
    Ok(value.as_str().unwrap_or_default().to_string())
}
