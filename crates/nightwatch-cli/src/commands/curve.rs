use std::path::Path;

use clap::Args;
use nightwatch_core::{GameTime, NightwatchConfig, SpawnWindow};
use serde::Serialize;

#[derive(Args)]
pub struct CurveArgs {
    /// Game minutes between rows
    #[arg(long, default_value_t = 30)]
    step_minutes: u32,
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct CurveRow {
    time: GameTime,
    progress: f64,
    window: SpawnWindow,
}

pub fn run(args: CurveArgs, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if args.step_minutes == 0 {
        return Err("--step-minutes must be at least 1".into());
    }
    let config = NightwatchConfig::load(path)?;
    config.validate()?;
    let rows = rows(&config, args.step_minutes);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{:>6}  {:>8}  {:>8}  {:>8}", "time", "progress", "min (s)", "max (s)");
    for row in &rows {
        println!(
            "{:>6}  {:>8.3}  {:>8.1}  {:>8.1}  {}",
            row.time.to_string(),
            row.progress,
            row.window.min_secs,
            row.window.max_secs,
            bar(row.progress)
        );
    }
    Ok(())
}

fn rows(config: &NightwatchConfig, step_minutes: u32) -> Vec<CurveRow> {
    let curve = config.progress_curve();
    let bounds = config.spawn_bounds();
    let start = config.ramp.start.total_minutes();
    let end = config.ramp.end.total_minutes();

    let mut minutes: Vec<u32> = (start..end).step_by(step_minutes as usize).collect();
    minutes.push(end);
    minutes
        .into_iter()
        .map(|m| {
            let time = GameTime::from_total_minutes(m);
            let progress = curve.progress(time);
            CurveRow {
                time,
                progress,
                window: bounds.window_at(progress),
            }
        })
        .collect()
}

fn bar(progress: f64) -> String {
    "█".repeat((progress * 20.0).round() as usize)
}
