use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nightwatch_core::NightwatchConfig;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "nightwatch", version, about = "Nightwatch threat scheduler CLI")]
struct Cli {
    /// Config file (defaults to ~/.config/nightwatch/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an interactive threat simulation
    Run(commands::run::RunArgs),
    /// Show the difficulty ramp and spawn windows
    Curve(commands::curve::CurveArgs),
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("nightwatch=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(NightwatchConfig::default_path);
    let result = match cli.command {
        Commands::Run(args) => commands::run::run(args, &config_path),
        Commands::Curve(args) => commands::curve::run(args, &config_path),
        Commands::Config { action } => commands::config::run(action, &config_path),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
