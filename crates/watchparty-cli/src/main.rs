//! watchparty: operator tool for the watch-party signaling stack.
//!
//! Inspects configuration, mints room codes and tails the live traffic of
//! a room on the realtime backend.

mod monitor;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use watchparty_common::{PartyError, RoomCode};
use watchparty_config::{config_to_json, toml_loader, validation, WatchPartyConfig};

#[derive(Parser)]
#[command(name = "watchparty", about = "Watch-party signaling tools")]
struct Args {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect the configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print a freshly generated room code.
    Code,
    /// Tail room, roster, signal and chat traffic for a room.
    Monitor {
        #[arg(long)]
        room: String,
        /// Identity whose inbound signals are shown.
        #[arg(long)]
        identity: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective config as JSON.
    Show,
    /// Load and validate the config.
    Check,
    /// Print the default config path.
    Path,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("watchparty: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), PartyError> {
    if let Command::Config {
        action: ConfigAction::Path,
    } = args.command
    {
        println!("{}", toml_loader::default_config_path()?.display());
        return Ok(());
    }

    let config = load(args.config.as_deref())?;
    init_tracing(&config);

    match args.command {
        Command::Config { action } => match action {
            ConfigAction::Show => println!("{}", config_to_json(&config)),
            ConfigAction::Check => {
                validation::validate(&config)?;
                println!("config ok");
            }
            ConfigAction::Path => {}
        },
        Command::Code => println!("{}", RoomCode::generate()),
        Command::Monitor { room, identity } => {
            monitor::run(&config, &room, &identity).await?;
        }
    }
    Ok(())
}

fn load(path: Option<&std::path::Path>) -> Result<WatchPartyConfig, PartyError> {
    let config = match path {
        Some(path) => toml_loader::load_from_path(path)?,
        None => toml_loader::load_default()?,
    };
    Ok(config)
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(config: &WatchPartyConfig) {
    let level = config.logging.level.as_filter();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("watchparty={level},watchparty_signal={level},watchparty_config={level}").into()
        }))
        .init();
}
