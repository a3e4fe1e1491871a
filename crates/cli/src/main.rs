use std::{
    path::{Path, PathBuf},
    process,
};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod config;
mod run;

use config::Config;

/// Default location of the configuration file.
const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

#[derive(Clone, Debug)]
pub struct Context {
    pub config_path: PathBuf,
    pub config: Config,
}

#[derive(Parser, Debug)]
#[clap(author, version, about = "msglog - per-session message log service", long_about = None)]
struct Opts {
    /// Path to the config.yaml file (default: ./config.yaml)
    #[arg(long = "config", short = 'c', global = true)]
    config_path: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
enum Command {
    /// Start the message log server
    Run(run::RunCommand),
}

#[tokio::main]
async fn main() {
    let opts: Opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(e) => {
            let _ = e.print();
            process::exit(e.exit_code());
        }
    };

    init_tracing();

    let config_path = opts
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    // Load environment variables from .env file next to the config
    let config_dir = config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    load_env_file(&config_dir);

    let config = match Config::load(&config_path) {
        Ok(config) => {
            tracing::info!(path = %config_path.display(), "Loaded config");
            config
        }
        // Only a file the user pointed at explicitly has to exist.
        Err(config::ConfigError::FileNotFound(_)) if opts.config_path.is_none() => {
            tracing::info!("No config file found, using defaults");
            Config::default()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to load config");
            process::exit(1);
        }
    };

    let ctx = Context {
        config_path,
        config,
    };

    if let Err(e) = handle_command(opts, &ctx).await {
        tracing::error!(error = %e, "Exiting");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Initialise the global subscriber; `RUST_LOG` overrides the `info` default.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Load environment variables from .env file in the config directory
fn load_env_file(config_dir: &Path) {
    let env_file_path = config_dir.join(".env");

    match dotenvy::from_path(&env_file_path) {
        Ok(_) => {
            tracing::info!(path = %env_file_path.display(), "Loaded environment");
        }
        Err(e) if e.not_found() => {
            // .env file not found is fine, just continue silently
        }
        Err(e) => {
            tracing::warn!(
                path = %env_file_path.display(),
                error = %e,
                "Failed to load .env file"
            );
        }
    }
}

async fn handle_command(opts: Opts, ctx: &Context) -> Result<(), run::RunError> {
    match opts.command {
        Command::Run(cmd) => cmd.execute(ctx).await,
    }
}
