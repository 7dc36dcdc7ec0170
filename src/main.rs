use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "runsync")]
#[command(version, about = "Keeps a local view of a game run in sync with its backend")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Poll the backend and print session events until interrupted
    Watch {
        /// Backend base URL. Overrides runsync.toml and RUNSYNC_BASE_URL.
        #[arg(long)]
        base_url: Option<String>,

        /// Execute reward actions automatically
        #[arg(long)]
        auto: bool,

        /// Use the short reduced-motion automation delays
        #[arg(long)]
        reduced_motion: bool,
    },
    /// Normalize a reward progression (or room data holding one) from a JSON file
    Normalize {
        /// JSON file; `-` reads stdin
        file: PathBuf,
    },
    /// Print the automation action for room data in a JSON file
    Action {
        /// JSON file; `-` reads stdin
        file: PathBuf,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default runsync.toml file
    Init,
}

fn log_filter(verbose: bool) -> tracing_subscriber::EnvFilter {
    let fallback = if verbose { "runsync=debug,info" } else { "info" };
    std::env::var("RUST_LOG")
        .ok()
        .and_then(|v| tracing_subscriber::EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| tracing_subscriber::EnvFilter::new(fallback))
}

fn init_tracing(cli: &Cli) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Watch {
            base_url,
            auto,
            reduced_motion,
        } => {
            cmd::cmd_watch(project_dir, base_url.clone(), *auto, *reduced_motion).await?;
        }
        Commands::Normalize { file } => cmd::cmd_normalize(file)?,
        Commands::Action { file } => cmd::cmd_action(file)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
