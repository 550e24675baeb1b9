use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ticketsync::cmd::config::{self as config_cmd, ConfigArgs};
use ticketsync::cmd::fetch::{self, FetchCommandArgs};
use ticketsync::cmd::update::{self, UpdateCommandArgs};
use ticketsync::config::AppConfig;
use ticketsync::context::AppContext;
use ticketsync::error::AppResult;

#[derive(Parser)]
#[command(
    name = "ticketsync",
    author,
    version,
    about = "Sync tickets between Markdown files and remote issue trackers"
)]
struct Cli {
    /// Path to the YAML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Backend to talk to; overrides `default_backend`.
    #[arg(short, long, global = true)]
    backend: Option<String>,
    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a remote ticket as Markdown or JSON.
    Fetch(FetchCommandArgs),
    /// Push changes from a local ticket file or flags to the remote ticket.
    Update(UpdateCommandArgs),
    /// Inspect the CLI configuration.
    Config(ConfigArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(error) = run(cli).await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> AppResult<()> {
    let cwd = std::env::current_dir()?;
    let config = AppConfig::load(cli.config.as_deref(), &cwd)?;

    match cli.command {
        Commands::Config(args) => config_cmd::run(&config, args.command),
        Commands::Fetch(args) => {
            let context = AppContext::for_backend(&config, cli.backend.as_deref())?;
            fetch::run(&context, args).await
        }
        Commands::Update(args) => {
            let context = AppContext::for_backend(&config, cli.backend.as_deref())?;
            update::run(&context, args).await
        }
    }
}
