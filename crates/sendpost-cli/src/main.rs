mod cmd;
mod output;
mod settings;

use clap::{Parser, Subcommand};
use cmd::{schedule::ScheduleArgs, sendpost::SendpostSubcommand, stage::StageSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sendpost",
    about = "Run, schedule and inspect multi-stage campaign workflows",
    version,
    propagate_version = true
)]
struct Cli {
    /// YAML configuration file (default: ./sendpost.yaml when present)
    #[arg(long, global = true, env = "SENDPOST_CONFIG")]
    config: Option<PathBuf>,

    /// redb database file, or ":memory:" for a throwaway store
    #[arg(long, global = true, env = "SENDPOST_STORE")]
    store: Option<PathBuf>,

    /// Base URL of the workflow API
    #[arg(long, global = true, env = "SENDPOST_API_URL")]
    api_url: Option<String>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduling daemon until interrupted
    Serve,

    /// Run a sendpost now and stream its progress
    Run { sendpost_id: u64 },

    /// Manage sendposts
    Sendpost {
        #[command(subcommand)]
        subcommand: SendpostSubcommand,
    },

    /// Manage the stages of a sendpost
    Stage {
        #[command(subcommand)]
        subcommand: StageSubcommand,
    },

    /// Plan a future run of a sendpost
    Schedule(ScheduleArgs),

    /// Withdraw the pending plan of a sendpost
    Unschedule { sendpost_id: u64 },

    /// List schedule records
    Schedules,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve | Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = settings::Settings::resolve(
        cli.config.as_deref(),
        cli.store.as_deref(),
        cli.api_url.clone(),
    )
    .and_then(|settings| match cli.command {
        Commands::Serve => cmd::serve::run(&settings),
        Commands::Run { sendpost_id } => cmd::run::run(&settings, sendpost_id, cli.json),
        Commands::Sendpost { subcommand } => cmd::sendpost::run(&settings, subcommand, cli.json),
        Commands::Stage { subcommand } => cmd::stage::run(&settings, subcommand, cli.json),
        Commands::Schedule(args) => cmd::schedule::plan(&settings, args, cli.json),
        Commands::Unschedule { sendpost_id } => {
            cmd::schedule::unplan(&settings, sendpost_id, cli.json)
        }
        Commands::Schedules => cmd::schedule::list(&settings, cli.json),
    });

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
