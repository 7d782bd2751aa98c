//! cronlease worker and admin CLI.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "cronlease")]
#[command(about = "Fleet-wide cron scheduling over a shared job table", long_about = None)]
struct Cli {
    /// Worker configuration file
    #[arg(long, global = true, env = "CRONLEASE_CONFIG")]
    config: Option<PathBuf>,

    /// Database URL, overrides the configuration file
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scheduler worker until interrupted
    Run,
    /// Apply database migrations
    Migrate,
    /// Return jobs with stale heartbeats to waiting
    Reclaim {
        /// Heartbeat age after which a running job is orphaned, e.g. 90s
        #[arg(long)]
        stale_after: Option<String>,
    },
    /// Inspect and administer jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Validate a worker configuration
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "cronlease.kdl")]
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// List all jobs
    List,
    /// Show one job
    Show {
        /// Job ID
        id: String,
    },
    /// Force a job back to waiting without touching its next run
    Release {
        /// Job ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let ctx = commands::Context::new(cli.config, cli.database_url);

    match cli.command {
        Commands::Run => commands::run::run(&ctx).await?,
        Commands::Migrate => commands::migrate(&ctx).await?,
        Commands::Reclaim { stale_after } => {
            commands::reclaim(&ctx, stale_after.as_deref()).await?;
        }
        Commands::Jobs { command } => match command {
            JobCommands::List => commands::jobs::list(&ctx).await?,
            JobCommands::Show { id } => commands::jobs::show(&ctx, &id).await?,
            JobCommands::Release { id } => commands::jobs::release(&ctx, &id).await?,
        },
        Commands::Validate { path } => commands::validate(&path)?,
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
