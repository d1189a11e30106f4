mod commands;
mod config;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use bastion_db_entities::SecurityEvent::SecurityEventType;
use clap::Parser;
use uuid::Uuid;

use crate::logging::init_logging;

#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, env = "BASTION_CONFIG", default_value = "/etc/bastion.yaml")]
    config: PathBuf,
}

#[derive(clap::Subcommand)]
pub(crate) enum Commands {
    /// Run the background sweepers until interrupted
    Run,
    /// Validate config file
    Check,
    /// Run every sweeper once and exit
    Sweep,
    /// Clear the failed-login counter and lock of an account
    Unlock { user_id: Uuid },
    /// Show recent security events, newest first
    Events {
        #[arg(long)]
        user: Option<Uuid>,
        #[arg(long = "type")]
        event_type: Option<SecurityEventType>,
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run => crate::commands::run::command(&cli).await,
        Commands::Check => crate::commands::check::command(&cli).await,
        Commands::Sweep => crate::commands::sweep::command(&cli).await,
        Commands::Unlock { user_id } => crate::commands::unlock::command(&cli, *user_id).await,
        Commands::Events {
            user,
            event_type,
            limit,
        } => crate::commands::events::command(&cli, *user, *event_type, *limit).await,
    }
}
