use anyhow::Result;
use bastion_core::{Services, Sweepers};
use tracing::*;

use crate::config::load_config;

pub(crate) async fn command(cli: &crate::Cli) -> Result<()> {
    let config = load_config(&cli.config, true)?;
    let services = Services::new(config).await?;

    let report = Sweepers::run_once(&services).await?;
    info!(
        locks_cleared = report.locks_cleared,
        sessions_deactivated = report.sessions.deactivated,
        sessions_deleted = report.sessions.deleted,
        email_tokens_deleted = report.tokens.email_verification,
        reset_tokens_deleted = report.tokens.password_reset,
        events_deleted = report.events_deleted,
        "Sweep complete"
    );
    Ok(())
}
