use anyhow::Result;
use bastion_core::{SecurityEventRecord, Services};
use bastion_db_entities::SecurityEvent::SecurityEventType;
use tracing::*;
use uuid::Uuid;

use crate::config::load_config;

pub(crate) async fn command(cli: &crate::Cli, user_id: Uuid) -> Result<()> {
    let config = load_config(&cli.config, true)?;
    let services = Services::new(config).await?;

    if !services.lockout.unlock(user_id).await? {
        warn!(%user_id, "No lockout record for this account");
        return Ok(());
    }

    services
        .events
        .record(
            SecurityEventRecord::new(SecurityEventType::AccountUnlocked)
                .user(user_id)
                .description("unlocked from the command line"),
        )
        .await;
    info!(%user_id, "Account unlocked");
    Ok(())
}
