use anyhow::Result;
use tracing::*;

use crate::config::load_config;

pub(crate) async fn command(cli: &crate::Cli) -> Result<()> {
    let config = load_config(&cli.config, true)?;
    let store = &config.store;
    info!(
        threshold = store.lockout.threshold,
        lock_duration = ?store.lockout.lock_duration,
        session_ttl = ?store.sessions.ttl,
        password_reset_ttl = ?store.tokens.password_reset_ttl,
        email_verification_ttl = ?store.tokens.email_verification_ttl,
        event_retention = ?store.events.retention,
        "Effective settings"
    );
    info!("No problems found");
    Ok(())
}
