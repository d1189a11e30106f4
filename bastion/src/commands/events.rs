use anyhow::Result;
use bastion_core::{expiry, Services};
use bastion_db_entities::SecurityEvent::SecurityEventType;
use uuid::Uuid;

use crate::config::load_config;

pub(crate) async fn command(
    cli: &crate::Cli,
    user: Option<Uuid>,
    event_type: Option<SecurityEventType>,
    limit: u64,
) -> Result<()> {
    let config = load_config(&cli.config, true)?;
    let services = Services::new(config).await?;

    let events = match (user, event_type) {
        (Some(user_id), Some(event_type)) => {
            services
                .events
                .events_for_user_by_type(user_id, event_type, limit, 0)
                .await?
        }
        (Some(user_id), None) => services.events.events_for_user(user_id, limit, 0).await?,
        (None, Some(event_type)) => services.events.events_by_type(event_type, limit, 0).await?,
        (None, None) => {
            let since = expiry::before(expiry::now(), services.config.store.events.retention);
            services.events.recent_events(since, limit).await?
        }
    };

    for event in events {
        println!(
            "{}  {:<26} {:<38} {:<16} {}",
            event.created_at.format("%Y-%m-%d %H:%M:%S"),
            event.event_type.to_string(),
            event.user_id.map(|u| u.to_string()).unwrap_or_else(|| "-".into()),
            event.ip_address.as_deref().unwrap_or("-"),
            event.description.as_deref().unwrap_or(""),
        );
    }
    Ok(())
}
