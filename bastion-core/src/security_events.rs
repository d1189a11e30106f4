use bastion_common::{BastionError, UserId};
use bastion_db_entities::SecurityEvent::{self, SecurityEventType};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{expiry, ClientContext};

/// One audit entry waiting to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityEventRecord {
    pub event_type: SecurityEventType,
    pub user_id: Option<UserId>,
    pub description: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<Value>,
}

impl SecurityEventRecord {
    pub fn new(event_type: SecurityEventType) -> Self {
        Self {
            event_type,
            user_id: None,
            description: None,
            ip_address: None,
            user_agent: None,
            metadata: None,
        }
    }

    #[must_use]
    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn client(mut self, client: &ClientContext) -> Self {
        self.ip_address = client.ip_address.clone();
        self.user_agent = client.user_agent.clone();
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Append-only audit trail.
#[derive(Clone)]
pub struct SecurityEventLogger {
    db: DatabaseConnection,
}

impl SecurityEventLogger {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Never fails. An event that cannot be stored goes to the
    /// `bastion::audit` tracing target instead.
    pub async fn record(&self, record: SecurityEventRecord) {
        self.record_at(record, expiry::now()).await
    }

    pub async fn record_at(&self, record: SecurityEventRecord, at: DateTime<Utc>) {
        let event_type = record.event_type;
        let user_id = record.user_id;
        let row = SecurityEvent::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(record.user_id),
            event_type: Set(record.event_type),
            description: Set(record.description.clone()),
            ip_address: Set(record.ip_address.clone()),
            user_agent: Set(record.user_agent.clone()),
            metadata: Set(record.metadata.clone()),
            created_at: Set(at),
        };

        match row.insert(&self.db).await {
            Ok(_) => debug!(%event_type, ?user_id, "Security event recorded"),
            Err(error) => error!(
                target: "bastion::audit",
                %event_type,
                ?user_id,
                description = ?record.description,
                ip_address = ?record.ip_address,
                user_agent = ?record.user_agent,
                metadata = ?record.metadata,
                created_at = %at,
                %error,
                "Security event could not be stored"
            ),
        }
    }

    pub async fn recent_events(
        &self,
        since: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<SecurityEvent::Model>, BastionError> {
        Ok(SecurityEvent::Entity::find()
            .filter(SecurityEvent::Column::CreatedAt.gte(since))
            .order_by_desc(SecurityEvent::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    pub async fn events_by_type(
        &self,
        event_type: SecurityEventType,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<SecurityEvent::Model>, BastionError> {
        Ok(SecurityEvent::Entity::find()
            .filter(SecurityEvent::Column::EventType.eq(event_type))
            .order_by_desc(SecurityEvent::Column::CreatedAt)
            .limit(limit)
            .offset(offset)
            .all(&self.db)
            .await?)
    }

    pub async fn events_for_user(
        &self,
        user_id: UserId,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<SecurityEvent::Model>, BastionError> {
        Ok(SecurityEvent::Entity::find()
            .filter(SecurityEvent::Column::UserId.eq(user_id))
            .order_by_desc(SecurityEvent::Column::CreatedAt)
            .limit(limit)
            .offset(offset)
            .all(&self.db)
            .await?)
    }

    /// One user's events of a single type, newest first.
    pub async fn events_for_user_by_type(
        &self,
        user_id: UserId,
        event_type: SecurityEventType,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<SecurityEvent::Model>, BastionError> {
        Ok(SecurityEvent::Entity::find()
            .filter(SecurityEvent::Column::UserId.eq(user_id))
            .filter(SecurityEvent::Column::EventType.eq(event_type))
            .order_by_desc(SecurityEvent::Column::CreatedAt)
            .limit(limit)
            .offset(offset)
            .all(&self.db)
            .await?)
    }

    pub async fn sweep_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, BastionError> {
        let deleted = SecurityEvent::Entity::delete_many()
            .filter(SecurityEvent::Column::CreatedAt.lt(cutoff))
            .exec(&self.db)
            .await?
            .rows_affected;
        if deleted > 0 {
            info!(deleted, %cutoff, "Swept old security events");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use sea_orm::ConnectionTrait;
    use serde_json::json;

    use super::*;
    use crate::test_support::{test_db, user};

    async fn logger() -> SecurityEventLogger {
        SecurityEventLogger::new(test_db().await)
    }

    #[tokio::test]
    async fn test_record_and_query() {
        let logger = logger().await;
        let alice = user();
        let bob = user();
        let now = expiry::now();
        let client = ClientContext::new("192.0.2.1", "firefox");

        logger
            .record_at(
                SecurityEventRecord::new(SecurityEventType::LoginFailed)
                    .user(alice)
                    .client(&client),
                now - Duration::minutes(3),
            )
            .await;
        logger
            .record_at(
                SecurityEventRecord::new(SecurityEventType::LoginSuccess)
                    .user(alice)
                    .metadata(json!({ "session_id": "s1" })),
                now - Duration::minutes(2),
            )
            .await;
        logger
            .record_at(
                SecurityEventRecord::new(SecurityEventType::LoginFailed)
                    .user(bob)
                    .description("unknown device"),
                now - Duration::minutes(1),
            )
            .await;

        let alice_events = logger.events_for_user(alice, 10, 0).await.unwrap();
        assert_eq!(
            alice_events.iter().map(|e| e.event_type).collect::<Vec<_>>(),
            vec![SecurityEventType::LoginSuccess, SecurityEventType::LoginFailed]
        );
        assert_eq!(alice_events[1].ip_address.as_deref(), Some("192.0.2.1"));
        assert_eq!(alice_events[0].metadata, Some(json!({ "session_id": "s1" })));

        let failed = logger
            .events_by_type(SecurityEventType::LoginFailed, 10, 0)
            .await
            .unwrap();
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].user_id, Some(bob));

        let page = logger
            .events_by_type(SecurityEventType::LoginFailed, 1, 1)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].user_id, Some(alice));

        let recent = logger
            .recent_events(now - Duration::seconds(150), 10)
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].created_at > recent[1].created_at);
    }

    #[tokio::test]
    async fn test_anonymous_event() {
        let logger = logger().await;
        logger
            .record(
                SecurityEventRecord::new(SecurityEventType::LoginFailed)
                    .description("no such user"),
            )
            .await;
        let events = logger
            .recent_events(expiry::now() - Duration::minutes(1), 10)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].user_id.is_none());
    }

    #[tokio::test]
    async fn test_record_survives_store_failure() {
        let db = test_db().await;
        db.execute_unprepared("DROP TABLE security_events")
            .await
            .unwrap();
        let logger = SecurityEventLogger::new(db);

        logger
            .record(SecurityEventRecord::new(SecurityEventType::AccountLocked).user(user()))
            .await;
        assert!(logger
            .recent_events(expiry::now() - Duration::minutes(1), 10)
            .await
            .unwrap_err()
            .is_retryable());
    }

    #[tokio::test]
    async fn test_events_for_user_by_type_fills_the_page() {
        let logger = logger().await;
        let alice = user();
        let now = expiry::now();
        for (minutes, event_type) in [
            (6, SecurityEventType::LoginFailed),
            (5, SecurityEventType::LoginFailed),
            (4, SecurityEventType::LoginSuccess),
            (3, SecurityEventType::LoginSuccess),
            (2, SecurityEventType::LoginSuccess),
            (1, SecurityEventType::LoginFailed),
        ] {
            logger
                .record_at(
                    SecurityEventRecord::new(event_type).user(alice),
                    now - Duration::minutes(minutes),
                )
                .await;
        }
        logger
            .record(SecurityEventRecord::new(SecurityEventType::LoginFailed).user(user()))
            .await;

        let failed = logger
            .events_for_user_by_type(alice, SecurityEventType::LoginFailed, 3, 0)
            .await
            .unwrap();
        assert_eq!(failed.len(), 3);
        assert!(failed
            .iter()
            .all(|e| e.user_id == Some(alice) && e.event_type == SecurityEventType::LoginFailed));
        assert!(failed[0].created_at > failed[2].created_at);

        let rest = logger
            .events_for_user_by_type(alice, SecurityEventType::LoginFailed, 3, 2)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_older_than() {
        let logger = logger().await;
        let now = expiry::now();
        for age in [100, 91, 10] {
            logger
                .record_at(
                    SecurityEventRecord::new(SecurityEventType::Logout),
                    now - Duration::days(age),
                )
                .await;
        }
        assert_eq!(logger.sweep_older_than(now - Duration::days(90)).await.unwrap(), 2);
        assert_eq!(logger.sweep_older_than(now - Duration::days(90)).await.unwrap(), 0);
        assert_eq!(
            logger
                .events_by_type(SecurityEventType::Logout, 10, 0)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
