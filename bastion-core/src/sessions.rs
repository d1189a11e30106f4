use bastion_common::{BastionError, Secret, SessionConfig, UserId};
use bastion_db_entities::UserSession;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::expiry;
use crate::ClientContext;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionSweepStats {
    /// Active rows past their expiry that were flipped to inactive
    pub deactivated: u64,
    /// Rows removed after the retention window
    pub deleted: u64,
}

pub struct SessionManager {
    config: SessionConfig,
    db: DatabaseConnection,
}

impl SessionManager {
    pub fn new(config: SessionConfig, db: DatabaseConnection) -> Self {
        Self { config, db }
    }

    /// The returned model is the only place both tokens are ever handed out.
    pub async fn create_session(
        &self,
        user_id: UserId,
        client: &ClientContext,
    ) -> Result<UserSession::Model, BastionError> {
        let now = expiry::now();
        let session = UserSession::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            session_token: Set(Secret::random().into_inner()),
            refresh_token: Set(Secret::random().into_inner()),
            expires_at: Set(expiry::after(now, self.config.ttl)),
            ip_address: Set(client.ip_address.clone()),
            user_agent: Set(client.user_agent.clone()),
            device_info: Set(client.device_info.clone()),
            is_active: Set(true),
            last_used_at: Set(None),
            created_at: Set(now),
        }
        .insert(&self.db)
        .await?;

        info!(user_id = %user_id, session_id = %session.id, "Session created");
        Ok(session)
    }

    /// Revoked, expired and unknown tokens all come back as `NotFound`.
    pub async fn validate_session(&self, token: &str) -> Result<UserSession::Model, BastionError> {
        UserSession::Entity::find()
            .filter(UserSession::Column::SessionToken.eq(token))
            .filter(expiry::session_usable_condition(expiry::now()))
            .one(&self.db)
            .await?
            .ok_or(BastionError::NotFound)
    }

    /// Fire-and-forget `last_used_at` update. Errors are logged, never returned.
    pub fn touch(&self, token: &str) -> JoinHandle<()> {
        let db = self.db.clone();
        let token = token.to_owned();
        tokio::spawn(async move {
            if let Err(error) = touch_session(&db, &token, expiry::now()).await {
                warn!(?error, "Failed to record session activity");
            }
        })
    }

    /// Awaitable variant of [`Self::touch`]. Returns false for unusable sessions.
    pub async fn touch_now(&self, token: &str) -> Result<bool, BastionError> {
        touch_session(&self.db, token, expiry::now()).await
    }

    /// Continue a session from its refresh token.
    ///
    /// The session token is replaced and the expiry pushed out; the refresh
    /// token itself stays the same for the life of the session.
    pub async fn refresh(&self, refresh_token: &str) -> Result<UserSession::Model, BastionError> {
        let now = expiry::now();
        let result = UserSession::Entity::update_many()
            .col_expr(
                UserSession::Column::SessionToken,
                Expr::value(Secret::random().into_inner()),
            )
            .col_expr(
                UserSession::Column::ExpiresAt,
                Expr::value(expiry::after(now, self.config.ttl)),
            )
            .col_expr(UserSession::Column::LastUsedAt, Expr::value(Some(now)))
            .filter(UserSession::Column::RefreshToken.eq(refresh_token))
            .filter(expiry::session_usable_condition(now))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(BastionError::NotFound);
        }

        let session = UserSession::Entity::find()
            .filter(UserSession::Column::RefreshToken.eq(refresh_token))
            .one(&self.db)
            .await?
            .ok_or(BastionError::NotFound)?;
        debug!(user_id = %session.user_id, session_id = %session.id, "Session refreshed");
        Ok(session)
    }

    /// Idempotent. Returns true only for the call that deactivated the session.
    pub async fn revoke(&self, token: &str) -> Result<bool, BastionError> {
        let revoked = self
            .deactivate(
                Condition::all()
                    .add(UserSession::Column::SessionToken.eq(token))
                    .add(UserSession::Column::IsActive.eq(true)),
            )
            .await?;
        Ok(revoked > 0)
    }

    /// Like [`Self::revoke`], but only matches a session owned by `user_id`.
    pub async fn revoke_for_user(&self, user_id: UserId, token: &str) -> Result<bool, BastionError> {
        let revoked = self
            .deactivate(
                Condition::all()
                    .add(UserSession::Column::UserId.eq(user_id))
                    .add(UserSession::Column::SessionToken.eq(token))
                    .add(UserSession::Column::IsActive.eq(true)),
            )
            .await?;
        Ok(revoked > 0)
    }

    pub async fn revoke_all(&self, user_id: UserId) -> Result<u64, BastionError> {
        let revoked = self
            .deactivate(
                Condition::all()
                    .add(UserSession::Column::UserId.eq(user_id))
                    .add(UserSession::Column::IsActive.eq(true)),
            )
            .await?;
        info!(user_id = %user_id, revoked, "Revoked all sessions");
        Ok(revoked)
    }

    /// Sign out every other device.
    pub async fn revoke_all_except(
        &self,
        user_id: UserId,
        keep_token: &str,
    ) -> Result<u64, BastionError> {
        let revoked = self
            .deactivate(
                Condition::all()
                    .add(UserSession::Column::UserId.eq(user_id))
                    .add(UserSession::Column::IsActive.eq(true))
                    .add(UserSession::Column::SessionToken.ne(keep_token)),
            )
            .await?;
        info!(user_id = %user_id, revoked, "Revoked other sessions");
        Ok(revoked)
    }

    /// Usable sessions, newest first.
    pub async fn list_active(&self, user_id: UserId) -> Result<Vec<UserSession::Model>, BastionError> {
        Ok(UserSession::Entity::find()
            .filter(UserSession::Column::UserId.eq(user_id))
            .filter(expiry::session_usable_condition(expiry::now()))
            .order_by_desc(UserSession::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    pub async fn sweep_expired(&self) -> Result<SessionSweepStats, BastionError> {
        self.sweep_expired_at(expiry::now()).await
    }

    async fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<SessionSweepStats, BastionError> {
        let deactivated = self
            .deactivate(expiry::session_expired_condition(now))
            .await?;

        // Revocation time is not stored, so an inactive row ages from its last use
        let cutoff = expiry::before(now, self.config.retention);
        let stale = Condition::any()
            .add(UserSession::Column::ExpiresAt.lt(cutoff))
            .add(
                Condition::all()
                    .add(UserSession::Column::IsActive.eq(false))
                    .add(
                        Condition::any()
                            .add(UserSession::Column::LastUsedAt.lt(cutoff))
                            .add(
                                Condition::all()
                                    .add(UserSession::Column::LastUsedAt.is_null())
                                    .add(UserSession::Column::CreatedAt.lt(cutoff)),
                            ),
                    ),
            );
        let deleted = UserSession::Entity::delete_many()
            .filter(stale)
            .exec(&self.db)
            .await?
            .rows_affected;

        let stats = SessionSweepStats {
            deactivated,
            deleted,
        };
        if deactivated > 0 || deleted > 0 {
            info!(deactivated, deleted, "Swept sessions");
        }
        Ok(stats)
    }

    async fn deactivate(&self, filter: Condition) -> Result<u64, BastionError> {
        Ok(UserSession::Entity::update_many()
            .col_expr(UserSession::Column::IsActive, Expr::value(false))
            .filter(filter)
            .exec(&self.db)
            .await?
            .rows_affected)
    }
}

async fn touch_session(
    db: &DatabaseConnection,
    token: &str,
    now: DateTime<Utc>,
) -> Result<bool, BastionError> {
    let result = UserSession::Entity::update_many()
        .col_expr(UserSession::Column::LastUsedAt, Expr::value(Some(now)))
        .filter(UserSession::Column::SessionToken.eq(token))
        .filter(expiry::session_usable_condition(now))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}
