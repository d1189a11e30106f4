use std::fmt;
use std::time::Duration;

use bastion_common::{BastionError, Secret, TokenConfig, UserId};
use bastion_db_entities::EmailVerificationToken::EmailVerificationPurpose;
use bastion_db_entities::{EmailVerificationToken, PasswordResetToken};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::expiry;
use crate::ClientContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    EmailVerification,
    PasswordReset,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::EmailVerification => write!(f, "email_verification"),
            TokenKind::PasswordReset => write!(f, "password_reset"),
        }
    }
}

/// What a token is issued for, with the data stored alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPurpose {
    PasswordReset,
    EmailVerification {
        email: String,
        purpose: EmailVerificationPurpose,
    },
}

impl TokenPurpose {
    pub fn kind(&self) -> TokenKind {
        match self {
            TokenPurpose::PasswordReset => TokenKind::PasswordReset,
            TokenPurpose::EmailVerification { .. } => TokenKind::EmailVerification,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: Secret<String>,
    pub kind: TokenKind,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeemedToken {
    pub user_id: UserId,
    pub kind: TokenKind,
    /// Email-verification tokens only
    pub email: Option<String>,
    pub purpose: Option<EmailVerificationPurpose>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TokenSweepStats {
    pub email_verification: u64,
    pub password_reset: u64,
}

/// Columns shared by the two token tables.
trait TokenTable: EntityTrait {
    fn token_column() -> Self::Column;
    fn user_id_column() -> Self::Column;
    fn expires_at_column() -> Self::Column;
    fn used_at_column() -> Self::Column;
    fn into_redeemed(model: Self::Model) -> RedeemedToken;
}

impl TokenTable for PasswordResetToken::Entity {
    fn token_column() -> Self::Column {
        PasswordResetToken::Column::Token
    }

    fn user_id_column() -> Self::Column {
        PasswordResetToken::Column::UserId
    }

    fn expires_at_column() -> Self::Column {
        PasswordResetToken::Column::ExpiresAt
    }

    fn used_at_column() -> Self::Column {
        PasswordResetToken::Column::UsedAt
    }

    fn into_redeemed(model: Self::Model) -> RedeemedToken {
        RedeemedToken {
            user_id: model.user_id,
            kind: TokenKind::PasswordReset,
            email: None,
            purpose: None,
        }
    }
}

impl TokenTable for EmailVerificationToken::Entity {
    fn token_column() -> Self::Column {
        EmailVerificationToken::Column::Token
    }

    fn user_id_column() -> Self::Column {
        EmailVerificationToken::Column::UserId
    }

    fn expires_at_column() -> Self::Column {
        EmailVerificationToken::Column::ExpiresAt
    }

    fn used_at_column() -> Self::Column {
        EmailVerificationToken::Column::UsedAt
    }

    fn into_redeemed(model: Self::Model) -> RedeemedToken {
        RedeemedToken {
            user_id: model.user_id,
            kind: TokenKind::EmailVerification,
            email: Some(model.email),
            purpose: Some(model.purpose),
        }
    }
}

async fn redeem_in<E: TokenTable>(
    db: &DatabaseConnection,
    token: &str,
    now: DateTime<Utc>,
) -> Result<RedeemedToken, BastionError> {
    // Check and consume in one statement; the loser of a race sees zero rows
    let result = E::update_many()
        .col_expr(E::used_at_column(), Expr::value(Some(now)))
        .filter(E::token_column().eq(token))
        .filter(expiry::token_redeemable_condition(
            E::used_at_column(),
            E::expires_at_column(),
            now,
        ))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(BastionError::NotFound);
    }

    let model = E::find()
        .filter(E::token_column().eq(token))
        .one(db)
        .await?
        .ok_or(BastionError::NotFound)?;
    Ok(E::into_redeemed(model))
}

async fn delete_unused_in<E: TokenTable>(
    db: &DatabaseConnection,
    user_id: UserId,
) -> Result<u64, BastionError> {
    Ok(E::delete_many()
        .filter(E::user_id_column().eq(user_id))
        .filter(E::used_at_column().is_null())
        .exec(db)
        .await?
        .rows_affected)
}

async fn delete_expired_before<E: TokenTable>(
    db: &DatabaseConnection,
    cutoff: DateTime<Utc>,
) -> Result<u64, BastionError> {
    Ok(E::delete_many()
        .filter(E::expires_at_column().lt(cutoff))
        .exec(db)
        .await?
        .rows_affected)
}

/// Single-use, expiring tokens for email verification and password reset.
///
/// Issuing never invalidates earlier tokens of the same kind; callers that
/// want a new token to supersede the old ones call
/// [`TokenService::revoke_all_for_user`] first.
pub struct TokenService {
    config: TokenConfig,
    db: DatabaseConnection,
}

impl TokenService {
    pub fn new(config: TokenConfig, db: DatabaseConnection) -> Self {
        Self { config, db }
    }

    pub fn default_ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::EmailVerification => self.config.email_verification_ttl,
            TokenKind::PasswordReset => self.config.password_reset_ttl,
        }
    }

    pub async fn issue(
        &self,
        user_id: UserId,
        purpose: TokenPurpose,
        ttl: Duration,
        client: &ClientContext,
    ) -> Result<IssuedToken, BastionError> {
        let now = expiry::now();
        let token = Secret::random();
        let expires_at = expiry::after(now, ttl);
        let kind = purpose.kind();

        match purpose {
            TokenPurpose::PasswordReset => {
                PasswordResetToken::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    token: Set(token.expose_secret().clone()),
                    expires_at: Set(expires_at),
                    used_at: Set(None),
                    ip_address: Set(client.ip_address.clone()),
                    user_agent: Set(client.user_agent.clone()),
                    created_at: Set(now),
                }
                .insert(&self.db)
                .await?;
            }
            TokenPurpose::EmailVerification { email, purpose } => {
                EmailVerificationToken::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    token: Set(token.expose_secret().clone()),
                    email: Set(email),
                    purpose: Set(purpose),
                    expires_at: Set(expires_at),
                    used_at: Set(None),
                    ip_address: Set(client.ip_address.clone()),
                    user_agent: Set(client.user_agent.clone()),
                    created_at: Set(now),
                }
                .insert(&self.db)
                .await?;
            }
        }

        info!(user_id = %user_id, %kind, %expires_at, "Token issued");
        Ok(IssuedToken {
            token,
            kind,
            user_id,
            expires_at,
        })
    }

    /// Consume a token. Expired, used, unknown and wrong-kind tokens are all `NotFound`.
    pub async fn redeem(&self, token: &str, kind: TokenKind) -> Result<RedeemedToken, BastionError> {
        let now = expiry::now();
        let redeemed = match kind {
            TokenKind::PasswordReset => {
                redeem_in::<PasswordResetToken::Entity>(&self.db, token, now).await?
            }
            TokenKind::EmailVerification => {
                redeem_in::<EmailVerificationToken::Entity>(&self.db, token, now).await?
            }
        };
        info!(user_id = %redeemed.user_id, %kind, "Token redeemed");
        Ok(redeemed)
    }

    /// Delete every unused token of `kind` held by the user.
    pub async fn revoke_all_for_user(
        &self,
        user_id: UserId,
        kind: TokenKind,
    ) -> Result<u64, BastionError> {
        let deleted = match kind {
            TokenKind::PasswordReset => {
                delete_unused_in::<PasswordResetToken::Entity>(&self.db, user_id).await?
            }
            TokenKind::EmailVerification => {
                delete_unused_in::<EmailVerificationToken::Entity>(&self.db, user_id).await?
            }
        };
        debug!(user_id = %user_id, %kind, deleted, "Revoked outstanding tokens");
        Ok(deleted)
    }

    /// Drop tokens whose expiry is older than the retention window, used or not.
    pub async fn sweep_expired(&self) -> Result<TokenSweepStats, BastionError> {
        self.sweep_expired_at(expiry::now()).await
    }

    async fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<TokenSweepStats, BastionError> {
        let cutoff = expiry::before(now, self.config.retention);
        let stats = TokenSweepStats {
            email_verification: delete_expired_before::<EmailVerificationToken::Entity>(
                &self.db, cutoff,
            )
            .await?,
            password_reset: delete_expired_before::<PasswordResetToken::Entity>(&self.db, cutoff)
                .await?,
        };
        if stats != TokenSweepStats::default() {
            info!(
                email_verification = stats.email_verification,
                password_reset = stats.password_reset,
                "Swept expired tokens"
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_db, user};

    const TWO_HOURS: Duration = Duration::from_secs(2 * 3600);

    async fn service() -> TokenService {
        TokenService::new(
            TokenConfig {
                retention: Duration::from_secs(7 * 24 * 3600),
                ..Default::default()
            },
            test_db().await,
        )
    }

    fn verification(email: &str) -> TokenPurpose {
        TokenPurpose::EmailVerification {
            email: email.to_owned(),
            purpose: EmailVerificationPurpose::Registration,
        }
    }

    async fn expire_reset_token(service: &TokenService, token: &str, at: DateTime<Utc>) {
        PasswordResetToken::Entity::update_many()
            .col_expr(PasswordResetToken::Column::ExpiresAt, Expr::value(at))
            .filter(PasswordResetToken::Column::Token.eq(token))
            .exec(&service.db)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_password_reset_redeems_once() {
        let service = service().await;
        let user_id = user();
        let issued = service
            .issue(user_id, TokenPurpose::PasswordReset, TWO_HOURS, &ClientContext::default())
            .await
            .unwrap();
        assert_eq!(issued.kind, TokenKind::PasswordReset);
        assert!(issued.expires_at - expiry::now() <= chrono::Duration::hours(2));

        let redeemed = service
            .redeem(issued.token.expose_secret(), TokenKind::PasswordReset)
            .await
            .unwrap();
        assert_eq!(redeemed.user_id, user_id);
        assert_eq!(redeemed.kind, TokenKind::PasswordReset);
        assert!(redeemed.email.is_none());

        assert!(matches!(
            service
                .redeem(issued.token.expose_secret(), TokenKind::PasswordReset)
                .await,
            Err(BastionError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_redeem_succeeds_once() {
        let service = service().await;
        let issued = service
            .issue(user(), TokenPurpose::PasswordReset, TWO_HOURS, &ClientContext::default())
            .await
            .unwrap();
        let token = issued.token.expose_secret();

        let (a, b) = tokio::join!(
            service.redeem(token, TokenKind::PasswordReset),
            service.redeem(token, TokenKind::PasswordReset),
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let loser = if a.is_ok() { b } else { a };
        assert!(loser.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_email_verification_carries_address() {
        let service = service().await;
        let user_id = user();
        let issued = service
            .issue(
                user_id,
                TokenPurpose::EmailVerification {
                    email: "new@example.com".into(),
                    purpose: EmailVerificationPurpose::EmailChange,
                },
                Duration::from_secs(3600),
                &ClientContext::new("198.51.100.2", "curl"),
            )
            .await
            .unwrap();

        // wrong kind does not consume it
        assert!(service
            .redeem(issued.token.expose_secret(), TokenKind::PasswordReset)
            .await
            .unwrap_err()
            .is_not_found());

        let redeemed = service
            .redeem(issued.token.expose_secret(), TokenKind::EmailVerification)
            .await
            .unwrap();
        assert_eq!(redeemed.user_id, user_id);
        assert_eq!(redeemed.email.as_deref(), Some("new@example.com"));
        assert_eq!(redeemed.purpose, Some(EmailVerificationPurpose::EmailChange));
    }

    #[tokio::test]
    async fn test_expired_token_is_not_found() {
        let service = service().await;
        let issued = service
            .issue(user(), TokenPurpose::PasswordReset, TWO_HOURS, &ClientContext::default())
            .await
            .unwrap();
        expire_reset_token(
            &service,
            issued.token.expose_secret(),
            expiry::now() - chrono::Duration::seconds(1),
        )
        .await;

        assert!(service
            .redeem(issued.token.expose_secret(), TokenKind::PasswordReset)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_multiple_outstanding_tokens() {
        let service = service().await;
        let user_id = user();
        let first = service
            .issue(user_id, verification("a@example.com"), TWO_HOURS, &ClientContext::default())
            .await
            .unwrap();
        let second = service
            .issue(user_id, verification("a@example.com"), TWO_HOURS, &ClientContext::default())
            .await
            .unwrap();
        assert_ne!(first.token, second.token);

        service
            .redeem(second.token.expose_secret(), TokenKind::EmailVerification)
            .await
            .unwrap();
        service
            .redeem(first.token.expose_secret(), TokenKind::EmailVerification)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_revoke_all_for_user() {
        let service = service().await;
        let user_id = user();
        let used = service
            .issue(user_id, TokenPurpose::PasswordReset, TWO_HOURS, &ClientContext::default())
            .await
            .unwrap();
        service
            .redeem(used.token.expose_secret(), TokenKind::PasswordReset)
            .await
            .unwrap();
        let pending = service
            .issue(user_id, TokenPurpose::PasswordReset, TWO_HOURS, &ClientContext::default())
            .await
            .unwrap();
        let other = service
            .issue(user(), TokenPurpose::PasswordReset, TWO_HOURS, &ClientContext::default())
            .await
            .unwrap();

        assert_eq!(
            service
                .revoke_all_for_user(user_id, TokenKind::PasswordReset)
                .await
                .unwrap(),
            1
        );
        assert!(service
            .redeem(pending.token.expose_secret(), TokenKind::PasswordReset)
            .await
            .is_err());
        service
            .redeem(other.token.expose_secret(), TokenKind::PasswordReset)
            .await
            .unwrap();
        assert_eq!(
            service
                .revoke_all_for_user(user_id, TokenKind::EmailVerification)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_sweep_respects_retention() {
        let service = service().await;
        let now = expiry::now();
        let old = service
            .issue(user(), TokenPurpose::PasswordReset, TWO_HOURS, &ClientContext::default())
            .await
            .unwrap();
        expire_reset_token(&service, old.token.expose_secret(), now - chrono::Duration::days(8))
            .await;
        let recent = service
            .issue(user(), TokenPurpose::PasswordReset, TWO_HOURS, &ClientContext::default())
            .await
            .unwrap();
        expire_reset_token(&service, recent.token.expose_secret(), now - chrono::Duration::days(1))
            .await;
        service
            .issue(user(), verification("b@example.com"), TWO_HOURS, &ClientContext::default())
            .await
            .unwrap();

        let stats = service.sweep_expired_at(now).await.unwrap();
        assert_eq!(
            stats,
            TokenSweepStats {
                email_verification: 0,
                password_reset: 1,
            }
        );
        assert_eq!(
            PasswordResetToken::Entity::find()
                .all(&service.db)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
