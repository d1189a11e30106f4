use bastion_common::helpers::otp::{
    generate_backup_codes, generate_key, generate_setup_url, verify_totp, OtpSecretKey,
};
use bastion_common::{BastionError, Secret, TwoFactorConfig, UserId};
use bastion_db_entities::UserTwoFactor;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, Func, OnConflict, SimpleExpr};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::expiry;

/// Compare-and-set attempts before a backup code consumption gives up
const BACKUP_CODE_CAS_ATTEMPTS: usize = 3;

/// Material shown to the user exactly once when enrollment starts
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub secret: OtpSecretKey,
    pub backup_codes: Vec<Secret<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoFactorStatus {
    pub enabled: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub backup_codes_remaining: usize,
}

/// Second-factor enrollment and backup codes, at most one row per user.
///
/// Mutations on a user with no row are no-ops that report `false` rather
/// than errors.
pub struct TwoFactorManager {
    config: TwoFactorConfig,
    db: DatabaseConnection,
}

fn encode_codes<'a>(codes: impl IntoIterator<Item = &'a String>) -> Result<String, BastionError> {
    Ok(serde_json::to_string(&codes.into_iter().collect::<Vec<_>>())?)
}

impl TwoFactorManager {
    pub fn new(config: TwoFactorConfig, db: DatabaseConnection) -> Self {
        Self { config, db }
    }

    pub fn generate_backup_codes(&self) -> Vec<Secret<String>> {
        generate_backup_codes(self.config.backup_code_count)
    }

    /// Store a fresh secret and backup code set, disabled and unverified.
    ///
    /// Restarting an unfinished or disabled enrollment replaces the old
    /// material. A user with the factor enabled gets `Conflict`.
    pub async fn begin_enrollment(&self, user_id: UserId) -> Result<Enrollment, BastionError> {
        let now = expiry::now();
        let secret = generate_key();
        let backup_codes = self.generate_backup_codes();

        let row = UserTwoFactor::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            secret: Set(secret.expose_secret().clone()),
            backup_codes: Set(encode_codes(backup_codes.iter().map(|c| c.expose_secret()))?),
            enabled: Set(false),
            verified_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let written = UserTwoFactor::Entity::insert(row)
            .on_conflict(
                OnConflict::column(UserTwoFactor::Column::UserId)
                    .update_columns([
                        UserTwoFactor::Column::Secret,
                        UserTwoFactor::Column::BackupCodes,
                        UserTwoFactor::Column::VerifiedAt,
                        UserTwoFactor::Column::UpdatedAt,
                    ])
                    .action_and_where(
                        Expr::col((UserTwoFactor::Entity, UserTwoFactor::Column::Enabled))
                            .eq(false),
                    )
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        if written == 0 {
            return Err(BastionError::Conflict(
                "two-factor authentication is already enabled".into(),
            ));
        }

        info!(user_id = %user_id, "Two-factor enrollment started");
        Ok(Enrollment {
            secret,
            backup_codes,
        })
    }

    /// `otpauth://` URI for the QR code. `label` is usually the login name.
    pub fn provisioning_uri(
        &self,
        secret: &OtpSecretKey,
        label: &str,
    ) -> Result<Secret<String>, BastionError> {
        generate_setup_url(secret, &self.config.issuer, label)
    }

    /// Check a TOTP code against the stored secret, enabled or not.
    pub async fn verify_code(&self, user_id: UserId, code: &str) -> Result<bool, BastionError> {
        let Some(row) = self.find(user_id).await? else {
            return Ok(false);
        };
        Ok(verify_totp(code, &Secret::new(row.secret)))
    }

    /// Call only after the caller has verified a code from the new secret.
    ///
    /// Returns false when there is nothing to confirm (no row, or already enabled).
    pub async fn confirm_enrollment(&self, user_id: UserId) -> Result<bool, BastionError> {
        let now = expiry::now();
        let verified_at: SimpleExpr = Func::coalesce([
            SimpleExpr::from(Expr::col((
                UserTwoFactor::Entity,
                UserTwoFactor::Column::VerifiedAt,
            ))),
            Expr::value(now),
        ])
        .into();

        let result = UserTwoFactor::Entity::update_many()
            .col_expr(UserTwoFactor::Column::Enabled, Expr::value(true))
            .col_expr(UserTwoFactor::Column::VerifiedAt, verified_at)
            .col_expr(UserTwoFactor::Column::UpdatedAt, Expr::value(now))
            .filter(UserTwoFactor::Column::UserId.eq(user_id))
            .filter(UserTwoFactor::Column::Enabled.eq(false))
            .exec(&self.db)
            .await?;

        let confirmed = result.rows_affected > 0;
        if confirmed {
            info!(user_id = %user_id, "Two-factor authentication enabled");
        }
        Ok(confirmed)
    }

    /// Turn a previously verified factor back on. No proof of possession is
    /// asked for; a factor that was never verified stays disabled.
    pub async fn enable(&self, user_id: UserId) -> Result<bool, BastionError> {
        let result = UserTwoFactor::Entity::update_many()
            .col_expr(UserTwoFactor::Column::Enabled, Expr::value(true))
            .col_expr(UserTwoFactor::Column::UpdatedAt, Expr::value(expiry::now()))
            .filter(UserTwoFactor::Column::UserId.eq(user_id))
            .filter(UserTwoFactor::Column::Enabled.eq(false))
            .filter(UserTwoFactor::Column::VerifiedAt.is_not_null())
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Keeps `verified_at` and the secret.
    pub async fn disable(&self, user_id: UserId) -> Result<bool, BastionError> {
        let result = UserTwoFactor::Entity::update_many()
            .col_expr(UserTwoFactor::Column::Enabled, Expr::value(false))
            .col_expr(UserTwoFactor::Column::UpdatedAt, Expr::value(expiry::now()))
            .filter(UserTwoFactor::Column::UserId.eq(user_id))
            .filter(UserTwoFactor::Column::Enabled.eq(true))
            .exec(&self.db)
            .await?;
        let disabled = result.rows_affected > 0;
        if disabled {
            info!(user_id = %user_id, "Two-factor authentication disabled");
        }
        Ok(disabled)
    }

    /// Replace the whole backup code set.
    pub async fn regenerate_backup_codes(
        &self,
        user_id: UserId,
        codes: &[Secret<String>],
    ) -> Result<bool, BastionError> {
        let result = UserTwoFactor::Entity::update_many()
            .col_expr(
                UserTwoFactor::Column::BackupCodes,
                Expr::value(encode_codes(codes.iter().map(|c| c.expose_secret()))?),
            )
            .col_expr(UserTwoFactor::Column::UpdatedAt, Expr::value(expiry::now()))
            .filter(UserTwoFactor::Column::UserId.eq(user_id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Use up one backup code. True only for the caller that removed it.
    pub async fn consume_backup_code(
        &self,
        user_id: UserId,
        code: &str,
    ) -> Result<bool, BastionError> {
        let code = code.trim().to_lowercase();

        for _ in 0..BACKUP_CODE_CAS_ATTEMPTS {
            let Some(row) = self.find(user_id).await? else {
                return Ok(false);
            };
            let mut codes = row.backup_code_list();
            let Some(position) = codes.iter().position(|c| *c == code) else {
                return Ok(false);
            };
            codes.remove(position);

            // Only applies if nobody changed the set since we read it
            let result = UserTwoFactor::Entity::update_many()
                .col_expr(
                    UserTwoFactor::Column::BackupCodes,
                    Expr::value(encode_codes(codes.iter())?),
                )
                .col_expr(UserTwoFactor::Column::UpdatedAt, Expr::value(expiry::now()))
                .filter(UserTwoFactor::Column::UserId.eq(user_id))
                .filter(UserTwoFactor::Column::BackupCodes.eq(row.backup_codes))
                .exec(&self.db)
                .await?;

            if result.rows_affected > 0 {
                debug!(user_id = %user_id, remaining = codes.len(), "Backup code consumed");
                return Ok(true);
            }
        }

        warn!(user_id = %user_id, "Backup code set kept changing, giving up");
        Err(BastionError::Conflict(
            "backup codes modified concurrently".into(),
        ))
    }

    /// Delete the row. The next enrollment starts from scratch.
    pub async fn remove(&self, user_id: UserId) -> Result<bool, BastionError> {
        let result = UserTwoFactor::Entity::delete_many()
            .filter(UserTwoFactor::Column::UserId.eq(user_id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn status(&self, user_id: UserId) -> Result<Option<TwoFactorStatus>, BastionError> {
        Ok(self.find(user_id).await?.map(|row| TwoFactorStatus {
            enabled: row.enabled,
            verified_at: row.verified_at,
            backup_codes_remaining: row.backup_code_list().len(),
        }))
    }

    pub async fn is_enabled(&self, user_id: UserId) -> Result<bool, BastionError> {
        Ok(self.find(user_id).await?.is_some_and(|row| row.enabled))
    }

    async fn find(&self, user_id: UserId) -> Result<Option<UserTwoFactor::Model>, BastionError> {
        Ok(UserTwoFactor::Entity::find()
            .filter(UserTwoFactor::Column::UserId.eq(user_id))
            .one(&self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use bastion_common::helpers::otp::current_code;

    use super::*;
    use crate::test_support::{test_db, user};

    async fn manager() -> TwoFactorManager {
        TwoFactorManager::new(TwoFactorConfig::default(), test_db().await)
    }

    async fn enrolled(manager: &TwoFactorManager, user_id: UserId) -> Enrollment {
        let enrollment = manager.begin_enrollment(user_id).await.unwrap();
        let code = current_code(&enrollment.secret).unwrap();
        assert!(manager.verify_code(user_id, &code).await.unwrap());
        assert!(manager.confirm_enrollment(user_id).await.unwrap());
        enrollment
    }

    #[tokio::test]
    async fn test_begin_enrollment_is_not_enabled() {
        let manager = manager().await;
        let user_id = user();
        let enrollment = manager.begin_enrollment(user_id).await.unwrap();
        assert_eq!(enrollment.backup_codes.len(), 10);

        let status = manager.status(user_id).await.unwrap().unwrap();
        assert!(!status.enabled);
        assert!(status.verified_at.is_none());
        assert_eq!(status.backup_codes_remaining, 10);
        assert!(!manager.is_enabled(user_id).await.unwrap());

        // enable() cannot skip the proof step
        assert!(!manager.enable(user_id).await.unwrap());
        assert!(!manager.is_enabled(user_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_confirm_enrollment() {
        let manager = manager().await;
        let user_id = user();
        enrolled(&manager, user_id).await;

        let status = manager.status(user_id).await.unwrap().unwrap();
        assert!(status.enabled);
        let verified_at = status.verified_at.unwrap();

        // already enabled: no-op, verified_at untouched
        assert!(!manager.confirm_enrollment(user_id).await.unwrap());
        assert_eq!(
            manager.status(user_id).await.unwrap().unwrap().verified_at,
            Some(verified_at)
        );

        assert!(matches!(
            manager.begin_enrollment(user_id).await,
            Err(BastionError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_disable_unenrolled_is_noop() {
        let manager = manager().await;
        let user_id = user();
        assert!(!manager.disable(user_id).await.unwrap());
        assert!(!manager.confirm_enrollment(user_id).await.unwrap());
        let codes = manager.generate_backup_codes();
        assert!(!manager.regenerate_backup_codes(user_id, &codes).await.unwrap());
        assert!(!manager.remove(user_id).await.unwrap());
        assert!(!manager
            .consume_backup_code(user_id, "aaaaa-bbbbb")
            .await
            .unwrap());
        assert!(manager.status(user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reenable_without_reproof() {
        let manager = manager().await;
        let user_id = user();
        enrolled(&manager, user_id).await;
        let verified_at = manager.status(user_id).await.unwrap().unwrap().verified_at;

        assert!(manager.disable(user_id).await.unwrap());
        let status = manager.status(user_id).await.unwrap().unwrap();
        assert!(!status.enabled);
        assert_eq!(status.verified_at, verified_at);

        assert!(manager.enable(user_id).await.unwrap());
        assert!(manager.is_enabled(user_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_reenrollment_after_disable_requires_new_proof() {
        let manager = manager().await;
        let user_id = user();
        let first = enrolled(&manager, user_id).await;
        manager.disable(user_id).await.unwrap();

        let second = manager.begin_enrollment(user_id).await.unwrap();
        assert_ne!(first.secret, second.secret);
        assert!(manager.status(user_id).await.unwrap().unwrap().verified_at.is_none());
        assert!(!manager.enable(user_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_regenerate_keeps_enabled_state() {
        let manager = manager().await;
        let user_id = user();
        let enrollment = enrolled(&manager, user_id).await;
        let before = manager.status(user_id).await.unwrap().unwrap();

        let fresh = manager.generate_backup_codes();
        assert!(manager.regenerate_backup_codes(user_id, &fresh[..4]).await.unwrap());

        let after = manager.status(user_id).await.unwrap().unwrap();
        assert_eq!(after.enabled, before.enabled);
        assert_eq!(after.verified_at, before.verified_at);
        assert_eq!(after.backup_codes_remaining, 4);

        // old codes are gone
        assert!(!manager
            .consume_backup_code(user_id, enrollment.backup_codes[0].expose_secret())
            .await
            .unwrap());
        assert!(manager
            .consume_backup_code(user_id, fresh[0].expose_secret())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_backup_code_single_use() {
        let manager = manager().await;
        let user_id = user();
        let enrollment = enrolled(&manager, user_id).await;
        let code = enrollment.backup_codes[3].expose_secret().clone();

        let (a, b) = tokio::join!(
            manager.consume_backup_code(user_id, &code),
            manager.consume_backup_code(user_id, &code),
        );
        assert_eq!(a.unwrap() as u8 + b.unwrap() as u8, 1);
        assert!(!manager.consume_backup_code(user_id, &code).await.unwrap());
        assert_eq!(
            manager.status(user_id).await.unwrap().unwrap().backup_codes_remaining,
            9
        );
    }

    #[tokio::test]
    async fn test_remove_then_enroll_fresh() {
        let manager = manager().await;
        let user_id = user();
        enrolled(&manager, user_id).await;

        assert!(manager.remove(user_id).await.unwrap());
        assert!(manager.status(user_id).await.unwrap().is_none());
        assert!(!manager.verify_code(user_id, "123456").await.unwrap());

        manager.begin_enrollment(user_id).await.unwrap();
        assert!(!manager.is_enabled(user_id).await.unwrap());
    }

    #[test]
    fn test_provisioning_uri_uses_issuer() {
        let manager = TwoFactorManager::new(
            TwoFactorConfig {
                issuer: "Acme".into(),
                ..Default::default()
            },
            sea_orm::DatabaseConnection::Disconnected,
        );
        let uri = manager
            .provisioning_uri(&generate_key(), "alice@example.com")
            .unwrap();
        assert!(uri.expose_secret().contains("issuer=Acme"));
    }
}
