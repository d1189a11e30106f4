use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, PartialEq, Eq, Hash, Serialize, Clone, Copy, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum SecurityEventType {
    #[sea_orm(string_value = "login_success")]
    LoginSuccess,
    #[sea_orm(string_value = "login_failed")]
    LoginFailed,
    #[sea_orm(string_value = "logout")]
    Logout,
    #[sea_orm(string_value = "password_changed")]
    PasswordChanged,
    #[sea_orm(string_value = "password_reset_requested")]
    PasswordResetRequested,
    #[sea_orm(string_value = "password_reset_completed")]
    PasswordResetCompleted,
    #[sea_orm(string_value = "email_verification_sent")]
    EmailVerificationSent,
    #[sea_orm(string_value = "email_verified")]
    EmailVerified,
    #[sea_orm(string_value = "account_locked")]
    AccountLocked,
    #[sea_orm(string_value = "account_unlocked")]
    AccountUnlocked,
    #[sea_orm(string_value = "session_revoked")]
    SessionRevoked,
    #[sea_orm(string_value = "sessions_revoked_all")]
    SessionsRevokedAll,
    #[sea_orm(string_value = "2fa_enrollment_started")]
    TwoFactorEnrollmentStarted,
    #[sea_orm(string_value = "2fa_enabled")]
    TwoFactorEnabled,
    #[sea_orm(string_value = "2fa_disabled")]
    TwoFactorDisabled,
    #[sea_orm(string_value = "2fa_removed")]
    TwoFactorRemoved,
    #[sea_orm(string_value = "backup_codes_regenerated")]
    BackupCodesRegenerated,
    #[sea_orm(string_value = "backup_code_used")]
    BackupCodeUsed,
    /// Lockout state could not be read during login
    #[sea_orm(string_value = "lockout_state_unavailable")]
    LockoutStateUnavailable,
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_value())
    }
}

impl FromStr for SecurityEventType {
    type Err = DbErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from_value(&s.to_owned())
    }
}

/// Append-only. Nothing in the codebase updates an existing row.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "security_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Absent for anonymous or system-initiated events
    pub user_id: Option<Uuid>,
    pub event_type: SecurityEventType,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Iterable;

    #[test]
    fn test_event_type_string_form() {
        assert_eq!(SecurityEventType::TwoFactorEnabled.to_string(), "2fa_enabled");
        assert_eq!(
            "account_locked".parse::<SecurityEventType>().unwrap(),
            SecurityEventType::AccountLocked
        );
        assert!("launch_missiles".parse::<SecurityEventType>().is_err());
    }

    #[test]
    fn test_event_type_values_fit_column() {
        for kind in SecurityEventType::iter() {
            assert!(kind.to_value().len() <= 32, "{kind} is too long");
        }
    }
}
