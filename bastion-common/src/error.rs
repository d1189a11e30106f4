/// Outcome taxonomy shared by every component.
///
/// `NotFound` deliberately covers both "row absent" and "row present but
/// expired, used or inactive" so callers cannot tell the two apart.
#[derive(thiserror::Error, Debug)]
pub enum BastionError {
    #[error("database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("OTP error: {0}")]
    Otp(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("deserialization failed: {0}")]
    DeserializeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl BastionError {
    /// Store unreachable or a write that did not apply. Safe to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DatabaseError(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}
