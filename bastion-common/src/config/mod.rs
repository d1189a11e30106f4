mod defaults;

use std::path::PathBuf;
use std::time::Duration;

use defaults::*;
use serde::{Deserialize, Serialize};

use crate::{BastionError, Secret};

/// Durations past this are rejected so timestamp arithmetic can never overflow.
const MAX_DURATION: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 100);

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct LockoutConfig {
    /// Consecutive failures that lock the account
    #[serde(default = "_default_lockout_threshold")]
    pub threshold: u32,

    #[serde(default = "_default_lock_duration", with = "humantime_serde")]
    pub lock_duration: Duration,

    #[serde(default = "_default_lockout_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            threshold: _default_lockout_threshold(),
            lock_duration: _default_lock_duration(),
            sweep_interval: _default_lockout_sweep_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    #[serde(default = "_default_session_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    /// How long inactive or expired rows are kept before deletion
    #[serde(default = "_default_session_retention", with = "humantime_serde")]
    pub retention: Duration,

    #[serde(default = "_default_session_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: _default_session_ttl(),
            retention: _default_session_retention(),
            sweep_interval: _default_session_sweep_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct TokenConfig {
    #[serde(default = "_default_email_verification_ttl", with = "humantime_serde")]
    pub email_verification_ttl: Duration,

    #[serde(default = "_default_password_reset_ttl", with = "humantime_serde")]
    pub password_reset_ttl: Duration,

    /// Grace period after expiry, kept for correlation with security events
    #[serde(default = "_default_token_retention", with = "humantime_serde")]
    pub retention: Duration,

    #[serde(default = "_default_token_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            email_verification_ttl: _default_email_verification_ttl(),
            password_reset_ttl: _default_password_reset_ttl(),
            retention: _default_token_retention(),
            sweep_interval: _default_token_sweep_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct TwoFactorConfig {
    /// Shown by authenticator apps next to the account name
    #[serde(default = "_default_issuer")]
    pub issuer: String,

    #[serde(default = "_default_backup_code_count")]
    pub backup_code_count: usize,
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self {
            issuer: _default_issuer(),
            backup_code_count: _default_backup_code_count(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct SecurityEventConfig {
    #[serde(default = "_default_event_retention", with = "humantime_serde")]
    pub retention: Duration,

    #[serde(default = "_default_event_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for SecurityEventConfig {
    fn default() -> Self {
        Self {
            retention: _default_event_retention(),
            sweep_interval: _default_event_sweep_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BastionConfigStore {
    #[serde(default = "_default_database_url")]
    pub database_url: Secret<String>,

    #[serde(default)]
    pub lockout: LockoutConfig,

    #[serde(default)]
    pub sessions: SessionConfig,

    #[serde(default)]
    pub tokens: TokenConfig,

    #[serde(default)]
    pub two_factor: TwoFactorConfig,

    #[serde(default)]
    pub events: SecurityEventConfig,
}

impl Default for BastionConfigStore {
    fn default() -> Self {
        Self {
            database_url: _default_database_url(),
            lockout: <_>::default(),
            sessions: <_>::default(),
            tokens: <_>::default(),
            two_factor: <_>::default(),
            events: <_>::default(),
        }
    }
}

impl BastionConfigStore {
    pub fn validate(&self) -> Result<(), BastionError> {
        if self.lockout.threshold == 0 {
            return Err(BastionError::InvalidConfig(
                "lockout.threshold must be at least 1".into(),
            ));
        }
        if self.two_factor.backup_code_count == 0 {
            return Err(BastionError::InvalidConfig(
                "two_factor.backup_code_count must be at least 1".into(),
            ));
        }
        if self.two_factor.issuer.contains(':') {
            return Err(BastionError::InvalidConfig(
                "two_factor.issuer must not contain ':'".into(),
            ));
        }

        let durations = [
            ("lockout.lock_duration", self.lockout.lock_duration),
            ("lockout.sweep_interval", self.lockout.sweep_interval),
            ("sessions.ttl", self.sessions.ttl),
            ("sessions.retention", self.sessions.retention),
            ("sessions.sweep_interval", self.sessions.sweep_interval),
            ("tokens.email_verification_ttl", self.tokens.email_verification_ttl),
            ("tokens.password_reset_ttl", self.tokens.password_reset_ttl),
            ("tokens.retention", self.tokens.retention),
            ("tokens.sweep_interval", self.tokens.sweep_interval),
            ("events.retention", self.events.retention),
            ("events.sweep_interval", self.events.sweep_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(BastionError::InvalidConfig(format!("{name} must not be zero")));
            }
            if value > MAX_DURATION {
                return Err(BastionError::InvalidConfig(format!("{name} is too large")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BastionConfig {
    pub store: BastionConfigStore,
    pub paths_relative_to: PathBuf,
}

impl BastionConfig {
    /// In-memory configuration rooted at the current directory.
    pub fn from_store(store: BastionConfigStore) -> Self {
        Self {
            store,
            paths_relative_to: PathBuf::from("."),
        }
    }
}
