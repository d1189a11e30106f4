use std::time::Duration;

use crate::Secret;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(60 * 60 * 24);

#[inline]
pub(crate) fn _default_database_url() -> Secret<String> {
    Secret::new("sqlite:data/db".to_owned())
}

pub(crate) const fn _default_lockout_threshold() -> u32 {
    5
}

#[inline]
pub(crate) fn _default_lock_duration() -> Duration {
    HOUR
}

#[inline]
pub(crate) fn _default_lockout_sweep_interval() -> Duration {
    MINUTE * 5
}

#[inline]
pub(crate) fn _default_session_ttl() -> Duration {
    DAY
}

#[inline]
pub(crate) fn _default_session_retention() -> Duration {
    DAY * 30
}

#[inline]
pub(crate) fn _default_session_sweep_interval() -> Duration {
    MINUTE * 15
}

#[inline]
pub(crate) fn _default_email_verification_ttl() -> Duration {
    DAY
}

#[inline]
pub(crate) fn _default_password_reset_ttl() -> Duration {
    HOUR * 2
}

#[inline]
pub(crate) fn _default_token_retention() -> Duration {
    DAY * 7
}

#[inline]
pub(crate) fn _default_token_sweep_interval() -> Duration {
    HOUR
}

#[inline]
pub(crate) fn _default_issuer() -> String {
    "Bastion".to_owned()
}

pub(crate) const fn _default_backup_code_count() -> usize {
    10
}

#[inline]
pub(crate) fn _default_event_retention() -> Duration {
    DAY * 90
}

#[inline]
pub(crate) fn _default_event_sweep_interval() -> Duration {
    HOUR * 6
}
