mod auth;
mod client;
pub mod db;
pub mod expiry;
mod lockout;
mod security_events;
mod services;
mod sessions;
mod sweepers;
mod tokens;
mod two_factor;

pub use auth::*;
pub use client::ClientContext;
pub use lockout::{LockoutPolicy, LockoutState};
pub use security_events::{SecurityEventLogger, SecurityEventRecord};
pub use services::Services;
pub use sessions::{SessionManager, SessionSweepStats};
pub use sweepers::{SweepReport, Sweepers};
pub use tokens::{IssuedToken, RedeemedToken, TokenKind, TokenPurpose, TokenService, TokenSweepStats};
pub use two_factor::{Enrollment, TwoFactorManager, TwoFactorStatus};

#[cfg(test)]
pub(crate) mod test_support;
