#![allow(non_snake_case)]

pub mod AccountLockout;
pub mod EmailVerificationToken;
pub mod PasswordResetToken;
pub mod SecurityEvent;
pub mod UserSession;
pub mod UserTwoFactor;
