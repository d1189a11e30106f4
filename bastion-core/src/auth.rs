//! Login and account-recovery flows built from the leaf components.
//!
//! The leaf components never log security events themselves; every flow here
//! records the outcome after the component call returns.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bastion_common::helpers::hash::{hash_password, verify_password_hash};
use bastion_common::{BastionError, Secret, UserId};
use bastion_db_entities::EmailVerificationToken::EmailVerificationPurpose;
use bastion_db_entities::SecurityEvent::SecurityEventType;
use bastion_db_entities::UserSession;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    ClientContext, Enrollment, IssuedToken, LockoutPolicy, RedeemedToken, SecurityEventLogger,
    SecurityEventRecord, Services, SessionManager, TokenKind, TokenPurpose, TokenService,
    TwoFactorManager,
};

/// The slice of a user record this subsystem needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub id: UserId,
    pub login: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
}

/// User storage owned by the surrounding application.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_login(&self, login: &str) -> Result<Option<UserAccount>, BastionError>;

    async fn find_by_id(&self, id: UserId) -> Result<Option<UserAccount>, BastionError>;

    async fn set_password_hash(&self, id: UserId, password_hash: String)
        -> Result<(), BastionError>;

    async fn mark_email_verified(&self, id: UserId, email: &str) -> Result<(), BastionError>;
}

/// Opaque one-way password function.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, BastionError>;

    fn verify(&self, password: &str, password_hash: &str) -> Result<bool, BastionError>;
}

/// Argon2id with the library defaults, PHC string format.
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2Hasher;

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, BastionError> {
        Ok(hash_password(password)?)
    }

    fn verify(&self, password: &str, password_hash: &str) -> Result<bool, BastionError> {
        Ok(verify_password_hash(password, password_hash)?)
    }
}

/// Outbound delivery of tokens (email, push).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_password_reset(
        &self,
        user: &UserAccount,
        token: &IssuedToken,
    ) -> Result<(), BastionError>;

    async fn send_email_verification(
        &self,
        user: &UserAccount,
        email: &str,
        token: &IssuedToken,
    ) -> Result<(), BastionError>;
}

/// Logs that a message would have been sent. The token value is not logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_password_reset(
        &self,
        user: &UserAccount,
        token: &IssuedToken,
    ) -> Result<(), BastionError> {
        info!(
            user_id = %user.id,
            expires_at = %token.expires_at,
            "Password reset link ready for delivery"
        );
        Ok(())
    }

    async fn send_email_verification(
        &self,
        user: &UserAccount,
        email: &str,
        token: &IssuedToken,
    ) -> Result<(), BastionError> {
        info!(
            user_id = %user.id,
            %email,
            expires_at = %token.expires_at,
            "Verification link ready for delivery"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecondFactor {
    Totp(String),
    BackupCode(String),
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub login: String,
    pub password: Secret<String>,
    pub second_factor: Option<SecondFactor>,
    pub client: ClientContext,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    Authenticated(UserSession::Model),
    /// Password was right; ask again with a TOTP or backup code
    SecondFactorRequired,
    /// Unknown user, wrong credentials and locked accounts all look the same
    Rejected,
}

#[derive(Debug, Clone)]
pub struct TwoFactorSetup {
    pub enrollment: Enrollment,
    pub provisioning_uri: Secret<String>,
}

pub struct AuthService {
    lockout: Arc<LockoutPolicy>,
    sessions: Arc<SessionManager>,
    two_factor: Arc<TwoFactorManager>,
    tokens: Arc<TokenService>,
    events: Arc<SecurityEventLogger>,
    users: Arc<dyn UserDirectory>,
    hasher: Arc<dyn PasswordHasher>,
    notifier: Arc<dyn Notifier>,
    decoy_hash: OnceLock<Option<String>>,
}

const DECOY_PASSWORD: &str = "bastion-decoy-password";

impl AuthService {
    pub fn new(
        services: &Services,
        users: Arc<dyn UserDirectory>,
        hasher: Arc<dyn PasswordHasher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            lockout: services.lockout.clone(),
            sessions: services.sessions.clone(),
            two_factor: services.two_factor.clone(),
            tokens: services.tokens.clone(),
            events: services.events.clone(),
            users,
            hasher,
            notifier,
            decoy_hash: OnceLock::new(),
        }
    }

    /// Check `password` against `password_hash`, or against a decoy hash when
    /// there is nothing to check, so every rejection costs one verification.
    fn verify_password(
        &self,
        password: &Secret<String>,
        password_hash: Option<&str>,
    ) -> Result<bool, BastionError> {
        match password_hash {
            Some(hash) => self.hasher.verify(password.expose_secret(), hash),
            None => {
                self.burn_verification(password);
                Ok(false)
            }
        }
    }

    fn burn_verification(&self, password: &Secret<String>) {
        let decoy = self
            .decoy_hash
            .get_or_init(|| self.hasher.hash(DECOY_PASSWORD).ok());
        if let Some(hash) = decoy {
            let _ = self.hasher.verify(password.expose_secret(), hash);
        }
    }

    async fn audit(
        &self,
        event_type: SecurityEventType,
        user_id: Option<UserId>,
        client: &ClientContext,
        description: Option<&str>,
    ) {
        let mut record = SecurityEventRecord::new(event_type).client(client);
        if let Some(user_id) = user_id {
            record = record.user(user_id);
        }
        if let Some(description) = description {
            record = record.description(description);
        }
        self.events.record(record).await;
    }

    async fn lockout_unavailable(
        &self,
        user_id: UserId,
        client: &ClientContext,
        error: &BastionError,
    ) {
        self.events
            .record(
                SecurityEventRecord::new(SecurityEventType::LockoutStateUnavailable)
                    .user(user_id)
                    .client(client)
                    .description(error.to_string()),
            )
            .await;
    }

    /// Lock lookups that fail are treated as "not locked" and audited.
    async fn is_locked(&self, user_id: UserId, client: &ClientContext) -> bool {
        match self.lockout.is_locked(user_id).await {
            Ok(locked) => locked,
            Err(error) => {
                warn!(user_id = %user_id, %error, "Lockout state unavailable, continuing as unlocked");
                self.lockout_unavailable(user_id, client, &error).await;
                false
            }
        }
    }

    /// Count a failed credential check and audit it.
    async fn reject(
        &self,
        user_id: UserId,
        client: &ClientContext,
        reason: &str,
    ) -> Result<LoginOutcome, BastionError> {
        let state = match self.lockout.record_failure(user_id).await {
            Ok(state) => state,
            Err(error) => {
                warn!(user_id = %user_id, %error, "Failed attempt could not be counted");
                self.audit(SecurityEventType::LoginFailed, Some(user_id), client, Some(reason))
                    .await;
                self.lockout_unavailable(user_id, client, &error).await;
                return Err(error);
            }
        };
        self.events
            .record(
                SecurityEventRecord::new(SecurityEventType::LoginFailed)
                    .user(user_id)
                    .client(client)
                    .description(reason)
                    .metadata(json!({ "failed_attempts": state.failed_attempts })),
            )
            .await;

        if state.newly_locked {
            let revoked = self.sessions.revoke_all(user_id).await?;
            let mut record = SecurityEventRecord::new(SecurityEventType::AccountLocked)
                .user(user_id)
                .client(client)
                .metadata(json!({
                    "failed_attempts": state.failed_attempts,
                    "sessions_revoked": revoked,
                }));
            if let Some(until) = state.locked_until {
                record = record.description(format!("locked until {until}"));
            }
            self.events.record(record).await;
        }
        Ok(LoginOutcome::Rejected)
    }

    async fn check_second_factor(
        &self,
        user_id: UserId,
        factor: &SecondFactor,
        client: &ClientContext,
    ) -> Result<bool, BastionError> {
        match factor {
            SecondFactor::Totp(code) => self.two_factor.verify_code(user_id, code).await,
            SecondFactor::BackupCode(code) => {
                let used = self.two_factor.consume_backup_code(user_id, code).await?;
                if used {
                    self.audit(SecurityEventType::BackupCodeUsed, Some(user_id), client, None)
                        .await;
                }
                Ok(used)
            }
        }
    }

    pub async fn login(&self, request: LoginRequest) -> Result<LoginOutcome, BastionError> {
        let client = &request.client;
        let Some(user) = self.users.find_by_login(&request.login).await? else {
            self.burn_verification(&request.password);
            self.events
                .record(
                    SecurityEventRecord::new(SecurityEventType::LoginFailed)
                        .client(client)
                        .description("unknown login")
                        .metadata(json!({ "login": request.login })),
                )
                .await;
            return Ok(LoginOutcome::Rejected);
        };

        if self.is_locked(user.id, client).await {
            self.burn_verification(&request.password);
            self.audit(
                SecurityEventType::LoginFailed,
                Some(user.id),
                client,
                Some("account locked"),
            )
            .await;
            return Ok(LoginOutcome::Rejected);
        }

        if !self.verify_password(&request.password, user.password_hash.as_deref())? {
            return self.reject(user.id, client, "invalid password").await;
        }

        if self.two_factor.is_enabled(user.id).await? {
            let Some(factor) = &request.second_factor else {
                return Ok(LoginOutcome::SecondFactorRequired);
            };
            if !self.check_second_factor(user.id, factor, client).await? {
                return self.reject(user.id, client, "invalid second factor").await;
            }
        }

        if let Err(error) = self.lockout.record_success(user.id).await {
            warn!(user_id = %user.id, %error, "Failure counter could not be reset");
            self.lockout_unavailable(user.id, client, &error).await;
        }
        let session = self.sessions.create_session(user.id, client).await?;
        self.events
            .record(
                SecurityEventRecord::new(SecurityEventType::LoginSuccess)
                    .user(user.id)
                    .client(client)
                    .metadata(json!({ "session_id": session.id })),
            )
            .await;
        Ok(LoginOutcome::Authenticated(session))
    }

    /// Validate a session token and record activity in the background.
    pub async fn authenticate_session(
        &self,
        session_token: &str,
    ) -> Result<UserSession::Model, BastionError> {
        let session = self.sessions.validate_session(session_token).await?;
        drop(self.sessions.touch(session_token));
        Ok(session)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<UserSession::Model, BastionError> {
        self.sessions.refresh(refresh_token).await
    }

    /// Returns false if the session was already unusable.
    pub async fn logout(
        &self,
        session_token: &str,
        client: &ClientContext,
    ) -> Result<bool, BastionError> {
        let session = match self.sessions.validate_session(session_token).await {
            Ok(session) => session,
            Err(BastionError::NotFound) => return Ok(false),
            Err(error) => return Err(error),
        };
        let revoked = self.sessions.revoke(session_token).await?;
        if revoked {
            self.audit(SecurityEventType::Logout, Some(session.user_id), client, None)
                .await;
        }
        Ok(revoked)
    }

    pub async fn logout_everywhere(
        &self,
        user_id: UserId,
        client: &ClientContext,
    ) -> Result<u64, BastionError> {
        let revoked = self.sessions.revoke_all(user_id).await?;
        self.events
            .record(
                SecurityEventRecord::new(SecurityEventType::SessionsRevokedAll)
                    .user(user_id)
                    .client(client)
                    .metadata(json!({ "sessions_revoked": revoked })),
            )
            .await;
        Ok(revoked)
    }

    /// Revoke one session of the user, e.g. from a devices list. Tokens of
    /// other users are left alone and reported as not revoked.
    pub async fn revoke_session(
        &self,
        user_id: UserId,
        session_token: &str,
        client: &ClientContext,
    ) -> Result<bool, BastionError> {
        let revoked = self
            .sessions
            .revoke_for_user(user_id, session_token)
            .await?;
        if revoked {
            self.audit(SecurityEventType::SessionRevoked, Some(user_id), client, None)
                .await;
        }
        Ok(revoked)
    }

    /// Wrong current password counts towards the lockout and returns false.
    /// On success every session of the user is revoked.
    pub async fn change_password(
        &self,
        user_id: UserId,
        current_password: &Secret<String>,
        new_password: &Secret<String>,
        client: &ClientContext,
    ) -> Result<bool, BastionError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(BastionError::NotFound)?;

        if !self.verify_password(current_password, user.password_hash.as_deref())? {
            self.reject(user_id, client, "invalid current password")
                .await?;
            return Ok(false);
        }

        self.set_password(user_id, new_password).await?;
        self.audit(SecurityEventType::PasswordChanged, Some(user_id), client, None)
            .await;
        Ok(true)
    }

    async fn set_password(
        &self,
        user_id: UserId,
        new_password: &Secret<String>,
    ) -> Result<(), BastionError> {
        let hash = self.hasher.hash(new_password.expose_secret())?;
        self.users.set_password_hash(user_id, hash).await?;
        self.sessions.revoke_all(user_id).await?;
        Ok(())
    }

    /// Always succeeds for unknown logins so the response does not reveal
    /// which accounts exist.
    pub async fn request_password_reset(
        &self,
        login: &str,
        client: &ClientContext,
    ) -> Result<(), BastionError> {
        let Some(user) = self.users.find_by_login(login).await? else {
            info!("Password reset requested for unknown login");
            return Ok(());
        };

        let issued = self
            .tokens
            .issue(
                user.id,
                TokenPurpose::PasswordReset,
                self.tokens.default_ttl(TokenKind::PasswordReset),
                client,
            )
            .await?;
        self.notifier.send_password_reset(&user, &issued).await?;
        self.audit(
            SecurityEventType::PasswordResetRequested,
            Some(user.id),
            client,
            None,
        )
        .await;
        Ok(())
    }

    /// Redeem a reset token and set the new password. Also clears any lockout
    /// and drops the other outstanding reset tokens.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &Secret<String>,
        client: &ClientContext,
    ) -> Result<UserId, BastionError> {
        let redeemed = self.tokens.redeem(token, TokenKind::PasswordReset).await?;
        let user_id = redeemed.user_id;

        self.set_password(user_id, new_password).await?;
        self.tokens
            .revoke_all_for_user(user_id, TokenKind::PasswordReset)
            .await?;
        self.lockout.record_success(user_id).await?;

        self.audit(
            SecurityEventType::PasswordResetCompleted,
            Some(user_id),
            client,
            None,
        )
        .await;
        Ok(user_id)
    }

    pub async fn send_email_verification(
        &self,
        user_id: UserId,
        email: &str,
        purpose: EmailVerificationPurpose,
        client: &ClientContext,
    ) -> Result<(), BastionError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(BastionError::NotFound)?;

        let issued = self
            .tokens
            .issue(
                user_id,
                TokenPurpose::EmailVerification {
                    email: email.to_owned(),
                    purpose,
                },
                self.tokens.default_ttl(TokenKind::EmailVerification),
                client,
            )
            .await?;
        self.notifier
            .send_email_verification(&user, email, &issued)
            .await?;
        self.events
            .record(
                SecurityEventRecord::new(SecurityEventType::EmailVerificationSent)
                    .user(user_id)
                    .client(client)
                    .metadata(json!({ "email": email })),
            )
            .await;
        Ok(())
    }

    pub async fn verify_email(
        &self,
        token: &str,
        client: &ClientContext,
    ) -> Result<RedeemedToken, BastionError> {
        let redeemed = self
            .tokens
            .redeem(token, TokenKind::EmailVerification)
            .await?;
        if let Some(email) = &redeemed.email {
            self.users
                .mark_email_verified(redeemed.user_id, email)
                .await?;
        }
        self.events
            .record(
                SecurityEventRecord::new(SecurityEventType::EmailVerified)
                    .user(redeemed.user_id)
                    .client(client)
                    .metadata(json!({ "email": redeemed.email })),
            )
            .await;
        Ok(redeemed)
    }

    pub async fn admin_unlock(
        &self,
        user_id: UserId,
        client: &ClientContext,
    ) -> Result<bool, BastionError> {
        let unlocked = self.lockout.unlock(user_id).await?;
        if unlocked {
            self.audit(
                SecurityEventType::AccountUnlocked,
                Some(user_id),
                client,
                Some("administrative unlock"),
            )
            .await;
        }
        Ok(unlocked)
    }

    pub async fn begin_two_factor(
        &self,
        user_id: UserId,
        label: &str,
        client: &ClientContext,
    ) -> Result<TwoFactorSetup, BastionError> {
        let enrollment = self.two_factor.begin_enrollment(user_id).await?;
        let provisioning_uri = self
            .two_factor
            .provisioning_uri(&enrollment.secret, label)?;
        self.audit(
            SecurityEventType::TwoFactorEnrollmentStarted,
            Some(user_id),
            client,
            None,
        )
        .await;
        Ok(TwoFactorSetup {
            enrollment,
            provisioning_uri,
        })
    }

    /// Enable the factor once the user proves they hold the secret.
    pub async fn confirm_two_factor(
        &self,
        user_id: UserId,
        code: &str,
        client: &ClientContext,
    ) -> Result<bool, BastionError> {
        if !self.two_factor.verify_code(user_id, code).await? {
            return Ok(false);
        }
        let enabled = self.two_factor.confirm_enrollment(user_id).await?;
        if enabled {
            self.audit(SecurityEventType::TwoFactorEnabled, Some(user_id), client, None)
                .await;
        }
        Ok(enabled)
    }

    pub async fn disable_two_factor(
        &self,
        user_id: UserId,
        client: &ClientContext,
    ) -> Result<bool, BastionError> {
        let disabled = self.two_factor.disable(user_id).await?;
        if disabled {
            self.audit(SecurityEventType::TwoFactorDisabled, Some(user_id), client, None)
                .await;
        }
        Ok(disabled)
    }

    pub async fn remove_two_factor(
        &self,
        user_id: UserId,
        client: &ClientContext,
    ) -> Result<bool, BastionError> {
        let removed = self.two_factor.remove(user_id).await?;
        if removed {
            self.audit(SecurityEventType::TwoFactorRemoved, Some(user_id), client, None)
                .await;
        }
        Ok(removed)
    }

    /// `None` when the user has no second factor configured.
    pub async fn regenerate_backup_codes(
        &self,
        user_id: UserId,
        client: &ClientContext,
    ) -> Result<Option<Vec<Secret<String>>>, BastionError> {
        let codes = self.two_factor.generate_backup_codes();
        if !self
            .two_factor
            .regenerate_backup_codes(user_id, &codes)
            .await?
        {
            return Ok(None);
        }
        self.audit(
            SecurityEventType::BackupCodesRegenerated,
            Some(user_id),
            client,
            None,
        )
        .await;
        Ok(Some(codes))
    }
}
