use bastion_common::{BastionError, LockoutConfig, UserId};
use bastion_db_entities::AccountLockout;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict, SimpleExpr};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::expiry;

/// Lockout row as seen by callers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockoutState {
    pub user_id: UserId,
    pub failed_attempts: u32,
    pub last_failed_attempt: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
    /// Set when the call that produced this state is the one that applied the lock
    pub newly_locked: bool,
}

impl LockoutState {
    fn from_model(model: AccountLockout::Model, newly_locked: bool) -> Self {
        Self {
            user_id: model.user_id,
            failed_attempts: u32::try_from(model.failed_attempts).unwrap_or(0),
            last_failed_attempt: model.last_failed_attempt,
            locked_until: model.locked_until,
            newly_locked,
        }
    }

    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        expiry::lock_active(self.locked_until, now)
    }
}

/// Failed-attempt counting and temporary account locks.
///
/// All state lives in `account_lockouts`; every mutation is one statement so
/// concurrent requests for the same account cannot lose an increment.
pub struct LockoutPolicy {
    config: LockoutConfig,
    db: DatabaseConnection,
}

impl LockoutPolicy {
    pub fn new(config: LockoutConfig, db: DatabaseConnection) -> Self {
        Self { config, db }
    }

    pub fn config(&self) -> &LockoutConfig {
        &self.config
    }

    /// Count a failed attempt, locking the account once the threshold is reached.
    ///
    /// The lock expiry is set once per lock cycle: failures while locked
    /// still count but do not push `locked_until` further out. A failure after
    /// a lock has lapsed starts a new cycle at one, matching what the sweeper
    /// would have left behind.
    pub async fn record_failure(&self, user_id: UserId) -> Result<LockoutState, BastionError> {
        let now = expiry::now();
        let lock_until = expiry::after(now, self.config.lock_duration);
        let threshold = i32::try_from(self.config.threshold).unwrap_or(i32::MAX);

        let next_attempts: SimpleExpr = Expr::case(expiry::lock_lapsed_condition(now), Expr::val(1))
            .finally(
                Expr::col((
                    AccountLockout::Entity,
                    AccountLockout::Column::FailedAttempts,
                ))
                .add(1),
            )
            .into();

        let next_lock: SimpleExpr = Expr::case(
            expiry::lock_active_condition(now),
            Expr::col((AccountLockout::Entity, AccountLockout::Column::LockedUntil)),
        )
        .case(
            Expr::expr(next_attempts.clone()).gte(threshold),
            Expr::val(lock_until),
        )
        .finally(Expr::val(Option::<DateTime<Utc>>::None))
        .into();

        let first_attempt = AccountLockout::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            failed_attempts: Set(1),
            last_failed_attempt: Set(Some(now)),
            locked_until: Set((threshold <= 1).then_some(lock_until)),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // SET expressions all read the pre-update row; RETURNING reads the
        // row as this statement left it
        let model = AccountLockout::Entity::insert(first_attempt)
            .on_conflict(
                OnConflict::column(AccountLockout::Column::UserId)
                    .value(AccountLockout::Column::LockedUntil, next_lock)
                    .value(AccountLockout::Column::FailedAttempts, next_attempts)
                    .value(AccountLockout::Column::LastFailedAttempt, Expr::val(now))
                    .value(AccountLockout::Column::UpdatedAt, Expr::val(now))
                    .to_owned(),
            )
            .exec_with_returning(&self.db)
            .await?;

        // Only a statement stamped with the same microsecond can write this
        // exact expiry; such a duplicate only repeats an idempotent revocation
        let newly_locked = model.locked_until == Some(lock_until);
        let state = LockoutState::from_model(model, newly_locked);

        if newly_locked {
            info!(
                user_id = %user_id,
                failed_attempts = state.failed_attempts,
                locked_until = %lock_until,
                "Account locked"
            );
        } else {
            debug!(
                user_id = %user_id,
                failed_attempts = state.failed_attempts,
                "Recorded failed attempt"
            );
        }

        Ok(state)
    }

    /// Successful authentication: counter and lock are cleared together.
    pub async fn record_success(&self, user_id: UserId) -> Result<(), BastionError> {
        self.reset(Condition::all().add(AccountLockout::Column::UserId.eq(user_id)))
            .await?;
        Ok(())
    }

    /// Lazy check: a lock whose expiry has passed is not a lock.
    pub async fn is_locked(&self, user_id: UserId) -> Result<bool, BastionError> {
        let lock = AccountLockout::Entity::find()
            .filter(AccountLockout::Column::UserId.eq(user_id))
            .filter(expiry::lock_active_condition(expiry::now()))
            .one(&self.db)
            .await?;
        Ok(lock.is_some())
    }

    pub async fn lockout_state(&self, user_id: UserId) -> Result<Option<LockoutState>, BastionError> {
        Ok(self
            .find(user_id)
            .await?
            .map(|model| LockoutState::from_model(model, false)))
    }

    /// Admin: clear counter and lock unconditionally. Returns false if the
    /// account never failed a login.
    pub async fn unlock(&self, user_id: UserId) -> Result<bool, BastionError> {
        let affected = self
            .reset(Condition::all().add(AccountLockout::Column::UserId.eq(user_id)))
            .await?;
        if affected > 0 {
            info!(user_id = %user_id, "Account unlocked by admin");
        }
        Ok(affected > 0)
    }

    /// Currently locked accounts, soonest expiry first
    pub async fn list_locked(&self) -> Result<Vec<LockoutState>, BastionError> {
        Ok(AccountLockout::Entity::find()
            .filter(expiry::lock_active_condition(expiry::now()))
            .order_by_asc(AccountLockout::Column::LockedUntil)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|model| LockoutState::from_model(model, false))
            .collect())
    }

    /// Background task: clear every lapsed lock and its counter.
    pub async fn sweep_expired_locks(&self) -> Result<u64, BastionError> {
        let cleared = self
            .reset(expiry::lock_lapsed_condition(expiry::now()))
            .await?;
        if cleared > 0 {
            info!(cleared, "Cleared lapsed account locks");
        }
        Ok(cleared)
    }

    async fn find(&self, user_id: UserId) -> Result<Option<AccountLockout::Model>, BastionError> {
        Ok(AccountLockout::Entity::find()
            .filter(AccountLockout::Column::UserId.eq(user_id))
            .one(&self.db)
            .await?)
    }

    async fn reset(&self, filter: Condition) -> Result<u64, BastionError> {
        let result = AccountLockout::Entity::update_many()
            .col_expr(AccountLockout::Column::FailedAttempts, Expr::value(0))
            .col_expr(
                AccountLockout::Column::LastFailedAttempt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(
                AccountLockout::Column::LockedUntil,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(AccountLockout::Column::UpdatedAt, Expr::value(expiry::now()))
            .filter(filter)
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
