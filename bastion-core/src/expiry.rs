//! Time predicates shared by the read paths and the sweepers.
//!
//! Each predicate exists twice: as a plain function over model values and as
//! a sea-orm [`Condition`]. Reads filter with the condition, sweepers filter
//! with its negation, so a row a sweeper touches is always one a read would
//! already have rejected.

use std::time::Duration;

use bastion_db_entities::{AccountLockout, UserSession};
use chrono::{DateTime, SubsecRound, Utc};
use sea_orm::{ColumnTrait, Condition};

/// Current time at the precision every supported backend round-trips.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn span(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36500))
}

pub fn after(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    at.checked_add_signed(span(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn before(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(span(duration))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub fn lock_active(locked_until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(locked_until, Some(until) if until > now)
}

pub fn lock_active_condition(now: DateTime<Utc>) -> Condition {
    Condition::all().add(AccountLockout::Column::LockedUntil.gt(now))
}

/// A lock was set and has run out without being cleared.
pub fn lock_lapsed(locked_until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    locked_until.is_some() && !lock_active(locked_until, now)
}

pub fn lock_lapsed_condition(now: DateTime<Utc>) -> Condition {
    Condition::all()
        .add(AccountLockout::Column::LockedUntil.is_not_null())
        .add(lock_active_condition(now).not())
}

pub fn session_usable(session: &UserSession::Model, now: DateTime<Utc>) -> bool {
    session.is_active && session.expires_at > now
}

pub fn session_usable_condition(now: DateTime<Utc>) -> Condition {
    Condition::all()
        .add(UserSession::Column::IsActive.eq(true))
        .add(UserSession::Column::ExpiresAt.gt(now))
}

/// Active rows that time has already invalidated.
pub fn session_expired_condition(now: DateTime<Utc>) -> Condition {
    Condition::all()
        .add(UserSession::Column::IsActive.eq(true))
        .add(session_usable_condition(now).not())
}

pub fn token_redeemable(
    used_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    used_at.is_none() && expires_at > now
}

pub fn token_redeemable_condition<C: ColumnTrait>(
    used_at: C,
    expires_at: C,
    now: DateTime<Utc>,
) -> Condition {
    Condition::all()
        .add(used_at.is_null())
        .add(expires_at.gt(now))
}

#[cfg(test)]
mod tests {
    use bastion_db_entities::PasswordResetToken;
    use sea_orm::{ActiveModelTrait, EntityTrait, QueryFilter, Set};
    use uuid::Uuid;

    use super::*;
    use crate::test_support::{test_db, user};

    fn hours(h: i64) -> chrono::Duration {
        chrono::Duration::hours(h)
    }

    #[test]
    fn test_lock_predicates() {
        let now = now();
        assert!(!lock_active(None, now));
        assert!(lock_active(Some(now + hours(1)), now));
        assert!(!lock_active(Some(now), now));
        assert!(!lock_active(Some(now - hours(1)), now));

        assert!(!lock_lapsed(None, now));
        assert!(!lock_lapsed(Some(now + hours(1)), now));
        assert!(lock_lapsed(Some(now - hours(1)), now));
    }

    #[test]
    fn test_token_predicate() {
        let now = now();
        assert!(token_redeemable(None, now + hours(1), now));
        assert!(!token_redeemable(Some(now), now + hours(1), now));
        assert!(!token_redeemable(None, now - hours(1), now));
        assert!(!token_redeemable(None, now, now));
    }

    #[test]
    fn test_after_saturates() {
        let now = now();
        assert_eq!(after(now, Duration::from_secs(60)), now + chrono::Duration::seconds(60));
        assert_eq!(before(now, Duration::from_secs(60)), now - chrono::Duration::seconds(60));
        assert_eq!(
            after(DateTime::<Utc>::MAX_UTC, Duration::from_secs(1)),
            DateTime::<Utc>::MAX_UTC
        );
    }

    #[tokio::test]
    async fn test_session_condition_agrees_with_predicate() {
        let db = test_db().await;
        let now = now();
        let cases = [
            (true, now + hours(1)),
            (true, now - hours(1)),
            (false, now + hours(1)),
            (false, now - hours(1)),
        ];
        let mut rows = vec![];
        for (is_active, expires_at) in cases {
            let row = UserSession::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(user()),
                session_token: Set(Uuid::new_v4().to_string()),
                refresh_token: Set(Uuid::new_v4().to_string()),
                expires_at: Set(expires_at),
                ip_address: Set(None),
                user_agent: Set(None),
                device_info: Set(None),
                is_active: Set(is_active),
                last_used_at: Set(None),
                created_at: Set(now),
            }
            .insert(&db)
            .await
            .unwrap();
            rows.push(row);
        }

        let usable = UserSession::Entity::find()
            .filter(session_usable_condition(now))
            .all(&db)
            .await
            .unwrap();
        let expired = UserSession::Entity::find()
            .filter(session_expired_condition(now))
            .all(&db)
            .await
            .unwrap();

        for row in &rows {
            let by_query = usable.iter().any(|s| s.id == row.id);
            assert_eq!(by_query, session_usable(row, now), "{row:?}");
            let swept = expired.iter().any(|s| s.id == row.id);
            assert_eq!(swept, row.is_active && !session_usable(row, now), "{row:?}");
        }
        assert_eq!(usable.len(), 1);
        assert_eq!(expired.len(), 1);
    }

    #[tokio::test]
    async fn test_token_condition_agrees_with_predicate() {
        let db = test_db().await;
        let now = now();
        let cases = [
            (None, now + hours(1)),
            (Some(now - hours(1)), now + hours(1)),
            (None, now - hours(1)),
            (Some(now - hours(2)), now - hours(1)),
        ];
        let mut rows = vec![];
        for (used_at, expires_at) in cases {
            rows.push(
                PasswordResetToken::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user()),
                    token: Set(Uuid::new_v4().to_string()),
                    expires_at: Set(expires_at),
                    used_at: Set(used_at),
                    ip_address: Set(None),
                    user_agent: Set(None),
                    created_at: Set(now),
                }
                .insert(&db)
                .await
                .unwrap(),
            );
        }

        let redeemable = PasswordResetToken::Entity::find()
            .filter(token_redeemable_condition(
                PasswordResetToken::Column::UsedAt,
                PasswordResetToken::Column::ExpiresAt,
                now,
            ))
            .all(&db)
            .await
            .unwrap();

        for row in &rows {
            assert_eq!(
                redeemable.iter().any(|t| t.id == row.id),
                token_redeemable(row.used_at, row.expires_at, now)
            );
        }
        assert_eq!(redeemable.len(), 1);
    }
}
