use std::future::Future;
use std::time::Duration;

use bastion_common::BastionError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::{expiry, Services, SessionSweepStats, TokenSweepStats};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub locks_cleared: u64,
    pub sessions: SessionSweepStats,
    pub tokens: TokenSweepStats,
    pub events_deleted: u64,
}

/// Housekeeping jobs. None of them is needed for correctness; every read
/// path checks expiry itself.
pub struct Sweepers;

impl Sweepers {
    /// One independent periodic task per table, each on its own interval.
    pub fn spawn(services: &Services) -> Vec<JoinHandle<()>> {
        let store = &services.config.store;
        let lockout = services.lockout.clone();
        let sessions = services.sessions.clone();
        let tokens = services.tokens.clone();
        let events = services.events.clone();
        let event_retention = store.events.retention;

        vec![
            spawn_loop("lockout", store.lockout.sweep_interval, move || {
                let lockout = lockout.clone();
                async move { lockout.sweep_expired_locks().await.map(drop) }
            }),
            spawn_loop("sessions", store.sessions.sweep_interval, move || {
                let sessions = sessions.clone();
                async move { sessions.sweep_expired().await.map(drop) }
            }),
            spawn_loop("tokens", store.tokens.sweep_interval, move || {
                let tokens = tokens.clone();
                async move { tokens.sweep_expired().await.map(drop) }
            }),
            spawn_loop("events", store.events.sweep_interval, move || {
                let events = events.clone();
                async move {
                    events
                        .sweep_older_than(expiry::before(expiry::now(), event_retention))
                        .await
                        .map(drop)
                }
            }),
        ]
    }

    pub async fn run_once(services: &Services) -> Result<SweepReport, BastionError> {
        let event_retention = services.config.store.events.retention;
        Ok(SweepReport {
            locks_cleared: services.lockout.sweep_expired_locks().await?,
            sessions: services.sessions.sweep_expired().await?,
            tokens: services.tokens.sweep_expired().await?,
            events_deleted: services
                .events
                .sweep_older_than(expiry::before(expiry::now(), event_retention))
                .await?,
        })
    }
}

fn spawn_loop<F, Fut>(name: &'static str, period: Duration, mut sweep: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), BastionError>> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match sweep().await {
                Ok(()) => debug!(sweeper = name, "Sweep finished"),
                Err(error) => warn!(sweeper = name, %error, "Sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use bastion_db_entities::AccountLockout;
    use sea_orm::{ActiveModelTrait, Set};
    use uuid::Uuid;

    use super::*;
    use crate::test_support::{test_services, user};

    async fn lapsed_lock(services: &Services) -> Uuid {
        let user_id = user();
        let now = expiry::now();
        AccountLockout::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            failed_attempts: Set(5),
            last_failed_attempt: Set(Some(now - chrono::Duration::hours(2))),
            locked_until: Set(Some(now - chrono::Duration::hours(1))),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&services.db)
        .await
        .unwrap();
        user_id
    }

    #[tokio::test]
    async fn test_run_once() {
        let services = test_services().await;
        lapsed_lock(&services).await;

        let report = Sweepers::run_once(&services).await.unwrap();
        assert_eq!(report.locks_cleared, 1);
        assert_eq!(report.sessions, SessionSweepStats::default());

        assert_eq!(Sweepers::run_once(&services).await.unwrap(), SweepReport::default());
    }

    #[tokio::test]
    async fn test_spawned_sweepers_run() {
        let services = test_services().await;
        let user_id = lapsed_lock(&services).await;

        let handles = Sweepers::spawn(&services);
        assert_eq!(handles.len(), 4);

        // the first interval tick fires immediately
        let mut cleared = false;
        for _ in 0..50 {
            let state = services.lockout.lockout_state(user_id).await.unwrap().unwrap();
            if state.locked_until.is_none() {
                cleared = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(cleared);

        for handle in handles {
            handle.abort();
        }
    }
}
