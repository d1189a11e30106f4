use std::sync::Arc;

use anyhow::Result;
use bastion_common::BastionConfig;
use sea_orm::DatabaseConnection;

use crate::db::connect_to_db;
use crate::{
    LockoutPolicy, SecurityEventLogger, SessionManager, TokenService, TwoFactorManager,
};

/// Every component wired to one shared connection pool.
#[derive(Clone)]
pub struct Services {
    pub db: DatabaseConnection,
    pub config: Arc<BastionConfig>,
    pub lockout: Arc<LockoutPolicy>,
    pub sessions: Arc<SessionManager>,
    pub two_factor: Arc<TwoFactorManager>,
    pub tokens: Arc<TokenService>,
    pub events: Arc<SecurityEventLogger>,
}

impl Services {
    pub async fn new(config: BastionConfig) -> Result<Self> {
        let db = connect_to_db(&config).await?;
        Ok(Self::with_db(config, db))
    }

    pub fn with_db(config: BastionConfig, db: DatabaseConnection) -> Self {
        let store = &config.store;
        Self {
            lockout: Arc::new(LockoutPolicy::new(store.lockout.clone(), db.clone())),
            sessions: Arc::new(SessionManager::new(store.sessions.clone(), db.clone())),
            two_factor: Arc::new(TwoFactorManager::new(store.two_factor.clone(), db.clone())),
            tokens: Arc::new(TokenService::new(store.tokens.clone(), db.clone())),
            events: Arc::new(SecurityEventLogger::new(db.clone())),
            config: Arc::new(config),
            db,
        }
    }
}
