use bastion_common::{BastionConfig, BastionConfigStore, Secret};
use sea_orm::DatabaseConnection;
use uuid::Uuid;

use crate::db::connect_to_db;
use crate::Services;

pub(crate) fn test_config() -> BastionConfigStore {
    BastionConfigStore {
        database_url: Secret::new("sqlite::memory:".to_owned()),
        ..Default::default()
    }
}

/// Fresh, fully migrated in-memory database.
pub(crate) async fn test_db() -> DatabaseConnection {
    connect_to_db(&BastionConfig::from_store(test_config()))
        .await
        .unwrap()
}

pub(crate) fn user() -> Uuid {
    Uuid::new_v4()
}

pub(crate) async fn test_services() -> Services {
    Services::with_db(BastionConfig::from_store(test_config()), test_db().await)
}
