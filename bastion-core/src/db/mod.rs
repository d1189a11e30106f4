use std::time::Duration;

use anyhow::{Context, Result};
use bastion_common::helpers::fs::secure_file;
use bastion_common::BastionConfig;
use bastion_db_migrations::migrate_database;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, TransactionTrait};
use tracing::*;

/// Opens the pool and brings the schema up to date.
pub async fn connect_to_db(config: &BastionConfig) -> Result<DatabaseConnection> {
    let mut url = url::Url::parse(&config.store.database_url.expose_secret()[..])
        .context("Could not parse database_url")?;
    let mut max_connections = 100;

    if url.scheme() == "sqlite" {
        if url.path().contains(":memory:") {
            // every pooled connection would otherwise get its own empty database
            max_connections = 1;
        } else {
            let path = url.path();
            let mut abs_path = config.paths_relative_to.clone();
            abs_path.push(path);
            abs_path.push("db.sqlite3");

            if let Some(parent) = abs_path.parent() {
                std::fs::create_dir_all(parent)?
            }

            url.set_path(
                abs_path
                    .to_str()
                    .ok_or_else(|| anyhow::anyhow!("Failed to convert database path to string"))?,
            );

            url.set_query(Some("mode=rwc"));

            let db = Database::connect(ConnectOptions::new(url.to_string())).await?;
            db.begin().await?.commit().await?;
            drop(db);

            secure_file(&abs_path)?;
        }
    }

    let mut opt = ConnectOptions::new(url.to_string());
    opt.max_connections(max_connections)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(8))
        .sqlx_logging(false);

    let connection = Database::connect(opt).await?;

    migrate_database(&connection).await?;
    debug!(backend = ?connection.get_database_backend(), "Database ready");
    Ok(connection)
}
