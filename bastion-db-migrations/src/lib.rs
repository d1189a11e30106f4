use sea_orm::DatabaseConnection;
use sea_orm_migration::prelude::*;
use sea_orm_migration::MigrationTrait;

mod m00001_account_lockouts;
mod m00002_user_sessions;
mod m00003_user_2fa;
mod m00004_verification_tokens;
mod m00005_security_events;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m00001_account_lockouts::Migration),
            Box::new(m00002_user_sessions::Migration),
            Box::new(m00003_user_2fa::Migration),
            Box::new(m00004_verification_tokens::Migration),
            Box::new(m00005_security_events::Migration),
        ]
    }
}

pub async fn migrate_database(connection: &DatabaseConnection) -> Result<(), DbErr> {
    Migrator::up(connection, None).await
}
