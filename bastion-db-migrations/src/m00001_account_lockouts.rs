use sea_orm::Schema;
use sea_orm_migration::prelude::*;

pub mod account_lockout {
    use chrono::{DateTime, Utc};
    use sea_orm::entity::prelude::*;
    use uuid::Uuid;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "account_lockouts")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        #[sea_orm(unique)]
        pub user_id: Uuid,
        pub failed_attempts: i32,
        pub last_failed_attempt: Option<DateTime<Utc>>,
        pub locked_until: Option<DateTime<Utc>>,
        pub created_at: DateTime<Utc>,
        pub updated_at: DateTime<Utc>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m00001_account_lockouts"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let builder = manager.get_database_backend();
        let schema = Schema::new(builder);

        manager
            .create_table(schema.create_table_from_entity(account_lockout::Entity))
            .await?;

        // Sweeper: "locks that have lapsed"
        manager
            .create_index(
                Index::create()
                    .table(account_lockout::Entity)
                    .name("idx_account_lockouts_locked_until")
                    .col(Alias::new("locked_until"))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .table(account_lockout::Entity)
                    .name("idx_account_lockouts_locked_until")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(account_lockout::Entity).to_owned())
            .await?;
        Ok(())
    }
}
