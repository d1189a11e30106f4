use sea_orm::Schema;
use sea_orm_migration::prelude::*;

pub mod user_session {
    use chrono::{DateTime, Utc};
    use sea_orm::entity::prelude::*;
    use uuid::Uuid;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "user_sessions")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub user_id: Uuid,
        #[sea_orm(unique)]
        pub session_token: String,
        #[sea_orm(unique)]
        pub refresh_token: String,
        pub expires_at: DateTime<Utc>,
        pub ip_address: Option<String>,
        pub user_agent: Option<String>,
        pub device_info: Option<serde_json::Value>,
        pub is_active: bool,
        pub last_used_at: Option<DateTime<Utc>>,
        pub created_at: DateTime<Utc>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m00002_user_sessions"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let builder = manager.get_database_backend();
        let schema = Schema::new(builder);

        manager
            .create_table(schema.create_table_from_entity(user_session::Entity))
            .await?;

        // "sign out everywhere" and the per-user device list
        manager
            .create_index(
                Index::create()
                    .table(user_session::Entity)
                    .name("idx_user_sessions_user_id")
                    .col(Alias::new("user_id"))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(user_session::Entity)
                    .name("idx_user_sessions_expires_at")
                    .col(Alias::new("expires_at"))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in ["idx_user_sessions_expires_at", "idx_user_sessions_user_id"] {
            manager
                .drop_index(
                    Index::drop()
                        .table(user_session::Entity)
                        .name(name)
                        .to_owned(),
                )
                .await?;
        }
        manager
            .drop_table(Table::drop().table(user_session::Entity).to_owned())
            .await?;
        Ok(())
    }
}
