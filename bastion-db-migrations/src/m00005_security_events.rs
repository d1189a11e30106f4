use sea_orm::Schema;
use sea_orm_migration::prelude::*;

pub mod security_event {
    use chrono::{DateTime, Utc};
    use sea_orm::entity::prelude::*;
    use uuid::Uuid;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "security_events")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub user_id: Option<Uuid>,
        pub event_type: String,
        #[sea_orm(column_type = "Text", nullable)]
        pub description: Option<String>,
        pub ip_address: Option<String>,
        pub user_agent: Option<String>,
        pub metadata: Option<serde_json::Value>,
        pub created_at: DateTime<Utc>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m00005_security_events"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let builder = manager.get_database_backend();
        let schema = Schema::new(builder);

        manager
            .create_table(schema.create_table_from_entity(security_event::Entity))
            .await?;

        // Newest-first listings per user and per type, plus the retention sweep
        manager
            .create_index(
                Index::create()
                    .table(security_event::Entity)
                    .name("idx_security_events_user_id_created_at")
                    .col(Alias::new("user_id"))
                    .col(Alias::new("created_at"))
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .table(security_event::Entity)
                    .name("idx_security_events_event_type_created_at")
                    .col(Alias::new("event_type"))
                    .col(Alias::new("created_at"))
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .table(security_event::Entity)
                    .name("idx_security_events_created_at")
                    .col(Alias::new("created_at"))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_security_events_created_at",
            "idx_security_events_event_type_created_at",
            "idx_security_events_user_id_created_at",
        ] {
            manager
                .drop_index(
                    Index::drop()
                        .table(security_event::Entity)
                        .name(name)
                        .to_owned(),
                )
                .await?;
        }
        manager
            .drop_table(Table::drop().table(security_event::Entity).to_owned())
            .await?;
        Ok(())
    }
}
