use sea_orm::Schema;
use sea_orm_migration::prelude::*;

pub mod email_verification_token {
    use chrono::{DateTime, Utc};
    use sea_orm::entity::prelude::*;
    use uuid::Uuid;

    #[derive(Debug, PartialEq, Eq, Clone, Copy, EnumIter, DeriveActiveEnum)]
    #[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
    pub enum EmailVerificationPurpose {
        #[sea_orm(string_value = "registration")]
        Registration,
        #[sea_orm(string_value = "email_change")]
        EmailChange,
    }

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "email_verification_tokens")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub user_id: Uuid,
        #[sea_orm(unique)]
        pub token: String,
        pub email: String,
        pub purpose: EmailVerificationPurpose,
        pub expires_at: DateTime<Utc>,
        pub used_at: Option<DateTime<Utc>>,
        pub ip_address: Option<String>,
        pub user_agent: Option<String>,
        pub created_at: DateTime<Utc>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod password_reset_token {
    use chrono::{DateTime, Utc};
    use sea_orm::entity::prelude::*;
    use uuid::Uuid;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "password_reset_tokens")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub user_id: Uuid,
        #[sea_orm(unique)]
        pub token: String,
        pub expires_at: DateTime<Utc>,
        pub used_at: Option<DateTime<Utc>>,
        pub ip_address: Option<String>,
        pub user_agent: Option<String>,
        pub created_at: DateTime<Utc>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m00004_verification_tokens"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let builder = manager.get_database_backend();
        let schema = Schema::new(builder);

        manager
            .create_table(schema.create_table_from_entity(email_verification_token::Entity))
            .await?;
        manager
            .create_index(
                Index::create()
                    .table(email_verification_token::Entity)
                    .name("idx_email_verification_tokens_user_id")
                    .col(Alias::new("user_id"))
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .table(email_verification_token::Entity)
                    .name("idx_email_verification_tokens_expires_at")
                    .col(Alias::new("expires_at"))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(schema.create_table_from_entity(password_reset_token::Entity))
            .await?;
        manager
            .create_index(
                Index::create()
                    .table(password_reset_token::Entity)
                    .name("idx_password_reset_tokens_user_id")
                    .col(Alias::new("user_id"))
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .table(password_reset_token::Entity)
                    .name("idx_password_reset_tokens_expires_at")
                    .col(Alias::new("expires_at"))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_password_reset_tokens_expires_at",
            "idx_password_reset_tokens_user_id",
        ] {
            manager
                .drop_index(
                    Index::drop()
                        .table(password_reset_token::Entity)
                        .name(name)
                        .to_owned(),
                )
                .await?;
        }
        manager
            .drop_table(Table::drop().table(password_reset_token::Entity).to_owned())
            .await?;

        for name in [
            "idx_email_verification_tokens_expires_at",
            "idx_email_verification_tokens_user_id",
        ] {
            manager
                .drop_index(
                    Index::drop()
                        .table(email_verification_token::Entity)
                        .name(name)
                        .to_owned(),
                )
                .await?;
        }
        manager
            .drop_table(
                Table::drop()
                    .table(email_verification_token::Entity)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}
