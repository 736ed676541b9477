//! Creates the sessions table and its expiry-sweep index.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CiSessions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CiSessions::SessionId)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CiSessions::UserData).binary().not_null())
                    .col(
                        ColumnDef::new(CiSessions::UserAgent)
                            .string_len(120)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CiSessions::IpAddress)
                            .string_len(45)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CiSessions::LastActivity)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // the garbage collector bulk-deletes on last_activity
        manager
            .create_index(
                Index::create()
                    .name("idx_ci_sessions_last_activity")
                    .table(CiSessions::Table)
                    .col(CiSessions::LastActivity)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CiSessions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CiSessions {
    Table,
    SessionId,
    UserData,
    UserAgent,
    IpAddress,
    LastActivity,
}
