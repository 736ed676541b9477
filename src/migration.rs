//! Schema migration for the default `ci_sessions` table. Deployments that
//! configure a different table name provision their schema themselves.

pub use sea_orm_migration::prelude::*;

mod m20240101_000001_create_sessions_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    // Override the name of migration table to avoid conflicts
    fn migration_table_name() -> sea_orm::DynIden {
        Alias::new("hybrid_session_store_migrations").into_iden()
    }

    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(
            m20240101_000001_create_sessions_table::Migration,
        )]
    }
}
