pub use sea_orm_migration::prelude::*;

mod m20260101_000000_create_registration_tables;
mod m20260101_000001_create_notifications;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260101_000000_create_registration_tables::Migration),
            Box::new(m20260101_000001_create_notifications::Migration),
        ]
    }
}
