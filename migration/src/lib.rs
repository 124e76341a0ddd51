pub use sea_orm_migration::prelude::*;

mod m20250301_000001_users_projects;
mod m20250301_000002_tasks_activity;
mod m20250301_000003_notifications;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_users_projects::Migration),
            Box::new(m20250301_000002_tasks_activity::Migration),
            Box::new(m20250301_000003_notifications::Migration),
        ]
    }
}
