use sea_orm_migration::prelude::*;

use crate::migrations;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(migrations::m202610180001_create_users::Migration),
            Box::new(migrations::m202610180002_create_assignments::Migration),
            Box::new(migrations::m202610180003_create_groupings::Migration),
            Box::new(migrations::m202610180004_create_grouping_memberships::Migration),
            Box::new(migrations::m202610180005_create_tokens::Migration),
            Box::new(migrations::m202610180006_create_test_scripts::Migration),
            Box::new(migrations::m202610180007_create_submissions::Migration),
            Box::new(migrations::m202610180008_create_test_results::Migration),
            Box::new(migrations::m202610180009_create_grace_period_deductions::Migration),
        ]
    }
}
