use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m202610180008_create_test_results"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Alias::new("test_results"))
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alias::new("id"))
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("grouping_id"))
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Alias::new("test_script_id")).big_integer().null())
                    .col(ColumnDef::new(Alias::new("submission_id")).big_integer().null())
                    .col(ColumnDef::new(Alias::new("repo_revision")).string().null())
                    .col(ColumnDef::new(Alias::new("name")).string().not_null())
                    .col(
                        ColumnDef::new(Alias::new("trigger"))
                            .enumeration(
                                Alias::new("run_trigger_type"),
                                vec![
                                    Alias::new("submission"),
                                    Alias::new("request"),
                                    Alias::new("collection"),
                                ],
                            )
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("completion_status"))
                            .enumeration(
                                Alias::new("completion_status_type"),
                                vec![Alias::new("pass"), Alias::new("fail"), Alias::new("error")],
                            )
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("run_status"))
                            .enumeration(
                                Alias::new("run_status_type"),
                                vec![
                                    Alias::new("success"),
                                    Alias::new("failed"),
                                    Alias::new("error"),
                                ],
                            )
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("marks_earned"))
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(Alias::new("input_description"))
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Alias::new("expected_output"))
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Alias::new("actual_output"))
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Alias::new("raw_output"))
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Alias::new("raw_error"))
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Alias::new("created_at"))
                            .timestamp()
                            .not_null()
                            .default(Expr::cust("CURRENT_TIMESTAMP")),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Alias::new("test_results"), Alias::new("grouping_id"))
                            .to(Alias::new("groupings"), Alias::new("id"))
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Alias::new("test_results"), Alias::new("test_script_id"))
                            .to(Alias::new("test_scripts"), Alias::new("id"))
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Alias::new("test_results"), Alias::new("submission_id"))
                            .to(Alias::new("submissions"), Alias::new("id"))
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Alias::new("test_results")).to_owned())
            .await
    }
}
