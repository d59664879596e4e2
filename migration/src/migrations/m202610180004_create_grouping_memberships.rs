use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m202610180004_create_grouping_memberships"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Alias::new("grouping_memberships"))
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
                    .col(ColumnDef::new(Alias::new("user_id")).big_integer().not_null())
                    .col(
                        ColumnDef::new(Alias::new("status"))
                            .enumeration(
                                Alias::new("membership_status_type"),
                                vec![
                                    Alias::new("inviter"),
                                    Alias::new("accepted"),
                                    Alias::new("pending"),
                                    Alias::new("rejected"),
                                ],
                            )
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("created_at"))
                            .timestamp()
                            .not_null()
                            .default(Expr::cust("CURRENT_TIMESTAMP")),
                    )
                    .index(
                        Index::create()
                            .name("uq_grouping_memberships_grouping_user")
                            .col(Alias::new("grouping_id"))
                            .col(Alias::new("user_id"))
                            .unique(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Alias::new("grouping_memberships"), Alias::new("grouping_id"))
                            .to(Alias::new("groupings"), Alias::new("id"))
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Alias::new("grouping_memberships"), Alias::new("user_id"))
                            .to(Alias::new("users"), Alias::new("id"))
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(Alias::new("grouping_memberships"))
                    .to_owned(),
            )
            .await
    }
}
