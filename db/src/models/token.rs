//! Per-grouping daily test-run budget.
//!
//! Every mutation here is a single conditional `UPDATE`, so concurrent callers can
//! never observe the same token twice or push `remaining` below zero.

use chrono::NaiveDate;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter, Set};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "tokens")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub grouping_id: i64,
    pub remaining: i64,
    pub last_reset_date: NaiveDate,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::grouping::Entity",
        from = "Column::GroupingId",
        to = "super::grouping::Column::Id"
    )]
    Grouping,
}

impl Related<super::grouping::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Grouping.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn create(
        db: &DatabaseConnection,
        grouping_id: i64,
        remaining: i64,
        last_reset_date: NaiveDate,
    ) -> Result<Self, DbErr> {
        ActiveModel {
            grouping_id: Set(grouping_id),
            remaining: Set(remaining.max(0)),
            last_reset_date: Set(last_reset_date),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn find_for_grouping(
        db: &DatabaseConnection,
        grouping_id: i64,
    ) -> Result<Option<Self>, DbErr> {
        Entity::find()
            .filter(Column::GroupingId.eq(grouping_id))
            .one(db)
            .await
    }

    /// Refills the ledger to `per_day` if it was last reset before `today`.
    ///
    /// Returns `true` when this call performed the reset.
    pub async fn reassign_if_new_day(
        db: &DatabaseConnection,
        grouping_id: i64,
        per_day: i64,
        today: NaiveDate,
    ) -> Result<bool, DbErr> {
        let res = Entity::update_many()
            .col_expr(Column::Remaining, Expr::value(per_day.max(0)))
            .col_expr(Column::LastResetDate, Expr::value(today))
            .filter(Column::GroupingId.eq(grouping_id))
            .filter(Column::LastResetDate.lt(today))
            .exec(db)
            .await?;

        Ok(res.rows_affected == 1)
    }

    /// Atomically takes one token. Returns `false` when none were left.
    pub async fn try_consume(db: &DatabaseConnection, grouping_id: i64) -> Result<bool, DbErr> {
        let res = Entity::update_many()
            .col_expr(Column::Remaining, Expr::col(Column::Remaining).sub(1))
            .filter(Column::GroupingId.eq(grouping_id))
            .filter(Column::Remaining.gt(0))
            .exec(db)
            .await?;

        Ok(res.rows_affected == 1)
    }

    /// Gives back a token taken by [`Model::try_consume`] on `consumed_on` for a run
    /// that never started. Returns `false` when the ledger has been reset since, as the
    /// reset already restored the full allotment.
    pub async fn refund(
        db: &DatabaseConnection,
        grouping_id: i64,
        consumed_on: NaiveDate,
    ) -> Result<bool, DbErr> {
        let res = Entity::update_many()
            .col_expr(Column::Remaining, Expr::col(Column::Remaining).add(1))
            .filter(Column::GroupingId.eq(grouping_id))
            .filter(Column::LastResetDate.lte(consumed_on))
            .exec(db)
            .await?;

        Ok(res.rows_affected == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{assignment, grouping};
    use crate::test_utils::setup_test_db;
    use chrono::Utc;
    use serde_json::json;

    async fn seed_grouping(db: &DatabaseConnection) -> grouping::Model {
        let a = assignment::Model::create(db, "A1", "A1", Utc::now(), json!({"type": "no_late"}))
            .await
            .unwrap();
        grouping::Model::create(db, a.id, "g1", "g1").await.unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    #[tokio::test]
    async fn test_consume_until_exhausted() {
        let db = setup_test_db().await;
        let g = seed_grouping(&db).await;
        Model::create(&db, g.id, 2, day(18)).await.unwrap();

        assert!(Model::try_consume(&db, g.id).await.unwrap());
        assert!(Model::try_consume(&db, g.id).await.unwrap());
        assert!(!Model::try_consume(&db, g.id).await.unwrap());

        let token = Model::find_for_grouping(&db, g.id).await.unwrap().unwrap();
        assert_eq!(token.remaining, 0);

        assert!(Model::refund(&db, g.id, day(18)).await.unwrap());
        assert!(Model::try_consume(&db, g.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_refund_after_daily_reset_is_skipped() {
        let db = setup_test_db().await;
        let g = seed_grouping(&db).await;
        Model::create(&db, g.id, 3, day(17)).await.unwrap();
        assert!(Model::try_consume(&db, g.id).await.unwrap());

        assert!(Model::reassign_if_new_day(&db, g.id, 3, day(18)).await.unwrap());
        assert!(!Model::refund(&db, g.id, day(17)).await.unwrap());

        let token = Model::find_for_grouping(&db, g.id).await.unwrap().unwrap();
        assert_eq!(token.remaining, 3);
    }

    #[tokio::test]
    async fn test_reset_happens_once_per_day() {
        let db = setup_test_db().await;
        let g = seed_grouping(&db).await;
        Model::create(&db, g.id, 0, day(17)).await.unwrap();

        assert!(Model::reassign_if_new_day(&db, g.id, 5, day(18)).await.unwrap());
        assert!(Model::try_consume(&db, g.id).await.unwrap());
        assert!(!Model::reassign_if_new_day(&db, g.id, 5, day(18)).await.unwrap());

        let token = Model::find_for_grouping(&db, g.id).await.unwrap().unwrap();
        assert_eq!(token.remaining, 4);
        assert_eq!(token.last_reset_date, day(18));
    }

    #[tokio::test]
    async fn test_consume_without_ledger_is_noop() {
        let db = setup_test_db().await;
        let g = seed_grouping(&db).await;
        assert!(!Model::try_consume(&db, g.id).await.unwrap());
        assert!(Model::find_for_grouping(&db, g.id).await.unwrap().is_none());
    }
}
