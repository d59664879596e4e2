use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};

/// Immutable snapshot of a grouping's repository taken by the collector.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "submissions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub grouping_id: i64,
    /// `None` when the repository had no revision at collection time.
    pub revision_identifier: Option<String>,
    pub revision_timestamp: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
    pub is_current: bool,
    pub penalty_percent: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::grouping::Entity",
        from = "Column::GroupingId",
        to = "super::grouping::Column::Id"
    )]
    Grouping,
    #[sea_orm(has_many = "super::grace_period_deduction::Entity")]
    Deductions,
}

impl Related<super::grouping::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Grouping.def()
    }
}

impl Related<super::grace_period_deduction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Deductions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Records a new current submission for `grouping_id`.
    ///
    /// The previous current submission is demoted in the same transaction, so a
    /// grouping never has two current submissions.
    pub async fn create_by_timestamp(
        db: &DatabaseConnection,
        grouping_id: i64,
        revision: Option<(String, DateTime<Utc>)>,
        collected_at: DateTime<Utc>,
    ) -> Result<Self, DbErr> {
        let txn = db.begin().await?;

        Entity::update_many()
            .col_expr(Column::IsCurrent, Expr::value(false))
            .filter(Column::GroupingId.eq(grouping_id))
            .filter(Column::IsCurrent.eq(true))
            .exec(&txn)
            .await?;

        let (identifier, timestamp) = match revision {
            Some((id, ts)) => (Some(id), Some(ts)),
            None => (None, None),
        };

        let created = ActiveModel {
            grouping_id: Set(grouping_id),
            revision_identifier: Set(identifier),
            revision_timestamp: Set(timestamp),
            collected_at: Set(collected_at),
            is_current: Set(true),
            penalty_percent: Set(0.0),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(created)
    }

    pub async fn current_for_grouping(
        db: &DatabaseConnection,
        grouping_id: i64,
    ) -> Result<Option<Self>, DbErr> {
        Entity::find()
            .filter(Column::GroupingId.eq(grouping_id))
            .filter(Column::IsCurrent.eq(true))
            .order_by_desc(Column::Id)
            .one(db)
            .await
    }

    pub async fn set_penalty(
        db: &DatabaseConnection,
        id: i64,
        penalty_percent: f64,
    ) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::PenaltyPercent, Expr::value(penalty_percent.clamp(0.0, 100.0)))
            .filter(Column::Id.eq(id))
            .exec(db)
            .await
            .map(|_| ())
    }
}
