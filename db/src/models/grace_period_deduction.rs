use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, JoinType, QueryFilter, QuerySelect, Set};

/// Grace credits charged to one member for one late submission.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "grace_period_deductions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub submission_id: i64,
    pub membership_id: i64,
    pub deduction: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::submission::Entity",
        from = "Column::SubmissionId",
        to = "super::submission::Column::Id"
    )]
    Submission,
    #[sea_orm(
        belongs_to = "super::grouping_membership::Entity",
        from = "Column::MembershipId",
        to = "super::grouping_membership::Column::Id"
    )]
    Membership,
}

impl Related<super::submission::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Submission.def()
    }
}

impl Related<super::grouping_membership::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Membership.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn create<C: ConnectionTrait>(
        db: &C,
        submission_id: i64,
        membership_id: i64,
        deduction: i64,
    ) -> Result<Self, DbErr> {
        ActiveModel {
            submission_id: Set(submission_id),
            membership_id: Set(membership_id),
            deduction: Set(deduction),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    /// Deductions attached to any submission of `grouping_id`.
    pub async fn for_grouping<C: ConnectionTrait>(
        db: &C,
        grouping_id: i64,
    ) -> Result<Vec<Self>, DbErr> {
        Entity::find()
            .join(JoinType::InnerJoin, Relation::Submission.def())
            .filter(super::submission::Column::GroupingId.eq(grouping_id))
            .all(db)
            .await
    }

    /// Credits already spent by `user_id` across all of their memberships.
    pub async fn used_by_user<C: ConnectionTrait>(db: &C, user_id: i64) -> Result<i64, DbErr> {
        let rows = Entity::find()
            .join(JoinType::InnerJoin, Relation::Membership.def())
            .filter(super::grouping_membership::Column::UserId.eq(user_id))
            .all(db)
            .await?;

        Ok(rows.iter().map(|d| d.deduction).sum())
    }

    /// Deletes the given deductions and returns how many were removed.
    pub async fn delete_many_by_id<C: ConnectionTrait>(db: &C, ids: Vec<i64>) -> Result<u64, DbErr> {
        if ids.is_empty() {
            return Ok(0);
        }
        let res = Entity::delete_many()
            .filter(Column::Id.is_in(ids))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }
}
