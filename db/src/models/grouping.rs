use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use sea_orm::sea_query::Expr;

/// A set of collaborating students submitting as one unit for an assignment.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "groupings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub assignment_id: i64,
    pub group_name: String,
    /// Name of the group's repository under the repositories root.
    pub repo_name: String,
    pub is_collected: bool,
    pub error_collecting: bool,
    /// Extra hours granted to this grouping on top of the rule's collection time.
    pub extension_hours: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::assignment::Entity",
        from = "Column::AssignmentId",
        to = "super::assignment::Column::Id"
    )]
    Assignment,
    #[sea_orm(has_many = "super::grouping_membership::Entity")]
    Memberships,
    #[sea_orm(has_one = "super::token::Entity")]
    Token,
    #[sea_orm(has_many = "super::submission::Entity")]
    Submissions,
}

impl Related<super::assignment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Assignment.def()
    }
}

impl Related<super::grouping_membership::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Memberships.def()
    }
}

impl Related<super::token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Token.def()
    }
}

impl Related<super::submission::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Submissions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn create(
        db: &DatabaseConnection,
        assignment_id: i64,
        group_name: &str,
        repo_name: &str,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        ActiveModel {
            assignment_id: Set(assignment_id),
            group_name: Set(group_name.to_string()),
            repo_name: Set(repo_name.to_string()),
            is_collected: Set(false),
            error_collecting: Set(false),
            extension_hours: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn get_by_id(db: &DatabaseConnection, id: i64) -> Result<Option<Self>, DbErr> {
        Entity::find_by_id(id).one(db).await
    }

    /// Loads a grouping together with its assignment.
    pub async fn find_with_assignment(
        db: &DatabaseConnection,
        id: i64,
    ) -> Result<Option<(Self, super::assignment::Model)>, DbErr> {
        let found = Entity::find_by_id(id)
            .find_also_related(super::assignment::Entity)
            .one(db)
            .await?;

        Ok(found.and_then(|(grouping, assignment)| assignment.map(|a| (grouping, a))))
    }

    /// Next page of groupings that have not been collected yet, ordered by id.
    pub async fn uncollected_after(
        db: &DatabaseConnection,
        after_id: i64,
        limit: u64,
    ) -> Result<Vec<Self>, DbErr> {
        Entity::find()
            .filter(Column::IsCollected.eq(false))
            .filter(Column::Id.gt(after_id))
            .order_by_asc(Column::Id)
            .limit(limit)
            .all(db)
            .await
    }

    pub async fn set_error_collecting(
        db: &DatabaseConnection,
        id: i64,
        error_collecting: bool,
    ) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::ErrorCollecting, Expr::value(error_collecting))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .exec(db)
            .await
            .map(|_| ())
    }

    /// Sets `is_collected` from the current `error_collecting` flag in a single
    /// statement and returns the refreshed row.
    pub async fn finish_collection(db: &DatabaseConnection, id: i64) -> Result<Self, DbErr> {
        Entity::update_many()
            .col_expr(Column::IsCollected, Expr::col(Column::ErrorCollecting).not())
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .exec(db)
            .await?;

        Self::get_by_id(db, id)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound("Grouping not found".into()))
    }

    pub async fn set_extension_hours(
        db: &DatabaseConnection,
        id: i64,
        hours: i64,
    ) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::ExtensionHours, Expr::value(hours.max(0)))
            .filter(Column::Id.eq(id))
            .exec(db)
            .await
            .map(|_| ())
    }
}
