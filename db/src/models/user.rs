use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelTrait, DbErr, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// System-wide role of a user.
///
/// Administrators and graders are privileged: they may trigger test runs for any
/// grouping without spending tokens. Students are bound by grouping membership
/// and the daily token budget.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "user_role_type")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum UserRole {
    #[sea_orm(string_value = "admin")]
    Admin,

    #[sea_orm(string_value = "grader")]
    Grader,

    #[sea_orm(string_value = "student")]
    Student,
}

impl UserRole {
    pub fn is_privileged(self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Grader)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub username: String,
    pub role: UserRole,
    /// Total grace credits granted to this user for the term.
    pub grace_credits: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::grouping_membership::Entity")]
    Memberships,
}

impl Related<super::grouping_membership::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Memberships.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn create(
        db: &DatabaseConnection,
        username: &str,
        role: UserRole,
        grace_credits: i64,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        ActiveModel {
            username: Set(username.to_string()),
            role: Set(role),
            grace_credits: Set(grace_credits),
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
}
