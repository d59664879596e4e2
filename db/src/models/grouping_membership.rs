use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Membership state of a student within a grouping.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "membership_status_type")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MembershipStatus {
    /// Created the grouping.
    #[sea_orm(string_value = "inviter")]
    Inviter,

    #[sea_orm(string_value = "accepted")]
    Accepted,

    #[sea_orm(string_value = "pending")]
    Pending,

    #[sea_orm(string_value = "rejected")]
    Rejected,
}

impl MembershipStatus {
    /// Inviters and accepted invitees are full members.
    pub fn is_accepted(self) -> bool {
        matches!(self, MembershipStatus::Inviter | MembershipStatus::Accepted)
    }

    pub fn accepted_states() -> [MembershipStatus; 2] {
        [MembershipStatus::Inviter, MembershipStatus::Accepted]
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "grouping_memberships")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub grouping_id: i64,
    pub user_id: i64,
    pub status: MembershipStatus,
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
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::grouping::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Grouping.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn create(
        db: &DatabaseConnection,
        grouping_id: i64,
        user_id: i64,
        status: MembershipStatus,
    ) -> Result<Self, DbErr> {
        ActiveModel {
            grouping_id: Set(grouping_id),
            user_id: Set(user_id),
            status: Set(status),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    /// Whether `user_id` is an accepted member of `grouping_id`.
    pub async fn is_accepted_member(
        db: &DatabaseConnection,
        grouping_id: i64,
        user_id: i64,
    ) -> Result<bool, DbErr> {
        let membership = Entity::find()
            .filter(Column::GroupingId.eq(grouping_id))
            .filter(Column::UserId.eq(user_id))
            .one(db)
            .await?;

        Ok(membership.is_some_and(|m| m.status.is_accepted()))
    }

    /// Accepted memberships of a grouping, each paired with its user.
    pub async fn accepted_with_users<C: ConnectionTrait>(
        db: &C,
        grouping_id: i64,
    ) -> Result<Vec<(Self, super::user::Model)>, DbErr> {
        let rows = Entity::find()
            .filter(Column::GroupingId.eq(grouping_id))
            .filter(Column::Status.is_in(MembershipStatus::accepted_states()))
            .find_also_related(super::user::Entity)
            .all(db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(membership, user)| user.map(|u| (membership, u)))
            .collect())
    }
}
