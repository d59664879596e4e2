use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelTrait, DbErr, EntityTrait, IntoActiveModel, Set};

/// Assignment configuration as seen by the test pipeline.
///
/// `submission_rule` holds the serialized rule variant; it is interpreted by
/// `services::submission_rule`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "assignments")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub short_identifier: String,
    /// Folder inside each group repository that holds this assignment's code.
    pub repository_folder: String,
    pub due_date: DateTime<Utc>,
    pub enable_test: bool,
    pub unlimited_tokens: bool,
    pub tokens_per_day: i64,
    pub submission_rule: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::grouping::Entity")]
    Groupings,
    #[sea_orm(has_many = "super::test_script::Entity")]
    TestScripts,
}

impl Related<super::grouping::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Groupings.def()
    }
}

impl Related<super::test_script::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TestScripts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Creates an assignment with testing enabled and a zero token budget.
    pub async fn create(
        db: &DatabaseConnection,
        short_identifier: &str,
        repository_folder: &str,
        due_date: DateTime<Utc>,
        submission_rule: Json,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        ActiveModel {
            short_identifier: Set(short_identifier.to_string()),
            repository_folder: Set(repository_folder.to_string()),
            due_date: Set(due_date),
            enable_test: Set(true),
            unlimited_tokens: Set(false),
            tokens_per_day: Set(0),
            submission_rule: Set(submission_rule),
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

    /// Updates the testing switches of an assignment.
    pub async fn configure_testing(
        db: &DatabaseConnection,
        id: i64,
        enable_test: bool,
        unlimited_tokens: bool,
        tokens_per_day: i64,
    ) -> Result<Self, DbErr> {
        let Some(assignment) = Self::get_by_id(db, id).await? else {
            return Err(DbErr::RecordNotFound("Assignment not found".into()));
        };

        let mut active = assignment.into_active_model();
        active.enable_test = Set(enable_test);
        active.unlimited_tokens = Set(unlimited_tokens);
        active.tokens_per_day = Set(tokens_per_day.max(0));
        active.updated_at = Set(Utc::now());
        active.update(db).await
    }
}
