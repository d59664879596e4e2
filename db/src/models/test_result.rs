use super::test_script::RunTrigger;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Outcome of the tests themselves.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "completion_status_type")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CompletionStatus {
    #[sea_orm(string_value = "pass")]
    Pass,

    #[sea_orm(string_value = "fail")]
    Fail,

    #[sea_orm(string_value = "error")]
    Error,
}

/// Outcome of the harness process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "run_status_type")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RunStatus {
    /// Harness exited 0.
    #[sea_orm(string_value = "success")]
    Success,

    /// Harness ran but reported failing tests.
    #[sea_orm(string_value = "failed")]
    Failed,

    /// The run never produced usable output.
    #[sea_orm(string_value = "error")]
    Error,
}

/// One persisted test run for a grouping.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "test_results")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub grouping_id: i64,
    pub test_script_id: Option<i64>,
    pub submission_id: Option<i64>,
    pub repo_revision: Option<String>,
    pub name: String,
    pub trigger: RunTrigger,
    pub completion_status: CompletionStatus,
    pub run_status: RunStatus,
    pub marks_earned: f64,
    #[sea_orm(column_type = "Text")]
    pub input_description: String,
    #[sea_orm(column_type = "Text")]
    pub expected_output: String,
    #[sea_orm(column_type = "Text")]
    pub actual_output: String,
    #[sea_orm(column_type = "Text")]
    pub raw_output: String,
    #[sea_orm(column_type = "Text")]
    pub raw_error: String,
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
        belongs_to = "super::test_script::Entity",
        from = "Column::TestScriptId",
        to = "super::test_script::Column::Id"
    )]
    TestScript,
    #[sea_orm(
        belongs_to = "super::submission::Entity",
        from = "Column::SubmissionId",
        to = "super::submission::Column::Id"
    )]
    Submission,
}

impl Related<super::grouping::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Grouping.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Everything needed to persist a test result.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTestResult {
    pub grouping_id: i64,
    pub test_script_id: Option<i64>,
    pub submission_id: Option<i64>,
    pub repo_revision: Option<String>,
    pub name: String,
    pub trigger: RunTrigger,
    pub completion_status: CompletionStatus,
    pub run_status: RunStatus,
    pub marks_earned: f64,
    pub input_description: String,
    pub expected_output: String,
    pub actual_output: String,
    pub raw_output: String,
    pub raw_error: String,
}

impl NewTestResult {
    /// A result that records a run which never got as far as parsed output.
    pub fn diagnostic(grouping_id: i64, trigger: RunTrigger, name: &str, raw_error: String) -> Self {
        Self {
            grouping_id,
            test_script_id: None,
            submission_id: None,
            repo_revision: None,
            name: name.to_string(),
            trigger,
            completion_status: CompletionStatus::Error,
            run_status: RunStatus::Error,
            marks_earned: 0.0,
            input_description: String::new(),
            expected_output: String::new(),
            actual_output: String::new(),
            raw_output: String::new(),
            raw_error,
        }
    }
}

impl Model {
    pub async fn create(db: &DatabaseConnection, new: NewTestResult) -> Result<Self, DbErr> {
        ActiveModel {
            grouping_id: Set(new.grouping_id),
            test_script_id: Set(new.test_script_id),
            submission_id: Set(new.submission_id),
            repo_revision: Set(new.repo_revision),
            name: Set(new.name),
            trigger: Set(new.trigger),
            completion_status: Set(new.completion_status),
            run_status: Set(new.run_status),
            marks_earned: Set(new.marks_earned.max(0.0)),
            input_description: Set(new.input_description),
            expected_output: Set(new.expected_output),
            actual_output: Set(new.actual_output),
            raw_output: Set(new.raw_output),
            raw_error: Set(new.raw_error),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    /// All results of a grouping, newest first.
    pub async fn get_by_grouping_id(
        db: &DatabaseConnection,
        grouping_id: i64,
    ) -> Result<Vec<Self>, DbErr> {
        Entity::find()
            .filter(Column::GroupingId.eq(grouping_id))
            .order_by_desc(Column::Id)
            .all(db)
            .await
    }
}
