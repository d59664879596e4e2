use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// What caused a test run. Decides which scripts take part in it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "run_trigger_type")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RunTrigger {
    #[sea_orm(string_value = "submission")]
    Submission,

    #[sea_orm(string_value = "request")]
    Request,

    #[sea_orm(string_value = "collection")]
    Collection,
}

/// A test script owned by an assignment. Read-only to the pipeline.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "test_scripts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub assignment_id: i64,
    pub script_name: String,
    pub description: String,
    /// Run order within the assignment.
    pub seq_num: i64,
    pub run_on_submission: bool,
    pub run_on_request: bool,
    /// Tells the harness to stop running later scripts if this one fails.
    pub halts_testing: bool,
    /// Hidden from student-triggered sandboxes.
    pub is_private: bool,
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
}

impl Related<super::assignment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Assignment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Flags of a new test script.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptFlags {
    pub run_on_submission: bool,
    pub run_on_request: bool,
    pub halts_testing: bool,
    pub is_private: bool,
}

impl Model {
    pub async fn create(
        db: &DatabaseConnection,
        assignment_id: i64,
        script_name: &str,
        seq_num: i64,
        flags: ScriptFlags,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        ActiveModel {
            assignment_id: Set(assignment_id),
            script_name: Set(script_name.to_string()),
            description: Set(String::new()),
            seq_num: Set(seq_num),
            run_on_submission: Set(flags.run_on_submission),
            run_on_request: Set(flags.run_on_request),
            halts_testing: Set(flags.halts_testing),
            is_private: Set(flags.is_private),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn get_by_assignment_id(
        db: &DatabaseConnection,
        assignment_id: i64,
    ) -> Result<Vec<Self>, DbErr> {
        Entity::find()
            .filter(Column::AssignmentId.eq(assignment_id))
            .order_by_asc(Column::SeqNum)
            .order_by_asc(Column::Id)
            .all(db)
            .await
    }

    pub async fn find_by_name(
        db: &DatabaseConnection,
        assignment_id: i64,
        script_name: &str,
    ) -> Result<Option<Self>, DbErr> {
        Entity::find()
            .filter(Column::AssignmentId.eq(assignment_id))
            .filter(Column::ScriptName.eq(script_name))
            .one(db)
            .await
    }

    pub fn runs_on(&self, trigger: RunTrigger) -> bool {
        match trigger {
            RunTrigger::Collection => true,
            RunTrigger::Submission => self.run_on_submission,
            RunTrigger::Request => self.run_on_request,
        }
    }
}

/// Filters `scripts` by `trigger` and sorts them by `seq_num`.
///
/// The sort is stable, so scripts sharing a sequence number keep their input order.
pub fn select_for_trigger(scripts: Vec<Model>, trigger: RunTrigger) -> Vec<Model> {
    let mut selected: Vec<Model> = scripts.into_iter().filter(|s| s.runs_on(trigger)).collect();
    selected.sort_by_key(|s| s.seq_num);

    debug_assert!(
        selected.windows(2).all(|w| w[0].seq_num <= w[1].seq_num),
        "test scripts out of order"
    );

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(name: &str, seq_num: i64, on_submission: bool, on_request: bool) -> Model {
        Model {
            id: seq_num,
            assignment_id: 1,
            script_name: name.to_string(),
            description: String::new(),
            seq_num,
            run_on_submission: on_submission,
            run_on_request: on_request,
            halts_testing: false,
            is_private: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn names(scripts: &[Model]) -> Vec<&str> {
        scripts.iter().map(|s| s.script_name.as_str()).collect()
    }

    #[test]
    fn test_collection_runs_every_script_in_order() {
        let scripts = vec![
            script("c", 30, false, false),
            script("a", 10, true, false),
            script("b", 20, false, true),
        ];
        let selected = select_for_trigger(scripts, RunTrigger::Collection);
        assert_eq!(names(&selected), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_request_and_submission_respect_flags() {
        let scripts = vec![
            script("late", 9, true, true),
            script("sub_only", 1, true, false),
            script("req_only", 2, false, true),
        ];

        let on_request = select_for_trigger(scripts.clone(), RunTrigger::Request);
        assert_eq!(names(&on_request), vec!["req_only", "late"]);

        let on_submission = select_for_trigger(scripts, RunTrigger::Submission);
        assert_eq!(names(&on_submission), vec!["sub_only", "late"]);
    }

    #[test]
    fn test_selection_is_non_decreasing_for_many_orders() {
        let seqs = [7, -3, 12, 0, 5, 100, 42, 1];
        for rotation in 0..seqs.len() {
            let mut rotated = seqs.to_vec();
            rotated.rotate_left(rotation);
            let scripts = rotated
                .iter()
                .map(|n| script(&format!("s{n}"), *n, true, true))
                .collect();
            let selected = select_for_trigger(scripts, RunTrigger::Request);
            assert!(selected.windows(2).all(|w| w[0].seq_num <= w[1].seq_num));
            assert_eq!(selected.len(), seqs.len());
        }
    }

    #[test]
    fn test_trigger_parses() {
        assert_eq!("collection".parse::<RunTrigger>().unwrap(), RunTrigger::Collection);
        assert_eq!(RunTrigger::Request.to_string(), "request");
    }
}
