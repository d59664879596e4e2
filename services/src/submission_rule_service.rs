//! Submission rules.
//!
//! An assignment stores its rule as JSON in `assignments.submission_rule`:
//!
//! ```json
//! {"type": "no_late"}
//! {"type": "grace_period", "periods": [24, 24]}
//! {"type": "penalty_period", "periods": [{"hours": 24, "deduction": 10.0}]}
//! ```
//!
//! Every rule computes when a grouping is collected and what lateness costs. Lateness
//! is measured from the timestamp of the collected revision against the due date plus
//! the grouping's extension. A period counts as soon as any part of it has started.

use chrono::{DateTime, Duration, Utc};
use db::models::{assignment, grace_period_deduction, grouping, grouping_membership, submission};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("invalid submission rule: {0}")]
    InvalidRule(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

/// Late submissions spend grace credits, one per started period per member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GracePeriodRule {
    /// Length of each grace period in hours.
    pub periods: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyPeriod {
    pub hours: i64,
    /// Percentage deducted once this period has started.
    pub deduction: f64,
}

/// Late submissions lose a percentage of their mark per started period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyPeriodRule {
    pub periods: Vec<PenaltyPeriod>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubmissionRule {
    /// Collected at the due date, nothing is ever late.
    NoLate,
    GracePeriod(GracePeriodRule),
    PenaltyPeriod(PenaltyPeriodRule),
}

/// What applying a rule did to a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleEffect {
    None,
    GraceCreditsDeducted { per_member: i64, members: usize },
    PenaltyApplied { percent: f64 },
}

/// Number of periods (by length in hours) that have started `late` after the deadline.
fn started_periods(hours: impl IntoIterator<Item = i64>, late: Duration) -> usize {
    if late <= Duration::zero() {
        return 0;
    }
    let mut elapsed = Duration::zero();
    let mut started = 0;
    for h in hours {
        if late <= elapsed {
            break;
        }
        started += 1;
        elapsed += Duration::hours(h.max(0));
    }
    started
}

fn effective_due_date(assignment: &assignment::Model, grouping: &grouping::Model) -> DateTime<Utc> {
    assignment.due_date + Duration::hours(grouping.extension_hours.max(0))
}

fn lateness(
    assignment: &assignment::Model,
    grouping: &grouping::Model,
    submission: &submission::Model,
) -> Duration {
    submission
        .revision_timestamp
        .map(|ts| ts - effective_due_date(assignment, grouping))
        .unwrap_or_else(Duration::zero)
}

impl GracePeriodRule {
    fn total_hours(&self) -> i64 {
        self.periods.iter().map(|h| (*h).max(0)).sum()
    }

    /// Refunds every grace credit previously charged for `grouping_id`.
    pub async fn remove_deductions<C: ConnectionTrait>(
        &self,
        db: &C,
        grouping_id: i64,
    ) -> Result<u64, RuleError> {
        let existing = grace_period_deduction::Model::for_grouping(db, grouping_id).await?;
        let ids = existing.iter().map(|d| d.id).collect();
        let removed = grace_period_deduction::Model::delete_many_by_id(db, ids).await?;
        if removed > 0 {
            info!(grouping_id, removed, "grace period deductions refunded");
        }
        Ok(removed)
    }

    /// Refund and new debit commit together or not at all.
    async fn apply(
        &self,
        db: &DatabaseConnection,
        assignment: &assignment::Model,
        grouping: &grouping::Model,
        submission: &submission::Model,
    ) -> Result<RuleEffect, RuleError> {
        let txn = db.begin().await?;
        let effect = self.charge(&txn, assignment, grouping, submission).await?;
        txn.commit().await?;

        if let RuleEffect::GraceCreditsDeducted { per_member, members } = effect {
            info!(
                grouping_id = grouping.id,
                submission_id = submission.id,
                per_member,
                members,
                "grace credits deducted"
            );
        }
        Ok(effect)
    }

    async fn charge<C: ConnectionTrait>(
        &self,
        db: &C,
        assignment: &assignment::Model,
        grouping: &grouping::Model,
        submission: &submission::Model,
    ) -> Result<RuleEffect, RuleError> {
        // Re-collection must not charge twice.
        self.remove_deductions(db, grouping.id).await?;

        let late = lateness(assignment, grouping, submission);
        let needed = started_periods(self.periods.iter().copied(), late) as i64;
        if needed == 0 {
            return Ok(RuleEffect::None);
        }

        let members = grouping_membership::Model::accepted_with_users(db, grouping.id).await?;
        let mut available = i64::MAX;
        for (_, user) in &members {
            let used = grace_period_deduction::Model::used_by_user(db, user.id).await?;
            available = available.min(user.grace_credits - used);
        }
        let per_member = needed.min(available.max(0));
        if per_member == 0 || members.is_empty() {
            return Ok(RuleEffect::None);
        }

        for (membership, _) in &members {
            grace_period_deduction::Model::create(db, submission.id, membership.id, per_member)
                .await?;
        }

        Ok(RuleEffect::GraceCreditsDeducted {
            per_member,
            members: members.len(),
        })
    }
}

impl PenaltyPeriodRule {
    fn total_hours(&self) -> i64 {
        self.periods.iter().map(|p| p.hours.max(0)).sum()
    }

    fn penalty_for(&self, late: Duration) -> f64 {
        let started = started_periods(self.periods.iter().map(|p| p.hours), late);
        self.periods.iter().take(started).map(|p| p.deduction).sum()
    }

    async fn apply(
        &self,
        db: &DatabaseConnection,
        assignment: &assignment::Model,
        grouping: &grouping::Model,
        submission: &submission::Model,
    ) -> Result<RuleEffect, RuleError> {
        let percent = self.penalty_for(lateness(assignment, grouping, submission));
        if percent <= 0.0 {
            return Ok(RuleEffect::None);
        }
        submission::Model::set_penalty(db, submission.id, percent).await?;
        info!(grouping_id = grouping.id, submission_id = submission.id, percent, "late penalty applied");
        Ok(RuleEffect::PenaltyApplied { percent })
    }
}

impl SubmissionRule {
    pub fn from_assignment(assignment: &assignment::Model) -> Result<Self, RuleError> {
        Ok(serde_json::from_value(assignment.submission_rule.clone())?)
    }

    /// When `grouping` is collected: due date, plus every allowed period, plus the
    /// grouping's extension.
    pub fn calculate_collection_time(
        &self,
        assignment: &assignment::Model,
        grouping: &grouping::Model,
    ) -> DateTime<Utc> {
        let period_hours = match self {
            SubmissionRule::NoLate => 0,
            SubmissionRule::GracePeriod(rule) => rule.total_hours(),
            SubmissionRule::PenaltyPeriod(rule) => rule.total_hours(),
        };
        effective_due_date(assignment, grouping) + Duration::hours(period_hours)
    }

    pub async fn apply_submission_rule(
        &self,
        db: &DatabaseConnection,
        assignment: &assignment::Model,
        grouping: &grouping::Model,
        submission: &submission::Model,
    ) -> Result<RuleEffect, RuleError> {
        match self {
            SubmissionRule::NoLate => Ok(RuleEffect::None),
            SubmissionRule::GracePeriod(rule) => rule.apply(db, assignment, grouping, submission).await,
            SubmissionRule::PenaltyPeriod(rule) => rule.apply(db, assignment, grouping, submission).await,
        }
    }

    /// Only grace-period rules keep deductions that can be refunded.
    pub fn grace_period(&self) -> Option<&GracePeriodRule> {
        match self {
            SubmissionRule::GracePeriod(rule) => Some(rule),
            _ => None,
        }
    }
}
