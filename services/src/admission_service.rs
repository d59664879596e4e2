//! Admission control for test runs.
//!
//! Staff (administrators and graders) are always admitted without spending tokens.
//! Students must be accepted members of the grouping and, unless the assignment grants
//! unlimited tokens, spend one token from the grouping's daily ledger. Taking the
//! token is the same conditional `UPDATE` that decides admission, so two concurrent
//! requests can never both win the last token.

use chrono::{DateTime, NaiveDate, Utc};
use db::models::user::UserRole;
use db::models::{grouping, grouping_membership, token};
use sea_orm::{DatabaseConnection, DbErr};
use tracing::{debug, info};

/// The caller of a pipeline operation, passed explicitly instead of held globally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: i64,
    pub role: UserRole,
    /// Drives the lazy daily token reset.
    pub requested_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(user_id: i64, role: UserRole) -> Self {
        Self::at(user_id, role, Utc::now())
    }

    pub fn at(user_id: i64, role: UserRole, requested_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            role,
            requested_at,
        }
    }
}

/// How a request got admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Staff request, no token involved.
    Privileged,
    /// The assignment grants unlimited tokens.
    Unlimited,
    /// One token was taken from the grouping's ledger on the given day.
    TokenConsumed { on: NaiveDate },
}

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("user {user_id} is not an accepted member of grouping {grouping_id}")]
    PermissionDenied { user_id: i64, grouping_id: i64 },

    #[error("grouping {0} has no test tokens left today")]
    TokensExhausted(i64),

    #[error("grouping {0} has no token ledger")]
    MissingTokenLedger(i64),

    #[error("testing is disabled for assignment {0}")]
    TestingDisabled(String),

    #[error("a test run for grouping {0} is already in progress")]
    RunInProgress(i64),

    #[error("grouping {0} not found")]
    NotFound(i64),

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

pub struct AdmissionService;

impl AdmissionService {
    /// Decides whether `ctx` may start a test run for `grouping_id`, consuming a token
    /// when the rules require one.
    pub async fn admit(
        db: &DatabaseConnection,
        ctx: &RequestContext,
        grouping_id: i64,
    ) -> Result<Admission, AdmissionError> {
        let (_, assignment) = grouping::Model::find_with_assignment(db, grouping_id)
            .await?
            .ok_or(AdmissionError::NotFound(grouping_id))?;

        if !assignment.enable_test {
            return Err(AdmissionError::TestingDisabled(assignment.short_identifier));
        }

        if ctx.role.is_privileged() {
            debug!(grouping_id, user_id = ctx.user_id, role = %ctx.role, "privileged test run admitted");
            return Ok(Admission::Privileged);
        }

        if !grouping_membership::Model::is_accepted_member(db, grouping_id, ctx.user_id).await? {
            return Err(AdmissionError::PermissionDenied {
                user_id: ctx.user_id,
                grouping_id,
            });
        }

        if assignment.unlimited_tokens {
            return Ok(Admission::Unlimited);
        }

        if token::Model::find_for_grouping(db, grouping_id).await?.is_none() {
            return Err(AdmissionError::MissingTokenLedger(grouping_id));
        }

        let today = ctx.requested_at.date_naive();
        if token::Model::reassign_if_new_day(db, grouping_id, assignment.tokens_per_day, today).await? {
            info!(grouping_id, tokens = assignment.tokens_per_day, %today, "token ledger reset");
        }

        if token::Model::try_consume(db, grouping_id).await? {
            debug!(grouping_id, user_id = ctx.user_id, "token consumed");
            Ok(Admission::TokenConsumed { on: today })
        } else {
            Err(AdmissionError::TokensExhausted(grouping_id))
        }
    }

    /// Returns the token of an admission whose run never got queued.
    pub async fn release(
        db: &DatabaseConnection,
        grouping_id: i64,
        admission: Admission,
    ) -> Result<(), AdmissionError> {
        if let Admission::TokenConsumed { on } = admission {
            if !token::Model::refund(db, grouping_id, on).await? {
                debug!(grouping_id, consumed_on = %on, "ledger reset since admission, nothing to refund");
            }
        }
        Ok(())
    }
}
