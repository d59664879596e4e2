pub mod assignment;
pub mod grace_period_deduction;
pub mod grouping;
pub mod grouping_membership;
pub mod submission;
pub mod test_result;
pub mod test_script;
pub mod token;
pub mod user;

pub use assignment::Entity as Assignment;
pub use grace_period_deduction::Entity as GracePeriodDeduction;
pub use grouping::Entity as Grouping;
pub use grouping_membership::Entity as GroupingMembership;
pub use submission::Entity as Submission;
pub use test_result::Entity as TestResult;
pub use test_script::Entity as TestScript;
pub use token::Entity as Token;
pub use user::Entity as User;
