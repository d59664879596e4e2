pub mod m202610180001_create_users;
pub mod m202610180002_create_assignments;
pub mod m202610180003_create_groupings;
pub mod m202610180004_create_grouping_memberships;
pub mod m202610180005_create_tokens;
pub mod m202610180006_create_test_scripts;
pub mod m202610180007_create_submissions;
pub mod m202610180008_create_test_results;
pub mod m202610180009_create_grace_period_deductions;
