pub mod admission_service;
pub mod submission_rule_service;

pub use admission_service::{Admission, AdmissionError, AdmissionService, RequestContext};
pub use submission_rule_service::{RuleEffect, RuleError, SubmissionRule};
