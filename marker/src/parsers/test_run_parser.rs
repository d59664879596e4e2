//! Test Run Parser
//!
//! This module provides the [`JsonTestRunParser`] for parsing the harness report into
//! a [`ParsedTestRun`].
//!
//! # JSON Schema
//!
//! ```json
//! {
//!   "version": 1,
//!   "testrun": {
//!     "test_script": [
//!       {
//!         "script_name": "<name>",
//!         "marks_earned": <number, optional script-level override>,
//!         "test": [
//!           {
//!             "name": "<case name>",
//!             "status": "pass" | "fail" | "error",
//!             "input": "<string, optional>",
//!             "expected": "<string, optional>",
//!             "actual": "<string, optional>",
//!             "marks_earned": <number, optional, default 0>
//!           }
//!         ]
//!       }
//!     ]
//!   }
//! }
//! ```
//!
//! - `version` is optional and defaults to `1`.
//! - `test_script` and `test` may each be a single object instead of a list; both are
//!   normalized to lists.
//! - Marks must be non-negative JSON numbers. Strings such as `"2"` are rejected.
//!
//! # Error Handling
//!
//! Every schema violation is reported as [`MarkerError::MalformedOutput`].

use crate::error::MarkerError;
use crate::traits::parser::Parser;
use crate::types::{CaseResult, CaseStatus, ParsedTestRun, ScriptResult};
use serde::Deserialize;
use tracing::debug;

pub const SCHEMA_VERSION: u32 = 1;

fn default_version() -> u32 {
    SCHEMA_VERSION
}

/// A value the harness may send either bare or wrapped in a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(v) => v,
            OneOrMany::One(t) => vec![t],
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default = "default_version")]
    version: u32,
    testrun: Option<TestRunDoc>,
}

#[derive(Debug, Deserialize)]
struct TestRunDoc {
    test_script: Option<OneOrMany<ScriptDoc>>,
}

#[derive(Debug, Deserialize)]
struct ScriptDoc {
    script_name: String,
    #[serde(default)]
    marks_earned: Option<f64>,
    #[serde(default)]
    test: Option<OneOrMany<CaseDoc>>,
}

#[derive(Debug, Deserialize)]
struct CaseDoc {
    name: String,
    status: CaseStatus,
    #[serde(default)]
    input: String,
    #[serde(default)]
    expected: String,
    #[serde(default)]
    actual: String,
    #[serde(default)]
    marks_earned: f64,
}

fn malformed(msg: impl Into<String>) -> MarkerError {
    MarkerError::MalformedOutput(msg.into())
}

fn check_marks(marks: f64, what: &str) -> Result<f64, MarkerError> {
    if marks.is_finite() && marks >= 0.0 {
        Ok(marks)
    } else {
        Err(malformed(format!("{what} has invalid marks_earned {marks}")))
    }
}

/// Parser for the harness's JSON report.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonTestRunParser;

impl<'a> Parser<&'a str, ParsedTestRun> for JsonTestRunParser {
    fn parse(&self, raw: &'a str) -> Result<ParsedTestRun, MarkerError> {
        let envelope: Envelope =
            serde_json::from_str(raw.trim()).map_err(|e| malformed(e.to_string()))?;

        if envelope.version != SCHEMA_VERSION {
            return Err(MarkerError::UnsupportedVersion(envelope.version));
        }

        let testrun = envelope
            .testrun
            .ok_or_else(|| malformed("missing 'testrun'"))?;
        let scripts = testrun
            .test_script
            .map(OneOrMany::into_vec)
            .unwrap_or_default();
        if scripts.is_empty() {
            return Err(malformed("'testrun' contains no test_script entries"));
        }

        let scripts = scripts
            .into_iter()
            .map(convert_script)
            .collect::<Result<Vec<_>, _>>()?;

        let run = ParsedTestRun::from_scripts(scripts);
        debug!(
            scripts = run.scripts.len(),
            cases = run.case_count(),
            marks = run.marks_earned,
            "harness report parsed"
        );
        Ok(run)
    }
}

fn convert_script(doc: ScriptDoc) -> Result<ScriptResult, MarkerError> {
    let cases = doc
        .test
        .map(OneOrMany::into_vec)
        .unwrap_or_default()
        .into_iter()
        .map(|c| -> Result<CaseResult, MarkerError> {
            let what = format!("test '{}' of script '{}'", c.name, doc.script_name);
            Ok(CaseResult {
                marks_earned: check_marks(c.marks_earned, &what)?,
                name: c.name,
                status: c.status,
                input: c.input,
                expected: c.expected,
                actual: c.actual,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let marks_earned = match doc.marks_earned {
        Some(m) => check_marks(m, &format!("script '{}'", doc.script_name))?,
        None => cases.iter().map(|c| c.marks_earned).sum(),
    };

    Ok(ScriptResult {
        script_name: doc.script_name,
        marks_earned,
        cases,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunOutcome;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<ParsedTestRun, MarkerError> {
        JsonTestRunParser.parse(value.to_string().as_str())
    }

    #[test]
    fn test_single_script_with_failing_case() {
        let run = parse(json!({
            "testrun": {
                "test_script": {
                    "script_name": "t1",
                    "test": [
                        {"name": "case1", "status": "pass", "marks_earned": 2},
                        {"name": "case2", "status": "fail", "marks_earned": 0}
                    ]
                }
            }
        }))
        .unwrap();

        assert_eq!(run.marks_earned, 2.0);
        assert_eq!(run.outcome, RunOutcome::Fail);
        assert_eq!(run.first_script_name(), Some("t1"));
        assert_eq!(run.case_count(), 2);
    }

    #[test]
    fn test_single_object_and_list_normalize_alike() {
        let script = json!({
            "script_name": "t1",
            "test": {"name": "only", "status": "pass", "marks_earned": 1.5}
        });
        let single = parse(json!({"testrun": {"test_script": script.clone()}})).unwrap();
        let listed = parse(json!({"testrun": {"test_script": [script.clone(), script]}})).unwrap();

        assert_eq!(single.scripts.len(), 1);
        assert_eq!(listed.scripts.len(), 2);
        assert_eq!(listed.scripts[0], single.scripts[0]);
        assert_eq!(listed.scripts[1], single.scripts[0]);
        assert_eq!(listed.marks_earned, 3.0);
        assert_eq!(single.outcome, RunOutcome::Pass);
    }

    #[test]
    fn test_script_level_override() {
        let run = parse(json!({
            "testrun": {"test_script": [
                {"script_name": "a", "marks_earned": 10,
                 "test": [{"name": "x", "status": "pass", "marks_earned": 1}]},
                {"script_name": "b",
                 "test": [{"name": "y", "status": "error", "marks_earned": 3}]}
            ]}
        }))
        .unwrap();

        assert_eq!(run.scripts[0].marks_earned, 10.0);
        assert_eq!(run.scripts[1].marks_earned, 3.0);
        assert_eq!(run.marks_earned, 13.0);
        assert_eq!(run.outcome, RunOutcome::Fail);
    }

    #[test]
    fn test_case_fields_default() {
        let run = parse(json!({
            "testrun": {"test_script": {"script_name": "a",
                "test": {"name": "x", "status": "pass", "input": "1 2", "actual": "3"}}}
        }))
        .unwrap();

        let case = &run.scripts[0].cases[0];
        assert_eq!(case.input, "1 2");
        assert_eq!(case.expected, "");
        assert_eq!(case.actual, "3");
        assert_eq!(case.marks_earned, 0.0);
    }

    #[test]
    fn test_missing_testrun_is_malformed() {
        let err = parse(json!({"results": []})).unwrap_err();
        assert_eq!(err, MarkerError::MalformedOutput("missing 'testrun'".into()));
    }

    #[test]
    fn test_string_marks_are_malformed() {
        let err = parse(json!({
            "testrun": {"test_script": {"script_name": "a",
                "test": [{"name": "x", "status": "pass", "marks_earned": "2"}]}}
        }))
        .unwrap_err();
        assert!(matches!(err, MarkerError::MalformedOutput(_)));
    }

    #[test]
    fn test_negative_marks_are_malformed() {
        let err = parse(json!({
            "testrun": {"test_script": {"script_name": "a",
                "test": [{"name": "x", "status": "pass", "marks_earned": -1}]}}
        }))
        .unwrap_err();
        assert!(matches!(err, MarkerError::MalformedOutput(msg) if msg.contains("test 'x'")));
    }

    #[test]
    fn test_unknown_status_is_malformed() {
        let err = parse(json!({
            "testrun": {"test_script": {"script_name": "a",
                "test": [{"name": "x", "status": "skipped"}]}}
        }))
        .unwrap_err();
        assert!(matches!(err, MarkerError::MalformedOutput(_)));
    }

    #[test]
    fn test_empty_testrun_is_malformed() {
        assert!(parse(json!({"testrun": {}})).is_err());
        assert!(parse(json!({"testrun": {"test_script": []}})).is_err());
    }

    #[test]
    fn test_not_json_is_malformed() {
        let err = JsonTestRunParser.parse("<testrun></testrun>").unwrap_err();
        assert!(matches!(err, MarkerError::MalformedOutput(_)));
    }

    #[test]
    fn test_future_version_is_rejected() {
        let err = parse(json!({"version": 2, "testrun": {}})).unwrap_err();
        assert_eq!(err, MarkerError::UnsupportedVersion(2));
    }

    #[test]
    fn test_script_without_tests_passes_with_zero_marks() {
        let run = parse(json!({"testrun": {"test_script": {"script_name": "a"}}})).unwrap();
        assert_eq!(run.marks_earned, 0.0);
        assert_eq!(run.outcome, RunOutcome::Pass);
    }
}
