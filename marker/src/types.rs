//! # Types Module
//!
//! Aggregated results of one harness run, independent of how they get stored.

use serde::{Deserialize, Serialize};

/// Status reported by the harness for a single test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Pass,
    Fail,
    Error,
}

/// Overall outcome of a run: `Pass` only when every case passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Pass,
    Fail,
}

/// A single test case as reported by the harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub name: String,
    pub status: CaseStatus,
    pub input: String,
    pub expected: String,
    pub actual: String,
    pub marks_earned: f64,
}

/// One test script with its cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptResult {
    pub script_name: String,
    /// Script-level override if the harness sent one, otherwise the sum of the cases.
    pub marks_earned: f64,
    pub cases: Vec<CaseResult>,
}

impl ScriptResult {
    pub fn passed(&self) -> bool {
        self.cases.iter().all(|c| c.status == CaseStatus::Pass)
    }
}

/// The parsed content of one harness run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTestRun {
    /// Never empty.
    pub scripts: Vec<ScriptResult>,
    pub marks_earned: f64,
    pub outcome: RunOutcome,
}

impl ParsedTestRun {
    pub fn from_scripts(scripts: Vec<ScriptResult>) -> Self {
        let marks_earned = scripts.iter().map(|s| s.marks_earned).sum();
        let outcome = if scripts.iter().all(ScriptResult::passed) {
            RunOutcome::Pass
        } else {
            RunOutcome::Fail
        };
        Self {
            scripts,
            marks_earned,
            outcome,
        }
    }

    /// Name of the first script, which the run-level result is associated with.
    pub fn first_script_name(&self) -> Option<&str> {
        self.scripts.first().map(|s| s.script_name.as_str())
    }

    pub fn case_count(&self) -> usize {
        self.scripts.iter().map(|s| s.cases.len()).sum()
    }
}
