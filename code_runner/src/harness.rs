//! Harness execution.
//!
//! The harness is invoked as
//!
//! ```text
//! [interpreter] ./<harness> [verbose_flag] <script_1> <halts_1> <script_2> <halts_2> ...
//! ```
//!
//! from inside a per-run copy of the sandbox. Script names are shell-escaped and the
//! `halts_N` tokens are `true`/`false`; the harness decides whether a failing script
//! stops the rest.
//!
//! Exit status mapping:
//! - `0`: [`RunStatus::Success`]
//! - `1`: [`RunStatus::Failed`], the harness ran and some test failed. The run is
//!   repeated once with the verbose flag for diagnosis.
//! - anything else, a signal or a timeout: [`RunStatus::Error`]
//!
//! `output.txt` and `error.txt` (plus `verbose_output.txt`/`verbose_error.txt` after a
//! re-run) are written to `test_runs/test_run_<epoch>/` under the automated-tests root.

use crate::workspace::Workspace;
use chrono::{DateTime, Utc};
use db::models::test_result::RunStatus;
use db::models::test_script;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info, warn};
use util::paths::{run_execution_dir, test_run_diagnostics_dir};

/// Exit code the harness uses when tests ran but at least one failed.
const TESTS_FAILED_EXIT_CODE: i32 = 1;

#[derive(Debug, Clone)]
pub struct HarnessSettings {
    /// File name of the harness inside the sandbox.
    pub harness_name: String,
    pub interpreter: Option<String>,
    pub timeout: Duration,
    pub verbose_flag: String,
    /// Parent of the per-run execution directories.
    pub run_root: PathBuf,
    /// Automated-tests root; diagnostics go under its `test_runs/` directory.
    pub diagnostics_root: PathBuf,
}

/// One script as forwarded to the harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptArg {
    pub name: String,
    pub halts_testing: bool,
}

impl From<&test_script::Model> for ScriptArg {
    fn from(script: &test_script::Model) -> Self {
        Self {
            name: script.script_name.clone(),
            halts_testing: script.halts_testing,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerboseOutput {
    pub stdout: String,
    pub stderr: String,
}

/// What one harness invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessOutput {
    pub stdout: String,
    pub stderr: String,
    pub succeeded: bool,
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub verbose: Option<VerboseOutput>,
    pub diagnostics_dir: Option<PathBuf>,
}

impl HarnessOutput {
    fn setup_failure(stderr: String) -> Self {
        Self {
            stdout: String::new(),
            stderr,
            succeeded: false,
            status: RunStatus::Error,
            exit_code: None,
            verbose: None,
            diagnostics_dir: None,
        }
    }
}

#[derive(Debug)]
struct Execution {
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
}

impl Execution {
    fn status(&self) -> RunStatus {
        match self.exit_code {
            Some(0) => RunStatus::Success,
            Some(TESTS_FAILED_EXIT_CODE) => RunStatus::Failed,
            _ => RunStatus::Error,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("failed to spawn harness: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("harness did not finish within {0:?}")]
    Timeout(Duration),
}

/// Builds the harness argument tokens, script names shell-escaped.
pub fn build_args(scripts: &[ScriptArg]) -> Vec<String> {
    scripts
        .iter()
        .flat_map(|s| {
            [
                shell_escape::escape(Cow::from(s.name.as_str())).into_owned(),
                s.halts_testing.to_string(),
            ]
        })
        .collect()
}

#[derive(Clone)]
pub struct HarnessInvoker {
    settings: HarnessSettings,
    workspace: Arc<dyn Workspace>,
}

impl HarnessInvoker {
    pub fn new(settings: HarnessSettings, workspace: Arc<dyn Workspace>) -> Self {
        Self { settings, workspace }
    }

    pub fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    /// Runs the harness over a copy of `sandbox` in a run directory owned by `run_id`.
    ///
    /// Never returns an error: every failure is folded into the returned
    /// [`HarnessOutput`] so callers can persist it.
    pub async fn run(&self, run_id: &str, sandbox: &Path, scripts: &[ScriptArg]) -> HarnessOutput {
        let run_dir = run_execution_dir(&self.settings.run_root, run_id);
        let started_at = Utc::now();

        if let Err(e) = self
            .workspace
            .clear(&run_dir)
            .and_then(|_| self.workspace.copy_tree(sandbox, &run_dir))
        {
            error!(run_id, run_dir = %run_dir.display(), error = %e, "failed to prepare run directory");
            let _ = self.workspace.remove(&run_dir);
            return HarnessOutput::setup_failure(format!(
                "failed to prepare run directory {}: {}",
                run_dir.display(),
                e
            ));
        }

        let args = build_args(scripts);
        let first = self.execute(&run_dir, &args, false).await;
        let status = first.status();

        let verbose = if status == RunStatus::Failed {
            warn!(run_id, "harness reported failures, re-running verbosely");
            let rerun = self.execute(&run_dir, &args, true).await;
            Some(VerboseOutput {
                stdout: rerun.stdout,
                stderr: rerun.stderr,
            })
        } else {
            None
        };

        let diagnostics_dir = self.write_diagnostics(started_at, &first, verbose.as_ref());

        if let Err(e) = self.workspace.remove(&run_dir) {
            warn!(run_id, error = %e, "failed to remove run directory");
        }

        info!(run_id, status = %status, exit_code = ?first.exit_code, "harness finished");

        HarnessOutput {
            stdout: first.stdout,
            stderr: first.stderr,
            succeeded: status == RunStatus::Success,
            status,
            exit_code: first.exit_code,
            verbose,
            diagnostics_dir,
        }
    }

    fn command_line(&self, args: &[String], verbose: bool) -> String {
        let harness = format!("./{}", self.settings.harness_name);
        let mut tokens: Vec<String> = Vec::with_capacity(args.len() + 3);
        if let Some(interpreter) = &self.settings.interpreter {
            tokens.push(interpreter.clone());
        }
        tokens.push(shell_escape::escape(Cow::from(harness.as_str())).into_owned());
        if verbose {
            tokens.push(self.settings.verbose_flag.clone());
        }
        tokens.extend(args.iter().cloned());
        tokens.join(" ")
    }

    async fn execute(&self, run_dir: &Path, args: &[String], verbose: bool) -> Execution {
        match self.spawn_and_wait(run_dir, args, verbose).await {
            Ok(execution) => execution,
            Err(e) => {
                error!(run_dir = %run_dir.display(), error = %e, "harness execution failed");
                Execution {
                    stdout: String::new(),
                    stderr: e.to_string(),
                    exit_code: None,
                }
            }
        }
    }

    async fn spawn_and_wait(
        &self,
        run_dir: &Path,
        args: &[String],
        verbose: bool,
    ) -> Result<Execution, HarnessError> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(self.command_line(args, verbose))
            .current_dir(run_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down everything the harness started.
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(HarnessError::Spawn)?;
        let pid = child.id();

        let output = match timeout(self.settings.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(HarnessError::Spawn)?,
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                return Err(HarnessError::Timeout(self.settings.timeout));
            }
        };

        Ok(Execution {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }

    fn write_diagnostics(
        &self,
        started_at: DateTime<Utc>,
        execution: &Execution,
        verbose: Option<&VerboseOutput>,
    ) -> Option<PathBuf> {
        let base = test_run_diagnostics_dir(&self.settings.diagnostics_root, started_at);
        let dir = match self.claim_dir(&base) {
            Ok(dir) => dir,
            Err(e) => {
                error!(dir = %base.display(), error = %e, "failed to create test run diagnostics directory");
                return None;
            }
        };

        let mut files: Vec<(&str, &str)> = vec![
            ("output.txt", execution.stdout.as_str()),
            ("error.txt", execution.stderr.as_str()),
        ];
        if let Some(v) = verbose {
            files.push(("verbose_output.txt", v.stdout.as_str()));
            files.push(("verbose_error.txt", v.stderr.as_str()));
        }

        for (name, contents) in files {
            if let Err(e) = self.workspace.write_file(&dir.join(name), contents.as_bytes()) {
                error!(dir = %dir.display(), error = %e, "failed to write test run diagnostics");
                return None;
            }
        }
        Some(dir)
    }

    /// Creates the first free directory among `base`, `base_1`, `base_2`, ...
    ///
    /// Creation is exclusive, so runs finishing in the same second never share one.
    fn claim_dir(&self, base: &Path) -> std::io::Result<PathBuf> {
        let name = base
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut n = 0;
        loop {
            let candidate = if n == 0 {
                base.to_path_buf()
            } else {
                base.with_file_name(format!("{name}_{n}"))
            };
            match self.workspace.create_dir(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pid, error = %e, "failed to kill harness process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}
