//! Test execution building blocks: repository export, sandbox staging and
//! harness invocation. Orchestration lives in `code_manager`.

pub mod exporter;
pub mod harness;
pub mod stager;
pub mod workspace;

pub use exporter::{ExportError, GitVersionControl, RepositoryExporter, RevisionInfo, VcsError, VersionControl};
pub use harness::{HarnessInvoker, HarnessOutput, HarnessSettings, ScriptArg};
pub use stager::{Audience, SandboxStager, StageRequest, StagingError, StagingFailureReason};
pub use workspace::{LocalWorkspace, MemoryWorkspace, Workspace};
