use std::path::PathBuf;
use std::time::Duration;

/// Failure taxonomy for a generation task.
///
/// Every variant is terminal for its task: nothing here is retried, and
/// none of these may escape the background unit that produced them.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GenerateError {
    /// The worker interpreter is missing. Startup/submission precondition:
    /// surfaced immediately, no task is created.
    #[error("worker interpreter not found: {0:?}")]
    WorkerNotFound(PathBuf),

    #[error("worker process failed with exit code {exit_code}: {detail}")]
    WorkerExecutionFailed { exit_code: i32, detail: String },

    #[error("no artifact produced under {dir:?}; contents:\n{listing}")]
    NoArtifactProduced { dir: PathBuf, listing: String },

    #[error("artifact is empty: {0:?}")]
    EmptyArtifact(PathBuf),

    #[error("artifact copy mismatch: source {source_len} bytes, copy {copied_len} bytes")]
    CopyIntegrityMismatch { source_len: u64, copied_len: u64 },

    #[error("worker timed out after {0:?}")]
    Timeout(Duration),

    #[error("io error: {0}")]
    Io(String),
}

impl GenerateError {
    /// Stable snake_case classification for logging and metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::WorkerNotFound(_) => "worker_not_found",
            Self::WorkerExecutionFailed { .. } => "worker_execution_failed",
            Self::NoArtifactProduced { .. } => "no_artifact_produced",
            Self::EmptyArtifact(_) => "empty_artifact",
            Self::CopyIntegrityMismatch { .. } => "copy_integrity_mismatch",
            Self::Timeout(_) => "timeout",
            Self::Io(_) => "io",
        }
    }

    /// True for failures that must be reported before a task is created.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::WorkerNotFound(_))
    }
}

impl From<std::io::Error> for GenerateError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
