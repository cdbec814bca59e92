use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TaskId;
use crate::settings::GenerationSettings;

/// Lifecycle state of a generation task.
///
/// Monotonic: a task leaves `Generating` exactly once and never
/// transitions again after that.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Generating,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a completed task's artifact ended up.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Publicly resolvable URL for playback clients.
    pub video_url: String,
    /// Absolute path of the published copy.
    pub video_path: PathBuf,
    /// The worker's task-scoped output directory.
    pub result_dir: PathBuf,
}

/// One image+audio submission and its lifecycle through synthesis.
///
/// Invariant: exactly one of `result`/`error` is set, and only after the
/// status has left `Generating`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub settings: GenerationSettings,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    pub fn new(settings: GenerationSettings) -> Self {
        Self {
            id: TaskId::new(),
            status: TaskStatus::Generating,
            settings,
            created_at: Utc::now(),
            result: None,
            error: None,
        }
    }

    /// Terminal transition to `Completed`. Returns `false` (and changes
    /// nothing) if the task already left `Generating`.
    pub fn complete(&mut self, result: TaskResult) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        true
    }

    /// Terminal transition to `Error`. Returns `false` (and changes
    /// nothing) if the task already left `Generating`.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Error;
        self.error = Some(message.into());
        true
    }
}
