use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ids::TaskId;
use crate::task::{TaskResult, TaskStatus};

/// Task lifecycle events pushed to connected observers.
///
/// Delivery is best-effort and fire-and-forget: observers that connect
/// after an event fired must use the status queries instead.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TaskEvent {
    #[serde(rename = "generation_started")]
    GenerationStarted { task_id: TaskId },

    #[serde(rename = "generation_completed")]
    GenerationCompleted {
        task_id: TaskId,
        video_url: String,
        video_path: PathBuf,
        result_dir: PathBuf,
        status: TaskStatus,
    },

    #[serde(rename = "generation_error")]
    GenerationError {
        task_id: TaskId,
        error: String,
        status: TaskStatus,
    },
}

impl TaskEvent {
    pub fn started(task_id: TaskId) -> Self {
        Self::GenerationStarted { task_id }
    }

    pub fn completed(task_id: TaskId, result: &TaskResult) -> Self {
        Self::GenerationCompleted {
            task_id,
            video_url: result.video_url.clone(),
            video_path: result.video_path.clone(),
            result_dir: result.result_dir.clone(),
            status: TaskStatus::Completed,
        }
    }

    pub fn error(task_id: TaskId, message: impl Into<String>) -> Self {
        Self::GenerationError {
            task_id,
            error: message.into(),
            status: TaskStatus::Error,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        match self {
            Self::GenerationStarted { task_id }
            | Self::GenerationCompleted { task_id, .. }
            | Self::GenerationError { task_id, .. } => task_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::GenerationStarted { .. } => "generation_started",
            Self::GenerationCompleted { .. } => "generation_completed",
            Self::GenerationError { .. } => "generation_error",
        }
    }
}
