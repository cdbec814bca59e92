use dashmap::DashMap;
use serde::Serialize;

use visage_core::ids::TaskId;
use visage_core::settings::GenerationSettings;
use visage_core::task::{Task, TaskResult};

/// In-flight vs total counts, as reported by `get_generation_status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RegistryCounts {
    pub active_tasks: usize,
    pub total_tasks: usize,
}

/// The single source of truth for task state.
///
/// Shared mutable state guarded per key: no operation ever needs to hold
/// one task's record while touching another's. Reads hand out snapshots,
/// never references into the map.
pub struct TaskRegistry {
    tasks: DashMap<TaskId, Task>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
        }
    }

    /// Create a task in `Generating` and return a snapshot of it.
    pub fn create(&self, settings: GenerationSettings) -> Task {
        let task = Task::new(settings);
        self.tasks.insert(task.id.clone(), task.clone());
        task
    }

    /// Snapshot of a task, or `None` for an unknown id.
    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.tasks.get(id).map(|entry| entry.value().clone())
    }

    /// Terminal transition to `Completed`. Returns `false` when the id is
    /// unknown or the task already left `Generating`.
    pub fn complete(&self, id: &TaskId, result: TaskResult) -> bool {
        match self.tasks.get_mut(id) {
            Some(mut entry) => {
                let applied = entry.complete(result);
                if !applied {
                    tracing::warn!(task_id = %id, status = %entry.status, "ignoring completed transition on terminal task");
                }
                applied
            }
            None => {
                tracing::warn!(task_id = %id, "completed transition for unknown task");
                false
            }
        }
    }

    /// Terminal transition to `Error`. Returns `false` when the id is
    /// unknown or the task already left `Generating`.
    pub fn fail(&self, id: &TaskId, message: impl Into<String>) -> bool {
        match self.tasks.get_mut(id) {
            Some(mut entry) => {
                let applied = entry.fail(message);
                if !applied {
                    tracing::warn!(task_id = %id, status = %entry.status, "ignoring error transition on terminal task");
                }
                applied
            }
            None => {
                tracing::warn!(task_id = %id, "error transition for unknown task");
                false
            }
        }
    }

    /// Count tasks matching a predicate.
    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Task) -> bool,
    {
        self.tasks.iter().filter(|entry| predicate(entry.value())).count()
    }

    pub fn counts(&self) -> RegistryCounts {
        RegistryCounts {
            active_tasks: self.count(|t| !t.status.is_terminal()),
            total_tasks: self.tasks.len(),
        }
    }
}
