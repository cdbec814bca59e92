//! Generation orchestrator — ties registry, invoker, and locator together.
//!
//! Submission creates the registry entry synchronously, then hands the
//! whole pipeline to a spawned background unit so the request path returns
//! immediately with a task id. On a terminal outcome the unit performs
//! exactly one registry update followed by exactly one broadcast, in that
//! order, so observers reacting to the event can already read the terminal
//! state through a status query.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{broadcast, Semaphore};

use visage_core::errors::GenerateError;
use visage_core::events::TaskEvent;
use visage_core::ids::TaskId;
use visage_core::settings::GenerationSettings;
use visage_core::task::{Task, TaskResult};
use visage_telemetry::MetricsRecorder;

use crate::artifact::{self, ARTIFACT_EXT};
use crate::registry::{RegistryCounts, TaskRegistry};
use crate::worker::WorkerInvoker;

/// Orchestrator tunables.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Flat public area artifacts are published into; also the parent of
    /// the per-task result directories.
    pub output_dir: PathBuf,
    /// Base for derived public URLs, e.g. "http://localhost:5000".
    pub public_base_url: String,
    /// Cap on concurrently running worker invocations. 0 means uncapped.
    pub max_concurrent: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            public_base_url: "http://localhost:5000".into(),
            max_concurrent: 0,
        }
    }
}

/// Orchestrates the lifecycle of generation tasks.
pub struct GenerationOrchestrator {
    registry: Arc<TaskRegistry>,
    invoker: Arc<WorkerInvoker>,
    event_tx: broadcast::Sender<TaskEvent>,
    metrics: Arc<MetricsRecorder>,
    permits: Arc<Semaphore>,
    config: OrchestratorConfig,
}

impl GenerationOrchestrator {
    pub fn new(
        registry: Arc<TaskRegistry>,
        invoker: Arc<WorkerInvoker>,
        event_tx: broadcast::Sender<TaskEvent>,
        metrics: Arc<MetricsRecorder>,
        config: OrchestratorConfig,
    ) -> Self {
        let permits = if config.max_concurrent == 0 {
            Semaphore::MAX_PERMITS
        } else {
            config.max_concurrent
        };
        Self {
            registry,
            invoker,
            event_tx,
            metrics,
            permits: Arc::new(Semaphore::new(permits)),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn invoker(&self) -> &Arc<WorkerInvoker> {
        &self.invoker
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Point-in-time task snapshot for status queries.
    pub fn task_status(&self, id: &TaskId) -> Option<Task> {
        self.registry.get(id)
    }

    /// In-flight vs total counts.
    pub fn generation_status(&self) -> RegistryCounts {
        self.registry.counts()
    }

    /// Accept a submission and return its task id immediately.
    ///
    /// The registry entry is created before this returns, so a status
    /// query right after submission never sees `not_found`. A missing
    /// worker is the one failure surfaced here: it is a precondition, and
    /// no task is created for it.
    pub fn submit(
        &self,
        image_path: PathBuf,
        audio_path: PathBuf,
        settings: GenerationSettings,
    ) -> Result<TaskId, GenerateError> {
        self.invoker.verify()?;

        let task = self.registry.create(settings);
        let task_id = task.id.clone();

        self.metrics.counter_inc("tasks_submitted", &[], 1);
        self.metrics.gauge_inc("tasks_in_flight", &[], 1.0);
        tracing::info!(task_id = %task_id, image = %image_path.display(), audio = %audio_path.display(), "task submitted");

        let registry = Arc::clone(&self.registry);
        let invoker = Arc::clone(&self.invoker);
        let event_tx = self.event_tx.clone();
        let metrics = Arc::clone(&self.metrics);
        let permits = Arc::clone(&self.permits);
        let config = self.config.clone();
        let settings = task.settings;
        let spawn_task_id = task_id.clone();

        tokio::spawn(async move {
            let task_id = spawn_task_id;
            // Admission control happens here, off the request path.
            let _permit = permits.acquire_owned().await.ok();

            let started = Instant::now();
            let _ = event_tx.send(TaskEvent::started(task_id.clone()));

            let outcome =
                run_generation(&invoker, &config, &task_id, &image_path, &audio_path, &settings)
                    .await;

            match outcome {
                Ok(result) => {
                    registry.complete(&task_id, result.clone());
                    metrics.counter_inc("tasks_completed", &[], 1);
                    tracing::info!(task_id = %task_id, video_url = %result.video_url, "generation completed");
                    let _ = event_tx.send(TaskEvent::completed(task_id.clone(), &result));
                }
                Err(err) => {
                    let message = err.to_string();
                    registry.fail(&task_id, message.clone());
                    metrics.counter_inc("tasks_failed", &[("kind", err.error_kind())], 1);
                    tracing::warn!(task_id = %task_id, kind = err.error_kind(), error = %message, "generation failed");
                    let _ = event_tx.send(TaskEvent::error(task_id.clone(), message));
                }
            }

            metrics.histogram_observe("generation_seconds", &[], started.elapsed().as_secs_f64());
            metrics.gauge_inc("tasks_in_flight", &[], -1.0);
        });

        Ok(task_id)
    }
}

/// The full pipeline for one task. Every failure is returned, caught at
/// the spawned unit's boundary, and becomes a terminal `error` transition;
/// nothing escapes to crash the process.
async fn run_generation(
    invoker: &WorkerInvoker,
    config: &OrchestratorConfig,
    task_id: &TaskId,
    image_path: &Path,
    audio_path: &Path,
    settings: &GenerationSettings,
) -> Result<TaskResult, GenerateError> {
    let stamp = Utc::now().format("%Y_%m_%d_%H.%M.%S");
    let result_dir = config.output_dir.join(format!("{task_id}_{stamp}"));
    tokio::fs::create_dir_all(&result_dir).await?;

    let output = invoker.invoke(image_path, audio_path, &result_dir, settings).await?;
    if !output.stderr.trim().is_empty() {
        tracing::debug!(task_id = %task_id, stderr = %output.stderr.trim(), "worker stderr");
    }

    let source = artifact::locate_artifact(&result_dir, ARTIFACT_EXT)?;
    let published = artifact::publish_artifact(&source, &config.output_dir, task_id).await?;

    Ok(TaskResult {
        video_url: artifact::public_url(&config.public_base_url, &published.file_name),
        video_path: published.path,
        result_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use visage_core::task::TaskStatus;

    use crate::worker::WorkerConfig;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("visage-orch-{tag}-{}", uuid::Uuid::now_v7()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Orchestrator wired to a stub worker written as a shell script.
    fn orchestrator_with_worker(
        tag: &str,
        script_body: &str,
    ) -> (Arc<GenerationOrchestrator>, broadcast::Receiver<TaskEvent>, PathBuf) {
        let worker_dir = scratch_dir(&format!("{tag}-worker"));
        let output_dir = scratch_dir(&format!("{tag}-output"));
        fs::write(worker_dir.join("worker.sh"), script_body).unwrap();

        let worker_config = WorkerConfig::new(&worker_dir)
            .with_interpreter("/bin/sh")
            .with_script("worker.sh");

        let (event_tx, event_rx) = broadcast::channel(64);
        let orchestrator = GenerationOrchestrator::new(
            Arc::new(TaskRegistry::new()),
            Arc::new(WorkerInvoker::new(worker_config)),
            event_tx,
            visage_telemetry::recorder_only(),
            OrchestratorConfig {
                output_dir: output_dir.clone(),
                public_base_url: "http://localhost:5000".into(),
                max_concurrent: 0,
            },
        );
        (Arc::new(orchestrator), event_rx, output_dir)
    }

    /// Stub worker that writes a 1000-byte result.mp4 under --result_dir.
    const HAPPY_WORKER: &str = r#"
dir=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--result_dir" ]; then dir="$2"; fi
  shift
done
mkdir -p "$dir/video"
head -c 1000 /dev/zero > "$dir/video/result.mp4"
exit 0
"#;

    async fn wait_terminal(orchestrator: &GenerationOrchestrator, id: &TaskId) -> Task {
        for _ in 0..500 {
            if let Some(task) = orchestrator.task_status(id) {
                if task.status.is_terminal() {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn happy_path_completes_and_publishes() {
        let (orchestrator, mut events, output_dir) = orchestrator_with_worker("happy", HAPPY_WORKER);

        let task_id = orchestrator
            .submit("face.jpg".into(), "voice.wav".into(), GenerationSettings::default())
            .unwrap();

        let task = wait_terminal(&orchestrator, &task_id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.error.is_none());

        let result = task.result.expect("completed task must carry a result");
        assert!(result.video_url.contains("/output/"));
        assert!(result.video_url.ends_with("result.mp4"));
        assert_eq!(fs::metadata(&result.video_path).unwrap().len(), 1000);
        assert!(result.video_path.starts_with(&output_dir));
        assert!(result.result_dir.starts_with(&output_dir));

        let first = events.recv().await.unwrap();
        assert_eq!(first.event_type(), "generation_started");
        assert_eq!(first.task_id(), &task_id);
        let second = events.recv().await.unwrap();
        assert_eq!(second.event_type(), "generation_completed");
        match second {
            TaskEvent::GenerationCompleted { video_url, .. } => {
                assert_eq!(video_url, result.video_url);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_immediately_after_submit_is_generating() {
        let (orchestrator, _events, _out) =
            orchestrator_with_worker("pending", "sleep 1; exit 0");

        let task_id = orchestrator
            .submit("face.jpg".into(), "voice.wav".into(), GenerationSettings::default())
            .unwrap();

        let task = orchestrator.task_status(&task_id).expect("never not_found after submit");
        assert_eq!(task.status, TaskStatus::Generating);
        assert!(task.result.is_none());
        assert!(task.error.is_none());
    }

    #[tokio::test]
    async fn worker_failure_surfaces_stderr() {
        let (orchestrator, mut events, _out) =
            orchestrator_with_worker("stderr", "echo 'model load failed' >&2; exit 1");

        let task_id = orchestrator
            .submit("face.jpg".into(), "voice.wav".into(), GenerationSettings::default())
            .unwrap();

        let task = wait_terminal(&orchestrator, &task_id).await;
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.result.is_none());
        assert!(task.error.as_deref().unwrap().contains("model load failed"));

        assert_eq!(events.recv().await.unwrap().event_type(), "generation_started");
        match events.recv().await.unwrap() {
            TaskEvent::GenerationError { error, status, .. } => {
                assert!(error.contains("model load failed"));
                assert_eq!(status, TaskStatus::Error);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn worker_without_artifact_fails_with_listing() {
        let (orchestrator, _events, _out) = orchestrator_with_worker("noartifact", "exit 0");

        let task_id = orchestrator
            .submit("face.jpg".into(), "voice.wav".into(), GenerationSettings::default())
            .unwrap();

        let task = wait_terminal(&orchestrator, &task_id).await;
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.error.as_deref().unwrap().contains("no artifact produced"));
    }

    #[tokio::test]
    async fn empty_artifact_is_a_hard_failure() {
        let script = r#"
dir=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--result_dir" ]; then dir="$2"; fi
  shift
done
: > "$dir/result.mp4"
exit 0
"#;
        let (orchestrator, _events, _out) = orchestrator_with_worker("empty", script);

        let task_id = orchestrator
            .submit("face.jpg".into(), "voice.wav".into(), GenerationSettings::default())
            .unwrap();

        let task = wait_terminal(&orchestrator, &task_id).await;
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.error.as_deref().unwrap().contains("empty"));
    }

    #[tokio::test]
    async fn missing_worker_creates_no_task() {
        let output_dir = scratch_dir("noworker-output");
        let (event_tx, _) = broadcast::channel(8);
        let orchestrator = GenerationOrchestrator::new(
            Arc::new(TaskRegistry::new()),
            Arc::new(WorkerInvoker::new(WorkerConfig::new("/nonexistent/worker"))),
            event_tx,
            visage_telemetry::recorder_only(),
            OrchestratorConfig {
                output_dir,
                ..Default::default()
            },
        );

        let err = orchestrator
            .submit("face.jpg".into(), "voice.wav".into(), GenerationSettings::default())
            .unwrap_err();
        assert_eq!(err.error_kind(), "worker_not_found");
        assert_eq!(orchestrator.generation_status().total_tasks, 0);
    }

    #[tokio::test]
    async fn hung_worker_times_out() {
        let worker_dir = scratch_dir("hang-worker");
        let output_dir = scratch_dir("hang-output");
        fs::write(worker_dir.join("worker.sh"), "sleep 10").unwrap();

        let worker_config = WorkerConfig::new(&worker_dir)
            .with_interpreter("/bin/sh")
            .with_script("worker.sh")
            .with_timeout(Duration::from_millis(100));

        let (event_tx, _) = broadcast::channel(8);
        let orchestrator = GenerationOrchestrator::new(
            Arc::new(TaskRegistry::new()),
            Arc::new(WorkerInvoker::new(worker_config)),
            event_tx,
            visage_telemetry::recorder_only(),
            OrchestratorConfig {
                output_dir,
                ..Default::default()
            },
        );

        let task_id = orchestrator
            .submit("face.jpg".into(), "voice.wav".into(), GenerationSettings::default())
            .unwrap();
        let task = wait_terminal(&orchestrator, &task_id).await;
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn concurrent_submissions_stay_isolated() {
        let (orchestrator, _events, _out) = orchestrator_with_worker("concurrent", HAPPY_WORKER);

        let mut ids = Vec::new();
        for _ in 0..8 {
            ids.push(
                orchestrator
                    .submit("face.jpg".into(), "voice.wav".into(), GenerationSettings::default())
                    .unwrap(),
            );
        }

        let mut sorted = ids.clone();
        sorted.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        sorted.dedup();
        assert_eq!(sorted.len(), 8, "ids must be distinct");

        for id in &ids {
            let task = wait_terminal(&orchestrator, id).await;
            assert_eq!(task.status, TaskStatus::Completed, "task {id} failed: {:?}", task.error);
            assert!(task.result.unwrap().video_path.to_string_lossy().contains(id.as_str()));
        }
        assert_eq!(orchestrator.generation_status().active_tasks, 0);
    }

    #[tokio::test]
    async fn admission_cap_still_completes_all() {
        let worker_dir = scratch_dir("cap-worker");
        let output_dir = scratch_dir("cap-output");
        fs::write(worker_dir.join("worker.sh"), HAPPY_WORKER).unwrap();

        let worker_config = WorkerConfig::new(&worker_dir)
            .with_interpreter("/bin/sh")
            .with_script("worker.sh");

        let (event_tx, _) = broadcast::channel(64);
        let orchestrator = GenerationOrchestrator::new(
            Arc::new(TaskRegistry::new()),
            Arc::new(WorkerInvoker::new(worker_config)),
            event_tx,
            visage_telemetry::recorder_only(),
            OrchestratorConfig {
                output_dir,
                public_base_url: "http://localhost:5000".into(),
                max_concurrent: 1,
            },
        );

        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(
                orchestrator
                    .submit("face.jpg".into(), "voice.wav".into(), GenerationSettings::default())
                    .unwrap(),
            );
        }
        for id in &ids {
            let task = wait_terminal(&orchestrator, id).await;
            assert_eq!(task.status, TaskStatus::Completed);
        }
    }

    #[tokio::test]
    async fn registry_update_lands_before_broadcast() {
        let (orchestrator, mut events, _out) = orchestrator_with_worker("ordering", HAPPY_WORKER);

        let task_id = orchestrator
            .submit("face.jpg".into(), "voice.wav".into(), GenerationSettings::default())
            .unwrap();

        loop {
            let event = events.recv().await.unwrap();
            if event.event_type() == "generation_completed" {
                // The broadcast must observe the already-updated registry.
                let task = orchestrator.task_status(&task_id).unwrap();
                assert_eq!(task.status, TaskStatus::Completed);
                break;
            }
        }
    }
}
