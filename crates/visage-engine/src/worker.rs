use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use visage_core::errors::GenerateError;
use visage_core::settings::GenerationSettings;

/// Where the external synthesis tool lives and how to run it.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Installation root of the tool; also the working directory for every
    /// invocation, since the tool resolves its models relative to it.
    pub install_dir: PathBuf,
    /// Interpreter binary that runs the tool, typically the python inside
    /// the tool's own virtualenv.
    pub interpreter: PathBuf,
    /// Entry script, resolved by the interpreter relative to `install_dir`.
    pub script: String,
    /// Optional hard deadline for one invocation. Expiry kills the
    /// subprocess and fails the task with the timeout kind.
    pub invoke_timeout: Option<Duration>,
}

impl WorkerConfig {
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        let install_dir = install_dir.into();
        let interpreter = install_dir.join(".venv/bin/python");
        Self {
            install_dir,
            interpreter,
            script: "inference.py".into(),
            invoke_timeout: None,
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = script.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = Some(timeout);
        self
    }
}

/// Captured streams of a worker run that exited 0.
#[derive(Debug)]
pub struct WorkerOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Launches and supervises the synthesis subprocess.
///
/// One invocation per task, no retries: a nonzero exit is reported once
/// and the task terminates in `error`.
pub struct WorkerInvoker {
    config: WorkerConfig,
}

impl WorkerInvoker {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Startup/submission precondition: the interpreter must exist before
    /// any task is created.
    pub fn verify(&self) -> Result<(), GenerateError> {
        if !self.config.interpreter.is_file() {
            return Err(GenerateError::WorkerNotFound(self.config.interpreter.clone()));
        }
        Ok(())
    }

    /// The tool's fixed argument grammar.
    pub fn command_args(
        &self,
        image_path: &Path,
        audio_path: &Path,
        result_dir: &Path,
        settings: &GenerationSettings,
    ) -> Vec<String> {
        let mut args = vec![
            self.config.script.clone(),
            "--driven_audio".into(),
            audio_path.to_string_lossy().into_owned(),
            "--source_image".into(),
            image_path.to_string_lossy().into_owned(),
            "--result_dir".into(),
            result_dir.to_string_lossy().into_owned(),
            "--size".into(),
            settings.size.to_string(),
            "--preprocess".into(),
            settings.preprocess.clone(),
            "--pose_style".into(),
            settings.pose_style.to_string(),
            "--expression_scale".into(),
            settings.expression_scale.to_string(),
            "--batch_size".into(),
            settings.batch_size.to_string(),
        ];

        if let Some(enhancer) = &settings.enhancer {
            args.push("--enhancer".into());
            args.push(enhancer.clone());
        }
        if let Some(background_enhancer) = &settings.background_enhancer {
            args.push("--background_enhancer".into());
            args.push(background_enhancer.clone());
        }
        if settings.still_mode {
            args.push("--still".into());
        }
        if settings.face3dvis {
            args.push("--face3dvis".into());
        }
        if settings.verbose {
            args.push("--verbose".into());
        }

        args
    }

    /// Run the worker to completion, capturing both streams in full.
    ///
    /// Blocks the calling execution unit, never the request path: callers
    /// run this on a spawned background task.
    pub async fn invoke(
        &self,
        image_path: &Path,
        audio_path: &Path,
        result_dir: &Path,
        settings: &GenerationSettings,
    ) -> Result<WorkerOutput, GenerateError> {
        self.verify()?;

        let args = self.command_args(image_path, audio_path, result_dir, settings);
        tracing::debug!(
            interpreter = %self.config.interpreter.display(),
            cwd = %self.config.install_dir.display(),
            ?args,
            "invoking worker"
        );

        let mut command = Command::new(&self.config.interpreter);
        command
            .args(&args)
            .current_dir(&self.config.install_dir)
            .kill_on_drop(true);

        let output = match self.config.invoke_timeout {
            Some(deadline) => tokio::time::timeout(deadline, command.output())
                .await
                .map_err(|_| GenerateError::Timeout(deadline))??,
            None => command.output().await?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            return Ok(WorkerOutput { stdout, stderr });
        }

        let exit_code = output.status.code().unwrap_or(-1);
        let detail = if stderr.trim().is_empty() {
            "no error output captured".to_string()
        } else {
            stderr.trim().to_string()
        };
        Err(GenerateError::WorkerExecutionFailed { exit_code, detail })
    }
}
