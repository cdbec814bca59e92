use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast;

use visage_core::events::TaskEvent;
use visage_engine::orchestrator::{GenerationOrchestrator, OrchestratorConfig};
use visage_engine::registry::TaskRegistry;
use visage_engine::worker::{WorkerConfig, WorkerInvoker};
use visage_telemetry::TelemetryConfig;

/// Talking-head generation server: accepts an image + audio submission,
/// runs the external synthesis worker, and streams lifecycle events to
/// WebSocket observers.
#[derive(Parser, Debug)]
#[command(name = "visage", version)]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 5000)]
    port: u16,

    /// Installation root of the synthesis worker.
    #[arg(long, default_value = "SadTalker")]
    worker_dir: PathBuf,

    /// Interpreter that runs the worker. Defaults to the python inside
    /// the worker's virtualenv.
    #[arg(long)]
    interpreter: Option<PathBuf>,

    /// Worker entry script, relative to the worker directory.
    #[arg(long, default_value = "inference.py")]
    worker_script: String,

    /// Public output area; also holds per-task result directories.
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Directory for uploaded submissions.
    #[arg(long, default_value = "uploads")]
    uploads_dir: PathBuf,

    /// Base URL clients use to fetch published artifacts.
    /// Defaults to http://localhost:<port>.
    #[arg(long)]
    public_base_url: Option<String>,

    /// Cap on concurrently running worker invocations. 0 means uncapped.
    #[arg(long, default_value_t = 0)]
    max_concurrent: usize,

    /// Hard deadline for one worker invocation, in seconds. Unset means
    /// no deadline.
    #[arg(long)]
    worker_timeout_secs: Option<u64>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let telemetry = visage_telemetry::init_telemetry(TelemetryConfig {
        json_output: args.json_logs,
        ..Default::default()
    });
    let metrics = Arc::clone(telemetry.metrics());

    tracing::info!("starting visage generation server");

    let mut worker_config = WorkerConfig::new(&args.worker_dir).with_script(args.worker_script);
    if let Some(interpreter) = args.interpreter {
        worker_config = worker_config.with_interpreter(interpreter);
    }
    if let Some(secs) = args.worker_timeout_secs {
        worker_config = worker_config.with_timeout(Duration::from_secs(secs));
    }

    let invoker = Arc::new(WorkerInvoker::new(worker_config));
    // Startup-time precondition: a missing worker is fatal before any task
    // can be accepted.
    if let Err(err) = invoker.verify() {
        tracing::error!(error = %err, "worker verification failed");
        std::process::exit(1);
    }

    for dir in [&args.output_dir, &args.uploads_dir] {
        if let Err(err) = std::fs::create_dir_all(dir) {
            tracing::error!(dir = %dir.display(), error = %err, "failed to create directory");
            std::process::exit(1);
        }
    }

    let public_base_url = args
        .public_base_url
        .unwrap_or_else(|| format!("http://localhost:{}", args.port));

    let (event_tx, _) = broadcast::channel::<TaskEvent>(1024);

    let orchestrator = Arc::new(GenerationOrchestrator::new(
        Arc::new(TaskRegistry::new()),
        invoker,
        event_tx.clone(),
        Arc::clone(&metrics),
        OrchestratorConfig {
            output_dir: args.output_dir.clone(),
            public_base_url,
            max_concurrent: args.max_concurrent,
        },
    ));

    tracing::info!(
        worker_dir = %args.worker_dir.display(),
        output_dir = %args.output_dir.display(),
        "worker verified"
    );

    let config = visage_server::ServerConfig {
        port: args.port,
        uploads_dir: args.uploads_dir,
        ..Default::default()
    };
    let port = config.port;
    let _handle = visage_server::start(config, orchestrator, metrics, event_tx)
        .await
        .expect("Failed to start server");

    tracing::info!(port = port, "visage server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}
