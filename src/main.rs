//! Consent Pipeline - staged clickstream validation, redaction and insights
//!
//! # Usage
//!
//! ```bash
//! # Run the pipeline and the dashboard API on 0.0.0.0:5000
//! cargo run --release
//!
//! # Custom database location, workers only
//! ./consent-pipeline --db /var/lib/pipeline.db --no-server
//! ```
//!
//! # Environment Variables
//!
//! - `CONSENT_PIPELINE_CONFIG`: Path to a `pipeline.toml`
//! - `CONSENT_PIPELINE_ADDR`: HTTP bind address (overrides config)
//! - `OPENAI_API_KEY`: Enables LLM-generated insights (template text otherwise)
//! - `RUST_LOG`: Logging level (default: info)
//! - `RESET_DB`: Set to "true" to wipe the event store on startup

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use consent_pipeline::agents::{redactor_worker, validator_worker, InsightAgent};
use consent_pipeline::api::{create_app, ApiState};
use consent_pipeline::config::{self, PipelineConfig};
use consent_pipeline::llm::{InsightGenerator, OpenAiGenerator, TemplateGenerator};
use consent_pipeline::pipeline::{PipelineSupervisor, WorkerSpec};
use consent_pipeline::storage::{EventStore, SledStore};
use consent_pipeline::types::Stage;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "consent-pipeline")]
#[command(about = "Staged clickstream pipeline with consent validation and PII redaction")]
#[command(version)]
struct CliArgs {
    /// Override the server address (default: "0.0.0.0:5000")
    #[arg(short, long, env = "CONSENT_PIPELINE_ADDR")]
    addr: Option<String>,

    /// Path to the sled database directory
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Wipe the event store on startup.
    /// Can also be set via RESET_DB=true environment variable.
    #[arg(long)]
    reset_db: bool,

    /// Run the stage workers without the HTTP API
    #[arg(long)]
    no_server: bool,
}

// ============================================================================
// Database Reset
// ============================================================================

/// Check if database reset is requested via CLI flag or environment variable.
fn should_reset_db(cli_flag: bool) -> bool {
    if cli_flag {
        return true;
    }
    if let Ok(val) = std::env::var("RESET_DB") {
        let val_lower = val.to_lowercase();
        return val_lower == "true" || val_lower == "1" || val_lower == "yes";
    }
    false
}

fn reset_database(path: &Path) -> Result<()> {
    if !path.exists() {
        info!("Database {} does not exist, nothing to reset", path.display());
        return Ok(());
    }

    warn!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    warn!("  RESET_DB DETECTED - WIPING EVENT STORE");
    warn!("  Removing: {}", path.display());
    warn!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    std::fs::remove_dir_all(path)
        .with_context(|| format!("Failed to remove database at {}", path.display()))?;
    Ok(())
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    StageWorkers,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::StageWorkers => write!(f, "StageWorkers"),
        }
    }
}

// ============================================================================
// Wiring
// ============================================================================

fn build_generator(cfg: &PipelineConfig) -> Result<Arc<dyn InsightGenerator>> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => {
            let generator = OpenAiGenerator::new(key.trim(), &cfg.insight)
                .context("Failed to build OpenAI client")?;
            info!("🧠 Insights: OpenAI ({})", cfg.insight.model);
            Ok(Arc::new(generator))
        }
        _ => {
            info!("🧠 Insights: template mode (no OPENAI_API_KEY)");
            Ok(Arc::new(TemplateGenerator))
        }
    }
}

fn build_supervisor(
    cfg: &PipelineConfig,
    store: &Arc<dyn EventStore>,
    generator: Arc<dyn InsightGenerator>,
) -> PipelineSupervisor {
    let w = &cfg.workers;
    let insight = InsightAgent::new(
        Arc::clone(store),
        generator,
        cfg.insight.event_delta_threshold,
        cfg.insight.llm_timeout(),
    );

    PipelineSupervisor::new()
        .with_worker(WorkerSpec::new(
            Box::new(validator_worker(Arc::clone(store))),
            w.poll_interval(Stage::Validator),
            w.backoff(Stage::Validator),
        ))
        .with_worker(WorkerSpec::new(
            Box::new(redactor_worker(Arc::clone(store))),
            w.poll_interval(Stage::Redactor),
            w.backoff(Stage::Redactor),
        ))
        .with_worker(WorkerSpec::new(
            Box::new(insight),
            w.poll_interval(Stage::Insight),
            w.backoff(Stage::Insight),
        ))
}

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

/// Monitor top-level tasks, cancelling everything when one fails.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("🔒 Supervisor: All tasks spawned, monitoring...");

    let mut failure = None;
    while let Some(result) = task_set.join_next().await {
        match result {
            Ok(Ok(task_name)) => {
                info!("🔒 Supervisor: Task {} completed", task_name);
            }
            Ok(Err(e)) => {
                error!("🔒 Supervisor: Task failed with error: {}", e);
                cancel_token.cancel();
                failure.get_or_insert(e);
            }
            Err(e) => {
                error!("🔒 Supervisor: Task panicked: {}", e);
                cancel_token.cancel();
                failure.get_or_insert(anyhow::anyhow!("Task panicked: {}", e));
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let mut cfg = PipelineConfig::load();
    if let Some(db) = args.db {
        cfg.storage.path = db;
    }
    if let Some(addr) = args.addr {
        cfg.server.addr = addr;
    }
    cfg.validate().context("Invalid configuration")?;
    config::init(cfg);
    let cfg = config::get();

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Consent Pipeline");
    info!("  Validation → Redaction → Insights");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if should_reset_db(args.reset_db) {
        reset_database(&cfg.storage.path)?;
    }

    if let Some(parent) = cfg.storage.path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let sled = SledStore::open_with_flush_interval(&cfg.storage.path, cfg.storage.flush_every_ms)
        .context("Failed to open event store")?;
    let store: Arc<dyn EventStore> = Arc::new(sled.clone());

    let generator = build_generator(cfg)?;
    let supervisor = build_supervisor(cfg, &store, Arc::clone(&generator));
    let status = supervisor.status_board();

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    if args.no_server {
        info!("🌐 HTTP API disabled (--no-server)");
    } else {
        let listener = tokio::net::TcpListener::bind(&cfg.server.addr)
            .await
            .with_context(|| format!("Failed to bind {}", cfg.server.addr))?;
        info!("🌐 Dashboard API listening on http://{}", cfg.server.addr);
        let state = ApiState::new(
            Arc::clone(&store),
            status,
            generator,
            cfg.insight.llm_timeout(),
        );
        spawn_http_server(&mut task_set, listener, create_app(state), cancel_token.clone());
    }

    let workers_cancel = cancel_token.clone();
    task_set.spawn(async move {
        supervisor.run(workers_cancel).await;
        Ok(TaskName::StageWorkers)
    });

    let outcome = run_supervisor(&mut task_set, cancel_token).await;

    match sled.flush() {
        Ok(bytes) => info!("Event store flushed ({} bytes)", bytes),
        Err(e) => warn!("Event store flush failed: {}", e),
    }

    info!("✓ Consent Pipeline shutdown complete");
    outcome
}
