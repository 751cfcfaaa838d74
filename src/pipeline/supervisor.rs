//! Pipeline supervisor: one restart loop per stage worker
//!
//! ```text
//! loop {
//!     run_cycle ── Ok ──────────────► sleep(poll_interval)
//!         └──── Err / panic ─► log, status "Error: …", sleep(backoff)
//! }
//! ```
//!
//! Failures never leave the loop that produced them. A panicking or failing
//! stage keeps restarting while its siblings carry on.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::status::{StatusBoard, StatusHandle};
use crate::agents::{StageWorker, WorkerError};
use crate::types::Stage;

/// A worker plus its loop timing.
pub struct WorkerSpec {
    pub worker: Box<dyn StageWorker>,
    pub poll_interval: Duration,
    pub backoff: Duration,
}

impl WorkerSpec {
    pub fn new(worker: Box<dyn StageWorker>, poll_interval: Duration, backoff: Duration) -> Self {
        Self {
            worker,
            poll_interval,
            backoff,
        }
    }
}

/// Outcome of a single supervised cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    Failed(String),
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run one cycle with errors and panics converted into a failed outcome.
///
/// A panic is reported as [`WorkerError::Fault`].
pub async fn run_guarded(worker: &mut dyn StageWorker, status: &StatusHandle) -> CycleOutcome {
    let stage = worker.stage();
    let result = match AssertUnwindSafe(worker.run_cycle(status)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(WorkerError::Fault(format!(
            "panicked: {}",
            panic_message(payload.as_ref())
        ))),
    };

    match result {
        Ok(report) => {
            if report.polled > 0 {
                debug!(
                    "[{}] Cycle done: {} polled, {} committed, {} lost to other workers",
                    stage, report.polled, report.committed, report.lost_races
                );
            }
            CycleOutcome::Completed
        }
        Err(e) => {
            error!("[{}] ❌ Error: {}", stage, e);
            status.error(&e.to_string());
            CycleOutcome::Failed(e.to_string())
        }
    }
}

/// Forever-loop for one worker. Returns when `cancel` fires.
pub async fn supervise(
    mut spec: WorkerSpec,
    status: StatusHandle,
    cancel: CancellationToken,
) -> Stage {
    let stage = spec.worker.stage();
    info!("[{}] Worker started (poll every {:?})", stage, spec.poll_interval);

    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = run_guarded(spec.worker.as_mut(), &status) => outcome,
        };

        let pause = match outcome {
            CycleOutcome::Completed => spec.poll_interval,
            CycleOutcome::Failed(_) => spec.backoff,
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }

    status.stopped();
    info!("[{}] Worker stopped", stage);
    stage
}

/// Owns the status board and the supervised worker loops.
pub struct PipelineSupervisor {
    board: Arc<StatusBoard>,
    specs: Vec<WorkerSpec>,
}

impl Default for PipelineSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineSupervisor {
    pub fn new() -> Self {
        Self {
            board: Arc::new(StatusBoard::new()),
            specs: Vec::new(),
        }
    }

    pub fn with_worker(mut self, spec: WorkerSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Shared board for status readers (API, SSE).
    pub fn status_board(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.board)
    }

    /// Spawn every worker loop onto `tasks`. Each task yields its stage when
    /// it stops.
    pub fn spawn(self, tasks: &mut JoinSet<Stage>, cancel: &CancellationToken) {
        for spec in self.specs {
            let status = self.board.handle(spec.worker.stage());
            tasks.spawn(supervise(spec, status, cancel.clone()));
        }
    }

    /// Run all workers until `cancel` fires and every loop has exited.
    pub async fn run(self, cancel: CancellationToken) {
        info!("🔒 [Supervisor] Starting {} stage workers", self.specs.len());
        let mut tasks = JoinSet::new();
        self.spawn(&mut tasks, &cancel);

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(stage) => info!("🔒 [Supervisor] {} loop exited", stage),
                Err(e) => error!("🔒 [Supervisor] Worker task aborted: {}", e),
            }
        }
        info!("🔒 [Supervisor] All workers stopped");
    }
}
