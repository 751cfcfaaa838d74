//! Generic stage worker: poll → transform → emit → claim
//!
//! A claim-based stage only describes *what* it reads, how it transforms a
//! row, and where it writes the result. [`ClaimWorker`] owns the cycle:
//!
//! ```text
//! IDLE → POLLING → PROCESSING(n) → IDLE
//!           ↓ store error
//!        ERROR(e) → (supervisor backoff) → IDLE
//! ```
//!
//! The output record is emitted before the input row is claimed. Emits are
//! idempotent per source row, so a failure between the two leaves the row
//! eligible and the next cycle completes it without a duplicate.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::pipeline::StatusHandle;
use crate::storage::{EventStore, StoreError};
use crate::types::{Claim, Stage};

/// Failure of a whole worker cycle. Row-level validation issues are data,
/// never errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("row {row_id} left unclaimed: {source}")]
    Row { row_id: u64, source: StoreError },
    #[error("worker fault: {0}")]
    Fault(String),
}

/// Counters for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Rows returned by the poll
    pub polled: usize,
    /// Rows emitted and claimed in this cycle
    pub committed: usize,
    /// Rows another worker claimed first
    pub lost_races: usize,
}

/// One supervised pipeline stage.
#[async_trait]
pub trait StageWorker: Send {
    fn stage(&self) -> Stage;

    /// Run a single poll cycle, publishing progress through `status`.
    async fn run_cycle(&mut self, status: &StatusHandle) -> Result<CycleReport, WorkerError>;
}

/// A stage that consumes rows through the per-stage claim flag.
pub trait ClaimingStage: Send {
    type Input: Send + Sync;
    type Output: Send + Sync;

    const STAGE: Stage;

    /// Unclaimed input rows, oldest first.
    fn poll(&self, store: &dyn EventStore) -> Result<Vec<Self::Input>, StoreError>;

    /// Id of the input row the claim flag lives on.
    fn row_id(input: &Self::Input) -> u64;

    /// Pure, idempotent transformation. No I/O, no shared state.
    fn transform(&self, input: &Self::Input) -> Self::Output;

    /// Persist the derived record for `input`.
    fn emit(
        &self,
        store: &dyn EventStore,
        input: &Self::Input,
        output: &Self::Output,
    ) -> Result<u64, StoreError>;

    /// Update running counters after a committed row.
    fn observe(&mut self, input: &Self::Input, output: &Self::Output);

    fn busy_status(&self, batch: usize) -> String;

    fn idle_status(&self) -> String;

    fn summary_status(&self) -> String;
}

/// Drives a [`ClaimingStage`] against a store.
pub struct ClaimWorker<S: ClaimingStage> {
    stage: S,
    store: Arc<dyn EventStore>,
}

impl<S: ClaimingStage> ClaimWorker<S> {
    pub fn new(stage: S, store: Arc<dyn EventStore>) -> Self {
        Self { stage, store }
    }

    pub fn stage_logic(&self) -> &S {
        &self.stage
    }

    fn commit(&self, input: &S::Input, output: &S::Output) -> Result<Claim, StoreError> {
        self.stage.emit(self.store.as_ref(), input, output)?;
        self.store.claim(S::STAGE, S::row_id(input))
    }
}

#[async_trait]
impl<S: ClaimingStage> StageWorker for ClaimWorker<S> {
    fn stage(&self) -> Stage {
        S::STAGE
    }

    async fn run_cycle(&mut self, status: &StatusHandle) -> Result<CycleReport, WorkerError> {
        status.polling();
        let batch = self.stage.poll(self.store.as_ref())?;

        let mut report = CycleReport {
            polled: batch.len(),
            ..CycleReport::default()
        };

        if batch.is_empty() {
            status.idle(self.stage.idle_status());
            return Ok(report);
        }

        status.processing(batch.len(), self.stage.busy_status(batch.len()));
        debug!("[{}] Found {} rows to process", S::STAGE, batch.len());

        for input in &batch {
            let row_id = S::row_id(input);
            let output = self.stage.transform(input);

            match self.commit(input, &output) {
                Ok(Claim::Claimed) => {
                    self.stage.observe(input, &output);
                    report.committed += 1;
                }
                Ok(Claim::AlreadyClaimed) => {
                    debug!("[{}] Row {} already claimed elsewhere", S::STAGE, row_id);
                    report.lost_races += 1;
                }
                Err(source) => {
                    // Later rows wait for the next cycle so input order is kept
                    warn!(
                        stage = %S::STAGE,
                        row_id,
                        error = %source,
                        "Row left unclaimed, will retry next cycle"
                    );
                    status.idle(self.stage.summary_status());
                    return Err(WorkerError::Row { row_id, source });
                }
            }
        }

        status.idle(self.stage.summary_status());
        Ok(report)
    }
}
