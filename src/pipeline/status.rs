//! Last-known worker status, shared between workers and readers
//!
//! Each stage owns one slot. Workers publish through a [`StatusHandle`];
//! dashboards read a consistent copy of every slot without blocking writers.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::Stage;

/// Message every slot starts with before its worker runs a cycle.
pub const INITIAL_STATUS: &str = "Starting...";

/// Coarse worker state, mirroring the stage state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "batch", rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Polling,
    Processing(usize),
    Error,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    #[serde(flatten)]
    pub state: WorkerState,
    /// Human-readable status line
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl WorkerStatus {
    fn new(state: WorkerState, message: String) -> Self {
        Self {
            state,
            message,
            updated_at: Utc::now(),
        }
    }
}

/// One status slot per stage.
pub struct StatusBoard {
    slots: BTreeMap<Stage, ArcSwap<WorkerStatus>>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let slots = Stage::ALL
            .into_iter()
            .map(|stage| {
                let initial = WorkerStatus::new(WorkerState::Idle, INITIAL_STATUS.to_string());
                (stage, ArcSwap::from_pointee(initial))
            })
            .collect();
        Self { slots }
    }

    /// Publishing handle for `stage`.
    pub fn handle(self: &Arc<Self>, stage: Stage) -> StatusHandle {
        StatusHandle {
            board: Arc::clone(self),
            stage,
        }
    }

    pub fn get(&self, stage: Stage) -> Option<WorkerStatus> {
        self.slots.get(&stage).map(|slot| (**slot.load()).clone())
    }

    /// Stage → full status, in pipeline order.
    pub fn all(&self) -> BTreeMap<Stage, WorkerStatus> {
        self.slots
            .iter()
            .map(|(stage, slot)| (*stage, (**slot.load()).clone()))
            .collect()
    }

    /// Stage → status line.
    pub fn messages(&self) -> BTreeMap<Stage, String> {
        self.slots
            .iter()
            .map(|(stage, slot)| (*stage, slot.load().message.clone()))
            .collect()
    }

    fn store(&self, stage: Stage, state: WorkerState, message: String) {
        if let Some(slot) = self.slots.get(&stage) {
            slot.store(Arc::new(WorkerStatus::new(state, message)));
        }
    }

    fn set_state(&self, stage: Stage, state: WorkerState) {
        if let Some(slot) = self.slots.get(&stage) {
            slot.rcu(|current| WorkerStatus::new(state, current.message.clone()));
        }
    }
}

/// Write access to a single stage's slot.
#[derive(Clone)]
pub struct StatusHandle {
    board: Arc<StatusBoard>,
    stage: Stage,
}

impl StatusHandle {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Entering POLLING keeps the previous message visible.
    pub fn polling(&self) {
        self.board.set_state(self.stage, WorkerState::Polling);
    }

    pub fn processing(&self, batch: usize, message: String) {
        self.board
            .store(self.stage, WorkerState::Processing(batch), message);
    }

    pub fn idle(&self, message: String) {
        self.board.store(self.stage, WorkerState::Idle, message);
    }

    pub fn error(&self, error: &str) {
        self.board
            .store(self.stage, WorkerState::Error, format!("Error: {error}"));
    }

    pub fn stopped(&self) {
        self.board
            .store(self.stage, WorkerState::Stopped, "Stopped".to_string());
    }

    pub fn current(&self) -> Option<WorkerStatus> {
        self.board.get(self.stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_status() {
        let board = StatusBoard::new();
        let messages = board.messages();
        assert_eq!(messages.len(), 3);
        assert!(messages.values().all(|m| m == INITIAL_STATUS));
    }

    #[test]
    fn test_handle_updates_only_its_stage() {
        let board = Arc::new(StatusBoard::new());
        let handle = board.handle(Stage::Redactor);

        handle.processing(4, "Redacting 4 sessions".to_string());
        let status = board.get(Stage::Redactor).unwrap();
        assert_eq!(status.state, WorkerState::Processing(4));
        assert_eq!(status.message, "Redacting 4 sessions");
        assert_eq!(board.get(Stage::Validator).unwrap().message, INITIAL_STATUS);
    }

    #[test]
    fn test_polling_keeps_message() {
        let board = Arc::new(StatusBoard::new());
        let handle = board.handle(Stage::Validator);
        handle.idle("Validated 3 events | Found 1 issues".to_string());
        handle.polling();

        let status = handle.current().unwrap();
        assert_eq!(status.state, WorkerState::Polling);
        assert_eq!(status.message, "Validated 3 events | Found 1 issues");
    }

    #[test]
    fn test_error_prefix() {
        let board = Arc::new(StatusBoard::new());
        let handle = board.handle(Stage::Insight);
        handle.error("disk full");
        assert_eq!(board.messages()[&Stage::Insight], "Error: disk full");
        assert_eq!(handle.current().unwrap().state, WorkerState::Error);
    }

    #[test]
    fn test_status_serializes_flat() {
        let status = WorkerStatus::new(WorkerState::Processing(2), "x".to_string());
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "processing");
        assert_eq!(json["batch"], 2);
        assert_eq!(json["message"], "x");
    }
}
