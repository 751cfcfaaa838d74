//! Insight stage — timer-driven summaries of the aggregate snapshot
//!
//! Not claim-based. Every cycle reads a fresh snapshot and asks the
//! [`ChangeDetector`] whether anything worth reporting happened since the
//! last emitted insight.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::worker::{CycleReport, StageWorker, WorkerError};
use crate::aggregator;
use crate::llm::{self, InsightGenerator};
use crate::pipeline::StatusHandle;
use crate::storage::EventStore;
use crate::types::{NewInsight, Snapshot, Stage, INSIGHT_TYPE_REAL_TIME};

/// Decides when a snapshot warrants a new insight.
///
/// Fires on the first snapshot, when `issues_detected` rose, or when
/// `total_events` grew by at least the configured delta. The reference
/// snapshot only moves when an insight is actually emitted.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    last: Option<Snapshot>,
    event_delta_threshold: u64,
}

impl ChangeDetector {
    pub fn new(event_delta_threshold: u64) -> Self {
        Self {
            last: None,
            event_delta_threshold,
        }
    }

    pub fn should_emit(&self, current: &Snapshot) -> bool {
        if current.total_events == 0 {
            return false;
        }
        let Some(last) = self.last else {
            return true;
        };
        current.issues_detected > last.issues_detected
            || current.total_events.saturating_sub(last.total_events) >= self.event_delta_threshold
    }

    pub fn record(&mut self, emitted: Snapshot) {
        self.last = Some(emitted);
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.last.as_ref()
    }
}

pub struct InsightAgent {
    store: Arc<dyn EventStore>,
    generator: Arc<dyn InsightGenerator>,
    detector: ChangeDetector,
    llm_timeout: Duration,
    insights_generated: u64,
}

impl InsightAgent {
    pub fn new(
        store: Arc<dyn EventStore>,
        generator: Arc<dyn InsightGenerator>,
        event_delta_threshold: u64,
        llm_timeout: Duration,
    ) -> Self {
        Self {
            store,
            generator,
            detector: ChangeDetector::new(event_delta_threshold),
            llm_timeout,
            insights_generated: 0,
        }
    }

    pub fn insights_generated(&self) -> u64 {
        self.insights_generated
    }

    fn monitoring_status(&self) -> String {
        format!("Monitoring | {} insights generated", self.insights_generated)
    }
}

#[async_trait]
impl StageWorker for InsightAgent {
    fn stage(&self) -> Stage {
        Stage::Insight
    }

    async fn run_cycle(&mut self, status: &StatusHandle) -> Result<CycleReport, WorkerError> {
        status.polling();
        let snapshot = aggregator::snapshot(self.store.as_ref())?;

        if !self.detector.should_emit(&snapshot) {
            status.idle(self.monitoring_status());
            return Ok(CycleReport::default());
        }

        status.processing(1, "Generating insight...".to_string());
        info!("[Insight] 💡 Generating insight...");

        let text =
            llm::generate_with_fallback(self.generator.as_ref(), &snapshot, self.llm_timeout).await;

        self.store.insert_insight(NewInsight {
            insight_type: INSIGHT_TYPE_REAL_TIME.to_string(),
            text: text.clone(),
            related_sessions: None,
        })?;

        self.insights_generated += 1;
        self.detector.record(snapshot);
        info!("[Insight] {}", text);

        status.idle(self.monitoring_status());
        Ok(CycleReport {
            polled: 1,
            committed: 1,
            lost_races: 0,
        })
    }
}
