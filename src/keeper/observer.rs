//! Observability handle for cycle and operation records.
//!
//! One `Observer` is built at startup and shared by reference (`Arc`) with
//! the keeper and the health server. Records go to a pluggable sink:
//! [`TracingSink`] in production, an in-memory sink in tests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::keeper::outcome::{
    CycleOutcome, OperationKind, OperationOutcome, Settlement, SkipReason,
};
use crate::onchain_instance::StateSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Executed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationRecord {
    pub timestamp: DateTime<Utc>,
    pub cycle_id: Uuid,
    pub kind: OperationKind,
    pub status: RecordStatus,
    pub amount: u64,
    pub quoted_out: Option<u64>,
    pub executed_out: Option<u64>,
    pub price_impact_bps: Option<u16>,
    pub reference: Option<String>,
    pub detail: Option<String>,
    pub simulated: bool,
}

impl OperationRecord {
    fn base(cycle_id: Uuid, kind: OperationKind, amount: u64, simulated: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            cycle_id,
            kind,
            status: RecordStatus::Executed,
            amount,
            quoted_out: None,
            executed_out: None,
            price_impact_bps: None,
            reference: None,
            detail: None,
            simulated,
        }
    }

    pub fn from_outcome(
        cycle_id: Uuid,
        kind: OperationKind,
        amount: u64,
        outcome: &OperationOutcome,
        simulated: bool,
    ) -> Self {
        match outcome {
            OperationOutcome::Executed(settlement) => {
                Self::executed(cycle_id, kind, amount, settlement)
            }
            OperationOutcome::Skipped(reason) => Self {
                status: RecordStatus::Skipped,
                price_impact_bps: match reason {
                    SkipReason::SlippageExceeded { price_impact_bps, .. } => {
                        Some(*price_impact_bps)
                    }
                    _ => None,
                },
                detail: Some(reason.to_string()),
                ..Self::base(cycle_id, kind, amount, simulated)
            },
        }
    }

    pub fn executed(
        cycle_id: Uuid,
        kind: OperationKind,
        amount: u64,
        settlement: &Settlement,
    ) -> Self {
        Self {
            quoted_out: settlement.quoted_out,
            executed_out: Some(settlement.executed_out),
            price_impact_bps: settlement.price_impact_bps,
            reference: Some(settlement.reference.clone()),
            ..Self::base(cycle_id, kind, amount, settlement.simulated)
        }
    }

    pub fn failed(
        cycle_id: Uuid,
        kind: OperationKind,
        amount: u64,
        error: &str,
        simulated: bool,
    ) -> Self {
        Self {
            status: RecordStatus::Failed,
            detail: Some(error.to_string()),
            ..Self::base(cycle_id, kind, amount, simulated)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleRecord {
    pub timestamp: DateTime<Utc>,
    pub cycle_id: Uuid,
    pub outcome: CycleOutcome,
    pub state_source: Option<StateSource>,
    pub duration_ms: u64,
    pub simulated: bool,
}

pub trait RecordSink: Send + Sync {
    fn operation(&self, record: &OperationRecord);
    fn cycle(&self, record: &CycleRecord);
}

/// Emits every record as a structured `tracing` event.
pub struct TracingSink;

impl RecordSink for TracingSink {
    fn operation(&self, record: &OperationRecord) {
        let json = serde_json::to_string(record).unwrap_or_default();
        match record.status {
            RecordStatus::Executed => info!(
                cycle_id = %record.cycle_id,
                kind = %record.kind,
                amount = record.amount,
                quoted_out = ?record.quoted_out,
                executed_out = ?record.executed_out,
                price_impact_bps = ?record.price_impact_bps,
                reference = ?record.reference,
                simulated = record.simulated,
                record = %json,
                "Operation executed"
            ),
            RecordStatus::Skipped => warn!(
                cycle_id = %record.cycle_id,
                kind = %record.kind,
                amount = record.amount,
                price_impact_bps = ?record.price_impact_bps,
                detail = ?record.detail,
                simulated = record.simulated,
                record = %json,
                "Operation skipped"
            ),
            RecordStatus::Failed => error!(
                cycle_id = %record.cycle_id,
                kind = %record.kind,
                amount = record.amount,
                detail = ?record.detail,
                simulated = record.simulated,
                record = %json,
                "Operation failed"
            ),
        }
    }

    fn cycle(&self, record: &CycleRecord) {
        let json = serde_json::to_string(record).unwrap_or_default();
        if let CycleOutcome::Failed { error } = &record.outcome {
            error!(
                cycle_id = %record.cycle_id,
                outcome = record.outcome.label(),
                duration_ms = record.duration_ms,
                simulated = record.simulated,
                record = %json,
                "Cycle failed: {}",
                error
            );
        } else {
            info!(
                cycle_id = %record.cycle_id,
                outcome = record.outcome.label(),
                duration_ms = record.duration_ms,
                simulated = record.simulated,
                record = %json,
                "Cycle finished"
            );
        }
    }
}

pub struct Observer {
    sink: Arc<dyn RecordSink>,
    last_cycle: RwLock<Option<CycleRecord>>,
}

impl Observer {
    pub fn new(sink: Arc<dyn RecordSink>) -> Self {
        Self { sink, last_cycle: RwLock::new(None) }
    }

    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink))
    }

    pub fn operation(&self, record: OperationRecord) {
        self.sink.operation(&record);
    }

    pub fn cycle(&self, record: CycleRecord) {
        self.sink.cycle(&record);
        *self.last_cycle.write() = Some(record);
    }

    pub fn last_cycle(&self) -> Option<CycleRecord> {
        self.last_cycle.read().clone()
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct MemorySink {
    pub operations: parking_lot::Mutex<Vec<OperationRecord>>,
    pub cycles: parking_lot::Mutex<Vec<CycleRecord>>,
}

#[cfg(test)]
impl RecordSink for MemorySink {
    fn operation(&self, record: &OperationRecord) {
        self.operations.lock().push(record.clone());
    }

    fn cycle(&self, record: &CycleRecord) {
        self.cycles.lock().push(record.clone());
    }
}
