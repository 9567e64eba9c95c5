// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory stage idempotency ledger and in-flight set.
//!
//! The ledger lives for the process lifetime only. After a restart, effective
//! state is rebuilt from what the backend reports: a TRANSACTION-phase memo
//! implies an earlier payment request, a populated deliverable implies an
//! earlier delivery. Mutations happen only inside the per-job critical
//! section established by [`StageLedger::begin`].

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Which side-effect bundles have been performed for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageRecord {
    /// Accept + payment request were issued (or observed as already done).
    pub accepted: bool,
    /// The deliverable was submitted (or observed as already present).
    pub delivered: bool,
}

/// Process-wide idempotency map plus the in-flight set that serializes
/// dispatcher invocations per job id.
#[derive(Debug, Default)]
pub struct StageLedger {
    records: Mutex<HashMap<u64, StageRecord>>,
    in_flight: Mutex<HashSet<u64>>,
}

impl StageLedger {
    /// Empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the per-job critical section. Returns `false` when another
    /// invocation for the same job is already in flight.
    pub fn begin(&self, job_id: u64) -> bool {
        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .insert(job_id)
    }

    /// Leave the per-job critical section.
    pub fn finish(&self, job_id: u64) {
        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .remove(&job_id);
    }

    /// Whether a dispatcher invocation for this job is in flight.
    #[must_use]
    pub fn is_in_flight(&self, job_id: u64) -> bool {
        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .contains(&job_id)
    }

    /// Snapshot of a job's stage record.
    #[must_use]
    pub fn record(&self, job_id: u64) -> StageRecord {
        self.records
            .lock()
            .expect("ledger lock poisoned")
            .get(&job_id)
            .copied()
            .unwrap_or_default()
    }

    /// Mark the accept stage done.
    pub fn mark_accepted(&self, job_id: u64) {
        self.records
            .lock()
            .expect("ledger lock poisoned")
            .entry(job_id)
            .or_default()
            .accepted = true;
    }

    /// Whether the accept stage is done.
    #[must_use]
    pub fn is_accepted(&self, job_id: u64) -> bool {
        self.record(job_id).accepted
    }

    /// Mark the deliver stage done.
    pub fn mark_delivered(&self, job_id: u64) {
        self.records
            .lock()
            .expect("ledger lock poisoned")
            .entry(job_id)
            .or_default()
            .delivered = true;
    }

    /// Whether the deliver stage is done.
    #[must_use]
    pub fn is_delivered(&self, job_id: u64) -> bool {
        self.record(job_id).delivered
    }
}
