use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::catalog::ProviderKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenEstimate {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRecord {
    pub chunk_index: usize,
    pub provider: ProviderKind,
    pub model: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// `None` when the model is billed by subscription.
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunningTotals {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub cost: f64,
    pub requests: usize,
}

impl RunningTotals {
    pub fn total_tokens(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

/// Largest single request seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeakContext {
    pub tokens: usize,
    pub chunk_index: usize,
    /// Cumulative tokens for the run when the peak was reached.
    pub at_total_tokens: usize,
}

#[derive(Default)]
struct LedgerState {
    records: Vec<UsageRecord>,
    totals: RunningTotals,
    peak: Option<PeakContext>,
}

#[derive(Default)]
pub struct UsageLedger {
    state: Mutex<LedgerState>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic in another chunk task must not lose the accounting.
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a record and returns the totals including it.
    pub fn record(&self, record: UsageRecord) -> RunningTotals {
        let mut state = self.lock();
        state.totals.input_tokens += record.input_tokens;
        state.totals.output_tokens += record.output_tokens;
        state.totals.cost += record.cost.unwrap_or(0.0);
        state.totals.requests += 1;
        let context = record.input_tokens + record.output_tokens;
        let at_total_tokens = state.totals.total_tokens();
        if state.peak.is_none_or(|p| context > p.tokens) {
            state.peak = Some(PeakContext {
                tokens: context,
                chunk_index: record.chunk_index,
                at_total_tokens,
            });
        }
        state.records.push(record);
        state.totals
    }

    pub fn running_totals(&self) -> RunningTotals {
        self.lock().totals
    }

    pub fn peak(&self) -> Option<PeakContext> {
        self.lock().peak
    }

    /// Snapshot of every record, in the order they were appended.
    pub fn records(&self) -> Vec<UsageRecord> {
        self.lock().records.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }
}
