//! Verdict aggregation and the conformance report.
//!
//! The [`Aggregator`] is the only shared mutable state in a run. Workers call
//! [`Aggregator::record`] concurrently; the report groups verdicts by fixture
//! in registered order and keeps each fixture's verdicts in record order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::assertion::{Verdict, VerdictOutcome};
use crate::error_code::{FE_ATTR_ENGINE_FAULT, StableErrorCode};

/// Ordinals handed to fixtures that were never registered start here, so
/// they sort after every registered fixture in first-seen order.
const UNREGISTERED_ORDINAL_BASE: u64 = 1 << 32;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntry {
    pub fixture_id: String,
    pub assertion_index: u32,
    pub outcome: VerdictOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&Verdict> for ReportEntry {
    fn from(verdict: &Verdict) -> Self {
        let context = verdict.context();
        Self {
            fixture_id: context.fixture_id.clone(),
            assertion_index: context.assertion_index,
            outcome: verdict.outcome(),
            message: verdict.message().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
}

impl ReportSummary {
    fn tally(entries: &[ReportEntry]) -> Self {
        let mut summary = Self {
            total: entries.len(),
            ..Self::default()
        };
        for entry in entries {
            match entry.outcome {
                VerdictOutcome::Pass => summary.passed += 1,
                VerdictOutcome::Fail => summary.failed += 1,
                VerdictOutcome::Error => summary.errored += 1,
            }
        }
        summary
    }
}

/// Finalized conformance report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub entries: Vec<ReportEntry>,
    pub summary: ReportSummary,
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incomplete_reason: Option<String>,
}

impl Report {
    /// Pretty-printed JSON, newline-terminated.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn is_green(&self) -> bool {
        self.complete && self.summary.failed == 0 && self.summary.errored == 0
    }

    /// Process exit status for this report.
    pub fn exit_code(&self) -> i32 {
        if self.is_green() { 0 } else { 1 }
    }

    pub fn enforce_ci_gate(&self) -> Result<(), AttributeCiGateError> {
        if self.is_green() {
            Ok(())
        } else {
            Err(AttributeCiGateError {
                failed: self.summary.failed,
                errored: self.summary.errored,
                incomplete_reason: if self.complete {
                    None
                } else {
                    Some(self.incomplete_reason.clone().unwrap_or_default())
                },
            })
        }
    }

    /// Entries belonging to one fixture, in record order.
    pub fn entries_for<'a>(&'a self, fixture_id: &'a str) -> impl Iterator<Item = &'a ReportEntry> {
        self.entries
            .iter()
            .filter(move |entry| entry.fixture_id == fixture_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeCiGateError {
    pub failed: usize,
    pub errored: usize,
    pub incomplete_reason: Option<String>,
}

impl fmt::Display for AttributeCiGateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attribute conformance gate failed: failed={}, errored={}",
            self.failed, self.errored
        )?;
        if let Some(reason) = &self.incomplete_reason {
            write!(f, ", incomplete ({reason})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AttributeCiGateError {}

// ---------------------------------------------------------------------------
// EngineFault
// ---------------------------------------------------------------------------

/// Misuse of the aggregator. Fatal to the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum EngineFault {
    #[error("invalid aggregator state: {0}")]
    InvalidState(String),
    #[error("fixture `{fixture_id}` registered twice")]
    DuplicateFixture { fixture_id: String },
    #[error("aggregator lock poisoned")]
    Poisoned,
}

impl StableErrorCode for EngineFault {
    fn code(&self) -> &'static str {
        FE_ATTR_ENGINE_FAULT
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct AggregatorState {
    ordinals: BTreeMap<String, u64>,
    next_unregistered: u64,
    by_ordinal: BTreeMap<u64, Vec<Verdict>>,
    finalized: Option<Report>,
}

impl AggregatorState {
    fn ordinal_for(&mut self, fixture_id: &str) -> u64 {
        if let Some(ordinal) = self.ordinals.get(fixture_id) {
            return *ordinal;
        }
        let ordinal = UNREGISTERED_ORDINAL_BASE + self.next_unregistered;
        self.next_unregistered += 1;
        self.ordinals.insert(fixture_id.to_string(), ordinal);
        ordinal
    }

    fn build(&self, incomplete_reason: Option<String>) -> Report {
        let entries: Vec<ReportEntry> = self
            .by_ordinal
            .values()
            .flatten()
            .map(ReportEntry::from)
            .collect();
        Report {
            summary: ReportSummary::tally(&entries),
            entries,
            complete: incomplete_reason.is_none(),
            incomplete_reason,
        }
    }
}

/// Thread-safe verdict sink.
#[derive(Debug, Default)]
pub struct Aggregator {
    state: Mutex<AggregatorState>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, AggregatorState>, EngineFault> {
        self.state.lock().map_err(|_| EngineFault::Poisoned)
    }

    /// Pin `fixture_id` to `ordinal` in the final report order.
    pub fn register_fixture(&self, fixture_id: &str, ordinal: u32) -> Result<(), EngineFault> {
        let mut state = self.lock()?;
        if state.finalized.is_some() {
            return Err(EngineFault::InvalidState(format!(
                "register_fixture({fixture_id}) after finalize"
            )));
        }
        if state.ordinals.contains_key(fixture_id) {
            return Err(EngineFault::DuplicateFixture {
                fixture_id: fixture_id.to_string(),
            });
        }
        state.ordinals.insert(fixture_id.to_string(), u64::from(ordinal));
        Ok(())
    }

    pub fn record(&self, verdict: Verdict) -> Result<(), EngineFault> {
        let mut state = self.lock()?;
        if state.finalized.is_some() {
            return Err(EngineFault::InvalidState(format!(
                "record({}) after finalize",
                verdict.context()
            )));
        }
        let ordinal = state.ordinal_for(&verdict.context().fixture_id);
        state.by_ordinal.entry(ordinal).or_default().push(verdict);
        Ok(())
    }

    /// Close the aggregator. Repeated calls return the same report.
    pub fn finalize(&self) -> Result<Report, EngineFault> {
        self.close(None)
    }

    /// Close the aggregator with whatever was recorded so far, flagged
    /// incomplete. No-op if already finalized.
    pub fn finalize_partial(&self, reason: impl Into<String>) -> Result<Report, EngineFault> {
        self.close(Some(reason.into()))
    }

    fn close(&self, incomplete_reason: Option<String>) -> Result<Report, EngineFault> {
        let mut state = self.lock()?;
        if let Some(report) = &state.finalized {
            return Ok(report.clone());
        }
        let report = state.build(incomplete_reason);
        state.finalized = Some(report.clone());
        Ok(report)
    }

    pub fn is_finalized(&self) -> bool {
        self.lock().is_ok_and(|state| state.finalized.is_some())
    }

    /// Number of verdicts recorded so far.
    pub fn recorded(&self) -> usize {
        self.lock()
            .map(|state| state.by_ordinal.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}
