//! Cooperative cancellation checkpoints.
//!
//! Fixtures are synchronous, so the only places a runaway fixture can be
//! stopped are the probe calls it makes. Every probe passes through a
//! [`Checkpoint`] that observes the run-wide [`CancellationToken`], the
//! fixture's own token (tripped by the runner's watchdog on timeout) and the
//! fixture deadline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Shared cancellation signal.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a checkpoint refused to let the fixture continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointInterrupt {
    #[error("run cancelled")]
    RunCancelled,
    #[error("fixture cancelled by watchdog")]
    FixtureCancelled,
    #[error("fixture exceeded its {budget_ms}ms budget")]
    DeadlineExceeded { budget_ms: u64 },
}

/// Per-fixture checkpoint.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    run: CancellationToken,
    fixture: CancellationToken,
    deadline: Option<(Instant, Duration)>,
}

impl Checkpoint {
    /// A checkpoint that never interrupts.
    pub fn unbounded() -> Self {
        Self {
            run: CancellationToken::new(),
            fixture: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn new(run: CancellationToken, fixture: CancellationToken, budget: Option<Duration>) -> Self {
        Self {
            run,
            fixture,
            deadline: budget
                .and_then(|budget| Instant::now().checked_add(budget).map(|at| (at, budget))),
        }
    }

    pub fn check(&self) -> Result<(), CheckpointInterrupt> {
        if self.fixture.is_cancelled() {
            return Err(CheckpointInterrupt::FixtureCancelled);
        }
        if self.run.is_cancelled() {
            return Err(CheckpointInterrupt::RunCancelled);
        }
        if let Some((deadline, budget)) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(CheckpointInterrupt::DeadlineExceeded {
                budget_ms: budget_ms(budget),
            });
        }
        Ok(())
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
pub fn budget_ms(budget: Duration) -> u64 {
    u64::try_from(budget.as_millis()).unwrap_or(u64::MAX)
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::unbounded()
    }
}
