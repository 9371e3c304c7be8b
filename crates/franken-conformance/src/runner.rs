//! Fixture runner: isolation, worker pool, timeouts, and run summary.
//!
//! Each fixture runs on its own thread against a freshly built realm. The
//! worker that dispatched it waits up to the fixture budget; past that the
//! fixture's cancellation token is tripped, a timeout verdict is recorded,
//! and the worker moves on. An abandoned fixture thread stops at its next
//! checkpoint and its verdicts are discarded.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::aggregator::{Aggregator, AttributeCiGateError, EngineFault, Report};
use crate::assertion::{AssertionContext, Verdict};
use crate::catalog::{CatalogError, FixtureCatalog};
use crate::checkpoint::{CancellationToken, Checkpoint, CheckpointInterrupt};
use crate::error_code::{
    FE_ATTR_FIXTURE_FAULT, FE_ATTR_INVALID_CATALOG, FE_ATTR_INVALID_CONFIG, FE_ATTR_TIMEOUT,
    StableErrorCode,
};
use crate::evidence::{canonical_json_bytes, sha256_hex};
use crate::fixture::{Fixture, FixtureAbort, FixtureContext, settle};
use crate::probe::ProbeError;
use crate::realm::{ConformanceRealm, Realm};

const COMPONENT: &str = "attribute_conformance_runner";

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeRunnerConfig {
    pub trace_prefix: String,
    pub policy_id: String,
    pub worker_count: usize,
    pub fixture_timeout_ms: u64,
    pub run_date: String,
}

impl Default for AttributeRunnerConfig {
    fn default() -> Self {
        Self {
            trace_prefix: "trace-attribute-conformance".to_string(),
            policy_id: "policy-attribute-conformance-v1".to_string(),
            worker_count: 4,
            fixture_timeout_ms: 5_000,
            run_date: "1970-01-01".to_string(),
        }
    }
}

impl AttributeRunnerConfig {
    pub const MAX_WORKERS: usize = 256;

    /// Read a TOML config; keys left out keep their defaults.
    pub fn load_toml(path: impl AsRef<Path>) -> Result<Self, AttributeRunError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|err| {
            AttributeRunError::InvalidConfig(format!(
                "failed to read config {}: {err}",
                path.display()
            ))
        })?;
        let config: Self = toml::from_str(&content)
            .map_err(|err| AttributeRunError::InvalidConfig(format!("invalid config TOML: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AttributeRunError> {
        if self.trace_prefix.trim().is_empty() {
            return Err(AttributeRunError::InvalidConfig(
                "trace_prefix is required".to_string(),
            ));
        }
        if self.policy_id.trim().is_empty() {
            return Err(AttributeRunError::InvalidConfig(
                "policy_id is required".to_string(),
            ));
        }
        if self.worker_count == 0 || self.worker_count > Self::MAX_WORKERS {
            return Err(AttributeRunError::InvalidConfig(format!(
                "worker_count must be in 1..={}",
                Self::MAX_WORKERS
            )));
        }
        if self.fixture_timeout_ms == 0 {
            return Err(AttributeRunError::InvalidConfig(
                "fixture_timeout_ms must be >= 1".to_string(),
            ));
        }
        if NaiveDate::parse_from_str(self.run_date.trim(), "%Y-%m-%d").is_err() {
            return Err(AttributeRunError::InvalidConfig(format!(
                "run_date `{}` is not YYYY-MM-DD",
                self.run_date
            )));
        }
        Ok(())
    }

    pub fn fixture_budget(&self) -> Duration {
        Duration::from_millis(self.fixture_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttributeRunError {
    #[error("invalid attribute runner config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("fixture `{0}` submitted more than once")]
    DuplicateFixture(String),
    #[error("worker {0} panicked outside fixture isolation")]
    WorkerPanicked(usize),
    #[error("{0} fixtures exceed the ordinal range")]
    TooManyFixtures(usize),
}

impl StableErrorCode for AttributeRunError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => FE_ATTR_INVALID_CONFIG,
            Self::Catalog(_) | Self::DuplicateFixture(_) | Self::TooManyFixtures(_) => {
                FE_ATTR_INVALID_CATALOG
            }
            Self::WorkerPanicked(_) => FE_ATTR_FIXTURE_FAULT,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeLogEvent {
    pub trace_id: String,
    pub decision_id: String,
    pub policy_id: String,
    pub component: String,
    pub event: String,
    pub outcome: String,
    pub error_code: Option<String>,
    pub fixture_id: Option<String>,
    pub assertion_index: Option<u32>,
    pub worker_index: Option<usize>,
    pub duration_us: u64,
    pub error_detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicWorkerAssignment {
    pub fixture_id: String,
    pub worker_index: usize,
    pub queue_index: usize,
}

/// Round-robin over fixture ids in sorted order, so the same fixture set
/// always lands on the same workers.
pub fn deterministic_worker_assignments(
    fixture_ids: &[String],
    worker_count: usize,
) -> Vec<DeterministicWorkerAssignment> {
    let mut sorted = fixture_ids.to_vec();
    sorted.sort();

    let workers = worker_count.max(1);
    let mut queue_counts = vec![0usize; workers];
    let mut out = Vec::with_capacity(sorted.len());
    for (idx, fixture_id) in sorted.into_iter().enumerate() {
        let worker_index = idx % workers;
        let queue_index = queue_counts[worker_index];
        queue_counts[worker_index] += 1;
        out.push(DeterministicWorkerAssignment {
            fixture_id,
            worker_index,
            queue_index,
        });
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRunSummary {
    pub run_id: String,
    pub fixture_set_hash: String,
    pub policy_id: String,
    pub run_date: String,
    pub total_fixtures: usize,
    pub dispatched_fixtures: usize,
    pub timed_out_fixtures: usize,
    pub total_assertions: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub complete: bool,
    pub env_fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRunResult {
    pub run_id: String,
    pub fixture_set_hash: String,
    pub report: Report,
    pub logs: Vec<AttributeLogEvent>,
    pub summary: AttributeRunSummary,
    /// Set when an aggregator fault aborted the run.
    pub engine_fault: Option<EngineFault>,
}

impl AttributeRunResult {
    pub fn enforce_ci_gate(&self) -> Result<(), AttributeCiGateError> {
        self.report.enforce_ci_gate()
    }

    pub fn exit_code(&self) -> i32 {
        self.report.exit_code()
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub type RealmFactory =
    Arc<dyn Fn() -> Result<Box<dyn ConformanceRealm>, ProbeError> + Send + Sync>;

/// Factory for the reference [`Realm`].
pub fn reference_realm_factory() -> RealmFactory {
    Arc::new(|| Ok(Box::new(Realm::new()?) as Box<dyn ConformanceRealm>))
}

struct FixtureExecution {
    verdicts: Vec<Verdict>,
    timed_out: bool,
    /// Stopped by run cancellation; its verdicts are not recorded.
    abandoned: bool,
    duration: Duration,
}

struct IsolatedOutcome {
    verdicts: Vec<Verdict>,
    run_cancelled: bool,
    deadline_exceeded: bool,
}

#[derive(Default)]
struct WorkerOutput {
    events: Vec<(usize, AttributeLogEvent)>,
    dispatched: usize,
    timed_out: usize,
}

pub struct AttributeRunner {
    pub config: AttributeRunnerConfig,
    realm_factory: RealmFactory,
}

impl Default for AttributeRunner {
    fn default() -> Self {
        Self::new(AttributeRunnerConfig::default())
    }
}

impl AttributeRunner {
    pub fn new(config: AttributeRunnerConfig) -> Self {
        Self::with_realm_factory(config, reference_realm_factory())
    }

    pub fn with_realm_factory(config: AttributeRunnerConfig, realm_factory: RealmFactory) -> Self {
        Self {
            config,
            realm_factory,
        }
    }

    pub fn run_catalog(
        &self,
        catalog: &FixtureCatalog,
        cancel: &CancellationToken,
    ) -> Result<AttributeRunResult, AttributeRunError> {
        catalog.validate()?;
        let bytes = canonical_json_bytes(catalog)
            .map_err(|err| CatalogError::Parse(err.to_string()))?;
        self.run_with_hash(&catalog.fixtures(), sha256_hex(&bytes), cancel)
    }

    /// Run `fixtures`; report order follows slice order.
    pub fn run(
        &self,
        fixtures: &[Arc<dyn Fixture>],
        cancel: &CancellationToken,
    ) -> Result<AttributeRunResult, AttributeRunError> {
        let mut ids: Vec<&str> = fixtures.iter().map(|f| f.id()).collect();
        ids.sort_unstable();
        self.run_with_hash(fixtures, sha256_hex(ids.join("\n").as_bytes()), cancel)
    }

    fn run_with_hash(
        &self,
        fixtures: &[Arc<dyn Fixture>],
        fixture_set_hash: String,
        cancel: &CancellationToken,
    ) -> Result<AttributeRunResult, AttributeRunError> {
        self.config.validate()?;

        let aggregator = Aggregator::new();
        let mut seen = BTreeSet::new();
        for (ordinal, fixture) in fixtures.iter().enumerate() {
            if !seen.insert(fixture.id()) {
                return Err(AttributeRunError::DuplicateFixture(fixture.id().to_string()));
            }
            let ordinal = u32::try_from(ordinal)
                .map_err(|_| AttributeRunError::TooManyFixtures(fixtures.len()))?;
            aggregator
                .register_fixture(fixture.id(), ordinal)
                .map_err(|_| AttributeRunError::DuplicateFixture(fixture.id().to_string()))?;
        }

        let run_id = format!(
            "attribute-conformance-{}",
            &sha256_hex(
                format!(
                    "{fixture_set_hash}:{}:{}",
                    self.config.policy_id, self.config.run_date
                )
                .as_bytes()
            )[..16]
        );

        let ids: Vec<String> = fixtures.iter().map(|f| f.id().to_string()).collect();
        let ordinals: BTreeMap<&str, usize> = ids
            .iter()
            .enumerate()
            .map(|(ordinal, id)| (id.as_str(), ordinal))
            .collect();
        let mut queues: Vec<Vec<usize>> = vec![Vec::new(); self.config.worker_count];
        for assignment in deterministic_worker_assignments(&ids, self.config.worker_count) {
            if let Some(ordinal) = ordinals.get(assignment.fixture_id.as_str()) {
                queues[assignment.worker_index].push(*ordinal);
            }
        }

        // Tripped by the caller or by an engine fault; stops dispatch.
        let stop = CancellationToken::new();
        let fault: Mutex<Option<EngineFault>> = Mutex::new(None);
        let mut outputs = Vec::with_capacity(queues.len());

        thread::scope(|scope| {
            let handles: Vec<_> = queues
                .iter()
                .enumerate()
                .map(|(worker_index, queue)| {
                    let (aggregator, stop, fault, run_id) = (&aggregator, &stop, &fault, &run_id);
                    scope.spawn(move || {
                        let mut output = WorkerOutput::default();
                        for &ordinal in queue {
                            if cancel.is_cancelled() || stop.is_cancelled() {
                                break;
                            }
                            let fixture = Arc::clone(&fixtures[ordinal]);
                            let execution = self.execute_fixture(fixture, cancel);
                            if execution.abandoned {
                                break;
                            }
                            output.dispatched += 1;
                            if execution.timed_out {
                                output.timed_out += 1;
                            }
                            for verdict in execution.verdicts {
                                let event = self.verdict_event(
                                    run_id,
                                    ordinal,
                                    worker_index,
                                    &verdict,
                                    execution.duration,
                                );
                                if let Err(err) = aggregator.record(verdict) {
                                    if let Ok(mut slot) = fault.lock() {
                                        slot.get_or_insert(err);
                                    }
                                    stop.cancel();
                                    return output;
                                }
                                output.events.push((ordinal, event));
                            }
                        }
                        output
                    })
                })
                .collect();
            for (worker_index, handle) in handles.into_iter().enumerate() {
                outputs.push(handle.join().map_err(|_| worker_index));
            }
        });

        let mut events = Vec::new();
        let mut dispatched = 0;
        let mut timed_out = 0;
        for output in outputs {
            let output = output.map_err(AttributeRunError::WorkerPanicked)?;
            dispatched += output.dispatched;
            timed_out += output.timed_out;
            events.extend(output.events);
        }
        // Stable sort keeps each fixture's events in assertion order.
        events.sort_by_key(|(ordinal, _)| *ordinal);
        let mut logs: Vec<AttributeLogEvent> = events.into_iter().map(|(_, event)| event).collect();

        let engine_fault = fault.into_inner().unwrap_or(None);
        let finalized = if let Some(fault) = &engine_fault {
            aggregator.finalize_partial(format!("engine fault: {fault}"))
        } else if cancel.is_cancelled() {
            aggregator.finalize_partial(format!(
                "run cancelled after {dispatched} of {} fixtures",
                fixtures.len()
            ))
        } else {
            aggregator.finalize()
        };
        let (report, engine_fault) = match finalized {
            Ok(report) => (report, engine_fault),
            Err(err) => (
                Report {
                    entries: Vec::new(),
                    summary: Default::default(),
                    complete: false,
                    incomplete_reason: Some(format!("engine fault: {err}")),
                },
                engine_fault.or(Some(err)),
            ),
        };

        logs.push(AttributeLogEvent {
            trace_id: format!("{}-{run_id}-run", self.config.trace_prefix),
            decision_id: "decision-attribute-run".to_string(),
            policy_id: self.config.policy_id.clone(),
            component: COMPONENT.to_string(),
            event: "run_finalized".to_string(),
            outcome: if report.complete { "complete" } else { "incomplete" }.to_string(),
            error_code: engine_fault.as_ref().map(|fault| fault.code().to_string()),
            fixture_id: None,
            assertion_index: None,
            worker_index: None,
            duration_us: 0,
            error_detail: report.incomplete_reason.clone(),
        });

        let summary = AttributeRunSummary {
            run_id: run_id.clone(),
            fixture_set_hash: fixture_set_hash.clone(),
            policy_id: self.config.policy_id.clone(),
            run_date: self.config.run_date.clone(),
            total_fixtures: fixtures.len(),
            dispatched_fixtures: dispatched,
            timed_out_fixtures: timed_out,
            total_assertions: report.summary.total,
            passed: report.summary.passed,
            failed: report.summary.failed,
            errored: report.summary.errored,
            complete: report.complete,
            env_fingerprint: self.env_fingerprint(),
        };

        Ok(AttributeRunResult {
            run_id,
            fixture_set_hash,
            report,
            logs,
            summary,
            engine_fault,
        })
    }

    fn execute_fixture(
        &self,
        fixture: Arc<dyn Fixture>,
        run_token: &CancellationToken,
    ) -> FixtureExecution {
        let started = Instant::now();
        let fixture_id = fixture.id().to_string();
        let budget = self.config.fixture_budget();
        let fixture_token = CancellationToken::new();
        let checkpoint = Checkpoint::new(run_token.clone(), fixture_token.clone(), Some(budget));
        let factory = Arc::clone(&self.realm_factory);
        let (tx, rx) = mpsc::channel();

        let spawned = thread::Builder::new().spawn(move || {
            let outcome = run_isolated(fixture.as_ref(), factory.as_ref(), checkpoint);
            // The receiver is gone only if the watchdog already gave up.
            let _ = tx.send(outcome);
        });
        if let Err(err) = spawned {
            return FixtureExecution {
                verdicts: vec![Verdict::error(
                    AssertionContext::new(fixture_id, 0),
                    format!("failed to spawn fixture thread: {err}"),
                    FE_ATTR_FIXTURE_FAULT,
                )],
                timed_out: false,
                abandoned: false,
                duration: started.elapsed(),
            };
        }

        match rx.recv_timeout(budget) {
            // The checkpoint deadline and the watchdog share one budget, so
            // either may fire first; both settle to the same verdict.
            Ok(outcome) if outcome.deadline_exceeded => self.timed_out(fixture_id, started),
            Ok(outcome) => FixtureExecution {
                verdicts: outcome.verdicts,
                timed_out: false,
                abandoned: outcome.run_cancelled,
                duration: started.elapsed(),
            },
            Err(mpsc::RecvTimeoutError::Timeout) => {
                fixture_token.cancel();
                self.timed_out(fixture_id, started)
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => FixtureExecution {
                verdicts: vec![Verdict::error(
                    AssertionContext::new(fixture_id, 0),
                    "fixture thread exited without a result",
                    FE_ATTR_FIXTURE_FAULT,
                )],
                timed_out: false,
                abandoned: false,
                duration: started.elapsed(),
            },
        }
    }

    /// A timed-out fixture reports one error at index 0; anything it
    /// recorded before the deadline is dropped.
    fn timed_out(&self, fixture_id: String, started: Instant) -> FixtureExecution {
        FixtureExecution {
            verdicts: vec![Verdict::error(
                AssertionContext::new(fixture_id, 0),
                format!("fixture timed out after {}ms", self.config.fixture_timeout_ms),
                FE_ATTR_TIMEOUT,
            )],
            timed_out: true,
            abandoned: false,
            duration: started.elapsed(),
        }
    }

    fn verdict_event(
        &self,
        run_id: &str,
        ordinal: usize,
        worker_index: usize,
        verdict: &Verdict,
        duration: Duration,
    ) -> AttributeLogEvent {
        let context = verdict.context();
        AttributeLogEvent {
            trace_id: format!("{}-{run_id}-{ordinal:04}", self.config.trace_prefix),
            decision_id: format!(
                "decision-attribute-{ordinal:04}-{:03}",
                context.assertion_index
            ),
            policy_id: self.config.policy_id.clone(),
            component: COMPONENT.to_string(),
            event: "fixture_assertion".to_string(),
            outcome: verdict.outcome().as_str().to_string(),
            error_code: verdict.error_code().map(str::to_string),
            fixture_id: Some(context.fixture_id.clone()),
            assertion_index: Some(context.assertion_index),
            worker_index: Some(worker_index),
            duration_us: u64::try_from(duration.as_micros()).unwrap_or(u64::MAX),
            error_detail: verdict.message().map(str::to_string),
        }
    }

    fn env_fingerprint(&self) -> String {
        let envelope = format!(
            "os={};arch={};workers={};fixture_timeout_ms={}",
            std::env::consts::OS,
            std::env::consts::ARCH,
            self.config.worker_count,
            self.config.fixture_timeout_ms
        );
        sha256_hex(envelope.as_bytes())
    }
}

/// Build a realm and run one fixture in it. Panics are caught here and
/// become a single error verdict.
fn run_isolated(
    fixture: &dyn Fixture,
    factory: &(dyn Fn() -> Result<Box<dyn ConformanceRealm>, ProbeError> + Send + Sync),
    checkpoint: Checkpoint,
) -> IsolatedOutcome {
    let fixture_id = fixture.id().to_string();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut realm = match factory() {
            Ok(realm) => realm,
            Err(err) => {
                return IsolatedOutcome {
                    verdicts: vec![Verdict::error(
                        AssertionContext::new(fixture_id.clone(), 0),
                        format!("realm construction failed: {err}"),
                        err.code(),
                    )],
                    run_cancelled: false,
                    deadline_exceeded: false,
                };
            }
        };
        let mut cx = FixtureContext::new(fixture_id.clone(), realm.as_mut(), checkpoint);
        let result = fixture.run(&mut cx);
        let interrupt = match &result {
            Err(FixtureAbort::Probe(ProbeError::Interrupted(interrupt))) => Some(*interrupt),
            _ => None,
        };
        IsolatedOutcome {
            verdicts: settle(cx, result),
            run_cancelled: interrupt == Some(CheckpointInterrupt::RunCancelled),
            deadline_exceeded: matches!(
                interrupt,
                Some(CheckpointInterrupt::DeadlineExceeded { .. })
            ),
        }
    }));
    match outcome {
        Ok(outcome) => outcome,
        Err(payload) => IsolatedOutcome {
            verdicts: vec![Verdict::error(
                AssertionContext::new(fixture_id, 0),
                format!("fixture panicked: {}", panic_message(payload.as_ref())),
                FE_ATTR_FIXTURE_FAULT,
            )],
            run_cancelled: false,
            deadline_exceeded: false,
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
