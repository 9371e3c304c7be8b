//! The fixture contract: what a fixture sees while it runs and how it
//! signals failure.

use std::fmt;

use crate::assertion::{
    AssertionContext, EnumerationSignal, Verdict, assert_absent, assert_attributes,
    assert_enumerability, assert_mutation_behavior, missing_property,
};
use crate::attributes::ExpectedAttributes;
use crate::checkpoint::Checkpoint;
use crate::error_code::{FE_ATTR_FIXTURE_FAULT, FE_ATTR_MISMATCH, StableErrorCode};
use crate::object_model::{JsValue, PropertyKey};
use crate::probe::{self, EnumerationEvidence, MutationEvidence, ProbeError, ProbeResult};
use crate::realm::ConformanceRealm;

/// Early exit from a fixture body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FixtureAbort {
    /// The fixture decided the runtime is non-conformant.
    #[error("{0}")]
    Failure(String),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    /// Anything else that went wrong inside the fixture.
    #[error("fixture fault: {0}")]
    Fault(String),
}

impl StableErrorCode for FixtureAbort {
    fn code(&self) -> &'static str {
        match self {
            Self::Failure(_) => FE_ATTR_MISMATCH,
            Self::Probe(err) => err.code(),
            Self::Fault(_) => FE_ATTR_FIXTURE_FAULT,
        }
    }
}

/// A conformance fixture. Runs once per realm.
pub trait Fixture: Send + Sync {
    fn id(&self) -> &str;

    fn run(&self, cx: &mut FixtureContext<'_>) -> Result<(), FixtureAbort>;
}

type FixtureBody = dyn Fn(&mut FixtureContext<'_>) -> Result<(), FixtureAbort> + Send + Sync;

/// Fixture defined by a closure.
pub struct FnFixture {
    id: String,
    body: Box<FixtureBody>,
}

impl FnFixture {
    pub fn new<F>(id: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut FixtureContext<'_>) -> Result<(), FixtureAbort> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            body: Box::new(body),
        }
    }
}

impl fmt::Debug for FnFixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFixture").field("id", &self.id).finish()
    }
}

impl Fixture for FnFixture {
    fn id(&self) -> &str {
        &self.id
    }

    fn run(&self, cx: &mut FixtureContext<'_>) -> Result<(), FixtureAbort> {
        (self.body)(cx)
    }
}

/// Everything a fixture may touch: its realm, its checkpoint, and its own
/// verdict list. Verdict indices are assigned in call order.
pub struct FixtureContext<'r> {
    fixture_id: String,
    realm: &'r mut dyn ConformanceRealm,
    checkpoint: Checkpoint,
    next_index: u32,
    verdicts: Vec<Verdict>,
}

impl<'r> FixtureContext<'r> {
    pub fn new(
        fixture_id: impl Into<String>,
        realm: &'r mut dyn ConformanceRealm,
        checkpoint: Checkpoint,
    ) -> Self {
        Self {
            fixture_id: fixture_id.into(),
            realm,
            checkpoint,
            next_index: 0,
            verdicts: Vec::new(),
        }
    }

    pub fn fixture_id(&self) -> &str {
        &self.fixture_id
    }

    /// Context for the next verdict this fixture produces.
    pub fn next_context(&mut self) -> AssertionContext {
        let context = AssertionContext::new(self.fixture_id.clone(), self.next_index);
        self.next_index += 1;
        context
    }

    pub fn record(&mut self, verdict: Verdict) {
        self.verdicts.push(verdict);
    }

    /// Report a failure and keep going.
    pub fn fail(&mut self, message: impl Into<String>) {
        let context = self.next_context();
        self.verdicts.push(Verdict::fail(context, message));
    }

    pub fn verdicts(&self) -> &[Verdict] {
        &self.verdicts
    }

    pub fn into_verdicts(self) -> Vec<Verdict> {
        self.verdicts
    }

    /// Stop here if the run was cancelled or the fixture ran out of time.
    pub fn checkpoint(&self) -> Result<(), FixtureAbort> {
        self.checkpoint.check().map_err(ProbeError::from)?;
        Ok(())
    }

    pub fn resolve(&self, path: &str) -> Result<JsValue, FixtureAbort> {
        self.checkpoint()?;
        Ok(self.realm.resolve(path)?)
    }

    // -- descriptor access -------------------------------------------------

    pub fn get_own_property_attributes(
        &self,
        target: &JsValue,
        key: &PropertyKey,
    ) -> Result<ProbeResult, FixtureAbort> {
        self.checkpoint()?;
        Ok(probe::describe(&*self.realm, target, key)?)
    }

    pub fn is_enumerable_direct(
        &self,
        target: &JsValue,
        key: &PropertyKey,
    ) -> Result<bool, FixtureAbort> {
        self.checkpoint()?;
        Ok(self.realm.is_enumerable_direct(target, key)?)
    }

    pub fn is_enumerable_by_iteration(
        &self,
        target: &JsValue,
        key: &PropertyKey,
    ) -> Result<bool, FixtureAbort> {
        self.checkpoint()?;
        Ok(probe::is_enumerable_by_iteration(&*self.realm, target, key)?)
    }

    pub fn enumeration_evidence(
        &self,
        target: &JsValue,
        key: &PropertyKey,
        observed: &ProbeResult,
    ) -> Result<EnumerationEvidence, FixtureAbort> {
        self.checkpoint()?;
        Ok(EnumerationEvidence::collect(&*self.realm, target, key, observed)?)
    }

    /// Destructive; see [`probe::probe_mutation`].
    pub fn probe_mutation(
        &mut self,
        target: &JsValue,
        key: &PropertyKey,
    ) -> Result<MutationEvidence, FixtureAbort> {
        self.checkpoint()?;
        Ok(probe::probe_mutation(&mut *self.realm, target, key)?)
    }

    // -- recorded checks ---------------------------------------------------

    /// Descriptor probe, both enumeration probes, and the attribute
    /// assertion. Returns whether it passed.
    pub fn check_attributes(
        &mut self,
        target: &JsValue,
        key: &PropertyKey,
        expected: &ExpectedAttributes,
    ) -> Result<bool, FixtureAbort> {
        let observed = self.get_own_property_attributes(target, key)?;
        let enumeration = self.enumeration_evidence(target, key, &observed)?;
        let context = self.next_context();
        Ok(self.push(assert_attributes(&observed, expected, &enumeration, context)))
    }

    pub fn check_absent(&mut self, target: &JsValue, key: &PropertyKey) -> Result<bool, FixtureAbort> {
        let observed = self.get_own_property_attributes(target, key)?;
        let context = self.next_context();
        Ok(self.push(assert_absent(&observed, context)))
    }

    pub fn check_enumerability(
        &mut self,
        signal: EnumerationSignal,
        target: &JsValue,
        key: &PropertyKey,
        expected: bool,
    ) -> Result<bool, FixtureAbort> {
        let observed = match signal {
            EnumerationSignal::Direct => self.is_enumerable_direct(target, key)?,
            EnumerationSignal::Iteration => self.is_enumerable_by_iteration(target, key)?,
        };
        let context = self.next_context();
        Ok(self.push(assert_enumerability(signal, observed, expected, context)))
    }

    /// Behavioral `writable`/`configurable` check. A key the target does not
    /// own fails as absent and is never assigned or deleted.
    pub fn check_mutation(
        &mut self,
        target: &JsValue,
        key: &PropertyKey,
        expected: &ExpectedAttributes,
    ) -> Result<bool, FixtureAbort> {
        let observed = self.get_own_property_attributes(target, key)?;
        if observed.attributes().is_none() {
            let context = self.next_context();
            return Ok(self.push(missing_property(&observed, context)));
        }
        let evidence = self.probe_mutation(target, key)?;
        let context = self.next_context();
        Ok(self.push(assert_mutation_behavior(&evidence, expected, context)))
    }

    fn push(&mut self, verdict: Verdict) -> bool {
        let passed = verdict.is_pass();
        self.verdicts.push(verdict);
        passed
    }
}

/// Turn a fixture's outcome into its final verdict list: recorded verdicts
/// first, then one verdict for an abort, or an implicit pass when the
/// fixture returned normally without recording anything.
pub fn settle(mut cx: FixtureContext<'_>, outcome: Result<(), FixtureAbort>) -> Vec<Verdict> {
    match outcome {
        Ok(()) => {
            if cx.verdicts.is_empty() {
                let context = cx.next_context();
                cx.verdicts.push(Verdict::pass(context));
            }
        }
        Err(FixtureAbort::Failure(message)) => cx.fail(message),
        Err(abort) => {
            let context = cx.next_context();
            let code = abort.code();
            cx.verdicts.push(Verdict::error(context, abort.to_string(), code));
        }
    }
    cx.into_verdicts()
}
