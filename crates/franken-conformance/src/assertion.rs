//! Attribute assertions and the verdicts they produce.
//!
//! Assertions are pure: they compare probe output with fixture expectations
//! and return a [`Verdict`]. Nothing here records anything; verdicts flow to
//! the aggregator through the fixture context.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeDimension, ExpectedAttributes};
use crate::error_code::{FE_ATTR_ABSENT, FE_ATTR_MISMATCH};
use crate::probe::{EnumerationEvidence, MutationEvidence, ProbeResult};

/// Which fixture and which of its assertions a verdict belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssertionContext {
    pub fixture_id: String,
    pub assertion_index: u32,
}

impl AssertionContext {
    pub fn new(fixture_id: impl Into<String>, assertion_index: u32) -> Self {
        Self {
            fixture_id: fixture_id.into(),
            assertion_index,
        }
    }
}

impl fmt::Display for AssertionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.fixture_id, self.assertion_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictOutcome {
    Pass,
    Fail,
    Error,
}

impl VerdictOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for VerdictOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Verdict {
    Pass {
        context: AssertionContext,
    },
    Fail {
        context: AssertionContext,
        message: String,
        /// `None` for failures a fixture reported itself.
        error_code: Option<String>,
        mismatches: Vec<AttributeDimension>,
        enumeration: Option<EnumerationEvidence>,
    },
    Error {
        context: AssertionContext,
        message: String,
        error_code: String,
    },
}

impl Verdict {
    pub fn pass(context: AssertionContext) -> Self {
        Self::Pass { context }
    }

    /// A plain failure with no attribute detail.
    pub fn fail(context: AssertionContext, message: impl Into<String>) -> Self {
        Self::Fail {
            context,
            message: message.into(),
            error_code: None,
            mismatches: Vec::new(),
            enumeration: None,
        }
    }

    pub fn error(
        context: AssertionContext,
        message: impl Into<String>,
        error_code: impl Into<String>,
    ) -> Self {
        Self::Error {
            context,
            message: message.into(),
            error_code: error_code.into(),
        }
    }

    pub fn context(&self) -> &AssertionContext {
        match self {
            Self::Pass { context } | Self::Fail { context, .. } | Self::Error { context, .. } => {
                context
            }
        }
    }

    pub fn outcome(&self) -> VerdictOutcome {
        match self {
            Self::Pass { .. } => VerdictOutcome::Pass,
            Self::Fail { .. } => VerdictOutcome::Fail,
            Self::Error { .. } => VerdictOutcome::Error,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Pass { .. } => None,
            Self::Fail { message, .. } | Self::Error { message, .. } => Some(message),
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Pass { .. } => None,
            Self::Fail { error_code, .. } => error_code.as_deref(),
            Self::Error { error_code, .. } => Some(error_code),
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass { .. })
    }
}

fn missing_message(observed: &ProbeResult) -> String {
    match observed {
        ProbeResult::NotApplicable(reason) => format!("property not applicable: {reason}"),
        ProbeResult::Found(_) | ProbeResult::Absent => "property absent".to_string(),
    }
}

/// Failure for a check that needs an own property which is absent or not
/// applicable.
pub fn missing_property(observed: &ProbeResult, context: AssertionContext) -> Verdict {
    Verdict::Fail {
        context,
        message: missing_message(observed),
        error_code: Some(FE_ATTR_ABSENT.to_string()),
        mismatches: Vec::new(),
        enumeration: None,
    }
}

/// Compare observed attributes with expectations and require the
/// enumeration probes to agree with the descriptor.
pub fn assert_attributes(
    observed: &ProbeResult,
    expected: &ExpectedAttributes,
    enumeration: &EnumerationEvidence,
    context: AssertionContext,
) -> Verdict {
    let actual = match observed {
        ProbeResult::Found(set) => set,
        ProbeResult::Absent | ProbeResult::NotApplicable(_) => {
            return missing_property(observed, context);
        }
    };

    let mismatches = actual.diff(expected.set());
    let mut messages: Vec<String> = mismatches
        .iter()
        .map(|dim| {
            format!(
                "{dim} mismatch: expected={}, observed={}",
                expected.set().get(*dim),
                actual.get(*dim)
            )
        })
        .collect();
    messages.extend(enumeration.disagreements());

    if messages.is_empty() {
        return Verdict::pass(context);
    }
    Verdict::Fail {
        context,
        message: messages.join("; "),
        error_code: Some(FE_ATTR_MISMATCH.to_string()),
        mismatches,
        enumeration: (!enumeration.agrees()).then_some(*enumeration),
    }
}

/// Pass only when the property does not exist as an own property.
pub fn assert_absent(observed: &ProbeResult, context: AssertionContext) -> Verdict {
    match observed {
        ProbeResult::Absent => Verdict::pass(context),
        ProbeResult::Found(set) => Verdict::Fail {
            context,
            message: format!("property present: {set}"),
            error_code: Some(FE_ATTR_MISMATCH.to_string()),
            mismatches: Vec::new(),
            enumeration: None,
        },
        ProbeResult::NotApplicable(_) => missing_property(observed, context),
    }
}

/// A single behavioral enumerability signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumerationSignal {
    Direct,
    Iteration,
}

impl EnumerationSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Iteration => "iteration",
        }
    }
}

/// Check one enumerability signal against the expected bit.
pub fn assert_enumerability(
    signal: EnumerationSignal,
    observed: bool,
    expected: bool,
    context: AssertionContext,
) -> Verdict {
    if observed == expected {
        return Verdict::pass(context);
    }
    Verdict::Fail {
        context,
        message: format!(
            "{} mismatch: expected={expected}, {}={observed}",
            AttributeDimension::Enumerable,
            signal.as_str()
        ),
        error_code: Some(FE_ATTR_MISMATCH.to_string()),
        mismatches: vec![AttributeDimension::Enumerable],
        enumeration: None,
    }
}

/// Compare assignment/delete behavior with the expected `writable` and
/// `configurable` bits. `enumerable` is not exercised here.
pub fn assert_mutation_behavior(
    evidence: &MutationEvidence,
    expected: &ExpectedAttributes,
    context: AssertionContext,
) -> Verdict {
    let checks = [
        (AttributeDimension::Writable, evidence.writable(), "assignment"),
        (AttributeDimension::Configurable, evidence.configurable(), "delete"),
    ];
    let mut mismatches = Vec::new();
    let mut messages = Vec::new();
    for (dim, observed, via) in checks {
        let want = expected.set().get(dim);
        if observed != want {
            mismatches.push(dim);
            messages.push(format!("{dim} mismatch: expected={want}, {via}={observed}"));
        }
    }
    if messages.is_empty() {
        return Verdict::pass(context);
    }
    Verdict::Fail {
        context,
        message: messages.join("; "),
        error_code: Some(FE_ATTR_MISMATCH.to_string()),
        mismatches,
        enumeration: None,
    }
}
