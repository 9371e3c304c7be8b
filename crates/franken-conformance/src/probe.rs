//! Descriptor, enumeration and mutation probes.
//!
//! Probes never see a concrete object type: they query anything that
//! implements [`AttributeSource`] (read-only) or [`MutableAttributeSource`]
//! (assignment and delete). The reference [`ObjectHeap`] implements both.

use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeDimension, AttributeSet, ReportedAttributes};
use crate::checkpoint::CheckpointInterrupt;
use crate::error_code::{FE_ATTR_PROBE_ERROR, FE_ATTR_TIMEOUT, StableErrorCode};
use crate::object_model::{JsValue, ObjectError, ObjectHeap, PropertyKey};

/// Key-based attribute queries over a runtime's object model.
pub trait AttributeSource {
    /// Own-property attributes of `key` on `target`, `Ok(None)` when the
    /// property is absent. Non-object targets yield
    /// [`ProbeError::NotObjectLike`].
    fn own_attributes(
        &self,
        target: &JsValue,
        key: &PropertyKey,
    ) -> Result<Option<ReportedAttributes>, ProbeError>;

    /// The runtime's native enumerability query (`propertyIsEnumerable`).
    fn is_enumerable_direct(&self, target: &JsValue, key: &PropertyKey) -> Result<bool, ProbeError>;

    /// Keys visited by one fresh `for-in` walk of `target`, in visit order.
    fn enumeration_keys(&self, target: &JsValue) -> Result<Vec<PropertyKey>, ProbeError>;
}

/// Property access primitives needed to exercise attributes behaviorally.
pub trait MutableAttributeSource: AttributeSource {
    fn get_value(&self, target: &JsValue, key: &PropertyKey) -> Result<JsValue, ProbeError>;

    /// Sloppy-mode assignment; `Ok(false)` when the runtime refused it.
    fn assign(
        &mut self,
        target: &JsValue,
        key: &PropertyKey,
        value: JsValue,
    ) -> Result<bool, ProbeError>;

    /// `delete target[key]`; `Ok(false)` when the runtime refused it.
    fn delete(&mut self, target: &JsValue, key: &PropertyKey) -> Result<bool, ProbeError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("target is not object-like (got {type_name})")]
    NotObjectLike { type_name: &'static str },
    #[error("target `{path}` could not be resolved at `{segment}`")]
    UnresolvedTarget { path: String, segment: String },
    #[error(transparent)]
    Object(#[from] ObjectError),
    #[error(transparent)]
    Interrupted(#[from] CheckpointInterrupt),
}

impl StableErrorCode for ProbeError {
    fn code(&self) -> &'static str {
        match self {
            Self::Interrupted(
                CheckpointInterrupt::DeadlineExceeded { .. } | CheckpointInterrupt::FixtureCancelled,
            ) => FE_ATTR_TIMEOUT,
            _ => FE_ATTR_PROBE_ERROR,
        }
    }
}

fn object_target(target: &JsValue) -> Result<crate::object_model::ObjectHandle, ProbeError> {
    target.as_object().ok_or(ProbeError::NotObjectLike {
        type_name: target.type_name(),
    })
}

/// Outcome of the descriptor probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProbeResult {
    Found(AttributeSet),
    Absent,
    NotApplicable(String),
}

impl ProbeResult {
    pub fn attributes(&self) -> Option<&AttributeSet> {
        match self {
            Self::Found(set) => Some(set),
            Self::Absent | Self::NotApplicable(_) => None,
        }
    }
}

/// Own-property lookup with legacy attribute names normalized.
pub fn describe<S: AttributeSource + ?Sized>(
    source: &S,
    target: &JsValue,
    key: &PropertyKey,
) -> Result<ProbeResult, ProbeError> {
    match source.own_attributes(target, key) {
        Ok(Some(reported)) => Ok(ProbeResult::Found(reported.normalize())),
        Ok(None) => Ok(ProbeResult::Absent),
        Err(ProbeError::NotObjectLike { type_name }) => Ok(ProbeResult::NotApplicable(format!(
            "property lookup on a {type_name} value"
        ))),
        Err(err) => Err(err),
    }
}

/// Whether `key` is visited by a fresh `for-in` walk of `target`.
pub fn is_enumerable_by_iteration<S: AttributeSource + ?Sized>(
    source: &S,
    target: &JsValue,
    key: &PropertyKey,
) -> Result<bool, ProbeError> {
    let keys = source.enumeration_keys(target)?;
    Ok(keys.contains(key))
}

/// The three enumerability signals for one property, kept distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerationEvidence {
    /// `enumerable` from the descriptor probe (`None` when no own property).
    pub descriptor: Option<bool>,
    /// Native `propertyIsEnumerable` answer.
    pub direct: bool,
    /// Membership in the `for-in` walk.
    pub iteration: bool,
}

impl EnumerationEvidence {
    /// Behavioral signals are only queried when the descriptor probe found
    /// an own property; otherwise both stay `false`.
    pub fn collect<S: AttributeSource + ?Sized>(
        source: &S,
        target: &JsValue,
        key: &PropertyKey,
        observed: &ProbeResult,
    ) -> Result<Self, ProbeError> {
        let Some(set) = observed.attributes() else {
            return Ok(Self {
                descriptor: None,
                direct: false,
                iteration: false,
            });
        };
        Ok(Self {
            descriptor: Some(set.enumerable),
            direct: source.is_enumerable_direct(target, key)?,
            iteration: is_enumerable_by_iteration(source, target, key)?,
        })
    }

    /// Evidence for a caller that already knows the probes agree.
    pub fn consistent(enumerable: bool) -> Self {
        Self {
            descriptor: Some(enumerable),
            direct: enumerable,
            iteration: enumerable,
        }
    }

    /// Disagreements between the descriptor and the two behavioral signals,
    /// formatted as `enumerable mismatch: descriptor=<d>, <probe>=<v>`.
    pub fn disagreements(&self) -> Vec<String> {
        let Some(descriptor) = self.descriptor else {
            return Vec::new();
        };
        let mut out = Vec::new();
        if descriptor != self.iteration {
            out.push(format!(
                "{} mismatch: descriptor={descriptor}, iteration={}",
                AttributeDimension::Enumerable,
                self.iteration
            ));
        }
        if descriptor != self.direct {
            out.push(format!(
                "{} mismatch: descriptor={descriptor}, direct={}",
                AttributeDimension::Enumerable,
                self.direct
            ));
        }
        out
    }

    pub fn agrees(&self) -> bool {
        self.disagreements().is_empty()
    }
}

/// Behavioral evidence for `writable` and `configurable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEvidence {
    /// An assignment of a fresh value changed what a read returns.
    pub assignment_took_effect: bool,
    /// The property was gone after `delete`.
    pub removed_by_delete: bool,
}

impl MutationEvidence {
    pub fn writable(&self) -> bool {
        self.assignment_took_effect
    }

    pub fn configurable(&self) -> bool {
        self.removed_by_delete
    }
}

const SENTINEL: &str = "__franken_attribute_probe__";

/// Exercise `writable` by assignment, then `configurable` by delete.
///
/// Destructive: a configurable property is gone afterwards, so this must be
/// the last probe a fixture runs against its realm. Only meaningful for an
/// own property; on an absent or inherited key the assignment creates a
/// fresh own property and the evidence reads fully mutable.
pub fn probe_mutation<S: MutableAttributeSource + ?Sized>(
    source: &mut S,
    target: &JsValue,
    key: &PropertyKey,
) -> Result<MutationEvidence, ProbeError> {
    let original = source.get_value(target, key)?;
    let sentinel = if original == JsValue::Str(SENTINEL.to_string()) {
        JsValue::Str(format!("{SENTINEL}2"))
    } else {
        JsValue::Str(SENTINEL.to_string())
    };
    source.assign(target, key, sentinel.clone())?;
    let after = source.get_value(target, key)?;
    let assignment_took_effect = after.same_value(&sentinel);
    if assignment_took_effect {
        source.assign(target, key, original)?;
    }

    source.delete(target, key)?;
    let removed_by_delete = source.own_attributes(target, key)?.is_none();

    Ok(MutationEvidence {
        assignment_took_effect,
        removed_by_delete,
    })
}

impl AttributeSource for ObjectHeap {
    fn own_attributes(
        &self,
        target: &JsValue,
        key: &PropertyKey,
    ) -> Result<Option<ReportedAttributes>, ProbeError> {
        let handle = object_target(target)?;
        Ok(self
            .get_own_property_descriptor(handle, key)?
            .map(|desc| ReportedAttributes::Modern(AttributeSet::from(&desc))))
    }

    fn is_enumerable_direct(&self, target: &JsValue, key: &PropertyKey) -> Result<bool, ProbeError> {
        let handle = object_target(target)?;
        Ok(self.property_is_enumerable(handle, key)?)
    }

    fn enumeration_keys(&self, target: &JsValue) -> Result<Vec<PropertyKey>, ProbeError> {
        let handle = object_target(target)?;
        Ok(self
            .for_in_keys(handle)?
            .into_iter()
            .map(PropertyKey::String)
            .collect())
    }
}

impl MutableAttributeSource for ObjectHeap {
    fn get_value(&self, target: &JsValue, key: &PropertyKey) -> Result<JsValue, ProbeError> {
        let handle = object_target(target)?;
        Ok(self.get_property(handle, key)?)
    }

    fn assign(
        &mut self,
        target: &JsValue,
        key: &PropertyKey,
        value: JsValue,
    ) -> Result<bool, ProbeError> {
        let handle = object_target(target)?;
        Ok(self.set_property(handle, key.clone(), value)?)
    }

    fn delete(&mut self, target: &JsValue, key: &PropertyKey) -> Result<bool, ProbeError> {
        let handle = object_target(target)?;
        Ok(self.delete_property(handle, key)?)
    }
}
