//! Normalized property attribute sets and legacy attribute notation.
//!
//! Modern object models report `{writable, enumerable, configurable}`;
//! ES3-era models and the fixture `@assertion` lines use the inverted
//! `{ ReadOnly, DontDelete, DontEnum }` flags. Everything is normalized into
//! [`AttributeSet`] before comparison.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::object_model::PropertyDescriptor;

/// One of the three attribute dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeDimension {
    Writable,
    Enumerable,
    Configurable,
}

impl AttributeDimension {
    pub const ALL: [AttributeDimension; 3] = [Self::Writable, Self::Enumerable, Self::Configurable];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Writable => "writable",
            Self::Enumerable => "enumerable",
            Self::Configurable => "configurable",
        }
    }
}

impl fmt::Display for AttributeDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A property's mutability contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeSet {
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

impl AttributeSet {
    pub const fn new(writable: bool, enumerable: bool, configurable: bool) -> Self {
        Self {
            writable,
            enumerable,
            configurable,
        }
    }

    /// `{ ReadOnly, DontDelete, DontEnum }`.
    pub const FROZEN: AttributeSet = AttributeSet::new(false, false, false);

    pub fn get(&self, dimension: AttributeDimension) -> bool {
        match dimension {
            AttributeDimension::Writable => self.writable,
            AttributeDimension::Enumerable => self.enumerable,
            AttributeDimension::Configurable => self.configurable,
        }
    }

    /// Dimensions where `self` and `other` differ, in canonical order.
    pub fn diff(&self, other: &AttributeSet) -> Vec<AttributeDimension> {
        AttributeDimension::ALL
            .into_iter()
            .filter(|dim| self.get(*dim) != other.get(*dim))
            .collect()
    }

    pub fn to_legacy(self) -> LegacyAttributes {
        LegacyAttributes {
            read_only: !self.writable,
            dont_delete: !self.configurable,
            dont_enum: !self.enumerable,
        }
    }
}

impl From<&PropertyDescriptor> for AttributeSet {
    fn from(desc: &PropertyDescriptor) -> Self {
        Self {
            writable: desc.is_writable(),
            enumerable: desc.is_enumerable(),
            configurable: desc.is_configurable(),
        }
    }
}

impl fmt::Display for AttributeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{writable: {}, enumerable: {}, configurable: {}}}",
            self.writable, self.enumerable, self.configurable
        )
    }
}

/// A single legacy attribute flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LegacyAttribute {
    ReadOnly,
    DontDelete,
    DontEnum,
}

impl LegacyAttribute {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "ReadOnly",
            Self::DontDelete => "DontDelete",
            Self::DontEnum => "DontEnum",
        }
    }

    pub fn dimension(self) -> AttributeDimension {
        match self {
            Self::ReadOnly => AttributeDimension::Writable,
            Self::DontDelete => AttributeDimension::Configurable,
            Self::DontEnum => AttributeDimension::Enumerable,
        }
    }
}

impl FromStr for LegacyAttribute {
    type Err = AttributeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ReadOnly" => Ok(Self::ReadOnly),
            "DontDelete" => Ok(Self::DontDelete),
            "DontEnum" => Ok(Self::DontEnum),
            other => Err(AttributeParseError::UnknownAttribute(other.to_string())),
        }
    }
}

/// Legacy attribute flags; a set flag removes the capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LegacyAttributes {
    pub read_only: bool,
    pub dont_delete: bool,
    pub dont_enum: bool,
}

impl LegacyAttributes {
    pub fn from_flags(flags: &[LegacyAttribute]) -> Self {
        let mut out = Self::default();
        for flag in flags {
            match flag {
                LegacyAttribute::ReadOnly => out.read_only = true,
                LegacyAttribute::DontDelete => out.dont_delete = true,
                LegacyAttribute::DontEnum => out.dont_enum = true,
            }
        }
        out
    }

    /// Parse `{ ReadOnly, DontDelete, DontEnum }` (braces optional, `{}`
    /// means no flags).
    pub fn parse(notation: &str) -> Result<Self, AttributeParseError> {
        let trimmed = notation.trim();
        let inner = match (trimmed.strip_prefix('{'), trimmed.ends_with('}')) {
            (Some(rest), true) => &rest[..rest.len() - 1],
            (None, false) => trimmed,
            _ => return Err(AttributeParseError::UnbalancedBraces(trimmed.to_string())),
        };
        let mut flags = Vec::new();
        for part in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let flag: LegacyAttribute = part.parse()?;
            if flags.contains(&flag) {
                return Err(AttributeParseError::DuplicateAttribute(flag.as_str()));
            }
            flags.push(flag);
        }
        Ok(Self::from_flags(&flags))
    }

    pub fn normalize(self) -> AttributeSet {
        AttributeSet {
            writable: !self.read_only,
            enumerable: !self.dont_enum,
            configurable: !self.dont_delete,
        }
    }
}

impl fmt::Display for LegacyAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.read_only {
            names.push(LegacyAttribute::ReadOnly.as_str());
        }
        if self.dont_delete {
            names.push(LegacyAttribute::DontDelete.as_str());
        }
        if self.dont_enum {
            names.push(LegacyAttribute::DontEnum.as_str());
        }
        if names.is_empty() {
            f.write_str("{}")
        } else {
            write!(f, "{{ {} }}", names.join(", "))
        }
    }
}

/// Attributes as a source reports them, before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "notation", rename_all = "snake_case")]
pub enum ReportedAttributes {
    Modern(AttributeSet),
    Legacy(LegacyAttributes),
}

impl ReportedAttributes {
    pub fn normalize(self) -> AttributeSet {
        match self {
            Self::Modern(set) => set,
            Self::Legacy(legacy) => legacy.normalize(),
        }
    }
}

/// Expected attributes authored by a fixture. Never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedAttributes(AttributeSet);

impl ExpectedAttributes {
    pub fn new(set: AttributeSet) -> Self {
        Self(set)
    }

    pub fn from_legacy(legacy: LegacyAttributes) -> Self {
        Self(legacy.normalize())
    }

    pub fn set(&self) -> &AttributeSet {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttributeParseError {
    #[error("unknown legacy attribute `{0}`")]
    UnknownAttribute(String),
    #[error("duplicate legacy attribute `{0}`")]
    DuplicateAttribute(&'static str),
    #[error("unbalanced braces in attribute notation `{0}`")]
    UnbalancedBraces(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_model::{JsValue, ObjectHandle};

    #[test]
    fn legacy_normalization_inverts_each_flag() {
        let legacy = LegacyAttributes::from_flags(&[LegacyAttribute::ReadOnly]);
        assert_eq!(legacy.normalize(), AttributeSet::new(false, true, true));
        let legacy = LegacyAttributes::from_flags(&[LegacyAttribute::DontDelete]);
        assert_eq!(legacy.normalize(), AttributeSet::new(true, true, false));
        let legacy = LegacyAttributes::from_flags(&[LegacyAttribute::DontEnum]);
        assert_eq!(legacy.normalize(), AttributeSet::new(true, false, true));
    }

    #[test]
    fn parse_fixture_assertion_notation() {
        let legacy = LegacyAttributes::parse("{ ReadOnly, DontDelete, DontEnum }").expect("parse");
        assert_eq!(legacy.normalize(), AttributeSet::FROZEN);
        assert_eq!(legacy.to_string(), "{ ReadOnly, DontDelete, DontEnum }");
        assert_eq!(
            LegacyAttributes::parse("DontEnum").expect("parse"),
            LegacyAttributes {
                dont_enum: true,
                ..LegacyAttributes::default()
            }
        );
        assert_eq!(LegacyAttributes::parse("{}").expect("parse"), LegacyAttributes::default());
    }

    #[test]
    fn parse_rejects_bad_notation() {
        assert_eq!(
            LegacyAttributes::parse("{ ReadOnly, Hidden }").unwrap_err(),
            AttributeParseError::UnknownAttribute("Hidden".to_string())
        );
        assert_eq!(
            LegacyAttributes::parse("{ DontEnum, DontEnum }").unwrap_err(),
            AttributeParseError::DuplicateAttribute("DontEnum")
        );
        assert!(matches!(
            LegacyAttributes::parse("{ ReadOnly"),
            Err(AttributeParseError::UnbalancedBraces(_))
        ));
    }

    #[test]
    fn legacy_round_trips_through_modern() {
        let set = AttributeSet::new(true, false, true);
        assert_eq!(set.to_legacy().normalize(), set);
    }

    #[test]
    fn diff_reports_dimensions_in_canonical_order() {
        let a = AttributeSet::new(true, true, true);
        let b = AttributeSet::new(false, true, false);
        assert_eq!(
            a.diff(&b),
            vec![AttributeDimension::Writable, AttributeDimension::Configurable]
        );
        assert!(a.diff(&a).is_empty());
    }

    #[test]
    fn descriptor_conversion() {
        let frozen = PropertyDescriptor::data_frozen(JsValue::Int(2));
        assert_eq!(AttributeSet::from(&frozen), AttributeSet::FROZEN);
        let accessor = PropertyDescriptor::Accessor {
            get: Some(ObjectHandle(0)),
            set: None,
            enumerable: false,
            configurable: true,
        };
        assert_eq!(AttributeSet::from(&accessor), AttributeSet::new(false, false, true));
    }

    #[test]
    fn reported_attributes_serialize_with_notation_tag() {
        let reported = ReportedAttributes::Legacy(LegacyAttributes::parse("DontEnum").expect("parse"));
        let json = serde_json::to_value(reported).expect("serialize");
        assert_eq!(json["notation"], "legacy");
        assert_eq!(reported.normalize(), AttributeSet::new(true, false, true));
    }
}
