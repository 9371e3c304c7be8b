//! Data-driven attribute fixtures loaded from TOML.
//!
//! ```toml
//! schema_version = "franken-engine.attribute-fixtures.v1"
//!
//! [[fixture]]
//! id = "S15.9.5.30_A3_T3"
//! section = "15.9.5.30"
//! description = "Checking DontEnum attribute"
//! target = "Date.prototype.setSeconds"
//! key = "length"
//!
//! [[fixture.assertion]]
//! kind = "attributes"
//! legacy = ["ReadOnly", "DontDelete", "DontEnum"]
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::assertion::EnumerationSignal;
use crate::attributes::{
    AttributeDimension, AttributeSet, ExpectedAttributes, LegacyAttribute, LegacyAttributes,
};
use crate::error_code::{FE_ATTR_INVALID_CATALOG, StableErrorCode};
use crate::fixture::{Fixture, FixtureAbort, FixtureContext};
use crate::object_model::PropertyKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionKind {
    Attributes,
    Absent,
    EnumerableDirect,
    EnumerableByIteration,
    Mutation,
}

impl AssertionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attributes => "attributes",
            Self::Absent => "absent",
            Self::EnumerableDirect => "enumerable_direct",
            Self::EnumerableByIteration => "enumerable_by_iteration",
            Self::Mutation => "mutation",
        }
    }
}

/// Legacy flags as a list or in `{ ReadOnly, DontEnum }` notation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LegacySpec {
    List(Vec<String>),
    Notation(String),
}

impl LegacySpec {
    fn parse(&self) -> Result<LegacyAttributes, String> {
        match self {
            Self::Notation(text) => LegacyAttributes::parse(text).map_err(|err| err.to_string()),
            Self::List(names) => {
                let mut flags = Vec::with_capacity(names.len());
                for name in names {
                    let flag = name
                        .parse::<LegacyAttribute>()
                        .map_err(|err| err.to_string())?;
                    if flags.contains(&flag) {
                        return Err(format!("duplicate legacy attribute `{}`", flag.as_str()));
                    }
                    flags.push(flag);
                }
                Ok(LegacyAttributes::from_flags(&flags))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionSpec {
    pub kind: AssertionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy: Option<LegacySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enumerable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configurable: Option<bool>,
}

impl AssertionSpec {
    /// Expected attributes, from either notation. `Ok(None)` when neither
    /// notation is used.
    fn expected(&self) -> Result<Option<ExpectedAttributes>, String> {
        let modern = [self.writable, self.enumerable, self.configurable];
        let any_modern = modern.iter().any(Option::is_some);
        match (&self.legacy, any_modern) {
            (Some(_), true) => {
                Err("`legacy` cannot be combined with modern attribute keys".to_string())
            }
            (Some(legacy), false) => Ok(Some(ExpectedAttributes::from_legacy(legacy.parse()?))),
            (None, false) => Ok(None),
            (None, true) => match modern {
                [Some(writable), Some(enumerable), Some(configurable)] => Ok(Some(
                    ExpectedAttributes::new(AttributeSet::new(writable, enumerable, configurable)),
                )),
                _ => Err("modern notation needs writable, enumerable and configurable".to_string()),
            },
        }
    }

    fn expected_enumerable(&self) -> Result<Option<bool>, String> {
        if self.writable.is_some() || self.configurable.is_some() {
            return Err(format!(
                "`{}` only takes `enumerable` or `legacy`",
                self.kind.as_str()
            ));
        }
        match (&self.legacy, self.enumerable) {
            (Some(_), Some(_)) => Err("`legacy` cannot be combined with `enumerable`".to_string()),
            (Some(legacy), None) => Ok(Some(
                legacy.parse()?.normalize().get(AttributeDimension::Enumerable),
            )),
            (None, enumerable) => Ok(enumerable),
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self.kind {
            AssertionKind::Attributes | AssertionKind::Mutation => {
                self.expected()?.ok_or("expected attributes are required")?;
            }
            AssertionKind::EnumerableDirect | AssertionKind::EnumerableByIteration => {
                self.expected_enumerable()?
                    .ok_or("expected `enumerable` is required")?;
            }
            AssertionKind::Absent => {
                if self.expected()?.is_some() {
                    return Err("`absent` takes no expected attributes".to_string());
                }
            }
        }
        Ok(())
    }
}

/// One catalog fixture: a target path, a key, and its assertions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default)]
    pub description: String,
    pub target: String,
    pub key: String,
    #[serde(rename = "assertion", default)]
    pub assertions: Vec<AssertionSpec>,
}

impl FixtureSpec {
    fn validate(&self) -> Result<(), CatalogError> {
        let missing = |field: &'static str| CatalogError::MissingField {
            fixture_id: self.id.clone(),
            field,
        };
        if self.id.trim().is_empty() {
            return Err(missing("id"));
        }
        if self.target.trim().is_empty() {
            return Err(missing("target"));
        }
        if self.key.is_empty() {
            return Err(missing("key"));
        }
        if self.assertions.is_empty() {
            return Err(missing("assertion"));
        }
        let invalid = |index: usize, detail: String| CatalogError::InvalidAssertion {
            fixture_id: self.id.clone(),
            index,
            detail,
        };
        for (index, assertion) in self.assertions.iter().enumerate() {
            assertion.validate().map_err(|detail| invalid(index, detail))?;
            if assertion.kind == AssertionKind::Mutation && index + 1 != self.assertions.len() {
                return Err(invalid(
                    index,
                    "`mutation` must be the fixture's last assertion".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Fixture for FixtureSpec {
    fn id(&self) -> &str {
        &self.id
    }

    fn run(&self, cx: &mut FixtureContext<'_>) -> Result<(), FixtureAbort> {
        let target = cx.resolve(&self.target)?;
        let key = PropertyKey::from(self.key.as_str());
        for assertion in &self.assertions {
            let invalid = |detail: String| FixtureAbort::Fault(format!("{}: {detail}", self.id));
            match assertion.kind {
                AssertionKind::Attributes | AssertionKind::Mutation => {
                    let expected = assertion
                        .expected()
                        .map_err(invalid)?
                        .ok_or_else(|| invalid("expected attributes are required".to_string()))?;
                    if assertion.kind == AssertionKind::Attributes {
                        cx.check_attributes(&target, &key, &expected)?;
                    } else {
                        cx.check_mutation(&target, &key, &expected)?;
                    }
                }
                AssertionKind::Absent => {
                    cx.check_absent(&target, &key)?;
                }
                AssertionKind::EnumerableDirect | AssertionKind::EnumerableByIteration => {
                    let expected = assertion
                        .expected_enumerable()
                        .map_err(invalid)?
                        .ok_or_else(|| invalid("expected `enumerable` is required".to_string()))?;
                    let signal = if assertion.kind == AssertionKind::EnumerableDirect {
                        EnumerationSignal::Direct
                    } else {
                        EnumerationSignal::Iteration
                    };
                    cx.check_enumerability(signal, &target, &key, expected)?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureCatalog {
    pub schema_version: String,
    #[serde(rename = "fixture", default)]
    pub fixtures: Vec<FixtureSpec>,
}

impl FixtureCatalog {
    pub const CURRENT_SCHEMA: &'static str = "franken-engine.attribute-fixtures.v1";

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|err| CatalogError::Io {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse and validate.
    pub fn parse(content: &str) -> Result<Self, CatalogError> {
        let catalog: Self =
            toml::from_str(content).map_err(|err| CatalogError::Parse(err.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.schema_version.trim() != Self::CURRENT_SCHEMA {
            return Err(CatalogError::UnsupportedSchema {
                expected: Self::CURRENT_SCHEMA.to_string(),
                actual: self.schema_version.clone(),
            });
        }
        if self.fixtures.is_empty() {
            return Err(CatalogError::EmptyCatalog);
        }
        let mut seen = BTreeSet::new();
        for fixture in &self.fixtures {
            fixture.validate()?;
            if !seen.insert(fixture.id.as_str()) {
                return Err(CatalogError::DuplicateFixture(fixture.id.clone()));
            }
        }
        Ok(())
    }

    pub fn fixtures(&self) -> Vec<Arc<dyn Fixture>> {
        self.fixtures
            .iter()
            .cloned()
            .map(|spec| Arc::new(spec) as Arc<dyn Fixture>)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.fixtures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read fixture catalog at {}: {detail}", path.display())]
    Io { path: PathBuf, detail: String },
    #[error("fixture catalog is not valid TOML: {0}")]
    Parse(String),
    #[error("unsupported fixture catalog schema: expected `{expected}`, got `{actual}`")]
    UnsupportedSchema { expected: String, actual: String },
    #[error("fixture catalog contains no fixtures")]
    EmptyCatalog,
    #[error("fixture `{fixture_id}` is missing required field `{field}`")]
    MissingField {
        fixture_id: String,
        field: &'static str,
    },
    #[error("fixture `{0}` is defined more than once")]
    DuplicateFixture(String),
    #[error("fixture `{fixture_id}` assertion {index}: {detail}")]
    InvalidAssertion {
        fixture_id: String,
        index: usize,
        detail: String,
    },
}

impl StableErrorCode for CatalogError {
    fn code(&self) -> &'static str {
        FE_ATTR_INVALID_CATALOG
    }
}
