#![forbid(unsafe_code)]

//! Property-attribute conformance checking.
//!
//! Fixtures probe a runtime's object model through [`probe::AttributeSource`],
//! assertions turn probe output into [`assertion::Verdict`]s, and the
//! [`aggregator::Aggregator`] folds verdicts into a [`aggregator::Report`].

pub mod aggregator;
pub mod assertion;
pub mod attributes;
pub mod catalog;
pub mod checkpoint;
pub mod error_code;
pub mod evidence;
pub mod fixture;
pub mod object_model;
pub mod probe;
pub mod realm;
pub mod runner;

pub use aggregator::{Aggregator, EngineFault, Report, ReportEntry, ReportSummary};
pub use assertion::{AssertionContext, Verdict, VerdictOutcome};
pub use attributes::{AttributeSet, ExpectedAttributes, LegacyAttributes};
pub use catalog::FixtureCatalog;
pub use checkpoint::CancellationToken;
pub use fixture::{Fixture, FixtureAbort, FixtureContext, FnFixture};
pub use probe::{AttributeSource, MutableAttributeSource, ProbeError, ProbeResult};
pub use realm::{ConformanceRealm, Realm};
pub use runner::{AttributeRunError, AttributeRunResult, AttributeRunner, AttributeRunnerConfig};

use std::path::Path;

/// Load a fixture catalog and run it against the reference realm.
pub fn run_catalog_file(
    path: impl AsRef<Path>,
    config: AttributeRunnerConfig,
    cancel: &CancellationToken,
) -> Result<AttributeRunResult, AttributeRunError> {
    let catalog = FixtureCatalog::load(path)?;
    AttributeRunner::new(config).run_catalog(&catalog, cancel)
}
