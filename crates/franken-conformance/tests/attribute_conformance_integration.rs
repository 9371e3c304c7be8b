#![forbid(unsafe_code)]
//! Integration tests for the attribute conformance engine.
//!
//! Drives fixtures through the public API: reference realm scenarios, a
//! realm whose enumeration disagrees with its descriptors, report ordering
//! and idempotence, timeouts, panics, cancellation, catalogs on disk, and
//! the evidence collector.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use frankenengine_conformance::aggregator::Aggregator;
use frankenengine_conformance::attributes::{AttributeSet, ReportedAttributes};
use frankenengine_conformance::catalog::CatalogError;
use frankenengine_conformance::error_code::{
    FE_ATTR_ABSENT, FE_ATTR_FIXTURE_FAULT, FE_ATTR_MISMATCH, FE_ATTR_TIMEOUT,
};
use frankenengine_conformance::evidence::AttributeEvidenceCollector;
use frankenengine_conformance::object_model::{JsValue, PropertyKey};
use frankenengine_conformance::runner::RealmFactory;
use frankenengine_conformance::{
    AssertionContext, AttributeRunError, AttributeRunner, AttributeRunnerConfig,
    AttributeSource, CancellationToken, ConformanceRealm, ExpectedAttributes, Fixture,
    FixtureAbort, FixtureCatalog, FixtureContext, FnFixture, LegacyAttributes,
    MutableAttributeSource, ProbeError, Realm, Verdict, VerdictOutcome,
};

// ===========================================================================
// Helpers
// ===========================================================================

fn config() -> AttributeRunnerConfig {
    AttributeRunnerConfig {
        trace_prefix: "trace-attribute-it".into(),
        policy_id: "policy-attribute-it".into(),
        worker_count: 3,
        fixture_timeout_ms: 5_000,
        run_date: "2026-10-19".into(),
    }
}

fn fixture<F>(id: &str, body: F) -> Arc<dyn Fixture>
where
    F: Fn(&mut FixtureContext<'_>) -> Result<(), FixtureAbort> + Send + Sync + 'static,
{
    Arc::new(FnFixture::new(id, body))
}

fn frozen() -> ExpectedAttributes {
    ExpectedAttributes::from_legacy(
        LegacyAttributes::parse("{ ReadOnly, DontDelete, DontEnum }").expect("notation"),
    )
}

/// `Date.prototype.setSeconds.length` carries the frozen legacy attributes.
fn set_seconds_length_fixture(id: &str) -> Arc<dyn Fixture> {
    fixture(id, |cx| {
        let target = cx.resolve("Date.prototype.setSeconds")?;
        cx.check_attributes(&target, &PropertyKey::from("length"), &frozen())?;
        Ok(())
    })
}

fn catalog_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/attribute_fixtures.toml")
}

fn temp_root(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "franken-attribute-it-{tag}-{}",
        std::process::id()
    ))
}

fn run(fixtures: &[Arc<dyn Fixture>]) -> frankenengine_conformance::AttributeRunResult {
    AttributeRunner::new(config())
        .run(fixtures, &CancellationToken::new())
        .expect("run")
}

/// A realm whose `for-in` walk also visits `length`, whatever its
/// descriptor says.
struct LeakyEnumerationRealm(Realm);

impl AttributeSource for LeakyEnumerationRealm {
    fn own_attributes(
        &self,
        target: &JsValue,
        key: &PropertyKey,
    ) -> Result<Option<ReportedAttributes>, ProbeError> {
        self.0.own_attributes(target, key)
    }

    fn is_enumerable_direct(&self, target: &JsValue, key: &PropertyKey) -> Result<bool, ProbeError> {
        self.0.is_enumerable_direct(target, key)
    }

    fn enumeration_keys(&self, target: &JsValue) -> Result<Vec<PropertyKey>, ProbeError> {
        let mut keys = self.0.enumeration_keys(target)?;
        let length = PropertyKey::from("length");
        if !keys.contains(&length) {
            keys.push(length);
        }
        Ok(keys)
    }
}

impl MutableAttributeSource for LeakyEnumerationRealm {
    fn get_value(&self, target: &JsValue, key: &PropertyKey) -> Result<JsValue, ProbeError> {
        self.0.get_value(target, key)
    }

    fn assign(
        &mut self,
        target: &JsValue,
        key: &PropertyKey,
        value: JsValue,
    ) -> Result<bool, ProbeError> {
        self.0.assign(target, key, value)
    }

    fn delete(&mut self, target: &JsValue, key: &PropertyKey) -> Result<bool, ProbeError> {
        self.0.delete(target, key)
    }
}

impl ConformanceRealm for LeakyEnumerationRealm {
    fn resolve(&self, path: &str) -> Result<JsValue, ProbeError> {
        self.0.resolve(path)
    }
}

fn leaky_factory() -> RealmFactory {
    Arc::new(|| {
        Ok(Box::new(LeakyEnumerationRealm(Realm::new()?)) as Box<dyn ConformanceRealm>)
    })
}

// ===========================================================================
// Reference realm scenarios
// ===========================================================================

#[test]
fn set_seconds_length_passes_on_reference_realm() {
    let result = run(&[set_seconds_length_fixture("S15.9.5.30_A3_T3")]);
    assert_eq!(result.report.entries.len(), 1);
    let entry = &result.report.entries[0];
    assert_eq!(entry.fixture_id, "S15.9.5.30_A3_T3");
    assert_eq!(entry.assertion_index, 0);
    assert_eq!(entry.outcome, VerdictOutcome::Pass);
    assert_eq!(entry.message, None);
    assert!(result.report.complete);
    assert_eq!(result.exit_code(), 0);
    assert!(result.enforce_ci_gate().is_ok());
}

#[test]
fn missing_property_fails_as_absent() {
    let fixtures = vec![fixture("nonexistent-key", |cx| {
        let target = cx.resolve("Date.prototype")?;
        cx.check_attributes(&target, &PropertyKey::from("nonexistent"), &frozen())?;
        Ok(())
    })];
    let result = run(&fixtures);
    let entry = &result.report.entries[0];
    assert_eq!(entry.outcome, VerdictOutcome::Fail);
    assert_eq!(entry.message.as_deref(), Some("property absent"));
    assert_eq!(result.logs[0].error_code.as_deref(), Some(FE_ATTR_ABSENT));
    assert_eq!(result.exit_code(), 1);
}

#[test]
fn primitive_target_is_not_applicable() {
    let fixtures = vec![fixture("primitive", |cx| {
        let target = cx.resolve("Date.prototype.setSeconds.length")?;
        cx.check_attributes(&target, &PropertyKey::from("length"), &frozen())?;
        Ok(())
    })];
    let result = run(&fixtures);
    let entry = &result.report.entries[0];
    assert_eq!(entry.outcome, VerdictOutcome::Fail);
    let message = entry.message.as_deref().expect("message");
    assert!(message.starts_with("property not applicable"), "{message}");
}

#[test]
fn unresolved_target_is_an_error_verdict() {
    let fixtures = vec![fixture("unresolved", |cx| {
        cx.resolve("Date.prototype.noSuchMethod")?;
        Ok(())
    })];
    let result = run(&fixtures);
    let entry = &result.report.entries[0];
    assert_eq!(entry.outcome, VerdictOutcome::Error);
    assert!(
        entry
            .message
            .as_deref()
            .is_some_and(|message| message.contains("noSuchMethod"))
    );
}

#[test]
fn mutation_check_confirms_frozen_length() {
    let fixtures = vec![fixture("S15.9.5.30_A3_T2", |cx| {
        let target = cx.resolve("Date.prototype.setSeconds")?;
        let key = PropertyKey::from("length");
        cx.check_attributes(&target, &key, &frozen())?;
        cx.check_mutation(&target, &key, &frozen())?;
        Ok(())
    })];
    let result = run(&fixtures);
    let outcomes: Vec<_> = result.report.entries.iter().map(|e| e.outcome).collect();
    assert_eq!(outcomes, vec![VerdictOutcome::Pass, VerdictOutcome::Pass]);
}

#[test]
fn method_slots_are_writable_and_configurable() {
    let fixtures = vec![fixture("setSeconds-slot", |cx| {
        let target = cx.resolve("Date.prototype")?;
        let key = PropertyKey::from("setSeconds");
        let expected = ExpectedAttributes::new(AttributeSet::new(true, false, true));
        cx.check_attributes(&target, &key, &expected)?;
        cx.check_mutation(&target, &key, &expected)?;
        Ok(())
    })];
    let result = run(&fixtures);
    assert!(result.report.is_green(), "{:?}", result.report.entries);
}

#[test]
fn each_fixture_gets_a_fresh_realm() {
    // The first fixture deletes the method; the second still sees it.
    let fixtures = vec![
        fixture("deletes", |cx| {
            let target = cx.resolve("Date.prototype")?;
            let key = PropertyKey::from("setSeconds");
            let expected = ExpectedAttributes::new(AttributeSet::new(true, false, true));
            cx.check_mutation(&target, &key, &expected)?;
            Ok(())
        }),
        fixture("observes", |cx| {
            cx.resolve("Date.prototype.setSeconds")?;
            Ok(())
        }),
    ];
    let config = AttributeRunnerConfig {
        worker_count: 1,
        ..config()
    };
    let result = AttributeRunner::new(config)
        .run(&fixtures, &CancellationToken::new())
        .expect("run");
    assert!(result.report.is_green(), "{:?}", result.report.entries);
}

// ===========================================================================
// Enumeration disagreement
// ===========================================================================

#[test]
fn leaky_enumeration_fails_with_evidence() {
    let runner = AttributeRunner::with_realm_factory(config(), leaky_factory());
    let result = runner
        .run(
            &[set_seconds_length_fixture("S15.9.5.30_A3_T3")],
            &CancellationToken::new(),
        )
        .expect("run");
    let entry = &result.report.entries[0];
    assert_eq!(entry.outcome, VerdictOutcome::Fail);
    assert_eq!(
        entry.message.as_deref(),
        Some("enumerable mismatch: descriptor=false, iteration=true")
    );
    let event = result
        .logs
        .iter()
        .find(|event| event.event == "fixture_assertion")
        .expect("assertion event");
    assert_eq!(event.error_code.as_deref(), Some(FE_ATTR_MISMATCH));
}

#[test]
fn leaky_enumeration_shows_in_iteration_check_only() {
    let fixtures = vec![fixture("signals", |cx| {
        let target = cx.resolve("Date.prototype.setSeconds")?;
        let key = PropertyKey::from("length");
        assert!(!cx.is_enumerable_direct(&target, &key)?);
        assert!(cx.is_enumerable_by_iteration(&target, &key)?);
        Ok(())
    })];
    let runner = AttributeRunner::with_realm_factory(config(), leaky_factory());
    let result = runner.run(&fixtures, &CancellationToken::new()).expect("run");
    assert_eq!(result.report.entries[0].outcome, VerdictOutcome::Pass);
}

// ===========================================================================
// Report ordering and finalization
// ===========================================================================

#[test]
fn report_preserves_submission_and_assertion_order() {
    let fixtures = vec![
        fixture("z-last-alphabetically", |cx| {
            cx.fail("#1: first");
            cx.fail("#2: second");
            Ok(())
        }),
        set_seconds_length_fixture("a-first-alphabetically"),
        fixture("m-middle", |_| Ok(())),
    ];
    let result = run(&fixtures);
    let order: Vec<(&str, u32)> = result
        .report
        .entries
        .iter()
        .map(|e| (e.fixture_id.as_str(), e.assertion_index))
        .collect();
    assert_eq!(
        order,
        vec![
            ("z-last-alphabetically", 0),
            ("z-last-alphabetically", 1),
            ("a-first-alphabetically", 0),
            ("m-middle", 0),
        ]
    );
    assert_eq!(result.report.summary.total, 4);
    assert_eq!(result.report.summary.failed, 2);
    assert_eq!(result.report.summary.passed, 2);
}

#[test]
fn report_bytes_are_stable_across_runs_and_worker_counts() {
    let fixtures = vec![
        set_seconds_length_fixture("one"),
        fixture("two", |cx| {
            cx.fail("#1: expected failure");
            Ok(())
        }),
        set_seconds_length_fixture("three"),
    ];
    let first = run(&fixtures);
    let second = AttributeRunner::new(AttributeRunnerConfig {
        worker_count: 1,
        ..config()
    })
    .run(&fixtures, &CancellationToken::new())
    .expect("run");
    assert_eq!(
        first.report.to_json_bytes().expect("json"),
        second.report.to_json_bytes().expect("json")
    );
    assert_eq!(first.fixture_set_hash, second.fixture_set_hash);
}

#[test]
fn finalize_is_idempotent_and_closes_the_aggregator() {
    let aggregator = Aggregator::new();
    aggregator.register_fixture("f", 0).expect("register");
    aggregator
        .record(Verdict::pass(AssertionContext::new("f", 0)))
        .expect("record");
    let first = aggregator.finalize().expect("finalize");
    let second = aggregator.finalize().expect("finalize again");
    assert_eq!(
        first.to_json_bytes().expect("json"),
        second.to_json_bytes().expect("json")
    );
    assert!(
        aggregator
            .record(Verdict::pass(AssertionContext::new("f", 1)))
            .is_err()
    );
}

#[test]
fn concurrent_records_keep_per_fixture_order() {
    let aggregator = Aggregator::new();
    let ids: Vec<String> = (0..8).map(|i| format!("fixture-{i}")).collect();
    for (ordinal, id) in ids.iter().enumerate() {
        aggregator
            .register_fixture(id, ordinal as u32)
            .expect("register");
    }
    thread::scope(|scope| {
        for id in &ids {
            let aggregator = &aggregator;
            scope.spawn(move || {
                for index in 0..5 {
                    aggregator
                        .record(Verdict::pass(AssertionContext::new(id.clone(), index)))
                        .expect("record");
                }
            });
        }
    });
    let report = aggregator.finalize().expect("finalize");
    assert_eq!(report.summary.total, 40);
    for (position, entry) in report.entries.iter().enumerate() {
        assert_eq!(entry.fixture_id, ids[position / 5]);
        assert_eq!(entry.assertion_index as usize, position % 5);
    }
}

// ===========================================================================
// Isolation: timeouts, panics, cancellation
// ===========================================================================

#[test]
fn runaway_fixture_times_out_without_blocking_others() {
    let fixtures = vec![
        fixture("spins", |cx| {
            loop {
                cx.checkpoint()?;
                thread::sleep(Duration::from_millis(1));
            }
        }),
        set_seconds_length_fixture("healthy"),
    ];
    let config = AttributeRunnerConfig {
        fixture_timeout_ms: 50,
        worker_count: 1,
        ..config()
    };
    let result = AttributeRunner::new(config)
        .run(&fixtures, &CancellationToken::new())
        .expect("run");
    let spins: Vec<_> = result.report.entries_for("spins").collect();
    assert_eq!(spins.len(), 1);
    assert_eq!(spins[0].outcome, VerdictOutcome::Error);
    let event = result
        .logs
        .iter()
        .find(|event| event.fixture_id.as_deref() == Some("spins"))
        .expect("spins event");
    assert_eq!(event.error_code.as_deref(), Some(FE_ATTR_TIMEOUT));
    let healthy: Vec<_> = result.report.entries_for("healthy").collect();
    assert_eq!(healthy[0].outcome, VerdictOutcome::Pass);
    assert!(result.report.complete);
    assert_eq!(result.exit_code(), 1);
}

#[test]
fn fixture_that_never_checkpoints_is_abandoned_by_the_watchdog() {
    let fixtures = vec![fixture("sleeps", |_| {
        thread::sleep(Duration::from_millis(300));
        Ok(())
    })];
    let config = AttributeRunnerConfig {
        fixture_timeout_ms: 50,
        worker_count: 1,
        ..config()
    };
    let result = AttributeRunner::new(config)
        .run(&fixtures, &CancellationToken::new())
        .expect("run");
    assert_eq!(result.report.entries.len(), 1);
    let entry = &result.report.entries[0];
    assert_eq!(entry.assertion_index, 0);
    assert_eq!(entry.outcome, VerdictOutcome::Error);
    assert_eq!(entry.message.as_deref(), Some("fixture timed out after 50ms"));
    let event = result
        .logs
        .iter()
        .find(|event| event.fixture_id.as_deref() == Some("sleeps"))
        .expect("sleeps event");
    assert_eq!(event.error_code.as_deref(), Some(FE_ATTR_TIMEOUT));
    assert_eq!(result.summary.timed_out_fixtures, 1);
    assert!(result.report.complete);
}

#[test]
fn panicking_fixture_becomes_fixture_fault() {
    let fixtures = vec![
        fixture("panics", |_| panic!("probe helper blew up")),
        set_seconds_length_fixture("after-panic"),
    ];
    let result = run(&fixtures);
    let panics: Vec<_> = result.report.entries_for("panics").collect();
    assert_eq!(panics[0].outcome, VerdictOutcome::Error);
    assert_eq!(
        panics[0].message.as_deref(),
        Some("fixture panicked: probe helper blew up")
    );
    let event = result
        .logs
        .iter()
        .find(|event| event.fixture_id.as_deref() == Some("panics"))
        .expect("panics event");
    assert_eq!(event.error_code.as_deref(), Some(FE_ATTR_FIXTURE_FAULT));
    assert_eq!(
        result.report.entries_for("after-panic").next().map(|e| e.outcome),
        Some(VerdictOutcome::Pass)
    );
}

#[test]
fn cancellation_yields_partial_report() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let fixtures = vec![
        fixture("a-cancels", move |_| {
            trigger.cancel();
            Ok(())
        }),
        set_seconds_length_fixture("b-never-runs"),
    ];
    let config = AttributeRunnerConfig {
        worker_count: 1,
        ..config()
    };
    let result = AttributeRunner::new(config)
        .run(&fixtures, &cancel)
        .expect("run");
    assert!(!result.report.complete);
    assert_eq!(
        result.report.incomplete_reason.as_deref(),
        Some("run cancelled after 1 of 2 fixtures")
    );
    assert_eq!(result.report.entries_for("b-never-runs").count(), 0);
    assert_eq!(result.exit_code(), 1);
    let gate = result.enforce_ci_gate().unwrap_err();
    assert_eq!(gate.failed, 0);
    assert!(gate.incomplete_reason.is_some());
}

#[test]
fn fixture_stopped_by_run_cancellation_is_discarded() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let fixtures = vec![fixture("interrupted", move |cx| {
        cx.fail("#1: recorded before cancellation");
        trigger.cancel();
        cx.checkpoint()?;
        Ok(())
    })];
    let result = AttributeRunner::new(config())
        .run(&fixtures, &cancel)
        .expect("run");
    assert!(!result.report.complete);
    assert!(result.report.entries.is_empty());
    assert_eq!(result.summary.dispatched_fixtures, 0);
}

// ===========================================================================
// Catalogs, config, evidence
// ===========================================================================

#[test]
fn bundled_catalog_is_green_on_reference_realm() {
    let catalog = FixtureCatalog::load(catalog_path()).expect("catalog");
    assert!(!catalog.is_empty());
    let result = AttributeRunner::new(config())
        .run_catalog(&catalog, &CancellationToken::new())
        .expect("run");
    assert!(
        result.report.is_green(),
        "{}",
        String::from_utf8_lossy(&result.report.to_json_bytes().expect("json"))
    );
    assert_eq!(result.summary.total_fixtures, catalog.len());
    let t3: Vec<_> = result.report.entries_for("S15.9.5.30_A3_T3").collect();
    assert_eq!(t3.len(), 3);
}

#[test]
fn catalog_mutation_on_missing_or_inherited_key_fails_as_absent() {
    let catalog = FixtureCatalog::parse(
        r#"
schema_version = "franken-engine.attribute-fixtures.v1"

[[fixture]]
id = "absent"
section = "15.9.5.30"
target = "Date.prototype.setSeconds"
key = "nonexistent"

[[fixture.assertion]]
kind = "mutation"
writable = true
enumerable = true
configurable = true

[[fixture]]
id = "inherited"
section = "15.9.5.30"
target = "Date.prototype.setSeconds"
key = "constructor"

[[fixture.assertion]]
kind = "mutation"
legacy = ["DontEnum"]
"#,
    )
    .expect("catalog");
    let result = AttributeRunner::new(config())
        .run_catalog(&catalog, &CancellationToken::new())
        .expect("run");
    for id in ["absent", "inherited"] {
        let entries: Vec<_> = result.report.entries_for(id).collect();
        assert_eq!(entries.len(), 1, "{id}");
        assert_eq!(entries[0].outcome, VerdictOutcome::Fail, "{id}");
        assert_eq!(entries[0].message.as_deref(), Some("property absent"), "{id}");
        let event = result
            .logs
            .iter()
            .find(|event| event.fixture_id.as_deref() == Some(id))
            .expect("event");
        assert_eq!(event.error_code.as_deref(), Some(FE_ATTR_ABSENT), "{id}");
    }
    assert!(!result.report.is_green());
}

#[test]
fn run_catalog_file_matches_manual_pipeline() {
    let cancel = CancellationToken::new();
    let via_file =
        frankenengine_conformance::run_catalog_file(catalog_path(), config(), &cancel)
            .expect("run");
    let catalog = FixtureCatalog::load(catalog_path()).expect("catalog");
    let manual = AttributeRunner::new(config())
        .run_catalog(&catalog, &cancel)
        .expect("run");
    assert_eq!(via_file.run_id, manual.run_id);
    assert_eq!(via_file.report, manual.report);
}

#[test]
fn catalog_with_bad_schema_is_rejected_before_running() {
    let err = FixtureCatalog::parse("schema_version = \"franken-engine.attribute-fixtures.v0\"\n")
        .unwrap_err();
    assert!(matches!(err, CatalogError::UnsupportedSchema { .. }));
}

#[test]
fn config_toml_fills_missing_keys_with_defaults() {
    let root = temp_root("config");
    fs::create_dir_all(&root).expect("mkdir");
    let path = root.join("runner.toml");
    fs::write(&path, "worker_count = 2\nrun_date = \"2026-10-19\"\n").expect("write");
    let config = AttributeRunnerConfig::load_toml(&path).expect("load");
    assert_eq!(config.worker_count, 2);
    assert_eq!(config.run_date, "2026-10-19");
    assert_eq!(
        config.fixture_timeout_ms,
        AttributeRunnerConfig::default().fixture_timeout_ms
    );

    fs::write(&path, "worker_count = 0\n").expect("write");
    assert!(matches!(
        AttributeRunnerConfig::load_toml(&path),
        Err(AttributeRunError::InvalidConfig(_))
    ));
    let _ = fs::remove_dir_all(root);
}

#[test]
fn evidence_collector_writes_report_manifest_and_stream() {
    let fixtures = vec![
        set_seconds_length_fixture("evidence-pass"),
        fixture("evidence-absent", |cx| {
            let target = cx.resolve("Date.prototype")?;
            cx.check_absent(&target, &PropertyKey::from("setSeconds"))?;
            Ok(())
        }),
    ];
    let result = run(&fixtures);
    let root = temp_root("evidence");
    let collector = AttributeEvidenceCollector::new(&root).expect("collector");
    let artifacts = collector.collect(&result).expect("collect");

    let report: serde_json::Value =
        serde_json::from_slice(&fs::read(&artifacts.report_path).expect("report")).expect("json");
    assert_eq!(report["complete"], serde_json::json!(true));
    assert_eq!(report["summary"]["failed"], serde_json::json!(1));
    assert_eq!(report["entries"][0]["fixtureId"], serde_json::json!("evidence-pass"));

    let manifest: serde_json::Value =
        serde_json::from_slice(&fs::read(&artifacts.run_manifest_path).expect("manifest"))
            .expect("json");
    assert_eq!(manifest["run_id"], serde_json::json!(result.run_id));

    let stream = fs::read_to_string(&artifacts.attribute_evidence_path).expect("stream");
    let lines: Vec<serde_json::Value> = stream
        .lines()
        .map(|line| serde_json::from_str(line).expect("jsonl line"))
        .collect();
    assert_eq!(lines.len(), 1 + result.logs.len());
    assert_eq!(lines[0]["fail_count"], serde_json::json!(1));
    let absent = lines
        .iter()
        .find(|line| line["fixture_id"] == serde_json::json!("evidence-absent"))
        .expect("absent event");
    assert_eq!(absent["error_code"], serde_json::json!(FE_ATTR_MISMATCH));
    assert!(
        absent["error_detail"]
            .as_str()
            .is_some_and(|detail| detail.starts_with("property present"))
    );
    let _ = fs::remove_dir_all(root);
}
