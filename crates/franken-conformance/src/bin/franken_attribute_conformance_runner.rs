use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use frankenengine_conformance::evidence::AttributeEvidenceCollector;
use frankenengine_conformance::{
    AttributeRunner, AttributeRunnerConfig, CancellationToken, FixtureCatalog,
};

#[derive(Debug, Clone)]
struct CliArgs {
    fixtures_path: PathBuf,
    config_path: Option<PathBuf>,
    output_root: PathBuf,
    worker_count: Option<usize>,
    timeout_ms: Option<u64>,
    run_date: Option<String>,
    trace_prefix: Option<String>,
    policy_id: Option<String>,
}

fn default_fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/attribute_fixtures.toml")
}

fn default_output_root() -> PathBuf {
    PathBuf::from("artifacts/attribute_conformance")
}

fn usage() -> &'static str {
    "usage: franken_attribute_conformance_runner [--fixtures <path>] [--config <path>] [--output-root <path>] [--worker-count <n>] [--timeout-ms <n>] [--run-date <YYYY-MM-DD>] [--trace-prefix <prefix>] [--policy-id <id>]"
}

fn parse_args() -> Result<CliArgs, String> {
    let mut parsed = CliArgs {
        fixtures_path: default_fixtures_path(),
        config_path: None,
        output_root: default_output_root(),
        worker_count: None,
        timeout_ms: None,
        run_date: None,
        trace_prefix: None,
        policy_id: None,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .ok_or_else(|| format!("{flag} requires a value"))
        };
        match arg.as_str() {
            "--fixtures" => parsed.fixtures_path = PathBuf::from(value("--fixtures")?),
            "--config" => parsed.config_path = Some(PathBuf::from(value("--config")?)),
            "--output-root" => parsed.output_root = PathBuf::from(value("--output-root")?),
            "--worker-count" => {
                parsed.worker_count = Some(
                    value("--worker-count")?
                        .parse::<usize>()
                        .map_err(|_| "--worker-count must be a positive integer".to_string())?,
                );
            }
            "--timeout-ms" => {
                parsed.timeout_ms = Some(
                    value("--timeout-ms")?
                        .parse::<u64>()
                        .map_err(|_| "--timeout-ms must be a positive integer".to_string())?,
                );
            }
            "--run-date" => parsed.run_date = Some(value("--run-date")?),
            "--trace-prefix" => parsed.trace_prefix = Some(value("--trace-prefix")?),
            "--policy-id" => parsed.policy_id = Some(value("--policy-id")?),
            "--help" | "-h" => return Err(usage().to_string()),
            other => {
                return Err(format!(
                    "unknown argument: {other}. {usage}",
                    usage = usage()
                ));
            }
        }
    }
    Ok(parsed)
}

/// Config file (or defaults) with CLI flags layered on top.
fn resolve_config(args: &CliArgs) -> Result<AttributeRunnerConfig> {
    let mut config = match &args.config_path {
        Some(path) => AttributeRunnerConfig::load_toml(path)
            .with_context(|| format!("loading runner config {}", path.display()))?,
        None => AttributeRunnerConfig {
            run_date: Utc::now().format("%Y-%m-%d").to_string(),
            ..AttributeRunnerConfig::default()
        },
    };
    if let Some(worker_count) = args.worker_count {
        config.worker_count = worker_count;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.fixture_timeout_ms = timeout_ms;
    }
    if let Some(run_date) = &args.run_date {
        config.run_date = run_date.clone();
    }
    if let Some(trace_prefix) = &args.trace_prefix {
        config.trace_prefix = trace_prefix.clone();
    }
    if let Some(policy_id) = &args.policy_id {
        config.policy_id = policy_id.clone();
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = parse_args().map_err(|err| anyhow!(err))?;
    let config = resolve_config(&args)?;

    let catalog = FixtureCatalog::load(&args.fixtures_path)
        .with_context(|| format!("loading fixtures {}", args.fixtures_path.display()))?;
    let runner = AttributeRunner::new(config);
    let run = runner.run_catalog(&catalog, &CancellationToken::new())?;

    let collector = AttributeEvidenceCollector::new(&args.output_root)
        .with_context(|| format!("creating output root {}", args.output_root.display()))?;
    let artifacts = collector.collect(&run).context("writing run evidence")?;

    println!("attribute_conformance run_id={}", run.run_id);
    println!("attribute_conformance fixtures={}", run.summary.total_fixtures);
    println!("attribute_conformance total={}", run.report.summary.total);
    println!("attribute_conformance passed={}", run.report.summary.passed);
    println!("attribute_conformance failed={}", run.report.summary.failed);
    println!("attribute_conformance errored={}", run.report.summary.errored);
    println!("attribute_conformance complete={}", run.report.complete);
    println!(
        "attribute_conformance report={}",
        artifacts.report_path.display()
    );
    println!(
        "attribute_conformance run_manifest={}",
        artifacts.run_manifest_path.display()
    );
    println!(
        "attribute_conformance evidence={}",
        artifacts.attribute_evidence_path.display()
    );

    if let Err(err) = run.enforce_ci_gate() {
        eprintln!("{err}");
        for entry in run.report.entries.iter().filter(|entry| entry.message.is_some()) {
            eprintln!(
                "  {}#{} {}: {}",
                entry.fixture_id,
                entry.assertion_index,
                entry.outcome,
                entry.message.as_deref().unwrap_or_default()
            );
        }
    }
    std::process::exit(run.exit_code());
}
