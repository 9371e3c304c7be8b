//! Run artifacts: report, run manifest, and the JSONL evidence stream.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::runner::AttributeRunResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeCollectedArtifacts {
    pub report_path: PathBuf,
    pub run_manifest_path: PathBuf,
    pub attribute_evidence_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AttributeEvidenceCollector {
    root: PathBuf,
}

impl AttributeEvidenceCollector {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Write `<root>/<run_id>/{report.json, run_manifest.json,
    /// attribute_evidence.jsonl}`. Each file is replaced atomically.
    pub fn collect(&self, run: &AttributeRunResult) -> io::Result<AttributeCollectedArtifacts> {
        let run_root = self.root.join(&run.run_id);
        fs::create_dir_all(&run_root)?;

        let report_path = run_root.join("report.json");
        let report_bytes = run.report.to_json_bytes().map_err(invalid_data)?;
        write_atomic(&report_path, &report_bytes)?;

        let run_manifest_path = run_root.join("run_manifest.json");
        write_atomic(&run_manifest_path, &canonical_json_bytes(&run.summary)?)?;

        let mut evidence_lines = String::new();
        let summary_line = serde_json::to_string(&AttributeEvidenceSummaryLine {
            run_manifest: "run_manifest.json".to_string(),
            report: "report.json".to_string(),
            run_id: run.run_id.clone(),
            fixture_set_hash: run.fixture_set_hash.clone(),
            pass_count: run.report.summary.passed,
            fail_count: run.report.summary.failed,
            error_count: run.report.summary.errored,
            complete: run.report.complete,
            env_fingerprint: run.summary.env_fingerprint.clone(),
        })
        .map_err(invalid_data)?;
        evidence_lines.push_str(&summary_line);
        evidence_lines.push('\n');

        for event in &run.logs {
            let line = serde_json::to_string(event).map_err(invalid_data)?;
            evidence_lines.push_str(&line);
            evidence_lines.push('\n');
        }

        let attribute_evidence_path = run_root.join("attribute_evidence.jsonl");
        write_atomic(&attribute_evidence_path, evidence_lines.as_bytes())?;

        Ok(AttributeCollectedArtifacts {
            report_path,
            run_manifest_path,
            attribute_evidence_path,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct AttributeEvidenceSummaryLine {
    run_manifest: String,
    report: String,
    run_id: String,
    fixture_set_hash: String,
    pass_count: usize,
    fail_count: usize,
    error_count: usize,
    complete: bool,
    env_fingerprint: String,
}

fn invalid_data(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

pub(crate) fn canonical_json_bytes<T: Serialize>(value: &T) -> io::Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(invalid_data)
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Write via a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
