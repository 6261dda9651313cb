use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::EvalConfig;
use crate::eval::{AggregateReport, Strategy};

pub const REPORT_VERSION: u32 = 1;
pub const INDEX_MANIFEST_VERSION: u32 = 1;

/// One labeled query from the fixture.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub query: String,
    pub expected_label: String,
    pub vector: Vec<f32>,
}

/// A document as stored in the retrieval backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: String,
    pub term: String,
    pub definition: String,
    pub vector: Vec<f32>,
}

/// A document as read from the source JSON, before ids are normalized and
/// missing vectors are filled in.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceDocument {
    #[serde(default)]
    pub id: serde_json::Value,
    pub term: String,
    pub definition: String,
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureSummary {
    pub path: String,
    pub sha256: String,
    pub total_entries: usize,
    pub evaluated: usize,
    pub skipped: usize,
    pub skipped_entries: Vec<SkippedEntry>,
    #[serde(default)]
    pub embedded_vectors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub report_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub duration_ms: u64,
    pub backend: String,
    pub fixture: FixtureSummary,
    pub config: EvalConfig,
    pub strategies: BTreeMap<Strategy, AggregateReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub backend: String,
    pub documents_path: String,
    pub documents_sha256: String,
    pub dimensions: usize,
    pub documents_read: usize,
    pub documents_indexed: usize,
    pub documents_embedded: usize,
    pub documents_skipped: usize,
    pub skipped_entries: Vec<SkippedEntry>,
    pub document_count: usize,
}
