use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::{info, warn};

use crate::eval::EvalError;
use crate::model::{SkippedEntry, TestCase};
use crate::semantic::VectorSource;
use crate::util::{sha256_file, write_json_compact};

/// Usable test cases plus everything that was dropped on the way in.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub path: PathBuf,
    pub sha256: String,
    pub total_entries: usize,
    pub cases: Vec<TestCase>,
    pub skipped: Vec<SkippedEntry>,
    pub embedded_vectors: usize,
}

#[derive(Debug)]
struct RawEntry {
    query: String,
    expected_label: String,
    vector: Option<Vec<f32>>,
}

/// Loads a `[query, expected_label, vector]` fixture.
///
/// Malformed entries are skipped and recorded. An entry without a vector is
/// embedded when `source` is given; otherwise it is skipped too. Every case
/// must share the dimension of the first usable one.
pub fn load_fixture(path: &Path, source: Option<&dyn VectorSource>) -> Result<Fixture> {
    let raw = fs::read(path).with_context(|| format!("failed to read fixture {}", path.display()))?;
    let document: Value = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse fixture {}", path.display()))?;
    let Value::Array(items) = document else {
        bail!("fixture {} must be a JSON array of entries", path.display());
    };

    let parsed = parse_entries(items, source)?;
    for skipped in &parsed.skipped {
        warn!(index = skipped.index, reason = %skipped.reason, "skipping fixture entry");
    }

    let fixture = Fixture {
        path: path.to_path_buf(),
        sha256: sha256_file(path)?,
        total_entries: parsed.total_entries,
        cases: parsed.cases,
        skipped: parsed.skipped,
        embedded_vectors: parsed.embedded_vectors,
    };

    info!(
        path = %path.display(),
        total = fixture.total_entries,
        usable = fixture.cases.len(),
        skipped = fixture.skipped.len(),
        embedded = fixture.embedded_vectors,
        "loaded fixture"
    );
    Ok(fixture)
}

struct ParsedEntries {
    total_entries: usize,
    cases: Vec<TestCase>,
    skipped: Vec<SkippedEntry>,
    embedded_vectors: usize,
}

fn parse_entries(items: Vec<Value>, source: Option<&dyn VectorSource>) -> Result<ParsedEntries> {
    let total_entries = items.len();
    let mut cases = Vec::<TestCase>::with_capacity(total_entries);
    let mut skipped = Vec::<SkippedEntry>::new();
    let mut embedded_vectors = 0usize;
    let mut dimensions = None::<usize>;

    for (index, item) in items.into_iter().enumerate() {
        let entry = match parse_entry(index, item) {
            Ok(entry) => entry,
            Err(error) => {
                skipped.push(skipped_entry(index, error));
                continue;
            }
        };

        let vector = match (entry.vector, source) {
            (Some(vector), _) => vector,
            (None, Some(source)) => {
                embedded_vectors += 1;
                source.embed(&entry.query)?
            }
            (None, None) => {
                skipped.push(skipped_entry(
                    index,
                    EvalError::MalformedFixtureEntry {
                        index,
                        reason: "no vector and no vector source configured".to_string(),
                    },
                ));
                continue;
            }
        };

        match dimensions {
            None => dimensions = Some(vector.len()),
            Some(expected) if expected != vector.len() => {
                skipped.push(skipped_entry(
                    index,
                    EvalError::MalformedFixtureEntry {
                        index,
                        reason: format!(
                            "vector has {} dimensions, earlier entries have {expected}",
                            vector.len()
                        ),
                    },
                ));
                continue;
            }
            Some(_) => {}
        }

        cases.push(TestCase {
            query: entry.query,
            expected_label: entry.expected_label,
            vector,
        });
    }

    Ok(ParsedEntries {
        total_entries,
        cases,
        skipped,
        embedded_vectors,
    })
}

fn parse_entry(index: usize, item: Value) -> Result<RawEntry, EvalError> {
    let malformed = |reason: &str| EvalError::MalformedFixtureEntry {
        index,
        reason: reason.to_string(),
    };

    let Value::Array(fields) = item else {
        return Err(malformed("entry is not an array"));
    };
    if !(2..=3).contains(&fields.len()) {
        return Err(malformed(
            "entry must hold query, expected label and vector",
        ));
    }

    let mut fields = fields.into_iter();
    let query = match fields.next() {
        Some(Value::String(query)) if !query.trim().is_empty() => query,
        _ => return Err(malformed("query must be a non-empty string")),
    };
    let expected_label = match fields.next() {
        Some(Value::String(label)) if !label.is_empty() => label,
        _ => return Err(malformed("expected label must be a non-empty string")),
    };

    let vector = match fields.next() {
        None | Some(Value::Null) => None,
        Some(Value::Array(values)) => {
            if values.is_empty() {
                return Err(malformed("vector is empty"));
            }
            let vector = values
                .iter()
                .map(|value| value.as_f64().map(|number| number as f32))
                .collect::<Option<Vec<f32>>>()
                .ok_or_else(|| malformed("vector must contain only numbers"))?;
            Some(vector)
        }
        Some(_) => return Err(malformed("vector must be an array of numbers")),
    };

    Ok(RawEntry {
        query,
        expected_label,
        vector,
    })
}

fn skipped_entry(index: usize, error: EvalError) -> SkippedEntry {
    SkippedEntry {
        index,
        reason: error.to_string(),
    }
}

/// Splits a `query;expected_label` line file. Fields after the second are
/// dropped. Blank lines are ignored and lines without a separator are
/// reported with their 0-based line index.
pub fn parse_line_file(text: &str) -> (Vec<(String, String)>, Vec<SkippedEntry>) {
    let mut pairs = Vec::<(String, String)>::new();
    let mut skipped = Vec::<SkippedEntry>::new();

    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let mut fields = line.split(';');
        match (fields.next(), fields.next()) {
            (Some(query), Some(label)) if !query.trim().is_empty() && !label.trim().is_empty() => {
                pairs.push((query.trim().to_string(), label.trim().to_string()));
            }
            (_, Some(_)) => skipped.push(SkippedEntry {
                index,
                reason: "query and expected label must both be non-empty".to_string(),
            }),
            (_, None) => skipped.push(SkippedEntry {
                index,
                reason: "missing `;` separator".to_string(),
            }),
        }
    }

    (pairs, skipped)
}

pub fn write_fixture(path: &Path, cases: &[TestCase]) -> Result<()> {
    let triples = cases
        .iter()
        .map(|case| (&case.query, &case.expected_label, &case.vector))
        .collect::<Vec<_>>();
    write_json_compact(path, &triples)
}
