use std::fs;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::PrepareArgs;
use crate::config::CachePaths;
use crate::fixture::{parse_line_file, write_fixture};
use crate::model::TestCase;
use crate::semantic::{LocalHashEmbedder, VectorSource};

pub fn run(args: PrepareArgs) -> Result<()> {
    let paths = CachePaths::new(&args.cache_root);
    let output_path = args.output.clone().unwrap_or_else(|| paths.fixture_path());

    let text = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let (pairs, skipped) = parse_line_file(&text);
    for entry in &skipped {
        warn!(line = entry.index, reason = %entry.reason, "skipping input line");
    }
    if pairs.is_empty() {
        bail!(
            "no `query;expected_label` lines found in {}",
            args.input.display()
        );
    }

    let embedder = LocalHashEmbedder::new(args.dimensions);
    info!(
        input = %args.input.display(),
        queries = pairs.len(),
        model_id = %embedder.model_id(),
        dimensions = embedder.dimensions(),
        "embedding test queries"
    );

    let queries = pairs
        .iter()
        .map(|(query, _)| query.clone())
        .collect::<Vec<String>>();
    let vectors = embedder.embed_batch(&queries)?;

    let cases = pairs
        .into_iter()
        .zip(vectors)
        .map(|((query, expected_label), vector)| TestCase {
            query,
            expected_label,
            vector,
        })
        .collect::<Vec<TestCase>>();

    write_fixture(&output_path, &cases)?;
    info!(
        path = %output_path.display(),
        cases = cases.len(),
        skipped_lines = skipped.len(),
        "wrote test-vector fixture"
    );

    Ok(())
}
