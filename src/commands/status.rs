use std::fs;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::backend::SqliteBackend;
use crate::cli::StatusArgs;
use crate::config::CachePaths;
use crate::model::{EvaluationReport, IndexRunManifest};
use crate::util::read_json;

pub fn run(args: StatusArgs) -> Result<()> {
    let paths = CachePaths::new(&args.cache_root);
    let fixture_path = paths.fixture_path();
    let index_manifest_path = paths.index_manifest_path();
    let report_path = paths.report_path();
    let db_path = args.db_path.clone().unwrap_or_else(|| paths.db_path());

    info!(cache_root = %args.cache_root.display(), "status requested");

    if fixture_path.exists() {
        let metadata = fs::metadata(&fixture_path)
            .with_context(|| format!("failed to stat {}", fixture_path.display()))?;
        info!(
            path = %fixture_path.display(),
            bytes = metadata.len(),
            "fixture present"
        );
    } else {
        warn!(path = %fixture_path.display(), "fixture missing");
    }

    if index_manifest_path.exists() {
        let manifest: IndexRunManifest = read_json(&index_manifest_path)?;
        info!(
            run_id = %manifest.run_id,
            generated_at = %manifest.generated_at,
            backend = %manifest.backend,
            indexed = manifest.documents_indexed,
            skipped = manifest.documents_skipped,
            dimensions = manifest.dimensions,
            "loaded index manifest"
        );
    } else {
        warn!(path = %index_manifest_path.display(), "index manifest missing");
    }

    if db_path.exists() {
        match SqliteBackend::new(db_path.clone()).count_documents_blocking() {
            Ok(documents) => info!(path = %db_path.display(), documents, "local index status"),
            Err(error) => {
                warn!(path = %db_path.display(), error = %error, "local index unreadable")
            }
        }
    } else {
        warn!(path = %db_path.display(), "local index missing");
    }

    if report_path.exists() {
        let report: EvaluationReport = read_json(&report_path)?;
        info!(
            run_id = %report.run_id,
            generated_at = %report.generated_at,
            backend = %report.backend,
            evaluated = report.fixture.evaluated,
            skipped = report.fixture.skipped,
            "loaded fit-score report"
        );
        for (strategy, aggregate) in &report.strategies {
            info!(
                strategy = %strategy,
                overall_score = aggregate.overall_score,
                formula = %aggregate.formula,
                "last strategy score"
            );
        }
    } else {
        warn!(path = %report_path.display(), "fit-score report missing");
    }

    Ok(())
}
