use std::io::{self, Write};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use crate::cli::EvaluateArgs;
use crate::config::{CachePaths, EvalConfig, backend_config};
use crate::eval::{EvaluationDriver, EvaluationOutcome};
use crate::fixture::{Fixture, load_fixture};
use crate::model::{EvaluationReport, FixtureSummary, REPORT_VERSION};
use crate::semantic::{LocalHashEmbedder, VectorSource};
use crate::util::{block_on, now_utc_string, run_id, write_json_pretty};

pub fn run(args: EvaluateArgs) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout());
    run_with_output(args, &mut output)?;
    output.flush()?;
    Ok(())
}

/// Runs an evaluation, writes the report file and renders the result to
/// `output` as a text summary or JSON.
pub(crate) fn run_with_output(args: EvaluateArgs, output: &mut impl Write) -> Result<()> {
    let paths = CachePaths::new(&args.cache_root);
    let fixture_path = args.fixture.clone().unwrap_or_else(|| paths.fixture_path());
    let report_path = args
        .report_path
        .clone()
        .unwrap_or_else(|| paths.report_path());
    let config = EvalConfig::from_args(&args)?;
    let backend = backend_config(&args.backend, &paths);

    let embedder = LocalHashEmbedder::new(args.embedding_dim);
    let source = args
        .embed_missing_vectors
        .then_some(&embedder as &dyn VectorSource);
    let fixture = load_fixture(&fixture_path, source)?;

    let started = Instant::now();
    let driver = EvaluationDriver::new(backend.retrieval()?, config);
    let outcome = block_on(driver.run(&fixture.cases))?
        .with_context(|| format!("evaluation against {} failed", backend.describe()))?;

    let report = build_report(
        &fixture,
        backend.describe(),
        driver.config(),
        outcome,
        started.elapsed().as_millis() as u64,
    );
    write_json_pretty(&report_path, &report)?;
    info!(
        run_id = %report.run_id,
        path = %report_path.display(),
        duration_ms = report.duration_ms,
        "wrote fit-score report"
    );

    if args.json {
        serde_json::to_writer_pretty(&mut *output, &report)
            .context("failed to serialize report json output")?;
        writeln!(output)?;
    } else {
        write_summary(output, &report)?;
    }

    Ok(())
}

fn build_report(
    fixture: &Fixture,
    backend: String,
    config: &EvalConfig,
    outcome: EvaluationOutcome,
    duration_ms: u64,
) -> EvaluationReport {
    EvaluationReport {
        report_version: REPORT_VERSION,
        run_id: run_id("eval", Utc::now()),
        generated_at: now_utc_string(),
        duration_ms,
        backend,
        fixture: FixtureSummary {
            path: fixture.path.display().to_string(),
            sha256: fixture.sha256.clone(),
            total_entries: fixture.total_entries,
            evaluated: fixture.cases.len(),
            skipped: fixture.skipped.len(),
            skipped_entries: fixture.skipped.clone(),
            embedded_vectors: fixture.embedded_vectors,
        },
        config: config.clone(),
        strategies: outcome.reports,
    }
}

pub(crate) fn write_summary(output: &mut impl Write, report: &EvaluationReport) -> Result<()> {
    writeln!(output, "Run: {} ({})", report.run_id, report.generated_at)?;
    writeln!(
        output,
        "Backend: {} page_size={} duration_ms={}",
        report.backend, report.config.page_size, report.duration_ms
    )?;
    writeln!(
        output,
        "Fixture: {} evaluated={} skipped={}",
        report.fixture.path, report.fixture.evaluated, report.fixture.skipped
    )?;

    for (strategy, aggregate) in &report.strategies {
        writeln!(output)?;
        writeln!(
            output,
            "Strategy: {strategy}\toverall_score={:.4}\tfailed_queries={}",
            aggregate.overall_score, aggregate.failed_queries
        )?;
        writeln!(output, "\tformula: {}", aggregate.formula)?;
        for entry in &aggregate.entries {
            writeln!(
                output,
                "\trank={}\tbucket={}\tscore={}\texpected={}\tquery={}",
                entry.rank, entry.partition, entry.bucket_score, entry.expected_label, entry.query
            )?;
            if let Some(failure) = &entry.failure {
                writeln!(output, "\t\tfailure: {failure}")?;
            }
        }
    }

    Ok(())
}
