use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use crate::cli::AuditArgs;
use crate::config::CachePaths;
use crate::eval::{AggregateReport, BucketScore, ParsedFormula, ScoringScheme, parse_formula};
use crate::model::EvaluationReport;
use crate::util::read_json;

const SCORE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditCheck {
    pub check_id: String,
    pub name: String,
    pub result: String,
    pub detail: String,
}

impl AuditCheck {
    fn new(check_id: String, name: &str, passed: bool, detail: String) -> Self {
        Self {
            check_id,
            name: name.to_string(),
            result: if passed { "pass" } else { "failed" }.to_string(),
            detail,
        }
    }

    pub fn passed(&self) -> bool {
        self.result == "pass"
    }
}

pub fn run(args: AuditArgs) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout());
    let audited = run_with_output(args, &mut output);
    output.flush()?;
    audited
}

/// Audits the report and writes every check to `output` before failing on
/// the first inconsistent run.
pub(crate) fn run_with_output(args: AuditArgs, output: &mut impl Write) -> Result<()> {
    let report_path = args
        .report_path
        .clone()
        .unwrap_or_else(|| CachePaths::new(&args.cache_root).report_path());
    let report: EvaluationReport = read_json(&report_path)?;

    let checks = audit_report(&report);
    let failed = checks.iter().filter(|check| !check.passed()).count();

    if args.json {
        serde_json::to_writer_pretty(&mut *output, &checks)
            .context("failed to serialize audit json output")?;
        writeln!(output)?;
    } else {
        for check in &checks {
            writeln!(
                output,
                "{}\t{}\t{}\t{}",
                check.result, check.check_id, check.name, check.detail
            )?;
        }
    }

    info!(
        run_id = %report.run_id,
        checks = checks.len(),
        failed,
        "audited fit-score report"
    );

    if failed > 0 {
        bail!(
            "{failed} of {} audit checks failed for {}",
            checks.len(),
            report_path.display()
        );
    }

    Ok(())
}

pub fn audit_report(report: &EvaluationReport) -> Vec<AuditCheck> {
    let mut checks = Vec::<AuditCheck>::new();
    for (strategy, aggregate) in &report.strategies {
        audit_strategy(
            strategy.as_str(),
            aggregate,
            &report.config.scoring,
            report.fixture.evaluated,
            &mut checks,
        );
    }
    checks
}

fn audit_strategy(
    prefix: &str,
    aggregate: &AggregateReport,
    scheme: &ScoringScheme,
    evaluated: usize,
    checks: &mut Vec<AuditCheck>,
) {
    let check_id = |suffix: &str| format!("{prefix}.{suffix}");

    let entry_count = aggregate.entries.len();
    checks.push(AuditCheck::new(
        check_id("evaluated_count"),
        "entries match the evaluated fixture cases",
        entry_count == evaluated && aggregate.evaluated == evaluated,
        format!(
            "entries={entry_count} reported={} fixture={evaluated}",
            aggregate.evaluated
        ),
    ));

    let mismatched_buckets = aggregate
        .entries
        .iter()
        .filter(|entry| entry.bucket_score != scheme.score(entry.partition))
        .count();
    checks.push(AuditCheck::new(
        check_id("bucket_scores"),
        "entry scores follow the scoring scheme",
        mismatched_buckets == 0,
        format!("mismatched={mismatched_buckets}"),
    ));

    let parsed = match parse_formula(&aggregate.formula) {
        Ok(parsed) => parsed,
        Err(error) => {
            checks.push(AuditCheck::new(
                check_id("formula_parses"),
                "formula is well formed",
                false,
                error.to_string(),
            ));
            return;
        }
    };
    checks.push(AuditCheck::new(
        check_id("formula_parses"),
        "formula is well formed",
        true,
        format!("terms={}", parsed.terms.len()),
    ));

    let ascii_matches = parse_formula(&aggregate.formula_ascii)
        .map(|ascii| ascii == parsed)
        .unwrap_or(false);
    checks.push(AuditCheck::new(
        check_id("ascii_formula"),
        "ASCII formula states the same arithmetic",
        ascii_matches,
        aggregate.formula_ascii.clone(),
    ));

    checks.push(formula_count_check(
        check_id("formula_count"),
        &parsed,
        entry_count,
    ));
    checks.push(denominator_check(
        check_id("denominator"),
        &parsed,
        aggregate,
        entry_count,
    ));

    let entry_sum = aggregate
        .entries
        .iter()
        .map(|entry| entry.bucket_score)
        .sum::<BucketScore>();
    checks.push(AuditCheck::new(
        check_id("numerator"),
        "formula numerator equals the summed entry scores",
        parsed.numerator() == entry_sum && entry_sum == aggregate.score_sum,
        format!(
            "formula={} entries={entry_sum} reported={}",
            parsed.numerator(),
            aggregate.score_sum
        ),
    ));

    let recomputed = parsed.recomputed_score();
    let consistent = recomputed.is_some_and(|score| {
        (score - aggregate.overall_score).abs() <= SCORE_TOLERANCE
            && (parsed.stated_score - aggregate.overall_score).abs() <= SCORE_TOLERANCE
    });
    checks.push(AuditCheck::new(
        check_id("overall_score"),
        "formula reproduces the overall score",
        consistent,
        format!(
            "recomputed={} stated={} reported={}",
            recomputed.map_or_else(|| "undefined".to_string(), |score| score.to_string()),
            parsed.stated_score,
            aggregate.overall_score
        ),
    ));
}

fn formula_count_check(
    check_id: String,
    parsed: &ParsedFormula,
    entry_count: usize,
) -> AuditCheck {
    AuditCheck::new(
        check_id,
        "formula counts cover every entry",
        parsed.entry_count() == entry_count,
        format!("formula={} entries={entry_count}", parsed.entry_count()),
    )
}

fn denominator_check(
    check_id: String,
    parsed: &ParsedFormula,
    aggregate: &AggregateReport,
    entry_count: usize,
) -> AuditCheck {
    let expected = entry_count as BucketScore * aggregate.max_individual_score;
    AuditCheck::new(
        check_id,
        "denominator is entries times the best bucket score",
        parsed.denominator == expected && aggregate.max_overall_score == expected,
        format!(
            "formula={} expected={expected} reported={}",
            parsed.denominator, aggregate.max_overall_score
        ),
    )
}
