use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::EvalError;
use super::formula::{FitScore, MultiplicationSign, PartitionTally, render_formula};
use super::partition::{BucketScore, RankPartition, ScoringScheme};
use super::rank::{Rank, resolve_rank};
use super::strategy::Strategy;
use crate::backend::Hit;

/// Rank, bucket and score one strategy earned for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyOutcome {
    pub rank: Rank,
    pub partition: RankPartition,
    pub bucket_score: BucketScore,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl StrategyOutcome {
    pub fn resolve(result: &[Hit], expected_label: &str, scheme: &ScoringScheme) -> Self {
        Self::from_rank(resolve_rank(result, expected_label), scheme, None)
    }

    pub fn failed(reason: String, scheme: &ScoringScheme) -> Self {
        Self::from_rank(Rank::NotFound, scheme, Some(reason))
    }

    fn from_rank(rank: Rank, scheme: &ScoringScheme, failure: Option<String>) -> Self {
        let partition = scheme.classify(rank);
        Self {
            rank,
            partition,
            bucket_score: scheme.score(partition),
            failure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerQueryScoreEntry {
    pub query: String,
    pub expected_label: String,
    pub by_strategy: BTreeMap<Strategy, StrategyOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredQuery {
    pub query: String,
    pub expected_label: String,
    pub rank: Rank,
    pub partition: RankPartition,
    pub bucket_score: BucketScore,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionSummary {
    pub boundary: RankPartition,
    pub score: BucketScore,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub strategy: Strategy,
    pub evaluated: usize,
    pub failed_queries: usize,
    pub score_sum: BucketScore,
    pub max_individual_score: BucketScore,
    pub max_overall_score: BucketScore,
    pub overall_score: f64,
    pub formula: String,
    pub formula_ascii: String,
    pub partitions: Vec<PartitionSummary>,
    pub entries: Vec<ScoredQuery>,
}

pub fn aggregate(
    entries: &[PerQueryScoreEntry],
    strategy: Strategy,
    scheme: &ScoringScheme,
) -> Result<AggregateReport, EvalError> {
    let mut tally = PartitionTally::default();
    let mut scored = Vec::<ScoredQuery>::with_capacity(entries.len());

    for entry in entries {
        let outcome = entry
            .by_strategy
            .get(&strategy)
            .ok_or_else(|| EvalError::IncompleteEntry {
                query: entry.query.clone(),
                strategy,
            })?;
        tally.record(outcome.partition);
        scored.push(ScoredQuery {
            query: entry.query.clone(),
            expected_label: entry.expected_label.clone(),
            rank: outcome.rank,
            partition: outcome.partition,
            bucket_score: scheme.score(outcome.partition),
            failure: outcome.failure.clone(),
        });
    }

    let fit = FitScore::from_tally(&tally, scheme).ok_or(EvalError::EmptyInput { strategy })?;

    let partitions = tally
        .groups(scheme)
        .into_iter()
        .map(|(boundary, score, count)| PartitionSummary {
            boundary,
            score,
            count,
        })
        .collect();

    Ok(AggregateReport {
        strategy,
        evaluated: scored.len(),
        failed_queries: scored
            .iter()
            .filter(|entry| entry.failure.is_some())
            .count(),
        score_sum: fit.score_sum,
        max_individual_score: fit.max_individual_score,
        max_overall_score: fit.max_overall_score,
        overall_score: fit.overall_score,
        formula: render_formula(&tally, scheme, &fit, MultiplicationSign::Times),
        formula_ascii: render_formula(&tally, scheme, &fit, MultiplicationSign::Asterisk),
        partitions,
        entries: scored,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::{PerQueryScoreEntry, StrategyOutcome, aggregate};
    use crate::backend::Hit;
    use crate::eval::{EvalError, Rank, RankPartition, ScoreBucket, ScoringScheme, Strategy};

    fn outcome(rank: Rank, scheme: &ScoringScheme) -> StrategyOutcome {
        let hits = match rank {
            Rank::Found(position) => (0..=position)
                .map(|index| {
                    if index == position {
                        Hit::labeled("expected")
                    } else {
                        Hit::labeled(format!("other-{index}"))
                    }
                })
                .collect::<Vec<Hit>>(),
            Rank::NotFound => Vec::new(),
        };
        StrategyOutcome::resolve(&hits, "expected", scheme)
    }

    fn entries(
        vector: &[Rank],
        keyword: &[Rank],
        scheme: &ScoringScheme,
    ) -> Vec<PerQueryScoreEntry> {
        vector
            .iter()
            .zip(keyword)
            .enumerate()
            .map(|(index, (vector_rank, keyword_rank))| PerQueryScoreEntry {
                query: format!("query {index}"),
                expected_label: "expected".to_string(),
                by_strategy: BTreeMap::from([
                    (Strategy::Vector, outcome(*vector_rank, scheme)),
                    (Strategy::Keyword, outcome(*keyword_rank, scheme)),
                ]),
            })
            .collect()
    }

    #[test]
    fn five_query_scenario_scores_and_renders() {
        let scheme = ScoringScheme::default();
        let vector = [
            Rank::Found(0),
            Rank::Found(2),
            Rank::Found(4),
            Rank::Found(19),
            Rank::NotFound,
        ];
        let keyword = [Rank::Found(0); 5];
        let entries = entries(&vector, &keyword, &scheme);

        let report = aggregate(&entries, Strategy::Vector, &scheme).expect("report");
        assert_eq!(
            report
                .entries
                .iter()
                .map(|entry| entry.partition.boundary())
                .collect::<Vec<_>>(),
            vec![1, 3, 5, 20, 200]
        );
        assert_eq!(
            report
                .entries
                .iter()
                .map(|entry| entry.bucket_score)
                .collect::<Vec<_>>(),
            vec![20, 10, 5, 1, -3]
        );
        assert_eq!(report.score_sum, 33);
        assert_eq!(report.max_overall_score, 100);
        assert_eq!(report.overall_score, 0.33);
        assert_eq!(
            report.formula,
            "(20×1 + 10×1 + 5×1 + 1×1 + -3×1) / 100 = 0.33"
        );
        assert_eq!(
            report.formula_ascii,
            "(20*1 + 10*1 + 5*1 + 1*1 + -3*1) / 100 = 0.33"
        );
        assert_eq!(report.evaluated, 5);
        assert_eq!(report.failed_queries, 0);
    }

    #[test]
    fn strategies_aggregate_independently() {
        let scheme = ScoringScheme::default();
        let entries = entries(
            &[Rank::Found(0), Rank::Found(0), Rank::Found(1)],
            &[Rank::NotFound, Rank::Found(30), Rank::Found(7)],
            &scheme,
        );

        let vector = aggregate(&entries, Strategy::Vector, &scheme).expect("vector report");
        let keyword = aggregate(&entries, Strategy::Keyword, &scheme).expect("keyword report");

        assert_eq!(vector.formula, "(20×2 + 10×1) / 60 = 0.8333333333333334");
        assert_eq!(keyword.formula, "(3×1 + -3×2) / 60 = -0.05");
        assert_eq!(keyword.partitions.len(), 2);
        assert_eq!(keyword.partitions[1].boundary, RankPartition::new(200));
        assert_eq!(keyword.partitions[1].count, 2);
    }

    #[test]
    fn failed_outcome_scores_as_not_found_and_keeps_reason() {
        let scheme = ScoringScheme::default();
        let failed = StrategyOutcome::failed("vector query failed: boom".to_string(), &scheme);
        assert_eq!(failed.rank, Rank::NotFound);
        assert_eq!(failed.bucket_score, -3);

        let entries = vec![PerQueryScoreEntry {
            query: "q".to_string(),
            expected_label: "expected".to_string(),
            by_strategy: BTreeMap::from([(Strategy::Vector, failed)]),
        }];
        let report = aggregate(&entries, Strategy::Vector, &scheme).expect("report");
        assert_eq!(report.failed_queries, 1);
        assert_eq!(
            report.entries[0].failure.as_deref(),
            Some("vector query failed: boom")
        );
        assert_eq!(report.formula, "(-3×1) / 20 = -0.15");
    }

    #[test]
    fn outcomes_follow_the_scheme_classification() {
        let scheme = ScoringScheme::new(vec![
            ScoreBucket::new(2, 4),
            ScoreBucket::new(6, 1),
            ScoreBucket::new(30, 0),
        ])
        .expect("valid scheme");

        for rank in [
            Rank::Found(0),
            Rank::Found(3),
            Rank::Found(29),
            Rank::Found(40),
        ] {
            let resolved = outcome(rank, &scheme);
            assert_eq!(resolved.partition, scheme.classify(rank));
            assert_eq!(resolved.bucket_score, scheme.score(scheme.classify(rank)));
        }

        let failed = StrategyOutcome::failed("timeout".to_string(), &scheme);
        assert_eq!(failed.partition, scheme.classify(Rank::NotFound));
        assert_eq!(failed.partition, RankPartition::new(30));
        assert_eq!(failed.bucket_score, 0);
    }

    #[test]
    fn empty_entries_are_rejected() {
        let error = aggregate(&[], Strategy::Keyword, &ScoringScheme::default())
            .expect_err("empty input must fail");
        assert!(matches!(
            error,
            EvalError::EmptyInput {
                strategy: Strategy::Keyword
            }
        ));
    }

    #[test]
    fn missing_strategy_outcome_is_rejected() {
        let scheme = ScoringScheme::default();
        let entries = vec![PerQueryScoreEntry {
            query: "lonely".to_string(),
            expected_label: "expected".to_string(),
            by_strategy: BTreeMap::from([(Strategy::Vector, outcome(Rank::Found(0), &scheme))]),
        }];
        let error = aggregate(&entries, Strategy::Keyword, &scheme)
            .expect_err("missing outcome must fail");
        assert!(
            error.to_string().contains("lonely"),
            "unexpected error: {error}"
        );
    }

    proptest! {
        #[test]
        fn overall_score_stays_within_scheme_bounds(
            positions in proptest::collection::vec(proptest::option::of(0usize..300), 1..80),
        ) {
            let scheme = ScoringScheme::default();
            let ranks = positions
                .iter()
                .map(|position| position.map_or(Rank::NotFound, Rank::Found))
                .collect::<Vec<Rank>>();
            let entries = entries(&ranks, &ranks, &scheme);
            let report = aggregate(&entries, Strategy::Vector, &scheme).expect("report");

            prop_assert!(report.overall_score >= -3.0 / 20.0 - 1e-12);
            prop_assert!(report.overall_score <= 1.0 + 1e-12);
            prop_assert_eq!(report.max_overall_score, 20 * ranks.len() as i64);
            prop_assert_eq!(
                report.entries.iter().map(|entry| entry.bucket_score).sum::<i64>(),
                report.score_sum
            );
        }
    }
}
