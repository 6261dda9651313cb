use std::cmp::Reverse;
use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::EvalError;
use super::partition::{BucketScore, RankPartition, ScoringScheme};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiplicationSign {
    Times,
    Asterisk,
}

impl MultiplicationSign {
    pub fn symbol(self) -> char {
        match self {
            Self::Times => '×',
            Self::Asterisk => '*',
        }
    }
}

/// How many entries landed in each rank partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionTally {
    counts: BTreeMap<RankPartition, usize>,
}

impl PartitionTally {
    pub fn record(&mut self, partition: RankPartition) {
        *self.counts.entry(partition).or_insert(0) += 1;
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RankPartition, usize)> + '_ {
        self.counts
            .iter()
            .map(|(partition, count)| (*partition, *count))
    }

    pub fn score_sum(&self, scheme: &ScoringScheme) -> BucketScore {
        self.iter()
            .map(|(partition, count)| scheme.score(partition) * count as BucketScore)
            .sum()
    }

    /// Partitions with their score and count, best score first; equal scores
    /// keep the smaller boundary first.
    pub fn groups(&self, scheme: &ScoringScheme) -> Vec<(RankPartition, BucketScore, usize)> {
        let mut groups = self
            .iter()
            .map(|(partition, count)| (partition, scheme.score(partition), count))
            .collect::<Vec<_>>();
        groups.sort_by_key(|&(partition, score, _)| (Reverse(score), partition));
        groups
    }
}

impl FromIterator<RankPartition> for PartitionTally {
    fn from_iter<I: IntoIterator<Item = RankPartition>>(iter: I) -> Self {
        let mut tally = Self::default();
        for partition in iter {
            tally.record(partition);
        }
        tally
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitScore {
    pub score_sum: BucketScore,
    pub max_individual_score: BucketScore,
    pub max_overall_score: BucketScore,
    pub overall_score: f64,
}

impl FitScore {
    /// `None` for an empty tally: there is no denominator to normalize by.
    pub fn from_tally(tally: &PartitionTally, scheme: &ScoringScheme) -> Option<Self> {
        let total = tally.total();
        if total == 0 {
            return None;
        }

        let max_individual_score = scheme.max_score();
        let max_overall_score = total as BucketScore * max_individual_score;
        let score_sum = tally.score_sum(scheme);

        Some(Self {
            score_sum,
            max_individual_score,
            max_overall_score,
            overall_score: score_sum as f64 / max_overall_score as f64,
        })
    }
}

pub fn render_formula(
    tally: &PartitionTally,
    scheme: &ScoringScheme,
    fit: &FitScore,
    sign: MultiplicationSign,
) -> String {
    let symbol = sign.symbol();
    let terms = tally
        .groups(scheme)
        .into_iter()
        .map(|(_, score, count)| format!("{score}{symbol}{count}"))
        .collect::<Vec<String>>()
        .join(" + ");

    format!(
        "({terms}) / {} = {}",
        fit.max_overall_score,
        format_score(fit.overall_score)
    )
}

/// Shortest round-trip form, keeping one decimal on whole numbers.
pub fn format_score(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormulaTerm {
    pub score: BucketScore,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFormula {
    pub terms: Vec<FormulaTerm>,
    pub denominator: BucketScore,
    pub stated_score: f64,
}

impl ParsedFormula {
    pub fn numerator(&self) -> BucketScore {
        self.terms
            .iter()
            .map(|term| term.score * term.count as BucketScore)
            .sum()
    }

    pub fn entry_count(&self) -> usize {
        self.terms.iter().map(|term| term.count).sum()
    }

    pub fn recomputed_score(&self) -> Option<f64> {
        if self.denominator == 0 {
            return None;
        }
        Some(self.numerator() as f64 / self.denominator as f64)
    }
}

const FORMULA_PATTERN: &str = r"^\((?P<terms>.+)\) / (?P<denominator>-?\d+) = (?P<score>\S+)$";
const TERM_PATTERN: &str = r"^(?P<score>-?\d+)\s*[×*]\s*(?P<count>\d+)$";

pub fn parse_formula(formula: &str) -> Result<ParsedFormula, EvalError> {
    let shape = Regex::new(FORMULA_PATTERN)?;
    let term_shape = Regex::new(TERM_PATTERN)?;

    let captures = shape
        .captures(formula.trim())
        .ok_or_else(|| EvalError::MalformedFormula(formula.to_string()))?;

    let mut terms = Vec::<FormulaTerm>::new();
    for raw_term in captures["terms"].split(" + ") {
        let term = term_shape.captures(raw_term.trim()).ok_or_else(|| {
            EvalError::MalformedFormula(format!("unreadable term `{raw_term}` in {formula}"))
        })?;
        terms.push(FormulaTerm {
            score: parse_number(&term["score"], formula)?,
            count: parse_number(&term["count"], formula)?,
        });
    }

    Ok(ParsedFormula {
        terms,
        denominator: parse_number(&captures["denominator"], formula)?,
        stated_score: parse_number(&captures["score"], formula)?,
    })
}

fn parse_number<T: std::str::FromStr>(raw: &str, formula: &str) -> Result<T, EvalError> {
    raw.parse::<T>()
        .map_err(|_| EvalError::MalformedFormula(format!("invalid number `{raw}` in {formula}")))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{
        FitScore, MultiplicationSign, PartitionTally, format_score, parse_formula, render_formula,
    };
    use crate::eval::{EvalError, RankPartition, ScoreBucket, ScoringScheme};

    fn tally(boundaries: &[usize]) -> PartitionTally {
        boundaries.iter().copied().map(RankPartition::new).collect()
    }

    fn render(boundaries: &[usize], scheme: &ScoringScheme, sign: MultiplicationSign) -> String {
        let tally = tally(boundaries);
        let fit = FitScore::from_tally(&tally, scheme).expect("non-empty tally");
        render_formula(&tally, scheme, &fit, sign)
    }

    #[test]
    fn renders_grouped_terms_in_descending_score_order() {
        let scheme = ScoringScheme::default();
        assert_eq!(
            render(&[3, 1, 1], &scheme, MultiplicationSign::Times),
            "(20×2 + 10×1) / 60 = 0.8333333333333334"
        );
    }

    #[test]
    fn renders_one_term_per_distinct_partition() {
        let scheme = ScoringScheme::default();
        assert_eq!(
            render(&[1, 3, 5, 20, 200], &scheme, MultiplicationSign::Times),
            "(20×1 + 10×1 + 5×1 + 1×1 + -3×1) / 100 = 0.33"
        );
        assert_eq!(
            render(&[200, 200], &scheme, MultiplicationSign::Asterisk),
            "(-3*2) / 40 = -0.15"
        );
    }

    #[test]
    fn whole_scores_keep_a_decimal() {
        let scheme = ScoringScheme::default();
        assert_eq!(
            render(&[1, 1, 1], &scheme, MultiplicationSign::Times),
            "(20×3) / 60 = 1.0"
        );
        assert_eq!(format_score(0.0), "0.0");
        assert_eq!(format_score(0.25), "0.25");
    }

    #[test]
    fn equal_scores_order_by_boundary() {
        let scheme = ScoringScheme::new(vec![
            ScoreBucket::new(1, 4),
            ScoreBucket::new(5, 2),
            ScoreBucket::new(10, 2),
            ScoreBucket::new(50, 0),
        ])
        .expect("valid scheme");
        assert_eq!(
            render(&[10, 5, 50, 10], &scheme, MultiplicationSign::Times),
            "(2×1 + 2×2 + 0×1) / 16 = 0.375"
        );
    }

    #[test]
    fn empty_tally_has_no_fit_score() {
        assert!(
            FitScore::from_tally(&PartitionTally::default(), &ScoringScheme::default()).is_none()
        );
    }

    #[test]
    fn parses_both_multiplication_signs() {
        let parsed = parse_formula("(20×1 + 10×1 + 5×1 + 1×1 + -3×1) / 100 = 0.33")
            .expect("formula should parse");
        assert_eq!(parsed.entry_count(), 5);
        assert_eq!(parsed.numerator(), 33);
        assert_eq!(parsed.denominator, 100);
        assert_eq!(parsed.recomputed_score(), Some(0.33));
        assert_eq!(parsed.stated_score, 0.33);

        let ascii = parse_formula("(20*2 + 10*1) / 60 = 0.8333333333333334")
            .expect("ascii formula should parse");
        assert_eq!(ascii.numerator(), 50);
        assert_eq!(ascii.recomputed_score(), Some(50.0 / 60.0));
    }

    #[test]
    fn parse_rejects_garbage() {
        let garbage = [
            "",
            "20×1 / 20 = 1.0",
            "(20×1) / 20",
            "(twenty×1) / 20 = 1.0",
            "(20×1 + ) / 20 = 1.0",
        ];
        for raw in garbage {
            let error = parse_formula(raw).expect_err("formula should be rejected");
            assert!(
                matches!(error, EvalError::MalformedFormula(_)),
                "unexpected error: {error}"
            );
        }
    }

    proptest! {
        #[test]
        fn parsed_formula_reproduces_the_score(
            boundaries in proptest::collection::vec(
                prop_oneof![Just(1usize), Just(3), Just(5), Just(10), Just(20), Just(200)],
                1..64,
            ),
        ) {
            let scheme = ScoringScheme::default();
            let tally = tally(&boundaries);
            let fit = FitScore::from_tally(&tally, &scheme).expect("non-empty tally");

            for sign in [MultiplicationSign::Times, MultiplicationSign::Asterisk] {
                let parsed = parse_formula(&render_formula(&tally, &scheme, &fit, sign))
                    .expect("rendered formula should parse");
                let recomputed = parsed.recomputed_score().expect("positive denominator");
                prop_assert!((recomputed - fit.overall_score).abs() < 1e-12);
                prop_assert!((parsed.stated_score - fit.overall_score).abs() < 1e-12);
                prop_assert_eq!(parsed.entry_count(), boundaries.len());
                prop_assert_eq!(parsed.denominator, fit.max_overall_score);
            }
        }
    }
}
