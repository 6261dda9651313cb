mod aggregate;
mod driver;
mod error;
mod formula;
mod partition;
mod rank;
mod strategy;

pub use aggregate::AggregateReport;
pub use driver::{EvaluationDriver, EvaluationOutcome};
pub use error::EvalError;
pub use formula::{ParsedFormula, parse_formula};
pub use partition::{BucketScore, ScoringScheme};
pub use strategy::Strategy;

#[cfg(test)]
pub use aggregate::{PerQueryScoreEntry, StrategyOutcome, aggregate};
#[cfg(test)]
pub use partition::{RankPartition, ScoreBucket};
#[cfg(test)]
pub use rank::Rank;
