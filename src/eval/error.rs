use thiserror::Error;

use super::strategy::Strategy;
use crate::backend::BackendError;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("vector source unavailable: {0}")]
    VectorSourceUnavailable(String),

    #[error("retrieval backend `{backend}` is unreachable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("{strategy} query failed: {source}")]
    BackendQueryFailed {
        strategy: Strategy,
        #[source]
        source: BackendError,
    },

    #[error("fixture entry {index} is malformed: {reason}")]
    MalformedFixtureEntry { index: usize, reason: String },

    #[error("no evaluable test cases in the fixture")]
    EmptyTestSet,

    #[error("cannot aggregate {strategy} scores over zero entries")]
    EmptyInput { strategy: Strategy },

    #[error("entry for query `{query}` has no {strategy} outcome")]
    IncompleteEntry { query: String, strategy: Strategy },

    #[error("invalid scoring scheme: {0}")]
    InvalidScoringScheme(String),

    #[error("malformed fit-score formula: {0}")]
    MalformedFormula(String),

    #[error("failed to compile fit-score formula pattern")]
    FormulaPattern(#[from] regex::Error),
}
