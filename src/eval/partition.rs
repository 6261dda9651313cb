use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::EvalError;
use super::rank::Rank;

pub type BucketScore = i64;

/// Exclusive upper bound of the 0-based ranks a bucket captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RankPartition(usize);

impl RankPartition {
    #[cfg(test)]
    pub fn new(boundary: usize) -> Self {
        Self(boundary)
    }

    pub fn boundary(self) -> usize {
        self.0
    }
}

impl fmt::Display for RankPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBucket {
    pub boundary: usize,
    pub score: BucketScore,
}

impl ScoreBucket {
    pub const fn new(boundary: usize, score: BucketScore) -> Self {
        Self { boundary, score }
    }

    pub fn partition(self) -> RankPartition {
        RankPartition(self.boundary)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct RawScoringScheme {
    buckets: Vec<ScoreBucket>,
}

/// Ordered rank buckets and the points each one is worth.
///
/// Boundaries are strictly increasing and scores never increase along them.
/// The last bucket doubles as the catch-all for ranks past every boundary and
/// for queries whose expected label was not returned at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawScoringScheme", into = "RawScoringScheme")]
pub struct ScoringScheme {
    buckets: Vec<ScoreBucket>,
    fallback: ScoreBucket,
}

impl ScoringScheme {
    pub fn new(buckets: Vec<ScoreBucket>) -> Result<Self, EvalError> {
        let Some(fallback) = buckets.last().copied() else {
            return Err(EvalError::InvalidScoringScheme(
                "at least one bucket is required".to_string(),
            ));
        };

        if let Some(bucket) = buckets.iter().find(|bucket| bucket.boundary == 0) {
            return Err(EvalError::InvalidScoringScheme(format!(
                "bucket boundary must be positive (score {})",
                bucket.score
            )));
        }

        for pair in buckets.windows(2) {
            let (lower, upper) = (pair[0], pair[1]);
            if upper.boundary <= lower.boundary {
                return Err(EvalError::InvalidScoringScheme(format!(
                    "boundaries must be strictly increasing ({} then {})",
                    lower.boundary, upper.boundary
                )));
            }
            if upper.score > lower.score {
                return Err(EvalError::InvalidScoringScheme(format!(
                    "scores must not increase with the boundary ({}→{} then {}→{})",
                    lower.boundary, lower.score, upper.boundary, upper.score
                )));
            }
        }

        if buckets.iter().all(|bucket| bucket.score <= 0) {
            return Err(EvalError::InvalidScoringScheme(
                "the best bucket must carry a positive score".to_string(),
            ));
        }

        Ok(Self { buckets, fallback })
    }

    #[cfg(test)]
    pub fn buckets(&self) -> &[ScoreBucket] {
        &self.buckets
    }

    #[cfg(test)]
    pub fn default_partition(&self) -> RankPartition {
        self.fallback.partition()
    }

    /// First bucket whose boundary lies past the rank. Misses and ranks past
    /// every boundary land in the catch-all.
    pub fn classify(&self, rank: Rank) -> RankPartition {
        let Rank::Found(position) = rank else {
            return self.fallback.partition();
        };

        self.buckets
            .iter()
            .find(|bucket| position < bucket.boundary)
            .map_or(self.fallback.partition(), |bucket| bucket.partition())
    }

    /// Points for a partition; boundaries outside the scheme score as the catch-all.
    pub fn score(&self, partition: RankPartition) -> BucketScore {
        self.buckets
            .iter()
            .find(|bucket| bucket.boundary == partition.boundary())
            .map_or(self.fallback.score, |bucket| bucket.score)
    }

    pub fn max_score(&self) -> BucketScore {
        self.buckets[0].score
    }

    #[cfg(test)]
    pub fn min_score(&self) -> BucketScore {
        self.fallback.score
    }

    /// Largest boundary that is not the catch-all. A page size below this
    /// value pushes genuine matches into the catch-all bucket.
    pub fn deepest_ranked_boundary(&self) -> Option<usize> {
        let ranked = self.buckets.len().checked_sub(1)?;
        ranked
            .checked_sub(1)
            .and_then(|index| self.buckets.get(index))
            .map(|bucket| bucket.boundary)
    }
}

impl Default for ScoringScheme {
    fn default() -> Self {
        let buckets = vec![
            ScoreBucket::new(1, 20),
            ScoreBucket::new(3, 10),
            ScoreBucket::new(5, 5),
            ScoreBucket::new(10, 3),
            ScoreBucket::new(20, 1),
            ScoreBucket::new(200, -3),
        ];
        let fallback = buckets[buckets.len() - 1];
        Self { buckets, fallback }
    }
}

impl TryFrom<RawScoringScheme> for ScoringScheme {
    type Error = EvalError;

    fn try_from(raw: RawScoringScheme) -> Result<Self, Self::Error> {
        Self::new(raw.buckets)
    }
}

impl From<ScoringScheme> for RawScoringScheme {
    fn from(scheme: ScoringScheme) -> Self {
        Self {
            buckets: scheme.buckets,
        }
    }
}
