use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::backend::Hit;

const NOT_FOUND_LABEL: &str = "not_found";

/// 0-based position of the first hit carrying the expected label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rank {
    Found(usize),
    NotFound,
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Found(position) => write!(f, "{position}"),
            Self::NotFound => f.write_str(NOT_FOUND_LABEL),
        }
    }
}

impl Serialize for Rank {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Found(position) => serializer.serialize_u64(*position as u64),
            Self::NotFound => serializer.serialize_str(NOT_FOUND_LABEL),
        }
    }
}

impl<'de> Deserialize<'de> for Rank {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawRank {
            Position(i64),
            Label(String),
        }

        match RawRank::deserialize(deserializer)? {
            // Negative positions cannot come from a resolver; treat them as misses.
            RawRank::Position(position) if position < 0 => Ok(Self::NotFound),
            RawRank::Position(position) => Ok(Self::Found(position as usize)),
            RawRank::Label(label) if label == NOT_FOUND_LABEL => Ok(Self::NotFound),
            RawRank::Label(label) => Err(serde::de::Error::custom(format!(
                "expected a rank position or \"{NOT_FOUND_LABEL}\", got \"{label}\""
            ))),
        }
    }
}

pub fn resolve_rank(result: &[Hit], expected_label: &str) -> Rank {
    result
        .iter()
        .position(|hit| hit.label == expected_label)
        .map_or(Rank::NotFound, Rank::Found)
}
