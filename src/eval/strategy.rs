use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::{KeywordQuery, SearchQuery, SearchRequest, Similarity, VectorQuery};
use crate::config::EvalConfig;
use crate::model::TestCase;

/// Retrieval strategy under comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Vector,
    Keyword,
}

impl Strategy {
    pub const ALL: [Strategy; 2] = [Strategy::Vector, Strategy::Keyword];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Keyword => "keyword",
        }
    }

    pub fn build_request(self, case: &TestCase, config: &EvalConfig) -> SearchRequest {
        let query = match self {
            Self::Vector => SearchQuery::Vector(VectorQuery {
                field: config.vector_field.clone(),
                vector: case.vector.clone(),
                similarity: Similarity::Cosine,
                bias: config.similarity_bias,
                match_all_base: true,
            }),
            Self::Keyword => SearchQuery::Keyword(KeywordQuery {
                field: config.keyword_field.clone(),
                text: case.query.clone(),
            }),
        };

        SearchRequest {
            query,
            size: config.page_size,
            label_field: config.label_field.clone(),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::Strategy;
    use crate::backend::{SearchQuery, Similarity};
    use crate::config::EvalConfig;
    use crate::model::TestCase;

    fn case() -> TestCase {
        TestCase {
            query: "a tool for cutting wood".to_string(),
            expected_label: "saw".to_string(),
            vector: vec![0.5, -0.25, 1.0],
        }
    }

    #[test]
    fn vector_request_carries_case_vector_and_bias() {
        let config = EvalConfig::default();
        let request = Strategy::Vector.build_request(&case(), &config);

        assert_eq!(request.size, 20);
        assert_eq!(request.label_field, "term");
        let SearchQuery::Vector(query) = request.query else {
            panic!("vector strategy must build a vector query");
        };
        assert_eq!(query.field, "vector");
        assert_eq!(query.vector, vec![0.5, -0.25, 1.0]);
        assert_eq!(query.similarity, Similarity::Cosine);
        assert!((query.bias - 1.0).abs() < f64::EPSILON);
        assert!(query.match_all_base);
    }

    #[test]
    fn keyword_request_uses_configured_text_field() {
        let config = EvalConfig {
            keyword_field: "term".to_string(),
            page_size: 10,
            ..EvalConfig::default()
        };
        let request = Strategy::Keyword.build_request(&case(), &config);

        assert_eq!(request.size, 10);
        let SearchQuery::Keyword(query) = request.query else {
            panic!("keyword strategy must build a keyword query");
        };
        assert_eq!(query.field, "term");
        assert_eq!(query.text, "a tool for cutting wood");
    }

    #[test]
    fn strategies_serialize_as_snake_case_names() {
        let encoded = serde_json::to_string(&Strategy::ALL).expect("serialize");
        assert_eq!(encoded, r#"["vector","keyword"]"#);
    }
}
