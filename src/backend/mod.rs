use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::IndexDocument;

mod elastic;
mod sqlite;

pub use elastic::ElasticBackend;
pub use sqlite::SqliteBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Similarity {
    Cosine,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorQuery {
    pub field: String,
    pub vector: Vec<f32>,
    pub similarity: Similarity,
    pub bias: f64,
    pub match_all_base: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordQuery {
    pub field: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchQuery {
    Vector(VectorQuery),
    Keyword(KeywordQuery),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
    pub query: SearchQuery,
    pub size: usize,
    pub label_field: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Hit {
    #[cfg(test)]
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            score: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode backend response: {0}")]
    Decode(String),

    #[error("unknown field `{0}`")]
    UnknownField(String),

    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("blocking backend task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Document store queried by the evaluation driver.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Connection-time availability check; failures here abort the whole run.
    async fn check_available(&self) -> Result<(), BackendError>;

    /// Ordered hits for one query, at most `request.size` long.
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Hit>, BackendError>;
}

#[async_trait]
pub trait DocumentIndex: Send + Sync {
    async fn create_index(&self, dimensions: usize) -> Result<(), BackendError>;

    async fn index_documents(&self, documents: &[IndexDocument]) -> Result<usize, BackendError>;

    async fn document_count(&self) -> Result<usize, BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Sqlite { db_path: PathBuf },
    Elasticsearch {
        url: String,
        index: String,
        request_timeout_ms: u64,
    },
}

impl BackendConfig {
    pub fn describe(&self) -> String {
        match self {
            Self::Sqlite { db_path } => format!("sqlite:{}", db_path.display()),
            Self::Elasticsearch { url, index, .. } => format!("elasticsearch:{url}/{index}"),
        }
    }

    pub fn retrieval(&self) -> Result<Arc<dyn RetrievalBackend>, BackendError> {
        Ok(match self {
            Self::Sqlite { db_path } => Arc::new(SqliteBackend::new(db_path.clone())),
            Self::Elasticsearch {
                url,
                index,
                request_timeout_ms,
            } => Arc::new(ElasticBackend::new(url, index, *request_timeout_ms)?),
        })
    }

    pub fn document_index(&self) -> Result<Box<dyn DocumentIndex>, BackendError> {
        Ok(match self {
            Self::Sqlite { db_path } => Box::new(SqliteBackend::new(db_path.clone())),
            Self::Elasticsearch {
                url,
                index,
                request_timeout_ms,
            } => Box::new(ElasticBackend::new(url, index, *request_timeout_ms)?),
        })
    }
}
