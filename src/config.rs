use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::backend::BackendConfig;
use crate::cli::{BackendArgs, BackendKind, EvaluateArgs};
use crate::eval::ScoringScheme;
use crate::util::read_json;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_MAX_IN_FLIGHT_QUERIES: usize = 8;
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 5_000;

/// Everything the evaluation engine reads. Built by the CLI layer; the engine
/// never consults the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    pub page_size: usize,
    pub concurrency: usize,
    pub max_in_flight_queries: usize,
    /// Zero disables the per-query timeout.
    pub query_timeout_ms: u64,
    pub vector_field: String,
    pub keyword_field: String,
    pub label_field: String,
    pub similarity_bias: f64,
    pub scoring: ScoringScheme,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            max_in_flight_queries: DEFAULT_MAX_IN_FLIGHT_QUERIES,
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
            vector_field: "vector".to_string(),
            keyword_field: "definition".to_string(),
            label_field: "term".to_string(),
            similarity_bias: 1.0,
            scoring: ScoringScheme::default(),
        }
    }
}

impl EvalConfig {
    pub fn from_args(args: &EvaluateArgs) -> Result<Self> {
        if args.page_size == 0 {
            bail!("--page-size must be at least 1");
        }
        if args.concurrency == 0 {
            bail!("--concurrency must be at least 1");
        }
        if args.max_in_flight_queries == 0 {
            bail!("--max-in-flight-queries must be at least 1");
        }
        if !args.similarity_bias.is_finite() {
            bail!("--similarity-bias must be a finite number");
        }

        let scoring = match &args.scoring_scheme {
            Some(path) => load_scoring_scheme(path)?,
            None => ScoringScheme::default(),
        };

        Ok(Self {
            page_size: args.page_size,
            concurrency: args.concurrency,
            max_in_flight_queries: args.max_in_flight_queries,
            query_timeout_ms: args.query_timeout_ms,
            vector_field: args.vector_field.clone(),
            keyword_field: args.keyword_field.clone(),
            label_field: args.label_field.clone(),
            similarity_bias: args.similarity_bias,
            scoring,
        })
    }

    /// Deepest ranked bucket boundary that lies past the page size. Matches
    /// ranked beyond the page fall into the catch-all instead of that bucket.
    pub fn unreachable_ranked_boundary(&self) -> Option<usize> {
        self.scoring
            .deepest_ranked_boundary()
            .filter(|deepest| self.page_size < *deepest)
    }
}

pub fn load_scoring_scheme(path: &Path) -> Result<ScoringScheme> {
    read_json::<ScoringScheme>(path)
        .with_context(|| format!("failed to load scoring scheme: {}", path.display()))
}

/// Default artifact locations under a cache root.
#[derive(Debug, Clone)]
pub struct CachePaths {
    pub cache_root: PathBuf,
}

impl CachePaths {
    pub fn new(cache_root: &Path) -> Self {
        Self {
            cache_root: cache_root.to_path_buf(),
        }
    }

    pub fn fixture_path(&self) -> PathBuf {
        self.cache_root.join("fixtures").join("test_vectors.json")
    }

    pub fn db_path(&self) -> PathBuf {
        self.cache_root.join("fitscore_index.sqlite")
    }

    pub fn report_path(&self) -> PathBuf {
        self.cache_root
            .join("reports")
            .join("fit_score_report.json")
    }

    pub fn manifest_dir(&self) -> PathBuf {
        self.cache_root.join("manifests")
    }

    pub fn index_manifest_path(&self) -> PathBuf {
        self.manifest_dir().join("index_run.json")
    }
}

pub fn backend_config(args: &BackendArgs, paths: &CachePaths) -> BackendConfig {
    match args.backend {
        BackendKind::Sqlite => BackendConfig::Sqlite {
            db_path: args.db_path.clone().unwrap_or_else(|| paths.db_path()),
        },
        BackendKind::Elasticsearch => BackendConfig::Elasticsearch {
            url: args.es_url.clone(),
            index: args.index_name.clone(),
            request_timeout_ms: args.request_timeout_ms,
        },
    }
}
