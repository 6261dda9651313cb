use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_IN_FLIGHT_QUERIES, DEFAULT_PAGE_SIZE, DEFAULT_QUERY_TIMEOUT_MS,
};
use crate::semantic::DEFAULT_EMBEDDING_DIM;

#[derive(Parser, Debug)]
#[command(
    name = "fitscore",
    version,
    about = "Fit-score evaluation of vector and keyword retrieval"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Embed a `query;expected_label` file into a test-vector fixture.
    Prepare(PrepareArgs),
    /// Create the search index and load documents into it.
    Index(IndexArgs),
    /// Run both strategies over the fixture and write the fit-score report.
    Evaluate(EvaluateArgs),
    /// Re-derive every score in a saved report from its formula.
    Audit(AuditArgs),
    Status(StatusArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum BackendKind {
    Sqlite,
    Elasticsearch,
}

#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    #[arg(long, value_enum, default_value_t = BackendKind::Sqlite)]
    pub backend: BackendKind,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, default_value = "http://localhost:9200")]
    pub es_url: String,

    #[arg(long, default_value = "semantic_development")]
    pub index_name: String,

    #[arg(long, default_value_t = 10_000)]
    pub request_timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct PrepareArgs {
    #[arg(long, default_value = ".cache/fitscore")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIM)]
    pub dimensions: usize,
}

#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    #[arg(long, default_value = ".cache/fitscore")]
    pub cache_root: PathBuf,

    #[command(flatten)]
    pub backend: BackendArgs,

    #[arg(long)]
    pub documents: PathBuf,

    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIM)]
    pub dimensions: usize,

    #[arg(long, default_value_t = false)]
    pub embed_missing: bool,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[arg(long, default_value = ".cache/fitscore")]
    pub cache_root: PathBuf,

    #[command(flatten)]
    pub backend: BackendArgs,

    #[arg(long)]
    pub fixture: Option<PathBuf>,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    #[arg(long)]
    pub scoring_scheme: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    #[arg(long, default_value_t = DEFAULT_MAX_IN_FLIGHT_QUERIES)]
    pub max_in_flight_queries: usize,

    #[arg(long, default_value_t = DEFAULT_QUERY_TIMEOUT_MS)]
    pub query_timeout_ms: u64,

    #[arg(long, default_value = "vector")]
    pub vector_field: String,

    #[arg(long, default_value = "definition")]
    pub keyword_field: String,

    #[arg(long, default_value = "term")]
    pub label_field: String,

    #[arg(long, default_value_t = 1.0)]
    pub similarity_bias: f64,

    #[arg(long, default_value_t = false)]
    pub embed_missing_vectors: bool,

    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIM)]
    pub embedding_dim: usize,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct AuditArgs {
    #[arg(long, default_value = ".cache/fitscore")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/fitscore")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}
