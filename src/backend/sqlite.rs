use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::debug;

use super::{
    BackendError, DocumentIndex, Hit, KeywordQuery, RetrievalBackend, SearchQuery, SearchRequest,
    VectorQuery,
};
use crate::model::IndexDocument;
use crate::semantic::{cosine_similarity, decode_embedding_blob, encode_embedding_blob};
use crate::util::now_utc_string;

const INDEX_SCHEMA_VERSION: &str = "1";

/// Brute-force reference store: every query scans the whole table.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    db_path: PathBuf,
}

#[derive(Debug)]
struct StoredDocument {
    id: String,
    term: String,
    definition: String,
    score: f64,
}

impl StoredDocument {
    fn label(&self, label_field: &str) -> Result<&str, BackendError> {
        match label_field {
            "id" => Ok(&self.id),
            "term" => Ok(&self.term),
            "definition" => Ok(&self.definition),
            other => Err(BackendError::UnknownField(other.to_string())),
        }
    }
}

impl SqliteBackend {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    pub fn count_documents_blocking(&self) -> Result<usize, BackendError> {
        let connection = open_read_only(&self.db_path)?;
        count_documents(&connection)
    }
}

#[async_trait]
impl RetrievalBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn check_available(&self) -> Result<(), BackendError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let connection = open_read_only(&db_path).map_err(|error| {
                BackendError::Unavailable(format!("{}: {error}", db_path.display()))
            })?;
            let documents = count_documents(&connection).map_err(|error| {
                BackendError::Unavailable(format!("{}: {error}", db_path.display()))
            })?;
            debug!(path = %db_path.display(), documents, "sqlite index reachable");
            Ok(())
        })
        .await?
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<Hit>, BackendError> {
        let db_path = self.db_path.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || {
            let connection = open_read_only(&db_path)?;
            search_blocking(&connection, &request)
        })
        .await?
    }
}

#[async_trait]
impl DocumentIndex for SqliteBackend {
    async fn create_index(&self, dimensions: usize) -> Result<(), BackendError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let connection = open_read_write(&db_path)?;
            ensure_schema(&connection)?;

            if let Some(existing) = stored_dimensions(&connection)?
                && existing != dimensions
                && count_documents(&connection)? > 0
            {
                return Err(BackendError::DimensionMismatch {
                    expected: existing,
                    actual: dimensions,
                });
            }

            set_metadata(&connection, "vector_dim", &dimensions.to_string())?;
            set_metadata(&connection, "schema_version", INDEX_SCHEMA_VERSION)?;
            set_metadata(&connection, "created_at", &now_utc_string())?;
            Ok(())
        })
        .await?
    }

    async fn index_documents(&self, documents: &[IndexDocument]) -> Result<usize, BackendError> {
        let db_path = self.db_path.clone();
        let documents = documents.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut connection = open_read_write(&db_path)?;
            ensure_schema(&connection)?;
            let dimensions = stored_dimensions(&connection)?;

            let transaction = connection.transaction()?;
            let mut written = 0usize;
            for document in &documents {
                if let Some(expected) = dimensions
                    && document.vector.len() != expected
                {
                    return Err(BackendError::DimensionMismatch {
                        expected,
                        actual: document.vector.len(),
                    });
                }
                upsert_document(&transaction, document)?;
                written += 1;
            }
            transaction.commit()?;
            Ok(written)
        })
        .await?
    }

    async fn document_count(&self) -> Result<usize, BackendError> {
        let backend = self.clone();
        tokio::task::spawn_blocking(move || backend.count_documents_blocking()).await?
    }
}

fn open_read_only(db_path: &Path) -> Result<Connection, BackendError> {
    let connection = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(connection)
}

fn open_read_write(db_path: &Path) -> Result<Connection, BackendError> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|error| {
            BackendError::Unavailable(format!("{}: {error}", parent.display()))
        })?;
    }

    let connection = Connection::open(db_path)?;
    connection.pragma_update(None, "journal_mode", "WAL")?;
    connection.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(connection)
}

fn ensure_schema(connection: &Connection) -> Result<(), BackendError> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS documents (
          id TEXT PRIMARY KEY,
          term TEXT NOT NULL,
          definition TEXT NOT NULL,
          vector BLOB NOT NULL,
          vector_dim INTEGER NOT NULL,
          indexed_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn set_metadata(connection: &Connection, key: &str, value: &str) -> Result<(), BackendError> {
    connection.execute(
        "
        INSERT INTO metadata(key, value) VALUES(?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value=excluded.value
        ",
        params![key, value],
    )?;
    Ok(())
}

fn stored_dimensions(connection: &Connection) -> Result<Option<usize>, BackendError> {
    let value = connection
        .query_row(
            "SELECT value FROM metadata WHERE key = 'vector_dim' LIMIT 1",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()?;

    value
        .map(|raw| {
            raw.parse::<usize>()
                .map_err(|_| BackendError::Decode(format!("invalid stored vector_dim `{raw}`")))
        })
        .transpose()
}

fn upsert_document(connection: &Connection, document: &IndexDocument) -> Result<(), BackendError> {
    connection.execute(
        "
        INSERT INTO documents(id, term, definition, vector, vector_dim, indexed_at)
        VALUES(?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(id) DO UPDATE SET
          term=excluded.term,
          definition=excluded.definition,
          vector=excluded.vector,
          vector_dim=excluded.vector_dim,
          indexed_at=excluded.indexed_at
        ",
        params![
            document.id,
            document.term,
            document.definition,
            encode_embedding_blob(&document.vector),
            document.vector.len() as i64,
            now_utc_string(),
        ],
    )?;
    Ok(())
}

fn count_documents(connection: &Connection) -> Result<usize, BackendError> {
    let count = connection.query_row("SELECT COUNT(*) FROM documents", [], |row| {
        row.get::<_, i64>(0)
    })?;
    Ok(count.max(0) as usize)
}

fn search_blocking(
    connection: &Connection,
    request: &SearchRequest,
) -> Result<Vec<Hit>, BackendError> {
    let mut documents = match &request.query {
        SearchQuery::Vector(query) => vector_candidates(connection, query)?,
        SearchQuery::Keyword(query) => keyword_candidates(connection, query)?,
    };

    documents.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then(left.id.cmp(&right.id))
    });
    documents.truncate(request.size);

    documents
        .iter()
        .map(|document| {
            Ok(Hit {
                label: document.label(&request.label_field)?.to_string(),
                score: Some(document.score),
            })
        })
        .collect()
}

fn vector_candidates(
    connection: &Connection,
    query: &VectorQuery,
) -> Result<Vec<StoredDocument>, BackendError> {
    if query.field != "vector" {
        return Err(BackendError::UnknownField(query.field.clone()));
    }

    let mut statement = connection.prepare(
        "
        SELECT id, term, definition, vector, vector_dim
        FROM documents
        ",
    )?;
    let mut rows = statement.query([])?;

    let mut out = Vec::<StoredDocument>::new();
    while let Some(row) = rows.next()? {
        let id = row.get::<_, String>(0)?;
        let dimensions = row.get::<_, i64>(4)?.max(0) as usize;
        if dimensions != query.vector.len() {
            return Err(BackendError::DimensionMismatch {
                expected: dimensions,
                actual: query.vector.len(),
            });
        }

        let blob = row.get::<_, Vec<u8>>(3)?;
        let vector = decode_embedding_blob(&blob, dimensions)
            .ok_or_else(|| BackendError::Decode(format!("corrupt vector for document {id}")))?;

        out.push(StoredDocument {
            score: cosine_similarity(&query.vector, &vector) + query.bias,
            id,
            term: row.get(1)?,
            definition: row.get(2)?,
        });
    }

    Ok(out)
}

fn keyword_candidates(
    connection: &Connection,
    query: &KeywordQuery,
) -> Result<Vec<StoredDocument>, BackendError> {
    let column: usize = match query.field.as_str() {
        "term" => 1,
        "definition" => 2,
        other => return Err(BackendError::UnknownField(other.to_string())),
    };
    let query_tokens = keyword_tokens(&query.text);
    if query_tokens.is_empty() {
        return Ok(Vec::new());
    }

    let mut statement = connection.prepare(
        "
        SELECT id, term, definition
        FROM documents
        ",
    )?;
    let mut rows = statement.query([])?;

    let mut out = Vec::<StoredDocument>::new();
    while let Some(row) = rows.next()? {
        let field_text = row.get::<_, String>(column)?;
        let score = keyword_score(&query_tokens, &field_text);
        if score <= 0.0 {
            continue;
        }

        out.push(StoredDocument {
            id: row.get(0)?,
            term: row.get(1)?,
            definition: row.get(2)?,
            score,
        });
    }

    Ok(out)
}

fn keyword_tokens(text: &str) -> Vec<String> {
    let mut tokens = text
        .to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect::<Vec<String>>();
    tokens.sort();
    tokens.dedup();
    tokens
}

/// Saturating term-frequency overlap: each query token adds `tf / (tf + 1)`.
fn keyword_score(query_tokens: &[String], field_text: &str) -> f64 {
    let mut frequencies = HashMap::<String, usize>::new();
    for token in field_text
        .to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
    {
        *frequencies.entry(token.to_string()).or_insert(0) += 1;
    }

    query_tokens
        .iter()
        .filter_map(|token| frequencies.get(token))
        .map(|count| *count as f64 / (*count as f64 + 1.0))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::{SqliteBackend, keyword_score, keyword_tokens};
    use crate::backend::{
        BackendError, DocumentIndex, KeywordQuery, RetrievalBackend, SearchQuery, SearchRequest,
        Similarity, VectorQuery,
    };
    use crate::model::IndexDocument;

    fn document(id: &str, term: &str, definition: &str, vector: Vec<f32>) -> IndexDocument {
        IndexDocument {
            id: id.to_string(),
            term: term.to_string(),
            definition: definition.to_string(),
            vector,
        }
    }

    async fn seeded_backend(dir: &tempfile::TempDir) -> SqliteBackend {
        let backend = SqliteBackend::new(dir.path().join("index").join("fitscore.sqlite"));
        backend.create_index(2).await.expect("create index");
        let written = backend
            .index_documents(&[
                document("1", "saw", "a tool for cutting wood", vec![1.0, 0.0]),
                document("2", "hammer", "drives nails into wood", vec![0.6, 0.8]),
                document("3", "kettle", "a pot for boiling water", vec![0.0, 1.0]),
            ])
            .await
            .expect("index documents");
        assert_eq!(written, 3);
        backend
    }

    fn vector_request(vector: Vec<f32>, size: usize) -> SearchRequest {
        SearchRequest {
            query: SearchQuery::Vector(VectorQuery {
                field: "vector".to_string(),
                vector,
                similarity: Similarity::Cosine,
                bias: 1.0,
                match_all_base: true,
            }),
            size,
            label_field: "term".to_string(),
        }
    }

    fn keyword_request(field: &str, text: &str) -> SearchRequest {
        SearchRequest {
            query: SearchQuery::Keyword(KeywordQuery {
                field: field.to_string(),
                text: text.to_string(),
            }),
            size: 20,
            label_field: "term".to_string(),
        }
    }

    #[tokio::test]
    async fn vector_search_orders_by_biased_cosine() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = seeded_backend(&dir).await;
        backend.check_available().await.expect("reachable");

        let hits = backend
            .search(&vector_request(vec![1.0, 0.0], 20))
            .await
            .expect("search");
        let labels = hits
            .iter()
            .map(|hit| hit.label.as_str())
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["saw", "hammer", "kettle"]);
        let top = hits[0].score.expect("score");
        assert!((top - 2.0).abs() < 1e-9, "unexpected top score {top}");
        assert!(hits.iter().all(|hit| hit.score.unwrap_or(-1.0) >= 0.0));

        let truncated = backend
            .search(&vector_request(vec![1.0, 0.0], 1))
            .await
            .expect("search");
        assert_eq!(truncated.len(), 1);
    }

    #[tokio::test]
    async fn vector_search_rejects_mismatched_dimensions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = seeded_backend(&dir).await;

        let error = backend
            .search(&vector_request(vec![1.0, 0.0, 0.0], 20))
            .await
            .expect_err("dimension mismatch should fail the query");
        let BackendError::DimensionMismatch { expected, actual } = error else {
            panic!("unexpected error: {error}");
        };
        assert_eq!((expected, actual), (2, 3));
    }

    #[tokio::test]
    async fn keyword_search_matches_only_documents_sharing_tokens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = seeded_backend(&dir).await;

        let hits = backend
            .search(&keyword_request("definition", "Cutting WOOD"))
            .await
            .expect("search");
        let labels = hits
            .iter()
            .map(|hit| hit.label.as_str())
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["saw", "hammer"]);

        let by_term = backend
            .search(&keyword_request("term", "kettle"))
            .await
            .expect("search");
        assert_eq!(by_term.len(), 1);
        assert_eq!(by_term[0].label, "kettle");

        let nothing = backend
            .search(&keyword_request("definition", "???"))
            .await
            .expect("search");
        assert!(nothing.is_empty());
    }

    #[tokio::test]
    async fn unknown_fields_fail_the_query() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = seeded_backend(&dir).await;

        let error = backend
            .search(&keyword_request("body", "wood"))
            .await
            .expect_err("unknown field should fail");
        assert!(matches!(error, BackendError::UnknownField(field) if field == "body"));
    }

    #[tokio::test]
    async fn reindexing_upserts_and_guards_dimensions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = seeded_backend(&dir).await;

        backend
            .index_documents(&[document("1", "saw", "a toothed blade", vec![1.0, 0.0])])
            .await
            .expect("upsert");
        assert_eq!(backend.document_count().await.expect("count"), 3);

        let error = backend
            .index_documents(&[document("4", "drill", "makes holes", vec![1.0])])
            .await
            .expect_err("wrong dimension should be rejected");
        let BackendError::DimensionMismatch { expected, actual } = error else {
            panic!("unexpected error: {error}");
        };
        assert_eq!((expected, actual), (2, 1));

        let error = backend
            .create_index(3)
            .await
            .expect_err("populated index keeps its dimension");
        assert!(matches!(error, BackendError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn missing_database_is_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = SqliteBackend::new(dir.path().join("absent.sqlite"));
        let error = backend
            .check_available()
            .await
            .expect_err("missing database should be unavailable");
        assert!(matches!(error, BackendError::Unavailable(_)));
    }

    #[test]
    fn keyword_scoring_saturates_repeated_terms() {
        let tokens = keyword_tokens("wood, Wood and nails");
        assert_eq!(tokens, vec!["and", "nails", "wood"]);

        let once = keyword_score(&tokens, "wood");
        let twice = keyword_score(&tokens, "wood wood");
        assert!((once - 0.5).abs() < 1e-12);
        assert!(twice > once && twice < 1.0);
        assert_eq!(keyword_score(&tokens, "water"), 0.0);
    }
}
