use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::cli::IndexArgs;
use crate::config::{CachePaths, backend_config};
use crate::model::{
    INDEX_MANIFEST_VERSION, IndexDocument, IndexRunManifest, SkippedEntry, SourceDocument,
};
use crate::semantic::{LocalHashEmbedder, VectorSource};
use crate::util::{block_on, now_utc_string, read_json, run_id, sha256_file, write_json_pretty};

#[derive(Debug)]
struct PreparedDocuments {
    documents: Vec<IndexDocument>,
    skipped: Vec<SkippedEntry>,
    embedded: usize,
}

pub fn run(args: IndexArgs) -> Result<()> {
    if args.dimensions == 0 {
        bail!("--dimensions must be at least 1");
    }

    let paths = CachePaths::new(&args.cache_root);
    let manifest_path = args
        .manifest_path
        .clone()
        .unwrap_or_else(|| paths.index_manifest_path());
    let backend = backend_config(&args.backend, &paths);

    let sources = read_json::<Vec<SourceDocument>>(&args.documents)?;
    let embedder = LocalHashEmbedder::new(args.dimensions);
    let source = args
        .embed_missing
        .then_some(&embedder as &dyn VectorSource);
    let prepared = prepare_documents(sources, args.dimensions, source)?;
    let documents_read = prepared.documents.len() + prepared.skipped.len();

    for entry in &prepared.skipped {
        warn!(index = entry.index, reason = %entry.reason, "skipping document");
    }

    info!(
        backend = %backend.describe(),
        documents = prepared.documents.len(),
        dimensions = args.dimensions,
        "indexing documents"
    );

    let index = backend.document_index()?;
    let (documents_indexed, document_count) = block_on(async {
        index.create_index(args.dimensions).await?;
        let written = index.index_documents(&prepared.documents).await?;
        let count = index.document_count().await?;
        Ok::<_, anyhow::Error>((written, count))
    })?
    .with_context(|| format!("failed to index documents into {}", backend.describe()))?;

    let manifest = IndexRunManifest {
        manifest_version: INDEX_MANIFEST_VERSION,
        run_id: run_id("index", Utc::now()),
        generated_at: now_utc_string(),
        backend: backend.describe(),
        documents_path: args.documents.display().to_string(),
        documents_sha256: sha256_file(&args.documents)?,
        dimensions: args.dimensions,
        documents_read,
        documents_indexed,
        documents_embedded: prepared.embedded,
        documents_skipped: prepared.skipped.len(),
        skipped_entries: prepared.skipped,
        document_count,
    };
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        indexed = manifest.documents_indexed,
        skipped = manifest.documents_skipped,
        embedded = manifest.documents_embedded,
        total_documents = manifest.document_count,
        manifest = %manifest_path.display(),
        "index run complete"
    );

    Ok(())
}

fn prepare_documents(
    sources: Vec<SourceDocument>,
    dimensions: usize,
    source: Option<&dyn VectorSource>,
) -> Result<PreparedDocuments> {
    let mut documents = Vec::<IndexDocument>::with_capacity(sources.len());
    let mut skipped = Vec::<SkippedEntry>::new();
    let mut embedded = 0usize;

    for (index, document) in sources.into_iter().enumerate() {
        let id = match &document.id {
            Value::String(id) if !id.trim().is_empty() => id.clone(),
            Value::Number(id) => id.to_string(),
            _ => {
                skipped.push(SkippedEntry {
                    index,
                    reason: "id must be a non-empty string or a number".to_string(),
                });
                continue;
            }
        };

        let vector = match (document.vector, source) {
            (Some(vector), _) => vector,
            (None, Some(source)) => {
                embedded += 1;
                source.embed(&format!("{} {}", document.term, document.definition))?
            }
            (None, None) => {
                skipped.push(SkippedEntry {
                    index,
                    reason: format!("document {id} has no vector"),
                });
                continue;
            }
        };

        if vector.len() != dimensions {
            skipped.push(SkippedEntry {
                index,
                reason: format!(
                    "document {id} has {} dimensions, index expects {dimensions}",
                    vector.len()
                ),
            });
            continue;
        }

        documents.push(IndexDocument {
            id,
            term: document.term,
            definition: document.definition,
            vector,
        });
    }

    Ok(PreparedDocuments {
        documents,
        skipped,
        embedded,
    })
}
