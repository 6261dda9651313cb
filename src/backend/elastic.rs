use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{
    BackendError, DocumentIndex, Hit, RetrievalBackend, SearchQuery, SearchRequest, Similarity,
};
use crate::model::IndexDocument;

/// Elasticsearch 7.x over plain HTTP.
#[derive(Debug, Clone)]
pub struct ElasticBackend {
    client: Client,
    base_url: String,
    index: String,
}

#[derive(Debug, Deserialize)]
struct ClusterHealth {
    status: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    hits: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(rename = "_score")]
    score: Option<f64>,
    #[serde(rename = "_source", default)]
    source: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: usize,
}

impl ElasticBackend {
    pub fn new(base_url: &str, index: &str, request_timeout_ms: u64) -> Result<Self, BackendError> {
        let mut builder = Client::builder();
        if request_timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(request_timeout_ms));
        }

        Ok(Self {
            client: builder.build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl RetrievalBackend for ElasticBackend {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    async fn check_available(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(self.url("_cluster/health"))
            .send()
            .await
            .map_err(|error| BackendError::Unavailable(format!("{}: {error}", self.base_url)))?;
        let health: ClusterHealth = ensure_success(response).await?.json().await?;

        if health.status == "red" {
            return Err(BackendError::Unavailable(format!(
                "cluster health is red at {}",
                self.base_url
            )));
        }

        debug!(url = %self.base_url, status = %health.status, "elasticsearch reachable");
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<Hit>, BackendError> {
        let response = self
            .client
            .post(self.url(&format!("{}/_search", self.index)))
            .json(&search_body(request))
            .send()
            .await?;
        let body: Value = ensure_success(response).await?.json().await?;
        parse_hits(body, &request.label_field)
    }
}

#[async_trait]
impl DocumentIndex for ElasticBackend {
    async fn create_index(&self, dimensions: usize) -> Result<(), BackendError> {
        let response = self
            .client
            .put(self.url(&self.index))
            .json(&index_definition(dimensions))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 400 {
            let body = response.text().await.unwrap_or_default();
            if body.contains("resource_already_exists_exception") {
                info!(index = %self.index, "elasticsearch index already exists");
                return Ok(());
            }
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        ensure_success(response).await?;
        info!(index = %self.index, dimensions, "created elasticsearch index");
        Ok(())
    }

    async fn index_documents(&self, documents: &[IndexDocument]) -> Result<usize, BackendError> {
        let mut written = 0usize;
        for document in documents {
            let response = self
                .client
                .put(self.url(&format!("{}/_doc/{}", self.index, document.id)))
                .json(document)
                .send()
                .await?;
            ensure_success(response).await?;
            written += 1;
        }

        let response = self
            .client
            .post(self.url(&format!("{}/_refresh", self.index)))
            .send()
            .await?;
        ensure_success(response).await?;

        Ok(written)
    }

    async fn document_count(&self) -> Result<usize, BackendError> {
        let response = self
            .client
            .get(self.url(&format!("{}/_count", self.index)))
            .send()
            .await?;
        let count: CountResponse = ensure_success(response).await?.json().await?;
        Ok(count.count)
    }
}

async fn ensure_success(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}

fn search_body(request: &SearchRequest) -> Value {
    let query = match &request.query {
        SearchQuery::Vector(query) => {
            let function = match query.similarity {
                Similarity::Cosine => "cosineSimilarity",
            };
            let base = if query.match_all_base {
                json!({ "match_all": {} })
            } else {
                json!({ "exists": { "field": query.field } })
            };
            json!({
                "script_score": {
                    "query": base,
                    "script": {
                        "source": format!(
                            "{function}(params.query_vector, '{}') + {:?}",
                            query.field, query.bias
                        ),
                        "params": { "query_vector": query.vector },
                    },
                },
            })
        }
        SearchQuery::Keyword(query) => json!({
            "match": { (query.field.as_str()): query.text },
        }),
    };

    json!({
        "size": request.size,
        "query": query,
        "_source": { "includes": [request.label_field] },
    })
}

fn index_definition(dimensions: usize) -> Value {
    json!({
        "settings": {
            "index": {
                "number_of_shards": 1,
                "number_of_replicas": 0,
            },
        },
        "mappings": {
            "dynamic": "strict",
            "_source": { "enabled": true },
            "properties": {
                "id": { "type": "keyword" },
                "term": { "type": "text" },
                "definition": { "type": "text" },
                "vector": { "type": "dense_vector", "dims": dimensions },
            },
        },
    })
}

fn parse_hits(body: Value, label_field: &str) -> Result<Vec<Hit>, BackendError> {
    let response: SearchResponse =
        serde_json::from_value(body).map_err(|error| BackendError::Decode(error.to_string()))?;

    // A hit without the label keeps its slot so later positions stay honest.
    Ok(response
        .hits
        .hits
        .into_iter()
        .map(|hit| Hit {
            label: hit
                .source
                .get(label_field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            score: hit.score,
        })
        .collect())
}
