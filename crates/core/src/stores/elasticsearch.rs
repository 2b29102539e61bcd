use crate::models::{Chunk, HybridWeights};
use crate::store::{StoreHit, StoredChunk};
use crate::traits::{DocumentLookup, HybridIndex, IndexAdmin, KeywordIndex, VectorIndex};
use crate::SearchError;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

const BACKEND: &str = "elasticsearch";

pub const DEFAULT_NUM_CANDIDATES: usize = 10_000;

pub struct ElasticsearchStore {
    client: Arc<Client>,
    endpoint: Url,
    index_name: String,
    num_candidates: usize,
}

impl ElasticsearchStore {
    pub fn new(
        client: Arc<Client>,
        endpoint: &str,
        index_name: impl Into<String>,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            client,
            endpoint: Url::parse(endpoint)?,
            index_name: index_name.into(),
            num_candidates: DEFAULT_NUM_CANDIDATES,
        })
    }

    pub fn with_num_candidates(mut self, num_candidates: usize) -> Self {
        self.num_candidates = num_candidates.max(1);
        self
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint.as_str().trim_end_matches('/'), path)
    }

    fn index_url(&self, path: &str) -> String {
        if path.is_empty() {
            self.url(&self.index_name)
        } else {
            self.url(&format!("{}/{}", self.index_name, path))
        }
    }

    /// `{index}/_doc/{id}` with each segment percent-encoded, so ids holding
    /// `/`, `?` or `#` address the right document.
    fn document_url(&self, id: &str) -> Result<Url, SearchError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| SearchError::Request(format!("{} cannot be a base URL", self.endpoint)))?
            .pop_if_empty()
            .extend([self.index_name.as_str(), "_doc", id]);
        Ok(url)
    }

    /// Cluster banner returned by `GET /`.
    pub async fn cluster_info(&self) -> Result<Value, SearchError> {
        let response = self.client.get(self.url("")).send().await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }

    async fn search(&self, body: Value) -> Result<Vec<StoreHit>, SearchError> {
        let response = self
            .client
            .post(self.index_url("_search"))
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let response_json: Value = response.json().await?;
        Ok(parse_hits(&response_json))
    }
}

async fn ensure_success(response: Response) -> Result<Response, SearchError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(SearchError::BackendResponse {
        backend: BACKEND.to_string(),
        details: format!("{status}: {body}"),
    })
}

pub(crate) fn index_definition(dimensions: usize) -> Value {
    json!({
        "settings": {
            "number_of_shards": 1,
            "number_of_replicas": 0
        },
        "mappings": {
            "properties": {
                "text": {"type": "text"},
                "vector": {
                    "type": "dense_vector",
                    "dims": dimensions,
                    "index": true,
                    "similarity": "cosine"
                },
                "id": {"type": "keyword"}
            }
        }
    })
}

fn knn_clause(query_vector: &[f32], k: usize, num_candidates: usize) -> Value {
    json!({
        "field": "vector",
        "query_vector": query_vector,
        "k": k,
        "num_candidates": num_candidates.max(k),
    })
}

fn keyword_clause(query_text: &str) -> Value {
    json!({
        "bool": {
            "must": {
                "multi_match": {
                    "query": query_text,
                    "fields": ["text"],
                    "type": "best_fields"
                }
            }
        }
    })
}

pub(crate) fn vector_query_body(query_vector: &[f32], k: usize, num_candidates: usize) -> Value {
    json!({
        "knn": knn_clause(query_vector, k, num_candidates),
        "size": k,
        "_source": ["text"]
    })
}

pub(crate) fn keyword_query_body(query_text: &str, k: usize) -> Value {
    json!({
        "query": keyword_clause(query_text),
        "size": k,
        "_source": ["text"]
    })
}

pub(crate) fn hybrid_query_body(
    query_vector: &[f32],
    query_text: &str,
    k: usize,
    num_candidates: usize,
    weights: HybridWeights,
) -> Value {
    let mut knn = knn_clause(query_vector, k, num_candidates);
    knn["boost"] = json!(weights.vector);

    let mut keyword = keyword_clause(query_text);
    keyword["bool"]["must"]["multi_match"]["boost"] = json!(weights.keyword);

    json!({
        "knn": knn,
        "query": keyword,
        "size": k,
        "_source": ["text"]
    })
}

pub(crate) fn parse_hits(response: &Value) -> Vec<StoreHit> {
    response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|raw| {
                    let id = raw.pointer("/_id").and_then(Value::as_str)?;
                    let text = raw
                        .pointer("/_source/text")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let score = raw.pointer("/_score").and_then(Value::as_f64).unwrap_or(0.0);
                    Some(StoreHit::new(id, text, score))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_document(raw: &Value) -> Option<StoredChunk> {
    if !raw.pointer("/found").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    Some(StoredChunk {
        id: raw.pointer("/_id").and_then(Value::as_str)?.to_string(),
        text: raw
            .pointer("/_source/text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

fn bulk_payload(index_name: &str, chunks: &[Chunk]) -> Result<String, SearchError> {
    let mut lines = Vec::with_capacity(chunks.len() * 2);
    for chunk in chunks {
        lines.push(serde_json::to_string(&json!({
            "index": {
                "_index": index_name,
                "_id": chunk.id,
            }
        }))?);
        lines.push(serde_json::to_string(&json!({
            "id": chunk.id,
            "text": chunk.text,
            "vector": chunk.vector,
        }))?);
    }
    Ok(lines.join("\n") + "\n")
}

#[async_trait]
impl VectorIndex for ElasticsearchStore {
    async fn vector_search(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<StoreHit>, SearchError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        self.search(vector_query_body(query_vector, k, self.num_candidates))
            .await
    }
}

#[async_trait]
impl KeywordIndex for ElasticsearchStore {
    async fn keyword_search(
        &self,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<StoreHit>, SearchError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        self.search(keyword_query_body(query_text, k)).await
    }
}

#[async_trait]
impl HybridIndex for ElasticsearchStore {
    async fn hybrid_search(
        &self,
        query_vector: &[f32],
        query_text: &str,
        k: usize,
        weights: HybridWeights,
    ) -> Result<Vec<StoreHit>, SearchError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        self.search(hybrid_query_body(
            query_vector,
            query_text,
            k,
            self.num_candidates,
            weights,
        ))
        .await
    }
}

#[async_trait]
impl DocumentLookup for ElasticsearchStore {
    async fn fetch(&self, id: &str) -> Result<Option<StoredChunk>, SearchError> {
        let response = self
            .client
            .get(self.document_url(id)?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = ensure_success(response).await?;
        let raw: Value = response.json().await?;
        Ok(parse_document(&raw))
    }

    async fn fetch_many(&self, ids: &[String]) -> Result<Vec<StoredChunk>, SearchError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.index_url("_mget"))
            .json(&json!({ "ids": ids }))
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let raw: Value = response.json().await?;

        Ok(raw
            .pointer("/docs")
            .and_then(Value::as_array)
            .map(|docs| docs.iter().filter_map(parse_document).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl IndexAdmin for ElasticsearchStore {
    async fn index_exists(&self) -> Result<bool, SearchError> {
        let response = self.client.head(self.index_url("")).send().await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => Err(SearchError::BackendResponse {
                backend: BACKEND.to_string(),
                details: other.to_string(),
            }),
        }
    }

    async fn recreate_index(&self, dimensions: usize) -> Result<(), SearchError> {
        let response = self.client.delete(self.index_url("")).send().await?;
        if response.status() != StatusCode::NOT_FOUND {
            ensure_success(response).await?;
        }

        let response = self
            .client
            .put(self.index_url(""))
            .json(&index_definition(dimensions))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::Request(format!(
                "elasticsearch index setup failed with {}",
                response.status()
            )));
        }

        info!(index = %self.index_name, dimensions, "created index");
        Ok(())
    }

    async fn index_chunks(&self, chunks: &[Chunk]) -> Result<(), SearchError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let payload = bulk_payload(&self.index_name, chunks)?;
        let response = self
            .client
            .post(self.url("_bulk?refresh=true"))
            .header("Content-Type", "application/x-ndjson")
            .body(payload)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let summary: Value = response.json().await?;
        if summary.pointer("/errors").and_then(Value::as_bool).unwrap_or(false) {
            return Err(SearchError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "bulk request reported item errors".to_string(),
            });
        }

        debug!(index = %self.index_name, count = chunks.len(), "bulk indexed chunks");
        Ok(())
    }

    async fn vector_dimensions(&self) -> Result<Option<usize>, SearchError> {
        let response = self.client.get(self.index_url("_mapping")).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = ensure_success(response).await?;
        let mapping: Value = response.json().await?;
        Ok(mapping
            .get(&self.index_name)
            .and_then(|index| index.pointer("/mappings/properties/vector/dims"))
            .and_then(Value::as_u64)
            .map(|dims| dims as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_endpoint() {
        let result = ElasticsearchStore::new(Arc::new(Client::new()), "not a url", "stories");
        assert!(matches!(result, Err(SearchError::Url(_))));
    }

    #[test]
    fn urls_are_joined_without_double_slashes() {
        let store =
            ElasticsearchStore::new(Arc::new(Client::new()), "http://localhost:9200/", "stories")
                .unwrap();
        assert_eq!(store.index_url(""), "http://localhost:9200/stories");
        assert_eq!(store.index_url("_search"), "http://localhost:9200/stories/_search");
        assert_eq!(store.url("_bulk?refresh=true"), "http://localhost:9200/_bulk?refresh=true");
    }

    #[test]
    fn document_ids_are_escaped_as_one_segment() {
        let store =
            ElasticsearchStore::new(Arc::new(Client::new()), "http://localhost:9200/", "stories")
                .unwrap();
        assert_eq!(
            store.document_url("12").unwrap().as_str(),
            "http://localhost:9200/stories/_doc/12"
        );
        assert_eq!(
            store.document_url("a/b c?#").unwrap().as_str(),
            "http://localhost:9200/stories/_doc/a%2Fb%20c%3F%23"
        );
    }

    #[test]
    fn index_definition_declares_cosine_vector_field() {
        let definition = index_definition(384);
        let vector = &definition["mappings"]["properties"]["vector"];
        assert_eq!(vector["dims"], 384);
        assert_eq!(vector["similarity"], "cosine");
        assert_eq!(definition["mappings"]["properties"]["text"]["type"], "text");
    }

    #[test]
    fn hybrid_body_boosts_both_clauses() {
        let body = hybrid_query_body(
            &[0.1, 0.2],
            "speckled band",
            5,
            10_000,
            HybridWeights {
                vector: 0.3,
                keyword: 0.7,
            },
        );
        assert_eq!(body["size"], 5);
        assert_eq!(body["knn"]["k"], 5);
        assert_eq!(body["knn"]["num_candidates"], 10_000);
        assert_eq!(body["knn"]["boost"], 0.3);
        let multi_match = &body["query"]["bool"]["must"]["multi_match"];
        assert_eq!(multi_match["query"], "speckled band");
        assert_eq!(multi_match["type"], "best_fields");
        assert_eq!(multi_match["boost"], 0.7);
    }

    #[test]
    fn vector_body_keeps_candidates_above_k() {
        let body = vector_query_body(&[1.0], 50, 10);
        assert_eq!(body["knn"]["num_candidates"], 50);
        assert!(body.get("query").is_none());
    }

    #[test]
    fn keyword_body_has_no_knn_clause() {
        let body = keyword_query_body("Roylott", 10);
        assert!(body.get("knn").is_none());
        assert_eq!(body["size"], 10);
    }

    #[test]
    fn hits_are_parsed_in_response_order() {
        let response = json!({
            "hits": {
                "hits": [
                    {"_id": "4", "_score": 2.5, "_source": {"text": "the band"}},
                    {"_id": "1", "_score": 1.0, "_source": {"text": "the whistle"}},
                    {"_score": 0.5, "_source": {"text": "no id"}}
                ]
            }
        });
        let hits = parse_hits(&response);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0], StoreHit::new("4", "the band", 2.5));
        assert_eq!(hits[1].id, "1");
        assert!(parse_hits(&json!({})).is_empty());
    }

    #[test]
    fn missing_documents_are_skipped() {
        let found = json!({"_id": "2", "found": true, "_source": {"text": "a ventilator"}});
        let missing = json!({"_id": "9", "found": false});
        assert_eq!(
            parse_document(&found),
            Some(StoredChunk {
                id: "2".to_string(),
                text: "a ventilator".to_string()
            })
        );
        assert_eq!(parse_document(&missing), None);
    }

    #[test]
    fn bulk_payload_is_newline_delimited() {
        let chunks = vec![Chunk {
            id: "0".to_string(),
            text: "a bell-rope".to_string(),
            vector: vec![0.5, 0.5],
        }];
        let payload = bulk_payload("stories", &chunks).unwrap();
        let lines: Vec<&str> = payload.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(payload.ends_with('\n'));
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_id"], "0");
        let document: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(document["text"], "a bell-rope");
    }
}
