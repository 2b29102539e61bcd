use crate::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use tracing::debug;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-minilm";

const DIMENSION_SAMPLE: &str = "dimension check";

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Output dimensionality of the model.
    async fn dimensions(&self) -> Result<usize, SearchError>;
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        "char-trigram"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        Ok(self.embed_sync(text))
    }

    async fn dimensions(&self) -> Result<usize, SearchError> {
        Ok(self.dimensions.max(1))
    }
}

/// Embedding model served over the OpenAI-compatible `/v1/embeddings`
/// endpoint (Ollama, LM Studio, ...).
pub struct OllamaEmbedder {
    client: Arc<Client>,
    base_url: String,
    model: String,
    dimensions: OnceLock<usize>,
}

impl OllamaEmbedder {
    pub fn new(client: Arc<Client>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions: OnceLock::new(),
        }
    }

    async fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .json(&json!({
                "model": self.model,
                "input": inputs,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::BackendResponse {
                backend: "embeddings".to_string(),
                details: format!("{status}: {body}"),
            });
        }

        let payload: Value = response.json().await?;
        let data = payload
            .pointer("/data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut vectors = Vec::with_capacity(data.len());
        for item in data {
            let values = item
                .pointer("/embedding")
                .and_then(Value::as_array)
                .ok_or_else(|| SearchError::BackendResponse {
                    backend: "embeddings".to_string(),
                    details: "item without embedding".to_string(),
                })?;
            vectors.push(
                values
                    .iter()
                    .filter_map(Value::as_f64)
                    .map(|value| value as f32)
                    .collect(),
            );
        }

        if vectors.len() != inputs.len() {
            return Err(SearchError::BackendResponse {
                backend: "embeddings".to_string(),
                details: format!("asked for {} embeddings, got {}", inputs.len(), vectors.len()),
            });
        }

        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| SearchError::BackendResponse {
            backend: "embeddings".to_string(),
            details: "empty embedding response".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }

    async fn dimensions(&self) -> Result<usize, SearchError> {
        if let Some(known) = self.dimensions.get() {
            return Ok(*known);
        }

        let sample = self.embed(DIMENSION_SAMPLE).await?;
        if sample.is_empty() {
            return Err(SearchError::BackendResponse {
                backend: "embeddings".to_string(),
                details: format!("model {} returned an empty vector", self.model),
            });
        }
        debug!(model = %self.model, dimensions = sample.len(), "discovered embedding size");
        Ok(*self.dimensions.get_or_init(|| sample.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::{CharacterNgramEmbedder, Embedder};

    #[tokio::test]
    async fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Whistle in the dead of night").await.unwrap();
        let second = embedder.embed("Whistle in the dead of night").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc").await.unwrap();
        assert_eq!(vector.len(), 32);
        assert_eq!(embedder.dimensions().await.unwrap(), 32);
    }

    #[tokio::test]
    async fn batch_matches_single_embeddings() {
        let embedder = CharacterNgramEmbedder { dimensions: 16 };
        let texts = vec!["speckled band".to_string(), "Stoke Moran".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[1], embedder.embed_sync("Stoke Moran"));
    }
}
