use crate::chunking::{chunk_text, chunking_stats, ChunkingConfig, Tokenizer};
use crate::embeddings::Embedder;
use crate::models::Chunk;
use crate::traits::IndexAdmin;
use crate::IngestError;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_CORPUS_PATH: &str = "data/The_Adventure_of_the_Speckled_Band.txt";

/// Texts are sent to the embedding model in groups of this size.
const EMBED_BATCH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    pub chunk_count: usize,
    pub dimensions: usize,
    pub avg_chunk_chars: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Ingested(IngestionReport),
    AlreadyIndexed { dimensions: usize },
}

pub async fn load_corpus(path: &Path) -> Result<String, IngestError> {
    let content = tokio::fs::read_to_string(path).await?;
    info!(path = %path.display(), text_len = content.len(), "loaded corpus");
    Ok(content)
}

/// Chunk texts in corpus order; ids are the 0-based chunk positions.
pub fn split_corpus(
    text: &str,
    config: &ChunkingConfig,
    tokenizer: &dyn Tokenizer,
) -> Result<Vec<(String, String)>, IngestError> {
    let chunks = chunk_text(text, config, tokenizer)?;
    let stats = chunking_stats(&chunks);
    info!(chunks = stats.count, avg_chunk_len = stats.avg_chars, "chunked corpus");

    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(position, chunk)| (position.to_string(), chunk))
        .collect())
}

/// Embeds every text and checks each vector has `dimensions` components.
pub async fn embed_chunks<E>(
    embedder: &E,
    texts: Vec<(String, String)>,
    dimensions: usize,
) -> Result<Vec<Chunk>, IngestError>
where
    E: Embedder + ?Sized,
{
    let mut chunks = Vec::with_capacity(texts.len());

    for batch in texts.chunks(EMBED_BATCH) {
        let inputs: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
        let vectors = embedder.embed_batch(&inputs).await?;
        if vectors.len() != batch.len() {
            return Err(IngestError::EmbeddingCountMismatch {
                expected: batch.len(),
                actual: vectors.len(),
            });
        }

        for ((id, text), vector) in batch.iter().zip(vectors) {
            if vector.len() != dimensions {
                return Err(IngestError::DimensionMismatch {
                    expected: dimensions,
                    actual: vector.len(),
                });
            }
            chunks.push(Chunk {
                id: id.clone(),
                text: text.clone(),
                vector,
            });
        }
        debug!(embedded = chunks.len(), total = texts.len(), "embedding progress");
    }

    Ok(chunks)
}

/// Rebuilds the index from `text`: chunk, embed, recreate, index, then
/// confirm the stored vector field matches the model.
pub async fn ingest_text<S, E>(
    store: &S,
    embedder: &E,
    tokenizer: &dyn Tokenizer,
    config: &ChunkingConfig,
    text: &str,
) -> Result<IngestionReport, IngestError>
where
    S: IndexAdmin + Sync + ?Sized,
    E: Embedder + ?Sized,
{
    let texts = split_corpus(text, config, tokenizer)?;
    if texts.is_empty() {
        return Err(IngestError::EmptyCorpus(
            "no chunks produced from the corpus text".to_string(),
        ));
    }

    let dimensions = embedder.dimensions().await?;
    info!(model = embedder.model_name(), dimensions, "embedding chunks");

    let chunks = embed_chunks(embedder, texts, dimensions).await?;
    let stats = chunking_stats(
        &chunks.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>(),
    );

    store.recreate_index(dimensions).await?;
    verify_dimensions(store, dimensions).await?;
    store.index_chunks(&chunks).await?;

    let report = IngestionReport {
        chunk_count: chunks.len(),
        dimensions,
        avg_chunk_chars: stats.avg_chars,
    };
    info!(chunks = report.chunk_count, dimensions, "ingested corpus");
    Ok(report)
}

pub async fn ingest_corpus<S, E>(
    store: &S,
    embedder: &E,
    tokenizer: &dyn Tokenizer,
    config: &ChunkingConfig,
    path: &Path,
) -> Result<IngestionReport, IngestError>
where
    S: IndexAdmin + Sync + ?Sized,
    E: Embedder + ?Sized,
{
    let text = load_corpus(path).await?;
    ingest_text(store, embedder, tokenizer, config, &text).await
}

/// Ingests only when the index is missing. An existing index whose vector
/// field disagrees with the embedding model is a fatal configuration error.
pub async fn ensure_ingested<S, E>(
    store: &S,
    embedder: &E,
    tokenizer: &dyn Tokenizer,
    config: &ChunkingConfig,
    path: &Path,
) -> Result<IngestOutcome, IngestError>
where
    S: IndexAdmin + Sync + ?Sized,
    E: Embedder + ?Sized,
{
    if store.index_exists().await? {
        let dimensions = embedder.dimensions().await?;
        verify_dimensions(store, dimensions).await?;
        info!(dimensions, "index already exists, skipping ingestion");
        return Ok(IngestOutcome::AlreadyIndexed { dimensions });
    }

    ingest_corpus(store, embedder, tokenizer, config, path)
        .await
        .map(IngestOutcome::Ingested)
}

async fn verify_dimensions<S>(store: &S, dimensions: usize) -> Result<(), IngestError>
where
    S: IndexAdmin + Sync + ?Sized,
{
    match store.vector_dimensions().await? {
        Some(expected) if expected != dimensions => Err(IngestError::DimensionMismatch {
            expected,
            actual: dimensions,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::RegexTokenizer;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::stores::MemoryIndex;
    use crate::traits::DocumentLookup;
    use std::fs;
    use tempfile::tempdir;

    const TEXT: &str = "Holmes sat in the chair.\n\nThe lady was dressed in black and \
heavily veiled.\n\nShe raised her veil and we saw she was in a pitiable state of agitation.";

    #[tokio::test]
    async fn ingest_indexes_every_chunk_with_positional_ids() {
        let store = MemoryIndex::new();
        let embedder = CharacterNgramEmbedder { dimensions: 24 };
        let tokenizer = RegexTokenizer::new().unwrap();
        let config = ChunkingConfig { target_tokens: 10 };

        let report = ingest_text(&store, &embedder, &tokenizer, &config, TEXT)
            .await
            .unwrap();

        assert_eq!(report.dimensions, 24);
        assert_eq!(store.len(), report.chunk_count);
        assert!(report.chunk_count >= 3);
        let first = store.fetch("0").await.unwrap().unwrap();
        assert_eq!(first.text, "Holmes sat in the chair.");
    }

    #[tokio::test]
    async fn empty_corpus_is_rejected() {
        let store = MemoryIndex::new();
        let embedder = CharacterNgramEmbedder::default();
        let tokenizer = RegexTokenizer::new().unwrap();
        let result = ingest_text(&store, &embedder, &tokenizer, &ChunkingConfig::default(), "\n ")
            .await;
        assert!(matches!(result, Err(IngestError::EmptyCorpus(_))));
    }

    #[tokio::test]
    async fn embedding_of_wrong_size_is_fatal() {
        struct Lying;

        #[async_trait::async_trait]
        impl Embedder for Lying {
            fn model_name(&self) -> &str {
                "lying"
            }

            async fn embed(&self, _text: &str) -> Result<Vec<f32>, crate::SearchError> {
                Ok(vec![0.0; 3])
            }

            async fn dimensions(&self) -> Result<usize, crate::SearchError> {
                Ok(4)
            }
        }

        let store = MemoryIndex::new();
        let tokenizer = RegexTokenizer::new().unwrap();
        let config = ChunkingConfig::default();
        let result = ingest_text(&store, &Lying, &tokenizer, &config, TEXT).await;
        assert!(matches!(
            result,
            Err(IngestError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[tokio::test]
    async fn short_embedding_batch_is_fatal() {
        struct Forgetful;

        #[async_trait::async_trait]
        impl Embedder for Forgetful {
            fn model_name(&self) -> &str {
                "forgetful"
            }

            async fn embed(&self, _text: &str) -> Result<Vec<f32>, crate::SearchError> {
                Ok(vec![1.0; 4])
            }

            async fn embed_batch(
                &self,
                texts: &[String],
            ) -> Result<Vec<Vec<f32>>, crate::SearchError> {
                Ok(vec![vec![1.0; 4]; texts.len().saturating_sub(1)])
            }

            async fn dimensions(&self) -> Result<usize, crate::SearchError> {
                Ok(4)
            }
        }

        let store = MemoryIndex::new();
        let tokenizer = RegexTokenizer::new().unwrap();
        let config = ChunkingConfig { target_tokens: 10 };
        let result = ingest_text(&store, &Forgetful, &tokenizer, &config, TEXT).await;

        assert!(matches!(
            result,
            Err(IngestError::EmbeddingCountMismatch { actual, expected }) if actual + 1 == expected
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn existing_index_with_other_dimensions_is_fatal() {
        let store = MemoryIndex::new();
        store.recreate_index(8).await.unwrap();
        let embedder = CharacterNgramEmbedder { dimensions: 16 };
        let tokenizer = RegexTokenizer::new().unwrap();

        let result = ensure_ingested(
            &store,
            &embedder,
            &tokenizer,
            &ChunkingConfig::default(),
            Path::new("unused.txt"),
        )
        .await;
        assert!(matches!(
            result,
            Err(IngestError::DimensionMismatch {
                expected: 8,
                actual: 16
            })
        ));
    }

    #[tokio::test]
    async fn ensure_ingested_loads_once() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("story.txt");
        fs::write(&path, TEXT)?;

        let store = MemoryIndex::new();
        let embedder = CharacterNgramEmbedder { dimensions: 16 };
        let tokenizer = RegexTokenizer::new()?;
        let config = ChunkingConfig { target_tokens: 10 };

        let first = ensure_ingested(&store, &embedder, &tokenizer, &config, &path).await?;
        assert!(matches!(first, IngestOutcome::Ingested(_)));

        let second = ensure_ingested(&store, &embedder, &tokenizer, &config, &path).await?;
        assert_eq!(second, IngestOutcome::AlreadyIndexed { dimensions: 16 });
        Ok(())
    }

    #[tokio::test]
    async fn missing_corpus_file_is_an_io_error() {
        let result = load_corpus(Path::new("/definitely/not/here.txt")).await;
        assert!(matches!(result, Err(IngestError::Io(_))));
    }
}
