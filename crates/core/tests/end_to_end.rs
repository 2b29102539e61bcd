use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use storyqa_core::{
    ingest_text, AnswerError, CharacterNgramEmbedder, Chunk, ChunkingConfig, Completion,
    ConversationEntry, ConversationStore, Embedder, Feedback, FeedbackScore, LanguageModel,
    MemoryConversationStore, MemoryIndex, PromptBuilder, PromptConfig, RagPipeline,
    RegexTokenizer, RetrievalConfig, Retriever, SearchError, SearchStrategy, TokenUsage,
};

const QUESTION: &str = "What was the speckled band?";

/// Looks vectors up by exact text; anything unknown embeds to the origin.
struct TableEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

#[async_trait]
impl Embedder for TableEmbedder {
    fn model_name(&self) -> &str {
        "table"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| vec![0.0; 3]))
    }

    async fn dimensions(&self) -> Result<usize, SearchError> {
        Ok(3)
    }
}

struct CannedModel;

#[async_trait]
impl LanguageModel for CannedModel {
    fn model_name(&self) -> &str {
        "canned"
    }

    async fn complete(&self, prompt: &str) -> Result<Completion, AnswerError> {
        let answer = if prompt.contains("text: It was a swamp adder") {
            "A swamp adder."
        } else {
            "The context does not say."
        };
        Ok(Completion {
            text: answer.to_string(),
            usage: TokenUsage {
                prompt_tokens: 50,
                completion_tokens: 4,
                total_tokens: 54,
            },
        })
    }
}

fn three_chunk_corpus() -> (MemoryIndex, TableEmbedder) {
    let docs = [
        ("0", "Dr. Grimesby Roylott kept a cheetah and a baboon.", [0.0f32, 1.0, 0.0]),
        ("1", "A deadly snake slid down a bell-rope.", [1.0, 0.0, 0.0]),
        ("2", "The speckled band was a swamp adder.", [0.0, 0.0, 1.0]),
    ];

    let chunks = docs
        .iter()
        .map(|(id, text, vector)| Chunk {
            id: id.to_string(),
            text: text.to_string(),
            vector: vector.to_vec(),
        })
        .collect();
    let store = MemoryIndex::with_chunks(3, chunks).unwrap();

    let mut vectors = HashMap::new();
    vectors.insert(QUESTION.to_string(), vec![1.0, 0.0, 0.3]);
    (store, TableEmbedder { vectors })
}

fn retriever<S, E>(store: S, embedder: E, top_k: usize) -> Retriever<S, E>
where
    S: storyqa_core::SearchIndex + Send + Sync,
    E: Embedder,
{
    Retriever::new(
        Arc::new(store),
        Arc::new(embedder),
        RetrievalConfig {
            top_k,
            ..RetrievalConfig::default()
        },
    )
}

#[tokio::test]
async fn rrf_returns_best_vector_and_exact_keyword_match() {
    let (store, embedder) = three_chunk_corpus();
    let retriever = retriever(store, embedder, 2);

    let result = retriever
        .retrieve(QUESTION, SearchStrategy::HybridRrf)
        .await
        .unwrap();

    // "2" is ranked second by vector and first by keyword; "1" only tops the vector list.
    assert_eq!(result.ids(), vec!["2", "1"]);
    let expected_top = 1.0 / 62.0 + 1.0 / 61.0;
    assert!((result.chunks[0].score - expected_top).abs() < 1e-12);
    assert!((result.chunks[1].score - 1.0 / 61.0).abs() < 1e-12);
    assert_eq!(result.chunks[0].text, "The speckled band was a swamp adder.");
}

#[tokio::test]
async fn vector_strategy_prefers_nearest_chunk() {
    let (store, embedder) = three_chunk_corpus();
    let retriever = retriever(store, embedder, 1);

    let result = retriever.retrieve(QUESTION, SearchStrategy::Vector).await.unwrap();
    assert_eq!(result.ids(), vec!["1"]);
}

#[tokio::test]
async fn every_strategy_is_bounded_and_repeatable() {
    let (store, embedder) = three_chunk_corpus();
    let retriever = retriever(store, embedder, 2);

    for strategy in SearchStrategy::ALL {
        let first = retriever.retrieve(QUESTION, strategy).await.unwrap();
        let second = retriever.retrieve(QUESTION, strategy).await.unwrap();

        assert!(first.len() <= 2, "{strategy}");
        let mut ids = first.ids();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), first.len(), "{strategy}");
        assert_eq!(first, second, "{strategy}");
    }
}

#[tokio::test]
async fn empty_corpus_returns_nothing_for_every_strategy() {
    let embedder = TableEmbedder {
        vectors: HashMap::new(),
    };
    let retriever = retriever(MemoryIndex::new(), embedder, 5);

    for strategy in SearchStrategy::ALL {
        let result = retriever.retrieve(QUESTION, strategy).await.unwrap();
        assert!(result.is_empty(), "{strategy}");
    }
}

#[tokio::test]
async fn ingested_story_answers_and_records_feedback() {
    let story = "Holmes listened to the tale of Helen Stoner.\n\n\
It was a swamp adder, the deadliest snake in India.\n\n\
Watson kept his revolver ready through the night.";

    let store = MemoryIndex::new();
    let embedder = CharacterNgramEmbedder { dimensions: 64 };
    let tokenizer = RegexTokenizer::new().unwrap();
    let report = ingest_text(
        &store,
        &embedder,
        &tokenizer,
        &ChunkingConfig { target_tokens: 12 },
        story,
    )
    .await
    .unwrap();
    assert_eq!(report.dimensions, 64);
    assert_eq!(store.len(), report.chunk_count);

    let pipeline = RagPipeline::new(
        retriever(store, embedder, 2),
        PromptBuilder::new(PromptConfig::default()),
        CannedModel,
    );
    let record = pipeline
        .answer("Which snake was a swamp adder?", SearchStrategy::HybridRrf)
        .await
        .unwrap();
    assert_eq!(record.answer_text, "A swamp adder.");
    assert_eq!(record.total_tokens, 54);

    let log = MemoryConversationStore::new();
    let entry = ConversationEntry::new(record);
    log.save_conversation(&entry).await.unwrap();
    log.save_feedback(&Feedback {
        conversation_id: entry.id,
        score: FeedbackScore::Up,
        timestamp: chrono::Utc::now(),
    })
    .await
    .unwrap();
    assert_eq!(log.feedback().len(), 1);
}
