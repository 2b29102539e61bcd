pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod evaluation;
pub mod history;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod readiness;
pub mod retrieval;
pub mod store;
pub mod stores;
pub mod traits;

pub use chunking::{chunk_text, ChunkingConfig, RegexTokenizer, Tokenizer};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_EMBEDDING_MODEL,
};
pub use error::{AnswerError, HistoryError, IngestError, SearchError};
pub use evaluation::{
    evaluate, generate_answers, load_ground_truth, one_question_per_document,
    write_answer_samples, AnswerSample, EvaluationReport,
};
pub use history::{
    ConversationStore, MemoryConversationStore, SqliteConversationStore, DEFAULT_HISTORY_DB,
};
pub use ingest::{
    ensure_ingested, ingest_corpus, ingest_text, IngestOutcome, IngestionReport,
    DEFAULT_CORPUS_PATH,
};
pub use llm::{Completion, LanguageModel, OllamaChatClient, DEFAULT_LLM_MODEL};
pub use models::{
    AnswerRecord, Chunk, ConversationEntry, Feedback, FeedbackScore, GroundTruth, HybridWeights,
    RetrievalResult, RetrievedChunk, SearchStrategy, TokenUsage,
};
pub use orchestrator::RagPipeline;
pub use prompt::{PromptBuilder, PromptConfig, PromptTemplate};
pub use readiness::{wait_for_endpoint, wait_for_service, ReadinessConfig};
pub use retrieval::{RetrievalConfig, Retriever, TieBreak};
pub use store::{StoreHit, StoredChunk};
pub use stores::{ElasticsearchStore, MemoryIndex};
pub use traits::{DocumentLookup, HybridIndex, IndexAdmin, KeywordIndex, SearchIndex, VectorIndex};
