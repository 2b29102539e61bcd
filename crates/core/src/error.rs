use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("malformed csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("corpus is empty: {0}")]
    EmptyCorpus(String),

    #[error("embedding model returned {actual} vectors for {expected} chunks")]
    EmbeddingCountMismatch { expected: usize, actual: usize },

    #[error("embedding dimension mismatch: index expects {expected}, model produces {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Search(#[from] SearchError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("service not available yet: {0}")]
    NotReady(String),
}

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] SearchError),

    #[error("generation with {model} failed: {details}")]
    Generation { model: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unreadable history row: {0}")]
    InvalidRow(String),

    #[error("feedback references unknown conversation {0}")]
    UnknownConversation(Uuid),
}
