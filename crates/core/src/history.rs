//! Log of answered questions and the feedback users leave on them, kept in
//! SQLite. Feedback rows reference their conversation by foreign key.

use crate::models::{AnswerRecord, ConversationEntry, Feedback, FeedbackScore};
use crate::HistoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_HISTORY_DB: &str = "history/storyqa.db";

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn save_conversation(&self, entry: &ConversationEntry) -> Result<(), HistoryError>;

    /// Fails with `UnknownConversation` when no conversation with the
    /// feedback's id has been saved.
    async fn save_feedback(&self, feedback: &Feedback) -> Result<(), HistoryError>;
}

#[derive(Debug, Clone)]
pub struct SqliteConversationStore {
    db_path: PathBuf,
    pool: SqlitePool,
}

impl SqliteConversationStore {
    /// Opens the database at `db_path`, creating the file, its parent
    /// directory and the tables as needed.
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let connect_options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(connect_options)
            .await?;

        let store = Self { db_path, pool };
        store.init_schema().await?;
        info!(path = %store.db_path.display(), "conversation log ready");
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn init_schema(&self) -> Result<(), HistoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "\
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                search_type TEXT NOT NULL,
                answer TEXT NOT NULL,
                response_time REAL NOT NULL,
                prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            )",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "\
            CREATE TABLE IF NOT EXISTS feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                feedback INTEGER NOT NULL CHECK(feedback IN (-1, 1)),
                timestamp TEXT NOT NULL
            )",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feedback_conversation_id ON feedback(conversation_id)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Every saved conversation, oldest first.
    pub async fn load_conversations(&self) -> Result<Vec<ConversationEntry>, HistoryError> {
        let rows = sqlx::query(
            "\
            SELECT id, question, search_type, answer, response_time,
                   prompt_tokens, completion_tokens, total_tokens, timestamp
            FROM conversations
            ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(conversation_from_row).collect()
    }

    pub async fn load_feedback(&self) -> Result<Vec<Feedback>, HistoryError> {
        let rows =
            sqlx::query("SELECT conversation_id, feedback, timestamp FROM feedback ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(feedback_from_row).collect()
    }
}

fn to_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_count(value: i64, column: &str) -> Result<u64, HistoryError> {
    u64::try_from(value).map_err(|_| HistoryError::InvalidRow(format!("negative {column}")))
}

fn parse_id(raw: &str) -> Result<Uuid, HistoryError> {
    Uuid::parse_str(raw).map_err(|err| HistoryError::InvalidRow(format!("id {raw}: {err}")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, HistoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| HistoryError::InvalidRow(format!("timestamp {raw}: {err}")))
}

fn conversation_from_row(row: &SqliteRow) -> Result<ConversationEntry, HistoryError> {
    let id: String = row.try_get("id")?;
    let search_type: String = row.try_get("search_type")?;
    let timestamp: String = row.try_get("timestamp")?;

    Ok(ConversationEntry {
        id: parse_id(&id)?,
        record: AnswerRecord {
            question: row.try_get("question")?,
            strategy: search_type.parse().map_err(HistoryError::InvalidRow)?,
            answer_text: row.try_get("answer")?,
            response_time_seconds: row.try_get("response_time")?,
            prompt_tokens: from_count(row.try_get("prompt_tokens")?, "prompt_tokens")?,
            completion_tokens: from_count(row.try_get("completion_tokens")?, "completion_tokens")?,
            total_tokens: from_count(row.try_get("total_tokens")?, "total_tokens")?,
        },
        timestamp: parse_timestamp(&timestamp)?,
    })
}

fn feedback_from_row(row: &SqliteRow) -> Result<Feedback, HistoryError> {
    let conversation_id: String = row.try_get("conversation_id")?;
    let score: i64 = row.try_get("feedback")?;
    let timestamp: String = row.try_get("timestamp")?;

    let score = i8::try_from(score)
        .map_err(|_| HistoryError::InvalidRow(format!("feedback score {score}")))
        .and_then(|score| FeedbackScore::try_from(score).map_err(HistoryError::InvalidRow))?;

    Ok(Feedback {
        conversation_id: parse_id(&conversation_id)?,
        score,
        timestamp: parse_timestamp(&timestamp)?,
    })
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn save_conversation(&self, entry: &ConversationEntry) -> Result<(), HistoryError> {
        let record = &entry.record;
        sqlx::query(
            "\
            INSERT INTO conversations (
                id, question, search_type, answer, response_time,
                prompt_tokens, completion_tokens, total_tokens, timestamp
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(entry.id.to_string())
        .bind(&record.question)
        .bind(record.strategy.as_str())
        .bind(&record.answer_text)
        .bind(record.response_time_seconds)
        .bind(to_count(record.prompt_tokens))
        .bind(to_count(record.completion_tokens))
        .bind(to_count(record.total_tokens))
        .bind(entry.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(id = %entry.id, strategy = %record.strategy, "conversation saved");
        Ok(())
    }

    async fn save_feedback(&self, feedback: &Feedback) -> Result<(), HistoryError> {
        let conversation_id = feedback.conversation_id.to_string();
        let mut tx = self.pool.begin().await?;

        let known = sqlx::query("SELECT 1 FROM conversations WHERE id = ?1")
            .bind(&conversation_id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !known {
            warn!(id = %feedback.conversation_id, "feedback for unknown conversation");
            return Err(HistoryError::UnknownConversation(feedback.conversation_id));
        }

        sqlx::query(
            "INSERT INTO feedback (conversation_id, feedback, timestamp) VALUES (?1, ?2, ?3)",
        )
        .bind(&conversation_id)
        .bind(i64::from(i8::from(feedback.score)))
        .bind(feedback.timestamp.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(id = %feedback.conversation_id, score = i8::from(feedback.score), "feedback saved");
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryConversationStore {
    conversations: Mutex<Vec<ConversationEntry>>,
    feedback: Mutex<Vec<Feedback>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversations(&self) -> Vec<ConversationEntry> {
        self.conversations
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn feedback(&self) -> Vec<Feedback> {
        self.feedback
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

fn poisoned() -> HistoryError {
    HistoryError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "conversation log lock poisoned",
    ))
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn save_conversation(&self, entry: &ConversationEntry) -> Result<(), HistoryError> {
        self.conversations
            .lock()
            .map_err(|_| poisoned())?
            .push(entry.clone());
        Ok(())
    }

    async fn save_feedback(&self, feedback: &Feedback) -> Result<(), HistoryError> {
        let known = self
            .conversations
            .lock()
            .map_err(|_| poisoned())?
            .iter()
            .any(|entry| entry.id == feedback.conversation_id);
        if !known {
            return Err(HistoryError::UnknownConversation(feedback.conversation_id));
        }

        self.feedback
            .lock()
            .map_err(|_| poisoned())?
            .push(feedback.clone());
        Ok(())
    }
}
