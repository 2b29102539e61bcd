use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storyqa_core::prompt::DEFAULT_STORY_TITLE;
use storyqa_core::{
    ensure_ingested, evaluate, generate_answers, ingest_corpus, load_ground_truth,
    one_question_per_document, wait_for_endpoint, write_answer_samples, CharacterNgramEmbedder,
    ChunkingConfig, ConversationEntry, ConversationStore, ElasticsearchStore, Embedder, Feedback, IndexAdmin,
    FeedbackScore, HybridWeights, IngestOutcome, MemoryIndex, OllamaChatClient, OllamaEmbedder,
    PromptBuilder, PromptConfig, PromptTemplate, RagPipeline, ReadinessConfig, RegexTokenizer,
    RetrievalConfig, Retriever, SearchIndex, SearchStrategy, SqliteConversationStore, TieBreak,
    DEFAULT_CORPUS_PATH, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL, DEFAULT_HISTORY_DB,
    DEFAULT_LLM_MODEL,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "storyqa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Elasticsearch base URL
    #[arg(long, env = "ELASTIC_URL", default_value = "http://localhost:9200")]
    elastic_url: String,

    /// Index holding the story chunks
    #[arg(long, env = "STORYQA_INDEX", default_value = "detective_assistant")]
    index_name: String,

    /// Ollama base URL
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434")]
    ollama_url: String,

    #[arg(long, env = "STORYQA_LLM_MODEL", default_value = DEFAULT_LLM_MODEL)]
    llm_model: String,

    #[arg(long, env = "STORYQA_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Number of chunks handed to the model
    #[arg(long, env = "STORYQA_TOP_K", default_value = "5")]
    top_k: usize,

    #[arg(long, env = "STORYQA_RRF_K", default_value = "60")]
    rrf_k: f64,

    /// Each RRF sub-search asks for top_k times this many hits.
    #[arg(long, env = "STORYQA_OVERFETCH", default_value = "2")]
    overfetch: usize,

    #[arg(long, env = "STORYQA_NUM_CANDIDATES", default_value = "10000")]
    num_candidates: usize,

    #[arg(long, env = "STORYQA_VECTOR_WEIGHT", default_value = "0.5")]
    vector_weight: f64,

    #[arg(long, env = "STORYQA_KEYWORD_WEIGHT", default_value = "0.5")]
    keyword_weight: f64,

    /// Break RRF ties in favour of the keyword list
    #[arg(long, default_value_t = false)]
    keyword_first: bool,

    #[arg(long, env = "STORYQA_CHUNK_TOKENS", default_value = "100")]
    chunk_tokens: usize,

    #[arg(long, env = "STORYQA_CORPUS", default_value = DEFAULT_CORPUS_PATH)]
    corpus: PathBuf,

    #[arg(
        long,
        env = "STORYQA_STORY_TITLE",
        default_value = DEFAULT_STORY_TITLE
    )]
    story_title: String,

    /// Ask the model to quote the passages it relies on
    #[arg(long, default_value_t = false)]
    cite: bool,

    #[arg(long, env = "STORYQA_MAX_CONTEXT_CHARS", default_value = "16000")]
    max_context_chars: usize,

    /// SQLite file holding conversations and feedback
    #[arg(long, env = "STORYQA_HISTORY_DB", default_value = DEFAULT_HISTORY_DB)]
    history_db: PathBuf,

    /// Keep the index in memory and embed with the local trigram hasher.
    /// The corpus is re-ingested on every run; chat still goes to Ollama.
    #[arg(long, env = "STORYQA_OFFLINE", default_value_t = false)]
    offline: bool,

    /// Do not wait for Elasticsearch and Ollama to accept connections
    #[arg(long, default_value_t = false)]
    skip_readiness: bool,

    #[arg(long, env = "STORYQA_READY_RETRIES", default_value = "120")]
    ready_retries: u32,

    #[arg(long, env = "STORYQA_READY_DELAY_SECS", default_value = "5")]
    ready_delay_secs: u64,

    #[arg(long, env = "STORYQA_READY_TIMEOUT_SECS", default_value = "2")]
    ready_timeout_secs: u64,

    /// Do not ask Ollama to pull the chat model
    #[arg(long, default_value_t = false)]
    skip_pull: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and index the story.
    Ingest {
        /// Rebuild the index even if it already exists.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Answer a question from the indexed story.
    Ask {
        #[arg(long)]
        question: String,
        /// vector, hybrid or hybrid_rrf
        #[arg(long, default_value = "hybrid_rrf")]
        strategy: SearchStrategy,
    },
    /// Rate a previous answer with +1 or -1.
    Feedback {
        #[arg(long)]
        conversation_id: Uuid,
        #[arg(long, allow_hyphen_values = true)]
        score: i8,
    },
    /// Score retrieval against labelled questions.
    Eval {
        /// CSV with question and document columns
        #[arg(long)]
        ground_truth: PathBuf,
        /// Evaluate only this strategy instead of all three.
        #[arg(long)]
        strategy: Option<SearchStrategy>,
    },
    /// Answer one labelled question per chunk with every prompt template.
    Answers {
        /// CSV with question and document columns
        #[arg(long)]
        ground_truth: PathBuf,
        #[arg(long, default_value = "50")]
        limit: usize,
        #[arg(long, default_value = "vector")]
        strategy: SearchStrategy,
        /// Receives answers_<template>.csv for each template
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
}

impl Cli {
    fn retrieval_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            top_k: self.top_k,
            rrf_k: self.rrf_k,
            overfetch: self.overfetch,
            weights: HybridWeights {
                vector: self.vector_weight,
                keyword: self.keyword_weight,
            },
            tie_break: if self.keyword_first {
                TieBreak::KeywordFirst
            } else {
                TieBreak::VectorFirst
            },
        }
    }

    fn prompt_config(&self) -> PromptConfig {
        PromptConfig {
            template: if self.cite {
                PromptTemplate::CitedDetective
            } else {
                PromptTemplate::Detective
            },
            story_title: self.story_title.clone(),
            max_context_chars: self.max_context_chars,
        }
    }

    fn readiness_config(&self) -> ReadinessConfig {
        ReadinessConfig {
            timeout: Duration::from_secs(self.ready_timeout_secs),
            retries: self.ready_retries,
            delay: Duration::from_secs(self.ready_delay_secs),
        }
    }

    fn chunking_config(&self) -> ChunkingConfig {
        ChunkingConfig {
            target_tokens: self.chunk_tokens,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        offline = cli.offline,
        started_at = %Utc::now().to_rfc3339(),
        "storyqa boot"
    );

    if let Command::Feedback {
        conversation_id,
        score,
    } = &cli.command
    {
        let score = FeedbackScore::try_from(*score).map_err(anyhow::Error::msg)?;
        let log = SqliteConversationStore::open(&cli.history_db).await?;
        log.save_feedback(&Feedback {
            conversation_id: *conversation_id,
            score,
            timestamp: Utc::now(),
        })
        .await?;
        println!("feedback {} recorded for {}", i8::from(score), conversation_id);
        return Ok(());
    }

    let client = Arc::new(reqwest::Client::new());

    if cli.offline {
        let store = Arc::new(MemoryIndex::new());
        let embedder = Arc::new(CharacterNgramEmbedder {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        });
        return run(&cli, "in-memory index", store, embedder, client).await;
    }

    if !cli.skip_readiness {
        let readiness = cli.readiness_config();
        wait_for_endpoint(&cli.elastic_url, &readiness).await?;
        wait_for_endpoint(&cli.ollama_url, &readiness).await?;
    }

    let store = Arc::new(
        ElasticsearchStore::new(Arc::clone(&client), &cli.elastic_url, cli.index_name.clone())?
            .with_num_candidates(cli.num_candidates),
    );
    let cluster = store.cluster_info().await?;
    info!(
        cluster = cluster["cluster_name"].as_str().unwrap_or("unknown"),
        version = cluster["version"]["number"].as_str().unwrap_or("unknown"),
        "connected to elasticsearch"
    );

    let embedder = Arc::new(OllamaEmbedder::new(
        Arc::clone(&client),
        cli.ollama_url.clone(),
        cli.embedding_model.clone(),
    ));
    let label = format!("index {}", store.index_name());
    run(&cli, &label, store, embedder, client).await
}

async fn run<S, E>(
    cli: &Cli,
    label: &str,
    store: Arc<S>,
    embedder: Arc<E>,
    client: Arc<reqwest::Client>,
) -> anyhow::Result<()>
where
    S: SearchIndex + IndexAdmin + Send + Sync,
    E: Embedder,
{
    let tokenizer = RegexTokenizer::new()?;
    let chunking = cli.chunking_config();

    if let Command::Ingest { force: true } = &cli.command {
        let report = ingest_corpus(
            store.as_ref(),
            embedder.as_ref(),
            &tokenizer,
            &chunking,
            &cli.corpus,
        )
        .await?;
        println!(
            "{} chunks ingested into {label} ({} dimensions, avg {} chars) at {}",
            report.chunk_count,
            report.dimensions,
            report.avg_chunk_chars,
            Utc::now().to_rfc3339()
        );
        return Ok(());
    }

    let outcome = ensure_ingested(
        store.as_ref(),
        embedder.as_ref(),
        &tokenizer,
        &chunking,
        &cli.corpus,
    )
    .await?;

    match &cli.command {
        Command::Ingest { .. } => match outcome {
            IngestOutcome::Ingested(report) => println!(
                "{} chunks ingested into {label} ({} dimensions, avg {} chars) at {}",
                report.chunk_count,
                report.dimensions,
                report.avg_chunk_chars,
                Utc::now().to_rfc3339()
            ),
            IngestOutcome::AlreadyIndexed { dimensions } => println!(
                "{label} already exists ({dimensions} dimensions); pass --force to rebuild"
            ),
        },
        Command::Ask { question, strategy } => {
            let model = chat_model(cli, client).await?;
            let retriever = Retriever::new(store, embedder, cli.retrieval_config());
            let pipeline =
                RagPipeline::new(retriever, PromptBuilder::new(cli.prompt_config()), model);
            let record = pipeline.answer(question, *strategy).await?;

            let entry = ConversationEntry::new(record);
            match SqliteConversationStore::open(&cli.history_db).await {
                Ok(log) => {
                    if let Err(error) = log.save_conversation(&entry).await {
                        warn!(%error, "could not record conversation");
                    }
                }
                Err(error) => warn!(%error, "could not open conversation log"),
            }

            println!("{}", entry.record.answer_text);
            println!();
            println!(
                "strategy={} time={:.2}s tokens={} (prompt {}, completion {})",
                entry.record.strategy,
                entry.record.response_time_seconds,
                entry.record.total_tokens,
                entry.record.prompt_tokens,
                entry.record.completion_tokens
            );
            println!("conversation_id={}", entry.id);
        }
        Command::Eval {
            ground_truth,
            strategy,
        } => {
            let records = load_ground_truth(ground_truth).await?;
            let retriever = Retriever::new(store, embedder, cli.retrieval_config());
            let strategies = match strategy {
                Some(strategy) => vec![*strategy],
                None => SearchStrategy::ALL.to_vec(),
            };

            for strategy in strategies {
                let report = evaluate(&retriever, &records, strategy).await?;
                println!("{}", serde_json::to_string(&report)?);
            }
        }
        Command::Answers {
            ground_truth,
            limit,
            strategy,
            output_dir,
        } => {
            let records = load_ground_truth(ground_truth).await?;
            let samples = one_question_per_document(&records, *limit);
            let model = chat_model(cli, client).await?;
            let retriever = Retriever::new(store, embedder, cli.retrieval_config());
            let mut pipeline =
                RagPipeline::new(retriever, PromptBuilder::new(cli.prompt_config()), model);

            for template in PromptTemplate::ALL {
                pipeline = pipeline.with_prompts(PromptBuilder::new(PromptConfig {
                    template,
                    ..cli.prompt_config()
                }));
                let answers = generate_answers(&pipeline, &samples, *strategy).await?;
                let path = output_dir.join(format!("answers_{}.csv", template.as_str()));
                write_answer_samples(&path, &answers).await?;
                println!("{} answers written to {}", answers.len(), path.display());
            }
        }
        Command::Feedback { .. } => {}
    }

    Ok(())
}

async fn chat_model(cli: &Cli, client: Arc<reqwest::Client>) -> anyhow::Result<OllamaChatClient> {
    let model = OllamaChatClient::new(client, cli.ollama_url.clone(), cli.llm_model.clone());
    if !cli.skip_pull && !cli.offline {
        model.pull_model().await?;
    }
    Ok(model)
}
