use crate::embeddings::Embedder;
use crate::llm::LanguageModel;
use crate::models::{GroundTruth, SearchStrategy};
use crate::orchestrator::RagPipeline;
use crate::retrieval::Retriever;
use crate::traits::SearchIndex;
use crate::{AnswerError, IngestError, SearchError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub strategy: SearchStrategy,
    pub queries: usize,
    pub hit_rate: f64,
    pub mrr: f64,
}

/// Share of queries where at least one retrieved chunk is relevant.
pub fn hit_rate(relevance: &[Vec<bool>]) -> f64 {
    if relevance.is_empty() {
        return 0.0;
    }
    let hits = relevance.iter().filter(|row| row.contains(&true)).count();
    hits as f64 / relevance.len() as f64
}

/// Mean reciprocal rank. Every relevant position counts, so a query whose
/// answer chunk comes back twice scores the sum of both reciprocals.
pub fn mrr(relevance: &[Vec<bool>]) -> f64 {
    if relevance.is_empty() {
        return 0.0;
    }
    let total: f64 = relevance
        .iter()
        .flat_map(|row| {
            row.iter()
                .enumerate()
                .filter(|(_, relevant)| **relevant)
                .map(|(rank, _)| 1.0 / (rank as f64 + 1.0))
        })
        .sum();
    total / relevance.len() as f64
}

/// Reads a CSV file with `question` and `document` columns. Extra columns
/// are ignored.
pub async fn load_ground_truth(path: &Path) -> Result<Vec<GroundTruth>, IngestError> {
    let raw = tokio::fs::read(path).await?;
    let records = parse_ground_truth(&raw)?;
    info!(path = %path.display(), records = records.len(), "loaded ground truth");
    Ok(records)
}

pub fn parse_ground_truth(raw: &[u8]) -> Result<Vec<GroundTruth>, IngestError> {
    let mut reader = csv::Reader::from_reader(raw);
    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}

/// One generated answer next to the chunk id its question was written from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSample {
    pub question: String,
    pub answer: String,
    pub document: String,
}

/// The first question of each document, in file order, at most `limit`.
pub fn one_question_per_document(records: &[GroundTruth], limit: usize) -> Vec<GroundTruth> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|record| seen.insert(record.document.as_str()))
        .take(limit)
        .cloned()
        .collect()
}

/// Answers every sampled question with `pipeline`. The first failure stops
/// the run.
pub async fn generate_answers<S, E, L>(
    pipeline: &RagPipeline<S, E, L>,
    samples: &[GroundTruth],
    strategy: SearchStrategy,
) -> Result<Vec<AnswerSample>, AnswerError>
where
    S: SearchIndex + Send + Sync,
    E: Embedder,
    L: LanguageModel,
{
    let mut answers = Vec::with_capacity(samples.len());
    for (position, sample) in samples.iter().enumerate() {
        let record = pipeline.answer(&sample.question, strategy).await?;
        answers.push(AnswerSample {
            question: sample.question.clone(),
            answer: record.answer_text,
            document: sample.document.clone(),
        });
        debug!(position, total = samples.len(), "generated answer");
    }
    info!(
        %strategy,
        template = ?pipeline.prompts().config().template,
        answers = answers.len(),
        "answer batch finished"
    );
    Ok(answers)
}

pub async fn write_answer_samples(
    path: &Path,
    samples: &[AnswerSample],
) -> Result<(), IngestError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for sample in samples {
        writer.serialize(sample)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| IngestError::Io(err.into_error()))?;

    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    info!(path = %path.display(), rows = samples.len(), "wrote answers");
    Ok(())
}

/// Runs every labelled question through `strategy` and scores whether the
/// labelled chunk id comes back.
pub async fn evaluate<S, E>(
    retriever: &Retriever<S, E>,
    ground_truth: &[GroundTruth],
    strategy: SearchStrategy,
) -> Result<EvaluationReport, SearchError>
where
    S: SearchIndex + Send + Sync,
    E: Embedder,
{
    let mut relevance = Vec::with_capacity(ground_truth.len());

    for (position, record) in ground_truth.iter().enumerate() {
        let result = retriever.retrieve(&record.question, strategy).await?;
        relevance.push(
            result
                .chunks
                .iter()
                .map(|chunk| chunk.id == record.document)
                .collect::<Vec<_>>(),
        );
        debug!(position, total = ground_truth.len(), "evaluated question");
    }

    let report = EvaluationReport {
        strategy,
        queries: relevance.len(),
        hit_rate: hit_rate(&relevance),
        mrr: mrr(&relevance),
    };
    info!(
        %strategy,
        queries = report.queries,
        hit_rate = report.hit_rate,
        mrr = report.mrr,
        "evaluation finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::llm::Completion;
    use crate::models::{Chunk, TokenUsage};
    use crate::prompt::{PromptBuilder, PromptConfig, PromptTemplate};
    use crate::retrieval::RetrievalConfig;
    use crate::stores::MemoryIndex;
    use std::sync::Arc;
    use tempfile::tempdir;

    const TEXTS: [&str; 3] = [
        "Helen Stoner arrived at Baker Street at dawn",
        "the ventilator opened into the next room",
        "a low clear whistle in the dead of night",
    ];

    async fn labelled_store() -> (MemoryIndex, CharacterNgramEmbedder) {
        let embedder = CharacterNgramEmbedder { dimensions: 48 };
        let mut chunks = Vec::new();
        for (position, text) in TEXTS.iter().enumerate() {
            chunks.push(Chunk {
                id: position.to_string(),
                text: text.to_string(),
                vector: embedder.embed(text).await.unwrap(),
            });
        }
        (MemoryIndex::with_chunks(48, chunks).unwrap(), embedder)
    }

    #[test]
    fn hit_rate_counts_queries_with_any_hit() {
        let relevance = vec![
            vec![false, true, false],
            vec![false, false, false],
            vec![true, false, false],
            vec![false, false, true],
        ];
        assert_eq!(hit_rate(&relevance), 0.75);
    }

    #[test]
    fn mrr_sums_every_relevant_rank() {
        let relevance = vec![vec![true, false], vec![false, true], vec![true, true]];
        let expected = (1.0 + 0.5 + 1.5) / 3.0;
        assert!((mrr(&relevance) - expected).abs() < 1e-12);
    }

    #[test]
    fn no_queries_score_zero() {
        assert_eq!(hit_rate(&[]), 0.0);
        assert_eq!(mrr(&[]), 0.0);
    }

    #[tokio::test]
    async fn evaluate_scores_labelled_questions() {
        let (store, embedder) = labelled_store().await;
        let retriever = Retriever::new(
            Arc::new(store),
            Arc::new(embedder),
            RetrievalConfig {
                top_k: 1,
                ..RetrievalConfig::default()
            },
        );

        let ground_truth = vec![
            GroundTruth {
                question: TEXTS[1].to_string(),
                document: "1".to_string(),
            },
            GroundTruth {
                question: TEXTS[2].to_string(),
                document: "99".to_string(),
            },
        ];

        let report = evaluate(&retriever, &ground_truth, SearchStrategy::Vector)
            .await
            .unwrap();
        assert_eq!(report.queries, 2);
        assert_eq!(report.hit_rate, 0.5);
        assert_eq!(report.mrr, 0.5);
    }

    #[tokio::test]
    async fn ground_truth_loads_from_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ground_truth.csv");
        std::fs::write(
            &path,
            "question,document\n\"Who is Roylott, really?\",4\nWhat did Helen hear?,7\n",
        )
        .unwrap();

        let records = load_ground_truth(&path).await.unwrap();
        assert_eq!(
            records,
            vec![
                GroundTruth {
                    question: "Who is Roylott, really?".to_string(),
                    document: "4".to_string(),
                },
                GroundTruth {
                    question: "What did Helen hear?".to_string(),
                    document: "7".to_string(),
                },
            ]
        );

        std::fs::write(&path, "question,chapter\nWho?,1\n").unwrap();
        assert!(matches!(
            load_ground_truth(&path).await,
            Err(IngestError::Csv(_))
        ));
    }

    #[test]
    fn sampling_keeps_first_question_of_each_document() {
        let records: Vec<GroundTruth> = [("q1", "0"), ("q2", "0"), ("q3", "1"), ("q4", "2")]
            .iter()
            .map(|(question, document)| GroundTruth {
                question: question.to_string(),
                document: document.to_string(),
            })
            .collect();

        let sampled = one_question_per_document(&records, 2);
        let questions: Vec<&str> = sampled.iter().map(|r| r.question.as_str()).collect();
        assert_eq!(questions, vec!["q1", "q3"]);
        assert_eq!(one_question_per_document(&records, 10).len(), 3);
    }

    #[tokio::test]
    async fn answers_are_generated_and_written_as_csv() {
        struct Echo;

        #[async_trait::async_trait]
        impl LanguageModel for Echo {
            fn model_name(&self) -> &str {
                "echo"
            }

            async fn complete(&self, prompt: &str) -> Result<Completion, AnswerError> {
                let cited = prompt.contains("citing specific lines");
                Ok(Completion {
                    text: if cited { "cited" } else { "plain" }.to_string(),
                    usage: TokenUsage::default(),
                })
            }
        }

        let (store, embedder) = labelled_store().await;
        let retriever = Retriever::new(
            Arc::new(store),
            Arc::new(embedder),
            RetrievalConfig::default(),
        );
        let pipeline = RagPipeline::new(retriever, PromptBuilder::default(), Echo);
        let samples = vec![GroundTruth {
            question: "What opened into the next room?".to_string(),
            document: "1".to_string(),
        }];

        let plain = generate_answers(&pipeline, &samples, SearchStrategy::Vector)
            .await
            .unwrap();
        let pipeline = pipeline.with_prompts(PromptBuilder::new(PromptConfig {
            template: PromptTemplate::CitedDetective,
            ..PromptConfig::default()
        }));
        let cited = generate_answers(&pipeline, &samples, SearchStrategy::Vector)
            .await
            .unwrap();
        assert_eq!(plain[0].answer, "plain");
        assert_eq!(cited[0].answer, "cited");
        assert_eq!(cited[0].document, "1");

        let dir = tempdir().unwrap();
        let path = dir.path().join("results").join("answers.csv");
        write_answer_samples(&path, &plain).await.unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "question,answer,document\nWhat opened into the next room?,plain,1\n"
        );
    }
}
