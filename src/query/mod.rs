// Query module
// Question answering: embed, retrieve, format, prompt, generate, parse


pub mod answer;
pub mod context;
pub mod prompt;
pub mod retriever;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::RagError;
use crate::config::Config;
use crate::corpus::CorpusKind;
use crate::database::QueryResult;
use crate::embeddings::EmbeddingError;
use crate::generation::GenerationService;
use crate::retry::{RetryError, RetryPolicy};

pub use answer::Answer;
pub use context::ContextFormatter;
pub use prompt::PromptBuilder;
pub use retriever::Retriever;

/// Where a question is in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Idle,
    Embedding,
    Retrieving,
    Formatting,
    Generating,
    Done,
}

impl fmt::Display for QueryStage {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Embedding => "embedding",
            Self::Retrieving => "retrieving",
            Self::Formatting => "formatting",
            Self::Generating => "generating",
            Self::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// A failed question, with the stage it failed in
#[derive(Error, Debug)]
#[error("{stage} failed for question {question:?}: {source}")]
pub struct QueryError {
    pub stage: QueryStage,
    pub question: String,
    #[source]
    pub source: RagError,
}

/// An answer together with the evidence it was generated from
#[derive(Debug, Clone)]
pub struct Response {
    pub answer: Answer,
    pub evidence: QueryResult,
}

/// Retrieval-augmented answering over one collection. Stateless per question.
pub struct AnswerPipeline {
    retriever: Retriever,
    formatter: ContextFormatter,
    prompts: PromptBuilder,
    generator: Arc<dyn GenerationService>,
    generation_retry: RetryPolicy,
}

impl AnswerPipeline {
    #[inline]
    pub fn new(
        kind: CorpusKind,
        retriever: Retriever,
        generator: Arc<dyn GenerationService>,
        config: &Config,
    ) -> Self {
        let generation_retry = RetryPolicy::new(
            config.generation.retry_attempts,
            Duration::from_millis(config.indexing.retry_base_delay_ms),
        )
        .with_attempt_timeout(Duration::from_secs(config.ollama.timeout_secs));

        Self {
            retriever,
            formatter: ContextFormatter::new(kind),
            prompts: PromptBuilder::new(kind, config.generation.fallback_phrase.clone()),
            generator,
            generation_retry,
        }
    }

    #[inline]
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    #[inline]
    pub fn formatter(&self) -> &ContextFormatter {
        &self.formatter
    }

    /// Answer a question from retrieved passages only.
    ///
    /// When nothing relevant is retrieved the fallback answer is returned and the
    /// generator is never called.
    #[inline]
    pub async fn ask(
        &self,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<Response, QueryError> {
        let question = question.trim();
        let fail = |stage: QueryStage, source: RagError| QueryError {
            stage,
            question: question.to_string(),
            source,
        };

        let mut stage = QueryStage::Idle;
        if question.is_empty() {
            return Err(fail(
                stage,
                RagError::Embedding(EmbeddingError::InvalidInput(
                    "question is empty".to_string(),
                )),
            ));
        }

        stage = self
            .advance(stage, QueryStage::Embedding, cancel)
            .map_err(|e| fail(stage, e))?;
        let vector = self
            .retriever
            .embed_question(question, cancel)
            .await
            .map_err(|e| fail(stage, e))?;

        stage = self
            .advance(stage, QueryStage::Retrieving, cancel)
            .map_err(|e| fail(stage, e))?;
        let evidence = self
            .retriever
            .search(&vector, self.retriever.top_k(), cancel)
            .await
            .map_err(|e| fail(stage, e))?;

        if evidence.is_empty() {
            info!("No passages retrieved for {:?}; answering with fallback", question);
            return Ok(Response {
                answer: Answer::fallback(self.prompts.fallback_phrase()),
                evidence,
            });
        }

        stage = self
            .advance(stage, QueryStage::Formatting, cancel)
            .map_err(|e| fail(stage, e))?;
        let context = self.formatter.format(&evidence);
        let references = self.formatter.citations(&evidence);
        let prompt = self.prompts.build(&context, question);

        stage = self
            .advance(stage, QueryStage::Generating, cancel)
            .map_err(|e| fail(stage, e))?;
        let raw = self
            .generation_retry
            .run(cancel, || self.generator.generate(&prompt))
            .await
            .map_err(|e| {
                fail(
                    stage,
                    match e {
                        RetryError::Cancelled => RagError::Cancelled,
                        RetryError::Exhausted { last, .. } | RetryError::Fatal(last) => {
                            RagError::Generation(last)
                        }
                    },
                )
            })?;

        let answer = Answer::parse(&raw, &references, self.prompts.fallback_phrase());
        self.advance(stage, QueryStage::Done, cancel)
            .map_err(|e| fail(stage, e))?;

        Ok(Response { answer, evidence })
    }

    fn advance(
        &self,
        from: QueryStage,
        to: QueryStage,
        cancel: &CancellationToken,
    ) -> crate::Result<QueryStage> {
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        debug!("Query stage {} -> {}", from, to);
        Ok(to)
    }
}
