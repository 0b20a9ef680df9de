//! The ask pipeline: question in, shaped result out.
//!
//! Stages run strictly in order: introspect, synthesize, sanitize, validate,
//! execute, shape. Each stage is its own module so it can be tested alone.

pub mod executor;
pub mod introspect;
pub mod sanitize;
pub mod shaper;
pub mod synth;

use std::fmt;

use tracing::{debug, warn};

pub use executor::QueryExecutor;
pub use introspect::{DatasetSchema, SchemaIntrospector};
pub use sanitize::sanitize;
pub use shaper::{shape, ChartHint, Shaped};
pub use synth::QuerySynthesizer;

use crate::api::AskResponse;
use crate::error::{Result, TabletalkError};
use crate::safety::QueryValidator;

/// Where a request is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Introspected,
    Synthesized,
    Sanitized,
    Validated,
    Executed,
    Shaped,
    Responded,
    /// Terminal: the candidate failed validation.
    Rejected,
    /// Terminal: introspection, generation or execution failed.
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Introspected => "introspected",
            Self::Synthesized => "synthesized",
            Self::Sanitized => "sanitized",
            Self::Validated => "validated",
            Self::Executed => "executed",
            Self::Shaped => "shaped",
            Self::Responded => "responded",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Tracks and logs stage transitions for one request.
struct Progress<'a> {
    dataset_id: &'a str,
    stage: Stage,
}

impl<'a> Progress<'a> {
    fn start(dataset_id: &'a str) -> Self {
        debug!(dataset_id, "Ask {}", Stage::Received);
        Self {
            dataset_id,
            stage: Stage::Received,
        }
    }

    fn advance(&mut self, stage: Stage) {
        debug!(dataset_id = self.dataset_id, "Ask {} -> {}", self.stage, stage);
        self.stage = stage;
    }

    fn terminal(&self, err: &TabletalkError) -> Stage {
        let terminal = match err {
            TabletalkError::Rejected(_) => Stage::Rejected,
            _ => Stage::Failed,
        };
        warn!(
            dataset_id = self.dataset_id,
            "Ask {} after reaching {}: {}", terminal, self.stage, err
        );
        terminal
    }
}

/// Composes the six stages. Holds no per-request state.
#[derive(Clone)]
pub struct AskPipeline {
    introspector: SchemaIntrospector,
    synthesizer: QuerySynthesizer,
    validator: QueryValidator,
    executor: QueryExecutor,
}

impl AskPipeline {
    pub fn new(
        introspector: SchemaIntrospector,
        synthesizer: QuerySynthesizer,
        validator: QueryValidator,
        executor: QueryExecutor,
    ) -> Self {
        Self {
            introspector,
            synthesizer,
            validator,
            executor,
        }
    }

    /// Answers a question about one dataset.
    ///
    /// Any failure before the query runs returns an error, never a partial
    /// result. Nothing is retried.
    pub async fn ask(&self, dataset_id: &str, question: &str) -> Result<AskResponse> {
        let mut progress = Progress::start(dataset_id);
        match self.run(dataset_id, question, &mut progress).await {
            Ok(response) => {
                progress.advance(Stage::Responded);
                Ok(response)
            }
            Err(err) => {
                progress.terminal(&err);
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        dataset_id: &str,
        question: &str,
        progress: &mut Progress<'_>,
    ) -> Result<AskResponse> {
        let schema = self.introspector.columns(dataset_id).await?;
        progress.advance(Stage::Introspected);

        let raw = self.synthesizer.synthesize(question, &schema).await?;
        progress.advance(Stage::Synthesized);

        let candidate = sanitize(&raw);
        progress.advance(Stage::Sanitized);
        debug!(dataset_id, "Candidate query: {}", candidate);

        let query = self
            .validator
            .validate(&candidate, &schema.table, &schema.columns)?;
        progress.advance(Stage::Validated);

        let result = self.executor.execute(&query).await?;
        progress.advance(Stage::Executed);

        let Shaped { summary, chart } = shape(&result);
        progress.advance(Stage::Shaped);

        Ok(AskResponse {
            answer_text: summary,
            data: result.into_records(),
            chart,
        })
    }
}
