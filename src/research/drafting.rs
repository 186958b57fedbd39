//! Initial draft from the aggregated context.

use crate::llm::LLMClient;
use crate::research::events::PartialResult;
use crate::research::prompts;
use crate::research::stage::{CallError, StageContext};
use crate::research::types::{Draft, FailureCause, ResearchContext, Stage, StageError};
use std::sync::Arc;

pub struct DraftStage {
    llm: Arc<dyn LLMClient>,
}

impl DraftStage {
    pub fn new(llm: Arc<dyn LLMClient>) -> Self {
        Self { llm }
    }

    /// Produce `Draft(0)`. Retries are handled by the stage context; running
    /// out of attempts fails the run in the drafting stage.
    pub async fn draft(
        &self,
        query: &str,
        context: &ResearchContext,
        ctx: &StageContext,
    ) -> Result<Draft, StageError> {
        let body = match ctx.generate(&*self.llm, &prompts::draft(query, context)).await {
            Ok(body) => body,
            Err(CallError::Cancelled) => return Err(StageError::Cancelled),
            Err(e @ CallError::Exhausted { .. }) => {
                return Err(StageError::fatal(
                    Stage::Drafting,
                    FailureCause::Generation(e.to_string()),
                ))
            }
        };

        let draft = Draft::initial(body.trim().to_string());
        ctx.events
            .partial(PartialResult::DraftProduced { version: draft.version });
        Ok(draft)
    }
}
