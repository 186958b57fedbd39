//! Parallel research fan-out
//!
//! One unit of work per sub-question, all spawned onto a [`JoinSet`] and
//! joined in full before aggregation. Units finish in whatever order the
//! network allows; the result map is keyed by sub-question index so the
//! caller always reads it back in plan order.
//!
//! Each unit enforces the per-call timeout itself, retries transient
//! failures up to the task's attempt bound, and watches the task's
//! cancellation token so a cancelled run stops waiting on slow fetches.
//! A failed unit becomes a warning event and an `Err` entry in the map; it
//! never fails the stage on its own.

use crate::research::events::{EventEmitter, PartialResult};
use crate::research::stage::{cancellable, RetryPolicy, StageContext};
use crate::research::types::{EvidenceItem, Stage, StageError, SubQuestion};
use crate::retrieval::{EvidenceFetcher, FetchError, RawEvidence};
use chrono::Utc;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Per-branch outcome, ordered by sub-question index.
pub type FetchResults = BTreeMap<usize, Result<Vec<EvidenceItem>, FetchError>>;

pub struct FanOut {
    fetcher: Arc<dyn EvidenceFetcher>,
}

/// Owned inputs for one spawned branch.
struct Unit {
    fetcher: Arc<dyn EvidenceFetcher>,
    question: SubQuestion,
    timeout: Duration,
    retry: RetryPolicy,
    cancel: CancellationToken,
    events: EventEmitter,
}

impl FanOut {
    pub fn new(fetcher: Arc<dyn EvidenceFetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetch evidence for every sub-question concurrently.
    ///
    /// Returns once every branch has resolved. The only error is
    /// [`StageError::Cancelled`]; deciding whether the results are usable is
    /// left to the caller.
    pub async fn fetch_all(
        &self,
        sub_questions: &[SubQuestion],
        per_call_timeout: Duration,
        ctx: &StageContext,
    ) -> Result<FetchResults, StageError> {
        ctx.check_cancelled()?;
        let task_id = ctx.task().id;
        tracing::info!(%task_id, branches = sub_questions.len(), "Dispatching fan-out");

        let mut set = JoinSet::new();
        for question in sub_questions {
            let unit = Unit {
                fetcher: Arc::clone(&self.fetcher),
                question: question.clone(),
                timeout: per_call_timeout,
                retry: ctx.retry.clone(),
                cancel: ctx.cancellation_token(),
                events: ctx.events.clone(),
            };
            let index = question.index;
            let span = tracing::debug_span!("fetch", %task_id, sub_question = index);
            set.spawn(
                async move {
                    let outcome = AssertUnwindSafe(unit.run()).catch_unwind().await;
                    let result = outcome.unwrap_or_else(|_| {
                        Err(FetchError::Failed("fetch unit panicked".to_string()))
                    });
                    (index, result)
                }
                .instrument(span),
            );
        }

        let mut results = FetchResults::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    results.insert(index, result);
                }
                Err(e) => tracing::error!(%task_id, error = %e, "Fan-out unit aborted"),
            }
        }

        // An aborted unit never reported; count it as failed so nothing is
        // silently dropped.
        for question in sub_questions {
            results
                .entry(question.index)
                .or_insert_with(|| Err(FetchError::Failed("fetch unit aborted".to_string())));
        }

        ctx.check_cancelled()?;

        let failed = results.values().filter(|r| r.is_err()).count();
        tracing::info!(%task_id, succeeded = results.len() - failed, failed, "Fan-out joined");
        Ok(results)
    }
}

impl Unit {
    async fn run(self) -> Result<Vec<EvidenceItem>, FetchError> {
        let index = self.question.index;
        let result = self.fetch_with_retry().await;

        match &result {
            Ok(items) => {
                self.events.partial(PartialResult::EvidenceGathered {
                    sub_question: index,
                    items: items.len(),
                });
            }
            Err(FetchError::Cancelled) => {}
            Err(e) => {
                self.events.branch_warning(
                    Stage::Gathering,
                    index,
                    format!("Sub-question {} \"{}\" failed: {}", index, self.question.text, e),
                );
            }
        }
        result
    }

    async fn fetch_with_retry(&self) -> Result<Vec<EvidenceItem>, FetchError> {
        let mut attempt = 1;
        loop {
            match self.fetch_once().await {
                Ok(raw) => {
                    let retrieved_at = Utc::now();
                    return Ok(raw
                        .into_iter()
                        .map(|r| EvidenceItem {
                            text: r.text,
                            source_id: r.source_id,
                            retrieved_at,
                            sub_question: self.question.index,
                        })
                        .collect());
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    tracing::warn!(
                        task_id = %self.events.task_id(),
                        sub_question = self.question.index,
                        attempt,
                        error = %e,
                        "Transient fetch failure, retrying"
                    );
                    let delay = self.retry.backoff.saturating_mul(attempt);
                    if cancellable(&self.cancel, tokio::time::sleep(delay)).await.is_none() {
                        return Err(FetchError::Cancelled);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self) -> Result<Vec<RawEvidence>, FetchError> {
        let call = tokio::time::timeout(
            self.timeout,
            self.fetcher.fetch(&self.question.text, self.timeout),
        );
        match cancellable(&self.cancel, call).await {
            None => Err(FetchError::Cancelled),
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(FetchError::Timeout(self.timeout)),
        }
    }
}
