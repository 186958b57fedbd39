//! Evidence Fetchers
//!
//! An [`EvidenceFetcher`] turns one sub-question into a list of attributed
//! snippets. The research fan-out calls one fetcher per sub-question in
//! parallel and enforces its own per-call timeout around each call; the
//! `timeout` passed to [`EvidenceFetcher::fetch`] is advisory so that
//! backends can bound their own network requests.
//!
//! Backends:
//! - [`web::WebSearchFetcher`] - DuckDuckGo search via daedra (`web-search` feature)

#[cfg(feature = "web-search")]
pub mod web;

use crate::types::{AppError, Result as AppResult};
use crate::utils::toml_config::{FetcherKind, RetrievalConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// One snippet as returned by a backend, before the pipeline stamps it with
/// a sub-question index and retrieval time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvidence {
    pub text: String,
    pub source_id: String,
}

impl RawEvidence {
    pub fn new(text: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("fetch failed: {0}")]
    Failed(String),

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Timeouts and rate-limit style failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout(_) => true,
            FetchError::Failed(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("rate limit") || msg.contains("429") || msg.contains("temporarily")
            }
            FetchError::Cancelled => false,
        }
    }
}

#[async_trait]
pub trait EvidenceFetcher: Send + Sync {
    /// Retrieve evidence for a single query.
    async fn fetch(&self, query: &str, timeout: Duration) -> Result<Vec<RawEvidence>, FetchError>;

    /// Short backend label used in logs.
    fn name(&self) -> &str;
}

/// Build the fetcher described by the `[retrieval]` section.
pub fn build_fetcher(config: &RetrievalConfig) -> AppResult<Arc<dyn EvidenceFetcher>> {
    match config.backend {
        #[cfg(feature = "web-search")]
        FetcherKind::Web => Ok(Arc::new(web::WebSearchFetcher::new(config.max_results))),

        #[allow(unreachable_patterns)]
        other => Err(AppError::Configuration(format!(
            "Retrieval backend '{other:?}' is not enabled in this build \
             (enable the 'web-search' feature)"
        ))),
    }
}
