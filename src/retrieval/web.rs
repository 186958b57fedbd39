//! Web search fetcher using daedra
//!
//! Uses DuckDuckGo as the search backend. Each search hit becomes one
//! evidence snippet: the result description is the text body and the URL
//! is the source identifier.

use crate::retrieval::{EvidenceFetcher, FetchError, RawEvidence};
use async_trait::async_trait;
use std::time::Duration;

/// Web search fetcher powered by daedra
pub struct WebSearchFetcher {
    max_results: usize,
}

impl WebSearchFetcher {
    pub fn new(max_results: usize) -> Self {
        Self {
            max_results: max_results.max(1),
        }
    }
}

impl Default for WebSearchFetcher {
    fn default() -> Self {
        Self::new(10)
    }
}

#[async_trait]
impl EvidenceFetcher for WebSearchFetcher {
    async fn fetch(&self, query: &str, timeout: Duration) -> Result<Vec<RawEvidence>, FetchError> {
        let search_args = daedra::SearchArgs {
            query: query.to_string(),
            options: Some(daedra::SearchOptions {
                num_results: self.max_results,
                ..Default::default()
            }),
        };

        let response = tokio::time::timeout(
            timeout,
            daedra::tools::search::perform_search(&search_args),
        )
        .await
        .map_err(|_| FetchError::Timeout(timeout))?
        .map_err(|e| FetchError::Failed(format!("Search failed: {}", e)))?;

        Ok(response
            .data
            .iter()
            .map(|r| RawEvidence {
                text: format!("{}: {}", r.title, r.description),
                source_id: r.url.clone(),
            })
            .collect())
    }

    fn name(&self) -> &str {
        "web"
    }
}
