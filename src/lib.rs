//! # DeepCite - Research Orchestration Server
//!
//! Produces cited research reports from natural-language questions. A run
//! plans sub-questions, gathers evidence for all of them in parallel, drafts
//! a report, puts it through a bounded review/revise loop and publishes the
//! result, streaming ordered progress events the whole way.
//!
//! ## Overview
//!
//! DeepCite can be used in two ways:
//!
//! 1. **As a standalone server** - Run `deepcite serve`
//! 2. **As a library** - Embed [`ResearchController`] with your own collaborators
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use deepcite::{
//!     research::{ControllerOptions, MarkdownRenderer, ResearchConfig},
//!     retrieval::web::WebSearchFetcher,
//!     Provider, ResearchController,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let llm = Provider::Ollama {
//!         base_url: "http://localhost:11434".to_string(),
//!         model: "llama3.2:3b".to_string(),
//!     }
//!     .create_client()
//!     .await?;
//!
//!     let controller = ResearchController::new(
//!         llm,
//!         Arc::new(WebSearchFetcher::default()),
//!         Arc::new(MarkdownRenderer),
//!         ControllerOptions::default(),
//!     );
//!
//!     let task_id = controller.submit("How is lithium recycled?", ResearchConfig::default())?;
//!     let outcome = controller.wait(task_id).await?;
//!     println!("{outcome:#?}");
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ollama` | Ollama local inference (default) |
//! | `openai` | OpenAI API support |
//! | `web-search` | DuckDuckGo evidence fetcher via daedra (default) |
//! | `all-llm` | Every text generator backend |
//!
//! ## Modules
//!
//! - [`research`] - The orchestration engine and its progress events
//! - [`llm`] - Text generator clients
//! - [`retrieval`] - Evidence fetchers
//! - [`api`] - REST API handlers and routes
//! - [`types`] - Common types and error handling
//! - [`utils`] - `deepcite.toml` configuration

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

/// HTTP API handlers and routes.
pub mod api;
/// Command-line interface for the `deepcite` binary.
pub mod cli;
/// Text generator clients and abstractions.
pub mod llm;
/// Research orchestration engine.
pub mod research;
/// Evidence fetchers.
pub mod retrieval;
/// Core types (requests, responses, errors).
pub mod types;
/// Configuration utilities.
pub mod utils;

// Re-export commonly used types
pub use llm::{LLMClient, Provider};
pub use research::{ResearchController, RunOutcome, Stage};
pub use retrieval::EvidenceFetcher;
pub use types::{AppError, Result};
pub use utils::toml_config::{DeepciteConfig, DeepciteConfigManager};

use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// TOML-based configuration with hot-reload support
    pub config_manager: Arc<DeepciteConfigManager>,
    /// Owner of every research run
    pub controller: ResearchController,
}
