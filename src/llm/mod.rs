//! Text Generator Clients
//!
//! Every language-model call the research pipeline makes (planning, drafting,
//! reviewing, revising) goes through the [`LLMClient`] trait. Providers are
//! selected at runtime via [`Provider`] and compiled in with Cargo features:
//! - `ollama` - Local Ollama server (default)
//! - `openai` - OpenAI API and compatible endpoints
//!
//! # Example
//!
//! ```ignore
//! use deepcite::llm::Provider;
//!
//! let client = Provider::Ollama {
//!     base_url: "http://localhost:11434".to_string(),
//!     model: "llama3.2".to_string(),
//! }
//! .create_client()
//! .await?;
//! let text = client.generate("What is 2+2?").await?;
//! ```

/// Core LLM client trait and provider selection.
pub mod client;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

pub use client::{LLMClient, PromptContext, PromptKind, Provider};
