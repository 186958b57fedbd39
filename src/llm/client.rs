//! Text generator abstractions and provider management
//!
//! The research pipeline talks to a language model through [`LLMClient`]:
//! - **Ollama**: local inference (default `ollama` feature)
//! - **OpenAI**: OpenAI API and compatible endpoints (`openai` feature)

use crate::types::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What a generator call is for. Every pipeline stage uses the same
/// generator contract with a different prompt shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Translate,
    Plan,
    Draft,
    Review,
    Revise,
}

impl PromptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKind::Translate => "translate",
            PromptKind::Plan => "plan",
            PromptKind::Draft => "draft",
            PromptKind::Review => "review",
            PromptKind::Revise => "revise",
        }
    }
}

/// Structured prompt handed to a generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    pub kind: PromptKind,
    pub system: String,
    pub user: String,
}

impl PromptContext {
    pub fn new(kind: PromptKind, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            kind,
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Generic LLM client trait for provider abstraction
///
/// All generator backends implement this trait, allowing the pipeline to
/// swap providers without changing orchestration code.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Generate a completion from a prompt
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate with system prompt
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Generate from a structured prompt context.
    ///
    /// Backends only need to override this if they can make use of the
    /// prompt kind (for example to pick a different model per stage).
    async fn generate_structured(&self, context: &PromptContext) -> Result<String> {
        self.generate_with_system(&context.system, &context.user)
            .await
    }

    /// Get the model name/identifier
    fn model_name(&self) -> &str;
}

/// Provider enum for runtime selection
///
/// | Provider | Feature | Notes |
/// |----------|---------|-------|
/// | Ollama | `ollama` | Recommended for local |
/// | OpenAI | `openai` | Any OpenAI-compatible endpoint |
#[derive(Debug, Clone)]
pub enum Provider {
    /// Ollama local LLM provider
    ///
    /// ```rust,ignore
    /// let provider = Provider::Ollama {
    ///     base_url: "http://localhost:11434".to_string(),
    ///     model: "llama3.2".to_string(),
    /// };
    /// ```
    Ollama { base_url: String, model: String },

    /// OpenAI API provider (including Azure OpenAI and compatible APIs)
    OpenAI {
        api_key: String,
        api_base: String,
        model: String,
    },
}

impl Provider {
    /// Create a client instance for this provider
    ///
    /// # Errors
    ///
    /// Returns an error if the provider's feature is not compiled in or the
    /// client cannot be constructed.
    pub async fn create_client(&self) -> Result<Arc<dyn LLMClient>> {
        match self {
            #[cfg(feature = "ollama")]
            Provider::Ollama { base_url, model } => Ok(Arc::new(
                super::ollama::OllamaClient::new(base_url.clone(), model.clone()).await?,
            )),

            #[cfg(feature = "openai")]
            Provider::OpenAI {
                api_key,
                api_base,
                model,
            } => Ok(Arc::new(super::openai::OpenAIClient::new(
                api_key.clone(),
                api_base.clone(),
                model.clone(),
            ))),

            #[allow(unreachable_patterns)]
            other => Err(AppError::Configuration(format!(
                "Provider '{}' is not enabled in this build (enable the '{}' feature)",
                other.name(),
                other.feature()
            ))),
        }
    }

    /// Check if this provider is compiled into the binary
    pub fn is_enabled(&self) -> bool {
        match self {
            Provider::Ollama { .. } => cfg!(feature = "ollama"),
            Provider::OpenAI { .. } => cfg!(feature = "openai"),
        }
    }

    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Ollama { .. } => "Ollama",
            Provider::OpenAI { .. } => "OpenAI",
        }
    }

    fn feature(&self) -> &'static str {
        match self {
            Provider::Ollama { .. } => "ollama",
            Provider::OpenAI { .. } => "openai",
        }
    }
}
