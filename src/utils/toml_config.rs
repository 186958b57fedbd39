//! TOML-based configuration for DeepCite
//!
//! Server, generator, retrieval and research defaults are declared in a
//! TOML file (`deepcite.toml`). Every section is optional; missing values
//! fall back to the defaults documented on each field.
//!
//! # Hot Reloading
//!
//! Configuration changes are detected and applied at runtime. Use
//! [`DeepciteConfigManager`] for thread-safe access to the current
//! configuration. Runs that are already in flight keep the configuration
//! snapshot they were submitted with.

use crate::llm::Provider;
use crate::research::types::{
    ExhaustionPolicy, ResearchConfig, MAX_REVISION_ITERATIONS_LIMIT, MAX_SUB_QUESTIONS_LIMIT,
};
use crate::research::events::DEFAULT_EVENT_BUFFER;
use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Root configuration structure loaded from deepcite.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeepciteConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub research: ResearchDefaults,
}

// ============= Server Configuration =============

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

// ============= Text Generator Configuration =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    #[default]
    Ollama,
    OpenAI,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProviderKind,

    /// Server URL. Defaults to the provider's usual endpoint.
    pub base_url: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Same provider, different model; the planner tries it once the
    /// primary model has used up its attempts.
    pub fallback_model: Option<String>,

    /// Environment variable holding the API key (OpenAI only)
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_model() -> String {
    "llama3.2:3b".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_openai_base() -> String {
    "https://api.openai.com/v1".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::default(),
            base_url: None,
            model: default_model(),
            fallback_model: None,
            api_key_env: default_api_key_env(),
        }
    }
}

// ============= Retrieval Configuration =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetcherKind {
    #[default]
    Web,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub backend: FetcherKind,

    /// Hits requested per sub-question
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize {
    8
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            backend: FetcherKind::default(),
            max_results: default_max_results(),
        }
    }
}

// ============= Research Defaults =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchDefaults {
    #[serde(default = "default_max_sub_questions")]
    pub max_sub_questions: usize,

    #[serde(default = "default_max_revision_iterations")]
    pub max_revision_iterations: u32,

    #[serde(default = "default_per_call_timeout_secs")]
    pub per_call_timeout_secs: u64,

    /// Attempts per external call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default)]
    pub exhaustion_policy: ExhaustionPolicy,

    #[serde(default = "default_true")]
    pub translate_queries: bool,

    /// Search the root query once and show the hits to the planner
    #[serde(default = "default_true")]
    pub search_before_planning: bool,

    /// Live broadcast buffer per task event log
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_max_sub_questions() -> usize {
    4
}

fn default_max_revision_iterations() -> u32 {
    2
}

fn default_per_call_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_true() -> bool {
    true
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

impl Default for ResearchDefaults {
    fn default() -> Self {
        Self {
            max_sub_questions: default_max_sub_questions(),
            max_revision_iterations: default_max_revision_iterations(),
            per_call_timeout_secs: default_per_call_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            exhaustion_policy: ExhaustionPolicy::default(),
            translate_queries: true,
            search_before_planning: true,
            event_buffer: default_event_buffer(),
        }
    }
}

impl ResearchDefaults {
    /// Run configuration applied to submissions without overrides.
    pub fn to_research_config(&self) -> ResearchConfig {
        ResearchConfig {
            max_sub_questions: self.max_sub_questions,
            max_revision_iterations: self.max_revision_iterations,
            per_call_timeout: Duration::from_secs(self.per_call_timeout_secs),
            max_attempts: self.max_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            exhaustion_policy: self.exhaustion_policy,
            translate_queries: self.translate_queries,
            search_before_planning: self.search_before_planning,
        }
    }
}

// ============= Configuration Loading & Validation =============

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Environment variable '{0}' referenced in config is not set")]
    MissingEnvVar(String),

    #[error("Watch error: {0}")]
    WatchError(#[from] notify::Error),
}

impl From<ConfigError> for crate::types::AppError {
    fn from(e: ConfigError) -> Self {
        crate::types::AppError::Configuration(e.to_string())
    }
}

impl DeepciteConfig {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: DeepciteConfig = toml::from_str(&content)?;

        config.validate()?;

        Ok(config)
    }

    /// Validate bounds and env var availability
    pub fn validate(&self) -> Result<(), ConfigError> {
        let research = &self.research;

        if research.max_sub_questions == 0 || research.max_sub_questions > MAX_SUB_QUESTIONS_LIMIT
        {
            return Err(ConfigError::ValidationError(format!(
                "research.max_sub_questions must be between 1 and {}",
                MAX_SUB_QUESTIONS_LIMIT
            )));
        }
        if research.max_revision_iterations > MAX_REVISION_ITERATIONS_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "research.max_revision_iterations must be at most {}",
                MAX_REVISION_ITERATIONS_LIMIT
            )));
        }
        if research.per_call_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "research.per_call_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if research.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "research.max_attempts must be at least 1".to_string(),
            ));
        }
        if research.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "research.event_buffer must be at least 1".to_string(),
            ));
        }
        if self.retrieval.max_results == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.max_results must be at least 1".to_string(),
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "llm.model must not be empty".to_string(),
            ));
        }

        if self.llm.provider == LlmProviderKind::OpenAI {
            self.validate_env_var(&self.llm.api_key_env)?;
        }

        Ok(())
    }

    fn validate_env_var(&self, name: &str) -> Result<(), ConfigError> {
        std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))?;
        Ok(())
    }

    /// Resolve an environment variable value
    pub fn resolve_env(&self, env_name: &str) -> Option<String> {
        std::env::var(env_name).ok()
    }

    /// Text generator described by the `[llm]` section
    pub fn provider(&self) -> Result<Provider, ConfigError> {
        let llm = &self.llm;
        match llm.provider {
            LlmProviderKind::Ollama => Ok(Provider::Ollama {
                base_url: llm.base_url.clone().unwrap_or_else(default_ollama_url),
                model: llm.model.clone(),
            }),
            LlmProviderKind::OpenAI => Ok(Provider::OpenAI {
                api_key: self
                    .resolve_env(&llm.api_key_env)
                    .ok_or_else(|| ConfigError::MissingEnvVar(llm.api_key_env.clone()))?,
                api_base: llm.base_url.clone().unwrap_or_else(default_openai_base),
                model: llm.model.clone(),
            }),
        }
    }

    /// Provider for `[llm].fallback_model`, if one is set
    pub fn fallback_provider(&self) -> Result<Option<Provider>, ConfigError> {
        let Some(model) = self.llm.fallback_model.clone() else {
            return Ok(None);
        };
        let provider = match self.provider()? {
            Provider::Ollama { base_url, .. } => Provider::Ollama { base_url, model },
            Provider::OpenAI {
                api_key, api_base, ..
            } => Provider::OpenAI {
                api_key,
                api_base,
                model,
            },
        };
        Ok(Some(provider))
    }

    /// Default run configuration for submissions
    pub fn research_defaults(&self) -> ResearchConfig {
        self.research.to_research_config()
    }
}

// ============= Hot Reloading Configuration Manager =============

/// Thread-safe configuration manager with hot reloading support
pub struct DeepciteConfigManager {
    config: Arc<ArcSwap<DeepciteConfig>>,
    config_path: PathBuf,
    watcher: RwLock<Option<RecommendedWatcher>>,
}

impl DeepciteConfigManager {
    /// Create a new configuration manager and load the initial config
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        // Absolute path for reliable file watching
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(ConfigError::ReadError)?
                .join(path)
        };

        let config = DeepciteConfig::load(&path)?;

        Ok(Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: path,
            watcher: RwLock::new(None),
        })
    }

    /// Create a config manager directly from a config, without a backing file
    pub fn from_config(config: DeepciteConfig) -> Self {
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: PathBuf::from("deepcite.toml"),
            watcher: RwLock::new(None),
        }
    }

    /// Get the current configuration (lockless read)
    pub fn config(&self) -> Arc<DeepciteConfig> {
        self.config.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Reload the configuration from disk. An invalid file leaves the
    /// current configuration in place.
    pub fn reload(&self) -> Result<(), ConfigError> {
        info!("Reloading configuration from {:?}", self.config_path);

        let new_config = DeepciteConfig::load(&self.config_path)?;
        self.config.store(Arc::new(new_config));

        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Start watching for configuration file changes
    pub fn start_watching(&self) -> Result<(), ConfigError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        let config_path = self.config_path.clone();
        let config_arc = Arc::clone(&self.config);
        let file_name = config_path.file_name().map(|n| n.to_os_string());

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if ours && (event.kind.is_modify() || event.kind.is_create()) {
                        // Debounced in the receiver
                        let _ = tx.send(());
                    }
                }
                Err(e) => {
                    error!("Config watcher error: {:?}", e);
                }
            }
        })?;

        // Watch the parent directory so editors that replace the file are seen
        if let Some(parent) = self.config_path.parent() {
            watcher.watch(parent, RecursiveMode::NonRecursive)?;
        }

        *self.watcher.write() = Some(watcher);

        tokio::spawn(async move {
            let debounce = Duration::from_millis(500);
            let mut last_reload: Option<std::time::Instant> = None;

            while rx.recv().await.is_some() {
                if last_reload.is_some_and(|t| t.elapsed() < debounce) {
                    continue;
                }

                // Let the write finish
                tokio::time::sleep(Duration::from_millis(100)).await;

                match DeepciteConfig::load(&config_path) {
                    Ok(new_config) => {
                        config_arc.store(Arc::new(new_config));
                        info!("Configuration hot-reloaded successfully");
                        last_reload = Some(std::time::Instant::now());
                    }
                    Err(e) => {
                        warn!("Failed to hot-reload config: {}. Keeping previous config.", e);
                    }
                }
            }
        });

        info!("Configuration hot-reload watcher started");
        Ok(())
    }

    /// Stop watching for configuration changes
    pub fn stop_watching(&self) {
        if self.watcher.write().take().is_some() {
            info!("Configuration hot-reload watcher stopped");
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.read().is_some()
    }
}

impl Clone for DeepciteConfigManager {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            config_path: self.config_path.clone(),
            watcher: RwLock::new(None), // Watcher is not cloned
        }
    }
}
