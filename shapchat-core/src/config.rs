//! Configuration types for Shapchat

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::conversation::HistoryConfig;
use crate::error::{Result, ShapchatError};
use crate::exchange::StreamConfig;
use crate::llm::{DEFAULT_MODEL, RetryConfig};
use crate::orchestrator::OrchestratorConfig;
use crate::persona::{PersonaConfig, PersonaRegistry};

/// Main configuration for Shapchat
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapchatConfig {
    /// Generation backend
    pub llm: LLMProviderConfig,

    /// Token budget and critical context sizes
    pub history: HistoryConfig,

    /// Streaming presentation
    pub stream: StreamConfig,

    /// Retry policy for request dispatch
    pub retry: RetryConfig,

    /// Persona overrides and additions
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub personas: Vec<PersonaConfig>,

    /// Inputs that end the conversation
    pub exit_sentinels: Vec<String>,
}

impl Default for ShapchatConfig {
    fn default() -> Self {
        Self {
            llm: LLMProviderConfig::default(),
            history: HistoryConfig::default(),
            stream: StreamConfig::default(),
            retry: RetryConfig::default(),
            personas: Vec::new(),
            exit_sentinels: vec!["exit".to_string(), "quit".to_string()],
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMProviderConfig {
    /// Provider type
    pub provider: LLMProviderKind,

    /// Model name
    pub model: String,

    /// API key (prefer the provider's env var)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL for compatible endpoints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for LLMProviderConfig {
    fn default() -> Self {
        Self {
            provider: LLMProviderKind::OpenAI,
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            base_url: None,
        }
    }
}

/// LLM provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LLMProviderKind {
    OpenAI,
}

/// Per-user configuration file, if the platform has a config directory
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("shapchat").join("config.toml"))
}

impl ShapchatConfig {
    /// Load configuration from files and environment variables.
    ///
    /// Loads in this order, later sources winning:
    /// 1. Defaults
    /// 2. `shapchat.toml` in the working directory
    /// 3. The user config file (`<config dir>/shapchat/config.toml`)
    /// 4. The file named by `SHAPCHAT_CONFIG_PATH`
    /// 5. `SHAPCHAT_` environment variables, `__` separating sections
    ///    (e.g. `SHAPCHAT_HISTORY__BUDGET=2000`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is invalid or validation fails.
    pub fn load() -> Result<Self> {
        Self::load_with(None::<&Path>)
    }

    /// Like [`load`](Self::load), with an extra file merged after the standard ones
    /// and before the environment.
    pub fn load_with(extra: Option<impl AsRef<Path>>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(ShapchatConfig::default()))
            .merge(Toml::file("shapchat.toml"));

        if let Some(path) = user_config_path() {
            figment = figment.merge(Toml::file(path));
        }

        if let Ok(path) = std::env::var("SHAPCHAT_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        if let Some(path) = extra {
            let path = path.as_ref();
            if !path.exists() {
                return Err(ShapchatError::Configuration(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(
            Env::prefixed("SHAPCHAT_")
                .ignore(&["config_path"])
                .split("__"),
        );

        let config: ShapchatConfig = figment.extract().map_err(|e| {
            ShapchatError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: ShapchatConfig = Figment::from(Serialized::defaults(ShapchatConfig::default()))
            .merge(Toml::file_exact(path.as_ref()))
            .extract()
            .map_err(|e| {
                ShapchatError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Persona table with configured overrides applied
    pub fn persona_registry(&self) -> Result<PersonaRegistry> {
        PersonaRegistry::from_config(&self.personas)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            history: self.history,
            stream: self.stream,
            retry: self.retry.clone(),
            exit_sentinels: self.exit_sentinels.clone(),
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.history.budget == 0 {
            return Err(ShapchatError::Configuration(
                "history.budget must be positive".to_string(),
            ));
        }
        if self.stream.refresh_per_second == 0 {
            return Err(ShapchatError::Configuration(
                "stream.refresh_per_second must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ShapchatError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.exit_sentinels.iter().any(|s| s.trim().is_empty()) {
            return Err(ShapchatError::Configuration(
                "exit_sentinels must not contain empty entries".to_string(),
            ));
        }
        self.persona_registry()
            .map_err(|e| ShapchatError::Configuration(e.to_string()))?;
        Ok(())
    }
}
