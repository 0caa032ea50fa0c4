//! Configuration system for DeepResearch.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/deepresearch/config.toml` and/or
//! `.deepresearch/config.toml` in the workspace directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the research engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Validate the configuration and return any warnings.
    ///
    /// Returns human-readable warning messages for problematic values.
    /// Warnings never abort startup; callers decide whether to surface them.
    pub fn validate(&self) -> Vec<String> {
        self.llm.validate()
    }
}

/// LLM collaborator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "gemini" or "mock".
    pub provider: String,
    /// Model identifier (e.g., "gemini-3-flash-preview").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: u32,
    /// Default temperature for generation.
    pub temperature: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-3-flash-preview".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 8192,
            temperature: 0.4,
        }
    }
}

impl LlmConfig {
    /// Validate this LLM config and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.provider != "gemini" && self.provider != "mock" {
            warnings.push(format!(
                "unknown provider '{}'; expected \"gemini\" or \"mock\"",
                self.provider
            ));
        }
        if self.model.is_empty() {
            warnings.push("model is empty; synthesis requests will be rejected".to_string());
        }
        if self.max_tokens == 0 {
            warnings.push("max_tokens is 0; responses will be empty".to_string());
        }
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "temperature ({}) is outside the typical range 0.0-2.0",
                self.temperature
            ));
        }
        warnings
    }
}

/// Session storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding session records. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the directory where session records live.
    ///
    /// An explicit `data_dir` wins; otherwise the platform data directory is
    /// used, falling back to `.deepresearch/sessions` under the current
    /// directory when the platform directories cannot be determined.
    pub fn sessions_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        if let Some(dirs) = directories::ProjectDirs::from("dev", "deepresearch", "deepresearch") {
            return dirs.data_dir().join("sessions");
        }
        PathBuf::from(".deepresearch").join("sessions")
    }
}

/// Load configuration with layering: defaults -> user config -> workspace config
/// -> environment -> overrides.
///
/// - User config: `~/.config/deepresearch/config.toml` (platform-dependent)
/// - Workspace config: `.deepresearch/config.toml` in the workspace directory
/// - Environment: variables prefixed with `DEEPRESEARCH_` (e.g., `DEEPRESEARCH_LLM__MODEL`)
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&AppConfig>,
) -> Result<AppConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    // User-level config file
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "deepresearch", "deepresearch")
    {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config file
    if let Some(ws) = workspace {
        let ws_config = ws.join(".deepresearch").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables: DEEPRESEARCH_LLM__MODEL=gemini-3-flash-preview
    figment = figment.merge(Env::prefixed("DEEPRESEARCH_").split("__"));

    // Programmatic overrides take highest priority
    if let Some(ov) = overrides {
        figment = figment.merge(Serialized::defaults(ov.clone()));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether a config file exists in the workspace or user config directory.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(ws) = workspace {
        if ws.join(".deepresearch").join("config.toml").exists() {
            return true;
        }
    }
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "deepresearch", "deepresearch")
    {
        return config_dir.config_dir().join("config.toml").exists();
    }
    false
}
