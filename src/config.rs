use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, anyhow};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "gemma:7b";
const DEFAULT_NOTICE_DELAY_MS: u64 = 3000;

/// How replies are read back from the server
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Newline-delimited JSON, rendered as it arrives
    #[default]
    Stream,
    /// One JSON object once the reply is complete
    Single,
}

impl ResponseMode {
    pub fn is_stream(self) -> bool {
        self == ResponseMode::Stream
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ThemeName {
    #[default]
    Inline,
    Styled,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub default_model: String,
    pub response_mode: ResponseMode,
    pub theme: ThemeName,
    /// Check `/api/tags` for the model before each request
    pub probe_models: bool,
    /// Retry once on `/api/generate` when `/api/chat` answers 404
    pub fallback_generate: bool,
    /// Forward earlier turns instead of only the latest message
    pub include_history: bool,
    pub notice_delay_ms: u64,
    /// `{model}` is replaced with the model name
    pub notice_text: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            response_mode: ResponseMode::Stream,
            theme: ThemeName::Inline,
            probe_models: false,
            fallback_generate: false,
            include_history: false,
            notice_delay_ms: DEFAULT_NOTICE_DELAY_MS,
            notice_text: "{model} is processing your reply...".to_string(),
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, config_content)?;
        Ok(())
    }

    pub fn save_default_model(model: &str) -> Result<()> {
        let mut config = Self::load().unwrap_or_else(|_| Self::new());
        config.default_model = model.to_string();
        config.save()
    }

    pub fn notice_delay(&self) -> Duration {
        Duration::from_millis(self.notice_delay_ms)
    }

    pub fn notice_for(&self, model: &str) -> String {
        self.notice_text.replace("{model}", model)
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("ollama-chat").join("config.json"))
    }

    /// Directory for the log file
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?;

        Ok(data_dir.join("ollama-chat"))
    }
}
