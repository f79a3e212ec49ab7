use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const DEFAULT_AMBIGUITY_MARKER: &str = "(歧义，需讨论)";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub api_base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    /// At or below this many files a single batch is issued.
    pub batch_threshold: usize,
    pub max_batch_retries: usize,
    pub retry_delay_ms: u64,
    pub preview_chars: usize,
    pub prompt_preview_chars: usize,
    pub poll_interval_ms: u64,
    pub excluded_dirs: Vec<String>,
    pub excluded_files: Vec<String>,
    pub ambiguity_marker: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://ark.cn-beijing.volces.com/api/v3".to_string(),
            model: "doubao-seed-1-6-thinking-250615".to_string(),
            api_key: None,
            request_timeout_secs: 90,
            max_tokens: 4000,
            temperature: 0.1,
            batch_threshold: 50,
            max_batch_retries: 2,
            retry_delay_ms: 2_000,
            preview_chars: 500,
            prompt_preview_chars: 200,
            poll_interval_ms: 2_000,
            excluded_dirs: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                "__pycache__".to_string(),
                "venv".to_string(),
            ],
            excluded_files: vec![".DS_Store".to_string()],
            ambiguity_marker: DEFAULT_AMBIGUITY_MARKER.to_string(),
        }
    }
}

impl ClassifierConfig {
    /// Load from `path`, or the platform config directory when `None`.
    /// A missing file yields defaults; `PARA_*` env vars override either.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let resolved = path.map(Path::to_path_buf).or_else(default_config_path);
        let mut config = match resolved {
            Some(p) if p.is_file() => Self::from_file(&p)?,
            _ => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
            .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(raw: &str) -> Result<Self, AppError> {
        toml::from_str(raw).map_err(|e| AppError::Config(e.to_string()))
    }

    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("PARA_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(url) = lookup("PARA_API_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url;
        }
        if let Some(model) = lookup("PARA_MODEL").filter(|v| !v.trim().is_empty()) {
            self.model = model;
        }
        if let Some(marker) = lookup("PARA_AMBIGUITY_MARKER").filter(|v| !v.is_empty()) {
            self.ambiguity_marker = marker;
        }
    }

    /// Files per classifier batch for a collection of `total_files`.
    pub fn batch_size_for(&self, total_files: usize) -> usize {
        if total_files <= self.batch_threshold {
            total_files.max(1)
        } else if total_files <= 200 {
            40
        } else if total_files <= 500 {
            30
        } else {
            25
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "para-classifier")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
