use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.yaml";

/// Default embedding model (bge-base offers +13% accuracy vs MiniLM)
const DEFAULT_MODEL: &str = "bge-base-en-v1.5";
/// Default number of results returned per query term
const DEFAULT_MAX_RESULTS: usize = 10;
/// Passages longer than this are split at the last whitespace before the limit
const DEFAULT_MAX_PASSAGE_CHARS: usize = 1000;
/// Texts per model call when filling the embedding cache
const DEFAULT_BATCH_SIZE: usize = 64;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Configuration for the search engine
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Results per term when the query carries no `[N]` directive
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Characters that end a passage
    #[serde(default = "default_terminal_punctuation")]
    pub terminal_punctuation: Vec<char>,

    #[serde(default = "default_max_passage_chars")]
    pub max_passage_chars: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Results scoring below this are dropped [-1.0, 1.0]
    #[serde(default)]
    pub min_score: Option<f32>,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_results: DEFAULT_MAX_RESULTS,
            terminal_punctuation: default_terminal_punctuation(),
            max_passage_chars: DEFAULT_MAX_PASSAGE_CHARS,
            batch_size: DEFAULT_BATCH_SIZE,
            min_score: None,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

fn default_terminal_punctuation() -> Vec<char> {
    vec!['.', '!', '?', '…']
}

fn default_max_passage_chars() -> usize {
    DEFAULT_MAX_PASSAGE_CHARS
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        let search = &self.search;

        if search.model.trim().is_empty() {
            bail!("search.model must not be empty");
        }

        if search.max_results == 0 {
            bail!("search.max_results must be greater than 0");
        }

        if search.terminal_punctuation.iter().any(|c| c.is_whitespace()) {
            bail!("search.terminal_punctuation must not contain whitespace");
        }

        if search.max_passage_chars < 16 {
            bail!(
                "search.max_passage_chars must be at least 16, got {}",
                search.max_passage_chars
            );
        }

        if search.batch_size == 0 {
            bail!("search.batch_size must be greater than 0");
        }

        if let Some(min_score) = search.min_score {
            if !(-1.0..=1.0).contains(&min_score) {
                bail!(
                    "search.min_score must be between -1.0 and 1.0, got {}",
                    min_score
                );
            }
        }

        if search.download_timeout_secs == 0 {
            bail!("search.download_timeout_secs must be greater than 0");
        }

        Ok(())
    }

    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;

        let config_path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !config_path.exists() {
            let defaults = serde_yml::to_string(&Self::default())?;
            std::fs::write(&config_path, defaults)
                .with_context(|| format!("failed to write {}", config_path.display()))?;
        }

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("config file {} is not valid utf8", config_path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_str = serde_yml::to_string(&self)?;
        let config_path = self.base_path.join(CONFIG_FILE);
        let temp_path = config_path.with_extension("yaml.tmp");

        std::fs::write(&temp_path, config_str.as_bytes())?;
        std::fs::rename(&temp_path, &config_path)?;

        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}
