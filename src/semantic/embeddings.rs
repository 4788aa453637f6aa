//! Embedding model collaborators.
//!
//! The search engine only sees two traits:
//! - [`ModelLoader`] turns a model id into a ready [`TextEncoder`]
//! - [`TextEncoder`] maps a batch of texts to vectors
//!
//! [`FastembedLoader`] is the production implementation backed by
//! fastembed-rs. Models are downloaded on first use into the `models/`
//! subdirectory of the base path.

use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use fastembed::{InitOptions, TextEmbedding};

/// Default download timeout for model files (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Model names accepted by [`FastembedLoader`], canonical spelling first.
pub const SUPPORTED_MODELS: &[(&str, &str)] = &[
    ("all-MiniLM-L6-v2", "384 dims, fastest"),
    ("all-MiniLM-L6-v2-q", "384 dims, quantized"),
    ("bge-small-en-v1.5", "384 dims"),
    ("bge-small-en-v1.5-q", "384 dims, quantized"),
    ("bge-base-en-v1.5", "768 dims, default"),
    ("bge-base-en-v1.5-q", "768 dims, quantized"),
    ("bge-large-en-v1.5", "1024 dims, most accurate"),
    ("bge-large-en-v1.5-q", "1024 dims, quantized"),
];

/// Error type for embedding operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    #[error("could not load model '{model}': {reason}. Check the model name and network access, then retry")]
    ModelLoad { model: String, reason: String },

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Model download timed out after {0} seconds, retry once the network is reachable")]
    DownloadTimeout(u64),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("model returned {got} vectors for {expected} texts")]
    CountMismatch { expected: usize, got: usize },

    #[error("embedding cancelled")]
    Cancelled,
}

impl EmbeddingError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbeddingError::ModelLoad { .. } | EmbeddingError::DownloadTimeout(_)
        )
    }
}

/// A loaded model that maps texts to vectors.
pub trait TextEncoder: Send + Sync {
    /// Encode a batch; the output has one vector per input, in input order.
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Loads models by id. Called at most once per id by the embedder.
pub trait ModelLoader: Send + Sync {
    fn load(&self, model_id: &str) -> Result<Arc<dyn TextEncoder>, EmbeddingError>;
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct EmbeddingModel {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl EmbeddingModel {
    /// Create a new embedding model with the given name.
    ///
    /// The model will be downloaded on first use if not cached.
    /// Models are cached in the `models/` subdirectory of `cache_dir`.
    ///
    /// # Arguments
    /// * `model_name` - Name of the model (e.g., "all-MiniLM-L6-v2")
    /// * `cache_dir` - Directory to cache downloaded models
    /// * `download_timeout` - Optional timeout for model download
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        download_timeout: Option<Duration>,
    ) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(model_name)?;
        let timeout = download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

        // Ensure cache directory exists
        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| EmbeddingError::ModelLoad {
            model: model_name.to_string(),
            reason: format!("Failed to create models directory: {}", e),
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        // the download happens inside try_new; run it on its own thread so a
        // stalled download turns into an error instead of a hang
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(TextEmbedding::try_new(options));
        });

        let mut model = match rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(|e| EmbeddingError::ModelLoad {
                model: model_name.to_string(),
                reason: e.to_string(),
            })?,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                return Err(EmbeddingError::DownloadTimeout(timeout.as_secs()))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(EmbeddingError::ModelLoad {
                    model: model_name.to_string(),
                    reason: "model loader thread panicked".to_string(),
                })
            }
        };

        // Get model dimensions by embedding a test string
        let dimensions = Self::probe_dimensions(&mut model, model_name)?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    /// Get the model name
    pub fn name(&self) -> &str {
        &self.model_name
    }

    /// Get the embedding dimensions for this model
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Generate embeddings for multiple texts.
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
    }

    /// Parse model name string to fastembed enum.
    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q)
            }
            "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-small-en-v1.5-q" | "bgesmallenv15q" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15Q)
            }
            "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-base-en-v1.5-q" | "bgebaseenv15q" => {
                Ok(fastembed::EmbeddingModel::BGEBaseENV15Q)
            }
            "bge-large-en-v1.5" | "bgelargeenv15" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            "bge-large-en-v1.5-q" | "bgelargeenv15q" => {
                Ok(fastembed::EmbeddingModel::BGELargeENV15Q)
            }
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5 (add -q suffix for quantized)",
                name
            ))),
        }
    }

    /// Probe the model to determine embedding dimensions.
    fn probe_dimensions(model: &mut TextEmbedding, model_name: &str) -> Result<usize, EmbeddingError> {
        let probe_err = |reason: String| EmbeddingError::ModelLoad {
            model: model_name.to_string(),
            reason,
        };

        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| probe_err(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| probe_err("Model returned no embedding".to_string()))
    }
}

impl TextEncoder for EmbeddingModel {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.embed_batch(texts)
    }
}

/// Loads fastembed models into `<base_path>/models`.
pub struct FastembedLoader {
    base_path: PathBuf,
    download_timeout: Duration,
}

impl FastembedLoader {
    pub fn new(base_path: PathBuf, download_timeout: Duration) -> Self {
        Self {
            base_path,
            download_timeout,
        }
    }
}

impl ModelLoader for FastembedLoader {
    fn load(&self, model_id: &str) -> Result<Arc<dyn TextEncoder>, EmbeddingError> {
        log::info!("Loading embedding model '{}'", model_id);

        let model = EmbeddingModel::new(model_id, self.base_path.clone(), Some(self.download_timeout))?;

        log::info!(
            "Model '{}' ready ({} dimensions)",
            model.name(),
            model.dimensions()
        );

        Ok(Arc::new(model))
    }
}
