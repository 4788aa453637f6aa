//! Deterministic stand-ins for the embedding model.
//!
//! `HashingEncoder` maps every word to a fixed pseudo-random ±1 vector and
//! sums them, so texts sharing words score higher than unrelated texts and
//! the same text always gets the same vector.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::config::SearchConfig;
use crate::semantic::{
    Embedder, EmbeddingCache, EmbeddingError, ModelLoader, SearchSession, TextEncoder,
};

pub const DIMENSIONS: usize = 256;

pub fn hash_embed(model_id: &str, text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIMENSIONS];
    let words = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase);

    for word in words {
        let digest = Sha256::new()
            .chain_update(model_id.as_bytes())
            .chain_update([0u8])
            .chain_update(word.as_bytes())
            .finalize();
        for (dim, value) in vector.iter_mut().enumerate() {
            let bit = (digest[dim / 8] >> (dim % 8)) & 1;
            *value += if bit == 1 { 1.0 } else { -1.0 };
        }
    }

    vector
}

pub struct HashingEncoder {
    model_id: String,
    encoded: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl TextEncoder for HashingEncoder {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.encoded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| hash_embed(&self.model_id, t)).collect())
    }
}

/// Loader that counts loads per model id and texts encoded.
#[derive(Default)]
pub struct HashingLoader {
    loads: Mutex<HashMap<String, usize>>,
    encoded: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl HashingLoader {
    /// Every encode call sleeps for `delay` first.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn loads(&self, model_id: &str) -> usize {
        self.loads.lock().unwrap().get(model_id).copied().unwrap_or(0)
    }

    pub fn total_loads(&self) -> usize {
        self.loads.lock().unwrap().values().sum()
    }

    pub fn encoded_texts(&self) -> usize {
        self.encoded.load(Ordering::SeqCst)
    }
}

impl ModelLoader for HashingLoader {
    fn load(&self, model_id: &str) -> Result<Arc<dyn TextEncoder>, EmbeddingError> {
        *self.loads.lock().unwrap().entry(model_id.to_string()).or_insert(0) += 1;
        Ok(Arc::new(HashingEncoder {
            model_id: model_id.to_string(),
            encoded: self.encoded.clone(),
            delay: self.delay,
        }))
    }
}

/// Loader whose first `failures` loads fail like an offline download.
pub struct FailingLoader {
    failures: usize,
    attempts: AtomicUsize,
    inner: HashingLoader,
}

impl FailingLoader {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            attempts: AtomicUsize::new(0),
            inner: HashingLoader::default(),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ModelLoader for FailingLoader {
    fn load(&self, model_id: &str) -> Result<Arc<dyn TextEncoder>, EmbeddingError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(EmbeddingError::ModelLoad {
                model: model_id.to_string(),
                reason: "network unreachable".to_string(),
            });
        }
        self.inner.load(model_id)
    }
}

pub fn write_file(dir: &Path, name: &str, contents: impl AsRef<[u8]>) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, contents).unwrap();
    path
}

pub fn test_config() -> SearchConfig {
    SearchConfig {
        model: "test-model".to_string(),
        batch_size: 4,
        ..SearchConfig::default()
    }
}

pub fn embedder_with(loader: Arc<dyn ModelLoader>, cache: Arc<EmbeddingCache>) -> Arc<Embedder> {
    Arc::new(Embedder::new(loader, cache, test_config().batch_size))
}

/// Session over `scope` with an in-memory cache.
pub fn session_with(scope: &Path, loader: Arc<dyn ModelLoader>) -> SearchSession {
    let embedder = embedder_with(loader, Arc::new(EmbeddingCache::in_memory()));
    SearchSession::new(vec![scope.to_path_buf()], embedder, test_config())
}
