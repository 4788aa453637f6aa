//! Cache-checked, batched access to embedding models.
//!
//! The embedder owns one handle per model id. Handles are loaded lazily the
//! first time a text under that model misses the cache, and a failed load
//! leaves the slot empty so a later call can retry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::semantic::cache::EmbeddingCache;
use crate::semantic::cancel::CancelToken;
use crate::semantic::embeddings::{EmbeddingError, ModelLoader, TextEncoder};
use crate::semantic::preprocess::{approximate_tokens, normalize_text};

/// Lazily filled handle for one model id.
#[derive(Default)]
struct ModelSlot {
    encoder: Mutex<Option<Arc<dyn TextEncoder>>>,
}

#[derive(Default)]
struct UsageCounters {
    texts_requested: AtomicU64,
    cache_hits: AtomicU64,
    texts_encoded: AtomicU64,
    batches: AtomicU64,
    model_loads: AtomicU64,
    approx_tokens: AtomicU64,
}

/// Cumulative embedding work since start or the last `[reset]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageReport {
    pub texts_requested: u64,
    pub cache_hits: u64,
    pub texts_encoded: u64,
    pub batches: u64,
    pub model_loads: u64,
    /// Whitespace-delimited words sent to a model
    pub approx_tokens: u64,
    pub loaded_models: Vec<String>,
}

pub struct Embedder {
    loader: Arc<dyn ModelLoader>,
    cache: Arc<EmbeddingCache>,
    batch_size: usize,
    models: Mutex<HashMap<String, Arc<ModelSlot>>>,
    usage: UsageCounters,
}

impl Embedder {
    pub fn new(loader: Arc<dyn ModelLoader>, cache: Arc<EmbeddingCache>, batch_size: usize) -> Self {
        Self {
            loader,
            cache,
            batch_size: batch_size.max(1),
            models: Mutex::new(HashMap::new()),
            usage: UsageCounters::default(),
        }
    }

    #[cfg(test)]
    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    /// Embed `texts` under `model_id`, one vector per text in input order.
    ///
    /// Texts are normalized before lookup and encoding, so texts that differ
    /// only in whitespace share a vector. Work is split into chunks of
    /// `batch_size`; cancellation is checked before each chunk and finished
    /// chunks stay cached.
    pub fn embed(
        &self,
        model_id: &str,
        texts: &[String],
        cancel: &CancelToken,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.usage
            .texts_requested
            .fetch_add(texts.len() as u64, Ordering::Relaxed);

        let normalized: Vec<String> = texts.iter().map(|t| normalize_text(t)).collect();
        let mut vectors = Vec::with_capacity(texts.len());

        for chunk in normalized.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                return Err(EmbeddingError::Cancelled);
            }

            let mut encoded = 0;
            let chunk_vectors = self.cache.get_or_compute_batch(model_id, chunk, |missing| {
                let encoder = self.model(model_id)?;
                let out = encoder.encode(missing)?;

                encoded += missing.len();
                self.usage.batches.fetch_add(1, Ordering::Relaxed);
                self.usage
                    .texts_encoded
                    .fetch_add(missing.len() as u64, Ordering::Relaxed);
                let tokens: usize = missing.iter().map(|t| approximate_tokens(t)).sum();
                self.usage
                    .approx_tokens
                    .fetch_add(tokens as u64, Ordering::Relaxed);

                Ok(out)
            })?;

            self.usage
                .cache_hits
                .fetch_add((chunk.len() - encoded.min(chunk.len())) as u64, Ordering::Relaxed);
            vectors.extend(chunk_vectors);
        }

        Ok(vectors)
    }

    /// Handle for `model_id`, loading it on first use.
    pub fn model(&self, model_id: &str) -> Result<Arc<dyn TextEncoder>, EmbeddingError> {
        let slot = {
            let mut models = self.models.lock().map_err(|e| {
                EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
            })?;
            models.entry(model_id.to_string()).or_default().clone()
        };

        // loading holds only this model's slot, other models load in parallel
        let mut encoder = slot.encoder.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model slot: {}", e))
        })?;

        if let Some(existing) = encoder.as_ref() {
            return Ok(existing.clone());
        }

        let loaded = self.loader.load(model_id)?;
        self.usage.model_loads.fetch_add(1, Ordering::Relaxed);
        *encoder = Some(loaded.clone());

        Ok(loaded)
    }

    /// Model ids with a loaded handle, sorted.
    pub fn loaded_models(&self) -> Vec<String> {
        let models = match self.models.lock() {
            Ok(models) => models,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut loaded: Vec<String> = models
            .iter()
            .filter(|(_, slot)| {
                slot.encoder
                    .lock()
                    .map(|encoder| encoder.is_some())
                    .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();
        loaded.sort();
        loaded
    }

    pub fn usage(&self) -> UsageReport {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        UsageReport {
            texts_requested: load(&self.usage.texts_requested),
            cache_hits: load(&self.usage.cache_hits),
            texts_encoded: load(&self.usage.texts_encoded),
            batches: load(&self.usage.batches),
            model_loads: load(&self.usage.model_loads),
            approx_tokens: load(&self.usage.approx_tokens),
            loaded_models: self.loaded_models(),
        }
    }

    /// Zero the usage counters. Loaded models and the cache are kept.
    pub fn reset_usage(&self) {
        for counter in [
            &self.usage.texts_requested,
            &self.usage.cache_hits,
            &self.usage.texts_encoded,
            &self.usage.batches,
            &self.usage.model_loads,
            &self.usage.approx_tokens,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::{FailingLoader, HashingLoader};

    fn strings(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    fn embedder(loader: Arc<dyn ModelLoader>, batch_size: usize) -> Embedder {
        Embedder::new(loader, Arc::new(EmbeddingCache::in_memory()), batch_size)
    }

    #[test]
    fn test_embed_returns_vectors_in_input_order() {
        let loader = Arc::new(HashingLoader::default());
        let embedder = embedder(loader.clone(), 2);
        let texts = strings(&["alpha", "beta", "gamma", "alpha"]);

        let vectors = embedder.embed("m", &texts, &CancelToken::new()).unwrap();

        assert_eq!(vectors.len(), 4);
        assert_eq!(vectors[0], vectors[3]);
        assert_ne!(vectors[0], vectors[1]);
        assert_eq!(loader.encoded_texts(), 3);
    }

    #[test]
    fn test_model_loaded_once_per_id() {
        let loader = Arc::new(HashingLoader::default());
        let embedder = embedder(loader.clone(), 64);
        let cancel = CancelToken::new();

        embedder.embed("a", &strings(&["one"]), &cancel).unwrap();
        embedder.embed("a", &strings(&["two"]), &cancel).unwrap();
        embedder.embed("b", &strings(&["one"]), &cancel).unwrap();

        assert_eq!(loader.loads("a"), 1);
        assert_eq!(loader.loads("b"), 1);
        assert_eq!(embedder.loaded_models(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_cached_texts_skip_model_load() {
        let loader = Arc::new(HashingLoader::default());
        let embedder = embedder(loader.clone(), 64);
        embedder.cache().insert("m", "known", vec![1.0, 0.0]);

        let vectors = embedder.embed("m", &strings(&["  known "]), &CancelToken::new()).unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0]]);
        assert_eq!(loader.loads("m"), 0);
        assert_eq!(embedder.usage().cache_hits, 1);
    }

    #[test]
    fn test_failed_load_is_retried() {
        let loader = Arc::new(FailingLoader::new(1));
        let embedder = embedder(loader.clone(), 64);
        let cancel = CancelToken::new();

        let err = embedder.embed("m", &strings(&["x"]), &cancel).unwrap_err();
        assert!(matches!(err, EmbeddingError::ModelLoad { .. }));

        let vectors = embedder.embed("m", &strings(&["x"]), &cancel).unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(loader.attempts(), 2);
    }

    #[test]
    fn test_cancelled_before_first_batch() {
        let loader = Arc::new(HashingLoader::default());
        let embedder = embedder(loader.clone(), 64);
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = embedder.embed("m", &strings(&["x"]), &cancel).unwrap_err();
        assert!(matches!(err, EmbeddingError::Cancelled));
        assert_eq!(loader.loads("m"), 0);
    }

    #[test]
    fn test_usage_counters_and_reset() {
        let loader = Arc::new(HashingLoader::default());
        let embedder = embedder(loader, 2);
        let cancel = CancelToken::new();

        embedder
            .embed("m", &strings(&["one two", "three", "four five six"]), &cancel)
            .unwrap();
        embedder.embed("m", &strings(&["three"]), &cancel).unwrap();

        let usage = embedder.usage();
        assert_eq!(usage.texts_requested, 4);
        assert_eq!(usage.texts_encoded, 3);
        assert_eq!(usage.cache_hits, 1);
        assert_eq!(usage.batches, 2);
        assert_eq!(usage.model_loads, 1);
        assert_eq!(usage.approx_tokens, 6);

        embedder.reset_usage();
        let usage = embedder.usage();
        assert_eq!(usage.texts_requested, 0);
        assert_eq!(usage.loaded_models, vec!["m".to_string()]);
    }

    #[test]
    fn test_empty_input_loads_nothing() {
        let loader = Arc::new(HashingLoader::default());
        let embedder = embedder(loader.clone(), 64);

        assert!(embedder.embed("m", &[], &CancelToken::new()).unwrap().is_empty());
        assert_eq!(loader.loads("m"), 0);
    }
}
