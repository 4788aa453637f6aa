use crate::{
    config::Config,
    semantic::{Embedder, EmbeddingCache, FastembedLoader, ModelLoader, SearchSession, CACHE_FILE},
};
use anyhow::{Context, Result};
use homedir::my_home;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Overrides the default base directory
pub const BASE_PATH_ENV: &str = "STORYSEARCH_BASE_PATH";

/// Application factory for creating and configuring application components
pub struct AppFactory;

impl AppFactory {
    /// Get application paths, creating the base directory if needed
    pub fn get_paths() -> Result<AppPaths> {
        let base_path = Self::get_base_path()?;

        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Ok(AppPaths::new(base_path))
    }

    pub fn create_config(paths: &AppPaths) -> Result<Config> {
        Config::load_with(&paths.base_path)
    }

    /// Open the shared embedding cache. Never fails; see [`EmbeddingCache::open`].
    pub fn create_cache(paths: &AppPaths) -> Arc<EmbeddingCache> {
        Arc::new(EmbeddingCache::open(paths.cache_path.clone()))
    }

    /// Embedder backed by fastembed models stored under the base directory
    pub fn create_embedder(
        paths: &AppPaths,
        config: &Config,
        cache: Arc<EmbeddingCache>,
    ) -> Arc<Embedder> {
        let loader: Arc<dyn ModelLoader> = Arc::new(FastembedLoader::new(
            paths.base_path.clone(),
            Duration::from_secs(config.search.download_timeout_secs),
        ));

        Arc::new(Embedder::new(loader, cache, config.search.batch_size))
    }

    pub fn create_session(
        scope: Vec<PathBuf>,
        config: &Config,
        embedder: Arc<Embedder>,
    ) -> SearchSession {
        SearchSession::new(scope, embedder, config.search.clone())
    }

    /// Get the base path for the application
    fn get_base_path() -> Result<PathBuf> {
        if let Ok(base_path) = std::env::var(BASE_PATH_ENV) {
            return Ok(PathBuf::from(base_path));
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;

        Ok(home.join(".local/share/storysearch"))
    }
}

/// Application paths structure
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: PathBuf,
    pub cache_path: PathBuf,
}

impl AppPaths {
    pub fn new(base_path: PathBuf) -> Self {
        let cache_path = base_path.join(CACHE_FILE);
        Self {
            base_path,
            cache_path,
        }
    }
}
