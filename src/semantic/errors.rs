use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::search_query::QueryError;
use crate::semantic::embeddings::EmbeddingError;
use crate::semantic::index::BuildError;

/// A per-file failure collected during a corpus build. Never aborts the build.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{}: {kind}", path.display())]
pub struct FileError {
    pub path: PathBuf,
    pub kind: FileErrorKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum FileErrorKind {
    #[error("path does not exist")]
    Missing,

    #[error("unsupported file type")]
    Unsupported,

    #[error("read failed: {0}")]
    Read(String),

    #[error("could not decode text: {0}")]
    Decode(String),

    #[error("malformed transcript: {0}")]
    Transcript(String),
}

impl FileError {
    pub fn new(path: &Path, kind: FileErrorKind) -> Self {
        Self {
            path: path.to_path_buf(),
            kind,
        }
    }

    pub fn is_decode_error(&self) -> bool {
        matches!(self.kind, FileErrorKind::Decode(_))
    }
}

/// Errors that end a single search operation.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Embedding(EmbeddingError),

    #[error("search cancelled")]
    Cancelled,

    #[error("search worker is not running")]
    WorkerGone,
}

impl From<EmbeddingError> for SearchError {
    fn from(e: EmbeddingError) -> Self {
        match e {
            EmbeddingError::Cancelled => SearchError::Cancelled,
            other => SearchError::Embedding(other),
        }
    }
}

impl From<BuildError> for SearchError {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::Cancelled => SearchError::Cancelled,
            BuildError::Embedding(e) => SearchError::Embedding(e),
        }
    }
}

impl SearchError {
    /// Whether the user can fix this by editing the query or retrying.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SearchError::Query(_) | SearchError::Cancelled => true,
            SearchError::Embedding(e) => e.is_retryable(),
            SearchError::WorkerGone => false,
        }
    }
}
