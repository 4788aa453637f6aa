//! Semantic search over transcripts and plain-text files.
//!
//! # Architecture
//!
//! - `segment`: Splits documents into passages
//! - `document`: File discovery, text decoding and transcript parsing
//! - `cache`: Content-addressed embedding cache persisted to embeddings.log
//! - `embeddings`: Model collaborator traits and the fastembed implementation
//! - `embedder`: Cache-checked, batched embedding with per-model handles
//! - `index`: Corpus index built per scope and model
//! - `rank`: Cosine similarity ranking
//! - `session`: Query history and the interactive search session

pub mod cache;
pub mod cancel;
pub mod document;
pub mod embedder;
pub mod embeddings;
pub mod errors;
pub mod index;
pub mod preprocess;
pub mod rank;
pub mod segment;
pub mod session;

pub use cache::{CacheStats, EmbeddingCache};
pub use cancel::CancelToken;
pub use embedder::{Embedder, UsageReport};
pub use embeddings::{EmbeddingError, FastembedLoader, ModelLoader, TextEncoder, SUPPORTED_MODELS};
pub use errors::{FileError, FileErrorKind, SearchError};
pub use index::{BuildError, BuildReport, CorpusIndex};
pub use rank::SearchResult;
pub use segment::{Passage, Segmenter};
pub use session::{History, SearchOutcome, SearchResponse, SearchSession, TermResults};

/// File name of the embedding cache inside the base directory
pub const CACHE_FILE: &str = "embeddings.log";
