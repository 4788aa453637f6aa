//! In-memory corpus index: documents, their passages and passage vectors.
//!
//! An index is built for one scope (a list of files and folders) under one
//! model. It is never updated in place; when the scope changes on disk the
//! owner builds a fresh one.

use std::path::PathBuf;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;

use crate::semantic::cancel::CancelToken;
use crate::semantic::document::{collect_files, load_document, Document, FileFingerprint};
use crate::semantic::embedder::Embedder;
use crate::semantic::embeddings::EmbeddingError;
use crate::semantic::errors::FileError;
use crate::semantic::segment::Segmenter;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("index build cancelled")]
    Cancelled,

    #[error(transparent)]
    Embedding(EmbeddingError),
}

impl From<EmbeddingError> for BuildError {
    fn from(e: EmbeddingError) -> Self {
        match e {
            EmbeddingError::Cancelled => BuildError::Cancelled,
            other => BuildError::Embedding(other),
        }
    }
}

/// Outcome of a build: what made it in and which files were skipped.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub documents: usize,
    pub passages: usize,
    pub errors: Vec<FileError>,
    pub elapsed_ms: u64,
}

/// A passage vector with its precomputed L2 norm.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub document: usize,
    pub passage: usize,
    pub embedding: Vec<f32>,
    pub norm: f32,
}

pub struct CorpusIndex {
    scope: Vec<PathBuf>,
    model_id: String,
    /// Every collected file with its state at build time, failed ones included
    files: Vec<(PathBuf, Option<FileFingerprint>)>,
    documents: Vec<Document>,
    /// Document order, then passage order
    entries: Vec<IndexEntry>,
    report: BuildReport,
}

impl CorpusIndex {
    /// Build an index over `scope`.
    ///
    /// Per-file failures land in the report; only cancellation or an
    /// unavailable model fail the build.
    pub fn build(
        scope: &[PathBuf],
        model_id: &str,
        embedder: &Embedder,
        segmenter: &Segmenter,
        cancel: &CancelToken,
    ) -> Result<Self, BuildError> {
        let started = Instant::now();

        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        let (paths, mut errors) = collect_files(scope);
        let files = fingerprint_all(&paths);

        let loaded: Vec<Option<Result<Document, FileError>>> = paths
            .par_iter()
            .map(|path| {
                if cancel.is_cancelled() {
                    return None;
                }
                Some(load_document(path, segmenter))
            })
            .collect();

        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        let mut documents = Vec::with_capacity(loaded.len());
        for result in loaded.into_iter().flatten() {
            match result {
                Ok(document) => documents.push(document),
                Err(e) => {
                    log::warn!("skipping {}", e);
                    errors.push(e);
                }
            }
        }

        let texts: Vec<String> = documents
            .iter()
            .flat_map(|doc| doc.passages.iter().map(|p| p.text.clone()))
            .collect();

        log::debug!(
            "embedding {} passages from {} documents with '{}'",
            texts.len(),
            documents.len(),
            model_id
        );

        let mut vectors = embedder.embed(model_id, &texts, cancel)?.into_iter();

        let mut entries = Vec::with_capacity(texts.len());
        for (document, doc) in documents.iter().enumerate() {
            for passage in 0..doc.passages.len() {
                let embedding = vectors.next().ok_or(EmbeddingError::CountMismatch {
                    expected: texts.len(),
                    got: entries.len(),
                })?;
                let norm = l2_norm(&embedding);
                entries.push(IndexEntry {
                    document,
                    passage,
                    embedding,
                    norm,
                });
            }
        }

        let report = BuildReport {
            documents: documents.len(),
            passages: entries.len(),
            errors,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        log::info!(
            "Indexed {} passages from {} documents ({} skipped) in {}ms",
            report.passages,
            report.documents,
            report.errors.len(),
            report.elapsed_ms
        );

        Ok(Self {
            scope: scope.to_vec(),
            model_id: model_id.to_string(),
            files,
            documents,
            entries,
            report,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    /// Number of indexed passages.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the scope on disk differs from what was indexed: files added,
    /// removed, resized or modified since the build.
    pub fn is_stale(&self) -> bool {
        let (paths, _) = collect_files(&self.scope);
        fingerprint_all(&paths) != self.files
    }
}

fn fingerprint_all(paths: &[PathBuf]) -> Vec<(PathBuf, Option<FileFingerprint>)> {
    paths
        .iter()
        .map(|path| (path.clone(), FileFingerprint::of(path).ok()))
        .collect()
}

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::cache::EmbeddingCache;
    use crate::tests::support::HashingLoader;
    use std::sync::Arc;

    fn embedder() -> Embedder {
        Embedder::new(
            Arc::new(HashingLoader::default()),
            Arc::new(EmbeddingCache::in_memory()),
            8,
        )
    }

    #[test]
    fn test_build_orders_entries_by_document_then_passage() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("b.txt"), "Third. Fourth.").unwrap();
        std::fs::write(tmp.path().join("a.txt"), "First. Second.").unwrap();

        let index = CorpusIndex::build(
            &[tmp.path().to_path_buf()],
            "m",
            &embedder(),
            &Segmenter::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(index.documents().len(), 2);
        assert_eq!(index.documents()[0].name, "a");
        let order: Vec<(usize, usize)> = index.entries().iter().map(|e| (e.document, e.passage)).collect();
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
        assert!(index.entries().iter().all(|e| e.norm > 0.0));
        assert_eq!(index.report().passages, 4);
    }

    #[test]
    fn test_bad_file_is_reported_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("good.txt"), "Readable text.").unwrap();
        std::fs::write(tmp.path().join("bad.txt"), [0xC3, 0x28, 0xFF, 0xFE]).unwrap();

        let index = CorpusIndex::build(
            &[tmp.path().to_path_buf()],
            "m",
            &embedder(),
            &Segmenter::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(index.report().documents, 1);
        assert_eq!(index.report().errors.len(), 1);
        assert!(index.report().errors[0].is_decode_error());
    }

    #[test]
    fn test_cancelled_build() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "Text.").unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = CorpusIndex::build(
            &[tmp.path().to_path_buf()],
            "m",
            &embedder(),
            &Segmenter::default(),
            &cancel,
        );
        assert!(matches!(result, Err(BuildError::Cancelled)));
    }

    #[test]
    fn test_staleness_tracks_added_and_modified_files() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.txt");
        std::fs::write(&file, "Text.").unwrap();
        let scope = vec![tmp.path().to_path_buf()];

        let index = CorpusIndex::build(&scope, "m", &embedder(), &Segmenter::default(), &CancelToken::new()).unwrap();
        assert!(!index.is_stale());

        std::fs::write(tmp.path().join("b.txt"), "More.").unwrap();
        assert!(index.is_stale());

        let index = CorpusIndex::build(&scope, "m", &embedder(), &Segmenter::default(), &CancelToken::new()).unwrap();
        std::fs::write(&file, "Text that grew.").unwrap();
        assert!(index.is_stale());
    }

    #[test]
    fn test_empty_scope_builds_empty_index() {
        let tmp = tempfile::tempdir().unwrap();
        let index = CorpusIndex::build(
            &[tmp.path().to_path_buf()],
            "m",
            &embedder(),
            &Segmenter::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert!(index.is_empty());
        assert!(index.report().errors.is_empty());
    }
}
