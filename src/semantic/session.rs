//! Interactive search session: query history, the sticky model choice and
//! the indexes built for this session's scope.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;

use crate::config::SearchConfig;
use crate::search_query::{self, Command, Query};
use crate::semantic::cancel::CancelToken;
use crate::semantic::embedder::{Embedder, UsageReport};
use crate::semantic::errors::SearchError;
use crate::semantic::index::{BuildReport, CorpusIndex};
use crate::semantic::rank::{rank, SearchResult};
use crate::semantic::segment::Segmenter;

/// Raw queries issued in this session, with a recall cursor.
///
/// The cursor sits past the newest entry after every `record`. `previous`
/// walks towards the oldest entry and `next` back towards the newest; both
/// return `None` instead of moving past either end.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Vec<String>,
    cursor: usize,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, raw: &str) {
        self.entries.push(raw.to_string());
        self.cursor = self.entries.len();
    }

    pub fn previous(&mut self) -> Option<&str> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor).map(String::as_str)
    }

    pub fn next(&mut self) -> Option<&str> {
        if self.cursor + 1 >= self.entries.len() {
            self.cursor = self.entries.len();
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor).map(String::as_str)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Results for one query term.
#[derive(Debug, Clone, Serialize)]
pub struct TermResults {
    pub term: String,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub model: String,
    pub max_results: usize,
    /// One entry per term, in query order
    pub terms: Vec<TermResults>,
    pub warnings: Vec<search_query::QueryError>,
    pub index: BuildReport,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchResponse {
    Help { text: String },
    Usage { usage: UsageReport },
    Reset,
    /// `model:<name>` without terms
    ModelSwitched { model: String },
    Results(SearchOutcome),
}

pub struct SearchSession {
    scope: Vec<PathBuf>,
    embedder: Arc<Embedder>,
    segmenter: Segmenter,
    config: SearchConfig,
    /// Set by `model:<name>`, cleared by `[reset]`
    model: Option<String>,
    /// Model id -> index over `scope`
    indexes: HashMap<String, CorpusIndex>,
    history: History,
}

impl SearchSession {
    pub fn new(scope: Vec<PathBuf>, embedder: Arc<Embedder>, config: SearchConfig) -> Self {
        Self {
            scope,
            embedder,
            segmenter: Segmenter::from_config(&config),
            config,
            model: None,
            indexes: HashMap::new(),
            history: History::new(),
        }
    }

    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    /// Model used for terms without a `model:` directive.
    pub fn active_model(&self) -> &str {
        self.model.as_deref().unwrap_or(&self.config.model)
    }

    /// Build (or refresh) the index for the active model ahead of the first
    /// query.
    pub fn warm_up(&mut self, cancel: &CancelToken) -> Result<BuildReport, SearchError> {
        let model = self.active_model().to_string();
        let index = self.index_for(&model, cancel)?;
        Ok(index.report().clone())
    }

    /// Run one raw query line and record it in the history.
    pub fn submit(&mut self, raw: &str, cancel: &CancelToken) -> Result<SearchResponse, SearchError> {
        if !raw.trim().is_empty() {
            self.history.record(raw);
        }

        let query = search_query::parse(raw)?;

        match query.command {
            Command::Help => Ok(SearchResponse::Help {
                text: search_query::usage_text().to_string(),
            }),
            Command::Usage => Ok(SearchResponse::Usage {
                usage: self.embedder.usage(),
            }),
            Command::Reset => {
                self.model = None;
                self.indexes.clear();
                self.embedder.reset_usage();
                log::info!("session reset");
                Ok(SearchResponse::Reset)
            }
            Command::None => self.search(query, cancel),
        }
    }

    fn search(&mut self, query: Query, cancel: &CancelToken) -> Result<SearchResponse, SearchError> {
        let model = query
            .model
            .clone()
            .unwrap_or_else(|| self.active_model().to_string());

        if query.terms.is_empty() {
            self.embedder.model(&model)?;
            log::info!("switched to model '{}'", model);
            self.model = Some(model.clone());
            return Ok(SearchResponse::ModelSwitched { model });
        }

        let max_results = query.max_results_or(self.config.max_results);
        let min_score = self.config.min_score;
        let embedder = self.embedder.clone();

        let index = self.index_for(&model, cancel)?;
        let vectors = embedder.embed(&model, &query.terms, cancel)?;

        // terms are independent; indexed collect keeps query order
        let terms: Vec<TermResults> = query
            .terms
            .par_iter()
            .zip(vectors.par_iter())
            .map(|(term, vector)| TermResults {
                term: term.clone(),
                results: rank(vector, index, max_results, min_score, term),
            })
            .collect();

        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }

        let report = index.report().clone();

        if query.model.is_some() {
            self.model = Some(model.clone());
        }

        Ok(SearchResponse::Results(SearchOutcome {
            model,
            max_results,
            terms,
            warnings: query.warnings,
            index: report,
        }))
    }

    /// Index over the session scope for `model`, rebuilt when missing or
    /// when the files changed since it was built.
    fn index_for(&mut self, model: &str, cancel: &CancelToken) -> Result<&CorpusIndex, SearchError> {
        let build = |cancel: &CancelToken| {
            CorpusIndex::build(&self.scope, model, &self.embedder, &self.segmenter, cancel)
        };

        match self.indexes.entry(model.to_string()) {
            Entry::Occupied(entry) if !entry.get().is_stale() => Ok(entry.into_mut()),
            Entry::Occupied(mut entry) => {
                log::info!(
                    "files changed since the last build, re-indexing for '{}'",
                    entry.get().model_id()
                );
                match build(cancel) {
                    Ok(index) => {
                        entry.insert(index);
                        Ok(entry.into_mut())
                    }
                    Err(e) => {
                        entry.remove();
                        Err(e.into())
                    }
                }
            }
            Entry::Vacant(entry) => Ok(entry.insert(build(cancel)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_walks_back_then_forward() {
        let mut history = History::new();
        for q in ["A", "B", "C"] {
            history.record(q);
        }

        assert_eq!(history.previous(), Some("C"));
        assert_eq!(history.previous(), Some("B"));
        assert_eq!(history.previous(), Some("A"));
        assert_eq!(history.previous(), None);
        assert_eq!(history.next(), Some("B"));
        assert_eq!(history.next(), Some("C"));
        assert_eq!(history.next(), None);
        assert_eq!(history.previous(), Some("C"));
    }

    #[test]
    fn test_empty_history_saturates() {
        let mut history = History::new();
        assert_eq!(history.previous(), None);
        assert_eq!(history.next(), None);
        assert!(history.is_empty());
    }

    #[test]
    fn test_record_resets_cursor() {
        let mut history = History::new();
        history.record("A");
        history.record("B");
        assert_eq!(history.previous(), Some("B"));
        assert_eq!(history.previous(), Some("A"));

        history.record("C");
        assert_eq!(history.previous(), Some("C"));
        assert_eq!(history.len(), 3);
    }
}
