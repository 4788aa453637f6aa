mod lexer;
mod parser;

use serde::Serialize;

pub use parser::{Command, Query, TERM_SEPARATOR};

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum QueryError {
    #[error("empty search query")]
    EmptyQuery,

    #[error("ignored directive '{directive}': {reason}")]
    InvalidDirective { directive: String, reason: String },
}

/// Parse a raw query line.
///
/// Behavior:
/// - `[help]`, `[usage]`, `[reset]` as the whole query → command, no terms
/// - Leading `[N]` and `model:<name>` directives, any order, last one wins
/// - `[N]` with N ≤ 0 or too large → warning, bracket kept as query text
/// - Other brackets (`[draft]`) → literal query text
/// - Rest split on `|` into trimmed, non-empty terms
/// - Nothing left and no model switch → `EmptyQuery`
pub fn parse(raw: &str) -> Result<Query, QueryError> {
    parser::parse_query(raw)
}

/// Help shown for `[help]`.
pub fn usage_text() -> &'static str {
    "\
Search passages by meaning rather than exact words.

  apples and oranges              one term, best matches first
  dinner plans | road trip        several terms, results listed per term
  [20] dinner plans               return up to 20 results per term
  model:bge-small-en-v1.5 trip    switch the embedding model for this session
  [help]                          show this text
  [usage]                         show embedding work done so far
  [reset]                         forget the model switch and cached indexes

Directives go before the terms and can be combined: [5] model:NAME term.
Brackets that do not hold a number are searched as written."
}
