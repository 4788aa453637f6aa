use serde::Serialize;

use super::lexer::{next_directive, Directive};
use super::QueryError;

/// Separator between independent query terms
pub const TERM_SEPARATOR: char = '|';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Plain search
    None,
    Help,
    Usage,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub raw: String,
    /// Non-empty trimmed terms, in the order they were written
    pub terms: Vec<String>,
    /// From a leading `[N]`; `None` means the configured default
    pub max_results: Option<usize>,
    /// From a leading `model:<name>`; sticky for the rest of the session
    pub model: Option<String>,
    pub command: Command,
    /// Directives that were rejected and kept as literal text
    pub warnings: Vec<QueryError>,
}

impl Query {
    fn command(raw: &str, command: Command) -> Self {
        Self {
            raw: raw.to_string(),
            terms: Vec::new(),
            max_results: None,
            model: None,
            command,
            warnings: Vec::new(),
        }
    }

    pub fn max_results_or(&self, default: usize) -> usize {
        self.max_results.unwrap_or(default)
    }
}

fn reserved_command(trimmed: &str) -> Option<Command> {
    [
        ("[help]", Command::Help),
        ("[usage]", Command::Usage),
        ("[reset]", Command::Reset),
    ]
    .into_iter()
    .find(|(token, _)| trimmed.eq_ignore_ascii_case(token))
    .map(|(_, command)| command)
}

pub fn parse_query(raw: &str) -> Result<Query, QueryError> {
    let trimmed = raw.trim();

    if let Some(command) = reserved_command(trimmed) {
        return Ok(Query::command(raw, command));
    }

    let mut max_results = None;
    let mut model = None;
    let mut warnings = Vec::new();
    let mut rest = trimmed;

    while let Some((directive, remaining)) = next_directive(rest) {
        match directive {
            Directive::Limit(n) => max_results = Some(n),
            Directive::Model(name) => model = Some(name),
            Directive::Invalid { text, reason } => {
                // the rejected directive stays in the query text verbatim
                warnings.push(QueryError::InvalidDirective {
                    directive: text,
                    reason,
                });
                break;
            }
        }
        rest = remaining.trim_start();
    }

    let terms: Vec<String> = rest
        .split(TERM_SEPARATOR)
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(str::to_string)
        .collect();

    if terms.is_empty() && model.is_none() {
        return Err(QueryError::EmptyQuery);
    }

    Ok(Query {
        raw: raw.to_string(),
        terms,
        max_results,
        model,
        command: Command::None,
        warnings,
    })
}
