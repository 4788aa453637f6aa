use std::fmt::Write;

use crate::semantic::{BuildReport, CacheStats, SearchOutcome, SearchResponse, UsageReport};

/// Human-readable rendering of one response.
pub fn render_response(response: &SearchResponse) -> String {
    match response {
        SearchResponse::Help { text } => text.clone(),
        SearchResponse::Usage { usage } => render_usage(usage),
        SearchResponse::Reset => {
            "Session reset: model choice, indexes and usage counters cleared.".to_string()
        }
        SearchResponse::ModelSwitched { model } => format!("Using model '{model}'."),
        SearchResponse::Results(outcome) => render_outcome(outcome),
    }
}

fn render_outcome(outcome: &SearchOutcome) -> String {
    let mut out = String::new();

    for warning in &outcome.warnings {
        let _ = writeln!(out, "warning: {warning}");
    }

    if !outcome.index.errors.is_empty() {
        let _ = writeln!(
            out,
            "note: {} file(s) could not be indexed",
            outcome.index.errors.len()
        );
        for error in &outcome.index.errors {
            let _ = writeln!(out, "  skipped {error}");
        }
    }

    for (idx, term) in outcome.terms.iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "== {} ==", term.term);

        if term.results.is_empty() {
            let _ = writeln!(out, "  no matches");
            continue;
        }

        for result in &term.results {
            let time = result
                .time
                .map(|t| format!(" @ {}", format_timestamp(t.start)))
                .unwrap_or_default();
            let speaker = result
                .speaker
                .as_ref()
                .map(|s| format!(" ({s})"))
                .unwrap_or_default();

            let _ = writeln!(
                out,
                "{:>3}. [{:.3}] {}{}{}",
                result.rank, result.score, result.document_name, time, speaker
            );
            let _ = writeln!(out, "     {}", result.text);
        }
    }

    out.trim_end().to_string()
}

fn render_usage(usage: &UsageReport) -> String {
    let models = if usage.loaded_models.is_empty() {
        "none".to_string()
    } else {
        usage.loaded_models.join(", ")
    };

    format!(
        "texts requested:   {}\n\
         cache hits:        {}\n\
         texts embedded:    {} in {} batch(es)\n\
         approx. tokens:    {}\n\
         model loads:       {}\n\
         loaded models:     {}\n\
         Embeddings run locally, so there is no cost.",
        usage.texts_requested,
        usage.cache_hits,
        usage.texts_encoded,
        usage.batches,
        usage.approx_tokens,
        usage.model_loads,
        models
    )
}

/// Summary printed after an index build.
pub fn render_build_report(report: &BuildReport) -> String {
    let mut out = format!(
        "Indexed {} passages from {} documents in {}ms",
        report.passages, report.documents, report.elapsed_ms
    );
    for error in &report.errors {
        let _ = write!(out, "\n  skipped {error}");
    }
    out
}

pub fn render_cache_stats(stats: &CacheStats) -> String {
    let mut out = String::new();
    if let Some(path) = &stats.path {
        let _ = writeln!(out, "file:     {}", path.display());
    }
    let _ = writeln!(out, "size:     {}", format_bytes(stats.file_bytes));
    let _ = writeln!(out, "entries:  {}", stats.entries);
    for (model, count) in &stats.models {
        let _ = writeln!(out, "  {model}: {count}");
    }
    if stats.corrupt_records > 0 {
        let _ = writeln!(out, "skipped unreadable records on load: {}", stats.corrupt_records);
    }
    out.trim_end().to_string()
}

/// `m:ss`, or `h:mm:ss` past the hour.
pub fn format_timestamp(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
