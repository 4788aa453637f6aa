use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::error::InquireResult;

use crate::{
    app::{AppFactory, AppPaths, Recall, SearchTicket, SearchWorker},
    cli::{
        errors::{CliError, CliResult},
        output, CacheArgs,
    },
    config::Config,
    semantic::{BuildReport, CancelToken, SearchError, SearchResponse, SUPPORTED_MODELS},
};

const PROMPT_HELP: &str = "[help] for syntax, :prev / :next to recall, :quit to exit";

/// Cancel token of the search currently running, if any. Ctrl-C cancels it.
type ActiveSearch = Arc<Mutex<Option<CancelToken>>>;

pub fn handle_search(
    paths: &AppPaths,
    mut config: Config,
    scope: Vec<PathBuf>,
    query: Option<String>,
    model: Option<String>,
    json: bool,
) -> Result<()> {
    if let Some(model) = model {
        config.search.model = model;
    }

    let cache = AppFactory::create_cache(paths);
    let embedder = AppFactory::create_embedder(paths, &config, cache);
    let session = AppFactory::create_session(scope, &config, embedder);
    let worker = SearchWorker::start(session);

    let active: ActiveSearch = Arc::new(Mutex::new(None));
    ctrlc::set_handler({
        let active = active.clone();
        move || {
            if let Ok(guard) = active.lock() {
                match guard.as_ref() {
                    Some(cancel) => {
                        log::info!("cancelling search");
                        cancel.cancel();
                    }
                    None => std::process::exit(130),
                }
            }
        }
    })
    .context("Failed to set Ctrl+C handler")?;

    let result = match query {
        Some(query) => run_query(&worker, &active, &query, json),
        None => interactive(&worker, &active, json),
    };

    worker.shutdown();

    match result {
        Ok(()) | Err(CliError::UserCancelled) => Ok(()),
        Err(e) => Err(anyhow::anyhow!(e)),
    }
}

fn interactive(worker: &SearchWorker, active: &ActiveSearch, json: bool) -> CliResult<()> {
    let warm_up = wait_with_spinner(worker.warm_up(), active, "Indexing...");
    eprintln!("{}", warm_up_notice(warm_up)?);

    let mut prefill = String::new();

    loop {
        let input = match inquire::Text::new("search>")
            .with_help_message(PROMPT_HELP)
            .with_initial_value(&prefill)
            .prompt()
        {
            InquireResult::Ok(input) => input,
            InquireResult::Err(err) => match CliError::from(err) {
                CliError::UserCancelled => return Ok(()),
                other => return Err(other),
            },
        };
        prefill.clear();

        let recall = match input.trim() {
            ":quit" | ":q" => return Ok(()),
            ":prev" => Some(Recall::Previous),
            ":next" => Some(Recall::Next),
            "" => continue,
            _ => None,
        };

        if let Some(direction) = recall {
            match worker.recall(direction)? {
                Some(entry) => prefill = entry,
                None => eprintln!("(no more history)"),
            }
            continue;
        }

        match run_query(worker, active, &input, json) {
            Ok(()) => {}
            Err(CliError::Search(SearchError::WorkerGone)) => {
                return Err(SearchError::WorkerGone.into())
            }
            // everything else is reported and the prompt comes back
            Err(e) => eprintln!("{e}"),
        }
    }
}

/// Message shown once the first index build ends. A failed build only
/// delays indexing to the first query; a dead worker ends the session.
fn warm_up_notice(result: CliResult<BuildReport>) -> CliResult<String> {
    match result {
        Ok(report) => Ok(output::render_build_report(&report)),
        Err(CliError::Search(SearchError::Cancelled)) => {
            Ok("Indexing cancelled. The first search will index the files.".to_string())
        }
        Err(CliError::Search(e)) if e.is_recoverable() => Ok(format!(
            "{e}\nThe first search retries the build; use model:<name> to switch models."
        )),
        Err(e) => Err(e),
    }
}

fn run_query(worker: &SearchWorker, active: &ActiveSearch, raw: &str, json: bool) -> CliResult<()> {
    let response = wait_with_spinner(worker.submit(raw), active, "Searching...")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        if let SearchResponse::Results(outcome) = &response {
            log::debug!("{} term(s) answered with '{}'", outcome.terms.len(), outcome.model);
        }
        println!("{}", output::render_response(&response));
    }

    Ok(())
}

fn wait_with_spinner<T>(ticket: SearchTicket<T>, active: &ActiveSearch, message: &str) -> CliResult<T> {
    set_active(active, Some(ticket.cancel_token()));

    let progress = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        progress.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    progress.set_message(message.to_string());
    progress.enable_steady_tick(Duration::from_millis(120));

    let result = loop {
        if let Some(result) = ticket.wait_timeout(Duration::from_millis(50)) {
            break result;
        }
    };

    progress.finish_and_clear();
    set_active(active, None);

    result.map_err(CliError::from)
}

fn set_active(active: &ActiveSearch, cancel: Option<CancelToken>) {
    if let Ok(mut guard) = active.lock() {
        *guard = cancel;
    }
}

pub fn handle_cache(paths: &AppPaths, action: CacheArgs) -> Result<()> {
    let cache = AppFactory::create_cache(paths);

    match action {
        CacheArgs::Stats { json } => {
            let stats = cache.stats();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{}", output::render_cache_stats(&stats));
            }
        }
        CacheArgs::Compact {} => {
            let before = cache.stats().file_bytes;
            cache.compact().context("failed to compact the embedding cache")?;
            let after = cache.stats().file_bytes;
            println!("Compacted cache: {} -> {} bytes", before, after);
        }
        CacheArgs::Clear { yes } => {
            if !yes {
                match inquire::prompt_confirmation(format!(
                    "Delete all {} cached embeddings?",
                    cache.len()
                )) {
                    InquireResult::Ok(true) => {}
                    InquireResult::Ok(false) => return Ok(()),
                    InquireResult::Err(err) => anyhow::bail!("An error occurred: {}", err),
                }
            }
            cache.clear().context("failed to clear the embedding cache")?;
            println!("Cache cleared");
        }
        CacheArgs::Prune { days } => {
            let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(days));
            let removed = cache
                .prune_older_than(cutoff.timestamp_millis().max(0) as u64)
                .context("failed to prune the embedding cache")?;
            println!("{} embeddings removed", removed);
        }
    }

    Ok(())
}

pub fn handle_models(config: &Config) -> Result<()> {
    for (name, note) in SUPPORTED_MODELS {
        let marker = if *name == config.search.model { "*" } else { " " };
        println!("{marker} {name:<22} {note}");
    }
    Ok(())
}
