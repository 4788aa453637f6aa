use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod cli;
mod config;
mod search_query;
mod semantic;
#[cfg(test)]
mod tests;

use app::AppFactory;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries results and JSON
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging();

    let paths = AppFactory::get_paths()?;
    let config = AppFactory::create_config(&paths)?;
    tracing::debug!(base = %config.base_path().display(), "using base directory");

    match args.command {
        cli::Command::Search {
            paths: scope,
            query,
            model,
            json,
        } => cli::handle_search(&paths, config, scope, query, model, json),

        cli::Command::Cache { action } => cli::handle_cache(&paths, action),

        cli::Command::Models {} => cli::handle_models(&config),
    }
}
