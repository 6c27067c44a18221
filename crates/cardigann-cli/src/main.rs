//! CLI entry point for running tracker definitions.

use anyhow::Result;
use clap::Parser;
use tracing::debug;

mod cli;
mod commands;

use cli::{Args, Command};
use commands::SearchParams;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over -q and -v
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    match args.command {
        Command::Validate { definition } => commands::validate(&definition),
        Command::Search {
            indexer,
            query_type,
            categories,
            limit,
            season,
            episode,
            imdb,
            keywords,
        } => {
            let params = SearchParams {
                query_type,
                categories,
                limit,
                season,
                episode,
                imdb,
                keywords,
            };
            commands::search(&indexer, params).await
        }
        Command::Download {
            indexer,
            details_url,
        } => commands::download(&indexer, &details_url).await,
    }
}
