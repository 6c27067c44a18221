//! CLI argument definitions

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use cardigann_core::QueryType;

/// Run declarative tracker definitions from the command line
#[derive(Parser, Debug)]
#[command(name = "cardigann")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse and validate a definition file
    Validate {
        /// Definition YAML file
        definition: PathBuf,
    },
    /// Log in and run a search, printing the records as JSON
    Search {
        #[command(flatten)]
        indexer: IndexerArgs,

        /// Search kind
        #[arg(long = "type", default_value = "search", value_parser = parse_query_type)]
        query_type: QueryType,

        /// Newznab category ids
        #[arg(short, long = "category")]
        categories: Vec<u32>,

        /// Maximum number of records
        #[arg(short, long)]
        limit: Option<usize>,

        #[arg(long)]
        season: Option<u32>,

        #[arg(long)]
        episode: Option<String>,

        /// IMDb id, e.g. tt0133093
        #[arg(long)]
        imdb: Option<String>,

        /// Search terms
        keywords: Vec<String>,
    },
    /// Resolve the download link of a details page
    Download {
        #[command(flatten)]
        indexer: IndexerArgs,

        /// Absolute details page URL
        details_url: String,
    },
}

/// Options shared by every command talking to a tracker
#[derive(ClapArgs, Debug)]
pub struct IndexerArgs {
    /// Definition YAML file
    #[arg(short, long)]
    pub definition: PathBuf,

    /// Setting value as name=value (repeatable)
    #[arg(short, long = "setting", value_parser = parse_setting)]
    pub settings: Vec<(String, String)>,

    /// Override the definition's site link
    #[arg(long)]
    pub site_link: Option<String>,

    /// Answer for a login captcha
    #[arg(long)]
    pub captcha: Option<String>,
}

fn parse_setting(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected name=value, got {}", raw)),
    }
}

fn parse_query_type(raw: &str) -> Result<QueryType, String> {
    match raw.to_lowercase().as_str() {
        "search" => Ok(QueryType::Search),
        "tvsearch" | "tv-search" => Ok(QueryType::TvSearch),
        "movie" | "movie-search" => Ok(QueryType::Movie),
        "music" | "music-search" => Ok(QueryType::Music),
        "book" | "book-search" => Ok(QueryType::Book),
        other => Err(format!("unknown search type {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_args_parse() {
        let args = Args::try_parse_from([
            "cardigann",
            "-v",
            "search",
            "-d",
            "tracker.yml",
            "-s",
            "username=alice",
            "-s",
            "password=a=b",
            "-c",
            "2000",
            "--type",
            "tv-search",
            "--season",
            "2",
            "doctor",
            "who",
        ])
        .unwrap();
        assert_eq!(args.verbose, 1);
        let Command::Search {
            indexer,
            query_type,
            categories,
            season,
            keywords,
            ..
        } = args.command
        else {
            panic!("expected search command");
        };
        assert_eq!(indexer.definition, PathBuf::from("tracker.yml"));
        assert_eq!(
            indexer.settings,
            vec![
                ("username".to_string(), "alice".to_string()),
                ("password".to_string(), "a=b".to_string()),
            ]
        );
        assert_eq!(query_type, QueryType::TvSearch);
        assert_eq!(categories, vec![2000]);
        assert_eq!(season, Some(2));
        assert_eq!(keywords, vec!["doctor", "who"]);
    }

    #[test]
    fn test_invalid_setting_rejected() {
        let result = Args::try_parse_from([
            "cardigann",
            "download",
            "-d",
            "t.yml",
            "-s",
            "novalue",
            "https://x.test/",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_quiet_flag_after_subcommand() {
        let args = Args::try_parse_from(["cardigann", "validate", "t.yml", "-q"]).unwrap();
        assert!(args.quiet);
    }
}
