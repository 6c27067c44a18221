//! Command implementations
//!
//! Every command prints its result as JSON on stdout; logs go to stderr.

use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use cardigann_core::{Definition, Indexer, IndexerSettings, LoginOutcome, QueryType, SearchQuery};

use crate::cli::IndexerArgs;

/// Parameters of the `search` command
pub struct SearchParams {
    pub query_type: QueryType,
    pub categories: Vec<u32>,
    pub limit: Option<usize>,
    pub season: Option<u32>,
    pub episode: Option<String>,
    pub imdb: Option<String>,
    pub keywords: Vec<String>,
}

fn load_definition(path: &Path) -> Result<Definition> {
    let yaml =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Definition::from_yaml(&yaml).with_context(|| format!("loading {}", path.display()))
}

fn settings(args: &IndexerArgs) -> IndexerSettings {
    let mut settings = args
        .settings
        .iter()
        .fold(IndexerSettings::new(), |settings, (name, value)| settings.with_text(name, value));
    if let Some(link) = &args.site_link {
        settings = settings.with_site_link(link);
    }
    settings
}

/// Builds the indexer and logs in, answering a captcha when one was given
async fn logged_in_indexer(args: &IndexerArgs) -> Result<Indexer> {
    let indexer = Indexer::new(load_definition(&args.definition)?, settings(args))?;
    match indexer.login().await? {
        LoginOutcome::LoggedIn => {}
        LoginOutcome::CaptchaRequired(challenge) => {
            let Some(answer) = &args.captcha else {
                bail!(
                    "login needs a captcha answer (--captcha); challenge: {}",
                    serde_json::to_string(&challenge)?
                );
            };
            if let LoginOutcome::CaptchaRequired(_) = indexer.submit_captcha(answer).await? {
                bail!("captcha answer was not accepted");
            }
        }
    }
    Ok(indexer)
}

pub fn validate(path: &Path) -> Result<()> {
    let definition = load_definition(path)?;
    info!(id = %definition.id, "Definition is valid");
    let summary = serde_json::json!({
        "id": definition.id,
        "name": definition.name,
        "links": definition.links,
        "login": definition.login.as_ref().map(|l| format!("{:?}", l.method).to_lowercase()),
        "paths": definition.search.effective_paths().len(),
        "fields": definition.search.fields.iter().map(|(name, _)| name).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

pub async fn search(args: &IndexerArgs, params: SearchParams) -> Result<()> {
    let indexer = logged_in_indexer(args).await?;
    let query = SearchQuery {
        query_type: params.query_type,
        search_term: Some(params.keywords.join(" ")).filter(|k| !k.is_empty()),
        categories: params.categories,
        season: params.season,
        episode: params.episode,
        imdb_id: params.imdb,
        limit: params.limit,
        ..SearchQuery::default()
    };

    let response = indexer.search(&query).await?;
    for error in &response.errors {
        warn!(path = %error.path, error = %error.message, "Search path failed");
    }
    info!(records = response.records.len(), "Search complete");
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

pub async fn download(args: &IndexerArgs, details_url: &str) -> Result<()> {
    let indexer = logged_in_indexer(args).await?;
    let link = indexer.download_link(details_url).await?;
    println!("{}", serde_json::json!({ "details": details_url, "link": link }));
    Ok(())
}
