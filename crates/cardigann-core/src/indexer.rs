//! Indexer API
//!
//! Ties a definition, the user's settings and an HTTP client together and
//! owns the login session shared by every call.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::categories::CategoryMap;
use crate::client::{
    ClientConfig, Follow, HttpClient, HttpMethod, HttpRequest, RequestBody, ReqwestClient, send,
};
use crate::context::base_context;
use crate::definition::{Definition, DownloadSpec, ResponseKind};
use crate::error::{CardigannError, Result};
use crate::login::{Authenticator, LoginOutcome, LoginSession, LoginState, expand_pairs};
use crate::record::{SearchQuery, SearchResponse};
use crate::search::SearchExecutor;
use crate::selector::html::{self, document_root, parse_document};
use crate::settings::IndexerSettings;
use crate::template::{TemplateContext, expand};
use crate::url::{append_query, build_query_string, form_encode, resolve_url};

/// One configured tracker
///
/// Searches, logins and downloads take the session lock for their whole
/// duration, so a relogin and the retried request never interleave with
/// another call.
pub struct Indexer {
    definition: Definition,
    settings: IndexerSettings,
    categories: CategoryMap,
    client: Arc<dyn HttpClient>,
    session: Mutex<LoginSession>,
}

impl Indexer {
    /// Create an indexer using a reqwest client paced by the definition's request delay
    ///
    /// # Errors
    /// - `Config` if the definition is invalid
    /// - `HttpError` if HTTP client initialization fails
    pub fn new(definition: Definition, settings: IndexerSettings) -> Result<Self> {
        let config = ClientConfig::default().with_request_delay(definition.request_delay);
        let client = ReqwestClient::with_config(config)?;
        Self::with_client(definition, settings, Arc::new(client))
    }

    /// Create an indexer on top of any [`HttpClient`]
    ///
    /// # Arguments
    /// * `definition` - Tracker definition
    /// * `settings` - User values; `site_link` overrides the definition's first link
    /// * `client` - Transport used for every request
    ///
    /// # Errors
    /// Returns `Config` if the definition is invalid or maps categories to
    /// unknown Newznab names.
    pub fn with_client(
        definition: Definition,
        settings: IndexerSettings,
        client: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        definition.validate()?;
        let categories = CategoryMap::from_mappings(&definition.caps.categorymappings)?;
        let site_link = settings
            .site_link
            .clone()
            .or_else(|| definition.site_link().map(str::to_string))
            .ok_or_else(|| CardigannError::Config("definition has no links".to_string()))?;
        let site_link = if site_link.ends_with('/') {
            site_link
        } else {
            format!("{}/", site_link)
        };

        Ok(Self {
            definition,
            settings,
            categories,
            client,
            session: Mutex::new(LoginSession::new(site_link)),
        })
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    /// Link requests are currently resolved against
    pub async fn site_link(&self) -> String {
        self.session.lock().await.site_link.clone()
    }

    pub async fn login_state(&self) -> LoginState {
        self.session.lock().await.state
    }

    /// Runs the definition's login recipe
    ///
    /// Definitions without a login block are logged in right away.
    ///
    /// # Errors
    /// Returns `Login` when the tracker rejected the credentials.
    pub async fn login(&self) -> Result<LoginOutcome> {
        let mut session = self.session.lock().await;
        Authenticator::new(&self.definition, self.client.as_ref(), &self.settings)
            .login(&mut session)
            .await
    }

    /// Retries a form login that stopped at a captcha
    pub async fn submit_captcha(&self, answer: &str) -> Result<LoginOutcome> {
        let mut session = self.session.lock().await;
        Authenticator::new(&self.definition, self.client.as_ref(), &self.settings)
            .with_captcha(answer)
            .login(&mut session)
            .await
    }

    /// Search the tracker
    ///
    /// Logs in first when there is no session yet. A response showing the
    /// session is gone triggers one login and one retry of that request.
    ///
    /// # Example
    /// ```no_run
    /// # async fn example(indexer: cardigann_core::Indexer) -> cardigann_core::Result<()> {
    /// use cardigann_core::SearchQuery;
    /// let response = indexer.search(&SearchQuery::new("ubuntu")).await?;
    /// for record in &response.records {
    ///     println!("{:?}: {:?}", record.title, record.link);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResponse> {
        let mut session = self.session.lock().await;
        SearchExecutor::new(
            &self.definition,
            self.client.as_ref(),
            &self.settings,
            &self.categories,
        )
        .search(&mut session, query)
        .await
    }

    /// Resolves the download link of a details page
    ///
    /// # Arguments
    /// * `details_url` - Absolute URL of the details page
    ///
    /// # Returns
    /// An absolute download URL or a magnet link. Definitions without a
    /// download block return `details_url` unchanged.
    ///
    /// # Errors
    /// - `Selector` if no download selector matches
    /// - `Status` if the details page or the `before` request fails
    pub async fn download_link(&self, details_url: &str) -> Result<String> {
        let Some(spec) = &self.definition.download else {
            return Ok(details_url.to_string());
        };
        let mut session = self.session.lock().await;
        let mut ctx = base_context(&self.definition, &self.settings, &session.site_link);
        ctx.set(".DownloadUri.AbsoluteUri", details_url);
        ctx.set(
            ".DownloadUri.Query",
            details_url.split_once('?').map(|(_, q)| q.to_string()).unwrap_or_default(),
        );

        if let Some(before) = &spec.before {
            let url = resolve_url(&session.site_link, &expand(&before.path, &ctx)?)?;
            let inputs = expand_pairs(&before.inputs, &ctx)?;
            let request = match before.method {
                HttpMethod::Get => {
                    HttpRequest::get(append_query(&url, &build_query_string(&inputs)))
                }
                HttpMethod::Post => HttpRequest::post(url, RequestBody::Form(inputs)),
            };
            let response = send(
                self.client.as_ref(),
                request,
                &mut session.cookies,
                Follow::SameHost,
            )
            .await?;
            if !response.is_success() {
                return Err(CardigannError::Status {
                    status: response.status,
                    url: response.url,
                });
            }
        }

        let request = match spec.method {
            HttpMethod::Get => HttpRequest::get(details_url),
            HttpMethod::Post => HttpRequest::post(details_url, RequestBody::Empty),
        }
        .with_encoding(self.definition.encoding.clone());
        let response = send(
            self.client.as_ref(),
            request,
            &mut session.cookies,
            Follow::SameHost,
        )
        .await?;
        if !response.is_success() {
            return Err(CardigannError::Status {
                status: response.status,
                url: response.url,
            });
        }

        let link = pick_download(spec, &response.body, &response.url, &ctx)?;
        debug!(details = %details_url, link = ?link, "Resolved download link");
        link.ok_or_else(|| CardigannError::Selector {
            selector: spec
                .selectors
                .iter()
                .filter_map(|s| s.selector.clone())
                .collect::<Vec<_>>()
                .join(", "),
            context: format!("no download link on {}", details_url),
        })
    }
}

/// First download link found on a details page
fn pick_download(
    spec: &DownloadSpec,
    body: &str,
    page_url: &str,
    ctx: &TemplateContext,
) -> Result<Option<String>> {
    let document = parse_document(body, ResponseKind::Html);
    let root = document_root(&document);

    if let Some(infohash) = &spec.infohash {
        let hash = html::extract(&infohash.hash, root, ctx, false)?;
        let title = html::extract(&infohash.title, root, ctx, false)?;
        return Ok(match (hash, title) {
            (Some(hash), Some(title)) if !hash.trim().is_empty() => Some(format!(
                "magnet:?xt=urn:btih:{}&dn={}",
                hash.trim(),
                form_encode(title.trim())
            )),
            _ => None,
        });
    }

    for block in &spec.selectors {
        let Some(link) = html::extract(block, root, ctx, false)? else {
            continue;
        };
        let link = link.trim();
        if link.is_empty() {
            continue;
        }
        if link.starts_with("magnet:") {
            return Ok(Some(link.to_string()));
        }
        return resolve_url(page_url, link).map(Some);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::scripted::{ScriptedClient, ok};

    const DEFINITION: &str = r#"
id: demo
name: Demo
links: [https://demo.test]
caps:
  categorymappings:
    - {id: 1, cat: Movies}
search:
  path: browse.php
  rows: {selector: tr.t}
  fields:
    title: {selector: a}
    details: {selector: a, attribute: href}
download:
  before:
    path: "thanks.php?{{ .DownloadUri.Query }}"
  selectors:
    - selector: a.missing
      attribute: href
    - selector: a.dl
      attribute: href
"#;

    const DETAILS: &str = r#"<html><body>
        <a class="dl" href="/download.php?id=7">Download</a>
        <span class="hash">ABCDEF0123</span><h1>Some Movie 2024</h1>
    </body></html>"#;

    fn indexer(yaml: &str, client: Arc<ScriptedClient>) -> Indexer {
        let definition = Definition::from_yaml(yaml).expect("Definition should parse");
        Indexer::with_client(definition, IndexerSettings::new(), client)
            .expect("Indexer should build")
    }

    #[tokio::test]
    async fn test_site_link_defaults_and_override() {
        let client = Arc::new(ScriptedClient::default());
        let idx = indexer(DEFINITION, client.clone());
        assert_eq!(idx.site_link().await, "https://demo.test/");

        let definition = Definition::from_yaml(DEFINITION).unwrap();
        let settings = IndexerSettings::new().with_site_link("https://mirror.test/");
        let idx = Indexer::with_client(definition, settings, client).unwrap();
        assert_eq!(idx.site_link().await, "https://mirror.test/");
    }

    #[tokio::test]
    async fn test_login_without_login_block() {
        let client = Arc::new(ScriptedClient::default());
        let idx = indexer(DEFINITION, client.clone());
        assert_eq!(idx.login_state().await, LoginState::NoSession);
        assert_eq!(idx.login().await.unwrap(), LoginOutcome::LoggedIn);
        assert_eq!(idx.login_state().await, LoginState::LoggedIn);
        assert!(client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_search_uses_client() {
        let page =
            r#"<table><tr class="t"><td><a href="details.php?id=1">Movie</a></td></tr></table>"#;
        let client = Arc::new(ScriptedClient::new(vec![ok(page)]));
        let idx = indexer(DEFINITION, client.clone());
        let response = idx.search(&SearchQuery::new("movie")).await.unwrap();
        assert_eq!(response.records.len(), 1);
        assert_eq!(
            response.records[0].details.as_deref(),
            Some("https://demo.test/details.php?id=1")
        );
        assert_eq!(client.sent()[0].url, "https://demo.test/browse.php");
    }

    #[tokio::test]
    async fn test_download_link_with_before_request() {
        let client = Arc::new(ScriptedClient::new(vec![ok(""), ok(DETAILS)]));
        let idx = indexer(DEFINITION, client.clone());
        let link = idx
            .download_link("https://demo.test/details.php?id=7")
            .await
            .unwrap();
        assert_eq!(link, "https://demo.test/download.php?id=7");

        let urls: Vec<String> = client.sent().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec!["https://demo.test/thanks.php?id=7", "https://demo.test/details.php?id=7"]
        );
    }

    #[tokio::test]
    async fn test_download_link_from_infohash() {
        let yaml = DEFINITION.replace(
            "  before:\n    path: \"thanks.php?{{ .DownloadUri.Query }}\"\n",
            "  infohash:\n    hash: {selector: span.hash}\n    title: {selector: h1}\n",
        );
        let client = Arc::new(ScriptedClient::new(vec![ok(DETAILS)]));
        let idx = indexer(&yaml, client);
        let link = idx.download_link("https://demo.test/details.php?id=7").await.unwrap();
        assert_eq!(link, "magnet:?xt=urn:btih:ABCDEF0123&dn=Some+Movie+2024");
    }

    #[tokio::test]
    async fn test_download_link_missing() {
        let client = Arc::new(ScriptedClient::new(vec![ok(""), ok("<p>gone</p>")]));
        let idx = indexer(DEFINITION, client);
        let err = idx
            .download_link("https://demo.test/details.php?id=7")
            .await
            .unwrap_err();
        assert!(matches!(err, CardigannError::Selector { .. }));
    }

    #[tokio::test]
    async fn test_download_link_without_download_block() {
        let yaml = DEFINITION.split("download:").next().unwrap().to_string();
        let client = Arc::new(ScriptedClient::default());
        let idx = indexer(&yaml, client.clone());
        let link = idx.download_link("https://demo.test/details.php?id=7").await.unwrap();
        assert_eq!(link, "https://demo.test/details.php?id=7");
        assert!(client.sent().is_empty());
    }
}
