//! Search execution
//!
//! [`SearchExecutor`] builds the template context for a query, runs every
//! search path the query's categories select, and hands each response to the
//! row reader. A path that fails is reported next to the records of the
//! others; only a failed relogin stops the whole query.

mod rows;

use tracing::{debug, info, warn};

use crate::categories::CategoryMap;
use crate::client::{Follow, HttpClient, HttpMethod, HttpRequest, HttpResponse, RequestBody, send};
use crate::context::{add_query, base_context};
use crate::definition::{Definition, ResponseKind, SearchPath};
use crate::error::{CardigannError, Result};
use crate::filters::apply_filters;
use crate::login::{
    Authenticator, LoginOutcome, LoginSession, LoginState, expand_pairs, looks_logged_out,
    site_moved,
};
use crate::record::{PathError, ResultRecord, SearchQuery, SearchResponse};
use crate::settings::IndexerSettings;
use crate::template::{TemplateContext, expand, expand_with};
use crate::url::{
    append_query, build_query_string, form_decode, form_encode, resolve_url, split_raw_query,
};

pub(crate) use rows::RowReader;

/// Input key whose value is a preformatted `k=v&k2=v2` string
const RAW_INPUT: &str = "$raw";

/// Runs queries against one definition
pub struct SearchExecutor<'a> {
    definition: &'a Definition,
    client: &'a dyn HttpClient,
    settings: &'a IndexerSettings,
    categories: &'a CategoryMap,
}

impl<'a> SearchExecutor<'a> {
    pub fn new(
        definition: &'a Definition,
        client: &'a dyn HttpClient,
        settings: &'a IndexerSettings,
        categories: &'a CategoryMap,
    ) -> Self {
        Self {
            definition,
            client,
            settings,
            categories,
        }
    }

    /// Runs `query` against every selected search path
    ///
    /// A session without cookies that never logged in is logged in first.
    ///
    /// # Arguments
    /// * `session` - Session whose cookies are sent and which is logged in
    ///   again when a response shows it expired
    /// * `query` - Normalized query
    ///
    /// # Returns
    /// Records of all paths, capped at the query limit, plus the errors of
    /// paths that failed
    ///
    /// # Errors
    /// - [`CardigannError::Login`] when the first login fails
    /// - [`CardigannError::Relogin`] when the session stays logged out after
    ///   logging in again
    /// - [`CardigannError::SiteMoved`] when a path redirects to another domain
    /// - [`CardigannError::AllPathsFailed`] when every path failed
    pub async fn search(
        &self,
        session: &mut LoginSession,
        query: &SearchQuery,
    ) -> Result<SearchResponse> {
        let search = &self.definition.search;
        if self.definition.login.is_some()
            && session.state != LoginState::LoggedIn
            && session.cookies.is_empty()
        {
            self.login(session).await?;
        }
        let mut ctx = base_context(self.definition, self.settings, &session.site_link);
        let keywords = apply_filters(query.keywords(), &search.keywordsfilters, &ctx)?;

        let mut tracker_categories = self.categories.map_query_categories(&query.categories);
        if tracker_categories.is_empty() {
            tracker_categories = self.categories.default_categories();
        }
        add_query(&mut ctx, query, &keywords, &tracker_categories);
        debug!(
            indexer = %self.definition.id,
            keywords = %keywords,
            categories = ?tracker_categories,
            "Searching"
        );

        let mut response = SearchResponse::default();
        let mut attempted = 0;
        for path in search.effective_paths() {
            if !path_selected(&path.categories, &tracker_categories) {
                debug!(path = %path.path, "Path skipped for query categories");
                continue;
            }
            attempted += 1;
            match self.search_path(session, &path, &ctx, query).await {
                Ok(records) => response.records.extend(records),
                Err(e @ (CardigannError::Relogin(_) | CardigannError::SiteMoved { .. })) => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(path = %path.path, error = %e, "Search path failed");
                    response.errors.push(PathError {
                        path: path.path.clone(),
                        message: e.to_string(),
                    });
                }
            }
            if let Some(limit) = query.limit
                && response.records.len() >= limit
            {
                response.records.truncate(limit);
                break;
            }
        }

        if attempted > 0 && response.errors.len() == attempted {
            return Err(CardigannError::AllPathsFailed(
                response.errors.into_iter().map(|e| e.message).collect(),
            ));
        }
        Ok(response)
    }

    async fn search_path(
        &self,
        session: &mut LoginSession,
        path: &SearchPath,
        ctx: &TemplateContext,
        query: &SearchQuery,
    ) -> Result<Vec<ResultRecord>> {
        let kind = path.response.kind;
        let follow = if path.followredirect || self.definition.followredirect {
            Follow::SameHost
        } else {
            Follow::None
        };

        let mut relogged = false;
        let response = loop {
            let request = self.build_request(path, ctx, &session.site_link)?;
            let response = send(self.client, request, &mut session.cookies, follow).await?;
            if let Some(moved) = site_moved(&response) {
                return Err(moved);
            }

            let Some(login) = &self.definition.login else {
                break response;
            };
            if !looks_logged_out(login, &response, kind, ctx)? {
                break response;
            }
            if relogged {
                return Err(CardigannError::Relogin(format!(
                    "still logged out after logging in again ({})",
                    response.url
                )));
            }
            info!(indexer = %self.definition.id, "Session expired, logging in again");
            self.login(session)
                .await
                .map_err(|e| CardigannError::Relogin(e.to_string()))?;
            relogged = true;
        };
        check_status(&response)?;

        let reader = RowReader {
            definition: self.definition,
            categories: self.categories,
            query,
            page_url: &response.url,
            ctx,
        };
        let records = match kind {
            ResponseKind::Json => reader.read_json(&response.body, &path.response)?,
            ResponseKind::Html | ResponseKind::Xml => reader.read_markup(&response.body, kind)?,
        };
        debug!(path = %path.path, records = records.len(), "Search path done");
        Ok(records)
    }

    /// Logs in, treating a captcha request as a failure
    async fn login(&self, session: &mut LoginSession) -> Result<()> {
        match Authenticator::new(self.definition, self.client, self.settings)
            .login(session)
            .await?
        {
            LoginOutcome::LoggedIn => Ok(()),
            LoginOutcome::CaptchaRequired(_) => Err(CardigannError::Login(
                "login needs a captcha answer".to_string(),
            )),
        }
    }

    /// Expands the path, inputs and headers of one search path
    fn build_request(
        &self,
        path: &SearchPath,
        ctx: &TemplateContext,
        site_link: &str,
    ) -> Result<HttpRequest> {
        let search = &self.definition.search;
        let encode = |value: &str| form_encode(value);
        let url = resolve_url(site_link, &expand_with(&path.path, ctx, Some(&encode))?)?;

        let mut inputs: Vec<(String, String)> = if path.inheritinputs {
            search.inputs.clone()
        } else {
            Vec::new()
        };
        for (key, value) in &path.inputs {
            match inputs.iter_mut().find(|(k, _)| k == key) {
                Some(input) => input.1 = value.clone(),
                None => inputs.push((key.clone(), value.clone())),
            }
        }

        let mut pairs = Vec::new();
        for (key, template) in &inputs {
            if key == RAW_INPUT {
                let raw = expand_with(template, ctx, Some(&encode))?;
                pairs.extend(
                    split_raw_query(&raw)
                        .into_iter()
                        .map(|(k, v)| (form_decode(&k), form_decode(&v))),
                );
            } else {
                pairs.push((key.clone(), expand(template, ctx)?));
            }
        }

        let request = match path.method {
            HttpMethod::Get => HttpRequest::get(append_query(&url, &build_query_string(&pairs))),
            HttpMethod::Post => HttpRequest::post(url, RequestBody::Form(pairs)),
        };
        Ok(request
            .with_headers(expand_pairs(&search.headers, ctx)?)
            .with_encoding(self.definition.encoding.clone()))
    }
}

/// Whether a path's category list admits the query's tracker categories
///
/// An empty list admits everything, as does a query without categories. A
/// `!` entry or `!` prefix turns the list into a deny-list.
fn path_selected(filter: &[String], tracker_categories: &[String]) -> bool {
    if filter.is_empty() || tracker_categories.is_empty() {
        return true;
    }
    let invert = filter.iter().any(|c| c.starts_with('!'));
    let listed: Vec<&str> = filter
        .iter()
        .map(|c| c.trim_start_matches('!'))
        .filter(|c| !c.is_empty())
        .collect();
    let hit = tracker_categories.iter().any(|c| listed.contains(&c.as_str()));
    hit != invert
}

fn check_status(response: &HttpResponse) -> Result<()> {
    if response.is_success() {
        Ok(())
    } else {
        Err(CardigannError::Status {
            status: response.status,
            url: response.url.clone(),
        })
    }
}
