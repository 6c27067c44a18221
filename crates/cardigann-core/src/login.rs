//! Login state machine
//!
//! A [`LoginSession`] carries the cookies, site link and state of one
//! indexer. [`Authenticator::login`] drives it from `NoSession` through
//! `LoggingIn` to `LoggedIn`, or stops at `CaptchaRequired` when a form needs
//! an answer only a human can give. Every method ends with the login test
//! request, which is also where a moved site is detected.

use scraper::{ElementRef, Html};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::client::{CookieJar, Follow, HttpClient, HttpRequest, HttpResponse, RequestBody, send};
use crate::context::base_context;
use crate::definition::{
    CaptchaKind, Definition, ErrorSelector, LoginMethod, LoginSpec, ResponseKind,
};
use crate::error::{CardigannError, Result};
use crate::selector::html::{self, document_root, element_text, query_all, query_first};
use crate::settings::IndexerSettings;
use crate::template::{TemplateContext, expand};
use crate::url::{append_query, build_query_string, host_of, origin_of, resolve_url};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    #[default]
    NoSession,
    LoggingIn,
    LoggedIn,
    CaptchaRequired,
    Failed,
}

/// What a login form asks the user to solve
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptchaChallenge {
    pub kind: CaptchaKind,
    /// Form input the answer goes into
    pub input: String,
    /// Absolute URL of the captcha image
    pub image_url: Option<String>,
    /// Question text of a text captcha
    pub text: Option<String>,
    /// Session cookies needed to fetch the image
    pub cookies: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LoginOutcome {
    LoggedIn,
    CaptchaRequired(CaptchaChallenge),
}

/// Landing page kept while a captcha is pending
#[derive(Debug, Clone)]
struct LandingPage {
    url: String,
    body: String,
}

/// Mutable session of one indexer
#[derive(Debug, Clone, Default)]
pub struct LoginSession {
    pub cookies: CookieJar,
    pub state: LoginState,
    pub site_link: String,
    pending: Option<LandingPage>,
}

impl LoginSession {
    pub fn new(site_link: impl Into<String>) -> Self {
        Self {
            site_link: site_link.into(),
            ..Self::default()
        }
    }
}

/// Everything read from a login form before it is submitted
struct FormPlan {
    action: String,
    multipart: bool,
    fields: Vec<(String, String)>,
    query: Vec<(String, String)>,
    simple_captcha: bool,
    challenge: Option<CaptchaChallenge>,
}

/// Runs the login recipe of a definition
pub struct Authenticator<'a> {
    definition: &'a Definition,
    client: &'a dyn HttpClient,
    settings: &'a IndexerSettings,
    captcha: Option<&'a str>,
}

impl<'a> Authenticator<'a> {
    pub fn new(
        definition: &'a Definition,
        client: &'a dyn HttpClient,
        settings: &'a IndexerSettings,
    ) -> Self {
        Self {
            definition,
            client,
            settings,
            captcha: settings.captcha.as_deref(),
        }
    }

    /// Answers the captcha of a pending form login
    pub fn with_captcha(mut self, answer: &'a str) -> Self {
        self.captcha = Some(answer);
        self
    }

    /// Logs in and verifies the session
    ///
    /// # Returns
    /// [`LoginOutcome::CaptchaRequired`] when the form needs an answer that
    /// wasn't supplied; the landing page is kept for the next attempt.
    ///
    /// # Errors
    /// Returns [`CardigannError::Login`] when the tracker rejected the login
    /// or the login test failed, and transport errors as they occur.
    pub async fn login(&self, session: &mut LoginSession) -> Result<LoginOutcome> {
        let Some(spec) = &self.definition.login else {
            session.state = LoginState::LoggedIn;
            return Ok(LoginOutcome::LoggedIn);
        };
        info!(indexer = %self.definition.id, method = ?spec.method, "Logging in");
        session.state = LoginState::LoggingIn;

        let result = self.run(spec, session).await;
        match &result {
            Ok(LoginOutcome::LoggedIn) => {
                session.state = LoginState::LoggedIn;
                info!(indexer = %self.definition.id, "Logged in");
            }
            Ok(LoginOutcome::CaptchaRequired(_)) => {
                session.state = LoginState::CaptchaRequired;
                info!(indexer = %self.definition.id, "Login needs a captcha answer");
            }
            Err(e) => {
                session.state = LoginState::Failed;
                warn!(indexer = %self.definition.id, error = %e, "Login failed");
            }
        }
        result
    }

    async fn run(&self, spec: &LoginSpec, session: &mut LoginSession) -> Result<LoginOutcome> {
        let ctx = base_context(self.definition, self.settings, &session.site_link);
        match spec.method {
            LoginMethod::Post => {
                let url = resolve_url(&session.site_link, &expand(&spec.path, &ctx)?)?;
                let body = RequestBody::Form(expand_pairs(&spec.inputs, &ctx)?);
                session.cookies.clear();
                let request = self.request(spec, &ctx, HttpRequest::post(url, body))?;
                let response = send(self.client, request, &mut session.cookies, Follow::Any).await?;
                check_response(spec, &response, &ctx)?;
            }
            LoginMethod::Form => {
                if let Some(challenge) = self.login_form(spec, &ctx, session).await? {
                    return Ok(LoginOutcome::CaptchaRequired(challenge));
                }
            }
            LoginMethod::Cookie => {
                let cookie = self.settings.text("cookie").unwrap_or_default();
                session.cookies = CookieJar::parse(&cookie);
                if session.cookies.is_empty() {
                    return Err(CardigannError::Login("no cookie configured".to_string()));
                }
            }
            LoginMethod::Get => {
                let url = resolve_url(&session.site_link, &expand(&spec.path, &ctx)?)?;
                let query = build_query_string(&expand_pairs(&spec.inputs, &ctx)?);
                let url = append_query(&url, &query);
                let request = self.request(spec, &ctx, HttpRequest::get(url))?;
                let response = send(self.client, request, &mut session.cookies, Follow::Any).await?;
                check_response(spec, &response, &ctx)?;
            }
            LoginMethod::Oneurl => {
                let oneurl = spec
                    .inputs
                    .iter()
                    .find(|(k, _)| k == "oneurl")
                    .map(|(_, v)| expand(v, &ctx))
                    .transpose()?
                    .unwrap_or_default();
                let path = format!("{}{}", expand(&spec.path, &ctx)?, oneurl);
                let url = resolve_url(&session.site_link, &path)?;
                let request = self.request(spec, &ctx, HttpRequest::get(url))?;
                let response = send(self.client, request, &mut session.cookies, Follow::Any).await?;
                check_response(spec, &response, &ctx)?;
            }
        }
        self.test_login(session).await?;
        Ok(LoginOutcome::LoggedIn)
    }

    /// Fills in and submits the login form
    ///
    /// Returns the challenge when a captcha answer is missing.
    async fn login_form(
        &self,
        spec: &LoginSpec,
        ctx: &TemplateContext,
        session: &mut LoginSession,
    ) -> Result<Option<CaptchaChallenge>> {
        let landing = match session.pending.take() {
            Some(landing) if self.captcha.is_some() => landing,
            _ => {
                let url = resolve_url(&session.site_link, &expand(&spec.path, ctx)?)?;
                let follow = if self.definition.followredirect {
                    Follow::Any
                } else {
                    Follow::None
                };
                let request = self.request(spec, ctx, HttpRequest::get(url))?;
                let response = send(self.client, request, &mut session.cookies, follow).await?;
                if !response.is_success() {
                    return Err(CardigannError::Login(format!(
                        "login page {} answered with status {}",
                        response.url, response.status
                    )));
                }
                LandingPage {
                    url: response.url,
                    body: response.body,
                }
            }
        };

        let mut plan = plan_form(spec, &landing, ctx, self.captcha)?;
        if let Some(mut challenge) = plan.challenge.take() {
            challenge.cookies = session.cookies.header();
            session.pending = Some(landing);
            return Ok(Some(challenge));
        }

        if plan.simple_captcha {
            let url = resolve_url(&session.site_link, "simpleCaptcha.php?numImages=1")?;
            let request = HttpRequest::get(url);
            let response = send(self.client, request, &mut session.cookies, Follow::None).await?;
            let json: serde_json::Value = serde_json::from_str(&response.body).map_err(|e| {
                CardigannError::ParseError(format!("Invalid simpleCaptcha response: {}", e))
            })?;
            let hash = json["images"][0]["hash"].as_str().ok_or_else(|| {
                CardigannError::Login("simpleCaptcha response has no image hash".to_string())
            })?;
            debug!(hash, "Solved simpleCaptcha");
            set_pair(&mut plan.fields, "captchaSelection", hash.to_string());
            set_pair(&mut plan.fields, "submitme", "X".to_string());
        }

        let url = append_query(&plan.action, &build_query_string(&plan.query));
        let body = if plan.multipart {
            RequestBody::Multipart(plan.fields)
        } else {
            RequestBody::Form(plan.fields)
        };
        let request = self
            .request(spec, ctx, HttpRequest::post(url, body))?
            .with_header("Referer", landing.url.clone());
        let response = send(self.client, request, &mut session.cookies, Follow::Any).await?;
        check_response(spec, &response, ctx)?;
        Ok(None)
    }

    /// Fetches the login test page and checks the session is valid
    ///
    /// A redirect to another host fails with a hint naming the new site link.
    /// When the definition follows redirects the session's site link is
    /// updated as well; the login still fails so the caller retries against
    /// the new link.
    ///
    /// # Errors
    /// Returns [`CardigannError::Login`] when the test page redirects or lacks
    /// the test selector.
    pub async fn test_login(&self, session: &mut LoginSession) -> Result<()> {
        let Some(test) = self.definition.login.as_ref().and_then(|l| l.test.as_ref()) else {
            return Ok(());
        };
        let ctx = base_context(self.definition, self.settings, &session.site_link);
        let url = resolve_url(&session.site_link, &expand(&test.path, &ctx)?)?;
        let request = HttpRequest::get(url).with_encoding(self.definition.encoding.clone());
        let response = send(self.client, request, &mut session.cookies, Follow::None).await?;

        if let Some(moved) = site_moved(&response) {
            let mut message = format!("login test page: {}", moved);
            if self.definition.followredirect
                && let CardigannError::SiteMoved { target, origin } = moved
            {
                let known = self.definition.knows_link(&target);
                info!(from = %session.site_link, to = %origin, known, "Updating site link");
                session.site_link = origin;
                message.push_str(". Updated site link, please try again");
            }
            return Err(CardigannError::Login(message));
        }
        if let Some(target) = response.redirect.as_deref().filter(|_| response.is_redirect()) {
            return Err(CardigannError::Login(format!(
                "login test got redirected to {}",
                target
            )));
        }
        if !response.is_success() {
            return Err(CardigannError::Login(format!(
                "login test answered with status {}",
                response.status
            )));
        }
        if let Some(selector) = &test.selector
            && !selector_present(&response.body, &expand(selector, &ctx)?)?
        {
            return Err(CardigannError::Login(format!(
                "login test selector {} not found, check your credentials",
                selector
            )));
        }
        Ok(())
    }

    fn request(
        &self,
        spec: &LoginSpec,
        ctx: &TemplateContext,
        request: HttpRequest,
    ) -> Result<HttpRequest> {
        Ok(request
            .with_headers(expand_pairs(&spec.headers, ctx)?)
            .with_encoding(self.definition.encoding.clone()))
    }
}

/// [`CardigannError::SiteMoved`] when `response` redirects to another host
pub(crate) fn site_moved(response: &HttpResponse) -> Option<CardigannError> {
    let target = response.redirect.as_deref().filter(|_| response.is_redirect())?;
    if host_of(target) == host_of(&response.url) {
        return None;
    }
    Some(CardigannError::SiteMoved {
        target: target.to_string(),
        origin: origin_of(target)?,
    })
}

/// Whether a search response means the session is gone
///
/// Redirects on the same host always count; HTML bodies also count when
/// they lack the login test selector. Redirects to another host are reported
/// by [`site_moved`] instead.
pub(crate) fn looks_logged_out(
    spec: &LoginSpec,
    response: &HttpResponse,
    kind: ResponseKind,
    ctx: &TemplateContext,
) -> Result<bool> {
    if response.is_redirect() {
        return Ok(site_moved(response).is_none());
    }
    match spec.test.as_ref().and_then(|t| t.selector.as_ref()) {
        Some(selector) if kind == ResponseKind::Html => {
            Ok(!selector_present(&response.body, &expand(selector, ctx)?)?)
        }
        _ => Ok(false),
    }
}

fn selector_present(body: &str, selector: &str) -> Result<bool> {
    let document = Html::parse_document(body);
    Ok(query_first(document_root(&document), selector)?.is_some())
}

/// Rejects error statuses and pages matching a login error selector
fn check_response(spec: &LoginSpec, response: &HttpResponse, ctx: &TemplateContext) -> Result<()> {
    if response.status >= 400 {
        return Err(CardigannError::Login(format!(
            "{} answered with status {}",
            response.url, response.status
        )));
    }
    match find_error(&spec.error, &response.body, ctx)? {
        Some(message) => Err(CardigannError::Login(message)),
        None => Ok(()),
    }
}

/// Message of the first error selector matching `body`
fn find_error(
    errors: &[ErrorSelector],
    body: &str,
    ctx: &TemplateContext,
) -> Result<Option<String>> {
    if errors.is_empty() {
        return Ok(None);
    }
    let document = Html::parse_document(body);
    error_message(errors, document_root(&document), ctx)
}

/// Message of the first error selector matching below `root`
///
/// The message block is evaluated from the document root; without one the
/// text of the matched element is used.
pub(crate) fn error_message(
    errors: &[ErrorSelector],
    root: ElementRef<'_>,
    ctx: &TemplateContext,
) -> Result<Option<String>> {
    for error in errors {
        let Some(element) = query_first(root, &error.selector)? else {
            continue;
        };
        let message = match &error.message {
            Some(block) => html::extract(block, root, ctx, false)?,
            None => None,
        };
        return Ok(Some(message.unwrap_or_else(|| element_text(element, &[]))));
    }
    Ok(None)
}

fn plan_form(
    spec: &LoginSpec,
    landing: &LandingPage,
    ctx: &TemplateContext,
    captcha: Option<&str>,
) -> Result<FormPlan> {
    let document = Html::parse_document(&landing.body);
    let root = document_root(&document);
    let form_selector = spec.form.as_deref().unwrap_or("form");
    let form = query_first(root, form_selector)?.ok_or_else(|| {
        CardigannError::Login(format!(
            "login form {} not found on {}",
            form_selector, landing.url
        ))
    })?;

    let mut fields = Vec::new();
    for input in query_all(form, "input")? {
        let element = input.value();
        let Some(name) = element.attr("name") else { continue };
        if element.attr("disabled").is_some() {
            continue;
        }
        let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();
        if (kind == "checkbox" || kind == "radio") && element.attr("checked").is_none() {
            continue;
        }
        set_pair(&mut fields, name, element.attr("value").unwrap_or_default().to_string());
    }
    for select in query_all(form, "select")? {
        let Some(name) = select.value().attr("name") else { continue };
        if select.value().attr("disabled").is_some() {
            continue;
        }
        let option = match query_first(select, "option[selected]")? {
            Some(option) => Some(option),
            None => query_first(select, "option")?,
        };
        if let Some(option) = option {
            let value = match option.value().attr("value") {
                Some(value) => value.to_string(),
                None => element_text(option, &[]),
            };
            set_pair(&mut fields, name, value);
        }
    }
    for textarea in query_all(form, "textarea")? {
        if let Some(name) = textarea.value().attr("name") {
            set_pair(&mut fields, name, textarea.text().collect());
        }
    }

    for (key, template) in &spec.inputs {
        let value = expand(template, ctx)?;
        let name = if spec.selectors {
            let element = query_first(root, key)?.ok_or_else(|| {
                CardigannError::Login(format!("login input selector {} not found", key))
            })?;
            element
                .value()
                .attr("name")
                .ok_or_else(|| CardigannError::Login(format!("login input {} has no name", key)))?
                .to_string()
        } else {
            key.clone()
        };
        set_pair(&mut fields, &name, value);
    }
    for (name, block) in &spec.selectorinputs {
        let value = html::extract(block, root, ctx, true)?.unwrap_or_default();
        set_pair(&mut fields, name, value);
    }
    let mut query = Vec::new();
    for (name, block) in &spec.getselectorinputs {
        let value = html::extract(block, root, ctx, true)?.unwrap_or_default();
        set_pair(&mut query, name, value);
    }

    let simple_captcha = query_first(root, "script[src*=\"simpleCaptcha\"]")?.is_some();

    let mut challenge = None;
    if let Some(captcha_spec) = &spec.captcha {
        match captcha {
            Some(answer) => set_pair(&mut fields, &captcha_spec.input, answer.to_string()),
            None => {
                let element = query_first(root, &captcha_spec.selector)?;
                challenge = Some(CaptchaChallenge {
                    kind: captcha_spec.kind,
                    input: captcha_spec.input.clone(),
                    image_url: match captcha_spec.kind {
                        CaptchaKind::Image => element
                            .and_then(|e| e.value().attr("src"))
                            .map(|src| resolve_url(&landing.url, src))
                            .transpose()?,
                        CaptchaKind::Text => None,
                    },
                    text: match captcha_spec.kind {
                        CaptchaKind::Text => element.map(|e| element_text(e, &[])),
                        CaptchaKind::Image => None,
                    },
                    cookies: None,
                });
            }
        }
    }

    let action = match &spec.submitpath {
        Some(path) => resolve_url(&landing.url, &expand(path, ctx)?)?,
        None => resolve_url(&landing.url, form.value().attr("action").unwrap_or_default())?,
    };
    let multipart = form
        .value()
        .attr("enctype")
        .is_some_and(|e| e.eq_ignore_ascii_case("multipart/form-data"));

    Ok(FormPlan {
        action,
        multipart,
        fields,
        query,
        simple_captcha,
        challenge,
    })
}

/// Inserts or replaces a form field, keeping the original position
fn set_pair(pairs: &mut Vec<(String, String)>, name: &str, value: String) {
    match pairs.iter_mut().find(|(k, _)| k == name) {
        Some(pair) => pair.1 = value,
        None => pairs.push((name.to_string(), value)),
    }
}

pub(crate) fn expand_pairs(
    pairs: &[(String, String)],
    ctx: &TemplateContext,
) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|(k, v)| Ok((k.clone(), expand(v, ctx)?)))
        .collect()
}
