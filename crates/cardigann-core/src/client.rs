//! HTTP transport with rate limiting and retry logic
//!
//! The interpreter talks to trackers through the [`HttpClient`] trait so
//! tests and embedders can swap the transport. [`ReqwestClient`] is the
//! default implementation: it never follows redirects on its own, reports
//! the redirect target instead, and spaces requests per the site's delay.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::debug;

use crate::error::{CardigannError, Result};
use crate::url::{host_of, resolve_url};

/// Transport settings for [`ReqwestClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request budget per second; a definition's `requestDelay` lowers it
    pub requests_per_second: f64,
    /// Per-request timeout, seconds
    pub timeout_secs: u64,
    /// Retries after 429, 5xx, timeouts and refused connections
    pub max_retries: u32,
    /// Trust invalid or self-signed TLS certificates (default: false)
    pub accept_invalid_certs: bool,
    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 2.0,
            timeout_secs: 30,
            max_retries: 3,
            accept_invalid_certs: false,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl ClientConfig {
    /// Derives the request rate from a definition's `requestDelay` in seconds
    pub fn with_request_delay(mut self, delay_secs: Option<f64>) -> Self {
        if let Some(delay) = delay_secs.filter(|d| *d > 0.0) {
            self.requests_per_second = 1.0 / delay;
        }
        self
    }
}

/// Spaces consecutive requests to one tracker
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Arc<Mutex<Instant>>,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        let gap = Duration::from_secs_f64(1.0 / requests_per_second);
        let now = Instant::now();
        // The first request goes out immediately
        let previous = now.checked_sub(gap).unwrap_or(now);
        Self {
            min_interval: gap,
            last_request: Arc::new(Mutex::new(previous)),
        }
    }

    /// Waits out the remainder of the gap since the previous request
    pub async fn acquire(&self) {
        let mut previous = self.last_request.lock().await;
        if let Some(remaining) = self.min_interval.checked_sub(previous.elapsed()) {
            sleep(remaining).await;
        }
        *previous = Instant::now();
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// Request payload
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    /// `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
    /// `multipart/form-data`
    Multipart(Vec<(String, String)>),
}

/// A single request as the interpreter describes it
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Value for the `Cookie` header
    pub cookies: Option<String>,
    pub body: RequestBody,
    /// Charset used to decode the body when the server doesn't declare one
    pub encoding: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            cookies: None,
            body: RequestBody::Empty,
            encoding: None,
        }
    }

    pub fn post(url: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method: HttpMethod::Post,
            body,
            ..Self::get(url)
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_encoding(mut self, encoding: Option<String>) -> Self {
        self.encoding = encoding;
        self
    }
}

/// What came back from the server
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    /// URL the request was sent to
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Cookies set by the response (`Set-Cookie`), name and value only
    pub cookies: Vec<(String, String)>,
    /// Absolute redirect target when the server answered with a redirect
    pub redirect: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status) && self.redirect.is_some()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Transport seam used by the login state machine and the search executor
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Cookies of one tracker session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    /// Parses a `name=value; name2=value2` header string
    pub fn parse(header: &str) -> Self {
        let mut jar = Self::default();
        for part in header.split(';') {
            if let Some((name, value)) = part.split_once('=') {
                let name = name.trim();
                if !name.is_empty() {
                    jar.cookies.insert(name.to_string(), value.trim().to_string());
                }
            }
        }
        jar
    }

    pub fn merge(&mut self, cookies: &[(String, String)]) {
        for (name, value) in cookies {
            self.cookies.insert(name.clone(), value.clone());
        }
    }

    pub fn clear(&mut self) {
        self.cookies.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// `Cookie` header value, `None` when the jar is empty
    pub fn header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// How [`send`] treats redirect responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Follow {
    None,
    /// Follow only while the target stays on the same host
    SameHost,
    Any,
}

const MAX_REDIRECTS: usize = 5;

/// Sends a request with the jar's cookies, storing cookies the server sets
///
/// Redirects are followed with GET requests per `follow`. The last response
/// is returned, which is still a redirect when following stopped early.
pub async fn send(
    client: &dyn HttpClient,
    request: HttpRequest,
    jar: &mut CookieJar,
    follow: Follow,
) -> Result<HttpResponse> {
    let headers = request.headers.clone();
    let encoding = request.encoding.clone();
    let mut request = request;

    for _ in 0..=MAX_REDIRECTS {
        request.cookies = jar.header();
        debug!(method = ?request.method, url = %request.url, "Sending request");
        let response = client.execute(request).await?;
        jar.merge(&response.cookies);

        let Some(target) = response.redirect.clone().filter(|_| response.is_redirect()) else {
            return Ok(response);
        };
        let keep_going = match follow {
            Follow::None => false,
            Follow::Any => true,
            Follow::SameHost => host_of(&target) == host_of(&response.url),
        };
        if !keep_going {
            return Ok(response);
        }
        debug!(from = %response.url, to = %target, "Following redirect");
        request = HttpRequest::get(target)
            .with_headers(headers.clone())
            .with_encoding(encoding.clone());
    }

    Err(CardigannError::ParseError("Too many redirects".to_string()))
}

/// reqwest-backed [`HttpClient`]
///
/// Requests are throttled by a [`RateLimiter`] and transient failures are
/// retried with a doubling backoff. Redirects are never followed here; the
/// login and relogin logic inspect them through [`send`].
pub struct ReqwestClient {
    client: reqwest::Client,
    rate_limiter: RateLimiter,
    max_retries: u32,
}

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(CardigannError::HttpError)?;

        Ok(Self {
            client,
            rate_limiter: RateLimiter::new(config.requests_per_second),
            max_retries: config.max_retries,
        })
    }

    /// One attempt, no retries
    async fn do_execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(cookies) = &request.cookies {
            builder = builder.header(reqwest::header::COOKIE, cookies.as_str());
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Form(pairs) => builder.form(pairs),
            RequestBody::Multipart(pairs) => {
                let form = pairs
                    .iter()
                    .fold(reqwest::multipart::Form::new(), |form, (k, v)| {
                        form.text(k.clone(), v.clone())
                    });
                builder.multipart(form)
            }
        };

        let response = builder.send().await.map_err(CardigannError::HttpError)?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CardigannError::RateLimited);
        }
        if status.is_server_error() {
            return Err(CardigannError::Status {
                status: status.as_u16(),
                url: request.url.clone(),
            });
        }

        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let cookies = headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("set-cookie"))
            .filter_map(|(_, v)| parse_set_cookie(v))
            .collect();
        let redirect = if status.is_redirection() {
            response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|l| l.to_str().ok())
                .and_then(|l| resolve_url(&request.url, l).ok())
        } else {
            None
        };
        let body = match &request.encoding {
            Some(encoding) => response.text_with_charset(encoding).await,
            None => response.text().await,
        }
        .map_err(CardigannError::HttpError)?;

        Ok(HttpResponse {
            status: status.as_u16(),
            url: request.url.clone(),
            headers,
            cookies,
            redirect,
            body,
        })
    }

    fn is_retryable(error: &CardigannError) -> bool {
        match error {
            CardigannError::RateLimited | CardigannError::Status { .. } => true,
            CardigannError::HttpError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Limiter shared by every request this client sends
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut retries = 0u32;
        loop {
            self.rate_limiter.acquire().await;
            let error = match self.do_execute(&request).await {
                Ok(response) => return Ok(response),
                Err(e) if retries < self.max_retries && Self::is_retryable(&e) => e,
                Err(e) => return Err(e),
            };
            let delay = Duration::from_secs(1u64 << retries.min(6));
            debug!(url = %request.url, retries, ?delay, error = %error, "Retrying request");
            sleep(delay).await;
            retries += 1;
        }
    }
}

/// `name=value; Path=/; HttpOnly` → `(name, value)`
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

/// Test transport answering from a queue and recording every request
#[cfg(test)]
pub(crate) mod scripted {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub(crate) struct ScriptedClient {
        responses: Mutex<VecDeque<HttpResponse>>,
        pub(crate) requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedClient {
        pub(crate) fn new(responses: Vec<HttpResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn sent(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            let url = request.url.clone();
            self.requests.lock().unwrap().push(request);
            let mut response = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected request to {}", url));
            response.url = url;
            Ok(response)
        }
    }

    pub(crate) fn ok(body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            body: body.to_string(),
            ..HttpResponse::default()
        }
    }

    pub(crate) fn redirect(target: &str) -> HttpResponse {
        HttpResponse {
            status: 302,
            redirect: Some(target.to_string()),
            ..HttpResponse::default()
        }
    }

    pub(crate) fn with_cookie(mut response: HttpResponse, name: &str, value: &str) -> HttpResponse {
        response.cookies.push((name.to_string(), value.to_string()));
        response
    }
}
