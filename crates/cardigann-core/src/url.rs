//! URL helper functions
//!
//! Provides URL resolution against a site link and the form-style query
//! string encoding definitions expect.

use url::Url;

use crate::error::{CardigannError, Result};

/// Resolves `path` against `base`
///
/// Absolute URLs are returned as-is, relative ones follow RFC 3986 rules.
///
/// # Arguments
/// * `base` - Base URL, usually the site link or the page the path came from
/// * `path` - Absolute or relative reference
///
/// # Errors
/// Returns [`CardigannError::InvalidUrl`] if either part cannot be parsed.
///
/// # Example
/// ```
/// use cardigann_core::url::resolve_url;
/// let url = resolve_url("https://tracker.test/", "browse.php?c=1").unwrap();
/// assert_eq!(url, "https://tracker.test/browse.php?c=1");
/// ```
pub fn resolve_url(base: &str, path: &str) -> Result<String> {
    let base =
        Url::parse(base).map_err(|e| CardigannError::InvalidUrl(format!("{}: {}", base, e)))?;
    let joined = base
        .join(path.trim())
        .map_err(|e| CardigannError::InvalidUrl(format!("{}: {}", path, e)))?;
    Ok(joined.to_string())
}

/// Host part of a URL, `None` for relative or malformed input
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_string)
}

/// `scheme://host[:port]/` of a URL
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}://{}:{}/", parsed.scheme(), host, port),
        None => format!("{}://{}/", parsed.scheme(), host),
    })
}

/// Form-style encoding: space becomes `+`, everything but unreserved is escaped
///
/// # Example
/// ```
/// use cardigann_core::url::form_encode;
/// assert_eq!(form_encode("ubuntu server&x"), "ubuntu+server%26x");
/// ```
pub fn form_encode(value: &str) -> String {
    urlencoding::encode(value).replace("%20", "+")
}

/// Inverse of [`form_encode`]; malformed escapes are kept literally
pub fn form_decode(value: &str) -> String {
    let spaced = value.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// Encodes pairs as `k=v&k2=v2`
pub fn build_query_string(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", form_encode(k), form_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Splits an already-encoded `k=v&k2=v2` string, skipping empty keys
///
/// Keys and values stay encoded.
pub fn split_raw_query(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter_map(|part| {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            if key.is_empty() {
                None
            } else {
                Some((key.to_string(), value.to_string()))
            }
        })
        .collect()
}

/// Appends an encoded query string to a URL, choosing `?` or `&`
pub fn append_query(url: &str, query: &str) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, query)
}

/// Value of a query parameter in a URL or bare query string
///
/// # Example
/// ```
/// use cardigann_core::url::query_param;
/// assert_eq!(query_param("details.php?id=42&hit=1", "id"), Some("42".to_string()));
/// ```
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let query = match url.split_once('?') {
        Some((_, query)) => query,
        None => url,
    };
    let query = query.split('#').next().unwrap_or(query);
    split_raw_query(query)
        .into_iter()
        .find(|(k, _)| form_decode(k) == name)
        .map(|(_, v)| form_decode(&v))
}
