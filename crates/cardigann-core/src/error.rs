//! Error types for the definition interpreter
//!
//! Provides a single error enum with human-readable messages
//! and string serialization for front ends.

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Error type for all interpreter operations
///
/// Implements Display for human-readable messages and Serialize
/// so front ends can forward the message as-is.
#[derive(Error, Debug)]
pub enum CardigannError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Server answered with a status the request did not expect
    #[error("Unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    /// Response body could not be parsed
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Definition is structurally invalid
    #[error("Invalid definition: {0}")]
    Config(String),

    /// Template expansion failed
    #[error("Template error: {0}")]
    Template(String),

    /// A filter rejected its input
    #[error("Filter {name} failed: {message}")]
    Filter { name: String, message: String },

    /// A required selector did not match
    #[error("Selector \"{selector}\" didn't match {context}")]
    Selector { selector: String, context: String },

    /// Authentication failed
    #[error("Login failed: {0}")]
    Login(String),

    /// The tracker redirected to another domain
    #[error("Redirected to {target}, try changing the site link to {origin}")]
    SiteMoved { target: String, origin: String },

    /// The session expired and logging in again did not help
    #[error("Relogin failed: {0}")]
    Relogin(String),

    /// The search page reported an error
    #[error("Search error: {0}")]
    SearchPage(String),

    /// Invalid URL format
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Rate limited by server (HTTP 429)
    #[error("Rate limited - too many requests")]
    RateLimited,

    /// Every configured search path failed
    #[error("All search paths failed: {}", .0.join("; "))]
    AllPathsFailed(Vec<String>),
}

impl CardigannError {
    pub(crate) fn filter(name: &str, message: impl Into<String>) -> Self {
        Self::Filter {
            name: name.to_string(),
            message: message.into(),
        }
    }

    /// Whether the error only concerns the current field or row
    pub fn is_extraction(&self) -> bool {
        matches!(self, Self::Selector { .. } | Self::Filter { .. })
    }
}

impl From<serde_yaml::Error> for CardigannError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl Serialize for CardigannError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Result type alias for interpreter operations
pub type Result<T> = std::result::Result<T, CardigannError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_parse_error() {
        let error = CardigannError::ParseError("invalid JSON".to_string());
        assert_eq!(error.to_string(), "Failed to parse response: invalid JSON");
    }

    #[test]
    fn test_error_display_selector() {
        let error = CardigannError::Selector {
            selector: "td.size".to_string(),
            context: "<tr></tr>".to_string(),
        };
        assert_eq!(error.to_string(), "Selector \"td.size\" didn't match <tr></tr>");
        assert!(error.is_extraction());
    }

    #[test]
    fn test_error_display_filter() {
        let error = CardigannError::filter("split", "index 4 out of range");
        assert_eq!(error.to_string(), "Filter split failed: index 4 out of range");
        assert!(error.is_extraction());
    }

    #[test]
    fn test_error_display_status() {
        let error = CardigannError::Status {
            status: 503,
            url: "https://tracker.test/browse".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Unexpected HTTP status 503 from https://tracker.test/browse"
        );
        assert!(!error.is_extraction());
    }

    #[test]
    fn test_error_display_site_moved() {
        let error = CardigannError::SiteMoved {
            target: "https://new.test/browse.php".to_string(),
            origin: "https://new.test/".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Redirected to https://new.test/browse.php, try changing the site link to https://new.test/"
        );
    }

    #[test]
    fn test_error_display_all_paths_failed() {
        let error = CardigannError::AllPathsFailed(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(error.to_string(), "All search paths failed: a; b");
    }

    #[test]
    fn test_error_display_rate_limited() {
        let error = CardigannError::RateLimited;
        assert_eq!(error.to_string(), "Rate limited - too many requests");
    }

    #[test]
    fn test_error_serialize() {
        let error = CardigannError::Login("bad password".to_string());
        let json = serde_json::to_string(&error).expect("Serialization should succeed");
        assert_eq!(json, "\"Login failed: bad password\"");
    }

    #[test]
    fn test_yaml_error_becomes_config_error() {
        let err = serde_yaml::from_str::<Vec<u32>>("{ not: a list").unwrap_err();
        let error: CardigannError = err.into();
        assert!(matches!(error, CardigannError::Config(_)));
    }
}
