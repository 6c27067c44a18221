//! Cardigann Core Library
//!
//! Interprets declarative tracker definitions: YAML documents describing how
//! to log into a torrent tracker, how to search it and how to turn its result
//! pages into normalized records.
//!
//! # Overview
//!
//! A definition is executed by a handful of cooperating parts:
//! - Template expansion of `{{ ... }}` actions against a variable context
//! - A named filter pipeline applied to every extracted value
//! - CSS selectors for HTML/XML pages and path selectors for JSON bodies
//! - A login state machine covering post, form, cookie, get and one-url logins
//! - A search executor running every selected path with one relogin on expiry
//! - A field mapper normalizing sizes, dates, categories, peers and ids
//!
//! # Example
//!
//! ```no_run
//! use cardigann_core::{Definition, Indexer, IndexerSettings, Result, SearchQuery};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let yaml = std::fs::read_to_string("mytracker.yml").unwrap_or_default();
//!     let definition = Definition::from_yaml(&yaml)?;
//!     let settings = IndexerSettings::new()
//!         .with_text("username", "alice")
//!         .with_text("password", "secret");
//!     let indexer = Indexer::new(definition, settings)?;
//!
//!     indexer.login().await?;
//!     let response = indexer.search(&SearchQuery::new("ubuntu")).await?;
//!     for record in &response.records {
//!         println!("{} ({:?} bytes)", record.title, record.size);
//!     }
//!     for error in &response.errors {
//!         eprintln!("{}: {}", error.path, error.message);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Sessions
//!
//! [`Indexer::search`] logs in first when the session holds no cookies. When
//! a search response looks logged out (a redirect, or an HTML page without
//! the login test selector) the indexer logs in once and retries that
//! request; a second logged-out response fails the query with
//! [`CardigannError::Relogin`].

pub mod categories;
mod client;
mod context;
pub mod dates;
mod definition;
mod error;
pub mod fields;
pub mod filters;
mod indexer;
mod login;
mod record;
mod search;
pub mod selector;
mod settings;
pub mod template;
pub mod url;

// Re-export client types
pub use client::{
    ClientConfig, CookieJar, Follow, HttpClient, HttpMethod, HttpRequest, HttpResponse,
    RateLimiter, RequestBody, ReqwestClient, send,
};

// Re-export error types
pub use error::{CardigannError, Result};

// Re-export definition types
pub use definition::{
    BeforeSpec, Capabilities, CaptchaKind, CaptchaSpec, CategoryMapping, Definition, DownloadSpec,
    ErrorSelector, FilterArgs, FilterSpec, InfohashSpec, LoginMethod, LoginSpec, LoginTest,
    ResponseKind, ResponseSpec, RowsBlock, SearchPath, SearchSpec, SelectorBlock, SettingItem,
    SettingKind,
};

// Re-export the interpreter API
pub use context::{add_query, base_context};
pub use indexer::Indexer;
pub use login::{Authenticator, CaptchaChallenge, LoginOutcome, LoginSession, LoginState};
pub use record::{PathError, QueryType, ResultRecord, SearchQuery, SearchResponse};
pub use search::SearchExecutor;
pub use settings::{IndexerSettings, SettingValue};
