//! Tracker definition data model
//!
//! A definition is a YAML document describing how to log in to a tracker,
//! how to search it and how to read its result pages. It is deserialized
//! once per indexer and never mutated afterwards.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::client::HttpMethod;
use crate::error::{CardigannError, Result};
use crate::filters::{FilterKind, validate_filter};
use crate::selector::html::validate_css;

/// Root of a tracker definition document
#[derive(Debug, Clone, Deserialize)]
pub struct Definition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Site links, the first one is the default
    pub links: Vec<String>,
    /// Former site links, still recognized when a tracker redirects
    #[serde(default)]
    pub legacylinks: Vec<String>,
    #[serde(default)]
    pub encoding: Option<String>,
    /// Minimum delay between requests, in seconds
    #[serde(default, rename = "requestDelay")]
    pub request_delay: Option<f64>,
    #[serde(default)]
    pub followredirect: bool,
    #[serde(default)]
    pub settings: Vec<SettingItem>,
    #[serde(default)]
    pub caps: Capabilities,
    #[serde(default)]
    pub login: Option<LoginSpec>,
    pub search: SearchSpec,
    #[serde(default)]
    pub download: Option<DownloadSpec>,
}

/// One user configuration item
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawSetting")]
pub struct SettingItem {
    pub name: String,
    pub label: Option<String>,
    pub kind: SettingKind,
}

/// Closed set of setting item types
#[derive(Debug, Clone, PartialEq)]
pub enum SettingKind {
    Text { default: Option<String> },
    Password,
    Checkbox { default: bool },
    Select { default: Option<String>, options: Vec<(String, String)> },
    MultiSelect { default: Vec<String>, options: Vec<(String, String)> },
    /// Informational only (`info`, `info_cookie`, `info_flaresolverr`, ...)
    Info,
}

#[derive(Deserialize)]
struct RawSetting {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    default: Option<serde_yaml::Value>,
    #[serde(default, deserialize_with = "ordered_scalars")]
    options: Vec<(String, String)>,
}

impl TryFrom<RawSetting> for SettingItem {
    type Error = String;

    fn try_from(raw: RawSetting) -> std::result::Result<Self, Self::Error> {
        let default = raw.default;
        let kind = match raw.kind.as_str() {
            "text" => SettingKind::Text {
                default: default.and_then(scalar_to_string),
            },
            "password" => SettingKind::Password,
            "checkbox" => SettingKind::Checkbox {
                default: default
                    .and_then(scalar_to_string)
                    .is_some_and(|d| d.eq_ignore_ascii_case("true")),
            },
            "select" => SettingKind::Select {
                default: default.and_then(scalar_to_string),
                options: raw.options,
            },
            "multi-select" => SettingKind::MultiSelect {
                default: match default {
                    Some(serde_yaml::Value::Sequence(items)) => {
                        items.into_iter().filter_map(scalar_to_string).collect()
                    }
                    Some(other) => scalar_to_string(other).into_iter().collect(),
                    None => Vec::new(),
                },
                options: raw.options,
            },
            kind if kind == "info" || kind.starts_with("info_") => SettingKind::Info,
            other => {
                return Err(format!(
                    "setting {} has unsupported type {}",
                    raw.name, other
                ));
            }
        };
        Ok(SettingItem {
            name: raw.name,
            label: raw.label,
            kind,
        })
    }
}

/// Category mappings and supported search modes
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub categorymappings: Vec<CategoryMapping>,
    /// Search mode (`search`, `tv-search`, ...) to supported parameters
    #[serde(default)]
    pub modes: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub allowrawsearch: bool,
}

impl Capabilities {
    /// Whether any search mode declares `param` (e.g. `imdbid`) searchable
    pub fn supports_param(&self, param: &str) -> bool {
        self.modes
            .values()
            .any(|params| params.iter().any(|p| p.eq_ignore_ascii_case(param)))
    }
}

/// Maps a tracker category id onto the Newznab taxonomy
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CategoryMapping {
    #[serde(deserialize_with = "scalar")]
    pub id: String,
    #[serde(default)]
    pub cat: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginMethod {
    Post,
    #[default]
    Form,
    Cookie,
    Get,
    Oneurl,
}

/// How to authenticate against the tracker
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginSpec {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub submitpath: Option<String>,
    #[serde(default)]
    pub method: LoginMethod,
    #[serde(default)]
    pub form: Option<String>,
    /// Input keys are DOM selectors resolved to the input's name
    #[serde(default)]
    pub selectors: bool,
    #[serde(default, deserialize_with = "ordered_scalars")]
    pub inputs: Vec<(String, String)>,
    #[serde(default, deserialize_with = "ordered")]
    pub selectorinputs: Vec<(String, SelectorBlock)>,
    #[serde(default, deserialize_with = "ordered")]
    pub getselectorinputs: Vec<(String, SelectorBlock)>,
    #[serde(default)]
    pub captcha: Option<CaptchaSpec>,
    #[serde(default)]
    pub error: Vec<ErrorSelector>,
    #[serde(default)]
    pub test: Option<LoginTest>,
    #[serde(default, deserialize_with = "ordered_scalars")]
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptchaKind {
    Image,
    Text,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CaptchaSpec {
    #[serde(rename = "type")]
    pub kind: CaptchaKind,
    pub selector: String,
    #[serde(default = "default_captcha_input")]
    pub input: String,
}

fn default_captcha_input() -> String {
    "captcha".to_string()
}

/// A selector whose presence signals an error, with an optional message block
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorSelector {
    pub selector: String,
    #[serde(default)]
    pub message: Option<SelectorBlock>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoginTest {
    pub path: String,
    #[serde(default)]
    pub selector: Option<String>,
}

/// How to search the tracker and read the results
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSpec {
    /// Shorthand for a single GET path
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub paths: Vec<SearchPath>,
    #[serde(default, deserialize_with = "ordered_scalars")]
    pub inputs: Vec<(String, String)>,
    #[serde(default, deserialize_with = "ordered_scalars")]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub keywordsfilters: Vec<FilterSpec>,
    #[serde(default)]
    pub preprocessingfilters: Vec<FilterSpec>,
    #[serde(default)]
    pub error: Vec<ErrorSelector>,
    pub rows: RowsBlock,
    #[serde(deserialize_with = "ordered")]
    pub fields: Vec<(String, SelectorBlock)>,
}

impl SearchSpec {
    /// Declared paths, or the `path` shorthand as a single GET path
    pub fn effective_paths(&self) -> Vec<SearchPath> {
        if !self.paths.is_empty() {
            return self.paths.clone();
        }
        self.path
            .iter()
            .map(|path| SearchPath {
                path: path.clone(),
                ..SearchPath::default()
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchPath {
    pub path: String,
    #[serde(default)]
    pub method: HttpMethod,
    /// Allow-list of tracker categories; a leading `!` turns it into a deny-list
    #[serde(default, deserialize_with = "scalar_list")]
    pub categories: Vec<String>,
    #[serde(default, deserialize_with = "ordered_scalars")]
    pub inputs: Vec<(String, String)>,
    #[serde(default = "default_true")]
    pub inheritinputs: bool,
    #[serde(default)]
    pub followredirect: bool,
    #[serde(default)]
    pub response: ResponseSpec,
}

impl Default for SearchPath {
    fn default() -> Self {
        Self {
            path: String::new(),
            method: HttpMethod::Get,
            categories: Vec::new(),
            inputs: Vec::new(),
            inheritinputs: true,
            followredirect: false,
            response: ResponseSpec::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    #[default]
    Html,
    Xml,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResponseSpec {
    #[serde(default, rename = "type")]
    pub kind: ResponseKind,
    #[serde(default, rename = "noResultsMessage")]
    pub no_results_message: Option<String>,
}

/// Row selection for result pages
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RowsBlock {
    pub selector: String,
    /// Number of following rows merged into each row
    #[serde(default)]
    pub after: usize,
    #[serde(default)]
    pub dateheaders: Option<SelectorBlock>,
    /// JSON only: a zero count means no results
    #[serde(default)]
    pub count: Option<SelectorBlock>,
    /// JSON only: unwrap this attribute of every row
    #[serde(default)]
    pub attribute: Option<String>,
    /// JSON only: every row holds several results
    #[serde(default)]
    pub multiple: bool,
    #[serde(default, rename = "missingAttributeEqualsNoResults")]
    pub missing_attribute_equals_no_results: bool,
    /// Row-level filters such as `andmatch`
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

/// How to extract one value
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SelectorBlock {
    #[serde(default)]
    pub selector: Option<String>,
    /// Literal template, used instead of the document
    #[serde(default, deserialize_with = "optional_scalar")]
    pub text: Option<String>,
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default)]
    pub remove: Option<String>,
    #[serde(default, deserialize_with = "ordered_scalars")]
    pub case: Vec<(String, String)>,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default, deserialize_with = "optional_scalar")]
    pub default: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

impl SelectorBlock {
    pub fn selector(selector: &str) -> Self {
        Self {
            selector: Some(selector.to_string()),
            ..Self::default()
        }
    }

    /// Misses of required blocks are extraction errors
    pub fn is_required(&self) -> bool {
        !self.optional && self.default.is_none()
    }
}

/// Filter invocation as written in a definition
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FilterSpec {
    pub name: String,
    #[serde(default)]
    pub args: FilterArgs,
}

/// Filter arguments: nothing, one scalar or a list of scalars
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FilterArgs {
    #[default]
    None,
    Single(String),
    List(Vec<String>),
}

impl FilterArgs {
    /// Argument at `index`, a single argument counts as index 0
    pub fn get(&self, index: usize) -> Option<&str> {
        match self {
            FilterArgs::None => None,
            FilterArgs::Single(arg) => (index == 0).then_some(arg.as_str()),
            FilterArgs::List(args) => args.get(index).map(String::as_str),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FilterArgs::None => 0,
            FilterArgs::Single(_) => 1,
            FilterArgs::List(args) => args.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'de> Deserialize<'de> for FilterArgs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(match serde_yaml::Value::deserialize(deserializer)? {
            serde_yaml::Value::Null => FilterArgs::None,
            serde_yaml::Value::Sequence(items) => FilterArgs::List(
                items
                    .into_iter()
                    .map(|item| scalar_to_string(item).unwrap_or_default())
                    .collect(),
            ),
            other => FilterArgs::Single(
                scalar_to_string(other)
                    .ok_or_else(|| de::Error::custom("filter args must be scalars"))?,
            ),
        })
    }
}

/// Locating the download link on a details page
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadSpec {
    #[serde(default)]
    pub selectors: Vec<SelectorBlock>,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub before: Option<BeforeSpec>,
    #[serde(default)]
    pub infohash: Option<InfohashSpec>,
}

/// Request issued before the details page is read
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BeforeSpec {
    pub path: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default, deserialize_with = "ordered_scalars")]
    pub inputs: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InfohashSpec {
    pub hash: SelectorBlock,
    pub title: SelectorBlock,
}

impl Definition {
    /// Parses and validates a YAML definition
    ///
    /// # Errors
    /// Returns [`CardigannError::Config`] for malformed YAML, unknown filters,
    /// missing filter arguments, unusable login recipes or invalid selectors.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let definition: Definition = serde_yaml::from_str(yaml)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Default site link
    pub fn site_link(&self) -> Option<&str> {
        self.links.first().map(String::as_str)
    }

    /// Whether `link` is one of the current or legacy links
    pub fn knows_link(&self, link: &str) -> bool {
        let host = crate::url::host_of(link);
        host.is_some()
            && self
                .links
                .iter()
                .chain(&self.legacylinks)
                .any(|known| crate::url::host_of(known) == host)
    }

    /// Structural validation
    ///
    /// # Errors
    /// Returns [`CardigannError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.links.is_empty() {
            return Err(config("definition has no links"));
        }
        let paths = self.search.effective_paths();
        if paths.is_empty() {
            return Err(config("search has neither path nor paths"));
        }
        let css = paths.iter().all(|p| p.response.kind != ResponseKind::Json);

        check_filters(&self.search.keywordsfilters, "search.keywordsfilters")?;
        check_filters(&self.search.preprocessingfilters, "search.preprocessingfilters")?;
        for filter in &self.search.rows.filters {
            match FilterKind::parse(&filter.name) {
                Some(FilterKind::AndMatch | FilterKind::StrDump) => {}
                _ => {
                    return Err(config(format!(
                        "unsupported row filter {} in search.rows",
                        filter.name
                    )));
                }
            }
        }
        if css {
            check_css(&self.search.rows.selector, "search.rows")?;
        }
        if let Some(block) = &self.search.rows.dateheaders {
            check_block(block, "search.rows.dateheaders", css)?;
        }
        if let Some(block) = &self.search.rows.count {
            check_block(block, "search.rows.count", false)?;
        }
        for error in &self.search.error {
            check_error_selector(error, "search.error", css)?;
        }
        if !self.search.fields.iter().any(|(key, _)| field_name(key) == "title") {
            return Err(config("search.fields has no title"));
        }
        for (key, block) in &self.search.fields {
            check_block(block, &format!("search.fields.{}", key), css)?;
        }

        if let Some(login) = &self.login {
            self.validate_login(login)?;
        }

        if let Some(download) = &self.download {
            for (i, block) in download.selectors.iter().enumerate() {
                check_block(block, &format!("download.selectors[{}]", i), true)?;
            }
            if let Some(infohash) = &download.infohash {
                check_block(&infohash.hash, "download.infohash.hash", true)?;
                check_block(&infohash.title, "download.infohash.title", true)?;
            }
        }
        Ok(())
    }

    fn validate_login(&self, login: &LoginSpec) -> Result<()> {
        match login.method {
            LoginMethod::Post | LoginMethod::Form | LoginMethod::Get => {
                if login.path.is_empty() {
                    return Err(config(format!(
                        "login method {:?} needs login.path",
                        login.method
                    )));
                }
            }
            LoginMethod::Oneurl => {
                if !login.inputs.iter().any(|(k, _)| k == "oneurl") {
                    return Err(config("login method oneurl needs inputs.oneurl"));
                }
            }
            LoginMethod::Cookie => {
                if !self.settings.iter().any(|s| s.name == "cookie") {
                    return Err(config("login method cookie needs a cookie setting"));
                }
            }
        }
        if let Some(form) = &login.form {
            check_css(form, "login.form")?;
        }
        for (name, block) in login.selectorinputs.iter().chain(&login.getselectorinputs) {
            check_block(block, &format!("login input {}", name), true)?;
        }
        for error in &login.error {
            check_error_selector(error, "login.error", true)?;
        }
        if let Some(selector) = login.test.as_ref().and_then(|t| t.selector.as_ref()) {
            check_css(selector, "login.test")?;
        }
        Ok(())
    }
}

/// Field name without its `|modifier` suffixes
pub fn field_name(key: &str) -> &str {
    key.split('|').next().unwrap_or(key)
}

fn config(message: impl Into<String>) -> CardigannError {
    CardigannError::Config(message.into())
}

fn check_filters(filters: &[FilterSpec], place: &str) -> Result<()> {
    for filter in filters {
        validate_filter(filter).map_err(|e| config(format!("{} in {}", e, place)))?;
    }
    Ok(())
}

fn check_css(selector: &str, place: &str) -> Result<()> {
    validate_css(selector).map_err(|e| config(format!("{} in {}", e, place)))
}

fn check_block(block: &SelectorBlock, place: &str, css: bool) -> Result<()> {
    if block.text.is_none() && block.selector.is_none() && block.case.is_empty() {
        return Err(config(format!("{} needs a selector or text", place)));
    }
    check_filters(&block.filters, place)?;
    if css {
        if let Some(selector) = &block.selector {
            check_css(selector, place)?;
        }
        if let Some(remove) = &block.remove {
            check_css(remove, place)?;
        }
        for (case, _) in &block.case {
            if case != "*" {
                check_css(case, place)?;
            }
        }
    }
    Ok(())
}

fn check_error_selector(error: &ErrorSelector, place: &str, css: bool) -> Result<()> {
    if css {
        check_css(&error.selector, place)?;
    }
    if let Some(message) = &error.message {
        check_block(message, place, css)?;
    }
    Ok(())
}

/// Converts YAML scalars to their string form, `None` for anything else
fn scalar_to_string(value: serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(if b { "true" } else { "false" }.to_string()),
        _ => None,
    }
}

/// A YAML scalar of any type, read as a string
struct Scalar(String);

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        match value {
            serde_yaml::Value::Null => Ok(Scalar(String::new())),
            other => scalar_to_string(other)
                .map(Scalar)
                .ok_or_else(|| de::Error::custom("expected a scalar value")),
        }
    }
}

fn scalar<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Scalar::deserialize(deserializer).map(|s| s.0)
}

fn optional_scalar<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|s| s.0))
}

fn scalar_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    Ok(Vec::<Scalar>::deserialize(deserializer)?
        .into_iter()
        .map(|s| s.0)
        .collect())
}

/// Mapping kept in document order
fn ordered<'de, D, T>(deserializer: D) -> std::result::Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct OrderedVisitor<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
        type Value = Vec<(String, T)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a mapping")
        }

        fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A: MapAccess<'de>>(
            self,
            mut map: A,
        ) -> std::result::Result<Self::Value, A::Error> {
            let mut entries = Vec::new();
            while let Some((key, value)) = map.next_entry::<Scalar, T>()? {
                entries.push((key.0, value));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_any(OrderedVisitor(PhantomData))
}

fn ordered_scalars<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<(String, String)>, D::Error> {
    Ok(ordered::<D, Scalar>(deserializer)?
        .into_iter()
        .map(|(k, v)| (k, v.0))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
id: demo
name: Demo
links:
  - https://demo.test/
search:
  path: browse.php
  rows:
    selector: table.list > tbody > tr
  fields:
    title:
      selector: a.title
    download:
      selector: a.dl
      attribute: href
"#;

    #[test]
    fn test_minimal_definition() {
        let def = Definition::from_yaml(MINIMAL).unwrap();
        assert_eq!(def.id, "demo");
        assert_eq!(def.site_link(), Some("https://demo.test/"));
        let paths = def.search.effective_paths();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].path, "browse.php");
        assert!(paths[0].inheritinputs);
        assert_eq!(paths[0].response.kind, ResponseKind::Html);
        assert!(def.login.is_none());
    }

    #[test]
    fn test_fields_keep_document_order() {
        let yaml = MINIMAL.replace(
            "    title:\n      selector: a.title\n",
            "    _id:\n      selector: td.id\n    title:\n      selector: a.title\n    title|append:\n      text: \" [x]\"\n",
        );
        let def = Definition::from_yaml(&yaml).unwrap();
        let keys: Vec<&str> = def.search.fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["_id", "title", "title|append", "download"]);
    }

    #[test]
    fn test_scalar_inputs_and_filter_args() {
        let yaml = r#"
id: demo
name: Demo
links: [https://demo.test/]
search:
  paths:
    - path: api
      method: post
      categories: [1, "!"]
      response:
        type: json
        noResultsMessage: "[]"
  inputs:
    page: 0
    incldead: true
  rows:
    selector: data
  fields:
    title:
      selector: name
      filters:
        - name: split
          args: ["|", 0]
        - name: append
          args: 1
"#;
        let def = Definition::from_yaml(yaml).unwrap();
        assert_eq!(
            def.search.inputs,
            vec![
                ("page".to_string(), "0".to_string()),
                ("incldead".to_string(), "true".to_string()),
            ]
        );
        let path = &def.search.paths[0];
        assert_eq!(path.method, HttpMethod::Post);
        assert_eq!(path.categories, vec!["1".to_string(), "!".to_string()]);
        assert_eq!(path.response.no_results_message.as_deref(), Some("[]"));
        let filters = &def.search.fields[0].1.filters;
        assert_eq!(filters[0].args.get(0), Some("|"));
        assert_eq!(filters[0].args.get(1), Some("0"));
        assert_eq!(filters[1].args, FilterArgs::Single("1".to_string()));
    }

    #[test]
    fn test_settings_kinds() {
        let yaml = MINIMAL.replace(
            "search:",
            r#"settings:
  - name: username
    type: text
    label: Username
  - name: password
    type: password
  - name: freeleech
    type: checkbox
    default: true
  - name: sort
    type: select
    default: added
    options:
      added: Added
      seeders: Seeders
  - name: cats
    type: multi-select
    default: [a]
    options: {a: A, b: B}
  - name: info_note
    type: info
search:"#,
        );
        let def = Definition::from_yaml(&yaml).unwrap();
        let kinds: Vec<&SettingKind> = def.settings.iter().map(|s| &s.kind).collect();
        assert_eq!(kinds[0], &SettingKind::Text { default: None });
        assert_eq!(kinds[1], &SettingKind::Password);
        assert_eq!(kinds[2], &SettingKind::Checkbox { default: true });
        assert!(matches!(
            kinds[3],
            SettingKind::Select { default: Some(d), options } if d == "added" && options.len() == 2
        ));
        assert!(matches!(
            kinds[4],
            SettingKind::MultiSelect { default, .. } if default == &vec!["a".to_string()]
        ));
        assert_eq!(kinds[5], &SettingKind::Info);
    }

    #[test]
    fn test_unknown_setting_type_is_config_error() {
        let yaml = MINIMAL.replace("search:", "settings:\n  - name: x\n    type: slider\nsearch:");
        let err = Definition::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, CardigannError::Config(_)));
    }

    #[test]
    fn test_unknown_filter_is_config_error() {
        let yaml = MINIMAL.replace(
            "      selector: a.title\n",
            "      selector: a.title\n      filters:\n        - name: frobnicate\n",
        );
        let err = Definition::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("frobnicate"));
    }

    #[test]
    fn test_missing_filter_args_is_config_error() {
        let yaml = MINIMAL.replace(
            "      selector: a.title\n",
            "      selector: a.title\n      filters:\n        - name: split\n          args: [\"/\"]\n",
        );
        assert!(matches!(Definition::from_yaml(&yaml), Err(CardigannError::Config(_))));
    }

    #[test]
    fn test_invalid_css_is_config_error() {
        let yaml = MINIMAL.replace("selector: a.title", "selector: \"a[[title\"");
        assert!(matches!(Definition::from_yaml(&yaml), Err(CardigannError::Config(_))));
    }

    #[test]
    fn test_missing_title_field_is_config_error() {
        let yaml = MINIMAL.replace("    title:\n      selector: a.title\n", "");
        assert!(Definition::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_unknown_login_method_is_config_error() {
        let yaml = MINIMAL.replace(
            "search:",
            "login:\n  path: login.php\n  method: telepathy\nsearch:",
        );
        assert!(matches!(Definition::from_yaml(&yaml), Err(CardigannError::Config(_))));
    }

    #[test]
    fn test_cookie_login_requires_cookie_setting() {
        let yaml = MINIMAL.replace("search:", "login:\n  method: cookie\nsearch:");
        assert!(Definition::from_yaml(&yaml).is_err());
        let yaml = MINIMAL.replace(
            "search:",
            "settings:\n  - name: cookie\n    type: text\nlogin:\n  method: cookie\nsearch:",
        );
        let def = Definition::from_yaml(&yaml).unwrap();
        assert_eq!(def.login.map(|l| l.method), Some(LoginMethod::Cookie));
    }

    #[test]
    fn test_login_spec() {
        let yaml = MINIMAL.replace(
            "search:",
            r#"login:
  path: login.php
  method: form
  form: form#login
  inputs:
    username: "{{ .Config.username }}"
    remember: 1
  selectorinputs:
    token:
      selector: input[name=token]
      attribute: value
  captcha:
    type: image
    selector: img#captcha
  error:
    - selector: div.error
  test:
    path: index.php
    selector: a[href*="logout"]
search:"#,
        );
        let def = Definition::from_yaml(&yaml).unwrap();
        let login = def.login.unwrap();
        assert_eq!(login.method, LoginMethod::Form);
        assert_eq!(login.inputs[1], ("remember".to_string(), "1".to_string()));
        assert_eq!(login.selectorinputs[0].0, "token");
        assert_eq!(login.captcha.map(|c| c.input), Some("captcha".to_string()));
        assert_eq!(login.test.map(|t| t.path), Some("index.php".to_string()));
    }

    #[test]
    fn test_selector_block_required() {
        let mut block = SelectorBlock::selector("td");
        assert!(block.is_required());
        block.optional = true;
        assert!(!block.is_required());
        let block = SelectorBlock {
            default: Some("0".to_string()),
            ..SelectorBlock::selector("td")
        };
        assert!(!block.is_required());
    }

    #[test]
    fn test_knows_link() {
        let yaml = MINIMAL.replace(
            "search:",
            "legacylinks:\n  - https://old-demo.test/\nsearch:",
        );
        let def = Definition::from_yaml(&yaml).unwrap();
        assert!(def.knows_link("https://old-demo.test/index.php"));
        assert!(def.knows_link("https://demo.test/"));
        assert!(!def.knows_link("https://evil.test/"));
    }

    #[test]
    fn test_supports_param() {
        let yaml = MINIMAL.replace(
            "search:",
            "caps:\n  modes:\n    search: [q]\n    movie-search: [q, imdbid]\nsearch:",
        );
        let def = Definition::from_yaml(&yaml).unwrap();
        assert!(def.caps.supports_param("imdbid"));
        assert!(!def.caps.supports_param("tvdbid"));
    }
}
