//! Filter pipeline for extracted values
//!
//! Every selector block can carry a list of filters that rewrite the
//! extracted string in declared order. Filter names and argument counts are
//! checked when a definition is validated, so evaluation only fails on
//! data-dependent problems (a regex that doesn't match, an index out of range).

use chrono::Utc;
use regex::Regex;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::dates::{format_rfc1123z, parse_fuzzy, parse_time_ago, parse_with_layout};
use crate::definition::FilterSpec;
use crate::error::{CardigannError, Result};
use crate::selector::json::{render_json, resolve_path};
use crate::template::{TemplateContext, expand, regex_replacement};
use crate::url::{form_decode, form_encode, query_param};

/// Known filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    QueryString,
    DateParse,
    Regexp,
    ReReplace,
    Split,
    Replace,
    Trim,
    Prepend,
    Append,
    ToLower,
    ToUpper,
    UrlEncode,
    UrlDecode,
    HtmlEncode,
    HtmlDecode,
    TimeAgo,
    FuzzyTime,
    ValidFilename,
    Diacritics,
    JsonJoinArray,
    HexDump,
    StrDump,
    Validate,
    /// Row filter, see the search executor
    AndMatch,
}

impl FilterKind {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "querystring" => Self::QueryString,
            "dateparse" | "timeparse" => Self::DateParse,
            "regexp" => Self::Regexp,
            "re_replace" => Self::ReReplace,
            "split" => Self::Split,
            "replace" => Self::Replace,
            "trim" => Self::Trim,
            "prepend" => Self::Prepend,
            "append" => Self::Append,
            "tolower" => Self::ToLower,
            "toupper" => Self::ToUpper,
            "urlencode" => Self::UrlEncode,
            "urldecode" => Self::UrlDecode,
            "htmlencode" => Self::HtmlEncode,
            "htmldecode" => Self::HtmlDecode,
            "timeago" | "reltime" => Self::TimeAgo,
            "fuzzytime" => Self::FuzzyTime,
            "validfilename" => Self::ValidFilename,
            "diacritics" => Self::Diacritics,
            "jsonjoinarray" => Self::JsonJoinArray,
            "hexdump" => Self::HexDump,
            "strdump" => Self::StrDump,
            "validate" => Self::Validate,
            "andmatch" => Self::AndMatch,
            _ => return None,
        })
    }

    /// Number of arguments the filter cannot work without
    fn required_args(self) -> usize {
        match self {
            Self::ReReplace | Self::Split | Self::Replace | Self::JsonJoinArray => 2,
            Self::QueryString
            | Self::DateParse
            | Self::Regexp
            | Self::Prepend
            | Self::Append
            | Self::Diacritics
            | Self::Validate => 1,
            _ => 0,
        }
    }
}

/// Checks that a value filter exists and has its arguments
///
/// # Errors
/// Returns [`CardigannError::Config`] for unknown names, row-only filters,
/// missing arguments and malformed regexes or indexes.
pub fn validate_filter(filter: &FilterSpec) -> Result<()> {
    let config = |message: String| Err(CardigannError::Config(message));
    let Some(kind) = FilterKind::parse(&filter.name) else {
        return config(format!("unknown filter {}", filter.name));
    };
    if kind == FilterKind::AndMatch {
        return config("andmatch is only valid as a row filter".to_string());
    }
    if filter.args.len() < kind.required_args() {
        return config(format!(
            "filter {} needs {} argument(s)",
            filter.name,
            kind.required_args()
        ));
    }
    match kind {
        FilterKind::Regexp | FilterKind::ReReplace => {
            let pattern = filter.args.get(0).unwrap_or_default();
            if let Err(e) = Regex::new(pattern) {
                return config(format!("filter {} has invalid regex: {}", filter.name, e));
            }
        }
        FilterKind::Split => {
            if filter.args.get(1).and_then(|i| i.trim().parse::<i64>().ok()).is_none() {
                return config("filter split needs a numeric index".to_string());
            }
        }
        FilterKind::Diacritics => {
            if filter.args.get(0) != Some("replace") {
                return config("filter diacritics only supports \"replace\"".to_string());
            }
        }
        _ => {}
    }
    Ok(())
}

/// Runs `value` through `filters` in order
///
/// # Errors
/// Returns [`CardigannError::Filter`] when a filter cannot process the value
/// and [`CardigannError::Template`] when an argument fails to expand.
pub fn apply_filters(
    value: String,
    filters: &[FilterSpec],
    ctx: &TemplateContext,
) -> Result<String> {
    filters
        .iter()
        .try_fold(value, |value, filter| apply_filter(value, filter, ctx))
}

fn apply_filter(value: String, filter: &FilterSpec, ctx: &TemplateContext) -> Result<String> {
    let name = filter.name.as_str();
    let kind = FilterKind::parse(name)
        .ok_or_else(|| CardigannError::filter(name, "unknown filter"))?;
    let arg = |i: usize| {
        filter
            .args
            .get(i)
            .ok_or_else(|| CardigannError::filter(name, format!("missing argument {}", i + 1)))
    };

    Ok(match kind {
        FilterKind::QueryString => {
            let param = arg(0)?;
            query_param(&value, param).ok_or_else(|| {
                CardigannError::filter(name, format!("no parameter {} in {}", param, value))
            })?
        }
        FilterKind::DateParse => {
            let layout = arg(0)?;
            match parse_with_layout(&value, layout, Utc::now()) {
                Some(date) => format_rfc1123z(&date),
                None => {
                    warn!(value = %value, layout, "Date did not match layout");
                    value
                }
            }
        }
        FilterKind::Regexp => {
            let re = compile(name, arg(0)?)?;
            let caps = re
                .captures(&value)
                .ok_or_else(|| CardigannError::filter(name, format!("no match in {:?}", value)))?;
            // Only the first group counts; a pattern without one yields ""
            caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default()
        }
        FilterKind::ReReplace => {
            let re = compile(name, arg(0)?)?;
            let replacement = regex_replacement(&expand(arg(1)?, ctx)?);
            re.replace_all(&value, replacement.as_str()).into_owned()
        }
        FilterKind::Split => split(&value, arg(0)?, arg(1)?)
            .map_err(|message| CardigannError::filter(name, message))?,
        FilterKind::Replace => value.replace(arg(0)?, &expand(arg(1)?, ctx)?),
        FilterKind::Trim => match filter.args.get(0) {
            Some(cutset) if !cutset.is_empty() => {
                let cutset: Vec<char> = cutset.chars().collect();
                value.trim_matches(cutset.as_slice()).to_string()
            }
            _ => value.trim().to_string(),
        },
        FilterKind::Prepend => format!("{}{}", expand(arg(0)?, ctx)?, value),
        FilterKind::Append => format!("{}{}", value, expand(arg(0)?, ctx)?),
        FilterKind::ToLower => value.to_lowercase(),
        FilterKind::ToUpper => value.to_uppercase(),
        FilterKind::UrlEncode => form_encode(&value),
        FilterKind::UrlDecode => form_decode(&value),
        FilterKind::HtmlEncode => encode_html_entities(&value),
        FilterKind::HtmlDecode => decode_html_entities(&value),
        FilterKind::TimeAgo => match parse_time_ago(&value, Utc::now()) {
            Some(date) => format_rfc1123z(&date),
            None => {
                warn!(value = %value, "Could not parse relative time");
                value
            }
        },
        FilterKind::FuzzyTime => match parse_fuzzy(&value, Utc::now()) {
            Some(date) => format_rfc1123z(&date),
            None => {
                warn!(value = %value, "Could not parse date");
                value
            }
        },
        FilterKind::ValidFilename => valid_filename(&value),
        FilterKind::Diacritics => strip_diacritics(&value),
        FilterKind::JsonJoinArray => {
            let json: serde_json::Value = serde_json::from_str(&value)
                .map_err(|e| CardigannError::filter(name, format!("invalid JSON: {}", e)))?;
            let path = arg(0)?;
            let delimiter = arg(1)?;
            match resolve_path(&json, path)? {
                Some(serde_json::Value::Array(items)) => items
                    .iter()
                    .map(render_json)
                    .collect::<Vec<_>>()
                    .join(delimiter),
                Some(other) => render_json(&other),
                None => {
                    return Err(CardigannError::filter(name, format!("path {} not found", path)));
                }
            }
        }
        FilterKind::HexDump => {
            let hex: Vec<String> = value.bytes().map(|b| format!("{:02x}", b)).collect();
            debug!(hex = %hex.join(" "), "hexdump");
            value
        }
        FilterKind::StrDump => {
            debug!(tag = filter.args.get(0).unwrap_or_default(), value = %value, "strdump");
            value
        }
        FilterKind::Validate => validate_tokens(&value, arg(0)?),
        FilterKind::AndMatch => {
            return Err(CardigannError::filter(name, "only valid as a row filter"));
        }
    })
}

fn compile(name: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| CardigannError::filter(name, format!("invalid regex: {}", e)))
}

fn split(value: &str, separator: &str, index: &str) -> std::result::Result<String, String> {
    let separator = separator
        .chars()
        .next()
        .ok_or_else(|| "empty separator".to_string())?;
    let index: i64 = index
        .trim()
        .parse()
        .map_err(|_| format!("invalid index {}", index))?;
    let parts: Vec<&str> = value.split(separator).collect();
    let position = if index < 0 { parts.len() as i64 + index } else { index };
    usize::try_from(position)
        .ok()
        .and_then(|p| parts.get(p))
        .map(|part| part.to_string())
        .ok_or_else(|| format!("index {} out of range for {} part(s)", index, parts.len()))
}

const VALIDATE_DELIMITERS: &[char] = &[',', ' ', '/', ')', '(', '.', ';', '[', ']', '"', '|', ':'];

/// Keeps the allowed tokens that also appear in `value`
fn validate_tokens(value: &str, allowed: &str) -> String {
    let present: Vec<String> = value
        .to_lowercase()
        .split(VALIDATE_DELIMITERS)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    let mut kept: Vec<String> = Vec::new();
    for token in allowed.to_lowercase().split(VALIDATE_DELIMITERS) {
        if !token.is_empty()
            && present.iter().any(|p| p == token)
            && !kept.iter().any(|k| k == token)
        {
            kept.push(token.to_string());
        }
    }
    kept.join(",")
}

/// Splits a genre-like list on the `validate` delimiters
pub(crate) fn split_tokens(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(VALIDATE_DELIMITERS)
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Decomposes, drops combining marks, recomposes
pub fn strip_diacritics(value: &str) -> String {
    value.nfd().filter(|c| !is_combining_mark(*c)).nfc().collect()
}

fn valid_filename(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
                '_'
            } else {
                c
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Encodes the characters HTML treats specially
pub fn encode_html_entities(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

const NAMED_ENTITIES: &[(&str, &str)] = &[
    ("amp", "&"),
    ("lt", "<"),
    ("gt", ">"),
    ("quot", "\""),
    ("apos", "'"),
    ("nbsp", "\u{a0}"),
    ("copy", "©"),
    ("reg", "®"),
    ("trade", "™"),
    ("hellip", "…"),
    ("ndash", "–"),
    ("mdash", "—"),
    ("laquo", "«"),
    ("raquo", "»"),
    ("deg", "°"),
];

/// Decodes named and numeric HTML entities; unknown ones are kept
pub fn decode_html_entities(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let candidate = &rest[start + 1..];
        let decoded = candidate
            .find(';')
            .filter(|end| *end <= 10)
            .and_then(|end| decode_entity(&candidate[..end]).map(|d| (d, end)));
        match decoded {
            Some((text, end)) => {
                out.push_str(&text);
                rest = &candidate[end + 1..];
            }
            None => {
                out.push('&');
                rest = candidate;
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<String> {
    if let Some(numeric) = entity.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }
    NAMED_ENTITIES
        .iter()
        .find(|(name, _)| *name == entity)
        .map(|(_, text)| text.to_string())
}
