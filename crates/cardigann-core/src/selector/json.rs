//! Path selectors over JSON responses
//!
//! A selector is a dotted path (`data.items[0].name`, optional `$.` prefix)
//! followed by any number of filter suffixes:
//! - `:has(path)` keeps values where `path` resolves to a non-null value
//! - `:not(path)` keeps values where it does not
//! - `:contains(text)` keeps values whose text form contains `text`
//!
//! Suffixes filter array elements, or drop a single value entirely.

use serde_json::Value;

use super::{miss, snippet};
use crate::definition::SelectorBlock;
use crate::error::{CardigannError, Result};
use crate::filters::apply_filters;
use crate::template::{TemplateContext, expand};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Suffix {
    Has,
    Not,
    Contains,
}

const SUFFIXES: &[(&str, Suffix)] = &[
    (":has(", Suffix::Has),
    (":not(", Suffix::Not),
    (":contains(", Suffix::Contains),
];

/// Resolves a selector against `root`
///
/// # Returns
/// The selected value, `None` when the path doesn't exist or a suffix
/// rejected a single value
///
/// # Errors
/// Returns [`CardigannError::ParseError`] for unbalanced suffix parentheses.
pub fn resolve_path(root: &Value, selector: &str) -> Result<Option<Value>> {
    let (path, suffixes) = split_suffixes(selector.trim())?;
    let Some(mut value) = walk(root, path).cloned() else {
        return Ok(None);
    };
    for (suffix, arg) in suffixes {
        value = match value {
            Value::Array(items) => {
                let mut kept = Vec::new();
                for item in items {
                    if passes(&item, suffix, arg)? {
                        kept.push(item);
                    }
                }
                Value::Array(kept)
            }
            other => {
                if !passes(&other, suffix, arg)? {
                    return Ok(None);
                }
                other
            }
        };
    }
    Ok(Some(value))
}

fn passes(value: &Value, suffix: Suffix, arg: &str) -> Result<bool> {
    Ok(match suffix {
        Suffix::Has => resolve_path(value, arg)?.is_some_and(|v| !v.is_null()),
        Suffix::Not => !resolve_path(value, arg)?.is_some_and(|v| !v.is_null()),
        Suffix::Contains => render_json(value).contains(arg),
    })
}

/// Separates `path:has(x):not(y)` into the path and its suffixes
fn split_suffixes(selector: &str) -> Result<(&str, Vec<(Suffix, &str)>)> {
    let start = SUFFIXES
        .iter()
        .filter_map(|(prefix, _)| selector.find(prefix))
        .min()
        .unwrap_or(selector.len());
    let (path, mut rest) = selector.split_at(start);

    let mut suffixes = Vec::new();
    while !rest.is_empty() {
        let Some((prefix, suffix)) = SUFFIXES.iter().find(|(prefix, _)| rest.starts_with(prefix))
        else {
            return Err(CardigannError::ParseError(format!(
                "Invalid JSON selector suffix {:?} in {:?}",
                rest, selector
            )));
        };
        let inner = &rest[prefix.len()..];
        let mut depth = 1usize;
        let mut close = None;
        for (i, c) in inner.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(close) = close else {
            return Err(CardigannError::ParseError(format!(
                "Unbalanced parentheses in JSON selector {:?}",
                selector
            )));
        };
        suffixes.push((*suffix, &inner[..close]));
        rest = &inner[close + 1..];
    }
    Ok((path, suffixes))
}

/// Follows a dotted path with optional `[n]` indexes
fn walk<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_prefix('$').unwrap_or(path);
    let mut current = root;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let (name, mut indexes) = match segment.find('[') {
            Some(i) => segment.split_at(i),
            None => (segment, ""),
        };
        if !name.is_empty() {
            current = current.get(name)?;
        }
        while let Some(rest) = indexes.strip_prefix('[') {
            let end = rest.find(']')?;
            let index: usize = rest[..end].trim().parse().ok()?;
            current = current.get(index)?;
            indexes = &rest[end + 1..];
        }
    }
    Some(current)
}

/// Text form of a JSON value; arrays are comma-joined
pub fn render_json(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(render_json).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}

/// Evaluates a selector block against a JSON row
///
/// Case keys are compared with the selected value; `*` matches anything.
///
/// # Errors
/// Returns [`CardigannError::Selector`] for a required miss.
pub fn extract(
    block: &SelectorBlock,
    row: &Value,
    ctx: &TemplateContext,
    required: bool,
) -> Result<Option<String>> {
    if let Some(text) = &block.text {
        let value = expand(text, ctx)?;
        return apply_filters(value, &block.filters, ctx).map(Some);
    }

    let Some(selector) = &block.selector else {
        return miss(required, "(no selector)", snippet(&row.to_string()));
    };
    let selector = expand(selector, ctx)?;
    let value = match resolve_path(row, &selector)? {
        Some(value) if !value.is_null() => render_json(&value),
        _ => return miss(required, &selector, snippet(&row.to_string())),
    };

    let value = if block.case.is_empty() {
        value
    } else {
        match block.case.iter().find(|(case, _)| case == "*" || *case == value) {
            Some((_, template)) => expand(template, ctx)?,
            None => return miss(required, &selector, format!("case value {:?}", value)),
        }
    };

    apply_filters(value, &block.filters, ctx).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "status": "ok",
            "data": {
                "torrents": [
                    {"name": "Alpha", "seeders": 12, "freeleech": true, "tags": ["hd", "x265"]},
                    {"name": "Beta", "seeders": 0, "freeleech": false, "imdb": null},
                    {"name": "Gamma", "seeders": 3, "imdb": "tt0133093"}
                ]
            }
        })
    }

    #[test]
    fn test_dotted_path_with_index() {
        let v = resolve_path(&sample(), "data.torrents[1].name").unwrap();
        assert_eq!(v, Some(json!("Beta")));
        let v = resolve_path(&sample(), "$.data.torrents[0].seeders").unwrap();
        assert_eq!(v, Some(json!(12)));
        assert_eq!(resolve_path(&sample(), "data.missing").unwrap(), None);
        assert_eq!(resolve_path(&sample(), "data.torrents[9]").unwrap(), None);
    }

    #[test]
    fn test_root_path() {
        assert_eq!(resolve_path(&json!([1, 2]), "$").unwrap(), Some(json!([1, 2])));
    }

    #[test]
    fn test_has_and_not_suffixes() {
        let has = resolve_path(&sample(), "data.torrents:has(imdb)").unwrap().unwrap();
        assert_eq!(has.as_array().map(Vec::len), Some(1));
        let not = resolve_path(&sample(), "data.torrents:not(imdb)").unwrap().unwrap();
        assert_eq!(not.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_contains_suffix_and_chaining() {
        let v = resolve_path(&sample(), "data.torrents:contains(a):has(tags)").unwrap().unwrap();
        assert_eq!(v.as_array().map(Vec::len), Some(1));
        assert_eq!(resolve_path(&sample(), "status:contains(fail)").unwrap(), None);
    }

    #[test]
    fn test_unbalanced_suffix_is_error() {
        assert!(resolve_path(&sample(), "data:has(x").is_err());
    }

    #[test]
    fn test_render_json() {
        assert_eq!(render_json(&json!(["hd", "x265"])), "hd,x265");
        assert_eq!(render_json(&json!(true)), "True");
        assert_eq!(render_json(&json!(1.5)), "1.5");
        assert_eq!(render_json(&Value::Null), "");
    }

    #[test]
    fn test_extract_required_and_optional() {
        let row = &sample()["data"]["torrents"][1];
        let ctx = TemplateContext::new();
        let block = SelectorBlock::selector("imdb");
        assert!(extract(&block, row, &ctx, true).unwrap_err().is_extraction());
        assert_eq!(extract(&block, row, &ctx, false).unwrap(), None);
        let name = extract(&SelectorBlock::selector("name"), row, &ctx, true).unwrap();
        assert_eq!(name.as_deref(), Some("Beta"));
    }

    #[test]
    fn test_extract_case_on_value() {
        let row = &sample()["data"]["torrents"][0];
        let block = SelectorBlock {
            case: vec![("True".to_string(), "0".to_string()), ("*".to_string(), "1".to_string())],
            ..SelectorBlock::selector("freeleech")
        };
        let value = extract(&block, row, &TemplateContext::new(), true).unwrap();
        assert_eq!(value.as_deref(), Some("0"));
    }

    #[test]
    fn test_extract_array_is_comma_joined() {
        let row = &sample()["data"]["torrents"][0];
        let value =
            extract(&SelectorBlock::selector("tags"), row, &TemplateContext::new(), true).unwrap();
        assert_eq!(value.as_deref(), Some("hd,x265"));
    }
}
