//! Selector evaluation over HTML/XML documents and JSON values
//!
//! Both engines share the same contract: a selector block yields
//! `Ok(Some(value))`, `Ok(None)` for an optional miss, or a
//! [`CardigannError::Selector`] for a required miss. The row loop turns that
//! result into a [`FieldOutcome`] so misses never cross row boundaries.

pub mod html;
pub mod json;

use crate::error::{CardigannError, Result};

/// Result of extracting one field from one row
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOutcome {
    Found(String),
    /// Optional block did not match
    Absent,
    /// Required block did not match or a filter rejected the value
    Missing(String),
}

impl FieldOutcome {
    /// Converts an extraction result, passing through non-extraction errors
    pub fn from_result(result: Result<Option<String>>) -> Result<Self> {
        match result {
            Ok(Some(value)) => Ok(FieldOutcome::Found(value)),
            Ok(None) => Ok(FieldOutcome::Absent),
            Err(e) if e.is_extraction() => Ok(FieldOutcome::Missing(e.to_string())),
            Err(e) => Err(e),
        }
    }
}

/// Miss handling shared by both engines
pub(crate) fn miss(required: bool, selector: &str, context: String) -> Result<Option<String>> {
    if required {
        Err(CardigannError::Selector {
            selector: selector.to_string(),
            context,
        })
    } else {
        Ok(None)
    }
}

/// Truncates a document fragment for error messages
pub(crate) fn snippet(text: &str) -> String {
    const MAX: usize = 300;
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &collapsed[..cut]),
        None => collapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_outcome_from_result() {
        assert_eq!(
            FieldOutcome::from_result(Ok(Some("x".to_string()))).unwrap(),
            FieldOutcome::Found("x".to_string())
        );
        assert_eq!(FieldOutcome::from_result(Ok(None)).unwrap(), FieldOutcome::Absent);
        let missing =
            FieldOutcome::from_result(miss(true, "td.size", "<tr/>".to_string())).unwrap();
        assert!(matches!(missing, FieldOutcome::Missing(m) if m.contains("td.size")));
        assert!(FieldOutcome::from_result(Err(CardigannError::Template("x".to_string()))).is_err());
    }

    #[test]
    fn test_optional_miss_is_none() {
        assert_eq!(miss(false, "td", String::new()).unwrap(), None);
    }

    #[test]
    fn test_snippet_truncates() {
        let long = "a ".repeat(400);
        let cut = snippet(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), 303);
        assert_eq!(snippet("  <td>\n  x </td> "), "<td> x </td>");
    }
}
