//! CSS selector evaluation over HTML and XML documents
//!
//! XML bodies are parsed by the HTML parser inside an `<svg>` wrapper, where
//! self-closing tags and CDATA sections are honoured. Element names end up
//! lowercased, so XML selectors must use lowercase names.

use scraper::{ElementRef, Html, Selector};

use super::{miss, snippet};
use crate::definition::{ResponseKind, SelectorBlock};
use crate::error::{CardigannError, Result};
use crate::filters::apply_filters;
use crate::template::{TemplateContext, expand};

/// Attribute marking the wrapper element of parsed XML documents
const XML_ROOT_MARKER: &str = "data-xml-root";

/// Parses a response body as HTML or XML
pub fn parse_document(body: &str, kind: ResponseKind) -> Html {
    match kind {
        ResponseKind::Xml => Html::parse_fragment(&wrap_xml(body)),
        _ => Html::parse_document(body),
    }
}

/// Parses a standalone fragment, e.g. a set of merged rows
pub fn parse_fragment(fragment: &str, kind: ResponseKind) -> Html {
    match kind {
        ResponseKind::Xml => Html::parse_fragment(&wrap_xml(fragment)),
        _ => Html::parse_fragment(fragment),
    }
}

fn wrap_xml(body: &str) -> String {
    let mut body = body.trim_start();
    if body.starts_with("<?xml")
        && let Some(end) = body.find("?>")
    {
        body = &body[end + 2..];
    }
    format!("<svg {}=\"\">{}</svg>", XML_ROOT_MARKER, body)
}

/// Top element of a parsed document: `<html>`, or the XML document element
pub fn document_root(document: &Html) -> ElementRef<'_> {
    let marker = Selector::parse(&format!("[{}]", XML_ROOT_MARKER)).ok();
    marker
        .and_then(|marker| document.select(&marker).next())
        .and_then(|wrapper| wrapper.children().find_map(ElementRef::wrap))
        .unwrap_or_else(|| document.root_element())
}

/// Walks up from `element` to the top element of its document
fn root_of(element: ElementRef<'_>) -> ElementRef<'_> {
    let mut root = element;
    for ancestor in element.ancestors().filter_map(ElementRef::wrap) {
        if ancestor.value().attr(XML_ROOT_MARKER).is_some() {
            break;
        }
        root = ancestor;
    }
    root
}

/// Compiles a CSS selector
///
/// # Errors
/// Returns [`CardigannError::ParseError`] when the selector is invalid.
pub fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| {
        CardigannError::ParseError(format!("Invalid selector {:?}: {:?}", selector, e))
    })
}

/// Checks a selector as written in a definition
///
/// Selectors containing template actions are checked after expansion instead.
pub fn validate_css(selector: &str) -> Result<()> {
    if selector.contains("{{") {
        return Ok(());
    }
    let selector = match selector.trim_start().strip_prefix(":root") {
        Some(rest) if rest.trim().is_empty() => return Ok(()),
        Some(rest) => format!("html{}", rest),
        None => selector.to_string(),
    };
    compile(&selector).map(|_| ())
}

/// Resolves a leading `:root` to the document's top element
fn scoped<'a>(scope: ElementRef<'a>, selector: &str) -> Option<(ElementRef<'a>, String)> {
    match selector.trim_start().strip_prefix(":root") {
        Some(rest) if rest.trim().is_empty() => None,
        Some(rest) => {
            let root = root_of(scope);
            let name = root.value().name().to_string();
            Some((root, format!("{}{}", name, rest)))
        }
        None => Some((scope, selector.to_string())),
    }
}

/// First element matching `selector` below `scope`
pub fn query_first<'a>(scope: ElementRef<'a>, selector: &str) -> Result<Option<ElementRef<'a>>> {
    Ok(query_all(scope, selector)?.into_iter().next())
}

/// Every element matching `selector` below `scope`, in document order
pub fn query_all<'a>(scope: ElementRef<'a>, selector: &str) -> Result<Vec<ElementRef<'a>>> {
    let Some((scope, selector)) = scoped(scope, selector) else {
        return Ok(vec![root_of(scope)]);
    };
    let compiled = compile(&selector)?;
    Ok(scope.select(&compiled).filter(|el| el.id() != scope.id()).collect())
}

/// Whether `element` itself or one of its descendants matches `selector`
///
/// Descendants inside a `removed` subtree don't count.
pub fn matches(
    element: ElementRef<'_>,
    selector: &str,
    removed: &[ElementRef<'_>],
) -> Result<bool> {
    if selector.trim_start().starts_with(":root") {
        return Ok(query_all(element, selector)?
            .into_iter()
            .any(|found| !is_removed(found, removed)));
    }
    let compiled = compile(selector)?;
    Ok(compiled.matches(&element)
        || element
            .select(&compiled)
            .any(|found| !is_removed(found, removed)))
}

/// Whether `element` is one of `removed` or lies below one of them
fn is_removed(element: ElementRef<'_>, removed: &[ElementRef<'_>]) -> bool {
    removed.iter().any(|r| {
        r.id() == element.id() || element.ancestors().any(|ancestor| ancestor.id() == r.id())
    })
}

/// Whitespace-collapsed text of `element`, skipping `removed` subtrees
pub fn element_text(element: ElementRef<'_>, removed: &[ElementRef<'_>]) -> String {
    let mut raw = String::new();
    collect_text(element, removed, &mut raw);
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_text(element: ElementRef<'_>, removed: &[ElementRef<'_>], out: &mut String) {
    for child in element.children() {
        if removed.iter().any(|r| r.id() == child.id()) {
            continue;
        }
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child) = ElementRef::wrap(child) {
            collect_text(child, removed, out);
        }
    }
}

/// Evaluates a selector block against `scope`
///
/// Nodes matched by `remove` are invisible to the `case` map and to the text
/// content. An `attribute` is read from the selected element itself, which
/// `remove` never matches.
///
/// # Arguments
/// * `block` - Selector block from the definition
/// * `scope` - Element the selector is evaluated under, usually a row
/// * `ctx` - Template variables for `text`, `case` values and filter arguments
/// * `required` - Whether a miss is an error
///
/// # Returns
/// The filtered value, or `None` for an optional miss
///
/// # Errors
/// Returns [`CardigannError::Selector`] for a required miss and filter or
/// template errors as they occur.
pub fn extract(
    block: &SelectorBlock,
    scope: ElementRef<'_>,
    ctx: &TemplateContext,
    required: bool,
) -> Result<Option<String>> {
    if let Some(text) = &block.text {
        let value = expand(text, ctx)?;
        return apply_filters(value, &block.filters, ctx).map(Some);
    }

    let selection = match &block.selector {
        Some(selector) => {
            let selector = expand(selector, ctx)?;
            match query_first(scope, &selector)? {
                Some(element) => element,
                None => return miss(required, &selector, snippet(&scope.html())),
            }
        }
        None => scope,
    };

    let removed = match &block.remove {
        Some(remove) => query_all(selection, remove)?,
        None => Vec::new(),
    };

    let value = if !block.case.is_empty() {
        let mut found = None;
        for (case, template) in &block.case {
            if case == "*" || matches(selection, case, &removed)? {
                found = Some(expand(template, ctx)?);
                break;
            }
        }
        match found {
            Some(value) => value,
            None => {
                let label = block.selector.as_deref().unwrap_or("case");
                return miss(required, label, snippet(&selection.html()));
            }
        }
    } else if let Some(attribute) = &block.attribute {
        match selection.value().attr(attribute) {
            Some(value) => value.to_string(),
            None => {
                let label = format!("{}@{}", block.selector.as_deref().unwrap_or(""), attribute);
                return miss(required, &label, snippet(&selection.html()));
            }
        }
    } else {
        element_text(selection, &removed)
    };

    apply_filters(value, &block.filters, ctx).map(Some)
}
