//! Turning result pages into records
//!
//! HTML and XML pages are split into rows by CSS selector, JSON bodies by
//! path selector. Both feed the same per-row field loop, so a row that
//! misses a field or fails a filter only ever affects itself.

use chrono::Utc;
use scraper::{ElementRef, Html};
use serde_json::Value;
use tracing::{debug, warn};

use crate::categories::CategoryMap;
use crate::definition::{Definition, ResponseKind, ResponseSpec, RowsBlock, SelectorBlock};
use crate::error::{CardigannError, Result};
use crate::fields::{FieldMapper, parse_int};
use crate::filters::{FilterKind, apply_filters};
use crate::login::error_message;
use crate::record::{ResultRecord, SearchQuery};
use crate::selector::html::{self, compile, document_root, parse_fragment, query_all};
use crate::selector::{FieldOutcome, json};
use crate::template::{TemplateContext, expand};

/// Marks the element rebuilt from merged rows
const MERGED_ROW_MARKER: &str = "data-merged-row";

/// Everything the row loop needs besides the page itself
pub(crate) struct RowReader<'a> {
    pub definition: &'a Definition,
    pub categories: &'a CategoryMap,
    pub query: &'a SearchQuery,
    /// URL the page was fetched from
    pub page_url: &'a str,
    pub ctx: &'a TemplateContext,
}

impl RowReader<'_> {
    /// Records of an HTML or XML page
    ///
    /// # Errors
    /// Returns [`CardigannError::SearchPage`] when a search error selector
    /// matches, and selector or filter errors of the page-level blocks.
    pub fn read_markup(&self, body: &str, kind: ResponseKind) -> Result<Vec<ResultRecord>> {
        let search = &self.definition.search;
        let body = if search.preprocessingfilters.is_empty() {
            body.to_string()
        } else {
            apply_filters(body.to_string(), &search.preprocessingfilters, self.ctx)?
        };
        let document = html::parse_document(&body, kind);
        let root = document_root(&document);

        if let Some(message) = error_message(&search.error, root, self.ctx)? {
            return Err(CardigannError::SearchPage(message));
        }

        let rows = &search.rows;
        let selector = expand(&rows.selector, self.ctx)?;
        let found = query_all(root, &selector)?;
        debug!(rows = found.len(), selector = %selector, "Selected rows");

        let mut records = Vec::new();
        if rows.after == 0 {
            for row in found {
                let record = self.read_row(
                    &|block, ctx, required| html::extract(block, row, ctx, required),
                    &|ctx| date_header(row, rows, ctx),
                )?;
                records.extend(record);
            }
            return Ok(records);
        }

        let marker = compile(&format!("[{}]", MERGED_ROW_MARKER))?;
        let groups: Vec<&[ElementRef<'_>]> = found.chunks(rows.after.saturating_add(1)).collect();
        let fragments: Vec<Html> = groups.iter().map(|group| merge_rows(group, kind)).collect();
        for (group, fragment) in groups.iter().zip(&fragments) {
            let first = group[0];
            let merged = fragment.select(&marker).next().unwrap_or(first);
            let record = self.read_row(
                &|block, ctx, required| html::extract(block, merged, ctx, required),
                &|ctx| date_header(first, rows, ctx),
            )?;
            records.extend(record);
        }
        Ok(records)
    }

    /// Records of a JSON body
    ///
    /// # Errors
    /// Returns [`CardigannError::ParseError`] for invalid JSON or a row
    /// selector that doesn't resolve.
    pub fn read_json(&self, body: &str, response: &ResponseSpec) -> Result<Vec<ResultRecord>> {
        let trimmed = body.trim();
        let no_results = response
            .no_results_message
            .as_deref()
            .is_some_and(|m| m.trim() == trimmed);
        if trimmed.is_empty() || no_results {
            return Ok(Vec::new());
        }
        let document: Value = serde_json::from_str(trimmed)
            .map_err(|e| CardigannError::ParseError(format!("Invalid JSON response: {}", e)))?;
        let rows = &self.definition.search.rows;

        if let Some(count) = &rows.count
            && let Some(value) = json::extract(count, &document, self.ctx, false)?
            && parse_int(&value) == Some(0)
        {
            debug!("Result count is zero");
            return Ok(Vec::new());
        }

        let selector = expand(&rows.selector, self.ctx)?;
        let selected = json::resolve_path(&document, &selector)?.ok_or_else(|| {
            CardigannError::ParseError(format!("Rows selector {} not found in response", selector))
        })?;
        let items = match selected {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };

        let mut records = Vec::new();
        for item in &items {
            let row = match &rows.attribute {
                Some(attribute) => match item.get(attribute) {
                    Some(value) => value,
                    None if rows.missing_attribute_equals_no_results => continue,
                    None => {
                        return Err(CardigannError::ParseError(format!(
                            "Row attribute {} missing",
                            attribute
                        )));
                    }
                },
                None => item,
            };
            if !rows.multiple {
                records.extend(self.read_json_row(row, item)?);
                continue;
            }
            let children: Vec<&Value> = match row {
                Value::Array(children) => children.iter().collect(),
                Value::Object(map) => map.values().collect(),
                _ => Vec::new(),
            };
            for child in children {
                records.extend(self.read_json_row(child, item)?);
            }
        }
        Ok(records)
    }

    /// Fields whose selector starts with `..` read from `parent`, the
    /// element of the rows selector
    fn read_json_row(&self, row: &Value, parent: &Value) -> Result<Option<ResultRecord>> {
        self.read_row(
            &|block, ctx, required| match block.selector.as_deref() {
                Some(selector) if selector.starts_with("..") => {
                    let block = SelectorBlock {
                        selector: Some(selector.trim_start_matches('.').to_string()),
                        ..block.clone()
                    };
                    json::extract(&block, parent, ctx, required)
                }
                _ => json::extract(block, row, ctx, required),
            },
            &|_| Ok(None),
        )
    }

    /// Runs every field of the definition against one row
    ///
    /// # Returns
    /// `None` when the row is unusable or a row filter rejected it
    fn read_row(
        &self,
        extract: &dyn Fn(&SelectorBlock, &TemplateContext, bool) -> Result<Option<String>>,
        date_header: &dyn Fn(&TemplateContext) -> Result<Option<String>>,
    ) -> Result<Option<ResultRecord>> {
        let mut ctx = self.ctx.clone();
        let mut record = ResultRecord::default();
        let mapper = FieldMapper::new(self.categories, self.page_url);

        for (key, block) in &self.definition.search.fields {
            let mut parts = key.split('|');
            let field = parts.next().unwrap_or(key).trim();
            let modifiers: Vec<&str> = parts.map(str::trim).collect();
            let variable = format!(".Result.{}", field);

            let value = match FieldOutcome::from_result(extract(block, &ctx, block.is_required())) {
                Ok(FieldOutcome::Found(value)) => value,
                Ok(FieldOutcome::Absent) => match &block.default {
                    Some(default) => match expand(default, &ctx) {
                        Ok(value) => value,
                        Err(e) => {
                            warn!(field, error = %e, "Field default failed");
                            ctx.set_null(variable);
                            continue;
                        }
                    },
                    None => {
                        ctx.set_null(variable);
                        continue;
                    }
                },
                Ok(FieldOutcome::Missing(reason)) => {
                    debug!(field, reason = %reason, "Required field missing");
                    ctx.set_null(variable);
                    continue;
                }
                Err(e) => {
                    warn!(field, error = %e, "Field failed");
                    ctx.set_null(variable);
                    continue;
                }
            };

            match mapper.apply(&mut record, field, &modifiers, &value) {
                Ok(stored) => ctx.set(variable, stored),
                Err(e) => {
                    debug!(field, value = %value, error = %e, "Field value rejected");
                    ctx.set_null(variable);
                }
            }
        }

        if record.publish_date.is_none()
            && self.definition.search.rows.dateheaders.is_some()
            && let Some(date) = date_header(&ctx)?
            && let Err(e) = mapper.apply(&mut record, "date", &[], &date)
        {
            debug!(date = %date, error = %e, "Date header rejected");
        }

        if !record.is_usable() {
            warn!(title = %record.title, "Skipping row without title or download link");
            return Ok(None);
        }
        record.apply_defaults(Utc::now().fixed_offset());

        if !self.passes_row_filters(&record) {
            return Ok(None);
        }
        Ok(Some(record))
    }

    fn passes_row_filters(&self, record: &ResultRecord) -> bool {
        for filter in &self.definition.search.rows.filters {
            match FilterKind::parse(&filter.name) {
                Some(FilterKind::AndMatch) => {
                    if self.searches_by_id() {
                        continue;
                    }
                    let limit = filter.args.get(0).and_then(|l| l.trim().parse().ok());
                    if !self.query.matches_all_words(&record.title, limit) {
                        debug!(title = %record.title, "Row dropped by andmatch");
                        return false;
                    }
                }
                Some(FilterKind::StrDump) => debug!(title = %record.title, "strdump"),
                _ => {}
            }
        }
        true
    }

    /// Id searches the tracker supports natively don't need title matching
    fn searches_by_id(&self) -> bool {
        let caps = &self.definition.caps;
        (self.query.imdb_id.is_some() && caps.supports_param("imdbid"))
            || (self.query.tmdb_id.is_some() && caps.supports_param("tmdbid"))
            || (self.query.tvdb_id.is_some() && caps.supports_param("tvdbid"))
    }
}

/// Rebuilds a group of rows as one element holding all their children
fn merge_rows(group: &[ElementRef<'_>], kind: ResponseKind) -> Html {
    let first = group[0].value();
    let mut markup = format!("<{} {}=\"\"", first.name(), MERGED_ROW_MARKER);
    for (name, value) in first.attrs() {
        markup.push_str(&format!(" {}=\"{}\"", name, escape_attribute(value)));
    }
    markup.push('>');
    for row in group {
        markup.push_str(&row.inner_html());
    }
    markup.push_str(&format!("</{}>", first.name()));
    if first.name() == "tr" {
        markup = format!("<table><tbody>{}</tbody></table>", markup);
    }
    parse_fragment(&markup, kind)
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Nearest preceding header row carrying a date
///
/// Walks previous siblings, continuing with the last child of the parent's
/// previous sibling when a sibling list runs out.
fn date_header(
    row: ElementRef<'_>,
    rows: &RowsBlock,
    ctx: &TemplateContext,
) -> Result<Option<String>> {
    let Some(block) = &rows.dateheaders else {
        return Ok(None);
    };
    let mut current = previous_element(row);
    while let Some(candidate) = current {
        if let Some(value) = header_value(candidate, block, ctx)? {
            return Ok(Some(value));
        }
        current = previous_element(candidate);
    }
    Ok(None)
}

fn previous_element(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element.prev_siblings().find_map(ElementRef::wrap).or_else(|| {
        let parent = element.parent().and_then(ElementRef::wrap)?;
        let uncle = parent.prev_siblings().find_map(ElementRef::wrap)?;
        uncle.children().filter_map(ElementRef::wrap).last()
    })
}

/// Header value when `element` itself or a descendant matches the block
fn header_value(
    element: ElementRef<'_>,
    block: &SelectorBlock,
    ctx: &TemplateContext,
) -> Result<Option<String>> {
    let Some(selector) = &block.selector else {
        return html::extract(block, element, ctx, false);
    };
    let selector = expand(selector, ctx)?;
    if compile(&selector)?.matches(&element) {
        let own = SelectorBlock {
            selector: None,
            ..block.clone()
        };
        return html::extract(&own, element, ctx, false);
    }
    let block = SelectorBlock {
        selector: Some(selector),
        ..block.clone()
    };
    html::extract(&block, element, ctx, false)
}
