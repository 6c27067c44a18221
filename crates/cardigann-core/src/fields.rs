//! Mapping of extracted field values onto result records
//!
//! Each row field is extracted as a string and handed to [`FieldMapper`],
//! which parses it into the matching record attribute. The mapper returns the
//! normalized string that later fields see as `.Result.<field>`.

use chrono::Utc;
use regex::Regex;
use tracing::{debug, warn};

use crate::categories::CategoryMap;
use crate::dates::{format_rfc1123z, parse_fuzzy};
use crate::error::{CardigannError, Result};
use crate::filters::split_tokens;
use crate::record::ResultRecord;
use crate::url::resolve_url;

/// Seeder/leecher counts at or above this are treated as bogus
const MAX_PEERS: u64 = 5_000_000;

/// Applies field values to a record
pub struct FieldMapper<'a> {
    categories: &'a CategoryMap,
    /// URL of the page the row came from, for relative links
    base_url: &'a str,
}

impl<'a> FieldMapper<'a> {
    pub fn new(categories: &'a CategoryMap, base_url: &'a str) -> Self {
        Self {
            categories,
            base_url,
        }
    }

    /// Applies one field value
    ///
    /// # Arguments
    /// * `record` - Record of the current row
    /// * `field` - Field name without modifiers
    /// * `modifiers` - `|`-separated modifiers of the field key
    /// * `value` - Extracted, filtered value
    ///
    /// # Returns
    /// The normalized value stored back into the template context
    ///
    /// # Errors
    /// Returns [`CardigannError::ParseError`] when the value doesn't fit the field.
    pub fn apply(
        &self,
        record: &mut ResultRecord,
        field: &str,
        modifiers: &[&str],
        value: &str,
    ) -> Result<String> {
        let value = value.trim();
        let has = |modifier: &str| modifiers.contains(&modifier);

        Ok(match field {
            "download" => {
                if value.is_empty() {
                    return Ok(String::new());
                }
                if value.starts_with("magnet:") {
                    record.magnet_uri = Some(value.to_string());
                    value.to_string()
                } else {
                    let link = resolve_url(self.base_url, value)?;
                    record.link = Some(link.clone());
                    link
                }
            }
            "magnet" => {
                if !value.is_empty() {
                    record.magnet_uri = Some(value.to_string());
                }
                value.to_string()
            }
            "details" | "comments" => {
                let details = resolve_url(self.base_url, value)?;
                record.details = Some(details.clone());
                details
            }
            "title" => {
                append_or_set(&mut record.title, value, has("append"));
                record.title.clone()
            }
            "description" => {
                let description = record.description.get_or_insert_with(String::new);
                append_or_set(description, value, has("append"));
                description.clone()
            }
            "category" | "categorydesc" => {
                let ids = if field == "category" {
                    self.categories.map_tracker_category(value)
                } else {
                    self.categories.map_tracker_description(value)
                };
                if ids.is_empty() && !value.is_empty() {
                    warn!(field, value, "Unmapped tracker category");
                }
                if has("noappend") || has("replace") {
                    record.categories = ids;
                } else {
                    for id in ids {
                        if !record.categories.contains(&id) {
                            record.categories.push(id);
                        }
                    }
                }
                value.to_string()
            }
            "size" => {
                let size = parse_bytes(value);
                record.size = Some(size);
                size.to_string()
            }
            "seeders" => {
                let seeders = clamp_peers(parse_count(field, value)?);
                record.seeders = Some(seeders);
                record.peers = Some(record.peers.unwrap_or(0) + seeders);
                seeders.to_string()
            }
            "leechers" => {
                let leechers = clamp_peers(parse_count(field, value)?);
                record.peers = Some(record.peers.unwrap_or(0) + leechers);
                leechers.to_string()
            }
            "grabs" => set_count(&mut record.grabs, field, value)?,
            "files" => set_count(&mut record.files, field, value)?,
            "minimumseedtime" => set_count(&mut record.minimum_seed_time, field, value)?,
            "date" => {
                let date = parse_fuzzy(value, Utc::now()).ok_or_else(|| {
                    CardigannError::ParseError(format!("Unrecognized date {:?}", value))
                })?;
                record.publish_date = Some(date);
                format_rfc1123z(&date)
            }
            "downloadvolumefactor" => set_float(&mut record.download_volume_factor, field, value)?,
            "uploadvolumefactor" => set_float(&mut record.upload_volume_factor, field, value)?,
            "minimumratio" => set_float(&mut record.minimum_ratio, field, value)?,
            "imdb" | "imdbid" => {
                let id = parse_imdb(value).ok_or_else(|| {
                    CardigannError::ParseError(format!("Invalid IMDb id {:?}", value))
                })?;
                record.imdb_id = Some(id);
                format!("tt{:07}", id)
            }
            "tmdbid" => set_count(&mut record.tmdb_id, field, value)?,
            "tvdbid" => set_count(&mut record.tvdb_id, field, value)?,
            "tvmazeid" => set_count(&mut record.tvmaze_id, field, value)?,
            "traktid" => set_count(&mut record.trakt_id, field, value)?,
            "doubanid" => set_count(&mut record.douban_id, field, value)?,
            "rageid" => set_count(&mut record.rage_id, field, value)?,
            "genre" => {
                for genre in split_tokens(value).map(|g| g.replace('_', " ")) {
                    if !record.genres.iter().any(|g| g.eq_ignore_ascii_case(&genre)) {
                        record.genres.push(genre);
                    }
                }
                record.genres.join(",")
            }
            "poster" | "banner" => {
                if value.is_empty() {
                    return Ok(String::new());
                }
                let poster = resolve_url(self.base_url, value)?;
                record.poster = Some(poster.clone());
                poster
            }
            "year" => {
                let year = parse_count(field, value)?;
                record.year = u32::try_from(year).ok();
                year.to_string()
            }
            "author" => set_text(&mut record.author, value),
            "booktitle" => set_text(&mut record.book_title, value),
            "artist" => set_text(&mut record.artist, value),
            "album" => set_text(&mut record.album, value),
            "label" => set_text(&mut record.label, value),
            "track" => set_text(&mut record.track, value),
            "publisher" => set_text(&mut record.publisher, value),
            "infohash" => set_text(&mut record.infohash, value),
            _ if field.starts_with('_') => value.to_string(),
            _ => {
                debug!(field, "Unknown field kept in context only");
                value.to_string()
            }
        })
    }
}

fn append_or_set(target: &mut String, value: &str, append: bool) {
    if append {
        target.push_str(value);
    } else {
        *target = value.to_string();
    }
}

fn set_text(target: &mut Option<String>, value: &str) -> String {
    *target = (!value.is_empty()).then(|| value.to_string());
    value.to_string()
}

fn set_count(target: &mut Option<u64>, field: &str, value: &str) -> Result<String> {
    let count = parse_count(field, value)?;
    *target = Some(count);
    Ok(count.to_string())
}

fn set_float(target: &mut Option<f64>, field: &str, value: &str) -> Result<String> {
    let number = parse_float(value)
        .ok_or_else(|| CardigannError::ParseError(format!("Invalid {} {:?}", field, value)))?;
    *target = Some(number);
    Ok(number.to_string())
}

fn clamp_peers(count: u64) -> u64 {
    if count >= MAX_PEERS { 0 } else { count }
}

fn parse_count(field: &str, value: &str) -> Result<u64> {
    parse_int(value)
        .ok_or_else(|| CardigannError::ParseError(format!("Invalid {} {:?}", field, value)))
}

/// Parses a human-readable size (`1.46 GiB`, `700,5 MB`) into bytes
///
/// Units are binary regardless of spelling, the result is truncated.
pub fn parse_bytes(value: &str) -> u64 {
    let mut number: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if let Some(last) = number.rfind('.')
        && number[..last].contains('.')
    {
        number = format!("{}{}", number[..last].replace('.', ""), &number[last..]);
    }
    let amount: f64 = number.parse().unwrap_or(0.0);

    let unit = value.to_lowercase();
    let multiplier = if unit.contains("tb") || unit.contains("tib") {
        1024f64.powi(4)
    } else if unit.contains("gb") || unit.contains("gib") {
        1024f64.powi(3)
    } else if unit.contains("mb") || unit.contains("mib") {
        1024f64.powi(2)
    } else if unit.contains("kb") || unit.contains("kib") {
        1024.0
    } else {
        1.0
    };
    (amount * multiplier) as u64
}

/// Digits of `value` as a number, `None` if there are none
pub fn parse_int(value: &str) -> Option<u64> {
    let integral = if looks_like_thousands(value) {
        value
    } else {
        value.split(['.', ',']).next().unwrap_or(value)
    };
    let digits: String = integral.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// `1,234` and `1.234.567` style grouping
fn looks_like_thousands(value: &str) -> bool {
    let groups: Vec<&str> = value.trim().split([',', '.']).collect();
    groups.len() > 1
        && groups[1..]
            .iter()
            .all(|g| g.len() == 3 && g.chars().all(|c| c.is_ascii_digit()))
}

fn parse_float(value: &str) -> Option<f64> {
    let number: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    number.parse().ok()
}

fn parse_imdb(value: &str) -> Option<u64> {
    let Ok(re) = Regex::new(r"tt(\d+)") else {
        return None;
    };
    match re.captures(value) {
        Some(caps) => caps[1].parse().ok(),
        None => parse_int(value),
    }
}
