//! Query and result types
//!
//! All types implement Serialize and Deserialize so front ends can pass
//! them around as JSON.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Kind of search, following the Torznab search functions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    #[default]
    Search,
    TvSearch,
    Movie,
    Music,
    Book,
}

impl QueryType {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::Search => "search",
            QueryType::TvSearch => "tvsearch",
            QueryType::Movie => "movie",
            QueryType::Music => "music",
            QueryType::Book => "book",
        }
    }
}

/// A normalized search request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    pub query_type: QueryType,
    /// Free-text search term
    pub search_term: Option<String>,
    /// Newznab category ids
    pub categories: Vec<u32>,
    pub season: Option<u32>,
    pub episode: Option<String>,
    pub year: Option<u32>,
    /// IMDb id including the `tt` prefix
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<u64>,
    pub tvdb_id: Option<u64>,
    pub tvmaze_id: Option<u64>,
    pub trakt_id: Option<u64>,
    pub douban_id: Option<u64>,
    pub album: Option<String>,
    pub artist: Option<String>,
    pub author: Option<String>,
    pub title: Option<String>,
    pub genre: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl SearchQuery {
    /// Query for a plain search term
    pub fn new(search_term: impl Into<String>) -> Self {
        Self {
            search_term: Some(search_term.into()),
            ..Self::default()
        }
    }

    /// `S01E02`, `S01` or `S01E<episode>` for non-numeric episodes
    pub fn episode_string(&self) -> Option<String> {
        let season = self.season.filter(|s| *s > 0)?;
        Some(match self.episode.as_deref().map(str::trim) {
            None | Some("") => format!("S{:02}", season),
            Some(episode) => match episode.parse::<u32>() {
                Ok(number) => format!("S{:02}E{:02}", season, number),
                Err(_) => format!("S{:02}E{}", season, episode),
            },
        })
    }

    /// Search term and episode string joined by a space
    pub fn keywords(&self) -> String {
        let mut tokens = Vec::new();
        if let Some(term) = self.search_term.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            tokens.push(term.to_string());
        }
        if let Some(episode) = self.episode_string() {
            tokens.push(episode);
        }
        tokens.join(" ")
    }

    /// IMDb id without the `tt` prefix
    pub fn imdb_id_short(&self) -> Option<String> {
        self.imdb_id
            .as_deref()
            .map(|id| id.trim_start_matches("tt").to_string())
    }

    /// Whether every significant word of the keywords occurs in `title`
    ///
    /// `limit` truncates the keywords to that many characters first.
    pub fn matches_all_words(&self, title: &str, limit: Option<usize>) -> bool {
        const COMMON_WORDS: &[&str] = &["and", "the", "an"];
        let keywords = self.keywords();
        let keywords: String = match limit.filter(|l| *l > 0) {
            Some(limit) => keywords.chars().take(limit).collect(),
            None => keywords,
        };
        let words = |text: &str| -> Vec<String> {
            text.split(|c: char| !c.is_alphanumeric() && c != '_')
                .filter(|w| !w.is_empty())
                .map(str::to_lowercase)
                .collect()
        };
        let title_words = words(title);
        words(&keywords)
            .into_iter()
            .filter(|w| w.chars().count() > 1 && !COMMON_WORDS.contains(&w.as_str()))
            .all(|w| title_words.contains(&w))
    }
}

/// One normalized search result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub title: String,
    pub guid: Option<String>,
    /// Details page
    pub details: Option<String>,
    /// Download link
    pub link: Option<String>,
    pub magnet_uri: Option<String>,
    /// Newznab category ids
    pub categories: Vec<u32>,
    /// Size in bytes
    pub size: Option<u64>,
    pub seeders: Option<u64>,
    /// Seeders plus leechers
    pub peers: Option<u64>,
    pub grabs: Option<u64>,
    pub files: Option<u64>,
    pub publish_date: Option<DateTime<FixedOffset>>,
    pub download_volume_factor: Option<f64>,
    pub upload_volume_factor: Option<f64>,
    pub minimum_ratio: Option<f64>,
    /// Seconds
    pub minimum_seed_time: Option<u64>,
    pub imdb_id: Option<u64>,
    pub tmdb_id: Option<u64>,
    pub tvdb_id: Option<u64>,
    pub tvmaze_id: Option<u64>,
    pub trakt_id: Option<u64>,
    pub douban_id: Option<u64>,
    pub rage_id: Option<u64>,
    pub genres: Vec<String>,
    pub poster: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub book_title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub label: Option<String>,
    pub track: Option<String>,
    pub publisher: Option<String>,
    pub year: Option<u32>,
    pub infohash: Option<String>,
}

impl ResultRecord {
    /// A record needs a title and somewhere to get the torrent from
    pub fn is_usable(&self) -> bool {
        !self.title.trim().is_empty()
            && (self.link.is_some() || self.magnet_uri.is_some() || self.details.is_some())
    }

    /// Fills in defaults for values the tracker didn't provide
    pub fn apply_defaults(&mut self, now: DateTime<FixedOffset>) {
        if self.details.is_none() {
            self.details = self.link.clone();
        }
        if self.guid.is_none() {
            self.guid = self
                .details
                .clone()
                .or_else(|| self.link.clone())
                .or_else(|| self.magnet_uri.clone());
        }
        if self.publish_date.is_none() {
            self.publish_date = Some(now);
        }
        self.download_volume_factor.get_or_insert(1.0);
        self.upload_volume_factor.get_or_insert(1.0);
    }
}

/// A search path that failed while others may have succeeded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathError {
    pub path: String,
    pub message: String,
}

/// Records of one query plus the paths that failed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub records: Vec<ResultRecord>,
    pub errors: Vec<PathError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_episode_string() {
        let mut query = SearchQuery::new("show");
        assert_eq!(query.episode_string(), None);
        query.season = Some(1);
        assert_eq!(query.episode_string().as_deref(), Some("S01"));
        query.episode = Some("2".to_string());
        assert_eq!(query.episode_string().as_deref(), Some("S01E02"));
        query.episode = Some("2020.01.31".to_string());
        assert_eq!(query.episode_string().as_deref(), Some("S01E2020.01.31"));
    }

    #[test]
    fn test_keywords() {
        let mut query = SearchQuery::new("  doctor who ");
        query.season = Some(7);
        query.episode = Some("5".to_string());
        assert_eq!(query.keywords(), "doctor who S07E05");
        assert_eq!(SearchQuery::default().keywords(), "");
    }

    #[test]
    fn test_imdb_id_short() {
        let query = SearchQuery {
            imdb_id: Some("tt0133093".to_string()),
            ..SearchQuery::default()
        };
        assert_eq!(query.imdb_id_short().as_deref(), Some("0133093"));
    }

    #[test]
    fn test_matches_all_words() {
        let query = SearchQuery::new("The Matrix Reloaded");
        assert!(query.matches_all_words("Matrix.Reloaded.2003.1080p", None));
        assert!(!query.matches_all_words("The Matrix 1999", None));
        assert!(query.matches_all_words("The Matrix 1999", Some(10)));
        assert!(SearchQuery::default().matches_all_words("anything", None));
    }

    #[test]
    fn test_usable_and_defaults() {
        let mut record = ResultRecord {
            title: "Ubuntu".to_string(),
            ..ResultRecord::default()
        };
        assert!(!record.is_usable());
        record.link = Some("https://t.test/1.torrent".to_string());
        assert!(record.is_usable());

        let now = chrono::Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap().fixed_offset();
        record.apply_defaults(now);
        assert_eq!(record.details, record.link);
        assert_eq!(record.guid, record.link);
        assert_eq!(record.publish_date, Some(now));
        assert_eq!(record.download_volume_factor, Some(1.0));
        assert_eq!(record.upload_volume_factor, Some(1.0));
    }

    #[test]
    fn test_record_serialization() {
        let record = ResultRecord {
            title: "Test".to_string(),
            size: Some(1567663063),
            categories: vec![2040],
            ..ResultRecord::default()
        };
        let json = serde_json::to_string(&record).expect("Serialization should succeed");
        let back: ResultRecord =
            serde_json::from_str(&json).expect("Deserialization should succeed");
        assert_eq!(record, back);
    }
}
