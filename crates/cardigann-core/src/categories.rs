//! Newznab category taxonomy and tracker category mapping

use serde::Serialize;
use tracing::debug;

use crate::definition::CategoryMapping;
use crate::error::{CardigannError, Result};

/// Newznab category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Category {
    pub id: u32,
    pub name: &'static str,
}

const NEWZNAB: &[(u32, &str)] = &[
    (1000, "Console"),
    (1010, "Console/NDS"),
    (1020, "Console/PSP"),
    (1030, "Console/Wii"),
    (1040, "Console/XBox"),
    (1050, "Console/XBox 360"),
    (1060, "Console/Wiiware"),
    (1070, "Console/XBox 360 DLC"),
    (1080, "Console/PS3"),
    (1090, "Console/Other"),
    (1110, "Console/3DS"),
    (1120, "Console/PS Vita"),
    (1130, "Console/WiiU"),
    (1140, "Console/XBox One"),
    (1180, "Console/PS4"),
    (2000, "Movies"),
    (2010, "Movies/Foreign"),
    (2020, "Movies/Other"),
    (2030, "Movies/SD"),
    (2040, "Movies/HD"),
    (2045, "Movies/UHD"),
    (2050, "Movies/BluRay"),
    (2060, "Movies/3D"),
    (2070, "Movies/DVD"),
    (2080, "Movies/WEB-DL"),
    (3000, "Audio"),
    (3010, "Audio/MP3"),
    (3020, "Audio/Video"),
    (3030, "Audio/Audiobook"),
    (3040, "Audio/Lossless"),
    (3050, "Audio/Other"),
    (3060, "Audio/Foreign"),
    (4000, "PC"),
    (4010, "PC/0day"),
    (4020, "PC/ISO"),
    (4030, "PC/Mac"),
    (4040, "PC/Mobile-Other"),
    (4050, "PC/Games"),
    (4060, "PC/Mobile-iOS"),
    (4070, "PC/Mobile-Android"),
    (5000, "TV"),
    (5010, "TV/WEB-DL"),
    (5020, "TV/Foreign"),
    (5030, "TV/SD"),
    (5040, "TV/HD"),
    (5045, "TV/UHD"),
    (5050, "TV/Other"),
    (5060, "TV/Sport"),
    (5070, "TV/Anime"),
    (5080, "TV/Documentary"),
    (6000, "XXX"),
    (6010, "XXX/DVD"),
    (6020, "XXX/WMV"),
    (6030, "XXX/XviD"),
    (6040, "XXX/x264"),
    (6045, "XXX/UHD"),
    (6050, "XXX/Pack"),
    (6060, "XXX/ImageSet"),
    (6070, "XXX/Other"),
    (6080, "XXX/SD"),
    (6090, "XXX/WEB-DL"),
    (7000, "Books"),
    (7010, "Books/Mags"),
    (7020, "Books/EBook"),
    (7030, "Books/Comics"),
    (7040, "Books/Technical"),
    (7050, "Books/Other"),
    (7060, "Books/Foreign"),
    (8000, "Other"),
    (8010, "Other/Misc"),
    (8020, "Other/Hashed"),
];

/// Looks up a Newznab category by its name (`Movies/HD`), case-insensitively
pub fn by_name(name: &str) -> Option<Category> {
    NEWZNAB
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name.trim()))
        .map(|&(id, name)| Category { id, name })
}

pub fn by_id(id: u32) -> Option<Category> {
    NEWZNAB
        .iter()
        .find(|(i, _)| *i == id)
        .map(|&(id, name)| Category { id, name })
}

#[derive(Debug, Clone, PartialEq)]
struct Mapping {
    tracker_id: String,
    newznab: Option<u32>,
    desc: Option<String>,
    default: bool,
}

/// Bidirectional mapping between tracker categories and Newznab ids
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryMap {
    mappings: Vec<Mapping>,
}

impl CategoryMap {
    /// Builds the map from a definition's `categorymappings`
    ///
    /// # Errors
    /// Returns [`CardigannError::Config`] for unknown Newznab category names.
    pub fn from_mappings(mappings: &[CategoryMapping]) -> Result<Self> {
        let mappings = mappings
            .iter()
            .map(|m| {
                let newznab = match &m.cat {
                    Some(cat) => Some(
                        by_name(cat)
                            .ok_or_else(|| {
                                CardigannError::Config(format!(
                                    "category mapping {} uses unknown category {}",
                                    m.id, cat
                                ))
                            })?
                            .id,
                    ),
                    None => None,
                };
                Ok(Mapping {
                    tracker_id: m.id.clone(),
                    newznab,
                    desc: m.desc.clone(),
                    default: m.default,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { mappings })
    }

    /// Newznab ids for a tracker category id
    pub fn map_tracker_category(&self, tracker_id: &str) -> Vec<u32> {
        let tracker_id = tracker_id.trim();
        self.collect(|m| m.tracker_id == tracker_id)
    }

    /// Newznab ids for a tracker category description
    pub fn map_tracker_description(&self, desc: &str) -> Vec<u32> {
        let desc = desc.trim();
        self.collect(|m| m.desc.as_deref().is_some_and(|d| d.eq_ignore_ascii_case(desc)))
    }

    fn collect(&self, predicate: impl Fn(&Mapping) -> bool) -> Vec<u32> {
        let mut ids = Vec::new();
        for mapping in self.mappings.iter().filter(|m| predicate(m)) {
            if let Some(id) = mapping.newznab
                && !ids.contains(&id)
            {
                ids.push(id);
            }
        }
        ids
    }

    /// Tracker category ids for the Newznab ids of a query
    ///
    /// A parent id (`2000`) also selects every mapping of its subcategories.
    pub fn map_query_categories(&self, newznab_ids: &[u32]) -> Vec<String> {
        let mut tracker_ids: Vec<String> = Vec::new();
        for mapping in &self.mappings {
            let Some(id) = mapping.newznab else { continue };
            let wanted = newznab_ids
                .iter()
                .any(|q| *q == id || (q % 1000 == 0 && id / 1000 == q / 1000));
            if wanted && !tracker_ids.contains(&mapping.tracker_id) {
                tracker_ids.push(mapping.tracker_id.clone());
            }
        }
        debug!(query = ?newznab_ids, tracker = ?tracker_ids, "Mapped query categories");
        tracker_ids
    }

    /// Tracker ids flagged `default: true`
    pub fn default_categories(&self) -> Vec<String> {
        self.mappings
            .iter()
            .filter(|m| m.default)
            .map(|m| m.tracker_id.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
