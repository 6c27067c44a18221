//! Template variables shared by login and search requests

use chrono::{Datelike, Utc};

use crate::definition::{Definition, SettingKind};
use crate::record::SearchQuery;
use crate::settings::IndexerSettings;
use crate::template::{TemplateContext, Value};

/// Context every request starts from
///
/// # Arguments
/// * `definition` - Definition whose settings are exposed as `.Config.<name>`
/// * `settings` - User values; unset items fall back to their defaults
/// * `site_link` - Current site link, exposed as `.Config.sitelink`
pub fn base_context(
    definition: &Definition,
    settings: &IndexerSettings,
    site_link: &str,
) -> TemplateContext {
    let mut ctx = TemplateContext::new();
    for item in &definition.settings {
        let name = format!(".Config.{}", item.name);
        let user = settings.get(&item.name);
        let value = match &item.kind {
            SettingKind::Text { default } => match user {
                Some(value) => Value::Str(value.as_text()),
                None => Value::Str(default.clone().unwrap_or_default()),
            },
            SettingKind::Password => Value::Str(user.map(|v| v.as_text()).unwrap_or_default()),
            SettingKind::Checkbox { default } => {
                if user.map_or(*default, |v| v.as_bool()) {
                    Value::Str("True".to_string())
                } else {
                    Value::Null
                }
            }
            SettingKind::Select { default, .. } => match user {
                Some(value) => Value::Str(value.as_text()),
                None => Value::Str(default.clone().unwrap_or_default()),
            },
            SettingKind::MultiSelect { default, .. } => match user {
                Some(value) => Value::List(value.as_list()),
                None => Value::List(default.clone()),
            },
            SettingKind::Info => continue,
        };
        ctx.set(name, value);
    }

    ctx.set(".Config.sitelink", site_link);
    ctx.set(".True", "True");
    ctx.set_null(".False");
    ctx.set(".Today.Year", Utc::now().year().to_string());
    ctx
}

/// Adds the `.Query.*`, `.Keywords` and `.Categories` variables
///
/// # Arguments
/// * `keywords` - Query keywords after the definition's keyword filters
/// * `tracker_categories` - Tracker category ids the query maps to
pub fn add_query(
    ctx: &mut TemplateContext,
    query: &SearchQuery,
    keywords: &str,
    tracker_categories: &[String],
) {
    let number = |n: Option<u64>| n.map(|n| n.to_string());
    let text = |s: &Option<String>| s.clone().filter(|s| !s.trim().is_empty());

    ctx.set(".Query.Type", query.query_type.as_str());
    ctx.set(".Query.Q", query.search_term.clone().unwrap_or_default());
    ctx.set(".Query.Keywords", query.keywords());
    ctx.set(".Query.Series", text(&query.search_term).filter(|_| query.season.is_some()));
    ctx.set(".Query.Season", query.season.map(|s| s.to_string()));
    ctx.set(".Query.Ep", text(&query.episode));
    ctx.set(".Query.Year", query.year.map(|y| y.to_string()));
    ctx.set(".Query.IMDBID", text(&query.imdb_id));
    ctx.set(".Query.IMDBIDShort", query.imdb_id_short());
    ctx.set(".Query.TMDBID", number(query.tmdb_id));
    ctx.set(".Query.TVDBID", number(query.tvdb_id));
    ctx.set(".Query.TVMazeID", number(query.tvmaze_id));
    ctx.set(".Query.TraktID", number(query.trakt_id));
    ctx.set(".Query.DoubanID", number(query.douban_id));
    ctx.set(".Query.Album", text(&query.album));
    ctx.set(".Query.Artist", text(&query.artist));
    ctx.set(".Query.Author", text(&query.author));
    ctx.set(".Query.Title", text(&query.title));
    ctx.set(".Query.Genre", text(&query.genre));
    ctx.set(".Query.Limit", query.limit.map(|l| l.to_string()));
    ctx.set(".Query.Offset", query.offset.map(|o| o.to_string()));
    ctx.set(
        ".Query.Categories",
        query.categories.iter().map(u32::to_string).collect::<Vec<_>>(),
    );
    let is_id_search = query.imdb_id.is_some()
        || [query.tmdb_id, query.tvdb_id, query.tvmaze_id, query.trakt_id, query.douban_id]
            .iter()
            .any(Option::is_some);
    ctx.set(".Query.IsIdSearch", is_id_search.then(|| "True".to_string()));
    ctx.set(".Query.IsRssSearch", query.keywords().is_empty().then(|| "True".to_string()));

    ctx.set(".Keywords", keywords);
    ctx.set(".Categories", tracker_categories.to_vec());
}
