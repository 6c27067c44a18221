//! User-supplied values for a definition's settings

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Value of one setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

impl SettingValue {
    /// Text form; checkboxes render `true`/`false`, lists are comma-joined
    pub fn as_text(&self) -> String {
        match self {
            SettingValue::Bool(b) => b.to_string(),
            SettingValue::Text(s) => s.clone(),
            SettingValue::List(items) => items.join(","),
        }
    }

    /// Checkbox reading; text values count when they say `true`/`on`/`1`
    pub fn as_bool(&self) -> bool {
        match self {
            SettingValue::Bool(b) => *b,
            SettingValue::Text(s) => {
                matches!(s.trim().to_lowercase().as_str(), "true" | "on" | "1")
            }
            SettingValue::List(items) => !items.is_empty(),
        }
    }

    pub fn as_list(&self) -> Vec<String> {
        match self {
            SettingValue::List(items) => items.clone(),
            SettingValue::Text(s) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            SettingValue::Bool(b) => vec![b.to_string()],
        }
    }
}

/// Configuration of one indexer instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerSettings {
    /// Values keyed by setting name
    pub values: HashMap<String, SettingValue>,
    /// Overrides the definition's default link
    pub site_link: Option<String>,
    /// Answer to a pending login captcha
    pub captcha: Option<String>,
}

impl IndexerSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, name: impl Into<String>, value: SettingValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn with_text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_value(name, SettingValue::Text(value.into()))
    }

    pub fn with_site_link(mut self, link: impl Into<String>) -> Self {
        self.site_link = Some(link.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&SettingValue> {
        self.values.get(name)
    }

    /// Text value of a setting, `None` when unset
    pub fn text(&self, name: &str) -> Option<String> {
        self.values.get(name).map(SettingValue::as_text)
    }
}
