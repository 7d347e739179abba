use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// The language-specific fields of a news entry.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EntryTranslation {
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub is_published: bool,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NewsEntry {
    pub id: String,
    pub author_id: Option<i32>,
    pub pub_date: Option<DateTime<Utc>>,
    pub image: Option<String>,
    pub thumbnail: Option<String>,
    /// Keyed by language code.
    pub translations: BTreeMap<String, EntryTranslation>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl NewsEntry {
    pub fn translation(&self, language: &str) -> Option<&EntryTranslation> {
        self.translations.get(language)
    }

    pub fn translation_mut(&mut self, language: &str) -> Option<&mut EntryTranslation> {
        self.translations.get_mut(language)
    }

    /// Picks the translation for `language`, then `fallback`, then the first one stored.
    pub fn preferred_translation(&self, language: &str, fallback: &str) -> Option<(&str, &EntryTranslation)> {
        self.translations
            .get_key_value(language)
            .or_else(|| self.translations.get_key_value(fallback))
            .or_else(|| self.translations.iter().next())
            .map(|(lang, t)| (lang.as_str(), t))
    }

    /// Same order as [`Self::preferred_translation`], skipping translations that are not published.
    pub fn published_translation(&self, language: &str, fallback: &str) -> Option<(&str, &EntryTranslation)> {
        let published = |lang: &str| self.translations.get_key_value(lang).filter(|(_, t)| t.is_published);
        published(language)
            .or_else(|| published(fallback))
            .or_else(|| self.translations.iter().find(|(_, t)| t.is_published))
            .map(|(lang, t)| (lang.as_str(), t))
    }

    pub fn is_published_in(&self, language: &str) -> bool {
        self.translation(language).map_or(false, |t| t.is_published)
    }

    pub fn has_published_translation(&self) -> bool {
        self.translations.values().any(|t| t.is_published)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.pub_date.map_or(true, |date| date <= now)
    }

    /// Public in `language` at `now`.
    pub fn is_public(&self, language: &str, now: DateTime<Utc>) -> bool {
        self.is_published_in(language) && self.is_due(now)
    }

    pub fn in_category(&self, slug: &str) -> bool {
        self.categories.iter().any(|c| c == slug)
    }

    pub fn has_tag(&self, slug: &str) -> bool {
        self.tags.iter().any(|t| t == slug)
    }

    /// Detail path relative to the news mount point, e.g. `2024/3/9/my-slug/`.
    pub fn relative_url(&self, slug: &str) -> String {
        match self.pub_date {
            Some(date) => format!("{}/{}/{}/{}/", date.year(), date.month(), date.day(), slug),
            None => format!("{}/", slug),
        }
    }

    pub fn relative_preview_url(slug: &str) -> String {
        format!("preview/{}/", slug)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CategoryTranslation {
    pub title: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Category {
    pub slug: String,
    pub parent: Option<String>,
    #[serde(default)]
    pub hide_on_list: bool,
    pub translations: BTreeMap<String, CategoryTranslation>,
    pub created_at: DateTime<Utc>,
}

impl Category {
    pub fn title(&self, language: &str, fallback: &str) -> String {
        self.translations
            .get(language)
            .or_else(|| self.translations.get(fallback))
            .or_else(|| self.translations.values().next())
            .map(|t| t.title.clone())
            .unwrap_or_else(|| self.slug.clone())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TagTranslation {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Tag {
    pub slug: String,
    pub translations: BTreeMap<String, TagTranslation>,
}

impl Tag {
    pub fn name(&self, language: &str, fallback: &str) -> String {
        self.translations
            .get(language)
            .or_else(|| self.translations.get(fallback))
            .or_else(|| self.translations.values().next())
            .map(|t| t.name.clone())
            .unwrap_or_else(|| self.slug.clone())
    }
}

/// An account from the users database. Authors of entries are users too.
#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub display_name: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_active: bool,
    pub last_login_time: Option<String>,
}

/// Everything the resolver needs for one request, read in a single transaction.
#[derive(Debug, Default, Clone)]
pub struct NewsSnapshot {
    pub entries: Vec<NewsEntry>,
    pub categories: Vec<Category>,
    pub tags: Vec<Tag>,
    /// (language, slug) -> position in `entries`, taken from the store's slug index.
    pub slugs: HashMap<(String, String), usize>,
}

impl NewsSnapshot {
    #[cfg(test)]
    pub(crate) fn from_parts(entries: Vec<NewsEntry>, categories: Vec<Category>, tags: Vec<Tag>) -> Self {
        let slugs = entries
            .iter()
            .enumerate()
            .flat_map(|(pos, entry)| {
                entry
                    .translations
                    .iter()
                    .map(move |(language, t)| ((language.clone(), t.slug.clone()), pos))
            })
            .collect();
        NewsSnapshot { entries, categories, tags, slugs }
    }

    pub fn entry_by_slug(&self, language: &str, slug: &str) -> Option<&NewsEntry> {
        self.slugs
            .get(&(language.to_string(), slug.to_string()))
            .and_then(|&pos| self.entries.get(pos))
    }

    pub fn category(&self, slug: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.slug == slug)
    }

    pub fn tag(&self, slug: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.slug == slug)
    }

    pub fn entry(&self, id: &str) -> Option<&NewsEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Notification {
    pub message: String,
    pub r#type: String, // 'success' or 'error'
}

pub mod db_operations;
pub mod visibility;
