//! Publication and visibility rules for news entries.
//!
//! Every function here is a pure query over a [`NewsSnapshot`](super::NewsSnapshot)
//! slice. The language and the point in time are always explicit arguments.

use crate::models::{Category, NewsEntry};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashSet;
use thiserror::Error;

pub const DEFAULT_RECENT_LIMIT: usize = 3;

#[derive(Error, Debug, PartialEq)]
pub enum LookupError {
    #[error("Category '{0}' not found")]
    Category(String),
    #[error("Tag '{0}' not found")]
    Tag(String),
    #[error("Author {0} not found")]
    Author(i32),
    #[error("News entry '{0}' not found")]
    Entry(String),
}

/// A predicate over entries, used to narrow or exclude results.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryFilter {
    Author(i32),
    Tag(String),
    Category(String),
    AnyCategory(HashSet<String>),
    Entry(String),
}

impl EntryFilter {
    pub fn matches(&self, entry: &NewsEntry) -> bool {
        match self {
            EntryFilter::Author(id) => entry.author_id == Some(*id),
            EntryFilter::Tag(slug) => entry.has_tag(slug),
            EntryFilter::Category(slug) => entry.in_category(slug),
            EntryFilter::AnyCategory(slugs) => entry.categories.iter().any(|c| slugs.contains(c)),
            EntryFilter::Entry(id) => entry.id == *id,
        }
    }

    /// Membership in `slug` or in one of its direct children.
    pub fn category_or_children(slug: &str, categories: &[Category]) -> Self {
        let mut slugs: HashSet<String> = categories
            .iter()
            .filter(|c| c.parent.as_deref() == Some(slug))
            .map(|c| c.slug.clone())
            .collect();
        slugs.insert(slug.to_string());
        EntryFilter::AnyCategory(slugs)
    }

    /// Membership in any category flagged `hide_on_list`. `None` when no category is hidden.
    pub fn hidden_categories(categories: &[Category]) -> Option<Self> {
        let slugs: HashSet<String> = categories
            .iter()
            .filter(|c| c.hide_on_list)
            .map(|c| c.slug.clone())
            .collect();
        if slugs.is_empty() {
            None
        } else {
            Some(EntryFilter::AnyCategory(slugs))
        }
    }
}

/// Who is asking, in which language, and when.
#[derive(Debug, Clone, Copy)]
pub struct VisibilityQuery<'a> {
    pub language: Option<&'a str>,
    pub check_language: bool,
    pub now: DateTime<Utc>,
}

impl<'a> VisibilityQuery<'a> {
    pub fn for_language(language: &'a str, now: DateTime<Utc>) -> Self {
        VisibilityQuery { language: Some(language), check_language: true, now }
    }

    pub fn any_language(now: DateTime<Utc>) -> Self {
        VisibilityQuery { language: None, check_language: false, now }
    }

    fn admits(&self, entry: &NewsEntry) -> bool {
        let published = if self.check_language {
            match self.language {
                Some(language) => entry.is_published_in(language),
                None => false,
            }
        } else {
            entry.has_published_translation()
        };
        published && entry.is_due(self.now)
    }
}

/// Newest first. Undated entries come after every dated one.
pub fn newest_first(a: &NewsEntry, b: &NewsEntry) -> Ordering {
    match (a.pub_date, b.pub_date) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| b.created_at.cmp(&a.created_at))
    .then_with(|| a.id.cmp(&b.id))
}

fn sorted_unique<'a>(mut matched: Vec<&'a NewsEntry>) -> Vec<&'a NewsEntry> {
    let mut seen = HashSet::new();
    matched.retain(|&entry| seen.insert(entry.id.as_str()));
    matched.sort_by(|a, b| newest_first(a, b));
    matched
}

/// Entries visible under `query`, narrowed by every `extra` filter and
/// without anything matching an `exclude` filter.
pub fn published<'a>(
    entries: &'a [NewsEntry],
    query: &VisibilityQuery,
    extra: &[EntryFilter],
    exclude: &[EntryFilter],
) -> Vec<&'a NewsEntry> {
    let matched = entries
        .iter()
        .filter(|entry| query.admits(entry))
        .filter(|entry| extra.iter().all(|f| f.matches(entry)))
        .filter(|entry| !exclude.iter().any(|f| f.matches(entry)))
        .collect();
    sorted_unique(matched)
}

/// The `limit` newest published entries, optionally restricted to a category
/// and skipping one entry (the one currently displayed, typically).
pub fn recent<'a>(
    entries: &'a [NewsEntry],
    query: &VisibilityQuery,
    limit: usize,
    exclude: Option<&str>,
    category: Option<&str>,
) -> Vec<&'a NewsEntry> {
    let extra: Vec<EntryFilter> = category.map(|slug| EntryFilter::Category(slug.to_string())).into_iter().collect();
    let excluded: Vec<EntryFilter> = exclude.map(|id| EntryFilter::Entry(id.to_string())).into_iter().collect();

    let mut result = published(entries, query, &extra, &excluded);
    result.truncate(limit);
    result
}

/// Published entries filed directly under the category `slug`, in any language.
pub fn category_entries<'a>(
    entries: &'a [NewsEntry],
    categories: &[Category],
    slug: &str,
    now: DateTime<Utc>,
) -> Result<Vec<&'a NewsEntry>, LookupError> {
    if !categories.iter().any(|c| c.slug == slug) {
        return Err(LookupError::Category(slug.to_string()));
    }
    let query = VisibilityQuery::any_language(now);
    Ok(published(entries, &query, &[EntryFilter::Category(slug.to_string())], &[]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryTranslation, EntryTranslation};
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn translation(slug: &str, is_published: bool) -> EntryTranslation {
        EntryTranslation {
            title: slug.to_uppercase(),
            slug: slug.to_string(),
            is_published,
            meta_title: None,
            meta_description: None,
            excerpt: String::new(),
            content: String::new(),
        }
    }

    fn entry(id: &str, pub_date: Option<DateTime<Utc>>, langs: &[(&str, bool)]) -> NewsEntry {
        let translations = langs
            .iter()
            .map(|(lang, published)| (lang.to_string(), translation(&format!("{}-{}", id, lang), *published)))
            .collect();
        NewsEntry {
            id: id.to_string(),
            author_id: None,
            pub_date,
            image: None,
            thumbnail: None,
            translations,
            categories: Vec::new(),
            tags: Vec::new(),
            created_at: now() - Duration::days(30),
        }
    }

    fn category(slug: &str, parent: Option<&str>, hide_on_list: bool) -> Category {
        let mut translations = BTreeMap::new();
        translations.insert("en".to_string(), CategoryTranslation { title: slug.to_string() });
        Category {
            slug: slug.to_string(),
            parent: parent.map(|p| p.to_string()),
            hide_on_list,
            translations,
            created_at: now(),
        }
    }

    fn ids(entries: &[&NewsEntry]) -> Vec<String> {
        entries.iter().map(|e| e.id.clone()).collect()
    }

    #[test]
    fn language_decides_visibility() {
        let entries = vec![entry("a", None, &[("en", true), ("de", false)])];

        let en = published(&entries, &VisibilityQuery::for_language("en", now()), &[], &[]);
        let de = published(&entries, &VisibilityQuery::for_language("de", now()), &[], &[]);

        assert_eq!(ids(&en), vec!["a"]);
        assert!(de.is_empty());
    }

    #[test]
    fn future_pub_date_is_hidden_until_it_passes() {
        let tomorrow = now() + Duration::days(1);
        let entries = vec![entry("a", Some(tomorrow), &[("en", true)])];

        assert!(published(&entries, &VisibilityQuery::for_language("en", now()), &[], &[]).is_empty());

        let later = VisibilityQuery::for_language("en", tomorrow + Duration::seconds(1));
        assert_eq!(ids(&published(&entries, &later, &[], &[])), vec!["a"]);

        let exactly = VisibilityQuery::for_language("en", tomorrow);
        assert_eq!(published(&entries, &exactly, &[], &[]).len(), 1);
    }

    #[test]
    fn missing_language_yields_nothing_when_checking() {
        let entries = vec![entry("a", None, &[("en", true)])];
        let query = VisibilityQuery { language: None, check_language: true, now: now() };
        assert!(published(&entries, &query, &[], &[]).is_empty());
    }

    #[test]
    fn any_language_needs_one_published_translation() {
        let entries = vec![
            entry("a", None, &[("en", true)]),
            entry("b", None, &[("de", true)]),
            entry("c", None, &[("de", false), ("en", false)]),
        ];
        let result = published(&entries, &VisibilityQuery::any_language(now()), &[], &[]);
        assert_eq!(ids(&result), vec!["a", "b"]);
    }

    #[test]
    fn membership_matches_the_public_invariant() {
        let entries = vec![
            entry("a", Some(now() - Duration::hours(1)), &[("en", true)]),
            entry("b", Some(now() + Duration::hours(1)), &[("en", true)]),
            entry("c", None, &[("en", false)]),
            entry("d", None, &[("en", true), ("fr", true)]),
            entry("e", Some(now()), &[("fr", true)]),
        ];
        for lang in ["en", "fr", "de"] {
            let query = VisibilityQuery::for_language(lang, now());
            let result = published(&entries, &query, &[], &[]);
            for e in &entries {
                let expected = e.is_public(lang, now());
                assert_eq!(result.iter().any(|r| r.id == e.id), expected, "entry {} in {}", e.id, lang);
            }
        }
    }

    #[test]
    fn ordering_is_newest_first_with_undated_last() {
        let entries = vec![
            entry("old", Some(now() - Duration::days(3)), &[("en", true)]),
            entry("undated", None, &[("en", true)]),
            entry("new", Some(now() - Duration::days(1)), &[("en", true)]),
        ];
        let result = published(&entries, &VisibilityQuery::for_language("en", now()), &[], &[]);
        assert_eq!(ids(&result), vec!["new", "old", "undated"]);
    }

    #[test]
    fn duplicates_are_collapsed() {
        let a = entry("a", None, &[("en", true)]);
        let entries = vec![a.clone(), a];
        let result = published(&entries, &VisibilityQuery::for_language("en", now()), &[], &[]);
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn published_is_idempotent() {
        let entries = vec![
            entry("x", None, &[("en", true)]),
            entry("y", None, &[("en", true)]),
            entry("z", Some(now() - Duration::days(2)), &[("en", true)]),
        ];
        let query = VisibilityQuery::for_language("en", now());
        assert_eq!(ids(&published(&entries, &query, &[], &[])), ids(&published(&entries, &query, &[], &[])));
    }

    #[test]
    fn extra_and_exclude_filters_apply() {
        let mut a = entry("a", None, &[("en", true)]);
        a.categories = vec!["sports".to_string()];
        a.author_id = Some(7);
        let mut b = entry("b", None, &[("en", true)]);
        b.categories = vec!["sports".to_string(), "internal".to_string()];
        let mut c = entry("c", None, &[("en", true)]);
        c.tags = vec!["rust".to_string()];
        let entries = vec![a, b, c];
        let query = VisibilityQuery::for_language("en", now());

        let sports = published(&entries, &query, &[EntryFilter::Category("sports".into())], &[]);
        assert_eq!(ids(&sports), vec!["a", "b"]);

        let visible_sports = published(
            &entries,
            &query,
            &[EntryFilter::Category("sports".into())],
            &[EntryFilter::Category("internal".into())],
        );
        assert_eq!(ids(&visible_sports), vec!["a"]);

        assert_eq!(ids(&published(&entries, &query, &[EntryFilter::Author(7)], &[])), vec!["a"]);
        assert_eq!(ids(&published(&entries, &query, &[EntryFilter::Tag("rust".into())], &[])), vec!["c"]);
    }

    #[test]
    fn recent_caps_to_limit_newest_first() {
        let entries: Vec<NewsEntry> = (1..=4)
            .map(|day| entry(&format!("e{}", day), Some(now() - Duration::days(day)), &[("en", true)]))
            .collect();
        let query = VisibilityQuery::for_language("en", now());

        let result = recent(&entries, &query, DEFAULT_RECENT_LIMIT, None, None);
        assert_eq!(ids(&result), vec!["e1", "e2", "e3"]);

        let all = published(&entries, &query, &[], &[]);
        assert!(result.iter().all(|r| all.iter().any(|p| p.id == r.id)));
        assert!(recent(&entries, &query, 0, None, None).is_empty());
    }

    #[test]
    fn recent_never_returns_the_excluded_entry() {
        let entries = vec![
            entry("a", Some(now() - Duration::days(1)), &[("en", true)]),
            entry("b", Some(now() - Duration::days(2)), &[("en", true)]),
        ];
        let query = VisibilityQuery::any_language(now());
        let result = recent(&entries, &query, 10, Some("a"), None);
        assert_eq!(ids(&result), vec!["b"]);
    }

    #[test]
    fn recent_respects_category() {
        let mut a = entry("a", None, &[("en", true)]);
        a.categories = vec!["news".to_string()];
        let b = entry("b", None, &[("en", true)]);
        let entries = vec![a, b];
        let query = VisibilityQuery::for_language("en", now());
        assert_eq!(ids(&recent(&entries, &query, 3, None, Some("news"))), vec!["a"]);
    }

    #[test]
    fn category_entries_distinguishes_empty_from_unknown() {
        let categories = vec![category("foo", None, false), category("bar", None, false)];
        let mut a = entry("a", None, &[("en", true)]);
        a.categories = vec!["bar".to_string()];
        let entries = vec![a];

        assert_eq!(category_entries(&entries, &categories, "foo", now()), Ok(Vec::new()));
        assert_eq!(
            category_entries(&entries, &categories, "doesnotexist", now()),
            Err(LookupError::Category("doesnotexist".to_string()))
        );
        assert_eq!(ids(&category_entries(&entries, &categories, "bar", now()).unwrap()), vec!["a"]);
    }

    #[test]
    fn category_entries_ignores_children_and_unpublished() {
        let categories = vec![category("parent", None, false), category("child", Some("parent"), false)];
        let mut in_child = entry("child-entry", None, &[("en", true)]);
        in_child.categories = vec!["child".to_string()];
        let mut draft = entry("draft", None, &[("en", false)]);
        draft.categories = vec!["parent".to_string()];
        let mut scheduled = entry("scheduled", Some(now() + Duration::days(1)), &[("en", true)]);
        scheduled.categories = vec!["parent".to_string()];
        let entries = vec![in_child, draft, scheduled];

        assert!(category_entries(&entries, &categories, "parent", now()).unwrap().is_empty());
    }

    #[test]
    fn category_or_children_and_hidden_filters() {
        let categories = vec![
            category("parent", None, false),
            category("child", Some("parent"), true),
            category("grandchild", Some("child"), false),
        ];
        let mut e = entry("e", None, &[("en", true)]);
        e.categories = vec!["child".to_string()];
        let mut g = entry("g", None, &[("en", true)]);
        g.categories = vec!["grandchild".to_string()];

        let filter = EntryFilter::category_or_children("parent", &categories);
        assert!(filter.matches(&e));
        assert!(!filter.matches(&g));

        let hidden = EntryFilter::hidden_categories(&categories).expect("one hidden category");
        assert!(hidden.matches(&e));
        assert!(EntryFilter::hidden_categories(&categories[..1]).is_none());
    }
}
