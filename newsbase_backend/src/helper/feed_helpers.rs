//! RSS feeds and the sitemap.
//!
//! Feeds are language-scoped only when the site is multilingual and the
//! `any` variant was not requested.

use crate::config::NewsConfig;
use crate::helper::public_helpers::{localized_url, NewsError};
use crate::helper::sanitization_helpers;
use crate::models::visibility::{self, EntryFilter, LookupError, VisibilityQuery};
use crate::models::{NewsEntry, NewsSnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tera::{Context, Tera};

const SITEMAP_CHANGEFREQ: &str = "monthly";
const SITEMAP_PRIORITY: &str = "0.5";

#[derive(Debug, Clone, PartialEq)]
pub enum FeedKind {
    All,
    Author(i32),
    Tagged(String),
}

#[derive(Debug, Serialize)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: Option<String>,
    pub guid: String,
}

#[derive(Debug, Serialize)]
pub struct Feed {
    pub title: String,
    pub description: String,
    pub link: String,
    pub feed_url: String,
    pub language: Option<String>,
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Serialize)]
pub struct SitemapUrl {
    pub loc: String,
    pub lastmod: Option<String>,
    pub changefreq: &'static str,
    pub priority: &'static str,
}

fn feed_path(kind: &FeedKind, any_language: bool) -> String {
    let prefix = if any_language { "rss/any/" } else { "rss/" };
    match kind {
        FeedKind::All => prefix.to_string(),
        FeedKind::Author(id) => format!("{}author/{}/", prefix, id),
        FeedKind::Tagged(slug) => format!("{}tagged/{}/", prefix, slug),
    }
}

pub fn feed_title(news: &NewsConfig, language: &str, language_scoped: bool) -> String {
    if language_scoped {
        format!("{} blog entries in {}", news.site_name, news.language_name(language))
    } else {
        format!("{} blog entries", news.site_name)
    }
}

fn feed_item(entry: &NewsEntry, language: &str, news: &NewsConfig) -> Option<FeedItem> {
    let (shown_language, translation) = entry.published_translation(language, &news.default_language)?;
    let link = localized_url(news, news.absolute_url(&entry.relative_url(&translation.slug)), shown_language);
    let excerpt = sanitization_helpers::render_markdown(&translation.excerpt);
    Some(FeedItem {
        title: sanitization_helpers::plain_text(&translation.title),
        description: sanitization_helpers::plain_text(&excerpt),
        pub_date: entry.pub_date.map(|d| d.to_rfc2822()),
        guid: link.clone(),
        link,
    })
}

pub fn build_feed(
    snapshot: &NewsSnapshot,
    authors: &HashMap<i32, String>,
    news: &NewsConfig,
    language: &str,
    any_language: bool,
    kind: &FeedKind,
    now: DateTime<Utc>,
) -> Result<Feed, NewsError> {
    let language_scoped = news.is_multilingual() && !any_language;
    let query = if language_scoped {
        VisibilityQuery::for_language(language, now)
    } else {
        VisibilityQuery::any_language(now)
    };
    let base_title = feed_title(news, language, language_scoped);

    let (title, link, filter) = match kind {
        FeedKind::All => (base_title, news.absolute_url(""), None),
        FeedKind::Author(id) => {
            let author = authors.get(id).ok_or(LookupError::Author(*id))?;
            (format!("{} by {}", base_title, author), news.absolute_url(""), Some(EntryFilter::Author(*id)))
        }
        FeedKind::Tagged(slug) => {
            let tag = snapshot.tag(slug).ok_or_else(|| LookupError::Tag(slug.clone()))?;
            (
                format!("{} tagged {}", base_title, tag.name(language, &news.default_language)),
                news.absolute_url(&format!("tag/{}/", slug)),
                Some(EntryFilter::Tag(slug.clone())),
            )
        }
    };

    let extra: Vec<EntryFilter> = filter.into_iter().collect();
    let mut entries = visibility::published(&snapshot.entries, &query, &extra, &[]);
    entries.truncate(news.feed_limit);

    let item_language = if language_scoped { language } else { news.default_language.as_str() };
    let items = entries
        .iter()
        .filter_map(|entry| feed_item(entry, item_language, news))
        .collect();

    Ok(Feed {
        description: title.clone(),
        title,
        link,
        feed_url: news.absolute_url(&feed_path(kind, any_language)),
        language: language_scoped.then(|| language.to_string()),
        items,
    })
}

pub fn render_feed(tera: &Tera, feed: &Feed) -> Result<String, NewsError> {
    let mut ctx = Context::new();
    ctx.insert("feed", feed);
    Ok(tera.render("news/feed.xml", &ctx)?)
}

/// One URL per published translation of every public entry.
pub fn sitemap_urls(snapshot: &NewsSnapshot, news: &NewsConfig, now: DateTime<Utc>) -> Vec<SitemapUrl> {
    let entries = visibility::published(&snapshot.entries, &VisibilityQuery::any_language(now), &[], &[]);
    entries
        .iter()
        .flat_map(|entry| {
            entry
                .translations
                .iter()
                .filter(|(_, t)| t.is_published)
                .map(move |(language, t)| SitemapUrl {
                    loc: localized_url(news, news.absolute_url(&entry.relative_url(&t.slug)), language),
                    lastmod: entry.pub_date.map(|d| d.format("%Y-%m-%d").to_string()),
                    changefreq: SITEMAP_CHANGEFREQ,
                    priority: SITEMAP_PRIORITY,
                })
        })
        .collect()
}

pub fn render_sitemap(tera: &Tera, urls: &[SitemapUrl]) -> Result<String, NewsError> {
    let mut ctx = Context::new();
    ctx.insert("urls", urls);
    Ok(tera.render("news/sitemap.xml", &ctx)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LanguageConfig;
    use crate::models::{EntryTranslation, Tag, TagTranslation};
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn news(languages: &[&str]) -> NewsConfig {
        NewsConfig {
            site_name: "Example".to_string(),
            site_url: "https://example.org".to_string(),
            mount_path: "/news".to_string(),
            default_language: "en".to_string(),
            languages: languages
                .iter()
                .map(|code| LanguageConfig {
                    code: code.to_string(),
                    name: if *code == "de" { "Deutsch".to_string() } else { "English".to_string() },
                })
                .collect(),
            pagination_amount: 10,
            feed_limit: 10,
        }
    }

    fn entry(id: &str, days_ago: i64, author: Option<i32>, langs: &[(&str, bool)], tags: &[&str]) -> NewsEntry {
        NewsEntry {
            id: id.to_string(),
            author_id: author,
            pub_date: Some(now() - Duration::days(days_ago)),
            image: None,
            thumbnail: None,
            translations: langs
                .iter()
                .map(|(lang, published)| {
                    (
                        lang.to_string(),
                        EntryTranslation {
                            title: format!("{} <b>{}</b>", id, lang),
                            slug: format!("{}-{}", id, lang),
                            is_published: *published,
                            meta_title: None,
                            meta_description: None,
                            excerpt: "Excerpt".to_string(),
                            content: String::new(),
                        },
                    )
                })
                .collect(),
            categories: vec![],
            tags: tags.iter().map(|s| s.to_string()).collect(),
            created_at: now() - Duration::days(100),
        }
    }

    fn snapshot() -> NewsSnapshot {
        let mut names = BTreeMap::new();
        names.insert("en".to_string(), TagTranslation { name: "Releases".to_string() });
        NewsSnapshot::from_parts(
            (0..12)
                .map(|i| entry(&format!("e{:02}", i), i + 1, Some(7), &[("en", true)], &[]))
                .chain([
                    entry("german", 0, Some(8), &[("de", true)], &["releases"]),
                    entry("draft", 0, Some(8), &[("en", false)], &["releases"]),
                ])
                .collect(),
            vec![],
            vec![Tag { slug: "releases".to_string(), translations: names }],
        )
    }

    fn authors() -> HashMap<i32, String> {
        [(7, "Ada".to_string()), (8, "Bert".to_string())].into_iter().collect()
    }

    #[test]
    fn feed_is_limited_and_language_scoped() {
        let feed = build_feed(&snapshot(), &authors(), &news(&["en", "de"]), "en", false, &FeedKind::All, now()).unwrap();
        assert_eq!(feed.items.len(), 10);
        assert_eq!(feed.title, "Example blog entries in English");
        assert_eq!(feed.feed_url, "https://example.org/news/rss/");
        assert!(feed.items.iter().all(|i| !i.link.contains("german")));
        assert_eq!(feed.items[0].title, "e00 en");
    }

    #[test]
    fn any_language_feed_includes_all_languages() {
        let feed = build_feed(&snapshot(), &authors(), &news(&["en", "de"]), "en", true, &FeedKind::All, now()).unwrap();
        assert_eq!(feed.title, "Example blog entries");
        assert!(feed.items[0].link.contains("german-de"));
        assert_eq!(feed.language, None);
    }

    #[test]
    fn any_language_feed_uses_a_published_translation() {
        let snapshot = NewsSnapshot::from_parts(
            vec![entry("mixed", 1, Some(7), &[("en", false), ("de", true)], &[])],
            vec![],
            vec![],
        );
        let feed = build_feed(&snapshot, &authors(), &news(&["en", "de"]), "en", true, &FeedKind::All, now()).unwrap();
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].title, "mixed de");
        assert_eq!(feed.items[0].link, "https://example.org/news/2024/2/29/mixed-de/?language=de");
    }

    #[test]
    fn monolingual_site_ignores_language() {
        let feed = build_feed(&snapshot(), &authors(), &news(&["en"]), "en", false, &FeedKind::All, now()).unwrap();
        assert_eq!(feed.title, "Example blog entries");
    }

    #[test]
    fn author_and_tag_feeds() {
        let feed = build_feed(&snapshot(), &authors(), &news(&["en", "de"]), "de", false, &FeedKind::Author(8), now()).unwrap();
        assert_eq!(feed.title, "Example blog entries in Deutsch by Bert");
        assert_eq!(feed.items.len(), 1);

        let tagged = FeedKind::Tagged("releases".to_string());
        let feed = build_feed(&snapshot(), &authors(), &news(&["en", "de"]), "en", true, &tagged, now()).unwrap();
        assert_eq!(feed.title, "Example blog entries tagged Releases");
        assert_eq!(feed.feed_url, "https://example.org/news/rss/any/tagged/releases/");
        assert_eq!(feed.items.len(), 1);
    }

    #[test]
    fn unknown_author_or_tag_is_not_found() {
        let err = build_feed(&snapshot(), &authors(), &news(&["en"]), "en", false, &FeedKind::Author(99), now()).unwrap_err();
        assert!(err.is_not_found());
        let err = build_feed(&snapshot(), &authors(), &news(&["en"]), "en", false, &FeedKind::Tagged("x".into()), now()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn sitemap_lists_published_translations() {
        let urls = sitemap_urls(&snapshot(), &news(&["en", "de"]), now());
        assert_eq!(urls.len(), 13);
        assert!(urls.iter().any(|u| u.loc == "https://example.org/news/2024/3/1/german-de/?language=de"));
        assert!(urls.iter().all(|u| u.changefreq == "monthly" && u.priority == "0.5"));
        assert!(!urls.iter().any(|u| u.loc.contains("draft")));
    }
}
