use crate::config::NewsConfig;
use crate::helper::sanitization_helpers;
use crate::models::db_operations::{news_db_operations, users_db_operations};
use crate::models::visibility::{self, EntryFilter, LookupError, VisibilityQuery, DEFAULT_RECENT_LIMIT};
use crate::models::{EntryTranslation, NewsEntry, NewsSnapshot};
use crate::DbPool;
use chrono::{DateTime, Datelike, Utc};
use redb::Database;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NewsError {
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("Store error: {0}")]
    Db(#[from] news_db_operations::DbError),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Users database error: {0}")]
    Users(#[from] rusqlite::Error),
    #[error("Template error: {0}")]
    Template(#[from] tera::Error),
    #[error("Page {0} does not exist")]
    PageOutOfRange(usize),
}

impl NewsError {
    /// Errors that should be answered with 404 rather than 500.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            NewsError::Lookup(_) | NewsError::PageOutOfRange(_) | NewsError::Db(news_db_operations::DbError::NotFound(_))
        )
    }
}

pub fn load_snapshot(db: &Database) -> Result<NewsSnapshot, NewsError> {
    Ok(news_db_operations::read_snapshot(db)?)
}

/// Display names of every user, keyed by id.
pub fn author_names(pool: &DbPool) -> Result<HashMap<i32, String>, NewsError> {
    let conn = pool.get()?;
    let users = users_db_operations::read_all_users(&conn)?;
    Ok(users.into_iter().map(|u| (u.id, u.display_name)).collect())
}

// --- View models ---

#[derive(Debug, Serialize, Clone)]
pub struct CategoryLink {
    pub slug: String,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct TagLink {
    pub slug: String,
    pub name: String,
    pub url: String,
}

/// An entry as shown in one language.
#[derive(Debug, Serialize, Clone)]
pub struct EntryView {
    pub id: String,
    pub language: String,
    pub title: String,
    pub slug: String,
    pub meta_title: String,
    pub meta_description: String,
    pub excerpt_html: String,
    pub content_html: String,
    pub is_published: bool,
    pub pub_date: Option<DateTime<Utc>>,
    pub pub_date_display: Option<String>,
    pub url: String,
    pub absolute_url: String,
    pub preview_url: String,
    pub image: Option<String>,
    pub thumbnail: Option<String>,
    pub author: Option<String>,
    pub categories: Vec<CategoryLink>,
    pub tags: Vec<TagLink>,
}

/// Appends `?language=` on multilingual sites, so a link opens the translation it was built from.
pub fn localized_url(news: &NewsConfig, url: String, language: &str) -> String {
    if news.is_multilingual() {
        format!("{}?language={}", url, language)
    } else {
        url
    }
}

/// The public view of `entry`: only published translations are considered, the
/// requested language first, then the default language, then any other.
pub fn present_entry(
    entry: &NewsEntry,
    language: &str,
    news: &NewsConfig,
    snapshot: &NewsSnapshot,
    authors: &HashMap<i32, String>,
) -> Option<EntryView> {
    let (shown_language, translation) = entry.published_translation(language, &news.default_language)?;
    let detail = entry.relative_url(&translation.slug);
    Some(build_view(entry, (shown_language, translation), &detail, language, news, snapshot, authors))
}

/// The staff view of `entry`, drafts included. Entries that are not public in
/// the shown language link to their preview instead of the detail page.
pub fn present_staff_entry(
    entry: &NewsEntry,
    language: &str,
    news: &NewsConfig,
    snapshot: &NewsSnapshot,
    authors: &HashMap<i32, String>,
    now: DateTime<Utc>,
) -> Option<EntryView> {
    let (shown_language, translation) = entry.preferred_translation(language, &news.default_language)?;
    let target = if entry.is_public(shown_language, now) {
        entry.relative_url(&translation.slug)
    } else {
        NewsEntry::relative_preview_url(&translation.slug)
    };
    Some(build_view(entry, (shown_language, translation), &target, language, news, snapshot, authors))
}

fn build_view(
    entry: &NewsEntry,
    (shown_language, translation): (&str, &EntryTranslation),
    target: &str,
    language: &str,
    news: &NewsConfig,
    snapshot: &NewsSnapshot,
    authors: &HashMap<i32, String>,
) -> EntryView {
    let excerpt_html = sanitization_helpers::render_markdown(&translation.excerpt);

    let meta_description = match translation.meta_description.as_deref() {
        Some(description) if !description.trim().is_empty() => description.to_string(),
        _ => sanitization_helpers::truncate_words(&sanitization_helpers::plain_text(&excerpt_html), 30),
    };

    let categories = entry
        .categories
        .iter()
        .filter_map(|slug| snapshot.category(slug))
        .map(|c| CategoryLink {
            slug: c.slug.clone(),
            title: c.title(language, &news.default_language),
            url: news.url(&format!("category/{}/", c.slug)),
        })
        .collect();
    let tags = entry
        .tags
        .iter()
        .filter_map(|slug| snapshot.tag(slug))
        .map(|t| TagLink {
            slug: t.slug.clone(),
            name: t.name(language, &news.default_language),
            url: news.url(&format!("tag/{}/", t.slug)),
        })
        .collect();

    EntryView {
        id: entry.id.clone(),
        language: shown_language.to_string(),
        title: translation.title.clone(),
        slug: translation.slug.clone(),
        meta_title: translation.meta_title.clone().unwrap_or_else(|| translation.title.clone()),
        meta_description,
        excerpt_html,
        content_html: sanitization_helpers::render_markdown(&translation.content),
        is_published: translation.is_published,
        pub_date: entry.pub_date,
        pub_date_display: entry.pub_date.map(|d| d.format("%B %-d, %Y").to_string()),
        url: localized_url(news, news.url(target), shown_language),
        absolute_url: localized_url(news, news.absolute_url(target), shown_language),
        preview_url: localized_url(
            news,
            news.url(&NewsEntry::relative_preview_url(&translation.slug)),
            shown_language,
        ),
        image: entry.image.clone(),
        thumbnail: entry.thumbnail.clone(),
        author: entry.author_id.and_then(|id| authors.get(&id).cloned()),
        categories,
        tags,
    }
}

pub fn present_entries(
    entries: &[&NewsEntry],
    language: &str,
    news: &NewsConfig,
    snapshot: &NewsSnapshot,
    authors: &HashMap<i32, String>,
) -> Vec<EntryView> {
    entries
        .iter()
        .filter_map(|entry| present_entry(entry, language, news, snapshot, authors))
        .collect()
}

pub fn present_staff_entries(
    entries: &[&NewsEntry],
    language: &str,
    news: &NewsConfig,
    snapshot: &NewsSnapshot,
    authors: &HashMap<i32, String>,
    now: DateTime<Utc>,
) -> Vec<EntryView> {
    entries
        .iter()
        .filter_map(|entry| present_staff_entry(entry, language, news, snapshot, authors, now))
        .collect()
}

// --- Pagination ---

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: usize,
    pub num_pages: usize,
    pub total: usize,
    pub has_previous: bool,
    pub has_next: bool,
    pub previous_number: Option<usize>,
    pub next_number: Option<usize>,
}

/// Cuts `items` into pages of `per_page`. Page 1 of an empty list exists.
pub fn paginate<T>(items: Vec<T>, page: usize, per_page: usize) -> Result<Page<T>, NewsError> {
    let per_page = per_page.max(1);
    let total = items.len();
    let num_pages = ((total + per_page - 1) / per_page).max(1);
    if page == 0 || page > num_pages {
        return Err(NewsError::PageOutOfRange(page));
    }

    let items: Vec<T> = items.into_iter().skip((page - 1) * per_page).take(per_page).collect();
    Ok(Page {
        items,
        number: page,
        num_pages,
        total,
        has_previous: page > 1,
        has_next: page < num_pages,
        previous_number: (page > 1).then(|| page - 1),
        next_number: (page < num_pages).then(|| page + 1),
    })
}

// --- Queries behind the public pages ---

/// The main list. Entries in hidden categories never show; superusers also see unpublished ones.
pub fn list_entries<'a>(snapshot: &'a NewsSnapshot, language: &str, is_superuser: bool, now: DateTime<Utc>) -> Vec<&'a NewsEntry> {
    let exclude: Vec<EntryFilter> = EntryFilter::hidden_categories(&snapshot.categories).into_iter().collect();
    if is_superuser {
        let mut entries: Vec<&NewsEntry> = snapshot
            .entries
            .iter()
            .filter(|entry| !exclude.iter().any(|f| f.matches(entry)))
            .collect();
        entries.sort_by(|a, b| visibility::newest_first(a, b));
        return entries;
    }
    visibility::published(&snapshot.entries, &VisibilityQuery::for_language(language, now), &[], &exclude)
}

pub fn find_public_entry<'a>(
    snapshot: &'a NewsSnapshot,
    language: &str,
    slug: &str,
    now: DateTime<Utc>,
) -> Result<&'a NewsEntry, NewsError> {
    snapshot
        .entry_by_slug(language, slug)
        .filter(|entry| entry.is_public(language, now))
        .ok_or_else(|| LookupError::Entry(slug.to_string()).into())
}

/// Like [`find_public_entry`], but the publication date must fall on the given day.
pub fn find_dated_entry<'a>(
    snapshot: &'a NewsSnapshot,
    language: &str,
    (year, month, day): (i32, u32, u32),
    slug: &str,
    now: DateTime<Utc>,
) -> Result<&'a NewsEntry, NewsError> {
    let entry = find_public_entry(snapshot, language, slug, now)?;
    match entry.pub_date {
        Some(date) if date.year() == year && date.month() == month && date.day() == day => Ok(entry),
        _ => Err(LookupError::Entry(slug.to_string()).into()),
    }
}

/// Any entry with `slug` in `language`, published or not.
pub fn find_preview_entry<'a>(snapshot: &'a NewsSnapshot, language: &str, slug: &str) -> Result<&'a NewsEntry, NewsError> {
    snapshot
        .entry_by_slug(language, slug)
        .ok_or_else(|| LookupError::Entry(slug.to_string()).into())
}

pub fn related_entries<'a>(
    snapshot: &'a NewsSnapshot,
    language: &str,
    current: &NewsEntry,
    now: DateTime<Utc>,
) -> Vec<&'a NewsEntry> {
    let query = VisibilityQuery::for_language(language, now);
    visibility::recent(&snapshot.entries, &query, DEFAULT_RECENT_LIMIT, Some(&current.id), None)
}

pub fn tag_entries<'a>(
    snapshot: &'a NewsSnapshot,
    language: &str,
    slug: &str,
    now: DateTime<Utc>,
) -> Result<Vec<&'a NewsEntry>, NewsError> {
    if snapshot.tag(slug).is_none() {
        return Err(LookupError::Tag(slug.to_string()).into());
    }
    let query = VisibilityQuery::for_language(language, now);
    Ok(visibility::published(&snapshot.entries, &query, &[EntryFilter::Tag(slug.to_string())], &[]))
}

pub fn category_list<'a>(snapshot: &'a NewsSnapshot, slug: &str, now: DateTime<Utc>) -> Result<Vec<&'a NewsEntry>, NewsError> {
    Ok(visibility::category_entries(&snapshot.entries, &snapshot.categories, slug, now)?)
}

/// Entries for the partial list: optionally in a category or its direct children, optionally capped.
pub fn get_entries<'a>(
    snapshot: &'a NewsSnapshot,
    language: &str,
    category: Option<&str>,
    count: Option<usize>,
    now: DateTime<Utc>,
) -> Vec<&'a NewsEntry> {
    let extra: Vec<EntryFilter> = category
        .map(|slug| EntryFilter::category_or_children(slug, &snapshot.categories))
        .into_iter()
        .collect();
    let mut entries = visibility::published(&snapshot.entries, &VisibilityQuery::for_language(language, now), &extra, &[]);
    if let Some(count) = count.filter(|c| *c > 0) {
        entries.truncate(count);
    }
    entries
}
