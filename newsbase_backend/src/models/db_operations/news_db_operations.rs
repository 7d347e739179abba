use crate::models::{Category, EntryTranslation, NewsEntry, NewsSnapshot, Tag};
use chrono::{DateTime, Utc};
use redb::{CommitError, Database, ReadableTable, StorageError, TableDefinition, TableError, TransactionError};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Redb storage error: {0}")]
    RedbStorage(#[from] StorageError),
    #[error("Redb transaction error: {0}")]
    RedbTransaction(#[from] TransactionError),
    #[error("Redb table error: {0}")]
    RedbTable(#[from] TableError),
    #[error("Redb commit error: {0}")]
    RedbCommit(#[from] CommitError),
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("UUID parse error: {0}")]
    Uuid(#[from] uuid::Error),
    #[error("Item not found in database: {0}")]
    NotFound(String),
    #[error("Conflicting item: {0}")]
    Conflict(String),
    #[error("Invalid data: {0}")]
    Invalid(String),
}

pub const ENTRIES: TableDefinition<&[u8; 16], &str> = TableDefinition::new("entries");
// (language, slug) -> entry id. Slugs are only unique per language.
pub const ENTRY_SLUGS: TableDefinition<(&str, &str), &[u8; 16]> = TableDefinition::new("entry_slugs");
pub const CATEGORIES: TableDefinition<&str, &str> = TableDefinition::new("categories");
pub const TAGS: TableDefinition<&str, &str> = TableDefinition::new("tags");

/// The editable part of an entry, as submitted by staff.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct EntryDraft {
    pub author_id: Option<i32>,
    pub pub_date: Option<DateTime<Utc>>,
    pub image: Option<String>,
    pub thumbnail: Option<String>,
    pub translations: BTreeMap<String, EntryTranslation>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty() && slug.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

/// Stamps `pub_date` with `now` the first time an undated entry gains a published translation.
pub fn normalize_pub_date(previous: Option<&NewsEntry>, entry: &mut NewsEntry, now: DateTime<Utc>) {
    let was_published = previous.map_or(false, |p| p.has_published_translation());
    if entry.pub_date.is_none() && entry.has_published_translation() && !was_published {
        entry.pub_date = Some(now);
    }
}

fn validate_entry(entry: &NewsEntry) -> Result<(), DbError> {
    if entry.translations.is_empty() {
        return Err(DbError::Invalid("an entry needs at least one translation".to_string()));
    }
    for (language, translation) in &entry.translations {
        if translation.title.trim().is_empty() {
            return Err(DbError::Invalid(format!("empty title for language '{}'", language)));
        }
        if !is_valid_slug(&translation.slug) {
            return Err(DbError::Invalid(format!("invalid slug '{}' for language '{}'", translation.slug, language)));
        }
    }
    Ok(())
}

fn entry_id_bytes(id: &str) -> Result<[u8; 16], DbError> {
    Ok(Uuid::parse_str(id)?.into_bytes())
}

/// Writes `entry`, keeping the slug index in step. All in one write transaction.
fn save_entry(db: &Database, mut entry: NewsEntry, now: DateTime<Utc>) -> Result<NewsEntry, DbError> {
    validate_entry(&entry)?;
    let id_bytes = entry_id_bytes(&entry.id)?;

    let write_txn = db.begin_write()?;
    {
        let mut entries_table = write_txn.open_table(ENTRIES)?;
        let mut slug_index = write_txn.open_table(ENTRY_SLUGS)?;

        let previous: Option<NewsEntry> = match entries_table.get(&id_bytes)? {
            Some(guard) => Some(serde_json::from_str(guard.value())?),
            None => None,
        };
        normalize_pub_date(previous.as_ref(), &mut entry, now);

        for (language, translation) in &entry.translations {
            let owner = slug_index
                .get((language.as_str(), translation.slug.as_str()))?
                .map(|guard| *guard.value());
            if matches!(owner, Some(owner) if owner != id_bytes) {
                return Err(DbError::Conflict(format!(
                    "slug '{}' is already used in language '{}'",
                    translation.slug, language
                )));
            }
        }

        if let Some(old) = &previous {
            for (language, translation) in &old.translations {
                slug_index.remove((language.as_str(), translation.slug.as_str()))?;
            }
        }
        for (language, translation) in &entry.translations {
            slug_index.insert((language.as_str(), translation.slug.as_str()), &id_bytes)?;
        }

        let entry_json = serde_json::to_string(&entry)?;
        entries_table.insert(&id_bytes, entry_json.as_str())?;
    }
    write_txn.commit()?;
    Ok(entry)
}

// ====================================================================
// ========================= ENTRY OPERATIONS =========================
// ====================================================================

pub fn create_entry(db: &Database, draft: EntryDraft, now: DateTime<Utc>) -> Result<NewsEntry, DbError> {
    let entry = NewsEntry {
        id: Uuid::new_v4().to_string(),
        author_id: draft.author_id,
        pub_date: draft.pub_date,
        image: draft.image,
        thumbnail: draft.thumbnail,
        translations: draft.translations,
        categories: draft.categories,
        tags: draft.tags,
        created_at: now,
    };
    save_entry(db, entry, now)
}

pub fn update_entry(db: &Database, id: &str, draft: EntryDraft, now: DateTime<Utc>) -> Result<NewsEntry, DbError> {
    let existing = read_entry(db, id)?.ok_or_else(|| DbError::NotFound(id.to_string()))?;
    // An omitted date keeps the stored one, so an auto-stamped entry keeps its dated URL.
    let entry = NewsEntry {
        id: existing.id,
        author_id: draft.author_id,
        pub_date: draft.pub_date.or(existing.pub_date),
        image: draft.image,
        thumbnail: draft.thumbnail,
        translations: draft.translations,
        categories: draft.categories,
        tags: draft.tags,
        created_at: existing.created_at,
    };
    save_entry(db, entry, now)
}

/// Publishes or unpublishes the translation in `language`, or every translation when `None`.
pub fn set_entry_published(
    db: &Database,
    id: &str,
    language: Option<&str>,
    is_published: bool,
    now: DateTime<Utc>,
) -> Result<NewsEntry, DbError> {
    let mut entry = read_entry(db, id)?.ok_or_else(|| DbError::NotFound(id.to_string()))?;
    match language {
        Some(language) => {
            let translation = entry
                .translation_mut(language)
                .ok_or_else(|| DbError::NotFound(format!("'{}' translation of entry {}", language, id)))?;
            translation.is_published = is_published;
        }
        None => entry.translations.values_mut().for_each(|t| t.is_published = is_published),
    }
    save_entry(db, entry, now)
}

pub fn delete_entry(db: &Database, id: &str) -> Result<NewsEntry, DbError> {
    let id_bytes = entry_id_bytes(id).map_err(|_| DbError::NotFound(id.to_string()))?;

    let write_txn = db.begin_write()?;
    let deleted = {
        let mut entries_table = write_txn.open_table(ENTRIES)?;
        let mut slug_index = write_txn.open_table(ENTRY_SLUGS)?;

        let entry: NewsEntry = match entries_table.remove(&id_bytes)? {
            Some(guard) => serde_json::from_str(guard.value())?,
            None => return Err(DbError::NotFound(id.to_string())),
        };
        for (language, translation) in &entry.translations {
            slug_index.remove((language.as_str(), translation.slug.as_str()))?;
        }
        entry
    };
    write_txn.commit()?;
    Ok(deleted)
}

pub fn read_entry(db: &Database, id: &str) -> Result<Option<NewsEntry>, DbError> {
    let id_bytes = match entry_id_bytes(id) {
        Ok(bytes) => bytes,
        Err(_) => return Ok(None),
    };

    let read_txn = db.begin_read()?;
    let entries_table = read_txn.open_table(ENTRIES)?;
    let maybe_guard = entries_table.get(&id_bytes)?;
    match maybe_guard {
        Some(guard) => Ok(Some(serde_json::from_str(guard.value())?)),
        None => Ok(None),
    }
}

pub fn read_all_entries(db: &Database) -> Result<Vec<NewsEntry>, DbError> {
    Ok(read_snapshot(db)?.entries)
}

/// Reads entries, categories, tags and the slug index in a single read transaction.
/// Records that fail to decode are logged and skipped; storage errors abort the read.
pub fn read_snapshot(db: &Database) -> Result<NewsSnapshot, DbError> {
    let read_txn = db.begin_read()?;
    let entries_table = read_txn.open_table(ENTRIES)?;
    let slug_index = read_txn.open_table(ENTRY_SLUGS)?;
    let categories_table = read_txn.open_table(CATEGORIES)?;
    let tags_table = read_txn.open_table(TAGS)?;

    let mut entries = Vec::new();
    let mut positions: HashMap<[u8; 16], usize> = HashMap::new();
    for row in entries_table.iter()? {
        let (id, json) = row?;
        match serde_json::from_str::<NewsEntry>(json.value()) {
            Ok(entry) => {
                positions.insert(*id.value(), entries.len());
                entries.push(entry);
            }
            Err(e) => log::warn!("Skipping undecodable entry {}: {}", Uuid::from_bytes(*id.value()), e),
        }
    }

    let mut slugs = HashMap::new();
    for row in slug_index.iter()? {
        let (key, id) = row?;
        let (language, slug) = key.value();
        match positions.get(id.value()) {
            Some(&pos) => {
                slugs.insert((language.to_string(), slug.to_string()), pos);
            }
            None => log::warn!("Slug '{}' ({}) points at a missing entry", slug, language),
        }
    }

    let mut categories = Vec::new();
    for row in categories_table.iter()? {
        let (slug, json) = row?;
        match serde_json::from_str::<Category>(json.value()) {
            Ok(category) => categories.push(category),
            Err(e) => log::warn!("Skipping undecodable category '{}': {}", slug.value(), e),
        }
    }

    let mut tags = Vec::new();
    for row in tags_table.iter()? {
        let (slug, json) = row?;
        match serde_json::from_str::<Tag>(json.value()) {
            Ok(tag) => tags.push(tag),
            Err(e) => log::warn!("Skipping undecodable tag '{}': {}", slug.value(), e),
        }
    }

    Ok(NewsSnapshot { entries, categories, tags, slugs })
}

// ====================================================================
// ======================= CATEGORY OPERATIONS ========================
// ====================================================================

pub fn create_category(db: &Database, category: &Category) -> Result<(), DbError> {
    if !is_valid_slug(&category.slug) {
        return Err(DbError::Invalid(format!("invalid category slug '{}'", category.slug)));
    }

    let write_txn = db.begin_write()?;
    {
        let mut categories_table = write_txn.open_table(CATEGORIES)?;
        if categories_table.get(category.slug.as_str())?.is_some() {
            return Err(DbError::Conflict(format!("category '{}' already exists", category.slug)));
        }
        if let Some(parent) = category.parent.as_deref() {
            if parent == category.slug || categories_table.get(parent)?.is_none() {
                return Err(DbError::Invalid(format!("unknown parent category '{}'", parent)));
            }
        }
        let category_json = serde_json::to_string(category)?;
        categories_table.insert(category.slug.as_str(), category_json.as_str())?;
    }
    write_txn.commit()?;
    Ok(())
}

pub fn read_category(db: &Database, slug: &str) -> Result<Option<Category>, DbError> {
    let read_txn = db.begin_read()?;
    let categories_table = read_txn.open_table(CATEGORIES)?;
    let maybe_guard = categories_table.get(slug)?;
    match maybe_guard {
        Some(guard) => Ok(Some(serde_json::from_str(guard.value())?)),
        None => Ok(None),
    }
}

pub fn read_all_categories(db: &Database) -> Result<Vec<Category>, DbError> {
    Ok(read_snapshot(db)?.categories)
}

/// Removes a category, detaching its children and dropping it from every entry.
pub fn delete_category(db: &Database, slug: &str) -> Result<(), DbError> {
    let write_txn = db.begin_write()?;
    {
        let mut categories_table = write_txn.open_table(CATEGORIES)?;
        let mut entries_table = write_txn.open_table(ENTRIES)?;

        if categories_table.remove(slug)?.is_none() {
            return Err(DbError::NotFound(format!("category '{}'", slug)));
        }

        let children: Vec<Category> = categories_table
            .iter()?
            .filter_map(|res| res.ok())
            .filter_map(|(_, json)| serde_json::from_str::<Category>(json.value()).ok())
            .filter(|c| c.parent.as_deref() == Some(slug))
            .collect();
        for mut child in children {
            child.parent = None;
            let child_json = serde_json::to_string(&child)?;
            categories_table.insert(child.slug.as_str(), child_json.as_str())?;
        }

        let members: Vec<([u8; 16], NewsEntry)> = entries_table
            .iter()?
            .filter_map(|res| res.ok())
            .filter_map(|(id, json)| {
                serde_json::from_str::<NewsEntry>(json.value()).ok().map(|entry| (*id.value(), entry))
            })
            .filter(|(_, entry)| entry.in_category(slug))
            .collect();
        for (id_bytes, mut entry) in members {
            entry.categories.retain(|c| c != slug);
            let entry_json = serde_json::to_string(&entry)?;
            entries_table.insert(&id_bytes, entry_json.as_str())?;
        }
    }
    write_txn.commit()?;
    Ok(())
}

// ====================================================================
// ========================== TAG OPERATIONS ==========================
// ====================================================================

pub fn create_tag(db: &Database, tag: &Tag) -> Result<(), DbError> {
    if !is_valid_slug(&tag.slug) {
        return Err(DbError::Invalid(format!("invalid tag slug '{}'", tag.slug)));
    }

    let write_txn = db.begin_write()?;
    {
        let mut tags_table = write_txn.open_table(TAGS)?;
        if tags_table.get(tag.slug.as_str())?.is_some() {
            return Err(DbError::Conflict(format!("tag '{}' already exists", tag.slug)));
        }
        let tag_json = serde_json::to_string(tag)?;
        tags_table.insert(tag.slug.as_str(), tag_json.as_str())?;
    }
    write_txn.commit()?;
    Ok(())
}

pub fn read_tag(db: &Database, slug: &str) -> Result<Option<Tag>, DbError> {
    let read_txn = db.begin_read()?;
    let tags_table = read_txn.open_table(TAGS)?;
    let maybe_guard = tags_table.get(slug)?;
    match maybe_guard {
        Some(guard) => Ok(Some(serde_json::from_str(guard.value())?)),
        None => Ok(None),
    }
}

pub fn read_all_tags(db: &Database) -> Result<Vec<Tag>, DbError> {
    Ok(read_snapshot(db)?.tags)
}
