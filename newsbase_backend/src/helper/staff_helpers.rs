use crate::config::NewsConfig;
use crate::helper::sanitization_helpers;
use crate::models::db_operations::news_db_operations::{self, DbError, EntryDraft};
use crate::models::db_operations::users_db_operations;
use crate::models::{Category, NewsEntry, Tag, User};
use crate::DbPool;
use actix_session::{Session, SessionInsertError};
use chrono::{DateTime, Utc};
use redb::Database;

pub fn verify_user_credentials(pool: &DbPool, username: &str, password: &str) -> Option<User> {
    match pool.get() {
        Ok(conn) => {
            let user = users_db_operations::verify_credentials(&conn, username, password)?;
            if let Err(e) = users_db_operations::update_last_login_time(&conn, &user.username) {
                log::warn!("Could not record login time for '{}': {}", user.username, e);
            }
            Some(user)
        }
        Err(e) => {
            log::error!("Failed to get a users database connection for login: {}", e);
            None
        }
    }
}

/// Stores the identity that [`AuthenticatedUser`](crate::middleware::AuthenticatedUser) reads back.
pub fn start_session(session: &Session, user: &User) -> Result<(), SessionInsertError> {
    session.renew();
    session.insert("user_id", user.id)?;
    session.insert("username", user.username.clone())?;
    session.insert("is_staff", user.is_staff)?;
    session.insert("is_superuser", user.is_superuser)?;
    session.remove("error");
    Ok(())
}

/// Cleans free-text fields and checks languages, categories and tags against what exists.
pub fn clean_draft(mut draft: EntryDraft, news: &NewsConfig, db: &Database) -> Result<EntryDraft, DbError> {
    if let Some(language) = draft.translations.keys().find(|l| !news.has_language(l)) {
        return Err(DbError::Invalid(format!("language '{}' is not configured", language)));
    }

    for translation in draft.translations.values_mut() {
        translation.title = sanitization_helpers::strip_all_html(&translation.title);
        translation.meta_title = translation.meta_title.as_deref().map(sanitization_helpers::strip_all_html);
        translation.meta_description = translation.meta_description.as_deref().map(sanitization_helpers::strip_all_html);
    }
    draft.image = draft.image.as_deref().map(sanitization_helpers::strip_all_html);
    draft.thumbnail = draft.thumbnail.as_deref().map(sanitization_helpers::strip_all_html);

    draft.categories.sort();
    draft.categories.dedup();
    draft.tags.sort();
    draft.tags.dedup();
    let snapshot = news_db_operations::read_snapshot(db)?;
    if let Some(slug) = draft.categories.iter().find(|s| snapshot.category(s).is_none()) {
        return Err(DbError::Invalid(format!("unknown category '{}'", slug)));
    }
    if let Some(slug) = draft.tags.iter().find(|s| snapshot.tag(s).is_none()) {
        return Err(DbError::Invalid(format!("unknown tag '{}'", slug)));
    }
    Ok(draft)
}

/// Creates an entry; the author defaults to the user creating it.
pub fn create_entry(
    db: &Database,
    news: &NewsConfig,
    author_id: i32,
    draft: EntryDraft,
    now: DateTime<Utc>,
) -> Result<NewsEntry, DbError> {
    let mut draft = clean_draft(draft, news, db)?;
    draft.author_id = draft.author_id.or(Some(author_id));
    news_db_operations::create_entry(db, draft, now)
}

pub fn update_entry(
    db: &Database,
    news: &NewsConfig,
    id: &str,
    draft: EntryDraft,
    now: DateTime<Utc>,
) -> Result<NewsEntry, DbError> {
    let draft = clean_draft(draft, news, db)?;
    news_db_operations::update_entry(db, id, draft, now)
}

pub fn create_category(db: &Database, news: &NewsConfig, mut category: Category) -> Result<Category, DbError> {
    if let Some(language) = category.translations.keys().find(|l| !news.has_language(l)) {
        return Err(DbError::Invalid(format!("language '{}' is not configured", language)));
    }
    for translation in category.translations.values_mut() {
        translation.title = sanitization_helpers::strip_all_html(&translation.title);
    }
    news_db_operations::create_category(db, &category)?;
    Ok(category)
}

pub fn create_tag(db: &Database, news: &NewsConfig, mut tag: Tag) -> Result<Tag, DbError> {
    if let Some(language) = tag.translations.keys().find(|l| !news.has_language(l)) {
        return Err(DbError::Invalid(format!("language '{}' is not configured", language)));
    }
    for translation in tag.translations.values_mut() {
        translation.name = sanitization_helpers::strip_all_html(&translation.name);
    }
    news_db_operations::create_tag(db, &tag)?;
    Ok(tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LanguageConfig;
    use crate::models::{CategoryTranslation, EntryTranslation};
    use crate::setup::db_setup;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn news() -> NewsConfig {
        NewsConfig {
            site_name: "Example".to_string(),
            site_url: "https://example.org".to_string(),
            mount_path: "/news".to_string(),
            default_language: "en".to_string(),
            languages: vec![LanguageConfig { code: "en".to_string(), name: "English".to_string() }],
            pagination_amount: 10,
            feed_limit: 10,
        }
    }

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::create(dir.path().join("news.db")).unwrap();
        db_setup::setup_news_db(&db).unwrap();
        (dir, db)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn draft(language: &str, title: &str) -> EntryDraft {
        let mut translations = BTreeMap::new();
        translations.insert(
            language.to_string(),
            EntryTranslation {
                title: title.to_string(),
                slug: "launch".to_string(),
                is_published: false,
                meta_title: None,
                meta_description: Some("<i>Meta</i>".to_string()),
                excerpt: String::new(),
                content: String::new(),
            },
        );
        EntryDraft { translations, ..EntryDraft::default() }
    }

    #[test]
    fn create_cleans_fields_and_sets_author() {
        let (_dir, db) = open_db();
        let entry = create_entry(&db, &news(), 5, draft("en", "<b>Launch</b>"), now()).unwrap();
        let translation = entry.translation("en").unwrap();
        assert_eq!(translation.title, "Launch");
        assert_eq!(translation.meta_description.as_deref(), Some("Meta"));
        assert_eq!(entry.author_id, Some(5));
    }

    #[test]
    fn unknown_language_or_category_is_invalid() {
        let (_dir, db) = open_db();
        assert!(matches!(create_entry(&db, &news(), 1, draft("fr", "Lancement"), now()), Err(DbError::Invalid(_))));

        let mut with_category = draft("en", "Launch");
        with_category.categories = vec!["missing".to_string()];
        assert!(matches!(create_entry(&db, &news(), 1, with_category, now()), Err(DbError::Invalid(_))));
    }

    #[test]
    fn categories_are_cleaned() {
        let (_dir, db) = open_db();
        let mut translations = BTreeMap::new();
        translations.insert("en".to_string(), CategoryTranslation { title: "<script>x</script>World".to_string() });
        let category = Category {
            slug: "world".to_string(),
            parent: None,
            hide_on_list: false,
            translations,
            created_at: now(),
        };
        let saved = create_category(&db, &news(), category).unwrap();
        assert_eq!(saved.translations["en"].title, "World");
    }
}
