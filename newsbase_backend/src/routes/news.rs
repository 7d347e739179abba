use crate::config::Config;
use crate::helper::feed_helpers::{self, FeedKind};
use crate::helper::public_helpers::{self, NewsError};
use crate::helper::form_helpers;
use crate::middleware::{AuthenticatedUser, RequestLanguage};
use crate::models::db_operations::news_db_operations::{self, DbError};
use crate::models::Notification;
use crate::DbPool;
use actix_session::Session;
use actix_web::{http::header, web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use redb::Database;
use serde::Deserialize;
use serde_json::json;
use tera::{Context, Tera};

#[derive(Deserialize)]
pub struct PageQuery {
    page: Option<usize>,
}

#[derive(Deserialize)]
pub struct GetEntriesQuery {
    category: Option<String>,
    count: Option<usize>,
}

pub fn config_news(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(list_entries))
        .route("/get-entries/", web::get().to(get_entries))
        .route("/sitemap.xml", web::get().to(sitemap))
        .route("/rss/", web::get().to(feed_all))
        .route("/rss/any/", web::get().to(feed_all_any))
        .route("/rss/author/{author}/", web::get().to(feed_author))
        .route("/rss/any/author/{author}/", web::get().to(feed_author_any))
        .route("/rss/tagged/{tag}/", web::get().to(feed_tagged))
        .route("/rss/any/tagged/{tag}/", web::get().to(feed_tagged_any))
        .route("/category/{category}/", web::get().to(category_entries))
        .route("/tag/{tag}/", web::get().to(tagged_entries))
        .route("/preview/{slug}/", web::get().to(preview_entry))
        .service(
            web::resource("/publish-entry/{pk}/")
                .route(web::post().to(publish_entry))
                .route(web::get().to(publish_entry_get)),
        )
        .service(
            web::resource("/delete-entry/{pk}/")
                .route(web::get().to(confirm_delete_entry))
                .route(web::post().to(delete_entry)),
        )
        .route("/{year}/{month}/{day}/{slug}/", web::get().to(dated_entry_detail))
        .route("/{slug}/", web::get().to(entry_detail));
}

// --- Shared response plumbing ---

fn html(body: String) -> HttpResponse {
    HttpResponse::Ok().content_type("text/html; charset=utf-8").body(body)
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found().append_header((header::LOCATION, location)).finish()
}

fn error_response(err: NewsError, what: &str) -> HttpResponse {
    if err.is_not_found() {
        log::debug!("{} not found: {}", what, err);
        HttpResponse::NotFound().body("Not found")
    } else {
        log::error!("Failed to serve {}: {}", what, err);
        HttpResponse::InternalServerError().body("Internal server error")
    }
}

fn set_notification(session: &Session, message: &str, r#type: &str) {
    let notification = Notification { message: message.to_string(), r#type: r#type.to_string() };
    if let Err(e) = session.insert("notification", &notification) {
        log::warn!("Could not store notification in session: {}", e);
    }
}

fn base_context(config: &Config, language: &RequestLanguage, session: Option<&Session>) -> Context {
    let news = &config.news;
    let mut ctx = Context::new();
    ctx.insert("site_name", &news.site_name);
    ctx.insert("language", language.as_str());
    ctx.insert("languages", &news.languages);
    ctx.insert("is_multilingual", &news.is_multilingual());
    ctx.insert("list_url", &news.url(""));
    ctx.insert("rss_url", &news.url("rss/"));
    if let Some(session) = session {
        if let Ok(Some(notification)) = session.get::<Notification>("notification") {
            ctx.insert("notification", &notification);
            session.remove("notification");
        }
    }
    ctx
}

// --- Lists ---

fn render_list(
    db: &Database,
    pool: &DbPool,
    tera: &Tera,
    config: &Config,
    language: &RequestLanguage,
    user: Option<&AuthenticatedUser>,
    page: usize,
    session: &Session,
) -> Result<String, NewsError> {
    let snapshot = public_helpers::load_snapshot(db)?;
    let authors = public_helpers::author_names(pool)?;
    let is_superuser = user.map_or(false, |u| u.is_superuser);
    let now = Utc::now();
    let entries = public_helpers::list_entries(&snapshot, language.as_str(), is_superuser, now);
    let page = public_helpers::paginate(entries, page, config.news.pagination_amount)?;
    let views = if is_superuser {
        public_helpers::present_staff_entries(&page.items, language.as_str(), &config.news, &snapshot, &authors, now)
    } else {
        public_helpers::present_entries(&page.items, language.as_str(), &config.news, &snapshot, &authors)
    };

    let mut ctx = base_context(config, language, Some(session));
    ctx.insert("entries", &views);
    ctx.insert("page_number", &page.number);
    ctx.insert("num_pages", &page.num_pages);
    ctx.insert("previous_page", &page.previous_number);
    ctx.insert("next_page", &page.next_number);
    ctx.insert("user", &user);
    Ok(tera.render("news/list.html", &ctx)?)
}

async fn list_entries(
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
    tera: web::Data<Tera>,
    config: web::Data<Config>,
    language: RequestLanguage,
    user: Option<AuthenticatedUser>,
    query: web::Query<PageQuery>,
    session: Session,
) -> impl Responder {
    let page = query.page.unwrap_or(1);
    match render_list(&db, &pool, &tera, &config, &language, user.as_ref(), page, &session) {
        Ok(body) => html(body),
        Err(e) => error_response(e, "news list"),
    }
}

async fn category_entries(
    category: web::Path<String>,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
    tera: web::Data<Tera>,
    config: web::Data<Config>,
    language: RequestLanguage,
) -> impl Responder {
    let slug = category.into_inner();
    let rendered = (|| -> Result<String, NewsError> {
        let snapshot = public_helpers::load_snapshot(&db)?;
        let authors = public_helpers::author_names(&pool)?;
        let entries = public_helpers::category_list(&snapshot, &slug, Utc::now())?;
        let views = public_helpers::present_entries(&entries, language.as_str(), &config.news, &snapshot, &authors);

        let mut ctx = base_context(&config, &language, None);
        if let Some(category) = snapshot.category(&slug) {
            ctx.insert("category_slug", &category.slug);
            ctx.insert("category_title", &category.title(language.as_str(), &config.news.default_language));
        }
        ctx.insert("entries", &views);
        Ok(tera.render("news/category.html", &ctx)?)
    })();

    match rendered {
        Ok(body) => html(body),
        Err(e) => error_response(e, &format!("category '{}'", slug)),
    }
}

async fn tagged_entries(
    tag: web::Path<String>,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
    tera: web::Data<Tera>,
    config: web::Data<Config>,
    language: RequestLanguage,
    query: web::Query<PageQuery>,
) -> impl Responder {
    let slug = tag.into_inner();
    let rendered = (|| -> Result<String, NewsError> {
        let snapshot = public_helpers::load_snapshot(&db)?;
        let authors = public_helpers::author_names(&pool)?;
        let entries = public_helpers::tag_entries(&snapshot, language.as_str(), &slug, Utc::now())?;
        let page = public_helpers::paginate(entries, query.page.unwrap_or(1), config.news.pagination_amount)?;
        let views = public_helpers::present_entries(&page.items, language.as_str(), &config.news, &snapshot, &authors);

        let mut ctx = base_context(&config, &language, None);
        if let Some(tag) = snapshot.tag(&slug) {
            ctx.insert("tag_name", &tag.name(language.as_str(), &config.news.default_language));
            ctx.insert("tag_rss_url", &config.news.url(&format!("rss/tagged/{}/", tag.slug)));
        }
        ctx.insert("entries", &views);
        ctx.insert("page_number", &page.number);
        ctx.insert("num_pages", &page.num_pages);
        ctx.insert("previous_page", &page.previous_number);
        ctx.insert("next_page", &page.next_number);
        Ok(tera.render("news/list.html", &ctx)?)
    })();

    match rendered {
        Ok(body) => html(body),
        Err(e) => error_response(e, &format!("tag '{}'", slug)),
    }
}

async fn get_entries(
    query: web::Query<GetEntriesQuery>,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
    tera: web::Data<Tera>,
    config: web::Data<Config>,
    language: RequestLanguage,
) -> impl Responder {
    let rendered = (|| -> Result<String, NewsError> {
        let snapshot = public_helpers::load_snapshot(&db)?;
        let authors = public_helpers::author_names(&pool)?;
        let category = query.category.as_deref().filter(|c| !c.is_empty());
        let entries = public_helpers::get_entries(&snapshot, language.as_str(), category, query.count, Utc::now());
        let views = public_helpers::present_entries(&entries, language.as_str(), &config.news, &snapshot, &authors);

        let mut ctx = Context::new();
        ctx.insert("entries", &views);
        Ok(tera.render("news/partials/entry_list.html", &ctx)?)
    })();

    match rendered {
        Ok(body) => html(body),
        Err(e) => error_response(e, "entry partial"),
    }
}

// --- Details ---

fn render_detail(
    entry: &crate::models::NewsEntry,
    snapshot: &crate::models::NewsSnapshot,
    pool: &DbPool,
    tera: &Tera,
    config: &Config,
    language: &RequestLanguage,
    preview: bool,
) -> Result<String, NewsError> {
    let authors = public_helpers::author_names(pool)?;
    let view = if preview {
        public_helpers::present_staff_entry(entry, language.as_str(), &config.news, snapshot, &authors, Utc::now())
    } else {
        public_helpers::present_entry(entry, language.as_str(), &config.news, snapshot, &authors)
    };
    let view = view.ok_or_else(|| crate::models::visibility::LookupError::Entry(entry.id.clone()))?;
    let related = public_helpers::related_entries(snapshot, language.as_str(), entry, Utc::now());
    let related = public_helpers::present_entries(&related, language.as_str(), &config.news, snapshot, &authors);

    let mut ctx = base_context(config, language, None);
    ctx.insert("entry", &view);
    ctx.insert("related", &related);
    ctx.insert("preview", &preview);
    Ok(tera.render("news/detail.html", &ctx)?)
}

async fn entry_detail(
    slug: web::Path<String>,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
    tera: web::Data<Tera>,
    config: web::Data<Config>,
    language: RequestLanguage,
) -> impl Responder {
    let slug = slug.into_inner();
    let rendered = public_helpers::load_snapshot(&db).and_then(|snapshot| {
        let entry = public_helpers::find_public_entry(&snapshot, language.as_str(), &slug, Utc::now())?;
        render_detail(entry, &snapshot, &pool, &tera, &config, &language, false)
    });

    match rendered {
        Ok(body) => html(body),
        Err(e) => error_response(e, &format!("entry '{}'", slug)),
    }
}

async fn dated_entry_detail(
    path: web::Path<(i32, u32, u32, String)>,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
    tera: web::Data<Tera>,
    config: web::Data<Config>,
    language: RequestLanguage,
) -> impl Responder {
    let (year, month, day, slug) = path.into_inner();
    let rendered = public_helpers::load_snapshot(&db).and_then(|snapshot| {
        let entry = public_helpers::find_dated_entry(&snapshot, language.as_str(), (year, month, day), &slug, Utc::now())?;
        render_detail(entry, &snapshot, &pool, &tera, &config, &language, false)
    });

    match rendered {
        Ok(body) => html(body),
        Err(e) => error_response(e, &format!("entry '{}' of {}-{}-{}", slug, year, month, day)),
    }
}

async fn preview_entry(
    slug: web::Path<String>,
    user: AuthenticatedUser,
    db: web::Data<Database>,
    pool: web::Data<DbPool>,
    tera: web::Data<Tera>,
    config: web::Data<Config>,
    language: RequestLanguage,
) -> impl Responder {
    if !user.can_manage_entries() {
        log::warn!("User '{}' tried to preview an entry without staff rights", user.username);
        return HttpResponse::Forbidden().body("Staff access required.");
    }

    let slug = slug.into_inner();
    let rendered = public_helpers::load_snapshot(&db).and_then(|snapshot| {
        let entry = public_helpers::find_preview_entry(&snapshot, language.as_str(), &slug)?;
        render_detail(entry, &snapshot, &pool, &tera, &config, &language, true)
    });

    match rendered {
        Ok(body) => html(body),
        Err(e) => error_response(e, &format!("preview of '{}'", slug)),
    }
}

// --- Staff actions ---

async fn publish_entry_get(_user: AuthenticatedUser) -> impl Responder {
    HttpResponse::MethodNotAllowed()
        .append_header((header::ALLOW, "POST"))
        .finish()
}

async fn publish_entry(
    pk: web::Path<String>,
    user: AuthenticatedUser,
    form: web::Bytes,
    db: web::Data<Database>,
    config: web::Data<Config>,
    language: RequestLanguage,
    session: Session,
) -> impl Responder {
    if !user.is_superuser {
        log::warn!("User '{}' tried to publish entry {} without superuser rights", user.username, pk);
        return HttpResponse::Forbidden().body("Only superusers may publish entries.");
    }
    let fields = match form_helpers::parse_form(&form) {
        Ok(fields) => fields,
        Err(response) => return response,
    };

    let entry = match news_db_operations::read_entry(&db, &pk) {
        Ok(Some(entry)) => entry,
        Ok(None) => return HttpResponse::NotFound().body("Entry not found"),
        Err(e) => {
            log::error!("Failed to read entry {}: {}", pk, e);
            return HttpResponse::InternalServerError().finish();
        }
    };

    let target_language = fields
        .get("language")
        .map(String::as_str)
        .filter(|l| config.news.has_language(l))
        .unwrap_or(language.as_str())
        .to_string();
    let publish = match fields.get("action").map(String::as_str) {
        Some("publish") => Some(true),
        Some("unpublish") => Some(false),
        _ => None,
    };

    let entry = match publish {
        None => entry,
        Some(publish) => match news_db_operations::set_entry_published(&db, &pk, Some(&target_language), publish, Utc::now()) {
            Ok(updated) => {
                let verb = if publish { "published" } else { "unpublished" };
                log::info!("User '{}' {} entry {} in '{}'", user.username, verb, pk, target_language);
                set_notification(&session, &format!("Entry {}.", verb), "success");
                updated
            }
            Err(DbError::NotFound(what)) => {
                log::debug!("Publish target not found: {}", what);
                return HttpResponse::NotFound().body("Entry not found");
            }
            Err(e) => {
                log::error!("Failed to change publication of entry {}: {}", pk, e);
                return HttpResponse::InternalServerError().finish();
            }
        },
    };

    let detail_url = match entry.preferred_translation(&target_language, &config.news.default_language) {
        Some((_, translation)) => config.news.url(&entry.relative_url(&translation.slug)),
        None => config.news.url(""),
    };
    redirect(&detail_url)
}

fn entry_title(entry: &crate::models::NewsEntry, language: &str, config: &Config) -> String {
    entry
        .preferred_translation(language, &config.news.default_language)
        .map(|(_, t)| t.title.clone())
        .unwrap_or_else(|| entry.id.clone())
}

async fn confirm_delete_entry(
    req: HttpRequest,
    pk: web::Path<String>,
    user: AuthenticatedUser,
    db: web::Data<Database>,
    tera: web::Data<Tera>,
    config: web::Data<Config>,
    language: RequestLanguage,
) -> impl Responder {
    if !user.can_manage_entries() {
        log::warn!("User '{}' tried to delete entry {} without staff rights", user.username, pk);
        return HttpResponse::Forbidden().body("Staff access required.");
    }
    let entry = match news_db_operations::read_entry(&db, &pk) {
        Ok(Some(entry)) => entry,
        Ok(None) => return HttpResponse::NotFound().body("Entry not found"),
        Err(e) => {
            log::error!("Failed to read entry {}: {}", pk, e);
            return HttpResponse::InternalServerError().finish();
        }
    };

    let mut ctx = base_context(&config, &language, None);
    ctx.insert("entry_id", &entry.id);
    ctx.insert("entry_title", &entry_title(&entry, language.as_str(), &config));
    ctx.insert("delete_url", &config.news.url(&format!("delete-entry/{}/", entry.id)));
    let template = if form_helpers::is_ajax(&req) {
        "news/partials/delete_confirm.html"
    } else {
        "news/delete_confirm.html"
    };
    match tera.render(template, &ctx) {
        Ok(rendered) => html(rendered),
        Err(err) => {
            log::error!("Template rendering error: {}", err);
            HttpResponse::InternalServerError().body("Error rendering confirmation.")
        }
    }
}

async fn delete_entry(
    req: HttpRequest,
    pk: web::Path<String>,
    user: AuthenticatedUser,
    db: web::Data<Database>,
    config: web::Data<Config>,
    session: Session,
) -> impl Responder {
    if !user.can_manage_entries() {
        log::warn!("User '{}' tried to delete entry {} without staff rights", user.username, pk);
        return HttpResponse::Forbidden().body("Staff access required.");
    }

    let list_url = config.news.url("");
    match news_db_operations::delete_entry(&db, &pk) {
        Ok(_) => {
            log::info!("User '{}' deleted entry {}", user.username, pk);
            if form_helpers::is_ajax(&req) {
                HttpResponse::Ok().json(json!({"deleted": true, "redirect_url": list_url}))
            } else {
                set_notification(&session, "Entry deleted.", "success");
                redirect(&list_url)
            }
        }
        Err(DbError::NotFound(_)) => HttpResponse::NotFound().body("Entry not found"),
        Err(e) => {
            log::error!("Failed to delete entry {}: {}", pk, e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

// --- Feeds & sitemap ---

fn respond_feed(
    kind: FeedKind,
    any_language: bool,
    db: &Database,
    pool: &DbPool,
    tera: &Tera,
    config: &Config,
    language: &RequestLanguage,
) -> HttpResponse {
    let rendered = public_helpers::load_snapshot(db).and_then(|snapshot| {
        let authors = public_helpers::author_names(pool)?;
        let feed = feed_helpers::build_feed(&snapshot, &authors, &config.news, language.as_str(), any_language, &kind, Utc::now())?;
        feed_helpers::render_feed(tera, &feed)
    });

    match rendered {
        Ok(body) => HttpResponse::Ok().content_type("application/rss+xml; charset=utf-8").body(body),
        Err(e) => error_response(e, &format!("{:?} feed", kind)),
    }
}

async fn feed_all(db: web::Data<Database>, pool: web::Data<DbPool>, tera: web::Data<Tera>, config: web::Data<Config>, language: RequestLanguage) -> impl Responder {
    respond_feed(FeedKind::All, false, &db, &pool, &tera, &config, &language)
}

async fn feed_all_any(db: web::Data<Database>, pool: web::Data<DbPool>, tera: web::Data<Tera>, config: web::Data<Config>, language: RequestLanguage) -> impl Responder {
    respond_feed(FeedKind::All, true, &db, &pool, &tera, &config, &language)
}

async fn feed_author(author: web::Path<i32>, db: web::Data<Database>, pool: web::Data<DbPool>, tera: web::Data<Tera>, config: web::Data<Config>, language: RequestLanguage) -> impl Responder {
    respond_feed(FeedKind::Author(author.into_inner()), false, &db, &pool, &tera, &config, &language)
}

async fn feed_author_any(author: web::Path<i32>, db: web::Data<Database>, pool: web::Data<DbPool>, tera: web::Data<Tera>, config: web::Data<Config>, language: RequestLanguage) -> impl Responder {
    respond_feed(FeedKind::Author(author.into_inner()), true, &db, &pool, &tera, &config, &language)
}

async fn feed_tagged(tag: web::Path<String>, db: web::Data<Database>, pool: web::Data<DbPool>, tera: web::Data<Tera>, config: web::Data<Config>, language: RequestLanguage) -> impl Responder {
    respond_feed(FeedKind::Tagged(tag.into_inner()), false, &db, &pool, &tera, &config, &language)
}

async fn feed_tagged_any(tag: web::Path<String>, db: web::Data<Database>, pool: web::Data<DbPool>, tera: web::Data<Tera>, config: web::Data<Config>, language: RequestLanguage) -> impl Responder {
    respond_feed(FeedKind::Tagged(tag.into_inner()), true, &db, &pool, &tera, &config, &language)
}

async fn sitemap(db: web::Data<Database>, tera: web::Data<Tera>, config: web::Data<Config>) -> impl Responder {
    let rendered = public_helpers::load_snapshot(&db).and_then(|snapshot| {
        let urls = feed_helpers::sitemap_urls(&snapshot, &config.news, Utc::now());
        feed_helpers::render_sitemap(&tera, &urls)
    });

    match rendered {
        Ok(body) => HttpResponse::Ok().content_type("application/xml; charset=utf-8").body(body),
        Err(e) => error_response(e, "sitemap"),
    }
}
