use crate::config::Config;
use crate::helper::{form_helpers, staff_helpers};
use crate::middleware::AuthenticatedUser;
use crate::models::db_operations::news_db_operations::{self, DbError, EntryDraft};
use crate::models::{Category, CategoryTranslation, Tag};
use crate::DbPool;
use actix_csrf::extractor::{Csrf, CsrfGuarded, CsrfToken};
use actix_session::Session;
use actix_web::{http::header, web, HttpResponse, Responder};
use chrono::Utc;
use redb::Database;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tera::{Context, Tera};

// --- Structs for forms and payloads ---
#[derive(Deserialize)]
struct LoginForm {
    csrf_token: CsrfToken,
    username: String,
    password: String,
    next: Option<String>,
}

impl CsrfGuarded for LoginForm {
    fn csrf_token(&self) -> &CsrfToken {
        &self.csrf_token
    }
}

#[derive(Deserialize)]
struct NextQuery {
    next: Option<String>,
}

#[derive(Deserialize)]
struct NewCategory {
    slug: String,
    parent: Option<String>,
    #[serde(default)]
    hide_on_list: bool,
    translations: BTreeMap<String, CategoryTranslation>,
}

#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

fn api_ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse { success: true, data: Some(data), error: None })
}

fn api_created<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Created().json(ApiResponse { success: true, data: Some(data), error: None })
}

fn api_error(err: DbError, what: &str) -> HttpResponse {
    let body = |message: String| ApiResponse::<()> { success: false, data: None, error: Some(message) };
    match err {
        DbError::NotFound(m) => HttpResponse::NotFound().json(body(format!("Not found: {}", m))),
        DbError::Conflict(m) => HttpResponse::Conflict().json(body(m)),
        DbError::Invalid(m) => HttpResponse::BadRequest().json(body(m)),
        other => {
            log::error!("Failed to {}: {}", what, other);
            HttpResponse::InternalServerError().json(body("Internal server error".to_string()))
        }
    }
}

// --- Route Configuration ---
pub fn config_login(cfg: &mut web::ServiceConfig) {
    cfg.route("/login", web::get().to(show_login_form))
        .route("/login", web::post().to(handle_login))
        .route("/logout", web::post().to(handle_logout));
}

pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.route("/entries", web::get().to(list_entries_api))
        .route("/entries", web::post().to(create_entry_api))
        .route("/entries/{id}", web::get().to(get_entry_api))
        .route("/entries/{id}", web::put().to(update_entry_api))
        .route("/categories", web::get().to(list_categories_api))
        .route("/categories", web::post().to(create_category_api))
        .route("/categories/{slug}", web::get().to(get_category_api))
        .route("/categories/{slug}", web::delete().to(delete_category_api))
        .route("/tags", web::get().to(list_tags_api))
        .route("/tags", web::post().to(create_tag_api))
        .route("/tags/{slug}", web::get().to(get_tag_api));
}

// --- Login/Logout Handlers ---
async fn show_login_form(
    session: Session,
    tera: web::Data<Tera>,
    config: web::Data<Config>,
    query: web::Query<NextQuery>,
    token: CsrfToken,
) -> impl Responder {
    let next = form_helpers::safe_next_path(query.next.as_deref()).map(str::to_string);
    if session.get::<i32>("user_id").unwrap_or(None).is_some() {
        let target = next.unwrap_or_else(|| config.news.url(""));
        return HttpResponse::Found().append_header((header::LOCATION, target)).finish();
    }

    let mut ctx = Context::new();
    ctx.insert("site_name", &config.news.site_name);
    ctx.insert("login_url", &config.news.url("staff/login"));
    ctx.insert("csrf_token", token.get());
    ctx.insert("next", &next);
    if let Ok(Some(error)) = session.get::<String>("error") {
        ctx.insert("error", &error);
        session.remove("error");
    }
    match tera.render("news/staff/login.html", &ctx) {
        Ok(rendered) => HttpResponse::Ok().content_type("text/html; charset=utf-8").body(rendered),
        Err(err) => {
            log::error!("Template rendering error: {}", err);
            HttpResponse::InternalServerError().body("Template error")
        }
    }
}

async fn handle_login(
    session: Session,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    form: Csrf<web::Form<LoginForm>>,
) -> impl Responder {
    let login_data = form.into_inner().into_inner();
    let next = form_helpers::safe_next_path(login_data.next.as_deref()).map(str::to_string);
    let login_url = match &next {
        Some(next) => crate::middleware::login_redirect_url(&config.news, next),
        None => config.news.url("staff/login"),
    };

    match staff_helpers::verify_user_credentials(&pool, &login_data.username, &login_data.password) {
        Some(user) => {
            if let Err(e) = staff_helpers::start_session(&session, &user) {
                log::error!("Failed to start session for '{}': {}", user.username, e);
                return HttpResponse::InternalServerError().finish();
            }
            log::info!("User '{}' logged in", user.username);
            let target = next.unwrap_or_else(|| config.news.url(""));
            HttpResponse::Found().append_header((header::LOCATION, target)).finish()
        }
        None => {
            log::warn!("Failed login attempt for '{}'", login_data.username);
            if let Err(e) = session.insert("error", "Invalid credentials or account disabled.") {
                log::warn!("Could not store login error in session: {}", e);
            }
            HttpResponse::Found().append_header((header::LOCATION, login_url)).finish()
        }
    }
}

async fn handle_logout(session: Session, config: web::Data<Config>) -> impl Responder {
    session.purge();
    HttpResponse::Found()
        .append_header((header::LOCATION, config.news.url("")))
        .finish()
}

// --- Staff JSON API ---
async fn list_entries_api(db: web::Data<Database>) -> impl Responder {
    match news_db_operations::read_all_entries(&db) {
        Ok(mut entries) => {
            entries.sort_by(|a, b| crate::models::visibility::newest_first(a, b));
            api_ok(entries)
        }
        Err(e) => api_error(e, "list entries"),
    }
}

async fn get_entry_api(id: web::Path<String>, db: web::Data<Database>) -> impl Responder {
    match news_db_operations::read_entry(&db, &id) {
        Ok(Some(entry)) => api_ok(entry),
        Ok(None) => api_error(DbError::NotFound(id.into_inner()), "read entry"),
        Err(e) => api_error(e, "read entry"),
    }
}

async fn create_entry_api(
    user: AuthenticatedUser,
    draft: web::Json<EntryDraft>,
    db: web::Data<Database>,
    config: web::Data<Config>,
) -> impl Responder {
    match staff_helpers::create_entry(&db, &config.news, user.id, draft.into_inner(), Utc::now()) {
        Ok(entry) => {
            log::info!("User '{}' created entry {}", user.username, entry.id);
            api_created(entry)
        }
        Err(e) => api_error(e, "create entry"),
    }
}

async fn update_entry_api(
    user: AuthenticatedUser,
    id: web::Path<String>,
    draft: web::Json<EntryDraft>,
    db: web::Data<Database>,
    config: web::Data<Config>,
) -> impl Responder {
    match staff_helpers::update_entry(&db, &config.news, &id, draft.into_inner(), Utc::now()) {
        Ok(entry) => {
            log::info!("User '{}' updated entry {}", user.username, entry.id);
            api_ok(entry)
        }
        Err(e) => api_error(e, "update entry"),
    }
}

async fn list_categories_api(db: web::Data<Database>) -> impl Responder {
    match news_db_operations::read_all_categories(&db) {
        Ok(categories) => api_ok(categories),
        Err(e) => api_error(e, "list categories"),
    }
}

async fn create_category_api(
    user: AuthenticatedUser,
    payload: web::Json<NewCategory>,
    db: web::Data<Database>,
    config: web::Data<Config>,
) -> impl Responder {
    let payload = payload.into_inner();
    let category = Category {
        slug: payload.slug,
        parent: payload.parent.filter(|p| !p.is_empty()),
        hide_on_list: payload.hide_on_list,
        translations: payload.translations,
        created_at: Utc::now(),
    };
    match staff_helpers::create_category(&db, &config.news, category) {
        Ok(category) => {
            log::info!("User '{}' created category '{}'", user.username, category.slug);
            api_created(category)
        }
        Err(e) => api_error(e, "create category"),
    }
}

async fn get_category_api(slug: web::Path<String>, db: web::Data<Database>) -> impl Responder {
    match news_db_operations::read_category(&db, &slug) {
        Ok(Some(category)) => api_ok(category),
        Ok(None) => api_error(DbError::NotFound(slug.into_inner()), "read category"),
        Err(e) => api_error(e, "read category"),
    }
}

async fn delete_category_api(user: AuthenticatedUser, slug: web::Path<String>, db: web::Data<Database>) -> impl Responder {
    match news_db_operations::delete_category(&db, &slug) {
        Ok(()) => {
            log::info!("User '{}' deleted category '{}'", user.username, slug);
            api_ok(slug.into_inner())
        }
        Err(e) => api_error(e, "delete category"),
    }
}

async fn list_tags_api(db: web::Data<Database>) -> impl Responder {
    match news_db_operations::read_all_tags(&db) {
        Ok(tags) => api_ok(tags),
        Err(e) => api_error(e, "list tags"),
    }
}

async fn get_tag_api(slug: web::Path<String>, db: web::Data<Database>) -> impl Responder {
    match news_db_operations::read_tag(&db, &slug) {
        Ok(Some(tag)) => api_ok(tag),
        Ok(None) => api_error(DbError::NotFound(slug.into_inner()), "read tag"),
        Err(e) => api_error(e, "read tag"),
    }
}

async fn create_tag_api(
    user: AuthenticatedUser,
    tag: web::Json<Tag>,
    db: web::Data<Database>,
    config: web::Data<Config>,
) -> impl Responder {
    match staff_helpers::create_tag(&db, &config.news, tag.into_inner()) {
        Ok(tag) => {
            log::info!("User '{}' created tag '{}'", user.username, tag.slug);
            api_created(tag)
        }
        Err(e) => api_error(e, "create tag"),
    }
}
