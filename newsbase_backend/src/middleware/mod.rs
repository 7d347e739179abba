use crate::config::{Config, NewsConfig};
use actix_session::SessionExt;
use actix_web::{
    body::EitherBody,
    dev::{self, forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::InternalError,
    http::header,
    web, Error, FromRequest, HttpRequest, HttpResponse,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use serde::Serialize;
use serde_json::json;
use std::future::{ready, Ready as StdReady};
use url::form_urlencoded;

/// The language a request is served in. Always one of the configured languages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestLanguage(pub String);

impl RequestLanguage {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `?language=` wins, then the first configured match in `Accept-Language`,
/// then the default language.
pub fn resolve_language(query_language: Option<&str>, accept_language: Option<&str>, news: &NewsConfig) -> String {
    if let Some(code) = query_language.map(str::trim).filter(|c| news.has_language(c)) {
        return code.to_string();
    }

    if let Some(accept) = accept_language {
        let mut ranges: Vec<(&str, f32)> = accept
            .split(',')
            .filter_map(|part| {
                let mut pieces = part.split(';');
                let tag = pieces.next()?.trim();
                if tag.is_empty() {
                    return None;
                }
                let quality = pieces
                    .find_map(|p| p.trim().strip_prefix("q="))
                    .and_then(|q| q.parse::<f32>().ok())
                    .unwrap_or(1.0);
                Some((tag, quality))
            })
            .filter(|(_, q)| *q > 0.0)
            .collect();
        // Stable sort keeps header order among equal weights.
        ranges.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        for (tag, _) in ranges {
            let tag = tag.to_ascii_lowercase();
            if news.has_language(&tag) {
                return tag;
            }
            if let Some(primary) = tag.split('-').next() {
                if news.has_language(primary) {
                    return primary.to_string();
                }
            }
        }
    }

    news.default_language.clone()
}

impl FromRequest for RequestLanguage {
    type Error = actix_web::Error;
    type Future = StdReady<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut dev::Payload) -> Self::Future {
        let config = match req.app_data::<web::Data<Config>>() {
            Some(config) => config,
            None => {
                log::error!("Config is not registered as app data; cannot resolve request language.");
                return ready(Err(actix_web::error::ErrorInternalServerError("Server misconfigured.")));
            }
        };

        let query_language = form_urlencoded::parse(req.query_string().as_bytes())
            .find(|(key, _)| key == "language")
            .map(|(_, value)| value.into_owned());
        let accept_language = req
            .headers()
            .get(header::ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok());

        ready(Ok(RequestLanguage(resolve_language(
            query_language.as_deref(),
            accept_language,
            &config.news,
        ))))
    }
}

/// A logged-in user, as recorded in the session at login.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedUser {
    pub id: i32,
    pub username: String,
    pub is_staff: bool,
    pub is_superuser: bool,
}

impl AuthenticatedUser {
    pub fn can_manage_entries(&self) -> bool {
        self.is_staff || self.is_superuser
    }
}

/// `{mount}/staff/login?next=<path>`
pub fn login_redirect_url(news: &NewsConfig, next: &str) -> String {
    let query: String = form_urlencoded::Serializer::new(String::new())
        .append_pair("next", next)
        .finish();
    format!("{}?{}", news.url("staff/login"), query)
}

impl FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = StdReady<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut dev::Payload) -> Self::Future {
        let session = req.get_session();
        let user = (
            session.get::<i32>("user_id"),
            session.get::<String>("username"),
            session.get::<bool>("is_staff"),
            session.get::<bool>("is_superuser"),
        );
        if let (Ok(Some(id)), Ok(Some(username)), Ok(Some(is_staff)), Ok(Some(is_superuser))) = user {
            return ready(Ok(AuthenticatedUser { id, username, is_staff, is_superuser }));
        }

        let login_url = match req.app_data::<web::Data<Config>>() {
            Some(config) => {
                let next = match req.query_string() {
                    "" => req.path().to_string(),
                    query => format!("{}?{}", req.path(), query),
                };
                login_redirect_url(&config.news, &next)
            }
            None => "/".to_string(),
        };
        let response = HttpResponse::Found()
            .append_header((header::LOCATION, login_url))
            .finish();
        ready(Err(InternalError::from_response("Login required.", response).into()))
    }
}

// --- Staff API gate ---

/// Rejects requests without a staff or superuser session before they reach the staff API.
pub struct StaffOnly;

impl<S, B> Transform<S, ServiceRequest> for StaffOnly
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = StaffOnlyMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(StaffOnlyMiddleware { service })
    }
}

pub struct StaffOnlyMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for StaffOnlyMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let session = req.get_session();
        let user_id = session.get::<i32>("user_id").unwrap_or(None);
        let is_staff = session.get::<bool>("is_staff").unwrap_or(None).unwrap_or(false);
        let is_superuser = session.get::<bool>("is_superuser").unwrap_or(None).unwrap_or(false);

        let rejection = match user_id {
            None => Some(HttpResponse::Unauthorized().json(json!({"success": false, "error": "Not logged in."}))),
            Some(id) if !(is_staff || is_superuser) => {
                log::warn!("User {} without staff rights tried to reach {}", id, req.path());
                Some(HttpResponse::Forbidden().json(json!({"success": false, "error": "Staff access required."})))
            }
            Some(_) => None,
        };

        match rejection {
            None => {
                let fut = self.service.call(req);
                Box::pin(async move {
                    let res = fut.await?;
                    Ok(res.map_into_left_body())
                })
            }
            Some(response) => Box::pin(async move {
                let (http_req, _payload) = req.into_parts();
                Ok(ServiceResponse::new(http_req, response.map_into_right_body()))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LanguageConfig;

    fn news() -> NewsConfig {
        NewsConfig {
            site_name: "Example".to_string(),
            site_url: "https://example.org".to_string(),
            mount_path: "/news".to_string(),
            default_language: "en".to_string(),
            languages: vec![
                LanguageConfig { code: "en".to_string(), name: "English".to_string() },
                LanguageConfig { code: "de".to_string(), name: "Deutsch".to_string() },
            ],
            pagination_amount: 10,
            feed_limit: 10,
        }
    }

    #[test]
    fn query_parameter_wins() {
        assert_eq!(resolve_language(Some("de"), Some("en"), &news()), "de");
    }

    #[test]
    fn unknown_query_language_is_ignored() {
        assert_eq!(resolve_language(Some("fr"), Some("de-AT,en;q=0.5"), &news()), "de");
    }

    #[test]
    fn accept_language_respects_weights() {
        assert_eq!(resolve_language(None, Some("fr, en;q=0.4, de;q=0.8"), &news()), "de");
        assert_eq!(resolve_language(None, Some("de;q=0, en-GB"), &news()), "en");
    }

    #[test]
    fn falls_back_to_default() {
        assert_eq!(resolve_language(None, None, &news()), "en");
        assert_eq!(resolve_language(None, Some("fr, it"), &news()), "en");
    }

    #[test]
    fn login_url_carries_next() {
        assert_eq!(
            login_redirect_url(&news(), "/news/publish-entry/1/"),
            "/news/staff/login?next=%2Fnews%2Fpublish-entry%2F1%2F"
        );
    }
}
