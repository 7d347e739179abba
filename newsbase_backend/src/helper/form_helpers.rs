use actix_web::{web, HttpRequest, HttpResponse};
use std::collections::HashMap;
use url::form_urlencoded;

/// Parses URL-encoded form data from bytes, handling potential UTF-8 errors gracefully.
pub fn parse_form(form_bytes: &web::Bytes) -> Result<HashMap<String, String>, HttpResponse> {
    let body = match String::from_utf8(form_bytes.to_vec()) {
        Ok(s) => s,
        Err(_) => return Err(HttpResponse::BadRequest().body("Invalid UTF-8 in request body.")),
    };
    Ok(form_urlencoded::parse(body.as_bytes()).into_owned().collect())
}

/// True for requests sent by `XMLHttpRequest` style clients.
pub fn is_ajax(req: &HttpRequest) -> bool {
    req.headers()
        .get("X-Requested-With")
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.eq_ignore_ascii_case("XMLHttpRequest"))
}

/// Keeps redirects on this site: a path starting with one `/`.
pub fn safe_next_path(next: Option<&str>) -> Option<&str> {
    next.filter(|n| n.starts_with('/') && !n.starts_with("//") && !n.contains('\\'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn parses_urlencoded_pairs() {
        let form = parse_form(&web::Bytes::from_static(b"action=publish&note=a+b")).unwrap();
        assert_eq!(form.get("action").map(String::as_str), Some("publish"));
        assert_eq!(form.get("note").map(String::as_str), Some("a b"));
    }

    #[test]
    fn rejects_invalid_utf8() {
        assert!(parse_form(&web::Bytes::from_static(&[0xff, 0xfe])).is_err());
    }

    #[test]
    fn detects_ajax() {
        let req = TestRequest::default()
            .insert_header(("X-Requested-With", "XMLHttpRequest"))
            .to_http_request();
        assert!(is_ajax(&req));
        assert!(!is_ajax(&TestRequest::default().to_http_request()));
    }

    #[test]
    fn next_paths_stay_local() {
        assert_eq!(safe_next_path(Some("/news/")), Some("/news/"));
        assert_eq!(safe_next_path(Some("//evil.example")), None);
        assert_eq!(safe_next_path(Some("https://evil.example")), None);
        assert_eq!(safe_next_path(None), None);
    }
}
