use crate::middleware::StaffOnly;
use actix_csrf::CsrfMiddleware;
use actix_web::{http::Method, web};
use rand::prelude::StdRng;

pub mod news;
pub mod staff;

/// Everything served under the news mount point. The caller wraps it in the session middleware.
pub fn configure(cfg: &mut web::ServiceConfig, mount_path: &str) {
    let login_path = format!("{}/staff/login", mount_path.trim_end_matches('/'));

    // "/staff/api" must be registered before "/staff", which would otherwise swallow it.
    cfg.service(web::scope("/staff/api").wrap(StaffOnly).configure(staff::config_api))
        .service(
            web::scope("/staff")
                .wrap(CsrfMiddleware::<StdRng>::new().set_cookie(Method::GET, login_path))
                .configure(staff::config_login),
        )
        .configure(news::config_news);
}
