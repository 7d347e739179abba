use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, serde::Serialize, PartialEq)]
pub struct LanguageConfig {
    pub code: String,
    pub name: String,
}

fn default_pagination_amount() -> usize {
    10
}

fn default_feed_limit() -> usize {
    10
}

fn default_mount_path() -> String {
    "/news".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct NewsConfig {
    pub site_name: String,
    /// Absolute base used for links in feeds and the sitemap, without a trailing slash.
    pub site_url: String,
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
    pub default_language: String,
    pub languages: Vec<LanguageConfig>,
    #[serde(default = "default_pagination_amount")]
    pub pagination_amount: usize,
    #[serde(default = "default_feed_limit")]
    pub feed_limit: usize,
}

impl NewsConfig {
    pub fn is_multilingual(&self) -> bool {
        self.languages.len() > 1
    }

    pub fn has_language(&self, code: &str) -> bool {
        self.languages.iter().any(|l| l.code == code)
    }

    pub fn language_name(&self, code: &str) -> String {
        self.languages
            .iter()
            .find(|l| l.code == code)
            .map(|l| l.name.clone())
            .unwrap_or_else(|| code.to_string())
    }

    /// `path` relative to the news mount point, e.g. `url("rss/")` -> `/news/rss/`.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.mount_path.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    pub fn absolute_url(&self, path: &str) -> String {
        format!("{}{}", self.site_url.trim_end_matches('/'), self.url(path))
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.languages.is_empty() {
            return Err(config::ConfigError::Message(
                "FATAL: 'news.languages' must list at least one language.".to_string(),
            ));
        }
        if !self.has_language(&self.default_language) {
            return Err(config::ConfigError::Message(format!(
                "FATAL: 'news.default_language' ('{}') is not one of 'news.languages'.",
                self.default_language
            )));
        }
        if !self.mount_path.starts_with('/') || self.mount_path.trim_end_matches('/').is_empty() {
            return Err(config::ConfigError::Message(format!(
                "FATAL: 'news.mount_path' ('{}') must start with '/' and name a sub-path such as '/news'.",
                self.mount_path
            )));
        }
        if self.pagination_amount == 0 {
            return Err(config::ConfigError::Message(
                "FATAL: 'news.pagination_amount' must be greater than zero.".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub web: WebConfig,
    pub news: NewsConfig,
    // These fields are populated from the .env file
    pub database_path: String,
    pub media_path: String,
    pub allowed_origins: String,
    pub log_level: String,
    pub session_secret_key: String,
    pub use_secure_cookies: bool,
}

fn required_env(name: &str) -> Result<String, config::ConfigError> {
    env::var(name).map_err(|_| {
        config::ConfigError::Message(format!(
            "FATAL: Environment variable '{}' is not set in your .env file.",
            name
        ))
    })
}

fn require_absolute(name: &str, value: &str) -> Result<(), config::ConfigError> {
    if Path::new(value).is_relative() {
        return Err(config::ConfigError::Message(format!(
            "FATAL: The '{}' in your .env file is a relative path ('{}'). It MUST be an absolute path.",
            name, value
        )));
    }
    Ok(())
}

pub fn is_valid_session_key(key: &str) -> bool {
    key.len() == 128 && key.chars().all(|c| c.is_ascii_hexdigit())
}

impl Config {
    pub fn from_env(env_path: &Path) -> Result<Self, config::ConfigError> {
        dotenvy::from_path(env_path).map_err(|e| {
            config::ConfigError::Message(format!(
                "FATAL: Failed to load .env file from '{}'. Error: {}",
                env_path.display(),
                e
            ))
        })?;
        Self::from_sources(config::File::new("config/default.toml", config::FileFormat::Toml))
    }

    /// Builds the configuration from a TOML source plus the process environment.
    pub fn from_sources<S>(toml_source: S) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let database_path = required_env("DATABASE_PATH")?;
        let media_path = required_env("MEDIA_PATH")?;
        let session_secret_key = required_env("SESSION_SECRET_KEY")?;

        // 128 hex characters, i.e. the 64 bytes the cookie key needs.
        if !is_valid_session_key(&session_secret_key) {
            return Err(config::ConfigError::Message(
                "FATAL: 'SESSION_SECRET_KEY' must be 128 hexadecimal characters long (64 bytes).".to_string(),
            ));
        }

        require_absolute("DATABASE_PATH", &database_path)?;
        require_absolute("MEDIA_PATH", &media_path)?;

        let allowed_origins = env::var("ALLOWED_ORIGINS").unwrap_or_default();
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let use_secure_cookies = env::var("USE_SECURE_COOKIES")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let mut builder = config::Config::builder()
            .add_source(toml_source)
            .set_override("database_path", database_path)?
            .set_override("media_path", media_path)?
            .set_override("session_secret_key", session_secret_key)?
            .set_override("allowed_origins", allowed_origins)?
            .set_override("log_level", log_level)?
            .set_override("use_secure_cookies", use_secure_cookies)?;

        if let Ok(amount) = env::var("NEWS_PAGINATION_AMOUNT") {
            let amount = amount.trim().parse::<i64>().map_err(|_| {
                config::ConfigError::Message(format!(
                    "FATAL: 'NEWS_PAGINATION_AMOUNT' must be a whole number, got '{}'.",
                    amount
                ))
            })?;
            builder = builder.set_override("news.pagination_amount", amount)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.news.validate()?;
        Ok(config)
    }

    pub fn users_db_path(&self) -> PathBuf {
        PathBuf::from(&self.database_path).join("users").join("users.db")
    }

    pub fn news_db_path(&self) -> PathBuf {
        PathBuf::from(&self.database_path).join("news").join("news.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML: &str = r#"
        [web]
        host = "127.0.0.1"
        port = 8080

        [news]
        site_name = "Example"
        site_url = "https://example.org/"
        default_language = "en"

        [[news.languages]]
        code = "en"
        name = "English"

        [[news.languages]]
        code = "de"
        name = "Deutsch"
    "#;

    fn set_required_env() {
        env::set_var("DATABASE_PATH", "/var/lib/newsbase");
        env::set_var("MEDIA_PATH", "/var/lib/newsbase/media");
        env::set_var("SESSION_SECRET_KEY", "ab".repeat(64));
    }

    // Everything touching the environment lives in one test so it cannot race with itself.
    #[test]
    fn loads_from_toml_and_env() {
        set_required_env();
        env::remove_var("NEWS_PAGINATION_AMOUNT");

        let config = Config::from_sources(config::File::from_str(TOML, config::FileFormat::Toml)).unwrap();
        assert_eq!(config.web.port, 8080);
        assert_eq!(config.news.pagination_amount, 10);
        assert_eq!(config.news.mount_path, "/news");
        assert!(config.news.is_multilingual());
        assert_eq!(config.news.language_name("de"), "Deutsch");
        assert_eq!(config.news.absolute_url("rss/"), "https://example.org/news/rss/");
        assert_eq!(config.news_db_path(), PathBuf::from("/var/lib/newsbase/news/news.db"));

        env::set_var("NEWS_PAGINATION_AMOUNT", "25");
        let config = Config::from_sources(config::File::from_str(TOML, config::FileFormat::Toml)).unwrap();
        assert_eq!(config.news.pagination_amount, 25);

        env::set_var("NEWS_PAGINATION_AMOUNT", "lots");
        assert!(Config::from_sources(config::File::from_str(TOML, config::FileFormat::Toml)).is_err());
        env::remove_var("NEWS_PAGINATION_AMOUNT");

        env::set_var("SESSION_SECRET_KEY", "too-short");
        assert!(Config::from_sources(config::File::from_str(TOML, config::FileFormat::Toml)).is_err());
        set_required_env();

        let bad_default = TOML.replace("default_language = \"en\"", "default_language = \"fr\"");
        assert!(Config::from_sources(config::File::from_str(&bad_default, config::FileFormat::Toml)).is_err());
    }

    #[test]
    fn session_key_shape() {
        assert!(is_valid_session_key(&"0f".repeat(64)));
        assert!(!is_valid_session_key(&"zz".repeat(64)));
        assert!(!is_valid_session_key("abc"));
    }
}
