use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};

pub const DEFAULT_LOGIN_URL: &str = "/auth/login/";

/// Runtime settings, read once at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: Option<String>,
    /// Directory for the in-memory store's JSON snapshot.
    pub data_dir: PathBuf,
    pub persist_snapshot: bool,
    /// Upload root for post images.
    pub media_root: PathBuf,
    pub index_cache_ttl: Duration,
    pub invalidate_on_write: bool,
    pub login_url: String,
    pub frontend_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
            database_url: None,
            data_dir: PathBuf::from("data"),
            persist_snapshot: true,
            media_root: PathBuf::from("media"),
            index_cache_ttl: Duration::from_secs(20),
            invalidate_on_write: true,
            login_url: DEFAULT_LOGIN_URL.into(),
            frontend_url: None,
        }
    }
}

fn string_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn bool_env(name: &str, default: bool) -> bool {
    match string_env(name) {
        Some(v) => v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"),
        None => default,
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if secret.len() < 32 {
            bail!("JWT_SECRET must be at least 32 characters long");
        }

        let d = Self::default();
        let ttl = match string_env("INDEX_CACHE_TTL_SECS") {
            Some(v) => Duration::from_secs(v.parse().context("INDEX_CACHE_TTL_SECS must be an integer")?),
            None => d.index_cache_ttl,
        };
        Ok(Self {
            bind_addr: string_env("BIND_ADDR").unwrap_or(d.bind_addr),
            database_url: string_env("DATABASE_URL"),
            data_dir: string_env("POSTFEED_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            persist_snapshot: bool_env("POSTFEED_PERSIST", d.persist_snapshot),
            media_root: string_env("MEDIA_ROOT").map(PathBuf::from).unwrap_or(d.media_root),
            index_cache_ttl: ttl,
            invalidate_on_write: bool_env("PAGE_CACHE_INVALIDATE_ON_WRITE", d.invalidate_on_write),
            login_url: string_env("LOGIN_URL").unwrap_or(d.login_url),
            frontend_url: string_env("FRONTEND_URL"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn short_secret_is_rejected() {
        std::env::set_var("JWT_SECRET", "short");
        assert!(AppConfig::from_env().is_err());
        std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    }

    #[test]
    #[serial_test::serial]
    fn reads_overrides() {
        std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
        std::env::set_var("INDEX_CACHE_TTL_SECS", "5");
        std::env::set_var("PAGE_CACHE_INVALIDATE_ON_WRITE", "false");
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.index_cache_ttl, Duration::from_secs(5));
        assert!(!cfg.invalidate_on_write);
        assert_eq!(cfg.login_url, DEFAULT_LOGIN_URL);
        std::env::remove_var("INDEX_CACHE_TTL_SECS");
        std::env::remove_var("PAGE_CACHE_INVALIDATE_ON_WRITE");
    }
}
