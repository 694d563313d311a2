//! Process configuration, read once at start-up from the environment.

use std::path::PathBuf;

use crate::rate_limit::RateLimitConfig;

const MIN_SECRET_LEN: usize = 32;

/// Custom `Debug` redacts the JWT secret.
#[derive(Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub bind_addr: String,
    pub port: u16,
    /// Postgres connection string; required with the `postgres-store` backend.
    pub database_url: Option<String>,
    /// Snapshot directory for the in-memory backend; `None` keeps it ephemeral.
    pub data_dir: Option<PathBuf>,
    pub log_retention_days: u32,
    pub log_purge_interval_secs: u64,
    pub enable_hsts: bool,
    pub cors_origins: Vec<String>,
    /// Username of an admin account created at start-up if missing.
    pub bootstrap_admin: Option<String>,
    pub rate_limit_enabled: bool,
    pub rate_limits: RateLimitConfig,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("jwt_secret", &"[REDACTED]")
            .field("bind_addr", &self.bind_addr)
            .field("port", &self.port)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("data_dir", &self.data_dir)
            .field("log_retention_days", &self.log_retention_days)
            .field("log_purge_interval_secs", &self.log_purge_interval_secs)
            .field("enable_hsts", &self.enable_hsts)
            .field("cors_origins", &self.cors_origins)
            .field("bootstrap_admin", &self.bootstrap_admin)
            .field("rate_limit_enabled", &self.rate_limit_enabled)
            .field("rate_limits", &self.rate_limits)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),
    #[error("JWT_SECRET must be at least 32 bytes")]
    WeakSecret,
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid(name, raw)),
        None => Ok(default),
    }
}

fn flag(name: &str, default: bool) -> bool {
    var(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(default)
}

impl AppConfig {
    /// Variables: `JWT_SECRET` (required), `BIND_ADDR` (0.0.0.0), `PORT`
    /// (8080), `DATABASE_URL`, `ASKBOARD_DATA_DIR`, `LOG_RETENTION_DAYS` (90),
    /// `LOG_PURGE_INTERVAL_SECS` (86400), `ENABLE_HSTS`, `CORS_ORIGINS`
    /// (comma separated), `BOOTSTRAP_ADMIN`, `RATE_LIMIT_ENABLED` (true) and
    /// the `RL_*` limits.
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = var("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::WeakSecret);
        }
        let log_retention_days = parsed("LOG_RETENTION_DAYS", 90u32)?;
        if log_retention_days == 0 {
            return Err(ConfigError::Invalid("LOG_RETENTION_DAYS", "0".into()));
        }
        let log_purge_interval_secs = parsed("LOG_PURGE_INTERVAL_SECS", 86_400u64)?;
        if log_purge_interval_secs == 0 {
            return Err(ConfigError::Invalid("LOG_PURGE_INTERVAL_SECS", "0".into()));
        }
        Ok(Self {
            jwt_secret,
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed("PORT", 8080u16)?,
            database_url: var("DATABASE_URL"),
            data_dir: var("ASKBOARD_DATA_DIR").map(PathBuf::from),
            log_retention_days,
            log_purge_interval_secs,
            enable_hsts: flag("ENABLE_HSTS", false),
            cors_origins: var("CORS_ORIGINS")
                .map(|v| v.split(',').map(|o| o.trim().to_string()).filter(|o| !o.is_empty()).collect())
                .unwrap_or_else(|| vec!["http://localhost:5173".into(), "http://localhost:3000".into()]),
            bootstrap_admin: var("BOOTSTRAP_ADMIN"),
            rate_limit_enabled: flag("RATE_LIMIT_ENABLED", true),
            rate_limits: RateLimitConfig::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &["JWT_SECRET", "PORT", "LOG_RETENTION_DAYS", "CORS_ORIGINS", "ENABLE_HSTS"];

    fn clear() {
        for v in VARS {
            std::env::remove_var(v);
        }
    }

    #[test]
    #[serial]
    fn secret_is_required_and_must_be_long() {
        clear();
        assert!(matches!(AppConfig::from_env(), Err(ConfigError::Missing("JWT_SECRET"))));
        std::env::set_var("JWT_SECRET", "short");
        assert!(matches!(AppConfig::from_env(), Err(ConfigError::WeakSecret)));
        clear();
    }

    #[test]
    #[serial]
    fn defaults_and_overrides() {
        clear();
        std::env::set_var("JWT_SECRET", "x".repeat(40));
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.log_retention_days, 90);
        assert!(!cfg.enable_hsts);

        std::env::set_var("PORT", "9000");
        std::env::set_var("CORS_ORIGINS", "https://a.example, https://b.example");
        std::env::set_var("ENABLE_HSTS", "true");
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.cors_origins, vec!["https://a.example", "https://b.example"]);
        assert!(cfg.enable_hsts);
        assert!(!format!("{cfg:?}").contains("xxxx"));

        std::env::set_var("PORT", "not-a-port");
        assert!(matches!(AppConfig::from_env(), Err(ConfigError::Invalid("PORT", _))));
        clear();
    }
}
