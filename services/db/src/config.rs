//! Connection settings from the environment

use std::time::Duration;

use crate::retry::RetryPolicy;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: &str = "5432";
pub const DEFAULT_DATABASE: &str = "dubai_population";
pub const DEFAULT_USER: &str = "postgres";
pub const DEFAULT_PASSWORD: &str = "postgres";

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DbConfig {
    /// `DATABASE_URL` wins; otherwise the URL is assembled from the
    /// `POSTGRES_*` variables with their defaults.
    pub fn from_env(default_max_connections: u32) -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), default_max_connections)
    }

    pub fn from_lookup<F>(lookup: F, default_max_connections: u32) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let url = match lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()) {
            Some(url) => url,
            None => format!(
                "postgresql://{}:{}@{}:{}/{}",
                var("POSTGRES_USER", DEFAULT_USER),
                var("POSTGRES_PASSWORD", DEFAULT_PASSWORD),
                var("POSTGRES_HOST", DEFAULT_HOST),
                var("POSTGRES_PORT", DEFAULT_PORT),
                var("POSTGRES_DB", DEFAULT_DATABASE),
            ),
        };

        let max_connections = lookup("DB_MAX_CONNECTIONS")
            .and_then(|v| v.trim().parse().ok())
            .filter(|n: &u32| *n > 0)
            .unwrap_or(default_max_connections);

        Self {
            url,
            max_connections,
        }
    }

    /// URL safe for logs: the password between `:` and `@` is masked.
    pub fn redacted_url(&self) -> String {
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return self.url.clone();
        };
        let Some((userinfo, host)) = rest.rsplit_once('@') else {
            return self.url.clone();
        };
        match userinfo.split_once(':') {
            Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host),
            None => self.url.clone(),
        }
    }
}

impl RetryPolicy {
    /// `DB_CONNECT_ATTEMPTS` (default 5) and `DB_CONNECT_DELAY_SECS` (default 2).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let max_attempts = lookup("DB_CONNECT_ATTEMPTS")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.max_attempts);
        let delay = lookup("DB_CONNECT_DELAY_SECS")
            .and_then(|v| v.trim().parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.delay);
        Self::new(max_attempts, delay)
    }
}
