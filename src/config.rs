use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Upper bound for token TTLs: ten years.
const MAX_TTL_MINUTES: i64 = 60 * 24 * 365 * 10;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub service_name: String,
    pub log_env: String,
    pub jwt: JwtConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = match lookup("DATABASE_URL") {
            Some(url) => url,
            None => postgres_url(&lookup)?,
        };
        let service_name = lookup("SERVICE_NAME").unwrap_or_else(|| "auth".into());

        let jwt = JwtConfig {
            secret: lookup("TOKEN_SECRET").context("TOKEN_SECRET must be set")?,
            issuer: service_name.clone(),
            ttl_minutes: ttl_minutes(&lookup, "TOKEN_TTL_MINUTES", 15)?,
            refresh_ttl_minutes: ttl_minutes(&lookup, "REFRESH_TTL_MINUTES", 60 * 24 * 14)?,
        };
        if jwt.secret.is_empty() {
            anyhow::bail!("TOKEN_SECRET must not be empty");
        }

        let server = ServerConfig {
            host: lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "APP_PORT", 8080)?,
            request_timeout_secs: positive(&lookup, "REQUEST_TIMEOUT_SECS", 10)? as u64,
        };

        Ok(Self {
            database_url,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            service_name,
            log_env: lookup("LOG_ENV").unwrap_or_else(|| "dev".into()),
            jwt,
            server,
        })
    }
}

fn postgres_url<F>(lookup: &F) -> anyhow::Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let required = |key: &str| {
        lookup(key).with_context(|| format!("{key} must be set when DATABASE_URL is absent"))
    };
    let host = required("DB_HOST")?;
    let port: u16 = parse_or(lookup, "DB_PORT", 5432)?;
    let username = required("DB_USERNAME")?;
    let password = required("DB_PASSWORD")?;
    let database = required("DB_DATABASE")?;
    Ok(format!(
        "postgres://{username}:{password}@{host}:{port}/{database}?sslmode=disable"
    ))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}

fn positive<F>(lookup: &F, key: &str, default: i64) -> anyhow::Result<i64>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or(lookup, key, default)?;
    if value <= 0 {
        anyhow::bail!("{key} must be a positive integer, got {value}");
    }
    Ok(value)
}

fn ttl_minutes<F>(lookup: &F, key: &str, default: i64) -> anyhow::Result<i64>
where
    F: Fn(&str) -> Option<String>,
{
    let value = positive(lookup, key, default)?;
    if value > MAX_TTL_MINUTES {
        anyhow::bail!("{key} must be at most {MAX_TTL_MINUTES} minutes, got {value}");
    }
    Ok(value)
}
