use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{anyhow, Context};

pub const DEFAULT_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub database_max_connections: u32,
    pub push_endpoint: Option<String>,
    pub push_server_key: Option<String>,
    pub push_preview_chars: usize,
    pub cors_allow_origin: Option<String>,
}

fn var(key: &str) -> Option<String> {
    dotenv::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw.parse().with_context(|| format!("{key}={raw:?} is not valid")),
        None => Ok(default),
    }
}

impl Config {
    /// Reads `.env` (if present) and the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            bind_addr: parsed("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            database_url: var("DATABASE_URL").ok_or_else(|| anyhow!("DATABASE_URL must be set"))?,
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS", 16)?,
            push_endpoint: var("PUSH_ENDPOINT"),
            push_server_key: var("PUSH_SERVER_KEY"),
            push_preview_chars: parsed("PUSH_PREVIEW_CHARS", DEFAULT_PREVIEW_CHARS)?,
            cors_allow_origin: var("CORS_ALLOW_ORIGIN"),
        };

        if config.push_preview_chars < 4 {
            return Err(anyhow!("PUSH_PREVIEW_CHARS must be at least 4"));
        }
        Ok(config)
    }
}
