use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default storage when DATABASE_URL is unset. Keeps the app bootable in
/// environments with no database attached.
const DEFAULT_DATABASE_URL: &str = "memory://";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";

/// Which storage backend a DATABASE_URL selects.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendKind {
    /// `sqlite:` URL, passed through to the driver unmodified
    Relational,
    /// `file://<dir>` - per-student JSON documents under the directory
    Document(PathBuf),
    /// `memory://` - process-local map, not persisted
    Memory,
}

/// Runtime configuration, read once from the environment at startup and
/// passed down explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub pool_min: u32,
    pub pool_max: u32,
    pub command_timeout: Duration,
    /// When true, a backend that fails to connect at startup is replaced
    /// by the in-memory store instead of aborting.
    pub fallback_to_memory: bool,
    pub bind_addr: SocketAddr,
}

impl Config {
    /// Load configuration from environment variables, applying defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let pool_min = parse_var("DB_POOL_MIN", 1)?;
        let pool_max = parse_var("DB_POOL_MAX", 10)?;
        let timeout_secs: u64 = parse_var("DB_COMMAND_TIMEOUT_SECS", 60)?;
        let fallback_to_memory = std::env::var("FALLBACK_TO_MEMORY")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let bind_addr = std::env::var("BIND_ADDR")
            .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .context("BIND_ADDR is not a valid socket address")?;

        if pool_min > pool_max {
            bail!("DB_POOL_MIN ({pool_min}) exceeds DB_POOL_MAX ({pool_max})");
        }

        Ok(Self {
            database_url,
            pool_min,
            pool_max,
            command_timeout: Duration::from_secs(timeout_secs),
            fallback_to_memory,
            bind_addr,
        })
    }

    /// Resolve the backend selected by this configuration's DATABASE_URL.
    pub fn backend(&self) -> Result<BackendKind> {
        backend_for_url(&self.database_url)
    }
}

/// Map a DATABASE_URL onto a storage backend by scheme.
pub fn backend_for_url(url: &str) -> Result<BackendKind> {
    if url.starts_with("sqlite:") {
        return Ok(BackendKind::Relational);
    }
    if let Some(dir) = url.strip_prefix("file://") {
        if dir.is_empty() {
            bail!("file:// database URL is missing a directory path");
        }
        return Ok(BackendKind::Document(PathBuf::from(dir)));
    }
    if url.starts_with("memory://") {
        return Ok(BackendKind::Memory);
    }
    bail!("unsupported DATABASE_URL scheme: {url}")
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{name} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}
