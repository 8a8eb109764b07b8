//! Application configuration.
//!
//! Read from `config/default.toml` (or `--config`), then overridden by
//! `VERIGATE_*` environment variables. A missing file means defaults; a
//! file or override that does not parse is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use verigate_kernel::BusConfig;
use verigate_service::ServiceConfig;
use verigate_store::HotCacheConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub bus: BusConfig,
    pub cache: CacheConfig,
    pub verification: VerificationConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/verigate.db"),
        }
    }
}

/// Sizing of the in-memory layer in front of the content cache.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let hot = HotCacheConfig::default();
        Self {
            max_entries: hot.max_entries,
            ttl_seconds: hot.ttl_seconds,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Author recorded when `create` is not given one.
    pub default_author: String,
    /// Deadline for each store or bus call, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            default_author: "system@verigate.local".into(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load the file at `path` and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse `path`; defaults if it does not exist.
    pub fn from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content)
                .with_context(|| format!("invalid configuration in {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `VERIGATE_*` overrides looked up through `var`.
    pub fn apply_overrides<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = var("VERIGATE_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(raw) = var("VERIGATE_BUS_CAPACITY") {
            self.bus.capacity = parse_override("VERIGATE_BUS_CAPACITY", &raw)?;
        }
        if let Some(level) = var("VERIGATE_LOG_LEVEL") {
            self.log.level = level;
        }
        if let Some(raw) = var("VERIGATE_LOG_JSON") {
            self.log.json = parse_override("VERIGATE_LOG_JSON", &raw)?;
        }
        if let Some(author) = var("VERIGATE_AUTHOR") {
            self.verification.default_author = author;
        }
        if let Some(raw) = var("VERIGATE_TIMEOUT_MS") {
            self.verification.timeout_ms = parse_override("VERIGATE_TIMEOUT_MS", &raw)?;
        }

        if self.bus.capacity == 0 {
            bail!("bus.capacity must be at least 1");
        }
        if self.verification.timeout_ms == 0 {
            bail!("verification.timeout_ms must be at least 1");
        }
        Ok(())
    }

    pub fn service(&self) -> ServiceConfig {
        ServiceConfig {
            default_author: self.verification.default_author.clone(),
            operation_timeout: Duration::from_millis(self.verification.timeout_ms),
            hot_cache: HotCacheConfig {
                max_entries: self.cache.max_entries,
                ttl_seconds: self.cache.ttl_seconds,
            },
        }
    }
}

fn parse_override<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{key} has an invalid value: {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = AppConfig::default();
        assert_eq!(config.database.path, PathBuf::from("data/verigate.db"));
        assert_eq!(config.bus.capacity, 256);
        assert_eq!(config.bus.max_payload_bytes, 1024 * 1024);
        assert_eq!(config.cache.max_entries, 10_000);
        assert_eq!(config.cache.ttl_seconds, 300);
        assert_eq!(config.verification.default_author, "system@verigate.local");
        assert_eq!(config.service().operation_timeout, Duration::from_secs(10));
        assert_eq!(config.log.level, "info");
        assert!(!config.log.json);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [database]
            path = "/var/lib/verigate/db.sqlite"

            [log]
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.database.path, PathBuf::from("/var/lib/verigate/db.sqlite"));
        assert!(config.log.json);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.bus.capacity, 256);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(AppConfig::from_toml("[bus]\ncapacity = \"lots\"").is_err());
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.bus.capacity, 256);
    }

    #[test]
    fn file_on_disk_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verigate.toml");
        std::fs::write(&path, "[verification]\ntimeout_ms = 250\n").unwrap();
        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.service().operation_timeout, Duration::from_millis(250));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(env(&[
                ("VERIGATE_DB_PATH", "/tmp/v.db"),
                ("VERIGATE_BUS_CAPACITY", "32"),
                ("VERIGATE_LOG_LEVEL", "debug"),
                ("VERIGATE_LOG_JSON", "true"),
                ("VERIGATE_AUTHOR", "ops@example.com"),
                ("VERIGATE_TIMEOUT_MS", "1500"),
            ]))
            .unwrap();

        assert_eq!(config.database.path, PathBuf::from("/tmp/v.db"));
        assert_eq!(config.bus.capacity, 32);
        assert_eq!(config.log.level, "debug");
        assert!(config.log.json);
        assert_eq!(config.service().default_author, "ops@example.com");
        assert_eq!(config.verification.timeout_ms, 1500);
    }

    #[test]
    fn bad_overrides_are_errors() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(env(&[("VERIGATE_BUS_CAPACITY", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("VERIGATE_BUS_CAPACITY"));

        assert!(AppConfig::default()
            .apply_overrides(env(&[("VERIGATE_LOG_JSON", "yes please")]))
            .is_err());
        assert!(AppConfig::default()
            .apply_overrides(env(&[("VERIGATE_TIMEOUT_MS", "0")]))
            .is_err());
    }
}
