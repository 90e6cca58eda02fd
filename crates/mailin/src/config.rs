//! Configuration loading for the message store
//!
//! Settings come from (later wins):
//! 1. `mailin.json` in the mailin config directory
//! 2. `MAILIN_*` environment variables
//! 3. Whatever the caller sets explicitly (command-line flags)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::queue::PENDING_DB;
use crate::store::INDEX_DB;

/// Config filename in the mailin config directory
const CONFIG_FILE: &str = "mailin.json";

/// Store directory used when nothing else is configured
const DEFAULT_STORE_DIR: &str = "store";

pub const STORE_PATH_ENV: &str = "MAILIN_STORE_PATH";
pub const INDEX_DB_ENV: &str = "MAILIN_INDEX_DB";
pub const PENDING_DB_ENV: &str = "MAILIN_PENDING_DB";
pub const DRAIN_LIMIT_ENV: &str = "MAILIN_DRAIN_LIMIT";

/// Where the store, its index and the pending queue live
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailinConfig {
    /// Store root; holds `Maildir/` and, by default, both databases
    pub store_path: Option<PathBuf>,
    /// Index database, defaults to `<store_path>/metadata.db`
    pub index_db: Option<PathBuf>,
    /// Pending queue database, defaults to `<store_path>/pending.db`
    pub pending_db: Option<PathBuf>,
    /// Messages admitted per drain; unset or 0 drains everything
    pub drain_limit: Option<usize>,
}

impl MailinConfig {
    /// Load the config file if present, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut cfg = if config::config_exists(CONFIG_FILE) {
            config::load_json(CONFIG_FILE)?
        } else {
            Self::default()
        };
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Load from a specific JSON file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut cfg: Self = config::load_json_file(path)?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Parse a config from a JSON string, without environment overrides
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse mailin config JSON")
    }

    /// Override fields from `MAILIN_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    /// Override fields from any variable source; empty values are ignored
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(path) = get(STORE_PATH_ENV) {
            self.store_path = Some(PathBuf::from(path));
        }
        if let Some(path) = get(INDEX_DB_ENV) {
            self.index_db = Some(PathBuf::from(path));
        }
        if let Some(path) = get(PENDING_DB_ENV) {
            self.pending_db = Some(PathBuf::from(path));
        }
        if let Some(limit) = get(DRAIN_LIMIT_ENV) {
            let limit = limit
                .trim()
                .parse()
                .with_context(|| format!("{} must be a whole number, got {:?}", DRAIN_LIMIT_ENV, limit))?;
            self.drain_limit = Some(limit);
        }
        Ok(())
    }

    /// Resolved store root
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => config::config_path(DEFAULT_STORE_DIR)
                .context("No store path configured and no config directory available"),
        }
    }

    /// Resolved index database path
    pub fn index_db_path(&self) -> Result<PathBuf> {
        match &self.index_db {
            Some(path) => Ok(path.clone()),
            None => Ok(self.store_path()?.join(INDEX_DB)),
        }
    }

    /// Resolved pending queue database path
    pub fn pending_db_path(&self) -> Result<PathBuf> {
        match &self.pending_db {
            Some(path) => Ok(path.clone()),
            None => Ok(self.store_path()?.join(PENDING_DB)),
        }
    }

    /// Write this config to `mailin.json` in the mailin config directory
    pub fn save(&self) -> Result<PathBuf> {
        config::save_json(CONFIG_FILE, self)?;
        Self::default_config_path().context("Could not determine config directory")
    }

    /// Write this config to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        config::save_json_file(path, self)
    }

    /// Get the default config file path (~/.config/mailin/mailin.json)
    pub fn default_config_path() -> Option<PathBuf> {
        config::config_path(CONFIG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "store_path": "/var/mail/store",
            "index_db": "/var/db/index.sqlite",
            "pending_db": "/var/db/pending.sqlite",
            "drain_limit": 50
        }"#;

        let cfg = MailinConfig::from_json(json).unwrap();
        assert_eq!(cfg.store_path().unwrap(), PathBuf::from("/var/mail/store"));
        assert_eq!(cfg.index_db_path().unwrap(), PathBuf::from("/var/db/index.sqlite"));
        assert_eq!(cfg.pending_db_path().unwrap(), PathBuf::from("/var/db/pending.sqlite"));
        assert_eq!(cfg.drain_limit, Some(50));
    }

    #[test]
    fn test_databases_default_inside_store() {
        let cfg = MailinConfig::from_json(r#"{ "store_path": "/srv/mail" }"#).unwrap();

        assert_eq!(cfg.index_db_path().unwrap(), PathBuf::from("/srv/mail/metadata.db"));
        assert_eq!(cfg.pending_db_path().unwrap(), PathBuf::from("/srv/mail/pending.db"));
        assert_eq!(cfg.drain_limit, None);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut cfg = MailinConfig::from_json(r#"{ "store_path": "/srv/mail" }"#).unwrap();

        cfg.apply_vars(vars(&[
            (STORE_PATH_ENV, "/tmp/other"),
            (PENDING_DB_ENV, "/tmp/queue.db"),
            (DRAIN_LIMIT_ENV, " 10 "),
            (INDEX_DB_ENV, ""),
        ]))
        .unwrap();

        assert_eq!(cfg.store_path, Some(PathBuf::from("/tmp/other")));
        assert_eq!(cfg.index_db_path().unwrap(), PathBuf::from("/tmp/other/metadata.db"));
        assert_eq!(cfg.pending_db_path().unwrap(), PathBuf::from("/tmp/queue.db"));
        assert_eq!(cfg.drain_limit, Some(10));
    }

    #[test]
    fn test_bad_drain_limit() {
        let mut cfg = MailinConfig::default();
        let err = cfg.apply_vars(vars(&[(DRAIN_LIMIT_ENV, "lots")])).unwrap_err();
        assert!(err.to_string().contains(DRAIN_LIMIT_ENV));
    }

    #[test]
    fn test_mistyped_field_is_an_error() {
        assert!(MailinConfig::from_json(r#"{ "drain_limit": "many" }"#).is_err());
    }

    #[test]
    fn test_saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailin.json");
        let cfg = MailinConfig {
            store_path: Some(PathBuf::from("/srv/mail")),
            drain_limit: Some(25),
            ..Default::default()
        };

        cfg.save_to(&path).unwrap();

        let loaded = MailinConfig::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, cfg);
    }
}
