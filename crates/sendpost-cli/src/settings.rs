use anyhow::{bail, Context};
use sendpost_core::config::{Config, WarnLevel};
use sendpost_core::{MemoryStore, RedbStore, Store};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Store path that selects the in-memory store.
pub const MEMORY_STORE: &str = ":memory:";

const DEFAULT_CONFIG_FILE: &str = "sendpost.yaml";

/// Effective configuration after file loading and command-line overrides.
pub struct Settings {
    pub config: Config,
}

impl Settings {
    /// Load the config file (an explicit path must exist; the default one may
    /// be absent), then apply `--store` and `--api-url`.
    pub fn resolve(
        config_path: Option<&Path>,
        store: Option<&Path>,
        api_url: Option<String>,
    ) -> anyhow::Result<Self> {
        let mut config = match config_path {
            Some(path) => Config::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => Config::load_or_default(Path::new(DEFAULT_CONFIG_FILE))
                .context("failed to load sendpost.yaml")?,
        };

        if let Some(path) = store {
            config.store.path = path.to_path_buf();
        }
        if let Some(url) = api_url {
            config.executor.api_url = url;
        }

        let mut errors = Vec::new();
        for warning in config.validate() {
            match warning.level {
                WarnLevel::Error => errors.push(warning.message),
                WarnLevel::Warning => tracing::warn!("config: {}", warning.message),
            }
        }
        if !errors.is_empty() {
            bail!("invalid config: {}", errors.join("; "));
        }
        Ok(Self { config })
    }

    pub fn store_path(&self) -> &PathBuf {
        &self.config.store.path
    }

    pub fn open_store(&self) -> anyhow::Result<Arc<dyn Store>> {
        if self.store_path().as_os_str() == MEMORY_STORE {
            return Ok(Arc::new(MemoryStore::new()));
        }
        let store = RedbStore::open(self.store_path())
            .with_context(|| format!("failed to open store {}", self.store_path().display()))?;
        Ok(Arc::new(store))
    }
}
