use crate::error::Result;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ExecutorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Base URL of the workflow API, e.g. `http://localhost:4200/api`.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Accept invalid TLS certificates.
    #[serde(default)]
    pub insecure_tls: bool,
    #[serde(default = "default_request_timeout", with = "secs")]
    pub request_timeout: Duration,
}

fn default_api_url() -> String {
    "http://localhost:4200/api".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            insecure_tls: false,
            request_timeout: default_request_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scheduled runs executed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Capacity of the fired-schedule queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Delay between status polls of a submitted stage.
    #[serde(default = "default_poll_interval", with = "secs")]
    pub poll_interval: Duration,
    /// Upper bound on waiting for one stage to reach a terminal state.
    #[serde(default = "default_stage_timeout", with = "secs")]
    pub stage_timeout: Duration,
    #[serde(default = "default_subscribe_attempts")]
    pub subscribe_attempts: u32,
    #[serde(default = "default_subscribe_backoff", with = "secs")]
    pub subscribe_backoff: Duration,
    /// How often the daemon reconciles stored schedules with the scheduler.
    #[serde(default = "default_sync_interval", with = "secs")]
    pub sync_interval: Duration,
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    100
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_stage_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_subscribe_attempts() -> u32 {
    5
}

fn default_subscribe_backoff() -> Duration {
    Duration::from_millis(333)
}

fn default_sync_interval() -> Duration {
    Duration::from_secs(30)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            poll_interval: default_poll_interval(),
            stage_timeout: default_stage_timeout(),
            subscribe_attempts: default_subscribe_attempts(),
            subscribe_backoff: default_subscribe_backoff(),
            sync_interval: default_sync_interval(),
        }
    }
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("sendpost.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.executor.api_url.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "executor.api_url is empty".to_string(),
            });
        }

        if self.engine.workers == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "engine.workers is 0; scheduled runs will never execute".to_string(),
            });
        }

        if self.engine.queue_capacity == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "engine.queue_capacity must be at least 1".to_string(),
            });
        }

        for (name, value) in [
            ("engine.poll_interval", self.engine.poll_interval),
            ("engine.sync_interval", self.engine.sync_interval),
        ] {
            if value.is_zero() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("{name} must be greater than 0"),
                });
            }
        }

        if self.engine.poll_interval >= self.engine.stage_timeout {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "engine.poll_interval ({:?}) is not shorter than engine.stage_timeout ({:?}); \
                     stages will time out before their first status check",
                    self.engine.poll_interval, self.engine.stage_timeout
                ),
            });
        }

        warnings
    }
}

/// Durations as fractional seconds.
mod secs {
    use super::*;

    pub fn serialize<S>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D>(d: D) -> std::result::Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.engine.queue_capacity, 100);
        assert_eq!(cfg.engine.subscribe_attempts, 5);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn durations_parse_as_fractional_seconds() {
        let yaml = "engine:\n  poll_interval: 0.5\n  stage_timeout: 90\nexecutor:\n  insecure_tls: true\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.engine.poll_interval, Duration::from_millis(500));
        assert_eq!(cfg.engine.stage_timeout, Duration::from_secs(90));
        assert!(cfg.executor.insecure_tls);
        assert_eq!(cfg.engine.workers, 4);
    }

    #[test]
    fn negative_duration_is_rejected() {
        let err = serde_yaml::from_str::<Config>("engine:\n  poll_interval: -1\n");
        assert!(err.is_err());
    }

    #[test]
    fn load_or_default_handles_missing_file() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load_or_default(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn load_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sendpost.yaml");
        std::fs::write(&path, "store:\n  path: /var/lib/sendpost.db\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.store.path, PathBuf::from("/var/lib/sendpost.db"));
    }

    #[test]
    fn validate_flags_bad_values() {
        let mut cfg = Config::default();
        cfg.engine.workers = 0;
        cfg.engine.poll_interval = cfg.engine.stage_timeout;
        cfg.executor.api_url = " ".into();

        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().any(|w| w.level == WarnLevel::Error));
    }

    #[test]
    fn validate_rejects_zero_intervals() {
        let cfg: Config =
            serde_yaml::from_str("engine:\n  poll_interval: 0\n  sync_interval: 0.0\n").unwrap();

        let errors: Vec<_> = cfg
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("engine.poll_interval"));
        assert!(errors[1].contains("engine.sync_interval"));
    }
}
