use crate::error::{Result, RuleSyncError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::Path;
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
// SyncSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Background sync period.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Max rules per upload or delete request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Per-call deadline for every request to the server.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Extra attempts after the first one for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles on each retry.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Quiet period that collapses bursts of explicit sync requests.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Delay before the first background pass after startup.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

fn default_interval_ms() -> u64 {
    5 * 60 * 1000
}

fn default_batch_size() -> usize {
    10
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_debounce_ms() -> u64 {
    2_000
}

fn default_initial_delay_ms() -> u64 {
    5_000
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            batch_size: default_batch_size(),
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            debounce_ms: default_debounce_ms(),
            initial_delay_ms: default_initial_delay_ms(),
        }
    }
}

impl SyncSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_rules_dir")]
    pub rules_dir: String,
    #[serde(default)]
    pub sync: SyncSettings,
}

fn default_version() -> u32 {
    1
}

fn default_server_url() -> String {
    "http://localhost:3142".to_string()
}

fn default_rules_dir() -> String {
    paths::DEFAULT_RULES_DIR.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            server_url: default_server_url(),
            rules_dir: default_rules_dir(),
            sync: SyncSettings::default(),
        }
    }
}

impl Config {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(RuleSyncError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let s = &self.sync;

        if self.server_url.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "server_url is empty".to_string(),
            });
        } else if !(self.server_url.starts_with("http://")
            || self.server_url.starts_with("https://"))
        {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "server_url '{}' must start with http:// or https://",
                    self.server_url
                ),
            });
        }

        if self.rules_dir.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "rules_dir is empty".to_string(),
            });
        }

        if s.batch_size == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "sync.batch_size must be at least 1".to_string(),
            });
        }

        if s.request_timeout_ms == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "sync.request_timeout_ms must be greater than 0".to_string(),
            });
        }

        if s.interval_ms < 10_000 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "sync.interval_ms={} is very short (<10s) and will hammer the server",
                    s.interval_ms
                ),
            });
        }

        if s.max_retries > 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!("sync.max_retries={} (>10 is unusual)", s.max_retries),
            });
        }

        if s.debounce_ms >= s.interval_ms {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "sync.debounce_ms is not shorter than sync.interval_ms".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::new("https://rules.example.com");
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.server_url, "https://rules.example.com");
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.sync, SyncSettings::default());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let cfg: Config = serde_yaml::from_str("sync:\n  batch_size: 25\n").unwrap();
        assert_eq!(cfg.sync.batch_size, 25);
        assert_eq!(cfg.sync.debounce_ms, 2_000);
        assert_eq!(cfg.rules_dir, ".rules");
    }

    #[test]
    fn load_missing_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(dir.path()).unwrap_err();
        assert!(matches!(err, RuleSyncError::NotInitialized));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.sync.max_retries = 1;
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.sync.max_retries, 1);
    }

    #[test]
    fn default_config_is_clean() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn zero_batch_size_is_an_error() {
        let mut cfg = Config::default();
        cfg.sync.batch_size = 0;
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("batch_size")));
    }

    #[test]
    fn bad_server_url_is_an_error() {
        let cfg = Config::new("ftp://rules");
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("server_url")));
    }

    #[test]
    fn short_interval_warns() {
        let mut cfg = Config::default();
        cfg.sync.interval_ms = 1_000;
        cfg.sync.debounce_ms = 100;
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Warning);
    }
}
