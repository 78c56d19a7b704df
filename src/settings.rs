use crate::error::AppError;
use booth_client::{ClientConfig, DEFAULT_PI_BASE_URL, DEFAULT_USER_AGENT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use upload_queue::{FailedAssetPolicy, UploadStrategy, WorkerConfig};

pub const SETTINGS_FILE_NAME: &str = "uploader.toml";
pub const WORKER_KEY_ENV: &str = "FOTOX_WORKER_KEY";

/// Uploader settings, stored as TOML next to the queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploaderSettings {
    pub pi_base_url: String,
    /// Presign/complete relay, needed for the presigned strategy
    pub relay_base_url: Option<String>,
    pub worker_key: Option<String>,
    pub strategy: UploadStrategy,
    pub failed_policy: FailedAssetPolicy,
    pub timeout_seconds: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub poll_interval_seconds: u64,
    pub max_concurrent_uploads: usize,
    pub user_agent: String,
    /// Overrides the platform data directory
    pub data_dir: Option<PathBuf>,
}

impl Default for UploaderSettings {
    fn default() -> Self {
        Self {
            pi_base_url: DEFAULT_PI_BASE_URL.to_string(),
            relay_base_url: None,
            worker_key: None,
            strategy: UploadStrategy::Direct,
            failed_policy: FailedAssetPolicy::EveryPass,
            timeout_seconds: 30,
            max_attempts: 3,
            retry_delay_ms: 1000,
            poll_interval_seconds: 15,
            max_concurrent_uploads: 3,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            data_dir: None,
        }
    }
}

impl UploaderSettings {
    /// Read settings; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, AppError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No settings at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_toml(s: &str) -> Result<Self, AppError> {
        Ok(toml::from_str(s)?)
    }

    pub fn to_toml(&self) -> Result<String, AppError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Apply `FOTOX_WORKER_KEY` if it is set
    pub fn with_env(self) -> Self {
        self.with_worker_key_override(std::env::var(WORKER_KEY_ENV).ok())
    }

    fn with_worker_key_override(mut self, key: Option<String>) -> Self {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.worker_key = Some(key);
        }
        self
    }

    fn client_config(&self, base_url: &str) -> ClientConfig {
        let mut config = ClientConfig::new(base_url);
        config.timeout = Duration::from_secs(self.timeout_seconds);
        config.max_attempts = self.max_attempts;
        config.retry_delay = Duration::from_millis(self.retry_delay_ms);
        config
    }

    pub fn pi_client_config(&self) -> ClientConfig {
        self.client_config(&self.pi_base_url)
    }

    pub fn relay_client_config(&self) -> Option<ClientConfig> {
        self.relay_base_url
            .as_deref()
            .map(|url| self.client_config(url))
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            strategy: self.strategy,
            failed_policy: self.failed_policy,
            poll_interval: Duration::from_secs(self.poll_interval_seconds),
            max_concurrent_uploads: self.max_concurrent_uploads,
        }
    }
}
