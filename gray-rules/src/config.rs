use crate::service::ScanSettings;
use serde::Deserialize;
use std::time::Duration;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,
    #[error("scan_interval_secs must be at least 1")]
    InvalidScanInterval,
    #[error("full_scan_every must be at least 1")]
    InvalidFullScanEvery,
    #[error("Empty rule store url")]
    EmptyRuleStoreUrl,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    fn new(host: &str, port: u16) -> Self {
        Listener {
            host: host.into(),
            port,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

impl Default for Listener {
    fn default() -> Self {
        Listener::new("127.0.0.1", 3000)
    }
}

fn default_admin_listener() -> Listener {
    Listener::new("127.0.0.1", 3001)
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct RuleStoreConfig {
    pub url: String,
}

fn default_scan_interval_secs() -> u64 {
    60
}

fn default_full_scan_every() -> u32 {
    1
}

fn default_notification_buffer() -> usize {
    256
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    #[serde(default = "default_admin_listener")]
    pub admin_listener: Listener,
    pub rule_store: RuleStoreConfig,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Ticks between full reconciliation scans. 1 reconciles on every tick.
    #[serde(default = "default_full_scan_every")]
    pub full_scan_every: u32,
    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.rule_store.url.trim().is_empty() {
            return Err(ValidationError::EmptyRuleStoreUrl);
        }
        if self.scan_interval_secs == 0 {
            return Err(ValidationError::InvalidScanInterval);
        }
        if self.full_scan_every == 0 {
            return Err(ValidationError::InvalidFullScanEvery);
        }
        Ok(())
    }

    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            interval: Duration::from_secs(self.scan_interval_secs),
            full_scan_every: self.full_scan_every,
            notification_buffer: self.notification_buffer,
        }
    }
}
