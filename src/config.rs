//! Configuration for the outreach runtime.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (OUTREACH_ENV, OUTREACH_SERVICE_NAME,
//!    OUTREACH_UNSUBSCRIBE_URL)
//! 2. Config file: OUTREACH_CONFIG, else the first .outreach/config.yaml found
//!    in the current directory or its parents, else ~/.outreach/config.yaml
//! 3. Defaults
//!
//! There is no process-wide cached config: callers load a [`Config`] and pass
//! it to [`crate::runtime::Runtime::build`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::WebhookConfig;
use crate::core::{
    AlwaysMet, BreakerConfig, BusConfig, FrequencyPolicy, RateLimitConfig, RetryPolicy,
    RollingWindowFrequency,
};

const CONFIG_DIR: &str = ".outreach";
const CONFIG_FILE: &str = "config.yaml";

/// Full configuration (matches the YAML structure)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Stamped into event metadata
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Stamped into event metadata
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub bus: BusSettings,

    #[serde(default)]
    pub dispatch: DispatchSettings,

    #[serde(default)]
    pub breaker: BreakerSettings,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub compliance: ComplianceSettings,

    #[serde(default)]
    pub transport: TransportConfig,

    /// Where this config was loaded from
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
}

fn default_service_name() -> String {
    "outreach".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusSettings {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Deadline per handler invocation
    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,
}

fn default_history_capacity() -> usize {
    crate::core::event_bus::DEFAULT_HISTORY_CAPACITY
}

fn default_handler_timeout_ms() -> u64 {
    5000
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            handler_timeout_ms: default_handler_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSettings {
    #[serde(default = "default_max_per_window")]
    pub max_per_window: u32,

    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

fn default_max_per_window() -> u32 {
    50
}

fn default_window_seconds() -> u64 {
    3600
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_per_window: default_max_per_window(),
            window_seconds: default_window_seconds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_recovery_seconds")]
    pub recovery_seconds: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_recovery_seconds() -> u64 {
    30
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_seconds: default_recovery_seconds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceSettings {
    /// Unsubscribe link added to every email; without one no contact is compliant
    #[serde(default)]
    pub unsubscribe_url: Option<String>,

    /// Cap on sends per contact within `frequency_window_hours`. Unset means
    /// no frequency limit.
    #[serde(default)]
    pub max_sends_per_contact: Option<usize>,

    #[serde(default = "default_frequency_window_hours")]
    pub frequency_window_hours: u64,
}

fn default_frequency_window_hours() -> u64 {
    24 * 7
}

impl Default for ComplianceSettings {
    fn default() -> Self {
        Self {
            unsubscribe_url: None,
            max_sends_per_contact: None,
            frequency_window_hours: default_frequency_window_hours(),
        }
    }
}

/// Mail transport selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Log mail instead of sending it
    #[default]
    Log,

    /// POST mail to an HTTP API
    Webhook(WebhookConfig),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            bus: BusSettings::default(),
            dispatch: DispatchSettings::default(),
            breaker: BreakerSettings::default(),
            retry: RetryPolicy::default(),
            compliance: ComplianceSettings::default(),
            transport: TransportConfig::default(),
            config_file: None,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like [`Config::load`], but an explicit path takes precedence over
    /// OUTREACH_CONFIG and file discovery
    pub fn load_from(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => match std::env::var("OUTREACH_CONFIG") {
                Ok(path) => Some(PathBuf::from(path)),
                Err(_) => find_config_file().or_else(home_config_file),
            },
        };

        let mut config = match path {
            Some(path) => Self::load_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load and parse a config file
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.config_file = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // an empty file means all defaults
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).context("Invalid config YAML")
    }

    /// Apply environment overrides, reading variables through `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(environment) = lookup("OUTREACH_ENV") {
            self.environment = environment;
        }
        if let Some(service_name) = lookup("OUTREACH_SERVICE_NAME") {
            self.service_name = service_name;
        }
        if let Some(url) = lookup("OUTREACH_UNSUBSCRIBE_URL") {
            self.compliance.unsubscribe_url = Some(url);
        }
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            service_name: self.service_name.clone(),
            environment: self.environment.clone(),
            history_capacity: self.bus.history_capacity,
            handler_timeout: Duration::from_millis(self.bus.handler_timeout_ms),
        }
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_per_window: self.dispatch.max_per_window,
            window_duration: Duration::from_secs(self.dispatch.window_seconds),
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker.failure_threshold,
            recovery_time: Duration::from_secs(self.breaker.recovery_seconds),
        }
    }

    pub fn frequency_policy(&self) -> Arc<dyn FrequencyPolicy> {
        match self.compliance.max_sends_per_contact {
            Some(max_sends) => Arc::new(RollingWindowFrequency::new(
                max_sends,
                Duration::from_secs(self.compliance.frequency_window_hours * 3600),
            )),
            None => Arc::new(AlwaysMet),
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

fn home_config_file() -> Option<PathBuf> {
    let path = dirs::home_dir()?.join(CONFIG_DIR).join(CONFIG_FILE);
    path.exists().then_some(path)
}
