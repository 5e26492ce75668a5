use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::clock::CalendarZone;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Sweep once immediately at startup instead of waiting a full interval.
    #[serde(default = "default_true")]
    pub run_on_start: bool,
    /// Zone that defines calendar days: "local", "UTC" or an offset like "+02:00".
    #[serde(default)]
    pub timezone: CalendarZone,
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            run_on_start: true,
            timezone: CalendarZone::default(),
        }
    }
}

fn default_interval_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

pub fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".choreloop")
}

#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_bind")]
    pub bind: String,
    /// Bearer token required by the HTTP API. Mandatory off localhost.
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_api_bind(),
            api_key: None,
        }
    }
}

fn default_api_bind() -> String {
    "127.0.0.1:3000".to_string()
}

pub fn load(path: &str) -> Result<Config> {
    let path = expand_tilde(path);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn parse(content: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(content)?;
    if config.scheduler.interval_secs == 0 {
        anyhow::bail!("scheduler.interval_secs must be greater than zero");
    }
    config.store.base_dir = expand_tilde(&config.store.base_dir.to_string_lossy());
    Ok(config)
}

pub async fn init_config_dir(config_path: &str) -> Result<PathBuf> {
    let base = default_base_dir();
    tokio::fs::create_dir_all(&base).await?;

    let config_path = expand_tilde(config_path);
    if let Some(parent) = config_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if !config_path.exists() {
        tokio::fs::write(
            &config_path,
            r#"[scheduler]
interval_secs = 600
run_on_start = true
# "local", "UTC" or a fixed offset such as "+02:00"
timezone = "local"

[store]
base_dir = "~/.choreloop"

[api]
enabled = true
bind = "127.0.0.1:3000"
# api_key = "CHANGE_ME"  # required when binding beyond localhost
"#,
        )
        .await?;
    }

    Ok(config_path)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
