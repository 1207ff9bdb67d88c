use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::Path};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub collection: CollectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: Option<u64>,
    pub clean_session: Option<bool>,
    #[serde(default = "default_qos")]
    pub qos: u8,
    /// Topic carrying the full units document of one building.
    /// `{building_id}` is replaced per subscription.
    #[serde(default = "default_topic_template")]
    pub topic_template: String,
}

fn default_qos() -> u8 {
    1
}

fn default_topic_template() -> String {
    "buildings/{building_id}/units".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory the filesystem blob store is rooted at
    #[serde(default = "default_storage_root")]
    pub root: String,
}

fn default_storage_root() -> String {
    "./data".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub buildings: Vec<String>,
    #[serde(default = "default_hourly_interval_secs")]
    pub hourly_interval_secs: u64,
    /// Daily rollup interval for development; unset means UTC midnight.
    #[serde(default)]
    pub daily_interval_secs: Option<u64>,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

/// Longest hourly trigger period; each hour must see at least one trigger.
pub const MAX_HOURLY_INTERVAL_SECS: u64 = 3600;
/// Longest daily trigger period.
pub const MAX_DAILY_INTERVAL_SECS: u64 = 86_400;
pub const MIN_RETENTION_HOURS: u64 = 2;
pub const MAX_RETENTION_HOURS: u64 = 24 * 366;

fn default_hourly_interval_secs() -> u64 {
    3600
}

fn default_retention_hours() -> u64 {
    48
}

/// When the daily rollup fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DailySchedule {
    /// Next UTC midnight, then every 24 hours
    #[default]
    Midnight,
    Every(Duration),
}

impl CollectionConfig {
    pub fn hourly_interval(&self) -> Duration {
        Duration::from_secs(self.hourly_interval_secs)
    }

    pub fn daily_schedule(&self) -> DailySchedule {
        match self.daily_interval_secs {
            Some(secs) => DailySchedule::Every(Duration::from_secs(secs)),
            None => DailySchedule::Midnight,
        }
    }

    /// Retention horizon, clamped to [`MAX_RETENTION_HOURS`].
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours.min(MAX_RETENTION_HOURS) as i64)
    }
}

impl Config {
    /// Load YAML from disk, substitute $(VAR)/${VAR} with env vars, then parse.
    /// Afterwards `MQTT_HOST` and `STORAGE_ROOT` override the file values when set.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let expanded = expand_env_placeholders(&raw)?;
        let mut cfg: Self = serde_yaml::from_str(&expanded)?;

        if let Ok(host) = std::env::var("MQTT_HOST") {
            cfg.mqtt.host = host;
        }
        if let Ok(root) = std::env::var("STORAGE_ROOT") {
            cfg.storage.root = root;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.collection.buildings.is_empty() {
            return Err(AppError::Config(
                "config must include at least one building".to_string(),
            ));
        }
        if self.collection.buildings.iter().any(|b| b.trim().is_empty()) {
            return Err(AppError::Config("building ids cannot be empty".to_string()));
        }
        let c = &self.collection;
        if c.hourly_interval_secs == 0 || c.hourly_interval_secs > MAX_HOURLY_INTERVAL_SECS {
            return Err(AppError::Config(format!(
                "collection.hourly_interval_secs must be within 1..={MAX_HOURLY_INTERVAL_SECS}"
            )));
        }
        if let Some(secs) = c.daily_interval_secs {
            if secs == 0 || secs > MAX_DAILY_INTERVAL_SECS {
                return Err(AppError::Config(format!(
                    "collection.daily_interval_secs must be within 1..={MAX_DAILY_INTERVAL_SECS}"
                )));
            }
        }
        if !(MIN_RETENTION_HOURS..=MAX_RETENTION_HOURS).contains(&c.retention_hours) {
            return Err(AppError::Config(format!(
                "collection.retention_hours must be within {MIN_RETENTION_HOURS}..={MAX_RETENTION_HOURS}"
            )));
        }
        // a closed day may wait a full daily interval for its flush
        if let Some(secs) = c.daily_interval_secs {
            if c.retention_hours * 3600 <= secs {
                return Err(AppError::Config(
                    "collection.retention_hours must exceed the daily rollup interval".to_string(),
                ));
            }
        }
        if !self.mqtt.topic_template.contains("{building_id}") {
            return Err(AppError::Config(
                "mqtt.topic_template must contain {building_id}".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand $(VAR) and ${VAR} placeholders using environment variables.
/// "$$" becomes a literal "$".
fn expand_env_placeholders(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut it = input.chars().peekable();

    while let Some(c) = it.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let close = match it.peek().copied() {
            Some('$') => {
                it.next();
                out.push('$');
                continue;
            }
            Some('(') => ')',
            Some('{') => '}',
            _ => {
                out.push('$');
                continue;
            }
        };
        it.next();
        let var = read_until(&mut it, close).ok_or_else(|| {
            AppError::Config(format!("unterminated env placeholder: missing '{close}'"))
        })?;
        let val = std::env::var(&var)
            .map_err(|_| AppError::Config(format!("missing environment variable: {var}")))?;
        out.push_str(&val);
    }

    Ok(out)
}

/// Read characters until we hit `end`, consuming the closing delimiter.
fn read_until<I>(it: &mut std::iter::Peekable<I>, end: char) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let mut buf = String::new();
    for ch in it.by_ref() {
        if ch == end {
            return Some(buf);
        }
        buf.push(ch);
    }
    None
}
