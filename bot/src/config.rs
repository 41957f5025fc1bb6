use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

pub const DEFAULT_MESSAGE: &str =
    "Outfit Wars on Saturday 27th, 19:30 UTC/20:30 CET (See Discord #announcements)";

/// Top-level bot configuration, loaded from ts3bot.toml.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Text sent to every matching client.
    pub message: String,
    pub ts3: Ts3Section,
    pub notifier: NotifierSection,
    pub timing: TimingSection,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            message: DEFAULT_MESSAGE.into(),
            ts3: Ts3Section::default(),
            notifier: NotifierSection::default(),
            timing: TimingSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Ts3Section {
    pub host: String,
    /// ServerQuery raw port.
    pub port: u16,
    pub username: String,
    pub password: String,
    pub virtual_server_id: u32,
    pub response_timeout_secs: u64,
}

impl Default for Ts3Section {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 10011,
            username: "serveradmin".into(),
            password: String::new(),
            virtual_server_id: 1,
            response_timeout_secs: 10,
        }
    }
}

impl Ts3Section {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

/// How candidate clients are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// React to client-join notifications.
    Events,
    /// Re-list every connected client on an interval.
    Polling,
}

/// What to do when no server group carries the target label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingGroupPolicy {
    Fail,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    Poke,
    PrivateMessage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifierSection {
    /// Exact, case-sensitive server group name.
    pub target_group: String,
    pub mode: DiscoveryMode,
    pub missing_target_group: MissingGroupPolicy,
    pub delivery: Delivery,
    /// Display names that are never notified.
    pub blacklist: Vec<String>,
    pub cache_dir: PathBuf,
    pub cache_file: String,
}

impl Default for NotifierSection {
    fn default() -> Self {
        Self {
            target_group: "FRMD".into(),
            mode: DiscoveryMode::Events,
            missing_target_group: MissingGroupPolicy::Fail,
            delivery: Delivery::Poke,
            blacklist: vec!["Vanguard Radio".into()],
            cache_dir: PathBuf::from("/srv/ts3"),
            cache_file: "pokedCache".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub keep_alive_secs: u64,
    pub event_tick_ms: u64,
    pub poll_interval_secs: u64,
    pub detail_delay_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            keep_alive_secs: 30,
            event_tick_ms: 1000,
            poll_interval_secs: 5,
            detail_delay_ms: 1000,
        }
    }
}

impl TimingSection {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn event_tick(&self) -> Duration {
        Duration::from_millis(self.event_tick_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn detail_delay(&self) -> Duration {
        Duration::from_millis(self.detail_delay_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("no notification message configured")]
    EmptyMessage,
    #[error("no target group label configured")]
    EmptyTargetGroup,
}

impl BotConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            info!("No config file found at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply `TS3_*` overrides. A variable that is set, even to an empty
    /// string, wins over the file value.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TS3_HOST") {
            self.ts3.host = v;
        }
        if let Some(v) = lookup("TS3_USER") {
            self.ts3.username = v;
        }
        if let Some(v) = lookup("TS3_PASS") {
            self.ts3.password = v;
        }
        if let Some(v) = lookup("TS3_MESSAGE") {
            self.message = v;
        }
    }

    /// Reject configurations the bot must not start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.message.is_empty() {
            return Err(ConfigError::EmptyMessage);
        }
        if self.notifier.target_group.is_empty() {
            return Err(ConfigError::EmptyTargetGroup);
        }
        Ok(())
    }
}
