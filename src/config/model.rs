//! Configuration data model.
//!
//! All structs derive `Serialize`/`Deserialize` for TOML persistence.
//! Every field has a default, so an empty file is a valid configuration.

use crate::irc::queue::Pacing;
use crate::irc::session::SessionConfig;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root bot configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Sent as `PASS` before identifying. Omitted when unset.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_nickname")]
    pub nickname: String,
    #[serde(default = "default_ident")]
    pub ident: String,
    #[serde(default = "default_realname")]
    pub realname: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Connect and handshake timeout, also applied to every write.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub quit_message: Option<String>,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: None,
            nickname: default_nickname(),
            ident: default_ident(),
            realname: default_realname(),
            channel: default_channel(),
            timeout_secs: default_timeout_secs(),
            quit_message: None,
            pacing: PacingConfig::default(),
            commands: CommandsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("host must not be empty");
        }
        if self.nickname.trim().is_empty() || self.nickname.contains(char::is_whitespace) {
            bail!("nickname must be a single non-empty word");
        }
        if !self.channel.starts_with(['#', '&']) || self.channel.len() < 2 {
            bail!("channel must start with '#' or '&' (got {:?})", self.channel);
        }
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be positive");
        }
        if self.pacing.burst_size == 0 {
            bail!("pacing.burst_size must be at least 1");
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            host: self.host.clone(),
            port: self.port,
            password: self.password.clone(),
            nickname: self.nickname.clone(),
            ident: self.ident.clone(),
            realname: self.realname.clone(),
            channel: self.channel.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            quit_message: self.quit_message.clone(),
            pacing: self.pacing.to_pacing(),
        }
    }
}

/// Outbound flood control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Messages sent back to back after the queue has been idle.
    #[serde(default = "default_burst_size")]
    pub burst_size: usize,
    /// Idle time after which a new burst is allowed.
    #[serde(default = "default_burst_timeout_ms")]
    pub burst_timeout_ms: u64,
    /// Delay between sends while the queue is busy.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            burst_size: default_burst_size(),
            burst_timeout_ms: default_burst_timeout_ms(),
            interval_ms: default_interval_ms(),
        }
    }
}

impl PacingConfig {
    pub fn to_pacing(&self) -> Pacing {
        Pacing {
            burst_size: self.burst_size,
            burst_timeout: Duration::from_millis(self.burst_timeout_ms),
            interval: Duration::from_millis(self.interval_ms),
        }
    }
}

/// Settings for the bundled chat commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Maximum items per shared list; 0 means unlimited.
    #[serde(default = "default_list_size_limit")]
    pub list_size_limit: usize,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            list_size_limit: default_list_size_limit(),
        }
    }
}

/// Diagnostic logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of `error`, `warn`, `info`, `debug`, `trace`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// When set, logs go to a daily file in this directory instead of stderr.
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
        }
    }
}

fn default_host() -> String {
    "chat.freenode.net".to_string()
}
fn default_port() -> u16 {
    6667
}
fn default_nickname() -> String {
    "teamer".to_string()
}
fn default_ident() -> String {
    "bbconf-teamer".to_string()
}
fn default_realname() -> String {
    "BBConf Teamer Bot".to_string()
}
fn default_channel() -> String {
    "#bbconf".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_burst_size() -> usize {
    5
}
fn default_burst_timeout_ms() -> u64 {
    10_000
}
fn default_interval_ms() -> u64 {
    800
}
fn default_list_size_limit() -> usize {
    15
}
fn default_log_level() -> String {
    "debug".to_string()
}
