//! Daemon configuration (serde + TOML, substituting the original
//! INI-like format: only the schema is in scope, not a particular
//! parser; see DESIGN.md for the reasoning).

use std::path::{Path, PathBuf};

use serde::Deserialize;

fn default_port() -> u16 {
    6667
}

fn default_true() -> bool {
    true
}

fn default_command_prefix() -> String {
    "!".to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    pub id: String,
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    #[serde(default = "default_true")]
    pub tls_verify: bool,
    #[serde(default = "default_true")]
    pub ipv4: bool,
    #[serde(default = "default_true")]
    pub ipv6: bool,
    #[serde(default = "default_true")]
    pub auto_rejoin: bool,
    #[serde(default)]
    pub join_invite: bool,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    pub nickname: String,
    #[serde(default = "default_nick_as_username")]
    pub username: String,
    #[serde(default = "default_nick_as_realname")]
    pub realname: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    #[serde(default)]
    pub ctcp_version: Option<String>,
    #[serde(default)]
    pub autojoin: Vec<AutoJoinConfig>,
}

fn default_nick_as_username() -> String {
    "frippy".to_string()
}

fn default_nick_as_realname() -> String {
    "frippy".to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct AutoJoinConfig {
    pub channel: String,
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum ControlBindConfig {
    Unix { path: PathBuf },
    Tcp { host: String, port: u16 },
}

#[derive(Clone, Debug, Deserialize)]
pub struct PluginConfig {
    pub id: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub options: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub templates: std::collections::HashMap<String, String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,
    #[serde(default)]
    pub syslog: bool,
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/frippy")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            directory: default_log_dir(),
            syslog: false,
            level: default_log_level(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub control: Option<ControlBindConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
    #[serde(default)]
    pub hooks_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }
}
