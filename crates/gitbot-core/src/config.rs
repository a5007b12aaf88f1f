use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::Deserialize;
use tokio::sync::RwLock;

use crate::{errors::Error, Result};

/// Configuration reloadable at runtime (rehash). Components that must observe
/// reloads hold this handle instead of a plain `Arc<Config>`.
pub type SharedConfig = Arc<RwLock<Config>>;

/// Typed configuration for the bridge, loaded from a TOML file.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub irc: IrcConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub admin: Option<AdminConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IrcConfig {
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_tls")]
    pub tls: bool,
    pub nick: String,
    /// Username part of registration; defaults to the nick.
    #[serde(default)]
    pub ident: String,
    #[serde(default = "default_realname")]
    pub realname: String,
    pub sasl_account: String,
    pub sasl_password: String,
    pub channels: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GithubConfig {
    pub api_token: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_fetch_count")]
    pub fetch_count: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminConfig {
    /// Seed administrator hostmask (`nick!host`), inserted at startup and on
    /// rehash. All later admin changes go through the `!admin` commands.
    pub hostmask: String,
}

fn default_port() -> u16 {
    6697
}

fn default_tls() -> bool {
    true
}

fn default_realname() -> String {
    "GitHub commit bot".to_string()
}

fn default_poll_interval() -> u64 {
    120
}

fn default_fetch_count() -> u32 {
    3
}

fn default_db_path() -> PathBuf {
    PathBuf::from("gitbot.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            poll_interval_secs: default_poll_interval(),
            fetch_count: default_fetch_count(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut cfg: Config =
            toml::from_str(raw).map_err(|e| Error::Config(format!("invalid config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.github.poll_interval_secs.max(1))
    }

    fn validate(&mut self) -> Result<()> {
        let irc = &mut self.irc;
        if irc.server.trim().is_empty() {
            return Err(Error::Config("irc.server is required".to_string()));
        }
        if irc.nick.trim().is_empty() {
            return Err(Error::Config("irc.nick is required".to_string()));
        }
        if irc.sasl_account.trim().is_empty() || irc.sasl_password.trim().is_empty() {
            return Err(Error::Config(
                "irc.sasl_account and irc.sasl_password are required".to_string(),
            ));
        }
        if irc.channels.iter().all(|c| c.trim().is_empty()) {
            return Err(Error::Config(
                "irc.channels must list at least one channel".to_string(),
            ));
        }
        irc.channels.retain(|c| !c.trim().is_empty());
        if irc.ident.trim().is_empty() {
            irc.ident = irc.nick.clone();
        }
        if self.github.fetch_count == 0 {
            self.github.fetch_count = 1;
        }
        Ok(())
    }
}
