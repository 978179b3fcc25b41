use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

/// Command keyword to the role names allowed to run it. Keywords without an
/// entry are open to everyone.
pub type PermissionPolicy = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// String that prefixes every command the bot listens for.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Discord bot token. `DISCORD_TOKEN` takes precedence when set.
    #[serde(default)]
    pub token: String,
    /// Channel receiving relayed help requests.
    #[serde(rename = "helpChannelID", default)]
    pub help_channel_id: String,
    #[serde(rename = "alertsChannelID", default)]
    pub alerts_channel_id: String,
    /// Address the webhook relay listens on.
    #[serde(rename = "botHostName", default = "default_host_name")]
    pub bot_host_name: String,
    #[serde(rename = "guildID", default)]
    pub guild_id: String,
    /// Mention included in relayed messages so sysadmins get notified.
    #[serde(rename = "sysAdminTag", default)]
    pub sys_admin_tag: String,
    #[serde(default)]
    pub permissions: PermissionPolicy,
    #[serde(rename = "aliasPath", default = "default_alias_path")]
    pub alias_path: String,
    #[serde(rename = "logLevel", default = "default_log_level")]
    pub log_level: String,
}

fn default_prefix() -> String {
    "!".to_string()
}

fn default_host_name() -> String {
    "0.0.0.0:4201".to_string()
}

fn default_alias_path() -> String {
    "aliases.json".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Reads the JSON config at `path` and applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(anyhow!("Configuration file was empty"));
        }

        let mut config: Config = serde_json::from_slice(bytes)
            .map_err(|e| anyhow!("Failed to unmarshal configuration JSON: {}", e))?;
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(token) = env::var("DISCORD_TOKEN") {
            self.token = token;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Configured guild as a numeric id, if one is set.
    pub fn guild_id(&self) -> Option<u64> {
        self.guild_id.parse().ok()
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut redacted = self.clone();
        redacted.token = "no see :(".to_string();
        let json = serde_json::to_string_pretty(&redacted).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Shared, swappable view of the current config. Readers get an `Arc`
/// snapshot and never observe a half-applied reload.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        ConfigHandle {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn current(&self) -> Arc<Config> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, config: Config) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }
}
