//! Warden Configuration
//!
//! TOML configuration loading with defaulted sections

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    pub bot: BotConfig,
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    pub data_dir: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BotConfig {
    /// Account phone number, digits only (no leading `+`).
    pub phone_number: String,
    /// Privileged identity. Defaults to the account's own direct-chat jid.
    pub owner_jid: Option<String>,
    pub bot_name: Option<String>,
    #[serde(default = "default_prefix")]
    pub command_prefix: char,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Base URL of the local messaging bridge, e.g. `http://127.0.0.1:3001`.
    pub base_url: String,
    pub poll_timeout_secs: Option<u64>,
    pub client_recreate_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MediaConfig {
    pub cloudinary: Option<CloudinaryConfig>,
    pub bucket: Option<BucketConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub upload_preset: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    pub base_url: String,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "default_mention_batch_size")]
    pub mention_batch_size: usize,
    #[serde(default = "default_mention_pause_ms")]
    pub mention_pause_ms: u64,
    #[serde(default = "default_kick_pause_ms")]
    pub kick_pause_ms: u64,
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            mention_batch_size: default_mention_batch_size(),
            mention_pause_ms: default_mention_pause_ms(),
            kick_pause_ms: default_kick_pause_ms(),
            restart_delay_ms: default_restart_delay_ms(),
        }
    }
}

fn default_prefix() -> char {
    '.'
}

fn default_mention_batch_size() -> usize {
    20
}

fn default_mention_pause_ms() -> u64 {
    1200
}

fn default_kick_pause_ms() -> u64 {
    800
}

fn default_restart_delay_ms() -> u64 {
    1500
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.bot.phone_number.trim().is_empty() {
            return Err(anyhow!("bot.phone_number must be set"));
        }
        if self.bridge.base_url.trim().is_empty() {
            return Err(anyhow!("bridge.base_url must be set"));
        }
        Ok(())
    }

    fn default_config_path() -> Result<PathBuf> {
        let base = dirs::config_dir().ok_or_else(|| anyhow!("no config directory available"))?;
        Ok(base.join("warden").join("config.toml"))
    }

    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.core.data_dir {
            return PathBuf::from(dir);
        }
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("warden")
    }

    /// The owner's direct-chat jid; falls back to the account itself.
    pub fn owner_jid(&self) -> String {
        match &self.bot.owner_jid {
            Some(jid) if !jid.trim().is_empty() => jid.clone(),
            _ => format!("{}@s.whatsapp.net", self.bot.phone_number),
        }
    }

    pub fn bot_name(&self) -> &str {
        self.bot.bot_name.as_deref().unwrap_or("Warden")
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    const MINIMAL: &str = r#"
        [bot]
        phone_number = "2349050000000"

        [bridge]
        base_url = "http://127.0.0.1:3001"
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::from_toml(MINIMAL).expect("parse");
        assert_eq!(config.bot.command_prefix, '.');
        assert_eq!(config.pacing.mention_batch_size, 20);
        assert_eq!(config.pacing.mention_pause_ms, 1200);
        assert_eq!(config.pacing.kick_pause_ms, 800);
        assert!(config.media.cloudinary.is_none());
    }

    #[test]
    fn owner_jid_falls_back_to_own_number() {
        let config = Config::from_toml(MINIMAL).expect("parse");
        assert_eq!(config.owner_jid(), "2349050000000@s.whatsapp.net");
    }

    #[test]
    fn explicit_owner_jid_wins() {
        let raw = r#"
            [bot]
            phone_number = "2349050000000"
            owner_jid = "2348000000000@s.whatsapp.net"

            [bridge]
            base_url = "http://127.0.0.1:3001"
        "#;
        let config = Config::from_toml(raw).expect("parse");
        assert_eq!(config.owner_jid(), "2348000000000@s.whatsapp.net");
    }

    #[test]
    fn empty_phone_number_is_rejected() {
        let raw = r#"
            [bot]
            phone_number = ""

            [bridge]
            base_url = "http://127.0.0.1:3001"
        "#;
        assert!(Config::from_toml(raw).is_err());
    }
}
