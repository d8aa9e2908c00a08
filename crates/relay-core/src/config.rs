//! Runtime configuration for the relay.
//!
//! Two layers:
//! - [`RelayConfig`] is the hot-reloadable posting configuration (source
//!   channel, destinations, template/pacing). It is a plain serde snapshot so
//!   an external store/load collaborator can persist it; the engine itself
//!   never touches the filesystem.
//! - [`AppEnv`] is the process-level environment (bot token, snapshot path),
//!   loaded once at startup by the binary.

use std::{env, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

/// A configured channel: free-form identifier plus a display name.
///
/// The identifier is kept exactly as entered (`@username`, `-100…` id, bare
/// numeric id); normalization happens in [`crate::resolver`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub channel_id: String,
    pub name: String,
}

/// Template, button and pacing configuration for outbound posts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostConfig {
    #[serde(default)]
    pub template_text: String,
    #[serde(default)]
    pub button_label: Option<String>,
    #[serde(default)]
    pub button_url: Option<String>,
    /// Inclusive lower bound of the inter-message delay window, in seconds.
    #[serde(default = "default_delay")]
    pub delay_min: u64,
    /// Inclusive upper bound of the inter-message delay window, in seconds.
    #[serde(default = "default_delay")]
    pub delay_max: u64,
}

fn default_delay() -> u64 {
    3600
}

impl Default for PostConfig {
    fn default() -> Self {
        Self {
            template_text: String::new(),
            button_label: None,
            button_url: None,
            delay_min: default_delay(),
            delay_max: default_delay(),
        }
    }
}

impl PostConfig {
    /// Midpoint of the delay window, used for remaining-time estimates while
    /// fanning out a message (the real delay is drawn only after the last
    /// destination).
    pub fn average_delay(&self) -> u64 {
        (self.delay_min + self.delay_max) / 2
    }
}

/// The full posting configuration consumed by the engine.
///
/// Serializable for the persistence collaborator; transient engine status is
/// deliberately not part of this snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub source_channel: Option<ChannelRef>,
    #[serde(default)]
    pub destination_channels: Vec<ChannelRef>,
    #[serde(default)]
    pub post_config: PostConfig,
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.post_config.delay_min < 1 {
            return Err(Error::Config(format!(
                "delay_min must be >= 1 second, got {}",
                self.post_config.delay_min
            )));
        }
        if self.post_config.delay_max < self.post_config.delay_min {
            return Err(Error::Config(format!(
                "delay_max ({}) must be >= delay_min ({})",
                self.post_config.delay_max, self.post_config.delay_min
            )));
        }
        Ok(())
    }
}

/// Process environment, loaded once by the binary.
#[derive(Clone, Debug)]
pub struct AppEnv {
    pub telegram_bot_token: String,
    /// Optional path to a persisted `RelayConfig` JSON snapshot.
    pub config_file: Option<PathBuf>,
}

impl AppEnv {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let config_file = env_str("RELAY_CONFIG_FILE").map(PathBuf::from);

        Ok(Self {
            telegram_bot_token,
            config_file,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Minimal `.env` loader: `KEY=VALUE` lines, `#` comments, no interpolation.
/// Real environment variables take precedence.
fn load_dotenv_if_present(path: &Path) {
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().trim_matches('"').trim_matches('\'');
        if env::var_os(key).is_none() {
            env::set_var(key, value);
        }
    }
}
