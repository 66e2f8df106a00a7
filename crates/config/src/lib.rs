use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "huddle.toml",
    "config/huddle.toml",
    "crates/config/huddle.toml",
    "../huddle.toml",
    "../config/huddle.toml",
    "../crates/config/huddle.toml",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub chat_api: ChatApiConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Where chat sessions are created and looked up.
///
/// ```
/// use huddle_config::ChatApiConfig;
///
/// let chat_api = ChatApiConfig::default();
/// assert_eq!(chat_api.base_url, "http://127.0.0.1:7070");
/// assert_eq!(chat_api.request_timeout_seconds, 10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatApiConfig {
    #[serde(default = "ChatApiConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "ChatApiConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl ChatApiConfig {
    fn default_base_url() -> String {
        "http://127.0.0.1:7070".to_string()
    }

    const fn default_request_timeout() -> u64 {
        10
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for ChatApiConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Buffered events per subscriber before slow subscribers start lagging.
    #[serde(default = "DispatcherConfig::default_channel_capacity")]
    pub channel_capacity: usize,
    /// Upper bound on waiting for an availability or remote-user reply.
    #[serde(default = "DispatcherConfig::default_reply_timeout")]
    pub reply_timeout_ms: u64,
}

impl DispatcherConfig {
    const fn default_channel_capacity() -> usize {
        64
    }

    const fn default_reply_timeout() -> u64 {
        5_000
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            channel_capacity: Self::default_channel_capacity(),
            reply_timeout_ms: Self::default_reply_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "TelemetryConfig::default_filter")]
    pub filter: String,
}

impl TelemetryConfig {
    fn default_filter() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: Self::default_filter(),
        }
    }
}

/// Load the application configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use huddle_config::load;
///
/// std::env::remove_var("HUDDLE_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.chat_api.base_url.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let channel_capacity = i64::try_from(defaults.dispatcher.channel_capacity).unwrap_or(i64::MAX);
    let reply_timeout = i64::try_from(defaults.dispatcher.reply_timeout_ms).unwrap_or(i64::MAX);
    let request_timeout =
        i64::try_from(defaults.chat_api.request_timeout_seconds).unwrap_or(i64::MAX);

    let mut builder = config::Config::builder()
        .set_default("chat_api.base_url", defaults.chat_api.base_url.clone())?
        .set_default("chat_api.request_timeout_seconds", request_timeout)?
        .set_default("dispatcher.channel_capacity", channel_capacity)?
        .set_default("dispatcher.reply_timeout_ms", reply_timeout)?
        .set_default("telemetry.filter", defaults.telemetry.filter.clone())?;

    let environment_overrides = config::Environment::with_prefix("HUDDLE").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("HUDDLE_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via HUDDLE_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    // tokio's broadcast channel rejects a zero capacity
    if config.dispatcher.channel_capacity == 0 {
        bail!("invalid configuration: dispatcher.channel_capacity must be at least 1");
    }

    debug!(?config, "loaded huddle configuration");
    Ok(config)
}
