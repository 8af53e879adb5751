//! Configuration for the `meshdrop` CLI: driver-level settings (signaling
//! server, default output directory, logging) layered on top of the
//! engine's own [`SessionConfig`] tunables.

use std::fs;
use std::path::{Path, PathBuf};

use meshdrop_session::SessionConfig;
use serde::{Deserialize, Serialize};

fn default_signaling_url() -> String {
    "ws://127.0.0.1:9000/signal".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Top-level CLI configuration, deserializable from TOML. Every field has a
/// default, so an empty document is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Signaling server this driver connects to for `send`/`receive`.
    pub signaling_url: String,
    /// Directory received files are written into when `--output` is omitted.
    pub output_dir: PathBuf,
    /// Log level passed to the tracing subscriber.
    pub log_level: String,
    /// Engine transfer tunables (piece size, congestion window, timeouts).
    pub session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling_url: default_signaling_url(),
            output_dir: default_output_dir(),
            log_level: default_log_level(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Saves configuration to a TOML file, creating parent directories as
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// The default config file path, under the user's config directory.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir().unwrap_or_else(|| PathBuf::from("/tmp")).join("meshdrop/config.toml")
    }

    /// Loads the config at [`Config::default_path`], writing a fresh default
    /// file there if none exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Validates the configuration, returning a descriptive error for the
    /// first problem found.
    ///
    /// # Errors
    ///
    /// Returns an error if any field is out of its valid range.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            anyhow::bail!("signaling_url '{}' must start with ws:// or wss://", self.signaling_url);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.to_lowercase().as_str()) {
            anyhow::bail!("invalid log level: {}. Must be one of: {}", self.log_level, valid_log_levels.join(", "));
        }

        let session = &self.session;
        if session.max_direct_peers == 0 {
            anyhow::bail!("max_direct_peers must be at least 1");
        }
        if session.chunk_size_min == 0 || session.chunk_size_min > session.chunk_size_max {
            anyhow::bail!("chunk_size_min must be nonzero and no greater than chunk_size_max");
        }
        if session.cwnd_min == 0 || session.cwnd_min > session.cwnd_max {
            anyhow::bail!("cwnd_min must be nonzero and no greater than cwnd_max");
        }
        if session.low_water_mark >= session.high_water_mark {
            anyhow::bail!("low_water_mark must be below high_water_mark");
        }
        if session.max_pending_requests == 0 {
            anyhow::bail!("max_pending_requests must be at least 1");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.max_direct_peers, 4);
    }

    #[test]
    fn rejects_non_websocket_signaling_url() {
        let mut config = Config::default();
        config.signaling_url = "http://example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_water_marks() {
        let mut config = Config::default();
        config.session.low_water_mark = config.session.high_water_mark + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.signaling_url = "wss://relay.example/signal".to_string();
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.signaling_url, config.signaling_url);
    }

    #[test]
    fn partial_toml_document_fills_in_defaults() {
        let config: Config = toml::from_str("signaling_url = \"wss://relay.example/signal\"\n").unwrap();
        assert_eq!(config.signaling_url, "wss://relay.example/signal");
        assert_eq!(config.session.max_direct_peers, 4);
    }
}
