//! Layered configuration for the Carillon MIDI player.
//!
//! # Usage
//!
//! ```rust,no_run
//! use carillonconf::CarillonConfig;
//!
//! let config = CarillonConfig::load().expect("Failed to load config");
//! println!("sample rate: {}", config.audio.sample_rate);
//! println!("sound bank: {}", config.soundbank.name);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/carillon/config.toml` (system)
//! 2. `~/.config/carillon/config.toml` (user)
//! 3. `./carillon.toml` (local override), or an explicit path
//! 4. Environment variables (`CARILLON_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [soundbank]
//! name = "sounds.sf2"
//! dirs = ["~/.local/share/carillon", "/usr/share/sounds/sf2"]
//!
//! [audio]
//! sample_rate = 44100
//! block_frames = 512
//!
//! [transport]
//! poll_interval_ms = 10
//! load_mode = "channels_to_tracks"
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod audio;
pub mod loader;
pub mod media;

pub use audio::{AudioConfig, TelemetryConfig, TransportConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use media::SoundBankConfig;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete Carillon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CarillonConfig {
    #[serde(default)]
    pub soundbank: SoundBankConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl CarillonConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load with `config_path` replacing the local `./carillon.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report where values came from.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = CarillonConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::apply_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Built by hand to keep section order and comments stable
        let mut output = String::new();

        output.push_str("# Carillon Configuration\n\n");

        output.push_str("[soundbank]\n");
        output.push_str(&format!("name = {}\n", quoted(&self.soundbank.name)));
        output.push_str("dirs = [\n");
        for dir in &self.soundbank.dirs {
            output.push_str(&format!("    {},\n", quoted(&dir.display().to_string())));
        }
        output.push_str("]\n");

        output.push_str("\n[audio]\n");
        output.push_str(&format!("sample_rate = {}\n", self.audio.sample_rate));
        output.push_str(&format!("block_frames = {}\n", self.audio.block_frames));
        output.push_str(&format!("ring_frames = {}\n", self.audio.ring_frames));
        output.push_str(&format!("max_polyphony = {}\n", self.audio.max_polyphony));

        output.push_str("\n[transport]\n");
        output.push_str(&format!(
            "poll_interval_ms = {}\n",
            self.transport.poll_interval_ms
        ));
        output.push_str(&format!("load_mode = {}\n", quoted(&self.transport.load_mode)));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = {}\n", quoted(&self.telemetry.log_level)));

        output
    }
}

/// A TOML basic string, escaped
fn quoted(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}
