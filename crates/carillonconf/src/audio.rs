//! Audio engine, transport and telemetry settings.

use serde::{Deserialize, Serialize};

/// Render engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Output sample rate in Hz.
    /// Default: 44100
    #[serde(default = "AudioConfig::default_sample_rate")]
    pub sample_rate: u32,

    /// Frames rendered per block.
    /// Default: 512
    #[serde(default = "AudioConfig::default_block_frames")]
    pub block_frames: usize,

    /// Stereo frames buffered between the output unit and its reader.
    /// Default: 16384
    #[serde(default = "AudioConfig::default_ring_frames")]
    pub ring_frames: usize,

    /// Simultaneous notes per voice.
    /// Default: 64
    #[serde(default = "AudioConfig::default_max_polyphony")]
    pub max_polyphony: usize,
}

impl AudioConfig {
    fn default_sample_rate() -> u32 {
        44100
    }

    fn default_block_frames() -> usize {
        512
    }

    fn default_ring_frames() -> usize {
        16384
    }

    fn default_max_polyphony() -> usize {
        64
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: Self::default_sample_rate(),
            block_frames: Self::default_block_frames(),
            ring_frames: Self::default_ring_frames(),
            max_polyphony: Self::default_max_polyphony(),
        }
    }
}

/// Transport and loading behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Monitor poll interval in milliseconds.
    /// Default: 10
    #[serde(default = "TransportConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How MIDI files become tracks: "channels_to_tracks" or "preserve_tracks".
    #[serde(default = "TransportConfig::default_load_mode")]
    pub load_mode: String,
}

impl TransportConfig {
    fn default_poll_interval_ms() -> u64 {
        10
    }

    fn default_load_mode() -> String {
        "channels_to_tracks".to_string()
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: Self::default_poll_interval_ms(),
            load_mode: Self::default_load_mode(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// An `EnvFilter` directive, e.g. "info" or "carillon=debug".
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
