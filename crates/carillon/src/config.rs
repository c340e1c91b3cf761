//! Player configuration
//!
//! [`PlayerConfig`] is the flattened view of `carillonconf::CarillonConfig`
//! the player actually runs with.

use std::path::PathBuf;
use std::time::Duration;

use carillonconf::CarillonConfig;

use crate::midi_file::LoadMode;
use crate::pipeline::PipelineSettings;
use crate::soundbank::{SoundBankLocator, DEFAULT_SOUND_BANK};

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub sample_rate: u32,
    pub block_frames: usize,
    pub ring_frames: usize,
    pub max_polyphony: usize,
    pub poll_interval: Duration,
    pub load_mode: LoadMode,
    pub soundbank_name: String,
    pub soundbank_dirs: Vec<PathBuf>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self::from(&CarillonConfig::default())
    }
}

impl From<&CarillonConfig> for PlayerConfig {
    fn from(config: &CarillonConfig) -> Self {
        let load_mode = config.transport.load_mode.parse().unwrap_or_else(|e| {
            tracing::warn!("{}; using channels_to_tracks", e);
            LoadMode::default()
        });

        Self {
            sample_rate: config.audio.sample_rate,
            block_frames: config.audio.block_frames.max(1),
            ring_frames: config.audio.ring_frames.max(config.audio.block_frames),
            max_polyphony: config.audio.max_polyphony,
            poll_interval: Duration::from_millis(config.transport.poll_interval_ms.max(1)),
            load_mode,
            soundbank_name: if config.soundbank.name.is_empty() {
                DEFAULT_SOUND_BANK.to_string()
            } else {
                config.soundbank.name.clone()
            },
            soundbank_dirs: config.soundbank.dirs.clone(),
        }
    }
}

impl PlayerConfig {
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            sample_rate: self.sample_rate,
            block_frames: self.block_frames,
            ring_frames: self.ring_frames,
        }
    }

    /// Locator for the configured sound bank
    pub fn locator(&self) -> SoundBankLocator {
        let mut locator =
            SoundBankLocator::new(self.soundbank_name.clone(), self.soundbank_dirs.clone());
        locator.max_polyphony = self.max_polyphony;
        locator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_config_defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.block_frames, 512);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.load_mode, LoadMode::ChannelsToTracks);
        assert_eq!(config.soundbank_name, "sounds.sf2");
    }

    #[test]
    fn test_from_carillon_config() {
        let mut source = CarillonConfig::default();
        source.audio.sample_rate = 48000;
        source.audio.block_frames = 256;
        source.transport.poll_interval_ms = 0;
        source.transport.load_mode = "preserve_tracks".to_string();
        source.soundbank.name = "gm.sf2".to_string();
        source.soundbank.dirs = vec![PathBuf::from("/opt/sf2")];

        let config = PlayerConfig::from(&source);
        assert_eq!(config.pipeline_settings().sample_rate, 48000);
        assert_eq!(config.pipeline_settings().block_frames, 256);
        assert_eq!(config.poll_interval, Duration::from_millis(1));
        assert_eq!(config.load_mode, LoadMode::PreserveTracks);

        let locator = config.locator();
        assert_eq!(locator.name, "gm.sf2");
        assert_eq!(locator.dirs, vec![PathBuf::from("/opt/sf2")]);
    }

    #[test]
    fn test_bad_load_mode_falls_back() {
        let mut source = CarillonConfig::default();
        source.transport.load_mode = "sideways".to_string();
        assert_eq!(PlayerConfig::from(&source).load_mode, LoadMode::ChannelsToTracks);
    }
}
