//! Sound bank discovery settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which sound bank to load and where to look for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundBankConfig {
    /// File name searched for in `dirs`, or an absolute path.
    /// Default: sounds.sf2
    #[serde(default = "SoundBankConfig::default_name")]
    pub name: String,

    /// Directories searched in order.
    #[serde(default = "SoundBankConfig::default_dirs")]
    pub dirs: Vec<PathBuf>,
}

impl SoundBankConfig {
    fn default_name() -> String {
        "sounds.sf2".to_string()
    }

    fn default_dirs() -> Vec<PathBuf> {
        let mut dirs = Vec::new();

        if let Some(base) = directories::BaseDirs::new() {
            dirs.push(base.data_dir().join("carillon"));
            dirs.push(base.home_dir().join("midi/SF2"));
        }

        // System SoundFonts
        dirs.push(PathBuf::from("/usr/share/sounds/sf2"));

        dirs
    }
}

impl Default for SoundBankConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            dirs: Self::default_dirs(),
        }
    }
}
