//! Config file discovery, loading, and environment variable overlay.

use crate::{CarillonConfig, ConfigError};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/carillon/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("carillon/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("carillon.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load a config file on top of compiled defaults.
pub fn load_from_file(path: &Path) -> Result<CarillonConfig, ConfigError> {
    let mut config = CarillonConfig::default();
    apply_file(&mut config, path)?;
    Ok(config)
}

/// Overlay the keys present in a TOML file onto `config`.
pub fn apply_file(config: &mut CarillonConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    apply_toml(config, &contents, path)
}

/// Only keys present in `contents` change; everything else keeps its
/// current value, so layers stack.
fn apply_toml(config: &mut CarillonConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let table: toml::Table = contents
        .parse()
        .map_err(|e: toml::de::Error| parse_error(e.to_string()))?;

    if let Some(soundbank) = table.get("soundbank").and_then(|v| v.as_table()) {
        if let Some(v) = soundbank.get("name").and_then(|v| v.as_str()) {
            config.soundbank.name = v.to_string();
        }
        if let Some(dirs) = soundbank.get("dirs").and_then(|v| v.as_array()) {
            config.soundbank.dirs = dirs
                .iter()
                .filter_map(|v| v.as_str())
                .map(expand_path)
                .collect();
        }
    }

    if let Some(audio) = table.get("audio").and_then(|v| v.as_table()) {
        if let Some(v) = audio.get("sample_rate").and_then(|v| v.as_integer()) {
            config.audio.sample_rate = positive(v, "audio.sample_rate").map_err(parse_error)?;
        }
        if let Some(v) = audio.get("block_frames").and_then(|v| v.as_integer()) {
            config.audio.block_frames = positive(v, "audio.block_frames").map_err(parse_error)?;
        }
        if let Some(v) = audio.get("ring_frames").and_then(|v| v.as_integer()) {
            config.audio.ring_frames = positive(v, "audio.ring_frames").map_err(parse_error)?;
        }
        if let Some(v) = audio.get("max_polyphony").and_then(|v| v.as_integer()) {
            config.audio.max_polyphony = positive(v, "audio.max_polyphony").map_err(parse_error)?;
        }
    }

    if let Some(transport) = table.get("transport").and_then(|v| v.as_table()) {
        if let Some(v) = transport.get("poll_interval_ms").and_then(|v| v.as_integer()) {
            config.transport.poll_interval_ms =
                positive(v, "transport.poll_interval_ms").map_err(parse_error)?;
        }
        if let Some(v) = transport.get("load_mode").and_then(|v| v.as_str()) {
            config.transport.load_mode = v.to_string();
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.telemetry.log_level = v.to_string();
        }
    }

    Ok(())
}

fn positive<T: TryFrom<i64>>(value: i64, key: &str) -> Result<T, String> {
    if value <= 0 {
        return Err(format!("{} must be positive, got {}", key, value));
    }
    T::try_from(value).map_err(|_| format!("{} is out of range: {}", key, value))
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut CarillonConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("CARILLON_SOUNDBANK") {
        config.soundbank.name = v;
        sources.env_overrides.push("CARILLON_SOUNDBANK".to_string());
    }
    if let Ok(v) = env::var("CARILLON_SOUNDBANK_DIRS") {
        config.soundbank.dirs = v
            .split(':')
            .filter(|s| !s.is_empty())
            .map(expand_path)
            .collect();
        sources.env_overrides.push("CARILLON_SOUNDBANK_DIRS".to_string());
    }

    if let Ok(v) = env::var("CARILLON_SAMPLE_RATE") {
        if let Ok(rate) = v.parse() {
            config.audio.sample_rate = rate;
            sources.env_overrides.push("CARILLON_SAMPLE_RATE".to_string());
        }
    }
    if let Ok(v) = env::var("CARILLON_BLOCK_FRAMES") {
        if let Ok(frames) = v.parse() {
            config.audio.block_frames = frames;
            sources.env_overrides.push("CARILLON_BLOCK_FRAMES".to_string());
        }
    }
    if let Ok(v) = env::var("CARILLON_POLL_INTERVAL_MS") {
        if let Ok(ms) = v.parse() {
            config.transport.poll_interval_ms = ms;
            sources.env_overrides.push("CARILLON_POLL_INTERVAL_MS".to_string());
        }
    }

    if let Ok(v) = env::var("CARILLON_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("CARILLON_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}
