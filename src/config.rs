use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// User-facing, persisted configuration. Mirrors the option set the desktop UI exposes;
/// most fields here are consumed by collaborators outside this crate (TTS, overlay,
/// tooltips) and simply round-trip through us.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EliteMiningConfig {
    pub journal_dir: Option<PathBuf>,
    pub screenshots_folder: Option<PathBuf>,

    pub tts_voice: Option<String>,
    #[serde(default = "default_tts_volume")]
    pub tts_volume: f32,

    pub text_overlay_enabled: bool,
    pub text_overlay_position: Option<(i32, i32)>,

    #[serde(default = "default_true")]
    pub cargo_enabled: bool,
    #[serde(default = "default_cargo_capacity")]
    pub cargo_max_capacity: u32,
    pub cargo_position: Option<(i32, i32)>,

    pub stay_on_top: bool,
    #[serde(default = "default_true")]
    pub tooltips_enabled: bool,

    #[serde(default = "default_true")]
    pub main_announcement_enabled: bool,
    #[serde(default)]
    pub announcements: AnnouncementConfig,

    #[serde(default = "default_true")]
    pub auto_scan_journals: bool,
    #[serde(default = "default_true")]
    pub auto_start_session: bool,
    #[serde(default = "default_true")]
    pub prompt_on_cargo_full: bool,
    #[serde(default)]
    pub ask_import_on_path_change: bool,

    pub edsm_api_key: Option<String>,
}

impl Default for EliteMiningConfig {
    fn default() -> Self {
        Self {
            journal_dir: None,
            screenshots_folder: None,
            tts_voice: None,
            tts_volume: default_tts_volume(),
            text_overlay_enabled: false,
            text_overlay_position: None,
            cargo_enabled: true,
            cargo_max_capacity: default_cargo_capacity(),
            cargo_position: None,
            stay_on_top: false,
            tooltips_enabled: true,
            main_announcement_enabled: true,
            announcements: AnnouncementConfig::default(),
            auto_scan_journals: true,
            auto_start_session: true,
            prompt_on_cargo_full: true,
            ask_import_on_path_change: false,
            edsm_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnnouncementConfig {
    #[serde(default = "default_true")]
    pub new_material: bool,
    #[serde(default = "default_true")]
    pub cargo_full: bool,
    #[serde(default)]
    pub ring_entered: bool,
}

fn default_true() -> bool {
    true
}

fn default_tts_volume() -> f32 {
    1.0
}

fn default_cargo_capacity() -> u32 {
    784
}

impl EliteMiningConfig {
    /// Loads config from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: EliteMiningConfig = toml::from_str(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Serializes and writes the whole config atomically: write to a temp file in the
    /// same directory, then rename over the destination. A reader never observes a
    /// partially-written file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let tmp_path = dir.join(format!(
            ".{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("config")
        ));

        std::fs::write(&tmp_path, contents).map_err(|source| ConfigError::AtomicWrite {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, path).map_err(|source| ConfigError::AtomicWrite {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}

/// Resolves the data root: `ELITEMINING_DATA_DIR` env var, else the directory
/// containing the running executable (install layout), else `./data` (dev layout).
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("ELITEMINING_DATA_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            return dir.to_path_buf();
        }
    }
    PathBuf::from("./data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let cfg = EliteMiningConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: EliteMiningConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.cargo_max_capacity, cfg.cargo_max_capacity);
        assert_eq!(parsed.auto_start_session, cfg.auto_start_session);
    }

    #[test]
    fn missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does_not_exist.toml");
        let cfg = EliteMiningConfig::load(&path).unwrap();
        assert_eq!(cfg.cargo_max_capacity, default_cargo_capacity());
    }

    #[test]
    fn save_then_load_is_atomic_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut cfg = EliteMiningConfig::default();
        cfg.tts_voice = Some("Daniel".to_string());
        cfg.cargo_max_capacity = 400;
        cfg.save(&path).unwrap();

        let loaded = EliteMiningConfig::load(&path).unwrap();
        assert_eq!(loaded.tts_voice.as_deref(), Some("Daniel"));
        assert_eq!(loaded.cargo_max_capacity, 400);

        let leftover_tmp = dir.path().join(".config.toml.tmp");
        assert!(!leftover_tmp.exists());
    }
}
