use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use quarry_host::timer::DEFAULT_SAVE_DEBOUNCE_TICKS;
use quarry_host::{FileBlobStore, ProjectPaths};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

fn default_tick_rate_hz() -> u32 {
    20
}

fn default_save_debounce_ticks() -> u32 {
    DEFAULT_SAVE_DEBOUNCE_TICKS
}

/// Settings for a runner process, read from `runner.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Simulation ticks per second
    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: u32,

    /// Ticks between the first unsaved write of an app and its flush
    #[serde(default = "default_save_debounce_ticks")]
    pub save_debounce_ticks: u32,

    /// Where app state blobs live (default: <data dir>/quarry/apps)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Directory holding app sources (default: <data dir>/quarry/scripts)
    #[serde(default)]
    pub scripts_dir: Option<PathBuf>,

    /// Also log to a file under the data directory
    #[serde(default)]
    pub file_logging: bool,

    /// Apps loaded at startup, in order
    #[serde(default)]
    pub autoload: Vec<String>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            tick_rate_hz: default_tick_rate_hz(),
            save_debounce_ticks: default_save_debounce_ticks(),
            data_dir: None,
            scripts_dir: None,
            file_logging: false,
            autoload: Vec::new(),
        }
    }
}

fn project_paths() -> Result<ProjectPaths> {
    ProjectPaths::new().context("Failed to determine home directory")
}

impl RunnerSettings {
    /// `<config dir>/quarry/runner.toml`
    pub fn settings_path() -> Result<PathBuf> {
        Ok(project_paths()?.runner_settings())
    }

    /// Load from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::settings_path()?)
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(target: "apphost", "No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))?;
        settings.validate()?;
        info!(target: "apphost", "Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        info!(target: "apphost", "Saved settings to {}", path.display());
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.tick_rate_hz == 0 || self.tick_rate_hz > 1000 {
            bail!("tick_rate_hz must be between 1 and 1000, got {}", self.tick_rate_hz);
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_rate_hz.max(1)))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => FileBlobStore::default_root(),
        }
    }

    pub fn scripts_dir(&self) -> Result<PathBuf> {
        match &self.scripts_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(project_paths()?.scripts_dir()),
        }
    }

    pub fn blob_store(&self) -> Result<FileBlobStore> {
        Ok(FileBlobStore::new(self.data_dir()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = RunnerSettings::default();
        assert_eq!(settings.tick_rate_hz, 20);
        assert_eq!(settings.save_debounce_ticks, 200);
        assert_eq!(settings.tick_interval(), Duration::from_millis(50));
        assert!(!settings.file_logging);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings: RunnerSettings = toml::from_str("autoload = [\"notes\"]").unwrap();
        assert_eq!(settings.autoload, vec!["notes".to_string()]);
        assert_eq!(settings.tick_rate_hz, 20);
        assert_eq!(settings.data_dir, None);
    }

    #[test]
    fn test_zero_tick_rate_rejected() {
        let settings = RunnerSettings {
            tick_rate_hz: 0,
            ..RunnerSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        let settings = RunnerSettings {
            data_dir: Some(PathBuf::from("/srv/quarry")),
            ..RunnerSettings::default()
        };
        assert_eq!(settings.data_dir().unwrap(), PathBuf::from("/srv/quarry"));
        assert_eq!(settings.blob_store().unwrap().root(), Path::new("/srv/quarry"));
    }
}
