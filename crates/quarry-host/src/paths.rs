use std::path::{Path, PathBuf};

use directories::ProjectDirs;

/// Directory name under the platform's config and data roots
pub const PROJECT_NAME: &str = "quarry";

/// Platform directories for quarry.
///
/// On Linux these follow XDG (`~/.config/quarry`, `~/.local/share/quarry`);
/// macOS and Windows use their native application support locations.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    dirs: ProjectDirs,
}

impl ProjectPaths {
    /// `None` when no home directory can be found
    pub fn new() -> Option<Self> {
        ProjectDirs::from("", "", PROJECT_NAME).map(|dirs| Self { dirs })
    }

    pub fn config_dir(&self) -> &Path {
        self.dirs.config_dir()
    }

    pub fn data_dir(&self) -> &Path {
        self.dirs.data_dir()
    }

    /// State blobs of loaded apps
    pub fn apps_dir(&self) -> PathBuf {
        self.data_dir().join("apps")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }

    /// Where app sources are looked up by default
    pub fn scripts_dir(&self) -> PathBuf {
        self.data_dir().join("scripts")
    }

    pub fn runner_settings(&self) -> PathBuf {
        self.config_dir().join("runner.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_contain_project_name() {
        if let Some(paths) = ProjectPaths::new() {
            assert!(paths.config_dir().to_string_lossy().contains(PROJECT_NAME));
            assert!(paths.data_dir().to_string_lossy().contains(PROJECT_NAME));
        }
    }

    #[test]
    fn test_subdirectories_live_under_their_roots() {
        if let Some(paths) = ProjectPaths::new() {
            assert_eq!(paths.apps_dir().parent(), Some(paths.data_dir()));
            assert_eq!(paths.logs_dir().parent(), Some(paths.data_dir()));
            assert_eq!(paths.scripts_dir().parent(), Some(paths.data_dir()));
            assert!(paths.runner_settings().starts_with(paths.config_dir()));
            assert_ne!(paths.apps_dir(), paths.logs_dir());
        }
    }
}
