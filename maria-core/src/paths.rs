// ABOUTME: XDG Base Directory paths for config and data storage
// ABOUTME: Falls back to the working directory when no home directory is known

use directories::ProjectDirs;
use std::path::PathBuf;

const QUALIFIER: &str = "com";
const ORGANIZATION: &str = "maria";
const APPLICATION: &str = "maria";

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

/// Data directory (e.g., ~/.local/share/maria/), or ./data
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Config directory (e.g., ~/.config/maria/), or the current directory
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default SQLite message history location
pub fn history_db() -> PathBuf {
    data_dir().join("history.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_db_lives_in_data_dir() {
        assert!(history_db().starts_with(data_dir()));
        assert_eq!(history_db().file_name().unwrap(), "history.db");
    }

    #[test]
    fn test_config_file_name() {
        assert!(config_file().ends_with("config.toml"));
    }
}
