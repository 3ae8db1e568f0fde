//! Config file discovery.
//!
//! Resolution order (later overrides earlier):
//! 1. `~/.config/deskline/config.toml` (or `DESKLINE_CONFIG_DIR`)
//! 2. An explicit `--config` path
//! 3. `DESKLINE_SERVER_URL` for the API URL

use std::path::{Path, PathBuf};

use crate::{ConfigError, DesklineConfig, Result};

/// Default config filename within the config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for XDG directory resolution.
const APP_NAME: &str = "deskline";

/// Environment variable to override the config directory.
const CONFIG_DIR_ENV: &str = "DESKLINE_CONFIG_DIR";

/// Environment variable to override the API URL.
pub const SERVER_URL_ENV: &str = "DESKLINE_SERVER_URL";

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The effective configuration.
    pub config: DesklineConfig,
    /// File the configuration was read from, if any.
    pub source: Option<PathBuf>,
}

/// Load configuration from an explicit path, or discover the user config.
///
/// A missing discovered file yields defaults; a missing explicit file is an
/// error.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let (config, source) = match explicit {
        Some(path) => (load_config_file(path)?, Some(path.to_path_buf())),
        None => match xdg_config_path() {
            Some(path) if path.is_file() => (load_config_file(&path)?, Some(path)),
            _ => (DesklineConfig::new(), None),
        },
    };

    let config = match std::env::var(SERVER_URL_ENV) {
        Ok(url) if !url.is_empty() => config.with_api_url(url),
        _ => config,
    };

    Ok(LoadedConfig { config, source })
}

/// Load config from a specific file path (no discovery).
pub fn load_config_file(path: &Path) -> Result<DesklineConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    DesklineConfig::from_toml(&contents)
}

/// Save configuration to a file, creating parent directories.
pub fn save_config(config: &DesklineConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
            path: parent.display().to_string(),
            source: e,
        })?;
    }

    let contents = config.to_toml()?;
    std::fs::write(path, contents).map_err(|e| ConfigError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(())
}

/// Get the config file path for deskline.
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// Get the config directory for deskline.
///
/// Checks `DESKLINE_CONFIG_DIR` first, then falls back to the platform default.
pub fn xdg_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_xdg_config_path_shape() {
        if let Some(p) = xdg_config_path() {
            assert!(p.ends_with("config.toml"));
        }
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[server]
api_url = "https://crm.example.com"

[http]
timeout_secs = 10
"#,
        )
        .unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.server.api_url, "https://crm.example.com");
        assert_eq!(config.http.timeout_secs, 10);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let err = load_config_file(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let err = load_config(Some(Path::new("/nonexistent/deskline.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = DesklineConfig::new().with_api_url("https://saved.example.com");

        save_config(&config, &path).unwrap();
        let loaded = load_config(Some(&path)).unwrap();

        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
        if std::env::var(SERVER_URL_ENV).is_err() {
            assert_eq!(loaded.config.server.api_url, "https://saved.example.com");
        }
    }
}
