//! Configuration management

use anyhow::{Context, Result};
use immo_types::Settings;
use std::path::{Path, PathBuf};

pub struct SettingsManager;

impl SettingsManager {
    /// Get the immo home directory (~/.immo)
    pub fn immo_home() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("IMMO_HOME") {
            return Ok(PathBuf::from(path));
        }
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".immo"))
    }

    /// Get the settings file path
    pub fn settings_path() -> Result<PathBuf> {
        Ok(Self::immo_home()?.join("settings.json"))
    }

    /// Directory holding the local encrypted media store
    pub fn media_dir(settings: &Settings) -> Result<PathBuf> {
        match &settings.media_dir {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => Ok(Self::immo_home()?.join("media")),
        }
    }

    /// Load settings from disk, writing defaults on first use
    pub fn load() -> Result<Settings> {
        Self::load_from(&Self::settings_path()?)
    }

    /// Save settings to disk
    pub fn save(settings: &Settings) -> Result<()> {
        Self::save_to(&Self::settings_path()?, settings)
    }

    pub fn load_from(path: &Path) -> Result<Settings> {
        if !path.exists() {
            let settings = Settings::default();
            Self::save_to(path, &settings)?;
            return Ok(settings);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {:?}", path))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings from {:?}", path))
    }

    pub fn save_to(path: &Path, settings: &Settings) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let content =
            serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings to {:?}", path))?;

        // The file holds the bearer token: owner only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use immo_types::DEFAULT_API_URL;

    #[test]
    fn test_first_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let settings = SettingsManager::load_from(&path).unwrap();

        assert_eq!(settings.api_url, DEFAULT_API_URL);
        assert!(settings.access_token.is_none());
        assert_eq!(settings.reconnect.max_attempts, 5);
        assert!(path.exists());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = Settings::default();
        settings.access_token = Some("42|abcdef".to_string());
        settings.reconnect.base_delay_ms = 250;
        tokio_test::assert_ok!(SettingsManager::save_to(&path, &settings));

        let loaded = tokio_test::assert_ok!(SettingsManager::load_from(&path));
        assert_eq!(loaded.access_token.as_deref(), Some("42|abcdef"));
        assert_eq!(loaded.reconnect.base_delay_ms, 250);
    }

    #[cfg(unix)]
    #[test]
    fn test_settings_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        SettingsManager::save_to(&path, &Settings::default()).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_corrupt_settings_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = SettingsManager::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse settings"));
    }

    #[test]
    fn test_explicit_media_dir() {
        let mut settings = Settings::default();
        settings.media_dir = Some("/var/lib/immo/media".to_string());

        assert_eq!(
            SettingsManager::media_dir(&settings).unwrap(),
            PathBuf::from("/var/lib/immo/media")
        );
    }
}
