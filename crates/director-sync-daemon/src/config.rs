//! Settings file (`~/.director-sync/settings.yaml`)
//!
//! The file uses the same camelCase keys as the UI:
//!
//! ```yaml
//! serverEnabled: true
//! clientEnabled: true
//! listenPort: 19625
//! remoteHost: 192.168.1.20
//! remotePort: 19625
//! autoConnect: true
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use director_sync_core::SyncSettings;
use serde_json::Value;

pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".director-sync")
        .join("settings.yaml")
}

/// Raw settings object from `path`; an empty object if the file doesn't exist.
/// The value still has to go through the normalizer.
pub fn load_settings_value(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Ok(Value::Object(Default::default()));
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let yaml: serde_yaml::Value = serde_yaml::from_str(&content)
        .with_context(|| format!("Invalid YAML in {}", path.display()))?;
    if yaml.is_null() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::to_value(yaml).with_context(|| format!("Unsupported settings in {}", path.display()))
}

pub fn save_settings(path: &Path, settings: &SyncSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let yaml = serde_yaml::to_string(settings)?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use director_sync_core::normalize;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let value = load_settings_value(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(normalize(&value), SyncSettings::default());
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(
            &path,
            r#"
clientEnabled: true
remoteHost: "  10.0.0.8 "
remotePort: "20000"
autoConnect: false
"#,
        )
        .unwrap();

        let settings = normalize(&load_settings_value(&path).unwrap());
        assert!(settings.enabled);
        assert!(settings.client_enabled);
        assert!(!settings.server_enabled);
        assert_eq!(settings.remote_host, "10.0.0.8");
        assert_eq!(settings.remote_port, 20000);
        assert!(!settings.auto_connect);
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "").unwrap();
        assert_eq!(normalize(&load_settings_value(&path).unwrap()), SyncSettings::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "serverEnabled: [unclosed").unwrap();
        assert!(load_settings_value(&path).is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.yaml");
        let settings = normalize(&serde_json::json!({
            "serverEnabled": true,
            "listenPort": 20100,
        }));

        save_settings(&path, &settings).unwrap();
        let loaded = normalize(&load_settings_value(&path).unwrap());
        assert_eq!(loaded, settings);
    }
}
