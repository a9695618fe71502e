use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Controller configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Bound on play/pause/seek/stop/rate/volume waits
    pub command_timeout_ms: u64,
    /// Bound on prepare, which may open and probe media
    pub prepare_timeout_ms: u64,
    pub release_timeout_ms: u64,
    /// Minimum spacing of position updates delivered to the observer
    pub position_update_interval_ms: u64,
    pub event_history: usize,
    pub default_volume: f32,
    pub looping: bool,
    /// Media length used by the simulated engine in the CLI
    pub demo_duration_ms: i64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 3_000,
            prepare_timeout_ms: 10_000,
            release_timeout_ms: 5_000,
            position_update_interval_ms: 100,
            event_history: 1_000,
            default_volume: 1.0,
            looping: false,
            demo_duration_ms: 180_000,
        }
    }
}

impl ControlConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn prepare_timeout(&self) -> Duration {
        Duration::from_millis(self.prepare_timeout_ms)
    }

    pub fn release_timeout(&self) -> Duration {
        Duration::from_millis(self.release_timeout_ms)
    }

    pub fn position_update_interval(&self) -> Duration {
        Duration::from_millis(self.position_update_interval_ms)
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config: ControlConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        let config = Self::load_config(&config_path).unwrap_or_default();

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Manager bound to an explicit file, loading it if present
    pub fn with_path(config_path: PathBuf) -> Result<Self, ConfigError> {
        let config = Self::load_config(&config_path)?;
        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get_config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn update_config<F>(&mut self, updater: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut ControlConfig),
    {
        updater(&mut self.config);
        self.save_config()
    }

    pub fn set_volume(&mut self, volume: f32) -> Result<(), ConfigError> {
        self.config.default_volume = volume.clamp(0.0, 1.0);
        self.save_config()
    }

    pub fn set_looping(&mut self, looping: bool) -> Result<(), ConfigError> {
        self.config.looping = looping;
        self.save_config()
    }

    pub fn set_command_timeout_ms(&mut self, timeout_ms: u64) -> Result<(), ConfigError> {
        self.config.command_timeout_ms = timeout_ms.max(1);
        self.save_config()
    }

    pub fn set_position_update_interval_ms(&mut self, interval_ms: u64) -> Result<(), ConfigError> {
        self.config.position_update_interval_ms = interval_ms;
        self.save_config()
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.config = ControlConfig::default();
        self.save_config()
    }

    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::home_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join(".config")
            .join("mediactl");

        std::fs::create_dir_all(&config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    fn load_config(path: &Path) -> Result<ControlConfig, ConfigError> {
        if !path.exists() {
            return Ok(ControlConfig::default());
        }

        let config_content = std::fs::read_to_string(path)?;
        let config: ControlConfig = toml::from_str(&config_content)?;
        Ok(config)
    }

    fn save_config(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let config_content = toml::to_string_pretty(&self.config)?;
        std::fs::write(&self.config_path, config_content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let config_manager = ConfigManager {
            config: ControlConfig::default(),
            config_path,
        };

        (config_manager, temp_dir)
    }

    #[test]
    fn test_control_config_default() {
        let config = ControlConfig::default();

        assert_eq!(config.command_timeout(), Duration::from_secs(3));
        assert_eq!(config.position_update_interval(), Duration::from_millis(100));
        assert_eq!(config.event_history, 1_000);
        assert_eq!(config.default_volume, 1.0);
        assert!(!config.looping);
        assert!(config.prepare_timeout() > config.command_timeout());
    }

    #[test]
    fn test_save_and_load_config() {
        let (mut config_manager, _temp_dir) = create_test_config_manager();

        config_manager.config.command_timeout_ms = 750;
        config_manager.config.looping = true;
        config_manager.save_config().unwrap();

        let loaded_config = ConfigManager::load_config(&config_manager.config_path).unwrap();
        assert_eq!(loaded_config.command_timeout_ms, 750);
        assert!(loaded_config.looping);
    }

    #[test]
    fn test_load_nonexistent_config() {
        let temp_dir = TempDir::new().unwrap();
        let nonexistent_path = temp_dir.path().join("nonexistent.toml");

        let config = ConfigManager::load_config(&nonexistent_path).unwrap();
        assert_eq!(config, ControlConfig::default());
    }

    #[test]
    fn test_load_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        fs::write(&config_path, "invalid toml content [[[").unwrap();

        match ConfigManager::load_config(&config_path) {
            Err(ConfigError::DeserializationError(_)) => {}
            other => panic!("Expected DeserializationError, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("partial.toml");
        fs::write(&config_path, "command_timeout_ms = 250\n").unwrap();

        let manager = ConfigManager::with_path(config_path).unwrap();
        assert_eq!(manager.get_config().command_timeout_ms, 250);
        assert_eq!(
            manager.get_config().release_timeout_ms,
            ControlConfig::default().release_timeout_ms
        );
    }

    #[test]
    fn test_update_config() {
        let (mut config_manager, _temp_dir) = create_test_config_manager();

        config_manager
            .update_config(|config| {
                config.prepare_timeout_ms = 1_234;
                config.event_history = 50;
            })
            .unwrap();

        let loaded_config = ConfigManager::load_config(&config_manager.config_path).unwrap();
        assert_eq!(loaded_config.prepare_timeout_ms, 1_234);
        assert_eq!(loaded_config.event_history, 50);
    }

    #[test]
    fn test_set_volume_clamps() {
        let (mut config_manager, _temp_dir) = create_test_config_manager();

        config_manager.set_volume(0.7).unwrap();
        assert_eq!(config_manager.config.default_volume, 0.7);

        config_manager.set_volume(1.5).unwrap();
        assert_eq!(config_manager.config.default_volume, 1.0);

        config_manager.set_volume(-0.5).unwrap();
        assert_eq!(config_manager.config.default_volume, 0.0);
    }

    #[test]
    fn test_setters_persist() {
        let (mut config_manager, _temp_dir) = create_test_config_manager();

        config_manager.set_looping(true).unwrap();
        config_manager.set_command_timeout_ms(0).unwrap();
        config_manager.set_position_update_interval_ms(40).unwrap();

        let reloaded = ConfigManager::with_path(config_manager.config_path.clone()).unwrap();
        assert!(reloaded.get_config().looping);
        assert_eq!(reloaded.get_config().command_timeout_ms, 1);
        assert_eq!(reloaded.get_config().position_update_interval_ms, 40);
    }

    #[test]
    fn test_reset_to_defaults() {
        let (mut config_manager, _temp_dir) = create_test_config_manager();

        config_manager.config.default_volume = 0.1;
        config_manager.config.looping = true;
        config_manager.reset_to_defaults().unwrap();

        assert_eq!(config_manager.config, ControlConfig::default());
    }

    #[test]
    fn test_config_path_creation() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("nested").join("config").join("config.toml");

        let config_manager = ConfigManager {
            config: ControlConfig::default(),
            config_path: nested_path.clone(),
        };
        config_manager.save_config().unwrap();

        assert!(nested_path.exists());
    }

    #[test]
    fn test_toml_format() {
        let toml_string = toml::to_string_pretty(&ControlConfig::default()).unwrap();

        assert!(toml_string.contains("command_timeout_ms = 3000"));
        assert!(toml_string.contains("position_update_interval_ms = 100"));
        assert!(toml_string.contains("looping = false"));
    }
}
