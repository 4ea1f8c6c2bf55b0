use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bridge settings as persisted in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    // MIDI settings
    pub client_name: String,
    pub midi_in_port: i64,
    pub midi_out_port: i64,
    pub midi_channel: u8,

    // Outgoing note settings
    pub note_velocity: u8,
    pub note_hold_ms: u64,

    // HTTP settings
    pub http_bind: String,
    pub dispatch_queue_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            client_name: "midibridge".to_string(),
            midi_in_port: 0,
            midi_out_port: 0,
            midi_channel: 1,

            note_velocity: 127,
            note_hold_ms: 2000,

            http_bind: "127.0.0.1:8080".to_string(),
            dispatch_queue_capacity: 256,
        }
    }
}

impl Settings {
    /// MIDI channel as written on the wire (0-15)
    pub fn wire_channel(&self) -> u8 {
        self.midi_channel.saturating_sub(1) & 0x0F
    }

    pub fn note_hold(&self) -> Duration {
        Duration::from_millis(self.note_hold_ms)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http_bind
            .parse()
            .map_err(|e| ConfigError::ValidationError(vec![format!("http_bind: {}", e)]))
    }
}

/// Configuration manager for bridge settings.
/// Settings are stored as JSON, in `midibridge.json` in the working directory by default.
pub struct ConfigManager {
    config_path: PathBuf,
    settings: Settings,
}

/// Available configuration options with validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub midi: MidiConfigSchema,
    pub note: NoteConfigSchema,
    pub http: HttpConfigSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MidiConfigSchema {
    pub client_name: ConfigOption<String>,
    pub midi_in_port: ConfigOption<i64>,
    pub midi_out_port: ConfigOption<i64>,
    pub midi_channel: ConfigOption<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteConfigSchema {
    pub note_velocity: ConfigOption<u8>,
    pub note_hold_ms: ConfigOption<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfigSchema {
    pub http_bind: ConfigOption<String>,
    pub dispatch_queue_capacity: ConfigOption<usize>,
}

/// Configuration option with validation and available choices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOption<T> {
    pub default: T,
    pub valid_range: Option<(T, T)>,
    pub description: String,
}

/// Persisted configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    pub settings: Settings,
    pub created_at: String,
    pub modified_at: String,
}

impl ConfigManager {
    /// Create a new configuration manager.
    /// If no path is provided, defaults to 'midibridge.json' in the current working directory
    pub fn new(config_path: Option<PathBuf>) -> Self {
        let config_path = config_path.unwrap_or_else(|| PathBuf::from("midibridge.json"));

        Self {
            config_path,
            settings: Settings::default(),
        }
    }

    /// Load settings from the configuration file, creating it with defaults if missing
    pub fn load(&mut self) -> Result<Settings, ConfigError> {
        if !self.config_path.exists() {
            self.save()?;
            return Ok(self.settings.clone());
        }

        let content = fs::read_to_string(&self.config_path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config_file: ConfigFile =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if config_file.version != env!("CARGO_PKG_VERSION") {
            log::warn!(
                "Config file version {} doesn't match application version {}. Using defaults for new settings.",
                config_file.version,
                env!("CARGO_PKG_VERSION")
            );
        }

        Self::validate_settings(&config_file.settings).map_err(ConfigError::ValidationError)?;

        self.settings = config_file.settings;
        Ok(self.settings.clone())
    }

    /// Save current settings to the configuration file
    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            if parent != Path::new("") && parent != Path::new(".") {
                fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let created_at = self.existing_created_at().unwrap_or_else(|| now.clone());

        let config_file = ConfigFile {
            version: env!("CARGO_PKG_VERSION").to_string(),
            settings: self.settings.clone(),
            created_at,
            modified_at: now,
        };

        let content = serde_json::to_string_pretty(&config_file)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(&self.config_path, content)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }

    fn existing_created_at(&self) -> Option<String> {
        let content = fs::read_to_string(&self.config_path).ok()?;
        let file: ConfigFile = serde_json::from_str(&content).ok()?;
        Some(file.created_at)
    }

    /// Update settings and save to file
    pub fn update_settings(&mut self, settings: Settings) -> Result<(), ConfigError> {
        Self::validate_settings(&settings).map_err(ConfigError::ValidationError)?;
        self.settings = settings;
        self.save()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Get configuration schema with available options
    pub fn schema() -> ConfigSchema {
        let defaults = Settings::default();
        ConfigSchema {
            midi: MidiConfigSchema {
                client_name: ConfigOption {
                    default: defaults.client_name,
                    valid_range: None,
                    description: "Client name registered with the MIDI driver".to_string(),
                },
                midi_in_port: ConfigOption {
                    default: defaults.midi_in_port,
                    valid_range: None, // Checked against the driver's port list at startup
                    description: "Index of the MIDI input port to listen to".to_string(),
                },
                midi_out_port: ConfigOption {
                    default: defaults.midi_out_port,
                    valid_range: None,
                    description: "Index of the MIDI output port to write to".to_string(),
                },
                midi_channel: ConfigOption {
                    default: defaults.midi_channel,
                    valid_range: Some((1, 16)),
                    description: "MIDI channel for outgoing messages (1-16)".to_string(),
                },
            },
            note: NoteConfigSchema {
                note_velocity: ConfigOption {
                    default: defaults.note_velocity,
                    valid_range: Some((0, 127)),
                    description: "Velocity of notes played from /note/".to_string(),
                },
                note_hold_ms: ConfigOption {
                    default: defaults.note_hold_ms,
                    valid_range: Some((0, 60_000)),
                    description: "Time between note-on and note-off in milliseconds".to_string(),
                },
            },
            http: HttpConfigSchema {
                http_bind: ConfigOption {
                    default: defaults.http_bind,
                    valid_range: None,
                    description: "Address the HTTP server listens on".to_string(),
                },
                dispatch_queue_capacity: ConfigOption {
                    default: defaults.dispatch_queue_capacity,
                    valid_range: Some((1, 65_536)),
                    description: "Outgoing commands that may wait for the MIDI writer".to_string(),
                },
            },
        }
    }

    /// Validate settings against schema, collecting every violation
    pub fn validate_settings(settings: &Settings) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let schema = Self::schema();

        if settings.client_name.trim().is_empty() {
            errors.push("client_name must not be empty".to_string());
        }

        if let Some((min, max)) = schema.midi.midi_channel.valid_range {
            if settings.midi_channel < min || settings.midi_channel > max {
                errors.push(format!("midi_channel must be between {} and {}", min, max));
            }
        }

        if let Some((min, max)) = schema.note.note_velocity.valid_range {
            if settings.note_velocity < min || settings.note_velocity > max {
                errors.push(format!("note_velocity must be between {} and {}", min, max));
            }
        }

        if let Some((min, max)) = schema.note.note_hold_ms.valid_range {
            if settings.note_hold_ms < min || settings.note_hold_ms > max {
                errors.push(format!("note_hold_ms must be between {} and {}", min, max));
            }
        }

        if let Some((min, max)) = schema.http.dispatch_queue_capacity.valid_range {
            if settings.dispatch_queue_capacity < min || settings.dispatch_queue_capacity > max {
                errors.push(format!(
                    "dispatch_queue_capacity must be between {} and {}",
                    min, max
                ));
            }
        }

        if settings.http_bind.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "http_bind must be an address like 127.0.0.1:8080, got '{}'",
                settings.http_bind
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    ReadError(String),
    WriteError(String),
    ParseError(String),
    SerializeError(String),
    ValidationError(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(msg) => write!(f, "Failed to read config file: {}", msg),
            ConfigError::WriteError(msg) => write!(f, "Failed to write config file: {}", msg),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config file: {}", msg),
            ConfigError::SerializeError(msg) => write!(f, "Failed to serialize config: {}", msg),
            ConfigError::ValidationError(errors) => {
                write!(f, "Config validation errors: {}", errors.join(", "))
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_config_manager_new() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.json");

        let manager = ConfigManager::new(Some(config_path.clone()));
        assert_eq!(manager.config_path(), config_path);
        assert_eq!(manager.settings(), &Settings::default());
    }

    #[test]
    fn test_load_creates_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("midibridge.json");

        let mut manager = ConfigManager::new(Some(config_path.clone()));
        let settings = manager.load().unwrap();

        assert_eq!(settings, Settings::default());
        assert!(config_path.exists());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.json");

        let mut manager = ConfigManager::new(Some(config_path.clone()));

        let settings = Settings {
            midi_in_port: 1,
            midi_out_port: 1,
            midi_channel: 10,
            http_bind: "0.0.0.0:9000".to_string(),
            ..Settings::default()
        };
        manager.update_settings(settings).unwrap();

        let mut manager2 = ConfigManager::new(Some(config_path));
        let loaded = manager2.load().unwrap();

        assert_eq!(loaded.midi_in_port, 1);
        assert_eq!(loaded.midi_channel, 10);
        assert_eq!(loaded.wire_channel(), 9);
        assert_eq!(loaded.http_bind, "0.0.0.0:9000");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("partial.json");
        fs::write(
            &config_path,
            r#"{"version":"0.0.0","settings":{"midi_out_port":3},"created_at":"","modified_at":""}"#,
        )
        .unwrap();

        let mut manager = ConfigManager::new(Some(config_path));
        let loaded = manager.load().unwrap();

        assert_eq!(loaded.midi_out_port, 3);
        assert_eq!(loaded.note_hold_ms, 2000);
        assert_eq!(loaded.note_hold(), Duration::from_secs(2));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("garbage.json");
        fs::write(&config_path, "not json").unwrap();

        let mut manager = ConfigManager::new(Some(config_path));
        assert!(matches!(manager.load(), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        assert!(ConfigManager::validate_settings(&settings).is_ok());

        settings.midi_channel = 0;
        settings.note_velocity = 200;
        settings.dispatch_queue_capacity = 0;
        settings.http_bind = "localhost".to_string();

        let errors = ConfigManager::validate_settings(&settings).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors[0].contains("midi_channel"));
    }

    #[test]
    fn test_update_rejects_invalid_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.json");
        let mut manager = ConfigManager::new(Some(config_path));

        let settings = Settings {
            midi_channel: 17,
            ..Settings::default()
        };
        assert!(matches!(
            manager.update_settings(settings),
            Err(ConfigError::ValidationError(_))
        ));
        assert_eq!(manager.settings(), &Settings::default());
    }
}
