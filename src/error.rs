use crate::models::{EngineErrorKind, PlaybackRate, PlaybackState};
use thiserror::Error;

/// Main error type for the binary and the public facade
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("CLI parse error: {0}")]
    Parse(#[from] crate::cli::ParseError),
}

impl PlayerError {
    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            PlayerError::Control(err) => err.user_message(),
            PlayerError::Memory(err) => err.user_message(),
            PlayerError::Config(err) => err.user_message(),
            PlayerError::File(err) => format!("File system error: {}", err),
            PlayerError::Parse(err) => format!("Command error: {}", err),
        }
    }

    /// Check if the controller is still usable after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            PlayerError::Control(err) => err.is_recoverable(),
            PlayerError::Memory(_) => true,
            PlayerError::Config(_) => true, // Defaults are always available
            PlayerError::File(_) => false,
            PlayerError::Parse(_) => true,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PlayerError::Control(ControlError::InvalidState { .. }) => ErrorSeverity::Info,
            PlayerError::Control(ControlError::Canceled { .. }) => ErrorSeverity::Info,
            PlayerError::Control(ControlError::Timeout { .. }) => ErrorSeverity::Warning,
            PlayerError::Control(ControlError::EngineRejected { .. }) => ErrorSeverity::Warning,
            PlayerError::Control(ControlError::EngineFailure { .. }) => ErrorSeverity::Error,
            PlayerError::Control(_) => ErrorSeverity::Error,
            PlayerError::Memory(_) => ErrorSeverity::Error,
            PlayerError::Config(_) => ErrorSeverity::Warning,
            PlayerError::File(_) => ErrorSeverity::Error,
            PlayerError::Parse(_) => ErrorSeverity::Info,
        }
    }
}

/// Error severity levels for logging and user feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }

    pub fn log_level(&self) -> log::Level {
        match self {
            ErrorSeverity::Info => log::Level::Info,
            ErrorSeverity::Warning => log::Level::Warn,
            ErrorSeverity::Error => log::Level::Error,
            ErrorSeverity::Critical => log::Level::Error,
        }
    }
}

/// Errors surfaced by the task queue and the control state machine.
///
/// Cloneable so a single outcome can complete every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: PlaybackState,
    },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Engine rejected {operation} (code {code})")]
    EngineRejected { operation: &'static str, code: i32 },

    #[error("Engine reported {kind} error (code {code})")]
    EngineFailure { kind: EngineErrorKind, code: i32 },

    #[error("{operation} timed out after {waited_ms} ms")]
    Timeout { operation: &'static str, waited_ms: u64 },

    #[error("{operation} was canceled before completion")]
    Canceled { operation: &'static str },

    #[error("Playback rate {rate} is not supported by the engine")]
    UnsupportedRate { rate: PlaybackRate },

    #[error("Task queue '{queue}' is not running")]
    QueueStopped { queue: String },

    #[error("Controller has been released")]
    Released,
}

impl ControlError {
    pub fn user_message(&self) -> String {
        match self {
            ControlError::InvalidState { operation, state } => {
                format!("Cannot {} while the player is {}", operation, state)
            }
            ControlError::InvalidOperation(msg) => format!("Operation refused: {}", msg),
            ControlError::EngineRejected { operation, code } => {
                format!("The media engine refused to {} (code {})", operation, code)
            }
            ControlError::EngineFailure { kind, code } => {
                format!("Playback failed with a {} error (code {})", kind, code)
            }
            ControlError::Timeout { operation, waited_ms } => {
                format!("No confirmation for {} after {} ms", operation, waited_ms)
            }
            ControlError::Canceled { operation } => {
                format!("{} was superseded by a newer command", operation)
            }
            ControlError::UnsupportedRate { rate } => {
                format!("Playback speed {} is not available for this media", rate)
            }
            ControlError::QueueStopped { .. } => "The player is shutting down".to_string(),
            ControlError::Released => "The player has been released".to_string(),
        }
    }

    /// Whether the controller can keep serving commands after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ControlError::Released | ControlError::QueueStopped { .. })
    }
}

/// Shared-memory region and buffer pool errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MemoryError {
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Region '{name}' is closed")]
    Closed { name: String },

    #[error("Memory allocation failed for {size} bytes")]
    AllocationFailed { size: usize },

    #[error("Buffer pool exhausted ({capacity} buffers in use)")]
    PoolExhausted { capacity: usize },
}

impl MemoryError {
    pub fn user_message(&self) -> String {
        match self {
            MemoryError::InvalidValue(msg) => format!("Buffer request rejected: {}", msg),
            MemoryError::InvalidOperation(msg) => format!("Buffer operation refused: {}", msg),
            MemoryError::Closed { name } => format!("Buffer '{}' is no longer usable", name),
            MemoryError::AllocationFailed { size } => {
                format!("Could not allocate {} bytes of buffer memory", size)
            }
            MemoryError::PoolExhausted { capacity } => {
                format!("All {} codec buffers are in use", capacity)
            }
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::ConfigDirNotFound => {
                "Cannot find or create configuration directory".to_string()
            }
            ConfigError::IoError(err) => {
                format!("Cannot access configuration file: {}", err)
            }
            ConfigError::SerializationError(_) => {
                "Failed to save configuration settings".to_string()
            }
            ConfigError::DeserializationError(_) => {
                "Configuration file is corrupted or has invalid format".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_control_error_display() {
        let error = ControlError::InvalidState {
            operation: "seek",
            state: PlaybackState::Idle,
        };
        assert_eq!(format!("{}", error), "seek is not allowed in state IDLE");

        let error = ControlError::Timeout {
            operation: "play",
            waited_ms: 250,
        };
        assert_eq!(format!("{}", error), "play timed out after 250 ms");

        let error = ControlError::EngineFailure {
            kind: EngineErrorKind::Decoder,
            code: 5,
        };
        assert_eq!(format!("{}", error), "Engine reported decoder error (code 5)");
    }

    #[test]
    fn test_control_error_recoverability() {
        assert!(ControlError::Canceled { operation: "seek" }.is_recoverable());
        assert!(ControlError::EngineRejected { operation: "play", code: -1 }.is_recoverable());
        assert!(!ControlError::Released.is_recoverable());
        assert!(!ControlError::QueueStopped { queue: "q".to_string() }.is_recoverable());
    }

    #[test]
    fn test_severity_mapping() {
        let invalid: PlayerError = ControlError::InvalidState {
            operation: "play",
            state: PlaybackState::Idle,
        }
        .into();
        assert_eq!(invalid.severity(), ErrorSeverity::Info);

        let failure: PlayerError = ControlError::EngineFailure {
            kind: EngineErrorKind::Io,
            code: 1,
        }
        .into();
        assert_eq!(failure.severity(), ErrorSeverity::Error);
        assert_eq!(failure.severity().log_level(), log::Level::Error);
    }

    #[test]
    fn test_memory_error_messages() {
        let error = MemoryError::Closed { name: "input-0".to_string() };
        assert_eq!(format!("{}", error), "Region 'input-0' is closed");
        assert!(error.user_message().contains("input-0"));

        let error = MemoryError::PoolExhausted { capacity: 4 };
        assert!(error.user_message().contains('4'));
    }

    #[test]
    fn test_config_error_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "Permission denied");
        let config_error: ConfigError = io_error.into();

        match config_error {
            ConfigError::IoError(_) => {
                // Success
            }
            _ => panic!("Expected IoError variant"),
        }
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "Permission denied");
        let config_error = ConfigError::IoError(io_error);
        let player_error = PlayerError::Config(config_error);

        let mut current_error: &dyn Error = &player_error;
        let mut error_count = 0;

        while let Some(source) = current_error.source() {
            current_error = source;
            error_count += 1;
        }

        assert!(error_count >= 1);
    }
}
