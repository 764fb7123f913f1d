//! Command error types for Tauri frontend communication
//!
//! Provides structured errors that serialize to `{"code": "...", "message": "..."}`.

use serde::Serialize;

/// Errors returned by Tauri commands
///
/// Each variant serializes with a snake_case `code` field for frontend matching.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum CommandError {
    // Validation errors
    NoInputs { message: String },
    InvalidOption { message: String },

    // Model errors
    ModelNotFound { message: String, model_id: String },
    ModelError { message: String },

    // Operation errors
    Busy { message: String },
    DialogError { message: String },
    StorageError { message: String },
    InternalError { message: String },
}

impl CommandError {
    pub fn no_inputs() -> Self {
        Self::NoInputs {
            message: "No valid files found to process".to_string(),
        }
    }

    pub fn invalid_option(message: impl Into<String>) -> Self {
        Self::InvalidOption {
            message: message.into(),
        }
    }

    pub fn model_not_found(model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        Self::ModelNotFound {
            message: format!("Model not found: {}", model_id),
            model_id,
        }
    }

    pub fn model(message: impl Into<String>) -> Self {
        Self::ModelError {
            message: message.into(),
        }
    }

    pub fn busy() -> Self {
        Self::Busy {
            message: "A batch is already being processed".to_string(),
        }
    }

    pub fn dialog(message: impl Into<String>) -> Self {
        Self::DialogError {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageError {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::NoInputs { message }
            | Self::InvalidOption { message }
            | Self::ModelNotFound { message, .. }
            | Self::ModelError { message }
            | Self::Busy { message }
            | Self::DialogError { message }
            | Self::StorageError { message }
            | Self::InternalError { message } => message,
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for CommandError {}

// Conversion from anyhow::Error (used by pagelens-core)
impl From<anyhow::Error> for CommandError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(format!("{:#}", err))
    }
}

impl From<std::io::Error> for CommandError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}

/// Result type alias for commands
pub type CommandResult<T> = Result<T, CommandError>;

/// Extension trait for converting Results to CommandResult
pub trait ResultExt<T> {
    fn model_err(self) -> CommandResult<T>;
    fn storage_err(self) -> CommandResult<T>;
    fn internal_err(self) -> CommandResult<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn model_err(self) -> CommandResult<T> {
        self.map_err(|e| CommandError::model(e.to_string()))
    }

    fn storage_err(self) -> CommandResult<T> {
        self.map_err(|e| CommandError::storage(e.to_string()))
    }

    fn internal_err(self) -> CommandResult<T> {
        self.map_err(|e| CommandError::internal(e.to_string()))
    }
}
