use thiserror::Error;

#[derive(Debug, Error)]
pub enum HourglassError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting { key: &'static str, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HourglassError {
    /// Short machine-readable code, used in structured log fields.
    pub fn code(&self) -> &'static str {
        match self {
            HourglassError::Config(_) => "CONFIG_ERROR",
            HourglassError::InvalidSetting { .. } => "INVALID_SETTING",
            HourglassError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, HourglassError>;
