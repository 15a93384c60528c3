//! Error types for Easel

use thiserror::Error;

/// The main error type for Easel operations
#[derive(Debug, Error)]
pub enum EaselError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown style preset: {0}")]
    UnknownStylePreset(String),

    #[error("Style error: {0}")]
    StyleError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("No image providers are configured")]
    NoProvidersConfigured,

    #[error("Unknown provider '{name}'. Available: {available}")]
    UnknownProvider { name: String, available: String },

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Invalid asset id: {0}")]
    InvalidAssetId(String),

    #[error("Upload error: {0}")]
    UploadError(String),

    #[error("Worker pool error: {0}")]
    PoolError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(String),

    #[error("TOML serialization error: {0}")]
    TomlSerError(String),

    #[error("JSON error: {0}")]
    JsonError(String),
}

/// Result type alias for Easel operations
pub type Result<T> = std::result::Result<T, EaselError>;

impl From<toml::de::Error> for EaselError {
    fn from(err: toml::de::Error) -> Self {
        EaselError::TomlParseError(err.to_string())
    }
}

impl From<toml::ser::Error> for EaselError {
    fn from(err: toml::ser::Error) -> Self {
        EaselError::TomlSerError(err.to_string())
    }
}

impl From<serde_json::Error> for EaselError {
    fn from(err: serde_json::Error) -> Self {
        EaselError::JsonError(err.to_string())
    }
}
