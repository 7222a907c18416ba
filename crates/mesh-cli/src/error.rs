//! Error handling for the controller daemon

use thiserror::Error;

/// Daemon-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Controller error: {0}")]
    Mesh(#[from] mesh_core::MeshError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Broker frame error: {0}")]
    Frame(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),
}

/// Result type for daemon operations
pub type Result<T> = std::result::Result<T, CliError>;
