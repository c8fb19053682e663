use thiserror::Error;

use crate::tag::Tag;

/// Failure raised by a stage while it reads or writes a [`Document`](crate::Document).
#[derive(Error, Debug)]
pub enum StageError {
    #[error("{0}")]
    Failed(String),

    #[error("missing annotation '{0}'")]
    MissingAnnotation(Tag),

    #[error("annotation '{tag}' has an unexpected shape: {message}")]
    Decode { tag: String, message: String },

    #[error("annotation '{tag}' could not be encoded: {message}")]
    Encode { tag: String, message: String },
}

impl StageError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
