use crate::proxy::ProxyError;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    #[error("Invalid setting {field}: {message}")]
    InvalidSetting { field: String, message: String },
}

impl Error {
    pub fn invalid_setting(field: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidSetting {
            field: field.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
