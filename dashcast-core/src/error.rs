use thiserror::Error;

/// Startup failures. Runtime components carry their own error types.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),
}

pub type Result<T> = std::result::Result<T, Error>;
