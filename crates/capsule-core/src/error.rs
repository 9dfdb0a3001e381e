use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required configuration value was absent or empty.
    #[error("{0} is required")]
    MissingField(&'static str),
}

pub type Result<T> = std::result::Result<T, CoreError>;
