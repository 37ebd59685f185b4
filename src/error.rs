use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Mailbox API call failed (list, get, label, modify)
    #[error("Mailbox error: {0}")]
    Mailbox(String),

    /// Language model call failed or returned something unusable
    #[error("Model error: {0}")]
    Model(String),

    /// Rows another writer changed between read and commit
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Prompt error: {0}")]
    Prompt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
