use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqlChatError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Missing API key: set {0}")]
    MissingApiKey(String),
}
