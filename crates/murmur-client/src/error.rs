use murmur_store::StoreError;
use thiserror::Error;

use crate::media::MediaError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("You have been blocked by this user")]
    BlockedByRecipient,

    #[error("Nothing to send")]
    EmptyMessage,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not permitted: {0}")]
    NotPermitted(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
