use thiserror::Error;

/// Errors produced by a document store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The store refused the operation for the current principal.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The target document does not exist.
    #[error("Document not found: {0}")]
    NotFound(String),

    /// The backend is unreachable or the subscription was torn down remotely.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A field path or document body had an unexpected shape.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// A record could not be converted to or from JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
