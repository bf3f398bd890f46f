use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote returned status {0}")]
    Status(u16),

    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("feed closed")]
    FeedClosed,

    #[error("message has no content and no attachments")]
    EmptyMessage,
}

impl SyncError {
    /// Data errors are dropped; everything else means the transport is unhealthy.
    pub fn is_data_error(&self) -> bool {
        matches!(self, SyncError::Decode(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
