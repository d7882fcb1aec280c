use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::MessageId;

/// Stable classification of every failure the client surfaces to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    WrongSecret,
    WriteFailed,
    UploadFailed,
    NotFound,
    Subscription,
    InvalidUpload,
}

/// Failures at the remote feed / blob store boundary. None of these are
/// retried automatically; callers report them and abandon the operation.
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    #[error("record {0} not found in remote store")]
    NotFound(MessageId),
    #[error("write to remote store failed: {0}")]
    WriteFailed(String),
    #[error("blob upload failed: {0}")]
    UploadFailed(String),
    #[error("feed subscription failed: {0}")]
    Subscription(String),
}

impl FeedError {
    pub fn code(&self) -> ErrorCode {
        match self {
            FeedError::NotFound(_) => ErrorCode::NotFound,
            FeedError::WriteFailed(_) => ErrorCode::WriteFailed,
            FeedError::UploadFailed(_) => ErrorCode::UploadFailed,
            FeedError::Subscription(_) => ErrorCode::Subscription,
        }
    }
}
