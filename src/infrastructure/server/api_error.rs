use thiserror::Error;

use crate::domain::models::ApiErrorBody;

/// Rejections of the chat API and completion relay, each with the HTTP status
/// it is reported with.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Missing required fields")]
    MissingFields,
    #[error("Chat ID is required")]
    MissingChatId,
    #[error("Chat key is required")]
    MissingChatKey,
    #[error("Invalid chat key")]
    InvalidChatKey,
    #[error("Invalid passcode")]
    InvalidPasscode,
    #[error("File size exceeds limit")]
    TooLarge,
    #[error("Chat not found")]
    NotFound,
    #[error("Cannot delete a finalized chat")]
    Finalized,
    #[error("OpenRouter key required for model {0}")]
    KeyRequired(String),
    #[error("API key not configured")]
    KeyNotConfigured,
    #[error("First message must be a system message")]
    FirstMessageNotSystem,
    #[error("First message must contain the correct system message")]
    WrongSystemMessage,
    #[error("{message}")]
    Upstream { status: u16, message: String },
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> u16 {
        match self {
            ApiError::MissingFields
            | ApiError::MissingChatId
            | ApiError::MissingChatKey
            | ApiError::TooLarge
            | ApiError::KeyRequired(_)
            | ApiError::FirstMessageNotSystem
            | ApiError::WrongSystemMessage => return 400,
            ApiError::InvalidChatKey | ApiError::InvalidPasscode => return 401,
            ApiError::Finalized => return 403,
            ApiError::NotFound => return 404,
            ApiError::KeyNotConfigured | ApiError::Internal => return 500,
            ApiError::Upstream { status, .. } => return *status,
        }
    }

    /// The JSON body the error is reported with.
    pub fn body(&self) -> ApiErrorBody {
        return ApiErrorBody {
            error: self.to_string(),
        };
    }

    pub fn internal(err: anyhow::Error) -> ApiError {
        tracing::error!(error = ?err, "Internal API failure");
        return ApiError::Internal;
    }
}
