use thiserror::Error;

use crate::access::{RemoveUserError, UserStoreError};
use crate::chart::RenderError;
use crate::log_store::LogStoreError;
use crate::telegram::TransportError;

/// Bad input from the caller. Always answered with a usage or format hint.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("wrong number of arguments for {command}")]
    Usage { command: &'static str },
    #[error("invalid date token '{0}', expected DD-MM-YYYY")]
    DateFormat(String),
    #[error("user @{name} not found")]
    UserNotFound {
        name: String,
        suggestion: Option<String>,
    },
}

/// Everything a single request can fail with
#[derive(Debug, Error)]
pub enum BotError {
    #[error("caller is not in the allow-list")]
    Unauthorized,
    #[error("caller is not the administrator")]
    AdminOnly,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Upstream(String),
    #[error("failed to persist users: {0}")]
    Persistence(#[from] UserStoreError),
    #[error("failed to render chart: {0}")]
    Render(#[from] RenderError),
}

impl From<LogStoreError> for BotError {
    fn from(err: LogStoreError) -> Self {
        BotError::Upstream(err.to_string())
    }
}

impl From<TransportError> for BotError {
    fn from(err: TransportError) -> Self {
        BotError::Upstream(err.to_string())
    }
}

impl From<RemoveUserError> for BotError {
    fn from(err: RemoveUserError) -> Self {
        match err {
            RemoveUserError::NotFound(validation) => BotError::Validation(validation),
            RemoveUserError::Store(store) => BotError::Persistence(store),
        }
    }
}
