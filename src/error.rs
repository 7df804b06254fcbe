use crate::types::TradeStatus;
use sled::transaction::TransactionError;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TradeError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Trade is {current}, cannot {action}")]
    InvalidState {
        current: TradeStatus,
        action: &'static str,
    },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Missing or unknown user identity")]
    Unauthenticated,
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Encoding error: {0}")]
    Codec(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TradeError {
    /// Stable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TradeError::NotFound(_) => "NOT_FOUND",
            TradeError::Forbidden(_) => "FORBIDDEN",
            TradeError::InvalidState { .. } => "INVALID_STATE",
            TradeError::InvalidRequest(_) => "INVALID_REQUEST",
            TradeError::Conflict(_) => "CONFLICT",
            TradeError::Unauthenticated => "UNAUTHENTICATED",
            TradeError::Storage(_) => "STORAGE_ERROR",
            TradeError::Codec(_) => "CODEC_ERROR",
            TradeError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            TradeError::NotFound(_) => 404,
            TradeError::Forbidden(_) => 403,
            TradeError::InvalidRequest(_) => 400,
            TradeError::InvalidState { .. } | TradeError::Conflict(_) => 409,
            TradeError::Unauthenticated => 401,
            TradeError::Storage(_) | TradeError::Codec(_) | TradeError::Internal(_) => 500,
        }
    }

    pub(crate) fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        TradeError::NotFound(format!("{kind} {id}"))
    }
}

impl From<sled::Error> for TradeError {
    fn from(e: sled::Error) -> Self {
        TradeError::Storage(e.to_string())
    }
}

impl From<TransactionError<TradeError>> for TradeError {
    fn from(e: TransactionError<TradeError>) -> Self {
        match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => e.into(),
        }
    }
}

impl From<minicbor::decode::Error> for TradeError {
    fn from(e: minicbor::decode::Error) -> Self {
        TradeError::Codec(e.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for TradeError {
    fn from(e: minicbor::encode::Error<E>) -> Self {
        TradeError::Codec(e.to_string())
    }
}

impl From<anyhow::Error> for TradeError {
    fn from(e: anyhow::Error) -> Self {
        TradeError::Internal(e.to_string())
    }
}
