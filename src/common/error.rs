use std::time::Duration;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::session::SessionId;
use crate::sys::screen::DisplayId;

pub type WmResult<T> = Result<T, WmError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WmError {
    #[error("invalid session {id}: {reason}")]
    InvalidSession { id: SessionId, reason: String },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("required collaborator is missing: {0}")]
    NullReference(&'static str),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("synchronous task did not complete within {0:?}")]
    Timeout(Duration),
    #[error("operation already in progress: {0}")]
    RepeatOperation(String),
    #[error("session {0} was destroyed before the task ran")]
    Destroyed(SessionId),
    #[error("unknown display {0}")]
    InvalidDisplay(DisplayId),
}

impl WmError {
    pub fn invalid_session(id: SessionId, reason: impl Into<String>) -> Self {
        WmError::InvalidSession { id, reason: reason.into() }
    }

    pub fn invalid_parameter(reason: impl Into<String>) -> Self {
        WmError::InvalidParameter(reason.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            WmError::InvalidSession { .. } => ErrorCode::InvalidSession,
            WmError::InvalidParameter(_) => ErrorCode::InvalidParameter,
            WmError::NullReference(_) => ErrorCode::NullReference,
            WmError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            WmError::Timeout(_) => ErrorCode::Timeout,
            WmError::RepeatOperation(_) => ErrorCode::RepeatOperation,
            WmError::Destroyed(_) => ErrorCode::Destroyed,
            WmError::InvalidDisplay(_) => ErrorCode::InvalidDisplay,
        }
    }
}

/// Stable numeric result codes handed back across the client boundary.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, IntoPrimitive, TryFromPrimitive,
)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    InvalidSession = 1,
    InvalidParameter = 2,
    NullReference = 3,
    PermissionDenied = 4,
    Timeout = 5,
    RepeatOperation = 6,
    Destroyed = 7,
    InvalidDisplay = 8,
}

impl ErrorCode {
    /// Whether the caller may simply resubmit the same request later.
    pub fn is_retryable(self) -> bool { matches!(self, ErrorCode::Timeout) }

    pub fn of<T>(result: &WmResult<T>) -> ErrorCode {
        match result {
            Ok(_) => ErrorCode::Ok,
            Err(e) => e.code(),
        }
    }
}
