//! Unified error handling for Guardrail

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Closed taxonomy of pipeline failure codes.
///
/// Every failure a compiled action can report carries exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Auth step resolved no user
    AuthFailed,
    /// Schema step rejected the input
    ValidationError,
    /// Limiter denied the request
    RateLimited,
    /// CSRF token missing or mismatched
    CsrfFailed,
    /// Missing auth provider configuration, or an unexpected failure in the
    /// step chain or handler
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::CsrfFailed => "CSRF_FAILED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration errors raised at setup time, before any invocation.
///
/// These fail fast and loud; they are never silently swallowed per call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid rate limit window {0:?}: expected <positive integer> followed by s, m, h or d")]
    InvalidWindow(String),

    #[error("maxRequests must be at least 1")]
    InvalidMaxRequests,

    #[error("auth provider requires a signing secret or a session endpoint")]
    MissingAuthMode,
}

/// The only value a compiled action ever returns to its caller.
///
/// Internal errors never escape an action through any other channel; they are
/// normalized into the `Failure` case with a code from [`ErrorCode`].
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResult<T> {
    Success { data: T },
    Failure { error: String, code: ErrorCode },
}

impl<T> ActionResult<T> {
    pub fn success(data: T) -> Self {
        ActionResult::Success { data }
    }

    pub fn failure(code: ErrorCode, error: impl Into<String>) -> Self {
        ActionResult::Failure {
            error: error.into(),
            code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ActionResult::Success { .. })
    }

    /// Payload of the success case
    pub fn data(&self) -> Option<&T> {
        match self {
            ActionResult::Success { data } => Some(data),
            ActionResult::Failure { .. } => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            ActionResult::Success { data } => Some(data),
            ActionResult::Failure { .. } => None,
        }
    }

    /// Failure code, if this is a failure
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ActionResult::Success { .. } => None,
            ActionResult::Failure { code, .. } => Some(*code),
        }
    }

    /// Failure message, if this is a failure
    pub fn error(&self) -> Option<&str> {
        match self {
            ActionResult::Success { .. } => None,
            ActionResult::Failure { error, .. } => Some(error),
        }
    }
}

// Wire shape: {"success":true,"data":..} | {"success":false,"error":..,"code":..}
impl<T: Serialize> Serialize for ActionResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ActionResult::Success { data } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("success", &true)?;
                map.serialize_entry("data", data)?;
                map.end()
            }
            ActionResult::Failure { error, code } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("success", &false)?;
                map.serialize_entry("error", error)?;
                map.serialize_entry("code", code)?;
                map.end()
            }
        }
    }
}
