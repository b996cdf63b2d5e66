//! Caller-facing error categories for the plugin RPC surface.
//!
//! Every error that crosses the orchestrator boundary carries a
//! [`RpcErrorCode`] chosen deterministically from the taxonomy class of the
//! underlying failure: request-validation errors become `InvalidArgument`,
//! missing resources become `NotFound`, precondition violations become
//! `FailedPrecondition`, exhausted retry budgets become `Internal`, and
//! intentionally absent methods become `Unimplemented`.

use std::fmt;

use thiserror::Error;

/// Category attached to every error returned to the orchestrator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RpcErrorCode {
    /// The request carried malformed, missing, or unsupported fields.
    InvalidArgument,
    /// The addressed resource does not exist.
    NotFound,
    /// A resource with the requested name exists with incompatible attributes.
    AlreadyExists,
    /// The request conflicts with backend pagination or listing state.
    Aborted,
    /// Backend state violates a precondition of the operation.
    FailedPrecondition,
    /// The operation failed after exhausting all recovery options.
    Internal,
    /// The method is intentionally not provided by this plugin.
    Unimplemented,
}

impl fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::InvalidArgument => "invalid argument",
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::Aborted => "aborted",
            Self::FailedPrecondition => "failed precondition",
            Self::Internal => "internal",
            Self::Unimplemented => "unimplemented",
        };
        f.write_str(text)
    }
}

/// Error returned across the orchestrator-facing boundary.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{code}: {message}")]
pub struct RpcError {
    /// Deterministic category for the failure.
    pub code: RpcErrorCode,
    /// Human-readable description of what went wrong.
    pub message: String,
}

impl RpcError {
    /// Constructs an error with the given code and message.
    #[must_use]
    pub fn new(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Constructs an `InvalidArgument` error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::InvalidArgument, message)
    }

    /// Constructs a `NotFound` error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::NotFound, message)
    }

    /// Constructs an `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::AlreadyExists, message)
    }

    /// Constructs an `Aborted` error.
    #[must_use]
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Aborted, message)
    }

    /// Constructs a `FailedPrecondition` error.
    #[must_use]
    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::FailedPrecondition, message)
    }

    /// Constructs an `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Internal, message)
    }

    /// Constructs the fixed signal for a method that is out of scope for
    /// this plugin.
    #[must_use]
    pub fn unimplemented(method: &str) -> Self {
        Self::new(
            RpcErrorCode::Unimplemented,
            format!("method {method} is not implemented by this plugin"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_message() {
        let err = RpcError::invalid_argument("volume name is empty");
        assert_eq!(err.to_string(), "invalid argument: volume name is empty");
    }

    #[test]
    fn unimplemented_names_the_method() {
        let err = RpcError::unimplemented("CreateSnapshot");
        assert_eq!(err.code, RpcErrorCode::Unimplemented);
        assert!(err.message.contains("CreateSnapshot"));
    }
}
