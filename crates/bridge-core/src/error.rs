//! Error types for the call bridge
//!
//! Every authority interaction that can fail resolves the originating
//! caller's outcome with one of these errors. None of them are fatal to the
//! process: the call simply fails to connect or end and the application
//! decides what to do next.

use thiserror::Error;

use crate::types::{ActionKind, CallIdentity, CallbackKind};

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur while coordinating calls
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// The authority refused a requested action outright
    #[error("Authority rejected {kind} for call {identity}: {reason}")]
    SubmissionRejected {
        kind: ActionKind,
        identity: CallIdentity,
        reason: String,
    },

    /// The authority refused to surface an incoming call
    #[error("Authority rejected incoming call report {identity}: {reason}")]
    IncomingReportRejected {
        identity: CallIdentity,
        reason: String,
    },

    /// The authority asked to perform an action nobody submitted
    #[error("Protocol mismatch for {kind} on call {identity}: {details}")]
    ProtocolMismatch {
        kind: ActionKind,
        identity: CallIdentity,
        details: String,
    },

    /// No application handler is registered for the callback
    #[error("No application handler registered for {callback}")]
    UnhandledCallback { callback: CallbackKind },

    /// The application handler reported failure
    #[error("Application declined {kind} for call {identity}")]
    HandlerDeclined {
        kind: ActionKind,
        identity: CallIdentity,
    },

    /// An action of the same kind is already outstanding for the call
    #[error("{kind} for call {identity} is already in flight")]
    ActionInFlight {
        kind: ActionKind,
        identity: CallIdentity,
    },

    /// A start submission is already outstanding
    #[error("Start for call {identity} is still outstanding")]
    StartInProgress { identity: CallIdentity },

    /// The call identity is not known to the bridge
    #[error("Call not found: {identity}")]
    CallNotFound { identity: CallIdentity },

    /// A buffered action was dropped because its call never came up
    #[error("{kind} for call {identity} discarded: {reason}")]
    Discarded {
        kind: ActionKind,
        identity: CallIdentity,
        reason: String,
    },

    /// The operation was cancelled by coordinator teardown
    #[error("{operation} for call {identity} was cancelled")]
    Cancelled {
        identity: CallIdentity,
        operation: &'static str,
    },

    /// The coordinator task is no longer running
    #[error("Call coordinator is not running")]
    CoordinatorStopped,

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BridgeError {
    /// Create a submission rejection
    pub fn rejected(kind: ActionKind, identity: CallIdentity, reason: impl Into<String>) -> Self {
        Self::SubmissionRejected {
            kind,
            identity,
            reason: reason.into(),
        }
    }

    /// Create a protocol mismatch
    pub fn mismatch(kind: ActionKind, identity: CallIdentity, details: impl Into<String>) -> Self {
        Self::ProtocolMismatch {
            kind,
            identity,
            details: details.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this failure was produced by teardown rather than the authority
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::CoordinatorStopped)
    }
}

/// Rejection returned by a [`TelephonyAuthority`](crate::authority::TelephonyAuthority)
/// when it refuses a request at the transport layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct AuthorityError {
    /// Why the authority refused
    pub reason: String,
}

impl AuthorityError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
