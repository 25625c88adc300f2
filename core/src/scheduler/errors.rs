//! Error codes and error types
//!
//! `ErrorInfo` is the payload that travels inside a program (what a phaser
//! raises, what a handler sees as its topic). `PhaseError` is what the
//! scheduler hands back to its caller.

use super::context::{BlockId, ContextState};
use super::types::PhaseKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/* ===================== Error Codes ===================== */

pub const PRECONDITION_FAILED: &str = "PreconditionFailed";
pub const POSTCONDITION_FAILED: &str = "PostconditionFailed";
pub const NOT_RESUMABLE: &str = "NotResumable";
pub const AGGREGATE: &str = "Aggregate";
pub const INVALID_TRANSITION: &str = "InvalidTransition";
pub const CALLBACK_MISMATCH: &str = "CallbackMismatch";
pub const KIND_NOT_ALLOWED: &str = "KindNotAllowed";
pub const DEPTH_EXCEEDED: &str = "DepthExceeded";
pub const SUPPLY_QUIT: &str = "SupplyQuit";
pub const TAP_ABORTED: &str = "TapAborted";
pub const UNCAUGHT_CONTROL: &str = "UncaughtControl";

/* ===================== ErrorInfo ===================== */

/// An error value as seen from inside a program
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/* ===================== PhaseError ===================== */

/// Failure surfaced by the scheduler
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PhaseError {
    /// A callback or the block body raised
    #[error("{0}")]
    Raised(ErrorInfo),

    /// A pre-condition returned a false value; the block was never entered
    #[error("pre-condition #{index} of block {block} failed")]
    PreconditionFailed { block: BlockId, index: usize },

    /// A post-condition returned a false value
    #[error("post-condition #{index} of block {block} failed")]
    PostconditionFailed { block: BlockId, index: usize },

    /// Several failures collected while one block was being left
    #[error("{} failures while leaving block {block}: {}", .failures.len(), join_failures(.failures))]
    Aggregate {
        block: BlockId,
        failures: Vec<PhaseError>,
    },

    #[error("block {block} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        block: BlockId,
        from: ContextState,
        to: ContextState,
    },

    /// catch/control need a handler callback, every other kind a plain one
    #[error("callback shape does not match phase {kind}")]
    CallbackMismatch { kind: PhaseKind },

    #[error("phase {kind} cannot be used here: {reason}")]
    KindNotAllowed {
        kind: PhaseKind,
        reason: &'static str,
    },

    #[error("block nesting exceeds the limit of {limit}")]
    DepthExceeded { limit: usize },
}

fn join_failures(failures: &[PhaseError]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl PhaseError {
    /// Error code as seen from inside a program
    pub fn code(&self) -> &str {
        match self {
            PhaseError::Raised(info) => &info.code,
            PhaseError::PreconditionFailed { .. } => PRECONDITION_FAILED,
            PhaseError::PostconditionFailed { .. } => POSTCONDITION_FAILED,
            PhaseError::Aggregate { .. } => AGGREGATE,
            PhaseError::InvalidTransition { .. } => INVALID_TRANSITION,
            PhaseError::CallbackMismatch { .. } => CALLBACK_MISMATCH,
            PhaseError::KindNotAllowed { .. } => KIND_NOT_ALLOWED,
            PhaseError::DepthExceeded { .. } => DEPTH_EXCEEDED,
        }
    }

    /// Constituent failures; a non-aggregate error is its own only member
    pub fn failures(&self) -> &[PhaseError] {
        match self {
            PhaseError::Aggregate { failures, .. } => failures,
            other => std::slice::from_ref(other),
        }
    }

    /// Every failure with nested aggregates expanded
    pub fn flatten(&self) -> Vec<&PhaseError> {
        match self {
            PhaseError::Aggregate { failures, .. } => {
                failures.iter().flat_map(|f| f.flatten()).collect()
            }
            other => vec![other],
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, PhaseError::Aggregate { .. })
    }

    /// Convert to an in-program error value so it can be caught again
    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            PhaseError::Raised(info) => info.clone(),
            other => ErrorInfo::new(other.code(), other.to_string()),
        }
    }
}

impl From<ErrorInfo> for PhaseError {
    fn from(info: ErrorInfo) -> Self {
        PhaseError::Raised(info)
    }
}
