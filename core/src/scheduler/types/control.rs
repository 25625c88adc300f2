//! Control flow types: conditions, exit reasons and handler outcomes

use super::super::errors::ErrorInfo;
use super::values::Val;
use serde::{Deserialize, Serialize};

/* ===================== Conditions ===================== */

/// Which handler kind sees a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionClass {
    /// Ordinary exception, seen by `catch`
    Exception,
    /// Control condition (warnings and friends), seen by `control`
    Control,
}

/// An exception or control condition in flight
///
/// Bound as the topic of `catch`/`control` callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub error: ErrorInfo,
    pub class: ConditionClass,
    /// Whether a handler may resume at the raise point
    pub resumable: bool,
    /// Set once handlers have been searched, so frames being unwound
    /// afterwards do not consult their handlers a second time
    #[serde(default)]
    pub dispatched: bool,
}

impl Condition {
    /// A resumable exception
    pub fn exception(error: ErrorInfo) -> Self {
        Self {
            error,
            class: ConditionClass::Exception,
            resumable: true,
            dispatched: false,
        }
    }

    pub fn fatal(error: ErrorInfo) -> Self {
        Self {
            resumable: false,
            ..Self::exception(error)
        }
    }

    /// A warning: a resumable control condition
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            error: ErrorInfo::new("Warning", message),
            class: ConditionClass::Control,
            resumable: true,
            dispatched: false,
        }
    }

    pub fn dispatched(mut self) -> Self {
        self.dispatched = true;
        self
    }
}

/* ===================== Exit ===================== */

/// Why a block is being left
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum ExitReason {
    /// Fell off the end of the body with this value
    Normal(Val),
    /// Loop iteration continued explicitly
    Next(Val),
    /// Loop terminated early
    Last(Val),
    /// A condition is propagating out of the block
    Unwound(Condition),
}

impl ExitReason {
    pub fn label(&self) -> &'static str {
        match self {
            ExitReason::Normal(_) => "normal",
            ExitReason::Next(_) => "via-next",
            ExitReason::Last(_) => "via-last",
            ExitReason::Unwound(_) => "exception-unwound",
        }
    }
}

/// Successful result of leaving a block
#[derive(Debug, Clone, PartialEq)]
pub enum ExitOutcome {
    /// The block was left with this value
    Left(Val),
    /// A handler resumed; the block is still active and execution continues
    /// at the raise point with this value
    Resumed(Val),
}

/* ===================== Handlers ===================== */

/// What a `catch`/`control` handler decided
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "kebab-case")]
pub enum HandlerOutcome {
    /// Continue at the raise point; the raise expression evaluates to the value
    Resume(Val),
    /// The condition is handled; the handler's block is left normally with the value
    Handled(Val),
    /// Not interested; the search continues outward
    Decline,
    /// Replace the condition with a new error and keep searching outward
    Rethrow(ErrorInfo),
}

/// Result of searching a frame chain for a handler
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// A handler resumed; no frame is unwound
    Resumed(Val),
    /// The frame at `depth` (index into the chain) handled the condition;
    /// every frame above it unwinds with `condition` and it is left with `value`
    HandledAt {
        depth: usize,
        value: Val,
        condition: Condition,
    },
    /// Nobody handled it; the whole chain unwinds with this condition
    Unhandled(Condition),
}
