//! Phaser callbacks
//!
//! Callbacks never close over their block implicitly; whatever the declaring
//! closure captured is handed back explicitly through `PhaseCall::captured`.

use super::context::BlockId;
use super::errors::{ErrorInfo, CALLBACK_MISMATCH};
use super::types::{Condition, HandlerOutcome, PhaseKind, Val};
use std::fmt;
use std::sync::Arc;

/// Result of running a plain phaser
pub type PhaseResult = Result<Val, ErrorInfo>;

/// Invocation record passed to every callback
#[derive(Debug)]
pub struct PhaseCall<'a> {
    pub block: BlockId,
    pub kind: PhaseKind,
    /// Context captured by the declaring closure
    pub captured: &'a Val,
    /// POST: the block's exit value. async-quit: the quit error.
    pub topic: Option<&'a Val>,
}

type PhaseFn = dyn Fn(&PhaseCall<'_>) -> PhaseResult + Send + Sync;
type HandlerFn = dyn Fn(&Condition, &PhaseCall<'_>) -> HandlerOutcome + Send + Sync;

/// A registered phaser body
#[derive(Clone)]
pub enum Callback {
    /// Argumentless phaser (everything but catch/control)
    Phase(Arc<PhaseFn>),
    /// catch/control handler, receives the condition as topic
    Handler(Arc<HandlerFn>),
}

impl Callback {
    pub fn phase<F>(f: F) -> Self
    where
        F: Fn(&PhaseCall<'_>) -> PhaseResult + Send + Sync + 'static,
    {
        Callback::Phase(Arc::new(f))
    }

    pub fn handler<F>(f: F) -> Self
    where
        F: Fn(&Condition, &PhaseCall<'_>) -> HandlerOutcome + Send + Sync + 'static,
    {
        Callback::Handler(Arc::new(f))
    }

    /// Whether this callback shape may be bound to `kind`
    pub fn fits(&self, kind: PhaseKind) -> bool {
        match self {
            Callback::Phase(_) => !kind.is_handler(),
            Callback::Handler(_) => kind.is_handler(),
        }
    }

    pub(crate) fn invoke(&self, call: &PhaseCall<'_>) -> PhaseResult {
        match self {
            Callback::Phase(f) => f(call),
            Callback::Handler(_) => Err(ErrorInfo::new(
                CALLBACK_MISMATCH,
                format!("handler invoked as a {} phaser", call.kind.keyword()),
            )),
        }
    }

    pub(crate) fn invoke_handler(&self, condition: &Condition, call: &PhaseCall<'_>) -> HandlerOutcome {
        match self {
            Callback::Handler(f) => f(condition, call),
            Callback::Phase(_) => HandlerOutcome::Decline,
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Phase(_) => f.write_str("Callback::Phase(..)"),
            Callback::Handler(_) => f.write_str("Callback::Handler(..)"),
        }
    }
}
