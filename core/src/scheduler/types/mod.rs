//! Type definitions for the scheduler
//!
//! - Phase kinds (PhaseKind)
//! - Runtime values (Val)
//! - Control flow (Condition, ExitReason, HandlerOutcome)

pub mod control;
pub mod phase;
pub mod values;

pub use control::{Condition, ConditionClass, Dispatch, ExitOutcome, ExitReason, HandlerOutcome};
pub use phase::{FiringOrder, PhaseKind};
pub use values::Val;
