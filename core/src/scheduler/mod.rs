//! # Phase Scheduler
//!
//! Registers phasers against block activations and fires them at the right
//! transition points.
//!
//! ## Core Principles
//!
//! 1. **Closed phase set**: `PhaseKind` is an enum, every queue is reached by an exhaustive match
//! 2. **Explicit lifecycle**: each `BlockContext` moves through `ContextState` and rejects invalid moves
//! 3. **Two-phase conditions**: handlers are searched before anything unwinds, so a resume never sees LEAVE
//! 4. **Nothing ambient**: run-once values live in a `RunOnceCache` handed to the scheduler

pub mod callback;
pub mod context;
pub mod engine;
pub mod errors;
pub mod run_once;
pub mod supply;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export commonly used items
pub use callback::{Callback, PhaseCall, PhaseResult};
pub use context::{BlockContext, BlockId, BlockKind, ContextState, ExitStatus};
pub use engine::{PhaseScheduler, SchedulerSettings};
pub use errors::{ErrorInfo, PhaseError};
pub use run_once::{LifecycleStage, ProgramLifecycle, RunOnceCache, RunOnceKey};
pub use supply::{tap, ChainId, SupplyEvent, TapEnd, TapHandle, TapSummary, WheneverBlock};
pub use types::{
    Condition, ConditionClass, Dispatch, ExitOutcome, ExitReason, FiringOrder, HandlerOutcome, PhaseKind,
    Val,
};
