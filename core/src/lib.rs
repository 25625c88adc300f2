pub mod cli;
pub mod config;
pub mod init;
pub mod interpreter;
pub mod scheduler;

// Re-export main types
pub use scheduler::{
    BlockContext, BlockId, BlockKind, Callback, Condition, ConditionClass, ErrorInfo, ExitReason,
    HandlerOutcome, PhaseError, PhaseKind, PhaseScheduler, ProgramLifecycle, RunOnceCache, Val,
};

// Re-export init API for convenience
pub use init::{initialize, InitBuilder, InitOptions, Runtime};
