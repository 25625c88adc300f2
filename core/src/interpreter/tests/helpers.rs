//! Test helpers for interpreter tests
//!
//! Programs are written as JSON literals and run on a fresh scheduler

use crate::interpreter::{Program, RunReport, Vm};
use crate::scheduler::{PhaseScheduler, RunOnceCache};
use std::sync::Arc;

pub fn program(json: &str) -> Program {
    serde_json::from_str(json).expect("Program deserialization failed")
}

/// Run with a generous depth limit
pub fn run(json: &str) -> RunReport {
    run_with_depth(json, 64)
}

pub fn run_with_depth(json: &str, max_depth: usize) -> RunReport {
    let scheduler = Arc::new(PhaseScheduler::new(Arc::new(RunOnceCache::new())));
    let mut vm = Vm::new(scheduler, max_depth);
    let report = vm.run(&program(json)).expect("Program validation failed");
    assert_eq!(vm.depth(), 0, "every frame is popped after a run");
    report
}
