//! Test helpers for scheduler tests
//!
//! Callbacks that append a label to a shared log, so tests can assert on
//! firing order.

use crate::scheduler::{
    Callback, ErrorInfo, HandlerOutcome, PhaseScheduler, RunOnceCache, SchedulerSettings, Val,
};
use parking_lot::Mutex;
use std::sync::Arc;

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

/// Scheduler with a fresh run-once cache
pub fn scheduler() -> PhaseScheduler {
    PhaseScheduler::new(Arc::new(RunOnceCache::new()))
}

pub fn scheduler_without_collapse() -> PhaseScheduler {
    PhaseScheduler::with_settings(
        Arc::new(RunOnceCache::new()),
        SchedulerSettings {
            collapse_single_failure: false,
        },
    )
}

/// Logs `label` and returns true (so it also passes as PRE/POST)
pub fn record(log: &Log, label: &str) -> Callback {
    record_value(log, label, Val::Bool(true))
}

pub fn record_value(log: &Log, label: &str, value: Val) -> Callback {
    let log = log.clone();
    let label = label.to_string();
    Callback::phase(move |_| {
        log.lock().push(label.clone());
        Ok(value.clone())
    })
}

/// Logs `label` and raises an error with code `code`
pub fn raise(log: &Log, label: &str, code: &str) -> Callback {
    let log = log.clone();
    let label = label.to_string();
    let code = code.to_string();
    Callback::phase(move |_| {
        log.lock().push(label.clone());
        Err(ErrorInfo::new(code.clone(), format!("{} failed", label)))
    })
}

/// Handler that logs `label` plus the condition code and answers `outcome`
pub fn handler(log: &Log, label: &str, outcome: HandlerOutcome) -> Callback {
    let log = log.clone();
    let label = label.to_string();
    Callback::handler(move |condition, _| {
        log.lock().push(format!("{}:{}", label, condition.error.code));
        outcome.clone()
    })
}

pub fn error(code: &str) -> ErrorInfo {
    ErrorInfo::new(code, format!("{} raised", code))
}
