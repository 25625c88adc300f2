//! Run-once phases
//!
//! BEGIN, CHECK, INIT and END fire at most once per process. Their values live
//! in a `RunOnceCache`, which is created explicitly, shared by reference and
//! torn down at process exit. `ProgramLifecycle` queues them for a program and
//! fires each queue at the right moment and in the right direction. Several
//! lifecycles may share one cache: each holds the keys it declared, and a key
//! is only forgotten once nobody holds it.

use super::callback::{Callback, PhaseCall, PhaseResult};
use super::context::BlockId;
use super::engine::PhaseScheduler;
use super::errors::PhaseError;
use super::types::{PhaseKind, Val};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/* ===================== Cache ===================== */

/// Identity of a run-once phaser: its kind and the site that declared it.
///
/// Clones of a closure share the site, so they share the cached value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunOnceKey {
    pub kind: PhaseKind,
    pub site: String,
}

impl RunOnceKey {
    pub fn new(kind: PhaseKind, site: impl Into<String>) -> Self {
        Self {
            kind,
            site: site.into(),
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    cell: Arc<OnceLock<PhaseResult>>,
    holders: usize,
}

/// Process-scoped store of run-once values
#[derive(Debug, Default)]
pub struct RunOnceCache {
    slots: Mutex<HashMap<RunOnceKey, Slot>>,
    invocations: AtomicUsize,
}

impl RunOnceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached result for `key`, running `fire` if nothing is cached.
    ///
    /// Concurrent callers for the same key block until the first one finishes;
    /// `fire` runs exactly once. A failure is cached like a value. `fire` must
    /// not re-enter the cache with the same key.
    pub fn get_or_fire<F>(&self, key: RunOnceKey, fire: F) -> PhaseResult
    where
        F: FnOnce() -> PhaseResult,
    {
        let slot = {
            let mut slots = self.slots.lock();
            slots.entry(key).or_default().cell.clone()
        };
        slot.get_or_init(|| {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            fire()
        })
        .clone()
    }

    pub fn get(&self, key: &RunOnceKey) -> Option<PhaseResult> {
        let slot = self.slots.lock().get(key).map(|slot| slot.cell.clone())?;
        slot.get().cloned()
    }

    /// Keep `key` alive until a matching `release`
    pub fn retain(&self, key: &RunOnceKey) {
        self.slots.lock().entry(key.clone()).or_default().holders += 1;
    }

    /// Drop one hold on `key`; the value is forgotten when no holds remain.
    ///
    /// Returns whether the value was forgotten.
    pub fn release(&self, key: &RunOnceKey) -> bool {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(key) else {
            return false;
        };
        slot.holders = slot.holders.saturating_sub(1);
        if slot.holders > 0 {
            return false;
        }
        slots.remove(key);
        true
    }

    /// Number of lifecycles currently holding `key`
    pub fn holders(&self, key: &RunOnceKey) -> usize {
        self.slots.lock().get(key).map_or(0, |slot| slot.holders)
    }

    pub fn is_fired(&self, key: &RunOnceKey) -> bool {
        self.get(key).is_some()
    }

    /// Number of callbacks actually run through this cache
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached value, held or not. Process exit only.
    pub fn teardown(&self) {
        let dropped = self.slots.lock().drain().count();
        tracing::debug!(dropped, "run-once cache torn down");
    }
}

/* ===================== Program Lifecycle ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStage {
    Compiling,
    Compiled,
    Running,
    ShutDown,
}

#[derive(Debug, Clone)]
struct Queued {
    site: String,
    callback: Callback,
}

/// Program-level BEGIN/CHECK/INIT/END queues
#[derive(Debug)]
pub struct ProgramLifecycle {
    scheduler: Arc<PhaseScheduler>,
    stage: LifecycleStage,
    checks: Vec<Queued>,
    inits: Vec<Queued>,
    ends: Vec<Queued>,
    held: HashSet<RunOnceKey>,
}

impl ProgramLifecycle {
    pub fn new(scheduler: Arc<PhaseScheduler>) -> Self {
        Self {
            scheduler,
            stage: LifecycleStage::Compiling,
            checks: Vec::new(),
            inits: Vec::new(),
            ends: Vec::new(),
            held: HashSet::new(),
        }
    }

    pub fn stage(&self) -> LifecycleStage {
        self.stage
    }

    /// Declare a run-once phaser.
    ///
    /// BEGIN fires on the spot and its value is returned. INIT declared after
    /// `start` also fires on the spot. Everything else is queued.
    pub fn declare(
        &mut self,
        kind: PhaseKind,
        site: impl Into<String>,
        callback: Callback,
    ) -> Result<Option<Val>, PhaseError> {
        let site = site.into();
        if kind.is_run_once() {
            self.hold(RunOnceKey::new(kind, site.as_str()));
        }
        match kind {
            PhaseKind::CompileBegin => self.scheduler.fire_once(kind, &site, &callback).map(Some),
            PhaseKind::CompileCheck => {
                if self.stage != LifecycleStage::Compiling {
                    return Err(PhaseError::KindNotAllowed {
                        kind,
                        reason: "compilation has already finished",
                    });
                }
                self.checks.push(Queued { site, callback });
                Ok(None)
            }
            PhaseKind::RuntimeInit => {
                if self.stage == LifecycleStage::Running {
                    return self.scheduler.fire_once(kind, &site, &callback).map(Some);
                }
                self.inits.push(Queued { site, callback });
                Ok(None)
            }
            PhaseKind::RuntimeEnd => {
                if self.stage == LifecycleStage::ShutDown {
                    return Err(PhaseError::KindNotAllowed {
                        kind,
                        reason: "the program has already shut down",
                    });
                }
                self.ends.push(Queued { site, callback });
                Ok(None)
            }
            _ => Err(PhaseError::KindNotAllowed {
                kind,
                reason: "only run-once phases belong to the program lifecycle",
            }),
        }
    }

    /// End of compilation: CHECK phasers, last declared first
    pub fn finish_compile(&mut self) -> Result<(), PhaseError> {
        self.expect_stage(LifecycleStage::Compiling, PhaseKind::CompileCheck)?;
        for queued in std::mem::take(&mut self.checks).iter().rev() {
            self.scheduler
                .fire_once(PhaseKind::CompileCheck, &queued.site, &queued.callback)?;
        }
        self.stage = LifecycleStage::Compiled;
        Ok(())
    }

    /// Start of runtime: INIT phasers in declaration order
    pub fn start(&mut self) -> Result<(), PhaseError> {
        if self.stage == LifecycleStage::Compiling {
            self.finish_compile()?;
        }
        self.expect_stage(LifecycleStage::Compiled, PhaseKind::RuntimeInit)?;
        self.stage = LifecycleStage::Running;
        for queued in std::mem::take(&mut self.inits) {
            self.scheduler
                .fire_once(PhaseKind::RuntimeInit, &queued.site, &queued.callback)?;
        }
        Ok(())
    }

    /// End of runtime: END phasers, last declared first.
    ///
    /// Every END runs even when an earlier one fails; failures are returned
    /// together. Afterwards the lifecycle lets go of every key it declared;
    /// keys still held by another lifecycle keep their values.
    pub fn shutdown(&mut self) -> Result<(), PhaseError> {
        if self.stage == LifecycleStage::ShutDown {
            return Ok(());
        }
        self.stage = LifecycleStage::ShutDown;

        let mut failures = Vec::new();
        for queued in std::mem::take(&mut self.ends).iter().rev() {
            if let Err(err) =
                self.scheduler
                    .fire_once(PhaseKind::RuntimeEnd, &queued.site, &queued.callback)
            {
                tracing::warn!(site = %queued.site, error = %err, "END phaser failed");
                failures.push(err);
            }
        }
        self.release_all();

        match failures.len() {
            0 => Ok(()),
            1 if self.scheduler.settings().collapse_single_failure => Err(failures.remove(0)),
            _ => Err(PhaseError::Aggregate {
                block: BlockId::PROGRAM,
                failures,
            }),
        }
    }

    /// Value cached for a run-once phaser, if it has fired
    pub fn value(&self, kind: PhaseKind, site: &str) -> Option<PhaseResult> {
        self.scheduler.cache().get(&RunOnceKey::new(kind, site))
    }

    fn hold(&mut self, key: RunOnceKey) {
        if !self.held.contains(&key) {
            self.scheduler.cache().retain(&key);
            self.held.insert(key);
        }
    }

    fn release_all(&mut self) {
        let cache = self.scheduler.cache();
        let forgotten = self.held.drain().filter(|key| cache.release(key)).count();
        tracing::debug!(forgotten, "program lifecycle released its run-once values");
    }

    fn expect_stage(&self, expected: LifecycleStage, kind: PhaseKind) -> Result<(), PhaseError> {
        if self.stage != expected {
            return Err(PhaseError::KindNotAllowed {
                kind,
                reason: "program lifecycle is out of order",
            });
        }
        Ok(())
    }
}

/// Run a run-once callback outside of any block
pub(crate) fn invoke_program_phase(kind: PhaseKind, callback: &Callback) -> PhaseResult {
    let captured = Val::Null;
    let call = PhaseCall {
        block: BlockId::PROGRAM,
        kind,
        captured: &captured,
        topic: None,
    };
    callback.invoke(&call)
}
