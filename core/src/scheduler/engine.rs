//! The phase scheduler
//!
//! Fires registered phasers around block entry and exit and decides what
//! happens to conditions in flight.
//!
//! ## Firing order around one block
//!
//! 1. `pre-condition` (declaration order; the first failure aborts entry)
//! 2. `loop-first` (first iteration only)
//! 3. `block-enter`
//! 4. body
//! 5. `catch` / `control` (only for a condition not yet dispatched)
//! 6. `loop-next`
//! 7. leave queue: `block-leave` with `block-keep` or `block-undo`
//! 8. `loop-last`
//! 9. `post-condition`
//!
//! Steps 6–9 are finalizing and run last-declared first. A failure in any of
//! them does not stop the remaining ones; failures are collected and
//! surfaced together once the block has been left.

use super::callback::{Callback, PhaseCall, PhaseResult};
use super::context::{BlockContext, BlockKind, ContextState, ExitStatus, Registration};
use super::errors::{self, ErrorInfo, PhaseError};
use super::run_once::{invoke_program_phase, RunOnceCache, RunOnceKey};
use super::types::{
    Condition, ConditionClass, Dispatch, ExitOutcome, ExitReason, FiringOrder, HandlerOutcome,
    PhaseKind, Val,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Tunables for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// A lone secondary failure (no original exception) surfaces as itself
    /// rather than as a one-element aggregate
    pub collapse_single_failure: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            collapse_single_failure: true,
        }
    }
}

/// How the body finished, after handlers had their say
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Next,
    Last,
    Unwinding,
}

/// Drives phasers for any number of block activations
#[derive(Debug)]
pub struct PhaseScheduler {
    settings: SchedulerSettings,
    cache: Arc<RunOnceCache>,
}

impl PhaseScheduler {
    pub fn new(cache: Arc<RunOnceCache>) -> Self {
        Self::with_settings(cache, SchedulerSettings::default())
    }

    pub fn with_settings(cache: Arc<RunOnceCache>, settings: SchedulerSettings) -> Self {
        Self { settings, cache }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<RunOnceCache> {
        &self.cache
    }

    /* ===================== Registration ===================== */

    /// Bind `callback` to `kind` on a block that has not been entered yet
    pub fn register(
        &self,
        ctx: &mut BlockContext,
        kind: PhaseKind,
        callback: Callback,
    ) -> Result<(), PhaseError> {
        if kind.is_run_once() {
            return Err(PhaseError::KindNotAllowed {
                kind,
                reason: "run-once phases are fired through the run-once cache",
            });
        }
        if !callback.fits(kind) {
            return Err(PhaseError::CallbackMismatch { kind });
        }
        if kind.is_async() && ctx.kind() != BlockKind::Async {
            return Err(PhaseError::KindNotAllowed {
                kind,
                reason: "only valid inside an asynchronous handler block",
            });
        }
        if kind.is_loop() && !ctx.is_loop_iteration() {
            return Err(PhaseError::KindNotAllowed {
                kind,
                reason: "only valid inside a loop body",
            });
        }
        if ctx.state() != ContextState::Created {
            return Err(PhaseError::KindNotAllowed {
                kind,
                reason: "the block has already been entered",
            });
        }

        debug!(block = %ctx.id(), phase = %kind, "registering phaser");
        ctx.push_registration(kind, callback);
        Ok(())
    }

    /* ===================== Run-once ===================== */

    /// Fire a run-once phaser, or return its cached value
    pub fn fire_once(&self, kind: PhaseKind, site: &str, callback: &Callback) -> Result<Val, PhaseError> {
        if !kind.is_run_once() {
            return Err(PhaseError::KindNotAllowed {
                kind,
                reason: "not a run-once phase",
            });
        }
        if !callback.fits(kind) {
            return Err(PhaseError::CallbackMismatch { kind });
        }
        self.cache
            .get_or_fire(RunOnceKey::new(kind, site), || {
                debug!(phase = %kind, site, "firing run-once phaser");
                invoke_program_phase(kind, callback)
            })
            .map_err(PhaseError::Raised)
    }

    /* ===================== Entry ===================== */

    /// Enter a block: pre-conditions, then FIRST on a first iteration, then ENTER.
    ///
    /// On failure the context ends up `EntryAborted` and owes no leave phases.
    pub fn enter_block(&self, ctx: &mut BlockContext) -> Result<(), PhaseError> {
        ctx.transition(ContextState::Entering)?;
        debug!(block = %ctx.id(), name = ctx.name(), "entering block");

        for (index, reg) in ordered(ctx, PhaseKind::PreCondition).iter().enumerate() {
            let failure = match self.fire(ctx, reg, None) {
                Ok(v) if v.is_truthy() => continue,
                Ok(_) => PhaseError::PreconditionFailed {
                    block: ctx.id(),
                    index,
                },
                Err(err) => PhaseError::Raised(err),
            };
            warn!(block = %ctx.id(), index, "pre-condition failed");
            ctx.mark_pre_failed();
            return self.abort_entry(ctx, failure);
        }

        if ctx.is_first_iteration() {
            for reg in ordered(ctx, PhaseKind::LoopFirst) {
                if let Err(err) = self.fire(ctx, &reg, None) {
                    return self.abort_entry(ctx, PhaseError::Raised(err));
                }
            }
        }

        for reg in ordered(ctx, PhaseKind::BlockEnter) {
            if let Err(err) = self.fire(ctx, &reg, None) {
                return self.abort_entry(ctx, PhaseError::Raised(err));
            }
        }

        ctx.transition(ContextState::Active)
    }

    fn abort_entry(&self, ctx: &mut BlockContext, failure: PhaseError) -> Result<(), PhaseError> {
        ctx.transition(ContextState::EntryAborted)?;
        debug!(block = %ctx.id(), error = %failure, "entry aborted");
        Err(failure)
    }

    /* ===================== Handlers ===================== */

    /// Ask one block's handlers about a condition.
    ///
    /// Exceptions go to `catch`, control conditions to `control`. The first
    /// handler that does not decline decides.
    pub fn handle(&self, ctx: &BlockContext, condition: &Condition) -> HandlerOutcome {
        let kind = match condition.class {
            ConditionClass::Exception => PhaseKind::Catch,
            ConditionClass::Control => PhaseKind::Control,
        };

        for reg in ctx.registrations(kind) {
            let call = PhaseCall {
                block: ctx.id(),
                kind,
                captured: ctx.captured(),
                topic: None,
            };
            debug!(block = %ctx.id(), phase = %kind, code = %condition.error.code, "invoking handler");
            match reg.callback.invoke_handler(condition, &call) {
                HandlerOutcome::Decline => continue,
                HandlerOutcome::Resume(_) if !condition.resumable => {
                    return HandlerOutcome::Rethrow(ErrorInfo::new(
                        errors::NOT_RESUMABLE,
                        format!("cannot resume {}", condition.error),
                    ));
                }
                outcome => return outcome,
            }
        }
        HandlerOutcome::Decline
    }

    /// Search a chain of active frames (outermost first) for a handler,
    /// innermost frame first, before anything is unwound.
    ///
    /// A rethrow replaces the condition and the search goes on outward.
    pub fn dispatch(&self, frames: &mut [BlockContext], condition: Condition) -> Dispatch {
        let mut condition = condition;
        for depth in (0..frames.len()).rev() {
            let ctx = &mut frames[depth];
            if ctx.state() != ContextState::Active {
                continue;
            }
            match self.handle(ctx, &condition) {
                HandlerOutcome::Decline => continue,
                HandlerOutcome::Resume(value) => {
                    debug!(block = %ctx.id(), "condition resumed");
                    ctx.set_status(ExitStatus::ExceptionalResumed);
                    return Dispatch::Resumed(value);
                }
                HandlerOutcome::Handled(value) => {
                    debug!(block = %ctx.id(), depth, "condition handled");
                    return Dispatch::HandledAt {
                        depth,
                        value,
                        condition: condition.dispatched(),
                    };
                }
                HandlerOutcome::Rethrow(error) => {
                    debug!(block = %ctx.id(), code = %error.code, "condition rethrown");
                    condition = Condition::exception(error);
                }
            }
        }
        Dispatch::Unhandled(condition.dispatched())
    }

    /* ===================== Async ===================== */

    /// Fire the LAST/QUIT/CLOSE phasers of an active asynchronous handler block.
    ///
    /// Every phaser of the kind runs; failures come back together.
    pub fn fire_async(
        &self,
        ctx: &mut BlockContext,
        kind: PhaseKind,
        topic: Option<&Val>,
    ) -> Result<(), PhaseError> {
        if !kind.is_async() {
            return Err(PhaseError::KindNotAllowed {
                kind,
                reason: "not an asynchronous phase",
            });
        }
        if ctx.state() != ContextState::Active {
            return Err(PhaseError::KindNotAllowed {
                kind,
                reason: "the handler block is not active",
            });
        }
        let mut failures: Vec<PhaseError> = ordered(ctx, kind)
            .iter()
            .filter_map(|reg| self.fire(ctx, reg, topic).err())
            .map(PhaseError::Raised)
            .collect();
        match failures.len() {
            0 => Ok(()),
            1 if self.settings.collapse_single_failure => Err(failures.remove(0)),
            _ => Err(PhaseError::Aggregate {
                block: ctx.id(),
                failures,
            }),
        }
    }

    /* ===================== Exit ===================== */

    /// Leave a block.
    ///
    /// Returns `Resumed` if a handler of this block resumed an undispatched
    /// condition (the block stays active). Otherwise every leave obligation is
    /// discharged before anything is returned; the original exception and
    /// every failure collected on the way out come back together.
    pub fn exit_block(&self, ctx: &mut BlockContext, reason: ExitReason) -> Result<ExitOutcome, PhaseError> {
        ctx.transition(ContextState::Exiting)?;
        debug!(block = %ctx.id(), reason = reason.label(), "leaving block");

        let (flow, value, original) = match reason {
            ExitReason::Normal(v) => (Flow::Normal, v, None),
            ExitReason::Next(v) => (Flow::Next, v, None),
            ExitReason::Last(v) => (Flow::Last, v, None),
            ExitReason::Unwound(condition) if condition.dispatched => (
                Flow::Unwinding,
                Val::Null,
                Some(PhaseError::Raised(condition.error)),
            ),
            ExitReason::Unwound(condition) => match self.handle(ctx, &condition) {
                HandlerOutcome::Resume(v) => {
                    ctx.set_status(ExitStatus::ExceptionalResumed);
                    ctx.transition(ContextState::Active)?;
                    return Ok(ExitOutcome::Resumed(v));
                }
                HandlerOutcome::Handled(v) => (Flow::Normal, v, None),
                HandlerOutcome::Decline => (
                    Flow::Unwinding,
                    Val::Null,
                    Some(PhaseError::Raised(condition.error)),
                ),
                HandlerOutcome::Rethrow(err) => (Flow::Unwinding, Val::Null, Some(PhaseError::Raised(err))),
            },
        };

        if original.is_some() {
            ctx.set_status(ExitStatus::ExceptionalUnwound);
            ctx.transition(ContextState::UnwindAccumulating)?;
        } else {
            ctx.set_status(ExitStatus::Normal);
        }

        if ctx.is_loop_iteration() && matches!(flow, Flow::Normal | Flow::Next) {
            for reg in ordered(ctx, PhaseKind::LoopNext) {
                self.discharge(ctx, &reg, &value)?;
            }
        }

        let succeeded = original.is_none() && value.is_defined();
        let mut leave_queue: Vec<Registration> = ctx.leave_queue().cloned().collect();
        leave_queue.reverse();
        for reg in leave_queue {
            let due = match reg.kind {
                PhaseKind::BlockKeep => succeeded,
                PhaseKind::BlockUndo => !succeeded,
                _ => true,
            };
            if due {
                self.discharge(ctx, &reg, &value)?;
            }
        }

        let loop_finished = flow == Flow::Last
            || (ctx.is_final_iteration() && matches!(flow, Flow::Normal | Flow::Next));
        if ctx.is_loop_iteration() && loop_finished {
            for reg in ordered(ctx, PhaseKind::LoopLast) {
                self.discharge(ctx, &reg, &value)?;
            }
        }

        if !ctx.pre_failed() {
            let posts: Vec<Registration> = ctx.registrations(PhaseKind::PostCondition).cloned().collect();
            for (index, reg) in posts.iter().enumerate().rev() {
                match self.fire(ctx, reg, Some(&value)) {
                    Ok(v) if v.is_truthy() => {}
                    Ok(_) => {
                        let block = ctx.id();
                        self.collect(ctx, PhaseError::PostconditionFailed { block, index })?;
                    }
                    Err(err) => self.collect(ctx, PhaseError::Raised(err))?,
                }
            }
        }

        let mut secondary = ctx.take_accumulated();
        ctx.transition(ContextState::Left)?;

        match (original, secondary.len()) {
            (None, 0) => Ok(ExitOutcome::Left(value)),
            (Some(err), 0) => Err(err),
            (None, 1) if self.settings.collapse_single_failure => Err(secondary.remove(0)),
            (original, _) => {
                let failures: Vec<PhaseError> = original.into_iter().chain(secondary).collect();
                warn!(block = %ctx.id(), count = failures.len(), "block left with several failures");
                Err(PhaseError::Aggregate {
                    block: ctx.id(),
                    failures,
                })
            }
        }
    }

    /// Run a finalizing phaser; its failure is collected, not propagated.
    ///
    /// Only a broken context state comes back as an error.
    fn discharge(&self, ctx: &mut BlockContext, reg: &Registration, value: &Val) -> Result<(), PhaseError> {
        match self.fire(ctx, reg, Some(value)) {
            Ok(_) => Ok(()),
            Err(err) => self.collect(ctx, PhaseError::Raised(err)),
        }
    }

    fn collect(&self, ctx: &mut BlockContext, failure: PhaseError) -> Result<(), PhaseError> {
        warn!(block = %ctx.id(), error = %failure, "failure while leaving block");
        if ctx.state() == ContextState::Exiting {
            ctx.transition(ContextState::UnwindAccumulating)?;
        }
        ctx.accumulate(failure);
        Ok(())
    }

    fn fire(&self, ctx: &BlockContext, reg: &Registration, topic: Option<&Val>) -> PhaseResult {
        debug!(block = %ctx.id(), phase = %reg.kind, seq = reg.seq, "firing phaser");
        let call = PhaseCall {
            block: ctx.id(),
            kind: reg.kind,
            captured: ctx.captured(),
            topic,
        };
        reg.callback.invoke(&call)
    }
}

/// Registrations of `kind` in the order that kind fires
fn ordered(ctx: &BlockContext, kind: PhaseKind) -> Vec<Registration> {
    let mut regs: Vec<Registration> = ctx.registrations(kind).cloned().collect();
    if kind.firing_order() == FiringOrder::Reverse {
        regs.reverse();
    }
    regs
}
