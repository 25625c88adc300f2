//! Block execution contexts
//!
//! One `BlockContext` per activation of a lexical block. It owns the phasers
//! registered for that activation, tracks where the activation is in its
//! lifecycle and collects failures raised while it is being left.

use super::callback::Callback;
use super::errors::PhaseError;
use super::types::{PhaseKind, Val};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_BLOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one block activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u64);

impl BlockId {
    /// Pseudo-block for program-level (run-once) phasers
    pub const PROGRAM: BlockId = BlockId(0);

    pub fn next() -> Self {
        BlockId(NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What sort of block is being activated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum BlockKind {
    Plain,
    /// One iteration of a loop body
    LoopIteration {
        first_iteration: bool,
        final_iteration: bool,
    },
    /// Handler block of an asynchronous source
    Async,
}

/// Lifecycle of a context
///
/// `Created → Entering → {Active, EntryAborted} → Exiting → {Left, UnwindAccumulating → Left}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextState {
    Created,
    Entering,
    Active,
    /// Terminal: entry never completed, no leave phases are owed
    EntryAborted,
    Exiting,
    /// Leaving while failures are being collected
    UnwindAccumulating,
    Left,
}

impl ContextState {
    pub fn can_move_to(self, next: ContextState) -> bool {
        use ContextState::*;
        matches!(
            (self, next),
            (Created, Entering)
                | (Entering, Active)
                | (Entering, EntryAborted)
                | (Active, Exiting)
                // a resumed handler puts the block back to work
                | (Exiting, Active)
                | (Exiting, Left)
                | (Exiting, UnwindAccumulating)
                | (UnwindAccumulating, Left)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ContextState::EntryAborted | ContextState::Left)
    }
}

/// How the activation ended (or is ending)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    Normal,
    ExceptionalResumed,
    ExceptionalUnwound,
}

/// One phaser bound to a block
#[derive(Debug, Clone)]
pub struct Registration {
    pub kind: PhaseKind,
    /// Declaration position among all phasers of the block
    pub seq: usize,
    pub callback: Callback,
}

/// Runtime frame for one block activation
#[derive(Debug)]
pub struct BlockContext {
    id: BlockId,
    name: String,
    kind: BlockKind,
    state: ContextState,
    status: Option<ExitStatus>,
    registrations: Vec<Registration>,
    accumulated: Vec<PhaseError>,
    captured: Val,
    pre_failed: bool,
}

impl BlockContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_kind(name, BlockKind::Plain)
    }

    pub fn loop_iteration(name: impl Into<String>, first_iteration: bool, final_iteration: bool) -> Self {
        Self::with_kind(
            name,
            BlockKind::LoopIteration {
                first_iteration,
                final_iteration,
            },
        )
    }

    pub fn async_block(name: impl Into<String>) -> Self {
        Self::with_kind(name, BlockKind::Async)
    }

    pub fn with_kind(name: impl Into<String>, kind: BlockKind) -> Self {
        Self {
            id: BlockId::next(),
            name: name.into(),
            kind,
            state: ContextState::Created,
            status: None,
            registrations: Vec::new(),
            accumulated: Vec::new(),
            captured: Val::Null,
            pre_failed: false,
        }
    }

    /// Attach the captured context handed to every callback of this block
    pub fn with_captured(mut self, captured: Val) -> Self {
        self.captured = captured;
        self
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    pub fn captured(&self) -> &Val {
        &self.captured
    }

    /// Failures collected while leaving; drained when the block is left
    pub fn accumulated(&self) -> &[PhaseError] {
        &self.accumulated
    }

    pub fn pre_failed(&self) -> bool {
        self.pre_failed
    }

    pub fn is_first_iteration(&self) -> bool {
        matches!(
            self.kind,
            BlockKind::LoopIteration {
                first_iteration: true,
                ..
            }
        )
    }

    pub fn is_final_iteration(&self) -> bool {
        matches!(
            self.kind,
            BlockKind::LoopIteration {
                final_iteration: true,
                ..
            }
        )
    }

    pub fn is_loop_iteration(&self) -> bool {
        matches!(self.kind, BlockKind::LoopIteration { .. })
    }

    /// The loop driver found out this iteration is the last one
    pub fn mark_final_iteration(&mut self) {
        if let BlockKind::LoopIteration {
            ref mut final_iteration,
            ..
        } = self.kind
        {
            *final_iteration = true;
        }
    }

    /// Registrations of one kind, in declaration order
    pub fn registrations(&self, kind: PhaseKind) -> impl Iterator<Item = &Registration> {
        self.registrations.iter().filter(move |r| r.kind == kind)
    }

    /// LEAVE/KEEP/UNDO interleaved by declaration position
    pub fn leave_queue(&self) -> impl Iterator<Item = &Registration> {
        self.registrations.iter().filter(|r| r.kind.in_leave_queue())
    }

    pub fn has_registrations(&self, kind: PhaseKind) -> bool {
        self.registrations(kind).next().is_some()
    }

    /* ===================== Scheduler-side mutation ===================== */

    pub(crate) fn push_registration(&mut self, kind: PhaseKind, callback: Callback) {
        let seq = self.registrations.len();
        self.registrations.push(Registration {
            kind,
            seq,
            callback,
        });
    }

    pub(crate) fn transition(&mut self, to: ContextState) -> Result<(), PhaseError> {
        if !self.state.can_move_to(to) {
            return Err(PhaseError::InvalidTransition {
                block: self.id,
                from: self.state,
                to,
            });
        }
        tracing::trace!(block = %self.id, from = ?self.state, to = ?to, "context transition");
        self.state = to;
        Ok(())
    }

    pub(crate) fn set_status(&mut self, status: ExitStatus) {
        self.status = Some(status);
    }

    pub(crate) fn mark_pre_failed(&mut self) {
        self.pre_failed = true;
    }

    pub(crate) fn accumulate(&mut self, failure: PhaseError) {
        self.accumulated.push(failure);
    }

    pub(crate) fn take_accumulated(&mut self) -> Vec<PhaseError> {
        std::mem::take(&mut self.accumulated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::types::Val;

    #[test]
    fn test_block_ids_are_unique() {
        let a = BlockContext::new("a");
        let b = BlockContext::new("b");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_valid_lifecycle_transitions() {
        let mut ctx = BlockContext::new("block");
        ctx.transition(ContextState::Entering).unwrap();
        ctx.transition(ContextState::Active).unwrap();
        ctx.transition(ContextState::Exiting).unwrap();
        ctx.transition(ContextState::UnwindAccumulating).unwrap();
        ctx.transition(ContextState::Left).unwrap();
        assert!(ctx.state().is_terminal());
    }

    #[test]
    fn test_entry_aborted_is_terminal() {
        let mut ctx = BlockContext::new("block");
        ctx.transition(ContextState::Entering).unwrap();
        ctx.transition(ContextState::EntryAborted).unwrap();
        let err = ctx.transition(ContextState::Exiting).unwrap_err();
        assert!(matches!(
            err,
            PhaseError::InvalidTransition {
                from: ContextState::EntryAborted,
                to: ContextState::Exiting,
                ..
            }
        ));
    }

    #[test]
    fn test_leave_queue_keeps_declaration_positions() {
        let mut ctx = BlockContext::new("block");
        let noop = || Callback::phase(|_| Ok(Val::Null));
        ctx.push_registration(PhaseKind::BlockLeave, noop());
        ctx.push_registration(PhaseKind::BlockEnter, noop());
        ctx.push_registration(PhaseKind::BlockUndo, noop());
        ctx.push_registration(PhaseKind::BlockKeep, noop());

        let queue: Vec<_> = ctx.leave_queue().map(|r| (r.kind, r.seq)).collect();
        assert_eq!(
            queue,
            vec![
                (PhaseKind::BlockLeave, 0),
                (PhaseKind::BlockUndo, 2),
                (PhaseKind::BlockKeep, 3)
            ]
        );
    }

    #[test]
    fn test_mark_final_iteration_only_affects_loops() {
        let mut plain = BlockContext::new("plain");
        plain.mark_final_iteration();
        assert!(!plain.is_final_iteration());

        let mut iteration = BlockContext::loop_iteration("body", true, false);
        assert!(iteration.is_first_iteration());
        iteration.mark_final_iteration();
        assert!(iteration.is_final_iteration());
    }
}
