//! Phase kinds
//!
//! Every phaser is bound to exactly one `PhaseKind`. The set is closed so that
//! queue dispatch stays exhaustive.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The point in a block's (or program's) lifecycle a phaser is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum PhaseKind {
    /// BEGIN: at compile time, as soon as the phaser is seen
    CompileBegin = 0,
    /// CHECK: at the end of compilation, reverse order
    CompileCheck = 1,
    /// INIT: at runtime start
    RuntimeInit = 2,
    /// END: at runtime end, reverse order
    RuntimeEnd = 3,
    /// ENTER: every block entry
    BlockEnter = 4,
    /// LEAVE: every block exit
    BlockLeave = 5,
    /// KEEP: block exit with a defined value and no exception
    BlockKeep = 6,
    /// UNDO: block exit via exception or with an undefined value
    BlockUndo = 7,
    /// FIRST: first iteration of a loop body only
    LoopFirst = 8,
    /// NEXT: loop iteration continued
    LoopNext = 9,
    /// LAST: loop finished
    LoopLast = 10,
    /// PRE: assertion checked before entry
    PreCondition = 11,
    /// POST: assertion checked after every other exit phase
    PostCondition = 12,
    /// CATCH: handler for exceptions
    Catch = 13,
    /// CONTROL: handler for control conditions
    Control = 14,
    /// LAST inside an asynchronous handler block
    AsyncLast = 15,
    /// QUIT inside an asynchronous handler block
    AsyncQuit = 16,
    /// CLOSE inside an asynchronous handler block
    AsyncClose = 17,
}

/// Direction in which callbacks of the same kind fire within one block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FiringOrder {
    Declaration,
    Reverse,
}

impl PhaseKind {
    pub const ALL: [PhaseKind; 18] = [
        PhaseKind::CompileBegin,
        PhaseKind::CompileCheck,
        PhaseKind::RuntimeInit,
        PhaseKind::RuntimeEnd,
        PhaseKind::BlockEnter,
        PhaseKind::BlockLeave,
        PhaseKind::BlockKeep,
        PhaseKind::BlockUndo,
        PhaseKind::LoopFirst,
        PhaseKind::LoopNext,
        PhaseKind::LoopLast,
        PhaseKind::PreCondition,
        PhaseKind::PostCondition,
        PhaseKind::Catch,
        PhaseKind::Control,
        PhaseKind::AsyncLast,
        PhaseKind::AsyncQuit,
        PhaseKind::AsyncClose,
    ];

    /// Block-level phases in the order they fire around a block body.
    ///
    /// `Catch` and `Control` share a slot, as do the three leave-queue kinds.
    pub const BLOCK_FIRING_ORDER: [PhaseKind; 11] = [
        PhaseKind::PreCondition,
        PhaseKind::LoopFirst,
        PhaseKind::BlockEnter,
        PhaseKind::Catch,
        PhaseKind::Control,
        PhaseKind::LoopNext,
        PhaseKind::BlockLeave,
        PhaseKind::BlockKeep,
        PhaseKind::BlockUndo,
        PhaseKind::LoopLast,
        PhaseKind::PostCondition,
    ];

    /// Phases that run at most once process-wide and cache their value
    pub fn is_run_once(self) -> bool {
        matches!(
            self,
            PhaseKind::CompileBegin
                | PhaseKind::CompileCheck
                | PhaseKind::RuntimeInit
                | PhaseKind::RuntimeEnd
        )
    }

    /// Handlers receive the in-flight condition as their topic
    pub fn is_handler(self) -> bool {
        matches!(self, PhaseKind::Catch | PhaseKind::Control)
    }

    pub fn is_async(self) -> bool {
        matches!(
            self,
            PhaseKind::AsyncLast | PhaseKind::AsyncQuit | PhaseKind::AsyncClose
        )
    }

    pub fn is_loop(self) -> bool {
        matches!(
            self,
            PhaseKind::LoopFirst | PhaseKind::LoopNext | PhaseKind::LoopLast
        )
    }

    /// LEAVE, KEEP and UNDO share one queue, ordered by declaration position
    pub fn in_leave_queue(self) -> bool {
        matches!(
            self,
            PhaseKind::BlockLeave | PhaseKind::BlockKeep | PhaseKind::BlockUndo
        )
    }

    pub fn firing_order(self) -> FiringOrder {
        match self {
            PhaseKind::CompileCheck
            | PhaseKind::RuntimeEnd
            | PhaseKind::BlockLeave
            | PhaseKind::BlockKeep
            | PhaseKind::BlockUndo
            | PhaseKind::LoopNext
            | PhaseKind::LoopLast
            | PhaseKind::PostCondition => FiringOrder::Reverse,
            PhaseKind::CompileBegin
            | PhaseKind::RuntimeInit
            | PhaseKind::BlockEnter
            | PhaseKind::LoopFirst
            | PhaseKind::PreCondition
            | PhaseKind::Catch
            | PhaseKind::Control
            | PhaseKind::AsyncLast
            | PhaseKind::AsyncQuit
            | PhaseKind::AsyncClose => FiringOrder::Declaration,
        }
    }

    /// Name of the phaser as written in source
    pub fn keyword(self) -> &'static str {
        match self {
            PhaseKind::CompileBegin => "BEGIN",
            PhaseKind::CompileCheck => "CHECK",
            PhaseKind::RuntimeInit => "INIT",
            PhaseKind::RuntimeEnd => "END",
            PhaseKind::BlockEnter => "ENTER",
            PhaseKind::BlockLeave => "LEAVE",
            PhaseKind::BlockKeep => "KEEP",
            PhaseKind::BlockUndo => "UNDO",
            PhaseKind::LoopFirst => "FIRST",
            PhaseKind::LoopNext => "NEXT",
            PhaseKind::LoopLast => "LAST",
            PhaseKind::PreCondition => "PRE",
            PhaseKind::PostCondition => "POST",
            PhaseKind::Catch => "CATCH",
            PhaseKind::Control => "CONTROL",
            PhaseKind::AsyncLast => "LAST (async)",
            PhaseKind::AsyncQuit => "QUIT",
            PhaseKind::AsyncClose => "CLOSE",
        }
    }

    /// Tag used in serialized programs and logs
    pub fn tag(self) -> &'static str {
        match self {
            PhaseKind::CompileBegin => "compile-begin",
            PhaseKind::CompileCheck => "compile-check",
            PhaseKind::RuntimeInit => "runtime-init",
            PhaseKind::RuntimeEnd => "runtime-end",
            PhaseKind::BlockEnter => "block-enter",
            PhaseKind::BlockLeave => "block-leave",
            PhaseKind::BlockKeep => "block-keep",
            PhaseKind::BlockUndo => "block-undo",
            PhaseKind::LoopFirst => "loop-first",
            PhaseKind::LoopNext => "loop-next",
            PhaseKind::LoopLast => "loop-last",
            PhaseKind::PreCondition => "pre-condition",
            PhaseKind::PostCondition => "post-condition",
            PhaseKind::Catch => "catch",
            PhaseKind::Control => "control",
            PhaseKind::AsyncLast => "async-last",
            PhaseKind::AsyncQuit => "async-quit",
            PhaseKind::AsyncClose => "async-close",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
