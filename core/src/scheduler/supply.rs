//! Asynchronous handler blocks
//!
//! A tap connects an event source to a handler block and runs on its own
//! tokio task. Each emitted value runs the handler body to completion before
//! the next event is looked at, so LAST/QUIT/CLOSE always fire after the body
//! has finished. Taps share nothing but the scheduler: closing one never
//! blocks or reorders another.

use super::callback::{Callback, PhaseResult};
use super::context::BlockContext;
use super::engine::PhaseScheduler;
use super::errors::{ErrorInfo, PhaseError};
use super::types::{Condition, ExitOutcome, ExitReason, HandlerOutcome, PhaseKind, Val};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Event delivered by an asynchronous source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum SupplyEvent {
    Emit(Val),
    /// The source finished normally
    Done,
    /// The source failed
    Quit(ErrorInfo),
}

/// Identity of one tap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId(pub Uuid);

impl ChainId {
    pub fn new() -> Self {
        ChainId(Uuid::new_v4())
    }
}

impl Default for ChainId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type BodyFn = dyn Fn(&Val) -> PhaseResult + Send + Sync;

/// Handler block run for every value of a source
pub struct WheneverBlock {
    name: String,
    captured: Val,
    body: Arc<BodyFn>,
    phasers: Vec<(PhaseKind, Callback)>,
}

impl WheneverBlock {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Val) -> PhaseResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            captured: Val::Null,
            body: Arc::new(body),
            phasers: Vec::new(),
        }
    }

    pub fn with_captured(mut self, captured: Val) -> Self {
        self.captured = captured;
        self
    }

    /// Declare a phaser; it is registered when the block is tapped
    pub fn on(mut self, kind: PhaseKind, callback: Callback) -> Self {
        self.phasers.push((kind, callback));
        self
    }
}

impl fmt::Debug for WheneverBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WheneverBlock")
            .field("name", &self.name)
            .field("phasers", &self.phasers.len())
            .finish()
    }
}

/// Why a tap stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TapEnd {
    Done,
    Quit,
    /// Closed by the consumer
    Closed,
    /// The body raised and no handler dealt with it
    Failed,
}

/// What a finished tap reports
#[derive(Debug, Clone, PartialEq)]
pub struct TapSummary {
    pub chain: ChainId,
    pub emitted: usize,
    pub end: TapEnd,
    /// Value the handler block was left with
    pub value: Val,
}

/// Consumer side of a running tap
#[derive(Debug)]
pub struct TapHandle {
    chain: ChainId,
    close_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<TapSummary, PhaseError>>,
}

impl TapHandle {
    pub fn chain(&self) -> ChainId {
        self.chain
    }

    /// Ask the tap to close. Returns false if it had already stopped.
    pub fn close(&mut self) -> bool {
        match self.close_tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Wait for the tap to stop
    pub async fn finished(self) -> Result<TapSummary, PhaseError> {
        match self.task.await {
            Ok(result) => result,
            Err(join_err) => Err(PhaseError::Raised(ErrorInfo::new(
                super::errors::TAP_ABORTED,
                join_err.to_string(),
            ))),
        }
    }
}

/// Connect `source` to `block` on a new task
pub fn tap(
    scheduler: Arc<PhaseScheduler>,
    source: mpsc::Receiver<SupplyEvent>,
    block: WheneverBlock,
) -> TapHandle {
    let chain = ChainId::new();
    let (close_tx, close_rx) = oneshot::channel();
    let task = tokio::spawn(run_tap(scheduler, source, block, close_rx, chain));
    TapHandle {
        chain,
        close_tx: Some(close_tx),
        task,
    }
}

async fn run_tap(
    scheduler: Arc<PhaseScheduler>,
    mut source: mpsc::Receiver<SupplyEvent>,
    block: WheneverBlock,
    mut close_rx: oneshot::Receiver<()>,
    chain: ChainId,
) -> Result<TapSummary, PhaseError> {
    let WheneverBlock {
        name,
        captured,
        body,
        phasers,
    } = block;

    let mut ctx = BlockContext::async_block(name).with_captured(captured);
    for (kind, callback) in phasers {
        scheduler.register(&mut ctx, kind, callback)?;
    }
    scheduler.enter_block(&mut ctx)?;
    debug!(chain = %chain, block = %ctx.id(), "tap started");

    let mut emitted = 0;
    let mut value = Val::Null;
    let mut close_abandoned = false;
    let mut failures: Vec<PhaseError> = Vec::new();

    let (end, uncaught) = loop {
        tokio::select! {
            biased;
            closed = &mut close_rx, if !close_abandoned => {
                if closed.is_ok() {
                    break (TapEnd::Closed, None);
                }
                // Handle dropped without closing; keep listening
                close_abandoned = true;
            }
            event = source.recv() => match event {
                Some(SupplyEvent::Emit(v)) => {
                    emitted += 1;
                    match body(&v) {
                        Ok(out) => value = out,
                        Err(err) => match scheduler.handle(&ctx, &Condition::exception(err.clone())) {
                            HandlerOutcome::Resume(v) | HandlerOutcome::Handled(v) => value = v,
                            HandlerOutcome::Decline => break (TapEnd::Failed, Some(err)),
                            HandlerOutcome::Rethrow(new_err) => break (TapEnd::Failed, Some(new_err)),
                        },
                    }
                }
                Some(SupplyEvent::Done) | None => {
                    if let Err(err) = scheduler.fire_async(&mut ctx, PhaseKind::AsyncLast, None) {
                        failures.push(err);
                    }
                    break (TapEnd::Done, None);
                }
                Some(SupplyEvent::Quit(err)) => {
                    if !ctx.has_registrations(PhaseKind::AsyncQuit) {
                        break (TapEnd::Quit, Some(err));
                    }
                    let topic = Val::Error(err);
                    if let Err(quit_err) = scheduler.fire_async(&mut ctx, PhaseKind::AsyncQuit, Some(&topic)) {
                        failures.push(quit_err);
                    }
                    break (TapEnd::Quit, None);
                }
            }
        }
    };

    if let Err(err) = scheduler.fire_async(&mut ctx, PhaseKind::AsyncClose, None) {
        failures.push(err);
    }
    debug!(chain = %chain, end = ?end, emitted, "tap stopped");

    let reason = match uncaught {
        Some(err) => ExitReason::Unwound(Condition::exception(err).dispatched()),
        None => ExitReason::Normal(value),
    };
    let left = scheduler.exit_block(&mut ctx, reason);

    match (left, failures.len()) {
        (Ok(ExitOutcome::Left(value)), 0) => Ok(TapSummary {
            chain,
            emitted,
            end,
            value,
        }),
        // Dispatched conditions are never resumed at exit
        (Ok(ExitOutcome::Resumed(value)), 0) => Ok(TapSummary {
            chain,
            emitted,
            end,
            value,
        }),
        (Err(err), 0) => Err(err),
        (Ok(_), 1) if scheduler.settings().collapse_single_failure => Err(failures.remove(0)),
        (left, _) => {
            let mut all = Vec::new();
            if let Err(err) = left {
                all.push(err);
            }
            all.extend(failures);
            Err(PhaseError::Aggregate {
                block: ctx.id(),
                failures: all,
            })
        }
    }
}
