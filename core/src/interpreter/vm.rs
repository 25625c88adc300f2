//! Block interpreter
//!
//! Runs a `Program` against a `PhaseScheduler`:
//! - `frames` holds one `BlockContext` per active block, outermost first
//! - conditions are dispatched over `frames` before anything unwinds
//! - every emitted line lands in a shared trace
//!
//! Run-once phasers are declared while the program loads, so BEGIN values
//! exist before the body runs and `Once` statements only read the cache.

use super::ast::{HandlerSpec, PhaserDecl, Program, Stmt};
use super::errors::ProgramError;
use super::validate::{inline_site, program_site, validate_program};
use crate::scheduler::errors::UNCAUGHT_CONTROL;
use crate::scheduler::{
    BlockContext, BlockId, BlockKind, Callback, Condition, ConditionClass, Dispatch, ErrorInfo,
    ExitOutcome, ExitReason, HandlerOutcome, PhaseError, PhaseResult, PhaseScheduler,
    ProgramLifecycle, Val,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Lines emitted by a running program
pub type Trace = Arc<Mutex<Vec<String>>>;

/* ===================== Control flow ===================== */

/// How a statement list finished
#[derive(Debug, Clone, PartialEq)]
enum Completion {
    Value(Val),
    Next(Val),
    Last(Val),
}

/// A condition on its way out through the frame stack
#[derive(Debug)]
struct Unwind {
    /// Already dispatched
    condition: Condition,
    /// Frame that handled the condition, and the value it is left with
    handled_at: Option<(usize, Val)>,
    /// What the caller gets if nothing handles it
    cause: PhaseError,
}

type Flow = Result<Completion, Unwind>;

/// Result of running a whole program
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub trace: Vec<String>,
    pub result: Result<Val, PhaseError>,
}

/* ===================== VM ===================== */

pub struct Vm {
    scheduler: Arc<PhaseScheduler>,
    frames: Vec<BlockContext>,
    trace: Trace,
    max_depth: usize,
    /// Name of the program being run; scopes inline `Once` sites
    program: String,
}

impl Vm {
    pub fn new(scheduler: Arc<PhaseScheduler>, max_depth: usize) -> Self {
        Self {
            scheduler,
            frames: Vec::new(),
            trace: Arc::new(Mutex::new(Vec::new())),
            max_depth,
            program: String::new(),
        }
    }

    /// Number of blocks currently active
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Validate and run a program, from BEGIN through END
    pub fn run(&mut self, program: &Program) -> Result<RunReport, ProgramError> {
        validate_program(program).map_err(ProgramError::Invalid)?;
        info!(program = %program.name, "running program");
        self.program = program.name.clone();

        let mut lifecycle = ProgramLifecycle::new(self.scheduler.clone());
        let result = match self.start(program, &mut lifecycle) {
            Ok(()) => self.run_body(program),
            Err(err) => {
                warn!(program = %program.name, error = %err, "program failed to start");
                Err(err)
            }
        };

        let result = match (result, lifecycle.shutdown()) {
            (result, Ok(())) => result,
            (Ok(_), Err(end)) => Err(end),
            (Err(body), Err(end)) => Err(PhaseError::Aggregate {
                block: BlockId::PROGRAM,
                failures: vec![body, end],
            }),
        };
        info!(program = %program.name, ok = result.is_ok(), "program finished");

        let trace = std::mem::take(&mut *self.trace.lock());
        Ok(RunReport { trace, result })
    }

    /// Declare every run-once phaser, then run CHECK and INIT
    fn start(&self, program: &Program, lifecycle: &mut ProgramLifecycle) -> Result<(), PhaseError> {
        for (index, decl) in program.phasers.iter().enumerate() {
            if decl.kind.is_run_once() {
                let site = program_site(&program.name, decl.kind, index);
                lifecycle.declare(decl.kind, site, self.phase_callback(&decl.body))?;
            }
        }
        self.declare_inline(&program.body, lifecycle)?;
        lifecycle.finish_compile()?;
        lifecycle.start()
    }

    /// Declare `Once` statements in document order
    fn declare_inline(&self, stmts: &[Stmt], lifecycle: &mut ProgramLifecycle) -> Result<(), PhaseError> {
        for stmt in stmts {
            match stmt {
                Stmt::Once { kind, site, body } => {
                    lifecycle.declare(*kind, inline_site(&self.program, site), self.phase_callback(body))?;
                }
                Stmt::Block { body, .. } | Stmt::Loop { body, .. } => {
                    self.declare_inline(body, lifecycle)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn run_body(&mut self, program: &Program) -> Result<Val, PhaseError> {
        let block_phasers: Vec<PhaserDecl> = program
            .phasers
            .iter()
            .filter(|decl| !decl.kind.is_run_once())
            .cloned()
            .collect();

        match self.exec_block(program.name.clone(), BlockKind::Plain, &block_phasers, &program.body) {
            Ok(Completion::Value(value)) => Ok(value),
            Ok(Completion::Next(_) | Completion::Last(_)) => Err(PhaseError::Raised(ErrorInfo::new(
                UNCAUGHT_CONTROL,
                "next/last escaped the program",
            ))),
            Err(unwind) => Err(unwind.cause),
        }
    }

    /* ===================== Statements ===================== */

    fn exec_stmts(&mut self, stmts: &[Stmt]) -> Flow {
        let mut value = Val::Null;
        for stmt in stmts {
            match stmt {
                Stmt::Emit { text } => emit(&self.trace, text, None),
                Stmt::Value { value: v } => value = v.clone(),
                Stmt::Throw {
                    code,
                    message,
                    fatal,
                } => {
                    let error = thrown(code, message.as_deref());
                    let condition = if *fatal {
                        Condition::fatal(error)
                    } else {
                        Condition::exception(error)
                    };
                    value = self.raise(condition, None)?;
                }
                Stmt::Warn { message } => {
                    self.raise(Condition::warning(message.as_str()), None)?;
                }
                Stmt::Next { value: v } => return Ok(Completion::Next(v.clone())),
                Stmt::Last { value: v } => return Ok(Completion::Last(v.clone())),
                Stmt::Once { kind, site, body } => {
                    let callback = self.phase_callback(body);
                    let site = inline_site(&self.program, site);
                    value = match self.scheduler.fire_once(*kind, &site, &callback) {
                        Ok(v) => v,
                        Err(err) => self.raise(Condition::exception(err.to_error_info()), Some(err))?,
                    };
                }
                Stmt::Block {
                    name,
                    phasers,
                    body,
                } => {
                    let name = name.clone().unwrap_or_else(|| "block".to_string());
                    match self.exec_block(name, BlockKind::Plain, phasers, body)? {
                        Completion::Value(v) => value = v,
                        escaping => return Ok(escaping),
                    }
                }
                Stmt::Loop {
                    name,
                    iterations,
                    phasers,
                    body,
                } => {
                    let name = name.as_deref().unwrap_or("loop");
                    value = self.exec_loop(name, *iterations, phasers, body)?;
                }
            }
        }
        Ok(Completion::Value(value))
    }

    fn exec_loop(&mut self, name: &str, iterations: usize, phasers: &[PhaserDecl], body: &[Stmt]) -> Result<Val, Unwind> {
        let mut value = Val::Null;
        for i in 0..iterations {
            let kind = BlockKind::LoopIteration {
                first_iteration: i == 0,
                final_iteration: i + 1 == iterations,
            };
            match self.exec_block(format!("{}[{}]", name, i), kind, phasers, body)? {
                Completion::Value(v) | Completion::Next(v) => value = v,
                Completion::Last(v) => {
                    value = v;
                    break;
                }
            }
        }
        Ok(value)
    }

    /// Enter a block, run its body and leave it
    fn exec_block(&mut self, name: String, kind: BlockKind, phasers: &[PhaserDecl], body: &[Stmt]) -> Flow {
        if self.frames.len() >= self.max_depth {
            let err = PhaseError::DepthExceeded {
                limit: self.max_depth,
            };
            let value = self.raise(Condition::fatal(err.to_error_info()), Some(err))?;
            return Ok(Completion::Value(value));
        }

        let mut ctx = BlockContext::with_kind(name, kind);
        for decl in phasers.iter().filter(|decl| !decl.kind.is_run_once()) {
            if let Err(err) = self.scheduler.register(&mut ctx, decl.kind, self.callback_for(decl)) {
                let value = self.raise(Condition::fatal(err.to_error_info()), Some(err))?;
                return Ok(Completion::Value(value));
            }
        }

        // An aborted entry raises in the enclosing block
        if let Err(err) = self.scheduler.enter_block(&mut ctx) {
            let value = self.raise(Condition::exception(err.to_error_info()), Some(err))?;
            return Ok(Completion::Value(value));
        }

        let depth = self.frames.len();
        self.frames.push(ctx);
        let flow = self.exec_stmts(body);
        let Some(mut ctx) = self.frames.pop() else {
            return flow;
        };

        let (reason, unwinding) = match flow {
            Ok(Completion::Value(v)) => (ExitReason::Normal(v), None),
            Ok(Completion::Next(v)) => (ExitReason::Next(v), None),
            Ok(Completion::Last(v)) => (ExitReason::Last(v), None),
            Err(Unwind {
                handled_at: Some((at, value)),
                ..
            }) if at == depth => (ExitReason::Normal(value), None),
            Err(unwind) => (ExitReason::Unwound(unwind.condition.clone()), Some(unwind)),
        };
        let completion: fn(Val) -> Completion = match reason {
            ExitReason::Next(_) => Completion::Next,
            ExitReason::Last(_) => Completion::Last,
            _ => Completion::Value,
        };

        match (self.scheduler.exit_block(&mut ctx, reason), unwinding) {
            (Ok(ExitOutcome::Left(v) | ExitOutcome::Resumed(v)), None) => Ok(completion(v)),
            // Unwinding always ends in an error; keep going with what we have
            (Ok(_), Some(unwind)) => Err(unwind),
            (Err(err), Some(unwind)) if err == PhaseError::Raised(unwind.condition.error.clone()) => {
                Err(unwind)
            }
            // Leave phasers failed: a new exception, raised in the enclosing block
            (Err(err), _) => {
                let value = self.raise(Condition::exception(err.to_error_info()), Some(err))?;
                Ok(Completion::Value(value))
            }
        }
    }

    /// Dispatch a condition over the active frames.
    ///
    /// Returns the resume value, or the unwind that has to travel outward.
    fn raise(&mut self, condition: Condition, cause: Option<PhaseError>) -> Result<Val, Unwind> {
        let original = condition.error.clone();
        debug!(code = %original.code, depth = self.frames.len(), "raising condition");

        let (condition, handled_at) = match self.scheduler.dispatch(&mut self.frames, condition) {
            Dispatch::Resumed(value) => return Ok(value),
            Dispatch::HandledAt {
                depth,
                value,
                condition,
            } => (condition, Some((depth, value))),
            Dispatch::Unhandled(condition)
                if condition.class == ConditionClass::Control && condition.resumable =>
            {
                warn!(code = %condition.error.code, message = %condition.error.message, "unhandled control condition");
                return Ok(Val::Null);
            }
            Dispatch::Unhandled(condition) => (condition, None),
        };

        let cause = match cause {
            Some(cause) if condition.error == original => cause,
            _ => PhaseError::Raised(condition.error.clone()),
        };
        Err(Unwind {
            condition,
            handled_at,
            cause,
        })
    }

    /* ===================== Callbacks ===================== */

    fn callback_for(&self, decl: &PhaserDecl) -> Callback {
        match &decl.handler {
            Some(spec) if decl.kind.is_handler() => self.handler_callback(&decl.body, spec),
            _ => self.phase_callback(&decl.body),
        }
    }

    fn phase_callback(&self, body: &[Stmt]) -> Callback {
        let body = body.to_vec();
        let trace = self.trace.clone();
        Callback::phase(move |call| run_phaser_body(&body, &trace, call.topic))
    }

    fn handler_callback(&self, body: &[Stmt], spec: &HandlerSpec) -> Callback {
        let body = body.to_vec();
        let spec = spec.clone();
        let trace = self.trace.clone();
        Callback::handler(move |condition, _| {
            if spec.matches.as_ref().is_some_and(|code| *code != condition.error.code) {
                return HandlerOutcome::Decline;
            }
            let topic = Val::Str(condition.error.code.clone());
            match run_phaser_body(&body, &trace, Some(&topic)) {
                Ok(_) => spec.outcome.clone(),
                Err(err) => HandlerOutcome::Rethrow(err),
            }
        })
    }
}

/// Run a phaser body; yields true unless it sets a value
fn run_phaser_body(body: &[Stmt], trace: &Trace, topic: Option<&Val>) -> PhaseResult {
    let mut result = Val::Bool(true);
    for stmt in body {
        match stmt {
            Stmt::Emit { text } => emit(trace, text, topic),
            Stmt::Value { value } => result = value.clone(),
            Stmt::Throw { code, message, .. } => return Err(thrown(code, message.as_deref())),
            // Rejected by validation
            other => warn!(statement = other.label(), "ignoring statement in phaser body"),
        }
    }
    Ok(result)
}

fn emit(trace: &Trace, text: &str, topic: Option<&Val>) {
    let line = match topic {
        Some(topic) => text.replace("{topic}", &topic.to_string()),
        None => text.to_string(),
    };
    trace!(line = %line, "emit");
    trace.lock().push(line);
}

fn thrown(code: &str, message: Option<&str>) -> ErrorInfo {
    ErrorInfo::new(code, message.unwrap_or(code))
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("program", &self.program)
            .field("depth", &self.frames.len())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

