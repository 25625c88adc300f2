//! Static validation of programs
//!
//! Runs before a program is loaded. It checks:
//! - Phaser bodies only use `Emit`, `Value` and `Throw`
//! - `Next`/`Last` appear inside a loop body
//! - Every phase kind is allowed where it is declared
//! - Handler specs sit on catch/control phasers and nowhere else
//! - Run-once sites are unique

use super::ast::{PhaserDecl, Program, Stmt};
use crate::scheduler::PhaseKind;
use std::collections::HashSet;
use std::fmt;

/// One problem found in a program
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Statement that cannot run inside a phaser body
    StatementInPhaser { statement: String, path: String },
    /// Next/Last with no enclosing loop
    ControlFlowOutsideLoop { statement: String, path: String },
    /// Phase kind declared somewhere it cannot fire
    KindNotAllowed { kind: PhaseKind, path: String, reason: String },
    /// catch/control without a handler spec
    MissingHandler { kind: PhaseKind, path: String },
    /// Handler spec on a phaser that is not catch/control
    UnexpectedHandler { kind: PhaseKind, path: String },
    /// Two run-once phasers share a site
    DuplicateSite { kind: PhaseKind, site: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::StatementInPhaser { statement, path } => {
                write!(f, "'{}' is not allowed in a phaser body at {}", statement, path)
            }
            ValidationError::ControlFlowOutsideLoop { statement, path } => {
                write!(f, "'{}' statement outside of loop at {}", statement, path)
            }
            ValidationError::KindNotAllowed { kind, path, reason } => {
                write!(f, "{} cannot be declared at {}: {}", kind.keyword(), path, reason)
            }
            ValidationError::MissingHandler { kind, path } => {
                write!(f, "{} at {} needs a handler", kind.keyword(), path)
            }
            ValidationError::UnexpectedHandler { kind, path } => {
                write!(f, "{} at {} cannot have a handler", kind.keyword(), path)
            }
            ValidationError::DuplicateSite { kind, site } => {
                write!(f, "{} site '{}' is declared more than once", kind.keyword(), site)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Where a phaser is being declared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Program,
    Block,
    Loop,
}

struct ValidationContext {
    /// Number of loop bodies around the current statement
    loop_depth: usize,
    sites: HashSet<(PhaseKind, String)>,
    errors: Vec<ValidationError>,
}

impl ValidationContext {
    fn new() -> Self {
        Self {
            loop_depth: 0,
            sites: HashSet::new(),
            errors: Vec::new(),
        }
    }

    fn report(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    fn claim_site(&mut self, kind: PhaseKind, site: &str) {
        if !self.sites.insert((kind, site.to_string())) {
            self.report(ValidationError::DuplicateSite {
                kind,
                site: site.to_string(),
            });
        }
    }
}

/// Validate a program, collecting every problem
pub fn validate_program(program: &Program) -> Result<(), Vec<ValidationError>> {
    let mut ctx = ValidationContext::new();
    let path = program.name.clone();

    validate_phasers(&program.phasers, Owner::Program, &path, &mut ctx);
    validate_statements(&program.body, &path, &mut ctx);

    if ctx.errors.is_empty() {
        Ok(())
    } else {
        Err(ctx.errors)
    }
}

fn validate_statements(stmts: &[Stmt], path: &str, ctx: &mut ValidationContext) {
    for (i, stmt) in stmts.iter().enumerate() {
        let here = format!("{}/{}", path, i);
        validate_statement(stmt, &here, ctx);
    }
}

fn validate_statement(stmt: &Stmt, path: &str, ctx: &mut ValidationContext) {
    match stmt {
        Stmt::Block {
            name, phasers, body, ..
        } => {
            let path = named(path, name.as_deref());
            validate_phasers(phasers, Owner::Block, &path, ctx);
            validate_statements(body, &path, ctx);
        }
        Stmt::Loop {
            name, phasers, body, ..
        } => {
            let path = named(path, name.as_deref());
            validate_phasers(phasers, Owner::Loop, &path, ctx);
            ctx.loop_depth += 1;
            validate_statements(body, &path, ctx);
            ctx.loop_depth -= 1;
        }
        Stmt::Next { .. } | Stmt::Last { .. } => {
            if ctx.loop_depth == 0 {
                ctx.report(ValidationError::ControlFlowOutsideLoop {
                    statement: stmt.label().to_string(),
                    path: path.to_string(),
                });
            }
        }
        Stmt::Once { kind, site, body } => {
            if !matches!(
                kind,
                PhaseKind::CompileBegin | PhaseKind::CompileCheck | PhaseKind::RuntimeInit
            ) {
                ctx.report(ValidationError::KindNotAllowed {
                    kind: *kind,
                    path: path.to_string(),
                    reason: "only BEGIN, CHECK and INIT can be evaluated in place".to_string(),
                });
            }
            ctx.claim_site(*kind, site);
            validate_phaser_body(body, path, ctx);
        }
        Stmt::Emit { .. } | Stmt::Value { .. } | Stmt::Throw { .. } | Stmt::Warn { .. } => {}
    }
}

fn validate_phasers(phasers: &[PhaserDecl], owner: Owner, path: &str, ctx: &mut ValidationContext) {
    for (i, decl) in phasers.iter().enumerate() {
        let here = format!("{}#{}", path, decl.kind.tag());
        if let Some(reason) = kind_not_allowed(decl.kind, owner) {
            ctx.report(ValidationError::KindNotAllowed {
                kind: decl.kind,
                path: here.clone(),
                reason: reason.to_string(),
            });
        }
        match (decl.kind.is_handler(), decl.handler.is_some()) {
            (true, false) => ctx.report(ValidationError::MissingHandler {
                kind: decl.kind,
                path: here.clone(),
            }),
            (false, true) => ctx.report(ValidationError::UnexpectedHandler {
                kind: decl.kind,
                path: here.clone(),
            }),
            _ => {}
        }
        if owner == Owner::Program && decl.kind.is_run_once() {
            ctx.claim_site(decl.kind, &program_site(path, decl.kind, i));
        }
        validate_phaser_body(&decl.body, &here, ctx);
    }
}

fn validate_phaser_body(body: &[Stmt], path: &str, ctx: &mut ValidationContext) {
    for (i, stmt) in body.iter().enumerate() {
        if !matches!(stmt, Stmt::Emit { .. } | Stmt::Value { .. } | Stmt::Throw { .. }) {
            ctx.report(ValidationError::StatementInPhaser {
                statement: stmt.label().to_string(),
                path: format!("{}/{}", path, i),
            });
        }
    }
}

fn kind_not_allowed(kind: PhaseKind, owner: Owner) -> Option<&'static str> {
    if kind.is_async() {
        return Some("only asynchronous handler blocks have LAST/QUIT/CLOSE");
    }
    if kind.is_run_once() && owner != Owner::Program {
        return Some("run-once phasers belong to the program or a Once statement");
    }
    if kind.is_loop() && owner != Owner::Loop {
        return Some("only loop bodies have FIRST/NEXT/LAST");
    }
    None
}

fn named(path: &str, name: Option<&str>) -> String {
    match name {
        Some(name) => format!("{}:{}", path, name),
        None => path.to_string(),
    }
}

/// Cache site of a `Once` statement, scoped to its program
pub(crate) fn inline_site(program: &str, site: &str) -> String {
    format!("{}::{}", program, site)
}

/// Cache site of the `index`-th program-level phaser
pub(crate) fn program_site(program: &str, kind: PhaseKind, index: usize) -> String {
    format!("{}#{}[{}]", program, kind.tag(), index)
}
