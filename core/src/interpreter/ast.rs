//! Program AST
//!
//! Programs are plain serde documents (JSON or TOML). Phasers are declared on
//! the block they belong to; run-once phasers are declared on the program or
//! evaluated in place with `Once`.

use crate::scheduler::{HandlerOutcome, PhaseKind, Val};
use serde::{Deserialize, Serialize};

/// A whole program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    #[serde(default = "default_program_name")]
    pub name: String,
    /// Run-once phasers plus the phasers of the top-level block
    #[serde(default)]
    pub phasers: Vec<PhaserDecl>,
    pub body: Vec<Stmt>,
}

fn default_program_name() -> String {
    "main".to_string()
}

/// Statement AST node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Stmt {
    Block {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        phasers: Vec<PhaserDecl>,
        body: Vec<Stmt>,
    },
    /// Runs `body` as a fresh block `iterations` times
    Loop {
        #[serde(default)]
        name: Option<String>,
        iterations: usize,
        #[serde(default)]
        phasers: Vec<PhaserDecl>,
        body: Vec<Stmt>,
    },
    /// Append a line to the trace. Inside a phaser `{topic}` is replaced by
    /// its topic; catch/control see the condition code.
    Emit {
        text: String,
    },
    /// Set the value of the enclosing block
    Value {
        value: Val,
    },
    Throw {
        code: String,
        #[serde(default)]
        message: Option<String>,
        /// A fatal exception cannot be resumed
        #[serde(default)]
        fatal: bool,
    },
    /// Raise a resumable control condition
    Warn {
        message: String,
    },
    Next {
        #[serde(default)]
        value: Val,
    },
    Last {
        #[serde(default)]
        value: Val,
    },
    /// Evaluate a BEGIN, CHECK or INIT phaser in place; its cached value
    /// becomes the value of the enclosing block
    Once {
        kind: PhaseKind,
        site: String,
        body: Vec<Stmt>,
    },
}

impl Stmt {
    pub fn label(&self) -> &'static str {
        match self {
            Stmt::Block { .. } => "Block",
            Stmt::Loop { .. } => "Loop",
            Stmt::Emit { .. } => "Emit",
            Stmt::Value { .. } => "Value",
            Stmt::Throw { .. } => "Throw",
            Stmt::Warn { .. } => "Warn",
            Stmt::Next { .. } => "Next",
            Stmt::Last { .. } => "Last",
            Stmt::Once { .. } => "Once",
        }
    }
}

/// A phaser declared on a block or program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaserDecl {
    pub kind: PhaseKind,
    #[serde(default)]
    pub body: Vec<Stmt>,
    /// Required for catch/control, forbidden for everything else
    #[serde(default)]
    pub handler: Option<HandlerSpec>,
}

/// What a catch/control phaser does with a condition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerSpec {
    /// Only conditions with this code; any code when absent
    #[serde(default)]
    pub matches: Option<String>,
    pub outcome: HandlerOutcome,
}
