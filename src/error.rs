//! Error types for the Quicksilver inliner
//!
//! Inlining is an optimization: a call site that cannot be inlined is simply left alone
//! and never produces an error. The errors here are the ones that abort a compilation
//! job outright, because continuing would silently produce wrong code, plus the usual
//! configuration and I/O failures of the surrounding tooling.

use std::fmt;
use thiserror::Error;

use crate::ir::{FuncId, InstrId, SymId};

/// Which structural rule of the IR was broken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantKind {
    /// An argument chain did not end in a `StartCall`, or a link was not an arg slot
    ArgChain,
    /// A symbol expected to have exactly one definition had several (or none)
    SingleDef,
    /// An instruction list lost connectivity (dangling neighbor, double insertion)
    ListShape,
    /// Parameter layout did not match the callee's declared formals
    Formals,
    /// Frame metadata could not be encoded
    Frame,
    /// A transformer saw an opcode/operand combination it cannot handle
    Shape,
}

impl fmt::Display for InvariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantKind::ArgChain => write!(f, "ArgChain"),
            InvariantKind::SingleDef => write!(f, "SingleDef"),
            InvariantKind::ListShape => write!(f, "ListShape"),
            InvariantKind::Formals => write!(f, "Formals"),
            InvariantKind::Frame => write!(f, "Frame"),
            InvariantKind::Shape => write!(f, "Shape"),
        }
    }
}

/// Where in the IR an invariant violation was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IrLocation {
    pub func: Option<FuncId>,
    pub instr: Option<InstrId>,
    pub sym: Option<SymId>,
}

impl IrLocation {
    pub fn instr(func: FuncId, instr: InstrId) -> Self {
        Self {
            func: Some(func),
            instr: Some(instr),
            sym: None,
        }
    }

    pub fn sym(sym: SymId) -> Self {
        Self {
            func: None,
            instr: None,
            sym: Some(sym),
        }
    }
}

impl fmt::Display for IrLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(func) = self.func {
            parts.push(format!("{}", func));
        }
        if let Some(instr) = self.instr {
            parts.push(format!("{}", instr));
        }
        if let Some(sym) = self.sym {
            parts.push(format!("{}", sym));
        }
        if parts.is_empty() {
            write!(f, "<unknown>")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

/// Main error type for the inliner
#[derive(Error, Debug)]
pub enum Error {
    /// The IR violated a structural invariant; the compilation job must be abandoned
    #[error("InvariantViolation({kind}) at {location}: {message}")]
    InvariantViolation {
        kind: InvariantKind,
        location: IrLocation,
        message: String,
    },

    /// A function number referenced by a fixture or builder is unknown
    #[error("UnknownFunction: no body registered for function #{0}")]
    UnknownFunction(u32),

    /// Invalid inliner configuration
    #[error("ConfigError: {0}")]
    ConfigError(String),

    /// Malformed IR fixture
    #[error("FixtureError: {0}")]
    FixtureError(String),

    /// IO error
    #[error("IOError: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    /// JSON (de)serialization error
    #[error("JsonError: {source}")]
    JsonError {
        #[from]
        source: serde_json::Error,
    },
}

impl Error {
    /// Create an invariant violation
    pub fn invariant(kind: InvariantKind, location: IrLocation, message: impl Into<String>) -> Self {
        Error::InvariantViolation {
            kind,
            location,
            message: message.into(),
        }
    }

    /// Create a malformed-argument-chain violation at an instruction
    pub fn arg_chain(func: FuncId, instr: InstrId, message: impl Into<String>) -> Self {
        Self::invariant(InvariantKind::ArgChain, IrLocation::instr(func, instr), message)
    }

    /// Create a broken-list violation at an instruction
    pub fn list_shape(func: FuncId, instr: InstrId, message: impl Into<String>) -> Self {
        Self::invariant(InvariantKind::ListShape, IrLocation::instr(func, instr), message)
    }

    /// Create a single-definition violation for a symbol
    pub fn single_def(sym: SymId, message: impl Into<String>) -> Self {
        Self::invariant(InvariantKind::SingleDef, IrLocation::sym(sym), message)
    }

    /// Create an unexpected-shape violation at an instruction
    pub fn shape(func: FuncId, instr: InstrId, message: impl Into<String>) -> Self {
        Self::invariant(InvariantKind::Shape, IrLocation::instr(func, instr), message)
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::ConfigError(message.into())
    }

    /// Create a fixture error
    pub fn fixture(message: impl Into<String>) -> Self {
        Error::FixtureError(message.into())
    }

    /// Whether this error means the job is corrupt (as opposed to a tooling failure)
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Error::InvariantViolation { .. })
    }
}

/// Result type for inliner operations
pub type Result<T> = std::result::Result<T, Error>;

/// Check an IR invariant, returning an `InvariantViolation` from the enclosing function if it fails
#[macro_export]
macro_rules! ensure_invariant {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}

/// Common invariant messages
pub mod messages {
    pub const NOT_ARG_SLOT: &str = "argument link is not an arg-slot symbol";
    pub const NOT_SINGLE_DEF: &str = "argument slot symbol is not single-def";
    pub const MISSING_START_CALL: &str = "argument chain does not end in StartCall";
    pub const MISSING_LINK: &str = "call has no argument link operand";
    pub const DETACHED: &str = "instruction is not linked into a list";
    pub const ALREADY_LINKED: &str = "instruction is already linked into a list";
    pub const FORMAL_OUT_OF_RANGE: &str = "parameter slot exceeds the callee's formal count";
    pub const TOO_MANY_FORMALS: &str = "callee declares more formals than an inlinee frame can encode";
    pub const REST_MISMATCH: &str = "rest array element count does not match the excess actuals";

    /// Format an "expected X, found Y" message
    pub fn expected(what: &str, found: impl std::fmt::Debug) -> String {
        format!("expected {}, found {:?}", what, found)
    }
}
