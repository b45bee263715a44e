//! Backend intermediate representation
//!
//! The IR is an arena of instructions, symbols and compilation units owned by one
//! compilation [`Job`]. Instructions form intrusive doubly-linked lists addressed by
//! dense indices, so a transformation can hold an [`InstrId`] across arbitrary edits
//! of the surrounding list without borrowing the list itself.

pub mod builder;
pub mod dump;
pub mod func;
pub mod instr;
pub mod job;
pub mod opcode;
pub mod operand;
pub mod sym;

use std::fmt;

pub use builder::FuncBuilder;
pub use func::{Func, FuncFlags};
pub use instr::{BailOutKind, BailOutRecord, FldFlags, Instr, InstrFlags, LabelInfo};
pub use job::Job;
pub use opcode::OpCode;
pub use operand::{AddrValue, ConstValue, IndirOperand, Operand, ValueType};
pub use sym::{PropertySym, SymFlags, SymKind, Symbol, SymbolTable};

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            pub const fn index(self) -> usize {
                self.0 as usize
            }

            pub const fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Index of an instruction in the job arena
    InstrId,
    "i"
);
arena_id!(
    /// Index of a symbol in the job's symbol table
    SymId,
    "s"
);
arena_id!(
    /// Index of a compilation unit in the job arena
    FuncId,
    "func#"
);
arena_id!(
    /// Index of a bailout (deoptimization) record
    BailOutId,
    "bailout#"
);

/// Profiled call-site identifier within one function body
pub type ProfileId = u16;

/// 1-based ordinal of an outgoing or incoming argument slot (slot 1 is `this`)
pub type ArgSlot = u16;
