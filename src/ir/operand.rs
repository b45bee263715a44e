//! IR operands
//!
//! Operands never own the symbols they mention; they hold a [`SymId`] into the job's
//! symbol table, so copying an operand is cheap and equality is identity.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::SymId;
use crate::profile::{FunctionInfoId, FunctionObjectId, TypeId};

/// Profile-derived type hint carried by a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    Unknown,
    Undefined,
    Null,
    Boolean,
    Int,
    Float,
    Number,
    String,
    Object,
    Array,
    LikelyNativeArray,
}

impl ValueType {
    pub fn is_likely_native_array(self) -> bool {
        self == ValueType::LikelyNativeArray
    }

    pub fn is_likely_number(self) -> bool {
        matches!(self, ValueType::Int | ValueType::Float | ValueType::Number)
    }
}

/// Address-sized constants the inliner emits or recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrValue {
    Undefined,
    Null,
    /// Identity token of a function's code
    FunctionInfo(FunctionInfoId),
    /// An object type
    Type(TypeId),
    /// A function object known at compile time
    FixedFunction {
        object: FunctionObjectId,
        info: Option<FunctionInfoId>,
    },
    /// A closure environment (frame display)
    Environment(u64),
    /// Any other heap object constant
    Object(u64),
}

impl AddrValue {
    /// Constants that are valid as an unconverted `this` value
    pub fn is_object_like_this(self) -> bool {
        !matches!(self, AddrValue::FunctionInfo(_) | AddrValue::Type(_))
    }
}

/// Compile-time known value of a symbol
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Int(i32),
    Float(f64),
    Addr(AddrValue),
}

impl ConstValue {
    pub fn as_int(self) -> Option<i32> {
        match self {
            ConstValue::Int(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_number(self) -> bool {
        matches!(self, ConstValue::Int(_) | ConstValue::Float(_))
    }
}

/// `[base + index + offset]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirOperand {
    pub base: SymId,
    pub index: Option<SymId>,
    pub offset: i32,
}

/// Runtime helpers a rewritten call may target directly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HelperMethod {
    MaxInAnArray,
    MinInAnArray,
    StringCharAt,
    StringCharCodeAt,
    /// A host-provided fast-path getter
    DomFastPath(u64),
}

/// A source or destination operand
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    /// Virtual register
    Reg(SymId),
    /// Argument, parameter or property slot
    Sym(SymId),
    Indir(IndirOperand),
    IntConst(i64),
    Addr(AddrValue),
    Helper(HelperMethod),
}

impl Operand {
    /// The symbol behind a register or slot operand
    pub fn sym(&self) -> Option<SymId> {
        match self {
            Operand::Reg(sym) | Operand::Sym(sym) => Some(*sym),
            _ => None,
        }
    }

    pub fn reg(&self) -> Option<SymId> {
        match self {
            Operand::Reg(sym) => Some(*sym),
            _ => None,
        }
    }

    pub fn slot(&self) -> Option<SymId> {
        match self {
            Operand::Sym(sym) => Some(*sym),
            _ => None,
        }
    }

    pub fn is_reg(&self) -> bool {
        matches!(self, Operand::Reg(_))
    }

    pub fn int_const(&self) -> Option<i64> {
        match self {
            Operand::IntConst(value) => Some(*value),
            _ => None,
        }
    }

    pub fn addr(&self) -> Option<AddrValue> {
        match self {
            Operand::Addr(addr) => Some(*addr),
            _ => None,
        }
    }

    /// Every symbol this operand reads, including indirect bases and indices
    pub fn used_syms(&self) -> impl Iterator<Item = SymId> {
        let (a, b) = match self {
            Operand::Reg(sym) | Operand::Sym(sym) => (Some(*sym), None),
            Operand::Indir(indir) => (Some(indir.base), indir.index),
            _ => (None, None),
        };
        a.into_iter().chain(b)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(sym) => write!(f, "{}", sym),
            Operand::Sym(sym) => write!(f, "[{}]", sym),
            Operand::Indir(indir) => match indir.index {
                Some(index) => write!(f, "[{}+{}+{:#x}]", indir.base, index, indir.offset),
                None => write!(f, "[{}+{:#x}]", indir.base, indir.offset),
            },
            Operand::IntConst(value) => write!(f, "{}", value),
            Operand::Addr(addr) => match addr {
                AddrValue::Undefined => write!(f, "undefined"),
                AddrValue::Null => write!(f, "null"),
                AddrValue::FunctionInfo(info) => write!(f, "&{}", info),
                AddrValue::Type(ty) => write!(f, "&{}", ty),
                AddrValue::FixedFunction { object, .. } => write!(f, "&{}", object),
                AddrValue::Environment(env) => write!(f, "&env{:#x}", env),
                AddrValue::Object(obj) => write!(f, "&obj{:#x}", obj),
            },
            Operand::Helper(helper) => write!(f, "helper:{:?}", helper),
        }
    }
}
