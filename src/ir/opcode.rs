//! IR opcodes
//!
//! A closed enumeration of the operations the inliner reads or produces. Operations the
//! inliner never looks at (arbitrary arithmetic, stores, compares) still flow through it
//! untouched; only their attribute queries matter here.

use std::fmt;

/// IR operation tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    // ========== Structure ==========
    /// Head sentinel of a compilation unit
    FunctionEntry,
    /// Tail sentinel of a compilation unit
    FunctionExit,
    /// Branch target
    Label,
    /// Source position marker
    StatementBoundary,
    Nop,

    // ========== Branches ==========
    Br,
    BrTrue,
    BrFalse,
    /// Branch if two addresses are equal
    BrAddrEq,
    /// Branch out of a for-in loop when the enumerator is exhausted
    BrOnEmpty,

    // ========== Loads ==========
    /// Register to register copy
    Ld,
    /// Load a 32-bit integer constant
    LdConstI4,
    LdThis,
    StrictLdThis,
    CheckThis,
    StrictCheckThis,
    LdEnv,
    LdNewTarget,
    LdHomeObj,
    LdFuncObj,
    ChkNewCallFlag,
    LdHeapArguments,
    LdLetHeapArguments,
    LdElem,
    StElemC,
    NewScArray,

    // ========== Arithmetic ==========
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ShrU,
    Neg,
    Not,
    Incr,
    Decr,

    // ========== Fields ==========
    LdFld,
    StFld,
    LdRootFld,
    LdMethodFld,
    LdRootMethodFld,
    ScopedLdMethodFld,
    LdFldForCallApplyTarget,
    LdMethodFromFlags,
    /// Guard that a property still holds its fixed value
    CheckFixedFld,
    /// Guard the property's type and load the object's type into the destination
    CheckPropertyGuardAndLoadType,
    /// Method load executed only when no polymorphic arm matched
    LdMethodFldPolyInlineMiss,
    DomFastPathGetter,

    // ========== Arguments ==========
    StartCall,
    ArgOut,
    /// Outgoing argument bound directly to an inlinee parameter
    ArgOutInline,
    /// Forward the caller's own stack arguments
    ArgOutFromStackArgs,
    /// Placeholder argument produced by expanding forwarded stack arguments
    ArgOutFixupForStackArgs,
    ArgOutInlineBuiltIn,
    ArgOutInlineSpecialized,
    ArgOutDynamic,
    ArgOutSpreadArg,
    ArgIn,
    ArgInRest,
    ExtendArg,
    /// Copy of an argument value kept alive for bailout
    BytecodeArgOutCapture,
    /// Keeps an argument value alive for bailout without producing anything
    BytecodeArgOutUse,
    /// Inlinee frame metadata slot
    InlineeMetaArg,
    LdSpreadIndices,

    // ========== Calls ==========
    CallI,
    /// Call of a function value known at compile time
    CallIFixed,
    CallIExtended,
    CallIDynamic,
    CallIDynamicSpread,
    CallDirect,
    NewScObject,
    NewScObjArray,
    NewScObjectNoCtor,
    GetNewScObject,
    UpdateNewScObjectCache,
    InlineeStart,
    InlineeEnd,
    InlineBuiltInStart,
    InlineBuiltInEnd,
    InlineNonTrackingBuiltInEnd,
    EndCallForPolymorphicInlinee,
    Ret,

    // ========== Guards ==========
    BailOnNotObject,
    BailOnNotEqual,
    BailOnNotBuiltIn,
    BailOnNotPolymorphicInlinee,
    BailOnNotStackArgs,
    BailOnNotSpreadable,
    /// Generic bailout point that only records state
    BailTarget,

    // ========== Loops ==========
    InitForInEnumerator,

    // ========== Exceptions ==========
    Throw,
    InlineThrow,
    RuntimeTypeError,
    InlineRuntimeTypeError,
    RuntimeReferenceError,
    InlineRuntimeReferenceError,

    // ========== Liveness ==========
    ByteCodeUses,

    // ========== Built-in fast paths ==========
    InlineMathAbs,
    InlineMathFloor,
    InlineMathCeil,
    InlineMathRound,
    InlineMathSqrt,
    InlineMathMin,
    InlineMathMax,
    InlineMathImul,
    InlineMathClz32,
    InlineMathPow,
    InlineArrayPush,
    InlineArrayPop,
    InlineStringCharAt,
    InlineStringCharCodeAt,
    InlineFunctionApply,
    InlineFunctionCall,
}

impl OpCode {
    /// Any call-shaped instruction
    pub fn is_call(self) -> bool {
        matches!(
            self,
            OpCode::CallI
                | OpCode::CallIFixed
                | OpCode::CallIExtended
                | OpCode::CallIDynamic
                | OpCode::CallIDynamicSpread
                | OpCode::CallDirect
                | OpCode::NewScObject
                | OpCode::NewScObjArray
        )
    }

    pub fn is_branch(self) -> bool {
        matches!(
            self,
            OpCode::Br | OpCode::BrTrue | OpCode::BrFalse | OpCode::BrAddrEq | OpCode::BrOnEmpty
        )
    }

    pub fn is_unconditional_branch(self) -> bool {
        self == OpCode::Br
    }

    pub fn is_label(self) -> bool {
        self == OpCode::Label
    }

    /// Instructions that define an outgoing argument slot
    pub fn is_arg_out(self) -> bool {
        matches!(
            self,
            OpCode::ArgOut
                | OpCode::ArgOutInline
                | OpCode::ArgOutFromStackArgs
                | OpCode::ArgOutFixupForStackArgs
                | OpCode::ArgOutInlineBuiltIn
                | OpCode::ArgOutInlineSpecialized
                | OpCode::ArgOutDynamic
                | OpCode::ArgOutSpreadArg
                | OpCode::LdSpreadIndices
        )
    }

    /// Loads whose result may be replaced by a fixed function value
    pub fn can_load_fixed_fields(self) -> bool {
        matches!(
            self,
            OpCode::ScopedLdMethodFld
                | OpCode::LdRootMethodFld
                | OpCode::LdMethodFld
                | OpCode::LdRootFld
                | OpCode::LdFld
                | OpCode::LdFldForCallApplyTarget
                | OpCode::LdMethodFromFlags
        )
    }

    /// Guards that transfer control to a bailout record
    pub fn is_guard(self) -> bool {
        matches!(
            self,
            OpCode::BailOnNotObject
                | OpCode::BailOnNotEqual
                | OpCode::BailOnNotBuiltIn
                | OpCode::BailOnNotPolymorphicInlinee
                | OpCode::BailOnNotStackArgs
                | OpCode::BailOnNotSpreadable
                | OpCode::BailTarget
                | OpCode::CheckFixedFld
                | OpCode::CheckPropertyGuardAndLoadType
                | OpCode::CheckThis
                | OpCode::StrictCheckThis
        )
    }

    /// Built-in fast paths that record a bailout for non-integer results
    pub fn has_bailout_recording(self) -> bool {
        matches!(
            self,
            OpCode::InlineMathFloor | OpCode::InlineMathCeil | OpCode::InlineMathRound
        )
    }

    /// Built-in fast paths that need the SSE4.1 rounding instructions
    pub fn needs_sse41(self) -> bool {
        self.has_bailout_recording()
    }

    /// Built-in fast paths whose result may be an integer that must be truncated
    pub fn truncates_to_int32(self) -> bool {
        matches!(self, OpCode::InlineMathImul | OpCode::InlineMathClz32)
    }

    /// Fold a binary integer operation over constants
    ///
    /// Returns `None` when the opcode is not foldable or the result would trap.
    pub fn fold_binary(self, left: i32, right: i32) -> Option<i64> {
        let l = left as i64;
        let r = right as i64;
        match self {
            OpCode::Add => Some(l + r),
            OpCode::Sub => Some(l - r),
            OpCode::Mul => Some(l * r),
            OpCode::Div => {
                if r == 0 || l % r != 0 {
                    None
                } else {
                    Some(l / r)
                }
            }
            OpCode::Rem => {
                if r == 0 || l < 0 {
                    None
                } else {
                    Some(l % r)
                }
            }
            OpCode::And => Some((left & right) as i64),
            OpCode::Or => Some((left | right) as i64),
            OpCode::Xor => Some((left ^ right) as i64),
            OpCode::Shl => Some(left.wrapping_shl(right as u32 & 31) as i64),
            OpCode::Shr => Some(left.wrapping_shr(right as u32 & 31) as i64),
            OpCode::ShrU => Some(((left as u32) >> (right as u32 & 31)) as i64),
            _ => None,
        }
    }

    /// Fold a unary integer operation over a constant
    pub fn fold_unary(self, value: i32) -> Option<i64> {
        let v = value as i64;
        match self {
            // -0 is not an int
            OpCode::Neg if value == 0 => None,
            OpCode::Neg => Some(-v),
            OpCode::Not => Some(!value as i64),
            OpCode::Incr => Some(v + 1),
            OpCode::Decr => Some(v - 1),
            OpCode::Ld => Some(v),
            _ => None,
        }
    }

    pub fn is_foldable_binary(self) -> bool {
        matches!(
            self,
            OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Div
                | OpCode::Rem
                | OpCode::And
                | OpCode::Or
                | OpCode::Xor
                | OpCode::Shl
                | OpCode::Shr
                | OpCode::ShrU
        )
    }

    pub fn is_foldable_unary(self) -> bool {
        matches!(
            self,
            OpCode::Neg | OpCode::Not | OpCode::Incr | OpCode::Decr | OpCode::Ld
        )
    }

    /// The inlined counterpart of a throwing instruction
    pub fn inline_throw_variant(self) -> Option<OpCode> {
        match self {
            OpCode::Throw => Some(OpCode::InlineThrow),
            OpCode::RuntimeTypeError => Some(OpCode::InlineRuntimeTypeError),
            OpCode::RuntimeReferenceError => Some(OpCode::InlineRuntimeReferenceError),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OpCode::FunctionEntry => "FunctionEntry",
            OpCode::FunctionExit => "FunctionExit",
            OpCode::Label => "Label",
            OpCode::StatementBoundary => "StatementBoundary",
            OpCode::Nop => "Nop",
            OpCode::Br => "Br",
            OpCode::BrTrue => "BrTrue",
            OpCode::BrFalse => "BrFalse",
            OpCode::BrAddrEq => "BrAddrEq",
            OpCode::BrOnEmpty => "BrOnEmpty",
            OpCode::Ld => "Ld",
            OpCode::LdConstI4 => "LdConstI4",
            OpCode::LdThis => "LdThis",
            OpCode::StrictLdThis => "StrictLdThis",
            OpCode::CheckThis => "CheckThis",
            OpCode::StrictCheckThis => "StrictCheckThis",
            OpCode::LdEnv => "LdEnv",
            OpCode::LdNewTarget => "LdNewTarget",
            OpCode::LdHomeObj => "LdHomeObj",
            OpCode::LdFuncObj => "LdFuncObj",
            OpCode::ChkNewCallFlag => "ChkNewCallFlag",
            OpCode::LdHeapArguments => "LdHeapArguments",
            OpCode::LdLetHeapArguments => "LdLetHeapArguments",
            OpCode::LdElem => "LdElem",
            OpCode::StElemC => "StElemC",
            OpCode::NewScArray => "NewScArray",
            OpCode::Add => "Add",
            OpCode::Sub => "Sub",
            OpCode::Mul => "Mul",
            OpCode::Div => "Div",
            OpCode::Rem => "Rem",
            OpCode::And => "And",
            OpCode::Or => "Or",
            OpCode::Xor => "Xor",
            OpCode::Shl => "Shl",
            OpCode::Shr => "Shr",
            OpCode::ShrU => "ShrU",
            OpCode::Neg => "Neg",
            OpCode::Not => "Not",
            OpCode::Incr => "Incr",
            OpCode::Decr => "Decr",
            OpCode::LdFld => "LdFld",
            OpCode::StFld => "StFld",
            OpCode::LdRootFld => "LdRootFld",
            OpCode::LdMethodFld => "LdMethodFld",
            OpCode::LdRootMethodFld => "LdRootMethodFld",
            OpCode::ScopedLdMethodFld => "ScopedLdMethodFld",
            OpCode::LdFldForCallApplyTarget => "LdFldForCallApplyTarget",
            OpCode::LdMethodFromFlags => "LdMethodFromFlags",
            OpCode::CheckFixedFld => "CheckFixedFld",
            OpCode::CheckPropertyGuardAndLoadType => "CheckPropertyGuardAndLoadType",
            OpCode::LdMethodFldPolyInlineMiss => "LdMethodFldPolyInlineMiss",
            OpCode::DomFastPathGetter => "DomFastPathGetter",
            OpCode::StartCall => "StartCall",
            OpCode::ArgOut => "ArgOut",
            OpCode::ArgOutInline => "ArgOutInline",
            OpCode::ArgOutFromStackArgs => "ArgOutFromStackArgs",
            OpCode::ArgOutFixupForStackArgs => "ArgOutFixupForStackArgs",
            OpCode::ArgOutInlineBuiltIn => "ArgOutInlineBuiltIn",
            OpCode::ArgOutInlineSpecialized => "ArgOutInlineSpecialized",
            OpCode::ArgOutDynamic => "ArgOutDynamic",
            OpCode::ArgOutSpreadArg => "ArgOutSpreadArg",
            OpCode::ArgIn => "ArgIn",
            OpCode::ArgInRest => "ArgInRest",
            OpCode::ExtendArg => "ExtendArg",
            OpCode::BytecodeArgOutCapture => "BytecodeArgOutCapture",
            OpCode::BytecodeArgOutUse => "BytecodeArgOutUse",
            OpCode::InlineeMetaArg => "InlineeMetaArg",
            OpCode::LdSpreadIndices => "LdSpreadIndices",
            OpCode::CallI => "CallI",
            OpCode::CallIFixed => "CallIFixed",
            OpCode::CallIExtended => "CallIExtended",
            OpCode::CallIDynamic => "CallIDynamic",
            OpCode::CallIDynamicSpread => "CallIDynamicSpread",
            OpCode::CallDirect => "CallDirect",
            OpCode::NewScObject => "NewScObject",
            OpCode::NewScObjArray => "NewScObjArray",
            OpCode::NewScObjectNoCtor => "NewScObjectNoCtor",
            OpCode::GetNewScObject => "GetNewScObject",
            OpCode::UpdateNewScObjectCache => "UpdateNewScObjectCache",
            OpCode::InlineeStart => "InlineeStart",
            OpCode::InlineeEnd => "InlineeEnd",
            OpCode::InlineBuiltInStart => "InlineBuiltInStart",
            OpCode::InlineBuiltInEnd => "InlineBuiltInEnd",
            OpCode::InlineNonTrackingBuiltInEnd => "InlineNonTrackingBuiltInEnd",
            OpCode::EndCallForPolymorphicInlinee => "EndCallForPolymorphicInlinee",
            OpCode::Ret => "Ret",
            OpCode::BailOnNotObject => "BailOnNotObject",
            OpCode::BailOnNotEqual => "BailOnNotEqual",
            OpCode::BailOnNotBuiltIn => "BailOnNotBuiltIn",
            OpCode::BailOnNotPolymorphicInlinee => "BailOnNotPolymorphicInlinee",
            OpCode::BailOnNotStackArgs => "BailOnNotStackArgs",
            OpCode::BailOnNotSpreadable => "BailOnNotSpreadable",
            OpCode::BailTarget => "BailTarget",
            OpCode::InitForInEnumerator => "InitForInEnumerator",
            OpCode::Throw => "Throw",
            OpCode::InlineThrow => "InlineThrow",
            OpCode::RuntimeTypeError => "RuntimeTypeError",
            OpCode::InlineRuntimeTypeError => "InlineRuntimeTypeError",
            OpCode::RuntimeReferenceError => "RuntimeReferenceError",
            OpCode::InlineRuntimeReferenceError => "InlineRuntimeReferenceError",
            OpCode::ByteCodeUses => "ByteCodeUses",
            OpCode::InlineMathAbs => "InlineMathAbs",
            OpCode::InlineMathFloor => "InlineMathFloor",
            OpCode::InlineMathCeil => "InlineMathCeil",
            OpCode::InlineMathRound => "InlineMathRound",
            OpCode::InlineMathSqrt => "InlineMathSqrt",
            OpCode::InlineMathMin => "InlineMathMin",
            OpCode::InlineMathMax => "InlineMathMax",
            OpCode::InlineMathImul => "InlineMathImul",
            OpCode::InlineMathClz32 => "InlineMathClz32",
            OpCode::InlineMathPow => "InlineMathPow",
            OpCode::InlineArrayPush => "InlineArrayPush",
            OpCode::InlineArrayPop => "InlineArrayPop",
            OpCode::InlineStringCharAt => "InlineStringCharAt",
            OpCode::InlineStringCharCodeAt => "InlineStringCharCodeAt",
            OpCode::InlineFunctionApply => "InlineFunctionApply",
            OpCode::InlineFunctionCall => "InlineFunctionCall",
        }
    }

    /// Parse an opcode name as printed by [`OpCode::name`]
    pub fn from_name(name: &str) -> Option<OpCode> {
        ALL_OPCODES.iter().copied().find(|op| op.name() == name)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Every opcode, in declaration order
pub const ALL_OPCODES: &[OpCode] = &[
    OpCode::FunctionEntry,
    OpCode::FunctionExit,
    OpCode::Label,
    OpCode::StatementBoundary,
    OpCode::Nop,
    OpCode::Br,
    OpCode::BrTrue,
    OpCode::BrFalse,
    OpCode::BrAddrEq,
    OpCode::BrOnEmpty,
    OpCode::Ld,
    OpCode::LdConstI4,
    OpCode::LdThis,
    OpCode::StrictLdThis,
    OpCode::CheckThis,
    OpCode::StrictCheckThis,
    OpCode::LdEnv,
    OpCode::LdNewTarget,
    OpCode::LdHomeObj,
    OpCode::LdFuncObj,
    OpCode::ChkNewCallFlag,
    OpCode::LdHeapArguments,
    OpCode::LdLetHeapArguments,
    OpCode::LdElem,
    OpCode::StElemC,
    OpCode::NewScArray,
    OpCode::Add,
    OpCode::Sub,
    OpCode::Mul,
    OpCode::Div,
    OpCode::Rem,
    OpCode::And,
    OpCode::Or,
    OpCode::Xor,
    OpCode::Shl,
    OpCode::Shr,
    OpCode::ShrU,
    OpCode::Neg,
    OpCode::Not,
    OpCode::Incr,
    OpCode::Decr,
    OpCode::LdFld,
    OpCode::StFld,
    OpCode::LdRootFld,
    OpCode::LdMethodFld,
    OpCode::LdRootMethodFld,
    OpCode::ScopedLdMethodFld,
    OpCode::LdFldForCallApplyTarget,
    OpCode::LdMethodFromFlags,
    OpCode::CheckFixedFld,
    OpCode::CheckPropertyGuardAndLoadType,
    OpCode::LdMethodFldPolyInlineMiss,
    OpCode::DomFastPathGetter,
    OpCode::StartCall,
    OpCode::ArgOut,
    OpCode::ArgOutInline,
    OpCode::ArgOutFromStackArgs,
    OpCode::ArgOutFixupForStackArgs,
    OpCode::ArgOutInlineBuiltIn,
    OpCode::ArgOutInlineSpecialized,
    OpCode::ArgOutDynamic,
    OpCode::ArgOutSpreadArg,
    OpCode::ArgIn,
    OpCode::ArgInRest,
    OpCode::ExtendArg,
    OpCode::BytecodeArgOutCapture,
    OpCode::BytecodeArgOutUse,
    OpCode::InlineeMetaArg,
    OpCode::LdSpreadIndices,
    OpCode::CallI,
    OpCode::CallIFixed,
    OpCode::CallIExtended,
    OpCode::CallIDynamic,
    OpCode::CallIDynamicSpread,
    OpCode::CallDirect,
    OpCode::NewScObject,
    OpCode::NewScObjArray,
    OpCode::NewScObjectNoCtor,
    OpCode::GetNewScObject,
    OpCode::UpdateNewScObjectCache,
    OpCode::InlineeStart,
    OpCode::InlineeEnd,
    OpCode::InlineBuiltInStart,
    OpCode::InlineBuiltInEnd,
    OpCode::InlineNonTrackingBuiltInEnd,
    OpCode::EndCallForPolymorphicInlinee,
    OpCode::Ret,
    OpCode::BailOnNotObject,
    OpCode::BailOnNotEqual,
    OpCode::BailOnNotBuiltIn,
    OpCode::BailOnNotPolymorphicInlinee,
    OpCode::BailOnNotStackArgs,
    OpCode::BailOnNotSpreadable,
    OpCode::BailTarget,
    OpCode::InitForInEnumerator,
    OpCode::Throw,
    OpCode::InlineThrow,
    OpCode::RuntimeTypeError,
    OpCode::InlineRuntimeTypeError,
    OpCode::RuntimeReferenceError,
    OpCode::InlineRuntimeReferenceError,
    OpCode::ByteCodeUses,
    OpCode::InlineMathAbs,
    OpCode::InlineMathFloor,
    OpCode::InlineMathCeil,
    OpCode::InlineMathRound,
    OpCode::InlineMathSqrt,
    OpCode::InlineMathMin,
    OpCode::InlineMathMax,
    OpCode::InlineMathImul,
    OpCode::InlineMathClz32,
    OpCode::InlineMathPow,
    OpCode::InlineArrayPush,
    OpCode::InlineArrayPop,
    OpCode::InlineStringCharAt,
    OpCode::InlineStringCharCodeAt,
    OpCode::InlineFunctionApply,
    OpCode::InlineFunctionCall,
];
