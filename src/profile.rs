//! Read-only profile data consumed by the inliner
//!
//! Everything here is produced outside the compilation job (by the interpreter's
//! profiler and the inlining decider) and shared immutably between concurrent jobs,
//! which is why descriptors are handed around as `Arc`s and never mutated.

use bitflags::bitflags;
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::ir::{OpCode, ProfileId, ValueType};

/// Identity token of a function's code, shared by all closures over it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionInfoId(pub u64);

impl fmt::Display for FunctionInfoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fninfo#{}", self.0)
    }
}

/// Identity of one function object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionObjectId(pub u64);

impl fmt::Display for FunctionObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fnobj#{}", self.0)
    }
}

/// Identity of an object type (shape)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(pub u32);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(pub u32);

/// Byte-code level facts about one function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionBody {
    pub name: String,
    pub function_number: u32,
    pub function_info: FunctionInfoId,
    /// Declared parameters, including `this`
    pub in_params_count: u16,
    pub locals_count: u32,
    pub has_profile_info: bool,
    pub uses_arguments_object: bool,
    pub for_in_loop_depth: u32,
    pub profiled_call_site_count: u16,
    pub inline_spread_disabled: bool,
    pub inline_apply_disabled: bool,
    pub floor_inlining_disabled: bool,
    /// The profiler only ever saw object receivers for `this`
    pub this_is_simple: bool,
    pub check_this_disabled: bool,
}

impl Default for FunctionBody {
    fn default() -> Self {
        Self {
            name: String::from("<anonymous>"),
            function_number: 0,
            function_info: FunctionInfoId(0),
            in_params_count: 1,
            locals_count: 0,
            has_profile_info: true,
            uses_arguments_object: false,
            for_in_loop_depth: 0,
            profiled_call_site_count: 0,
            inline_spread_disabled: false,
            inline_apply_disabled: false,
            floor_inlining_disabled: false,
            this_is_simple: false,
            check_this_disabled: false,
        }
    }
}

impl FunctionBody {
    pub fn new(name: impl Into<String>, function_number: u32, in_params_count: u16) -> Self {
        Self {
            name: name.into(),
            function_number,
            function_info: FunctionInfoId(function_number as u64),
            in_params_count,
            ..Default::default()
        }
    }

    /// Formals excluding `this`
    pub fn formal_count(&self) -> u16 {
        self.in_params_count.saturating_sub(1)
    }
}

/// A property value cached as constant by the type system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedFieldInfo {
    pub function_object: FunctionObjectId,
    /// Code identity when the fixed value is a function
    #[serde(default)]
    pub function_info: Option<FunctionInfoId>,
    /// Closure environment of the function
    #[serde(default)]
    pub environment: Option<u64>,
    /// Type of the object the value was observed on
    #[serde(default)]
    pub type_id: Option<TypeId>,
}

/// Object-type specialization data attached to a property access
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjTypeSpecInfo {
    pub is_polymorphic: bool,
    pub fixed_fields: Vec<FixedFieldInfo>,
    pub has_equivalent_type_set: bool,
    pub is_root_non_configurable_field: bool,
}

impl ObjTypeSpecInfo {
    pub fn monomorphic(field: FixedFieldInfo) -> Self {
        Self {
            fixed_fields: vec![field],
            ..Default::default()
        }
    }

    pub fn polymorphic(fields: Vec<FixedFieldInfo>) -> Self {
        Self {
            is_polymorphic: true,
            fixed_fields: fields,
            ..Default::default()
        }
    }

    pub fn has_fixed_value(&self) -> bool {
        !self.fixed_fields.is_empty()
    }

    /// The fixed value for a monomorphic access, or the `index`-th one for a polymorphic access
    pub fn fixed_field(&self, index: usize) -> Option<&FixedFieldInfo> {
        if self.is_polymorphic {
            self.fixed_fields.get(index)
        } else {
            self.fixed_fields.first()
        }
    }
}

/// Constructor cache recorded by the interpreter for a `new` site
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CtorCache {
    pub type_id: Option<TypeId>,
    /// The constructor allocates its own object (built-in constructors)
    pub skip_default_new_object: bool,
    pub ctor_has_no_explicit_return_value: bool,
}

/// Well-known built-in functions with an inline fast path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinFunction {
    MathAbs,
    MathFloor,
    MathCeil,
    MathRound,
    MathSqrt,
    MathMin,
    MathMax,
    MathImul,
    MathClz32,
    MathPow,
    ArrayPush,
    ArrayPop,
    StringCharAt,
    StringCharCodeAt,
    FunctionApply,
    FunctionCall,
}

bitflags! {
    /// Inlining attributes of a built-in
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BuiltinFlags: u16 {
        /// `this` is an input of the fast path
        const USE_SRC0 = 1 << 0;
        /// Accepts up to the required argument count
        const VARIADIC = 1 << 1;
        const FLOAT_TYPE_SPEC = 1 << 2;
        const INT_TYPE_SPEC = 1 << 3;
        const LOSSY_INT = 1 << 4;
        /// The result may be discarded
        const IGNORE_DST = 1 << 5;
        /// Inputs are type-specialized; the call is rewritten to take them as sources
        const TYPE_SPEC_REQUIRED = 1 << 6;
        /// Lowered as a direct helper call rather than inline code
        const CALL_DIRECT = 1 << 7;
    }
}

/// How a built-in is inlined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinInfo {
    pub opcode: OpCode,
    pub return_type: ValueType,
    pub flags: BuiltinFlags,
    /// Argument count, counting `this` only for `USE_SRC0` built-ins
    pub required_args: u16,
}

impl BuiltinFunction {
    pub fn info(self) -> BuiltinInfo {
        use BuiltinFlags as F;
        let (opcode, return_type, flags, required_args) = match self {
            BuiltinFunction::MathAbs => (
                OpCode::InlineMathAbs,
                ValueType::Number,
                F::FLOAT_TYPE_SPEC | F::TYPE_SPEC_REQUIRED,
                1,
            ),
            BuiltinFunction::MathFloor => (
                OpCode::InlineMathFloor,
                ValueType::Int,
                F::FLOAT_TYPE_SPEC | F::TYPE_SPEC_REQUIRED,
                1,
            ),
            BuiltinFunction::MathCeil => (
                OpCode::InlineMathCeil,
                ValueType::Int,
                F::FLOAT_TYPE_SPEC | F::TYPE_SPEC_REQUIRED,
                1,
            ),
            BuiltinFunction::MathRound => (
                OpCode::InlineMathRound,
                ValueType::Int,
                F::FLOAT_TYPE_SPEC | F::TYPE_SPEC_REQUIRED,
                1,
            ),
            BuiltinFunction::MathSqrt => (
                OpCode::InlineMathSqrt,
                ValueType::Float,
                F::FLOAT_TYPE_SPEC | F::TYPE_SPEC_REQUIRED,
                1,
            ),
            BuiltinFunction::MathMin => (
                OpCode::InlineMathMin,
                ValueType::Number,
                F::VARIADIC | F::FLOAT_TYPE_SPEC | F::TYPE_SPEC_REQUIRED,
                2,
            ),
            BuiltinFunction::MathMax => (
                OpCode::InlineMathMax,
                ValueType::Number,
                F::VARIADIC | F::FLOAT_TYPE_SPEC | F::TYPE_SPEC_REQUIRED,
                2,
            ),
            BuiltinFunction::MathImul => (
                OpCode::InlineMathImul,
                ValueType::Int,
                F::INT_TYPE_SPEC | F::LOSSY_INT | F::TYPE_SPEC_REQUIRED,
                2,
            ),
            BuiltinFunction::MathClz32 => (
                OpCode::InlineMathClz32,
                ValueType::Int,
                F::INT_TYPE_SPEC | F::LOSSY_INT | F::TYPE_SPEC_REQUIRED,
                1,
            ),
            BuiltinFunction::MathPow => (
                OpCode::InlineMathPow,
                ValueType::Number,
                F::FLOAT_TYPE_SPEC | F::TYPE_SPEC_REQUIRED,
                2,
            ),
            BuiltinFunction::ArrayPush => (
                OpCode::InlineArrayPush,
                ValueType::Unknown,
                F::USE_SRC0 | F::IGNORE_DST | F::TYPE_SPEC_REQUIRED,
                2,
            ),
            BuiltinFunction::ArrayPop => (
                OpCode::InlineArrayPop,
                ValueType::Unknown,
                F::USE_SRC0 | F::TYPE_SPEC_REQUIRED,
                1,
            ),
            BuiltinFunction::StringCharAt => (
                OpCode::CallDirect,
                ValueType::String,
                F::USE_SRC0 | F::CALL_DIRECT,
                2,
            ),
            BuiltinFunction::StringCharCodeAt => (
                OpCode::CallDirect,
                ValueType::Number,
                F::USE_SRC0 | F::CALL_DIRECT,
                2,
            ),
            BuiltinFunction::FunctionApply => (
                OpCode::InlineFunctionApply,
                ValueType::Unknown,
                F::USE_SRC0 | F::VARIADIC | F::IGNORE_DST,
                3,
            ),
            BuiltinFunction::FunctionCall => (
                OpCode::InlineFunctionCall,
                ValueType::Unknown,
                F::USE_SRC0 | F::VARIADIC | F::IGNORE_DST,
                15,
            ),
        };
        BuiltinInfo {
            opcode,
            return_type,
            flags,
            required_args,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinFunction::MathAbs => "Math.abs",
            BuiltinFunction::MathFloor => "Math.floor",
            BuiltinFunction::MathCeil => "Math.ceil",
            BuiltinFunction::MathRound => "Math.round",
            BuiltinFunction::MathSqrt => "Math.sqrt",
            BuiltinFunction::MathMin => "Math.min",
            BuiltinFunction::MathMax => "Math.max",
            BuiltinFunction::MathImul => "Math.imul",
            BuiltinFunction::MathClz32 => "Math.clz32",
            BuiltinFunction::MathPow => "Math.pow",
            BuiltinFunction::ArrayPush => "Array.prototype.push",
            BuiltinFunction::ArrayPop => "Array.prototype.pop",
            BuiltinFunction::StringCharAt => "String.prototype.charAt",
            BuiltinFunction::StringCharCodeAt => "String.prototype.charCodeAt",
            BuiltinFunction::FunctionApply => "Function.prototype.apply",
            BuiltinFunction::FunctionCall => "Function.prototype.call",
        }
    }
}

/// One potential callee at one call site, as described by the inlining decider
///
/// A candidate also carries what the decider knows about the call sites *inside* its
/// own body, so the descriptor of the function being compiled is a `Candidate` too.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub function_info: FunctionInfoId,
    /// Script body, absent for built-ins and host functions
    pub body: Option<Arc<FunctionBody>>,
    pub builtin: Option<BuiltinFunction>,
    /// Whether the decider wants this candidate inlined (a polymorphic arm may only be called)
    pub is_inlined: bool,
    /// Next candidate at a polymorphic site
    pub next: Option<Arc<Candidate>>,
    pub call_sites: HashMap<ProfileId, Arc<Candidate>>,
    /// Accessor candidates keyed by inline-cache index
    pub ldfld_inlinees: HashMap<u32, Arc<Candidate>>,
    pub ctor_caches: HashMap<ProfileId, CtorCache>,
    /// A host-provided fast-path getter for a body-less accessor
    pub dom_fast_path_helper: Option<u64>,
}

impl Candidate {
    pub fn script(body: Arc<FunctionBody>) -> Self {
        Self {
            name: body.name.clone(),
            function_info: body.function_info,
            body: Some(body),
            builtin: None,
            is_inlined: true,
            next: None,
            call_sites: HashMap::default(),
            ldfld_inlinees: HashMap::default(),
            ctor_caches: HashMap::default(),
            dom_fast_path_helper: None,
        }
    }

    pub fn builtin(builtin: BuiltinFunction, function_info: FunctionInfoId) -> Self {
        Self {
            name: builtin.name().to_string(),
            function_info,
            body: None,
            builtin: Some(builtin),
            is_inlined: true,
            next: None,
            call_sites: HashMap::default(),
            ldfld_inlinees: HashMap::default(),
            ctor_caches: HashMap::default(),
            dom_fast_path_helper: None,
        }
    }

    /// A body-less callee that is neither a known built-in nor a fast-path getter
    pub fn host(name: impl Into<String>, function_info: FunctionInfoId) -> Self {
        Self {
            name: name.into(),
            function_info,
            body: None,
            builtin: None,
            is_inlined: false,
            next: None,
            call_sites: HashMap::default(),
            ldfld_inlinees: HashMap::default(),
            ctor_caches: HashMap::default(),
            dom_fast_path_helper: None,
        }
    }

    pub fn with_call_site(mut self, profile_id: ProfileId, candidate: Arc<Candidate>) -> Self {
        self.call_sites.insert(profile_id, candidate);
        self
    }

    pub fn with_ldfld_inlinee(mut self, cache_index: u32, candidate: Arc<Candidate>) -> Self {
        self.ldfld_inlinees.insert(cache_index, candidate);
        self
    }

    pub fn with_ctor_cache(mut self, profile_id: ProfileId, cache: CtorCache) -> Self {
        self.ctor_caches.insert(profile_id, cache);
        self
    }

    pub fn with_dom_fast_path(mut self, helper: u64) -> Self {
        self.dom_fast_path_helper = Some(helper);
        self
    }

    /// Mark the candidate as "call, don't inline"
    pub fn not_inlined(mut self) -> Self {
        self.is_inlined = false;
        self
    }

    /// Link candidates into a polymorphic chain, preserving order
    pub fn polymorphic(candidates: Vec<Candidate>) -> Option<Arc<Candidate>> {
        let mut next: Option<Arc<Candidate>> = None;
        for mut candidate in candidates.into_iter().rev() {
            candidate.next = next;
            next = Some(Arc::new(candidate));
        }
        next
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Iterate this candidate and its polymorphic siblings
    pub fn chain(self: &Arc<Self>) -> CandidateChain {
        CandidateChain {
            next: Some(self.clone()),
        }
    }

    pub fn chain_len(self: &Arc<Self>) -> usize {
        self.chain().count()
    }

    pub fn is_ldfld_inlinee_present(&self) -> bool {
        !self.ldfld_inlinees.is_empty()
    }
}

pub struct CandidateChain {
    next: Option<Arc<Candidate>>,
}

impl Iterator for CandidateChain {
    type Item = Arc<Candidate>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = current.next.clone();
        Some(current)
    }
}
