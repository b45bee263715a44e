//! Compilation units

use bitflags::bitflags;
use rustc_hash::FxHashMap as HashMap;
use std::sync::Arc;

use super::{FuncId, InstrId, ProfileId, SymId};
use crate::profile::{Candidate, CtorCache, FixedFieldInfo, FunctionBody};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FuncFlags: u32 {
        /// At least one call was inlined somewhere in the job (top unit only)
        const HAS_INLINEE = 1 << 0;
        /// Compiling a single loop body rather than a whole function
        const IS_LOOP_BODY = 1 << 1;
        const DEBUG_MODE = 1 << 2;
        /// Inlinee reached through `new`
        const INLINED_CTOR = 1 << 3;
        /// Inlinee reached through a getter or setter
        const GETTER_SETTER = 1 << 4;
        /// The unit's `arguments` is kept on the stack
        const HAS_STACK_ARGS = 1 << 5;
        const HAS_IMPLICIT_CALLS = 1 << 6;
        /// Apply-target inlining removed an `arguments` access from this unit
        const APPLY_TARGET_REMOVED_ARGS_ACCESS = 1 << 7;
        /// The inlinee reads `arguments` in a way the frame must support
        const HAS_UNOPTIMIZED_ARGS_ACCESS = 1 << 8;
        /// Inlined as the target of `apply`/`call`
        const IS_APPLY_TARGET_INLINEE = 1 << 9;
    }
}

/// One caller or callee instance being transformed
#[derive(Debug, Clone)]
pub struct Func {
    pub id: FuncId,
    pub parent: Option<FuncId>,
    pub head: InstrId,
    pub tail: InstrId,
    pub body: Arc<FunctionBody>,
    /// What the decider knows about this unit's own call sites
    pub info: Arc<Candidate>,
    pub flags: FuncFlags,
    /// Actual argument count, known only for inlinees
    pub actual_count: Option<u16>,
    pub for_in_base_depth: u32,
    /// Deepest for-in nesting across the whole job (top unit only)
    pub for_in_max_depth: u32,
    /// Identifies this inlinee's call site in frame and fixup tables
    pub call_site_id: u32,
    /// Frame slot of the first metadata arg of this inlinee
    pub frame_start_sym: Option<SymId>,
    /// Fixed function value the call was resolved to
    pub fixed_function: Option<Arc<FixedFieldInfo>>,
    /// Receiver is known to be an object already
    pub fixed_function_safe_this: bool,
    pub ctor_caches: HashMap<ProfileId, CtorCache>,
    /// Extra actuals appended to forwarded stack arguments, per call site
    pub args_offset_fixups: HashMap<u32, u16>,
}

impl Func {
    pub(crate) fn new(
        id: FuncId,
        parent: Option<FuncId>,
        head: InstrId,
        tail: InstrId,
        info: Arc<Candidate>,
        body: Arc<FunctionBody>,
    ) -> Self {
        Self {
            id,
            parent,
            head,
            tail,
            body,
            info,
            flags: FuncFlags::empty(),
            actual_count: None,
            for_in_base_depth: 0,
            for_in_max_depth: 0,
            call_site_id: 0,
            frame_start_sym: None,
            fixed_function: None,
            fixed_function_safe_this: false,
            ctor_caches: HashMap::default(),
            args_offset_fixups: HashMap::default(),
        }
    }

    pub fn is_top(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_inlinee(&self) -> bool {
        self.parent.is_some()
    }

    pub fn is_loop_body(&self) -> bool {
        self.flags.contains(FuncFlags::IS_LOOP_BODY)
    }

    pub fn is_inlined_ctor(&self) -> bool {
        self.flags.contains(FuncFlags::INLINED_CTOR)
    }

    pub fn is_getter_setter(&self) -> bool {
        self.flags.contains(FuncFlags::GETTER_SETTER)
    }

    pub fn has_stack_args(&self) -> bool {
        self.flags.contains(FuncFlags::HAS_STACK_ARGS)
    }

    pub fn has_inlinee(&self) -> bool {
        self.flags.contains(FuncFlags::HAS_INLINEE)
    }

    pub fn name(&self) -> &str {
        &self.body.name
    }
}
