//! IR instructions and bailout records

use bitflags::bitflags;
use std::fmt;

use super::{BailOutId, FuncId, InstrId, OpCode, Operand, ProfileId, SymId};

bitflags! {
    /// Per-instruction attributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InstrFlags: u16 {
        /// The call invokes a constructor on an object it was handed
        const IS_CTOR_CALL = 1 << 0;
        /// Created by cloning another instruction
        const IS_CLONED = 1 << 1;
        /// The check relies on a fixed field value
        const USES_FIXED_VALUE = 1 << 2;
        /// Removed from its list and no longer part of the program
        const DELETED = 1 << 3;
        /// May call arbitrary code
        const HAS_IMPLICIT_CALLS = 1 << 4;
    }
}

bitflags! {
    /// Property access attributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FldFlags: u8 {
        /// The profiler observed the access going through a getter or setter
        const FROM_ACCESSOR = 1 << 0;
        /// Accessor is a getter
        const FROM_GETTER = 1 << 1;
        /// Accessor is a setter
        const FROM_SETTER = 1 << 2;
    }
}

/// What a guard checks; recorded on the bailout so the runtime knows why it deoptimized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BailOutKind {
    OnInlineFunction,
    OnPolymorphicInlineFunction,
    OnFailedPolymorphicInlineTypeCheck,
    FailedFixedFieldTypeCheck,
    FailedEquivalentFixedFieldTypeCheck,
    FailedFixedFieldCheck,
    /// The accessor slot no longer holds the profiled getter or setter
    FailedInlineTypeCheck,
    CheckThis,
    OnFloor,
    OnNotStackArgs,
    OnNotSpreadable,
    OnNotNativeArray,
}

impl fmt::Display for BailOutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BailOutKind::OnInlineFunction => "BailOutOnInlineFunction",
            BailOutKind::OnPolymorphicInlineFunction => "BailOutOnPolymorphicInlineFunction",
            BailOutKind::OnFailedPolymorphicInlineTypeCheck => {
                "BailOutOnFailedPolymorphicInlineTypeCheck"
            }
            BailOutKind::FailedFixedFieldTypeCheck => "BailOutFailedFixedFieldTypeCheck",
            BailOutKind::FailedEquivalentFixedFieldTypeCheck => {
                "BailOutFailedEquivalentFixedFieldTypeCheck"
            }
            BailOutKind::FailedFixedFieldCheck => "BailOutFailedFixedFieldCheck",
            BailOutKind::FailedInlineTypeCheck => "BailOutFailedInlineTypeCheck",
            BailOutKind::CheckThis => "BailOutCheckThis",
            BailOutKind::OnFloor => "BailOutOnFloor",
            BailOutKind::OnNotStackArgs => "BailOutOnNotStackArgs",
            BailOutKind::OnNotSpreadable => "BailOutOnNotSpreadable",
            BailOutKind::OnNotNativeArray => "BailOutOnNotNativeArray",
        };
        write!(f, "{}", name)
    }
}

/// Deoptimization record shared by one or more guards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BailOutRecord {
    pub kind: BailOutKind,
    /// Instruction whose unoptimized execution resumes on failure
    pub recovery: InstrId,
    pub byte_code_offset: u32,
}

/// Branch-target bookkeeping on a label
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelInfo {
    pub is_loop_top: bool,
    pub is_for_in_exit: bool,
    pub is_helper: bool,
    /// Branches that target this label
    pub refs: Vec<InstrId>,
}

/// One IR instruction
#[derive(Debug, Clone)]
pub struct Instr {
    pub id: InstrId,
    pub opcode: OpCode,
    pub(crate) dst: Option<Operand>,
    pub src1: Option<Operand>,
    pub src2: Option<Operand>,
    pub func: FuncId,
    pub(crate) prev: Option<InstrId>,
    pub(crate) next: Option<InstrId>,
    pub(crate) linked: bool,
    pub profile_id: Option<ProfileId>,
    pub fld_flags: FldFlags,
    pub flags: InstrFlags,
    pub byte_code_offset: u32,
    pub bailout: Option<BailOutId>,
    pub label: Option<LabelInfo>,
    pub(crate) target: Option<InstrId>,
    pub statement_index: Option<u32>,
    /// Symbols kept alive by a `ByteCodeUses`
    pub uses: Vec<SymId>,
}

impl Instr {
    pub(crate) fn new(id: InstrId, opcode: OpCode, func: FuncId) -> Self {
        Self {
            id,
            opcode,
            dst: None,
            src1: None,
            src2: None,
            func,
            prev: None,
            next: None,
            linked: false,
            profile_id: None,
            fld_flags: FldFlags::empty(),
            flags: InstrFlags::empty(),
            byte_code_offset: 0,
            bailout: None,
            label: if opcode == OpCode::Label {
                Some(LabelInfo::default())
            } else {
                None
            },
            target: None,
            statement_index: None,
            uses: Vec::new(),
        }
    }

    pub fn dst(&self) -> Option<Operand> {
        self.dst
    }

    pub fn prev(&self) -> Option<InstrId> {
        self.prev
    }

    pub fn next(&self) -> Option<InstrId> {
        self.next
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(InstrFlags::DELETED)
    }

    pub fn branch_target(&self) -> Option<InstrId> {
        self.target
    }

    pub fn is_profiled(&self) -> bool {
        self.profile_id.is_some()
    }

    pub fn is_ctor_call(&self) -> bool {
        self.flags.contains(InstrFlags::IS_CTOR_CALL)
    }

    pub fn has_bailout(&self) -> bool {
        self.bailout.is_some()
    }

    pub fn is_from_accessor(&self) -> bool {
        self.fld_flags.contains(FldFlags::FROM_ACCESSOR)
    }

    pub fn label_info(&self) -> Option<&LabelInfo> {
        self.label.as_ref()
    }

    /// The symbol defined by this instruction's destination
    pub fn dst_sym(&self) -> Option<SymId> {
        self.dst.and_then(|dst| dst.sym())
    }

    pub fn src1_sym(&self) -> Option<SymId> {
        self.src1.and_then(|src| src.sym())
    }

    pub fn src2_sym(&self) -> Option<SymId> {
        self.src2.and_then(|src| src.sym())
    }

    /// Does any source operand (or byte-code use) read `sym`?
    pub fn reads_sym(&self, sym: SymId) -> bool {
        let in_src = |op: &Option<Operand>| op.is_some_and(|op| op.used_syms().any(|s| s == sym));
        in_src(&self.src1) || in_src(&self.src2) || self.uses.contains(&sym)
    }
}
