//! Symbols and the job-wide symbol table

use bitflags::bitflags;
use rustc_hash::FxHashMap as HashMap;
use std::sync::Arc;

use super::{ArgSlot, ConstValue, FuncId, InstrId, SymId, ValueType};
use crate::profile::{BuiltinFunction, ObjTypeSpecInfo, PropertyId};

bitflags! {
    /// Symbol attributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SymFlags: u32 {
        /// Exactly one instruction defines this symbol
        const SINGLE_DEF = 1 << 0;
        /// A second definition was seen; never single-def again
        const MULTI_DEF = 1 << 1;
        const ARG_SLOT = 1 << 2;
        const PARAM_SLOT = 1 << 3;
        /// Argument slot captured by an inline; no physical stack adjustment
        const INLINED_ARG_SLOT = 1 << 4;
        const CONST = 1 << 5;
        /// Known to hold an object, so `this` conversion is unnecessary
        const SAFE_THIS = 1 << 6;
        const ALLOCATED = 1 << 7;
        /// Created by the inliner rather than the byte-code builder
        const JIT_OPTIMIZED = 1 << 8;
        const ARGUMENTS_OBJECT = 1 << 9;
        /// `value_type` is definite rather than a profile guess
        const VALUE_TYPE_FIXED = 1 << 10;
    }
}

/// A property access slot `object.property`
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySym {
    pub object: SymId,
    pub property_id: PropertyId,
    pub inline_cache_index: Option<u32>,
    pub type_spec: Option<Arc<ObjTypeSpecInfo>>,
}

impl PropertySym {
    pub fn is_obj_type_spec_candidate(&self) -> bool {
        self.type_spec.is_some()
    }

    pub fn is_root_non_configurable_field(&self) -> bool {
        self.type_spec
            .as_ref()
            .is_some_and(|info| info.is_root_non_configurable_field)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SymKind {
    Stack,
    Property(PropertySym),
}

/// A virtual register, argument slot or property slot
#[derive(Debug, Clone)]
pub struct Symbol {
    pub id: SymId,
    pub kind: SymKind,
    pub flags: SymFlags,
    /// Unit that allocated the symbol
    pub func: FuncId,
    pub arg_slot: Option<ArgSlot>,
    pub param_slot: Option<ArgSlot>,
    pub(crate) def: Option<InstrId>,
    pub(crate) def_count: u32,
    pub constant: Option<ConstValue>,
    pub value_type: ValueType,
    /// Frame offset assigned to an inlined argument slot
    pub arg_offset: Option<i32>,
    /// Byte-code register this symbol was built from
    pub byte_code_reg: Option<u32>,
    /// Built-in this symbol is known to hold
    pub builtin: Option<BuiltinFunction>,
}

impl Symbol {
    fn new(id: SymId, func: FuncId, kind: SymKind) -> Self {
        Self {
            id,
            kind,
            flags: SymFlags::empty(),
            func,
            arg_slot: None,
            param_slot: None,
            def: None,
            def_count: 0,
            constant: None,
            value_type: ValueType::Unknown,
            arg_offset: None,
            byte_code_reg: None,
            builtin: None,
        }
    }

    pub fn is_single_def(&self) -> bool {
        self.flags.contains(SymFlags::SINGLE_DEF)
    }

    /// The defining instruction, if the symbol is single-def
    pub fn single_def(&self) -> Option<InstrId> {
        if self.is_single_def() {
            self.def
        } else {
            None
        }
    }

    pub fn is_arg_slot(&self) -> bool {
        self.flags.contains(SymFlags::ARG_SLOT)
    }

    pub fn is_param_slot(&self) -> bool {
        self.flags.contains(SymFlags::PARAM_SLOT)
    }

    pub fn is_inlined_arg_slot(&self) -> bool {
        self.flags.contains(SymFlags::INLINED_ARG_SLOT)
    }

    pub fn is_const(&self) -> bool {
        self.flags.contains(SymFlags::CONST)
    }

    pub fn is_int_const(&self) -> bool {
        self.is_const() && matches!(self.constant, Some(ConstValue::Int(_)))
    }

    pub fn is_number_const(&self) -> bool {
        self.is_const() && self.constant.is_some_and(|c| c.is_number())
    }

    pub fn is_value_type_fixed(&self) -> bool {
        self.flags.contains(SymFlags::VALUE_TYPE_FIXED)
    }

    pub fn is_safe_this(&self) -> bool {
        self.flags.contains(SymFlags::SAFE_THIS)
    }

    pub fn property(&self) -> Option<&PropertySym> {
        match &self.kind {
            SymKind::Property(prop) => Some(prop),
            SymKind::Stack => None,
        }
    }

    pub(crate) fn record_def(&mut self, instr: InstrId) {
        self.def_count += 1;
        if self.flags.contains(SymFlags::MULTI_DEF) {
            return;
        }
        if self.def_count == 1 && self.def.is_none() {
            self.def = Some(instr);
            self.flags.insert(SymFlags::SINGLE_DEF);
        } else {
            self.def = None;
            self.flags.remove(SymFlags::SINGLE_DEF);
            self.flags.insert(SymFlags::MULTI_DEF);
        }
    }

    pub(crate) fn forget_def(&mut self, instr: InstrId) {
        self.def_count = self.def_count.saturating_sub(1);
        if self.def == Some(instr) {
            self.def = None;
        }
    }
}

/// Owner of every symbol in a job
///
/// Byte-code registers of an inlinee are renumbered into a fresh range while its IR is
/// being built, so that the callee's `r0` never aliases the caller's `r0`.
#[derive(Debug, Default)]
pub struct SymbolTable {
    syms: Vec<Symbol>,
    by_reg: HashMap<u32, SymId>,
    reg_base: u32,
    next_reg_base: u32,
}

impl SymbolTable {
    pub fn new(top_locals: u32) -> Self {
        Self {
            syms: Vec::new(),
            by_reg: HashMap::default(),
            reg_base: 0,
            next_reg_base: top_locals,
        }
    }

    pub fn len(&self) -> usize {
        self.syms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.syms.is_empty()
    }

    pub fn get(&self, id: SymId) -> &Symbol {
        &self.syms[id.index()]
    }

    pub fn get_mut(&mut self, id: SymId) -> &mut Symbol {
        &mut self.syms[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.syms.iter()
    }

    fn push(&mut self, func: FuncId, kind: SymKind) -> SymId {
        let id = SymId::new(self.syms.len() as u32);
        self.syms.push(Symbol::new(id, func, kind));
        id
    }

    /// A fresh temporary register
    pub fn new_stack_sym(&mut self, func: FuncId) -> SymId {
        self.push(func, SymKind::Stack)
    }

    /// The symbol for byte-code register `reg` of the unit currently being built
    pub fn reg_sym(&mut self, func: FuncId, reg: u32) -> SymId {
        let key = self.reg_base + reg;
        if let Some(id) = self.by_reg.get(&key) {
            return *id;
        }
        let id = self.push(func, SymKind::Stack);
        self.syms[id.index()].byte_code_reg = Some(key);
        self.by_reg.insert(key, id);
        self.next_reg_base = self.next_reg_base.max(key + 1);
        id
    }

    /// A fresh outgoing argument slot
    pub fn new_arg_slot_sym(&mut self, func: FuncId, slot: ArgSlot) -> SymId {
        let id = self.push(func, SymKind::Stack);
        let sym = &mut self.syms[id.index()];
        sym.arg_slot = Some(slot);
        sym.flags.insert(SymFlags::ARG_SLOT);
        id
    }

    /// An incoming parameter slot
    pub fn new_param_slot_sym(&mut self, func: FuncId, slot: ArgSlot) -> SymId {
        let id = self.push(func, SymKind::Stack);
        let sym = &mut self.syms[id.index()];
        sym.param_slot = Some(slot);
        sym.flags.insert(SymFlags::PARAM_SLOT);
        id
    }

    pub fn new_property_sym(&mut self, func: FuncId, property: PropertySym) -> SymId {
        self.push(func, SymKind::Property(property))
    }

    /// Start numbering registers for an inlinee with `locals` registers
    ///
    /// Returns the previous base, to be handed back to [`SymbolTable::clear_starting_reg`].
    pub fn set_starting_reg(&mut self, locals: u32) -> u32 {
        let saved = self.reg_base;
        self.reg_base = self.next_reg_base;
        self.next_reg_base += locals;
        saved
    }

    pub fn clear_starting_reg(&mut self, saved: u32) {
        self.reg_base = saved;
    }

    pub fn reg_base(&self) -> u32 {
        self.reg_base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_def_tracking() {
        let mut table = SymbolTable::new(0);
        let f = FuncId::new(0);
        let s = table.new_stack_sym(f);
        table.get_mut(s).record_def(InstrId::new(1));
        assert_eq!(table.get(s).single_def(), Some(InstrId::new(1)));

        // Moving the def keeps the symbol single-def
        table.get_mut(s).forget_def(InstrId::new(1));
        table.get_mut(s).record_def(InstrId::new(2));
        assert_eq!(table.get(s).single_def(), Some(InstrId::new(2)));

        table.get_mut(s).record_def(InstrId::new(3));
        assert!(!table.get(s).is_single_def());
        table.get_mut(s).forget_def(InstrId::new(3));
        assert!(!table.get(s).is_single_def());
    }

    #[test]
    fn test_inlinee_registers_do_not_collide() {
        let mut table = SymbolTable::new(4);
        let caller = FuncId::new(0);
        let callee = FuncId::new(1);
        let r0 = table.reg_sym(caller, 0);
        assert_eq!(table.reg_sym(caller, 0), r0);

        let saved = table.set_starting_reg(3);
        let callee_r0 = table.reg_sym(callee, 0);
        assert_ne!(callee_r0, r0);
        assert_eq!(table.get(callee_r0).byte_code_reg, Some(4));
        table.clear_starting_reg(saved);

        assert_eq!(table.reg_sym(caller, 0), r0);
        assert_eq!(table.set_starting_reg(1), 0);
        assert_eq!(table.reg_base(), 7);
    }
}
