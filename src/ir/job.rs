//! The compilation job arena
//!
//! A [`Job`] owns every instruction, compilation unit, symbol and bailout record
//! created while compiling one top-level function. Nothing is freed individually:
//! an unlinked instruction keeps its arena slot (flagged deleted when removed), and the
//! whole job is dropped in one go when compilation ends or is abandoned.

use std::sync::Arc;

use super::{
    BailOutId, BailOutKind, BailOutRecord, Func, FuncId, Instr, InstrFlags, InstrId, OpCode,
    Operand, SymFlags, SymId, Symbol, SymbolTable,
};
use crate::error::{messages, Error, Result};
use crate::ensure_invariant;
use crate::profile::{Candidate, FunctionBody};

/// An argument chain walked back from a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgChain {
    /// Argument-defining instructions, from the one nearest the call back to the first
    pub args: Vec<InstrId>,
    pub start_call: InstrId,
}

#[derive(Debug)]
pub struct Job {
    instrs: Vec<Instr>,
    funcs: Vec<Func>,
    pub syms: SymbolTable,
    bailouts: Vec<BailOutRecord>,
    top: FuncId,
    next_call_site_id: u32,
}

impl Job {
    /// Create a job for the function described by `info`
    pub fn new(info: Arc<Candidate>) -> Result<Self> {
        let body = info
            .body
            .clone()
            .ok_or(Error::UnknownFunction(info.function_info.0 as u32))?;
        let mut job = Self {
            instrs: Vec::new(),
            funcs: Vec::new(),
            syms: SymbolTable::new(body.locals_count),
            bailouts: Vec::new(),
            top: FuncId::new(0),
            next_call_site_id: 0,
        };
        job.top = job.alloc_func(None, info, body);
        Ok(job)
    }

    /// Create a job for a function nobody has profiled call sites for
    pub fn with_body(body: Arc<FunctionBody>) -> Self {
        let info = Arc::new(Candidate::script(body.clone()));
        let mut job = Self {
            instrs: Vec::new(),
            funcs: Vec::new(),
            syms: SymbolTable::new(body.locals_count),
            bailouts: Vec::new(),
            top: FuncId::new(0),
            next_call_site_id: 0,
        };
        job.top = job.alloc_func(None, info, body);
        job
    }

    fn alloc_func(
        &mut self,
        parent: Option<FuncId>,
        info: Arc<Candidate>,
        body: Arc<FunctionBody>,
    ) -> FuncId {
        let id = FuncId::new(self.funcs.len() as u32);
        let head = self.alloc_instr(OpCode::FunctionEntry, id);
        let tail = self.alloc_instr(OpCode::FunctionExit, id);
        {
            let h = &mut self.instrs[head.index()];
            h.next = Some(tail);
            h.linked = true;
        }
        {
            let t = &mut self.instrs[tail.index()];
            t.prev = Some(head);
            t.linked = true;
        }
        self.funcs.push(Func::new(id, parent, head, tail, info, body));
        id
    }

    /// Create an (empty) inlinee unit under `parent`
    pub fn new_inlinee_func(
        &mut self,
        parent: FuncId,
        info: Arc<Candidate>,
        body: Arc<FunctionBody>,
    ) -> FuncId {
        let id = self.alloc_func(Some(parent), info, body);
        self.next_call_site_id += 1;
        self.funcs[id.index()].call_site_id = self.next_call_site_id;
        id
    }

    pub fn top(&self) -> FuncId {
        self.top
    }

    pub fn func(&self, id: FuncId) -> &Func {
        &self.funcs[id.index()]
    }

    pub fn func_mut(&mut self, id: FuncId) -> &mut Func {
        &mut self.funcs[id.index()]
    }

    pub fn top_func(&self) -> &Func {
        &self.funcs[self.top.index()]
    }

    pub fn top_func_mut(&mut self) -> &mut Func {
        let top = self.top;
        &mut self.funcs[top.index()]
    }

    pub fn func_count(&self) -> usize {
        self.funcs.len()
    }

    pub fn instr(&self, id: InstrId) -> &Instr {
        &self.instrs[id.index()]
    }

    pub fn instr_mut(&mut self, id: InstrId) -> &mut Instr {
        &mut self.instrs[id.index()]
    }

    pub fn opcode(&self, id: InstrId) -> OpCode {
        self.instrs[id.index()].opcode
    }

    pub fn sym(&self, id: SymId) -> &Symbol {
        self.syms.get(id)
    }

    pub fn sym_mut(&mut self, id: SymId) -> &mut Symbol {
        self.syms.get_mut(id)
    }

    pub fn bailout(&self, id: BailOutId) -> &BailOutRecord {
        &self.bailouts[id.index()]
    }

    pub fn bailout_of(&self, instr: InstrId) -> Option<&BailOutRecord> {
        self.instr(instr).bailout.map(|id| self.bailout(id))
    }

    // ==================== Instructions ====================

    fn alloc_instr(&mut self, opcode: OpCode, func: FuncId) -> InstrId {
        let id = InstrId::new(self.instrs.len() as u32);
        self.instrs.push(Instr::new(id, opcode, func));
        id
    }

    /// Create a detached instruction
    pub fn create(&mut self, opcode: OpCode, func: FuncId) -> InstrId {
        self.alloc_instr(opcode, func)
    }

    /// Create a detached instruction with operands
    pub fn create_with(
        &mut self,
        opcode: OpCode,
        dst: Option<Operand>,
        src1: Option<Operand>,
        src2: Option<Operand>,
        func: FuncId,
    ) -> InstrId {
        let id = self.alloc_instr(opcode, func);
        self.set_dst(id, dst);
        let instr = &mut self.instrs[id.index()];
        instr.src1 = src1;
        instr.src2 = src2;
        id
    }

    /// Copy of `from`'s byte-code offset, for instructions standing in for it
    pub fn copy_offset(&mut self, to: InstrId, from: InstrId) {
        let offset = self.instr(from).byte_code_offset;
        self.instr_mut(to).byte_code_offset = offset;
    }

    pub fn set_opcode(&mut self, id: InstrId, opcode: OpCode) {
        self.instr_mut(id).opcode = opcode;
    }

    /// Replace the destination, keeping definition counts accurate
    pub fn set_dst(&mut self, id: InstrId, dst: Option<Operand>) {
        self.unlink_dst(id);
        if let Some(sym) = dst.and_then(|d| match d {
            Operand::Reg(sym) | Operand::Sym(sym) => Some(sym),
            _ => None,
        }) {
            self.syms.get_mut(sym).record_def(id);
        }
        self.instr_mut(id).dst = dst;
    }

    /// Detach and return the destination
    pub fn unlink_dst(&mut self, id: InstrId) -> Option<Operand> {
        let dst = self.instr_mut(id).dst.take();
        if let Some(sym) = dst.and_then(|d| d.sym()) {
            self.syms.get_mut(sym).forget_def(id);
        }
        dst
    }

    pub fn set_src1(&mut self, id: InstrId, src: Option<Operand>) {
        self.instr_mut(id).src1 = src;
    }

    pub fn set_src2(&mut self, id: InstrId, src: Option<Operand>) {
        self.instr_mut(id).src2 = src;
    }

    pub fn unlink_src1(&mut self, id: InstrId) -> Option<Operand> {
        self.instr_mut(id).src1.take()
    }

    pub fn unlink_src2(&mut self, id: InstrId) -> Option<Operand> {
        self.instr_mut(id).src2.take()
    }

    // ==================== List editing ====================

    pub fn next(&self, id: InstrId) -> Option<InstrId> {
        self.instr(id).next
    }

    pub fn prev(&self, id: InstrId) -> Option<InstrId> {
        self.instr(id).prev
    }

    fn check_detached(&self, id: InstrId) -> Result<()> {
        let instr = self.instr(id);
        ensure_invariant!(
            !instr.linked,
            Error::list_shape(instr.func, id, messages::ALREADY_LINKED)
        );
        Ok(())
    }

    fn check_linked(&self, id: InstrId) -> Result<()> {
        let instr = self.instr(id);
        ensure_invariant!(
            instr.linked,
            Error::list_shape(instr.func, id, messages::DETACHED)
        );
        Ok(())
    }

    pub fn insert_before(&mut self, anchor: InstrId, id: InstrId) -> Result<()> {
        self.check_linked(anchor)?;
        self.check_detached(id)?;
        let prev = self.instr(anchor).prev;
        {
            let instr = self.instr_mut(id);
            instr.prev = prev;
            instr.next = Some(anchor);
            instr.linked = true;
            instr.flags.remove(InstrFlags::DELETED);
        }
        self.instr_mut(anchor).prev = Some(id);
        if let Some(prev) = prev {
            self.instr_mut(prev).next = Some(id);
        }
        Ok(())
    }

    pub fn insert_after(&mut self, anchor: InstrId, id: InstrId) -> Result<()> {
        self.check_linked(anchor)?;
        self.check_detached(id)?;
        let next = self.instr(anchor).next;
        {
            let instr = self.instr_mut(id);
            instr.prev = Some(anchor);
            instr.next = next;
            instr.linked = true;
            instr.flags.remove(InstrFlags::DELETED);
        }
        self.instr_mut(anchor).next = Some(id);
        if let Some(next) = next {
            self.instr_mut(next).prev = Some(id);
        }
        Ok(())
    }

    /// Take an instruction out of its list, reconnecting its neighbors
    pub fn unlink(&mut self, id: InstrId) -> Result<()> {
        self.check_linked(id)?;
        let (prev, next) = {
            let instr = self.instr(id);
            (instr.prev, instr.next)
        };
        if let Some(prev) = prev {
            self.instr_mut(prev).next = next;
        }
        if let Some(next) = next {
            self.instr_mut(next).prev = prev;
        }
        let instr = self.instr_mut(id);
        instr.prev = None;
        instr.next = None;
        instr.linked = false;
        Ok(())
    }

    /// Delete an instruction from the program
    pub fn remove(&mut self, id: InstrId) -> Result<()> {
        self.unlink(id)?;
        self.unlink_dst(id);
        if let Some(target) = self.instr_mut(id).target.take() {
            if let Some(label) = self.instr_mut(target).label.as_mut() {
                label.refs.retain(|r| *r != id);
            }
        }
        self.instr_mut(id).flags.insert(InstrFlags::DELETED);
        Ok(())
    }

    pub fn move_before(&mut self, id: InstrId, anchor: InstrId) -> Result<()> {
        if id == anchor {
            return Ok(());
        }
        self.unlink(id)?;
        self.insert_before(anchor, id)
    }

    pub fn move_after(&mut self, id: InstrId, anchor: InstrId) -> Result<()> {
        if id == anchor {
            return Ok(());
        }
        self.unlink(id)?;
        self.insert_after(anchor, id)
    }

    /// Cut the contiguous range `first..=last` out of its list
    fn cut_range(&mut self, first: InstrId, last: InstrId) -> Result<()> {
        self.check_linked(first)?;
        self.check_linked(last)?;
        let before = self.instr(first).prev;
        let after = self.instr(last).next;
        if let Some(before) = before {
            self.instr_mut(before).next = after;
        }
        if let Some(after) = after {
            self.instr_mut(after).prev = before;
        }
        self.instr_mut(first).prev = None;
        self.instr_mut(last).next = None;
        Ok(())
    }

    /// Splice the contiguous range `first..=last` in front of `anchor`
    pub fn insert_range_before(&mut self, anchor: InstrId, first: InstrId, last: InstrId) -> Result<()> {
        self.check_linked(anchor)?;
        self.cut_range(first, last)?;
        let prev = self.instr(anchor).prev;
        self.instr_mut(first).prev = prev;
        self.instr_mut(last).next = Some(anchor);
        self.instr_mut(anchor).prev = Some(last);
        if let Some(prev) = prev {
            self.instr_mut(prev).next = Some(first);
        }
        Ok(())
    }

    /// Splice the contiguous range `first..=last` right after `anchor`
    pub fn insert_range_after(&mut self, anchor: InstrId, first: InstrId, last: InstrId) -> Result<()> {
        self.check_linked(anchor)?;
        self.cut_range(first, last)?;
        let next = self.instr(anchor).next;
        self.instr_mut(last).next = next;
        self.instr_mut(first).prev = Some(anchor);
        self.instr_mut(anchor).next = Some(first);
        if let Some(next) = next {
            self.instr_mut(next).prev = Some(last);
        }
        Ok(())
    }

    /// Instructions of a unit's list, sentinels excluded
    pub fn func_instrs(&self, func: FuncId) -> Vec<InstrId> {
        let f = self.func(func);
        let mut out = Vec::new();
        let mut cur = self.next(f.head);
        while let Some(id) = cur {
            if id == f.tail {
                break;
            }
            out.push(id);
            cur = self.next(id);
        }
        out
    }

    /// Opcodes of a unit's list, sentinels excluded
    pub fn opcodes(&self, func: FuncId) -> Vec<OpCode> {
        self.func_instrs(func)
            .into_iter()
            .map(|id| self.opcode(id))
            .collect()
    }

    /// Check that a unit's list is connected both ways between its sentinels
    pub fn validate_list(&self, func: FuncId) -> Result<()> {
        let f = self.func(func);
        let mut prev = f.head;
        let mut cur = self.next(f.head);
        while let Some(id) = cur {
            let instr = self.instr(id);
            ensure_invariant!(
                instr.linked && instr.prev == Some(prev) && !instr.is_deleted(),
                Error::list_shape(func, id, "broken back link")
            );
            if id == f.tail {
                return Ok(());
            }
            prev = id;
            cur = instr.next;
        }
        Err(Error::list_shape(func, prev, "list does not reach the tail sentinel"))
    }

    /// The nearest preceding instruction that is not a `ByteCodeUses`
    pub fn prev_real_instr(&self, id: InstrId) -> Option<InstrId> {
        let mut cur = self.prev(id);
        while let Some(p) = cur {
            if self.opcode(p) != OpCode::ByteCodeUses {
                return Some(p);
            }
            cur = self.prev(p);
        }
        None
    }

    /// Insertion point in front of `id` that stays ahead of its `ByteCodeUses`
    pub fn insert_before_byte_code_uses(&self, id: InstrId) -> InstrId {
        let mut anchor = id;
        while let Some(p) = self.prev(anchor) {
            if self.opcode(p) != OpCode::ByteCodeUses {
                break;
            }
            anchor = p;
        }
        anchor
    }

    // ==================== Labels and branches ====================

    pub fn new_label(&mut self, func: FuncId, is_helper: bool) -> InstrId {
        let id = self.alloc_instr(OpCode::Label, func);
        if let Some(label) = self.instr_mut(id).label.as_mut() {
            label.is_helper = is_helper;
        }
        id
    }

    pub fn set_branch_target(&mut self, branch: InstrId, label: InstrId) {
        if let Some(old) = self.instr_mut(branch).target.replace(label) {
            if let Some(info) = self.instr_mut(old).label.as_mut() {
                info.refs.retain(|r| *r != branch);
            }
        }
        if let Some(info) = self.instr_mut(label).label.as_mut() {
            info.refs.push(branch);
        }
    }

    pub fn new_branch(
        &mut self,
        opcode: OpCode,
        target: InstrId,
        src1: Option<Operand>,
        src2: Option<Operand>,
        func: FuncId,
    ) -> InstrId {
        let id = self.create_with(opcode, None, src1, src2, func);
        self.set_branch_target(id, target);
        id
    }

    // ==================== Symbols ====================

    pub fn new_reg(&mut self, func: FuncId) -> SymId {
        self.syms.new_stack_sym(func)
    }

    /// A temporary created by the inliner itself
    pub fn new_jit_reg(&mut self, func: FuncId) -> SymId {
        let sym = self.syms.new_stack_sym(func);
        self.sym_mut(sym).flags.insert(SymFlags::JIT_OPTIMIZED);
        sym
    }

    pub fn new_arg_slot(&mut self, func: FuncId, slot: u16) -> SymId {
        self.syms.new_arg_slot_sym(func, slot)
    }

    /// Definition of the symbol behind an operand, ignoring single-def status
    pub fn def_of(&self, opnd: Operand) -> Option<InstrId> {
        opnd.sym().and_then(|sym| self.sym(sym).def)
    }

    // ==================== Argument chains ====================

    /// Walk a call's argument chain back to its `StartCall`
    pub fn arg_chain(&self, call: InstrId) -> Result<ArgChain> {
        let func = self.instr(call).func;
        let mut link = self
            .instr(call)
            .src2
            .ok_or_else(|| Error::arg_chain(func, call, messages::MISSING_LINK))?;
        let mut args = Vec::new();
        loop {
            let sym = link
                .sym()
                .ok_or_else(|| Error::arg_chain(func, call, messages::NOT_ARG_SLOT))?;
            let def = self
                .sym(sym)
                .def
                .ok_or_else(|| Error::arg_chain(func, call, messages::NOT_SINGLE_DEF))?;
            if self.opcode(def) == OpCode::StartCall {
                return Ok(ArgChain {
                    args,
                    start_call: def,
                });
            }
            ensure_invariant!(
                self.sym(sym).is_arg_slot() && self.opcode(def).is_arg_out(),
                Error::arg_chain(func, def, messages::NOT_ARG_SLOT)
            );
            ensure_invariant!(
                args.len() <= u16::MAX as usize,
                Error::arg_chain(func, call, messages::MISSING_START_CALL)
            );
            args.push(def);
            link = self
                .instr(def)
                .src2
                .ok_or_else(|| Error::arg_chain(func, def, messages::MISSING_START_CALL))?;
        }
    }

    pub fn start_call_of(&self, call: InstrId) -> Result<InstrId> {
        Ok(self.arg_chain(call)?.start_call)
    }

    /// Argument count recorded on a `StartCall`
    pub fn start_call_count(&self, start_call: InstrId) -> u16 {
        self.instr(start_call)
            .src1
            .and_then(|s| s.int_const())
            .unwrap_or(0) as u16
    }

    pub fn set_start_call_count(&mut self, start_call: InstrId, count: u16) {
        self.instr_mut(start_call).src1 = Some(Operand::IntConst(count as i64));
    }

    /// Highest arg slot number passed by a call (its actual count including `this`)
    pub fn call_arg_slot(&self, call: InstrId) -> Option<u16> {
        self.instr(call)
            .src2
            .and_then(|s| s.slot())
            .and_then(|sym| self.sym(sym).arg_slot)
    }

    /// Hoist an argument's value into a capture register kept alive for bailout
    pub fn generate_arg_out_capture(&mut self, arg_out: InstrId) -> Result<InstrId> {
        if let Some(capture) = self.arg_out_capture(arg_out) {
            return Ok(capture);
        }
        let func = self.instr(arg_out).func;
        let value = self.instr(arg_out).src1;
        let tmp = self.new_jit_reg(func);
        let capture = self.create_with(
            OpCode::BytecodeArgOutCapture,
            Some(Operand::Reg(tmp)),
            value,
            None,
            func,
        );
        self.copy_offset(capture, arg_out);
        self.insert_before(arg_out, capture)?;
        self.set_src1(arg_out, Some(Operand::Reg(tmp)));
        Ok(capture)
    }

    /// The capture feeding an argument, if one was generated
    pub fn arg_out_capture(&self, arg_out: InstrId) -> Option<InstrId> {
        let sym = self.instr(arg_out).src1?.reg()?;
        let def = self.sym(sym).single_def()?;
        (self.opcode(def) == OpCode::BytecodeArgOutCapture).then_some(def)
    }

    /// Move a call's arguments (and `StartCall`) right in front of it
    pub fn move_args(&mut self, call: InstrId, generate_captures: bool) -> Result<()> {
        let chain = self.arg_chain(call)?;
        let mut anchor = call;
        for arg in chain.args {
            if generate_captures {
                self.generate_arg_out_capture(arg)?;
            }
            self.move_before(arg, anchor)?;
            anchor = arg;
        }
        self.move_before(chain.start_call, anchor)
    }

    // ==================== Bailouts ====================

    pub fn new_bailout(&mut self, kind: BailOutKind, recovery: InstrId) -> BailOutId {
        let id = BailOutId::new(self.bailouts.len() as u32);
        let byte_code_offset = self.instr(recovery).byte_code_offset;
        self.bailouts.push(BailOutRecord {
            kind,
            recovery,
            byte_code_offset,
        });
        id
    }

    /// Attach a fresh bailout record to an existing instruction
    pub fn convert_to_bailout(&mut self, instr: InstrId, kind: BailOutKind, recovery: InstrId) -> BailOutId {
        let id = self.new_bailout(kind, recovery);
        self.instr_mut(instr).bailout = Some(id);
        id
    }

    pub fn share_bailout(&mut self, instr: InstrId, bailout: BailOutId) {
        self.instr_mut(instr).bailout = Some(bailout);
    }

    pub fn clear_bailout(&mut self, instr: InstrId) {
        self.instr_mut(instr).bailout = None;
    }

    pub fn bailout_count(&self) -> usize {
        self.bailouts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::FunctionBody;

    fn job() -> Job {
        Job::with_body(Arc::new(FunctionBody::new("f", 1, 2)))
    }

    fn append(job: &mut Job, opcode: OpCode) -> InstrId {
        let func = job.top();
        let tail = job.top_func().tail;
        let id = job.create(opcode, func);
        job.insert_before(tail, id).unwrap();
        id
    }

    #[test]
    fn test_insert_and_unlink_keep_list_connected() {
        let mut job = job();
        let a = append(&mut job, OpCode::Nop);
        let c = append(&mut job, OpCode::Ret);
        let b = job.create(OpCode::Ld, job.top());
        job.insert_after(a, b).unwrap();
        assert_eq!(job.opcodes(job.top()), vec![OpCode::Nop, OpCode::Ld, OpCode::Ret]);

        job.unlink(b).unwrap();
        assert_eq!(job.next(a), Some(c));
        assert_eq!(job.prev(c), Some(a));
        job.validate_list(job.top()).unwrap();
        assert!(job.insert_before(a, a).is_err());
    }

    #[test]
    fn test_insert_range_splices_between_lists() {
        let mut job = job();
        let anchor = append(&mut job, OpCode::Ret);
        let body = job.func(job.top()).body.clone();
        let info = job.func(job.top()).info.clone();
        let inlinee = job.new_inlinee_func(job.top(), info, body);
        let tail = job.func(inlinee).tail;
        let x = job.create(OpCode::Add, inlinee);
        let y = job.create(OpCode::Mul, inlinee);
        job.insert_before(tail, x).unwrap();
        job.insert_before(tail, y).unwrap();

        job.insert_range_before(anchor, x, y).unwrap();
        assert_eq!(job.opcodes(job.top()), vec![OpCode::Add, OpCode::Mul, OpCode::Ret]);
        assert!(job.func_instrs(inlinee).is_empty());
        job.validate_list(job.top()).unwrap();
        job.validate_list(inlinee).unwrap();
    }

    #[test]
    fn test_arg_chain_walks_to_start_call() {
        let mut job = job();
        let f = job.top();
        let start_reg = job.new_reg(f);
        let start = job.create_with(
            OpCode::StartCall,
            Some(Operand::Reg(start_reg)),
            Some(Operand::IntConst(2)),
            None,
            f,
        );
        let tail = job.top_func().tail;
        job.insert_before(tail, start).unwrap();
        let s1 = job.new_arg_slot(f, 1);
        let a1 = job.create_with(
            OpCode::ArgOut,
            Some(Operand::Sym(s1)),
            Some(Operand::Addr(crate::ir::AddrValue::Undefined)),
            Some(Operand::Reg(start_reg)),
            f,
        );
        job.insert_before(tail, a1).unwrap();
        let s2 = job.new_arg_slot(f, 2);
        let a2 = job.create_with(
            OpCode::ArgOut,
            Some(Operand::Sym(s2)),
            Some(Operand::IntConst(1)),
            Some(Operand::Sym(s1)),
            f,
        );
        job.insert_before(tail, a2).unwrap();
        let call = job.create_with(OpCode::CallI, None, None, Some(Operand::Sym(s2)), f);
        job.insert_before(tail, call).unwrap();

        let chain = job.arg_chain(call).unwrap();
        assert_eq!(chain.args, vec![a2, a1]);
        assert_eq!(chain.start_call, start);
        assert_eq!(job.call_arg_slot(call), Some(2));
        assert_eq!(job.start_call_count(start), 2);
    }

    #[test]
    fn test_broken_chain_is_invariant_violation() {
        let mut job = job();
        let f = job.top();
        let dangling = job.new_arg_slot(f, 1);
        let call = append(&mut job, OpCode::CallI);
        job.set_src2(call, Some(Operand::Sym(dangling)));
        let err = job.arg_chain(call).unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn test_remove_drops_label_ref() {
        let mut job = job();
        let f = job.top();
        let label = job.new_label(f, false);
        let tail = job.top_func().tail;
        job.insert_before(tail, label).unwrap();
        let br = job.new_branch(OpCode::Br, label, None, None, f);
        job.insert_before(tail, br).unwrap();
        assert_eq!(job.instr(label).label_info().unwrap().refs, vec![br]);
        job.remove(br).unwrap();
        assert!(job.instr(label).label_info().unwrap().refs.is_empty());
        assert!(job.instr(br).is_deleted());
    }
}
