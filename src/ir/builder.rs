//! Appending IR to a compilation unit
//!
//! Used by the byte-code to IR collaborator (see [`crate::materializer::IrBuilder`]),
//! by fixtures, and by tests that need a caller or callee body.

use std::sync::Arc;

use super::{
    AddrValue, ConstValue, FldFlags, FuncId, InstrFlags, InstrId, Job, OpCode, Operand, ProfileId, SymFlags,
    SymId,
};
use crate::error::Result;
use crate::ir::sym::PropertySym;
use crate::profile::{ObjTypeSpecInfo, PropertyId};

/// Appends instructions in front of a unit's tail sentinel
pub struct FuncBuilder<'a> {
    job: &'a mut Job,
    func: FuncId,
    next_offset: u32,
}

impl<'a> FuncBuilder<'a> {
    pub fn new(job: &'a mut Job, func: FuncId) -> Self {
        Self {
            job,
            func,
            next_offset: 0,
        }
    }

    pub fn func(&self) -> FuncId {
        self.func
    }

    pub fn job(&mut self) -> &mut Job {
        self.job
    }

    fn append(&mut self, id: InstrId) -> Result<InstrId> {
        let tail = self.job.func(self.func).tail;
        self.job.instr_mut(id).byte_code_offset = self.next_offset;
        self.next_offset += 1;
        self.job.insert_before(tail, id)?;
        Ok(id)
    }

    /// Symbol for byte-code register `reg`
    pub fn reg(&mut self, reg: u32) -> SymId {
        self.job.syms.reg_sym(self.func, reg)
    }

    pub fn temp(&mut self) -> SymId {
        self.job.new_reg(self.func)
    }

    pub fn emit(
        &mut self,
        opcode: OpCode,
        dst: Option<Operand>,
        src1: Option<Operand>,
        src2: Option<Operand>,
    ) -> Result<InstrId> {
        let id = self.job.create_with(opcode, dst, src1, src2, self.func);
        self.append(id)
    }

    /// `dst = ArgIn [param slot]`; slot 1 is `this`
    pub fn arg_in(&mut self, dst: SymId, slot: u16) -> Result<InstrId> {
        let param = self.job.syms.new_param_slot_sym(self.func, slot);
        self.emit(OpCode::ArgIn, Some(Operand::Reg(dst)), Some(Operand::Sym(param)), None)
    }

    pub fn arg_in_rest(&mut self, dst: SymId) -> Result<InstrId> {
        self.emit(OpCode::ArgInRest, Some(Operand::Reg(dst)), None, None)
    }

    pub fn ld_this(&mut self, dst: SymId, this: SymId) -> Result<InstrId> {
        self.emit(OpCode::LdThis, Some(Operand::Reg(dst)), Some(Operand::Reg(this)), None)
    }

    pub fn ld_const(&mut self, dst: SymId, value: i32) -> Result<InstrId> {
        let id = self.emit(
            OpCode::LdConstI4,
            Some(Operand::Reg(dst)),
            Some(Operand::IntConst(value as i64)),
            None,
        )?;
        self.mark_const(dst, ConstValue::Int(value));
        Ok(id)
    }

    pub fn ld_addr(&mut self, dst: SymId, value: AddrValue) -> Result<InstrId> {
        let id = self.emit(OpCode::Ld, Some(Operand::Reg(dst)), Some(Operand::Addr(value)), None)?;
        self.mark_const(dst, ConstValue::Addr(value));
        Ok(id)
    }

    fn mark_const(&mut self, sym: SymId, value: ConstValue) {
        let s = self.job.sym_mut(sym);
        if s.is_single_def() {
            s.flags.insert(SymFlags::CONST);
            s.constant = Some(value);
        }
    }

    pub fn ld(&mut self, dst: SymId, src: SymId) -> Result<InstrId> {
        self.emit(OpCode::Ld, Some(Operand::Reg(dst)), Some(Operand::Reg(src)), None)
    }

    pub fn binary(&mut self, opcode: OpCode, dst: SymId, left: SymId, right: SymId) -> Result<InstrId> {
        self.emit(
            opcode,
            Some(Operand::Reg(dst)),
            Some(Operand::Reg(left)),
            Some(Operand::Reg(right)),
        )
    }

    /// A property slot `object.property`
    pub fn property(
        &mut self,
        object: SymId,
        property_id: PropertyId,
        inline_cache_index: Option<u32>,
        type_spec: Option<Arc<ObjTypeSpecInfo>>,
    ) -> SymId {
        self.job.syms.new_property_sym(
            self.func,
            PropertySym {
                object,
                property_id,
                inline_cache_index,
                type_spec,
            },
        )
    }

    /// `dst = <load opcode> object.property`
    pub fn ld_fld(
        &mut self,
        opcode: OpCode,
        dst: SymId,
        object: SymId,
        property_id: PropertyId,
        inline_cache_index: Option<u32>,
        type_spec: Option<Arc<ObjTypeSpecInfo>>,
    ) -> Result<InstrId> {
        let prop = self.property(object, property_id, inline_cache_index, type_spec);
        self.emit(opcode, Some(Operand::Reg(dst)), Some(Operand::Sym(prop)), None)
    }

    /// Property access the profiler saw go through an accessor
    pub fn accessor_fld(
        &mut self,
        opcode: OpCode,
        dst: Option<SymId>,
        value: Option<SymId>,
        object: SymId,
        property_id: PropertyId,
        inline_cache_index: u32,
        flags: FldFlags,
    ) -> Result<InstrId> {
        let prop = self.property(object, property_id, Some(inline_cache_index), None);
        let id = if opcode == OpCode::StFld {
            self.emit(
                opcode,
                Some(Operand::Sym(prop)),
                value.map(Operand::Reg),
                None,
            )?
        } else {
            self.emit(
                opcode,
                dst.map(Operand::Reg),
                Some(Operand::Sym(prop)),
                None,
            )?
        };
        self.job.instr_mut(id).fld_flags = flags | FldFlags::FROM_ACCESSOR;
        Ok(id)
    }

    /// `StartCall`, one `ArgOut` per argument (`args[0]` is `this`), then the call
    pub fn call(
        &mut self,
        opcode: OpCode,
        dst: Option<SymId>,
        target: SymId,
        args: &[Operand],
        profile_id: Option<ProfileId>,
    ) -> Result<InstrId> {
        let start_reg = self.temp();
        self.emit(
            OpCode::StartCall,
            Some(Operand::Reg(start_reg)),
            Some(Operand::IntConst(args.len() as i64)),
            None,
        )?;
        let mut link = Operand::Reg(start_reg);
        for (i, arg) in args.iter().enumerate() {
            let slot = self.job.new_arg_slot(self.func, (i + 1) as u16);
            self.emit(OpCode::ArgOut, Some(Operand::Sym(slot)), Some(*arg), Some(link))?;
            link = Operand::Sym(slot);
        }
        let call = self.emit(opcode, dst.map(Operand::Reg), Some(Operand::Reg(target)), Some(link))?;
        self.job.instr_mut(call).profile_id = profile_id;
        Ok(call)
    }

    /// `dst = new ctor(args...)`; the object being constructed fills slot 1
    pub fn new_object(
        &mut self,
        dst: SymId,
        ctor: SymId,
        args: &[Operand],
        profile_id: Option<ProfileId>,
    ) -> Result<InstrId> {
        let start_reg = self.temp();
        self.emit(
            OpCode::StartCall,
            Some(Operand::Reg(start_reg)),
            Some(Operand::IntConst(args.len() as i64 + 1)),
            None,
        )?;
        let mut link = Operand::Reg(start_reg);
        for (i, arg) in args.iter().enumerate() {
            let slot = self.job.new_arg_slot(self.func, (i + 2) as u16);
            self.emit(OpCode::ArgOut, Some(Operand::Sym(slot)), Some(*arg), Some(link))?;
            link = Operand::Sym(slot);
        }
        let call = self.emit(
            OpCode::NewScObject,
            Some(Operand::Reg(dst)),
            Some(Operand::Reg(ctor)),
            Some(link),
        )?;
        let instr = self.job.instr_mut(call);
        instr.profile_id = profile_id;
        instr.flags.insert(InstrFlags::IS_CTOR_CALL);
        Ok(call)
    }

    pub fn ret(&mut self, value: Operand) -> Result<InstrId> {
        self.emit(OpCode::Ret, None, Some(value), None)
    }

    pub fn label(&mut self) -> Result<InstrId> {
        let id = self.job.new_label(self.func, false);
        self.append(id)
    }

    /// Append a label allocated earlier, so branches can reach it before it is placed
    pub fn place(&mut self, label: InstrId) -> Result<InstrId> {
        self.append(label)
    }

    pub fn loop_top(&mut self) -> Result<InstrId> {
        let id = self.label()?;
        if let Some(info) = self.job.instr_mut(id).label.as_mut() {
            info.is_loop_top = true;
        }
        Ok(id)
    }

    pub fn br(&mut self, opcode: OpCode, target: InstrId, cond: Option<SymId>) -> Result<InstrId> {
        let id = self
            .job
            .new_branch(opcode, target, cond.map(Operand::Reg), None, self.func);
        self.append(id)
    }

    pub fn statement(&mut self, index: u32) -> Result<InstrId> {
        let id = self.emit(OpCode::StatementBoundary, None, None, None)?;
        self.job.instr_mut(id).statement_index = Some(index);
        Ok(id)
    }
}
