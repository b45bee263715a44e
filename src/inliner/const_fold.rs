//! Integer constant folding of outgoing arguments
//!
//! The definition tree of an `ArgOut` value is folded bottom-up. Inside an inlinee an
//! `ArgIn` resolves through the caller's argument of the same position, so constants the
//! caller passes propagate into the inlinee's own calls. Every folded definition is
//! rewritten to `LdConstI4`.

use tracing::trace;

use super::{byte_code_uses, Inliner, Unit};
use crate::error::Result;
use crate::ir::{ConstValue, InstrId, Job, OpCode, Operand, SymFlags, SymId};

/// Deepest definition tree walked; a register read before its only definition in a
/// loop would otherwise recurse forever
const MAX_FOLD_DEPTH: u32 = 32;

impl Inliner<'_> {
    pub(super) fn fold_arg_out(&mut self, job: &mut Job, unit: &Unit, arg: InstrId) -> Result<()> {
        let Some(def) = single_def_of(job, job.instr(arg).src1) else {
            return Ok(());
        };
        if let Some(value) = self.fold(job, def, unit.caller_args.as_deref(), 0)? {
            trace!(instr = %arg, value, "argument folded to constant");
        }
        Ok(())
    }

    fn fold(
        &mut self,
        job: &mut Job,
        instr: InstrId,
        caller_args: Option<&[Option<InstrId>]>,
        depth: u32,
    ) -> Result<Option<i32>> {
        if depth > MAX_FOLD_DEPTH {
            return Ok(None);
        }
        let opcode = job.opcode(instr);
        let Some(src1) = job.instr(instr).src1 else {
            return Ok(None);
        };
        match src1 {
            Operand::IntConst(value) if opcode == OpCode::LdConstI4 => return Ok(i32::try_from(value).ok()),
            Operand::Sym(param) if opcode == OpCode::ArgIn => {
                let (Some(args), Some(slot)) = (caller_args, job.sym(param).param_slot) else {
                    return Ok(None);
                };
                let caller_arg = (slot as usize)
                    .checked_sub(1)
                    .and_then(|index| args.get(index).copied().flatten());
                let Some(def) = caller_arg.and_then(|arg| single_def_of(job, job.instr(arg).src1)) else {
                    return Ok(None);
                };
                return self.fold(job, def, None, depth + 1);
            }
            Operand::Reg(_) => {}
            _ => return Ok(None),
        }

        let Some(left_def) = single_def_of(job, Some(src1)) else {
            return Ok(None);
        };
        if opcode == OpCode::BytecodeArgOutCapture {
            // Captures keep their register; the value behind them is what folds
            return self.fold(job, left_def, caller_args, depth + 1);
        }

        let src2 = job.instr(instr).src2;
        let right_def = match src2 {
            Some(opnd) => match single_def_of(job, Some(opnd)) {
                Some(def) if opcode.is_foldable_binary() => Some(def),
                _ => return Ok(None),
            },
            None if opcode.is_foldable_unary() => None,
            None => return Ok(None),
        };
        if job.instr(instr).dst_sym().is_none() {
            return Ok(None);
        }

        let Some(left) = self.fold(job, left_def, caller_args, depth + 1)? else {
            return Ok(None);
        };
        let folded = match right_def {
            Some(def) => match self.fold(job, def, caller_args, depth + 1)? {
                Some(right) => opcode.fold_binary(left, right),
                None => return Ok(None),
            },
            None => opcode.fold_unary(left),
        };
        let Some(value) = folded.and_then(|v| i32::try_from(v).ok()) else {
            return Ok(None);
        };

        let live: Vec<SymId> = [Some(src1), src2]
            .into_iter()
            .flatten()
            .filter_map(|o| o.reg())
            .filter(|sym| job.sym(*sym).byte_code_reg.is_some())
            .collect();
        if !live.is_empty() {
            byte_code_uses(job, instr, &live)?;
        }
        job.set_opcode(instr, OpCode::LdConstI4);
        job.set_src1(instr, Some(Operand::IntConst(value as i64)));
        job.unlink_src2(instr);
        if let Some(dst) = job.instr(instr).dst_sym() {
            let sym = job.sym_mut(dst);
            sym.flags.insert(SymFlags::CONST);
            sym.constant = Some(ConstValue::Int(value));
        }
        self.stats.const_folds += 1;
        trace!(%instr, value, "folded to constant");
        Ok(Some(value))
    }
}

fn single_def_of(job: &Job, opnd: Option<Operand>) -> Option<InstrId> {
    opnd.and_then(|o| o.reg()).and_then(|sym| job.sym(sym).single_def())
}
