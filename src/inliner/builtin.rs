//! Built-in fast paths
//!
//! A call to a recognized built-in is bracketed by `InlineBuiltInStart`/`InlineBuiltInEnd`
//! and, for type-specialized built-ins, rewritten into the built-in's own opcode reading
//! its arguments directly. `charAt`-style built-ins become a direct helper call.
//! `Function.prototype.apply` and `call` are forwarded to [`super::apply_call`].

use std::sync::Arc;
use tracing::trace;

use super::fixed_method::FixedRequest;
use super::{byte_code_uses, operand_reg, DeclineReason, Inliner, Outcome, Unit};
use crate::error::Result;
use crate::guard;
use crate::ir::operand::HelperMethod;
use crate::ir::{BailOutKind, InstrId, Job, OpCode, Operand, SymFlags, SymId, ValueType};
use crate::profile::{BuiltinFlags, BuiltinFunction, Candidate};

impl Inliner<'_> {
    pub(super) fn inline_builtin(
        &mut self,
        job: &mut Job,
        unit: &mut Unit,
        call: InstrId,
        next: InstrId,
        candidate: &Arc<Candidate>,
        builtin: BuiltinFunction,
    ) -> Result<Outcome> {
        let info = builtin.info();
        let flags = info.flags;
        let caller_body = job.func(job.instr(call).func).body.clone();

        if info.opcode.needs_sse41() && (!self.config.sse4_1 || caller_body.floor_inlining_disabled) {
            return Ok(Outcome::Declined(DeclineReason::Disabled));
        }
        let actual_count = job.call_arg_slot(call).unwrap_or(0);
        if actual_count > self.config.argout_limit() {
            return Ok(Outcome::Declined(DeclineReason::TooManyArguments));
        }
        if (flags.contains(BuiltinFlags::FLOAT_TYPE_SPEC) && !self.config.float_type_spec)
            || (flags.contains(BuiltinFlags::INT_TYPE_SPEC) && !self.config.aggressive_int_type_spec)
            || (flags.contains(BuiltinFlags::LOSSY_INT) && !self.config.lossy_int_type_spec)
        {
            return Ok(Outcome::Declined(DeclineReason::TypeSpecDisabled));
        }
        if builtin == BuiltinFunction::FunctionApply && caller_body.inline_apply_disabled {
            return Ok(Outcome::Declined(DeclineReason::Disabled));
        }
        let dst = job.instr(call).dst();
        if !flags.contains(BuiltinFlags::IGNORE_DST) && dst.is_none() && info.opcode != OpCode::InlineArrayPop {
            return Ok(Outcome::Declined(DeclineReason::MissingDestination));
        }

        let arg_count = if flags.contains(BuiltinFlags::USE_SRC0) {
            actual_count
        } else {
            actual_count.saturating_sub(1)
        };
        let arity_ok = if flags.contains(BuiltinFlags::VARIADIC) {
            arg_count <= info.required_args
        } else {
            arg_count == info.required_args
        };
        if !arity_ok {
            return Ok(Outcome::Declined(DeclineReason::ArityMismatch));
        }

        match builtin {
            BuiltinFunction::FunctionApply => {
                return self.inline_apply(job, unit, call, next, candidate, arg_count.saturating_sub(1));
            }
            BuiltinFunction::FunctionCall => {
                return self.inline_call(job, unit, call, next, candidate, actual_count);
            }
            _ => {}
        }
        let helper = match builtin {
            BuiltinFunction::StringCharAt => Some(HelperMethod::StringCharAt),
            BuiltinFunction::StringCharCodeAt => Some(HelperMethod::StringCharCodeAt),
            _ => None,
        };
        if flags.contains(BuiltinFlags::CALL_DIRECT) && helper.is_none() {
            return Ok(Outcome::Declined(DeclineReason::UnsupportedShape));
        }

        // Committed
        let func = job.instr(call).func;
        let original_target = operand_reg(job.instr(call).src1);
        let request = FixedRequest {
            builtin: true,
            ..FixedRequest::inline(candidate)
        };
        if self.try_fixed_method(job, call, request)?.is_none() {
            let target = guard::call_target(job, call)?;
            guard::insert_builtin_check(job, self.ctx, target, builtin, call)?;
        }

        let end = match helper {
            Some(helper) if flags.contains(BuiltinFlags::CALL_DIRECT) => {
                let anchor = job.insert_before_byte_code_uses(call);
                let slot = job.new_arg_slot(func, 1);
                let target = job.unlink_src1(call);
                let link = job.unlink_src2(call);
                let function_arg = job.create_with(
                    OpCode::ArgOutInlineSpecialized,
                    Some(Operand::Sym(slot)),
                    target,
                    link,
                    func,
                );
                job.copy_offset(function_arg, call);
                job.insert_before(anchor, function_arg)?;
                job.set_opcode(call, OpCode::CallDirect);
                job.set_src1(call, Some(Operand::Helper(helper)));
                job.set_src2(call, Some(Operand::Sym(slot)));
                job.move_args(call, true)?;
                call
            }
            _ => {
                let (_, end) = insert_builtin_tags(job, call, actual_count)?;
                if info.opcode == OpCode::InlineArrayPop {
                    job.set_opcode(end, OpCode::InlineNonTrackingBuiltInEnd);
                }
                end
            }
        };
        if let Some(target) = original_target {
            byte_code_uses(job, call, &[target])?;
        }

        if flags.contains(BuiltinFlags::TYPE_SPEC_REQUIRED) {
            self.specialize_builtin_call(job, call, end, info.opcode, arg_count, original_target)?;
        }

        if info.return_type != ValueType::Unknown {
            if let Some(dst) = dst.and_then(|d| d.sym()) {
                let sym = job.sym_mut(dst);
                sym.value_type = info.return_type;
                sym.flags.insert(SymFlags::VALUE_TYPE_FIXED);
            }
        }
        self.stats.builtins += 1;
        trace!(call = %call, builtin = builtin.name(), "inlined built-in");
        Ok(Outcome::Inlined)
    }

    /// Turn the bracketed call into the built-in's opcode with its inputs as sources
    fn specialize_builtin_call(
        &mut self,
        job: &mut Job,
        call: InstrId,
        end: InstrId,
        opcode: OpCode,
        arg_count: u16,
        original_target: Option<SymId>,
    ) -> Result<()> {
        let func = job.instr(call).func;
        let mut start = end;
        while job.opcode(start) != OpCode::InlineBuiltInStart {
            match job.prev(start) {
                Some(prev) => start = prev,
                None => return Ok(()),
            }
        }

        let mut original_dst = None;
        let mut tmp_dst = None;
        if job.instr(call).dst().is_some() && opcode != OpCode::InlineArrayPop {
            let tmp = job.new_jit_reg(func);
            original_dst = job.unlink_dst(call);
            job.set_dst(call, Some(Operand::Reg(tmp)));
            tmp_dst = Some(tmp);
        }
        if let Some(target) = original_target {
            let anchor = if opcode == OpCode::InlineArrayPop { call } else { end };
            byte_code_uses(job, anchor, &[target])?;
        }
        if let (Some(dst), Some(tmp)) = (original_dst, tmp_dst) {
            let ld = job.create_with(OpCode::Ld, Some(dst), Some(Operand::Reg(tmp)), None, func);
            job.copy_offset(ld, call);
            job.insert_before(end, ld)?;
        }

        let chain = job.arg_chain(call)?;
        job.unlink_src1(call);
        job.unlink_src2(call);
        job.set_opcode(call, opcode);

        let records_bailout = opcode.has_bailout_recording();
        let mut kept_alive = Vec::new();
        let mut arg_index = arg_count;
        let mut insert_point = start;
        for arg in chain.args {
            if let Some(slot) = job.instr(arg).dst().and_then(|d| d.slot()) {
                job.sym_mut(slot)
                    .flags
                    .insert(SymFlags::INLINED_ARG_SLOT | SymFlags::ALLOCATED);
            }
            let value = job.instr(arg).src1;
            if records_bailout {
                if let Some(sym) = value.and_then(|v| v.sym()) {
                    let constant_def = job
                        .sym(sym)
                        .single_def()
                        .and_then(|def| job.instr(def).src1)
                        .is_some_and(|src| matches!(src, Operand::IntConst(_)));
                    if !constant_def && !job.sym(sym).is_const() {
                        kept_alive.push(sym);
                    }
                }
            }
            job.generate_arg_out_capture(arg)?;
            job.set_opcode(arg, OpCode::ArgOutInlineBuiltIn);
            match arg_index {
                2 => job.set_src2(call, value),
                1 => job.set_src1(call, value),
                _ => {}
            }
            arg_index = arg_index.saturating_sub(1);
            job.move_before(arg, insert_point)?;
            insert_point = arg;
        }

        if opcode.truncates_to_int32() {
            let left = job.unlink_src1(call);
            let right = job.instr(call).src2;
            let s4 = self.truncate_input(job, call, left)?;
            job.set_src1(call, Some(Operand::Reg(s4)));
            if opcode == OpCode::InlineMathImul {
                if right.is_some() && right == left {
                    job.set_src2(call, Some(Operand::Reg(s4)));
                } else {
                    job.unlink_src2(call);
                    let s5 = self.truncate_input(job, call, right)?;
                    job.set_src2(call, Some(Operand::Reg(s5)));
                }
            }
        }

        if records_bailout && !kept_alive.is_empty() {
            byte_code_uses(job, end, &kept_alive)?;
        }
        if let Some(start_sym) = job.instr(chain.start_call).dst_sym() {
            job.sym_mut(start_sym).flags.insert(SymFlags::INLINED_ARG_SLOT);
        }
        if records_bailout {
            job.convert_to_bailout(call, BailOutKind::OnFloor, call);
        }
        Ok(())
    }

    /// `s = Or value, 0` in front of `call`
    fn truncate_input(&mut self, job: &mut Job, call: InstrId, value: Option<Operand>) -> Result<SymId> {
        let func = job.instr(call).func;
        let truncated = job.new_jit_reg(func);
        let or = job.create_with(
            OpCode::Or,
            Some(Operand::Reg(truncated)),
            value,
            Some(Operand::IntConst(0)),
            func,
        );
        job.copy_offset(or, call);
        job.insert_before(call, or)?;
        Ok(truncated)
    }
}

/// Bracket `call` with `InlineBuiltInStart`/`InlineBuiltInEnd`
pub(super) fn insert_builtin_tags(job: &mut Job, call: InstrId, actual_count: u16) -> Result<(InstrId, InstrId)> {
    let func = job.instr(call).func;
    let target = job.instr(call).src1;
    let link = job.instr(call).src2;
    let start = job.create_with(OpCode::InlineBuiltInStart, None, target, link, func);
    job.copy_offset(start, call);
    job.insert_before(call, start)?;
    let end = job.create_with(
        OpCode::InlineBuiltInEnd,
        None,
        Some(Operand::IntConst(actual_count as i64)),
        link,
        func,
    );
    job.copy_offset(end, call);
    job.insert_after(call, end)?;
    Ok((start, end))
}

/// Convert a forwarding built-in's arguments to built-in arguments right before `call`
///
/// Returns them by position, `this` first.
pub(super) fn builtin_arg_instrs(job: &mut Job, call: InstrId) -> Result<Vec<InstrId>> {
    let chain = job.arg_chain(call)?;
    let mut anchor = call;
    for arg in &chain.args {
        job.generate_arg_out_capture(*arg)?;
        job.set_opcode(*arg, OpCode::ArgOutInlineBuiltIn);
        if let Some(slot) = job.instr(*arg).dst().and_then(|d| d.slot()) {
            job.sym_mut(slot)
                .flags
                .insert(SymFlags::INLINED_ARG_SLOT | SymFlags::ALLOCATED);
        }
        job.move_before(*arg, anchor)?;
        anchor = *arg;
    }
    let mut by_position = chain.args;
    by_position.reverse();
    Ok(by_position)
}
