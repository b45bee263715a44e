//! `Function.prototype.apply` and `Function.prototype.call`
//!
//! Both forward to another function. When that function is itself a profiled script
//! function with a fixed value, the forwarding is removed and the target is inlined in
//! its place. Otherwise the forwarding built-in is bracketed by built-in tags and the
//! call is rewritten into a direct call of the target:
//!
//! | shape                     | result                                            |
//! |---------------------------|---------------------------------------------------|
//! | `f.apply(o)`              | `CallI f` with `o` as `this`                      |
//! | `Math.max.apply(M, arr)`  | `CallDirect MaxInAnArray`                         |
//! | `f.apply(o, arguments)`   | `CallIDynamic f` over the caller's stack args     |
//! | `f.call(o, a, b)`         | `CallI f` with `o, a, b`                          |

use std::sync::Arc;
use tracing::trace;

use super::builtin::{builtin_arg_instrs, insert_builtin_tags};
use super::fixed_method::{FixedMethod, FixedRequest};
use super::script::InlineeCall;
use super::{byte_code_uses, operand_reg, DeclineReason, Inliner, Outcome, Unit};
use crate::error::{messages, Error, Result};
use crate::guard::{self, GuardKind};
use crate::ir::operand::HelperMethod;
use crate::ir::{BailOutKind, FuncFlags, InstrId, Job, OpCode, Operand, SymFlags, SymId};
use crate::profile::{BuiltinFunction, Candidate};

/// The function an `apply`/`call` forwards to, as the profile saw it
struct ForwardTarget {
    /// Load of the target function, right before the load of `apply`/`call`
    load: InstrId,
    candidate: Arc<Candidate>,
}

impl Inliner<'_> {
    /// `target.apply(this)` or `target.apply(this, array)`; `args_count` excludes the target
    pub(super) fn inline_apply(
        &mut self,
        job: &mut Job,
        unit: &mut Unit,
        call: InstrId,
        next: InstrId,
        candidate: &Arc<Candidate>,
        args_count: u16,
    ) -> Result<Outcome> {
        if args_count == 0 || args_count > 2 {
            return Ok(Outcome::Declined(DeclineReason::UnsupportedShape));
        }
        let caller = job.instr(call).func;
        let arguments = if args_count == 2 {
            self.forwarded_arguments(job, call)
        } else {
            None
        };

        if self.config.inline_apply_target && !self.in_apply_target_inline && (arguments.is_some() || args_count == 1) {
            if let Some(outcome) = self.try_inline_forward_target(job, unit, call, next, candidate, arguments, true)? {
                return Ok(outcome);
            }
        }

        if args_count == 1 {
            if !self.config.inline_apply_without_array_arg {
                return Ok(Outcome::Declined(DeclineReason::Disabled));
            }
            return self.inline_apply_without_array(job, unit, call, candidate);
        }
        match arguments {
            None => self.inline_apply_with_array(job, unit, call, candidate),
            Some(_) if !job.func(caller).has_stack_args() => Ok(Outcome::Declined(DeclineReason::Disabled)),
            Some(arguments) => self.inline_apply_with_arguments_object(job, call, candidate, arguments),
        }
    }

    /// `target.call(this, args...)`; `actual_count` includes the target
    pub(super) fn inline_call(
        &mut self,
        job: &mut Job,
        unit: &mut Unit,
        call: InstrId,
        next: InstrId,
        candidate: &Arc<Candidate>,
        actual_count: u16,
    ) -> Result<Outcome> {
        if !self.config.inline_call {
            return Ok(Outcome::Declined(DeclineReason::Disabled));
        }
        // `f.call()` passes no `this`
        if actual_count < 2 {
            return Ok(Outcome::Declined(DeclineReason::UnsupportedShape));
        }
        if self.config.inline_call_target {
            if let Some(outcome) = self.try_inline_forward_target(job, unit, call, next, candidate, None, false)? {
                return Ok(outcome);
            }
        }

        let func = job.instr(call).func;
        let args = builtin_arg_instrs(job, call)?;
        self.fixed_or_guard(job, call, candidate, true)?;
        insert_builtin_tags(job, call, actual_count)?;

        let start_dst = job.new_reg(func);
        let start = job.create_with(
            OpCode::StartCall,
            Some(Operand::Reg(start_dst)),
            Some(Operand::IntConst((actual_count - 1) as i64)),
            None,
            func,
        );
        job.copy_offset(start, call);
        job.insert_before(call, start)?;

        let target = args.first().and_then(|implicit| job.instr(*implicit).src1);
        job.set_src1(call, target);
        job.unlink_src2(call);
        job.set_opcode(call, OpCode::CallI);

        let mut link_holder = call;
        for position in (1..actual_count as usize).rev() {
            let Some(&original) = args.get(position) else {
                continue;
            };
            let value = job.instr(original).src1;
            let tmp = job.new_jit_reg(func);
            let ld = job.create_with(OpCode::Ld, Some(Operand::Reg(tmp)), value, None, func);
            job.copy_offset(ld, original);
            job.insert_before(original, ld)?;

            let slot = job.new_arg_slot(func, position as u16);
            let clone = job.create_with(OpCode::ArgOut, Some(Operand::Sym(slot)), Some(Operand::Reg(tmp)), None, func);
            job.copy_offset(clone, call);
            job.insert_before(call, clone)?;
            job.set_src2(link_holder, Some(Operand::Sym(slot)));
            link_holder = clone;
        }
        job.set_src2(link_holder, Some(Operand::Reg(start_dst)));

        self.stats.apply_call += 1;
        trace!(call = %call, args = actual_count - 1, "call forwarded to its target");
        Ok(Outcome::Inlined)
    }

    /// `f.apply(o)` becomes `f(o)`
    fn inline_apply_without_array(
        &mut self,
        job: &mut Job,
        unit: &Unit,
        call: InstrId,
        candidate: &Arc<Candidate>,
    ) -> Result<Outcome> {
        let func = job.instr(call).func;
        let forward = self.forward_target(job, unit, call);
        let args = builtin_arg_instrs(job, call)?;
        let (Some(&implicit), Some(&explicit)) = (args.first(), args.get(1)) else {
            return Err(Error::arg_chain(func, call, messages::MISSING_LINK));
        };
        self.fixed_or_guard(job, call, candidate, true)?;
        insert_builtin_tags(job, call, 2)?;

        let start_dst = job.new_reg(func);
        let start = job.create_with(
            OpCode::StartCall,
            Some(Operand::Reg(start_dst)),
            Some(Operand::IntConst(1)),
            None,
            func,
        );
        job.copy_offset(start, call);
        job.insert_before(call, start)?;
        let slot = job.new_arg_slot(func, 1);
        let this_value = job.instr(explicit).src1;
        let this_arg = job.create_with(
            OpCode::ArgOut,
            Some(Operand::Sym(slot)),
            this_value,
            Some(Operand::Reg(start_dst)),
            func,
        );
        job.copy_offset(this_arg, call);
        job.insert_before(call, this_arg)?;

        let target = job.instr(implicit).src1;
        job.set_src1(call, target);
        job.set_src2(call, Some(Operand::Sym(slot)));
        job.set_opcode(call, OpCode::CallI);

        if let Some(forward) = forward {
            if forward.candidate.has_body() {
                let original_target = operand_reg(target);
                if self
                    .try_fixed_method(job, call, FixedRequest::inline(&forward.candidate))?
                    .is_some()
                {
                    if let Some(original) = original_target {
                        byte_code_uses(job, call, &[original])?;
                    }
                }
            }
        }

        self.stats.apply_call += 1;
        trace!(call = %call, "apply without array argument");
        Ok(Outcome::Inlined)
    }

    /// `Math.max.apply(M, arr)` and `Math.min.apply(M, arr)` scan the array directly
    fn inline_apply_with_array(
        &mut self,
        job: &mut Job,
        unit: &Unit,
        call: InstrId,
        candidate: &Arc<Candidate>,
    ) -> Result<Outcome> {
        let helper = self
            .forward_target(job, unit, call)
            .and_then(|forward| self.decider.builtin_of(&forward.candidate, self.ctx))
            .and_then(|builtin| match builtin {
                BuiltinFunction::MathMax => Some(HelperMethod::MaxInAnArray),
                BuiltinFunction::MathMin => Some(HelperMethod::MinInAnArray),
                _ => None,
            });
        let Some(helper) = helper else {
            return Ok(Outcome::Declined(DeclineReason::UnsupportedShape));
        };

        let func = job.instr(call).func;
        let args = builtin_arg_instrs(job, call)?;
        let (Some(&implicit), Some(&explicit), Some(&array)) = (args.first(), args.get(1), args.get(2)) else {
            return Err(Error::arg_chain(func, call, messages::MISSING_LINK));
        };
        self.fixed_or_guard(job, call, candidate, true)?;
        let (_, end) = insert_builtin_tags(job, call, 3)?;
        job.set_opcode(end, OpCode::InlineNonTrackingBuiltInEnd);

        let start_dst = job.new_reg(func);
        let start = job.create_with(
            OpCode::StartCall,
            Some(Operand::Reg(start_dst)),
            Some(Operand::IntConst(2)),
            None,
            func,
        );
        job.copy_offset(start, call);
        job.insert_before(call, start)?;

        let mut link = Operand::Reg(start_dst);
        for (slot_number, source) in [(1, explicit), (2, array)] {
            let slot = job.new_arg_slot(func, slot_number);
            let value = job.instr(source).src1;
            let arg = job.create_with(OpCode::ArgOut, Some(Operand::Sym(slot)), value, Some(link), func);
            job.copy_offset(arg, call);
            job.insert_before(call, arg)?;
            link = Operand::Sym(slot);
        }
        let function_slot = job.new_arg_slot(func, 1);
        let function_value = job.instr(implicit).src1;
        let function_arg = job.create_with(
            OpCode::ArgOutInlineSpecialized,
            Some(Operand::Sym(function_slot)),
            function_value,
            Some(link),
            func,
        );
        job.copy_offset(function_arg, call);
        job.insert_before(call, function_arg)?;

        job.set_opcode(call, OpCode::CallDirect);
        job.set_src1(call, Some(Operand::Helper(helper)));
        job.set_src2(call, Some(Operand::Sym(function_slot)));

        self.stats.apply_call += 1;
        trace!(call = %call, ?helper, "apply over an array");
        Ok(Outcome::Inlined)
    }

    /// `f.apply(o, arguments)` forwards the caller's stack arguments to a dynamic call
    fn inline_apply_with_arguments_object(
        &mut self,
        job: &mut Job,
        call: InstrId,
        candidate: &Arc<Candidate>,
        arguments: SymId,
    ) -> Result<Outcome> {
        let func = job.instr(call).func;
        let args = builtin_arg_instrs(job, call)?;
        let (Some(&implicit), Some(&explicit), Some(&forwarded)) = (args.first(), args.get(1), args.get(2)) else {
            return Err(Error::arg_chain(func, call, messages::MISSING_LINK));
        };
        // The forwarded argument reads the arguments object itself, not its capture
        job.set_src1(forwarded, Some(Operand::Reg(arguments)));

        let original_target = operand_reg(job.instr(call).src1);
        let request = FixedRequest {
            builtin: true,
            ..FixedRequest::inline(candidate)
        };
        let bailout = if self.try_fixed_method(job, call, request)?.is_some() {
            if let Some(original) = original_target {
                byte_code_uses(job, call, &[original])?;
            }
            job.new_bailout(BailOutKind::OnInlineFunction, call)
        } else {
            guard::prepare_insertion_point(job, self.ctx, call, candidate.function_info, implicit)?
        };
        guard::emit_guard(job, self.ctx, GuardKind::StackArgs { arguments }, implicit, bailout)?;
        insert_builtin_tags(job, call, 3)?;

        let start_dst = job.new_reg(func);
        let start = job.create_with(
            OpCode::StartCall,
            Some(Operand::Reg(start_dst)),
            Some(Operand::IntConst(2)),
            None,
            func,
        );
        job.copy_offset(start, call);
        job.insert_before(call, start)?;
        let stack_slot = job.new_arg_slot(func, 2);
        let stack_args = job.create_with(
            OpCode::ArgOutFromStackArgs,
            Some(Operand::Sym(stack_slot)),
            Some(Operand::Reg(arguments)),
            Some(Operand::Reg(start_dst)),
            func,
        );
        job.copy_offset(stack_args, call);
        job.insert_before(call, stack_args)?;
        let this_slot = job.new_arg_slot(func, 1);
        let this_value = job.instr(explicit).src1;
        let this_arg = job.create_with(
            OpCode::ArgOutDynamic,
            Some(Operand::Sym(this_slot)),
            this_value,
            Some(Operand::Sym(stack_slot)),
            func,
        );
        job.copy_offset(this_arg, call);
        job.insert_before(call, this_arg)?;

        let target = job.instr(implicit).src1;
        job.set_src1(call, target);
        job.set_src2(call, Some(Operand::Sym(this_slot)));
        job.set_opcode(call, OpCode::CallIDynamic);

        self.stats.apply_call += 1;
        trace!(call = %call, "apply over the arguments object");
        Ok(Outcome::Inlined)
    }

    /// Remove an `apply`/`call` forwarding and inline its target in place
    ///
    /// Returns `None`, with nothing changed, when the target does not qualify.
    #[allow(clippy::too_many_arguments)]
    fn try_inline_forward_target(
        &mut self,
        job: &mut Job,
        unit: &mut Unit,
        call: InstrId,
        next: InstrId,
        candidate: &Arc<Candidate>,
        arguments: Option<SymId>,
        is_apply: bool,
    ) -> Result<Option<Outcome>> {
        if !self.config.fixed_methods {
            return Ok(None);
        }
        let Some(forward) = self.forward_target(job, unit, call) else {
            return Ok(None);
        };
        let target = Arc::clone(&forward.candidate);
        let Some(body) = target.body.clone() else {
            return Ok(None);
        };
        if !body.has_profile_info || !self.config.inline_candidates {
            return Ok(None);
        }
        let Ok(chain) = job.arg_chain(call) else {
            return Ok(None);
        };
        let Some(&implicit) = chain.args.last() else {
            return Ok(None);
        };
        if chain.args.len() < 2 || job.call_arg_slot(call).unwrap_or(0) > self.config.argout_limit() {
            return Ok(None);
        }
        if self.should_decline(job, unit, call, &target, false, 0).is_some() {
            return Ok(None);
        }
        let builtin_request = FixedRequest {
            builtin: true,
            check_only: true,
            ..FixedRequest::inline(candidate)
        };
        let target_request = FixedRequest {
            check_only: true,
            ..FixedRequest::inline(&target)
        };
        if self.try_fixed_method(job, call, builtin_request)?.is_none()
            || self.try_fixed_method(job, implicit, target_request)?.is_none()
        {
            return Ok(None);
        }

        // Committed
        let func = job.instr(call).func;
        let forward_reg = operand_reg(job.instr(call).src1);
        let target_reg = operand_reg(job.instr(implicit).src1);
        let builtin_request = FixedRequest {
            builtin: true,
            ..FixedRequest::inline(candidate)
        };
        self.try_fixed_method(job, call, builtin_request)?;
        if let Some(reg) = forward_reg {
            byte_code_uses(job, call, &[reg])?;
        }
        let Some(fixed) = self.try_fixed_method(job, implicit, FixedRequest::inline(&target))? else {
            return Err(Error::shape(func, forward.load, "fixed target disappeared after check"));
        };
        if let Some(reg) = target_reg {
            byte_code_uses(job, implicit, &[reg])?;
        }

        let mut explicit_this = None;
        for (index, arg) in chain.args.iter().enumerate() {
            job.generate_arg_out_capture(*arg)?;
            if let Some(slot) = job.instr(*arg).dst().and_then(|d| d.slot()) {
                let s = job.sym_mut(slot);
                s.arg_slot = s.arg_slot.map(|n| n.saturating_sub(1));
            }
            if index + 2 == chain.args.len() {
                explicit_this = Some(*arg);
            }
        }
        let Some(explicit) = explicit_this else {
            return Err(Error::arg_chain(func, call, messages::MISSING_LINK));
        };

        let mut kept = vec![job.instr(implicit).src1];
        if let Some(arguments) = arguments {
            let Some(&forwarded) = chain.args.first() else {
                return Err(Error::arg_chain(func, call, messages::MISSING_LINK));
            };
            job.set_src1(forwarded, Some(Operand::Reg(arguments)));
            job.set_opcode(forwarded, OpCode::ArgOutFromStackArgs);
            let bailout = job.new_bailout(BailOutKind::OnInlineFunction, call);
            guard::emit_guard(job, self.ctx, GuardKind::StackArgs { arguments }, forwarded, bailout)?;
            kept.push(Some(Operand::Reg(arguments)));
            job.func_mut(func).flags.insert(FuncFlags::APPLY_TARGET_REMOVED_ARGS_ACCESS);
        }
        let use_instr = job.create_with(OpCode::BytecodeArgOutUse, None, kept[0], kept.get(1).copied().flatten(), func);
        job.copy_offset(use_instr, call);
        job.insert_before(call, use_instr)?;

        let safe_this = fixed.safe_this
            && unit.sym_this.is_some()
            && job
                .instr(explicit)
                .src1
                .and_then(|s| s.reg())
                .and_then(|capture| job.sym(capture).single_def())
                .and_then(|capture| job.instr(capture).src1)
                .and_then(|s| s.reg())
                == unit.sym_this;

        let start_link = job.instr(implicit).src2;
        job.set_src2(explicit, start_link);
        job.remove(implicit)?;
        let start_call = chain.start_call;
        let count = job.start_call_count(start_call);
        job.set_start_call_count(start_call, count.saturating_sub(1));
        if let Some(start_sym) = job.instr(start_call).dst_sym() {
            job.sym_mut(start_sym).flags.insert(SymFlags::INLINED_ARG_SLOT);
        }

        job.set_src1(call, Some(Operand::Addr(fixed.addr())));
        let ret = job.unlink_dst(call);
        let flags = if is_apply {
            FuncFlags::IS_APPLY_TARGET_INLINEE
        } else {
            FuncFlags::empty()
        };
        let inlinee = self.materializer.new_inlinee(job, func, &target, flags)?;

        let was_in_target = self.in_apply_target_inline;
        self.in_apply_target_inline = true;
        let outcome = self.inline_function_common(
            job,
            unit,
            next,
            InlineeCall {
                call,
                inlinee,
                candidate: &target,
                ret,
                checks_before: call,
                original_target: None,
                fixed: Some(FixedMethod { safe_this, ..fixed }),
                is_apply_target: is_apply,
            },
        );
        self.in_apply_target_inline = was_in_target;
        let outcome = outcome?;

        self.stats.apply_call += 1;
        trace!(call = %call, target = %target.name, is_apply, "inlined forwarding target");
        Ok(Some(outcome))
    }

    /// The profiled target of an `apply`/`call`, loaded right before the built-in itself
    fn forward_target(&self, job: &Job, unit: &Unit, call: InstrId) -> Option<ForwardTarget> {
        let builtin_reg = job.instr(call).src1?.reg()?;
        let builtin_load = job.sym(builtin_reg).single_def()?;
        let load = job.prev(builtin_load)?;
        if job.opcode(load) != OpCode::LdFldForCallApplyTarget || job.instr(load).is_from_accessor() {
            return None;
        }
        let cache_index = job
            .instr(load)
            .src1?
            .slot()
            .and_then(|prop| job.sym(prop).property())
            .and_then(|prop| prop.inline_cache_index)?;
        let caller = job.func(unit.func).info.clone();
        let candidate = self.decider.ldfld_inlinee(&caller, cache_index)?;
        Some(ForwardTarget { load, candidate })
    }

    /// The arguments object passed as an `apply` call's array, if that is what it is
    fn forwarded_arguments(&self, job: &Job, call: InstrId) -> Option<SymId> {
        let link = job.instr(call).src2?;
        let arg = job.def_of(link)?;
        let value = job.instr(arg).src1?.reg()?;
        let is_arguments = job.sym(value).flags.contains(SymFlags::ARGUMENTS_OBJECT)
            || job
                .sym(value)
                .single_def()
                .is_some_and(|def| matches!(job.opcode(def), OpCode::LdHeapArguments | OpCode::LdLetHeapArguments));
        is_arguments.then_some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InlinerConfig;
    use crate::context::InlineContext;
    use crate::decider::ProfileDecider;
    use crate::inliner::{inline_job, InlineStats};
    use crate::ir::FuncBuilder;
    use crate::materializer::FnIrBuilder;
    use crate::profile::{
        FixedFieldInfo, FunctionBody, FunctionInfoId, FunctionObjectId, ObjTypeSpecInfo, PropertyId,
    };

    struct Site {
        job: Job,
        call: InstrId,
    }

    /// `r = o.f.<builtin>(args...)` with the target load profiled as `target`
    fn forwarding_site(builtin: BuiltinFunction, target: Option<Arc<Candidate>>, argc: usize, arguments: bool) -> (Site, InlineContext) {
        site_with(builtin, target, argc, arguments, false)
    }

    /// Same shape, with both loads known to hold fixed functions
    fn fixed_site(builtin: BuiltinFunction, target: Arc<Candidate>, argc: usize, arguments: bool) -> (Site, InlineContext) {
        site_with(builtin, Some(target), argc, arguments, true)
    }

    fn fixed_spec(info: FunctionInfoId, object: u64) -> Arc<ObjTypeSpecInfo> {
        Arc::new(ObjTypeSpecInfo::monomorphic(FixedFieldInfo {
            function_object: FunctionObjectId(object),
            function_info: Some(info),
            environment: None,
            type_id: None,
        }))
    }

    fn site_with(
        builtin: BuiltinFunction,
        target: Option<Arc<Candidate>>,
        argc: usize,
        arguments: bool,
        fixed: bool,
    ) -> (Site, InlineContext) {
        let ctx = InlineContext::default();
        let info = ctx.function_info_of(builtin).unwrap();
        let forwarder = Arc::new(Candidate::builtin(builtin, info));
        let mut caller = Candidate::script(Arc::new(FunctionBody {
            locals_count: 8,
            profiled_call_site_count: 1,
            ..FunctionBody::new("f", 1, 1)
        }))
        .with_call_site(0, forwarder);
        let (target_spec, builtin_spec) = match (&target, fixed) {
            (Some(target), true) => (Some(fixed_spec(target.function_info, 0x51)), Some(fixed_spec(info, 0x50))),
            _ => (None, None),
        };
        if let Some(target) = target {
            caller = caller.with_ldfld_inlinee(3, target);
        }
        let mut job = Job::new(Arc::new(caller)).unwrap();
        let top = job.top();
        if arguments {
            job.top_func_mut().flags.insert(FuncFlags::HAS_STACK_ARGS);
        }
        let call = {
            let mut b = FuncBuilder::new(&mut job, top);
            let (o, f, apply, x, r, args) = (b.reg(0), b.reg(1), b.reg(2), b.reg(3), b.reg(4), b.reg(5));
            if arguments {
                b.emit(OpCode::LdHeapArguments, Some(Operand::Reg(args)), None, None).unwrap();
            }
            b.ld_fld(OpCode::LdFldForCallApplyTarget, f, o, PropertyId(1), Some(3), target_spec)
                .unwrap();
            b.ld_fld(OpCode::LdMethodFld, apply, f, PropertyId(2), Some(4), builtin_spec)
                .unwrap();
            let mut operands = vec![Operand::Reg(f), Operand::Reg(o)];
            for _ in 2..argc {
                operands.push(Operand::Reg(if arguments { args } else { x }));
            }
            operands.truncate(argc);
            b.call(OpCode::CallI, Some(r), apply, &operands, Some(0)).unwrap()
        };
        (Site { job, call }, ctx)
    }

    fn run(site: &mut Site, ctx: &InlineContext, config: &InlinerConfig) -> InlineStats {
        inline_job(&mut site.job, ctx, config, &ProfileDecider::default(), &FnIrBuilder::new()).unwrap()
    }

    fn run_with(site: &mut Site, ctx: &InlineContext, builder: &FnIrBuilder) -> InlineStats {
        inline_job(
            &mut site.job,
            ctx,
            &InlinerConfig::default(),
            &ProfileDecider::default(),
            builder,
        )
        .unwrap()
    }

    /// `g(this, x)` returning `x`
    fn target(profiled_call_sites: u16) -> Candidate {
        Candidate::script(Arc::new(FunctionBody {
            locals_count: 8,
            profiled_call_site_count: profiled_call_sites,
            ..FunctionBody::new("g", 2, 2)
        }))
    }

    fn returns_param() -> FnIrBuilder {
        FnIrBuilder::new().with(2, |b| {
            let x = b.reg(0);
            b.arg_in(x, 2)?;
            b.ret(Operand::Reg(x))?;
            Ok(())
        })
    }

    fn count(job: &Job, opcode: OpCode) -> usize {
        job.opcodes(job.top()).iter().filter(|op| **op == opcode).count()
    }

    #[test]
    fn test_apply_without_array_becomes_plain_call() {
        let (mut site, ctx) = forwarding_site(BuiltinFunction::FunctionApply, None, 2, false);
        let stats = run(&mut site, &ctx, &InlinerConfig::default());
        assert_eq!(stats.apply_call, 1);
        assert_eq!(site.job.opcode(site.call), OpCode::CallI);
        let chain = site.job.arg_chain(site.call).unwrap();
        assert_eq!(chain.args.len(), 1);
        assert_eq!(site.job.start_call_count(chain.start_call), 1);
        let ops = site.job.opcodes(site.job.top());
        assert!(ops.contains(&OpCode::InlineBuiltInStart));
        assert!(ops.contains(&OpCode::InlineBuiltInEnd));
    }

    #[test]
    fn test_math_max_apply_uses_array_helper() {
        let ctx = InlineContext::default();
        let max_info = ctx.function_info_of(BuiltinFunction::MathMax).unwrap();
        let max = Arc::new(Candidate::builtin(BuiltinFunction::MathMax, max_info));
        let (mut site, ctx) = forwarding_site(BuiltinFunction::FunctionApply, Some(max), 3, false);
        run(&mut site, &ctx, &InlinerConfig::default());
        assert_eq!(site.job.opcode(site.call), OpCode::CallDirect);
        assert_eq!(site.job.instr(site.call).src1, Some(Operand::Helper(HelperMethod::MaxInAnArray)));
        assert!(site
            .job
            .opcodes(site.job.top())
            .contains(&OpCode::InlineNonTrackingBuiltInEnd));
    }

    #[test]
    fn test_apply_with_unknown_array_target_declines() {
        let (mut site, ctx) = forwarding_site(BuiltinFunction::FunctionApply, None, 3, false);
        let top = site.job.top();
        let before = site.job.opcodes(top);
        let stats = run(&mut site, &ctx, &InlinerConfig::default());
        assert_eq!(site.job.opcodes(top), before);
        assert_eq!(stats.declined_for(DeclineReason::UnsupportedShape), 1);
    }

    #[test]
    fn test_apply_with_arguments_object_is_dynamic() {
        let (mut site, ctx) = forwarding_site(BuiltinFunction::FunctionApply, None, 3, true);
        run(&mut site, &ctx, &InlinerConfig::default());
        assert_eq!(site.job.opcode(site.call), OpCode::CallIDynamic);
        let ops = site.job.opcodes(site.job.top());
        assert!(ops.contains(&OpCode::BailOnNotStackArgs));
        assert!(ops.contains(&OpCode::ArgOutFromStackArgs));
        assert!(ops.contains(&OpCode::ArgOutDynamic));
    }

    #[test]
    fn test_apply_with_arguments_object_needs_stack_args() {
        let (mut site, ctx) = forwarding_site(BuiltinFunction::FunctionApply, None, 3, true);
        site.job.top_func_mut().flags.remove(FuncFlags::HAS_STACK_ARGS);
        let stats = run(&mut site, &ctx, &InlinerConfig::default());
        assert_eq!(site.job.opcode(site.call), OpCode::CallI);
        assert_eq!(stats.declined_for(DeclineReason::Disabled), 1);
    }

    #[test]
    fn test_call_reshuffles_arguments() {
        let (mut site, ctx) = forwarding_site(BuiltinFunction::FunctionCall, None, 4, false);
        let stats = run(&mut site, &ctx, &InlinerConfig::default());
        assert_eq!(stats.apply_call, 1);
        assert_eq!(site.job.opcode(site.call), OpCode::CallI);
        let chain = site.job.arg_chain(site.call).unwrap();
        assert_eq!(chain.args.len(), 3);
        assert_eq!(site.job.start_call_count(chain.start_call), 3);
        assert_eq!(site.job.call_arg_slot(site.call), Some(3));
    }

    #[test]
    fn test_call_without_this_declines() {
        let (mut site, ctx) = forwarding_site(BuiltinFunction::FunctionCall, None, 1, false);
        let stats = run(&mut site, &ctx, &InlinerConfig::default());
        assert_eq!(site.job.opcode(site.call), OpCode::CallI);
        assert_eq!(stats.declined_for(DeclineReason::UnsupportedShape), 1);
    }

    #[test]
    fn test_apply_target_inlined_over_arguments_object() {
        let (mut site, ctx) = fixed_site(BuiltinFunction::FunctionApply, Arc::new(target(0)), 3, true);
        let stats = run_with(&mut site, &ctx, &returns_param());
        assert_eq!(stats.apply_call, 1);
        assert_eq!(stats.inlined, 1);
        assert_eq!(site.job.opcode(site.call), OpCode::InlineeStart);

        // One guard for the forwarding built-in, one for its target
        assert_eq!(count(&site.job, OpCode::CheckFixedFld), 2);
        assert_eq!(count(&site.job, OpCode::BailOnNotStackArgs), 1);
        assert_eq!(count(&site.job, OpCode::ArgOutFixupForStackArgs), 1);
        assert_eq!(count(&site.job, OpCode::CallI), 0);
        assert_eq!(count(&site.job, OpCode::CallIDynamic), 0);

        let inlinee = site.job.instr(site.call).func;
        assert!(site.job.func(inlinee).flags.contains(FuncFlags::IS_APPLY_TARGET_INLINEE));
        assert!(site
            .job
            .top_func()
            .flags
            .contains(FuncFlags::APPLY_TARGET_REMOVED_ARGS_ACCESS));
    }

    #[test]
    fn test_call_target_inlined() {
        let (mut site, ctx) = fixed_site(BuiltinFunction::FunctionCall, Arc::new(target(0)), 3, false);
        let stats = run_with(&mut site, &ctx, &returns_param());
        assert_eq!(stats.apply_call, 1);
        assert_eq!(stats.inlined, 1);
        assert_eq!(site.job.opcode(site.call), OpCode::InlineeStart);
        assert_eq!(count(&site.job, OpCode::CheckFixedFld), 2);
        assert_eq!(count(&site.job, OpCode::CallI), 0);

        let top = site.job.top();
        let end = site
            .job
            .func_instrs(top)
            .into_iter()
            .find(|i| site.job.opcode(*i) == OpCode::InlineeEnd)
            .unwrap();
        // `o` and `a`; the forwarded function itself is gone
        assert_eq!(site.job.instr(end).src1, Some(Operand::IntConst(2 + 3)));
        let inlinee = site.job.instr(site.call).func;
        assert!(!site.job.func(inlinee).flags.contains(FuncFlags::IS_APPLY_TARGET_INLINEE));
    }

    #[test]
    fn test_apply_inside_apply_target_stays_a_call() {
        let ctx = InlineContext::default();
        let apply_info = ctx.function_info_of(BuiltinFunction::FunctionApply).unwrap();
        let h = Arc::new(Candidate::script(Arc::new(FunctionBody::new("h", 3, 1))));
        let h_info = h.function_info;
        let g = target(1)
            .with_call_site(0, Arc::new(Candidate::builtin(BuiltinFunction::FunctionApply, apply_info)))
            .with_ldfld_inlinee(3, h);
        // g(this, x) { return x.h.apply(x) }
        let builder = FnIrBuilder::new().with(2, move |b| {
            let (x, h, apply, r) = (b.reg(0), b.reg(1), b.reg(2), b.reg(3));
            b.arg_in(x, 2)?;
            b.ld_fld(
                OpCode::LdFldForCallApplyTarget,
                h,
                x,
                PropertyId(5),
                Some(3),
                Some(fixed_spec(h_info, 0x61)),
            )?;
            b.ld_fld(
                OpCode::LdMethodFld,
                apply,
                h,
                PropertyId(2),
                Some(4),
                Some(fixed_spec(apply_info, 0x60)),
            )?;
            b.call(OpCode::CallI, Some(r), apply, &[Operand::Reg(h), Operand::Reg(x)], Some(0))?;
            b.ret(Operand::Reg(r))?;
            Ok(())
        });

        let (mut site, ctx) = fixed_site(BuiltinFunction::FunctionApply, Arc::new(g), 2, false);
        let stats = run_with(&mut site, &ctx, &builder);
        assert_eq!(stats.inlined, 1);
        assert_eq!(stats.apply_call, 2);
        assert_eq!(count(&site.job, OpCode::InlineeStart), 1);
        let calls = count(&site.job, OpCode::CallI) + count(&site.job, OpCode::CallIFixed);
        assert_eq!(calls, 1);
    }
}
