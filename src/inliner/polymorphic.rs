//! Polymorphic call sites
//!
//! A site that saw several callees becomes a dispatch: one compare-and-branch per arm,
//! each arm inlining (or, when the arm is not worth it, directly calling) one candidate,
//! and a miss path that bails out. The generic form compares function infos; the fixed
//! form compares object types loaded by a property guard and jumps straight to the
//! fixed function for that type.
//!
//! ```text
//!     BrAddrEq $arm1, [target+info], &g1
//!     BrAddrEq $arm2, [target+info], &g2
//!     Br $miss
//! $dispatch:
//! $arm1:  InlineeStart ... Br $done
//! $arm2:  InlineeStart ... Br $done
//! $miss:  BailOnNotPolymorphicInlinee
//!         EndCallForPolymorphicInlinee
//! $done:
//! ```

use std::sync::Arc;
use tracing::trace;

use super::fixed_method::FixedRequest;
use super::{byte_code_uses, insert_statement_boundary, DeclineReason, Inliner, Outcome, Unit};
use crate::binder::{self, FormalBinding, INLINEE_META_ARG_COUNT};
use crate::error::Result;
use crate::guard;
use crate::ir::{
    AddrValue, BailOutKind, FuncFlags, IndirOperand, InstrFlags, InstrId, Job, OpCode, Operand,
};
use crate::profile::{Candidate, FixedFieldInfo, TypeId};

/// One fixed function of a polymorphic property and the types it was seen on
#[derive(Debug, Clone)]
struct FixedArm {
    field: FixedFieldInfo,
    types: Vec<TypeId>,
}

/// The pieces shared by every arm of one dispatch
#[derive(Debug, Clone, Copy)]
struct Dispatch {
    call: InstrId,
    ret: Option<Operand>,
    done: InstrId,
    dispatch: InstrId,
}

impl Inliner<'_> {
    /// Generic dispatch on the target's function info
    pub(super) fn inline_polymorphic(
        &mut self,
        job: &mut Job,
        unit: &mut Unit,
        call: InstrId,
        next: InstrId,
        head: &Arc<Candidate>,
    ) -> Result<Outcome> {
        let arms = match self.polymorphic_arms(job, call, head) {
            Ok(arms) => arms,
            Err(reason) => return Ok(Outcome::Declined(reason)),
        };

        let func = job.instr(call).func;
        let ret = job.unlink_dst(call);
        guard::insert_js_function_check(job, self.ctx, call, call, BailOutKind::OnPolymorphicInlineFunction)?;
        job.move_args(call, true)?;
        let site = self.open_dispatch(job, call, ret)?;

        let target = guard::call_target(job, call)?;
        for arm in &arms {
            let label = job.new_label(func, false);
            job.insert_before(call, label)?;
            self.insert_one_inlinee(job, unit, site, Operand::Reg(target), arm, None, false)?;
            let compare = job.new_branch(
                OpCode::BrAddrEq,
                label,
                Some(Operand::Indir(IndirOperand {
                    base: target,
                    index: None,
                    offset: self.ctx.layout.function_info_offset,
                })),
                Some(Operand::Addr(AddrValue::FunctionInfo(arm.function_info))),
                func,
            );
            job.copy_offset(compare, call);
            job.insert_before(site.dispatch, compare)?;
        }

        self.complete_polymorphic(job, site, None, BailOutKind::OnPolymorphicInlineFunction)?;
        job.top_func_mut().flags.insert(FuncFlags::HAS_INLINEE);
        insert_statement_boundary(job, unit, next)?;
        self.stats.polymorphic_sites += 1;
        trace!(call = %call, arms = arms.len(), "polymorphic dispatch on function info");
        Ok(Outcome::Inlined)
    }

    /// Dispatch on the receiver's type, using the fixed functions of the property the
    /// target was loaded from; falls back to [`Inliner::inline_polymorphic`]
    pub(super) fn inline_polymorphic_fixed(
        &mut self,
        job: &mut Job,
        unit: &mut Unit,
        call: InstrId,
        next: InstrId,
        head: &Arc<Candidate>,
    ) -> Result<Outcome> {
        let count = head.chain_len();
        if count < 2 || count > self.config.polymorphic_limit() {
            return Ok(Outcome::Declined(DeclineReason::PolymorphicArmCount));
        }
        if job.call_arg_slot(call).unwrap_or(0) > self.config.argout_limit() {
            return Ok(Outcome::Declined(DeclineReason::TooManyArguments));
        }
        let Some((ld, arms)) = self.fixed_arms(job, call, head, count) else {
            return self.inline_polymorphic(job, unit, call, next, head);
        };
        let first = &arms[0].1;
        let probe = FixedRequest {
            polymorphic: true,
            check_only: true,
            ..FixedRequest::inline(first)
        };
        if self.try_fixed_method(job, call, probe)?.is_none() {
            return self.inline_polymorphic(job, unit, call, next, head);
        }
        let safe_this = arms
            .iter()
            .flat_map(|(arm, _)| arm.types.iter())
            .all(|t| self.ctx.is_object_type(*t));

        let func = job.instr(call).func;
        let property = job.instr(ld).src1;
        let type_reg = job.new_jit_reg(func);
        let load_type = job.create_with(
            OpCode::CheckPropertyGuardAndLoadType,
            Some(Operand::Reg(type_reg)),
            property,
            None,
            func,
        );
        job.copy_offset(load_type, ld);
        job.insert_before(ld, load_type)?;
        job.convert_to_bailout(load_type, BailOutKind::FailedFixedFieldCheck, ld);

        let ret = job.unlink_dst(call);
        job.move_args(call, true)?;
        job.set_opcode(call, OpCode::CallIFixed);
        let site = self.open_dispatch(job, call, ret)?;

        for (arm, candidate) in &arms {
            let label = job.new_label(func, false);
            job.insert_before(call, label)?;
            let method = Operand::Addr(AddrValue::FixedFunction {
                object: arm.field.function_object,
                info: arm.field.function_info,
            });
            self.insert_one_inlinee(job, unit, site, method, candidate, Some(&arm.field), safe_this)?;
            for type_id in &arm.types {
                let compare = job.new_branch(
                    OpCode::BrAddrEq,
                    label,
                    Some(Operand::Reg(type_reg)),
                    Some(Operand::Addr(AddrValue::Type(*type_id))),
                    func,
                );
                job.copy_offset(compare, call);
                job.insert_before(site.dispatch, compare)?;
            }
        }

        job.unlink(ld)?;
        job.set_opcode(ld, OpCode::LdMethodFldPolyInlineMiss);
        self.complete_polymorphic(job, site, Some(ld), BailOutKind::OnFailedPolymorphicInlineTypeCheck)?;
        job.top_func_mut().flags.insert(FuncFlags::HAS_INLINEE);
        insert_statement_boundary(job, unit, next)?;
        self.stats.polymorphic_sites += 1;
        trace!(call = %call, arms = arms.len(), "polymorphic dispatch on fixed types");
        Ok(Outcome::Inlined)
    }

    /// Distinct candidates in profile order; bodyless ones become plain call arms
    fn polymorphic_arms(
        &self,
        job: &Job,
        call: InstrId,
        head: &Arc<Candidate>,
    ) -> std::result::Result<Vec<Arc<Candidate>>, DeclineReason> {
        let mut arms: Vec<Arc<Candidate>> = Vec::new();
        for candidate in head.chain() {
            if !arms.iter().any(|a| a.function_info == candidate.function_info) {
                arms.push(candidate);
            }
        }
        if arms.len() < 2 || arms.len() > self.config.polymorphic_limit() {
            return Err(DeclineReason::PolymorphicArmCount);
        }
        if job.call_arg_slot(call).unwrap_or(0) > self.config.argout_limit() {
            return Err(DeclineReason::TooManyArguments);
        }
        Ok(arms)
    }

    /// The target load and one arm per distinct fixed function, when the fixed form applies
    fn fixed_arms(
        &self,
        job: &Job,
        call: InstrId,
        head: &Arc<Candidate>,
        count: usize,
    ) -> Option<(InstrId, Vec<(FixedArm, Arc<Candidate>)>)> {
        let mut prev = job.prev(call);
        while let Some(instr) = prev {
            match job.opcode(instr) {
                OpCode::StartCall => break,
                op if op.is_arg_out() || op == OpCode::Ld => prev = job.prev(instr),
                _ => return None,
            }
        }

        let target = job.instr(call).src1?.reg()?;
        let ld = job.sym(target).single_def()?;
        let property = job.instr(ld).src1?.slot()?;
        let type_spec = job.sym(property).property()?.type_spec.clone()?;
        if !type_spec.has_fixed_value() || type_spec.fixed_fields.len() < 2 {
            return None;
        }

        // Types sharing a function object share an arm
        let mut groups: Vec<FixedArm> = Vec::new();
        for field in &type_spec.fixed_fields {
            let type_id = field.type_id?;
            field.function_info?;
            match groups
                .iter_mut()
                .find(|g| g.field.function_object == field.function_object)
            {
                Some(group) => group.types.push(type_id),
                None => groups.push(FixedArm {
                    field: field.clone(),
                    types: vec![type_id],
                }),
            }
        }
        if groups.len() != count {
            return None;
        }

        let mut arms = Vec::with_capacity(groups.len());
        for group in groups {
            let candidate = head
                .chain()
                .find(|c| Some(c.function_info) == group.field.function_info)?;
            arms.push((group, candidate));
        }
        Some((ld, arms))
    }

    /// Labels delimiting the dispatch
    fn open_dispatch(&mut self, job: &mut Job, call: InstrId, ret: Option<Operand>) -> Result<Dispatch> {
        let func = job.instr(call).func;
        let done = job.new_label(func, false);
        let dispatch = job.new_label(func, false);
        job.insert_before(call, dispatch)?;
        Ok(Dispatch {
            call,
            ret,
            done,
            dispatch,
        })
    }

    /// Emit one arm in front of the original call: an inlined body, or a direct call
    #[allow(clippy::too_many_arguments)]
    fn insert_one_inlinee(
        &mut self,
        job: &mut Job,
        unit: &mut Unit,
        site: Dispatch,
        method: Operand,
        candidate: &Arc<Candidate>,
        fixed: Option<&FixedFieldInfo>,
        safe_this: bool,
    ) -> Result<()> {
        let call = site.call;
        let func = job.instr(call).func;
        let inlined = candidate.is_inlined
            && self.config.inline_candidates
            && candidate.body.as_ref().is_some_and(|b| b.has_profile_info)
            && self.should_decline(job, unit, call, candidate, false, 0).is_none();

        let current = if inlined {
            let start_dst = job.new_reg(func);
            job.create_with(OpCode::InlineeStart, Some(Operand::Reg(start_dst)), Some(method), None, func)
        } else {
            let opcode = job.opcode(call);
            job.create_with(opcode, site.ret, Some(method), None, func)
        };
        job.copy_offset(current, call);
        job.instr_mut(current).flags.insert(InstrFlags::IS_CLONED);
        job.insert_before(call, current)?;
        self.clone_call_sequence(job, call, current)?;

        if !inlined {
            let branch = job.new_branch(OpCode::Br, site.done, None, None, func);
            job.copy_offset(branch, call);
            job.insert_before(call, branch)?;
            trace!(callee = %candidate.name, "polymorphic arm called");
            return Ok(());
        }

        let inlinee = self.materializer.new_inlinee(job, func, candidate, FuncFlags::empty())?;
        if let Some(field) = fixed {
            let f = job.func_mut(inlinee);
            f.fixed_function = Some(Arc::new(field.clone()));
            f.fixed_function_safe_this = safe_this;
        }
        self.build_inlinee(job, unit, current, inlinee, false)?;

        let in_params = job.func(inlinee).body.in_params_count;
        let actuals = binder::map_actuals(job, current, Some(inlinee), in_params, unit.frame_slot)?;
        let actual_count = actuals.actual_count();
        job.func_mut(inlinee).actual_count = Some(actual_count);
        let binding = FormalBinding {
            ret: site.ret,
            target: method,
            caller_this: unit.sym_this,
            fixed_function_safe_this: safe_this,
            check_this: self.config.check_this,
        };
        binder::map_formals(job, inlinee, &actuals, &binding)?;

        job.instr_mut(current).func = inlinee;
        binder::setup_inlinee_frame(job, inlinee, current, actual_count, unit.frame_slot)?;

        let (head, tail) = {
            let f = job.func(inlinee);
            (f.head, f.tail)
        };
        let start_dst = job.instr(current).dst();
        let end = job.create_with(
            OpCode::InlineeEnd,
            None,
            Some(Operand::IntConst((actual_count + INLINEE_META_ARG_COUNT) as i64)),
            start_dst,
            inlinee,
        );
        let last_real = job.prev_real_instr(tail).unwrap_or(current);
        job.copy_offset(end, last_real);
        job.insert_before(tail, end)?;
        let branch = job.new_branch(OpCode::Br, site.done, None, None, inlinee);
        job.copy_offset(branch, last_real);
        job.insert_before(tail, branch)?;

        if let (Some(first), Some(last)) = (job.next(head), job.prev(tail)) {
            if first != tail {
                job.insert_range_after(current, first, last)?;
            }
        }
        self.stats.inlined += 1;
        self.stats.polymorphic_arms += 1;
        self.stats.note_depth(unit.depth + 1);
        trace!(callee = %candidate.name, inlinee = %inlinee, "polymorphic arm inlined");
        Ok(())
    }

    /// Copy `call`'s arguments for `clone`, sharing the original `StartCall`
    fn clone_call_sequence(&mut self, job: &mut Job, call: InstrId, clone: InstrId) -> Result<()> {
        let chain = job.arg_chain(call)?;
        let func = job.instr(call).func;
        let mut previous = clone;
        for arg in chain.args {
            let slot = job
                .instr(arg)
                .dst()
                .and_then(|d| d.slot())
                .and_then(|s| job.sym(s).arg_slot)
                .unwrap_or(0);
            let slot_sym = job.new_arg_slot(func, slot);
            let opcode = job.opcode(arg);
            let value = job.instr(arg).src1;
            let copy = job.create_with(opcode, Some(Operand::Sym(slot_sym)), value, None, func);
            job.copy_offset(copy, call);
            job.set_src2(previous, Some(Operand::Sym(slot_sym)));
            job.insert_before(previous, copy)?;
            previous = copy;
        }
        let start = job.instr(chain.start_call).dst();
        job.set_src2(previous, start);
        Ok(())
    }

    /// The miss path, then the join point; the original call is removed
    fn complete_polymorphic(
        &mut self,
        job: &mut Job,
        site: Dispatch,
        reload: Option<InstrId>,
        kind: BailOutKind,
    ) -> Result<()> {
        let call = site.call;
        let func = job.instr(call).func;
        let miss_label = job.new_label(func, true);
        job.insert_before(call, miss_label)?;
        let to_miss = job.new_branch(OpCode::Br, miss_label, None, None, func);
        job.copy_offset(to_miss, call);
        job.insert_before(site.dispatch, to_miss)?;

        if let Some(ld) = reload {
            job.insert_before(call, ld)?;
        }
        let miss = job.create(OpCode::BailOnNotPolymorphicInlinee, func);
        job.copy_offset(miss, call);
        job.convert_to_bailout(miss, kind, call);
        job.insert_before(call, miss)?;

        let chain = job.arg_chain(call)?;
        let arg_count = chain.args.len() as u16;
        for arg in chain.args {
            let value = job.instr(arg).src1;
            let keep = job.create_with(OpCode::BytecodeArgOutUse, None, value, None, func);
            job.copy_offset(keep, call);
            job.insert_before(call, keep)?;
            job.remove(arg)?;
        }
        if let Some(target) = super::operand_reg(job.instr(call).src1) {
            byte_code_uses(job, call, &[target])?;
        }
        let end_call = job.create_with(
            OpCode::EndCallForPolymorphicInlinee,
            site.ret,
            Some(Operand::IntConst((arg_count + INLINEE_META_ARG_COUNT) as i64)),
            None,
            func,
        );
        job.copy_offset(end_call, call);
        job.insert_before(call, end_call)?;
        job.insert_before(call, site.done)?;
        job.remove(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InlinerConfig;
    use crate::context::InlineContext;
    use crate::decider::ProfileDecider;
    use crate::inliner::inline_job;
    use crate::ir::FuncBuilder;
    use crate::materializer::FnIrBuilder;
    use crate::profile::{BuiltinFunction, FunctionBody};

    fn body(name: &str, number: u32) -> FunctionBody {
        FunctionBody {
            locals_count: 2,
            profiled_call_site_count: 1,
            ..FunctionBody::new(name, number, 1)
        }
    }

    fn constant_builder() -> FnIrBuilder {
        let mut builder = FnIrBuilder::new();
        for number in 2..=6 {
            builder.register(number, move |b| {
                let r = b.reg(0);
                b.ld_const(r, number as i32)?;
                b.ret(Operand::Reg(r))?;
                Ok(())
            });
        }
        builder
    }

    fn run_site(candidates: Vec<Candidate>) -> (Job, crate::inliner::InlineStats) {
        let head = Candidate::polymorphic(candidates).unwrap();
        let f = Candidate::script(Arc::new(body("f", 1))).with_call_site(0, head);
        let mut job = Job::new(Arc::new(f)).unwrap();
        let top = job.top();
        {
            let mut b = FuncBuilder::new(&mut job, top);
            let (this, target, r) = (b.reg(0), b.reg(1), b.reg(2));
            b.call(OpCode::CallI, Some(r), target, &[Operand::Reg(this)], Some(0))
                .unwrap();
            b.ret(Operand::Reg(r)).unwrap();
        }
        let config = InlinerConfig {
            polymorphic_inline_fixed_methods: false,
            ..InlinerConfig::default()
        };
        let builder = constant_builder();
        let stats = inline_job(
            &mut job,
            &InlineContext::default(),
            &config,
            &ProfileDecider::default(),
            &builder,
        )
        .unwrap();
        (job, stats)
    }

    #[test]
    fn test_one_arm_per_distinct_candidate() {
        let candidates = vec![
            Candidate::script(Arc::new(body("g", 2))),
            Candidate::script(Arc::new(body("h", 3))),
            Candidate::script(Arc::new(body("g", 2))),
        ];
        let (job, stats) = run_site(candidates);
        let ops = job.opcodes(job.top());
        assert_eq!(ops.iter().filter(|op| **op == OpCode::BrAddrEq).count(), 2);
        assert_eq!(ops.iter().filter(|op| **op == OpCode::InlineeStart).count(), 2);
        assert_eq!(ops.iter().filter(|op| **op == OpCode::BailOnNotPolymorphicInlinee).count(), 1);
        assert!(!ops.contains(&OpCode::CallI));
        assert_eq!(stats.polymorphic_sites, 1);
        assert_eq!(stats.polymorphic_arms, 2);
    }

    #[test]
    fn test_arm_not_worth_inlining_is_called() {
        let candidates = vec![
            Candidate::script(Arc::new(body("g", 2))),
            Candidate::script(Arc::new(body("h", 3))).not_inlined(),
        ];
        let (job, stats) = run_site(candidates);
        let ops = job.opcodes(job.top());
        assert_eq!(ops.iter().filter(|op| **op == OpCode::InlineeStart).count(), 1);
        assert_eq!(ops.iter().filter(|op| **op == OpCode::CallI).count(), 1);
        assert_eq!(stats.polymorphic_arms, 1);
    }

    #[test]
    fn test_too_many_arms_declines() {
        let candidates = (2..=6)
            .map(|n| Candidate::script(Arc::new(body("g", n))))
            .collect();
        let (job, stats) = run_site(candidates);
        assert!(job.opcodes(job.top()).contains(&OpCode::CallI));
        assert_eq!(stats.declined_for(DeclineReason::PolymorphicArmCount), 1);
    }

    #[test]
    fn test_builtin_candidate_gets_a_call_arm() {
        let ctx = InlineContext::default();
        let abs = ctx.function_info_of(BuiltinFunction::MathAbs).unwrap();
        let candidates = vec![
            Candidate::script(Arc::new(body("g", 2))),
            Candidate::script(Arc::new(body("h", 3))),
            Candidate::builtin(BuiltinFunction::MathAbs, abs),
        ];
        let (job, stats) = run_site(candidates);
        let ops = job.opcodes(job.top());
        assert_eq!(ops.iter().filter(|op| **op == OpCode::BrAddrEq).count(), 3);
        assert_eq!(ops.iter().filter(|op| **op == OpCode::InlineeStart).count(), 2);
        assert_eq!(ops.iter().filter(|op| **op == OpCode::CallI).count(), 1);
        assert_eq!(ops.iter().filter(|op| **op == OpCode::BailOnNotPolymorphicInlinee).count(), 1);
        assert_eq!(stats.polymorphic_sites, 1);
        assert_eq!(stats.polymorphic_arms, 2);

        let top = job.top();
        let abs_arm = job.func_instrs(top).into_iter().any(|i| {
            job.opcode(i) == OpCode::BrAddrEq
                && job.instr(i).src2 == Some(Operand::Addr(AddrValue::FunctionInfo(abs)))
        });
        assert!(abs_arm);
    }
}
