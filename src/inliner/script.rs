//! Monomorphic script-function inlining
//!
//! The call instruction itself becomes the inlinee's `InlineeStart`; the callee body is
//! spliced between it and a new `InlineeEnd`, with its parameters bound to the call's
//! arguments and its returns assigning the call's destination.

use std::sync::Arc;

use super::fixed_method::{FixedMethod, FixedRequest};
use super::{insert_statement_boundary, operand_reg, DeclineReason, Inliner, Outcome, Unit};
use crate::binder::{self, FormalBinding, INLINEE_META_ARG_COUNT};
use crate::error::{messages, Error, Result};
use crate::guard;
use crate::ir::{FuncFlags, FuncId, InstrId, Job, OpCode, Operand, SymId};
use crate::profile::Candidate;

/// A committed inline, ready to be spliced
pub(super) struct InlineeCall<'c> {
    pub call: InstrId,
    pub inlinee: FuncId,
    pub candidate: &'c Arc<Candidate>,
    /// The call's destination, unlinked
    pub ret: Option<Operand>,
    /// Where identity guards go when the call was not resolved to a fixed function
    pub checks_before: InstrId,
    /// Register the call target was read from before any rewrite
    pub original_target: Option<SymId>,
    pub fixed: Option<FixedMethod>,
    pub is_apply_target: bool,
}

impl Inliner<'_> {
    pub(super) fn inline_script_function(
        &mut self,
        job: &mut Job,
        unit: &mut Unit,
        call: InstrId,
        next: InstrId,
        candidate: &Arc<Candidate>,
        is_ctor: bool,
    ) -> Result<Outcome> {
        let uses_arguments = candidate.body.as_ref().is_some_and(|b| b.uses_arguments_object);
        if job.top_func().is_loop_body() && uses_arguments {
            return Ok(Outcome::Declined(DeclineReason::ArgumentsObjectInLoopBody));
        }
        if job.call_arg_slot(call).unwrap_or(0) > self.config.argout_limit() {
            return Ok(Outcome::Declined(DeclineReason::TooManyArguments));
        }

        let original_target = operand_reg(job.instr(call).src1);
        let mut checks_before = call;
        let request = FixedRequest {
            ctor: is_ctor,
            ..FixedRequest::inline(candidate)
        };
        let fixed = self.try_fixed_method(job, call, request)?;
        if is_ctor {
            if let Some(create) = self.split_constructor_call(job, call, fixed.is_some())? {
                checks_before = create;
            }
        }

        let ret = job.unlink_dst(call);
        let flags = if is_ctor {
            FuncFlags::INLINED_CTOR
        } else {
            FuncFlags::empty()
        };
        let parent = job.instr(call).func;
        let inlinee = self.materializer.new_inlinee(job, parent, candidate, flags)?;
        self.inline_function_common(
            job,
            unit,
            next,
            InlineeCall {
                call,
                inlinee,
                candidate,
                ret,
                checks_before,
                original_target,
                fixed,
                is_apply_target: false,
            },
        )
    }

    /// Build, bind and splice an inlinee in place of its call
    pub(super) fn inline_function_common(
        &mut self,
        job: &mut Job,
        unit: &mut Unit,
        next: InstrId,
        site: InlineeCall<'_>,
    ) -> Result<Outcome> {
        let InlineeCall {
            call,
            inlinee,
            candidate,
            ret,
            checks_before,
            original_target,
            fixed,
            is_apply_target,
        } = site;

        self.build_inlinee(job, unit, call, inlinee, is_apply_target)?;

        let safe_this = fixed.as_ref().is_some_and(|f| f.safe_this);
        if job.opcode(call) == OpCode::CallIFixed {
            if let Some(fixed) = &fixed {
                let f = job.func_mut(inlinee);
                f.fixed_function = Some(Arc::new(fixed.field.clone()));
                f.fixed_function_safe_this = safe_this;
            }
        } else {
            guard::prepare_insertion_point(job, self.ctx, call, candidate.function_info, checks_before)?;
        }

        let in_params = job.func(inlinee).body.in_params_count;
        let actuals = binder::map_actuals(job, call, Some(inlinee), in_params, unit.frame_slot)?;
        let actual_count = actuals.actual_count();
        job.func_mut(inlinee).actual_count = Some(actual_count);

        let func = job.instr(call).func;
        let target = job
            .instr(call)
            .src1
            .ok_or_else(|| Error::shape(func, call, messages::expected("call target", None::<Operand>)))?;
        let binding = FormalBinding {
            ret,
            target,
            caller_this: unit.sym_this,
            fixed_function_safe_this: safe_this,
            check_this: self.config.check_this,
        };
        binder::map_formals(job, inlinee, &actuals, &binding)?;

        if job.opcode(call) == OpCode::CallIFixed && !job.func(inlinee).is_getter_setter() {
            if let Some(target) = original_target {
                super::byte_code_uses(job, call, &[target])?;
            }
        }

        let start_dst = job.new_reg(inlinee);
        job.set_opcode(call, OpCode::InlineeStart);
        job.instr_mut(call).func = inlinee;
        job.set_dst(call, Some(Operand::Reg(start_dst)));
        binder::setup_inlinee_frame(job, inlinee, call, actual_count, unit.frame_slot)?;

        let (head, tail) = {
            let f = job.func(inlinee);
            (f.head, f.tail)
        };
        let end = job.create_with(
            OpCode::InlineeEnd,
            None,
            Some(Operand::IntConst((actual_count + INLINEE_META_ARG_COUNT) as i64)),
            Some(Operand::Reg(start_dst)),
            inlinee,
        );
        let last_real = job.prev_real_instr(tail).unwrap_or(call);
        job.copy_offset(end, last_real);
        job.insert_after(call, end)?;
        job.move_args(call, false)?;

        if let (Some(first), Some(last)) = (job.next(head), job.prev(tail)) {
            if first != tail {
                job.insert_range_before(end, first, last)?;
            }
        }

        job.top_func_mut().flags.insert(FuncFlags::HAS_INLINEE);
        insert_statement_boundary(job, unit, next)?;
        self.stats.inlined += 1;
        Ok(Outcome::Inlined)
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
    use crate::profile::FunctionBody;

    fn body(name: &str, number: u32, params: u16) -> Arc<FunctionBody> {
        Arc::new(FunctionBody {
            locals_count: 4,
            profiled_call_site_count: 2,
            ..FunctionBody::new(name, number, params)
        })
    }

    fn identity_builder() -> FnIrBuilder {
        FnIrBuilder::new().with(2, |b| {
            let x = b.reg(0);
            b.arg_in(x, 2)?;
            b.ret(Operand::Reg(x))?;
            Ok(())
        })
    }

    fn caller(job: &mut Job, argc: usize) {
        let top = job.top();
        let mut b = FuncBuilder::new(job, top);
        let (this, target, r) = (b.reg(0), b.reg(1), b.reg(2));
        let args: Vec<Operand> = (0..argc).map(|_| Operand::Reg(this)).collect();
        b.call(OpCode::CallI, Some(r), target, &args, Some(0)).unwrap();
        b.ret(Operand::Reg(r)).unwrap();
    }

    #[test]
    fn test_inlined_call_becomes_inlinee_start() {
        let g = Arc::new(Candidate::script(body("g", 2, 2)));
        let f = Candidate::script(body("f", 1, 1)).with_call_site(0, g);
        let mut job = Job::new(Arc::new(f)).unwrap();
        caller(&mut job, 2);
        let builder = identity_builder();
        let stats = inline_job(
            &mut job,
            &InlineContext::default(),
            &InlinerConfig::default(),
            &ProfileDecider::default(),
            &builder,
        )
        .unwrap();

        assert_eq!(stats.inlined, 1);
        let top = job.top();
        let ops = job.opcodes(top);
        assert!(!ops.contains(&OpCode::CallI));
        let start = ops.iter().position(|op| *op == OpCode::InlineeStart).unwrap();
        let end = ops.iter().position(|op| *op == OpCode::InlineeEnd).unwrap();
        assert!(start < end);
        assert_eq!(ops.iter().filter(|op| **op == OpCode::InlineeMetaArg).count(), 3);
        assert!(job.top_func().has_inlinee());
    }

    #[test]
    fn test_too_many_arguments_declines() {
        let g = Arc::new(Candidate::script(body("g", 2, 2)));
        let f = Candidate::script(body("f", 1, 1)).with_call_site(0, g);
        let mut job = Job::new(Arc::new(f)).unwrap();
        caller(&mut job, 17);
        let top = job.top();
        let before = job.opcodes(top);
        let builder = identity_builder();
        let stats = inline_job(
            &mut job,
            &InlineContext::default(),
            &InlinerConfig::default(),
            &ProfileDecider::default(),
            &builder,
        )
        .unwrap();

        assert_eq!(job.opcodes(top), before);
        assert_eq!(stats.declined_for(DeclineReason::TooManyArguments), 1);
    }
}
