//! Getter and setter inlining
//!
//! A property access the profiler saw go through an accessor is turned into a call of
//! the accessor first (`LdMethodFromFlags` for the function, a simulated `StartCall` and
//! argument chain for the receiver and the stored value) and then inlined like any other
//! script call. Host getters with a fast-path helper become a `DomFastPathGetter`.

use std::sync::Arc;
use tracing::trace;

use super::fixed_method::FixedRequest;
use super::script::InlineeCall;
use super::{insert_statement_boundary, DeclineReason, Inliner, Outcome, Unit};
use crate::error::{messages, Error, Result};
use crate::guard;
use crate::ir::operand::HelperMethod;
use crate::ir::{BailOutKind, FuncFlags, InstrId, Job, OpCode, Operand, SymId};
use crate::profile::Candidate;

impl Inliner<'_> {
    pub(super) fn visit_accessor(&mut self, job: &mut Job, unit: &mut Unit, instr: InstrId, next: InstrId) -> Result<()> {
        if !job.instr(instr).is_from_accessor() {
            return Ok(());
        }
        let is_getter = job.opcode(instr) != OpCode::StFld;
        let property_opnd = if is_getter {
            job.instr(instr).src1
        } else {
            job.instr(instr).dst()
        };
        let Some(property) = property_opnd.and_then(|o| o.slot()) else {
            return Ok(());
        };
        let Some(cache_index) = job.sym(property).property().and_then(|p| p.inline_cache_index) else {
            return Ok(());
        };
        let caller = job.func(unit.func).info.clone();
        let Some(candidate) = self.decider.ldfld_inlinee(&caller, cache_index) else {
            return Ok(());
        };

        let outcome = if candidate.has_body() {
            self.inline_accessor(job, unit, instr, next, &candidate, property, is_getter)?
        } else {
            self.inline_dom_getter(job, unit, instr, &candidate, property, is_getter)?
        };
        self.note_outcome(job, unit, instr, &candidate, outcome);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn inline_accessor(
        &mut self,
        job: &mut Job,
        unit: &mut Unit,
        accessor: InstrId,
        next: InstrId,
        candidate: &Arc<Candidate>,
        property: SymId,
        is_getter: bool,
    ) -> Result<Outcome> {
        let phase = if is_getter {
            self.config.inline_getters
        } else {
            self.config.inline_setters
        };
        if !self.config.inline_candidates || !self.config.inline_accessors || !phase {
            return Ok(Outcome::Declined(DeclineReason::Disabled));
        }
        if candidate.body.as_ref().is_some_and(|b| !b.has_profile_info) {
            return Ok(Outcome::Declined(DeclineReason::NoProfileInfo));
        }
        if job.opcode(accessor) == OpCode::LdFldForCallApplyTarget && self.in_apply_target_inline {
            return Ok(Outcome::Declined(DeclineReason::InApplyTargetInline));
        }
        if let Some(reason) = self.should_decline(job, unit, accessor, candidate, false, 0) {
            return Ok(Outcome::Declined(reason));
        }

        // Committed
        let ret = if is_getter { job.unlink_dst(accessor) } else { None };
        let checks_before = simulate_accessor_call(job, accessor, property, is_getter)?;
        let fixed = self.try_fixed_method(job, accessor, FixedRequest::inline(candidate))?;

        let parent = job.instr(accessor).func;
        let inlinee = self
            .materializer
            .new_inlinee(job, parent, candidate, FuncFlags::GETTER_SETTER)?;
        let outcome = self.inline_function_common(
            job,
            unit,
            next,
            InlineeCall {
                call: accessor,
                inlinee,
                candidate,
                ret,
                checks_before,
                original_target: None,
                fixed,
                is_apply_target: false,
            },
        )?;
        self.stats.accessors += 1;
        trace!(access = %accessor, accessor = %candidate.name, is_getter, "inlined accessor");
        Ok(outcome)
    }

    /// Host getter with a fast-path helper: call the helper on the receiver directly
    fn inline_dom_getter(
        &mut self,
        job: &mut Job,
        unit: &Unit,
        ld: InstrId,
        candidate: &Arc<Candidate>,
        property: SymId,
        is_getter: bool,
    ) -> Result<Outcome> {
        let Some(helper) = candidate.dom_fast_path_helper else {
            return Ok(Outcome::Declined(DeclineReason::NoBody));
        };
        if !is_getter || job.instr(ld).dst().is_none() {
            return Ok(Outcome::Declined(DeclineReason::UnsupportedShape));
        }
        if !self.config.inline_accessors || !self.config.inline_getters {
            return Ok(Outcome::Declined(DeclineReason::Disabled));
        }
        let func = job.instr(ld).func;
        let instance = job
            .sym(property)
            .property()
            .map(|p| p.object)
            .ok_or_else(|| Error::shape(func, ld, messages::expected("property slot", job.instr(ld).src1)))?;

        // Committed
        let method = load_method_from_flags(job, ld, property)?;
        job.set_src1(ld, Some(Operand::Reg(method)));
        guard::prepare_insertion_point(job, self.ctx, ld, candidate.function_info, ld)?;

        let this_arg = job.new_reg(func);
        let extend_this = job.create_with(
            OpCode::ExtendArg,
            Some(Operand::Reg(this_arg)),
            Some(Operand::Reg(instance)),
            None,
            func,
        );
        job.copy_offset(extend_this, ld);
        job.insert_before(ld, extend_this)?;
        let function_arg = job.new_reg(func);
        let extend_function = job.create_with(
            OpCode::ExtendArg,
            Some(Operand::Reg(function_arg)),
            Some(Operand::Reg(method)),
            Some(Operand::Reg(this_arg)),
            func,
        );
        job.copy_offset(extend_function, ld);
        job.insert_before(ld, extend_function)?;

        job.set_opcode(ld, OpCode::DomFastPathGetter);
        job.set_src1(ld, Some(Operand::Helper(HelperMethod::DomFastPath(helper))));
        job.set_src2(ld, Some(Operand::Reg(function_arg)));

        let tmp = job.new_reg(func);
        let original_dst = job.unlink_dst(ld);
        if let Some(dst) = original_dst.and_then(|d| d.sym()) {
            job.sym_mut(tmp).value_type = job.sym(dst).value_type;
        }
        job.set_dst(ld, Some(Operand::Reg(tmp)));
        let copy = job.create_with(OpCode::Ld, original_dst, Some(Operand::Reg(tmp)), None, func);
        job.copy_offset(copy, ld);
        job.insert_after(ld, copy)?;

        job.top_func_mut().flags.insert(FuncFlags::HAS_INLINEE);
        if let Some(after) = job.next(copy) {
            insert_statement_boundary(job, unit, after)?;
        }
        self.stats.dom_getters += 1;
        trace!(access = %ld, helper, "host fast-path getter");
        Ok(Outcome::Inlined)
    }
}

/// `m = LdMethodFromFlags property` in front of `accessor`, guarded by the accessor's
/// inline cache
fn load_method_from_flags(job: &mut Job, accessor: InstrId, property: SymId) -> Result<SymId> {
    let func = job.instr(accessor).func;
    let method = job.new_reg(func);
    let ld = job.create_with(
        OpCode::LdMethodFromFlags,
        Some(Operand::Reg(method)),
        Some(Operand::Sym(property)),
        None,
        func,
    );
    job.copy_offset(ld, accessor);
    job.insert_before(accessor, ld)?;
    job.convert_to_bailout(ld, BailOutKind::FailedInlineTypeCheck, accessor);
    Ok(method)
}

/// Make an accessor access look like a call of the accessor
///
/// ```text
/// m    = LdMethodFromFlags o.p
/// s    = StartCall 1|2
/// [1]  = ArgOut o
/// [2]  = ArgOut value        (setters)
///        LdFld/StFld m, [n]
/// ```
///
/// Returns the `StartCall`, in front of which the identity guards go.
fn simulate_accessor_call(job: &mut Job, accessor: InstrId, property: SymId, is_getter: bool) -> Result<InstrId> {
    let func = job.instr(accessor).func;
    let instance = job
        .sym(property)
        .property()
        .map(|p| p.object)
        .ok_or_else(|| Error::shape(func, accessor, messages::expected("property slot", Some(Operand::Sym(property)))))?;
    let method = load_method_from_flags(job, accessor, property)?;

    let start_dst = job.new_reg(func);
    let arg_count = if is_getter { 1 } else { 2 };
    let start = job.create_with(
        OpCode::StartCall,
        Some(Operand::Reg(start_dst)),
        Some(Operand::IntConst(arg_count)),
        None,
        func,
    );
    job.copy_offset(start, accessor);
    job.insert_before(accessor, start)?;

    let this_slot = job.new_arg_slot(func, 1);
    let this_arg = job.create_with(
        OpCode::ArgOut,
        Some(Operand::Sym(this_slot)),
        Some(Operand::Reg(instance)),
        Some(Operand::Reg(start_dst)),
        func,
    );
    job.copy_offset(this_arg, accessor);
    job.insert_before(accessor, this_arg)?;

    let mut link = this_slot;
    if !is_getter {
        let value_slot = job.new_arg_slot(func, 2);
        let value = job.instr(accessor).src1;
        let value_arg = job.create_with(
            OpCode::ArgOut,
            Some(Operand::Sym(value_slot)),
            value,
            Some(Operand::Sym(this_slot)),
            func,
        );
        job.copy_offset(value_arg, accessor);
        job.insert_before(accessor, value_arg)?;
        link = value_slot;
        job.unlink_dst(accessor);
    }

    job.set_src1(accessor, Some(Operand::Reg(method)));
    job.set_src2(accessor, Some(Operand::Sym(link)));
    Ok(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InlinerConfig;
    use crate::context::InlineContext;
    use crate::decider::ProfileDecider;
    use crate::inliner::{inline_job, InlineStats};
    use crate::ir::{FldFlags, FuncBuilder};
    use crate::materializer::FnIrBuilder;
    use crate::profile::{FunctionBody, FunctionInfoId, PropertyId};

    fn caller(accessor: Arc<Candidate>) -> Job {
        let f = Candidate::script(Arc::new(FunctionBody {
            locals_count: 4,
            ..FunctionBody::new("f", 1, 1)
        }))
        .with_ldfld_inlinee(9, accessor);
        Job::new(Arc::new(f)).unwrap()
    }

    fn getter_builder() -> FnIrBuilder {
        FnIrBuilder::new().with(2, |b| {
            let this = b.reg(0);
            let r = b.reg(1);
            b.arg_in(this, 1)?;
            b.ld_const(r, 42)?;
            b.ret(Operand::Reg(r))?;
            Ok(())
        })
    }

    fn run(job: &mut Job, builder: &FnIrBuilder) -> InlineStats {
        inline_job(
            job,
            &InlineContext::default(),
            &InlinerConfig::default(),
            &ProfileDecider::default(),
            builder,
        )
        .unwrap()
    }

    #[test]
    fn test_getter_is_inlined() {
        let getter = Arc::new(Candidate::script(Arc::new(FunctionBody::new("get x", 2, 1))));
        let mut job = caller(getter);
        let top = job.top();
        {
            let mut b = FuncBuilder::new(&mut job, top);
            let (o, r) = (b.reg(0), b.reg(1));
            b.accessor_fld(OpCode::LdFld, Some(r), None, o, PropertyId(1), 9, FldFlags::FROM_GETTER)
                .unwrap();
            b.ret(Operand::Reg(r)).unwrap();
        }
        let stats = run(&mut job, &getter_builder());
        assert_eq!(stats.accessors, 1);
        let ops = job.opcodes(top);
        assert!(ops.contains(&OpCode::LdMethodFromFlags));
        assert!(ops.contains(&OpCode::InlineeStart));
        assert!(!ops.contains(&OpCode::LdFld));
        let inlinee = job
            .func_instrs(top)
            .into_iter()
            .find(|i| job.opcode(*i) == OpCode::InlineeStart)
            .map(|i| job.instr(i).func)
            .unwrap();
        assert!(job.func(inlinee).is_getter_setter());
    }

    #[test]
    fn test_setter_takes_value_as_second_argument() {
        let setter = Arc::new(Candidate::script(Arc::new(FunctionBody::new("set x", 2, 2))));
        let mut job = caller(setter);
        let top = job.top();
        let store = {
            let mut b = FuncBuilder::new(&mut job, top);
            let (o, v) = (b.reg(0), b.reg(1));
            b.accessor_fld(OpCode::StFld, None, Some(v), o, PropertyId(1), 9, FldFlags::FROM_SETTER)
                .unwrap()
        };
        let builder = FnIrBuilder::new().with(2, |b| {
            let v = b.reg(0);
            b.arg_in(v, 2)?;
            b.ret(Operand::Reg(v))?;
            Ok(())
        });
        let config = InlinerConfig {
            inline_setters: false,
            ..InlinerConfig::default()
        };
        let stats = inline_job(
            &mut job,
            &InlineContext::default(),
            &config,
            &ProfileDecider::default(),
            &builder,
        )
        .unwrap();
        assert_eq!(stats.declined_for(DeclineReason::Disabled), 1);
        assert_eq!(job.opcode(store), OpCode::StFld);

        let stats = run(&mut job, &builder);
        assert_eq!(stats.accessors, 1);
        assert_eq!(job.opcode(store), OpCode::InlineeStart);
        assert_eq!(job.func(job.instr(store).func).actual_count, Some(2));
    }

    #[test]
    fn test_dom_getter_uses_fast_path_helper() {
        let host = Arc::new(Candidate::host("innerHTML", FunctionInfoId(0x2000)).with_dom_fast_path(5));
        let mut job = caller(host);
        let top = job.top();
        let ld = {
            let mut b = FuncBuilder::new(&mut job, top);
            let (o, r) = (b.reg(0), b.reg(1));
            b.accessor_fld(OpCode::LdFld, Some(r), None, o, PropertyId(1), 9, FldFlags::FROM_GETTER)
                .unwrap()
        };
        let stats = run(&mut job, &FnIrBuilder::new());
        assert_eq!(stats.dom_getters, 1);
        assert_eq!(job.opcode(ld), OpCode::DomFastPathGetter);
        assert_eq!(job.instr(ld).src1, Some(Operand::Helper(HelperMethod::DomFastPath(5))));
        let ops = job.opcodes(top);
        assert_eq!(ops.iter().filter(|op| **op == OpCode::ExtendArg).count(), 2);
        assert_eq!(ops.last(), Some(&OpCode::Ld));
    }

    #[test]
    fn test_plain_field_load_is_ignored() {
        let getter = Arc::new(Candidate::script(Arc::new(FunctionBody::new("get x", 2, 1))));
        let mut job = caller(getter);
        let top = job.top();
        {
            let mut b = FuncBuilder::new(&mut job, top);
            let (o, r) = (b.reg(0), b.reg(1));
            b.ld_fld(OpCode::LdFld, r, o, PropertyId(1), Some(9), None).unwrap();
        }
        let before = job.opcodes(top);
        let stats = run(&mut job, &getter_builder());
        assert_eq!(stats.accessors, 0);
        assert_eq!(job.opcodes(top), before);
    }
}
