//! The inlining driver
//!
//! [`Inliner::run`] walks a unit's instruction list once. Every call-shaped instruction
//! with a profiled candidate is handed to one of the transformations in the submodules,
//! which either commits (rewriting the IR around the call) or declines without touching
//! anything. Script inlinees are optimized recursively before they are spliced, so a
//! body lands in its caller already fully inlined itself.
//!
//! The walk captures the successor of each instruction before dispatching on it and
//! resumes there, so code spliced in place of a call is never visited twice.

mod accessor;
mod apply_call;
mod builtin;
mod const_fold;
mod ctor;
mod fixed_method;
mod polymorphic;
mod script;
mod spread;
mod stats;

pub use stats::{DeclineReason, InlineStats};

use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::binder::{self, INLINEE_META_ARG_COUNT};
use crate::config::InlinerConfig;
use crate::context::InlineContext;
use crate::decider::{InlineSite, InliningDecider};
use crate::error::Result;
use crate::ir::{
    BailOutKind, FuncFlags, FuncId, InstrId, Job, OpCode, Operand, SymFlags, SymId, ValueType,
};
use crate::materializer::{CalleeMaterializer, IrBuilder};
use crate::profile::{Candidate, FunctionInfoId};

use fixed_method::FixedRequest;

/// Inlines profiled call sites of one compilation job
pub struct Inliner<'a> {
    ctx: &'a InlineContext,
    config: &'a InlinerConfig,
    decider: &'a dyn InliningDecider,
    materializer: CalleeMaterializer<'a>,
    stats: InlineStats,
    /// Function identities being inlined, outermost (the job's top function) first
    inline_stack: Vec<FunctionInfoId>,
    in_apply_target_inline: bool,
}

/// Walk state of one unit (the top function or an inlinee being optimized)
#[derive(Debug)]
struct Unit {
    func: FuncId,
    /// The caller's argument instructions by 0-based position, for inlinees
    caller_args: Option<Vec<Option<InstrId>>>,
    /// Consecutive self-recursive inlines leading here
    recursive_depth: u32,
    /// Nesting level below the top function
    depth: u32,
    /// First free frame slot for inlinee metadata
    frame_slot: u32,
    is_in_loop: u32,
    for_in_depth: u32,
    loop_top: Option<InstrId>,
    back_edges: usize,
    last_statement: Option<InstrId>,
    sym_this: Option<SymId>,
    processed: usize,
    inlinee_count: usize,
    ldfld_present: bool,
    /// Profiled sites may be inlined; otherwise calls only get the fixed-method rewrite
    do_inline: bool,
}

impl Unit {
    fn new(func: FuncId) -> Self {
        Self {
            func,
            caller_args: None,
            recursive_depth: 0,
            depth: 0,
            frame_slot: 0,
            is_in_loop: 0,
            for_in_depth: 0,
            loop_top: None,
            back_edges: 0,
            last_statement: None,
            sym_this: None,
            processed: 0,
            inlinee_count: 0,
            ldfld_present: false,
            do_inline: false,
        }
    }
}

/// Result of one transformation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Inlined,
    /// Nothing was changed
    Declined(DeclineReason),
}

impl Outcome {
    fn is_inlined(self) -> bool {
        self == Outcome::Inlined
    }
}

/// What kind of call the driver is looking at
#[derive(Debug, Clone, Copy, Default)]
struct CallShape {
    ctor: bool,
    builtin: bool,
}

impl CallShape {
    /// Shape of a call the fixed-method rewrite may apply to
    fn of(opcode: OpCode) -> Option<Self> {
        match opcode {
            OpCode::CallI => Some(Self::default()),
            OpCode::NewScObject | OpCode::NewScObjArray => Some(Self {
                ctor: true,
                builtin: false,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// Nothing left to inline in this unit
    Stop,
}

impl<'a> Inliner<'a> {
    pub fn new(
        ctx: &'a InlineContext,
        config: &'a InlinerConfig,
        decider: &'a dyn InliningDecider,
        builder: &'a dyn IrBuilder,
    ) -> Self {
        Self {
            ctx,
            config,
            decider,
            materializer: CalleeMaterializer::new(builder),
            stats: InlineStats::default(),
            inline_stack: Vec::new(),
            in_apply_target_inline: false,
        }
    }

    pub fn stats(&self) -> &InlineStats {
        &self.stats
    }

    pub fn into_stats(self) -> InlineStats {
        self.stats
    }

    /// Inline every profitable call site of the job's top function
    pub fn run(&mut self, job: &mut Job) -> Result<()> {
        let top = job.top();
        self.inline_stack.clear();
        self.inline_stack.push(job.func(top).info.function_info);
        info!(function = %job.func(top).name(), "inlining job");
        let mut unit = Unit::new(top);
        self.optimize(job, &mut unit)?;
        self.inline_stack.clear();
        debug!(
            inlined = self.stats.inlined,
            declined = self.stats.declined_total(),
            max_depth = self.stats.max_depth,
            "inlining finished"
        );
        Ok(())
    }

    fn optimize(&mut self, job: &mut Job, unit: &mut Unit) -> Result<()> {
        let info = job.func(unit.func).info.clone();
        unit.inlinee_count = self.decider.inlinee_count(&info);
        unit.ldfld_present = self.decider.is_ldfld_inlinee_present(&info);
        unit.for_in_depth = job.func(unit.func).for_in_base_depth;
        unit.sym_this = None;
        unit.last_statement = None;
        unit.loop_top = None;

        let enabled = self.config.inline && !job.top_func().flags.contains(FuncFlags::DEBUG_MODE);
        unit.do_inline = enabled && (unit.inlinee_count > 0 || unit.ldfld_present);
        if !unit.do_inline {
            trace!(function = %job.func(unit.func).name(), "nothing to inline");
        }

        let (head, tail) = {
            let f = job.func(unit.func);
            (f.head, f.tail)
        };
        let mut cur = job.next(head);
        while let Some(instr) = cur {
            if instr == tail {
                break;
            }
            let Some(next) = job.next(instr) else {
                break;
            };
            if self.visit(job, unit, instr, next)? == Flow::Stop {
                break;
            }
            cur = Some(next);
        }
        Ok(())
    }

    fn visit(&mut self, job: &mut Job, unit: &mut Unit, instr: InstrId, next: InstrId) -> Result<Flow> {
        if !unit.do_inline {
            if let Some(shape) = CallShape::of(job.opcode(instr)) {
                self.fallback(job, instr, shape, false)?;
            }
            return Ok(Flow::Continue);
        }
        let is_loop_body = job.top_func().is_loop_body();
        match job.opcode(instr) {
            OpCode::StatementBoundary => unit.last_statement = Some(instr),
            OpCode::Label => {
                let (loop_top, for_in_exit, refs) = match job.instr(instr).label_info() {
                    Some(label) => (label.is_loop_top, label.is_for_in_exit, label.refs.len()),
                    None => (false, false, 0),
                };
                if loop_top && unit.loop_top.is_none() {
                    unit.is_in_loop += 1;
                    unit.back_edges = refs;
                    unit.loop_top = Some(instr);
                }
                if for_in_exit {
                    unit.for_in_depth = unit.for_in_depth.saturating_sub(1);
                }
            }
            OpCode::InitForInEnumerator if !is_loop_body => unit.for_in_depth += 1,
            OpCode::BrOnEmpty if !is_loop_body => {
                if let Some(target) = job.instr(instr).branch_target() {
                    if let Some(label) = job.instr_mut(target).label.as_mut() {
                        label.is_for_in_exit = true;
                    }
                }
            }
            OpCode::LdFld | OpCode::LdFldForCallApplyTarget | OpCode::StFld => {
                if unit.ldfld_present {
                    self.visit_accessor(job, unit, instr, next)?;
                }
            }
            OpCode::NewScObjArray => {
                return self.visit_call(job, unit, instr, next, CallShape { ctor: true, builtin: true });
            }
            OpCode::NewScObject => {
                let shape = CallShape { ctor: true, builtin: false };
                if !self.config.inline_constructors {
                    self.fallback(job, instr, shape, false)?;
                    return Ok(Flow::Continue);
                }
                return self.visit_call(job, unit, instr, next, shape);
            }
            OpCode::CallI => {
                return self.visit_call(job, unit, instr, next, CallShape::default());
            }
            OpCode::CallIExtended => self.visit_extended_call(job, unit, instr, next)?,
            OpCode::ArgOut if self.config.const_fold => {
                self.fold_arg_out(job, unit, instr)?;
            }
            OpCode::LdThis => unit.sym_this = job.instr(instr).dst_sym(),
            OpCode::CheckThis => unit.sym_this = job.instr(instr).src1_sym(),
            opcode if opcode.is_branch() => {
                if unit.loop_top.is_some() && job.instr(instr).branch_target() == unit.loop_top {
                    unit.back_edges = unit.back_edges.saturating_sub(1);
                    if unit.back_edges == 0 {
                        unit.is_in_loop = unit.is_in_loop.saturating_sub(1);
                        unit.loop_top = None;
                    }
                }
            }
            _ => {}
        }
        Ok(Flow::Continue)
    }

    fn visit_call(
        &mut self,
        job: &mut Job,
        unit: &mut Unit,
        call: InstrId,
        next: InstrId,
        mut shape: CallShape,
    ) -> Result<Flow> {
        let candidate = if unit.processed == unit.inlinee_count {
            None
        } else {
            self.profiled_candidate(job, unit, call)
        };
        let Some(candidate) = candidate else {
            self.fallback(job, call, CallShape { builtin: false, ..shape }, false)?;
            return Ok(Flow::Continue);
        };
        self.stats.call_sites += 1;

        let polymorphic = candidate.next.is_some();
        let outcome = if polymorphic {
            if shape.ctor || !self.config.polymorphic_inline {
                Outcome::Declined(DeclineReason::Disabled)
            } else if self.config.fixed_methods && self.config.polymorphic_inline_fixed_methods {
                self.inline_polymorphic_fixed(job, unit, call, next, &candidate)?
            } else {
                self.inline_polymorphic(job, unit, call, next, &candidate)?
            }
        } else {
            self.inline_monomorphic(job, unit, call, next, &candidate, &mut shape)?
        };
        self.note_outcome(job, unit, call, &candidate, outcome);

        if !outcome.is_inlined() {
            self.fallback(job, call, shape, polymorphic)?;
        }

        unit.processed += 1;
        if unit.processed == unit.inlinee_count && !unit.ldfld_present && !self.config.fixed_methods {
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    }

    fn inline_monomorphic(
        &mut self,
        job: &mut Job,
        unit: &mut Unit,
        call: InstrId,
        next: InstrId,
        candidate: &Arc<Candidate>,
        shape: &mut CallShape,
    ) -> Result<Outcome> {
        if shape.ctor && candidate.function_info == self.ctx.array_ctor {
            job.set_opcode(call, OpCode::NewScObjArray);
            job.instr_mut(call).profile_id = None;
            shape.builtin = true;
            return Ok(Outcome::Declined(DeclineReason::ConstructorNotInlinable));
        }

        let builtin = self.decider.builtin_of(candidate, self.ctx);
        if let Some(builtin) = builtin {
            let return_type = builtin.info().return_type;
            if return_type != ValueType::Unknown {
                if let Some(dst) = job.instr(call).dst_sym() {
                    // Only a hint until the built-in is actually inlined
                    let sym = job.sym_mut(dst);
                    sym.value_type = return_type;
                    sym.flags.remove(SymFlags::VALUE_TYPE_FIXED);
                }
            }
        }

        let has_body = candidate.has_body();
        if (has_body && !self.config.inline_candidates) || (!has_body && !self.config.inline_builtins) {
            return Ok(Outcome::Declined(DeclineReason::Disabled));
        }
        let Some(body) = candidate.body.clone() else {
            return match builtin {
                None => Ok(Outcome::Declined(DeclineReason::NoBody)),
                Some(_) if shape.ctor => Ok(Outcome::Declined(DeclineReason::ConstructorNotInlinable)),
                Some(builtin) => self.inline_builtin(job, unit, call, next, candidate, builtin),
            };
        };
        if !body.has_profile_info {
            return Ok(Outcome::Declined(DeclineReason::NoProfileInfo));
        }

        let constant_arguments = if self.config.inline_recursive {
            self.constant_argument_mask(job, call)
        } else {
            0
        };
        if let Some(reason) = self.should_decline(job, unit, call, candidate, shape.ctor, constant_arguments) {
            return Ok(Outcome::Declined(reason));
        }
        self.inline_script_function(job, unit, call, next, candidate, shape.ctor)
    }

    fn visit_extended_call(&mut self, job: &mut Job, unit: &mut Unit, call: InstrId, next: InstrId) -> Result<()> {
        if unit.processed == unit.inlinee_count {
            return Ok(());
        }
        let Some(candidate) = self.profiled_candidate(job, unit, call) else {
            return Ok(());
        };
        self.stats.call_sites += 1;
        let link_def = job.instr(call).src2.and_then(|link| job.def_of(link));
        let outcome = match link_def {
            Some(def) if job.opcode(def) == OpCode::LdSpreadIndices => self.inline_spread(job, unit, call, next)?,
            _ => Outcome::Declined(DeclineReason::UnsupportedShape),
        };
        self.note_outcome(job, unit, call, &candidate, outcome);
        unit.processed += 1;
        Ok(())
    }

    /// The candidate the profile recorded for a call, if the call is profiled at all
    fn profiled_candidate(&self, job: &Job, unit: &Unit, call: InstrId) -> Option<Arc<Candidate>> {
        let profile_id = job.instr(call).profile_id?;
        let caller = job.func(unit.func);
        if profile_id >= caller.body.profiled_call_site_count {
            return None;
        }
        self.decider.inlinee(&caller.info, profile_id)
    }

    /// Recursion bound, then the decider's verdict
    fn should_decline(
        &self,
        job: &Job,
        unit: &Unit,
        call: InstrId,
        candidate: &Arc<Candidate>,
        is_ctor: bool,
        constant_arguments: u32,
    ) -> Option<DeclineReason> {
        let recursion = self
            .inline_stack
            .iter()
            .filter(|info| **info == candidate.function_info)
            .count() as u32;
        let max = self.config.max_recursive_inline_depth;
        if (recursion > 0 && !self.config.inline_recursive) || recursion > max || unit.recursive_depth > max {
            return Some(DeclineReason::RecursionLimit);
        }
        let caller = job.func(unit.func).info.clone();
        let site = InlineSite {
            caller: &caller,
            candidate,
            profile_id: job.instr(call).profile_id.unwrap_or_default(),
            is_ctor,
            recursive_depth: unit.recursive_depth,
            constant_arguments,
            is_in_loop: unit.is_in_loop > 0,
            inline_stack: &self.inline_stack,
        };
        if !self.decider.should_inline(&site) {
            return Some(DeclineReason::Decider);
        }
        None
    }

    /// Bit `i` set when argument `i` (0 is `this`) is an integer constant
    fn constant_argument_mask(&self, job: &Job, call: InstrId) -> u32 {
        let Ok(chain) = job.arg_chain(call) else {
            return 0;
        };
        let mut mask = 0u32;
        for arg in chain.args {
            let instr = job.instr(arg);
            let Some(slot) = instr.dst().and_then(|d| d.slot()).and_then(|s| job.sym(s).arg_slot) else {
                continue;
            };
            let index = u32::from(slot.saturating_sub(1));
            if slot == 0 || index >= u32::from(self.config.max_constant_argument_index) {
                continue;
            }
            if instr.src1.and_then(|s| s.reg()).is_some_and(|s| job.sym(s).is_int_const()) {
                mask |= 1u32.checked_shl(index).unwrap_or(0);
            }
        }
        mask
    }

    /// Rewrite a call that was not inlined to use a fixed function value, if one is known
    fn fallback(&mut self, job: &mut Job, call: InstrId, shape: CallShape, polymorphic: bool) -> Result<()> {
        let opcode = job.opcode(call);
        if !matches!(opcode, OpCode::CallI | OpCode::NewScObject | OpCode::NewScObjArray) {
            return Ok(());
        }
        let original_target = job.instr(call).src1.and_then(|s| s.reg());
        let request = FixedRequest {
            polymorphic,
            builtin: shape.builtin,
            ctor: shape.ctor,
            ..FixedRequest::call()
        };
        if self.try_fixed_method(job, call, request)?.is_some() {
            if let Some(target) = original_target {
                byte_code_uses(job, call, &[target])?;
            }
            if opcode == OpCode::NewScObject && self.config.split_new_sc_object {
                self.split_constructor_call(job, call, true)?;
            }
            self.stats.fixed_only += 1;
            trace!(call = %call, "call uses fixed function value");
        } else if opcode == OpCode::NewScObjArray {
            let likely_native = job
                .instr(call)
                .dst_sym()
                .is_some_and(|dst| job.sym(dst).value_type.is_likely_native_array());
            if likely_native {
                job.convert_to_bailout(call, BailOutKind::OnNotNativeArray, call);
            }
        }
        Ok(())
    }

    /// Materialize `inlinee` for `call` and optimize it recursively
    fn build_inlinee(
        &mut self,
        job: &mut Job,
        unit: &Unit,
        call: InstrId,
        inlinee: FuncId,
        is_apply_target: bool,
    ) -> Result<()> {
        let body = job.func(inlinee).body.clone();
        let top_max = job.top_func().for_in_max_depth;
        job.top_func_mut().for_in_max_depth = top_max.max(unit.for_in_depth + body.for_in_loop_depth);
        job.func_mut(inlinee).for_in_base_depth = unit.for_in_depth;

        let chain = job.arg_chain(call)?;
        let mut caller_args = vec![None; chain.args.len()];
        for arg in &chain.args {
            let slot = job
                .instr(*arg)
                .dst()
                .and_then(|d| d.slot())
                .and_then(|s| job.sym(s).arg_slot)
                .unwrap_or(0) as usize;
            if (1..=caller_args.len()).contains(&slot) {
                caller_args[slot - 1] = Some(*arg);
            }
        }
        let actuals = chain.args.len() as u32;
        job.func_mut(inlinee).actual_count = Some(actuals as u16);

        self.materializer.build(job, inlinee)?;

        let same_body = body.function_info == job.func(unit.func).body.function_info;
        let mut nested = Unit {
            caller_args: Some(caller_args),
            recursive_depth: if same_body { unit.recursive_depth + 1 } else { 0 },
            depth: unit.depth + 1,
            frame_slot: unit.frame_slot + INLINEE_META_ARG_COUNT as u32 + actuals + is_apply_target as u32,
            is_in_loop: unit.is_in_loop,
            ..Unit::new(inlinee)
        };
        self.inline_stack.push(job.func(inlinee).info.function_info);
        let optimized = self.optimize(job, &mut nested);
        self.inline_stack.pop();
        optimized?;
        binder::check_formal_count(job, inlinee, call)
    }

    fn note_outcome(&mut self, job: &Job, unit: &Unit, call: InstrId, candidate: &Candidate, outcome: Outcome) {
        let caller = job.func(unit.func).name();
        let profile_id = job.instr(call).profile_id;
        match outcome {
            Outcome::Inlined => {
                self.stats.note_depth(unit.depth + 1);
                debug!(caller, callee = %candidate.name, ?profile_id, depth = unit.depth, "inlined");
            }
            Outcome::Declined(reason) => {
                self.stats.record_decline(reason);
                debug!(caller, callee = %candidate.name, ?profile_id, depth = unit.depth, %reason, "declined");
            }
        }
    }
}

/// Keep `syms` alive for bailout right before `anchor`
fn byte_code_uses(job: &mut Job, anchor: InstrId, syms: &[SymId]) -> Result<InstrId> {
    let func = job.instr(anchor).func;
    let uses = job.create(OpCode::ByteCodeUses, func);
    job.copy_offset(uses, anchor);
    job.instr_mut(uses).uses = syms.to_vec();
    job.insert_before(anchor, uses)?;
    Ok(uses)
}

/// Restart the statement interrupted by an inline right before `before`
fn insert_statement_boundary(job: &mut Job, unit: &Unit, before: InstrId) -> Result<()> {
    let Some(statement) = unit.last_statement else {
        return Ok(());
    };
    let index = job.instr(statement).statement_index;
    let func = job.instr(before).func;
    let boundary = job.create(OpCode::StatementBoundary, func);
    job.instr_mut(boundary).statement_index = index;
    job.copy_offset(boundary, before);
    job.insert_before(before, boundary)
}

/// The register a call operand reads, for `ByteCodeUses` of replaced call targets
fn operand_reg(opnd: Option<Operand>) -> Option<SymId> {
    opnd.and_then(|o| o.reg())
}

/// Inline every profitable call site of `job`
///
/// Convenience wrapper around [`Inliner`] returning its statistics.
pub fn inline_job(
    job: &mut Job,
    ctx: &InlineContext,
    config: &InlinerConfig,
    decider: &dyn InliningDecider,
    builder: &dyn IrBuilder,
) -> Result<InlineStats> {
    let mut inliner = Inliner::new(ctx, config, decider, builder);
    inliner.run(job)?;
    Ok(inliner.into_stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decider::ProfileDecider;
    use crate::ir::dump::dump_func;
    use crate::ir::FuncBuilder;
    use crate::materializer::FnIrBuilder;
    use crate::profile::{FixedFieldInfo, FunctionBody, FunctionObjectId, ObjTypeSpecInfo, PropertyId};

    fn script(name: &str, number: u32, params: u16) -> Arc<FunctionBody> {
        Arc::new(FunctionBody {
            locals_count: 4,
            profiled_call_site_count: 4,
            ..FunctionBody::new(name, number, params)
        })
    }

    #[test]
    fn test_disabled_inliner_leaves_job_alone() {
        let g = Arc::new(Candidate::script(script("g", 2, 2)));
        let f = Candidate::script(script("f", 1, 2)).with_call_site(0, g);
        let mut job = Job::new(Arc::new(f)).unwrap();
        let top = job.top();
        {
            let mut b = FuncBuilder::new(&mut job, top);
            let (x, target, r) = (b.reg(0), b.reg(1), b.reg(2));
            b.arg_in(x, 2).unwrap();
            b.call(OpCode::CallI, Some(r), target, &[Operand::Reg(x), Operand::Reg(x)], Some(0))
                .unwrap();
            b.ret(Operand::Reg(r)).unwrap();
        }
        let before = dump_func(&job, top);
        let config = InlinerConfig {
            inline: false,
            ..InlinerConfig::default()
        };
        let builder = FnIrBuilder::new();
        let stats = inline_job(
            &mut job,
            &InlineContext::default(),
            &config,
            &ProfileDecider::default(),
            &builder,
        )
        .unwrap();
        assert_eq!(dump_func(&job, top), before);
        assert_eq!(stats.call_sites, 0);
    }

    #[test]
    fn test_unprofiled_call_is_skipped() {
        let g = Arc::new(Candidate::script(script("g", 2, 1)));
        let f = Candidate::script(script("f", 1, 1)).with_call_site(0, g);
        let mut job = Job::new(Arc::new(f)).unwrap();
        let top = job.top();
        {
            let mut b = FuncBuilder::new(&mut job, top);
            let (this, target, r) = (b.reg(0), b.reg(1), b.reg(2));
            b.call(OpCode::CallI, Some(r), target, &[Operand::Reg(this)], None)
                .unwrap();
            b.ret(Operand::Reg(r)).unwrap();
        }
        let builder = FnIrBuilder::new();
        let stats = inline_job(
            &mut job,
            &InlineContext::default(),
            &InlinerConfig::default(),
            &ProfileDecider::default(),
            &builder,
        )
        .unwrap();
        assert_eq!(stats.call_sites, 0);
        assert!(job.opcodes(top).contains(&OpCode::CallI));
    }

    #[test]
    fn test_constant_argument_mask() {
        let f = Candidate::script(script("f", 1, 1));
        let mut job = Job::new(Arc::new(f)).unwrap();
        let top = job.top();
        let call = {
            let mut b = FuncBuilder::new(&mut job, top);
            let (this, k, x, target) = (b.reg(0), b.reg(1), b.reg(2), b.reg(3));
            b.ld_const(k, 7).unwrap();
            b.call(
                OpCode::CallI,
                None,
                target,
                &[Operand::Reg(this), Operand::Reg(x), Operand::Reg(k)],
                Some(0),
            )
            .unwrap()
        };
        let ctx = InlineContext::default();
        let config = InlinerConfig::default();
        let decider = ProfileDecider::default();
        let builder = FnIrBuilder::new();
        let inliner = Inliner::new(&ctx, &config, &decider, &builder);
        assert_eq!(inliner.constant_argument_mask(&job, call), 0b100);
    }

    #[test]
    fn test_constant_argument_mask_ignores_wide_indices() {
        let f = Candidate::script(script("f", 1, 1));
        let mut job = Job::new(Arc::new(f)).unwrap();
        let top = job.top();
        let call = {
            let mut b = FuncBuilder::new(&mut job, top);
            let (k, target) = (b.reg(0), b.reg(1));
            b.ld_const(k, 1).unwrap();
            let args = vec![Operand::Reg(k); 36];
            b.call(OpCode::CallI, None, target, &args, Some(0)).unwrap()
        };
        let ctx = InlineContext::default();
        let config = InlinerConfig {
            max_constant_argument_index: 40,
            ..InlinerConfig::default()
        };
        let decider = ProfileDecider::default();
        let builder = FnIrBuilder::new();
        let inliner = Inliner::new(&ctx, &config, &decider, &builder);
        assert_eq!(inliner.constant_argument_mask(&job, call), u32::MAX);
    }

    #[test]
    fn test_fixed_method_without_profiled_sites() {
        let mut job = Job::with_body(Arc::new(FunctionBody::new("f", 1, 1)));
        let top = job.top();
        let call = {
            let mut b = FuncBuilder::new(&mut job, top);
            let (obj, method) = (b.reg(0), b.reg(1));
            let field = FixedFieldInfo {
                function_object: FunctionObjectId(0x50),
                function_info: Some(FunctionInfoId(2)),
                environment: None,
                type_id: None,
            };
            b.ld_fld(
                OpCode::LdMethodFld,
                method,
                obj,
                PropertyId(7),
                Some(0),
                Some(Arc::new(ObjTypeSpecInfo::monomorphic(field))),
            )
            .unwrap();
            b.call(OpCode::CallI, None, method, &[Operand::Reg(obj)], None)
                .unwrap()
        };
        let config = InlinerConfig {
            fixed_script_calls: true,
            ..InlinerConfig::default()
        };
        let builder = FnIrBuilder::new();
        let stats = inline_job(
            &mut job,
            &InlineContext::default(),
            &config,
            &ProfileDecider::default(),
            &builder,
        )
        .unwrap();
        assert_eq!(job.opcode(call), OpCode::CallIFixed);
        assert!(job.opcodes(top).contains(&OpCode::CheckFixedFld));
        assert_eq!(stats.fixed_only, 1);
        assert_eq!(stats.call_sites, 0);
    }

    #[test]
    fn test_native_array_allocation_guarded_without_profile() {
        let mut job = Job::with_body(Arc::new(FunctionBody::new("f", 1, 1)));
        let top = job.top();
        let (call, plain) = {
            let mut b = FuncBuilder::new(&mut job, top);
            let (len, ctor, native, other) = (b.reg(0), b.reg(1), b.reg(2), b.reg(3));
            let call = b
                .call(OpCode::NewScObjArray, Some(native), ctor, &[Operand::Reg(len)], None)
                .unwrap();
            let plain = b
                .call(OpCode::NewScObjArray, Some(other), ctor, &[Operand::Reg(len)], None)
                .unwrap();
            b.job().sym_mut(native).value_type = ValueType::LikelyNativeArray;
            (call, plain)
        };
        let builder = FnIrBuilder::new();
        inline_job(
            &mut job,
            &InlineContext::default(),
            &InlinerConfig::default(),
            &ProfileDecider::default(),
            &builder,
        )
        .unwrap();
        assert_eq!(job.bailout_of(call).map(|b| b.kind), Some(BailOutKind::OnNotNativeArray));
        assert!(job.bailout_of(plain).is_none());
    }
}
