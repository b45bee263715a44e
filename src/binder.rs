//! Argument and frame binding
//!
//! Connects a call's outgoing arguments to an inlinee's incoming parameters and lays
//! out the frame metadata a stack walker expects to find for the inlined call:
//!
//! - [`map_actuals`] walks the argument chain and assigns every argument slot a frame
//!   offset, expanding forwarded stack arguments (`ArgOutFromStackArgs`) in place.
//! - [`map_formals`] rewrites the inlinee body: parameter loads read the captured actuals,
//!   `this`, rest, environment and new-target loads are resolved, returns become
//!   assignments to the call's destination.
//! - [`setup_inlinee_frame`] emits the three meta arguments (count, function object,
//!   arguments object) in front of `InlineeStart`.

use tracing::trace;

use crate::config::MAX_INLINEE_ARGOUT_COUNT;
use crate::context::InlineContext;
use crate::ensure_invariant;
use crate::error::{messages, Error, InvariantKind, IrLocation, Result};
use crate::ir::{
    AddrValue, BailOutKind, FuncFlags, FuncId, IndirOperand, InstrId, Job, OpCode,
    Operand, SymFlags, SymId, ValueType,
};
use crate::profile::BuiltinFunction;

/// Frame slots reserved for the argument count, function object and arguments object
pub const INLINEE_META_ARG_COUNT: u16 = 3;

/// Size of one frame slot
pub const FRAME_SLOT_SIZE: i32 = 8;

/// Outgoing arguments of a call, by 0-based position (position 0 is `this`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundActuals {
    by_position: Vec<Option<InstrId>>,
    formal_count: u16,
    actual_count: u16,
    stack_args_expanded: bool,
}

impl BoundActuals {
    /// Actual count including `this`
    pub fn actual_count(&self) -> u16 {
        self.actual_count
    }

    /// Parameter count of the callee including `this`
    pub fn formal_count(&self) -> u16 {
        self.formal_count
    }

    pub fn stack_args_expanded(&self) -> bool {
        self.stack_args_expanded
    }

    /// The argument bound to formal `position`, if the caller passed one
    pub fn formal(&self, position: usize) -> Option<InstrId> {
        if position < self.formal_count as usize {
            self.by_position.get(position).copied().flatten()
        } else {
            None
        }
    }

    /// An argument beyond the callee's formals
    pub fn extra(&self, position: usize) -> Option<InstrId> {
        if position >= self.formal_count as usize {
            self.by_position.get(position).copied().flatten()
        } else {
            None
        }
    }

    pub fn arg_at(&self, position: usize) -> Option<InstrId> {
        self.by_position.get(position).copied().flatten()
    }

    fn set(&mut self, position: usize, arg: InstrId) {
        if self.by_position.len() <= position {
            self.by_position.resize(position + 1, None);
        }
        self.by_position[position] = Some(arg);
    }
}

/// How the call site and caller see the inlined call
#[derive(Debug, Clone, Copy)]
pub struct FormalBinding {
    /// The call's destination, receiving the inlinee's return value
    pub ret: Option<Operand>,
    /// The function object operand (a register or a fixed function address)
    pub target: Operand,
    /// The caller's own `this` symbol
    pub caller_this: Option<SymId>,
    /// The fixed-method rewrite proved the receiver is an object
    pub fixed_function_safe_this: bool,
    /// `CheckThis` conversion of `this` loads is enabled
    pub check_this: bool,
}

fn frame_offset(slot: u32) -> i32 {
    slot as i32 * FRAME_SLOT_SIZE
}

fn link_slot(job: &Job, arg: InstrId) -> Result<SymId> {
    let instr = job.instr(arg);
    instr
        .dst()
        .and_then(|d| d.slot())
        .ok_or_else(|| Error::arg_chain(instr.func, arg, messages::NOT_ARG_SLOT))
}

fn arg_def(job: &Job, link: Operand, at: InstrId) -> Result<InstrId> {
    let func = job.instr(at).func;
    let sym = link
        .sym()
        .ok_or_else(|| Error::arg_chain(func, at, messages::NOT_ARG_SLOT))?;
    job.sym(sym)
        .single_def()
        .ok_or_else(|| Error::single_def(sym, messages::NOT_SINGLE_DEF))
}

/// Snapshot an argument's value into a register right before it
pub fn generate_arg_out_snapshot(job: &mut Job, arg: InstrId) -> Result<InstrId> {
    let func = job.instr(arg).func;
    let value = job.instr(arg).src1;
    let tmp = job.new_jit_reg(func);
    let snapshot = job.create_with(OpCode::Ld, Some(Operand::Reg(tmp)), value, None, func);
    job.copy_offset(snapshot, arg);
    job.insert_before(arg, snapshot)?;
    job.set_src1(arg, Some(Operand::Reg(tmp)));
    Ok(snapshot)
}

/// The snapshot feeding a stack-args fixup
pub fn arg_out_snapshot(job: &Job, arg: InstrId) -> Option<InstrId> {
    let sym = job.instr(arg).src1?.reg()?;
    let def = job.sym(sym).single_def()?;
    (job.opcode(def) == OpCode::Ld).then_some(def)
}

/// The register a parameter reads in place of an argument
fn bound_value(job: &Job, arg: InstrId) -> Result<InstrId> {
    if let Some(capture) = job.arg_out_capture(arg) {
        return Ok(capture);
    }
    if job.opcode(arg) == OpCode::ArgOutFixupForStackArgs {
        if let Some(snapshot) = arg_out_snapshot(job, arg) {
            return Ok(snapshot);
        }
    }
    let func = job.instr(arg).func;
    Err(Error::shape(func, arg, "argument has no capture or snapshot"))
}

/// Walk the argument chain of `call`, marking every slot as inlined and recording
/// which argument binds to which position
///
/// `in_params_count` is the callee's parameter count including `this`. When `inlinee`
/// is given, plain arguments become `ArgOutInline` (unless the inlinee needs a real
/// arguments object) and forwarded stack arguments are expanded into one fixup per
/// formal.
pub fn map_actuals(
    job: &mut Job,
    call: InstrId,
    inlinee: Option<FuncId>,
    in_params_count: u16,
    frame_slot: u32,
) -> Result<BoundActuals> {
    let call_func = job.instr(call).func;
    let has_args_access = match inlinee {
        Some(inlinee) => {
            let access = inlinee_has_arguments_object(job, inlinee);
            if access {
                job.func_mut(inlinee).flags.insert(FuncFlags::HAS_UNOPTIMIZED_ARGS_ACCESS);
            }
            access
        }
        None => false,
    };
    let call_site_id = inlinee.map(|f| job.func(f).call_site_id).unwrap_or(0);
    let base = frame_slot + (INLINEE_META_ARG_COUNT as u32 - 1);

    let mut bound = BoundActuals {
        by_position: vec![None; in_params_count as usize],
        formal_count: in_params_count,
        actual_count: 0,
        stack_args_expanded: false,
    };
    let mut fixup_count: u16 = 0;

    let mut link = job
        .instr(call)
        .src2
        .ok_or_else(|| Error::arg_chain(call_func, call, messages::MISSING_LINK))?;
    while let Operand::Sym(sym) = link {
        let arg = arg_def(job, link, call)?;
        let slot = job.sym(sym).arg_slot.unwrap_or(0);
        {
            let s = job.sym_mut(sym);
            s.flags.insert(SymFlags::INLINED_ARG_SLOT);
            s.arg_offset = Some(frame_offset(base + slot as u32));
        }

        let mut counts = true;
        match job.opcode(arg) {
            OpCode::ArgOut => {
                if inlinee.is_some() && !has_args_access {
                    job.set_opcode(arg, OpCode::ArgOutInline);
                }
                job.generate_arg_out_capture(arg)?;
            }
            OpCode::ArgOutFromStackArgs if inlinee.is_some() => {
                let arg_func = job.instr(arg).func;
                for _ in 1..in_params_count {
                    let slot = job.sym(sym).arg_slot.unwrap_or(0);
                    let fixup_sym = job.new_arg_slot(arg_func, slot);
                    job.sym_mut(fixup_sym).flags.insert(SymFlags::INLINED_ARG_SLOT);
                    let prev_link = job.instr(arg).src2;
                    let fixup = job.create_with(
                        OpCode::ArgOutFixupForStackArgs,
                        Some(Operand::Sym(fixup_sym)),
                        Some(Operand::Addr(AddrValue::Undefined)),
                        prev_link,
                        arg_func,
                    );
                    job.copy_offset(fixup, arg);
                    job.insert_before(arg, fixup)?;
                    job.set_src2(arg, Some(Operand::Sym(fixup_sym)));
                    {
                        let s = job.sym_mut(sym);
                        let next_slot = slot + 1;
                        s.arg_slot = Some(next_slot);
                        s.arg_offset = Some(frame_offset(base + next_slot as u32));
                    }
                    generate_arg_out_snapshot(job, fixup)?;
                    fixup_count += 1;
                }
                job.set_src1(arg, Some(Operand::IntConst(call_site_id as i64)));
                counts = false;
                bound.stack_args_expanded = true;
            }
            _ => {}
        }

        if counts {
            bound.actual_count += 1;
        }
        let slot = job.sym(sym).arg_slot.unwrap_or(0);
        let position = slot.saturating_sub(1) as usize;
        if position < in_params_count as usize || job.opcode(arg) != OpCode::ArgOutFromStackArgs {
            bound.set(position, arg);
        }
        link = job
            .instr(arg)
            .src2
            .ok_or_else(|| Error::arg_chain(call_func, arg, messages::MISSING_START_CALL))?;
    }

    let start_sym = link
        .reg()
        .ok_or_else(|| Error::arg_chain(call_func, call, messages::MISSING_START_CALL))?;
    let start_call = job
        .sym(start_sym)
        .single_def()
        .filter(|def| job.opcode(*def) == OpCode::StartCall)
        .ok_or_else(|| Error::arg_chain(call_func, call, messages::MISSING_START_CALL))?;
    job.sym_mut(start_sym).flags.insert(SymFlags::INLINED_ARG_SLOT);

    if bound.stack_args_expanded {
        let count = job.start_call_count(start_call) as i32 + fixup_count as i32 - 1;
        job.set_start_call_count(start_call, count.max(0) as u16);
        job.func_mut(call_func)
            .args_offset_fixups
            .insert(call_site_id, fixup_count.saturating_sub(1));
        if let Some(known) = job.func(call_func).actual_count {
            bound.actual_count = known;
        }
    }

    trace!(
        call = %call,
        actuals = bound.actual_count,
        formals = in_params_count,
        expanded = bound.stack_args_expanded,
        "mapped actuals"
    );
    Ok(bound)
}

/// Mark every unit from `func` up to the top as possibly calling arbitrary code
fn set_implicit_calls_on_self_and_parents(job: &mut Job, func: FuncId) {
    let mut cur = Some(func);
    while let Some(f) = cur {
        job.func_mut(f).flags.insert(FuncFlags::HAS_IMPLICIT_CALLS);
        cur = job.func(f).parent;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThisUse {
    Unknown,
    Safe,
    Const(SymId),
}

/// Rewrite the inlinee body against the bound actuals
pub fn map_formals(
    job: &mut Job,
    inlinee: FuncId,
    actuals: &BoundActuals,
    binding: &FormalBinding,
) -> Result<()> {
    let formal_count = actuals.formal_count();
    let actual_count = actuals.actual_count();
    let (head, tail) = {
        let f = job.func(inlinee);
        (f.head, f.tail)
    };

    let mut this_use = ThisUse::Unknown;
    let mut sym_this: Option<SymId> = None;
    let mut done_label: Option<InstrId> = None;

    let mut cur = job.next(head);
    while let Some(instr) = cur {
        if instr == tail {
            break;
        }
        let next = job.next(instr);
        let instr_func = job.instr(instr).func;
        match job.opcode(instr) {
            OpCode::ArgInRest => {
                if !actuals.stack_args_expanded() {
                    bind_rest(job, inlinee, instr, actuals)?;
                }
            }
            OpCode::ArgIn => {
                let param = job.unlink_src1(instr).and_then(|s| s.sym());
                let slot = param.and_then(|p| job.sym(p).param_slot).unwrap_or(0);
                let index = slot.saturating_sub(1) as usize;
                ensure_invariant!(
                    slot > 0 && index < formal_count as usize,
                    Error::invariant(
                        InvariantKind::Formals,
                        IrLocation::instr(instr_func, instr),
                        messages::FORMAL_OUT_OF_RANGE
                    )
                );
                match actuals.formal(index) {
                    Some(arg) => {
                        let def = bound_value(job, arg)?;
                        let value = job.instr(def).dst();
                        let src = job.instr(def).src1;
                        job.set_src1(instr, value);
                        job.set_opcode(instr, OpCode::Ld);
                        if index == 0 {
                            if let Some(src_sym) = src.and_then(|s| s.reg()) {
                                sym_this = job.instr(instr).dst_sym();
                                this_use = classify_this(job, inlinee, src_sym, binding);
                            }
                        }
                    }
                    None => {
                        job.set_src1(instr, Some(Operand::Addr(AddrValue::Undefined)));
                        job.set_opcode(instr, OpCode::Ld);
                    }
                }
            }
            OpCode::ArgOutFromStackArgs => {
                fix_forwarded_stack_args(job, instr, actuals)?;
            }
            OpCode::InlineeStart => {
                if let Some(link) = job.instr(instr).src2.filter(|s| s.slot().is_some()) {
                    let stack_args = arg_def(job, link, instr)?;
                    if job.opcode(stack_args) == OpCode::ArgOutFromStackArgs {
                        let prev = job.instr(stack_args).src2;
                        job.remove(stack_args)?;
                        job.set_src2(instr, prev);
                    }
                }
            }
            OpCode::LdEnv if instr_func == inlinee => match binding.target {
                Operand::Addr(AddrValue::FixedFunction { .. }) => {
                    let env = job
                        .func(inlinee)
                        .fixed_function
                        .as_ref()
                        .and_then(|fixed| fixed.environment);
                    match env {
                        Some(env) => {
                            job.set_opcode(instr, OpCode::Ld);
                            job.set_src1(instr, Some(Operand::Addr(AddrValue::Environment(env))));
                        }
                        None => job.set_src1(instr, Some(binding.target)),
                    }
                }
                target => job.set_src1(instr, Some(target)),
            },
            OpCode::LdNewTarget if instr_func == inlinee => {
                if job.func(inlinee).is_inlined_ctor() {
                    job.set_src1(instr, Some(binding.target));
                } else {
                    job.set_src1(instr, Some(Operand::Addr(AddrValue::Undefined)));
                }
                job.set_opcode(instr, OpCode::Ld);
            }
            OpCode::ChkNewCallFlag if instr_func == inlinee && job.func(inlinee).is_inlined_ctor() => {
                job.remove(instr)?;
            }
            OpCode::LdHomeObj | OpCode::LdFuncObj if instr_func == inlinee => {
                job.set_src1(instr, Some(binding.target));
            }
            OpCode::LdThis | OpCode::StrictLdThis => {
                let reads_this = sym_this.is_some() && job.instr(instr).src1_sym() == sym_this;
                if reads_this && this_use == ThisUse::Safe {
                    remove_ld_this(job, instr)?;
                } else if let (true, ThisUse::Const(const_sym)) = (reads_this, this_use) {
                    match job.sym(const_sym).constant {
                        Some(crate::ir::ConstValue::Addr(addr)) if addr.is_object_like_this() => {
                            job.set_opcode(instr, OpCode::Ld);
                            job.set_src1(instr, Some(Operand::Addr(addr)));
                            job.set_src2(instr, None);
                        }
                        _ => check_this_opt(job, instr, binding)?,
                    }
                } else {
                    check_this_opt(job, instr, binding)?;
                }
            }
            OpCode::Throw | OpCode::RuntimeTypeError | OpCode::RuntimeReferenceError => {
                if let Some(inline_op) = job.opcode(instr).inline_throw_variant() {
                    job.set_opcode(instr, inline_op);
                }
                set_implicit_calls_on_self_and_parents(job, instr_func);
            }
            OpCode::Ret => {
                let is_last = next == Some(tail) || (next.is_some() && next == done_label);
                match binding.ret {
                    None => job.remove(instr)?,
                    Some(ret) => {
                        job.set_opcode(instr, OpCode::Ld);
                        job.set_dst(instr, Some(ret));
                    }
                }
                if !is_last {
                    let label = match done_label {
                        Some(label) => label,
                        None => {
                            let label = job.new_label(inlinee, false);
                            job.insert_before(tail, label)?;
                            done_label = Some(label);
                            label
                        }
                    };
                    let br = job.new_branch(OpCode::Br, label, None, None, inlinee);
                    match next {
                        Some(next) => {
                            job.copy_offset(br, next);
                            job.insert_before(next, br)?;
                        }
                        None => job.insert_before(label, br)?,
                    }
                }
            }
            _ => {}
        }
        cur = next;
    }

    trace!(inlinee = %inlinee, actuals = actual_count, formals = formal_count, "mapped formals");
    Ok(())
}

fn classify_this(job: &Job, inlinee: FuncId, src: SymId, binding: &FormalBinding) -> ThisUse {
    let sym = job.sym(src);
    if Some(src) == binding.caller_this || sym.is_safe_this() || job.func(inlinee).is_inlined_ctor() {
        ThisUse::Safe
    } else if sym.is_single_def() && sym.is_const() && !sym.is_number_const() {
        ThisUse::Const(src)
    } else if binding.fixed_function_safe_this {
        ThisUse::Safe
    } else {
        ThisUse::Unknown
    }
}

/// Build the rest array from the excess actuals
fn bind_rest(job: &mut Job, inlinee: FuncId, rest: InstrId, actuals: &BoundActuals) -> Result<()> {
    let rest_func = job.instr(rest).func;
    let formal_count = actuals.formal_count() as usize;
    let actual_count = actuals.actual_count() as usize;
    let rest_formals = if rest_func != inlinee {
        job.func(rest_func).body.in_params_count as usize
    } else {
        formal_count
    };
    let excess = actual_count.saturating_sub(rest_formals);
    let dst = job
        .instr(rest)
        .dst_sym()
        .ok_or_else(|| Error::shape(rest_func, rest, messages::expected("rest destination", "none")))?;
    job.sym_mut(dst).value_type = ValueType::Array;

    let new_arr = job.create_with(
        OpCode::NewScArray,
        None,
        Some(Operand::IntConst(excess as i64)),
        None,
        inlinee,
    );
    job.copy_offset(new_arr, rest);
    job.insert_before(rest, new_arr)?;
    // The rest instruction still defines `dst`; move the definition once it is gone.
    job.remove(rest)?;
    job.set_dst(new_arr, Some(Operand::Reg(dst)));

    let mut sources = Vec::with_capacity(excess);
    if rest_func != inlinee {
        for i in rest_formals..actual_count.min(formal_count) {
            sources.push(actuals.formal(i));
        }
        for i in formal_count.max(rest_formals)..actual_count {
            sources.push(actuals.extra(i));
        }
    } else {
        for i in formal_count..actual_count {
            sources.push(actuals.extra(i));
        }
    }
    ensure_invariant!(
        sources.len() == excess,
        Error::invariant(InvariantKind::Formals, IrLocation::instr(rest_func, rest), messages::REST_MISMATCH)
    );

    let mut anchor = new_arr;
    for (index, source) in sources.into_iter().enumerate() {
        let arg = source.ok_or_else(|| {
            Error::invariant(InvariantKind::Formals, IrLocation::instr(rest_func, rest), messages::REST_MISMATCH)
        })?;
        let value = job.instr(bound_value(job, arg)?).dst();
        let store = job.create_with(
            OpCode::StElemC,
            Some(Operand::Indir(IndirOperand {
                base: dst,
                index: None,
                offset: index as i32,
            })),
            value,
            None,
            inlinee,
        );
        job.copy_offset(store, new_arr);
        job.insert_after(anchor, store)?;
        anchor = store;
    }
    Ok(())
}

/// `this` needs no mapping: drop the load, or keep it as a plain copy
fn remove_ld_this(job: &mut Job, instr: InstrId) -> Result<()> {
    let same = {
        let i = job.instr(instr);
        i.dst_sym().is_some() && i.dst_sym() == i.src1_sym()
    };
    if same {
        job.remove(instr)
    } else {
        job.set_opcode(instr, OpCode::Ld);
        job.set_src2(instr, None);
        Ok(())
    }
}

/// Replace an inlined `this` load by a `CheckThis` guard when the profile says `this` is simple
fn check_this_opt(job: &mut Job, instr: InstrId, binding: &FormalBinding) -> Result<()> {
    if !binding.check_this {
        return Ok(());
    }
    let func = job.instr(instr).func;
    let body = job.func(func).body.clone();
    if !body.has_profile_info || !body.this_is_simple || body.check_this_disabled {
        return Ok(());
    }
    let Some(this) = job.instr(instr).src1_sym() else {
        return Ok(());
    };
    let strict = job.opcode(instr) == OpCode::StrictLdThis;
    let bailout = job.new_bailout(BailOutKind::CheckThis, instr);
    let check = job.create_with(
        if strict { OpCode::StrictCheckThis } else { OpCode::CheckThis },
        None,
        Some(Operand::Reg(this)),
        None,
        func,
    );
    job.copy_offset(check, instr);
    job.share_bailout(check, bailout);
    job.insert_before(instr, check)?;
    trace!(instr = %instr, strict, "converted this load to CheckThis");
    remove_ld_this(job, instr)
}

/// Reconcile a forwarded stack-args expansion with the now-known actual count
fn fix_forwarded_stack_args(job: &mut Job, instr: InstrId, actuals: &BoundActuals) -> Result<()> {
    let func = job.instr(instr).func;
    if job.instr(instr).src2.and_then(|s| s.slot()).is_none() {
        return Ok(());
    }
    let call_site_id = job.instr(instr).src1.and_then(|s| s.int_const()).unwrap_or(0) as u32;
    let actual_count = actuals.actual_count() as usize;

    let mut walk = job.instr(instr).src2;
    while let Some(link) = walk.filter(|l| l.slot().is_some()) {
        walk = job.instr(arg_def(job, link, instr)?).src2;
    }
    let start_call = walk
        .and_then(|w| w.reg())
        .and_then(|r| job.sym(r).single_def())
        .filter(|def| job.opcode(*def) == OpCode::StartCall)
        .ok_or_else(|| Error::arg_chain(func, instr, messages::MISSING_START_CALL))?;
    // The StartCall still counts the forwarded formals
    let forwarded_formals = job.start_call_count(start_call) as usize;

    if actual_count < forwarded_formals {
        let surplus = (forwarded_formals - actual_count) as u16;
        remove_extra_fixup_arg_outs(job, instr, surplus, call_site_id)?;
        let count = job.start_call_count(start_call);
        job.set_start_call_count(start_call, count.saturating_sub(surplus));
    }

    let mut fixups = Vec::new();
    let mut walk = job.instr(instr).src2;
    while let Some(link) = walk.filter(|l| l.slot().is_some()) {
        let arg = arg_def(job, link, instr)?;
        if job.opcode(arg) != OpCode::ArgOutFixupForStackArgs {
            break;
        }
        fixups.push(arg);
        walk = job.instr(arg).src2;
    }
    fixups.reverse();
    for (index, fixup) in fixups.into_iter().enumerate() {
        let Some(actual) = actuals.arg_at(index + 1) else {
            continue;
        };
        let value = job.arg_out_capture(actual).and_then(|c| job.instr(c).dst());
        if let (Some(value), Some(snapshot)) = (value, arg_out_snapshot(job, fixup)) {
            job.set_src1(snapshot, Some(value));
        }
    }

    if forwarded_formals < actual_count {
        fixup_extra_actual_params(job, instr, actuals, forwarded_formals, call_site_id)?;
        let count = job.start_call_count(start_call);
        job.set_start_call_count(start_call, count + (actual_count - forwarded_formals) as u16);
    }
    Ok(())
}

/// Append one fixup per actual the forwarded formals did not cover
pub fn fixup_extra_actual_params(
    job: &mut Job,
    instr: InstrId,
    actuals: &BoundActuals,
    from: usize,
    call_site_id: u32,
) -> Result<()> {
    let func = job.instr(instr).func;
    let sym = link_slot(job, instr)?;
    for index in from..actuals.actual_count() as usize {
        let Some(mapped) = actuals.arg_at(index) else {
            continue;
        };
        let slot = job.sym(sym).arg_slot.unwrap_or(0);
        let offset = job.sym(sym).arg_offset.unwrap_or(0);
        let extra_sym = job.new_arg_slot(func, slot);
        {
            let s = job.sym_mut(extra_sym);
            s.flags.insert(SymFlags::INLINED_ARG_SLOT);
            s.arg_offset = Some(offset);
        }
        {
            let s = job.sym_mut(sym);
            s.arg_slot = Some(slot + 1);
            s.arg_offset = Some(offset + FRAME_SLOT_SIZE);
        }
        let value = job.instr(mapped).src1;
        let prev_link = job.instr(instr).src2;
        let extra = job.create_with(
            OpCode::ArgOutFixupForStackArgs,
            Some(Operand::Sym(extra_sym)),
            value,
            prev_link,
            func,
        );
        job.copy_offset(extra, instr);
        job.insert_before(instr, extra)?;
        generate_arg_out_snapshot(job, extra)?;
        *job.func_mut(func).args_offset_fixups.entry(call_site_id).or_insert(0) += 1;
        job.set_src2(instr, Some(Operand::Sym(extra_sym)));
    }
    Ok(())
}

/// Drop `count` fixups the actual arguments do not fill
pub fn remove_extra_fixup_arg_outs(job: &mut Job, instr: InstrId, count: u16, call_site_id: u32) -> Result<()> {
    let func = job.instr(instr).func;
    let sym = link_slot(job, instr)?;
    for _ in 0..count {
        let link = job
            .instr(instr)
            .src2
            .ok_or_else(|| Error::arg_chain(func, instr, messages::MISSING_LINK))?;
        let fixup = arg_def(job, link, instr)?;
        ensure_invariant!(
            job.opcode(fixup) == OpCode::ArgOutFixupForStackArgs,
            Error::arg_chain(func, fixup, messages::expected("ArgOutFixupForStackArgs", job.opcode(fixup)))
        );
        let prev = job.instr(fixup).src2;
        job.set_src2(instr, prev);
        {
            let s = job.sym_mut(sym);
            s.arg_slot = s.arg_slot.map(|slot| slot.saturating_sub(1));
            s.arg_offset = s.arg_offset.map(|offset| offset - FRAME_SLOT_SIZE);
            s.flags.insert(SymFlags::ALLOCATED);
        }
        if let Some(snapshot) = arg_out_snapshot(job, fixup) {
            job.remove(snapshot)?;
        }
        job.remove(fixup)?;
        if let Some(fixups) = job.func_mut(func).args_offset_fixups.get_mut(&call_site_id) {
            *fixups = fixups.saturating_sub(1);
        }
    }
    Ok(())
}

/// Emit the inlinee's frame metadata in front of `inlinee_start`
pub fn setup_inlinee_frame(
    job: &mut Job,
    inlinee: FuncId,
    inlinee_start: InstrId,
    actual_count: u16,
    frame_slot: u32,
) -> Result<()> {
    let sources = [
        Some(Operand::IntConst(actual_count as i64)),
        // Filled with the function object during lowering, once the target is evaluated
        None,
        Some(Operand::Addr(AddrValue::Null)),
    ];
    for (i, src) in sources.into_iter().enumerate() {
        let slot = actual_count + 1 + i as u16;
        let sym = job.new_arg_slot(inlinee, slot);
        {
            let s = job.sym_mut(sym);
            s.flags.insert(SymFlags::INLINED_ARG_SLOT);
            s.arg_offset = Some(frame_offset(frame_slot + i as u32));
        }
        let meta = job.create_with(OpCode::InlineeMetaArg, Some(Operand::Sym(sym)), src, None, inlinee);
        job.copy_offset(meta, inlinee_start);
        job.insert_before(inlinee_start, meta)?;
        if i == 0 {
            job.func_mut(inlinee).frame_start_sym = Some(sym);
        }
    }
    trace!(inlinee = %inlinee, actuals = actual_count, frame_slot, "set up inlinee frame");
    Ok(())
}

/// Check the hard limit on formals an inlinee frame can describe
pub fn check_formal_count(job: &Job, inlinee: FuncId, call: InstrId) -> Result<()> {
    let formals = job.func(inlinee).body.formal_count();
    ensure_invariant!(
        formals <= MAX_INLINEE_ARGOUT_COUNT,
        Error::invariant(
            InvariantKind::Frame,
            IrLocation::instr(job.instr(call).func, call),
            messages::TOO_MANY_FORMALS
        )
    );
    Ok(())
}

fn reads_arguments(job: &Job, opnd: Option<Operand>, arguments: SymId) -> bool {
    let mut check = opnd;
    let mut steps = 0;
    while let Some(op) = check {
        if op.used_syms().any(|s| s == arguments) {
            return true;
        }
        if let Some(crate::ir::SymKind::Property(prop)) = op.sym().map(|s| &job.sym(s).kind) {
            if prop.object == arguments {
                return true;
            }
        }
        check = op
            .sym()
            .and_then(|s| job.sym(s).single_def())
            .and_then(|def| job.instr(def).src1);
        steps += 1;
        if steps > job.syms.len() {
            break;
        }
    }
    false
}

fn instr_reads_arguments(job: &Job, instr: InstrId, arguments: SymId) -> bool {
    let i = job.instr(instr);
    if reads_arguments(job, i.src1, arguments) || reads_arguments(job, i.src2, arguments) {
        return true;
    }
    match i.dst() {
        Some(Operand::Sym(sym)) => matches!(
            &job.sym(sym).kind,
            crate::ir::SymKind::Property(prop) if prop.object == arguments
        ),
        Some(Operand::Indir(indir)) => indir.base == arguments || indir.index == Some(arguments),
        _ => false,
    }
}

fn is_apply_builtin(job: &Job, ctx: Option<&InlineContext>, opnd: Option<Operand>) -> bool {
    match opnd {
        Some(Operand::Reg(sym)) => job.sym(sym).builtin == Some(BuiltinFunction::FunctionApply),
        Some(Operand::Addr(AddrValue::FixedFunction { info: Some(info), .. })) => ctx
            .map(|ctx| ctx.builtin_for(info) == Some(BuiltinFunction::FunctionApply))
            .unwrap_or(false),
        _ => false,
    }
}

/// Does the inlinee read its arguments object in a way the frame must support?
///
/// Accesses an apply-target inline already replaced do not count.
pub fn inlinee_has_arguments_object(job: &Job, inlinee: FuncId) -> bool {
    inlinee_has_arguments_object_in(job, None, inlinee)
}

/// [`inlinee_has_arguments_object`] that can also recognize a fixed `apply`
pub fn inlinee_has_arguments_object_in(job: &Job, ctx: Option<&InlineContext>, inlinee: FuncId) -> bool {
    let f = job.func(inlinee);
    if !f.body.uses_arguments_object {
        return false;
    }
    if !f.flags.contains(FuncFlags::APPLY_TARGET_REMOVED_ARGS_ACCESS) {
        return true;
    }

    let mut arguments: Option<SymId> = None;
    let mut in_apply = false;
    for instr in job.func_instrs(inlinee) {
        if job.instr(instr).func != inlinee {
            continue;
        }
        let opcode = job.opcode(instr);
        if matches!(opcode, OpCode::LdHeapArguments | OpCode::LdLetHeapArguments) {
            arguments = job.instr(instr).dst_sym();
            continue;
        }
        let Some(args) = arguments else {
            continue;
        };
        match opcode {
            OpCode::InlineBuiltInStart => {
                if is_apply_builtin(job, ctx, job.instr(instr).src1) {
                    in_apply = true;
                }
            }
            OpCode::InlineBuiltInEnd => in_apply = false,
            OpCode::BailOnNotStackArgs
            | OpCode::ArgOutInlineBuiltIn
            | OpCode::BytecodeArgOutCapture
            | OpCode::BytecodeArgOutUse => {}
            OpCode::ArgOutFromStackArgs => {
                if in_apply && instr_reads_arguments(job, instr, args) {
                    return true;
                }
            }
            _ => {
                if instr_reads_arguments(job, instr, args) {
                    return true;
                }
            }
        }
    }
    false
}
