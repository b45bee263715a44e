//! Guard emission
//!
//! Every speculative rewrite is protected by one or more guards: instructions that
//! check an assumption at run time and deoptimize through a [`BailOutRecord`] if it does
//! not hold. All guards the engine emits go through [`emit_guard`], parameterized by a
//! [`GuardKind`]; the `prepare_*`/`insert_*` helpers combine them into the standard
//! guard sets of a call-site transformation.
//!
//! [`BailOutRecord`]: crate::ir::BailOutRecord

use std::fmt;

use tracing::trace;

use crate::context::InlineContext;
use crate::error::{messages, Error, Result};
use crate::ir::{
    AddrValue, BailOutId, BailOutKind, IndirOperand, InstrFlags, InstrId, Job, OpCode, Operand,
    SymId,
};
use crate::profile::{BuiltinFunction, FunctionInfoId};

/// What a guard checks, with the values it checks
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GuardKind {
    /// The value is an object rather than a tagged number
    Object(SymId),
    /// The object's type id is the function type
    FunctionTypeId(SymId),
    /// The function object runs exactly this code
    FunctionInfo { target: SymId, info: FunctionInfoId },
    /// The function object is the given built-in
    BuiltIn { target: SymId, builtin: BuiltinFunction },
    /// The property still holds the value the type system cached for it
    FixedField { property: SymId },
    /// Check the property's guard and load the receiver type into `dst`
    PropertyTypeLoad { property: SymId, dst: SymId },
    /// None of a polymorphic dispatch's arms matched
    PolymorphicMiss,
    /// `this` needs no conversion
    CheckThis { this: SymId, strict: bool },
    /// `arguments` is still the stack-allocated arguments object
    StackArgs { arguments: SymId },
    /// The spread source is still a plain array
    Spreadable { source: SymId },
}

impl GuardKind {
    /// Opcode of the instruction that carries the bailout
    pub fn opcode(&self) -> OpCode {
        match self {
            GuardKind::Object(_) => OpCode::BailOnNotObject,
            GuardKind::FunctionTypeId(_) | GuardKind::FunctionInfo { .. } => OpCode::BailOnNotEqual,
            GuardKind::BuiltIn { .. } => OpCode::BailOnNotBuiltIn,
            GuardKind::FixedField { .. } => OpCode::CheckFixedFld,
            GuardKind::PropertyTypeLoad { .. } => OpCode::CheckPropertyGuardAndLoadType,
            GuardKind::PolymorphicMiss => OpCode::BailOnNotPolymorphicInlinee,
            GuardKind::CheckThis { strict: false, .. } => OpCode::CheckThis,
            GuardKind::CheckThis { strict: true, .. } => OpCode::StrictCheckThis,
            GuardKind::StackArgs { .. } => OpCode::BailOnNotStackArgs,
            GuardKind::Spreadable { .. } => OpCode::BailOnNotSpreadable,
        }
    }
}

impl fmt::Display for GuardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardKind::Object(sym) => write!(f, "object({})", sym),
            GuardKind::FunctionTypeId(sym) => write!(f, "function-type({})", sym),
            GuardKind::FunctionInfo { target, info } => write!(f, "function-info({} == {})", target, info),
            GuardKind::BuiltIn { target, builtin } => write!(f, "builtin({} == {})", target, builtin.name()),
            GuardKind::FixedField { property } => write!(f, "fixed-field({})", property),
            GuardKind::PropertyTypeLoad { property, .. } => write!(f, "property-type({})", property),
            GuardKind::PolymorphicMiss => write!(f, "polymorphic-miss"),
            GuardKind::CheckThis { this, .. } => write!(f, "check-this({})", this),
            GuardKind::StackArgs { arguments } => write!(f, "stack-args({})", arguments),
            GuardKind::Spreadable { source } => write!(f, "spreadable({})", source),
        }
    }
}

/// Emit the guard instruction(s) for `kind` in front of `anchor`, all sharing `bailout`
///
/// Returns the instruction that carries the bailout.
pub fn emit_guard(
    job: &mut Job,
    ctx: &InlineContext,
    kind: GuardKind,
    anchor: InstrId,
    bailout: BailOutId,
) -> Result<InstrId> {
    let func = job.instr(anchor).func;
    let layout = ctx.layout;
    let (dst, src1, src2) = match kind {
        GuardKind::Object(sym) => (None, Some(Operand::Reg(sym)), None),
        GuardKind::FunctionTypeId(sym) => {
            let type_reg = job.new_jit_reg(func);
            let load = job.create_with(
                OpCode::Ld,
                Some(Operand::Reg(type_reg)),
                Some(Operand::Indir(IndirOperand {
                    base: sym,
                    index: None,
                    offset: layout.type_offset,
                })),
                None,
                func,
            );
            job.copy_offset(load, anchor);
            job.insert_before(anchor, load)?;
            (
                None,
                Some(Operand::Indir(IndirOperand {
                    base: type_reg,
                    index: None,
                    offset: layout.type_id_offset,
                })),
                Some(Operand::IntConst(ctx.function_type_id as i64)),
            )
        }
        GuardKind::FunctionInfo { target, info } => (
            None,
            Some(Operand::Indir(IndirOperand {
                base: target,
                index: None,
                offset: layout.function_info_offset,
            })),
            Some(Operand::Addr(AddrValue::FunctionInfo(info))),
        ),
        GuardKind::BuiltIn { target, builtin } => (
            None,
            Some(Operand::Reg(target)),
            Some(Operand::IntConst(builtin as i64)),
        ),
        GuardKind::FixedField { property } => (None, Some(Operand::Sym(property)), None),
        GuardKind::PropertyTypeLoad { property, dst } => {
            (Some(Operand::Reg(dst)), Some(Operand::Sym(property)), None)
        }
        GuardKind::PolymorphicMiss => (None, None, None),
        GuardKind::CheckThis { this, .. } => (None, Some(Operand::Reg(this)), None),
        GuardKind::StackArgs { arguments } => (None, Some(Operand::Reg(arguments)), None),
        GuardKind::Spreadable { source } => (None, Some(Operand::Reg(source)), None),
    };

    let guard = job.create_with(kind.opcode(), dst, src1, src2, func);
    job.copy_offset(guard, anchor);
    job.share_bailout(guard, bailout);
    if matches!(kind, GuardKind::FixedField { .. }) {
        job.instr_mut(guard).flags.insert(InstrFlags::USES_FIXED_VALUE);
    }
    job.insert_before(anchor, guard)?;
    trace!(guard = %kind, instr = %guard, bailout = %job.bailout(bailout).kind, "emitted guard");
    Ok(guard)
}

/// The register holding a call's target
pub fn call_target(job: &Job, call: InstrId) -> Result<SymId> {
    let instr = job.instr(call);
    instr
        .src1
        .and_then(|s| s.reg())
        .ok_or_else(|| Error::shape(instr.func, call, messages::expected("register call target", instr.src1)))
}

/// Guard an inline of `info` at `call`: the target must be a function object running
/// exactly that code
///
/// The guards go in front of `checks_before` and share one `BailOutOnInlineFunction`
/// record that resumes at `checks_before`.
pub fn prepare_insertion_point(
    job: &mut Job,
    ctx: &InlineContext,
    call: InstrId,
    info: FunctionInfoId,
    checks_before: InstrId,
) -> Result<BailOutId> {
    let target = call_target(job, call)?;
    let bailout = job.new_bailout(BailOutKind::OnInlineFunction, checks_before);
    emit_guard(job, ctx, GuardKind::Object(target), checks_before, bailout)?;
    emit_guard(job, ctx, GuardKind::FunctionTypeId(target), checks_before, bailout)?;
    emit_guard(job, ctx, GuardKind::FunctionInfo { target, info }, checks_before, bailout)?;
    Ok(bailout)
}

/// Object and function-type checks on a call target, without pinning its identity
pub fn insert_js_function_check(
    job: &mut Job,
    ctx: &InlineContext,
    call: InstrId,
    checks_before: InstrId,
    kind: BailOutKind,
) -> Result<BailOutId> {
    let target = call_target(job, call)?;
    let bailout = job.new_bailout(kind, checks_before);
    emit_guard(job, ctx, GuardKind::Object(target), checks_before, bailout)?;
    emit_guard(job, ctx, GuardKind::FunctionTypeId(target), checks_before, bailout)?;
    Ok(bailout)
}

/// Guard that the call target is the given built-in
pub fn insert_builtin_check(
    job: &mut Job,
    ctx: &InlineContext,
    target: SymId,
    builtin: BuiltinFunction,
    checks_before: InstrId,
) -> Result<BailOutId> {
    let bailout = job.new_bailout(BailOutKind::OnInlineFunction, checks_before);
    emit_guard(job, ctx, GuardKind::BuiltIn { target, builtin }, checks_before, bailout)?;
    Ok(bailout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FuncBuilder;
    use crate::profile::FunctionBody;
    use std::sync::Arc;

    fn call_job() -> (Job, InstrId, SymId) {
        let mut job = Job::with_body(Arc::new(FunctionBody::new("f", 1, 2)));
        let f = job.top();
        let mut b = FuncBuilder::new(&mut job, f);
        let g = b.reg(1);
        let x = b.reg(2);
        let call = b
            .call(
                OpCode::CallI,
                None,
                g,
                &[Operand::Addr(AddrValue::Undefined), Operand::Reg(x)],
                Some(0),
            )
            .unwrap();
        (job, call, g)
    }

    #[test]
    fn test_prepare_insertion_point_shares_one_bailout() {
        let (mut job, call, _) = call_job();
        let ctx = InlineContext::default();
        let bailout = prepare_insertion_point(&mut job, &ctx, call, FunctionInfoId(2), call).unwrap();

        assert_eq!(
            job.opcodes(job.top()),
            vec![
                OpCode::StartCall,
                OpCode::ArgOut,
                OpCode::ArgOut,
                OpCode::BailOnNotObject,
                OpCode::Ld,
                OpCode::BailOnNotEqual,
                OpCode::BailOnNotEqual,
                OpCode::CallI,
            ]
        );
        let guards: Vec<_> = job
            .func_instrs(job.top())
            .into_iter()
            .filter(|id| job.opcode(*id).is_guard())
            .collect();
        assert_eq!(guards.len(), 3);
        for guard in guards {
            assert_eq!(job.instr(guard).bailout, Some(bailout));
        }
        let record = job.bailout(bailout);
        assert_eq!(record.kind, BailOutKind::OnInlineFunction);
        assert_eq!(record.recovery, call);
    }

    #[test]
    fn test_function_info_guard_compares_identity() {
        let (mut job, call, g) = call_job();
        let ctx = InlineContext::default();
        let bailout = job.new_bailout(BailOutKind::OnInlineFunction, call);
        let guard = emit_guard(
            &mut job,
            &ctx,
            GuardKind::FunctionInfo {
                target: g,
                info: FunctionInfoId(9),
            },
            call,
            bailout,
        )
        .unwrap();
        let instr = job.instr(guard);
        assert_eq!(
            instr.src1,
            Some(Operand::Indir(IndirOperand {
                base: g,
                index: None,
                offset: ctx.layout.function_info_offset,
            }))
        );
        assert_eq!(instr.src2, Some(Operand::Addr(AddrValue::FunctionInfo(FunctionInfoId(9)))));
    }

    #[test]
    fn test_fixed_call_target_is_not_guardable() {
        let (mut job, call, _) = call_job();
        job.set_src1(
            call,
            Some(Operand::Addr(AddrValue::FixedFunction {
                object: crate::profile::FunctionObjectId(1),
                info: None,
            })),
        );
        let err = prepare_insertion_point(&mut job, &InlineContext::default(), call, FunctionInfoId(2), call)
            .unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn test_fixed_field_guard_is_flagged() {
        let (mut job, call, _) = call_job();
        let f = job.top();
        let obj = job.new_reg(f);
        let prop = job.syms.new_property_sym(
            f,
            crate::ir::PropertySym {
                object: obj,
                property_id: crate::profile::PropertyId(4),
                inline_cache_index: None,
                type_spec: None,
            },
        );
        let bailout = job.new_bailout(BailOutKind::FailedFixedFieldTypeCheck, call);
        let guard = emit_guard(
            &mut job,
            &InlineContext::default(),
            GuardKind::FixedField { property: prop },
            call,
            bailout,
        )
        .unwrap();
        assert_eq!(job.opcode(guard), OpCode::CheckFixedFld);
        assert!(job.instr(guard).flags.contains(InstrFlags::USES_FIXED_VALUE));
    }
}
