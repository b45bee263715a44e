//! Fixed-method rewrites
//!
//! When the type system has pinned the function stored in the property a call target
//! was loaded from, the load becomes a `CheckFixedFld` guard and the call reads the
//! function value directly.

use std::sync::Arc;
use tracing::trace;

use super::Inliner;
use crate::error::Result;
use crate::ir::{
    AddrValue, BailOutKind, ConstValue, InstrFlags, InstrId, Job, OpCode, Operand, SymFlags,
};
use crate::profile::{Candidate, FixedFieldInfo};

/// What kind of call a fixed-method rewrite is for
#[derive(Debug, Clone, Copy)]
pub(super) struct FixedRequest<'c> {
    /// The function the rewrite must resolve to, when inlining a specific candidate
    pub candidate: Option<&'c Candidate>,
    pub polymorphic: bool,
    pub builtin: bool,
    pub ctor: bool,
    /// The call is being inlined rather than just called
    pub inlined: bool,
    /// Only report whether the rewrite would apply
    pub check_only: bool,
    /// Which fixed value of a polymorphic access
    pub index: usize,
}

impl<'c> FixedRequest<'c> {
    /// A call that stays a call
    pub fn call() -> Self {
        Self {
            candidate: None,
            polymorphic: false,
            builtin: false,
            ctor: false,
            inlined: false,
            check_only: false,
            index: 0,
        }
    }

    /// An inline of `candidate`
    pub fn inline(candidate: &'c Candidate) -> Self {
        Self {
            candidate: Some(candidate),
            inlined: true,
            ..Self::call()
        }
    }
}

/// The fixed function a call was (or would be) resolved to
#[derive(Debug, Clone)]
pub(super) struct FixedMethod {
    pub field: FixedFieldInfo,
    /// The receiver is known to be an object
    pub safe_this: bool,
}

impl FixedMethod {
    pub fn addr(&self) -> AddrValue {
        AddrValue::FixedFunction {
            object: self.field.function_object,
            info: self.field.function_info,
        }
    }
}

impl Inliner<'_> {
    /// Resolve `call`'s target to a fixed function value
    ///
    /// On success (and unless `check_only`) the target load becomes a `CheckFixedFld`
    /// guard, the call reads the function value and a `CallI` (or an accessor access)
    /// becomes `CallIFixed`.
    pub(super) fn try_fixed_method(
        &mut self,
        job: &mut Job,
        call: InstrId,
        request: FixedRequest<'_>,
    ) -> Result<Option<FixedMethod>> {
        if !self.config.fixed_methods {
            return Ok(None);
        }
        let is_accessor = job.instr(call).is_from_accessor()
            && matches!(
                job.opcode(call),
                OpCode::LdFld | OpCode::StFld | OpCode::LdFldForCallApplyTarget
            );
        let Some(ld) = self.target_load(job, call) else {
            return Ok(None);
        };
        if !job.opcode(ld).can_load_fixed_fields() {
            return Ok(None);
        }
        let Some(property) = job
            .instr(ld)
            .src1
            .and_then(|s| s.slot())
            .and_then(|s| job.sym(s).property().cloned())
        else {
            return Ok(None);
        };

        let config = self.config;
        let allowed = if request.ctor {
            let phase = if request.inlined {
                config.fixed_ctor_inlining
            } else {
                config.fixed_ctor_calls
            };
            phase && !job.instr(ld).is_from_accessor()
        } else if request.builtin {
            if request.inlined {
                config.fixed_builtin_inlining
            } else {
                config.fixed_builtin_calls
            }
        } else if request.inlined {
            config.fixed_script_inlining
        } else {
            config.fixed_script_calls
        };
        if !allowed {
            return Ok(None);
        }
        if !property.is_obj_type_spec_candidate() && !property.is_root_non_configurable_field() {
            return Ok(None);
        }
        let Some(type_spec) = property.type_spec.clone() else {
            return Ok(None);
        };

        let field = if !request.polymorphic {
            type_spec.fixed_field(0)
        } else if request.inlined {
            type_spec.fixed_field(request.index)
        } else {
            None
        };
        let Some(field) = field.cloned() else {
            return Ok(None);
        };
        if let Some(candidate) = request.candidate {
            if field.function_info != Some(candidate.function_info) {
                return Ok(None);
            }
        }

        let safe_this = !request.builtin
            && request.inlined
            && (property.is_root_non_configurable_field()
                || field.type_id.is_some_and(|t| self.ctx.is_object_type(t)));
        let fixed = FixedMethod { field, safe_this };
        if request.check_only {
            return Ok(Some(fixed));
        }

        let func = job.instr(call).func;
        if job.opcode(ld) == OpCode::LdMethodFromFlags {
            job.clear_bailout(ld);
        }
        job.set_opcode(ld, OpCode::CheckFixedFld);
        let method_dst = job.unlink_dst(ld);
        let kind = if type_spec.has_equivalent_type_set {
            BailOutKind::FailedEquivalentFixedFieldTypeCheck
        } else {
            BailOutKind::FailedFixedFieldTypeCheck
        };
        job.convert_to_bailout(ld, kind, ld);
        job.instr_mut(ld).flags.insert(InstrFlags::USES_FIXED_VALUE);

        if request.ctor && job.opcode(call) != OpCode::NewScObjArray {
            if let Some(profile_id) = job.instr(call).profile_id {
                let cache = job.func(func).info.ctor_caches.get(&profile_id).cloned();
                if let Some(cache) = cache {
                    job.func_mut(func).ctor_caches.insert(profile_id, cache);
                }
            }
        }

        let addr = fixed.addr();
        if let Some(dst) = method_dst {
            let ld_fixed = job.create_with(OpCode::Ld, Some(dst), Some(Operand::Addr(addr)), None, func);
            job.copy_offset(ld_fixed, ld);
            job.insert_after(ld, ld_fixed)?;
            if let Some(sym) = dst.sym() {
                let s = job.sym_mut(sym);
                if s.is_single_def() {
                    s.flags.insert(SymFlags::CONST);
                    s.constant = Some(ConstValue::Addr(addr));
                }
            }
        }
        job.set_src1(call, Some(Operand::Addr(addr)));
        if job.opcode(call) == OpCode::CallI || is_accessor {
            job.set_opcode(call, OpCode::CallIFixed);
        }
        trace!(call = %call, check = %ld, function = %fixed.field.function_object, "fixed method");
        Ok(Some(fixed))
    }

    /// The instruction that loaded a call's target, looking through argument captures
    ///
    /// For an accessor access this is the `LdMethodFromFlags` the accessor simulation
    /// put in front of it.
    fn target_load(&self, job: &Job, call: InstrId) -> Option<InstrId> {
        let target = job.instr(call).src1?.reg()?;
        let mut ld = job.sym(target).single_def()?;
        let mut steps = 0;
        while job.opcode(ld) == OpCode::BytecodeArgOutCapture {
            let src = job.instr(ld).src1?.reg()?;
            ld = job.sym(src).single_def()?;
            steps += 1;
            if steps > job.syms.len() {
                return None;
            }
        }
        Some(ld)
    }

    /// Fixed-method rewrite for an inline, guarding the identity instead when it fails
    ///
    /// The replaced target is kept alive for bailout either way.
    pub(super) fn fixed_or_guard(
        &mut self,
        job: &mut Job,
        call: InstrId,
        candidate: &Arc<Candidate>,
        builtin: bool,
    ) -> Result<Option<FixedMethod>> {
        let original_target = super::operand_reg(job.instr(call).src1);
        let request = FixedRequest {
            builtin,
            ..FixedRequest::inline(candidate)
        };
        let fixed = self.try_fixed_method(job, call, request)?;
        if fixed.is_some() {
            if let Some(target) = original_target {
                super::byte_code_uses(job, call, &[target])?;
            }
        } else {
            crate::guard::prepare_insertion_point(job, self.ctx, call, candidate.function_info, call)?;
        }
        Ok(fixed)
    }
}
