//! Constructor call splitting
//!
//! `dst = new C(args)` with a known constructor becomes an explicit allocation followed
//! by an ordinary call that receives the new object as `this`:
//!
//! ```text
//! obj = NewScObjectNoCtor C
//! ArgOut [1] = obj
//! dst = CallI(Fixed) C, ...
//! dst = GetNewScObject dst, obj
//! ```

use tracing::trace;

use super::Inliner;
use crate::error::{messages, Error, Result};
use crate::ir::{AddrValue, InstrFlags, InstrId, Job, OpCode, Operand, ValueType};

impl Inliner<'_> {
    /// Split a constructor call into allocation and call
    ///
    /// Returns the allocation instruction, if one was emitted. A cached constructor that
    /// skips the default allocation and is the built-in `Object` or `Array` constructor
    /// called without arguments is left alone.
    pub(super) fn split_constructor_call(
        &mut self,
        job: &mut Job,
        call: InstrId,
        fixed: bool,
    ) -> Result<Option<InstrId>> {
        let func = job.instr(call).func;
        let profile_id = job.instr(call).profile_id;
        let cache = profile_id.and_then(|pid| job.func(func).ctor_caches.get(&pid).cloned());
        let (return_created, skip_new_object) = cache
            .as_ref()
            .map(|c| (c.ctor_has_no_explicit_return_value, c.skip_default_new_object))
            .unwrap_or((false, false));

        if skip_new_object {
            let fixed_info = match job.instr(call).src1 {
                Some(Operand::Addr(AddrValue::FixedFunction { info, .. })) => info,
                _ => None,
            };
            let builtin_ctor = fixed_info
                .is_some_and(|info| info == self.ctx.object_ctor || info == self.ctx.array_ctor);
            let no_args = !matches!(job.instr(call).src2, Some(Operand::Sym(_)));
            if builtin_ctor && no_args {
                return Ok(None);
            }
        }

        let target = job.instr(call).src1;
        let create_obj = if skip_new_object {
            None
        } else {
            let obj = job.new_reg(func);
            let create = job.create_with(OpCode::NewScObjectNoCtor, Some(Operand::Reg(obj)), target, None, func);
            job.copy_offset(create, call);
            job.instr_mut(create).profile_id = profile_id;
            job.insert_before(call, create)?;
            job.sym_mut(obj).value_type = ValueType::Object;
            Some((create, obj))
        };

        let this_ptr = match create_obj {
            Some((_, obj)) => Operand::Reg(obj),
            None => Operand::Addr(AddrValue::Null),
        };
        let link = job.instr(call).src2;
        let slot = job.new_arg_slot(func, 1);
        let this_arg = job.create_with(OpCode::ArgOut, Some(Operand::Sym(slot)), Some(this_ptr), link, func);
        job.copy_offset(this_arg, call);
        job.insert_before(call, this_arg)?;

        job.set_opcode(call, if fixed { OpCode::CallIFixed } else { OpCode::CallI });
        job.instr_mut(call).flags.insert(InstrFlags::IS_CTOR_CALL);
        job.set_src2(call, Some(Operand::Sym(slot)));

        let dst = job.instr(call).dst();
        let mut anchor = call;
        if return_created {
            if let (Some(dst), Some((_, obj))) = (dst, create_obj) {
                let ld = job.create_with(OpCode::Ld, Some(dst), Some(Operand::Reg(obj)), None, func);
                job.copy_offset(ld, call);
                job.insert_after(anchor, ld)?;
                anchor = ld;
            }
        } else if let (Some(dst), Some((_, obj))) = (dst, create_obj) {
            let dst_sym = dst
                .sym()
                .ok_or_else(|| Error::shape(func, call, messages::expected("register destination", dst)))?;
            job.sym_mut(dst_sym).value_type = ValueType::Unknown;
            let get = job.create_with(
                OpCode::GetNewScObject,
                Some(dst),
                Some(dst),
                Some(Operand::Reg(obj)),
                func,
            );
            job.copy_offset(get, call);
            job.insert_after(anchor, get)?;
            anchor = get;
        }
        if cache.is_none() {
            let update = job.create_with(OpCode::UpdateNewScObjectCache, None, target, dst, func);
            job.copy_offset(update, call);
            job.insert_after(anchor, update)?;
        }

        self.stats.ctor_splits += 1;
        trace!(call = %call, allocates = create_obj.is_some(), "split constructor call");
        Ok(create_obj.map(|(create, _)| create))
    }
}
