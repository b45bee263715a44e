//! Spread calls with a single spread argument
//!
//! `f(...arr)` arrives as a `CallIExtended` whose link operand is a `LdSpreadIndices`
//! describing which arguments are spread. With exactly one spread argument after `this`
//! the indices are dropped and the call becomes a `CallIDynamicSpread`, guarded by a
//! check that the array is still spreadable without side effects.

use tracing::trace;

use super::{DeclineReason, Inliner, Outcome, Unit};
use crate::error::{messages, Error, Result};
use crate::guard::{self, GuardKind};
use crate::ir::{BailOutKind, InstrId, Job, OpCode};

impl Inliner<'_> {
    pub(super) fn inline_spread(&mut self, job: &mut Job, unit: &mut Unit, call: InstrId, _next: InstrId) -> Result<Outcome> {
        if !self.config.inline_spread
            || job.func(unit.func).body.inline_spread_disabled
            || job.top_func().body.inline_spread_disabled
        {
            return Ok(Outcome::Declined(DeclineReason::Disabled));
        }

        let func = job.instr(call).func;
        let indices = job
            .instr(call)
            .src2
            .and_then(|link| job.def_of(link))
            .filter(|def| job.opcode(*def) == OpCode::LdSpreadIndices)
            .ok_or_else(|| Error::shape(func, call, messages::expected("LdSpreadIndices link", job.instr(call).src2)))?;
        let link = job
            .instr(indices)
            .src2
            .ok_or_else(|| Error::arg_chain(func, indices, messages::MISSING_LINK))?;
        let slot = link
            .slot()
            .and_then(|sym| job.sym(sym).arg_slot)
            .ok_or_else(|| Error::arg_chain(func, indices, messages::NOT_ARG_SLOT))?;
        // `this` plus one spread argument
        if slot != 2 {
            return Ok(Outcome::Declined(DeclineReason::UnsupportedShape));
        }

        let array_arg = job
            .def_of(link)
            .ok_or_else(|| Error::arg_chain(func, indices, messages::NOT_SINGLE_DEF))?;
        let Some(array) = job.instr(array_arg).src1.and_then(|o| o.reg()) else {
            return Ok(Outcome::Declined(DeclineReason::UnsupportedShape));
        };
        let this_arg = job
            .instr(array_arg)
            .src2
            .and_then(|l| job.def_of(l))
            .ok_or_else(|| Error::arg_chain(func, array_arg, messages::MISSING_START_CALL))?;
        let start_call = job
            .instr(this_arg)
            .src2
            .and_then(|l| job.def_of(l))
            .filter(|def| job.opcode(*def) == OpCode::StartCall)
            .ok_or_else(|| Error::arg_chain(func, this_arg, messages::MISSING_START_CALL))?;

        // Committed
        job.set_src2(call, Some(link));
        job.remove(indices)?;

        job.set_opcode(array_arg, OpCode::ArgOutSpreadArg);
        let bailout = job.new_bailout(BailOutKind::OnNotSpreadable, array_arg);
        guard::emit_guard(job, self.ctx, GuardKind::Spreadable { source: array }, array_arg, bailout)?;

        job.set_opcode(this_arg, OpCode::ArgOutDynamic);
        job.set_opcode(call, OpCode::CallIDynamicSpread);
        self.stats.spreads += 1;
        trace!(instr = %call, %start_call, "spread call made dynamic");
        Ok(Outcome::Inlined)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::InlinerConfig;
    use crate::context::InlineContext;
    use crate::decider::ProfileDecider;
    use crate::inliner::{inline_job, DeclineReason, InlineStats};
    use crate::ir::{FuncBuilder, Job, OpCode, Operand};
    use crate::materializer::FnIrBuilder;
    use crate::profile::{Candidate, FunctionBody};

    fn body(name: &str, number: u32) -> Arc<FunctionBody> {
        Arc::new(FunctionBody {
            locals_count: 8,
            profiled_call_site_count: 1,
            ..FunctionBody::new(name, number, 1)
        })
    }

    /// `r = g(...arr)` followed by `spread_args - 1` more spread arguments
    fn spread_job(spread_args: u16, caller_disabled: bool) -> Job {
        let g = Arc::new(Candidate::script(body("g", 2)));
        let caller_body = Arc::new(FunctionBody {
            inline_spread_disabled: caller_disabled,
            ..(*body("f", 1)).clone()
        });
        let f = Candidate::script(caller_body).with_call_site(0, g);
        let mut job = Job::new(Arc::new(f)).unwrap();
        let top = job.top();
        {
            let mut b = FuncBuilder::new(&mut job, top);
            let (this, target, arr, r, start) = (b.reg(0), b.reg(1), b.reg(2), b.reg(3), b.temp());
            b.emit(
                OpCode::StartCall,
                Some(Operand::Reg(start)),
                Some(Operand::IntConst(spread_args as i64 + 1)),
                None,
            )
            .unwrap();
            let mut link = Operand::Reg(start);
            let mut values = vec![Operand::Reg(this)];
            values.extend((0..spread_args).map(|_| Operand::Reg(arr)));
            for (i, value) in values.into_iter().enumerate() {
                let slot = b.job().new_arg_slot(top, i as u16 + 1);
                b.emit(OpCode::ArgOut, Some(Operand::Sym(slot)), Some(value), Some(link))
                    .unwrap();
                link = Operand::Sym(slot);
            }
            let indices = b.job().new_arg_slot(top, spread_args + 2);
            b.emit(
                OpCode::LdSpreadIndices,
                Some(Operand::Sym(indices)),
                Some(Operand::IntConst(1)),
                Some(link),
            )
            .unwrap();
            let call = b
                .emit(
                    OpCode::CallIExtended,
                    Some(Operand::Reg(r)),
                    Some(Operand::Reg(target)),
                    Some(Operand::Sym(indices)),
                )
                .unwrap();
            b.job().instr_mut(call).profile_id = Some(0);
            b.ret(Operand::Reg(r)).unwrap();
        }
        job
    }

    fn run(job: &mut Job, config: &InlinerConfig) -> InlineStats {
        let builder = FnIrBuilder::new();
        inline_job(job, &InlineContext::default(), config, &ProfileDecider::default(), &builder).unwrap()
    }

    #[test]
    fn test_single_spread_becomes_dynamic_call() {
        let mut job = spread_job(1, false);
        let stats = run(&mut job, &InlinerConfig::default());
        assert_eq!(stats.spreads, 1);
        let top = job.top();
        assert_eq!(
            job.opcodes(top),
            vec![
                OpCode::StartCall,
                OpCode::ArgOutDynamic,
                OpCode::BailOnNotSpreadable,
                OpCode::ArgOutSpreadArg,
                OpCode::CallIDynamicSpread,
                OpCode::Ret,
            ]
        );
        let guard = job.func_instrs(top)[2];
        assert_eq!(job.bailout_of(guard).map(|b| b.kind), Some(crate::ir::BailOutKind::OnNotSpreadable));
    }

    #[test]
    fn test_two_spread_arguments_decline() {
        let mut job = spread_job(2, false);
        let top = job.top();
        let before = job.opcodes(top);
        let stats = run(&mut job, &InlinerConfig::default());
        assert_eq!(job.opcodes(top), before);
        assert_eq!(stats.declined_for(DeclineReason::UnsupportedShape), 1);
    }

    #[test]
    fn test_spread_disabled_by_caller_profile() {
        let mut job = spread_job(1, true);
        let stats = run(&mut job, &InlinerConfig::default());
        assert_eq!(stats.spreads, 0);
        assert_eq!(stats.declined_for(DeclineReason::Disabled), 1);
        assert!(job.opcodes(job.top()).contains(&OpCode::LdSpreadIndices));
    }
}
