//! Human-readable IR listings

use std::fmt::{self, Write};

use super::{FuncId, InstrId, Job, OpCode};

/// Displays a unit's instruction list, one instruction per line
pub struct FuncDump<'a> {
    job: &'a Job,
    func: FuncId,
}

impl<'a> FuncDump<'a> {
    pub fn new(job: &'a Job, func: FuncId) -> Self {
        Self { job, func }
    }
}

/// Format one instruction
pub fn format_instr(job: &Job, id: InstrId) -> String {
    let instr = job.instr(id);
    let mut line = String::new();

    if instr.opcode == OpCode::Label {
        let _ = write!(line, "L{}:", id.raw());
        if let Some(info) = instr.label_info() {
            if info.is_loop_top {
                line.push_str(" (loop top)");
            }
            if info.is_helper {
                line.push_str(" (helper)");
            }
        }
        return line;
    }

    if let Some(dst) = instr.dst() {
        let _ = write!(line, "{} = ", dst);
    }
    line.push_str(instr.opcode.name());

    let srcs: Vec<String> = [instr.src1, instr.src2]
        .iter()
        .flatten()
        .map(|s| s.to_string())
        .collect();
    if !srcs.is_empty() {
        let _ = write!(line, " {}", srcs.join(", "));
    }
    if let Some(target) = instr.branch_target() {
        let _ = write!(line, " => L{}", target.raw());
    }
    if !instr.uses.is_empty() {
        let uses: Vec<String> = instr.uses.iter().map(|s| s.to_string()).collect();
        let _ = write!(line, " uses({})", uses.join(", "));
    }
    if let Some(pid) = instr.profile_id {
        let _ = write!(line, " #{}", pid);
    }
    if let Some(record) = job.bailout_of(id) {
        let _ = write!(line, " !{}", record.kind);
    }
    if let Some(index) = instr.statement_index {
        let _ = write!(line, " stmt {}", index);
    }
    line
}

impl fmt::Display for FuncDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let top = self.func;
        writeln!(f, "function {} ({})", self.job.func(top).name(), top)?;
        for id in self.job.func_instrs(top) {
            let owner = self.job.instr(id).func;
            let indent = if owner == top { "  " } else { "    " };
            writeln!(f, "{}{:>5}  {}", indent, id.to_string(), format_instr(self.job, id))?;
        }
        Ok(())
    }
}

/// Render a unit's list as text
pub fn dump_func(job: &Job, func: FuncId) -> String {
    FuncDump::new(job, func).to_string()
}
