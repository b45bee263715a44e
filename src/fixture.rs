//! JSON fixtures: a caller, its candidates and the IR of every script body
//!
//! A fixture stands in for the parts of the engine the inliner only consumes: the
//! profiler's candidate descriptors and the byte-code to IR builder. Functions reference
//! each other by name; the entry function becomes the job.
//!
//! ```json
//! {
//!   "entry": "f",
//!   "functions": [
//!     { "body": { "name": "f", "function_number": 1, "locals_count": 4 },
//!       "call_sites": { "0": "g" },
//!       "ir": [
//!         { "op": "ArgIn", "dst": "r0", "slot": 1 },
//!         { "op": "CallI", "dst": "r2", "src1": "r1", "args": ["r0", "#7"], "profile": 0 },
//!         { "op": "Ret", "src1": "r2" }
//!       ] },
//!     { "body": { "name": "g", "function_number": 2, "in_params_count": 2 },
//!       "ir": [
//!         { "op": "ArgIn", "dst": "r0", "slot": 2 },
//!         { "op": "Ret", "src1": "r0" }
//!       ] }
//!   ]
//! }
//! ```
//!
//! Operands are written `r<n>` (byte-code register), `#<n>` (integer constant),
//! `undefined` or `null`.

use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::context::InlineContext;
use crate::decider::ProfileDecider;
use crate::error::{Error, Result};
use crate::ir::{AddrValue, FldFlags, FuncBuilder, FuncId, InstrId, Job, OpCode, Operand, ProfileId, SymId, ValueType};
use crate::materializer::IrBuilder;
use crate::profile::{BuiltinFunction, Candidate, CtorCache, FunctionBody, FunctionInfoId, ObjTypeSpecInfo, PropertyId};

/// How often one function may appear on a candidate path before its call sites are cut
///
/// Descriptors are immutable trees, so a recursive function is unrolled to this depth.
pub const MAX_FIXTURE_UNROLL: usize = 4;

/// A complete fixture document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fixture {
    /// Name of the function being compiled
    pub entry: String,
    pub functions: Vec<FunctionSpec>,
    /// Body-less callees: built-ins and host functions
    #[serde(default)]
    pub natives: Vec<NativeSpec>,
}

/// A script function with its profile and IR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionSpec {
    pub body: FunctionBody,
    #[serde(default)]
    pub ir: Vec<InstrSpec>,
    #[serde(default)]
    pub call_sites: BTreeMap<ProfileId, SiteRef>,
    /// Accessor candidates keyed by inline-cache index
    #[serde(default)]
    pub ldfld_inlinees: BTreeMap<u32, String>,
    #[serde(default)]
    pub ctor_caches: BTreeMap<ProfileId, CtorCache>,
    /// Call it, never inline it
    #[serde(default)]
    pub not_inlined: bool,
}

/// What a profiled call site saw
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SiteRef {
    Monomorphic(String),
    Polymorphic(Vec<String>),
}

/// A built-in or host function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NativeSpec {
    pub name: String,
    #[serde(default)]
    pub builtin: Option<BuiltinFunction>,
    /// Defaults to the context's identity for `builtin`
    #[serde(default)]
    pub function_info: Option<FunctionInfoId>,
    #[serde(default)]
    pub dom_fast_path: Option<u64>,
}

/// One instruction
///
/// `args` turns the instruction into a call with its `StartCall`/`ArgOut` chain;
/// `field` into a property access.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstrSpec {
    pub op: String,
    pub dst: Option<String>,
    pub src1: Option<String>,
    pub src2: Option<String>,
    pub args: Option<Vec<String>>,
    pub profile: Option<ProfileId>,
    /// Parameter slot of an `ArgIn`; 1 is `this`
    pub slot: Option<u16>,
    pub field: Option<FieldSpec>,
    /// Label name, or the target of a branch
    pub label: Option<String>,
    pub loop_top: bool,
    pub statement: Option<u32>,
    pub value_type: Option<ValueType>,
}

/// `object.property` with its inline cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub object: String,
    pub property: u32,
    #[serde(default)]
    pub cache: Option<u32>,
    #[serde(default)]
    pub type_spec: Option<ObjTypeSpecInfo>,
    /// The profiler saw the access go through a getter or setter
    #[serde(default)]
    pub accessor: bool,
}

impl Fixture {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut fixture: Fixture = serde_json::from_str(json)?;
        fixture.normalize();
        fixture.validate()?;
        Ok(fixture)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let fixture = Self::from_json_str(&text)?;
        debug!(path = %path.display(), functions = fixture.functions.len(), "loaded fixture");
        Ok(fixture)
    }

    /// Fill in what a hand-written fixture leaves implicit
    fn normalize(&mut self) {
        for function in &mut self.functions {
            let body = &mut function.body;
            if body.function_info.0 == 0 {
                body.function_info = FunctionInfoId(body.function_number as u64);
            }
            if body.profiled_call_site_count == 0 {
                let highest = function
                    .call_sites
                    .keys()
                    .chain(function.ctor_caches.keys())
                    .copied()
                    .max();
                body.profiled_call_site_count = highest.map_or(0, |id| id.saturating_add(1));
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut names: HashSet<&str> = HashSet::default();
        let mut numbers: HashMap<u32, &str> = HashMap::default();
        for function in &self.functions {
            let name = function.body.name.as_str();
            if !names.insert(name) {
                return Err(Error::fixture(format!("function '{}' is defined twice", name)));
            }
            if let Some(other) = numbers.insert(function.body.function_number, name) {
                return Err(Error::fixture(format!(
                    "functions '{}' and '{}' share function number {}",
                    other, name, function.body.function_number
                )));
            }
        }
        for native in &self.natives {
            if !names.insert(native.name.as_str()) {
                return Err(Error::fixture(format!("'{}' is defined twice", native.name)));
            }
            if native.builtin.is_none() && native.function_info.is_none() {
                return Err(Error::fixture(format!(
                    "host function '{}' needs a function_info",
                    native.name
                )));
            }
        }
        if self.function(&self.entry).is_none() {
            return Err(Error::fixture(format!("entry function '{}' is not defined", self.entry)));
        }

        for function in &self.functions {
            let referenced = function
                .call_sites
                .values()
                .flat_map(|site| match site {
                    SiteRef::Monomorphic(name) => std::slice::from_ref(name),
                    SiteRef::Polymorphic(callees) => callees.as_slice(),
                })
                .chain(function.ldfld_inlinees.values());
            for name in referenced {
                if !names.contains(name.as_str()) {
                    return Err(Error::fixture(format!(
                        "'{}' references unknown function '{}'",
                        function.body.name, name
                    )));
                }
            }
            for instr in &function.ir {
                if OpCode::from_name(&instr.op).is_none() {
                    return Err(Error::fixture(format!(
                        "'{}' uses unknown opcode '{}'",
                        function.body.name, instr.op
                    )));
                }
            }
        }
        Ok(())
    }

    fn function(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.iter().find(|f| f.body.name == name)
    }

    fn native(&self, name: &str) -> Option<&NativeSpec> {
        self.natives.iter().find(|n| n.name == name)
    }

    /// Descriptor of the entry function, with every reachable candidate resolved
    pub fn entry_candidate(&self) -> Result<Arc<Candidate>> {
        let ctx = InlineContext::default();
        self.candidate(&self.entry, &ctx, &mut Vec::new())
    }

    fn candidate<'a>(&'a self, name: &'a str, ctx: &InlineContext, path: &mut Vec<&'a str>) -> Result<Arc<Candidate>> {
        if let Some(native) = self.native(name) {
            return native_candidate(native, ctx).map(Arc::new);
        }
        let function = self
            .function(name)
            .ok_or_else(|| Error::fixture(format!("unknown function '{}'", name)))?;
        let mut candidate = Candidate::script(Arc::new(function.body.clone()));
        if function.not_inlined {
            candidate = candidate.not_inlined();
        }
        for (profile_id, cache) in &function.ctor_caches {
            candidate = candidate.with_ctor_cache(*profile_id, cache.clone());
        }
        if path.iter().filter(|seen| **seen == name).count() >= MAX_FIXTURE_UNROLL {
            return Ok(Arc::new(candidate));
        }

        path.push(name);
        for (profile_id, site) in &function.call_sites {
            let resolved = match site {
                SiteRef::Monomorphic(callee) => self.candidate(callee, ctx, path)?,
                SiteRef::Polymorphic(callees) => {
                    let mut arms = Vec::with_capacity(callees.len());
                    for callee in callees {
                        arms.push(Candidate::clone(&*self.candidate(callee, ctx, path)?));
                    }
                    Candidate::polymorphic(arms)
                        .ok_or_else(|| Error::fixture(format!("empty polymorphic site in '{}'", name)))?
                }
            };
            candidate = candidate.with_call_site(*profile_id, resolved);
        }
        for (cache_index, accessor) in &function.ldfld_inlinees {
            let resolved = self.candidate(accessor, ctx, path)?;
            candidate = candidate.with_ldfld_inlinee(*cache_index, resolved);
        }
        path.pop();
        Ok(Arc::new(candidate))
    }

    /// A job for the entry function, its IR already built
    pub fn build_job(&self) -> Result<Job> {
        let mut job = Job::new(self.entry_candidate()?)?;
        let top = job.top();
        self.ir_builder().build(&mut job, top)?;
        Ok(job)
    }

    pub fn decider(&self) -> ProfileDecider {
        ProfileDecider::default()
    }

    pub fn ir_builder(&self) -> FixtureIrBuilder<'_> {
        FixtureIrBuilder { fixture: self }
    }
}

fn native_candidate(native: &NativeSpec, ctx: &InlineContext) -> Result<Candidate> {
    let mut candidate = match native.builtin {
        Some(builtin) => {
            let info = native
                .function_info
                .or_else(|| ctx.function_info_of(builtin))
                .ok_or_else(|| Error::fixture(format!("no identity known for built-in {}", builtin.name())))?;
            Candidate::builtin(builtin, info)
        }
        None => {
            let info = native
                .function_info
                .ok_or_else(|| Error::fixture(format!("host function '{}' needs a function_info", native.name)))?;
            Candidate::host(native.name.clone(), info)
        }
    };
    candidate.name = native.name.clone();
    if let Some(helper) = native.dom_fast_path {
        candidate = candidate.with_dom_fast_path(helper);
    }
    Ok(candidate)
}

/// Builds IR from the instruction lists of a [`Fixture`], by function number
#[derive(Debug, Clone, Copy)]
pub struct FixtureIrBuilder<'a> {
    fixture: &'a Fixture,
}

impl IrBuilder for FixtureIrBuilder<'_> {
    fn build(&self, job: &mut Job, func: FuncId) -> Result<()> {
        let number = job.func(func).body.function_number;
        let function = self
            .fixture
            .functions
            .iter()
            .find(|f| f.body.function_number == number)
            .ok_or(Error::UnknownFunction(number))?;
        let mut b = FuncBuilder::new(job, func);
        let mut labels: HashMap<&str, InstrId> = HashMap::default();
        for spec in &function.ir {
            if spec.op == "Label" {
                let name = spec
                    .label
                    .as_deref()
                    .ok_or_else(|| Error::fixture(format!("unnamed label in '{}'", function.body.name)))?;
                let label = b.job().new_label(func, false);
                if labels.insert(name, label).is_some() {
                    return Err(Error::fixture(format!("label '{}' placed twice", name)));
                }
            }
        }
        for spec in &function.ir {
            emit(&mut b, spec, &labels)
                .map_err(|e| match e {
                    Error::FixtureError(message) => {
                        Error::fixture(format!("{} in '{}' ({})", message, function.body.name, spec.op))
                    }
                    other => other,
                })?;
        }
        Ok(())
    }
}

fn emit(b: &mut FuncBuilder<'_>, spec: &InstrSpec, labels: &HashMap<&str, InstrId>) -> Result<()> {
    let op = OpCode::from_name(&spec.op).ok_or_else(|| Error::fixture(format!("unknown opcode '{}'", spec.op)))?;
    let dst = spec.dst.as_deref().map(|d| register(b, d)).transpose()?;

    let id = if op == OpCode::Label {
        let label = label_of(spec, labels)?;
        b.place(label)?;
        if spec.loop_top {
            if let Some(info) = b.job().instr_mut(label).label.as_mut() {
                info.is_loop_top = true;
            }
        }
        label
    } else if op.is_branch() {
        let target = label_of(spec, labels)?;
        let cond = spec.src1.as_deref().map(|s| register(b, s)).transpose()?;
        b.br(op, target, cond)?
    } else if op == OpCode::StatementBoundary {
        b.statement(spec.statement.unwrap_or(0))?
    } else if let Some(args) = &spec.args {
        let target = spec
            .src1
            .as_deref()
            .map(|s| register(b, s))
            .transpose()?
            .ok_or_else(|| Error::fixture("call without a target"))?;
        let args = args.iter().map(|a| operand(b, a)).collect::<Result<Vec<_>>>()?;
        if op == OpCode::NewScObject {
            let dst = dst.ok_or_else(|| Error::fixture("constructor call without a destination"))?;
            b.new_object(dst, target, &args, spec.profile)?
        } else {
            b.call(op, dst, target, &args, spec.profile)?
        }
    } else if let Some(field) = &spec.field {
        emit_field(b, op, dst, spec, field)?
    } else if op == OpCode::ArgIn {
        let dst = dst.ok_or_else(|| Error::fixture("ArgIn without a destination"))?;
        b.arg_in(dst, spec.slot.unwrap_or(1))?
    } else {
        let src1 = spec.src1.as_deref().map(|s| operand(b, s)).transpose()?;
        let src2 = spec.src2.as_deref().map(|s| operand(b, s)).transpose()?;
        match (op, dst, src1) {
            (OpCode::LdConstI4, Some(dst), Some(Operand::IntConst(value))) => {
                let value = i32::try_from(value).map_err(|_| Error::fixture("constant does not fit 32 bits"))?;
                b.ld_const(dst, value)?
            }
            (OpCode::Ld, Some(dst), Some(Operand::Addr(addr))) => b.ld_addr(dst, addr)?,
            _ => b.emit(op, dst.map(Operand::Reg), src1, src2)?,
        }
    };

    if let Some(profile_id) = spec.profile {
        b.job().instr_mut(id).profile_id = Some(profile_id);
    }
    if let (Some(dst), Some(value_type)) = (dst, spec.value_type) {
        b.job().sym_mut(dst).value_type = value_type;
    }
    Ok(())
}

fn emit_field(
    b: &mut FuncBuilder<'_>,
    op: OpCode,
    dst: Option<SymId>,
    spec: &InstrSpec,
    field: &FieldSpec,
) -> Result<InstrId> {
    let object = register(b, &field.object)?;
    let property = PropertyId(field.property);
    let value = if op == OpCode::StFld {
        Some(
            spec.src1
                .as_deref()
                .map(|s| register(b, s))
                .transpose()?
                .ok_or_else(|| Error::fixture("store without a value"))?,
        )
    } else {
        None
    };

    if field.accessor {
        let cache = field
            .cache
            .ok_or_else(|| Error::fixture("accessor access without an inline cache"))?;
        let flags = if op == OpCode::StFld {
            FldFlags::FROM_SETTER
        } else {
            FldFlags::FROM_GETTER
        };
        return b.accessor_fld(op, dst, value, object, property, cache, flags);
    }
    let type_spec = field.type_spec.clone().map(Arc::new);
    if op == OpCode::StFld {
        let slot = b.property(object, property, field.cache, type_spec);
        return b.emit(op, Some(Operand::Sym(slot)), value.map(Operand::Reg), None);
    }
    let dst = dst.ok_or_else(|| Error::fixture("field load without a destination"))?;
    b.ld_fld(op, dst, object, property, field.cache, type_spec)
}

fn label_of(spec: &InstrSpec, labels: &HashMap<&str, InstrId>) -> Result<InstrId> {
    let name = spec
        .label
        .as_deref()
        .ok_or_else(|| Error::fixture("missing label"))?;
    labels
        .get(name)
        .copied()
        .ok_or_else(|| Error::fixture(format!("unknown label '{}'", name)))
}

fn register(b: &mut FuncBuilder<'_>, text: &str) -> Result<SymId> {
    match operand(b, text)? {
        Operand::Reg(sym) => Ok(sym),
        _ => Err(Error::fixture(format!("expected a register, found '{}'", text))),
    }
}

fn operand(b: &mut FuncBuilder<'_>, text: &str) -> Result<Operand> {
    let text = text.trim();
    match text {
        "undefined" => return Ok(Operand::Addr(AddrValue::Undefined)),
        "null" => return Ok(Operand::Addr(AddrValue::Null)),
        _ => {}
    }
    if let Some(reg) = text.strip_prefix('r') {
        let reg = reg
            .parse::<u32>()
            .map_err(|_| Error::fixture(format!("bad register '{}'", text)))?;
        return Ok(Operand::Reg(b.reg(reg)));
    }
    if let Some(value) = text.strip_prefix('#') {
        let value = value
            .parse::<i64>()
            .map_err(|_| Error::fixture(format!("bad constant '{}'", text)))?;
        return Ok(Operand::IntConst(value));
    }
    Err(Error::fixture(format!("unrecognized operand '{}'", text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const IDENTITY: &str = r##"{
        "entry": "f",
        "functions": [
            { "body": { "name": "f", "function_number": 1, "locals_count": 4 },
              "call_sites": { "0": "g" },
              "ir": [
                { "op": "ArgIn", "dst": "r0", "slot": 1 },
                { "op": "CallI", "dst": "r2", "src1": "r1", "args": ["r0", "#7"], "profile": 0 },
                { "op": "Ret", "src1": "r2" }
              ] },
            { "body": { "name": "g", "function_number": 2, "in_params_count": 2 },
              "ir": [
                { "op": "ArgIn", "dst": "r0", "slot": 2 },
                { "op": "Ret", "src1": "r0" }
              ] }
        ]
    }"##;

    #[test]
    fn test_build_entry_job() {
        let fixture = Fixture::from_json_str(IDENTITY).unwrap();
        let job = fixture.build_job().unwrap();
        assert_eq!(
            job.opcodes(job.top()),
            vec![
                OpCode::ArgIn,
                OpCode::StartCall,
                OpCode::ArgOut,
                OpCode::ArgOut,
                OpCode::CallI,
                OpCode::Ret,
            ]
        );
        let info = &job.top_func().info;
        assert_eq!(info.function_info, FunctionInfoId(1));
        assert_eq!(job.top_func().body.profiled_call_site_count, 1);
        assert_eq!(info.call_sites.get(&0).map(|c| c.name.as_str()), Some("g"));
    }

    #[test]
    fn test_recursive_candidates_are_unrolled() {
        let json = r#"{
            "entry": "f",
            "functions": [
                { "body": { "name": "f", "function_number": 1 }, "call_sites": { "0": "f" } }
            ]
        }"#;
        let fixture = Fixture::from_json_str(json).unwrap();
        let mut depth = 0;
        let mut current = fixture.entry_candidate().unwrap();
        while let Some(next) = current.call_sites.get(&0).cloned() {
            depth += 1;
            current = next;
        }
        assert_eq!(depth, MAX_FIXTURE_UNROLL);
    }

    #[test]
    fn test_polymorphic_site_and_natives() {
        let json = r#"{
            "entry": "f",
            "functions": [
                { "body": { "name": "f", "function_number": 1 },
                  "call_sites": { "0": ["a", "b"], "1": "abs" } },
                { "body": { "name": "a", "function_number": 2 } },
                { "body": { "name": "b", "function_number": 3 } }
            ],
            "natives": [ { "name": "abs", "builtin": "math_abs" } ]
        }"#;
        let fixture = Fixture::from_json_str(json).unwrap();
        let f = fixture.entry_candidate().unwrap();
        let site = f.call_sites.get(&0).unwrap();
        let names: Vec<_> = site.chain().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(f.call_sites.get(&1).unwrap().builtin, Some(BuiltinFunction::MathAbs));
        assert_eq!(f.body.as_ref().unwrap().profiled_call_site_count, 2);
    }

    #[test]
    fn test_unknown_reference_is_rejected() {
        let json = r#"{
            "entry": "f",
            "functions": [ { "body": { "name": "f", "function_number": 1 }, "call_sites": { "0": "g" } } ]
        }"#;
        let err = Fixture::from_json_str(json).unwrap_err();
        assert!(matches!(err, Error::FixtureError(ref m) if m.contains("unknown function 'g'")));
    }

    #[test]
    fn test_unknown_opcode_is_rejected() {
        let json = r#"{
            "entry": "f",
            "functions": [ { "body": { "name": "f", "function_number": 1 }, "ir": [ { "op": "Teleport" } ] } ]
        }"#;
        assert!(matches!(Fixture::from_json_str(json), Err(Error::FixtureError(_))));
    }

    #[test]
    fn test_labels_and_fields() {
        let json = r#"{
            "entry": "f",
            "functions": [
                { "body": { "name": "f", "function_number": 1, "locals_count": 4 },
                  "ir": [
                    { "op": "Label", "label": "top", "loop_top": true },
                    { "op": "LdFld", "dst": "r1", "field": { "object": "r0", "property": 9, "cache": 2, "accessor": true } },
                    { "op": "BrTrue", "label": "top", "src1": "r1" },
                    { "op": "Ret", "src1": "undefined" }
                  ] }
            ]
        }"#;
        let fixture = Fixture::from_json_str(json).unwrap();
        let job = fixture.build_job().unwrap();
        let instrs = job.func_instrs(job.top());
        let label = job.instr(instrs[0]).label_info().unwrap();
        assert!(label.is_loop_top);
        assert_eq!(label.refs, vec![instrs[2]]);
        assert!(job.instr(instrs[1]).is_from_accessor());
    }
}
