//! Shared helpers for integration tests: build a scenario, run the inliner, inspect opcodes

#![allow(dead_code)]

use quicksilver_inliner::decider::InliningDecider;
use quicksilver_inliner::fixture::{Fixture, FunctionSpec, InstrSpec, NativeSpec, SiteRef};
use quicksilver_inliner::ir::dump::dump_func;
use quicksilver_inliner::ir::{Job, OpCode};
use quicksilver_inliner::profile::FunctionBody;
use quicksilver_inliner::{inline_job, InlineContext, InlineStats, InlinerConfig};

/// A fixture plus the configuration to inline it with
pub struct Scenario {
    pub fixture: Fixture,
    pub config: InlinerConfig,
}

/// The job after inlining, and what the inliner reported
pub struct Run {
    pub job: Job,
    pub stats: InlineStats,
}

impl Scenario {
    pub fn new(entry: &str) -> Self {
        Self {
            fixture: Fixture {
                entry: entry.to_string(),
                functions: Vec::new(),
                natives: Vec::new(),
            },
            config: InlinerConfig::default(),
        }
    }

    pub fn from_json(json: &str) -> Self {
        Self {
            fixture: Fixture::from_json_str(json).expect("valid fixture"),
            config: InlinerConfig::default(),
        }
    }

    pub fn function(mut self, function: FunctionSpec) -> Self {
        self.fixture.functions.push(function);
        self
    }

    pub fn native(mut self, native: NativeSpec) -> Self {
        self.fixture.natives.push(native);
        self
    }

    pub fn config(mut self, config: InlinerConfig) -> Self {
        self.config = config;
        self
    }

    /// The entry function before any inlining
    pub fn job(&self) -> Job {
        self.fixture.build_job().expect("entry builds")
    }

    pub fn run(&self) -> Run {
        self.run_with(&self.fixture.decider())
    }

    pub fn run_with(&self, decider: &dyn InliningDecider) -> Run {
        let mut job = self.job();
        let stats = inline_job(
            &mut job,
            &InlineContext::default(),
            &self.config,
            decider,
            &self.fixture.ir_builder(),
        )
        .expect("inlining succeeds");
        Run { job, stats }
    }
}

impl Run {
    pub fn ops(&self) -> Vec<OpCode> {
        self.job.opcodes(self.job.top())
    }

    pub fn count(&self, op: OpCode) -> usize {
        self.ops().iter().filter(|o| **o == op).count()
    }

    pub fn position(&self, op: OpCode) -> Option<usize> {
        self.ops().iter().position(|o| *o == op)
    }

    pub fn last_position(&self, op: OpCode) -> Option<usize> {
        self.ops().iter().rposition(|o| *o == op)
    }

    pub fn dump(&self) -> String {
        dump_func(&self.job, self.job.top())
    }
}

/// A script function; call sites and IR are added with the helpers below
pub fn script(name: &str, number: u32, params: u16, ir: Vec<InstrSpec>) -> FunctionSpec {
    FunctionSpec {
        body: FunctionBody {
            locals_count: 8,
            ..FunctionBody::new(name, number, params)
        },
        ir,
        call_sites: Default::default(),
        ldfld_inlinees: Default::default(),
        ctor_caches: Default::default(),
        not_inlined: false,
    }
}

pub fn with_site(mut function: FunctionSpec, profile_id: u16, callee: &str) -> FunctionSpec {
    function
        .call_sites
        .insert(profile_id, SiteRef::Monomorphic(callee.to_string()));
    function.body.profiled_call_site_count = function.body.profiled_call_site_count.max(profile_id + 1);
    function
}

pub fn with_polymorphic_site(mut function: FunctionSpec, profile_id: u16, callees: &[&str]) -> FunctionSpec {
    function.call_sites.insert(
        profile_id,
        SiteRef::Polymorphic(callees.iter().map(|c| c.to_string()).collect()),
    );
    function.body.profiled_call_site_count = function.body.profiled_call_site_count.max(profile_id + 1);
    function
}

pub fn op(name: &str) -> InstrSpec {
    InstrSpec {
        op: name.to_string(),
        ..Default::default()
    }
}

pub fn arg_in(dst: &str, slot: u16) -> InstrSpec {
    InstrSpec {
        dst: Some(dst.to_string()),
        slot: Some(slot),
        ..op("ArgIn")
    }
}

pub fn ld_const(dst: &str, value: i32) -> InstrSpec {
    InstrSpec {
        dst: Some(dst.to_string()),
        src1: Some(format!("#{}", value)),
        ..op("LdConstI4")
    }
}

pub fn binary(name: &str, dst: &str, left: &str, right: &str) -> InstrSpec {
    InstrSpec {
        dst: Some(dst.to_string()),
        src1: Some(left.to_string()),
        src2: Some(right.to_string()),
        ..op(name)
    }
}

pub fn call(dst: Option<&str>, target: &str, args: &[&str], profile: Option<u16>) -> InstrSpec {
    InstrSpec {
        dst: dst.map(str::to_string),
        src1: Some(target.to_string()),
        args: Some(args.iter().map(|a| a.to_string()).collect()),
        profile,
        ..op("CallI")
    }
}

pub fn ret(value: &str) -> InstrSpec {
    InstrSpec {
        src1: Some(value.to_string()),
        ..op("Ret")
    }
}
