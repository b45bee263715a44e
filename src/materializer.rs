//! Callee materialization
//!
//! Producing IR from byte code is an external collaborator ([`IrBuilder`]); the
//! [`CalleeMaterializer`] wraps it with the bookkeeping an inlinee needs: a fresh unit
//! under the caller, a private register range in the job's symbol table, and a
//! well-formedness check of the list the builder produced.

use rustc_hash::FxHashMap as HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ir::{FuncBuilder, FuncFlags, FuncId, Job};
use crate::profile::Candidate;

/// Byte code to IR builder
pub trait IrBuilder {
    /// Append the IR of `job.func(func).body` to the (empty) unit `func`
    fn build(&self, job: &mut Job, func: FuncId) -> Result<()>;
}

/// Body generator registered with a [`FnIrBuilder`]
pub type BodyFn = dyn Fn(&mut FuncBuilder<'_>) -> Result<()> + Send + Sync;

/// An [`IrBuilder`] backed by closures keyed by function number
#[derive(Default, Clone)]
pub struct FnIrBuilder {
    bodies: HashMap<u32, Arc<BodyFn>>,
}

impl FnIrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, function_number: u32, body: F)
    where
        F: Fn(&mut FuncBuilder<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.bodies.insert(function_number, Arc::new(body));
    }

    pub fn with<F>(mut self, function_number: u32, body: F) -> Self
    where
        F: Fn(&mut FuncBuilder<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.register(function_number, body);
        self
    }

    pub fn contains(&self, function_number: u32) -> bool {
        self.bodies.contains_key(&function_number)
    }
}

impl fmt::Debug for FnIrBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut numbers: Vec<_> = self.bodies.keys().copied().collect();
        numbers.sort_unstable();
        f.debug_struct("FnIrBuilder").field("bodies", &numbers).finish()
    }
}

impl IrBuilder for FnIrBuilder {
    fn build(&self, job: &mut Job, func: FuncId) -> Result<()> {
        let number = job.func(func).body.function_number;
        let body = self
            .bodies
            .get(&number)
            .cloned()
            .ok_or(Error::UnknownFunction(number))?;
        let mut builder = FuncBuilder::new(job, func);
        body(&mut builder)
    }
}

/// Creates and fills inlinee units
#[derive(Clone, Copy)]
pub struct CalleeMaterializer<'a> {
    builder: &'a dyn IrBuilder,
}

impl<'a> CalleeMaterializer<'a> {
    pub fn new(builder: &'a dyn IrBuilder) -> Self {
        Self { builder }
    }

    /// An empty unit for `candidate` nested under `parent`
    pub fn new_inlinee(
        &self,
        job: &mut Job,
        parent: FuncId,
        candidate: &Arc<Candidate>,
        flags: FuncFlags,
    ) -> Result<FuncId> {
        let body = candidate
            .body
            .clone()
            .ok_or(Error::UnknownFunction(candidate.function_info.0 as u32))?;
        let inlinee = job.new_inlinee_func(parent, candidate.clone(), body);
        job.func_mut(inlinee).flags.insert(flags);
        Ok(inlinee)
    }

    /// Build the inlinee's IR with its registers renumbered away from the caller's
    pub fn build(&self, job: &mut Job, inlinee: FuncId) -> Result<()> {
        let locals = job.func(inlinee).body.locals_count;
        let saved = job.syms.set_starting_reg(locals);
        let built = self.builder.build(job, inlinee);
        job.syms.clear_starting_reg(saved);
        built?;
        job.validate_list(inlinee)
    }
}

impl fmt::Debug for CalleeMaterializer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalleeMaterializer").finish_non_exhaustive()
    }
}
