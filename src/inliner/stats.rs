//! Per-job inlining statistics

use rustc_hash::FxHashMap as HashMap;
use std::fmt;

/// Why a call site was left as a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeclineReason {
    /// The phase handling this call shape is switched off
    Disabled,
    /// The candidate was compiled without profile data
    NoProfileInfo,
    /// The inlining decider said no
    Decider,
    /// The same function is already inlined too deeply on the inline stack
    RecursionLimit,
    /// More arguments than an inlinee frame can describe
    TooManyArguments,
    /// Argument count does not fit the built-in's arity
    ArityMismatch,
    /// The built-in needs a type specialization that is switched off
    TypeSpecDisabled,
    /// The built-in's result is needed but the call discards it
    MissingDestination,
    ConstructorNotInlinable,
    /// Too few or too many arms with a body at a polymorphic site
    PolymorphicArmCount,
    /// Nothing to splice: the candidate has no body and no fast path
    NoBody,
    /// A loop body cannot set up an arguments object for its inlinees
    ArgumentsObjectInLoopBody,
    /// The call or its arguments have a shape no transformer handles
    UnsupportedShape,
    /// Nested apply/call target inlining
    InApplyTargetInline,
}

impl DeclineReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DeclineReason::Disabled => "disabled",
            DeclineReason::NoProfileInfo => "no profile info",
            DeclineReason::Decider => "decider declined",
            DeclineReason::RecursionLimit => "recursion limit",
            DeclineReason::TooManyArguments => "too many arguments",
            DeclineReason::ArityMismatch => "arity mismatch",
            DeclineReason::TypeSpecDisabled => "type specialization disabled",
            DeclineReason::MissingDestination => "missing destination",
            DeclineReason::ConstructorNotInlinable => "constructor not inlinable",
            DeclineReason::PolymorphicArmCount => "polymorphic arm count",
            DeclineReason::NoBody => "no body",
            DeclineReason::ArgumentsObjectInLoopBody => "arguments object in loop body",
            DeclineReason::UnsupportedShape => "unsupported shape",
            DeclineReason::InApplyTargetInline => "nested apply target",
        }
    }
}

impl fmt::Display for DeclineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one [`inline_job`](crate::inline_job) run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlineStats {
    /// Call sites visited that had a profiled candidate
    pub call_sites: usize,
    /// Script bodies spliced (monomorphic, accessor, apply/call target and polymorphic arms)
    pub inlined: usize,
    pub polymorphic_sites: usize,
    /// Arms of polymorphic sites that were spliced rather than called
    pub polymorphic_arms: usize,
    pub builtins: usize,
    pub apply_call: usize,
    pub accessors: usize,
    pub dom_getters: usize,
    pub spreads: usize,
    /// Calls rewritten to a fixed function value without inlining
    pub fixed_only: usize,
    pub ctor_splits: usize,
    pub const_folds: usize,
    /// Deepest nesting of inlinees reached
    pub max_depth: u32,
    pub declined: HashMap<DeclineReason, usize>,
}

impl InlineStats {
    pub fn record_decline(&mut self, reason: DeclineReason) {
        *self.declined.entry(reason).or_insert(0) += 1;
    }

    pub fn declined_total(&self) -> usize {
        self.declined.values().sum()
    }

    pub fn declined_for(&self, reason: DeclineReason) -> usize {
        self.declined.get(&reason).copied().unwrap_or(0)
    }

    pub(crate) fn note_depth(&mut self, depth: u32) {
        self.max_depth = self.max_depth.max(depth);
    }
}

impl fmt::Display for InlineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Inlining summary:")?;
        writeln!(f, "  call sites:        {}", self.call_sites)?;
        writeln!(f, "  inlined:           {}", self.inlined)?;
        writeln!(
            f,
            "  polymorphic:       {} sites, {} arms",
            self.polymorphic_sites, self.polymorphic_arms
        )?;
        writeln!(f, "  built-ins:         {}", self.builtins)?;
        writeln!(f, "  apply/call:        {}", self.apply_call)?;
        writeln!(
            f,
            "  accessors:         {} ({} DOM fast paths)",
            self.accessors, self.dom_getters
        )?;
        writeln!(f, "  spreads:           {}", self.spreads)?;
        writeln!(f, "  fixed-only calls:  {}", self.fixed_only)?;
        writeln!(f, "  ctor splits:       {}", self.ctor_splits)?;
        writeln!(f, "  constant folds:    {}", self.const_folds)?;
        writeln!(f, "  max depth:         {}", self.max_depth)?;
        write!(f, "  declined:          {}", self.declined_total())?;
        let mut reasons: Vec<_> = self.declined.iter().collect();
        reasons.sort();
        for (reason, count) in reasons {
            write!(f, "\n    {:<30} {}", reason.as_str(), count)?;
        }
        Ok(())
    }
}
