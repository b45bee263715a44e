//! The inlining decider interface
//!
//! Whether a candidate is *profitable* to inline is decided outside the engine. The
//! engine only asks two kinds of question: "what did the profile see at this site?" and
//! "should this candidate be inlined here?". [`InliningDecider`] is that boundary, and
//! [`ProfileDecider`] is a straightforward implementation driven by the candidate
//! descriptors alone.

use std::sync::Arc;

use crate::config::InlinerConfig;
use crate::context::InlineContext;
use crate::ir::ProfileId;
use crate::profile::{BuiltinFunction, Candidate, FunctionInfoId};

/// Everything the decider gets to see about one inlining opportunity
#[derive(Debug, Clone, Copy)]
pub struct InlineSite<'a> {
    /// Descriptor of the unit containing the call
    pub caller: &'a Candidate,
    pub candidate: &'a Arc<Candidate>,
    pub profile_id: ProfileId,
    pub is_ctor: bool,
    /// Consecutive self-recursive inlines leading to this site
    pub recursive_depth: u32,
    /// Bit `i` is set when argument `i` (0 is `this`) is an integer constant
    pub constant_arguments: u32,
    pub is_in_loop: bool,
    /// Function identities currently being inlined, outermost first
    pub inline_stack: &'a [FunctionInfoId],
}

impl InlineSite<'_> {
    /// How many times the candidate already occurs on the inline stack
    pub fn recursion_count(&self) -> usize {
        self.inline_stack
            .iter()
            .filter(|info| **info == self.candidate.function_info)
            .count()
    }
}

pub trait InliningDecider {
    /// Candidate (or head of the polymorphic chain) profiled at a call site
    fn inlinee(&self, caller: &Candidate, profile_id: ProfileId) -> Option<Arc<Candidate>> {
        caller.call_sites.get(&profile_id).cloned()
    }

    /// Accessor candidate profiled at a property access
    fn ldfld_inlinee(&self, caller: &Candidate, inline_cache_index: u32) -> Option<Arc<Candidate>> {
        caller.ldfld_inlinees.get(&inline_cache_index).cloned()
    }

    /// Number of profiled call sites with a candidate
    fn inlinee_count(&self, caller: &Candidate) -> usize {
        caller.call_sites.len()
    }

    fn is_ldfld_inlinee_present(&self, caller: &Candidate) -> bool {
        caller.is_ldfld_inlinee_present()
    }

    /// The heuristic verdict for a script candidate
    fn should_inline(&self, site: &InlineSite<'_>) -> bool;

    /// Which built-in a body-less candidate is, if the engine knows a fast path for it
    fn builtin_of(&self, candidate: &Candidate, ctx: &InlineContext) -> Option<BuiltinFunction> {
        if candidate.has_body() {
            return None;
        }
        candidate
            .builtin
            .or_else(|| ctx.builtin_for(candidate.function_info))
    }
}

/// Decides from the descriptors alone: inline whatever the profile marked as inlinable,
/// with bounded recursion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDecider {
    pub max_recursive_depth: u32,
    pub inline_recursive: bool,
}

impl Default for ProfileDecider {
    fn default() -> Self {
        Self::from_config(&InlinerConfig::default())
    }
}

impl ProfileDecider {
    pub fn new(max_recursive_depth: u32, inline_recursive: bool) -> Self {
        Self {
            max_recursive_depth,
            inline_recursive,
        }
    }

    pub fn from_config(config: &InlinerConfig) -> Self {
        Self::new(config.max_recursive_inline_depth, config.inline_recursive)
    }
}

impl InliningDecider for ProfileDecider {
    fn should_inline(&self, site: &InlineSite<'_>) -> bool {
        let candidate = site.candidate;
        if !candidate.is_inlined {
            return false;
        }
        if let Some(body) = &candidate.body {
            if !body.has_profile_info {
                return false;
            }
        }
        let recursion = site.recursion_count();
        if recursion > 0 && !self.inline_recursive {
            return false;
        }
        site.recursive_depth <= self.max_recursive_depth && recursion as u32 <= self.max_recursive_depth
    }
}
