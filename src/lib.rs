//! Quicksilver inliner: the function-inlining stage of the Quicksilver JIT backend
//!
//! Given a function lowered to the backend IR, the inliner walks its instruction list
//! call site by call site and, guided by profile data, splices callee bodies directly
//! into the caller. Every speculative assumption it bakes in (the callee's identity, a
//! built-in's identity, a fixed field value) is protected by a guard carrying a bailout
//! record, so a wrong guess falls back to the unoptimized path instead of miscompiling.
//!
//! # Quick Start
//!
//! ```no_run
//! use quicksilver_inliner::fixture::Fixture;
//! use quicksilver_inliner::{inline_job, InlineContext, InlinerConfig};
//!
//! fn main() -> quicksilver_inliner::Result<()> {
//!     let fixture = Fixture::from_path("caller.json")?;
//!     let mut job = fixture.build_job()?;
//!     let stats = inline_job(
//!         &mut job,
//!         &InlineContext::default(),
//!         &InlinerConfig::default(),
//!         &fixture.decider(),
//!         &fixture.ir_builder(),
//!     )?;
//!     println!("{}", stats);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! A job flows: profile data → [`decider`] → [`inliner`] (using [`materializer`], [`binder`], [`guard`]) → rewritten [`ir`]
//!
//! | Category | Modules |
//! |----------|---------|
//! | **IR** | [`ir`] (instructions, operands, symbols, units, the job arena) |
//! | **Inputs** | [`profile`], [`context`], [`config`], [`fixture`] |
//! | **Collaborators** | [`decider`], [`materializer`] |
//! | **Engine** | [`inliner`], [`binder`], [`guard`] |
// Clippy configuration for the inliner.
//
// - too_many_arguments: transformers thread the call, its chain and the candidate together
// - module_inception: `inliner::Inliner` reads better than the alternatives
#![allow(clippy::too_many_arguments)]
#![allow(clippy::module_inception)]

pub mod binder;
pub mod config;
pub mod context;
pub mod decider;
pub mod fixture;
pub mod guard;
pub mod inliner;
pub mod ir;
pub mod materializer;
pub mod profile;

mod error;

pub use config::InlinerConfig;
pub use context::InlineContext;
pub use error::{messages, Error, InvariantKind, IrLocation, Result};
pub use inliner::{inline_job, InlineStats, Inliner};

/// Version of the inliner
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
