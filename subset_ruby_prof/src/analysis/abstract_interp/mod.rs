//! Abstract interpretation of instruction streams.
//!
//! Every reachable (context, pc) pair carries one [`Env`] that only grows. The
//! engine pops points off a deterministic [`Worklist`], interprets one
//! instruction against the abstract state, and merges the result into the
//! successors until nothing changes.
//!
//! # Module structure
//!
//! - `context`: contexts, execution points and the interners that number them
//! - `env`: per-point abstract state (locals, stack, container elements)
//! - `worklist`: ordered set of points awaiting a step
//! - `conditional`: splitting a tested value between branch successors
//! - `engine`: the fixpoint loop, instruction semantics and method dispatch
//!
//! # Usage
//!
//! ```
//! use subset_ruby_prof::analysis::abstract_interp::InferenceEngine;
//! use subset_ruby_prof::config::AnalysisConfig;
//! use subset_ruby_prof::iseq::builder::{ISeqBuilder, ProgramBuilder};
//! use subset_ruby_prof::iseq::IseqKind;
//!
//! let mut program = ProgramBuilder::new("main.rb");
//! let mut main = ISeqBuilder::new("<main>", IseqKind::Top);
//! main.put_int(1).leave();
//! let main = program.add(main.finish());
//! let program = program.build(main);
//!
//! let config = AnalysisConfig::default();
//! let mut engine = InferenceEngine::new(&program, &config);
//! engine.run().unwrap();
//! assert!(!engine.terminated());
//! ```

pub mod conditional;
pub mod context;
pub mod engine;
pub mod env;
pub mod worklist;

pub use conditional::{branch_directions, exact_bool, split_by_class, split_for_branch, BranchSplit};
pub use context::{CRef, CRefId, Context, CtxId, EpId, ExecutionPoint};
pub use engine::InferenceEngine;
pub use env::{Env, StaticEnv};
pub use worklist::{PopOrder, Worklist};
