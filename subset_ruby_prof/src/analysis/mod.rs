//! Type inference for instruction streams.
//!
//! # Architecture
//!
//! - [`lattice`]: abstract values, containers, join and widening
//! - [`registry`]: classes, modules, methods, constants and variables
//! - [`abstract_interp`]: the worklist-driven fixpoint engine
//! - [`ipo`]: call sites, continuations and argument binding
//! - [`result`]: the serializable summary of a run

pub mod abstract_interp;
pub mod ipo;
pub mod lattice;
pub mod registry;
pub mod result;

use tracing::debug;

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::iseq::preprocess::preprocess_program;
use crate::iseq::Program;
use abstract_interp::InferenceEngine;
pub use result::AnalysisResult;

/// Preprocesses `program` and runs the engine on it to a fixpoint or until the
/// configured budget runs out.
pub fn analyze(program: &Program, config: &AnalysisConfig) -> Result<AnalysisResult, AnalysisError> {
    program.validate()?;
    let program = preprocess_program(program);
    debug!(iseqs = program.iseqs.len(), "preprocessed program");
    let mut engine = InferenceEngine::new(&program, config);
    engine.run()?;
    Ok(engine.result())
}
