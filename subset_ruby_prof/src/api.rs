//! Entry points taking serialized input.

use std::path::Path;

use crate::analysis::{analyze, AnalysisResult};
use crate::cancel;
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::iseq::Program;

/// Analyzes a program given as JSON, with an optional TOML configuration.
///
/// # Example
///
/// ```
/// use subset_ruby_prof::api::analyze_json_str;
///
/// let program = r#"{
///   "main": 0,
///   "iseqs": [{
///     "name": "<main>", "path": "main.rb", "kind": "top",
///     "locals": ["x"],
///     "insns": [
///       {"op": "put_object", "value": {"type": "integer", "value": 1}},
///       {"op": "set_local", "idx": 0, "level": 0},
///       {"op": "put_nil"},
///       {"op": "leave"}
///     ],
///     "lines": [1, 1, 1, 1]
///   }]
/// }"#;
/// let result = analyze_json_str(program, Some("max_iterations = 1000")).unwrap();
/// assert!(!result.terminated);
/// ```
pub fn analyze_json_str(program_json: &str, config_toml: Option<&str>) -> Result<AnalysisResult, AnalysisError> {
    cancel::reset();
    let config = match config_toml {
        Some(src) => AnalysisConfig::from_toml_str(src)?,
        None => AnalysisConfig::default(),
    };
    let program = Program::from_json_str(program_json)?;
    analyze(&program, &config)
}

/// Reads a JSON program from `path` and analyzes it.
pub fn analyze_file(path: impl AsRef<Path>, config: &AnalysisConfig) -> Result<AnalysisResult, AnalysisError> {
    cancel::reset();
    let json = std::fs::read_to_string(path)?;
    let program = Program::from_json_str(&json)?;
    analyze(&program, config)
}
