//! Analysis options.
//!
//! Every field is optional in TOML:
//!
//! ```toml
//! max_iterations = 100000
//! max_seconds = 30.0
//! type_depth_limit = 5
//! union_width_limit = 10
//! stub_execution = true
//! verbose = 0
//! show_untyped = false
//! ```

use serde::{Deserialize, Serialize};

use crate::analysis::lattice::{DEFAULT_TYPE_DEPTH_LIMIT, DEFAULT_UNION_WIDTH_LIMIT};
use crate::error::AnalysisError;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Worklist pops before the run is cut off.
    pub max_iterations: Option<u64>,
    /// Wall-clock limit in seconds.
    pub max_seconds: Option<f64>,
    /// Nesting depth of containers kept by localize/globalize/substitute.
    pub type_depth_limit: usize,
    /// Class instances a union may hold before degenerating to a common superclass.
    pub union_width_limit: usize,
    /// Analyze method and block bodies never reached through a call.
    pub stub_execution: bool,
    /// 0: quiet, 1: per-step events at debug level.
    pub verbose: u8,
    /// Render `untyped` members of unions instead of hiding them.
    pub show_untyped: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_iterations: None,
            max_seconds: None,
            type_depth_limit: DEFAULT_TYPE_DEPTH_LIMIT,
            union_width_limit: DEFAULT_UNION_WIDTH_LIMIT,
            stub_execution: true,
            verbose: 0,
            show_untyped: false,
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, AnalysisError> {
        Ok(toml::from_str(src)?)
    }

    pub fn with_max_iterations(mut self, n: u64) -> Self {
        self.max_iterations = Some(n);
        self
    }

    pub fn with_max_seconds(mut self, secs: f64) -> Self {
        self.max_seconds = Some(secs);
        self
    }

    pub fn with_type_depth_limit(mut self, depth: usize) -> Self {
        self.type_depth_limit = depth;
        self
    }

    pub fn with_union_width_limit(mut self, width: usize) -> Self {
        self.union_width_limit = width;
        self
    }

    pub fn with_stub_execution(mut self, enabled: bool) -> Self {
        self.stub_execution = enabled;
        self
    }

    pub fn with_verbose(mut self, level: u8) -> Self {
        self.verbose = level;
        self
    }

    pub fn with_show_untyped(mut self, show: bool) -> Self {
        self.show_untyped = show;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_is_default() {
        let config = AnalysisConfig::from_toml_str("").unwrap();
        assert_eq!(config, AnalysisConfig::default());
        assert!(config.stub_execution);
        assert_eq!(config.type_depth_limit, 5);
    }

    #[test]
    fn test_partial_toml() {
        let config =
            AnalysisConfig::from_toml_str("max_iterations = 10\nstub_execution = false\n").unwrap();
        assert_eq!(config.max_iterations, Some(10));
        assert!(!config.stub_execution);
        assert_eq!(config.union_width_limit, 10);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = AnalysisConfig::from_toml_str("max_iteration = 10").unwrap_err();
        assert!(matches!(err, AnalysisError::Config(_)));
    }
}
