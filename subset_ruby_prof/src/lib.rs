// Library code reports through `tracing` and `Diagnostic`s, never stderr.
#![deny(clippy::print_stderr)]

pub mod analysis;
pub mod cancel;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod iseq;

// Rust API for programmatic use
pub mod api;
pub use api::{analyze_file, analyze_json_str};

pub use analysis::{analyze, AnalysisResult};
pub use config::AnalysisConfig;
pub use error::AnalysisError;
