//! Shared helpers for integration tests
// Each test target uses a different subset of these builders.
#![allow(dead_code)]

use subset_ruby_prof::iseq::builder::ISeqBuilder;
use subset_ruby_prof::iseq::{ISeq, IseqKind, Program};
use subset_ruby_prof::{analyze, AnalysisConfig, AnalysisResult};

/// A method body with `lead` required parameters in the first local slots.
pub fn method(name: &str, locals: &[&str], lead: usize, body: impl FnOnce(&mut ISeqBuilder)) -> ISeq {
    let mut b = ISeqBuilder::new(name, IseqKind::Method).locals(locals).lead(lead);
    body(&mut b);
    b.finish()
}

pub fn block(locals: &[&str], lead: usize, body: impl FnOnce(&mut ISeqBuilder)) -> ISeq {
    let mut b = ISeqBuilder::new("block", IseqKind::Block).locals(locals).lead(lead);
    body(&mut b);
    b.finish()
}

/// A class or module body; `put_nil; leave` is appended.
pub fn class_body(name: &str, body: impl FnOnce(&mut ISeqBuilder)) -> ISeq {
    let mut b = ISeqBuilder::new(name, IseqKind::Class);
    body(&mut b);
    b.put_nil().leave();
    b.finish()
}

pub fn main_iseq(locals: &[&str], body: impl FnOnce(&mut ISeqBuilder)) -> ISeq {
    let mut b = ISeqBuilder::new("<main>", IseqKind::Top).locals(locals);
    body(&mut b);
    b.finish()
}

/// Analyzes with the default configuration; fatal errors fail the test.
pub fn run(program: &Program) -> AnalysisResult {
    run_with(program, &AnalysisConfig::default())
}

pub fn run_with(program: &Program, config: &AnalysisConfig) -> AnalysisResult {
    analyze(program, config).unwrap_or_else(|e| panic!("analysis failed: {}", e))
}

/// Messages of every error diagnostic.
pub fn error_messages(result: &AnalysisResult) -> Vec<String> {
    result.errors().map(|d| d.message()).collect()
}

/// Rendered signature of `class#name`, panicking when it was never analyzed.
pub fn signature(result: &AnalysisResult, class: &str, name: &str) -> String {
    result
        .method(class, false, name)
        .unwrap_or_else(|| panic!("{}#{} was not analyzed", class, name))
        .signature()
}
