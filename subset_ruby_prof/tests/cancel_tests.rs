//! Cancellation uses a process-wide flag, so it gets a test binary of its own.

mod common;

use common::*;
use subset_ruby_prof::cancel;
use subset_ruby_prof::iseq::builder::ProgramBuilder;

#[test]
fn test_cancelled_run_returns_partial_result() {
    let mut p = ProgramBuilder::new("cancel.rb");
    let main = p.add(main_iseq(&[], |b| {
        b.put_int(1).leave();
    }));
    let program = p.build(main);

    cancel::request();
    let result = run(&program);
    cancel::reset();

    assert!(result.terminated);
    assert_eq!(result.iterations, 0);

    let result = run(&program);
    assert!(!result.terminated);
}
