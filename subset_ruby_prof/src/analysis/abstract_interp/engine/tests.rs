use super::*;
use crate::analysis::result::AnalysisResult;
use crate::iseq::builder::{ISeqBuilder, ProgramBuilder};
use crate::iseq::preprocess::preprocess_program;
use crate::iseq::{BranchKind, ClassDefKind, ISeq, Insn, IseqKind};

fn method(name: &str, locals: &[&str], lead: usize, body: impl FnOnce(&mut ISeqBuilder)) -> ISeq {
    let mut b = ISeqBuilder::new(name, IseqKind::Method).locals(locals).lead(lead);
    body(&mut b);
    b.finish()
}

fn block(locals: &[&str], lead: usize, body: impl FnOnce(&mut ISeqBuilder)) -> ISeq {
    let mut b = ISeqBuilder::new("block", IseqKind::Block).locals(locals).lead(lead);
    body(&mut b);
    b.finish()
}

fn class_body(name: &str, body: impl FnOnce(&mut ISeqBuilder)) -> ISeq {
    let mut b = ISeqBuilder::new(name, IseqKind::Class);
    body(&mut b);
    b.put_nil().leave();
    b.finish()
}

fn main_iseq(locals: &[&str], body: impl FnOnce(&mut ISeqBuilder)) -> ISeq {
    let mut b = ISeqBuilder::new("<main>", IseqKind::Top).locals(locals);
    body(&mut b);
    b.finish()
}

fn run_with(program: &Program, config: &AnalysisConfig, order: PopOrder) -> AnalysisResult {
    let program = preprocess_program(program);
    let mut engine = InferenceEngine::new(&program, config).with_pop_order(order);
    engine.run().expect("well-formed program");
    engine.result()
}

fn run(program: &Program) -> AnalysisResult {
    run_with(program, &AnalysisConfig::default(), PopOrder::Forward)
}

/// `def id(x) = x` called with 1 and "s".
fn identity_program() -> Program {
    let mut p = ProgramBuilder::new("id.rb");
    let id = p.add(method("id", &["x"], 1, |b| {
        b.get_local(0).leave();
    }));
    let main = p.add(main_iseq(&[], |b| {
        b.define_method("id", id);
        b.put_self().put_int(1).fcall("id", 1).pop();
        b.put_self().put_str("s").fcall("id", 1).leave();
    }));
    p.build(main)
}

/// ```ruby
/// class Foo
///   attr_reader :x
///   def initialize(x) = @x = x
/// end
/// p(Foo.new(1).x)
/// ```
fn attr_program() -> Program {
    let mut p = ProgramBuilder::new("attr.rb");
    let init = p.add(method("initialize", &["x"], 1, |b| {
        b.get_local(0).dup().set_ivar("@x").leave();
    }));
    let foo = p.add(class_body("<class:Foo>", |b| {
        b.put_self().put_sym("x").fcall("attr_reader", 1).pop();
        b.define_method("initialize", init);
    }));
    let main = p.add(main_iseq(&[], |b| {
        b.define_class("Foo", foo, ClassDefKind::Class).pop();
        b.put_self()
            .const_ref("Foo")
            .put_int(1)
            .send("new", 1)
            .send("x", 0)
            .fcall("p", 1)
            .leave();
    }));
    p.build(main)
}

#[test]
fn test_identity_method_returns_argument_type() {
    let mut p = ProgramBuilder::new("id.rb");
    let id = p.add(method("id", &["x"], 1, |b| {
        b.get_local(0).leave();
    }));
    let main = p.add(main_iseq(&[], |b| {
        b.define_method("id", id);
        b.put_self().put_int(1).fcall("id", 1).leave();
    }));
    let result = run(&p.build(main));

    let summary = result.method("Object", false, "id").expect("id analyzed");
    assert_eq!(summary.params, vec!["Integer".to_string()]);
    assert_eq!(summary.signature(), "(Integer) -> Integer");
    assert!(!result.terminated);
    assert_eq!(result.errors().count(), 0);
}

#[test]
fn test_call_sites_join_parameter_types() {
    let result = run(&identity_program());
    let summary = result.method("Object", false, "id").expect("id analyzed");
    assert_eq!(summary.params, vec!["(Integer | String)".to_string()]);
    assert_eq!(summary.ret, "(Integer | String)");
}

#[test]
fn test_engine_queries_match_result() {
    let program = preprocess_program(&identity_program());
    let config = AnalysisConfig::default();
    let mut engine = InferenceEngine::new(&program, &config);
    engine.run().expect("well-formed program");

    let ret = engine
        .return_type_of(builtin::OBJECT, false, "id")
        .expect("id analyzed");
    assert_eq!(
        engine.registry().screen_name(&ret, false),
        "(Integer | String)"
    );
    let sig = engine
        .signature_of(builtin::OBJECT, false, "id")
        .expect("id analyzed");
    assert_eq!(sig.lead.len(), 1);
    assert!(engine.return_type_of(builtin::OBJECT, false, "missing").is_none());
}

#[test]
fn test_results_do_not_depend_on_pop_order() {
    let config = AnalysisConfig::default();
    for program in [identity_program(), attr_program()] {
        let forward = run_with(&program, &config, PopOrder::Forward);
        let reverse = run_with(&program, &config, PopOrder::Reverse);
        assert_eq!(forward.methods, reverse.methods);
        assert_eq!(forward.ivars, reverse.ivars);
        assert_eq!(forward.revealed, reverse.revealed);
    }
}

#[test]
fn test_uncalled_method_is_stub_executed() {
    let mut p = ProgramBuilder::new("stub.rb");
    let f = p.add(method("f", &["x"], 1, |b| {
        b.get_local(0).leave();
    }));
    let main = p.add(main_iseq(&[], |b| {
        b.define_method("f", f).put_nil().leave();
    }));
    let program = p.build(main);

    let result = run(&program);
    let summary = result.method("Object", false, "f").expect("stub executed");
    assert_eq!(summary.signature(), "(untyped) -> untyped");

    let config = AnalysisConfig::default().with_stub_execution(false);
    let result = run_with(&program, &config, PopOrder::Forward);
    assert!(result.method("Object", false, "f").is_none());
}

#[test]
fn test_branch_narrows_tested_local() {
    // def f(x) = x ? x : 1
    let mut p = ProgramBuilder::new("narrow.rb");
    let mut f = ISeqBuilder::new("f", IseqKind::Method).locals(&["x"]).lead(1);
    f.get_local(0);
    let br = f.pc();
    f.branch(BranchKind::Unless, 0);
    f.get_local(0).leave();
    let else_pc = f.pc();
    f.patch_target(br, else_pc);
    f.put_int(1).leave();
    let f = p.add(f.finish());

    let main = p.add(main_iseq(&[], |b| {
        b.define_method("f", f);
        b.put_self().put_str("a").fcall("f", 1).pop();
        b.put_self().put_nil().fcall("f", 1).leave();
    }));
    let result = run(&p.build(main));

    let summary = result.method("Object", false, "f").expect("f analyzed");
    assert_eq!(summary.params, vec!["String?".to_string()]);
    assert_eq!(summary.ret, "(Integer | String)");
}

#[test]
fn test_recursive_method_reaches_fixpoint() {
    // def fact(n) = n < 1 ? 1 : n * fact(n - 1)
    let mut p = ProgramBuilder::new("fact.rb");
    let mut f = ISeqBuilder::new("fact", IseqKind::Method).locals(&["n"]).lead(1);
    f.get_local(0).put_int(1).send("<", 1);
    let br = f.pc();
    f.branch(BranchKind::Unless, 0);
    f.put_int(1).leave();
    let else_pc = f.pc();
    f.patch_target(br, else_pc);
    f.get_local(0)
        .put_self()
        .get_local(0)
        .put_int(1)
        .send("-", 1)
        .fcall("fact", 1)
        .send("*", 1)
        .leave();
    let fact = p.add(f.finish());

    let main = p.add(main_iseq(&[], |b| {
        b.define_method("fact", fact);
        b.put_self().put_int(5).fcall("fact", 1).leave();
    }));
    let result = run(&p.build(main));

    assert!(!result.terminated);
    let summary = result.method("Object", false, "fact").expect("fact analyzed");
    assert_eq!(summary.signature(), "(Integer) -> Integer");
}

#[test]
fn test_iteration_budget_stops_early() {
    let config = AnalysisConfig::default().with_max_iterations(2);
    let program = preprocess_program(&identity_program());
    let mut engine = InferenceEngine::new(&program, &config);
    engine.run().expect("exhaustion is not an error");

    assert!(engine.terminated());
    assert_eq!(engine.exhaustion(), Some(Exhaustion::Iterations));
    assert_eq!(engine.iterations(), 2);
    assert!(engine.result().terminated);
}

#[test]
fn test_undefined_method_is_reported() {
    let mut p = ProgramBuilder::new("undef.rb");
    let main = p.add(main_iseq(&[], |b| {
        b.line(3).put_int(1).send("foo", 0).leave();
    }));
    let result = run(&p.build(main));

    let errors: Vec<_> = result.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message(), "undefined method: Integer#foo");
    assert_eq!(
        errors[0].location,
        Some(SourceLocation {
            path: "undef.rb".to_string(),
            line: 3,
        })
    );
}

#[test]
fn test_wrong_arity_is_reported() {
    let mut p = ProgramBuilder::new("arity.rb");
    let f = p.add(method("f", &["x"], 1, |b| {
        b.get_local(0).leave();
    }));
    let main = p.add(main_iseq(&[], |b| {
        b.define_method("f", f);
        b.put_self().put_int(1).put_int(2).fcall("f", 2).leave();
    }));
    let result = run(&p.build(main));

    let messages: Vec<String> = result.errors().map(|d| d.message()).collect();
    assert!(
        messages
            .iter()
            .any(|m| m.contains("wrong number of arguments (given 2, expected 1)")),
        "got {:?}",
        messages
    );
}

#[test]
fn test_attr_reader_sees_ivar_written_by_initialize() {
    let result = run(&attr_program());

    assert_eq!(result.ivar("Foo", "@x"), Some("Integer"));
    assert_eq!(result.revealed.len(), 1);
    assert_eq!(result.revealed[0].ty, "Integer");
    let init = result.method("Foo", false, "initialize").expect("initialize analyzed");
    assert_eq!(init.params, vec!["Integer".to_string()]);
}

#[test]
fn test_include_makes_module_methods_visible() {
    // module M; def hello = "hi"; end
    // class C; include M; end
    // p(C.new.hello)
    let mut p = ProgramBuilder::new("mixin.rb");
    let hello = p.add(method("hello", &[], 0, |b| {
        b.put_str("hi").leave();
    }));
    let m = p.add(class_body("<module:M>", |b| {
        b.define_method("hello", hello);
    }));
    let c = p.add(class_body("<class:C>", |b| {
        b.put_self().const_ref("M").fcall("include", 1).pop();
    }));
    let main = p.add(main_iseq(&[], |b| {
        b.define_class("M", m, ClassDefKind::Module).pop();
        b.define_class("C", c, ClassDefKind::Class).pop();
        b.put_self()
            .const_ref("C")
            .send("new", 0)
            .send("hello", 0)
            .fcall("p", 1)
            .leave();
    }));
    let result = run(&p.build(main));

    assert_eq!(result.errors().count(), 0);
    assert_eq!(result.revealed[0].ty, "String");
    assert_eq!(
        result.method("M", false, "hello").map(|m| m.ret.as_str()),
        Some("String")
    );
}

#[test]
fn test_module_function_adds_singleton_method() {
    // module M; module_function; def helper = 1; end
    // p(M.helper)
    let mut p = ProgramBuilder::new("modfunc.rb");
    let helper = p.add(method("helper", &[], 0, |b| {
        b.put_int(1).leave();
    }));
    let m = p.add(class_body("<module:M>", |b| {
        b.put_self().fcall("module_function", 0).pop();
        b.define_method("helper", helper);
    }));
    let main = p.add(main_iseq(&[], |b| {
        b.define_class("M", m, ClassDefKind::Module).pop();
        b.put_self()
            .const_ref("M")
            .send("helper", 0)
            .fcall("p", 1)
            .leave();
    }));
    let result = run(&p.build(main));

    assert_eq!(result.errors().count(), 0);
    assert_eq!(result.revealed[0].ty, "Integer");
    assert!(result.method("M", true, "helper").is_some());
}

#[test]
fn test_super_dispatches_to_parent_method() {
    // class A; def foo(x) = x; end
    // class B < A; def foo(x) = super(x); end
    // B.new.foo(1)
    let mut p = ProgramBuilder::new("super.rb");
    let a_foo = p.add(method("foo", &["x"], 1, |b| {
        b.get_local(0).leave();
    }));
    let b_foo = p.add(method("foo", &["x"], 1, |b| {
        b.put_self().get_local(0).invoke_super(1).leave();
    }));
    let a = p.add(class_body("<class:A>", |b| {
        b.define_method("foo", a_foo);
    }));
    let b_body = p.add(class_body("<class:B>", |b| {
        b.define_method("foo", b_foo);
    }));
    let main = p.add(main_iseq(&[], |b| {
        b.define_class("A", a, ClassDefKind::Class).pop();
        b.define_subclass("B", b_body, "A").pop();
        b.const_ref("B").send("new", 0).put_int(1).send("foo", 1).leave();
    }));
    let result = run(&p.build(main));

    assert_eq!(result.errors().count(), 0);
    let b_summary = result.method("B", false, "foo").expect("B#foo analyzed");
    assert_eq!(b_summary.ret, "Integer");
    let a_summary = result.method("A", false, "foo").expect("A#foo analyzed");
    assert_eq!(a_summary.params, vec!["Integer".to_string()]);
}

#[test]
fn test_constants_resolve_and_missing_ones_are_reported() {
    let mut p = ProgramBuilder::new("const.rb");
    let main = p.add(main_iseq(&[], |b| {
        b.put_int(42).put_special(3).insn(Insn::SetConstant {
            name: "X".to_string(),
        });
        b.put_self().const_ref("X").fcall("p", 1).pop();
        b.line(2).const_ref("Missing").leave();
    }));
    let result = run(&p.build(main));

    assert_eq!(result.revealed[0].ty, "Integer");
    let errors: Vec<String> = result.errors().map(|d| d.message()).collect();
    assert_eq!(errors, vec!["uninitialized constant Missing".to_string()]);
}

#[test]
fn test_array_map_instantiates_block_result() {
    // p([1, 2].map { |x| x.to_s })
    let mut p = ProgramBuilder::new("map.rb");
    let blk = p.add(block(&["x"], 1, |b| {
        b.get_local(0).send("to_s", 0).leave();
    }));
    let main = p.add(main_iseq(&[], |b| {
        b.put_self()
            .put_int(1)
            .put_int(2)
            .new_array(2)
            .send_with_block("map", 0, blk)
            .fcall("p", 1)
            .leave();
    }));
    let result = run(&p.build(main));

    assert_eq!(result.errors().count(), 0);
    assert_eq!(result.revealed[0].ty, "Array[String]");
}

#[test]
fn test_yield_passes_arguments_to_block() {
    // def each_one = yield(1)
    // each_one { |x| x.to_s }
    let mut p = ProgramBuilder::new("yield.rb");
    let each_one = p.add(method("each_one", &[], 0, |b| {
        b.put_int(1).invoke_block(1).leave();
    }));
    let blk = p.add(block(&["x"], 1, |b| {
        b.get_local(0).send("to_s", 0).leave();
    }));
    let main = p.add(main_iseq(&[], |b| {
        b.define_method("each_one", each_one);
        b.put_self().send_with_block("each_one", 0, blk).leave();
    }));
    let result = run(&p.build(main));

    let summary = result.method("Object", false, "each_one").expect("each_one analyzed");
    assert_eq!(summary.ret, "String");
    assert_eq!(summary.block.as_deref(), Some("{ (Integer) -> String }"));
    assert_eq!(result.blocks.len(), 1);
    assert_eq!(result.blocks[0].params, vec!["Integer".to_string()]);
}

#[test]
fn test_array_push_keeps_allocation_sites_apart() {
    // a = [1]; b = ["s"]; a << "x"; p(b); p(a)
    let mut p = ProgramBuilder::new("alloc.rb");
    let main = p.add(main_iseq(&["a", "b"], |b| {
        b.put_int(1).new_array(1).set_local(0);
        b.put_str("s").new_array(1).set_local(1);
        b.get_local(0).put_str("x").send("<<", 1).pop();
        b.line(2).put_self().get_local(1).fcall("p", 1).pop();
        b.line(3).put_self().get_local(0).fcall("p", 1).leave();
    }));
    let result = run(&p.build(main));

    assert_eq!(result.revealed.len(), 2);
    assert_eq!(result.revealed[0].ty, "[String]");
    assert_eq!(result.revealed[1].ty, "[Integer, String]");
}

#[test]
fn test_global_variable_flows_to_readers() {
    let mut p = ProgramBuilder::new("gvar.rb");
    let main = p.add(main_iseq(&[], |b| {
        b.put_self().get_global("$x").fcall("p", 1).pop();
        b.put_int(1).set_global("$x");
        b.put_nil().leave();
    }));
    let result = run(&p.build(main));

    assert_eq!(result.gvar("$x"), Some("Integer"));
    // The read comes first in program order and still sees the later write.
    assert_eq!(result.revealed[0].ty, "Integer");
}

#[test]
fn test_method_missing_handles_unknown_calls() {
    // class Foo; def method_missing(name) = 1; end
    // Foo.new.bar
    let mut p = ProgramBuilder::new("mm.rb");
    let mm = p.add(method("method_missing", &["name"], 1, |b| {
        b.put_int(1).leave();
    }));
    let foo = p.add(class_body("<class:Foo>", |b| {
        b.define_method("method_missing", mm);
    }));
    let main = p.add(main_iseq(&[], |b| {
        b.define_class("Foo", foo, ClassDefKind::Class).pop();
        b.put_self()
            .const_ref("Foo")
            .send("new", 0)
            .send("bar", 0)
            .fcall("p", 1)
            .leave();
    }));
    let result = run(&p.build(main));

    assert_eq!(result.errors().count(), 0);
    assert_eq!(result.revealed[0].ty, "Integer");
    let summary = result.method("Foo", false, "method_missing").expect("analyzed");
    assert_eq!(summary.params, vec![":bar".to_string()]);
}

#[test]
fn test_stored_envs_only_grow() {
    let program = preprocess_program(&attr_program());
    let config = AnalysisConfig::default();
    let mut engine = InferenceEngine::new(&program, &config);
    engine.start().expect("main exists");

    let mut snapshot = engine.ep2env.clone();
    loop {
        while let Some(ep) = engine.worklist.pop() {
            engine.step(ep).expect("well-formed program");
            for (ep, old) in &snapshot {
                let new = &engine.ep2env[ep];
                assert_eq!(&old.merge(new).expect("same shape"), new, "env of #{} shrank", ep.0);
            }
            snapshot = engine.ep2env.clone();
        }
        if !engine.run_pending().expect("well-formed program") {
            break;
        }
    }
    assert!(!snapshot.is_empty());
}

#[test]
fn test_typed_method_updates_receiver_elements() {
    // a = [1]; a.unshift("s"); p(a)
    let mut p = ProgramBuilder::new("unshift.rb");
    let main = p.add(main_iseq(&["a"], |b| {
        b.put_int(1).new_array(1).set_local(0);
        b.get_local(0).put_str("s").send("unshift", 1).pop();
        b.put_self().get_local(0).fcall("p", 1).leave();
    }));
    let result = run(&p.build(main));

    assert_eq!(result.errors().count(), 0);
    assert_eq!(result.revealed[0].ty, "[(Integer | String)]");
}

/// `k = gets ? Then : Else`, stored in local 0.
fn pick_class(b: &mut ISeqBuilder, then_class: &str, else_class: &str) {
    b.put_self().fcall("gets", 0);
    let br = b.pc();
    b.branch(BranchKind::Unless, 0);
    b.const_ref(then_class);
    let jmp = b.pc();
    b.jump(0);
    let else_pc = b.pc();
    b.patch_target(br, else_pc);
    b.const_ref(else_class);
    let end = b.pc();
    b.patch_target(jmp, end);
    b.set_local(0);
}

/// ```ruby
/// class P; <body>; end
/// class A < P; end
/// class B < P; end
/// ```
fn define_family(p: &mut ProgramBuilder, b: &mut ISeqBuilder, parent: impl FnOnce(&mut ISeqBuilder)) {
    let parent = p.add(class_body("<class:P>", parent));
    let a = p.add(class_body("<class:A>", |_| {}));
    let b_body = p.add(class_body("<class:B>", |_| {}));
    b.define_class("P", parent, ClassDefKind::Class).pop();
    b.define_subclass("A", a, "P").pop();
    b.define_subclass("B", b_body, "P").pop();
}

#[test]
fn test_new_on_class_union_returns_every_instance() {
    // class P; def initialize = nil; end
    // k = gets ? A : B
    // p(k); p(k.new)
    let mut p = ProgramBuilder::new("union_new.rb");
    let init = p.add(method("initialize", &[], 0, |b| {
        b.put_nil().leave();
    }));
    let mut main = ISeqBuilder::new("<main>", IseqKind::Top).locals(&["k"]);
    define_family(&mut p, &mut main, |b| {
        b.define_method("initialize", init);
    });
    pick_class(&mut main, "A", "B");
    main.line(2).put_self().get_local(0).fcall("p", 1).pop();
    main.line(3)
        .put_self()
        .get_local(0)
        .send("new", 0)
        .fcall("p", 1)
        .leave();
    let main = p.add(main.finish());
    let result = run(&p.build(main));

    assert_eq!(result.errors().count(), 0);
    let revealed: Vec<&str> = result.revealed.iter().map(|r| r.ty.as_str()).collect();
    assert_eq!(revealed, vec!["(singleton(A) | singleton(B))", "(A | B)"]);
}

#[test]
fn test_union_receiver_sharing_one_method() {
    // class P; def me = self; end
    // p((gets ? A : B).new.me)
    let mut p = ProgramBuilder::new("union_send.rb");
    let me = p.add(method("me", &[], 0, |b| {
        b.put_self().leave();
    }));
    let mut main = ISeqBuilder::new("<main>", IseqKind::Top).locals(&["k"]);
    define_family(&mut p, &mut main, |b| {
        b.define_method("me", me);
    });
    pick_class(&mut main, "A", "B");
    main.line(2)
        .put_self()
        .get_local(0)
        .send("new", 0)
        .send("me", 0)
        .fcall("p", 1)
        .leave();
    let main = p.add(main.finish());
    let result = run(&p.build(main));

    assert_eq!(result.errors().count(), 0);
    assert_eq!(result.revealed.len(), 1);
    assert_eq!(result.revealed[0].ty, "(A | B)");
    assert_eq!(signature_ret(&result, "P", "me"), "(A | B)");
}

fn signature_ret<'r>(result: &'r AnalysisResult, class: &str, name: &str) -> &'r str {
    result
        .method(class, false, name)
        .map(|m| m.ret.as_str())
        .unwrap_or("<not analyzed>")
}

#[test]
fn test_attr_reader_keeps_earlier_def_callable() {
    // class Foo
    //   def x = "s"
    //   attr_reader :x
    //   def initialize = @x = 1
    // end
    // p(Foo.new.x)
    let mut p = ProgramBuilder::new("attr_def.rb");
    let x = p.add(method("x", &[], 0, |b| {
        b.put_str("s").leave();
    }));
    let init = p.add(method("initialize", &[], 0, |b| {
        b.put_int(1).dup().set_ivar("@x").leave();
    }));
    let foo = p.add(class_body("<class:Foo>", |b| {
        b.define_method("x", x);
        b.put_self().put_sym("x").fcall("attr_reader", 1).pop();
        b.define_method("initialize", init);
    }));
    let main = p.add(main_iseq(&[], |b| {
        b.define_class("Foo", foo, ClassDefKind::Class).pop();
        b.put_self()
            .const_ref("Foo")
            .send("new", 0)
            .send("x", 0)
            .fcall("p", 1)
            .leave();
    }));
    let result = run(&p.build(main));

    assert_eq!(result.errors().count(), 0);
    assert_eq!(result.revealed[0].ty, "(Integer | String)");
}

#[test]
fn test_exhaustion_leaves_unvisited_point_queued() {
    let config = AnalysisConfig::default().with_max_iterations(1);
    let program = preprocess_program(&identity_program());
    let mut engine = InferenceEngine::new(&program, &config);
    engine.run().expect("exhaustion is not an error");

    assert!(engine.terminated());
    assert!(engine.worklist.pop().is_some());
}
