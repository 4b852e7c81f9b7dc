//! End-to-end inference over hand-built instruction streams.

mod common;

use common::*;
use subset_ruby_prof::iseq::builder::{ISeqBuilder, ProgramBuilder};
use subset_ruby_prof::iseq::{
    CallInfo, CatchKind, ClassDefKind, IseqKind, KeywordShape, LiteralValue, OptionalKeyword,
    ParamShape, ThrowKind,
};

#[test]
fn test_optional_parameter_joins_default_and_argument() {
    // def f(x, y = 1) = y
    // f(1); f(1, "s")
    let mut p = ProgramBuilder::new("opt.rb");
    let mut f = ISeqBuilder::new("f", IseqKind::Method)
        .locals(&["x", "y"])
        .params(ParamShape {
            lead_num: 1,
            opt: vec![0, 2],
            ..ParamShape::default()
        });
    f.put_int(1).set_local(1);
    f.get_local(1).leave();
    let f = p.add(f.finish());
    let main = p.add(main_iseq(&[], |b| {
        b.define_method("f", f);
        b.put_self().put_int(1).fcall("f", 1).pop();
        b.put_self().put_int(1).put_str("s").fcall("f", 2).leave();
    }));
    let result = run(&p.build(main));

    assert!(error_messages(&result).is_empty());
    insta::assert_snapshot!(
        signature(&result, "Object", "f"),
        @"(Integer, ?(Integer | String)) -> (Integer | String)"
    );
}

fn keyword_method() -> subset_ruby_prof::iseq::ISeq {
    // def f(k:, opt: "d") = k
    let mut f = ISeqBuilder::new("f", IseqKind::Method)
        .locals(&["k", "opt"])
        .params(ParamShape {
            keyword: Some(KeywordShape {
                start: 0,
                required: vec!["k".to_string()],
                optional: vec![OptionalKeyword {
                    name: "opt".to_string(),
                    default: Some(LiteralValue::String("d".to_string())),
                }],
            }),
            ..ParamShape::default()
        });
    f.get_local(0).leave();
    f.finish()
}

fn kw_call(names: &[&str]) -> CallInfo {
    let mut call = CallInfo::simple("f", 0);
    call.flags.fcall = true;
    call.kw_arg = names.iter().map(|n| n.to_string()).collect();
    call
}

#[test]
fn test_keyword_parameters() {
    let mut p = ProgramBuilder::new("kw.rb");
    let f = p.add(keyword_method());
    let main = p.add(main_iseq(&[], |b| {
        b.define_method("f", f);
        b.put_self().put_int(1).send_call(kw_call(&["k"])).leave();
    }));
    let result = run(&p.build(main));

    assert!(error_messages(&result).is_empty());
    let summary = result.method("Object", false, "f").expect("f analyzed");
    assert_eq!(summary.keywords, vec!["k: Integer".to_string(), "?opt: String".to_string()]);
    insta::assert_snapshot!(summary.signature(), @"(k: Integer, ?opt: String) -> Integer");
}

#[test]
fn test_keyword_mismatches_are_reported() {
    let mut p = ProgramBuilder::new("kw.rb");
    let f = p.add(keyword_method());
    let main = p.add(main_iseq(&[], |b| {
        b.define_method("f", f);
        b.line(2).put_self().send_call(kw_call(&[])).pop();
        b.line(3)
            .put_self()
            .put_int(1)
            .put_int(2)
            .send_call(kw_call(&["k", "z"]))
            .leave();
    }));
    let result = run(&p.build(main));

    let errors = error_messages(&result);
    assert!(errors.contains(&"no argument for required keywords".to_string()), "{:?}", errors);
    assert!(errors.contains(&"unknown keyword: z".to_string()), "{:?}", errors);
}

#[test]
fn test_hash_literal_and_lookup() {
    // h = {a: 1}; p(h); p(h[:a])
    let mut p = ProgramBuilder::new("hash.rb");
    let main = p.add(main_iseq(&["h"], |b| {
        b.put_sym("a").put_int(1).new_hash(2).set_local(0);
        b.line(2).put_self().get_local(0).fcall("p", 1).pop();
        b.line(3)
            .put_self()
            .get_local(0)
            .put_sym("a")
            .send("[]", 1)
            .fcall("p", 1)
            .leave();
    }));
    let result = run(&p.build(main));

    let revealed: Vec<&str> = result.revealed.iter().map(|r| r.ty.as_str()).collect();
    assert_eq!(revealed, vec!["{a: Integer}", "Integer"]);
}

#[test]
fn test_rescue_joins_handler_value() {
    // def f
    //   begin; 1; rescue; "s"; end
    // end
    let mut p = ProgramBuilder::new("rescue.rb");
    let mut handler = ISeqBuilder::new("rescue in f", IseqKind::Rescue);
    handler.put_str("s").leave();
    let handler = p.add(handler.finish());

    let mut f = ISeqBuilder::new("f", IseqKind::Method);
    f.put_int(1).leave();
    f.catch(CatchKind::Rescue, Some(handler), 0, 1, 1, 0);
    let f = p.add(f.finish());

    let main = p.add(main_iseq(&[], |b| {
        b.define_method("f", f);
        b.put_self().fcall("f", 0).leave();
    }));
    let result = run(&p.build(main));

    assert!(error_messages(&result).is_empty());
    insta::assert_snapshot!(signature(&result, "Object", "f"), @"() -> (Integer | String)");
}

#[test]
fn test_break_leaves_the_yielding_call() {
    // def run_it = yield
    // p(run_it { break "s" })
    let mut p = ProgramBuilder::new("break.rb");
    let run_it = p.add(method("run_it", &[], 0, |b| {
        b.invoke_block(0).leave();
    }));
    let blk = p.add(block(&[], 0, |b| {
        b.put_str("s").throw(ThrowKind::Break);
    }));
    let main = p.add(main_iseq(&[], |b| {
        b.define_method("run_it", run_it);
        b.put_self()
            .put_self()
            .send_with_block("run_it", 0, blk)
            .fcall("p", 1)
            .leave();
    }));
    let result = run(&p.build(main));

    assert_eq!(result.revealed.len(), 1);
    assert_eq!(result.revealed[0].ty, "String");
}

#[test]
fn test_define_method_with_block_body() {
    // class Foo
    //   define_method(:twice) { |x| x }
    // end
    // p(Foo.new.twice(1))
    let mut p = ProgramBuilder::new("defm.rb");
    let body = p.add(block(&["x"], 1, |b| {
        b.get_local(0).leave();
    }));
    let foo = p.add(class_body("<class:Foo>", |b| {
        b.put_self()
            .put_sym("twice")
            .send_with_block("define_method", 1, body)
            .pop();
    }));
    let main = p.add(main_iseq(&[], |b| {
        b.define_class("Foo", foo, ClassDefKind::Class).pop();
        b.put_self()
            .const_ref("Foo")
            .send("new", 0)
            .put_int(1)
            .send("twice", 1)
            .fcall("p", 1)
            .leave();
    }));
    let result = run(&p.build(main));

    assert!(error_messages(&result).is_empty());
    assert_eq!(result.revealed[0].ty, "Integer");
    insta::assert_snapshot!(signature(&result, "Foo", "twice"), @"(Integer) -> Integer");
}

#[test]
fn test_instance_variable_shared_across_methods() {
    // class Counter
    //   def set = @n = 1
    //   def get = @n
    // end
    // c = Counter.new; c.set; p(c.get)
    let mut p = ProgramBuilder::new("ivar.rb");
    let set = p.add(method("set", &[], 0, |b| {
        b.put_int(1).dup().set_ivar("@n").leave();
    }));
    let get = p.add(method("get", &[], 0, |b| {
        b.get_ivar("@n").leave();
    }));
    let counter = p.add(class_body("<class:Counter>", |b| {
        b.define_method("set", set).define_method("get", get);
    }));
    let main = p.add(main_iseq(&["c"], |b| {
        b.define_class("Counter", counter, ClassDefKind::Class).pop();
        b.const_ref("Counter").send("new", 0).set_local(0);
        b.get_local(0).send("set", 0).pop();
        b.put_self().get_local(0).send("get", 0).fcall("p", 1).leave();
    }));
    let result = run(&p.build(main));

    assert_eq!(result.ivar("Counter", "@n"), Some("Integer"));
    assert_eq!(result.revealed[0].ty, "Integer");
    assert_eq!(signature(&result, "Counter", "get"), "() -> Integer");
}

#[test]
fn test_result_serializes_to_json() {
    let mut p = ProgramBuilder::new("json.rb");
    let f = p.add(method("f", &[], 0, |b| {
        b.put_int(1).leave();
    }));
    let main = p.add(main_iseq(&[], |b| {
        b.define_method("f", f);
        b.put_self().fcall("f", 0).leave();
    }));
    let result = run(&p.build(main));

    let json: serde_json::Value =
        serde_json::from_str(&result.to_json().expect("serializable")).expect("valid JSON");
    assert_eq!(json["terminated"], serde_json::json!(false));
    assert_eq!(json["methods"][0]["class"], serde_json::json!("Object"));
    assert_eq!(json["methods"][0]["name"], serde_json::json!("f"));
    assert_eq!(json["methods"][0]["ret"], serde_json::json!("Integer"));
}
