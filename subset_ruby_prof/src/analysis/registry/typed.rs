//! Built-in methods described by overload signatures.
//!
//! Signatures may mention the receiver's type parameters (`Elem`, `K`, `V`),
//! method-level variables (`U`) and `self`. The table is built once per process.

use once_cell::sync::Lazy;

use super::method_def::TypedOverload;
use crate::analysis::lattice::{builtin, BlockBody, ClassId, MethodSignature, Type, SELF_VAR};

#[derive(Debug)]
pub struct TypedEntry {
    pub klass: ClassId,
    pub singleton: bool,
    pub mid: &'static str,
    pub public: bool,
    pub overloads: Vec<TypedOverload>,
}

pub static TYPED_METHODS: Lazy<Vec<TypedEntry>> = Lazy::new(build_table);

fn sig(lead: Vec<Type>) -> MethodSignature {
    MethodSignature {
        lead,
        opt: Vec::new(),
        rest: None,
        post: Vec::new(),
        keywords: None,
        kw_rest: None,
        blk: Type::nil(),
    }
}

fn sig_opt(lead: Vec<Type>, opt: Vec<Type>) -> MethodSignature {
    MethodSignature { opt, ..sig(lead) }
}

fn sig_rest(lead: Vec<Type>, rest: Type) -> MethodSignature {
    MethodSignature {
        rest: Some(rest),
        ..sig(lead)
    }
}

/// `{ (params) -> ret }`
fn with_block(sig: MethodSignature, params: Vec<Type>, ret: Type) -> MethodSignature {
    MethodSignature {
        blk: Type::Proc(Box::new(BlockBody::Typed {
            lead: params,
            opt: Vec::new(),
            ret,
        })),
        ..sig
    }
}

fn ov(sig: MethodSignature, ret: Type) -> TypedOverload {
    TypedOverload { sig, ret }
}

fn float() -> Type {
    Type::instance(builtin::FLOAT)
}

fn symbol() -> Type {
    Type::Symbol(None)
}

fn elem() -> Type {
    Type::var("Elem")
}

fn this() -> Type {
    Type::var(SELF_VAR)
}

fn optional(ty: Type) -> Type {
    ty.join(&Type::nil())
}

struct TableBuilder {
    entries: Vec<TypedEntry>,
}

impl TableBuilder {
    fn add(&mut self, klass: ClassId, mids: &[&'static str], overloads: Vec<TypedOverload>) {
        self.add_with(klass, false, true, mids, overloads);
    }

    fn add_private(&mut self, klass: ClassId, mids: &[&'static str], overloads: Vec<TypedOverload>) {
        self.add_with(klass, false, false, mids, overloads);
    }

    fn add_with(
        &mut self,
        klass: ClassId,
        singleton: bool,
        public: bool,
        mids: &[&'static str],
        overloads: Vec<TypedOverload>,
    ) {
        for mid in mids.iter().copied() {
            self.entries.push(TypedEntry {
                klass,
                singleton,
                mid,
                public,
                overloads: overloads.clone(),
            });
        }
    }
}

fn build_table() -> Vec<TypedEntry> {
    use builtin::*;

    let mut t = TableBuilder {
        entries: Vec::new(),
    };
    let int = Type::integer;
    let str_ = Type::string;
    let bool_ = Type::bool;

    // Object
    t.add(OBJECT, &["to_s", "inspect"], vec![ov(sig(vec![]), str_())]);
    t.add(OBJECT, &["nil?"], vec![ov(sig(vec![]), Type::false_())]);
    t.add(
        OBJECT,
        &["==", "!=", "equal?", "eql?"],
        vec![ov(sig(vec![Type::Any]), bool_())],
    );
    t.add(OBJECT, &["!", "frozen?"], vec![ov(sig(vec![]), bool_())]);
    t.add(OBJECT, &["freeze", "dup", "clone", "itself"], vec![ov(sig(vec![]), this())]);
    t.add(OBJECT, &["hash", "object_id"], vec![ov(sig(vec![]), int())]);
    t.add(
        OBJECT,
        &["instance_variable_get"],
        vec![ov(sig(vec![symbol()]), Type::Any)],
    );

    // Kernel
    t.add_private(
        KERNEL,
        &["puts", "print"],
        vec![ov(sig_rest(vec![], Type::Any), Type::nil())],
    );
    t.add_private(
        KERNEL,
        &["rand"],
        vec![ov(sig(vec![]), float()), ov(sig(vec![int()]), int())],
    );
    t.add_private(
        KERNEL,
        &["require", "require_relative"],
        vec![ov(sig(vec![str_()]), bool_())],
    );
    t.add_private(
        KERNEL,
        &["format", "sprintf"],
        vec![ov(sig_rest(vec![str_()], Type::Any), str_())],
    );
    t.add_private(KERNEL, &["gets"], vec![ov(sig(vec![]), optional(str_()))]);
    t.add_private(KERNEL, &["Integer"], vec![ov(sig(vec![Type::Any]), int())]);
    t.add_private(KERNEL, &["String"], vec![ov(sig(vec![Type::Any]), str_())]);
    t.add_private(KERNEL, &["Float"], vec![ov(sig(vec![Type::Any]), float())]);

    // NilClass, TrueClass, FalseClass
    t.add(NIL, &["nil?"], vec![ov(sig(vec![]), Type::true_())]);
    t.add(NIL, &["to_s"], vec![ov(sig(vec![]), str_())]);
    t.add(NIL, &["to_a"], vec![ov(sig(vec![]), Type::array(vec![], Type::Bottom))]);
    for klass in [TRUE, FALSE] {
        t.add(klass, &["&", "|", "^"], vec![ov(sig(vec![Type::Any]), bool_())]);
    }

    // Integer
    t.add(
        INTEGER,
        &["+", "-", "*", "/", "%", "**"],
        vec![ov(sig(vec![int()]), int()), ov(sig(vec![float()]), float())],
    );
    t.add(
        INTEGER,
        &["<", ">", "<=", ">="],
        vec![ov(sig(vec![int()]), bool_()), ov(sig(vec![float()]), bool_())],
    );
    t.add(INTEGER, &["-@", "succ", "pred", "abs", "to_i"], vec![ov(sig(vec![]), int())]);
    t.add(INTEGER, &["to_f"], vec![ov(sig(vec![]), float())]);
    t.add(INTEGER, &["to_s"], vec![ov(sig_opt(vec![], vec![int()]), str_())]);
    t.add(INTEGER, &["zero?", "even?", "odd?"], vec![ov(sig(vec![]), bool_())]);
    t.add(
        INTEGER,
        &["times"],
        vec![ov(with_block(sig(vec![]), vec![int()], Type::Any), int())],
    );
    t.add(
        INTEGER,
        &["upto", "downto"],
        vec![ov(with_block(sig(vec![int()]), vec![int()], Type::Any), int())],
    );

    // Float
    t.add(
        FLOAT,
        &["+", "-", "*", "/"],
        vec![ov(sig(vec![int()]), float()), ov(sig(vec![float()]), float())],
    );
    t.add(
        FLOAT,
        &["<", ">", "<=", ">="],
        vec![ov(sig(vec![int()]), bool_()), ov(sig(vec![float()]), bool_())],
    );
    t.add(FLOAT, &["to_i", "round", "floor", "ceil"], vec![ov(sig(vec![]), int())]);
    t.add(FLOAT, &["to_f", "abs"], vec![ov(sig(vec![]), float())]);
    t.add(FLOAT, &["to_s"], vec![ov(sig(vec![]), str_())]);

    // String
    t.add(STRING, &["+", "<<"], vec![ov(sig(vec![str_()]), str_())]);
    t.add(STRING, &["*"], vec![ov(sig(vec![int()]), str_())]);
    t.add(
        STRING,
        &["upcase", "downcase", "capitalize", "strip", "chomp", "reverse", "to_s"],
        vec![ov(sig(vec![]), str_())],
    );
    t.add(STRING, &["size", "length", "to_i"], vec![ov(sig(vec![]), int())]);
    t.add(STRING, &["to_sym", "intern"], vec![ov(sig(vec![]), symbol())]);
    t.add(STRING, &["empty?"], vec![ov(sig(vec![]), bool_())]);
    t.add(
        STRING,
        &["include?", "start_with?", "end_with?"],
        vec![ov(sig(vec![str_()]), bool_())],
    );
    t.add(
        STRING,
        &["split"],
        vec![ov(sig_opt(vec![], vec![str_()]), Type::array_of(str_()))],
    );
    t.add(STRING, &["chars"], vec![ov(sig(vec![]), Type::array_of(str_()))]);
    t.add(
        STRING,
        &["=~"],
        vec![ov(sig(vec![Type::instance(REGEXP)]), optional(int()))],
    );

    // Symbol
    t.add(SYMBOL, &["to_s", "id2name"], vec![ov(sig(vec![]), str_())]);
    t.add(SYMBOL, &["to_sym"], vec![ov(sig(vec![]), this())]);

    // Array[Elem]
    t.add(
        ARRAY,
        &["each"],
        vec![ov(with_block(sig(vec![]), vec![elem()], Type::Any), this())],
    );
    t.add(
        ARRAY,
        &["each_with_index"],
        vec![ov(with_block(sig(vec![]), vec![elem(), int()], Type::Any), this())],
    );
    t.add(
        ARRAY,
        &["map", "collect"],
        vec![ov(
            with_block(sig(vec![]), vec![elem()], Type::var("U")),
            Type::array_of(Type::var("U")),
        )],
    );
    t.add(
        ARRAY,
        &["select", "filter", "reject"],
        vec![ov(
            with_block(sig(vec![]), vec![elem()], Type::Any),
            Type::array_of(elem()),
        )],
    );
    t.add(ARRAY, &["size", "length"], vec![ov(sig(vec![]), int())]);
    t.add(ARRAY, &["empty?"], vec![ov(sig(vec![]), bool_())]);
    t.add(ARRAY, &["include?"], vec![ov(sig(vec![Type::Any]), bool_())]);
    t.add(ARRAY, &["last", "sample"], vec![ov(sig(vec![]), optional(elem()))]);
    t.add(
        ARRAY,
        &["sort", "reverse", "compact", "uniq", "flatten"],
        vec![ov(sig(vec![]), Type::array_of(elem()))],
    );
    t.add(ARRAY, &["to_a"], vec![ov(sig(vec![]), this())]);
    t.add(ARRAY, &["join"], vec![ov(sig_opt(vec![], vec![str_()]), str_())]);
    t.add(ARRAY, &["unshift"], vec![ov(sig_rest(vec![], elem()), this())]);

    // Hash[K, V]
    let k = || Type::var("K");
    let v = || Type::var("V");
    t.add(
        HASH,
        &["each", "each_pair"],
        vec![ov(with_block(sig(vec![]), vec![k(), v()], Type::Any), this())],
    );
    t.add(HASH, &["size", "length", "count"], vec![ov(sig(vec![]), int())]);
    t.add(HASH, &["keys"], vec![ov(sig(vec![]), Type::array_of(k()))]);
    t.add(HASH, &["values"], vec![ov(sig(vec![]), Type::array_of(v()))]);
    t.add(
        HASH,
        &["key?", "has_key?", "include?", "member?"],
        vec![ov(sig(vec![Type::Any]), bool_())],
    );
    t.add(HASH, &["store"], vec![ov(sig(vec![k(), v()]), v())]);
    t.add(HASH, &["fetch"], vec![ov(sig(vec![k()]), v())]);
    t.add(HASH, &["delete"], vec![ov(sig(vec![k()]), optional(v()))]);
    t.add(HASH, &["empty?"], vec![ov(sig(vec![]), bool_())]);
    t.add(HASH, &["to_h"], vec![ov(sig(vec![]), this())]);

    // Range[Elem]
    t.add(
        RANGE,
        &["each"],
        vec![ov(with_block(sig(vec![]), vec![elem()], Type::Any), this())],
    );
    t.add(
        RANGE,
        &["map"],
        vec![ov(
            with_block(sig(vec![]), vec![elem()], Type::var("U")),
            Type::array_of(Type::var("U")),
        )],
    );
    t.add(RANGE, &["to_a"], vec![ov(sig(vec![]), Type::array_of(elem()))]);
    t.add(RANGE, &["first", "begin", "last", "end"], vec![ov(sig(vec![]), elem())]);

    // Module, Exception, Proc, IO, Regexp, MatchData, Comparable
    t.add_private(
        MODULE,
        &["included", "extended", "prepended", "inherited"],
        vec![ov(sig(vec![Type::Any]), Type::nil())],
    );
    t.add(MODULE, &["name", "to_s"], vec![ov(sig(vec![]), str_())]);
    t.add(EXCEPTION, &["message", "to_s"], vec![ov(sig(vec![]), str_())]);
    t.add(PROC, &["arity"], vec![ov(sig(vec![]), int())]);
    t.add(PROC, &["lambda?"], vec![ov(sig(vec![]), bool_())]);
    t.add(
        IO,
        &["puts", "print"],
        vec![ov(sig_rest(vec![], Type::Any), Type::nil())],
    );
    t.add(IO, &["write"], vec![ov(sig_rest(vec![], Type::Any), int())]);
    t.add(
        REGEXP,
        &["match"],
        vec![ov(sig(vec![str_()]), optional(Type::instance(MATCH_DATA)))],
    );
    t.add(MATCH_DATA, &["[]"], vec![ov(sig(vec![int()]), optional(str_()))]);
    t.add(
        COMPARABLE,
        &["between?"],
        vec![ov(sig(vec![Type::Any, Type::Any]), bool_())],
    );

    t.entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(klass: ClassId, mid: &str) -> &'static TypedEntry {
        TYPED_METHODS
            .iter()
            .find(|e| e.klass == klass && e.mid == mid)
            .unwrap()
    }

    #[test]
    fn test_integer_plus_has_two_overloads() {
        let entry = find(builtin::INTEGER, "+");
        assert_eq!(entry.overloads.len(), 2);
        assert_eq!(entry.overloads[0].ret, Type::integer());
    }

    #[test]
    fn test_array_map_takes_a_typed_block() {
        let entry = find(builtin::ARRAY, "map");
        let blk = &entry.overloads[0].sig.blk;
        assert!(matches!(blk, Type::Proc(body) if matches!(body.as_ref(), BlockBody::Typed { .. })));
    }

    #[test]
    fn test_kernel_output_is_private() {
        assert!(!find(builtin::KERNEL, "puts").public);
        assert!(find(builtin::IO, "puts").public);
    }
}
