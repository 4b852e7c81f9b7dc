//! Human-readable rendering of abstract values.
//!
//! Names follow the signature notation used in results and diagnostics:
//!
//! ```text
//! Integer              instance
//! singleton(Foo)       class object
//! [Integer, String]    array with a known prefix
//! Array[Integer]       array of unknown length
//! {a: Integer}         hash with symbol keys
//! Hash[K, V]           other hashes
//! ^(Integer) -> String typed block
//! String?              optional
//! (Integer | String)   union
//! ```

use super::ClassRegistry;
use crate::analysis::lattice::{builtin, BlockBody, ClassId, Elements, Type};

impl ClassRegistry {
    /// Renders a global type. `show_untyped` keeps `untyped` members of unions.
    pub fn screen_name(&self, ty: &Type, show_untyped: bool) -> String {
        match ty {
            Type::Bottom => "bot".to_string(),
            Type::Any => "untyped".to_string(),
            Type::Void => "void".to_string(),
            Type::Class(klass) => format!("singleton({})", self.path(*klass)),
            Type::Instance { klass, .. } => self.instance_name(*klass),
            Type::Symbol(Some(sym)) => format!(":{}", sym),
            Type::Symbol(None) => "Symbol".to_string(),
            Type::Literal { base, .. } => self.instance_name(*base),
            Type::Proc(body) => match body.as_ref() {
                BlockBody::Typed { lead, opt, ret } => {
                    let mut params: Vec<String> =
                        lead.iter().map(|t| self.screen_name(t, show_untyped)).collect();
                    params.extend(
                        opt.iter()
                            .map(|t| format!("?{}", self.screen_name(t, show_untyped))),
                    );
                    format!(
                        "^({}) -> {}",
                        params.join(", "),
                        self.screen_name(ret, show_untyped)
                    )
                }
                _ => "Proc".to_string(),
            },
            Type::Local { kind, base, .. } => {
                self.container_name(*base, &Elements::dummy(*kind), show_untyped)
            }
            Type::Container(c) => self.container_name(c.base, &c.elems, show_untyped),
            Type::Var(name) => name.clone(),
            Type::Union(_) => self.union_name(ty, show_untyped),
        }
    }

    fn instance_name(&self, klass: ClassId) -> String {
        match klass {
            builtin::NIL => "nil".to_string(),
            builtin::TRUE => "true".to_string(),
            builtin::FALSE => "false".to_string(),
            _ => self.path(klass),
        }
    }

    fn container_name(&self, base: ClassId, elems: &Elements, show_untyped: bool) -> String {
        let name = |t: &Type| self.screen_name(t, show_untyped);
        match elems {
            Elements::Array(a) if a.rest.is_bottom() && base == builtin::ARRAY => {
                let lead: Vec<String> = a.lead.iter().map(name).collect();
                format!("[{}]", lead.join(", "))
            }
            Elements::Array(a) => format!("{}[{}]", self.path(base), name(&a.squash())),
            Elements::Hash(h) => {
                if h.map.is_empty() {
                    return "{}".to_string();
                }
                let all_symbols = h
                    .map
                    .keys()
                    .all(|k| matches!(k, Type::Symbol(Some(_))));
                if all_symbols && base == builtin::HASH {
                    let fields: Vec<String> = h
                        .map
                        .iter()
                        .map(|(k, v)| match k {
                            Type::Symbol(Some(sym)) => format!("{}: {}", sym, name(v)),
                            _ => name(v),
                        })
                        .collect();
                    format!("{{{}}}", fields.join(", "))
                } else {
                    let (k, v) = h.squash();
                    format!("{}[{}, {}]", self.path(base), name(&k), name(&v))
                }
            }
            Elements::Cell(c) => {
                if c.elems.is_empty() {
                    return self.path(base);
                }
                let params: Vec<String> = c.elems.iter().map(name).collect();
                format!("{}[{}]", self.path(base), params.join(", "))
            }
        }
    }

    fn union_name(&self, ty: &Type, show_untyped: bool) -> String {
        let mut members = ty.children();
        let optional = members.iter().any(Type::is_nil);
        members.retain(|t| !t.is_nil());

        let has_true = members.contains(&Type::true_());
        let has_false = members.contains(&Type::false_());
        let mut names: Vec<String> = Vec::new();
        if has_true && has_false {
            members.retain(|t| *t != Type::true_() && *t != Type::false_());
            names.push("bool".to_string());
        }
        if !show_untyped {
            members.retain(|t| !t.is_any());
        }
        names.extend(members.iter().map(|t| self.screen_name(t, show_untyped)));
        names.sort();
        names.dedup();

        let body = match names.len() {
            0 => return "nil".to_string(),
            1 => names.remove(0),
            _ => format!("({})", names.join(" | ")),
        };
        if optional {
            format!("{}?", body)
        } else {
            body
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn screen(ty: &Type) -> String {
        ClassRegistry::new().screen_name(ty, false)
    }

    #[test]
    fn test_screen_simple_names() {
        insta::assert_snapshot!(screen(&Type::integer()), @"Integer");
        insta::assert_snapshot!(screen(&Type::nil()), @"nil");
        insta::assert_snapshot!(screen(&Type::symbol("sym")), @":sym");
        insta::assert_snapshot!(screen(&Type::Any), @"untyped");
        insta::assert_snapshot!(screen(&Type::Class(builtin::STRING)), @"singleton(String)");
    }

    #[test]
    fn test_screen_unions() {
        insta::assert_snapshot!(screen(&Type::integer().join(&Type::string())), @"(Integer | String)");
        insta::assert_snapshot!(screen(&Type::string().join(&Type::nil())), @"String?");
        insta::assert_snapshot!(screen(&Type::bool()), @"bool");
        let three = Type::integer().join(&Type::string()).join(&Type::nil());
        insta::assert_snapshot!(screen(&three), @"(Integer | String)?");
    }

    #[test]
    fn test_screen_containers() {
        let tuple = Type::array(vec![Type::integer(), Type::string()], Type::Bottom);
        insta::assert_snapshot!(screen(&tuple), @"[Integer, String]");
        insta::assert_snapshot!(screen(&Type::array_of(Type::integer())), @"Array[Integer]");
        insta::assert_snapshot!(screen(&Type::array(vec![], Type::Bottom)), @"[]");

        let mut map = BTreeMap::new();
        map.insert(Type::symbol("a"), Type::integer());
        insta::assert_snapshot!(screen(&Type::hash(map)), @"{a: Integer}");
        insta::assert_snapshot!(
            screen(&Type::hash_of(Type::Symbol(None), Type::integer())),
            @"Hash[Symbol, Integer]"
        );
        insta::assert_snapshot!(screen(&Type::hash(BTreeMap::new())), @"{}");
        insta::assert_snapshot!(
            screen(&Type::cell(builtin::RANGE, vec![Type::integer()])),
            @"Range[Integer]"
        );
    }

    #[test]
    fn test_screen_typed_block() {
        let blk = Type::Proc(Box::new(BlockBody::Typed {
            lead: vec![Type::integer()],
            opt: vec![],
            ret: Type::string(),
        }));
        insta::assert_snapshot!(screen(&blk), @"^(Integer) -> String");
    }

    #[test]
    fn test_screen_nested_class_path() {
        let mut registry = ClassRegistry::new();
        let outer = registry.new_class(
            None,
            "Outer",
            Some(builtin::OBJECT),
            super::super::ClassKind::Class,
        );
        let inner = registry.new_class(
            Some(outer),
            "Inner",
            Some(builtin::OBJECT),
            super::super::ClassKind::Class,
        );
        insta::assert_snapshot!(registry.screen_name(&Type::instance(inner), false), @"Outer::Inner");
    }
}
