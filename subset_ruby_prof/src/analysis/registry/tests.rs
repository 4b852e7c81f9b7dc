use super::*;

fn iseq_method(owner: ClassId) -> MethodDef {
    MethodDef::new(
        MethodKind::AttrReader {
            ivar: "@x".to_string(),
        },
        true,
        owner,
        false,
    )
}

fn module(registry: &mut ClassRegistry, name: &str) -> ClassId {
    registry.new_class(None, name, None, ClassKind::Module)
}

fn class(registry: &mut ClassRegistry, name: &str, superclass: ClassId) -> ClassId {
    registry.new_class(None, name, Some(superclass), ClassKind::Class)
}

fn owner_of(registry: &ClassRegistry, ids: Option<Vec<MethodId>>) -> Option<ClassId> {
    ids.and_then(|ids| ids.first().map(|id| registry.method(*id).owner))
}

#[test]
fn test_bootstrap_slots_are_named() {
    let registry = ClassRegistry::new();
    assert_eq!(registry.path(builtin::INTEGER), "Integer");
    assert_eq!(registry.path(builtin::ENUMERATOR), "Enumerator");
    assert_eq!(
        registry.get_constant(builtin::OBJECT, "Array"),
        Some(Type::Class(builtin::ARRAY))
    );
    assert_eq!(registry.type_params(builtin::HASH), vec!["K", "V"]);
}

#[test]
fn test_kernel_methods_reach_every_object() {
    let registry = ClassRegistry::new();
    assert!(registry.search_method(builtin::INTEGER, false, "puts").is_some());
    assert!(registry.search_method(builtin::INTEGER, false, "no_such_method").is_none());
}

#[test]
fn test_mixin_resolution_order() {
    let mut registry = ClassRegistry::new();
    let m1 = module(&mut registry, "M1");
    let m2 = module(&mut registry, "M2");
    let pre = module(&mut registry, "Pre");
    let base = class(&mut registry, "Base", builtin::OBJECT);
    let klass = class(&mut registry, "Klass", base);

    registry.add_method(base, false, "foo", iseq_method(base));
    registry.add_method(m1, false, "foo", iseq_method(m1));
    assert!(registry.mix_module(MixKind::Include, klass, false, m1));
    // Included module beats the superclass.
    assert_eq!(owner_of(&registry, registry.search_method(klass, false, "foo")), Some(m1));

    registry.add_method(m2, false, "foo", iseq_method(m2));
    registry.mix_module(MixKind::Include, klass, false, m2);
    // Most recently included first.
    assert_eq!(owner_of(&registry, registry.search_method(klass, false, "foo")), Some(m2));

    registry.add_method(klass, false, "foo", iseq_method(klass));
    assert_eq!(owner_of(&registry, registry.search_method(klass, false, "foo")), Some(klass));

    registry.add_method(pre, false, "foo", iseq_method(pre));
    registry.mix_module(MixKind::Prepend, klass, false, pre);
    assert_eq!(owner_of(&registry, registry.search_method(klass, false, "foo")), Some(pre));
}

#[test]
fn test_mixing_a_class_is_rejected() {
    let mut registry = ClassRegistry::new();
    let klass = class(&mut registry, "Foo", builtin::OBJECT);
    assert!(!registry.mix_module(MixKind::Include, klass, false, builtin::STRING));
}

#[test]
fn test_super_methods_skip_past_current_owner() {
    let mut registry = ClassRegistry::new();
    let base = class(&mut registry, "Base", builtin::OBJECT);
    let derived = class(&mut registry, "Derived", base);
    registry.add_method(base, false, "run", iseq_method(base));
    registry.add_method(derived, false, "run", iseq_method(derived));

    let found = registry.super_methods(derived, false, derived, "run");
    assert_eq!(owner_of(&registry, found), Some(base));
    assert!(registry.super_methods(derived, false, base, "run").is_none());
}

#[test]
fn test_singleton_lookup_falls_back_to_class_methods() {
    let mut registry = ClassRegistry::new();
    let klass = class(&mut registry, "Foo", builtin::OBJECT);
    // `new` lives on Object's singleton side.
    assert!(registry.search_method(klass, true, "new").is_some());
    // `attr_reader` is a Module instance method.
    assert!(registry.search_method(klass, true, "attr_reader").is_some());
    let m = module(&mut registry, "M");
    assert!(registry.search_method(m, true, "module_function").is_some());
}

#[test]
fn test_constant_lookup_lexical_then_ancestors() {
    let mut registry = ClassRegistry::new();
    let base = class(&mut registry, "Base", builtin::OBJECT);
    registry.add_constant(base, "LIMIT", Type::integer());
    let outer = module(&mut registry, "Outer");
    registry.add_constant(outer, "NAME", Type::string());
    let derived = registry.new_class(Some(outer), "Derived", Some(base), ClassKind::Class);

    assert_eq!(registry.path(derived), "Outer::Derived");
    assert_eq!(
        registry.search_constant(&[derived, outer], "NAME"),
        Some(Type::string())
    );
    assert_eq!(
        registry.search_constant(&[derived, outer], "LIMIT"),
        Some(Type::integer())
    );
    assert_eq!(
        registry.search_constant(&[derived, outer], "Base"),
        Some(Type::Class(base))
    );
    assert_eq!(registry.search_constant(&[derived], "MISSING"), None);
}

#[test]
fn test_constant_lookup_skips_mixed_in_modules() {
    let mut registry = ClassRegistry::new();
    let m = module(&mut registry, "Limits");
    registry.add_constant(m, "MAX", Type::integer());
    let base = class(&mut registry, "Base", builtin::OBJECT);
    assert!(registry.mix_module(MixKind::Include, base, false, m));
    let derived = class(&mut registry, "Derived", base);

    assert_eq!(registry.search_constant(&[derived], "MAX"), None);
    assert_eq!(registry.search_constant(&[m], "MAX"), Some(Type::integer()));
}

#[test]
fn test_adding_a_method_keeps_earlier_candidates() {
    let mut registry = ClassRegistry::new();
    let klass = class(&mut registry, "Foo", builtin::OBJECT);
    let def = MethodDef::new(
        MethodKind::AttrWriter {
            ivar: "@x".to_string(),
        },
        true,
        klass,
        false,
    );
    let first = registry.add_method(klass, false, "x", def);
    let second = registry.add_method(klass, false, "x", iseq_method(klass));

    assert_eq!(
        registry.search_method(klass, false, "x"),
        Some(vec![first, second])
    );
}

#[test]
fn test_constant_redefinition_is_reported() {
    let mut registry = ClassRegistry::new();
    assert!(!registry.add_constant(builtin::OBJECT, "X", Type::integer()));
    assert!(registry.add_constant(builtin::OBJECT, "X", Type::string()));
}

#[test]
fn test_empty_container_for_generic_classes() {
    let mut registry = ClassRegistry::new();
    assert_eq!(
        registry.empty_container(builtin::ARRAY),
        Some(Type::array(vec![], Type::Bottom))
    );
    assert_eq!(
        registry.empty_container(builtin::RANGE),
        Some(Type::cell(builtin::RANGE, vec![Type::Bottom]))
    );
    assert_eq!(registry.empty_container(builtin::STRING), None);

    let list = class(&mut registry, "List", builtin::ARRAY);
    assert!(matches!(
        registry.empty_container(list),
        Some(Type::Container(c)) if c.base == list
    ));
}

#[test]
fn test_conforms_through_superclass_and_mixin() {
    let mut registry = ClassRegistry::new();
    assert!(registry.conforms(builtin::INTEGER, builtin::NUMERIC));
    assert!(registry.conforms(builtin::INTEGER, builtin::COMPARABLE));
    assert!(!registry.conforms(builtin::STRING, builtin::NUMERIC));

    let m = module(&mut registry, "M");
    assert!(registry.conforms(m, builtin::OBJECT));
}
