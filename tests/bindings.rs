use std::{collections::HashSet, rc::Rc};

use narcissus_embed::{
    BindingError, Bindings, EngineConfig, EngineScope, ExecutionContext, FailureKind,
    GlobalStore, GlobalStoreRef, ScriptErrorKind, SharedBuffer, Value,
};

fn context() -> ExecutionContext {
    ExecutionContext::with_sinks(EngineConfig::default(), SharedBuffer::new(), SharedBuffer::new())
}

fn context_with_globals(entries: &[(&str, i64)]) -> (ExecutionContext, GlobalStoreRef) {
    let mut ctx = context();
    let store = GlobalStore::new();
    for (name, value) in entries {
        store.borrow_mut().insert(*name, Value::int(*value));
    }
    ctx.set_global_store(Some(Rc::clone(&store)));
    (ctx, store)
}

fn keys(bindings: &Bindings) -> Vec<String> {
    bindings
        .keys()
        .expect("keys should be listed")
        .into_iter()
        .collect()
}

#[test]
fn get_returns_value_written_by_put() {
    let ctx = context();
    let bindings = ctx.engine_bindings();

    assert_eq!(bindings.put("answer", Value::int(41)).unwrap(), None);
    assert_eq!(bindings.get("answer").unwrap(), Some(Value::int(41)));

    let prior = bindings.put("answer", Value::int(42)).unwrap();
    assert_eq!(prior, Some(Value::int(41)));
    assert_eq!(bindings.get("answer").unwrap(), Some(Value::int(42)));

    bindings.remove("answer").unwrap();
    assert_eq!(bindings.get("answer").unwrap(), None);
}

#[test]
fn missing_names_resolve_to_none() {
    let (ctx, _store) = context_with_globals(&[("g", 1)]);
    let bindings = ctx.engine_bindings();
    assert_eq!(bindings.get("nowhere").unwrap(), None);
    assert_eq!(bindings.remove("nowhere").unwrap(), None);
}

#[test]
fn put_on_global_only_name_writes_through() {
    let (ctx, store) = context_with_globals(&[("limit", 10)]);
    let bindings = ctx.engine_bindings();

    let prior = bindings.put("limit", Value::int(20)).unwrap();
    assert_eq!(prior, Some(Value::int(10)));

    assert!(!bindings.is_local("limit").unwrap());
    assert_eq!(store.borrow().get("limit"), Some(&Value::int(20)));

    let other = Bindings::new(ctx.new_scope());
    assert_eq!(other.get("limit").unwrap(), Some(Value::int(20)));
}

#[test]
fn local_definitions_win_over_globals() {
    let (ctx, store) = context_with_globals(&[("shared", 1)]);
    ctx.scope().borrow_mut().define("shared", Value::int(2));
    let bindings = ctx.engine_bindings();

    assert_eq!(bindings.get("shared").unwrap(), Some(Value::int(2)));
    bindings.put("shared", Value::int(3)).unwrap();

    assert_eq!(bindings.get_local("shared").unwrap(), Some(Value::int(3)));
    assert_eq!(store.borrow().get("shared"), Some(&Value::int(1)));
}

#[test]
fn key_set_is_union_without_duplicates() {
    let (ctx, _store) = context_with_globals(&[("c", 3)]);
    let disjoint = ctx.engine_bindings();
    disjoint.put("a", Value::int(1)).unwrap();
    disjoint.put("b", Value::int(2)).unwrap();
    assert_eq!(keys(&disjoint), vec!["a", "b", "c"]);
    assert_eq!(disjoint.len().unwrap(), 3);

    let (ctx, _store) = context_with_globals(&[("a", 10), ("b", 20)]);
    ctx.scope().borrow_mut().define("a", Value::int(1));
    let overlapping = ctx.engine_bindings();
    assert_eq!(keys(&overlapping), vec!["a", "b"]);
    assert_eq!(overlapping.len().unwrap(), 2);

    let (ctx, _store) = context_with_globals(&[("x", 1), ("y", 2)]);
    let global_only = ctx.engine_bindings();
    assert_eq!(keys(&global_only), vec!["x", "y"]);
    assert!(global_only.local_keys().unwrap().is_empty());
    assert!(!global_only.is_empty().unwrap());
}

#[test]
fn contains_key_consults_union_view() {
    let (ctx, _store) = context_with_globals(&[("g", 1)]);
    let bindings = ctx.engine_bindings();
    bindings.put("l", Value::int(2)).unwrap();

    assert!(bindings.contains_key("g").unwrap());
    assert!(bindings.contains_key("l").unwrap());
    assert!(!bindings.contains_key("other").unwrap());
    assert!(!bindings.contains_key(&None::<&str>).unwrap());
    assert!(!bindings.contains_key(&Value::int(1)).unwrap());
}

#[test]
fn remove_global_only_name_deletes_it_globally() {
    let (ctx, store) = context_with_globals(&[("session", 7)]);
    let bindings = ctx.engine_bindings();

    let removed = bindings.remove("session").unwrap();
    assert_eq!(removed, Some(Value::int(7)));
    assert_eq!(bindings.get("session").unwrap(), None);
    assert!(!store.borrow().contains_key("session"));
    assert_eq!(ctx.scope().borrow().revision(), 1);
}

#[test]
fn remove_shadowing_local_falls_back_to_global() {
    let (ctx, store) = context_with_globals(&[("mode", 1)]);
    ctx.scope().borrow_mut().define("mode", Value::int(2));
    let bindings = ctx.engine_bindings();

    assert_eq!(bindings.remove("mode").unwrap(), Some(Value::int(2)));
    assert_eq!(bindings.get("mode").unwrap(), Some(Value::int(1)));
    assert!(store.borrow().contains_key("mode"));
    assert_eq!(ctx.scope().borrow().revision(), 0);
}

#[test]
fn remove_local_never_touches_global_store() {
    let (ctx, store) = context_with_globals(&[("g", 1)]);
    let bindings = ctx.engine_bindings();
    assert_eq!(bindings.remove_local("g").unwrap(), None);
    assert!(store.borrow().contains_key("g"));
}

#[test]
fn null_and_non_string_keys_are_rejected_without_mutation() {
    let (ctx, store) = context_with_globals(&[("g", 1)]);
    let bindings = ctx.engine_bindings();
    bindings.put("l", Value::int(2)).unwrap();

    assert!(matches!(
        bindings.get(&None::<&str>),
        Err(BindingError::NullKey)
    ));
    assert!(matches!(
        bindings.get(&Value::int(5)),
        Err(BindingError::InvalidKeyType { found: "Int" })
    ));
    assert!(matches!(
        bindings.put(&Value::unit(), Value::int(9)),
        Err(BindingError::NullKey)
    ));
    assert!(matches!(
        bindings.put(&Value::bool(true), Value::int(9)),
        Err(BindingError::InvalidKeyType { found: "Bool" })
    ));
    assert!(matches!(
        bindings.remove(&None::<String>),
        Err(BindingError::NullKey)
    ));
    assert!(matches!(
        bindings.remove(&Value::float(1.5)),
        Err(BindingError::InvalidKeyType { found: "Float" })
    ));

    assert_eq!(keys(&bindings), vec!["l", "g"]);
    assert_eq!(store.borrow().len(), 1);
    assert_eq!(bindings.get("l").unwrap(), Some(Value::int(2)));
}

#[test]
fn string_values_are_accepted_as_keys() {
    let ctx = context();
    let bindings = ctx.engine_bindings();
    bindings.put(&Value::string("name"), Value::string("narcissus")).unwrap();
    assert_eq!(
        bindings.get(&Some("name")).unwrap(),
        Some(Value::string("narcissus"))
    );
}

#[test]
fn contains_value_sees_local_and_global_values() {
    let (ctx, _store) = context_with_globals(&[("g", 100)]);
    let bindings = ctx.engine_bindings();
    bindings.put("l", Value::string("local")).unwrap();
    bindings.put("nothing", Value::unit()).unwrap();

    assert!(bindings.contains_value(&Value::string("local")).unwrap());
    assert!(bindings.contains_value(&Value::int(100)).unwrap());
    assert!(bindings.contains_value(&Value::unit()).unwrap());
    assert!(!bindings.contains_value(&Value::int(7)).unwrap());
}

#[test]
fn put_all_applies_every_entry() {
    let (ctx, store) = context_with_globals(&[("g", 0)]);
    let bindings = ctx.engine_bindings();
    bindings
        .put_all(vec![
            ("a".to_string(), Value::int(1)),
            ("g".to_string(), Value::int(2)),
        ])
        .unwrap();

    assert_eq!(bindings.get_local("a").unwrap(), Some(Value::int(1)));
    assert_eq!(store.borrow().get("g"), Some(&Value::int(2)));
}

#[test]
fn clear_empties_local_and_global_names() {
    let (ctx, store) = context_with_globals(&[("both", 1), ("global", 2)]);
    ctx.scope().borrow_mut().define("both", Value::int(3));
    let bindings = ctx.engine_bindings();
    bindings.put("local", Value::int(4)).unwrap();

    bindings.clear().unwrap();

    assert!(bindings.is_empty().unwrap());
    assert!(store.borrow().is_empty());
}

#[test]
fn values_and_entries_reflect_effective_values() {
    let (ctx, _store) = context_with_globals(&[("a", 1), ("b", 2)]);
    ctx.scope().borrow_mut().define("a", Value::int(10));
    let bindings = ctx.engine_bindings();

    assert_eq!(bindings.values().unwrap(), vec![Value::int(10), Value::int(2)]);

    let entries = bindings.entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries.get("a"), Some(&Value::int(10)));
    assert_eq!(entries.get("b"), Some(&Value::int(2)));

    bindings.put("c", Value::int(3)).unwrap();
    assert!(!entries.contains_key("c"));
    let names: Vec<&str> = entries.iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn overlays_are_equal_only_over_the_same_scope() {
    let ctx = context();
    let first = ctx.engine_bindings();
    let second = ctx.engine_bindings();
    let separate = Bindings::new(ctx.new_scope());

    assert_eq!(first, second);
    assert_ne!(first, separate);

    let mut set = HashSet::new();
    set.insert(first.clone());
    set.insert(second);
    set.insert(separate);
    assert_eq!(set.len(), 2);
}

#[test]
fn scope_in_use_surfaces_as_illegal_state() {
    let ctx = context();
    let bindings = ctx.engine_bindings();
    let _guard = ctx.scope().borrow_mut();

    match bindings.get("x") {
        Err(BindingError::IllegalState { message, source }) => {
            assert!(message.contains("x"));
            assert_eq!(source.kind(), ScriptErrorKind::Internal);
            assert!(source.cause().is_some());
        }
        other => panic!("expected IllegalState, got {other:?}"),
    }
}

#[test]
fn global_store_in_use_surfaces_as_illegal_state() {
    let (ctx, store) = context_with_globals(&[("g", 1)]);
    let bindings = ctx.engine_bindings();
    let _guard = store.borrow_mut();

    let err = bindings.put("g", Value::int(2)).unwrap_err();
    assert!(matches!(err, BindingError::IllegalState { .. }));
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn detached_global_store_hides_global_names() {
    let (mut ctx, _store) = context_with_globals(&[("g", 1)]);
    let bindings = ctx.engine_bindings();
    assert!(bindings.contains_key("g").unwrap());

    ctx.set_global_store(None);
    assert_eq!(bindings.get("g").unwrap(), None);
    bindings.put("g", Value::int(5)).unwrap();
    assert!(bindings.is_local("g").unwrap());
}

#[test]
fn global_slot_fails_once_its_store_is_detached() {
    let (mut ctx, store) = context_with_globals(&[("g", 1)]);
    let slot = EngineScope::resolve(ctx.scope(), "g")
        .unwrap()
        .expect("global name resolves");
    assert!(!slot.is_local());

    ctx.set_global_store(None);

    let failure = slot.store(ctx.scope(), Value::int(2)).unwrap_err();
    assert_eq!(failure.kind(), &FailureKind::Internal);
    assert!(failure.message().contains("`g`"));
    assert_eq!(store.borrow().get("g"), Some(&Value::int(1)));
    assert!(!ctx.engine_bindings().is_local("g").unwrap());
}
