//! Per-context class cache tests

mod common;

use common::Harness;
use otter_bridge::{ClassObjects, ExecutingContext, ScriptResult, TypeDescriptor, Value};

static EVENT_TARGET: TypeDescriptor = TypeDescriptor::new("EventTarget");
static NODE: TypeDescriptor = TypeDescriptor::new("Node").with_parent(&EVENT_TARGET);
static ELEMENT: TypeDescriptor = TypeDescriptor::new("Element").with_parent(&NODE);

static BLOB: TypeDescriptor = TypeDescriptor::new("Blob");
static FILE: TypeDescriptor = TypeDescriptor::new("File")
    .with_parent(&BLOB)
    .with_installer(install_file);
static BROKEN: TypeDescriptor = TypeDescriptor::new("Broken").with_installer(install_broken);

fn install_file(context: &ExecutingContext, objects: &ClassObjects) -> ScriptResult<()> {
    // Same type again must hit the cache, another type initializes normally
    assert_eq!(context.constructor_for(&FILE)?, objects.constructor);
    context.constructor_for(&EVENT_TARGET)?;
    Ok(())
}

fn install_broken(_: &ExecutingContext, _: &ClassObjects) -> ScriptResult<()> {
    Err(Value::string("installer failed"))
}

#[test]
fn test_constructor_is_memoized() {
    let harness = Harness::new();
    let context = harness.runtime.create_context();

    let first = context.constructor_for(&EVENT_TARGET).unwrap();
    let second = context.constructor_for(&EVENT_TARGET).unwrap();
    let prototype = context.prototype_for(&EVENT_TARGET).unwrap();

    assert_eq!(first, second);
    assert_ne!(first, prototype);
    assert_eq!(harness.host.classes_created(), vec!["EventTarget"]);
}

#[test]
fn test_parents_initialized_first() {
    let harness = Harness::new();
    let context = harness.runtime.create_context();

    context.prototype_for(&ELEMENT).unwrap();
    context.prototype_for(&NODE).unwrap();

    assert_eq!(
        harness.host.classes_created(),
        vec!["EventTarget", "Node", "Element"]
    );
    assert_eq!(context.types().len(), 3);
}

#[test]
fn test_installer_lookups_do_not_reinitialize() {
    let harness = Harness::new();
    let context = harness.runtime.create_context();

    let file = context.constructor_for(&FILE).unwrap();
    assert_eq!(context.constructor_for(&FILE).unwrap(), file);
    context.constructor_for(&BLOB).unwrap();
    context.constructor_for(&EVENT_TARGET).unwrap();

    assert_eq!(
        harness.host.classes_created(),
        vec!["Blob", "File", "EventTarget"]
    );
}

#[test]
fn test_failed_installer_evicts_entry() {
    let harness = Harness::new();
    let context = harness.runtime.create_context();

    let error = context.constructor_for(&BROKEN).unwrap_err();
    assert_eq!(error.as_str(), Some("installer failed"));
    assert!(context.types().cached(&BROKEN).is_none());

    assert!(context.constructor_for(&BROKEN).is_err());
    assert_eq!(harness.host.classes_created(), vec!["Broken", "Broken"]);
}

#[test]
fn test_caches_are_per_context() {
    let harness = Harness::new();
    let first = harness.runtime.create_context();
    let second = harness.runtime.create_context();

    let a = first.constructor_for(&NODE).unwrap();
    let b = second.constructor_for(&NODE).unwrap();
    assert_ne!(a, b);
}

#[test]
fn test_class_objects_survive_collection() {
    let harness = Harness::new();
    let context = harness.runtime.create_context();
    let objects = context.types().class_objects(&context, &ELEMENT).unwrap();

    harness.collect();

    assert!(harness.host.heap.is_alive(objects.constructor));
    assert!(harness.host.heap.is_alive(objects.prototype));
    assert_eq!(context.constructor_for(&ELEMENT).unwrap(), objects.constructor);
    assert_eq!(harness.host.classes_created().len(), 3);
}

#[test]
fn test_reclaimed_class_objects_recreated() {
    let harness = Harness::new();
    let context = harness.runtime.create_context();
    let before = context.constructor_for(&EVENT_TARGET).unwrap();

    // Collect without the context as root: nothing keeps the class alive
    harness.host.heap.collect(&[]);
    assert!(!harness.host.heap.is_alive(before));

    let after = context.constructor_for(&EVENT_TARGET).unwrap();
    assert_ne!(before, after);
    assert_eq!(
        harness.host.classes_created(),
        vec!["EventTarget", "EventTarget"]
    );
}
