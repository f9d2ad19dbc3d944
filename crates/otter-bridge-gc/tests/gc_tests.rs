//! GC correctness tests
//!
//! These tests verify that the reference mark/sweep heap honors the trace
//! protocol: root sets keep objects alive, unreachable cycles are reclaimed,
//! and `on_trace_complete` runs after the pass.

use std::cell::{Cell, RefCell};

use otter_bridge_gc::{ExternalRootSet, GcHeap, GcObject, GcRef, Trace, Tracer};

/// Simple test object for GC testing
struct TestObject {
    value: i32,
    /// Optional reference to another object
    reference: RefCell<Option<GcRef>>,
}

impl TestObject {
    fn new(value: i32, reference: Option<GcRef>) -> Self {
        Self {
            value,
            reference: RefCell::new(reference),
        }
    }
}

impl GcObject for TestObject {
    fn trace(&self, tracer: &mut dyn Tracer) {
        self.reference.borrow().trace(tracer);
    }
}

/// Root set backed by a plain list of handles
#[derive(Default)]
struct Roots {
    handles: RefCell<Vec<GcRef>>,
    completed_passes: Cell<usize>,
}

impl ExternalRootSet for Roots {
    fn trace_roots(&self, tracer: &mut dyn Tracer) {
        self.handles.borrow().trace(tracer);
    }

    fn on_trace_complete(&self) {
        self.completed_passes.set(self.completed_passes.get() + 1);
    }
}

#[test]
fn test_collect_simple_garbage() {
    let heap = GcHeap::new();
    let handle = heap.allocate(TestObject::new(42, None));
    assert_eq!(heap.live_count(), 1);

    let reclaimed = heap.collect(&[]);

    assert_eq!(reclaimed, 1);
    assert_eq!(heap.live_count(), 0);
    assert!(heap.get::<TestObject>(handle).is_none());
}

#[test]
fn test_rooted_object_survives() {
    let heap = GcHeap::new();
    let roots = Roots::default();
    let handle = heap.allocate(TestObject::new(7, None));
    roots.handles.borrow_mut().push(handle);

    let reclaimed = heap.collect(&[&roots]);

    assert_eq!(reclaimed, 0);
    assert_eq!(heap.get::<TestObject>(handle).map(|obj| obj.value), Some(7));
}

#[test]
fn test_reachable_through_chain() {
    let heap = GcHeap::new();
    let roots = Roots::default();

    let leaf = heap.allocate(TestObject::new(3, None));
    let middle = heap.allocate(TestObject::new(2, Some(leaf)));
    let head = heap.allocate(TestObject::new(1, Some(middle)));
    roots.handles.borrow_mut().push(head);

    heap.collect(&[&roots]);

    assert!(heap.is_alive(leaf));
    assert!(heap.is_alive(middle));
    assert!(heap.is_alive(head));
    assert_eq!(heap.stats().last_marked, 3);
}

#[test]
fn test_circular_references_collected() {
    let heap = GcHeap::new();

    let first = heap.allocate(TestObject::new(1, None));
    let second = heap.allocate(TestObject::new(2, Some(first)));
    if let Some(obj) = heap.get::<TestObject>(first) {
        *obj.reference.borrow_mut() = Some(second);
    }

    let reclaimed = heap.collect(&[]);

    assert_eq!(reclaimed, 2);
    assert_eq!(heap.live_count(), 0);
}

#[test]
fn test_on_trace_complete_runs_once_per_pass() {
    let heap = GcHeap::new();
    let roots = Roots::default();

    heap.collect(&[&roots]);
    heap.collect(&[&roots]);

    assert_eq!(roots.completed_passes.get(), 2);
    assert_eq!(heap.stats().collections, 2);
}

#[test]
fn test_stale_root_is_ignored() {
    let heap = GcHeap::new();
    let roots = Roots::default();
    let stale = heap.allocate(TestObject::new(1, None));
    heap.collect(&[]);

    let fresh = heap.allocate(TestObject::new(2, None));
    roots.handles.borrow_mut().push(stale);
    let reclaimed = heap.collect(&[&roots]);

    // The stale handle shares the slot index but not the generation.
    assert_eq!(stale.index(), fresh.index());
    assert_eq!(reclaimed, 1);
    assert!(!heap.is_alive(fresh));
}

#[test]
fn test_heap_growth_bounded() {
    let heap = GcHeap::with_threshold(16);

    for i in 0..100 {
        heap.allocate(TestObject::new(i, None));
        if heap.should_collect() {
            heap.collect(&[]);
        }
    }

    assert!(heap.live_count() < 16);
}
