//! Reference mark/sweep heap
//!
//! Stop-the-world collector over a slot arena. Objects are stored type-erased
//! together with a monomorphized trace function, so marking never needs to
//! know concrete types.
//!
//! Objects are handed out as `Rc<T>` so native code can keep one alive while
//! it runs script. Sweeping a slot invalidates its `GcRef`s even if such an
//! `Rc` is still held; the next `get` on the stale handle returns `None`.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashSet;

use crate::object::{GcHeader, MarkColor};
use crate::trace::{ExternalRootSet, GcRef, Tracer};

/// Trait for objects stored in a [`GcHeap`]
pub trait GcObject: Any {
    /// Trace references to other heap objects
    fn trace(&self, tracer: &mut dyn Tracer);
}

type TraceFn = fn(&dyn Any, &mut dyn Tracer);

fn trace_erased<T: GcObject>(object: &dyn Any, tracer: &mut dyn Tracer) {
    if let Some(object) = object.downcast_ref::<T>() {
        object.trace(tracer);
    }
}

struct Slot {
    header: GcHeader,
    object: Option<Rc<dyn Any>>,
    trace_fn: TraceFn,
}

fn trace_nothing(_: &dyn Any, _: &mut dyn Tracer) {}

/// GC statistics
#[derive(Debug, Default, Clone)]
pub struct GcStats {
    /// Number of collections
    pub collections: u64,
    /// Objects marked in last collection
    pub last_marked: usize,
    /// Objects reclaimed in last collection
    pub last_reclaimed: usize,
    /// Live objects after last collection
    pub live_objects: usize,
    /// Total pause time across all collections
    pub total_pause: Duration,
}

/// Single-threaded mark/sweep heap.
pub struct GcHeap {
    slots: RefCell<Vec<Slot>>,
    free: RefCell<Vec<u32>>,
    stats: RefCell<GcStats>,
    /// Allocations since the last collection
    allocated_since_gc: Cell<usize>,
    /// Allocation count that makes `should_collect` return true
    gc_threshold: Cell<usize>,
    collecting: Cell<bool>,
}

impl GcHeap {
    /// Create a new empty heap
    pub fn new() -> Self {
        Self::with_threshold(1024)
    }

    /// Create a heap that asks for collection every `threshold` allocations
    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            slots: RefCell::new(Vec::new()),
            free: RefCell::new(Vec::new()),
            stats: RefCell::new(GcStats::default()),
            allocated_since_gc: Cell::new(0),
            gc_threshold: Cell::new(threshold.max(1)),
            collecting: Cell::new(false),
        }
    }

    /// Allocate an object and return its handle
    pub fn allocate<T: GcObject>(&self, object: T) -> GcRef {
        let object: Rc<dyn Any> = Rc::new(object);
        let trace_fn: TraceFn = trace_erased::<T>;
        let mut slots = self.slots.borrow_mut();

        let handle = match self.free.borrow_mut().pop() {
            Some(index) => {
                let slot = &mut slots[index as usize];
                slot.object = Some(object);
                slot.trace_fn = trace_fn;
                // Allocation during a collection is black so the sweep keeps it.
                if self.collecting.get() {
                    slot.header.set_mark(MarkColor::Black);
                }
                GcRef::from_raw_parts(index, slot.header.generation())
            }
            None => {
                let index = slots.len() as u32;
                let header = GcHeader::new();
                if self.collecting.get() {
                    header.set_mark(MarkColor::Black);
                }
                slots.push(Slot {
                    header,
                    object: Some(object),
                    trace_fn,
                });
                GcRef::from_raw_parts(index, 0)
            }
        };

        self.allocated_since_gc
            .set(self.allocated_since_gc.get() + 1);
        handle
    }

    /// Get a live object by handle.
    ///
    /// Returns `None` for reclaimed handles or when `T` is not the stored type.
    pub fn get<T: GcObject>(&self, handle: GcRef) -> Option<Rc<T>> {
        let object = self.slot_object(handle)?;
        object.downcast::<T>().ok()
    }

    /// Whether `handle` still names a live object
    pub fn is_alive(&self, handle: GcRef) -> bool {
        self.slot_object(handle).is_some()
    }

    fn slot_object(&self, handle: GcRef) -> Option<Rc<dyn Any>> {
        let slots = self.slots.borrow();
        let slot = slots.get(handle.index() as usize)?;
        if slot.header.generation() != handle.generation() {
            return None;
        }
        slot.object.clone()
    }

    /// Number of live objects
    pub fn live_count(&self) -> usize {
        self.slots
            .borrow()
            .iter()
            .filter(|slot| slot.object.is_some())
            .count()
    }

    /// Whether enough allocations happened to warrant a collection
    pub fn should_collect(&self) -> bool {
        self.allocated_since_gc.get() >= self.gc_threshold.get()
    }

    /// Set the allocation threshold used by `should_collect`
    pub fn set_gc_threshold(&self, threshold: usize) {
        self.gc_threshold.set(threshold.max(1));
    }

    /// Get collection statistics
    pub fn stats(&self) -> GcStats {
        self.stats.borrow().clone()
    }

    /// Perform a full mark/sweep collection.
    ///
    /// Every root set is traced, unreachable objects are reclaimed, then each
    /// root set gets `on_trace_complete`. Returns the number of reclaimed
    /// objects.
    pub fn collect(&self, roots: &[&dyn ExternalRootSet]) -> usize {
        if self.collecting.replace(true) {
            return 0;
        }
        let start = Instant::now();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "otter::gc",
            roots = roots.len(),
            objects = self.live_count(),
            "GC cycle starting"
        );

        // Phase 1: Reset all marks to white
        self.reset_marks();

        // Phase 2: Mark from roots
        let marked = self.mark(roots);

        // Phase 3: Sweep unmarked objects
        let reclaimed = self.sweep();

        self.collecting.set(false);
        self.allocated_since_gc.set(0);

        let elapsed = start.elapsed();
        let live_objects = self.live_count();
        {
            let mut stats = self.stats.borrow_mut();
            stats.collections += 1;
            stats.last_marked = marked;
            stats.last_reclaimed = reclaimed;
            stats.live_objects = live_objects;
            stats.total_pause += elapsed;
        }

        #[cfg(feature = "gc_logging")]
        tracing::info!(
            target: "otter::gc",
            reclaimed,
            marked,
            live_objects,
            pause_us = elapsed.as_micros() as u64,
            "GC cycle complete"
        );

        // Phase 4: Let root sets release entries kept alive for this pass
        for root in roots {
            root.on_trace_complete();
        }

        reclaimed
    }

    fn reset_marks(&self) {
        for slot in self.slots.borrow().iter() {
            slot.header.set_mark(MarkColor::White);
        }
    }

    fn mark(&self, roots: &[&dyn ExternalRootSet]) -> usize {
        let mut worklist: Vec<GcRef> = Vec::new();
        let mut seen_stale: FxHashSet<GcRef> = FxHashSet::default();
        let slots = self.slots.borrow();

        let mut gray = |handle: GcRef, worklist: &mut Vec<GcRef>| {
            let Some(slot) = slots.get(handle.index() as usize) else {
                return;
            };
            if slot.object.is_none() || slot.header.generation() != handle.generation() {
                seen_stale.insert(handle);
                return;
            }
            if slot.header.mark() == MarkColor::White {
                slot.header.set_mark(MarkColor::Gray);
                worklist.push(handle);
            }
        };

        for root in roots {
            root.trace_roots(&mut |handle: GcRef| gray(handle, &mut worklist));
        }

        let mut marked = 0;
        while let Some(handle) = worklist.pop() {
            let slot = &slots[handle.index() as usize];
            let mut children = Vec::new();
            if let Some(object) = &slot.object {
                (slot.trace_fn)(&**object, &mut |child: GcRef| children.push(child));
            }
            for child in children {
                gray(child, &mut worklist);
            }
            slot.header.set_mark(MarkColor::Black);
            marked += 1;
        }

        #[cfg(feature = "gc_logging")]
        if !seen_stale.is_empty() {
            tracing::warn!(
                target: "otter::gc",
                stale = seen_stale.len(),
                "Traced handles pointing at reclaimed slots"
            );
        }
        #[cfg(not(feature = "gc_logging"))]
        let _ = seen_stale;

        marked
    }

    fn sweep(&self) -> usize {
        // Dropped objects may run Drop impls that touch the heap, so they are
        // released only after the slot borrow ends.
        let mut dead: Vec<Rc<dyn Any>> = Vec::new();
        {
            let mut slots = self.slots.borrow_mut();
            let mut free = self.free.borrow_mut();
            for (index, slot) in slots.iter_mut().enumerate() {
                if slot.object.is_some() && slot.header.mark() == MarkColor::White {
                    if let Some(object) = slot.object.take() {
                        dead.push(object);
                    }
                    slot.trace_fn = trace_nothing;
                    slot.header.bump_generation();
                    free.push(index as u32);
                }
            }
        }
        let reclaimed = dead.len();
        drop(dead);
        reclaimed
    }
}

impl Default for GcHeap {
    fn default() -> Self {
        Self::new()
    }
}
