//! Tracing interfaces for the GC marking phase.
//!
//! Natively-owned registries hold script objects by [`GcRef`]. Those handles
//! are invisible to the collector unless the registry reports them, so every
//! registry implements [`Trace`] and its owner implements [`ExternalRootSet`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Handle to a GC-managed script object.
///
/// Compared by identity: two handles are equal only if they name the same
/// slot in the same generation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GcRef {
    index: u32,
    generation: u32,
}

impl GcRef {
    /// Build a handle from its raw parts.
    ///
    /// Embedders whose engine uses a different handle representation map
    /// their handles onto this pair.
    pub const fn from_raw_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index
    pub fn index(self) -> u32 {
        self.index
    }

    /// Slot generation this handle was issued for
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for GcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcRef({}@{})", self.index, self.generation)
    }
}

/// Visitor handed to [`Trace::trace`] during marking.
pub trait Tracer {
    /// Report a reachable handle
    fn visit(&mut self, handle: GcRef);
}

impl<F: FnMut(GcRef)> Tracer for F {
    fn visit(&mut self, handle: GcRef) {
        self(handle)
    }
}

/// Trait for types that hold script handles.
///
/// An implementation must report every handle it owns. It must not allocate
/// script objects or mutate the structure being traced.
pub trait Trace {
    /// Trace all references in this object
    fn trace(&self, tracer: &mut dyn Tracer);
}

impl Trace for GcRef {
    fn trace(&self, tracer: &mut dyn Tracer) {
        tracer.visit(*self);
    }
}

impl<T: Trace> Trace for Option<T> {
    fn trace(&self, tracer: &mut dyn Tracer) {
        if let Some(value) = self {
            value.trace(tracer);
        }
    }
}

impl<T: Trace> Trace for [T] {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for value in self {
            value.trace(tracer);
        }
    }
}

impl<T: Trace> Trace for Vec<T> {
    fn trace(&self, tracer: &mut dyn Tracer) {
        self.as_slice().trace(tracer);
    }
}

impl<T: Trace + ?Sized> Trace for Box<T> {
    fn trace(&self, tracer: &mut dyn Tracer) {
        (**self).trace(tracer);
    }
}

impl<T: Trace + ?Sized> Trace for Rc<T> {
    fn trace(&self, tracer: &mut dyn Tracer) {
        (**self).trace(tracer);
    }
}

impl<T: Trace> Trace for RefCell<T> {
    fn trace(&self, tracer: &mut dyn Tracer) {
        self.borrow().trace(tracer);
    }
}

/// A set of natively-held GC roots owned outside the script heap.
///
/// The collector calls `trace_roots` while marking and `on_trace_complete`
/// after the whole pass (mark and sweep) has finished. Entries that were
/// only kept for one more pass may be released in `on_trace_complete`.
pub trait ExternalRootSet {
    /// Report every handle held by this root set
    fn trace_roots(&self, tracer: &mut dyn Tracer);

    /// Called once the trace pass that visited this root set is complete
    fn on_trace_complete(&self) {}
}

impl<T: ExternalRootSet + ?Sized> ExternalRootSet for Rc<T> {
    fn trace_roots(&self, tracer: &mut dyn Tracer) {
        (**self).trace_roots(tracer);
    }

    fn on_trace_complete(&self) {
        (**self).on_trace_complete();
    }
}
