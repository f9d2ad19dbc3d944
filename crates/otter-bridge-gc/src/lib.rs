//! # Otter Bridge GC
//!
//! Trace protocol shared by the host bridge and the script engine collector.
//!
//! ## Design
//!
//! - **Handles**: script objects are named by `GcRef` (slot index + generation),
//!   never by owning pointers
//! - **Tracing**: natively-owned registries expose their handles through
//!   [`Trace`] and a [`Tracer`] visitor
//! - **Root sets**: an owning context implements [`ExternalRootSet`]; the
//!   collector calls `trace_roots` during marking and `on_trace_complete`
//!   once the pass is over
//! - **Reference heap**: [`GcHeap`] is a small stop-the-world mark/sweep heap
//!   that drives the protocol end to end

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod heap;
pub mod object;
pub mod trace;

pub use heap::{GcHeap, GcObject, GcStats};
pub use object::{GcHeader, MarkColor};
pub use trace::{ExternalRootSet, GcRef, Trace, Tracer};
