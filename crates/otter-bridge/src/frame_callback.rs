//! Animation-frame callbacks.
//!
//! Callbacks fire once, in registration order, on the next frame. A fire pass
//! works on a snapshot taken when it starts, so callbacks requested during
//! the pass wait for the following frame.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use otter_bridge_gc::{Trace, Tracer};

use crate::context::{ContextId, ExecutingContext};
use crate::value::Value;

/// Frame callback identifier, unique within a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameCallbackId(pub u32);

impl fmt::Display for FrameCallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Native frame callback, called with the frame timestamp
pub type NativeFrameCallback = Rc<dyn Fn(&ExecutingContext, f64)>;

/// What runs when the frame fires
#[derive(Clone)]
pub enum FrameCallbackKind {
    /// Script function from `requestAnimationFrame`
    Script(Value),
    /// Native closure
    Native(NativeFrameCallback),
}

/// A registered frame callback
pub struct FrameCallback {
    id: FrameCallbackId,
    context_id: ContextId,
    kind: FrameCallbackKind,
}

impl FrameCallback {
    /// Create a callback
    pub fn new(id: FrameCallbackId, context_id: ContextId, kind: FrameCallbackKind) -> Self {
        Self {
            id,
            context_id,
            kind,
        }
    }

    /// Callback id
    pub fn id(&self) -> FrameCallbackId {
        self.id
    }

    /// Owning context
    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Callback kind
    pub fn kind(&self) -> &FrameCallbackKind {
        &self.kind
    }

    /// Run the callback with `timestamp`
    pub fn fire(&self, context: &ExecutingContext, timestamp: f64) {
        match &self.kind {
            FrameCallbackKind::Script(function) => {
                let args = [Value::number(timestamp)];
                let host = context.host();
                if let Err(exception) =
                    host.call_function(context, function, &Value::Undefined, &args)
                {
                    context.handle_exception(&exception);
                }
            }
            FrameCallbackKind::Native(callback) => callback(context, timestamp),
        }
    }
}

impl Trace for FrameCallback {
    fn trace(&self, tracer: &mut dyn Tracer) {
        if let FrameCallbackKind::Script(function) = &self.kind {
            function.trace(tracer);
        }
    }
}

impl fmt::Debug for FrameCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FrameCallbackKind::Script(_) => "script",
            FrameCallbackKind::Native(_) => "native",
        };
        f.debug_struct("FrameCallback")
            .field("id", &self.id)
            .field("context_id", &self.context_id)
            .field("kind", &kind)
            .finish()
    }
}

/// Active and abandoned frame callbacks of one context
#[derive(Default)]
pub struct FrameRequestCallbackCollection {
    active: IndexMap<FrameCallbackId, Rc<FrameCallback>>,
    abandoned: Vec<Rc<FrameCallback>>,
}

impl FrameRequestCallbackCollection {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. Returns false if `id` is already active.
    pub fn register(&mut self, id: FrameCallbackId, callback: Rc<FrameCallback>) -> bool {
        if self.active.contains_key(&id) {
            return false;
        }
        self.active.insert(id, callback);
        true
    }

    /// Move a callback to the abandoned list. Returns false if absent.
    pub fn cancel(&mut self, id: FrameCallbackId) -> bool {
        match self.active.shift_remove(&id) {
            Some(callback) => {
                self.abandoned.push(callback);
                true
            }
            None => false,
        }
    }

    /// Active callback by id
    pub fn get(&self, id: FrameCallbackId) -> Option<Rc<FrameCallback>> {
        self.active.get(&id).cloned()
    }

    /// Active ids in firing order
    pub fn snapshot(&self) -> Vec<FrameCallbackId> {
        self.active.keys().copied().collect()
    }

    /// Abandon every active callback
    pub fn abandon_all(&mut self) -> usize {
        let count = self.active.len();
        self.abandoned
            .extend(self.active.drain(..).map(|(_, callback)| callback));
        count
    }

    /// Drop abandoned callbacks. Only valid once a trace pass has completed.
    pub fn reclaim_abandoned(&mut self) -> usize {
        let count = self.abandoned.len();
        self.abandoned.clear();
        count
    }

    /// Number of active callbacks
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of callbacks awaiting reclamation
    pub fn abandoned_count(&self) -> usize {
        self.abandoned.len()
    }

    /// Fire every callback active when the pass starts.
    ///
    /// Each callback is consumed before it runs; one cancelled by an earlier
    /// callback in the same pass is skipped. No borrow of `collection` is
    /// held while callbacks run. Returns the number of callbacks fired.
    pub fn fire(collection: &RefCell<Self>, context: &ExecutingContext, timestamp: f64) -> usize {
        let pending = collection.borrow().snapshot();
        let mut fired = 0;

        for id in pending {
            let callback = {
                let mut collection = collection.borrow_mut();
                let Some(callback) = collection.get(id) else {
                    continue;
                };
                collection.cancel(id);
                callback
            };

            callback.fire(context, timestamp);
            context.drain_pending_promise_jobs();
            fired += 1;
        }

        fired
    }
}

impl Trace for FrameRequestCallbackCollection {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for callback in self.active.values() {
            callback.trace(tracer);
        }
        for callback in &self.abandoned {
            callback.trace(tracer);
        }
    }
}

impl fmt::Debug for FrameRequestCallbackCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRequestCallbackCollection")
            .field("active", &self.active.len())
            .field("abandoned", &self.abandoned.len())
            .finish()
    }
}
