//! Context registry and host event pumping.
//!
//! Timers and frame callbacks only carry a [`ContextId`]; the runtime is
//! where those ids are resolved back to live contexts.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use otter_bridge_gc::{ExternalRootSet, Tracer};
use rustc_hash::FxHashMap;

use crate::config::ContextConfig;
use crate::context::{ContextId, ExecutingContext};
use crate::error::{BridgeError, BridgeResult};
use crate::host::{ScriptHost, TimerHost};
use crate::host_timer::{HostEventQueue, TimerFire};

/// Owns the contexts of one script thread
pub struct BridgeRuntime {
    host: Rc<dyn ScriptHost>,
    timer_host: Rc<dyn TimerHost>,
    events: HostEventQueue,
    default_config: ContextConfig,
    contexts: RefCell<FxHashMap<ContextId, Rc<ExecutingContext>>>,
    /// Disposed contexts, kept traced until the next collection completes
    disposed: RefCell<Vec<Rc<ExecutingContext>>>,
    next_context_id: Cell<u32>,
}

impl BridgeRuntime {
    /// Create a runtime. `events` must be the queue `timer_host` reports into.
    pub fn new(
        host: Rc<dyn ScriptHost>,
        timer_host: Rc<dyn TimerHost>,
        events: HostEventQueue,
    ) -> Self {
        Self {
            host,
            timer_host,
            events,
            default_config: ContextConfig::default(),
            contexts: RefCell::new(FxHashMap::default()),
            disposed: RefCell::new(Vec::new()),
            next_context_id: Cell::new(1),
        }
    }

    /// Config used by [`create_context`](Self::create_context)
    pub fn with_default_config(mut self, config: ContextConfig) -> Self {
        self.default_config = config;
        self
    }

    /// Host event queue
    pub fn events(&self) -> &HostEventQueue {
        &self.events
    }

    /// Create a context with the default config
    pub fn create_context(&self) -> Rc<ExecutingContext> {
        self.create_context_with_config(self.default_config.clone())
    }

    /// Create a context with `config`
    pub fn create_context_with_config(&self, config: ContextConfig) -> Rc<ExecutingContext> {
        let id = ContextId(self.next_context_id.get());
        self.next_context_id.set(id.0.wrapping_add(1).max(1));

        let context = ExecutingContext::new(
            id,
            config,
            Rc::clone(&self.host),
            Rc::clone(&self.timer_host),
        );
        self.contexts.borrow_mut().insert(id, Rc::clone(&context));
        tracing::debug!(target: "otter::bridge", context = %id, "context created");
        context
    }

    /// Live context by id
    pub fn context(&self, id: ContextId) -> BridgeResult<Rc<ExecutingContext>> {
        if let Some(context) = self.contexts.borrow().get(&id) {
            return Ok(Rc::clone(context));
        }
        Err(self.missing(id))
    }

    /// Live contexts ordered by id
    pub fn contexts(&self) -> Vec<Rc<ExecutingContext>> {
        let mut contexts: Vec<_> = self.contexts.borrow().values().cloned().collect();
        contexts.sort_by_key(|context| context.id());
        contexts
    }

    /// Number of live contexts
    pub fn context_count(&self) -> usize {
        self.contexts.borrow().len()
    }

    /// Dispose a context. It stays traced until the next collection completes.
    ///
    /// Disposed contexts are only released by
    /// [`on_trace_complete`](ExternalRootSet::on_trace_complete), so an
    /// embedder that never collects keeps them and their abandoned entries.
    pub fn dispose_context(&self, id: ContextId) -> BridgeResult<()> {
        let context = self.contexts.borrow_mut().remove(&id);
        let Some(context) = context else {
            return Err(self.missing(id));
        };
        context.dispose();
        let mut disposed = self.disposed.borrow_mut();
        disposed.push(context);
        if disposed.len().is_power_of_two() && disposed.len() >= 16 {
            tracing::debug!(
                target: "otter::bridge::gc",
                pending = disposed.len(),
                "disposed contexts waiting for a collection"
            );
        }
        Ok(())
    }

    /// Route one timer fire to its context. Returns whether anything ran.
    pub fn dispatch_timer_fire(&self, fire: &TimerFire) -> bool {
        let context_id = fire.target.context_id;
        let context = self.contexts.borrow().get(&context_id).cloned();
        match context {
            Some(context) => context.handle_timer_fire(fire.target.timer_id, fire.error.as_deref()),
            None => {
                tracing::debug!(
                    target: "otter::bridge::timers",
                    context = %context_id,
                    timer = %fire.target.timer_id,
                    "fire for unknown context ignored"
                );
                false
            }
        }
    }

    /// Dispatch every queued timer fire. Returns how many ran.
    pub fn pump_timer_fires(&self) -> usize {
        self.events
            .drain()
            .iter()
            .filter(|fire| self.dispatch_timer_fire(fire))
            .count()
    }

    /// Wait for at least one queued fire, then pump the queue
    pub async fn next_timer_fires(&self) -> usize {
        // A permit left by a fire that was already pumped wakes us early
        while self.events.is_empty() {
            self.events.notified().await;
        }
        self.pump_timer_fires()
    }

    /// Run one animation frame in every live context, in id order
    pub fn fire_animation_frames(&self, timestamp: f64) -> usize {
        self.contexts()
            .iter()
            .map(|context| context.fire_animation_frames(timestamp))
            .sum()
    }

    fn missing(&self, id: ContextId) -> BridgeError {
        let disposed = self
            .disposed
            .borrow()
            .iter()
            .any(|context| context.id() == id);
        if disposed {
            BridgeError::ContextDisposed(id)
        } else {
            BridgeError::ContextNotFound(id)
        }
    }
}

impl ExternalRootSet for BridgeRuntime {
    fn trace_roots(&self, tracer: &mut dyn Tracer) {
        for context in self.contexts.borrow().values() {
            context.trace_roots(tracer);
        }
        for context in self.disposed.borrow().iter() {
            context.trace_roots(tracer);
        }
    }

    fn on_trace_complete(&self) {
        for context in self.contexts() {
            context.on_trace_complete();
        }
        let disposed = self.disposed.take();
        if !disposed.is_empty() {
            tracing::debug!(
                target: "otter::bridge::gc",
                released = disposed.len(),
                "released disposed contexts"
            );
        }
    }
}

impl Drop for BridgeRuntime {
    fn drop(&mut self) {
        for context in self.contexts.get_mut().values() {
            context.dispose();
        }
    }
}
