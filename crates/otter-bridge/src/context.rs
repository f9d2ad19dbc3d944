//! Executing context: one script global and the native resources it owns.
//!
//! The context owns every registry, is the single exception sink, drives
//! promise-job draining and is the GC root set that exposes all natively
//! held handles to the collector.
//!
//! No registry borrow is held while script runs. Callbacks may freely
//! schedule or cancel timers, request frames and reject promises.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use otter_bridge_gc::{ExternalRootSet, GcRef, Trace, Tracer};

use crate::config::ContextConfig;
use crate::frame_callback::{
    FrameCallback, FrameCallbackId, FrameCallbackKind, FrameRequestCallbackCollection,
};
use crate::host::{ScriptHost, ScriptResult, TimerHost};
use crate::host_timer::TimerTarget;
use crate::rejected_promises::RejectedPromises;
use crate::timer::{DomTimer, TimerCoordinator, TimerId, TimerMode};
use crate::type_info::{TypeDescriptor, TypeIdentityCache};
use crate::value::Value;

/// Context identifier, unique within a [`BridgeRuntime`](crate::runtime::BridgeRuntime)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u32);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-context registries and the script host they run against
pub struct ExecutingContext {
    id: ContextId,
    config: ContextConfig,
    host: Rc<dyn ScriptHost>,
    timer_host: Rc<dyn TimerHost>,
    valid: Cell<bool>,

    types: TypeIdentityCache,
    timers: RefCell<TimerCoordinator>,
    frame_callbacks: RefCell<FrameRequestCallbackCollection>,
    rejected_promises: RefCell<RejectedPromises>,

    next_timer_id: Cell<u32>,
    next_frame_callback_id: Cell<u32>,
    /// Nesting level of the timer callback currently running, 0 outside timers
    timer_nesting_level: Cell<u32>,
    draining_jobs: Cell<bool>,
}

impl ExecutingContext {
    /// Create a context
    pub fn new(
        id: ContextId,
        config: ContextConfig,
        host: Rc<dyn ScriptHost>,
        timer_host: Rc<dyn TimerHost>,
    ) -> Rc<Self> {
        let rejected_promises = RejectedPromises::new(config.rejection_policy);
        Rc::new(Self {
            id,
            config,
            host,
            timer_host,
            valid: Cell::new(true),
            types: TypeIdentityCache::new(),
            timers: RefCell::new(TimerCoordinator::new()),
            frame_callbacks: RefCell::new(FrameRequestCallbackCollection::new()),
            rejected_promises: RefCell::new(rejected_promises),
            next_timer_id: Cell::new(1),
            next_frame_callback_id: Cell::new(1),
            timer_nesting_level: Cell::new(0),
            draining_jobs: Cell::new(false),
        })
    }

    /// Context id
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Context configuration
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Script host
    pub fn host(&self) -> &dyn ScriptHost {
        &*self.host
    }

    /// False once the context has been disposed
    pub fn is_valid(&self) -> bool {
        self.valid.get()
    }

    // ==================== Exceptions & jobs ====================

    /// Report an exception thrown by script
    pub fn handle_exception(&self, exception: &Value) {
        tracing::warn!(
            target: "otter::bridge",
            context = %self.id,
            ?exception,
            "uncaught exception"
        );
        self.host.report_exception(self, exception);
    }

    /// Run pending promise jobs until the queue is empty, then flush
    /// rejection notifications.
    ///
    /// A drain requested while one is running returns immediately; the
    /// running drain picks up the new jobs.
    pub fn drain_pending_promise_jobs(&self) {
        if !self.is_valid() || self.draining_jobs.replace(true) {
            return;
        }

        while let Some(result) = self.host.run_pending_job(self) {
            if let Err(exception) = result {
                self.handle_exception(&exception);
            }
        }

        self.draining_jobs.set(false);
        self.process_rejected_promises();
    }

    // ==================== Type identity ====================

    /// Class constructor for `descriptor`
    pub fn constructor_for(&self, descriptor: &'static TypeDescriptor) -> ScriptResult<GcRef> {
        self.types.constructor_for(self, descriptor)
    }

    /// Class prototype for `descriptor`
    pub fn prototype_for(&self, descriptor: &'static TypeDescriptor) -> ScriptResult<GcRef> {
        self.types.prototype_for(self, descriptor)
    }

    /// Type identity cache
    pub fn types(&self) -> &TypeIdentityCache {
        &self.types
    }

    // ==================== Timers ====================

    /// `setTimeout`
    pub fn set_timeout(&self, callback: Value, delay: Duration, arguments: Vec<Value>) -> TimerId {
        self.start_timer(callback, delay, arguments, TimerMode::Once)
    }

    /// `setInterval`
    pub fn set_interval(&self, callback: Value, delay: Duration, arguments: Vec<Value>) -> TimerId {
        self.start_timer(callback, delay, arguments, TimerMode::Repeating)
    }

    /// `clearTimeout` / `clearInterval`. Returns false for unknown ids.
    pub fn clear_timer(&self, id: TimerId) -> bool {
        let removed = self.timers.borrow_mut().remove_by_id(id);
        if removed {
            self.timer_host.cancel(TimerTarget::new(self.id, id));
        }
        removed
    }

    /// Active timer by id
    pub fn timer(&self, id: TimerId) -> Option<Rc<DomTimer>> {
        self.timers.borrow().get_by_id(id)
    }

    /// Register `timer` under `id` without scheduling it with the host.
    ///
    /// For embedders that allocate timer ids and schedule on their own.
    /// Returns false if `id` is already active.
    pub fn install_timer(&self, id: TimerId, timer: Rc<DomTimer>) -> bool {
        self.timers.borrow_mut().install(id, timer)
    }

    /// Timer registry
    pub fn timers(&self) -> &RefCell<TimerCoordinator> {
        &self.timers
    }

    /// Handle a host timer expiry.
    ///
    /// Ignored when the context is disposed or `id` is no longer active. A
    /// host `error` is thrown into script as a `TypeError` instead of firing.
    /// One-shot timers are removed afterwards. Returns whether anything ran.
    pub fn handle_timer_fire(&self, id: TimerId, error: Option<&str>) -> bool {
        if !self.is_valid() {
            tracing::debug!(
                target: "otter::bridge::timers",
                context = %self.id,
                timer = %id,
                "fire on disposed context ignored"
            );
            return false;
        }

        let Some(timer) = self.timer(id) else {
            tracing::trace!(
                target: "otter::bridge::timers",
                context = %self.id,
                timer = %id,
                "fire for inactive timer ignored"
            );
            return false;
        };

        match error {
            Some(message) => {
                let exception = self.host.create_type_error(self, message);
                self.handle_exception(&exception);
            }
            None => {
                let previous = self.timer_nesting_level.replace(timer.nesting_level());
                timer.fire(self);
                self.timer_nesting_level.set(previous);
                self.drain_pending_promise_jobs();
            }
        }

        if timer.is_one_shot() {
            self.timers.borrow_mut().remove_by_id(id);
        }
        true
    }

    fn start_timer(
        &self,
        callback: Value,
        delay: Duration,
        arguments: Vec<Value>,
        mode: TimerMode,
    ) -> TimerId {
        let id = self.allocate_timer_id();
        let nesting_level = self.timer_nesting_level.get().saturating_add(1);
        let timeout = self.config.clamp_timer_delay(delay, nesting_level);

        let timer = DomTimer::new(id, self.id, callback, mode)
            .with_arguments(arguments)
            .with_timeout(timeout)
            .with_nesting_level(nesting_level);

        if !self.is_valid() {
            tracing::debug!(
                target: "otter::bridge::timers",
                context = %self.id,
                timer = %id,
                "timer requested on disposed context"
            );
            return id;
        }

        self.timers.borrow_mut().install(id, Rc::new(timer));
        self.timer_host.schedule(
            TimerTarget::new(self.id, id),
            timeout,
            mode == TimerMode::Repeating,
        );
        tracing::trace!(
            target: "otter::bridge::timers",
            context = %self.id,
            timer = %id,
            ?timeout,
            nesting_level,
            "timer installed"
        );
        id
    }

    /// Next id not active in the registry (embedders may install their own)
    fn allocate_timer_id(&self) -> TimerId {
        let timers = self.timers.borrow();
        loop {
            let id = TimerId(self.next_timer_id.get());
            self.next_timer_id.set(id.0.wrapping_add(1).max(1));
            if !timers.contains(id) {
                return id;
            }
        }
    }

    // ==================== Animation frames ====================

    /// `requestAnimationFrame`
    pub fn request_animation_frame(&self, callback: Value) -> FrameCallbackId {
        self.register_frame_callback(FrameCallbackKind::Script(callback))
    }

    /// Request a native callback on the next frame
    pub fn request_native_frame<F>(&self, callback: F) -> FrameCallbackId
    where
        F: Fn(&ExecutingContext, f64) + 'static,
    {
        self.register_frame_callback(FrameCallbackKind::Native(Rc::new(callback)))
    }

    /// `cancelAnimationFrame`. Returns false for unknown ids.
    pub fn cancel_animation_frame(&self, id: FrameCallbackId) -> bool {
        self.frame_callbacks.borrow_mut().cancel(id)
    }

    /// Run one frame: fire every callback requested before this call.
    pub fn fire_animation_frames(&self, timestamp: f64) -> usize {
        if !self.is_valid() {
            return 0;
        }
        FrameRequestCallbackCollection::fire(&self.frame_callbacks, self, timestamp)
    }

    /// Frame callback registry
    pub fn frame_callbacks(&self) -> &RefCell<FrameRequestCallbackCollection> {
        &self.frame_callbacks
    }

    fn register_frame_callback(&self, kind: FrameCallbackKind) -> FrameCallbackId {
        let id = FrameCallbackId(self.next_frame_callback_id.get());
        self.next_frame_callback_id.set(id.0.wrapping_add(1).max(1));

        if self.is_valid() {
            let callback = Rc::new(FrameCallback::new(id, self.id, kind));
            self.frame_callbacks.borrow_mut().register(id, callback);
        }
        id
    }

    // ==================== Promise rejections ====================

    /// The engine rejected `promise` with no handler attached
    pub fn track_unhandled_rejection(&self, promise: GcRef, reason: Value) -> bool {
        self.rejected_promises
            .borrow_mut()
            .track_unhandled(promise, reason)
    }

    /// A handler was attached to a rejected `promise`
    pub fn track_handled_rejection(&self, promise: GcRef, reason: Value) -> bool {
        self.rejected_promises
            .borrow_mut()
            .track_handled(promise, reason)
    }

    /// Dispatch pending rejection notifications
    pub fn process_rejected_promises(&self) -> usize {
        if !self.is_valid() {
            return 0;
        }
        RejectedPromises::process(&self.rejected_promises, self)
    }

    /// Rejection tracker
    pub fn rejected_promises(&self) -> &RefCell<RejectedPromises> {
        &self.rejected_promises
    }

    // ==================== Teardown ====================

    /// Tear the context down.
    ///
    /// Host timers are cancelled, every timer and frame callback is
    /// abandoned (still traced until the next collection completes) and
    /// pending rejections are dropped. Later fires are ignored.
    pub fn dispose(&self) {
        if !self.valid.replace(false) {
            return;
        }

        let timer_ids = self.timers.borrow_mut().abandon_all();
        for id in &timer_ids {
            self.timer_host.cancel(TimerTarget::new(self.id, *id));
        }
        let frames = self.frame_callbacks.borrow_mut().abandon_all();
        self.rejected_promises.borrow_mut().clear();
        self.types.clear();

        tracing::debug!(
            target: "otter::bridge",
            context = %self.id,
            timers = timer_ids.len(),
            frames,
            "context disposed"
        );
    }
}

impl ExternalRootSet for ExecutingContext {
    fn trace_roots(&self, tracer: &mut dyn Tracer) {
        self.types.trace(tracer);
        self.timers.trace(tracer);
        self.frame_callbacks.trace(tracer);
        self.rejected_promises.trace(tracer);
    }

    fn on_trace_complete(&self) {
        let timers = self.timers.borrow_mut().reclaim_abandoned();
        let frames = self.frame_callbacks.borrow_mut().reclaim_abandoned();
        if timers + frames > 0 {
            tracing::trace!(
                target: "otter::bridge::gc",
                context = %self.id,
                timers,
                frames,
                "reclaimed abandoned entries"
            );
        }
    }
}

impl fmt::Debug for ExecutingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutingContext")
            .field("id", &self.id)
            .field("valid", &self.valid.get())
            .field("timers", &self.timers.borrow())
            .field("frame_callbacks", &self.frame_callbacks.borrow())
            .finish_non_exhaustive()
    }
}
