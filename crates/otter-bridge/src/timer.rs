//! Timers and the per-context timer registry.
//!
//! Removed timers are not dropped immediately. They move to an abandoned
//! list that stays traced until the next collection finishes, so a fire in
//! progress never outlives the handles it uses.

use std::collections::hash_map::Entry;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use otter_bridge_gc::{Trace, Tracer};
use rustc_hash::FxHashMap;

use crate::context::{ContextId, ExecutingContext};
use crate::value::Value;

/// Timer identifier, unique within a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u32);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One-shot or repeating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// `setTimeout`
    Once,
    /// `setInterval`
    Repeating,
}

/// A script timer
pub struct DomTimer {
    id: TimerId,
    context_id: ContextId,
    callback: Value,
    arguments: Vec<Value>,
    mode: TimerMode,
    timeout: Duration,
    nesting_level: u32,
}

impl DomTimer {
    /// Create a timer with no extra arguments and zero timeout
    pub fn new(id: TimerId, context_id: ContextId, callback: Value, mode: TimerMode) -> Self {
        Self {
            id,
            context_id,
            callback,
            arguments: Vec::new(),
            mode,
            timeout: Duration::ZERO,
            nesting_level: 0,
        }
    }

    /// Extra arguments passed to the callback
    pub fn with_arguments(mut self, arguments: Vec<Value>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Effective timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Timer nesting level at creation
    pub fn with_nesting_level(mut self, nesting_level: u32) -> Self {
        self.nesting_level = nesting_level;
        self
    }

    /// Timer id
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Owning context
    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Script callback
    pub fn callback(&self) -> &Value {
        &self.callback
    }

    /// Extra callback arguments
    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// Firing mode
    pub fn mode(&self) -> TimerMode {
        self.mode
    }

    /// Effective timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Nesting level at creation
    pub fn nesting_level(&self) -> u32 {
        self.nesting_level
    }

    /// Whether the timer is removed after its first fire
    pub fn is_one_shot(&self) -> bool {
        self.mode == TimerMode::Once
    }

    /// Invoke the callback. A thrown exception goes to the context sink.
    pub fn fire(&self, context: &ExecutingContext) {
        let host = context.host();
        let result =
            host.call_function(context, &self.callback, &Value::Undefined, &self.arguments);
        if let Err(exception) = result {
            context.handle_exception(&exception);
        }
    }
}

impl Trace for DomTimer {
    fn trace(&self, tracer: &mut dyn Tracer) {
        self.callback.trace(tracer);
        self.arguments.trace(tracer);
    }
}

impl fmt::Debug for DomTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomTimer")
            .field("id", &self.id)
            .field("context_id", &self.context_id)
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .field("nesting_level", &self.nesting_level)
            .finish()
    }
}

/// Active and abandoned timers of one context
#[derive(Default)]
pub struct TimerCoordinator {
    active: FxHashMap<TimerId, Rc<DomTimer>>,
    abandoned: Vec<Rc<DomTimer>>,
}

impl TimerCoordinator {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an active timer. Returns false if `id` is already active.
    pub fn install(&mut self, id: TimerId, timer: Rc<DomTimer>) -> bool {
        match self.active.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(timer);
                true
            }
        }
    }

    /// Move an active timer to the abandoned list. Returns false if absent.
    pub fn remove_by_id(&mut self, id: TimerId) -> bool {
        match self.active.remove(&id) {
            Some(timer) => {
                self.abandoned.push(timer);
                true
            }
            None => false,
        }
    }

    /// Active timer by id
    pub fn get_by_id(&self, id: TimerId) -> Option<Rc<DomTimer>> {
        self.active.get(&id).cloned()
    }

    /// Whether `id` is active
    pub fn contains(&self, id: TimerId) -> bool {
        self.active.contains_key(&id)
    }

    /// Abandon every active timer, returning their ids
    pub fn abandon_all(&mut self) -> Vec<TimerId> {
        let ids: Vec<TimerId> = self.active.keys().copied().collect();
        self.abandoned.extend(self.active.drain().map(|(_, timer)| timer));
        ids
    }

    /// Drop abandoned timers. Only valid once a trace pass has completed.
    pub fn reclaim_abandoned(&mut self) -> usize {
        let count = self.abandoned.len();
        self.abandoned.clear();
        count
    }

    /// Number of active timers
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of timers awaiting reclamation
    pub fn abandoned_count(&self) -> usize {
        self.abandoned.len()
    }
}

impl Trace for TimerCoordinator {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for timer in self.active.values() {
            timer.trace(tracer);
        }
        for timer in &self.abandoned {
            timer.trace(tracer);
        }
    }
}

impl fmt::Debug for TimerCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerCoordinator")
            .field("active", &self.active.len())
            .field("abandoned", &self.abandoned.len())
            .finish()
    }
}
