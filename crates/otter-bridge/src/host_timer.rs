//! Host timer facilities and the fire queue they report into.
//!
//! A facility owns the wall clock. When a timer expires it pushes a
//! [`TimerFire`] into a [`HostEventQueue`]; the context thread pumps the queue
//! through [`BridgeRuntime::pump_timer_fires`](crate::runtime::BridgeRuntime::pump_timer_fires).
//! The queue is the only piece of the bridge shared across threads.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::context::ContextId;
use crate::host::TimerHost;
use crate::timer::TimerId;

/// Shortest period a repeating tokio timer may use
const MIN_INTERVAL_PERIOD: Duration = Duration::from_millis(1);

/// Which timer of which context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerTarget {
    /// Owning context
    pub context_id: ContextId,
    /// Timer id within that context
    pub timer_id: TimerId,
}

impl TimerTarget {
    /// Create a target
    pub const fn new(context_id: ContextId, timer_id: TimerId) -> Self {
        Self {
            context_id,
            timer_id,
        }
    }
}

/// Fire notification posted by a host timer facility
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFire {
    /// Timer that expired
    pub target: TimerTarget,
    /// Host-side failure; converted into a script `TypeError` instead of firing
    pub error: Option<String>,
}

impl TimerFire {
    /// Successful expiry
    pub fn new(target: TimerTarget) -> Self {
        Self {
            target,
            error: None,
        }
    }

    /// Failed expiry carrying a host error message
    pub fn failed(target: TimerTarget, message: impl Into<String>) -> Self {
        Self {
            target,
            error: Some(message.into()),
        }
    }
}

struct QueueInner {
    fires: Mutex<VecDeque<TimerFire>>,
    notify: Notify,
}

/// Cross-thread queue of pending timer fires
#[derive(Clone)]
pub struct HostEventQueue {
    inner: Arc<QueueInner>,
}

impl HostEventQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                fires: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Post a fire notification and wake a waiter
    pub fn push(&self, fire: TimerFire) {
        self.inner.fires.lock().push_back(fire);
        self.inner.notify.notify_one();
    }

    /// Take all queued notifications in FIFO order
    pub fn drain(&self) -> Vec<TimerFire> {
        self.inner.fires.lock().drain(..).collect()
    }

    /// Number of queued notifications
    pub fn len(&self) -> usize {
        self.inner.fires.lock().len()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.inner.fires.lock().is_empty()
    }

    /// Wait until something is pushed
    pub async fn notified(&self) {
        self.inner.notify.notified().await;
    }
}

impl Default for HostEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A timer registered with [`ManualTimerHost`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTimer {
    /// Requested delay
    pub delay: Duration,
    /// Whether the timer repeats
    pub repeat: bool,
}

/// Timer facility driven explicitly by the embedder.
///
/// Nothing expires on its own; `expire` posts the fire notification. Used by
/// embedders that own their clock (frame-driven hosts) and by tests.
pub struct ManualTimerHost {
    events: HostEventQueue,
    scheduled: RefCell<IndexMap<TimerTarget, ScheduledTimer>>,
}

impl ManualTimerHost {
    /// Create a facility reporting into `events`
    pub fn new(events: HostEventQueue) -> Self {
        Self {
            events,
            scheduled: RefCell::new(IndexMap::new()),
        }
    }

    /// Whether `target` is currently scheduled
    pub fn is_scheduled(&self, target: TimerTarget) -> bool {
        self.scheduled.borrow().contains_key(&target)
    }

    /// Scheduling details for `target`
    pub fn scheduled(&self, target: TimerTarget) -> Option<ScheduledTimer> {
        self.scheduled.borrow().get(&target).copied()
    }

    /// All scheduled targets in scheduling order
    pub fn scheduled_targets(&self) -> Vec<TimerTarget> {
        self.scheduled.borrow().keys().copied().collect()
    }

    /// Expire `target`. One-shot timers are unscheduled, repeating ones stay.
    ///
    /// Returns false if the target is not scheduled.
    pub fn expire(&self, target: TimerTarget) -> bool {
        self.post(target, TimerFire::new(target))
    }

    /// Expire `target` with a host error instead of a normal fire
    pub fn fail(&self, target: TimerTarget, message: &str) -> bool {
        self.post(target, TimerFire::failed(target, message))
    }

    /// Expire every scheduled timer once, in scheduling order
    pub fn expire_all(&self) -> usize {
        let targets = self.scheduled_targets();
        targets
            .into_iter()
            .filter(|target| self.expire(*target))
            .count()
    }

    fn post(&self, target: TimerTarget, fire: TimerFire) -> bool {
        let mut scheduled = self.scheduled.borrow_mut();
        let Some(timer) = scheduled.get(&target).copied() else {
            return false;
        };
        if !timer.repeat {
            scheduled.shift_remove(&target);
        }
        drop(scheduled);
        self.events.push(fire);
        true
    }
}

impl TimerHost for ManualTimerHost {
    fn schedule(&self, target: TimerTarget, delay: Duration, repeat: bool) {
        self.scheduled
            .borrow_mut()
            .insert(target, ScheduledTimer { delay, repeat });
    }

    fn cancel(&self, target: TimerTarget) {
        self.scheduled.borrow_mut().shift_remove(&target);
    }
}

/// Timer facility backed by tokio timers.
///
/// Each scheduled timer is a task on `handle`; cancellation aborts it.
pub struct TokioTimerHost {
    handle: Handle,
    events: HostEventQueue,
    tasks: Arc<Mutex<FxHashMap<TimerTarget, AbortHandle>>>,
}

impl TokioTimerHost {
    /// Create a facility spawning onto `handle` and reporting into `events`
    pub fn new(handle: Handle, events: HostEventQueue) -> Self {
        Self {
            handle,
            events,
            tasks: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    /// Create a facility on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current(events: HostEventQueue) -> Self {
        Self::new(Handle::current(), events)
    }

    /// Number of timers still running
    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl TimerHost for TokioTimerHost {
    fn schedule(&self, target: TimerTarget, delay: Duration, repeat: bool) {
        let events = self.events.clone();
        let tasks = Arc::clone(&self.tasks);

        // Held across spawn so a one-shot task finishing early cannot remove
        // its entry before it is inserted.
        let mut running = self.tasks.lock();
        let task = self.handle.spawn(async move {
            if repeat {
                let period = delay.max(MIN_INTERVAL_PERIOD);
                let mut interval = tokio::time::interval_at(Instant::now() + delay, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    events.push(TimerFire::new(target));
                }
            } else {
                tokio::time::sleep(delay).await;
                tasks.lock().remove(&target);
                events.push(TimerFire::new(target));
            }
        });

        if let Some(previous) = running.insert(target, task.abort_handle()) {
            previous.abort();
        }
    }

    fn cancel(&self, target: TimerTarget) {
        if let Some(task) = self.tasks.lock().remove(&target) {
            task.abort();
        }
    }
}

impl Drop for TokioTimerHost {
    fn drop(&mut self) {
        for (_, task) in self.tasks.lock().drain() {
            task.abort();
        }
    }
}
