//! Unhandled promise rejection tracking.
//!
//! The engine reports rejections as they happen; notifications are only
//! emitted at drain boundaries by [`RejectedPromises::process`], so a promise
//! rejected and handled within one turn produces no event at all.

use std::cell::RefCell;
use std::mem;

use indexmap::IndexMap;
use otter_bridge_gc::{GcRef, Trace, Tracer};

use crate::config::RejectionReportPolicy;
use crate::context::ExecutingContext;
use crate::host::ContextEvent;
use crate::value::Value;

/// A tracked rejection
#[derive(Debug, Clone)]
pub struct RejectedMessage {
    promise: GcRef,
    reason: Value,
    reported: bool,
}

impl RejectedMessage {
    fn new(promise: GcRef, reason: Value) -> Self {
        Self {
            promise,
            reason,
            reported: false,
        }
    }

    /// Rejected promise
    pub fn promise(&self) -> GcRef {
        self.promise
    }

    /// Rejection reason
    pub fn reason(&self) -> &Value {
        &self.reason
    }

    /// Whether an `unhandledrejection` event was emitted for it
    pub fn reported(&self) -> bool {
        self.reported
    }
}

impl Trace for RejectedMessage {
    fn trace(&self, tracer: &mut dyn Tracer) {
        tracer.visit(self.promise);
        self.reason.trace(tracer);
    }
}

/// Rejections awaiting notification
#[derive(Debug, Default)]
pub struct RejectedPromises {
    policy: RejectionReportPolicy,
    unhandled: IndexMap<GcRef, RejectedMessage>,
    report_handled: Vec<RejectedMessage>,
}

impl RejectedPromises {
    /// Create a tracker with `policy`
    pub fn new(policy: RejectionReportPolicy) -> Self {
        Self {
            policy,
            unhandled: IndexMap::new(),
            report_handled: Vec::new(),
        }
    }

    /// Retention policy
    pub fn policy(&self) -> RejectionReportPolicy {
        self.policy
    }

    /// Record a rejection without handler. Returns false if already tracked.
    pub fn track_unhandled(&mut self, promise: GcRef, reason: Value) -> bool {
        if self.unhandled.contains_key(&promise) {
            return false;
        }
        self.unhandled
            .insert(promise, RejectedMessage::new(promise, reason));
        true
    }

    /// Record that a rejected promise gained a handler.
    ///
    /// Returns true if a `rejectionhandled` event was queued, which happens
    /// only when the rejection was already reported as unhandled.
    pub fn track_handled(&mut self, promise: GcRef, reason: Value) -> bool {
        let Some(message) = self.unhandled.shift_remove(&promise) else {
            return false;
        };
        if !message.reported {
            return false;
        }
        self.report_handled.push(RejectedMessage {
            promise,
            reason,
            reported: true,
        });
        true
    }

    /// Whether `promise` is tracked as unhandled
    pub fn is_unhandled(&self, promise: GcRef) -> bool {
        self.unhandled.contains_key(&promise)
    }

    /// Number of tracked unhandled rejections
    pub fn unhandled_count(&self) -> usize {
        self.unhandled.len()
    }

    /// Number of queued `rejectionhandled` notifications
    pub fn handled_count(&self) -> usize {
        self.report_handled.len()
    }

    /// Check if nothing is tracked or queued
    pub fn is_empty(&self) -> bool {
        self.unhandled.is_empty() && self.report_handled.is_empty()
    }

    /// Drop everything (context teardown)
    pub fn clear(&mut self) {
        self.unhandled.clear();
        self.report_handled.clear();
    }

    /// Messages to report now: unhandled ones first, then handled ones.
    ///
    /// Marks unhandled messages as reported; under
    /// [`RejectionReportPolicy::Once`] they are also forgotten.
    pub fn take_pending(&mut self) -> (Vec<RejectedMessage>, Vec<RejectedMessage>) {
        let unhandled: Vec<RejectedMessage> = match self.policy {
            RejectionReportPolicy::EveryDrain => self
                .unhandled
                .values_mut()
                .map(|message| {
                    message.reported = true;
                    message.clone()
                })
                .collect(),
            RejectionReportPolicy::Once => self
                .unhandled
                .drain(..)
                .map(|(_, mut message)| {
                    message.reported = true;
                    message
                })
                .collect(),
        };
        let handled = mem::take(&mut self.report_handled);
        (unhandled, handled)
    }

    /// Emit pending notifications through the context.
    ///
    /// Events are dispatched with no borrow of `tracker` held. Returns the
    /// number of events dispatched.
    pub fn process(tracker: &RefCell<Self>, context: &ExecutingContext) -> usize {
        let (unhandled, handled) = tracker.borrow_mut().take_pending();
        let count = unhandled.len() + handled.len();

        for message in unhandled {
            tracing::debug!(
                target: "otter::bridge::rejections",
                promise = ?message.promise,
                "unhandled promise rejection"
            );
            context.host().dispatch_event(
                context,
                ContextEvent::UnhandledRejection {
                    promise: message.promise,
                    reason: message.reason,
                },
            );
        }

        for message in handled {
            context.host().dispatch_event(
                context,
                ContextEvent::RejectionHandled {
                    promise: message.promise,
                    reason: message.reason,
                },
            );
        }

        count
    }
}

impl Trace for RejectedPromises {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for message in self.unhandled.values() {
            message.trace(tracer);
        }
        self.report_handled.trace(tracer);
    }
}
