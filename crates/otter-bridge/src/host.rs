//! Collaborator interfaces implemented by the embedder.
//!
//! The bridge never executes script on its own. Calling a function, running
//! a microtask, creating a class or dispatching an event all go through
//! [`ScriptHost`]; scheduling wall-clock timers goes through [`TimerHost`].

use std::time::Duration;

use otter_bridge_gc::GcRef;

use crate::context::ExecutingContext;
use crate::host_timer::TimerTarget;
use crate::type_info::{ClassObjects, TypeDescriptor};
use crate::value::Value;

/// Result of a script operation. `Err` carries the thrown value.
pub type ScriptResult<T> = Result<T, Value>;

/// Events the bridge delivers to the script layer.
///
/// The script-visible representation (`PromiseRejectionEvent` and friends)
/// belongs to the host.
#[derive(Debug, Clone)]
pub enum ContextEvent {
    /// A rejected promise had no handler at a drain boundary
    UnhandledRejection {
        /// The rejected promise
        promise: GcRef,
        /// The rejection reason
        reason: Value,
    },
    /// A previously reported rejection gained a handler
    RejectionHandled {
        /// The rejected promise
        promise: GcRef,
        /// The rejection reason
        reason: Value,
    },
}

impl ContextEvent {
    /// DOM event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::UnhandledRejection { .. } => "unhandledrejection",
            Self::RejectionHandled { .. } => "rejectionhandled",
        }
    }

    /// Promise the event is about
    pub fn promise(&self) -> GcRef {
        match self {
            Self::UnhandledRejection { promise, .. } | Self::RejectionHandled { promise, .. } => {
                *promise
            }
        }
    }
}

/// Script engine surface used by an [`ExecutingContext`].
///
/// Every method is called on the context thread with no bridge registry
/// borrowed, so implementations may re-enter the context freely.
pub trait ScriptHost {
    /// Call `function` with `this` and `args`.
    fn call_function(
        &self,
        context: &ExecutingContext,
        function: &Value,
        this: &Value,
        args: &[Value],
    ) -> ScriptResult<Value>;

    /// Create a `TypeError` carrying `message`.
    fn create_type_error(&self, context: &ExecutingContext, message: &str) -> Value;

    /// Run one pending promise job. Returns `None` when the queue is empty.
    fn run_pending_job(&self, context: &ExecutingContext) -> Option<ScriptResult<()>>;

    /// Report an uncaught exception (console, error event, host log, ...).
    fn report_exception(&self, context: &ExecutingContext, exception: &Value);

    /// Create the constructor and prototype objects for `descriptor`.
    ///
    /// `parent_prototype` is the already-initialized prototype of
    /// `descriptor.parent`, if any.
    fn create_class(
        &self,
        context: &ExecutingContext,
        descriptor: &'static TypeDescriptor,
        parent_prototype: Option<GcRef>,
    ) -> ScriptResult<ClassObjects>;

    /// Dispatch a context-level event to script.
    fn dispatch_event(&self, context: &ExecutingContext, event: ContextEvent);

    /// Whether `handle` still names a live object.
    fn is_alive(&self, _handle: GcRef) -> bool {
        true
    }
}

/// Host timer facility.
///
/// Expiry is reported back as a [`TimerFire`](crate::host_timer::TimerFire)
/// through the host event queue the facility was built with.
pub trait TimerHost {
    /// Start a timer. A repeating timer fires every `delay` until cancelled.
    fn schedule(&self, target: TimerTarget, delay: Duration, repeat: bool);

    /// Stop a timer. Unknown targets are ignored.
    fn cancel(&self, target: TimerTarget);
}
