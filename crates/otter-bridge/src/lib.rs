//! # Otter Bridge
//!
//! Per-context coordination of natively owned resources that script can
//! reach, providing:
//! - Timer registry with abandon-then-sweep reclamation
//! - Animation-frame callback registry with snapshot firing
//! - Unhandled/handled promise rejection tracking
//! - Mutation observer registration and record fan-out
//! - Per-context constructor/prototype cache
//! - GC root set exposing every native handle to the collector
//! - Host timer facilities (manual and tokio backed)

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod error;
pub mod frame_callback;
pub mod host;
pub mod host_timer;
pub mod mutation_observer;
pub mod rejected_promises;
pub mod runtime;
pub mod timer;
pub mod type_info;
pub mod value;

// Re-export main types
pub use config::{ContextConfig, RejectionReportPolicy};
pub use context::{ContextId, ExecutingContext};
pub use error::{BridgeError, BridgeResult};
pub use frame_callback::{
    FrameCallback, FrameCallbackId, FrameCallbackKind, FrameRequestCallbackCollection,
    NativeFrameCallback,
};
pub use host::{ContextEvent, ScriptHost, ScriptResult, TimerHost};
pub use host_timer::{
    HostEventQueue, ManualTimerHost, ScheduledTimer, TimerFire, TimerTarget, TokioTimerHost,
};
pub use mutation_observer::{
    MutationObserver, MutationObserverInterestGroup, MutationObserverOptions,
    MutationObserverOptionsMap, MutationObserverRegistration, MutationObserverRegistry,
    MutationRecord, MutationType, ObservedNode,
};
pub use rejected_promises::{RejectedMessage, RejectedPromises};
pub use runtime::BridgeRuntime;
pub use timer::{DomTimer, TimerCoordinator, TimerId, TimerMode};
pub use type_info::{ClassInstaller, ClassObjects, TypeDescriptor, TypeIdentityCache};
pub use value::Value;

// GC protocol types used throughout the public API
pub use otter_bridge_gc::{ExternalRootSet, GcRef, Trace, Tracer};
