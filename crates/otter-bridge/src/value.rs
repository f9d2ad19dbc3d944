//! Script values crossing the bridge.
//!
//! Primitive values are carried inline; objects are [`GcRef`] handles into
//! the engine heap and are the only variant the collector cares about.

use std::fmt;
use std::rc::Rc;

use otter_bridge_gc::{GcRef, Trace, Tracer};

/// A script value held by native code
#[derive(Clone, Default)]
pub enum Value {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// Boolean primitive
    Boolean(bool),
    /// Number primitive
    Number(f64),
    /// String primitive
    String(Rc<str>),
    /// Heap object (function, promise, error, wrapper, ...)
    Object(GcRef),
}

impl Value {
    /// Create `undefined`
    pub const fn undefined() -> Self {
        Self::Undefined
    }

    /// Create `null`
    pub const fn null() -> Self {
        Self::Null
    }

    /// Create a number
    pub const fn number(n: f64) -> Self {
        Self::Number(n)
    }

    /// Create a string
    pub fn string(s: impl AsRef<str>) -> Self {
        Self::String(Rc::from(s.as_ref()))
    }

    /// Wrap an object handle
    pub const fn object(handle: GcRef) -> Self {
        Self::Object(handle)
    }

    /// Object handle, if this is an object
    pub fn as_object(&self) -> Option<GcRef> {
        match self {
            Self::Object(handle) => Some(*handle),
            _ => None,
        }
    }

    /// Number, if this is a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String slice, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// `null` or `undefined`
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Identity comparison: same object handle, or equal primitives
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Object(handle) => write!(f, "[object {handle:?}]"),
        }
    }
}

impl From<GcRef> for Value {
    fn from(handle: GcRef) -> Self {
        Self::Object(handle)
    }
}

impl Trace for Value {
    fn trace(&self, tracer: &mut dyn Tracer) {
        if let Self::Object(handle) = self {
            tracer.visit(*handle);
        }
    }
}
