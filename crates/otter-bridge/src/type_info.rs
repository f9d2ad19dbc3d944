//! Per-context memo of script-visible classes.
//!
//! Each native type exposed to script has one static [`TypeDescriptor`]. The
//! first lookup in a context creates the constructor/prototype pair through
//! the host; later lookups return the same handles.

use std::cell::RefCell;
use std::fmt;

use otter_bridge_gc::{GcRef, Trace, Tracer};
use rustc_hash::FxHashMap;

use crate::context::ExecutingContext;
use crate::host::ScriptResult;

/// Installs members onto a freshly created class
pub type ClassInstaller = fn(&ExecutingContext, &ClassObjects) -> ScriptResult<()>;

/// Static identity of a script-exposed native type.
///
/// Compared by address, so declare each one as a `static`.
pub struct TypeDescriptor {
    /// Script-visible class name
    pub class_name: &'static str,
    /// Parent class, initialized before this one
    pub parent: Option<&'static TypeDescriptor>,
    /// Member installer run after the class objects exist
    pub install: Option<ClassInstaller>,
}

impl TypeDescriptor {
    /// Descriptor without parent or installer
    pub const fn new(class_name: &'static str) -> Self {
        Self {
            class_name,
            parent: None,
            install: None,
        }
    }

    /// Set the parent class
    pub const fn with_parent(mut self, parent: &'static TypeDescriptor) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Set the member installer
    pub const fn with_installer(mut self, install: ClassInstaller) -> Self {
        self.install = Some(install);
        self
    }

    fn key(&'static self) -> TypeKey {
        TypeKey(self as *const TypeDescriptor as usize)
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("class_name", &self.class_name)
            .field("parent", &self.parent.map(|parent| parent.class_name))
            .finish()
    }
}

/// Constructor and prototype of one class in one context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassObjects {
    /// Constructor function
    pub constructor: GcRef,
    /// Prototype object
    pub prototype: GcRef,
}

impl Trace for ClassObjects {
    fn trace(&self, tracer: &mut dyn Tracer) {
        tracer.visit(self.constructor);
        tracer.visit(self.prototype);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TypeKey(usize);

struct CacheEntry {
    descriptor: &'static TypeDescriptor,
    objects: ClassObjects,
}

/// Memoized classes of one context
#[derive(Default)]
pub struct TypeIdentityCache {
    entries: RefCell<FxHashMap<TypeKey, CacheEntry>>,
}

impl TypeIdentityCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructor for `descriptor`, creating the class on first use
    pub fn constructor_for(
        &self,
        context: &ExecutingContext,
        descriptor: &'static TypeDescriptor,
    ) -> ScriptResult<GcRef> {
        self.class_objects(context, descriptor)
            .map(|objects| objects.constructor)
    }

    /// Prototype for `descriptor`, creating the class on first use
    pub fn prototype_for(
        &self,
        context: &ExecutingContext,
        descriptor: &'static TypeDescriptor,
    ) -> ScriptResult<GcRef> {
        self.class_objects(context, descriptor)
            .map(|objects| objects.prototype)
    }

    /// Both class objects for `descriptor`, creating them on first use
    pub fn class_objects(
        &self,
        context: &ExecutingContext,
        descriptor: &'static TypeDescriptor,
    ) -> ScriptResult<ClassObjects> {
        match self.lookup(context, descriptor) {
            Some(objects) => Ok(objects),
            None => self.initialize(context, descriptor),
        }
    }

    /// Cached objects without creating anything
    pub fn cached(&self, descriptor: &'static TypeDescriptor) -> Option<ClassObjects> {
        self.entries
            .borrow()
            .get(&descriptor.key())
            .map(|entry| entry.objects)
    }

    /// Number of cached classes
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Check if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Drop every entry (context teardown)
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    fn lookup(
        &self,
        context: &ExecutingContext,
        descriptor: &'static TypeDescriptor,
    ) -> Option<ClassObjects> {
        let key = descriptor.key();
        let objects = self.entries.borrow().get(&key).map(|entry| entry.objects)?;

        let host = context.host();
        if host.is_alive(objects.constructor) && host.is_alive(objects.prototype) {
            return Some(objects);
        }

        tracing::debug!(
            target: "otter::bridge::types",
            class = descriptor.class_name,
            "cached class objects were reclaimed, recreating"
        );
        self.entries.borrow_mut().remove(&key);
        None
    }

    fn initialize(
        &self,
        context: &ExecutingContext,
        descriptor: &'static TypeDescriptor,
    ) -> ScriptResult<ClassObjects> {
        let parent_prototype = match descriptor.parent {
            Some(parent) => Some(self.class_objects(context, parent)?.prototype),
            None => None,
        };

        // Parent installers may have looked this type up already.
        if let Some(objects) = self.lookup(context, descriptor) {
            return Ok(objects);
        }

        let objects = context
            .host()
            .create_class(context, descriptor, parent_prototype)?;
        let key = descriptor.key();
        self.entries
            .borrow_mut()
            .insert(key, CacheEntry { descriptor, objects });

        if let Some(install) = descriptor.install {
            if let Err(exception) = install(context, &objects) {
                self.entries.borrow_mut().remove(&key);
                return Err(exception);
            }
        }

        tracing::trace!(
            target: "otter::bridge::types",
            class = descriptor.class_name,
            context = %context.id(),
            "class initialized"
        );
        Ok(objects)
    }
}

impl Trace for TypeIdentityCache {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for entry in self.entries.borrow().values() {
            entry.objects.trace(tracer);
        }
    }
}

impl fmt::Debug for TypeIdentityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.entries
                    .borrow()
                    .values()
                    .map(|entry| entry.descriptor.class_name),
            )
            .finish()
    }
}
