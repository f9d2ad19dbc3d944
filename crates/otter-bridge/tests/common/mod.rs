//! Shared test host: a tiny script engine over the reference GC heap.
//!
//! Script functions are native closures stored as heap objects, promise jobs
//! are boxed closures, and every exception, event and class creation is
//! recorded for assertions.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use otter_bridge::{
    BridgeRuntime, ClassObjects, ContextConfig, ContextEvent, ExecutingContext, GcRef,
    HostEventQueue, ManualTimerHost, ScriptHost, ScriptResult, TimerHost, Tracer,
    TypeDescriptor, Value,
};
use otter_bridge_gc::{GcHeap, GcObject};

/// Body of a test script function
pub type FunctionBody = Rc<dyn Fn(&ExecutingContext, &[Value]) -> ScriptResult<Value>>;

type Job = Box<dyn FnOnce(&ExecutingContext) -> ScriptResult<()>>;

type EventHandler = Rc<dyn Fn(&ExecutingContext, &ContextEvent)>;

/// Function object on the test heap
pub struct ScriptFunction {
    body: FunctionBody,
    captures: Vec<GcRef>,
}

impl GcObject for ScriptFunction {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for handle in &self.captures {
            tracer.visit(*handle);
        }
    }
}

/// Plain object with a label and outgoing references
pub struct PlainObject {
    pub label: String,
    pub refs: RefCell<Vec<GcRef>>,
}

impl GcObject for PlainObject {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for handle in self.refs.borrow().iter() {
            tracer.visit(*handle);
        }
    }
}

/// Recording script host
pub struct TestHost {
    pub heap: GcHeap,
    jobs: RefCell<VecDeque<Job>>,
    exceptions: RefCell<Vec<Value>>,
    events: RefCell<Vec<ContextEvent>>,
    classes_created: RefCell<Vec<&'static str>>,
    event_handler: RefCell<Option<EventHandler>>,
}

impl TestHost {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            heap: GcHeap::new(),
            jobs: RefCell::new(VecDeque::new()),
            exceptions: RefCell::new(Vec::new()),
            events: RefCell::new(Vec::new()),
            classes_created: RefCell::new(Vec::new()),
            event_handler: RefCell::new(None),
        })
    }

    /// Allocate a script function
    pub fn function<F>(&self, body: F) -> Value
    where
        F: Fn(&ExecutingContext, &[Value]) -> ScriptResult<Value> + 'static,
    {
        self.function_capturing(Vec::new(), body)
    }

    /// Allocate a script function that keeps `captures` alive
    pub fn function_capturing<F>(&self, captures: Vec<GcRef>, body: F) -> Value
    where
        F: Fn(&ExecutingContext, &[Value]) -> ScriptResult<Value> + 'static,
    {
        let handle = self.heap.allocate(ScriptFunction {
            body: Rc::new(body),
            captures,
        });
        Value::object(handle)
    }

    /// Allocate a plain object
    pub fn object(&self, label: &str) -> GcRef {
        self.heap.allocate(PlainObject {
            label: label.to_string(),
            refs: RefCell::new(Vec::new()),
        })
    }

    /// Label of a plain object value
    pub fn label(&self, value: &Value) -> Option<String> {
        let handle = value.as_object()?;
        self.heap
            .get::<PlainObject>(handle)
            .map(|object| object.label.clone())
    }

    /// Queue a promise job
    pub fn enqueue_job<F>(&self, job: F)
    where
        F: FnOnce(&ExecutingContext) -> ScriptResult<()> + 'static,
    {
        self.jobs.borrow_mut().push_back(Box::new(job));
    }

    /// Number of queued jobs
    pub fn pending_jobs(&self) -> usize {
        self.jobs.borrow().len()
    }

    /// Exceptions reported so far
    pub fn exceptions(&self) -> Vec<Value> {
        self.exceptions.borrow().clone()
    }

    /// Take events dispatched so far
    pub fn take_events(&self) -> Vec<ContextEvent> {
        self.events.take()
    }

    /// Class names in creation order
    pub fn classes_created(&self) -> Vec<&'static str> {
        self.classes_created.borrow().clone()
    }

    /// Run `handler` for every dispatched event
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&ExecutingContext, &ContextEvent) + 'static,
    {
        *self.event_handler.borrow_mut() = Some(Rc::new(handler));
    }
}

impl ScriptHost for TestHost {
    fn call_function(
        &self,
        context: &ExecutingContext,
        function: &Value,
        _this: &Value,
        args: &[Value],
    ) -> ScriptResult<Value> {
        let Some(function) = function
            .as_object()
            .and_then(|handle| self.heap.get::<ScriptFunction>(handle))
        else {
            return Err(self.create_type_error(context, "not a function"));
        };
        (function.body)(context, args)
    }

    fn create_type_error(&self, _context: &ExecutingContext, message: &str) -> Value {
        Value::object(self.object(&format!("TypeError: {message}")))
    }

    fn run_pending_job(&self, context: &ExecutingContext) -> Option<ScriptResult<()>> {
        let job = self.jobs.borrow_mut().pop_front()?;
        Some(job(context))
    }

    fn report_exception(&self, _context: &ExecutingContext, exception: &Value) {
        self.exceptions.borrow_mut().push(exception.clone());
    }

    fn create_class(
        &self,
        _context: &ExecutingContext,
        descriptor: &'static TypeDescriptor,
        parent_prototype: Option<GcRef>,
    ) -> ScriptResult<ClassObjects> {
        self.classes_created
            .borrow_mut()
            .push(descriptor.class_name);

        let prototype = self.object(&format!("{}.prototype", descriptor.class_name));
        if let Some(parent) = parent_prototype {
            if let Some(object) = self.heap.get::<PlainObject>(prototype) {
                object.refs.borrow_mut().push(parent);
            }
        }
        let constructor = self.object(descriptor.class_name);
        if let Some(object) = self.heap.get::<PlainObject>(constructor) {
            object.refs.borrow_mut().push(prototype);
        }

        Ok(ClassObjects {
            constructor,
            prototype,
        })
    }

    fn dispatch_event(&self, context: &ExecutingContext, event: ContextEvent) {
        self.events.borrow_mut().push(event.clone());
        let handler = self.event_handler.borrow().clone();
        if let Some(handler) = handler {
            handler(context, &event);
        }
    }

    fn is_alive(&self, handle: GcRef) -> bool {
        self.heap.is_alive(handle)
    }
}

/// Runtime wired to a [`TestHost`] and a [`ManualTimerHost`]
pub struct Harness {
    pub host: Rc<TestHost>,
    pub timers: Rc<ManualTimerHost>,
    pub runtime: BridgeRuntime,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ContextConfig::default())
    }

    pub fn with_config(config: ContextConfig) -> Self {
        let host = TestHost::new();
        let events = HostEventQueue::new();
        let timers = Rc::new(ManualTimerHost::new(events.clone()));
        let script_host: Rc<dyn ScriptHost> = host.clone();
        let timer_host: Rc<dyn TimerHost> = timers.clone();
        let runtime =
            BridgeRuntime::new(script_host, timer_host, events).with_default_config(config);
        Self {
            host,
            timers,
            runtime,
        }
    }

    /// Collect garbage with the runtime as the only root set
    pub fn collect(&self) -> usize {
        self.host.heap.collect(&[&self.runtime])
    }
}

/// Function value that counts its calls
pub fn counting_function(host: &TestHost) -> (Value, Rc<Cell<usize>>) {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let function = host.function(move |_, _| {
        counter.set(counter.get() + 1);
        Ok(Value::undefined())
    });
    (function, calls)
}
