//! The transform node: applies continuations to a dependency's result.

use core::panic::Location;

use crate::cell::ResultCell;
use crate::error::{run_catching, Error, Result};
use crate::event::EventHandle;
use crate::node::{PromiseNode, TraceBuilder};

type ValueLeg<T, R> = Box<dyn FnOnce(T) -> Result<R> + Send>;
type ErrorLeg<R> = Box<dyn FnOnce(Error) -> Result<R> + Send>;

/// Wraps one dependency plus a value continuation and an error
/// continuation.
///
/// On readiness: a value runs the value leg, an error runs the error leg
/// (which may recover), and a value accompanied by a recoverable error
/// also runs the error leg. A panic in either leg is captured into the
/// error leg of the output.
///
/// The dependency is declared first so it drops before the continuations;
/// continuations commonly own objects the dependency still references.
pub(crate) struct TransformNode<T: Send + 'static, R> {
    dependency: Box<dyn PromiseNode<T>>,
    func: Option<ValueLeg<T, R>>,
    handler: Option<ErrorLeg<R>>,
    origin: &'static Location<'static>,
}

impl<T: Send + 'static, R: Send + 'static> TransformNode<T, R> {
    pub(crate) fn new(
        dependency: Box<dyn PromiseNode<T>>,
        func: ValueLeg<T, R>,
        handler: ErrorLeg<R>,
        origin: &'static Location<'static>,
    ) -> Self {
        Self {
            dependency,
            func: Some(func),
            handler: Some(handler),
            origin,
        }
    }
}

impl<T: Send + 'static, R: Send + 'static> PromiseNode<R> for TransformNode<T, R> {
    fn on_ready(&mut self, event: Option<EventHandle>) {
        // Pass-through: readiness is the dependency's readiness.
        self.dependency.on_ready(event);
    }

    fn get(&mut self, output: &mut ResultCell<R>) {
        let mut dep = ResultCell::empty();
        self.dependency.get(&mut dep);
        let (value, error) = dep.split();

        let result = if let Some(error) = error {
            let handler = self.handler.take().expect("transform already ran");
            run_catching(move || handler(error))
        } else {
            let value = value.expect("dependency was ready with neither value nor error");
            let func = self.func.take().expect("transform already ran");
            run_catching(move || func(value))
        };

        match result {
            Ok(value) => output.set_value(value),
            Err(error) => output.add_error(error),
        }
    }

    fn trace_into(&self, trace: &mut TraceBuilder) {
        trace.push("transform", Some(self.origin));
        self.dependency.trace_into(trace);
    }
}
