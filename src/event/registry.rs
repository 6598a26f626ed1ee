// src/event/registry.rs
//! Name-based invocation registry.
//!
//! Events carrying a [`NamedInvocation`] are resolved here instead of through
//! runtime reflection. The host application registers instance methods and
//! class constructors up front; anything unregistered fails with a typed
//! [`ExecutionError`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use super::{ActionResult, CONSTRUCTOR, NamedInvocation, run_guarded};
use crate::error::ExecutionError;
use crate::simulator::SimContext;
use crate::sync;
use crate::time::SimTime;

/// Handler invoked with the simulator context and the invocation arguments.
pub type InvocationHandler<T> = Arc<dyn Fn(&SimContext<T>, &[Value]) -> ActionResult + Send + Sync>;

enum Target<T: SimTime> {
    Instance(HashMap<String, InvocationHandler<T>>),
    Class(InvocationHandler<T>),
}

pub struct InvocationRegistry<T: SimTime> {
    targets: RwLock<HashMap<String, Target<T>>>,
}

impl<T: SimTime> InvocationRegistry<T> {
    pub fn new() -> Self {
        Self {
            targets: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `selector` on the instance `target`, replacing any previous
    /// handler for that selector. A class registered under the same name is replaced.
    pub fn register_instance<F>(&self, target: impl Into<String>, selector: impl Into<String>, handler: F)
    where
        F: Fn(&SimContext<T>, &[Value]) -> ActionResult + Send + Sync + 'static,
    {
        let target = target.into();
        let selector = selector.into();
        tracing::debug!("Registering {}.{}", target, selector);
        let mut targets = sync::write(&self.targets);
        let entry = targets
            .entry(target)
            .or_insert_with(|| Target::Instance(HashMap::new()));
        if let Target::Class(_) = entry {
            *entry = Target::Instance(HashMap::new());
        }
        if let Target::Instance(methods) = entry {
            methods.insert(selector, Arc::new(handler));
        }
    }

    /// Registers a class whose constructor is reached with the `"<init>"` selector.
    pub fn register_class<F>(&self, class: impl Into<String>, constructor: F)
    where
        F: Fn(&SimContext<T>, &[Value]) -> ActionResult + Send + Sync + 'static,
    {
        let class = class.into();
        tracing::debug!("Registering class {}", class);
        sync::write(&self.targets).insert(class, Target::Class(Arc::new(constructor)));
    }

    pub fn unregister(&self, target: &str) -> bool {
        sync::write(&self.targets).remove(target).is_some()
    }

    pub fn contains_target(&self, target: &str) -> bool {
        sync::read(&self.targets).contains_key(target)
    }

    pub fn clear(&self) {
        sync::write(&self.targets).clear();
    }

    fn resolve(&self, invocation: &NamedInvocation) -> Result<InvocationHandler<T>, ExecutionError> {
        let targets = sync::read(&self.targets);
        let target = targets
            .get(&invocation.target)
            .ok_or_else(|| ExecutionError::TargetUnresolvable(invocation.target.clone()))?;
        match target {
            Target::Instance(_) if invocation.selector == CONSTRUCTOR => {
                Err(ExecutionError::ConstructorOnInstance(invocation.target.clone()))
            }
            Target::Instance(methods) => methods.get(&invocation.selector).cloned().ok_or_else(|| {
                ExecutionError::MethodUnresolvable {
                    target: invocation.target.clone(),
                    selector: invocation.selector.clone(),
                }
            }),
            Target::Class(constructor) if invocation.selector == CONSTRUCTOR => Ok(Arc::clone(constructor)),
            Target::Class(_) => Err(ExecutionError::MethodUnresolvable {
                target: invocation.target.clone(),
                selector: invocation.selector.clone(),
            }),
        }
    }

    /// Resolves and runs the invocation. The registry lock is released before
    /// the handler runs, so handlers may register further targets.
    pub fn invoke(&self, ctx: &SimContext<T>, invocation: &NamedInvocation) -> Result<(), ExecutionError> {
        let handler = self.resolve(invocation)?;
        run_guarded(&invocation.describe(), || handler(ctx, &invocation.args))
    }
}

impl<T: SimTime> Default for InvocationRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::Simulator;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn call(target: &str, selector: &str, args: Vec<Value>) -> NamedInvocation {
        NamedInvocation {
            target: target.into(),
            selector: selector.into(),
            args,
        }
    }

    #[test]
    fn test_resolution_errors() {
        let sim: Simulator<f64> = Simulator::new();
        let ctx = sim.context();
        let registry = ctx.registry();
        registry.register_instance("counter", "inc", |_, _| Ok(()));
        registry.register_class("Customer", |_, _| Ok(()));

        assert_eq!(
            registry.invoke(&ctx, &call("missing", "inc", vec![])),
            Err(ExecutionError::TargetUnresolvable("missing".into()))
        );
        assert_eq!(
            registry.invoke(&ctx, &call("counter", "dec", vec![])),
            Err(ExecutionError::MethodUnresolvable {
                target: "counter".into(),
                selector: "dec".into()
            })
        );
        assert_eq!(
            registry.invoke(&ctx, &call("counter", CONSTRUCTOR, vec![])),
            Err(ExecutionError::ConstructorOnInstance("counter".into()))
        );
        assert!(matches!(
            registry.invoke(&ctx, &call("Customer", "inc", vec![])),
            Err(ExecutionError::MethodUnresolvable { .. })
        ));
        assert!(registry.invoke(&ctx, &call("Customer", CONSTRUCTOR, vec![])).is_ok());
    }

    #[test]
    fn test_invoke_passes_arguments() {
        let sim: Simulator<f64> = Simulator::new();
        let ctx = sim.context();
        let total = Arc::new(AtomicI64::new(0));
        let sink = Arc::clone(&total);
        ctx.registry().register_instance("acc", "add", move |_, args| {
            let n = args.first().and_then(Value::as_i64).ok_or("expected an integer")?;
            sink.fetch_add(n, Ordering::SeqCst);
            Ok(())
        });

        ctx.registry().invoke(&ctx, &call("acc", "add", vec![Value::from(7)])).unwrap();
        ctx.registry().invoke(&ctx, &call("acc", "add", vec![Value::from(5)])).unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 12);

        let err = ctx.registry().invoke(&ctx, &call("acc", "add", vec![])).unwrap_err();
        assert!(matches!(err, ExecutionError::InvocationFailed { .. }));
    }

    #[test]
    fn test_unregister() {
        let registry: InvocationRegistry<f64> = InvocationRegistry::new();
        registry.register_class("Job", |_, _| Ok(()));
        assert!(registry.contains_target("Job"));
        assert!(registry.unregister("Job"));
        assert!(!registry.unregister("Job"));
        assert!(!registry.contains_target("Job"));
    }
}
