// ABOUTME: Host-supplied variable bindings and optional capability traits

use crate::error::EvalError;
use crate::options::Options;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;

/// Host-supplied binding: a key-value store of globally visible names. A
/// context may also implement any of the capability traits below; the
/// interpreter probes for them via `as_namespace_resolver` etc. rather than
/// requiring a single monolithic trait, so a host only opts into the
/// capabilities it needs.
pub trait Context {
    fn get(&self, name: &str) -> Option<Value>;
    fn set(&self, name: &str, value: Value);
    fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    fn as_namespace_resolver(&self) -> Option<&dyn NamespaceResolver> {
        None
    }
    fn as_class_registry(&self) -> Option<&dyn ClassRegistry> {
        None
    }
    fn as_pragma_processor(&self) -> Option<&dyn PragmaProcessor> {
        None
    }
    fn as_annotation_processor(&self) -> Option<&dyn AnnotationProcessor> {
        None
    }
    fn as_options_handle(&self) -> Option<&dyn OptionsHandle> {
        None
    }

    /// The cooperative-cancellation flag polled by the interpreter when
    /// `Options::cancellable` is set (§4.4 "Cancellation"). `None` means
    /// this host never cancels evaluations.
    fn cancel_flag(&self) -> Option<&std::sync::atomic::AtomicBool> {
        None
    }
}

/// Resolves a namespace prefix (`ns:fn(args)`) to a callable functor.
pub trait NamespaceResolver {
    fn resolve_namespace(&self, prefix: &str) -> Option<Value>;
}

/// Resolves `new(ClassName, args…)` (§4.4) to a constructed `Value`. The
/// core ships no classes of its own; a host that wants `new` reachable
/// from script registers one of these on its `Context`.
pub trait ClassRegistry {
    fn construct(&self, class_name: &str, args: &[Value]) -> Result<Value, EvalError>;
}

/// Receives `#pragma key value` directives at the first evaluation.
pub trait PragmaProcessor {
    fn process_pragma(&self, key: &str, value: &str, options: &mut Options);
}

/// Wraps an annotated statement with host-defined semantics; receives the
/// annotation name, its evaluated argument values, and a deferred callable
/// representing the wrapped statement.
pub trait AnnotationProcessor {
    fn process_annotation(&self, name: &str, args: &[Value], stmt: AnnotatedStmt) -> Result<Value, EvalError>;
}

/// A deferred statement handed to an `AnnotationProcessor`; calling it
/// evaluates the wrapped statement exactly once. A `return`/`break`/
/// `continue` reached inside the wrapped statement collapses to its
/// carried value (or `null`) rather than escaping through the processor.
pub struct AnnotatedStmt<'a> {
    pub(crate) run: Box<dyn FnOnce() -> Result<Value, EvalError> + 'a>,
}

impl<'a> AnnotatedStmt<'a> {
    pub fn invoke(self) -> Result<Value, EvalError> {
        (self.run)()
    }
}

/// Supplies a per-evaluation `Options` override, consulted before the
/// host-passed `Options` argument.
pub trait OptionsHandle {
    fn options(&self) -> Options;

    /// Writes mutated options back to the host, consulted when
    /// `Options::shared_instance` is set so pragma-driven mutations persist
    /// across calls sharing this handle. Default no-op: most hosts treat
    /// options as read-only per evaluation.
    fn set_options(&self, _options: Options) {}
}

/// A plain `HashMap`-backed `Context`, the reference implementation used by
/// the CLI/REPL and by tests — analogous to the teacher's
/// `Environment::new()` global scope, but addressed by the `Context` trait
/// rather than the frame chain (free variables only; locals live in
/// `frame.rs`).
#[derive(Debug, Default)]
pub struct MapContext {
    vars: RefCell<HashMap<String, Value>>,
}

impl MapContext {
    pub fn new() -> Self {
        MapContext::default()
    }

    pub fn with(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        MapContext { vars: RefCell::new(pairs.into_iter().collect()) }
    }
}

impl Context for MapContext {
    fn get(&self, name: &str) -> Option<Value> {
        self.vars.borrow().get(name).cloned()
    }

    fn set(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_context_roundtrips_values() {
        let ctx = MapContext::new();
        ctx.set("x", Value::Int(42));
        assert_eq!(ctx.get("x"), Some(Value::Int(42)));
        assert_eq!(ctx.get("missing"), None);
    }

    #[test]
    fn with_seeds_initial_bindings() {
        let ctx = MapContext::with([("a".to_string(), Value::Int(1))]);
        assert_eq!(ctx.get("a"), Some(Value::Int(1)));
    }
}
