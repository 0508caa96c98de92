// ABOUTME: Engine builder, Script/Expression/Template host handles, process-wide parse cache

use crate::arithmetic::{ArithmeticPolicy, DefaultArithmetic};
use crate::ast::AstNode;
use crate::context::Context;
use crate::error::{EvalError, ParseError};
use crate::features::FeatureSet;
use crate::frame::Frame;
use crate::interpreter::Interpreter;
use crate::introspect::{AllowAll, Permissions, Uberspect};
use crate::options::Options;
use crate::parser::parse_script;
use crate::pragma::{self, Pragma};
use crate::printer::pretty_print;
use crate::scope::{Analyzer, ScopeTable};
use crate::template::{JxltEngine, Template};
use crate::value::{Callable, Value};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// The minimal payload a `Value::Callable::Script` carries — everything
/// `invoke_callable` needs to run a compiled script as a function without
/// reaching back into the `Engine`/`Script` handle that created it. Shared
/// by reference between a `Script` and any `Value` built from it, so
/// passing a script as a callable is a cheap `Arc::clone`.
#[derive(Debug)]
pub struct CompiledScript {
    pub ast: Arc<AstNode>,
    pub scope: Arc<ScopeTable>,
    pub params: Vec<String>,
}

/// The pieces of an `Engine` needed at evaluation time, shared (not
/// cloned) by every `Script`/`Expression`/`Template` it produced — see §5
/// "Lifecycle": built once, then immutable and `Send + Sync`.
pub struct EngineShared {
    features: FeatureSet,
    arithmetic: Arc<dyn ArithmeticPolicy + Send + Sync>,
    introspector: Uberspect,
    base_options: Options,
    parse_cache: RwLock<HashMap<String, Arc<ParsedUnit>>>,
}

struct ParsedUnit {
    compiled: Arc<CompiledScript>,
    pragmas: Vec<Pragma>,
}

impl EngineShared {
    /// Parses and analyzes `source` (with optional named parameters),
    /// consulting the process-wide parse cache first — a miss recomputes
    /// and populates it, matching §5's "at-most-cached" semantics.
    fn parse(&self, source: &str, params: &[String]) -> Result<Arc<ParsedUnit>, ParseError> {
        let cache_key = format!("{}\u{0}{}", params.join(","), source);
        if let Some(hit) = self.parse_cache.read().get(&cache_key) {
            return Ok(Arc::clone(hit));
        }
        let ast = parse_script(source, self.features.clone())?;
        let pragmas = pragma::collect_pragmas(&ast);
        let scope_features = pragma::scope_features(&pragmas, &self.features);
        let scope = if params.is_empty() {
            Analyzer::new(&scope_features).analyze(&ast)?
        } else {
            Analyzer::new(&scope_features).analyze_with_params(&ast, params)?
        };
        let unit = Arc::new(ParsedUnit {
            compiled: Arc::new(CompiledScript { ast, scope: Arc::new(scope), params: params.to_vec() }),
            pragmas,
        });
        let mut cache = self.parse_cache.write();
        if cache.len() >= 4096 {
            cache.clear();
        }
        cache.insert(cache_key, Arc::clone(&unit));
        Ok(unit)
    }

    fn resolve_options(&self, ctx: &dyn Context, pragmas: &[Pragma]) -> Options {
        let mut options = ctx.as_options_handle().map(|h| h.options()).unwrap_or_else(|| self.base_options.clone());
        pragma::apply_pragmas(pragmas, &mut options, ctx);
        if options.shared_instance {
            if let Some(handle) = ctx.as_options_handle() {
                handle.set_options(options.clone());
            }
        }
        options
    }

    fn run(&self, compiled: &Arc<CompiledScript>, ctx: &dyn Context, options: Options, args: &[Value]) -> Result<Value, EvalError> {
        let interp = Interpreter { ctx, options, arithmetic: self.arithmetic.as_ref(), introspector: &self.introspector, scope: Arc::clone(&compiled.scope) };
        let frame = Frame::root(compiled.scope.root_slots);
        for (i, _) in compiled.params.iter().enumerate() {
            frame.set_local(i, args.get(i).cloned().unwrap_or(Value::Null));
        }
        interp.run(&compiled.ast, &frame)
    }
}

/// Builds an immutable `Engine` (§6 "build(features, arithmetic,
/// introspector, permissions, cache, strict, silent, safe, lexical,
/// lexicalShade, namespaces)"). Host-supplied namespace bindings are a
/// per-evaluation `Context` capability (`NamespaceResolver`, see
/// `context.rs`) rather than an engine-wide table — a binding set that
/// differs per embedding call is the common case, and the capability
/// already covers the builder-level "namespaces" parameter named in
/// spec.md §6 without engine-wide state that would have to smuggle
/// `Rc`-based `Value`s across the `Send + Sync` boundary `Engine` promises.
pub struct EngineBuilder {
    features: FeatureSet,
    arithmetic: Arc<dyn ArithmeticPolicy + Send + Sync>,
    permissions: Box<dyn Permissions + Send + Sync>,
    options: Options,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        EngineBuilder {
            features: FeatureSet::default(),
            arithmetic: Arc::new(DefaultArithmetic::default()),
            permissions: Box::new(AllowAll),
            options: Options::default(),
        }
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        EngineBuilder::default()
    }

    pub fn features(mut self, features: FeatureSet) -> Self {
        self.features = features;
        self
    }

    pub fn arithmetic(mut self, policy: Arc<dyn ArithmeticPolicy + Send + Sync>) -> Self {
        self.arithmetic = policy;
        self
    }

    pub fn permissions(mut self, permissions: Box<dyn Permissions + Send + Sync>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.options.strict = strict;
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.options.silent = silent;
        self
    }

    pub fn safe(mut self, safe: bool) -> Self {
        self.options.safe = safe;
        self
    }

    pub fn lexical(mut self, lexical: bool) -> Self {
        self.features.lexical = lexical;
        self
    }

    pub fn lexical_shade(mut self, lexical_shade: bool) -> Self {
        self.features.lexical_shade = lexical_shade;
        self
    }

    pub fn build(self) -> Engine {
        Engine(Arc::new(EngineShared {
            features: self.features,
            arithmetic: self.arithmetic,
            introspector: Uberspect::new(self.permissions),
            base_options: self.options,
            parse_cache: RwLock::new(HashMap::new()),
        }))
    }
}

/// An immutable, cheaply-cloned (`Arc`-backed) handle compiling and running
/// EXL source. Thread-shareable once built; `Script`/`Expression`/
/// `Template` handles it produces embed no engine-specific symbol ids of
/// their own beyond their own `ScopeTable`, so they may be evaluated from
/// any thread, each supplying its own `Context`.
#[derive(Clone)]
pub struct Engine(Arc<EngineShared>);

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn create_script(&self, source: &str, param_names: &[String]) -> Result<Script, ParseError> {
        let unit = self.0.parse(source, param_names)?;
        Ok(Script { shared: Arc::clone(&self.0), unit, source: source.to_string() })
    }

    pub fn create_expression(&self, source: &str) -> Result<Expression, ParseError> {
        let unit = self.0.parse(source, &[])?;
        Ok(Expression { shared: Arc::clone(&self.0), unit, source: source.to_string() })
    }

    pub fn create_jxlt_engine(&self) -> JxltEngine {
        JxltEngine::new(self.clone())
    }

    pub(crate) fn shared(&self) -> &Arc<EngineShared> {
        &self.0
    }
}

/// A compiled, named-parameter script (§6 `createScript`). `execute`
/// resolves options fresh from `ctx` on every call (applying this script's
/// own pragmas), per the Open Question resolution recorded in
/// `DESIGN.md` — pragma overrides do not persist across calls unless the
/// host's `Options` carries `shared_instance: true`.
pub struct Script {
    shared: Arc<EngineShared>,
    unit: Arc<ParsedUnit>,
    source: String,
}

impl Script {
    pub fn execute(&self, ctx: &dyn Context, args: &[Value]) -> Result<Value, EvalError> {
        let options = self.shared.resolve_options(ctx, &self.unit.pragmas);
        self.shared.run(&self.unit.compiled, ctx, options, args)
    }

    pub fn get_parameters(&self) -> &[String] {
        &self.unit.compiled.params
    }

    pub fn get_source_text(&self) -> &str {
        &self.source
    }

    pub fn get_parsed_text(&self) -> String {
        pretty_print(&self.unit.compiled.ast)
    }

    /// A `Value` wrapping this script as a callable — `Arc::clone` of the
    /// shared `CompiledScript` payload, so calling it from within another
    /// evaluation costs nothing beyond a refcount bump.
    pub fn as_callable(&self) -> Value {
        Value::Callable(Rc::new(Callable::Script(Arc::clone(&self.unit.compiled))))
    }
}

/// A compiled, parameterless expression (§6 `createExpression`).
pub struct Expression {
    shared: Arc<EngineShared>,
    unit: Arc<ParsedUnit>,
    source: String,
}

impl Expression {
    pub fn evaluate(&self, ctx: &dyn Context) -> Result<Value, EvalError> {
        let options = self.shared.resolve_options(ctx, &self.unit.pragmas);
        self.shared.run(&self.unit.compiled, ctx, options, &[])
    }

    pub fn get_source_text(&self) -> &str {
        &self.source
    }

    pub fn get_parsed_text(&self) -> String {
        pretty_print(&self.unit.compiled.ast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MapContext;

    #[test]
    fn executes_a_simple_script() {
        let engine = Engine::builder().build();
        let script = engine.create_script("1 + 2;", &[]).unwrap();
        let ctx = MapContext::new();
        assert_eq!(script.execute(&ctx, &[]).unwrap(), Value::Int(3));
    }

    #[test]
    fn script_with_named_parameters() {
        let engine = Engine::builder().build();
        let script = engine.create_script("a + b;", &["a".to_string(), "b".to_string()]).unwrap();
        let ctx = MapContext::new();
        assert_eq!(script.execute(&ctx, &[Value::Int(4), Value::Int(5)]).unwrap(), Value::Int(9));
        assert_eq!(script.get_parameters(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn expression_evaluates_against_context() {
        let engine = Engine::builder().build();
        let expr = engine.create_expression("x * 2;").unwrap();
        let ctx = MapContext::new();
        ctx.set("x", Value::Int(21));
        assert_eq!(expr.evaluate(&ctx).unwrap(), Value::Int(42));
    }

    #[test]
    fn repeated_parse_hits_the_cache() {
        let engine = Engine::builder().build();
        let a = engine.create_script("1;", &[]).unwrap();
        let b = engine.create_script("1;", &[]).unwrap();
        assert!(Arc::ptr_eq(&a.unit, &b.unit));
    }

    #[test]
    fn script_as_callable_can_be_invoked() {
        let engine = Engine::builder().build();
        let inc = engine.create_script("n + 1;", &["n".to_string()]).unwrap();
        let ctx = MapContext::new();
        ctx.set("inc", inc.as_callable());
        let caller = engine.create_expression("inc(41);").unwrap();
        assert_eq!(caller.evaluate(&ctx).unwrap(), Value::Int(42));
    }

    #[test]
    fn pragma_strict_is_applied_fresh_per_call() {
        let engine = Engine::builder().build();
        let script = engine.create_script("#pragma jexl.options '+strict';\nmissing;", &[]).unwrap();
        let ctx = MapContext::new();
        assert!(script.execute(&ctx, &[]).is_err());
    }
}
