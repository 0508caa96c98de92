// ABOUTME: Host-object member resolution, a process-wide cache, and a permissions filter

use crate::error::EvalError;
use crate::token::Span;
use crate::value::{HostObject, Value};
use parking_lot::RwLock;
use std::collections::HashMap;

/// How many positional arguments a registered method/getter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    /// Accepts any count in `min..=max` (a Java-style overload family).
    Range(usize, usize),
    /// Accepts `min` or more (a vararg tail).
    Variadic(usize),
}

impl Arity {
    fn accepts(&self, argc: usize) -> bool {
        match *self {
            Arity::Exact(n) => argc == n,
            Arity::Range(lo, hi) => (lo..=hi).contains(&argc),
            Arity::Variadic(min) => argc >= min,
        }
    }

    /// Lower is a better match; `None` means this arity cannot accept
    /// `argc` at all. Exact arity scores 0 (JEXL's "exact" tier); a
    /// variadic/range match that still has to absorb extra or missing
    /// positions scores like JEXL's vararg tier (4), since a `HostObject`
    /// only reports arity, not per-parameter types, to compare on.
    fn score(&self, argc: usize) -> Option<u32> {
        if !self.accepts(argc) {
            return None;
        }
        match *self {
            Arity::Exact(_) => Some(0),
            Arity::Range(lo, hi) if argc == lo || argc == hi => Some(2),
            Arity::Range(..) => Some(3),
            Arity::Variadic(_) => Some(4),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MethodSignature {
    pub arity: Arity,
}

/// The set of methods/properties a `HostObject` advertises up front, used
/// only for resolution scoring and ambiguity detection; the dispatch
/// itself still goes through `HostObject::call_method`/`get_property`.
#[derive(Debug, Clone, Default)]
pub struct MemberTable {
    pub methods: HashMap<String, Vec<MethodSignature>>,
}

impl MemberTable {
    pub fn with_method(mut self, name: impl Into<String>, arity: Arity) -> Self {
        self.methods.entry(name.into()).or_default().push(MethodSignature { arity });
        self
    }
}

enum MatchOutcome {
    /// No registered member covers this call; fall back to calling
    /// `call_method` directly (unregistered or dynamically-dispatched
    /// objects still work, just without a resolution score).
    Unregistered,
    Unique,
    Ambiguous,
    NoArityMatch,
}

fn resolve(table: &MemberTable, name: &str, argc: usize) -> MatchOutcome {
    let Some(sigs) = table.methods.get(name) else {
        return MatchOutcome::Unregistered;
    };
    let mut scored: Vec<u32> = sigs.iter().filter_map(|s| s.arity.score(argc)).collect();
    if scored.is_empty() {
        return MatchOutcome::NoArityMatch;
    }
    scored.sort_unstable();
    if scored.len() > 1 && scored[0] == scored[1] {
        MatchOutcome::Ambiguous
    } else {
        MatchOutcome::Unique
    }
}

/// Gates which classes and members of a host object are reachable from
/// script. A denied member behaves exactly like a missing one (§4.6): the
/// script sees "no such method", never a distinguishable security error.
pub trait Permissions {
    fn is_class_allowed(&self, type_name: &str) -> bool;
    fn is_member_allowed(&self, type_name: &str, member: &str) -> bool;
}

/// The default, permissive policy: every class and member is reachable.
/// Hosts that embed untrusted scripts are expected to install a stricter
/// `Permissions` on the `Engine`.
pub struct AllowAll;

impl Permissions for AllowAll {
    fn is_class_allowed(&self, _type_name: &str) -> bool {
        true
    }

    fn is_member_allowed(&self, _type_name: &str, _member: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    type_name: String,
    member: String,
    argc: usize,
}

#[derive(Clone, Copy)]
enum CacheEntry {
    Resolvable,
    Unresolvable,
}

/// The introspection façade the interpreter calls through for every
/// property access, index, and method call on a `Value::Object`. Wraps
/// `HostObject` dispatch with a permissions check and a resolution cache
/// so repeated calls to the same method on the same host type skip
/// re-scoring overload families.
pub struct Uberspect {
    permissions: Box<dyn Permissions + Send + Sync>,
    cache: RwLock<HashMap<CacheKey, CacheEntry>>,
    cache_capacity: usize,
}

impl Default for Uberspect {
    fn default() -> Self {
        Uberspect::new(Box::new(AllowAll))
    }
}

impl Uberspect {
    pub fn new(permissions: Box<dyn Permissions + Send + Sync>) -> Self {
        Uberspect { permissions, cache: RwLock::new(HashMap::new()), cache_capacity: 4096 }
    }

    fn cached_resolvable(&self, key: &CacheKey) -> Option<bool> {
        self.cache.read().get(key).map(|e| matches!(e, CacheEntry::Resolvable))
    }

    fn remember(&self, key: CacheKey, entry: CacheEntry) {
        let mut cache = self.cache.write();
        if cache.len() >= self.cache_capacity {
            // Unbounded growth would defeat the point of a process-wide
            // cache; evict arbitrarily rather than track real LRU order
            // since entries are cheap to recompute.
            cache.clear();
        }
        cache.insert(key, entry);
    }

    pub fn get_property(&self, obj: &dyn HostObject, name: &str, span: Span) -> Result<Value, EvalError> {
        let type_name = obj.type_name().to_string();
        if !self.permissions.is_class_allowed(&type_name) || !self.permissions.is_member_allowed(&type_name, name) {
            return Err(EvalError::no_property(span, name, &type_name));
        }
        match obj.get_property(name) {
            Some(v) => Ok(v),
            None => Err(EvalError::no_property(span, name, &type_name)),
        }
    }

    pub fn set_property(&self, obj: &dyn HostObject, name: &str, value: Value, span: Span) -> Result<(), EvalError> {
        let type_name = obj.type_name().to_string();
        if !self.permissions.is_class_allowed(&type_name) || !self.permissions.is_member_allowed(&type_name, name) {
            return Err(EvalError::no_property(span, name, &type_name));
        }
        obj.set_property(name, value).map_err(|cause| EvalError::bad_assignment(span, cause))
    }

    pub fn call_method(&self, obj: &dyn HostObject, name: &str, args: &[Value], span: Span) -> Result<Value, EvalError> {
        let type_name = obj.type_name().to_string();
        if !self.permissions.is_class_allowed(&type_name) || !self.permissions.is_member_allowed(&type_name, name) {
            return Err(EvalError::no_method(span, name, &type_name));
        }

        let table = obj.members();
        match resolve(&table, name, args.len()) {
            MatchOutcome::Ambiguous => return Err(EvalError::ambiguous_method(span, name, &type_name)),
            MatchOutcome::NoArityMatch => return Err(EvalError::no_method(span, name, &type_name)),
            MatchOutcome::Unregistered | MatchOutcome::Unique => {}
        }

        let key = CacheKey { type_name: type_name.clone(), member: name.to_string(), argc: args.len() };
        if self.cached_resolvable(&key) == Some(false) {
            return Err(EvalError::no_method(span, name, &type_name));
        }

        match obj.call_method(name, args) {
            Some(Ok(v)) => {
                self.remember(key, CacheEntry::Resolvable);
                Ok(v)
            }
            Some(Err(cause)) => {
                self.remember(key, CacheEntry::Resolvable);
                Err(EvalError::method_exception(span, name, &type_name, cause))
            }
            None => {
                self.remember(key, CacheEntry::Unresolvable);
                Err(EvalError::no_method(span, name, &type_name))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Debug)]
    struct Counter {
        value: RefCell<i64>,
    }

    impl HostObject for Counter {
        fn type_name(&self) -> &str {
            "Counter"
        }

        fn get_property(&self, name: &str) -> Option<Value> {
            match name {
                "value" => Some(Value::Int(*self.value.borrow())),
                _ => None,
            }
        }

        fn set_property(&self, name: &str, value: Value) -> Result<(), String> {
            if name == "value" {
                if let Value::Int(i) = value {
                    *self.value.borrow_mut() = i;
                    return Ok(());
                }
            }
            Err(format!("no such property {name}"))
        }

        fn call_method(&self, name: &str, args: &[Value]) -> Option<Result<Value, String>> {
            match name {
                "add" => {
                    let Value::Int(n) = args.first()? else { return Some(Err("add expects an int".into())) };
                    *self.value.borrow_mut() += n;
                    Some(Ok(Value::Int(*self.value.borrow())))
                }
                _ => None,
            }
        }

        fn members(&self) -> MemberTable {
            MemberTable::default().with_method("add", Arity::Exact(1))
        }
    }

    fn span() -> Span {
        Span::new(0, 0, 1, 1)
    }

    #[test]
    fn resolves_property_and_method() {
        let obj = Counter { value: RefCell::new(10) };
        let uber = Uberspect::default();
        assert_eq!(uber.get_property(&obj, "value", span()).unwrap(), Value::Int(10));
        assert_eq!(uber.call_method(&obj, "add", &[Value::Int(5)], span()).unwrap(), Value::Int(15));
    }

    #[test]
    fn unknown_method_is_no_method_error() {
        let obj = Counter { value: RefCell::new(0) };
        let uber = Uberspect::default();
        assert!(uber.call_method(&obj, "missing", &[], span()).is_err());
    }

    #[test]
    fn wrong_arity_is_rejected_before_dispatch() {
        let obj = Counter { value: RefCell::new(0) };
        let uber = Uberspect::default();
        assert!(uber.call_method(&obj, "add", &[], span()).is_err());
    }

    struct DenyAll;
    impl Permissions for DenyAll {
        fn is_class_allowed(&self, _: &str) -> bool {
            false
        }
        fn is_member_allowed(&self, _: &str, _: &str) -> bool {
            false
        }
    }

    #[test]
    fn denied_class_behaves_like_missing_member() {
        let obj = Counter { value: RefCell::new(0) };
        let uber = Uberspect::new(Box::new(DenyAll));
        let denied = uber.get_property(&obj, "value", span());
        let missing_uber = Uberspect::default();
        let missing = missing_uber.get_property(&obj, "nope", span());
        assert!(denied.is_err() && missing.is_err());
    }
}
