// ABOUTME: The runtime value union and its container/callable companions

use crate::ast::AstNode;
use crate::context::Context;
use crate::error::EvalError;
use crate::options::Options;
use crate::token::Span;
use indexmap::{IndexMap, IndexSet};
use num_bigint::BigInt;
use rust_decimal::Decimal;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

/// A restricted, hashable projection of `Value` used as a map/set key.
/// EXL follows the common scripting-language convention of scoping map
/// keys down to scalars; a non-scalar key in a map literal is a coercion
/// failure (`EvalError::Arithmetic`) at evaluation time, not a parse error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapKey {
    Null,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
}

impl Hash for MapKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            MapKey::Null => 0u8.hash(state),
            MapKey::Bool(b) => (1u8, b).hash(state),
            MapKey::Int(i) => (2u8, i).hash(state),
            MapKey::Str(s) => (3u8, s.as_ref()).hash(state),
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Null => write!(f, "null"),
            MapKey::Bool(b) => write!(f, "{b}"),
            MapKey::Int(i) => write!(f, "{i}"),
            MapKey::Str(s) => write!(f, "{s}"),
        }
    }
}

impl MapKey {
    pub fn from_value(v: &Value) -> Option<MapKey> {
        match v {
            Value::Null => Some(MapKey::Null),
            Value::Bool(b) => Some(MapKey::Bool(*b)),
            Value::Int(i) => Some(MapKey::Int(*i)),
            Value::Str(s) => Some(MapKey::Str(s.clone())),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            MapKey::Null => Value::Null,
            MapKey::Bool(b) => Value::Bool(b),
            MapKey::Int(i) => Value::Int(i),
            MapKey::Str(s) => Value::Str(s),
        }
    }
}

pub type ExlArray = Rc<RefCell<Vec<Value>>>;
pub type ExlMap = Rc<RefCell<IndexMap<MapKey, Value>>>;
pub type ExlSet = Rc<RefCell<IndexSet<MapKey>>>;

/// The tagged runtime value union. Cheap to clone: containers are
/// reference-counted and shared, not deep-copied, matching scenario S4
/// (`foo[0] = 43` must be visible through every alias of `foo`).
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    BigInt(Rc<BigInt>),
    Float(f64),
    Decimal(Rc<Decimal>),
    Str(Rc<str>),
    Array(ExlArray),
    Map(ExlMap),
    Set(ExlSet),
    Object(Rc<dyn HostObject>),
    Callable(Rc<Callable>),
    /// Inclusive integer range, lazily iterated (see `Value::iter`).
    Range(i64, i64),
}

/// Opaque host object with introspection support (§4.6). The crate ships
/// no concrete implementations beyond the test/demo struct in
/// `engine.rs`'s doctests and `tests/`; everything else is the host's.
pub trait HostObject: fmt::Debug {
    fn type_name(&self) -> &str;

    fn get_property(&self, name: &str) -> Option<Value>;

    fn set_property(&self, name: &str, value: Value) -> Result<(), String>;

    fn call_method(&self, name: &str, args: &[Value]) -> Option<Result<Value, String>>;

    /// The member table used by `Uberspect` for resolution scoring and
    /// caching. Implementations with a fixed, known method surface should
    /// register it here; the default (empty table) falls back to calling
    /// `call_method` directly with no pre-resolution bookkeeping.
    fn members(&self) -> crate::introspect::MemberTable {
        crate::introspect::MemberTable::default()
    }

    /// Host iterator protocol for `for(x : it)` (§4.4) over a host object
    /// that isn't one of the built-in container variants. `None` means
    /// this object is not iterable.
    fn iterate(&self) -> Option<Vec<Value>> {
        None
    }
}

/// The three shapes a `Value::Callable` may take: an interpreted lambda
/// closing over a frame, a pre-compiled script invoked as a function, or a
/// host-native function pointer.
pub enum Callable {
    Lambda {
        params: Vec<String>,
        /// The frame active when this lambda literal was evaluated. Its own
        /// parent chain already reaches every enclosing scope, so captures
        /// are by reference through this one pointer rather than a list of
        /// per-symbol cells (§4.3 "Captures").
        enclosing: Rc<crate::frame::Frame>,
        body: Arc<AstNode>,
        /// Slot count for this lambda's own frame, resolved once against
        /// `scope` at creation time.
        slot_count: usize,
        /// The scope table the body was analyzed against — shared with
        /// whichever script or lambda textually encloses this one, since a
        /// single analysis pass covers an entire script including every
        /// lambda literal nested in it. `Arc` (not `Rc`) so it is the same
        /// representation `CompiledScript` uses, letting a lambda call into
        /// a differently-scoped script and vice versa without conversion.
        scope: Arc<crate::scope::ScopeTable>,
    },
    Script(Arc<crate::engine::CompiledScript>),
    Native(Rc<dyn NativeFunction>),
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Lambda { params, .. } => {
                write!(f, "Callable::Lambda({} params)", params.len())
            }
            Callable::Script(_) => write!(f, "Callable::Script"),
            Callable::Native(n) => write!(f, "Callable::Native({:?})", n.name()),
        }
    }
}

/// A host-registered function namespace entry (`ns:fn(args)`, §4.2) or a
/// function value installed directly in a context.
pub trait NativeFunction: fmt::Debug {
    fn name(&self) -> &str;
    fn call(&self, ctx: &dyn Context, opts: &Options, args: &[Value], span: Span) -> Result<Value, EvalError>;
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "int",
            Value::BigInt(_) => "bigint",
            Value::Float(_) => "double",
            Value::Decimal(_) => "bigdecimal",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Object(o) => {
                // leak-free since HostObject is only borrowed for the call
                let _ = o;
                "object"
            }
            Value::Callable(_) => "callable",
            Value::Range(_, _) => "range",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn array(v: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(v)))
    }

    pub fn map(m: IndexMap<MapKey, Value>) -> Value {
        Value::Map(Rc::new(RefCell::new(m)))
    }

    pub fn set(s: IndexSet<MapKey>) -> Value {
        Value::Set(Rc::new(RefCell::new(s)))
    }

    pub fn str(s: impl Into<Rc<str>>) -> Value {
        Value::Str(s.into())
    }

    /// Iterates the value per the `for(x : it)` iterable protocol (§4.4):
    /// ranges, arrays, maps (entries as 2-element arrays), sets, and
    /// strings (by character). Host iterators are handled by the
    /// interpreter directly via `HostObject`, not here.
    pub fn iter_values(&self) -> Option<Vec<Value>> {
        match self {
            Value::Range(lo, hi) => Some((*lo..=*hi).map(Value::Int).collect()),
            Value::Array(a) => Some(a.borrow().clone()),
            Value::Set(s) => Some(s.borrow().iter().cloned().map(MapKey::into_value).collect()),
            Value::Map(m) => Some(
                m.borrow()
                    .iter()
                    .map(|(k, v)| Value::array(vec![k.clone().into_value(), v.clone()]))
                    .collect(),
            ),
            Value::Str(s) => Some(s.chars().map(|c| Value::str(c.to_string())).collect()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::BigInt(b) => write!(f, "{b}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Array(a) => {
                write!(f, "[")?;
                for (i, v) in a.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Set(s) => {
                write!(f, "{{")?;
                for (i, k) in s.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}")?;
                }
                write!(f, "}}")
            }
            Value::Object(o) => write!(f, "#<{}>", o.type_name()),
            Value::Callable(c) => write!(f, "#<{:?}>", c),
            Value::Range(lo, hi) => write!(f, "{lo}..{hi}"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => *a.borrow() == *b.borrow(),
            (Value::Range(a0, a1), Value::Range(b0, b1)) => a0 == b0 && a1 == b1,
            _ => false,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
            (Value::BigInt(a), Value::BigInt(b)) => a.partial_cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrays_share_backing_storage_on_clone() {
        let a = Value::array(vec![Value::Int(42)]);
        let b = a.clone();
        if let Value::Array(cell) = &a {
            cell.borrow_mut()[0] = Value::Int(43);
        }
        if let Value::Array(cell) = &b {
            assert_eq!(cell.borrow()[0], Value::Int(43));
        } else {
            panic!("expected array");
        }
    }

    #[test]
    fn int_float_equality_coerces() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
    }

    #[test]
    fn map_key_restricted_to_scalars() {
        assert!(MapKey::from_value(&Value::Int(1)).is_some());
        assert!(MapKey::from_value(&Value::array(vec![])).is_none());
    }

    #[test]
    fn range_iterates_inclusive() {
        let v = Value::Range(1, 3);
        assert_eq!(v.iter_values().unwrap(), vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn display_formats_containers() {
        let v = Value::array(vec![Value::Int(1), Value::str("x")]);
        assert_eq!(v.to_string(), "[1, x]");
    }
}
