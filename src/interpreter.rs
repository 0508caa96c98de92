// ABOUTME: Tree-walking evaluator: expression/statement semantics, control flow, calls

use crate::arithmetic::{parse_identifier, ArithResult, ArithmeticPolicy};
use crate::ast::{AssignOp, AstKind, AstNode, BinOp, Literal, TemplateChunk, UnOp};
use crate::context::{AnnotatedStmt, Context};
use crate::error::EvalError;
use crate::frame::Frame;
use crate::introspect::Uberspect;
use crate::options::Options;
use crate::scope::{node_key, Resolution, ScopeTable};
use crate::token::Span;
use crate::value::{Callable, ExlArray, HostObject, MapKey, Value};
use indexmap::{IndexMap, IndexSet};
use num_bigint::BigInt;
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Unwind signal threaded through statement evaluation: a hard error, or
/// one of the three control-flow constructs the language defines. Kept
/// distinct from `EvalError` so `?` composes across both expression and
/// statement evaluation without every expression-returning function having
/// to account for `Break`/`Continue`/`Return` explicitly.
pub enum Flow {
    Error(EvalError),
    Return(Value),
    Break,
    Continue,
}

impl From<EvalError> for Flow {
    fn from(e: EvalError) -> Self {
        Flow::Error(e)
    }
}

pub type EResult = Result<Value, Flow>;

/// Runs a script or lambda body to completion, collapsing `Return` into its
/// value and a stray `Break`/`Continue` escaping the outermost block into
/// `null` — the same convention applied to a statement reached through an
/// `AnnotationProcessor` (see `eval_annotation`).
fn collapse(flow: Flow) -> Result<Value, EvalError> {
    match flow {
        Flow::Error(e) => Err(e),
        Flow::Return(v) => Ok(v),
        Flow::Break | Flow::Continue => Ok(Value::Null),
    }
}

fn as_index(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(*i),
        Value::BigInt(b) => crate::arithmetic::bigint_to_i64(b),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::BigInt(b) => crate::arithmetic::bigint_to_i64(b).map(|i| i as f64).or_else(|| b.to_string().parse().ok()),
        Value::Decimal(d) => d.to_string().parse().ok(),
        _ => None,
    }
}

/// Execution state for one evaluation: the host context, a copy of the
/// per-evaluation options, the installed arithmetic policy and
/// introspector, and the scope table the AST being walked was analyzed
/// against. Built fresh by `engine.rs` for every `Script::execute`/
/// `Expression::evaluate` call, and re-built (sharing `ctx`, `arithmetic`,
/// `introspector`) whenever a `Callable` is invoked from inside a running
/// script — `scope` is an owned, cheaply-cloned `Arc` rather than a
/// borrowed reference specifically so nested calls can do this freely
/// without threading a lifetime back to the outer call.
pub struct Interpreter<'a> {
    pub ctx: &'a dyn Context,
    pub options: Options,
    pub arithmetic: &'a dyn ArithmeticPolicy,
    pub introspector: &'a Uberspect,
    pub scope: Arc<ScopeTable>,
}

impl<'a> Interpreter<'a> {
    pub fn run(&self, root: &Arc<AstNode>, frame: &Rc<Frame>) -> Result<Value, EvalError> {
        match self.eval(root, frame) {
            Ok(v) => Ok(v),
            Err(flow) => collapse(flow),
        }
    }

    fn check_cancel(&self) -> Result<(), Flow> {
        if self.options.cancellable {
            if let Some(flag) = self.ctx.cancel_flag() {
                if flag.load(Ordering::SeqCst) {
                    return Err(Flow::Error(EvalError::Cancel));
                }
            }
        }
        Ok(())
    }

    fn truthy(&self, v: &Value) -> bool {
        self.arithmetic.to_boolean(v)
    }

    fn arith(&self, r: ArithResult) -> EResult {
        match r {
            ArithResult::Ok(v) => Ok(v),
            ArithResult::Err(e) => Err(Flow::Error(e)),
            ArithResult::TryFailed => Err(Flow::Error(EvalError::TryFailed)),
        }
    }

    pub fn eval(&self, node: &Arc<AstNode>, frame: &Rc<Frame>) -> EResult {
        let span = node.span;
        match &node.kind {
            AstKind::Literal(lit) => self.eval_literal(lit, span),
            AstKind::Identifier(name) => self.eval_identifier(node, name, frame, span),
            AstKind::VarDecl { declarations, .. } => self.eval_var_decl(node, declarations, frame),
            AstKind::PropertyAccess { receiver, name, null_safe } => {
                let recv = self.eval(receiver, frame)?;
                self.property_get(&recv, name, *null_safe, span)
            }
            AstKind::Indexed { receiver, key, null_safe } => {
                let recv = self.eval(receiver, frame)?;
                if recv.is_null() {
                    return self.null_receiver(*null_safe, span, "[]");
                }
                let key_v = self.eval(key, frame)?;
                self.indexed_get(&recv, &key_v, span)
            }
            AstKind::BinaryOp { op, left, right } => self.eval_binary(*op, left, right, frame, span),
            AstKind::UnaryOp { op, operand } => self.eval_unary(*op, operand, frame, span),
            AstKind::Assign { target, op, value } => self.eval_assign(*op, target, value, frame, span),
            AstKind::If { cond, then_branch, else_branch } => {
                if self.truthy(&self.eval(cond, frame)?) {
                    self.eval(then_branch, frame)
                } else if let Some(e) = else_branch {
                    self.eval(e, frame)
                } else {
                    Ok(Value::Null)
                }
            }
            AstKind::While { cond, body } => self.eval_while(cond, body, frame),
            AstKind::Do { body, cond } => self.eval_do(body, cond, frame),
            AstKind::For { binding: _, iterable, body } => self.eval_for(node, iterable, body, frame),
            AstKind::Block(stmts) => self.eval_block(stmts, frame),
            AstKind::Return(value) => {
                let v = match value {
                    Some(e) => self.eval(e, frame)?,
                    None => Value::Null,
                };
                Err(Flow::Return(v))
            }
            AstKind::Break => Err(Flow::Break),
            AstKind::Continue => Err(Flow::Continue),
            AstKind::Lambda { params, body } => self.eval_lambda(node, params, body, frame),
            AstKind::Call { callee, args } => self.eval_call(callee, args, frame, span),
            AstKind::Namespace { prefix, callee, args } => self.eval_namespace(prefix, callee, args, frame, span),
            AstKind::New { class_name, args } => self.eval_new(class_name, args, frame, span),
            AstKind::ArrayLit { elements, has_ellipsis } => self.eval_array_lit(elements, *has_ellipsis, frame),
            AstKind::MapLit(entries) => self.eval_map_lit(entries, frame, span),
            AstKind::SetLit(elements) => self.eval_set_lit(elements, frame, span),
            AstKind::Range { lo, hi } => self.eval_range(lo, hi, frame, span),
            AstKind::Ternary { cond, then_branch, else_branch } => {
                if self.truthy(&self.eval(cond, frame)?) {
                    self.eval(then_branch, frame)
                } else {
                    self.eval(else_branch, frame)
                }
            }
            AstKind::Elvis { left, right } => {
                let l = self.eval(left, frame)?;
                if self.truthy(&l) {
                    Ok(l)
                } else {
                    self.eval(right, frame)
                }
            }
            AstKind::Coalesce { left, right } => {
                let l = self.eval(left, frame)?;
                if l.is_null() {
                    self.eval(right, frame)
                } else {
                    Ok(l)
                }
            }
            AstKind::Annotation { name, args, stmt } => self.eval_annotation(name, args, stmt, frame),
            AstKind::Pragma { .. } => Ok(Value::Null),
            AstKind::TemplateLiteral(chunks) => self.eval_template_literal(chunks, frame),
        }
    }

    fn eval_literal(&self, lit: &Literal, span: Span) -> EResult {
        Ok(match lit {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i, _) => Value::Int(*i),
            Literal::BigInt(s) => match crate::arithmetic::parse_bigint(s) {
                Some(b) => Value::BigInt(Rc::new(b)),
                None => return Err(Flow::Error(EvalError::arithmetic(span, format!("invalid bigint literal {s:?}")))),
            },
            Literal::Float(f) => Value::Float(*f),
            Literal::Decimal(s) => match crate::arithmetic::parse_decimal(s) {
                Some(d) => Value::Decimal(Rc::new(d)),
                None => return Err(Flow::Error(EvalError::arithmetic(span, format!("invalid bigdecimal literal {s:?}")))),
            },
            Literal::Str(s) => Value::str(s.clone()),
        })
    }

    fn eval_identifier(&self, node: &Arc<AstNode>, name: &str, frame: &Rc<Frame>, span: Span) -> EResult {
        match self.scope.resolve(node) {
            Resolution::Local { depth, slot } => Ok(frame.get(depth, slot)),
            Resolution::Free => match self.ctx.get(name) {
                Some(v) => Ok(v),
                None => {
                    if self.options.strict {
                        Err(Flow::Error(EvalError::undefined(span, name)))
                    } else {
                        Ok(Value::Null)
                    }
                }
            },
        }
    }

    fn eval_var_decl(&self, node: &Arc<AstNode>, declarations: &[(String, Option<Arc<AstNode>>)], frame: &Rc<Frame>) -> EResult {
        let slots = self.scope.var_decl_slots.get(&node_key(node)).cloned().unwrap_or_default();
        for (i, (_, init)) in declarations.iter().enumerate() {
            let Some(&slot) = slots.get(i) else { continue };
            if let Some(init) = init {
                let v = self.eval(init, frame)?;
                frame.set_local(slot, v);
            }
        }
        Ok(Value::Null)
    }

    fn null_receiver(&self, null_safe: bool, span: Span, what: &str) -> EResult {
        if null_safe || self.options.safe {
            Ok(Value::Null)
        } else if self.options.strict {
            Err(Flow::Error(EvalError::null_target(span, what)))
        } else {
            Ok(Value::Null)
        }
    }

    fn property_get(&self, recv: &Value, name: &str, null_safe: bool, span: Span) -> EResult {
        if recv.is_null() {
            return self.null_receiver(null_safe, span, name);
        }
        match recv {
            Value::Object(obj) => self.introspector.get_property(obj.as_ref(), name, span).map_err(Flow::Error),
            Value::Map(m) => Ok(m.borrow().get(&MapKey::Str(name.into())).cloned().unwrap_or(Value::Null)),
            Value::Array(a) => match parse_identifier(name) {
                Some(idx) => self.array_get(a, idx, span),
                None => Err(Flow::Error(EvalError::no_property(span, name, "array"))),
            },
            other => Err(Flow::Error(EvalError::no_property(span, name, other.type_name()))),
        }
    }

    fn array_get(&self, a: &ExlArray, idx: i64, span: Span) -> EResult {
        let items = a.borrow();
        if idx < 0 || idx as usize >= items.len() {
            if self.options.strict {
                return Err(Flow::Error(EvalError::no_property(span, idx.to_string(), "array")));
            }
            return Ok(Value::Null);
        }
        Ok(items[idx as usize].clone())
    }

    fn indexed_get(&self, recv: &Value, key: &Value, span: Span) -> EResult {
        match recv {
            Value::Array(a) => match as_index(key) {
                Some(idx) => self.array_get(a, idx, span),
                None => Err(Flow::Error(EvalError::arithmetic(span, format!("array index must be an integer, got {}", key.type_name())))),
            },
            Value::Map(m) => {
                let Some(k) = MapKey::from_value(key) else {
                    return Err(Flow::Error(EvalError::arithmetic(span, "map key must be a scalar")));
                };
                Ok(m.borrow().get(&k).cloned().unwrap_or(Value::Null))
            }
            Value::Set(s) => match as_index(key) {
                Some(idx) if idx >= 0 => Ok(s.borrow().get_index(idx as usize).cloned().map(MapKey::into_value).unwrap_or(Value::Null)),
                Some(_) => Ok(Value::Null),
                None => {
                    let Some(k) = MapKey::from_value(key) else { return Ok(Value::Bool(false)) };
                    Ok(Value::Bool(s.borrow().contains(&k)))
                }
            },
            Value::Str(s) => match as_index(key) {
                Some(idx) if idx >= 0 => Ok(s.chars().nth(idx as usize).map(|c| Value::str(c.to_string())).unwrap_or(Value::Null)),
                Some(_) => Ok(Value::Null),
                None => Err(Flow::Error(EvalError::arithmetic(span, "string index must be an integer"))),
            },
            Value::Object(obj) => self.introspector.call_method(obj.as_ref(), "get", std::slice::from_ref(key), span).map_err(Flow::Error),
            other => Err(Flow::Error(EvalError::no_property(span, "[]", other.type_name()))),
        }
    }

    fn eval_binary(&self, op: BinOp, left: &Arc<AstNode>, right: &Arc<AstNode>, frame: &Rc<Frame>, span: Span) -> EResult {
        match op {
            BinOp::And => {
                let l = self.eval(left, frame)?;
                if !self.truthy(&l) {
                    return Ok(Value::Bool(false));
                }
                let r = self.eval(right, frame)?;
                Ok(Value::Bool(self.truthy(&r)))
            }
            BinOp::Or => {
                let l = self.eval(left, frame)?;
                if self.truthy(&l) {
                    return Ok(Value::Bool(true));
                }
                let r = self.eval(right, frame)?;
                Ok(Value::Bool(self.truthy(&r)))
            }
            BinOp::In => {
                let l = self.eval(left, frame)?;
                let r = self.eval(right, frame)?;
                Ok(Value::Bool(self.membership(&l, &r)))
            }
            BinOp::Eq => {
                let l = self.eval(left, frame)?;
                let r = self.eval(right, frame)?;
                Ok(Value::Bool(self.arithmetic.values_equal(&l, &r, span).map_err(Flow::Error)?))
            }
            BinOp::Ne => {
                let l = self.eval(left, frame)?;
                let r = self.eval(right, frame)?;
                Ok(Value::Bool(!self.arithmetic.values_equal(&l, &r, span).map_err(Flow::Error)?))
            }
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                let l = self.eval(left, frame)?;
                let r = self.eval(right, frame)?;
                let ord = self.arithmetic.compare(&l, &r, span).map_err(Flow::Error)?;
                let result = match (op, ord) {
                    (BinOp::Lt, Some(o)) => o.is_lt(),
                    (BinOp::Gt, Some(o)) => o.is_gt(),
                    (BinOp::Le, Some(o)) => o.is_le(),
                    (BinOp::Ge, Some(o)) => o.is_ge(),
                    (_, None) => return Err(Flow::Error(EvalError::arithmetic(span, format!("cannot compare {} and {}", l.type_name(), r.type_name())))),
                    _ => unreachable!(),
                };
                Ok(Value::Bool(result))
            }
            _ => {
                let l = self.eval(left, frame)?;
                let r = self.eval(right, frame)?;
                self.apply_arith(op, &l, &r, span)
            }
        }
    }

    fn apply_arith(&self, op: BinOp, l: &Value, r: &Value, span: Span) -> EResult {
        let result = match op {
            BinOp::Add => self.arithmetic.add(l, r, span),
            BinOp::Sub => self.arithmetic.sub(l, r, span),
            BinOp::Mul => self.arithmetic.mul(l, r, span),
            BinOp::Div => self.arithmetic.div(l, r, span),
            BinOp::Mod => self.arithmetic.rem(l, r, span),
            BinOp::BitAnd => self.arithmetic.bit_and(l, r, span),
            BinOp::BitOr => self.arithmetic.bit_or(l, r, span),
            BinOp::BitXor => self.arithmetic.bit_xor(l, r, span),
            BinOp::Shl => self.arithmetic.shl(l, r, span),
            BinOp::Shr => self.arithmetic.shr(l, r, span),
            BinOp::Ushr => self.arithmetic.ushr(l, r, span),
            BinOp::Pow => return self.eval_pow(l, r, span),
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::And | BinOp::Or | BinOp::In => unreachable!(),
        };
        self.arith(result)
    }

    /// `**` has no surface syntax yet (no token produced by the lexer maps
    /// to `BinOp::Pow`); kept for AST completeness and evaluated directly
    /// rather than through `ArithmeticPolicy`, which has no `pow` member.
    fn eval_pow(&self, l: &Value, r: &Value, span: Span) -> EResult {
        match (l, r) {
            (Value::Int(a), Value::Int(b)) if *b >= 0 && *b <= u32::MAX as i64 => match a.checked_pow(*b as u32) {
                Some(v) => Ok(Value::Int(v)),
                None => Ok(Value::BigInt(Rc::new(BigInt::from(*a).pow(*b as u32)))),
            },
            _ => {
                let base = as_f64(l).ok_or_else(|| Flow::Error(EvalError::arithmetic(span, "pow: non-numeric operand")))?;
                let exp = as_f64(r).ok_or_else(|| Flow::Error(EvalError::arithmetic(span, "pow: non-numeric operand")))?;
                Ok(Value::Float(base.powf(exp)))
            }
        }
    }

    fn membership(&self, needle: &Value, haystack: &Value) -> bool {
        match haystack {
            Value::Array(a) => a.borrow().iter().any(|v| v == needle),
            Value::Set(s) => MapKey::from_value(needle).map(|k| s.borrow().contains(&k)).unwrap_or(false),
            Value::Map(m) => MapKey::from_value(needle).map(|k| m.borrow().contains_key(&k)).unwrap_or(false),
            Value::Range(lo, hi) => matches!(needle, Value::Int(i) if i >= lo && i <= hi),
            Value::Str(s) => matches!(needle, Value::Str(n) if s.contains(n.as_ref())),
            _ => false,
        }
    }

    fn eval_unary(&self, op: UnOp, operand: &Arc<AstNode>, frame: &Rc<Frame>, span: Span) -> EResult {
        let v = self.eval(operand, frame)?;
        match op {
            UnOp::Not => Ok(Value::Bool(!self.truthy(&v))),
            UnOp::Neg => match v {
                Value::Int(i) => match i.checked_neg() {
                    Some(n) => Ok(Value::Int(n)),
                    None => Ok(Value::BigInt(Rc::new(-BigInt::from(i)))),
                },
                Value::BigInt(b) => Ok(Value::BigInt(Rc::new(-b.as_ref().clone()))),
                Value::Float(f) => Ok(Value::Float(-f)),
                Value::Decimal(d) => Ok(Value::Decimal(Rc::new(-*d))),
                other => Err(Flow::Error(EvalError::arithmetic(span, format!("cannot negate {}", other.type_name())))),
            },
            UnOp::BitNot => match v {
                Value::Int(i) => Ok(Value::Int(!i)),
                other => Err(Flow::Error(EvalError::arithmetic(span, format!("cannot bitwise-not {}", other.type_name())))),
            },
        }
    }

    fn eval_assign(&self, op: AssignOp, target: &Arc<AstNode>, value: &Arc<AstNode>, frame: &Rc<Frame>, span: Span) -> EResult {
        let rhs = self.eval(value, frame)?;
        let new_value = if op == AssignOp::Set {
            rhs
        } else {
            // Re-evaluates `target` as an rvalue to read the current value.
            // For a property/indexed target this evaluates the receiver
            // expression twice (once here, once in `set_lvalue`); acceptable
            // since the host-facing contract doesn't speak to receiver
            // sub-expressions with side effects, and caching receivers
            // generically across every lvalue shape adds real complexity
            // for a corner case that doesn't arise in practice.
            let current = self.eval(target, frame)?;
            let bin = match op {
                AssignOp::AddEq => BinOp::Add,
                AssignOp::SubEq => BinOp::Sub,
                AssignOp::MulEq => BinOp::Mul,
                AssignOp::DivEq => BinOp::Div,
                AssignOp::ModEq => BinOp::Mod,
                AssignOp::AndEq => BinOp::BitAnd,
                AssignOp::OrEq => BinOp::BitOr,
                AssignOp::XorEq => BinOp::BitXor,
                AssignOp::ShlEq => BinOp::Shl,
                AssignOp::ShrEq => BinOp::Shr,
                AssignOp::UshrEq => BinOp::Ushr,
                AssignOp::Set => unreachable!(),
            };
            self.apply_arith(bin, &current, &rhs, span)?
        };
        self.set_lvalue(target, new_value.clone(), frame, span)?;
        Ok(new_value)
    }

    fn set_lvalue(&self, target: &Arc<AstNode>, value: Value, frame: &Rc<Frame>, span: Span) -> Result<(), Flow> {
        match &target.kind {
            AstKind::Identifier(name) => match self.scope.resolve(target) {
                Resolution::Local { depth, slot } => {
                    frame.set(depth, slot, value);
                    Ok(())
                }
                Resolution::Free => {
                    self.ctx.set(name, value);
                    Ok(())
                }
            },
            AstKind::PropertyAccess { receiver, name, null_safe } => {
                let recv = self.eval(receiver, frame)?;
                if recv.is_null() {
                    if *null_safe || self.options.safe {
                        return Ok(());
                    }
                    return Err(Flow::Error(EvalError::null_target(span, name)));
                }
                self.property_set(&recv, name, value, span)
            }
            AstKind::Indexed { receiver, key, null_safe } => {
                let recv = self.eval(receiver, frame)?;
                if recv.is_null() {
                    if *null_safe || self.options.safe {
                        return Ok(());
                    }
                    return Err(Flow::Error(EvalError::null_target(span, "[]")));
                }
                let key_v = self.eval(key, frame)?;
                self.indexed_set(&recv, &key_v, value, span)
            }
            _ => Err(Flow::Error(EvalError::bad_assignment(span, "invalid assignment target"))),
        }
    }

    /// See the Open Question resolution in `DESIGN.md`: a numeric property
    /// name (`foo.0 = 42`) only resolves against an array receiver, where it
    /// may extend the array by exactly one slot; every other receiver
    /// raises `Assignment`. A non-numeric name against a map is always a
    /// plain key insert; against a host object it goes through the setter.
    fn property_set(&self, recv: &Value, name: &str, value: Value, span: Span) -> Result<(), Flow> {
        match parse_identifier(name) {
            Some(idx) => match recv {
                Value::Array(a) => self.array_set_extend(a, idx, value, span),
                _ => Err(Flow::Error(EvalError::bad_assignment(span, format!("numeric property {name:?} requires an array receiver, got {}", recv.type_name())))),
            },
            None => match recv {
                Value::Map(m) => {
                    m.borrow_mut().insert(MapKey::Str(name.into()), value);
                    Ok(())
                }
                Value::Object(obj) => self.introspector.set_property(obj.as_ref(), name, value, span).map_err(Flow::Error),
                _ => Err(Flow::Error(EvalError::bad_assignment(span, format!("no such settable property {name:?} on {}", recv.type_name())))),
            },
        }
    }

    /// Strict indexed assignment (`a[k] = v`): bounds-checked, no extension.
    fn array_set_strict(&self, a: &ExlArray, idx: i64, value: Value, span: Span) -> Result<(), Flow> {
        let mut items = a.borrow_mut();
        if idx < 0 || idx as usize >= items.len() {
            return Err(Flow::Error(EvalError::bad_assignment(span, "array index out of bounds")));
        }
        items[idx as usize] = value;
        Ok(())
    }

    /// Numeric property assignment (`a.0 = v`): allows extending by exactly
    /// one slot past the current end; still refuses a negative index or a
    /// gap beyond the end under strict mode.
    fn array_set_extend(&self, a: &ExlArray, idx: i64, value: Value, span: Span) -> Result<(), Flow> {
        let mut items = a.borrow_mut();
        if idx < 0 {
            return Err(Flow::Error(EvalError::bad_assignment(span, "array index out of bounds")));
        }
        let idx = idx as usize;
        if idx < items.len() {
            items[idx] = value;
            Ok(())
        } else if idx == items.len() {
            items.push(value);
            Ok(())
        } else if self.options.strict {
            Err(Flow::Error(EvalError::bad_assignment(span, "array index out of bounds")))
        } else {
            Ok(())
        }
    }

    fn indexed_set(&self, recv: &Value, key: &Value, value: Value, span: Span) -> Result<(), Flow> {
        match recv {
            Value::Array(a) => match as_index(key) {
                Some(idx) => self.array_set_strict(a, idx, value, span),
                None => Err(Flow::Error(EvalError::bad_assignment(span, "array index must be an integer"))),
            },
            Value::Map(m) => {
                let Some(k) = MapKey::from_value(key) else {
                    return Err(Flow::Error(EvalError::bad_assignment(span, "map key must be a scalar")));
                };
                m.borrow_mut().insert(k, value);
                Ok(())
            }
            Value::Object(obj) => self.introspector.call_method(obj.as_ref(), "set", &[key.clone(), value], span).map(|_| ()).map_err(Flow::Error),
            _ => Err(Flow::Error(EvalError::bad_assignment(span, format!("cannot index-assign into {}", recv.type_name())))),
        }
    }

    fn eval_while(&self, cond: &Arc<AstNode>, body: &Arc<AstNode>, frame: &Rc<Frame>) -> EResult {
        while self.truthy(&self.eval(cond, frame)?) {
            self.check_cancel()?;
            match self.eval(body, frame) {
                Ok(_) => {}
                Err(Flow::Break) => break,
                Err(Flow::Continue) => continue,
                Err(other) => return Err(other),
            }
        }
        Ok(Value::Null)
    }

    fn eval_do(&self, body: &Arc<AstNode>, cond: &Arc<AstNode>, frame: &Rc<Frame>) -> EResult {
        loop {
            self.check_cancel()?;
            match self.eval(body, frame) {
                Ok(_) => {}
                Err(Flow::Break) => break,
                Err(Flow::Continue) => {}
                Err(other) => return Err(other),
            }
            if !self.truthy(&self.eval(cond, frame)?) {
                break;
            }
        }
        Ok(Value::Null)
    }

    fn eval_for(&self, node: &Arc<AstNode>, iterable: &Arc<AstNode>, body: &Arc<AstNode>, frame: &Rc<Frame>) -> EResult {
        let it = self.eval(iterable, frame)?;
        let items = self.iterate_value(&it, iterable.span)?;
        let slot = *self.scope.for_binding_slots.get(&node_key(node)).unwrap_or(&0);
        for item in items {
            self.check_cancel()?;
            frame.set_local(slot, item);
            match self.eval(body, frame) {
                Ok(_) => {}
                Err(Flow::Break) => break,
                Err(Flow::Continue) => continue,
                Err(other) => return Err(other),
            }
        }
        Ok(Value::Null)
    }

    fn iterate_value(&self, v: &Value, span: Span) -> Result<Vec<Value>, Flow> {
        if let Some(items) = v.iter_values() {
            return Ok(items);
        }
        if let Value::Object(obj) = v {
            if let Some(items) = obj.iterate() {
                return Ok(items);
            }
        }
        if v.is_null() {
            return Ok(Vec::new());
        }
        Err(Flow::Error(EvalError::arithmetic(span, format!("{} is not iterable", v.type_name()))))
    }

    fn eval_block(&self, stmts: &[Arc<AstNode>], frame: &Rc<Frame>) -> EResult {
        let mut last = Value::Null;
        for stmt in stmts {
            self.check_cancel()?;
            last = self.eval(stmt, frame)?;
        }
        Ok(last)
    }

    fn eval_lambda(&self, node: &Arc<AstNode>, params: &[String], body: &Arc<AstNode>, frame: &Rc<Frame>) -> EResult {
        let slot_count = *self.scope.lambda_slots.get(&node_key(node)).unwrap_or(&params.len());
        Ok(Value::Callable(Rc::new(Callable::Lambda {
            params: params.to_vec(),
            enclosing: Rc::clone(frame),
            body: Arc::clone(body),
            slot_count,
            scope: Arc::clone(&self.scope),
        })))
    }

    fn eval_args(&self, args: &[Arc<AstNode>], frame: &Rc<Frame>) -> Result<Vec<Value>, Flow> {
        args.iter().map(|a| self.eval(a, frame)).collect()
    }

    fn eval_call(&self, callee: &Arc<AstNode>, args: &[Arc<AstNode>], frame: &Rc<Frame>, span: Span) -> EResult {
        if let AstKind::PropertyAccess { receiver, name, null_safe } = &callee.kind {
            let recv = self.eval(receiver, frame)?;
            if recv.is_null() {
                return self.null_receiver(*null_safe, span, name);
            }
            let arg_values = self.eval_args(args, frame)?;
            return match &recv {
                Value::Object(obj) => self.introspector.call_method(obj.as_ref(), name, &arg_values, span).map_err(Flow::Error),
                other => Err(Flow::Error(EvalError::no_method(span, name.clone(), other.type_name()))),
            };
        }
        let callee_v = self.eval(callee, frame)?;
        let arg_values = self.eval_args(args, frame)?;
        self.invoke_callable(&callee_v, &arg_values, span)
    }

    /// Dispatches the three `Callable` shapes: a `Lambda` or compiled
    /// `Script` gets its own fresh `Interpreter` (sharing this one's `ctx`/
    /// `arithmetic`/`introspector`, owning an `Arc::clone` of the callee's
    /// own scope table) and a new child `Frame`; a `Native` function is
    /// called directly against the current options.
    fn invoke_callable(&self, callee: &Value, args: &[Value], span: Span) -> EResult {
        match callee {
            Value::Callable(c) => match c.as_ref() {
                Callable::Lambda { params, enclosing, body, slot_count, scope } => {
                    let call_frame = Frame::child(Rc::clone(enclosing), *slot_count);
                    for i in 0..params.len() {
                        call_frame.set_local(i, args.get(i).cloned().unwrap_or(Value::Null));
                    }
                    let interp = Interpreter { ctx: self.ctx, options: self.options.clone(), arithmetic: self.arithmetic, introspector: self.introspector, scope: Arc::clone(scope) };
                    interp.run(body, &call_frame).map_err(Flow::Error)
                }
                Callable::Script(cs) => {
                    let call_frame = Frame::root(cs.scope.root_slots);
                    for i in 0..cs.params.len() {
                        call_frame.set_local(i, args.get(i).cloned().unwrap_or(Value::Null));
                    }
                    let interp = Interpreter { ctx: self.ctx, options: self.options.clone(), arithmetic: self.arithmetic, introspector: self.introspector, scope: Arc::clone(&cs.scope) };
                    interp.run(&cs.ast, &call_frame).map_err(Flow::Error)
                }
                Callable::Native(nf) => nf.call(self.ctx, &self.options, args, span).map_err(Flow::Error),
            },
            other => Err(Flow::Error(EvalError::arithmetic(span, format!("{} is not callable", other.type_name())))),
        }
    }

    fn eval_namespace(&self, prefix: &str, callee: &str, args: &[Arc<AstNode>], frame: &Rc<Frame>, span: Span) -> EResult {
        let Some(resolver) = self.ctx.as_namespace_resolver() else {
            return Err(Flow::Error(EvalError::no_method(span, format!("{prefix}:{callee}"), "namespace")));
        };
        let Some(functor) = resolver.resolve_namespace(prefix) else {
            return Err(Flow::Error(EvalError::no_method(span, format!("{prefix}:{callee}"), "namespace")));
        };
        let arg_values = self.eval_args(args, frame)?;
        match &functor {
            Value::Object(obj) => self.introspector.call_method(obj.as_ref(), callee, &arg_values, span).map_err(Flow::Error),
            Value::Callable(_) => self.invoke_callable(&functor, &arg_values, span),
            other => Err(Flow::Error(EvalError::no_method(span, callee, other.type_name()))),
        }
    }

    fn eval_new(&self, class_name: &Arc<AstNode>, args: &[Arc<AstNode>], frame: &Rc<Frame>, span: Span) -> EResult {
        let Some(registry) = self.ctx.as_class_registry() else {
            return Err(Flow::Error(EvalError::no_method(span, "new", "class registry")));
        };
        let name = match &class_name.kind {
            AstKind::Identifier(n) => n.clone(),
            _ => match self.eval(class_name, frame)? {
                Value::Str(s) => s.to_string(),
                other => return Err(Flow::Error(EvalError::arithmetic(span, format!("new: class name must be a string, got {}", other.type_name())))),
            },
        };
        let arg_values = self.eval_args(args, frame)?;
        registry.construct(&name, &arg_values).map_err(Flow::Error)
    }

    fn eval_array_lit(&self, elements: &[Arc<AstNode>], has_ellipsis: bool, frame: &Rc<Frame>) -> EResult {
        let mut out = Vec::with_capacity(elements.len());
        for e in elements {
            let v = self.eval(e, frame)?;
            if has_ellipsis {
                if let Some(items) = v.iter_values() {
                    out.extend(items);
                    continue;
                }
            }
            out.push(v);
        }
        Ok(Value::array(out))
    }

    fn eval_map_lit(&self, entries: &[(Arc<AstNode>, Arc<AstNode>)], frame: &Rc<Frame>, span: Span) -> EResult {
        let mut map = IndexMap::with_capacity(entries.len());
        for (k, v) in entries {
            let kv = self.eval(k, frame)?;
            let vv = self.eval(v, frame)?;
            let Some(key) = MapKey::from_value(&kv) else {
                return Err(Flow::Error(EvalError::arithmetic(span, format!("map key must be a scalar, got {}", kv.type_name()))));
            };
            map.insert(key, vv);
        }
        Ok(Value::map(map))
    }

    fn eval_set_lit(&self, elements: &[Arc<AstNode>], frame: &Rc<Frame>, span: Span) -> EResult {
        let mut set = IndexSet::with_capacity(elements.len());
        for e in elements {
            let v = self.eval(e, frame)?;
            let Some(key) = MapKey::from_value(&v) else {
                return Err(Flow::Error(EvalError::arithmetic(span, format!("set element must be a scalar, got {}", v.type_name()))));
            };
            set.insert(key);
        }
        Ok(Value::set(set))
    }

    fn eval_range(&self, lo: &Arc<AstNode>, hi: &Arc<AstNode>, frame: &Rc<Frame>, span: Span) -> EResult {
        let lo_v = self.eval(lo, frame)?;
        let hi_v = self.eval(hi, frame)?;
        match (as_index(&lo_v), as_index(&hi_v)) {
            (Some(l), Some(h)) => Ok(Value::Range(l, h)),
            _ => Err(Flow::Error(EvalError::arithmetic(span, "range bounds must be integers"))),
        }
    }

    fn eval_annotation(&self, name: &str, args: &[Arc<AstNode>], stmt: &Arc<AstNode>, frame: &Rc<Frame>) -> EResult {
        let arg_values = self.eval_args(args, frame)?;
        let Some(processor) = self.ctx.as_annotation_processor() else {
            return self.eval(stmt, frame);
        };
        let stmt = Arc::clone(stmt);
        let frame = Rc::clone(frame);
        let wrapped = AnnotatedStmt {
            run: Box::new(move || match self.eval(&stmt, &frame) {
                Ok(v) => Ok(v),
                Err(flow) => collapse(flow),
            }),
        };
        processor.process_annotation(name, &arg_values, wrapped).map_err(Flow::Error)
    }

    fn eval_template_literal(&self, chunks: &[TemplateChunk], frame: &Rc<Frame>) -> EResult {
        let mut out = String::new();
        for chunk in chunks {
            match chunk {
                TemplateChunk::Text(s) => out.push_str(s),
                TemplateChunk::Immediate(e) | TemplateChunk::Deferred(e) => {
                    let v = self.eval(e, frame)?;
                    out.push_str(&v.to_string());
                }
                TemplateChunk::Code(e) => {
                    self.eval(e, frame)?;
                }
            }
        }
        Ok(Value::str(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arithmetic::DefaultArithmetic;
    use crate::context::MapContext;
    use crate::features::FeatureSet;
    use crate::parser::parse_script;
    use crate::scope::Analyzer;

    fn run(src: &str, ctx: &dyn Context) -> Result<Value, EvalError> {
        let features = FeatureSet::permissive();
        let root = parse_script(src, features.clone()).unwrap();
        let scope = Analyzer::new(&features).analyze(&root).unwrap();
        let arithmetic = DefaultArithmetic::default();
        let uber = Uberspect::default();
        let interp = Interpreter { ctx, options: Options::default(), arithmetic: &arithmetic, introspector: &uber, scope: Arc::new(scope) };
        let frame = Frame::root(interp.scope.root_slots);
        interp.run(&root, &frame)
    }

    #[test]
    fn evaluates_arithmetic_and_block_value() {
        let ctx = MapContext::new();
        let v = run("1 + 2 * 3;", &ctx).unwrap();
        assert_eq!(v, Value::Int(7));
    }

    #[test]
    fn var_and_assignment_roundtrip() {
        let ctx = MapContext::new();
        let v = run("var x = 10; x = x + 5; x;", &ctx).unwrap();
        assert_eq!(v, Value::Int(15));
    }

    #[test]
    fn array_alias_sees_mutation_through_context() {
        let ctx = MapContext::new();
        ctx.set("foo", Value::array(vec![Value::Int(1), Value::Int(2)]));
        let v = run("foo[0] = 43; foo.0;", &ctx).unwrap();
        assert_eq!(v, Value::Int(43));
    }

    #[test]
    fn for_loop_sums_a_range() {
        let ctx = MapContext::new();
        let v = run("var total = 0; for (i : 1..5) { total = total + i; } total;", &ctx).unwrap();
        assert_eq!(v, Value::Int(15));
    }

    #[test]
    fn lambda_capture_and_call() {
        let ctx = MapContext::new();
        let v = run("var add = (a, b) -> { a + b }; add(3, 4);", &ctx).unwrap();
        assert_eq!(v, Value::Int(7));
    }

    #[test]
    fn ternary_and_elvis() {
        let ctx = MapContext::new();
        assert_eq!(run("1 < 2 ? 'yes' : 'no';", &ctx).unwrap(), Value::str("yes"));
        assert_eq!(run("null ?: 'fallback';", &ctx).unwrap(), Value::str("fallback"));
    }

    #[test]
    fn strict_mode_raises_on_undefined_variable() {
        let ctx = MapContext::new();
        let features = FeatureSet::permissive();
        let root = parse_script("missing;", features.clone()).unwrap();
        let scope = Analyzer::new(&features).analyze(&root).unwrap();
        let arithmetic = DefaultArithmetic::default();
        let uber = Uberspect::default();
        let mut options = Options::default();
        options.strict = true;
        let interp = Interpreter { ctx: &ctx, options, arithmetic: &arithmetic, introspector: &uber, scope: Arc::new(scope) };
        let frame = Frame::root(interp.scope.root_slots);
        assert!(interp.run(&root, &frame).is_err());
    }
}
