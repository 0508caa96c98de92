// ABOUTME: End-to-end scenarios and invariants exercised through the public host embedding API

use exl::arithmetic::{ArithResult, ArithmeticPolicy, DefaultArithmetic, ZeroDivideBehavior};
use exl::error::{EvalError, ParseError};
use exl::introspect::MemberTable;
use exl::token::Span;
use exl::value::HostObject;
use exl::{Context, Engine, MapContext, Value};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use std::sync::Arc;

/// A minimal host collection exposing `.add(x)`, standing in for the kind
/// of host-registered accumulator object scenario S6's `$out.add(i)` calls.
#[derive(Debug, Default)]
struct OutList(RefCell<Vec<Value>>);

impl HostObject for OutList {
    fn type_name(&self) -> &str {
        "OutList"
    }
    fn get_property(&self, _name: &str) -> Option<Value> {
        None
    }
    fn set_property(&self, name: &str, _value: Value) -> Result<(), String> {
        Err(format!("no such property {name}"))
    }
    fn call_method(&self, name: &str, args: &[Value]) -> Option<Result<Value, String>> {
        match name {
            "add" => {
                self.0.borrow_mut().push(args.first().cloned().unwrap_or(Value::Null));
                Some(Ok(Value::Null))
            }
            _ => None,
        }
    }
    fn members(&self) -> MemberTable {
        MemberTable::default().with_method("add", exl::introspect::Arity::Exact(1))
    }
}

fn eval(src: &str, ctx: &dyn Context) -> Result<Value, EvalError> {
    let engine = Engine::builder().build();
    let expr = engine.create_expression(src).expect("parse");
    expr.evaluate(ctx)
}

fn run_script(engine: &Engine, src: &str, ctx: &dyn Context) -> Result<Value, EvalError> {
    let script = engine.create_script(src, &[]).expect("parse");
    script.execute(ctx, &[])
}

// S1: line comment after a string literal is ignored.
#[test]
fn s1_trailing_line_comment_is_ignored() {
    let ctx = MapContext::new();
    let v = eval("'hello world!'//comment", &ctx).unwrap();
    assert_eq!(v, Value::str("hello world!"));
}

// S2: a `##` line comment and a later statement — the script's value is its last statement.
#[test]
fn s2_hash_comment_and_final_statement_value() {
    let engine = Engine::builder().build();
    let ctx = MapContext::new();
    let v = run_script(&engine, "'hello world!';## comment\n'bye...';", &ctx).unwrap();
    assert_eq!(v, Value::str("bye..."));
}

// S3: a long chain of binary arithmetic over 26 bound variables.
#[test]
fn s3_long_arithmetic_chain() {
    let ctx = MapContext::new();
    for name in 'a'..='z' {
        ctx.set(&name.to_string(), Value::Int(10));
    }
    let src = "(((((((((((((((((((((((((z+y)/x)*w)-v)*u)/t)-s)*r)/q)+p)-o)*n)-m)+l)*k)+j)/i)+h)*g)+f)/e)+d)-c)/b)+a)";
    let v = eval(src, &ctx).unwrap();
    assert_eq!(v, Value::Int(11));
}

// S4: indexed assignment through a host-supplied mutable array, then numeric property read.
#[test]
fn s4_indexed_assignment_then_numeric_property_access() {
    let engine = Engine::builder().build();
    let ctx = MapContext::new();
    ctx.set("foo", Value::array(vec![Value::Int(42)]));
    let v = run_script(&engine, "foo[0] = 43; foo.0;", &ctx).unwrap();
    assert_eq!(v, Value::Int(43));
}

// S5: an empty array literal and an empty map literal are distinct.
#[test]
fn s5_empty_array_vs_empty_map() {
    let ctx = MapContext::new();
    let v = eval("if (true) { [] } else { {:} }", &ctx).unwrap();
    assert_eq!(v, Value::array(vec![]));
    assert_ne!(v, Value::map(Default::default()));
}

// S6: lexical + lexicalShade, `for` loop appending to a host-supplied list
// via a method call, mirroring spec.md's `$out.add(i)`.
#[test]
fn s6_for_loop_builds_list_under_lexical_shade() {
    let engine = Engine::builder().lexical(true).lexical_shade(true).build();
    let ctx = MapContext::new();
    let out = Rc::new(OutList::default());
    ctx.set("out", Value::Object(out.clone()));
    let src = "var count=10; for(var i:0..count-1) out.add(i); out;";
    run_script(&engine, src, &ctx).unwrap();
    let collected = out.0.borrow().clone();
    assert_eq!(collected, (0..10).map(Value::Int).collect::<Vec<_>>());
}

// S8: under lexical+lexicalShade, the `for` loop's own `var i` binding
// shades the whole enclosing block, so the leading `i=0` is a
// use-before-declaration write — rejected at parse time rather than at
// evaluation (see DESIGN.md's resolution of this corner of lexical shade).
#[test]
fn s8_lexical_shade_rejects_loop_variable_used_before_its_declaration() {
    let engine = Engine::builder().build();
    let err = engine
        .create_script("#pragma jexl.options '+strict +lexical +lexicalShade -safe';\ni=0; for(var i:[42]) i; i;", &[])
        .unwrap_err();
    assert!(matches!(err, ParseError::UndeclaredIdentifier(..)));
}

// Invariant 3: const reassignment is rejected at parse time, even through a capturing lambda.
#[test]
fn invariant_const_reassignment_via_capture_is_rejected_at_parse_time() {
    let engine = Engine::builder().build();
    let err = engine.create_script("const x = 1; var f = () -> { x = 2; }; f();", &[]).unwrap_err();
    assert!(matches!(err, ParseError::ConstAssignment(..)));
}

// Invariant 4: lexical shade symmetry — on, the inner declaration hides the
// outer binding for the whole enclosing block; off, the outer binding is
// visible.
#[test]
fn invariant_lexical_shade_symmetry() {
    let shaded = Engine::builder().lexical(true).lexical_shade(true).build();
    let ctx = MapContext::new();
    let v = run_script(&shaded, "{ var x = 42; } { var x; x; }", &ctx).unwrap();
    assert_eq!(v, Value::Null);

    let unshaded = Engine::builder().build();
    let ctx = MapContext::new();
    let v = run_script(&unshaded, "{ var x = 42; } { var x; x; }", &ctx).unwrap();
    assert_eq!(v, Value::Int(42));
}

// Invariant 5: null-safe locality — `safe` yields null through a null
// receiver chain; strict-without-safe raises.
#[test]
fn invariant_null_safe_locality() {
    let safe_engine = Engine::builder().safe(true).build();
    let ctx = MapContext::new();
    ctx.set("a", Value::Null);
    let v = run_script(&safe_engine, "a.b.c;", &ctx).unwrap();
    assert_eq!(v, Value::Null);

    let strict_engine = Engine::builder().strict(true).safe(false).build();
    let ctx = MapContext::new();
    ctx.set("a", Value::Null);
    let err = run_script(&strict_engine, "a.b.c;", &ctx).unwrap_err();
    assert!(matches!(err, EvalError::Variable { .. }));
}

/// A policy overriding `&` on two strings to concatenate, deferring
/// everything else to the default coercion ladder via `TryFailed`.
struct ConcatAnd(DefaultArithmetic);

impl ArithmeticPolicy for ConcatAnd {
    fn add(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        self.0.add(l, r, span)
    }
    fn sub(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        self.0.sub(l, r, span)
    }
    fn mul(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        self.0.mul(l, r, span)
    }
    fn div(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        self.0.div(l, r, span)
    }
    fn rem(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        self.0.rem(l, r, span)
    }
    fn bit_and(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        match (l, r) {
            (Value::Str(a), Value::Str(b)) => ArithResult::Ok(Value::str(format!("{a}{b}"))),
            _ => self.0.bit_and(l, r, span),
        }
    }
    fn bit_or(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        self.0.bit_or(l, r, span)
    }
    fn bit_xor(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        self.0.bit_xor(l, r, span)
    }
    fn shl(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        self.0.shl(l, r, span)
    }
    fn shr(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        self.0.shr(l, r, span)
    }
    fn ushr(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        self.0.ushr(l, r, span)
    }
    fn compare(&self, l: &Value, r: &Value, span: Span) -> Result<Option<Ordering>, EvalError> {
        self.0.compare(l, r, span)
    }
    fn values_equal(&self, l: &Value, r: &Value, span: Span) -> Result<bool, EvalError> {
        self.0.values_equal(l, r, span)
    }
    fn to_boolean(&self, v: &Value) -> bool {
        self.0.to_boolean(v)
    }
    fn math_scale(&self) -> i64 {
        self.0.math_scale()
    }
    fn zero_divide_behavior(&self) -> ZeroDivideBehavior {
        self.0.zero_divide_behavior()
    }
}

// Invariant 6: installing a custom arithmetic policy overriding `&` on two
// strings makes `'a' & 'b'` concatenate, without disturbing `+`.
#[test]
fn invariant_custom_and_overload_concatenates_strings() {
    let policy: Arc<dyn ArithmeticPolicy + Send + Sync> = Arc::new(ConcatAnd(DefaultArithmetic::default()));
    let engine = Engine::builder().arithmetic(policy).build();
    let ctx = MapContext::new();
    let v = run_script(&engine, "'a' & 'b';", &ctx).unwrap();
    assert_eq!(v, Value::str("ab"));
    let v = run_script(&engine, "1 + 2;", &ctx).unwrap();
    assert_eq!(v, Value::Int(3));
}

// AST round-trip contract (§6): parsing the pretty-printed text of a parse
// yields a structurally equal AST, and re-evaluation is unaffected.
#[test]
fn ast_round_trip_contract_holds_for_a_nontrivial_script() {
    let engine = Engine::builder().build();
    let src = "var total = 0; for (i : 1..5) { total = total + i * 2; } total;";
    let script = engine.create_script(src, &[]).unwrap();
    let printed = script.get_parsed_text();
    let reparsed = engine.create_script(&printed, &[]).unwrap();
    let ctx = MapContext::new();
    assert_eq!(script.execute(&ctx, &[]).unwrap(), reparsed.execute(&ctx, &[]).unwrap());
}
