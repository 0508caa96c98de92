// ABOUTME: Pluggable arithmetic policy implementing value-level operator semantics

use crate::error::EvalError;
use crate::token::Span;
use crate::value::Value;
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::rc::Rc;
use std::str::FromStr;

/// Three-way result every `ArithmeticPolicy` method returns: a produced
/// value, `TryFailed` (the fast path declines — caller falls back to the
/// coercion ladder), or a hard error.
pub enum ArithResult {
    Ok(Value),
    TryFailed,
    Err(EvalError),
}

impl ArithResult {
    pub fn value(v: Value) -> Self {
        ArithResult::Ok(v)
    }
}

/// How integer overflow and division/modulo-by-zero behave; the default
/// policy always promotes on overflow and raises on zero division, per the
/// spec's stated default (see the Open Question resolution in DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroDivideBehavior {
    Error,
    PositiveInfinity,
    NegativeInfinity,
    NaN,
}

/// A replaceable object implementing the behavioural semantics of every
/// operator (§4.5). Installed on the `Engine` as `Arc<dyn ArithmeticPolicy +
/// Send + Sync>` so a host can override individual operators — most overrides only need
/// to implement `add`/`and`/`or` for new operand shapes and return
/// `TryFailed` for everything else, letting the interpreter fall back to
/// `DefaultArithmetic`'s coercion ladder.
pub trait ArithmeticPolicy {
    fn add(&self, l: &Value, r: &Value, span: Span) -> ArithResult;
    fn sub(&self, l: &Value, r: &Value, span: Span) -> ArithResult;
    fn mul(&self, l: &Value, r: &Value, span: Span) -> ArithResult;
    fn div(&self, l: &Value, r: &Value, span: Span) -> ArithResult;
    fn rem(&self, l: &Value, r: &Value, span: Span) -> ArithResult;

    fn bit_and(&self, l: &Value, r: &Value, span: Span) -> ArithResult;
    fn bit_or(&self, l: &Value, r: &Value, span: Span) -> ArithResult;
    fn bit_xor(&self, l: &Value, r: &Value, span: Span) -> ArithResult;
    fn shl(&self, l: &Value, r: &Value, span: Span) -> ArithResult;
    fn shr(&self, l: &Value, r: &Value, span: Span) -> ArithResult;
    fn ushr(&self, l: &Value, r: &Value, span: Span) -> ArithResult;

    /// Three-way comparison for ordering operators; `None` when the values
    /// are incomparable.
    fn compare(&self, l: &Value, r: &Value, span: Span) -> Result<Option<Ordering>, EvalError>;
    fn values_equal(&self, l: &Value, r: &Value, span: Span) -> Result<bool, EvalError>;

    fn to_boolean(&self, v: &Value) -> bool;

    fn math_scale(&self) -> i64;
    fn zero_divide_behavior(&self) -> ZeroDivideBehavior;
}

/// The built-in policy: int -> long(i64) -> bigint -> double -> bigdecimal
/// -> string coercion ladder for every arithmetic operator, matching
/// §4.5's "standard coercion ladder" verbatim.
pub struct DefaultArithmetic {
    pub math_scale: i64,
    pub zero_divide: ZeroDivideBehavior,
}

impl Default for DefaultArithmetic {
    fn default() -> Self {
        DefaultArithmetic { math_scale: -1, zero_divide: ZeroDivideBehavior::Error }
    }
}

/// The tier of the coercion ladder two operands land on for a binary
/// arithmetic operator.
enum Tier {
    Int(i64, i64),
    BigInt(BigInt, BigInt),
    Float(f64, f64),
    Decimal(Decimal, Decimal),
    Concat(String, String),
}

fn tier_of(l: &Value, r: &Value) -> Option<Tier> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Some(Tier::Int(*a, *b)),
        (Value::BigInt(a), Value::BigInt(b)) => Some(Tier::BigInt((**a).clone(), (**b).clone())),
        (Value::BigInt(a), Value::Int(b)) => Some(Tier::BigInt((**a).clone(), BigInt::from(*b))),
        (Value::Int(a), Value::BigInt(b)) => Some(Tier::BigInt(BigInt::from(*a), (**b).clone())),
        (Value::Float(a), Value::Float(b)) => Some(Tier::Float(*a, *b)),
        (Value::Float(a), Value::Int(b)) => Some(Tier::Float(*a, *b as f64)),
        (Value::Int(a), Value::Float(b)) => Some(Tier::Float(*a as f64, *b)),
        (Value::Decimal(a), Value::Decimal(b)) => Some(Tier::Decimal(**a, **b)),
        (Value::Decimal(a), Value::Int(b)) => Some(Tier::Decimal(**a, Decimal::from(*b))),
        (Value::Int(a), Value::Decimal(b)) => Some(Tier::Decimal(Decimal::from(*a), **b)),
        (Value::Decimal(a), Value::Float(b)) => Decimal::from_f64(*b).map(|bd| Tier::Decimal(**a, bd)),
        (Value::Float(a), Value::Decimal(b)) => Decimal::from_f64(*a).map(|ad| Tier::Decimal(ad, **b)),
        (Value::Str(a), Value::Str(b)) => Some(Tier::Concat(a.to_string(), b.to_string())),
        (Value::Str(a), other) => Some(Tier::Concat(a.to_string(), other.to_string())),
        (other, Value::Str(b)) => Some(Tier::Concat(other.to_string(), b.to_string())),
        _ => None,
    }
}

fn promote_overflow(a: i64, b: i64, checked: Option<i64>, op: impl Fn(&BigInt, &BigInt) -> BigInt) -> Value {
    match checked {
        Some(v) => Value::Int(v),
        None => Value::BigInt(Rc::new(op(&BigInt::from(a), &BigInt::from(b)))),
    }
}

impl DefaultArithmetic {
    fn zero_divide_result(&self, span: Span) -> ArithResult {
        match self.zero_divide {
            ZeroDivideBehavior::Error => ArithResult::Err(EvalError::arithmetic(span, "division by zero")),
            ZeroDivideBehavior::PositiveInfinity => ArithResult::value(Value::Float(f64::INFINITY)),
            ZeroDivideBehavior::NegativeInfinity => ArithResult::value(Value::Float(f64::NEG_INFINITY)),
            ZeroDivideBehavior::NaN => ArithResult::value(Value::Float(f64::NAN)),
        }
    }

    fn binary(&self, l: &Value, r: &Value, span: Span, name: &str, int_op: impl Fn(i64, i64) -> (Option<i64>, fn(&BigInt, &BigInt) -> BigInt), big_op: impl Fn(&BigInt, &BigInt) -> BigInt, float_op: impl Fn(f64, f64) -> f64, dec_op: impl Fn(Decimal, Decimal) -> Option<Decimal>, is_zero_divisor: impl Fn(&Tier) -> bool) -> ArithResult {
        let Some(tier) = tier_of(l, r) else {
            return ArithResult::Err(EvalError::arithmetic(span, format!("{name}: incompatible operand types {} and {}", l.type_name(), r.type_name())));
        };
        if is_zero_divisor(&tier) {
            return self.zero_divide_result(span);
        }
        match tier {
            Tier::Int(a, b) => {
                let (checked, bigfn) = int_op(a, b);
                ArithResult::value(promote_overflow(a, b, checked, bigfn))
            }
            Tier::BigInt(a, b) => ArithResult::value(Value::BigInt(Rc::new(big_op(&a, &b)))),
            Tier::Float(a, b) => ArithResult::value(Value::Float(float_op(a, b))),
            Tier::Decimal(a, b) => match dec_op(a, b) {
                Some(v) => ArithResult::value(Value::Decimal(Rc::new(v))),
                None => ArithResult::Err(EvalError::arithmetic(span, format!("{name}: bigdecimal overflow"))),
            },
            Tier::Concat(a, b) => {
                if name == "add" {
                    ArithResult::value(Value::str(format!("{a}{b}")))
                } else {
                    ArithResult::Err(EvalError::arithmetic(span, format!("{name}: cannot apply to strings")))
                }
            }
        }
    }
}

impl ArithmeticPolicy for DefaultArithmetic {
    fn add(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        self.binary(l, r, span, "add", |a, b| (a.checked_add(b), |x, y| x + y), |a, b| a + b, |a, b| a + b, |a, b| a.checked_add(b), |_| false)
    }

    fn sub(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        self.binary(l, r, span, "sub", |a, b| (a.checked_sub(b), |x, y| x - y), |a, b| a - b, |a, b| a - b, |a, b| a.checked_sub(b), |_| false)
    }

    fn mul(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        self.binary(l, r, span, "mul", |a, b| (a.checked_mul(b), |x, y| x * y), |a, b| a * b, |a, b| a * b, |a, b| a.checked_mul(b), |_| false)
    }

    fn div(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        self.binary(
            l,
            r,
            span,
            "div",
            |a, b| (if b != 0 { a.checked_div(b) } else { None }, |x, y| x / y),
            |a, b| a / b,
            |a, b| a / b,
            |a, b| if b.is_zero() { None } else { a.checked_div(b) },
            |t| matches!(t, Tier::Int(_, 0) | Tier::BigInt(_, b) if *b == BigInt::zero()) || matches!(t, Tier::Decimal(_, b) if b.is_zero()),
        )
    }

    fn rem(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        self.binary(
            l,
            r,
            span,
            "rem",
            |a, b| (if b != 0 { a.checked_rem(b) } else { None }, |x, y| x % y),
            |a, b| a % b,
            |a, b| a % b,
            |a, b| if b.is_zero() { None } else { a.checked_rem(b) },
            |t| matches!(t, Tier::Int(_, 0) | Tier::BigInt(_, b) if *b == BigInt::zero()) || matches!(t, Tier::Decimal(_, b) if b.is_zero()),
        )
    }

    fn bit_and(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        int_bitop(l, r, span, "and", |a, b| a & b)
    }

    fn bit_or(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        int_bitop(l, r, span, "or", |a, b| a | b)
    }

    fn bit_xor(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        int_bitop(l, r, span, "xor", |a, b| a ^ b)
    }

    fn shl(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        int_bitop(l, r, span, "shl", |a, b| a.wrapping_shl(b as u32))
    }

    fn shr(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        int_bitop(l, r, span, "shr", |a, b| a.wrapping_shr(b as u32))
    }

    fn ushr(&self, l: &Value, r: &Value, span: Span) -> ArithResult {
        int_bitop(l, r, span, "ushr", |a, b| ((a as u64).wrapping_shr(b as u32)) as i64)
    }

    fn compare(&self, l: &Value, r: &Value, span: Span) -> Result<Option<Ordering>, EvalError> {
        if let Some(ord) = l.partial_cmp(r) {
            return Ok(Some(ord));
        }
        match tier_of(l, r) {
            Some(Tier::BigInt(a, b)) => Ok(a.partial_cmp(&b)),
            Some(Tier::Decimal(a, b)) => Ok(a.partial_cmp(&b)),
            Some(Tier::Concat(a, b)) => Ok(a.partial_cmp(&b)),
            _ => Err(EvalError::arithmetic(span, format!("cannot compare {} and {}", l.type_name(), r.type_name()))),
        }
    }

    fn values_equal(&self, l: &Value, r: &Value, span: Span) -> Result<bool, EvalError> {
        if l.is_null() && r.is_null() {
            return Ok(true);
        }
        if l == r {
            return Ok(true);
        }
        Ok(self.compare(l, r, span).unwrap_or(None) == Some(Ordering::Equal))
    }

    fn to_boolean(&self, v: &Value) -> bool {
        match v {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Array(a) => !a.borrow().is_empty(),
            Value::Map(m) => !m.borrow().is_empty(),
            Value::Set(s) => !s.borrow().is_empty(),
            Value::BigInt(b) => !b.is_zero(),
            Value::Decimal(d) => !d.is_zero(),
            _ => true,
        }
    }

    fn math_scale(&self) -> i64 {
        self.math_scale
    }

    fn zero_divide_behavior(&self) -> ZeroDivideBehavior {
        self.zero_divide
    }
}

fn int_bitop(l: &Value, r: &Value, span: Span, name: &str, op: impl Fn(i64, i64) -> i64) -> ArithResult {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => ArithResult::value(Value::Int(op(*a, *b))),
        (Value::Bool(a), Value::Bool(b)) if name == "and" || name == "or" => {
            ArithResult::value(Value::Bool(if name == "and" { *a && *b } else { *a || *b }))
        }
        _ => ArithResult::Err(EvalError::arithmetic(span, format!("{name}: expected integer operands, got {} and {}", l.type_name(), r.type_name()))),
    }
}

/// Parses a bigint literal body (no suffix) into a `BigInt`.
pub fn parse_bigint(s: &str) -> Option<BigInt> {
    BigInt::from_str(s).ok()
}

/// Parses a bigdecimal literal body (no suffix) into a `Decimal`.
pub fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s).ok().or_else(|| Decimal::from_f64(s.parse::<f64>().ok()?))
}

pub fn bigint_to_i64(b: &BigInt) -> Option<i64> {
    b.to_i64()
}

/// The `parseIdentifier` helper of §4.5: accepts non-negative integers
/// with no leading zeros and length <= 10 as an integer form of a numeric
/// property name (`foo.0`, `foo.12`); any other string yields `None`.
/// Used for numeric-property dispatch on arrays and for
/// `strictInterpolation`'s backtick-string property coercion.
pub fn parse_identifier(name: &str) -> Option<i64> {
    if name.is_empty() || name.len() > 10 || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if name.len() > 1 && name.starts_with('0') {
        return None;
    }
    name.parse::<i64>().ok()
}

#[cfg(test)]
mod parse_identifier_tests {
    use super::parse_identifier;

    #[test]
    fn accepts_plain_non_negative_integers() {
        assert_eq!(parse_identifier("0"), Some(0));
        assert_eq!(parse_identifier("42"), Some(42));
    }

    #[test]
    fn rejects_leading_zero_and_non_digits() {
        assert_eq!(parse_identifier("01"), None);
        assert_eq!(parse_identifier("abc"), None);
        assert_eq!(parse_identifier("12345678901"), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Span;

    fn span() -> Span {
        Span::new(0, 0, 1, 1)
    }

    fn unwrap_ok(r: ArithResult) -> Value {
        match r {
            ArithResult::Ok(v) => v,
            ArithResult::TryFailed => panic!("unexpected TryFailed"),
            ArithResult::Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn int_overflow_promotes_to_bigint() {
        let policy = DefaultArithmetic::default();
        let v = unwrap_ok(policy.add(&Value::Int(i64::MAX), &Value::Int(1), span()));
        assert!(matches!(v, Value::BigInt(_)));
    }

    #[test]
    fn string_concatenation_via_add() {
        let policy = DefaultArithmetic::default();
        let v = unwrap_ok(policy.add(&Value::str("a"), &Value::str("b"), span()));
        assert_eq!(v, Value::str("ab"));
    }

    #[test]
    fn division_by_zero_is_arithmetic_error_by_default() {
        let policy = DefaultArithmetic::default();
        match policy.div(&Value::Int(1), &Value::Int(0), span()) {
            ArithResult::Err(EvalError::Arithmetic { .. }) => {}
            _ => panic!("expected Arithmetic error"),
        }
    }

    #[test]
    fn bigint_modulo_zero_is_arithmetic_error() {
        let policy = DefaultArithmetic::default();
        let zero = Value::BigInt(Rc::new(BigInt::zero()));
        match policy.rem(&Value::BigInt(Rc::new(BigInt::from(7))), &zero, span()) {
            ArithResult::Err(EvalError::Arithmetic { .. }) => {}
            _ => panic!("expected Arithmetic error per the big-integer-modulo Open Question resolution"),
        }
    }

    #[test]
    fn null_is_falsy_and_empty_string_is_falsy() {
        let policy = DefaultArithmetic::default();
        assert!(!policy.to_boolean(&Value::Null));
        assert!(!policy.to_boolean(&Value::str("")));
        assert!(policy.to_boolean(&Value::str("x")));
    }

    #[test]
    fn null_equals_null() {
        let policy = DefaultArithmetic::default();
        assert!(policy.values_equal(&Value::Null, &Value::Null, span()).unwrap());
    }
}
