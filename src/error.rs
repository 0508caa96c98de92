// ABOUTME: Error taxonomy for parsing and evaluation failures

use crate::token::Span;
use thiserror::Error;

/// Errors raised by the lexer, parser, and feature/scope analyzer. Always
/// surfaces to the caller of `Engine::create_script`/`create_expression`/
/// `create_template` — never swallowed by `Options::silent`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("{1}: unterminated literal")]
    UnterminatedLiteral(Span, String),

    #[error("{1}: unexpected character {2:?}")]
    UnexpectedChar(Span, String, char),

    #[error("{1}: unexpected token {2}")]
    UnexpectedToken(Span, String, String),

    #[error("{1}: expected {2}, found {3}")]
    Expected(Span, String, String, String),

    #[error("{1}: invalid assignment target")]
    BadAssignTarget(Span, String),

    #[error("{1}: undeclared identifier {2:?} in strict lexical mode")]
    UndeclaredIdentifier(Span, String, String),

    #[error("{1}: {2:?} is already declared in this scope")]
    Redeclaration(Span, String, String),

    #[error("{1}: cannot assign to const {2:?}")]
    ConstAssignment(Span, String, String),

    #[error("{1}: ambiguous binding for {2:?}")]
    AmbiguousBinding(Span, String, String),

    #[error("{1}: construct {2:?} is disabled by the current feature set")]
    FeatureDisabled(Span, String, String),

    #[error("{1}: malformed template: {2}")]
    MalformedTemplate(Span, String, String),

    #[error("two consecutive expression statements must be separated by ';'")]
    MissingSeparator(Span, String),
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::UnterminatedLiteral(s, _)
            | ParseError::UnexpectedChar(s, _, _)
            | ParseError::UnexpectedToken(s, _, _)
            | ParseError::Expected(s, _, _, _)
            | ParseError::BadAssignTarget(s, _)
            | ParseError::UndeclaredIdentifier(s, _, _)
            | ParseError::Redeclaration(s, _, _)
            | ParseError::ConstAssignment(s, _, _)
            | ParseError::AmbiguousBinding(s, _, _)
            | ParseError::FeatureDisabled(s, _, _)
            | ParseError::MalformedTemplate(s, _, _)
            | ParseError::MissingSeparator(s, _) => *s,
        }
    }
}

/// Errors raised during evaluation: identifier resolution, property/method
/// access, assignment, arithmetic, and cooperative cancellation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("{span}: undefined variable {name:?}")]
    Variable { span: Span, name: String, undefined: bool },

    #[error("{span}: no such property {name:?} on {receiver}")]
    Property { span: Span, name: String, receiver: String },

    #[error("{span}: no such method {name:?} on {receiver}{}", if *.ambiguous { " (ambiguous)" } else { "" })]
    Method { span: Span, name: String, receiver: String, ambiguous: bool, cause: Option<String> },

    #[error("{span}: invalid assignment target: {detail}")]
    Assignment { span: Span, detail: String },

    #[error("{span}: arithmetic error: {detail}")]
    Arithmetic { span: Span, detail: String },

    #[error("try-fast-path invocation refused; caller must use slow path")]
    TryFailed,

    #[error("evaluation cancelled")]
    Cancel,
}

impl EvalError {
    pub fn undefined(span: Span, name: impl Into<String>) -> Self {
        EvalError::Variable { span, name: name.into(), undefined: true }
    }

    pub fn null_target(span: Span, name: impl Into<String>) -> Self {
        EvalError::Variable { span, name: name.into(), undefined: false }
    }

    pub fn no_property(span: Span, name: impl Into<String>, receiver: impl Into<String>) -> Self {
        EvalError::Property { span, name: name.into(), receiver: receiver.into() }
    }

    pub fn no_method(span: Span, name: impl Into<String>, receiver: impl Into<String>) -> Self {
        EvalError::Method { span, name: name.into(), receiver: receiver.into(), ambiguous: false, cause: None }
    }

    pub fn ambiguous_method(span: Span, name: impl Into<String>, receiver: impl Into<String>) -> Self {
        EvalError::Method { span, name: name.into(), receiver: receiver.into(), ambiguous: true, cause: None }
    }

    pub fn method_exception(span: Span, name: impl Into<String>, receiver: impl Into<String>, cause: impl Into<String>) -> Self {
        EvalError::Method { span, name: name.into(), receiver: receiver.into(), ambiguous: false, cause: Some(cause.into()) }
    }

    pub fn bad_assignment(span: Span, detail: impl Into<String>) -> Self {
        EvalError::Assignment { span, detail: detail.into() }
    }

    pub fn arithmetic(span: Span, detail: impl Into<String>) -> Self {
        EvalError::Arithmetic { span, detail: detail.into() }
    }

    /// Whether this error is "recoverable" under `Options::safe` (a null
    /// receiver on a property/method path) as opposed to a hard failure.
    pub fn is_null_path(&self) -> bool {
        matches!(self, EvalError::Variable { undefined: false, .. })
            || matches!(self, EvalError::Property { .. })
            || matches!(self, EvalError::Method { cause: None, ambiguous: false, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_free_message_formats() {
        let span = Span::new(0, 1, 1, 1);
        let err = EvalError::undefined(span, "x");
        assert_eq!(err.to_string(), "1:1: undefined variable \"x\"");
    }

    #[test]
    fn null_path_classification() {
        let span = Span::new(0, 1, 1, 1);
        assert!(EvalError::null_target(span, "a").is_null_path());
        assert!(!EvalError::undefined(span, "a").is_null_path());
        assert!(EvalError::no_property(span, "b", "null").is_null_path());
    }
}
