// ABOUTME: Recursive-descent / precedence-climbing parser producing the AST

use crate::ast::{AssignOp, AstKind, AstNode, BinOp, Literal, TemplateChunk, UnOp, VarKind};
use crate::error::ParseError;
use crate::features::FeatureSet;
use crate::lexer::Lexer;
use crate::token::{InterpSegment, Span, Token, TokenKind};
use std::sync::Arc;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    features: FeatureSet,
    /// Depth counter suppressing namespace-call colon lookahead (see
    /// `parse_ident_led`) while parsing a sub-expression whose own trailing
    /// `:` belongs to an enclosing construct — a ternary's then-branch or a
    /// map literal's key — not to a namespace call starting at the same
    /// identifier.
    ns_lookahead_suppressed: usize,
}

type PResult = Result<Arc<AstNode>, ParseError>;

impl Parser {
    pub fn new(tokens: Vec<Token>, features: FeatureSet) -> Self {
        Parser { tokens, pos: 0, features, ns_lookahead_suppressed: 0 }
    }

    /// Parses a sub-expression whose own trailing `:` (if any) must be left
    /// for the caller to consume — used where a bare `ident` followed by
    /// `: ident(` would otherwise be misread as a namespace call (`x ? y :
    /// foo(1)` misparsing `y : foo(1)` as `y:foo(1)`, or a map key `{x:
    /// foo(1)}` misparsing `x: foo(1)` as `x:foo(1)` and missing the map
    /// entry's value entirely).
    fn parse_assignment_suppressing_ns(&mut self) -> PResult {
        self.ns_lookahead_suppressed += 1;
        let result = self.parse_assignment();
        self.ns_lookahead_suppressed -= 1;
        result
    }

    fn here(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn kind(&self) -> &TokenKind {
        &self.here().kind
    }

    fn span(&self) -> Span {
        self.here().span
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(&kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, ParseError> {
        if self.check(&kind) {
            Ok(self.bump())
        } else {
            Err(ParseError::Expected(self.span(), "parser".into(), what.into(), format!("{:?}", self.kind())))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        if let TokenKind::Ident(name) = self.kind().clone() {
            self.bump();
            Ok(name)
        } else {
            Err(ParseError::Expected(self.span(), "parser".into(), "identifier".into(), format!("{:?}", self.kind())))
        }
    }

    fn require_feature(&self, enabled: bool, what: &str, span: Span) -> Result<(), ParseError> {
        if enabled {
            Ok(())
        } else {
            Err(ParseError::FeatureDisabled(span, "parser".into(), what.into()))
        }
    }

    /// Parses a whole script: a flat sequence of statements, implicitly
    /// scoped as the root block (not itself requiring braces).
    pub fn parse_script(&mut self) -> PResult {
        let start = self.span();
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::Eof) {
            stmts.push(self.parse_statement()?);
        }
        Ok(AstNode::new(AstKind::Block(stmts), start))
    }

    /// Parses a standalone expression (for `Engine::create_expression`),
    /// requiring the whole token stream to be consumed.
    pub fn parse_expression_only(&mut self) -> PResult {
        let e = self.parse_expr()?;
        if !self.check(&TokenKind::Eof) {
            return Err(ParseError::UnexpectedToken(self.span(), "parser".into(), format!("{:?}", self.kind())));
        }
        Ok(e)
    }

    fn parse_statement(&mut self) -> PResult {
        match self.kind().clone() {
            TokenKind::Pragma => self.parse_pragma(),
            TokenKind::LBrace => self.parse_block(),
            TokenKind::Var | TokenKind::Let | TokenKind::Const => self.parse_var_decl(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Do => self.parse_do(),
            TokenKind::For => self.parse_for(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Break => {
                let span = self.bump().span;
                self.eat(TokenKind::Semi);
                Ok(AstNode::new(AstKind::Break, span))
            }
            TokenKind::Continue => {
                let span = self.bump().span;
                self.eat(TokenKind::Semi);
                Ok(AstNode::new(AstKind::Continue, span))
            }
            TokenKind::At => self.parse_annotation(),
            _ => self.parse_expr_statement(),
        }
    }

    fn parse_pragma(&mut self) -> PResult {
        let start = self.bump().span; // `#pragma`
        let key = self.parse_pragma_key()?;
        let value = self.parse_pragma_value()?;
        self.eat(TokenKind::Semi);
        Ok(AstNode::new(AstKind::Pragma { key, value }, start))
    }

    fn parse_pragma_key(&mut self) -> Result<String, ParseError> {
        let mut key = self.expect_ident()?;
        while self.eat(TokenKind::Dot) {
            key.push('.');
            key.push_str(&self.expect_ident()?);
        }
        Ok(key)
    }

    fn parse_pragma_value(&mut self) -> Result<String, ParseError> {
        match self.kind().clone() {
            TokenKind::Str(s) => {
                self.bump();
                Ok(s)
            }
            TokenKind::Ident(s) => {
                self.bump();
                Ok(s)
            }
            _ => Err(ParseError::Expected(self.span(), "parser".into(), "pragma value".into(), format!("{:?}", self.kind()))),
        }
    }

    fn parse_block(&mut self) -> PResult {
        let start = self.expect(TokenKind::LBrace, "{")?.span;
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.check(&TokenKind::Eof) {
            stmts.push(self.parse_statement()?);
        }
        let end = self.expect(TokenKind::RBrace, "}")?.span;
        Ok(AstNode::new(AstKind::Block(stmts), start.to(end)))
    }

    fn parse_var_decl(&mut self) -> PResult {
        let start = self.span();
        let kind = match self.bump().kind {
            TokenKind::Var => VarKind::Var,
            TokenKind::Let => VarKind::Let,
            TokenKind::Const => VarKind::Const,
            _ => unreachable!(),
        };
        let mut decls = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let init = if self.eat(TokenKind::Assign) { Some(self.parse_assignment()?) } else { None };
            decls.push((name, init));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.eat(TokenKind::Semi);
        Ok(AstNode::new(AstKind::VarDecl { kind, declarations: decls }, start))
    }

    fn parse_if(&mut self) -> PResult {
        let start = self.bump().span;
        self.expect(TokenKind::LParen, "(")?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen, ")")?;
        let then_branch = self.parse_statement()?;
        let else_branch = if self.eat(TokenKind::Else) { Some(self.parse_statement()?) } else { None };
        Ok(AstNode::new(AstKind::If { cond, then_branch, else_branch }, start))
    }

    fn parse_while(&mut self) -> PResult {
        let start = self.bump().span;
        self.expect(TokenKind::LParen, "(")?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen, ")")?;
        let body = self.parse_statement()?;
        Ok(AstNode::new(AstKind::While { cond, body }, start))
    }

    fn parse_do(&mut self) -> PResult {
        let start = self.bump().span;
        let body = self.parse_statement()?;
        self.expect(TokenKind::While, "while")?;
        self.expect(TokenKind::LParen, "(")?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen, ")")?;
        self.eat(TokenKind::Semi);
        Ok(AstNode::new(AstKind::Do { body, cond }, start))
    }

    fn parse_for(&mut self) -> PResult {
        let start = self.bump().span;
        self.expect(TokenKind::LParen, "(")?;
        self.eat(TokenKind::Var);
        let binding = self.expect_ident()?;
        self.expect(TokenKind::Colon, ":")?;
        let iterable = self.parse_expr()?;
        self.expect(TokenKind::RParen, ")")?;
        let body = self.parse_statement()?;
        Ok(AstNode::new(AstKind::For { binding, iterable, body }, start))
    }

    fn parse_return(&mut self) -> PResult {
        let start = self.bump().span;
        let value = if self.check(&TokenKind::Semi) || self.check(&TokenKind::RBrace) || self.check(&TokenKind::Eof) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.eat(TokenKind::Semi);
        Ok(AstNode::new(AstKind::Return(value), start))
    }

    fn parse_annotation(&mut self) -> PResult {
        let start = self.span();
        self.require_feature(self.features.annotations, "annotation", start)?;
        self.bump(); // @
        let name = self.expect_ident()?;
        let mut args = Vec::new();
        if self.eat(TokenKind::LParen) {
            if !self.check(&TokenKind::RParen) {
                loop {
                    args.push(self.parse_assignment()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RParen, ")")?;
        }
        let stmt = self.parse_statement()?;
        Ok(AstNode::new(AstKind::Annotation { name, args, stmt }, start))
    }

    fn parse_expr_statement(&mut self) -> PResult {
        let e = self.parse_expr()?;
        if self.check(&TokenKind::Semi) {
            self.bump();
        } else if !self.check(&TokenKind::RBrace) && !self.check(&TokenKind::Eof) && self.starts_expression() {
            return Err(ParseError::MissingSeparator(self.span(), "parser".into()));
        }
        Ok(e)
    }

    /// True when the current token could begin a fresh expression-statement
    /// — used to detect juxtaposition like `1 2` that the separator
    /// discipline rejects.
    fn starts_expression(&self) -> bool {
        !matches!(self.kind(), TokenKind::Semi | TokenKind::RBrace | TokenKind::Eof)
    }

    // ---- expression grammar, lowest to highest precedence ----

    pub fn parse_expr(&mut self) -> PResult {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> PResult {
        let target = self.parse_ternary()?;
        let op = match self.kind() {
            TokenKind::Assign => AssignOp::Set,
            TokenKind::PlusEq => AssignOp::AddEq,
            TokenKind::MinusEq => AssignOp::SubEq,
            TokenKind::StarEq => AssignOp::MulEq,
            TokenKind::SlashEq => AssignOp::DivEq,
            TokenKind::PercentEq => AssignOp::ModEq,
            TokenKind::AmpEq => AssignOp::AndEq,
            TokenKind::PipeEq => AssignOp::OrEq,
            TokenKind::CaretEq => AssignOp::XorEq,
            TokenKind::ShlEq => AssignOp::ShlEq,
            TokenKind::ShrEq => AssignOp::ShrEq,
            TokenKind::UshrEq => AssignOp::UshrEq,
            _ => return Ok(target),
        };
        let span = self.bump().span;
        if !target.is_lvalue() {
            return Err(ParseError::BadAssignTarget(span, "parser".into()));
        }
        let value = self.parse_assignment()?;
        Ok(AstNode::new(AstKind::Assign { target, op, value }, span))
    }

    fn parse_ternary(&mut self) -> PResult {
        let cond = self.parse_elvis()?;
        if self.eat(TokenKind::Question) {
            let span = cond.span;
            let then_branch = self.parse_assignment_suppressing_ns()?;
            self.expect(TokenKind::Colon, ":")?;
            let else_branch = self.parse_assignment()?;
            return Ok(AstNode::new(AstKind::Ternary { cond, then_branch, else_branch }, span));
        }
        Ok(cond)
    }

    fn parse_elvis(&mut self) -> PResult {
        let mut left = self.parse_coalesce()?;
        while self.eat(TokenKind::QuestionColon) {
            let span = left.span;
            let right = self.parse_coalesce()?;
            left = AstNode::new(AstKind::Elvis { left, right }, span);
        }
        Ok(left)
    }

    fn parse_coalesce(&mut self) -> PResult {
        let mut left = self.parse_or()?;
        while self.eat(TokenKind::QuestionQuestion) {
            let span = left.span;
            let right = self.parse_or()?;
            left = AstNode::new(AstKind::Coalesce { left, right }, span);
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> PResult {
        let mut left = self.parse_and()?;
        while matches!(self.kind(), TokenKind::PipePipe | TokenKind::Or_) {
            let span = self.bump().span;
            let right = self.parse_and()?;
            left = AstNode::new(AstKind::BinaryOp { op: BinOp::Or, left, right }, span);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> PResult {
        let mut left = self.parse_equality()?;
        while matches!(self.kind(), TokenKind::AmpAmp | TokenKind::And_) {
            let span = self.bump().span;
            let right = self.parse_equality()?;
            left = AstNode::new(AstKind::BinaryOp { op: BinOp::And, left, right }, span);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> PResult {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.kind() {
                TokenKind::EqEq | TokenKind::Eq_ => BinOp::Eq,
                TokenKind::BangEq | TokenKind::Ne_ => BinOp::Ne,
                _ => break,
            };
            let span = self.bump().span;
            let right = self.parse_relational()?;
            left = AstNode::new(AstKind::BinaryOp { op, left, right }, span);
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> PResult {
        let mut left = self.parse_bitor()?;
        loop {
            let op = match self.kind() {
                TokenKind::Lt | TokenKind::Lt_ => BinOp::Lt,
                TokenKind::Gt | TokenKind::Gt_ => BinOp::Gt,
                TokenKind::Le | TokenKind::Le_ => BinOp::Le,
                TokenKind::Ge | TokenKind::Ge_ => BinOp::Ge,
                TokenKind::In_ => BinOp::In,
                _ => break,
            };
            let span = self.bump().span;
            let right = self.parse_bitor()?;
            left = AstNode::new(AstKind::BinaryOp { op, left, right }, span);
        }
        Ok(left)
    }

    fn parse_bitor(&mut self) -> PResult {
        let mut left = self.parse_bitxor()?;
        while self.check(&TokenKind::Pipe) {
            let span = self.bump().span;
            let right = self.parse_bitxor()?;
            left = AstNode::new(AstKind::BinaryOp { op: BinOp::BitOr, left, right }, span);
        }
        Ok(left)
    }

    fn parse_bitxor(&mut self) -> PResult {
        let mut left = self.parse_bitand()?;
        while self.check(&TokenKind::Caret) {
            let span = self.bump().span;
            let right = self.parse_bitand()?;
            left = AstNode::new(AstKind::BinaryOp { op: BinOp::BitXor, left, right }, span);
        }
        Ok(left)
    }

    fn parse_bitand(&mut self) -> PResult {
        let mut left = self.parse_shift()?;
        while self.check(&TokenKind::Amp) {
            let span = self.bump().span;
            let right = self.parse_shift()?;
            left = AstNode::new(AstKind::BinaryOp { op: BinOp::BitAnd, left, right }, span);
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> PResult {
        let mut left = self.parse_range()?;
        loop {
            let op = match self.kind() {
                TokenKind::Shl => BinOp::Shl,
                TokenKind::Shr => BinOp::Shr,
                TokenKind::Ushr => BinOp::Ushr,
                _ => break,
            };
            let span = self.bump().span;
            let right = self.parse_range()?;
            left = AstNode::new(AstKind::BinaryOp { op, left, right }, span);
        }
        Ok(left)
    }

    /// `..` binds looser than additive ops per the lexer's documented rule.
    fn parse_range(&mut self) -> PResult {
        let lo = self.parse_additive()?;
        if self.eat(TokenKind::DotDot) {
            let span = lo.span;
            let hi = self.parse_additive()?;
            return Ok(AstNode::new(AstKind::Range { lo, hi }, span));
        }
        Ok(lo)
    }

    fn parse_additive(&mut self) -> PResult {
        let mut left = self.parse_mul()?;
        loop {
            let op = match self.kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            let span = self.bump().span;
            let right = self.parse_mul()?;
            left = AstNode::new(AstKind::BinaryOp { op, left, right }, span);
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> PResult {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            let span = self.bump().span;
            let right = self.parse_unary()?;
            left = AstNode::new(AstKind::BinaryOp { op, left, right }, span);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult {
        let op = match self.kind() {
            TokenKind::Minus => UnOp::Neg,
            TokenKind::Bang | TokenKind::Not_ => UnOp::Not,
            TokenKind::Tilde => UnOp::BitNot,
            _ => return self.parse_postfix(),
        };
        let span = self.bump().span;
        let operand = self.parse_unary()?;
        Ok(AstNode::new(AstKind::UnaryOp { op, operand }, span))
    }

    fn parse_postfix(&mut self) -> PResult {
        let mut node = self.parse_primary()?;
        loop {
            node = match self.kind().clone() {
                TokenKind::Dot => {
                    let span = self.bump().span;
                    let name = self.parse_property_name()?;
                    AstNode::new(AstKind::PropertyAccess { receiver: node, name, null_safe: false }, span)
                }
                TokenKind::QuestionDot => {
                    let span = self.bump().span;
                    let name = self.parse_property_name()?;
                    AstNode::new(AstKind::PropertyAccess { receiver: node, name, null_safe: true }, span)
                }
                TokenKind::LBracket => {
                    let span = self.bump().span;
                    let key = self.parse_expr()?;
                    self.expect(TokenKind::RBracket, "]")?;
                    AstNode::new(AstKind::Indexed { receiver: node, key, null_safe: false }, span)
                }
                TokenKind::LParen => {
                    let span = self.bump().span;
                    let args = self.parse_args_until(TokenKind::RParen)?;
                    self.expect(TokenKind::RParen, ")")?;
                    self.require_feature(self.features.script_method_call, "call", span)?;
                    AstNode::new(AstKind::Call { callee: node, args }, span)
                }
                _ => break,
            };
        }
        Ok(node)
    }

    fn parse_property_name(&mut self) -> Result<String, ParseError> {
        match self.kind().clone() {
            TokenKind::Ident(name) => {
                self.bump();
                Ok(name)
            }
            TokenKind::Int(i, _) if i >= 0 => {
                self.bump();
                Ok(i.to_string())
            }
            _ => Err(ParseError::Expected(self.span(), "parser".into(), "property name".into(), format!("{:?}", self.kind()))),
        }
    }

    fn parse_args_until(&mut self, end: TokenKind) -> Result<Vec<Arc<AstNode>>, ParseError> {
        let mut args = Vec::new();
        if !self.check(&end) {
            loop {
                args.push(self.parse_assignment()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> PResult {
        let start = self.span();
        match self.kind().clone() {
            TokenKind::Int(i, w) => {
                self.bump();
                Ok(AstNode::new(AstKind::Literal(Literal::Int(i, w)), start))
            }
            TokenKind::BigInt(s) => {
                self.bump();
                Ok(AstNode::new(AstKind::Literal(Literal::BigInt(s)), start))
            }
            TokenKind::Float(f) => {
                self.bump();
                Ok(AstNode::new(AstKind::Literal(Literal::Float(f)), start))
            }
            TokenKind::Decimal(s) => {
                self.bump();
                Ok(AstNode::new(AstKind::Literal(Literal::Decimal(s)), start))
            }
            TokenKind::Str(s) => {
                self.bump();
                Ok(AstNode::new(AstKind::Literal(Literal::Str(s)), start))
            }
            TokenKind::InterpString(segments) => {
                self.bump();
                self.build_interp_template(segments, start)
            }
            TokenKind::True => {
                self.bump();
                Ok(AstNode::new(AstKind::Literal(Literal::Bool(true)), start))
            }
            TokenKind::False => {
                self.bump();
                Ok(AstNode::new(AstKind::Literal(Literal::Bool(false)), start))
            }
            TokenKind::Null => {
                self.bump();
                Ok(AstNode::new(AstKind::Literal(Literal::Null), start))
            }
            TokenKind::Ident(name) => self.parse_ident_led(name, start),
            TokenKind::LParen => self.parse_paren_or_lambda(),
            TokenKind::LBracket => self.parse_array_literal(),
            TokenKind::LBrace => self.parse_map_or_set_literal(),
            TokenKind::New => self.parse_new(),
            _ => Err(ParseError::UnexpectedToken(start, "parser".into(), format!("{:?}", self.kind()))),
        }
    }

    /// An identifier in primary position may lead into a namespace call
    /// (`ns:fn(args)`) or a parenless single-argument lambda (`x -> expr`).
    fn parse_ident_led(&mut self, name: String, start: Span) -> PResult {
        self.bump();
        if self.ns_lookahead_suppressed == 0 && self.check(&TokenKind::Colon) && self.peek_is_namespace_call() {
            self.bump(); // :
            let callee = self.expect_ident()?;
            self.expect(TokenKind::LParen, "(")?;
            self.require_feature(self.features.namespace_pragma, "namespace call", start)?;
            let args = self.parse_args_until(TokenKind::RParen)?;
            self.expect(TokenKind::RParen, ")")?;
            return Ok(AstNode::new(AstKind::Namespace { prefix: name, callee, args }, start));
        }
        if self.check(&TokenKind::Arrow) {
            self.bump();
            self.require_feature(self.features.lambdas, "lambda", start)?;
            let body = self.parse_lambda_body()?;
            return Ok(AstNode::new(AstKind::Lambda { params: vec![name], body }, start));
        }
        Ok(AstNode::new(AstKind::Identifier(name), start))
    }

    /// Looks ahead past `IDENT :` to see whether an identifier-then-`(`
    /// follows, distinguishing `ns:fn(args)` from a bare ternary's `:`.
    fn peek_is_namespace_call(&self) -> bool {
        let mut i = self.pos + 1;
        if let TokenKind::Ident(_) = self.tokens.get(i).map(|t| &t.kind).unwrap_or(&TokenKind::Eof) {
            i += 1;
            matches!(self.tokens.get(i).map(|t| &t.kind), Some(TokenKind::LParen))
        } else {
            false
        }
    }

    fn parse_paren_or_lambda(&mut self) -> PResult {
        let start = self.span();
        if let Some(params) = self.try_parse_lambda_params() {
            self.require_feature(self.features.lambdas, "lambda", start)?;
            let body = self.parse_lambda_body()?;
            return Ok(AstNode::new(AstKind::Lambda { params, body }, start));
        }
        self.bump(); // (
        let e = self.parse_expr()?;
        self.expect(TokenKind::RParen, ")")?;
        Ok(e)
    }

    /// Attempts to parse `( ident, ident, ... )` followed by `->`; restores
    /// the cursor and returns `None` if that shape doesn't hold, so the
    /// caller can fall back to parsing a parenthesized expression.
    fn try_parse_lambda_params(&mut self) -> Option<Vec<String>> {
        let saved = self.pos;
        self.bump(); // (
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                match self.kind().clone() {
                    TokenKind::Ident(name) => {
                        self.bump();
                        params.push(name);
                    }
                    _ => {
                        self.pos = saved;
                        return None;
                    }
                }
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        if !self.eat(TokenKind::RParen) || !self.eat(TokenKind::Arrow) {
            self.pos = saved;
            return None;
        }
        Some(params)
    }

    fn parse_lambda_body(&mut self) -> PResult {
        if self.check(&TokenKind::LBrace) {
            self.parse_block()
        } else {
            self.parse_assignment()
        }
    }

    fn parse_array_literal(&mut self) -> PResult {
        let start = self.bump().span; // [
        let mut elements = Vec::new();
        let mut has_ellipsis = false;
        if !self.check(&TokenKind::RBracket) {
            loop {
                has_ellipsis |= self.eat(TokenKind::Ellipsis);
                elements.push(self.parse_assignment()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        let end = self.expect(TokenKind::RBracket, "]")?.span;
        Ok(AstNode::new(AstKind::ArrayLit { elements, has_ellipsis }, start.to(end)))
    }

    /// `{}`/`{:}` is an empty map; `{1, 2}` a set; `{1: 'a', 2: 'b'}` a map —
    /// disambiguated by the presence of `:` after the first element.
    fn parse_map_or_set_literal(&mut self) -> PResult {
        let start = self.bump().span; // {
        if self.eat(TokenKind::Colon) {
            self.expect(TokenKind::RBrace, "}")?;
            return Ok(AstNode::new(AstKind::MapLit(Vec::new()), start));
        }
        if self.eat(TokenKind::RBrace) {
            return Ok(AstNode::new(AstKind::MapLit(Vec::new()), start));
        }
        let first_key = self.parse_assignment_suppressing_ns()?;
        if self.eat(TokenKind::Colon) {
            let mut entries = vec![(first_key, self.parse_assignment()?)];
            while self.eat(TokenKind::Comma) {
                let k = self.parse_assignment_suppressing_ns()?;
                self.expect(TokenKind::Colon, ":")?;
                let v = self.parse_assignment()?;
                entries.push((k, v));
            }
            self.expect(TokenKind::RBrace, "}")?;
            Ok(AstNode::new(AstKind::MapLit(entries), start))
        } else {
            let mut elements = vec![first_key];
            while self.eat(TokenKind::Comma) {
                elements.push(self.parse_assignment()?);
            }
            self.expect(TokenKind::RBrace, "}")?;
            Ok(AstNode::new(AstKind::SetLit(elements), start))
        }
    }

    fn parse_new(&mut self) -> PResult {
        let start = self.bump().span;
        self.require_feature(self.features.new_instance, "new", start)?;
        self.expect(TokenKind::LParen, "(")?;
        let class_name = self.parse_assignment()?;
        let mut args = Vec::new();
        while self.eat(TokenKind::Comma) {
            args.push(self.parse_assignment()?);
        }
        self.expect(TokenKind::RParen, ")")?;
        Ok(AstNode::new(AstKind::New { class_name, args }, start))
    }

    /// Re-lexes/re-parses each `${…}` chunk of a backtick-interpolated
    /// string into its own expression node; text segments stay verbatim.
    fn build_interp_template(&mut self, segments: Vec<InterpSegment>, start: Span) -> PResult {
        let mut chunks = Vec::with_capacity(segments.len());
        for seg in segments {
            match seg {
                InterpSegment::Text(t) => chunks.push(TemplateChunk::Text(t)),
                InterpSegment::Expr(src) => {
                    let expr = parse_expression(&src, self.features.clone())
                        .map_err(|_| ParseError::MalformedTemplate(start, "parser".into(), src.clone()))?;
                    chunks.push(TemplateChunk::Immediate(expr));
                }
            }
        }
        Ok(AstNode::new(AstKind::TemplateLiteral(chunks), start))
    }
}

/// Convenience entry point used by both `engine.rs` and backtick-string
/// interpolation to parse a standalone expression fragment.
pub fn parse_expression(src: &str, features: FeatureSet) -> Result<Arc<AstNode>, ParseError> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser::new(tokens, features);
    parser.parse_expression_only()
}

/// Convenience entry point for a whole script.
pub fn parse_script(src: &str, features: FeatureSet) -> Result<Arc<AstNode>, ParseError> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser::new(tokens, features);
    parser.parse_script()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_precedence_correctly() {
        let e = parse_expression("1 + 2 * 3", FeatureSet::default()).unwrap();
        match &e.kind {
            AstKind::BinaryOp { op: BinOp::Add, right, .. } => {
                assert!(matches!(right.kind, AstKind::BinaryOp { op: BinOp::Mul, .. }));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn range_binds_looser_than_additive() {
        let e = parse_expression("0..count-1", FeatureSet::default()).unwrap();
        match &e.kind {
            AstKind::Range { hi, .. } => assert!(matches!(hi.kind, AstKind::BinaryOp { op: BinOp::Sub, .. })),
            other => panic!("expected Range, got {other:?}"),
        }
    }

    #[test]
    fn juxtaposed_statements_require_separator() {
        let err = parse_script("1 2", FeatureSet::default()).unwrap_err();
        assert!(matches!(err, ParseError::MissingSeparator(..)));
    }

    #[test]
    fn control_flow_statements_self_terminate() {
        let script = parse_script("if (true) { 1 } x", FeatureSet::default()).unwrap();
        assert!(matches!(script.kind, AstKind::Block(_)));
    }

    #[test]
    fn parses_multi_declaration_var() {
        let script = parse_script("var a = 1, b = 2, c;", FeatureSet::default()).unwrap();
        if let AstKind::Block(stmts) = &script.kind {
            if let AstKind::VarDecl { declarations, .. } = &stmts[0].kind {
                assert_eq!(declarations.len(), 3);
            } else {
                panic!("expected VarDecl");
            }
        }
    }

    #[test]
    fn parses_lambda_parenless_and_parenthesized() {
        let a = parse_expression("x -> x + 1", FeatureSet::permissive()).unwrap();
        assert!(matches!(a.kind, AstKind::Lambda { .. }));
        let b = parse_expression("(x, y) -> { x + y }", FeatureSet::permissive()).unwrap();
        assert!(matches!(b.kind, AstKind::Lambda { .. }));
    }

    #[test]
    fn parses_empty_object_as_map_not_set() {
        let e = parse_expression("{:}", FeatureSet::default()).unwrap();
        assert!(matches!(e.kind, AstKind::MapLit(_)));
    }

    #[test]
    fn parses_namespace_call() {
        let e = parse_expression("math:max(1, 2)", FeatureSet::default()).unwrap();
        assert!(matches!(e.kind, AstKind::Namespace { .. }));
    }

    #[test]
    fn ternary_with_bare_identifier_then_branch_and_call_else_branch() {
        let e = parse_expression("true ? x : foo(1)", FeatureSet::default()).unwrap();
        match &e.kind {
            AstKind::Ternary { then_branch, else_branch, .. } => {
                assert!(matches!(then_branch.kind, AstKind::Identifier(ref n) if n == "x"));
                assert!(matches!(else_branch.kind, AstKind::Call { .. }));
            }
            other => panic!("expected Ternary, got {other:?}"),
        }
    }

    #[test]
    fn map_literal_key_followed_by_call_value_is_not_mistaken_for_namespace_call() {
        let e = parse_expression("{x: foo(1)}", FeatureSet::default()).unwrap();
        match &e.kind {
            AstKind::MapLit(entries) => {
                assert_eq!(entries.len(), 1);
                assert!(matches!(entries[0].0.kind, AstKind::Identifier(ref n) if n == "x"));
                assert!(matches!(entries[0].1.kind, AstKind::Call { .. }));
            }
            other => panic!("expected MapLit, got {other:?}"),
        }
    }

    #[test]
    fn numeric_property_access_parses() {
        let e = parse_expression("foo.0", FeatureSet::default()).unwrap();
        match &e.kind {
            AstKind::PropertyAccess { name, .. } => assert_eq!(name, "0"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
