// ABOUTME: Hand-rolled character scanner producing a token stream, delegating literal bodies to nom

use crate::error::ParseError;
use crate::token::{InterpSegment, IntWidth, Span, Token, TokenKind};
use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, tag};
use nom::character::complete::{digit1, none_of, one_of};
use nom::combinator::{opt, recognize, value};
use nom::sequence::{preceded, tuple};
use nom::IResult;

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer { src, bytes: src.as_bytes(), pos: 0, line: 1, column: 1 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek2(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn advance_by(&mut self, text: &str) {
        let mut remaining = text.len();
        while remaining > 0 {
            let c = self.peek().expect("advance_by length must match remaining input");
            self.advance();
            remaining -= c.len_utf8();
        }
    }

    fn span_from(&self, start_pos: usize, start_line: u32, start_col: u32) -> Span {
        Span::new(start_pos as u32, (self.pos - start_pos) as u32, start_line, start_col)
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek2() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('#') if self.peek2() == Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek2() == Some('*') => {
                    let (start_pos, start_line, start_col) = (self.pos, self.line, self.column);
                    self.advance();
                    self.advance();
                    let mut closed = false;
                    while let Some(c) = self.peek() {
                        if c == '*' && self.peek2() == Some('/') {
                            self.advance();
                            self.advance();
                            closed = true;
                            break;
                        }
                        self.advance();
                    }
                    if !closed {
                        return Err(ParseError::UnterminatedLiteral(
                            self.span_from(start_pos, start_line, start_col),
                            "lexer".into(),
                        ));
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia()?;
            let (start_pos, start_line, start_col) = (self.pos, self.line, self.column);
            let Some(c) = self.peek() else {
                out.push(Token::new(TokenKind::Eof, self.span_from(start_pos, start_line, start_col)));
                break;
            };

            let kind = if c == '#' && self.peek2() == Some('p') && self.rest().starts_with("#pragma") {
                self.advance_by("#pragma");
                TokenKind::Pragma
            } else if c.is_ascii_digit() {
                self.lex_number()?
            } else if c == '"' || c == '\'' {
                self.lex_string(c)?
            } else if c == '`' {
                self.lex_interp_string()?
            } else if is_ident_start(c) {
                self.lex_ident_or_keyword()
            } else {
                self.lex_operator(start_pos, start_line, start_col)?
            };

            out.push(Token::new(kind, self.span_from(start_pos, start_line, start_col)));
        }
        Ok(out)
    }

    fn lex_number(&mut self) -> Result<TokenKind, ParseError> {
        let input = self.rest();
        let (rem, matched) = number_body(input).map_err(|_| {
            ParseError::UnexpectedChar(
                self.span_from(self.pos, self.line, self.column),
                "lexer".into(),
                self.peek().unwrap_or('\0'),
            )
        })?;
        let consumed = input.len() - rem.len();
        let text = &input[..consumed];
        self.advance_by(text);

        if let Some(stripped) = text.strip_suffix(['g', 'G']) {
            return Ok(TokenKind::BigInt(stripped.to_string()));
        }
        if let Some(stripped) = text.strip_suffix(['d', 'D']) {
            return Ok(TokenKind::Decimal(stripped.to_string()));
        }
        if text.contains('.') || text.contains(['e', 'E']) {
            let f: f64 = text.parse().map_err(|_| {
                ParseError::UnterminatedLiteral(self.span_from(self.pos, self.line, self.column), "lexer".into())
            })?;
            return Ok(TokenKind::Float(f));
        }
        match text.parse::<i64>() {
            Ok(i) => {
                let width = if i >= i32::MIN as i64 && i <= i32::MAX as i64 { IntWidth::I32 } else { IntWidth::I64 };
                Ok(TokenKind::Int(i, width))
            }
            Err(_) => Ok(TokenKind::BigInt(text.to_string())),
        }
    }

    fn lex_string(&mut self, quote: char) -> Result<TokenKind, ParseError> {
        let start = (self.pos, self.line, self.column);
        self.advance();
        let input = self.rest();
        let (rem, body) = string_body(quote)(input).map_err(|_| {
            ParseError::UnterminatedLiteral(self.span_from(start.0, start.1, start.2), "lexer".into())
        })?;
        let consumed = input.len() - rem.len();
        self.advance_by(&input[..consumed]);
        if self.peek() != Some(quote) {
            return Err(ParseError::UnterminatedLiteral(self.span_from(start.0, start.1, start.2), "lexer".into()));
        }
        self.advance();
        Ok(TokenKind::Str(body))
    }

    /// Backtick strings are interpolated: raw text interleaved with `${…}`
    /// expression chunks, each chunk's source text handed back to the
    /// parser to be lexed/parsed independently.
    fn lex_interp_string(&mut self) -> Result<TokenKind, ParseError> {
        let start = (self.pos, self.line, self.column);
        self.advance();
        let mut segments = Vec::new();
        let mut text = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(ParseError::UnterminatedLiteral(
                        self.span_from(start.0, start.1, start.2),
                        "lexer".into(),
                    ))
                }
                Some('`') => {
                    self.advance();
                    break;
                }
                Some('\\') if matches!(self.peek2(), Some('$') | Some('#') | Some('`') | Some('\\')) => {
                    self.advance();
                    if let Some(c) = self.advance() {
                        text.push(c);
                    }
                }
                Some('$') if self.peek2() == Some('{') => {
                    if !text.is_empty() {
                        segments.push(InterpSegment::Text(std::mem::take(&mut text)));
                    }
                    self.advance();
                    self.advance();
                    let mut depth = 1usize;
                    let mut expr = String::new();
                    while depth > 0 {
                        match self.advance() {
                            None => {
                                return Err(ParseError::UnterminatedLiteral(
                                    self.span_from(start.0, start.1, start.2),
                                    "lexer".into(),
                                ))
                            }
                            Some('{') => {
                                depth += 1;
                                expr.push('{');
                            }
                            Some('}') => {
                                depth -= 1;
                                if depth > 0 {
                                    expr.push('}');
                                }
                            }
                            Some(c) => expr.push(c),
                        }
                    }
                    segments.push(InterpSegment::Expr(expr));
                }
                Some(c) => {
                    self.advance();
                    text.push(c);
                }
            }
        }
        if !text.is_empty() {
            segments.push(InterpSegment::Text(text));
        }
        Ok(TokenKind::InterpString(segments))
    }

    fn lex_ident_or_keyword(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                self.advance();
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];
        keyword(text).unwrap_or_else(|| TokenKind::Ident(text.to_string()))
    }

    fn lex_operator(&mut self, start_pos: usize, start_line: u32, start_col: u32) -> Result<TokenKind, ParseError> {
        macro_rules! two {
            ($a:expr, $b:expr, $tok:expr) => {
                if self.peek() == Some($a) && self.peek2() == Some($b) {
                    self.advance();
                    self.advance();
                    return Ok($tok);
                }
            };
        }
        two!('&', '&', TokenKind::AmpAmp);
        two!('|', '|', TokenKind::PipePipe);
        two!('=', '=', TokenKind::EqEq);
        two!('!', '=', TokenKind::BangEq);
        two!('<', '=', TokenKind::Le);
        two!('>', '=', TokenKind::Ge);
        two!('+', '=', TokenKind::PlusEq);
        two!('-', '=', TokenKind::MinusEq);
        two!('*', '=', TokenKind::StarEq);
        two!('/', '=', TokenKind::SlashEq);
        two!('%', '=', TokenKind::PercentEq);
        two!('&', '=', TokenKind::AmpEq);
        two!('|', '=', TokenKind::PipeEq);
        two!('^', '=', TokenKind::CaretEq);
        two!('?', '?', TokenKind::QuestionQuestion);
        two!('?', '.', TokenKind::QuestionDot);
        two!('?', ':', TokenKind::QuestionColon);
        two!(':', ':', TokenKind::ColonColon);
        two!('-', '>', TokenKind::Arrow);

        if self.rest().starts_with("<<=") {
            self.advance_by("<<=");
            return Ok(TokenKind::ShlEq);
        }
        if self.rest().starts_with(">>>=") {
            self.advance_by(">>>=");
            return Ok(TokenKind::UshrEq);
        }
        if self.rest().starts_with(">>=") {
            self.advance_by(">>=");
            return Ok(TokenKind::ShrEq);
        }
        if self.rest().starts_with(">>>") {
            self.advance_by(">>>");
            return Ok(TokenKind::Ushr);
        }
        if self.rest().starts_with("<<") {
            self.advance_by("<<");
            return Ok(TokenKind::Shl);
        }
        if self.rest().starts_with(">>") {
            self.advance_by(">>");
            return Ok(TokenKind::Shr);
        }
        if self.rest().starts_with("...") {
            self.advance_by("...");
            return Ok(TokenKind::Ellipsis);
        }
        if self.rest().starts_with("..") {
            self.advance_by("..");
            return Ok(TokenKind::DotDot);
        }

        let c = self.advance().unwrap();
        Ok(match c {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '^' => TokenKind::Caret,
            '&' => TokenKind::Amp,
            '|' => TokenKind::Pipe,
            '~' => TokenKind::Tilde,
            '!' => TokenKind::Bang,
            '<' => TokenKind::Lt,
            '>' => TokenKind::Gt,
            '=' => TokenKind::Assign,
            '?' => TokenKind::Question,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semi,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '@' => TokenKind::At,
            '#' => TokenKind::Hash,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            other => return Err(ParseError::UnexpectedChar(self.span_from(start_pos, start_line, start_col), "lexer".into(), other)),
        })
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn keyword(s: &str) -> Option<TokenKind> {
    Some(match s {
        "var" => TokenKind::Var,
        "let" => TokenKind::Let,
        "const" => TokenKind::Const,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "do" => TokenKind::Do,
        "for" => TokenKind::For,
        "return" => TokenKind::Return,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "new" => TokenKind::New,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        "eq" => TokenKind::Eq_,
        "ne" => TokenKind::Ne_,
        "lt" => TokenKind::Lt_,
        "gt" => TokenKind::Gt_,
        "le" => TokenKind::Le_,
        "ge" => TokenKind::Ge_,
        "and" => TokenKind::And_,
        "or" => TokenKind::Or_,
        "not" => TokenKind::Not_,
        "in" => TokenKind::In_,
        _ => return None,
    })
}

/// A numeric literal body: digits, optional fractional part, optional
/// exponent, optional `g`/`G` (bigint) or `d`/`D` (bigdecimal) suffix. Built
/// from `nom` combinators, per the teacher's own leaf-level literal lexing
/// style in `parse_number`.
fn number_body(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        digit1,
        opt(preceded(tag("."), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        opt(one_of("gGdD")),
    )))(input)
}

/// A quoted string body with standard backslash escapes, matching the
/// teacher's `parse_string` use of `escaped_transform`/`one_of`.
fn string_body(quote: char) -> impl Fn(&str) -> IResult<&str, String> {
    move |input: &str| {
        if input.starts_with(quote) {
            return Ok((input, String::new()));
        }
        alt((
            escaped_transform(
                none_of_quote(quote),
                '\\',
                alt((
                    value('\n', tag("n")),
                    value('\t', tag("t")),
                    value('\r', tag("r")),
                    value('\\', tag("\\")),
                    value('\'', tag("'")),
                    value('"', tag("\"")),
                    value('`', tag("`")),
                )),
            ),
            value(String::new(), tag("")),
        ))(input)
    }
}

fn none_of_quote(quote: char) -> impl Fn(&str) -> IResult<&str, char> {
    move |input: &str| match quote {
        '\'' => none_of("'\\")(input),
        _ => none_of("\"\\")(input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).tokenize().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_simple_arithmetic() {
        let ks = kinds("1 + 2 * 3");
        assert_eq!(
            ks,
            vec![
                TokenKind::Int(1, IntWidth::I32),
                TokenKind::Plus,
                TokenKind::Int(2, IntWidth::I32),
                TokenKind::Star,
                TokenKind::Int(3, IntWidth::I32),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_line_comment_variants() {
        let ks = kinds("'hello world!'//comment");
        assert_eq!(ks, vec![TokenKind::Str("hello world!".into()), TokenKind::Eof]);
        let ks2 = kinds("1 ## comment\n2");
        assert_eq!(ks2, vec![TokenKind::Int(1, IntWidth::I32), TokenKind::Int(2, IntWidth::I32), TokenKind::Eof]);
    }

    #[test]
    fn lexes_big_int_and_decimal_suffixes() {
        let ks = kinds("10g 3.5d");
        assert_eq!(ks, vec![TokenKind::BigInt("10".into()), TokenKind::Decimal("3.5".into()), TokenKind::Eof]);
    }

    #[test]
    fn widens_int_literal_past_i32() {
        let ks = kinds("2147483648");
        assert_eq!(ks, vec![TokenKind::Int(2147483648, IntWidth::I64), TokenKind::Eof]);
    }

    #[test]
    fn lexes_interpolated_backtick_string() {
        let ks = kinds("`Dear ${p}!`");
        match &ks[0] {
            TokenKind::InterpString(segments) => {
                assert_eq!(
                    segments,
                    &vec![InterpSegment::Text("Dear ".into()), InterpSegment::Expr("p".into()), InterpSegment::Text("!".into())]
                );
            }
            other => panic!("expected InterpString, got {other:?}"),
        }
    }

    #[test]
    fn range_operator_is_distinct_from_dot_access() {
        let ks = kinds("0..count-1");
        assert!(ks.contains(&TokenKind::DotDot));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(Lexer::new("'unterminated").tokenize().is_err());
    }
}
