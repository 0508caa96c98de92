// ABOUTME: AST-to-source pretty-printer satisfying the parse/print round-trip contract

use crate::ast::{AssignOp, AstKind, AstNode, BinOp, Literal, TemplateChunk, UnOp, VarKind};
use std::sync::Arc;

/// Prints `node` back to EXL source such that re-parsing the result yields a
/// structurally-equal tree. Scripts (a top-level `Block`) print as a flat
/// statement sequence with no enclosing braces, matching what
/// `parser::parse_script` accepts; a bare expression (from
/// `parse_expression_only`) prints with no trailing separator.
pub fn pretty_print(node: &Arc<AstNode>) -> String {
    match &node.kind {
        AstKind::Block(stmts) => stmts.iter().map(|s| print_stmt(s)).collect::<Vec<_>>().join("\n"),
        _ => print_node(node),
    }
}

/// True for node kinds whose own textual form is already safe to embed
/// directly as an operand (primary/postfix position) without wrapping
/// parens. Everything else gets wrapped — always semantically safe, since
/// `(expr)` is transparent throughout the grammar (`parse_paren_or_lambda`
/// returns the inner node unwrapped), just sometimes more verbose than a
/// precedence-aware printer would be.
fn is_atomic(kind: &AstKind) -> bool {
    matches!(
        kind,
        AstKind::Literal(_)
            | AstKind::Identifier(_)
            | AstKind::PropertyAccess { .. }
            | AstKind::Indexed { .. }
            | AstKind::Call { .. }
            | AstKind::Namespace { .. }
            | AstKind::New { .. }
            | AstKind::ArrayLit { .. }
            | AstKind::MapLit(_)
            | AstKind::SetLit(_)
            | AstKind::TemplateLiteral(_)
    )
}

fn print_operand(node: &AstNode) -> String {
    let text = print_node(node);
    if is_atomic(&node.kind) {
        text
    } else {
        format!("({text})")
    }
}

/// Prints a statement, including whatever trailing `;` its own kind needs.
/// `If`/`While`/`Do`/`For`/`Block` self-terminate on their own closing `}` or
/// condition and must never receive one (`parse_statement` would otherwise
/// see a stray `;` token and fail to parse it as a fresh statement).
/// Every other statement kind is parsed through `parse_expr_statement`,
/// which requires an explicit separator between adjacent statements, so the
/// printer always supplies one.
fn print_stmt(node: &AstNode) -> String {
    match &node.kind {
        AstKind::Block(_) | AstKind::If { .. } | AstKind::While { .. } | AstKind::Do { .. } | AstKind::For { .. } => print_node(node),
        AstKind::Annotation { name, args, stmt } => {
            format!("{}{}", print_annotation_head(name, args), print_stmt(stmt))
        }
        _ => format!("{};", print_node(node)),
    }
}

fn print_annotation_head(name: &str, args: &[Arc<AstNode>]) -> String {
    if args.is_empty() {
        format!("@{name} ")
    } else {
        format!("@{name}({}) ", print_args(args))
    }
}

fn print_args(args: &[Arc<AstNode>]) -> String {
    args.iter().map(|a| print_node(a)).collect::<Vec<_>>().join(", ")
}

fn print_node(node: &AstNode) -> String {
    match &node.kind {
        AstKind::Literal(lit) => print_literal(lit),
        AstKind::Identifier(name) => name.clone(),
        AstKind::VarDecl { kind, declarations } => {
            let kw = match kind {
                VarKind::Var => "var",
                VarKind::Let => "let",
                VarKind::Const => "const",
            };
            let decls = declarations
                .iter()
                .map(|(name, init)| match init {
                    Some(v) => format!("{name} = {}", print_node(v)),
                    None => name.clone(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("{kw} {decls}")
        }
        AstKind::PropertyAccess { receiver, name, null_safe } => {
            let op = if *null_safe { "?." } else { "." };
            format!("{}{op}{name}", print_operand(receiver))
        }
        AstKind::Indexed { receiver, key, .. } => {
            format!("{}[{}]", print_operand(receiver), print_node(key))
        }
        AstKind::BinaryOp { op, left, right } => {
            format!("{} {} {}", print_operand(left), binop_str(*op), print_operand(right))
        }
        AstKind::UnaryOp { op, operand } => {
            format!("{}{}", unop_str(*op), print_operand(operand))
        }
        AstKind::Assign { target, op, value } => {
            format!("{} {} {}", print_operand(target), assignop_str(*op), print_operand(value))
        }
        AstKind::If { cond, then_branch, else_branch } => {
            let mut out = format!("if ({}) {}", print_node(cond), print_stmt(then_branch));
            if let Some(e) = else_branch {
                out.push_str(&format!(" else {}", print_stmt(e)));
            }
            out
        }
        AstKind::While { cond, body } => {
            format!("while ({}) {}", print_node(cond), print_stmt(body))
        }
        AstKind::Do { body, cond } => {
            format!("do {} while ({});", print_stmt(body), print_node(cond))
        }
        AstKind::For { binding, iterable, body } => {
            format!("for (var {binding} : {}) {}", print_node(iterable), print_stmt(body))
        }
        AstKind::Block(stmts) => {
            if stmts.is_empty() {
                "{}".to_string()
            } else {
                format!("{{ {} }}", stmts.iter().map(|s| print_stmt(s)).collect::<Vec<_>>().join(" "))
            }
        }
        AstKind::Return(value) => match value {
            Some(v) => format!("return {}", print_node(v)),
            None => "return".to_string(),
        },
        AstKind::Break => "break".to_string(),
        AstKind::Continue => "continue".to_string(),
        AstKind::Lambda { params, body } => {
            let head = if params.len() == 1 {
                format!("{} ->", params[0])
            } else {
                format!("({}) ->", params.join(", "))
            };
            match &body.kind {
                AstKind::Block(_) => format!("{head} {}", print_node(body)),
                _ => format!("{head} {}", print_operand(body)),
            }
        }
        AstKind::Call { callee, args } => {
            format!("{}({})", print_operand(callee), print_args(args))
        }
        AstKind::Namespace { prefix, callee, args } => {
            format!("{prefix}:{callee}({})", print_args(args))
        }
        AstKind::New { class_name, args } => {
            let class = print_node(class_name);
            if args.is_empty() {
                format!("new({class})")
            } else {
                format!("new({class}, {})", print_args(args))
            }
        }
        AstKind::ArrayLit { elements, has_ellipsis } => {
            let parts = elements
                .iter()
                .enumerate()
                .map(|(i, e)| {
                    if i == 0 && *has_ellipsis {
                        format!("...{}", print_node(e))
                    } else {
                        print_node(e)
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("[{parts}]")
        }
        AstKind::MapLit(entries) => {
            if entries.is_empty() {
                "{:}".to_string()
            } else {
                let parts = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", print_node(k), print_node(v)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{parts}}}")
            }
        }
        AstKind::SetLit(elements) => {
            let parts = elements.iter().map(|e| print_node(e)).collect::<Vec<_>>().join(", ");
            format!("{{{parts}}}")
        }
        AstKind::Range { lo, hi } => {
            format!("{}..{}", print_operand(lo), print_operand(hi))
        }
        AstKind::Ternary { cond, then_branch, else_branch } => {
            format!("{} ? {} : {}", print_operand(cond), print_node(then_branch), print_node(else_branch))
        }
        AstKind::Elvis { left, right } => {
            format!("{} ?: {}", print_operand(left), print_operand(right))
        }
        AstKind::Coalesce { left, right } => {
            format!("{} ?? {}", print_operand(left), print_operand(right))
        }
        AstKind::Annotation { name, args, stmt } => {
            format!("{}{}", print_annotation_head(name, args), print_stmt(stmt))
        }
        AstKind::Pragma { key, value } => {
            format!("#pragma {key} {}", quote_str(value))
        }
        AstKind::TemplateLiteral(chunks) => print_template_literal(chunks),
    }
}

fn print_template_literal(chunks: &[TemplateChunk]) -> String {
    let mut out = String::from("`");
    for chunk in chunks {
        match chunk {
            TemplateChunk::Text(t) => out.push_str(&escape_backtick_text(t)),
            TemplateChunk::Immediate(expr) | TemplateChunk::Deferred(expr) => {
                out.push_str("${");
                out.push_str(&print_node(expr));
                out.push('}');
            }
            TemplateChunk::Code(stmt) => out.push_str(&print_node(stmt)),
        }
    }
    out.push('`');
    out
}

fn escape_backtick_text(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    for (i, &c) in chars.iter().enumerate() {
        match c {
            '`' => out.push_str("\\`"),
            '\\' => out.push_str("\\\\"),
            '$' if chars.get(i + 1) == Some(&'{') => out.push_str("\\$"),
            other => out.push(other),
        }
    }
    out
}

fn print_literal(lit: &Literal) -> String {
    match lit {
        Literal::Null => "null".to_string(),
        Literal::Bool(b) => b.to_string(),
        Literal::Int(i, _) => i.to_string(),
        Literal::BigInt(s) => format!("{s}g"),
        Literal::Float(f) => print_float(*f),
        Literal::Decimal(s) => format!("{s}d"),
        Literal::Str(s) => quote_str(s),
    }
}

/// Rust's default `f64` formatting drops the trailing `.0` for
/// integer-valued floats (`5.0.to_string() == "5"`), which would re-lex as
/// an `Int` rather than a `Float`. Force a decimal point unless one (or an
/// exponent) is already present.
fn print_float(f: f64) -> String {
    if !f.is_finite() {
        return f.to_string();
    }
    let s = f.to_string();
    if s.contains('.') || s.contains('e') || s.contains('E') {
        s
    } else {
        format!("{s}.0")
    }
}

/// Single-quoted string literal matching `lex_string`'s escape set
/// (`\n \t \r \\ \' \" \``).
pub fn quote_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

fn binop_str(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::Pow => "^^",
        BinOp::BitAnd => "&",
        BinOp::BitOr => "|",
        BinOp::BitXor => "^",
        BinOp::Shl => "<<",
        BinOp::Shr => ">>",
        BinOp::Ushr => ">>>",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Gt => ">",
        BinOp::Le => "<=",
        BinOp::Ge => ">=",
        BinOp::And => "&&",
        BinOp::Or => "||",
        BinOp::In => "in",
    }
}

fn unop_str(op: UnOp) -> &'static str {
    match op {
        UnOp::Neg => "-",
        UnOp::Not => "!",
        UnOp::BitNot => "~",
    }
}

fn assignop_str(op: AssignOp) -> &'static str {
    match op {
        AssignOp::Set => "=",
        AssignOp::AddEq => "+=",
        AssignOp::SubEq => "-=",
        AssignOp::MulEq => "*=",
        AssignOp::DivEq => "/=",
        AssignOp::ModEq => "%=",
        AssignOp::AndEq => "&=",
        AssignOp::OrEq => "|=",
        AssignOp::XorEq => "^=",
        AssignOp::ShlEq => "<<=",
        AssignOp::ShrEq => ">>=",
        AssignOp::UshrEq => ">>>=",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureSet;
    use crate::parser::{parse_expression, parse_script};

    fn roundtrip_expr(src: &str) {
        let first = parse_expression(src, FeatureSet::permissive()).unwrap();
        let printed = pretty_print(&first);
        let second = parse_expression(&printed, FeatureSet::permissive()).unwrap_or_else(|e| panic!("reparse of {printed:?} failed: {e:?}"));
        assert!(first.structurally_eq(&second), "roundtrip mismatch for {src:?} -> {printed:?}");
    }

    fn roundtrip_script(src: &str) {
        let first = parse_script(src, FeatureSet::permissive()).unwrap();
        let printed = pretty_print(&first);
        let second = parse_script(&printed, FeatureSet::permissive()).unwrap_or_else(|e| panic!("reparse of {printed:?} failed: {e:?}"));
        assert!(first.structurally_eq(&second), "roundtrip mismatch for {src:?} -> {printed:?}");
    }

    #[test]
    fn roundtrips_arithmetic_precedence() {
        roundtrip_expr("1 + 2 * 3 - 4 / 2");
        roundtrip_expr("(1 + 2) * 3");
        roundtrip_expr("-(1 + 2) * -3");
    }

    #[test]
    fn roundtrips_property_and_index_chains() {
        roundtrip_expr("foo.bar[0].baz");
    }

    #[test]
    fn roundtrips_null_safe_property() {
        roundtrip_expr("foo?.bar.baz");
    }

    #[test]
    fn roundtrips_ternary_elvis_coalesce() {
        roundtrip_expr("a ? b : c");
        roundtrip_expr("a ?: b");
        roundtrip_expr("a ?? b");
    }

    #[test]
    fn roundtrips_literals() {
        roundtrip_expr("42");
        roundtrip_expr("3.14");
        roundtrip_expr("5.0");
        roundtrip_expr("10000000000g");
        roundtrip_expr("1.5d");
        roundtrip_expr("'hello world'");
        roundtrip_expr("'escaped \\'quote\\' and \\n newline'");
        roundtrip_expr("true");
        roundtrip_expr("null");
    }

    #[test]
    fn roundtrips_collections() {
        roundtrip_expr("[1, 2, 3]");
        roundtrip_expr("[...x, 1, 2]");
        roundtrip_expr("{:}");
        roundtrip_expr("{1: 'a', 2: 'b'}");
        roundtrip_expr("{1, 2, 3}");
    }

    #[test]
    fn roundtrips_lambda_forms() {
        roundtrip_expr("x -> x + 1");
        roundtrip_expr("(x, y) -> { x + y }");
    }

    #[test]
    fn roundtrips_namespace_and_new_and_call() {
        roundtrip_expr("math:max(1, 2)");
        roundtrip_expr("new(Point, 1, 2)");
        roundtrip_expr("foo.bar(1, 2)");
    }

    #[test]
    fn roundtrips_scripts_with_control_flow() {
        roundtrip_script("var a = 1, b = 2; if (a < b) { a = a + 1; } else { a = 0; } a;");
        roundtrip_script("while (x > 0) { x = x - 1; }");
        roundtrip_script("do { x = x + 1; } while (x < 10);");
        roundtrip_script("for (var x : [1, 2, 3]) { x; }");
    }

    #[test]
    fn roundtrips_juxtaposed_statements_needing_separators() {
        roundtrip_script("1; if (true) { 2; } 3;");
    }

    #[test]
    fn roundtrips_annotations_and_pragmas() {
        roundtrip_script("#pragma jexl.options '+strict';\nx;");
        roundtrip_script("@retry(3) x = x + 1;");
    }

    #[test]
    fn roundtrips_backtick_templates() {
        roundtrip_expr("`hello ${name}`");
        roundtrip_expr("`literal \\` backtick and \\$ dollar`");
    }
}
