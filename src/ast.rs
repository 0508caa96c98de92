// ABOUTME: Immutable AST node types produced by the parser

use crate::token::{IntWidth, Span};
use std::sync::Arc;

/// A literal payload attached to an `AstKind::Literal` leaf. Distinct from
/// the runtime `Value` union: literals are static, `Send + Sync`, and
/// serializable so the parsed tree can be cached process-wide.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64, IntWidth),
    BigInt(String),
    Float(f64),
    Decimal(String),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum VarKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Ushr,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AssignOp {
    Set,
    AddEq,
    SubEq,
    MulEq,
    DivEq,
    ModEq,
    AndEq,
    OrEq,
    XorEq,
    ShlEq,
    ShrEq,
    UshrEq,
}

/// One chunk of a compiled template literal (see `template.rs`).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum TemplateChunk {
    Text(String),
    Immediate(Arc<AstNode>),
    Deferred(Arc<AstNode>),
    Code(Arc<AstNode>),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum AstKind {
    Literal(Literal),
    Identifier(String),
    VarDecl {
        kind: VarKind,
        declarations: Vec<(String, Option<Arc<AstNode>>)>,
    },
    PropertyAccess {
        receiver: Arc<AstNode>,
        name: String,
        null_safe: bool,
    },
    Indexed {
        receiver: Arc<AstNode>,
        key: Arc<AstNode>,
        null_safe: bool,
    },
    BinaryOp {
        op: BinOp,
        left: Arc<AstNode>,
        right: Arc<AstNode>,
    },
    UnaryOp {
        op: UnOp,
        operand: Arc<AstNode>,
    },
    Assign {
        target: Arc<AstNode>,
        op: AssignOp,
        value: Arc<AstNode>,
    },
    If {
        cond: Arc<AstNode>,
        then_branch: Arc<AstNode>,
        else_branch: Option<Arc<AstNode>>,
    },
    While {
        cond: Arc<AstNode>,
        body: Arc<AstNode>,
    },
    Do {
        body: Arc<AstNode>,
        cond: Arc<AstNode>,
    },
    For {
        binding: String,
        iterable: Arc<AstNode>,
        body: Arc<AstNode>,
    },
    Block(Vec<Arc<AstNode>>),
    Return(Option<Arc<AstNode>>),
    Break,
    Continue,
    Lambda {
        params: Vec<String>,
        body: Arc<AstNode>,
    },
    Call {
        callee: Arc<AstNode>,
        args: Vec<Arc<AstNode>>,
    },
    Namespace {
        prefix: String,
        callee: String,
        args: Vec<Arc<AstNode>>,
    },
    New {
        class_name: Arc<AstNode>,
        args: Vec<Arc<AstNode>>,
    },
    ArrayLit {
        elements: Vec<Arc<AstNode>>,
        has_ellipsis: bool,
    },
    MapLit(Vec<(Arc<AstNode>, Arc<AstNode>)>),
    SetLit(Vec<Arc<AstNode>>),
    Range {
        lo: Arc<AstNode>,
        hi: Arc<AstNode>,
    },
    Ternary {
        cond: Arc<AstNode>,
        then_branch: Arc<AstNode>,
        else_branch: Arc<AstNode>,
    },
    Elvis {
        left: Arc<AstNode>,
        right: Arc<AstNode>,
    },
    Coalesce {
        left: Arc<AstNode>,
        right: Arc<AstNode>,
    },
    Annotation {
        name: String,
        args: Vec<Arc<AstNode>>,
        stmt: Arc<AstNode>,
    },
    Pragma {
        key: String,
        value: String,
    },
    TemplateLiteral(Vec<TemplateChunk>),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AstNode {
    pub kind: AstKind,
    pub span: Span,
}

impl AstNode {
    pub fn new(kind: AstKind, span: Span) -> Arc<AstNode> {
        Arc::new(AstNode { kind, span })
    }

    /// True for node kinds that may appear as an assignment target:
    /// identifiers, property access, and indexed access.
    pub fn is_lvalue(&self) -> bool {
        matches!(
            self.kind,
            AstKind::Identifier(_) | AstKind::PropertyAccess { .. } | AstKind::Indexed { .. }
        )
    }

    /// Structural equality ignoring `span` — two trees parsed from different
    /// source text (e.g. the printer's round-trip contract) are equal when
    /// this holds, even though their positions necessarily differ.
    pub fn structurally_eq(&self, other: &AstNode) -> bool {
        self.kind.structurally_eq(&other.kind)
    }
}

fn nodes_eq(a: &[Arc<AstNode>], b: &[Arc<AstNode>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.structurally_eq(y))
}

fn opt_nodes_eq(a: &Option<Arc<AstNode>>, b: &Option<Arc<AstNode>>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => x.structurally_eq(y),
        (None, None) => true,
        _ => false,
    }
}

impl TemplateChunk {
    fn structurally_eq(&self, other: &TemplateChunk) -> bool {
        match (self, other) {
            (TemplateChunk::Text(a), TemplateChunk::Text(b)) => a == b,
            (TemplateChunk::Immediate(a), TemplateChunk::Immediate(b)) => a.structurally_eq(b),
            (TemplateChunk::Deferred(a), TemplateChunk::Deferred(b)) => a.structurally_eq(b),
            (TemplateChunk::Code(a), TemplateChunk::Code(b)) => a.structurally_eq(b),
            _ => false,
        }
    }
}

impl AstKind {
    fn structurally_eq(&self, other: &AstKind) -> bool {
        match (self, other) {
            (AstKind::Literal(a), AstKind::Literal(b)) => a == b,
            (AstKind::Identifier(a), AstKind::Identifier(b)) => a == b,
            (AstKind::VarDecl { kind: ka, declarations: da }, AstKind::VarDecl { kind: kb, declarations: db }) => {
                ka == kb
                    && da.len() == db.len()
                    && da.iter().zip(db).all(|((na, ia), (nb, ib))| na == nb && opt_nodes_eq(ia, ib))
            }
            (
                AstKind::PropertyAccess { receiver: ra, name: na, null_safe: sa },
                AstKind::PropertyAccess { receiver: rb, name: nb, null_safe: sb },
            ) => ra.structurally_eq(rb) && na == nb && sa == sb,
            (AstKind::Indexed { receiver: ra, key: ka, null_safe: sa }, AstKind::Indexed { receiver: rb, key: kb, null_safe: sb }) => {
                ra.structurally_eq(rb) && ka.structurally_eq(kb) && sa == sb
            }
            (AstKind::BinaryOp { op: oa, left: la, right: ra }, AstKind::BinaryOp { op: ob, left: lb, right: rb }) => {
                oa == ob && la.structurally_eq(lb) && ra.structurally_eq(rb)
            }
            (AstKind::UnaryOp { op: oa, operand: a }, AstKind::UnaryOp { op: ob, operand: b }) => oa == ob && a.structurally_eq(b),
            (AstKind::Assign { target: ta, op: oa, value: va }, AstKind::Assign { target: tb, op: ob, value: vb }) => {
                ta.structurally_eq(tb) && oa == ob && va.structurally_eq(vb)
            }
            (
                AstKind::If { cond: ca, then_branch: ta, else_branch: ea },
                AstKind::If { cond: cb, then_branch: tb, else_branch: eb },
            ) => ca.structurally_eq(cb) && ta.structurally_eq(tb) && opt_nodes_eq(ea, eb),
            (AstKind::While { cond: ca, body: ba }, AstKind::While { cond: cb, body: bb }) => {
                ca.structurally_eq(cb) && ba.structurally_eq(bb)
            }
            (AstKind::Do { body: ba, cond: ca }, AstKind::Do { body: bb, cond: cb }) => {
                ba.structurally_eq(bb) && ca.structurally_eq(cb)
            }
            (
                AstKind::For { binding: na, iterable: ia, body: ba },
                AstKind::For { binding: nb, iterable: ib, body: bb },
            ) => na == nb && ia.structurally_eq(ib) && ba.structurally_eq(bb),
            (AstKind::Block(a), AstKind::Block(b)) => nodes_eq(a, b),
            (AstKind::Return(a), AstKind::Return(b)) => opt_nodes_eq(a, b),
            (AstKind::Break, AstKind::Break) => true,
            (AstKind::Continue, AstKind::Continue) => true,
            (AstKind::Lambda { params: pa, body: ba }, AstKind::Lambda { params: pb, body: bb }) => pa == pb && ba.structurally_eq(bb),
            (AstKind::Call { callee: ca, args: aa }, AstKind::Call { callee: cb, args: ab }) => ca.structurally_eq(cb) && nodes_eq(aa, ab),
            (
                AstKind::Namespace { prefix: pa, callee: ca, args: aa },
                AstKind::Namespace { prefix: pb, callee: cb, args: ab },
            ) => pa == pb && ca == cb && nodes_eq(aa, ab),
            (AstKind::New { class_name: ca, args: aa }, AstKind::New { class_name: cb, args: ab }) => {
                ca.structurally_eq(cb) && nodes_eq(aa, ab)
            }
            (
                AstKind::ArrayLit { elements: ea, has_ellipsis: ha },
                AstKind::ArrayLit { elements: eb, has_ellipsis: hb },
            ) => ha == hb && nodes_eq(ea, eb),
            (AstKind::MapLit(a), AstKind::MapLit(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|((ka, va), (kb, vb))| ka.structurally_eq(kb) && va.structurally_eq(vb))
            }
            (AstKind::SetLit(a), AstKind::SetLit(b)) => nodes_eq(a, b),
            (AstKind::Range { lo: la, hi: ha }, AstKind::Range { lo: lb, hi: hb }) => la.structurally_eq(lb) && ha.structurally_eq(hb),
            (
                AstKind::Ternary { cond: ca, then_branch: ta, else_branch: ea },
                AstKind::Ternary { cond: cb, then_branch: tb, else_branch: eb },
            ) => ca.structurally_eq(cb) && ta.structurally_eq(tb) && ea.structurally_eq(eb),
            (AstKind::Elvis { left: la, right: ra }, AstKind::Elvis { left: lb, right: rb }) => la.structurally_eq(lb) && ra.structurally_eq(rb),
            (AstKind::Coalesce { left: la, right: ra }, AstKind::Coalesce { left: lb, right: rb }) => {
                la.structurally_eq(lb) && ra.structurally_eq(rb)
            }
            (
                AstKind::Annotation { name: na, args: aa, stmt: sa },
                AstKind::Annotation { name: nb, args: ab, stmt: sb },
            ) => na == nb && nodes_eq(aa, ab) && sa.structurally_eq(sb),
            (AstKind::Pragma { key: ka, value: va }, AstKind::Pragma { key: kb, value: vb }) => ka == kb && va == vb,
            (AstKind::TemplateLiteral(a), AstKind::TemplateLiteral(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.structurally_eq(y))
            }
            _ => false,
        }
    }
}
