// ABOUTME: Static scope analysis: symbol id assignment, lexical rules, lexical shade, captures

use crate::ast::{AstKind, AstNode, VarKind};
use crate::error::ParseError;
use crate::features::FeatureSet;
use crate::token::Span;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Var,
    Let,
    Const,
    Parameter,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub id: usize,
    pub declared_at: Span,
}

/// Where an `Identifier`/assignment-target node resolves: a frame slot at
/// a given ancestor depth, or a free variable looked up through the
/// `Context` at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Local { depth: usize, slot: usize },
    Free,
}

/// Scope analysis output for one script or lambda body: the slot count its
/// frame needs, and a side table mapping AST node identity (the node's
/// `Arc` allocation address — stable for the lifetime of the tree, since
/// the AST is immutable after parsing and never node-cloned) to its
/// resolution. Kept off the AST node itself per the "interpreter holds no
/// mutable state on AST nodes" invariant.
#[derive(Debug, Default)]
pub struct ScopeTable {
    pub root_slots: usize,
    pub resolutions: HashMap<usize, Resolution>,
    pub lambda_slots: HashMap<usize, usize>,
    /// For each `VarDecl` node, the slot id assigned to each of its
    /// declarations, in declaration order — declarations are always local
    /// to the current frame (depth 0), so only the slot is needed.
    pub var_decl_slots: HashMap<usize, Vec<usize>>,
    /// For each `For` node, the slot id assigned to its loop binding.
    pub for_binding_slots: HashMap<usize, usize>,
}

impl ScopeTable {
    pub fn resolve(&self, node: &Arc<AstNode>) -> Resolution {
        self.resolutions.get(&node_key(node)).copied().unwrap_or(Resolution::Free)
    }
}

pub fn node_key(node: &Arc<AstNode>) -> usize {
    Arc::as_ptr(node) as usize
}

struct Block {
    /// name -> (symbol id, kind) declared so far, in declaration order.
    names: HashMap<String, (usize, SymbolKind)>,
    /// Names declared directly by a statement at this block's own level
    /// (not descending into nested control-flow bodies). Used for the
    /// unconditional `lexical` use-before-declaration check: "using a name
    /// before its declaration in the same scope is an error" applies
    /// whether or not `lexical_shade` is also on.
    direct: HashSet<String>,
    /// Names pre-scanned as "will be declared somewhere in this block" when
    /// lexical_shade is active; a read/assign of such a name before its
    /// actual declaration point is a use-before-declaration error. A
    /// superset of `direct` — also reaches one level into nested
    /// control-flow bodies (see `collect_shaded_names`).
    shaded: HashSet<String>,
}

struct Level {
    next_id: usize,
    blocks: Vec<Block>,
    const_ids: HashSet<usize>,
}

impl Level {
    fn new() -> Self {
        Level { next_id: 0, blocks: vec![Block::new()], const_ids: HashSet::new() }
    }

    fn fresh_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Block {
    fn new() -> Self {
        Block { names: HashMap::new(), direct: HashSet::new(), shaded: HashSet::new() }
    }
}

pub struct Analyzer<'a> {
    features: &'a FeatureSet,
    lexical: bool,
    lexical_shade: bool,
    levels: Vec<Level>,
    table: ScopeTable,
}

impl<'a> Analyzer<'a> {
    pub fn new(features: &'a FeatureSet) -> Self {
        Analyzer {
            features,
            lexical: features.lexical,
            lexical_shade: features.lexical_shade,
            levels: vec![Level::new()],
            table: ScopeTable::default(),
        }
    }

    pub fn analyze(mut self, root: &Arc<AstNode>) -> Result<ScopeTable, ParseError> {
        if let AstKind::Block(stmts) = &root.kind {
            self.prescan_block(stmts);
        }
        self.visit(root)?;
        self.table.root_slots = self.levels[0].next_id;
        Ok(self.table)
    }

    /// Like `analyze`, but first declares `params` as root-level parameters
    /// (slots `0..params.len()`, in order) before visiting the body, so a
    /// top-level script compiled with named parameters resolves them exactly
    /// like a lambda's parameter list.
    pub fn analyze_with_params(mut self, root: &Arc<AstNode>, params: &[String]) -> Result<ScopeTable, ParseError> {
        for p in params {
            self.declare(p, SymbolKind::Parameter, root.span)?;
        }
        if let AstKind::Block(stmts) = &root.kind {
            self.prescan_block(stmts);
        }
        self.visit(root)?;
        self.table.root_slots = self.levels[0].next_id;
        Ok(self.table)
    }

    fn level(&mut self) -> &mut Level {
        self.levels.last_mut().unwrap()
    }

    /// One-level descent pre-scan: collects names that will be declared
    /// directly in this block, or inside an un-braced single-statement
    /// control-flow body nested in it, so `lexical_shade` can hide the
    /// outer binding for the whole block even for reads preceding the
    /// textual declaration.
    fn prescan_block(&mut self, stmts: &[Arc<AstNode>]) {
        if self.lexical {
            let mut direct = HashSet::new();
            collect_direct_decl_names(stmts, &mut direct);
            self.level().blocks.last_mut().unwrap().direct = direct;
        }
        if !self.lexical_shade {
            return;
        }
        let mut shaded = HashSet::new();
        for stmt in stmts {
            collect_shaded_names(stmt, &mut shaded);
        }
        self.level().blocks.last_mut().unwrap().shaded = shaded;
    }

    fn push_block(&mut self) {
        self.level().blocks.push(Block::new());
    }

    fn pop_block(&mut self) {
        self.level().blocks.pop();
    }

    fn declare(&mut self, name: &str, kind: SymbolKind, span: Span) -> Result<usize, ParseError> {
        let hoist_to_root = kind == SymbolKind::Var && !self.lexical;
        let level = self.levels.last_mut().unwrap();
        let block_idx = if hoist_to_root { 0 } else { level.blocks.len() - 1 };

        // `var` in a nested scope always errors, not just a redeclaration in
        // the exact same block: check every enclosing block of this level,
        // not only the one being declared into.
        if kind == SymbolKind::Var && !hoist_to_root {
            for block in &level.blocks[..block_idx] {
                if block.names.contains_key(name) {
                    return Err(ParseError::Redeclaration(span, "scope".into(), name.to_string()));
                }
            }
        }

        if let Some((existing_id, existing_kind)) = level.blocks[block_idx].names.get(name).copied() {
            let redeclare_is_error = match existing_kind {
                SymbolKind::Var => self.lexical || hoist_to_root,
                _ => true,
            };
            if kind == SymbolKind::Var && existing_kind == SymbolKind::Var && !self.lexical {
                // block-loose var re-declaration without lexical mode: keep the
                // existing slot, do not error, do not reset its value unless an
                // initializer is supplied (handled by the caller's Assign emit).
                return Ok(existing_id);
            }
            if redeclare_is_error {
                return Err(ParseError::Redeclaration(span, "scope".into(), name.to_string()));
            }
        }
        let id = level.fresh_id();
        if kind == SymbolKind::Const {
            level.const_ids.insert(id);
        }
        level.blocks[block_idx].names.insert(name.to_string(), (id, kind));
        Ok(id)
    }

    fn lookup(&self, name: &str) -> Option<(usize, usize, bool)> {
        // Returns (level depth from top, symbol id, is_const).
        for (depth, level) in self.levels.iter().rev().enumerate() {
            for block in level.blocks.iter().rev() {
                if let Some((id, _)) = block.names.get(name) {
                    return Some((depth, *id, level.const_ids.contains(id)));
                }
            }
        }
        None
    }

    /// True when reading/assigning `name` right now would be a
    /// use-before-declaration error: it isn't declared yet in the current
    /// block, but will be later — either directly in this block (checked
    /// whenever `lexical` is on, independent of shading) or, under
    /// `lexical_shade`, anywhere one level into a nested control-flow body.
    fn is_use_before_declare(&self, name: &str) -> bool {
        if !self.lexical {
            return false;
        }
        let level = self.levels.last().unwrap();
        let Some(block) = level.blocks.last() else { return false };
        if block.names.contains_key(name) {
            return false;
        }
        if self.lexical_shade {
            block.shaded.contains(name)
        } else {
            block.direct.contains(name)
        }
    }

    fn visit(&mut self, node: &Arc<AstNode>) -> Result<(), ParseError> {
        match &node.kind {
            AstKind::Literal(_) | AstKind::Break | AstKind::Continue | AstKind::Pragma { .. } => Ok(()),
            AstKind::Identifier(name) => self.visit_identifier(node, name),
            AstKind::VarDecl { kind, declarations } => self.visit_var_decl(node, *kind, declarations),
            AstKind::PropertyAccess { receiver, .. } => self.visit(receiver),
            AstKind::Indexed { receiver, key, .. } => {
                self.visit(receiver)?;
                self.visit(key)
            }
            AstKind::BinaryOp { left, right, .. } => {
                self.visit(left)?;
                self.visit(right)
            }
            AstKind::UnaryOp { operand, .. } => self.visit(operand),
            AstKind::Assign { target, value, .. } => {
                self.visit_assign_target(node, target)?;
                self.visit(value)
            }
            AstKind::If { cond, then_branch, else_branch } => {
                self.visit(cond)?;
                self.visit(then_branch)?;
                if let Some(e) = else_branch {
                    self.visit(e)?;
                }
                Ok(())
            }
            AstKind::While { cond, body } => {
                if !self.features.loops {
                    return Err(ParseError::FeatureDisabled(node.span, "scope".into(), "while".into()));
                }
                self.visit(cond)?;
                self.visit(body)
            }
            AstKind::Do { body, cond } => {
                if !self.features.loops {
                    return Err(ParseError::FeatureDisabled(node.span, "scope".into(), "do".into()));
                }
                self.visit(body)?;
                self.visit(cond)
            }
            AstKind::For { binding, iterable, body } => {
                if !self.features.loops {
                    return Err(ParseError::FeatureDisabled(node.span, "scope".into(), "for".into()));
                }
                self.visit(iterable)?;
                self.push_block();
                let slot = self.declare(binding, SymbolKind::Var, node.span)?;
                self.table.for_binding_slots.insert(node_key(node), slot);
                self.visit(body)?;
                self.pop_block();
                Ok(())
            }
            AstKind::Block(stmts) => {
                self.push_block();
                self.prescan_block(stmts);
                for s in stmts {
                    self.visit(s)?;
                }
                self.pop_block();
                Ok(())
            }
            AstKind::Return(v) => {
                if let Some(v) = v {
                    self.visit(v)?;
                }
                Ok(())
            }
            AstKind::Lambda { params, body, .. } => {
                if !self.features.lambdas {
                    return Err(ParseError::FeatureDisabled(node.span, "scope".into(), "lambda".into()));
                }
                self.levels.push(Level::new());
                for p in params {
                    self.declare(p, SymbolKind::Parameter, node.span)?;
                }
                self.visit(body)?;
                let slots = self.levels.pop().unwrap().next_id;
                self.table.lambda_slots.insert(node_key(node), slots);
                Ok(())
            }
            AstKind::Call { callee, args } => {
                self.visit(callee)?;
                for a in args {
                    self.visit(a)?;
                }
                Ok(())
            }
            AstKind::Namespace { args, .. } => {
                if !self.features.namespace_pragma {
                    return Err(ParseError::FeatureDisabled(node.span, "scope".into(), "namespace call".into()));
                }
                for a in args {
                    self.visit(a)?;
                }
                Ok(())
            }
            AstKind::New { class_name, args } => {
                if !self.features.new_instance {
                    return Err(ParseError::FeatureDisabled(node.span, "scope".into(), "new".into()));
                }
                self.visit(class_name)?;
                for a in args {
                    self.visit(a)?;
                }
                Ok(())
            }
            AstKind::ArrayLit { elements, .. } => {
                for e in elements {
                    self.visit(e)?;
                }
                Ok(())
            }
            AstKind::MapLit(entries) => {
                for (k, v) in entries {
                    self.visit(k)?;
                    self.visit(v)?;
                }
                Ok(())
            }
            AstKind::SetLit(elements) => {
                for e in elements {
                    self.visit(e)?;
                }
                Ok(())
            }
            AstKind::Range { lo, hi } => {
                self.visit(lo)?;
                self.visit(hi)
            }
            AstKind::Ternary { cond, then_branch, else_branch } => {
                self.visit(cond)?;
                self.visit(then_branch)?;
                self.visit(else_branch)
            }
            AstKind::Elvis { left, right } | AstKind::Coalesce { left, right } => {
                self.visit(left)?;
                self.visit(right)
            }
            AstKind::Annotation { args, stmt, .. } => {
                if !self.features.annotations {
                    return Err(ParseError::FeatureDisabled(node.span, "scope".into(), "annotation".into()));
                }
                for a in args {
                    self.visit(a)?;
                }
                self.visit(stmt)
            }
            AstKind::TemplateLiteral(chunks) => {
                for chunk in chunks {
                    match chunk {
                        crate::ast::TemplateChunk::Text(_) => {}
                        crate::ast::TemplateChunk::Immediate(e)
                        | crate::ast::TemplateChunk::Deferred(e)
                        | crate::ast::TemplateChunk::Code(e) => self.visit(e)?,
                    }
                }
                Ok(())
            }
        }
    }

    fn visit_identifier(&mut self, node: &Arc<AstNode>, name: &str) -> Result<(), ParseError> {
        if self.is_use_before_declare(name) {
            return Err(ParseError::UndeclaredIdentifier(node.span, "scope".into(), name.to_string()));
        }
        let resolution = match self.lookup(name) {
            Some((depth, id, _)) => Resolution::Local { depth, slot: id },
            None => {
                if self.lexical && self.features.reserved_names {
                    Resolution::Free
                } else {
                    Resolution::Free
                }
            }
        };
        self.table.resolutions.insert(node_key(node), resolution);
        Ok(())
    }

    fn visit_assign_target(&mut self, assign_node: &Arc<AstNode>, target: &Arc<AstNode>) -> Result<(), ParseError> {
        match &target.kind {
            AstKind::Identifier(name) => {
                if self.is_use_before_declare(name) {
                    return Err(ParseError::UndeclaredIdentifier(target.span, "scope".into(), name.to_string()));
                }
                if let Some((_, _, is_const)) = self.lookup(name) {
                    if is_const {
                        return Err(ParseError::ConstAssignment(assign_node.span, "scope".into(), name.to_string()));
                    }
                }
                self.visit_identifier(target, name)
            }
            AstKind::PropertyAccess { .. } | AstKind::Indexed { .. } => self.visit(target),
            _ => Err(ParseError::BadAssignTarget(assign_node.span, "scope".into())),
        }
    }

    fn visit_var_decl(
        &mut self,
        node: &Arc<AstNode>,
        kind: VarKind,
        declarations: &[(String, Option<Arc<AstNode>>)],
    ) -> Result<(), ParseError> {
        if kind == VarKind::Const {
            for (name, init) in declarations {
                if init.is_none() {
                    return Err(ParseError::Expected(node.span, "scope".into(), "initializer".into(), name.clone()));
                }
            }
        }
        let mut slots = Vec::with_capacity(declarations.len());
        for (name, init) in declarations {
            if let Some(init) = init {
                self.visit(init)?;
            }
            let symbol_kind = match kind {
                VarKind::Var => SymbolKind::Var,
                VarKind::Let => SymbolKind::Let,
                VarKind::Const => SymbolKind::Const,
            };
            slots.push(self.declare(name, symbol_kind, node.span)?);
        }
        self.table.var_decl_slots.insert(node_key(node), slots);
        Ok(())
    }
}

/// Collects names declared by a top-level `var`/`let`/`const` statement
/// directly in `stmts` — no descent into nested control-flow bodies, unlike
/// `collect_shaded_names`. This is "the same scope" a plain `lexical`
/// use-before-declaration check (independent of `lexical_shade`) cares
/// about.
fn collect_direct_decl_names(stmts: &[Arc<AstNode>], out: &mut HashSet<String>) {
    for stmt in stmts {
        if let AstKind::VarDecl { declarations, .. } = &stmt.kind {
            for (name, _) in declarations {
                out.insert(name.clone());
            }
        }
    }
}

/// Collects names introduced directly by `stmt`, or by a single un-braced
/// control-flow body nested inside it (one level), for `lexical_shade`
/// pre-scanning. Does not descend into nested `Block`s or `Lambda` bodies —
/// those are separate shading units.
fn collect_shaded_names(stmt: &Arc<AstNode>, out: &mut HashSet<String>) {
    match &stmt.kind {
        AstKind::VarDecl { declarations, .. } => {
            for (name, _) in declarations {
                out.insert(name.clone());
            }
        }
        AstKind::If { then_branch, else_branch, .. } => {
            collect_shaded_names(then_branch, out);
            if let Some(e) = else_branch {
                collect_shaded_names(e, out);
            }
        }
        AstKind::While { body, .. } | AstKind::Do { body, .. } => collect_shaded_names(body, out),
        AstKind::For { binding, body, .. } => {
            out.insert(binding.clone());
            collect_shaded_names(body, out);
        }
        AstKind::Annotation { stmt, .. } => collect_shaded_names(stmt, out),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn analyze(src: &str, features: &FeatureSet) -> Result<ScopeTable, ParseError> {
        let tokens = Lexer::new(src).tokenize().unwrap();
        let root = Parser::new(tokens, features.clone()).parse_script().unwrap();
        Analyzer::new(features).analyze(&root)
    }

    #[test]
    fn const_without_initializer_is_rejected() {
        let features = FeatureSet::permissive();
        let err = analyze("const x;", &features).unwrap_err();
        assert!(matches!(err, ParseError::Expected(..)));
    }

    #[test]
    fn const_reassignment_is_rejected() {
        let features = FeatureSet::permissive();
        let err = analyze("const x = 1; x = 2;", &features).unwrap_err();
        assert!(matches!(err, ParseError::ConstAssignment(..)));
    }

    #[test]
    fn redeclaring_let_in_same_scope_is_rejected() {
        let features = FeatureSet::permissive();
        let err = analyze("let x = 1; let x = 2;", &features).unwrap_err();
        assert!(matches!(err, ParseError::Redeclaration(..)));
    }

    #[test]
    fn var_hoists_to_root_when_not_lexical() {
        let features = FeatureSet::default();
        let table = analyze("{ var x = 42; } { var x; x; }", &features).unwrap();
        assert_eq!(table.root_slots, 1);
    }

    #[test]
    fn var_is_block_scoped_when_lexical() {
        let features = FeatureSet::permissive();
        let table = analyze("{ var x = 42; } { var x; x; }", &features).unwrap();
        assert_eq!(table.root_slots, 2);
    }

    #[test]
    fn use_before_declare_is_rejected_under_lexical_without_shade() {
        let features = FeatureSet { lexical: true, lexical_shade: false, ..FeatureSet::default() };
        let err = analyze("let x = x; let y = 1;", &features).unwrap_err();
        assert!(matches!(err, ParseError::UndeclaredIdentifier(..)));
    }

    #[test]
    fn var_in_nested_block_always_errors_under_lexical() {
        let features = FeatureSet { lexical: true, lexical_shade: false, ..FeatureSet::default() };
        let err = analyze("var x = 1; { var x = 2; }", &features).unwrap_err();
        assert!(matches!(err, ParseError::Redeclaration(..)));
    }
}
