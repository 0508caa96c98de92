// ABOUTME: Pragma collection and dispatch, including the built-in jexl.options and script.mode pragmas

use crate::ast::{AstKind, AstNode};
use crate::context::Context;
use crate::features::FeatureSet;
use crate::options::Options;
use std::sync::Arc;

/// A `#pragma key value` directive collected at parse time.
#[derive(Debug, Clone)]
pub struct Pragma {
    pub key: String,
    pub value: String,
}

/// Walks the top level of a parsed script collecting its pragmas, in
/// source order — pragmas are only recognized at statement position, not
/// nested inside expressions or blocks.
pub fn collect_pragmas(root: &Arc<AstNode>) -> Vec<Pragma> {
    let mut out = Vec::new();
    if let AstKind::Block(stmts) = &root.kind {
        for stmt in stmts {
            if let AstKind::Pragma { key, value } = &stmt.kind {
                out.push(Pragma { key: key.clone(), value: value.clone() });
            }
        }
    }
    out
}

/// Applies the collected pragmas to `options`, dispatching the two
/// built-ins the spec requires and forwarding everything else (recognized
/// or not) to the context's `PragmaProcessor`, if any.
pub fn apply_pragmas(pragmas: &[Pragma], options: &mut Options, ctx: &dyn Context) {
    for p in pragmas {
        match p.key.as_str() {
            "jexl.options" => options.apply_flags(&p.value),
            "script.mode" => apply_named_profile(&p.value, options),
            _ => {}
        }
        if let Some(processor) = ctx.as_pragma_processor() {
            processor.process_pragma(&p.key, &p.value, options);
        }
    }
}

/// Named option profiles referenced by `#pragma script.mode <name>`. Only
/// `pro50` is specified by name in the spec; others are left for the host's
/// `PragmaProcessor` to interpret.
fn apply_named_profile(name: &str, options: &mut Options) {
    if name == "pro50" {
        *options = Options::pro50();
    }
}

/// The parse-time subset of pragma effects: `lexical`/`lexicalShade` double
/// as both an `Options` runtime flag and a `FeatureSet` switch governing
/// scope analysis (see `features.rs`'s `pro50()` doc comment), so a script
/// carrying `#pragma jexl.options '+lexical'` must have that reflected in
/// the `FeatureSet` scope analysis runs under — the engine's own base
/// `FeatureSet` alone isn't enough once a script's own pragmas can turn
/// lexical rules on or off for itself. Called before scope analysis, since
/// pragmas are collected straight off the freshly parsed AST.
pub fn scope_features(pragmas: &[Pragma], base: &FeatureSet) -> FeatureSet {
    let mut features = base.clone();
    for p in pragmas {
        match p.key.as_str() {
            "jexl.options" => {
                for tok in p.value.split_whitespace() {
                    let (enable, name) = match tok.as_bytes().first() {
                        Some(b'+') => (true, &tok[1..]),
                        Some(b'-') => (false, &tok[1..]),
                        _ => continue,
                    };
                    match name {
                        "lexical" => features.lexical = enable,
                        "lexicalShade" => features.lexical_shade = enable,
                        _ => {}
                    }
                }
            }
            "script.mode" if p.value == "pro50" => {
                features.lexical = true;
                features.lexical_shade = true;
            }
            _ => {}
        }
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MapContext;
    use crate::features::FeatureSet;
    use crate::parser::parse_script;

    #[test]
    fn collects_pragmas_in_order() {
        let root = parse_script("#pragma jexl.options '+strict';\n#pragma script.mode pro50;\n1;", FeatureSet::default()).unwrap();
        let pragmas = collect_pragmas(&root);
        assert_eq!(pragmas.len(), 2);
        assert_eq!(pragmas[0].key, "jexl.options");
        assert_eq!(pragmas[1].key, "script.mode");
    }

    #[test]
    fn jexl_options_pragma_toggles_flags() {
        let root = parse_script("#pragma jexl.options '+strict +lexical +lexicalShade -safe';", FeatureSet::default()).unwrap();
        let pragmas = collect_pragmas(&root);
        let mut opts = Options::default();
        apply_pragmas(&pragmas, &mut opts, &MapContext::new());
        assert!(opts.strict && opts.lexical && opts.lexical_shade && !opts.safe);
    }

    #[test]
    fn script_mode_pro50_applies_named_profile() {
        let root = parse_script("#pragma script.mode pro50;", FeatureSet::default()).unwrap();
        let pragmas = collect_pragmas(&root);
        let mut opts = Options::default();
        apply_pragmas(&pragmas, &mut opts, &MapContext::new());
        assert_eq!(opts, Options::pro50());
    }

    #[test]
    fn scope_features_picks_up_lexical_pragma_over_a_non_lexical_base() {
        let base = FeatureSet::default();
        let root = parse_script("#pragma jexl.options '+lexical +lexicalShade';\n1;", base.clone()).unwrap();
        let pragmas = collect_pragmas(&root);
        let scoped = scope_features(&pragmas, &base);
        assert!(scoped.lexical && scoped.lexical_shade);
        assert!(!base.lexical && !base.lexical_shade);
    }

    #[test]
    fn scope_features_applies_pro50_profile() {
        let base = FeatureSet::default();
        let root = parse_script("#pragma script.mode pro50;", base.clone()).unwrap();
        let pragmas = collect_pragmas(&root);
        let scoped = scope_features(&pragmas, &base);
        assert!(scoped.lexical && scoped.lexical_shade);
    }
}
