// ABOUTME: Parse-time feature flags controlling which language constructs are allowed

/// Which constructs the parser accepts. Disabled constructs fail parsing,
/// not evaluation — mirrors `config.rs`'s plain-struct-of-bools convention
/// rather than a bitflags type, for readability at the call site.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FeatureSet {
    pub lexical: bool,
    pub lexical_shade: bool,
    pub register: bool,
    pub reserved_names: bool,
    pub side_effect: bool,
    pub namespace_pragma: bool,
    pub script_method_call: bool,
    pub new_instance: bool,
    pub loops: bool,
    pub lambdas: bool,
    pub annotations: bool,
    pub comparator_names: bool,
}

impl Default for FeatureSet {
    fn default() -> Self {
        FeatureSet {
            lexical: false,
            lexical_shade: false,
            register: true,
            reserved_names: true,
            side_effect: true,
            namespace_pragma: true,
            script_method_call: true,
            new_instance: true,
            loops: true,
            lambdas: true,
            annotations: true,
            comparator_names: true,
        }
    }
}

impl FeatureSet {
    /// All constructs enabled; used by tests that want the full grammar.
    pub fn permissive() -> Self {
        FeatureSet { lexical: true, lexical_shade: true, ..FeatureSet::default() }
    }

    /// The `pro50` named profile referenced by `#pragma script.mode pro50`:
    /// strict + cancellable + lexical + lexicalShade, -safe. Feature flags
    /// here cover only the parse-time half of that profile; the
    /// strict/cancellable/safe half lives on `Options` (see `options.rs`
    /// and `pragma.rs`).
    pub fn pro50() -> Self {
        FeatureSet { lexical: true, lexical_shade: true, ..FeatureSet::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_non_lexical() {
        let f = FeatureSet::default();
        assert!(!f.lexical);
        assert!(!f.lexical_shade);
    }

    #[test]
    fn pro50_enables_lexical_shade() {
        let f = FeatureSet::pro50();
        assert!(f.lexical);
        assert!(f.lexical_shade);
    }
}
