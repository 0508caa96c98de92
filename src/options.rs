// ABOUTME: Per-evaluation option flags governing strictness, safety, and arithmetic precision

/// Per-evaluation flags. Copied on entry to each `Script::execute`/
/// `Expression::evaluate` call by default; when `shared_instance` is set the
/// host's mutated copy is written back and visible to the next call (see
/// `pragma.rs`'s handling of `jexl.options`).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Options {
    pub strict: bool,
    pub safe: bool,
    pub silent: bool,
    pub cancellable: bool,
    pub lexical: bool,
    pub lexical_shade: bool,
    pub strict_arithmetic: bool,
    pub strict_interpolation: bool,
    pub math_scale: i64,
    pub math_context_precision: u32,
    pub shared_instance: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            strict: false,
            safe: true,
            silent: false,
            cancellable: false,
            lexical: false,
            lexical_shade: false,
            strict_arithmetic: false,
            strict_interpolation: false,
            math_scale: -1,
            math_context_precision: 28,
            shared_instance: false,
        }
    }
}

impl Options {
    /// Applies a single `+name`/`-name` flag as accepted by the
    /// `jexl.options` pragma. Unknown flag names are ignored (forwarded
    /// pragmas that this crate doesn't recognize are simply no-ops here;
    /// the `PragmaProcessor` capability still sees them).
    pub fn apply_flag(&mut self, flag: &str) {
        let (enable, name) = match flag.as_bytes().first() {
            Some(b'+') => (true, &flag[1..]),
            Some(b'-') => (false, &flag[1..]),
            _ => return,
        };
        match name {
            "strict" => self.strict = enable,
            "safe" => self.safe = enable,
            "silent" => self.silent = enable,
            "cancellable" => self.cancellable = enable,
            "lexical" => self.lexical = enable,
            "lexicalShade" => self.lexical_shade = enable,
            "strictArithmetic" => self.strict_arithmetic = enable,
            "strictInterpolation" => self.strict_interpolation = enable,
            "sharedInstance" => self.shared_instance = enable,
            _ => {}
        }
    }

    pub fn apply_flags(&mut self, flags: &str) {
        for tok in flags.split_whitespace() {
            self.apply_flag(tok);
        }
    }

    /// The `pro50` named profile: strict+cancellable+lexical+lexicalShade, -safe.
    pub fn pro50() -> Self {
        Options {
            strict: true,
            safe: false,
            cancellable: true,
            lexical: true,
            lexical_shade: true,
            ..Options::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_toggle_fields() {
        let mut o = Options::default();
        o.apply_flags("+strict +lexical +lexicalShade -safe");
        assert!(o.strict);
        assert!(o.lexical);
        assert!(o.lexical_shade);
        assert!(!o.safe);
    }

    #[test]
    fn unknown_flag_is_noop() {
        let mut o = Options::default();
        o.apply_flag("+bogus");
        assert_eq!(o, Options::default());
    }

    #[test]
    fn pro50_matches_named_profile() {
        let o = Options::pro50();
        assert!(o.strict && o.cancellable && o.lexical && o.lexical_shade && !o.safe);
    }
}
