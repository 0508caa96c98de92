// ABOUTME: JXLT template compiler — text/${}/#{}/statement-line parsing and rendering

use crate::context::{AnnotationProcessor, ClassRegistry, Context, NamespaceResolver, OptionsHandle, PragmaProcessor};
use crate::engine::{Engine, Script};
use crate::error::{EvalError, ParseError};
use crate::printer::quote_str;
use crate::token::Span;
use crate::value::{HostObject, Value};
use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;
use thiserror::Error;

/// Either half of template processing can fail: `prepare` both re-parses a
/// freshly substituted source and evaluates the deferred expressions
/// substituted into it.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// One line of raw template source, classified by whether it opens with the
/// configured sigil. `Code` keeps the line verbatim, sigil included — a
/// statement-line like `$$ for(var x:list) {` is not independently
/// parseable (its matching `}` lives on a later line), so there is nothing
/// useful to validate until every line has been concatenated into one
/// script.
enum TemplateLine {
    Code(String),
    Text(Vec<TextPiece>),
}

enum TextPiece {
    Literal(String),
    /// `${expr}` — evaluated every render.
    Immediate(String),
    /// `#{expr}` — evaluated once by `prepare`, then baked into the
    /// template's source as plain text.
    Deferred(String),
}

fn placeholder_span() -> Span {
    Span::new(0, 0, 1, 1)
}

/// Splits `source` into lines and, for non-code lines, further into
/// `Text`/`Immediate`/`Deferred` chunks. Every extracted `${…}`/`#{…}`
/// fragment is validated as a standalone expression immediately — this is
/// where malformed templates (`${…` unterminated, `#{${hi} world}`) raise at
/// template-creation time, mirroring `parser.rs`'s `build_interp_template`.
fn scan_template(engine: &Engine, source: &str, sigil: &str) -> Result<Vec<TemplateLine>, ParseError> {
    let mut lines = Vec::new();
    for line in source.split_inclusive('\n') {
        if line.trim_start().starts_with(sigil) {
            lines.push(TemplateLine::Code(line.to_string()));
        } else {
            lines.push(TemplateLine::Text(scan_text_line(engine, line)?));
        }
    }
    Ok(lines)
}

fn scan_text_line(engine: &Engine, line: &str) -> Result<Vec<TextPiece>, ParseError> {
    let chars: Vec<char> = line.chars().collect();
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && matches!(chars.get(i + 1), Some('$') | Some('#') | Some('\\')) {
            literal.push(chars[i + 1]);
            i += 2;
            continue;
        }
        if (c == '$' || c == '#') && chars.get(i + 1) == Some(&'{') {
            if !literal.is_empty() {
                pieces.push(TextPiece::Literal(std::mem::take(&mut literal)));
            }
            let deferred = c == '#';
            i += 2;
            let mut depth = 1usize;
            let mut expr = String::new();
            loop {
                match chars.get(i) {
                    None => {
                        return Err(ParseError::MalformedTemplate(
                            placeholder_span(),
                            "template".into(),
                            "unterminated ${...} or #{...}".into(),
                        ))
                    }
                    Some('{') => {
                        depth += 1;
                        expr.push('{');
                        i += 1;
                    }
                    Some('}') => {
                        depth -= 1;
                        i += 1;
                        if depth == 0 {
                            break;
                        }
                        expr.push('}');
                    }
                    Some(&other) => {
                        expr.push(other);
                        i += 1;
                    }
                }
            }
            engine
                .create_expression(&expr)
                .map_err(|e| ParseError::MalformedTemplate(placeholder_span(), "template".into(), format!("{expr:?} is not a valid expression: {e}")))?;
            pieces.push(if deferred { TextPiece::Deferred(expr) } else { TextPiece::Immediate(expr) });
            continue;
        }
        literal.push(c);
        i += 1;
    }
    if !literal.is_empty() {
        pieces.push(TextPiece::Literal(literal));
    }
    Ok(pieces)
}

/// Lowers the scanned lines to EXL source: statement lines pass through
/// verbatim (sigil stripped), text lines become a sequence of
/// `$jexl.print(...)` statement calls — one per literal run or embedded
/// expression — so the whole template becomes a single script the ordinary
/// parser/interpreter can run, per spec.md's "templates compose" design.
fn compile_script_source(lines: &[TemplateLine], sigil: &str) -> String {
    let mut out = String::new();
    for line in lines {
        match line {
            TemplateLine::Code(full) => {
                let rest = full.trim_start().strip_prefix(sigil).unwrap_or(full.as_str());
                out.push_str(rest);
            }
            TemplateLine::Text(pieces) => {
                for piece in pieces {
                    match piece {
                        TextPiece::Literal(s) => {
                            out.push_str("$jexl.print(");
                            out.push_str(&quote_str(s));
                            out.push_str(");");
                        }
                        TextPiece::Immediate(expr) | TextPiece::Deferred(expr) => {
                            out.push_str("$jexl.print(");
                            out.push_str(expr);
                            out.push_str(");");
                        }
                    }
                }
                out.push('\n');
            }
        }
    }
    out
}

/// `$` and `#` are escapable inside template text to suppress
/// interpolation; re-escapes a baked-in deferred value so a later
/// `scan_template` pass can't mistake its contents for a fresh `${…}`/`#{…}`.
fn escape_template_text(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    for (i, &c) in chars.iter().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '$' if chars.get(i + 1) == Some(&'{') => out.push_str("\\$"),
            '#' if chars.get(i + 1) == Some(&'{') => out.push_str("\\#"),
            other => out.push(other),
        }
    }
    out
}

/// Rebuilds template source text from scanned lines, evaluating every
/// `Deferred` fragment against `ctx` and baking its stringified value in as
/// plain text. `Immediate` fragments and statement lines pass through
/// unchanged — this is the textual transform behind `Template::prepare`.
fn reconstruct_source(engine: &Engine, ctx: &dyn Context, lines: &[TemplateLine]) -> Result<String, EvalError> {
    let mut out = String::new();
    for line in lines {
        match line {
            TemplateLine::Code(full) => out.push_str(full),
            TemplateLine::Text(pieces) => {
                for piece in pieces {
                    match piece {
                        TextPiece::Literal(s) => out.push_str(s),
                        TextPiece::Immediate(expr) => {
                            out.push_str("${");
                            out.push_str(expr);
                            out.push('}');
                        }
                        TextPiece::Deferred(expr) => {
                            let value = engine
                                .create_expression(expr)
                                .expect("deferred fragment validated at template-creation time")
                                .evaluate(ctx)?;
                            out.push_str(&escape_template_text(&value.to_string()));
                        }
                    }
                }
            }
        }
    }
    Ok(out)
}

/// The host object bound to the free identifier `$jexl` inside a compiled
/// template script — `$jexl.print(value)` is the emit primitive named in
/// spec.md §4.7. One instance per `Template::evaluate` call, so concurrent
/// renders of the same `Template` never share a buffer.
#[derive(Debug, Default)]
struct PrintSink {
    buf: RefCell<String>,
}

impl PrintSink {
    fn take(&self) -> String {
        self.buf.take()
    }
}

impl HostObject for PrintSink {
    fn type_name(&self) -> &str {
        "jxlt.print"
    }

    fn get_property(&self, _name: &str) -> Option<Value> {
        None
    }

    fn set_property(&self, _name: &str, _value: Value) -> Result<(), String> {
        Err("$jexl has no settable properties".to_string())
    }

    fn call_method(&self, name: &str, args: &[Value]) -> Option<Result<Value, String>> {
        if name != "print" {
            return None;
        }
        if let Some(v) = args.first() {
            self.buf.borrow_mut().push_str(&v.to_string());
        }
        Some(Ok(Value::Null))
    }
}

/// Wraps a host `Context`, adding the `$jexl` print-sink binding a compiled
/// template script calls into. Every other capability forwards straight to
/// the wrapped context so a template evaluates with exactly the namespaces,
/// class registry, pragma/annotation processors, and options the host
/// would otherwise supply directly.
struct TemplateContext<'a> {
    inner: &'a dyn Context,
    sink: Rc<PrintSink>,
}

impl<'a> Context for TemplateContext<'a> {
    fn get(&self, name: &str) -> Option<Value> {
        if name == "$jexl" {
            Some(Value::Object(self.sink.clone()))
        } else {
            self.inner.get(name)
        }
    }

    fn set(&self, name: &str, value: Value) {
        if name != "$jexl" {
            self.inner.set(name, value);
        }
    }

    fn has(&self, name: &str) -> bool {
        name == "$jexl" || self.inner.has(name)
    }

    fn as_namespace_resolver(&self) -> Option<&dyn NamespaceResolver> {
        self.inner.as_namespace_resolver()
    }

    fn as_class_registry(&self) -> Option<&dyn ClassRegistry> {
        self.inner.as_class_registry()
    }

    fn as_pragma_processor(&self) -> Option<&dyn PragmaProcessor> {
        self.inner.as_pragma_processor()
    }

    fn as_annotation_processor(&self) -> Option<&dyn AnnotationProcessor> {
        self.inner.as_annotation_processor()
    }

    fn as_options_handle(&self) -> Option<&dyn OptionsHandle> {
        self.inner.as_options_handle()
    }

    fn cancel_flag(&self) -> Option<&std::sync::atomic::AtomicBool> {
        self.inner.cancel_flag()
    }
}

/// Host entry point for templates (§6 `engine.createJxltEngine()`) — a thin
/// handle over the `Engine` that created it, existing mainly so
/// `create_template` reads the way the spec's literal API surface does.
#[derive(Clone)]
pub struct JxltEngine {
    engine: Engine,
}

impl JxltEngine {
    pub fn new(engine: Engine) -> Self {
        JxltEngine { engine }
    }

    pub fn create_template(&self, sigil: &str, source: &str, param_names: &[String]) -> Result<Template, ParseError> {
        Template::compile(self.engine.clone(), sigil, source, param_names)
    }
}

/// A compiled template (§6 `createTemplate`, §4.7). Holds the lines scanned
/// from `source` alongside the synthetic script compiled from them —
/// `evaluate` runs that script with a `$jexl` print sink bound in;
/// `prepare` re-walks the lines to bake in deferred expressions and
/// recompiles.
pub struct Template {
    engine: Engine,
    sigil: String,
    source: String,
    params: Vec<String>,
    script: Script,
}

impl Template {
    fn compile(engine: Engine, sigil: &str, source: &str, param_names: &[String]) -> Result<Template, ParseError> {
        let lines = scan_template(&engine, source, sigil)?;
        let script_source = compile_script_source(&lines, sigil);
        let script = engine.create_script(&script_source, param_names)?;
        Ok(Template { engine, sigil: sigil.to_string(), source: source.to_string(), params: param_names.to_vec(), script })
    }

    /// Evaluates every `Deferred` (`#{expr}`) fragment against `ctx` and
    /// bakes its rendered value into a new template's source, leaving
    /// `Immediate` (`${expr}`) fragments untouched — scenario S8:
    /// `template("Dear ${p} #{name};")` prepared with `{name: "Doe"}` yields
    /// `template("Dear ${p} Doe;")`.
    pub fn prepare(&self, ctx: &dyn Context) -> Result<Template, TemplateError> {
        let lines = scan_template(&self.engine, &self.source, &self.sigil)?;
        let new_source = reconstruct_source(&self.engine, ctx, &lines)?;
        Ok(Template::compile(self.engine.clone(), &self.sigil, &new_source, &self.params)?)
    }

    /// Renders the template against `ctx`, returning the emitted text.
    /// Un-prepared `Deferred` fragments are evaluated the same as
    /// `Immediate` ones rather than rejected — `prepare` is how a host pins
    /// them ahead of time, not a precondition for rendering at all.
    pub fn evaluate(&self, ctx: &dyn Context, args: &[Value]) -> Result<String, EvalError> {
        let sink = Rc::new(PrintSink::default());
        let wrapped = TemplateContext { inner: ctx, sink: Rc::clone(&sink) };
        self.script.execute(&wrapped, args)?;
        Ok(sink.take())
    }

    /// As `evaluate`, but writes straight into `writer` rather than
    /// returning an owned `String` — the shape named in spec.md §6
    /// (`template.evaluate(context, writer, args…)`).
    pub fn evaluate_into(&self, ctx: &dyn Context, writer: &mut impl std::fmt::Write, args: &[Value]) -> Result<(), EvalError> {
        let rendered = self.evaluate(ctx, args)?;
        writer.write_str(&rendered).map_err(|e| EvalError::bad_assignment(placeholder_span(), format!("template writer failed: {e}")))?;
        Ok(())
    }

    pub fn get_source_text(&self) -> &str {
        &self.source
    }

    pub fn get_parameters(&self) -> &[String] {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MapContext;

    #[test]
    fn renders_immediate_interpolation() {
        let engine = Engine::builder().build();
        let jxlt = engine.create_jxlt_engine();
        let tpl = jxlt.create_template("$$", "Hello ${name}!", &[]).unwrap();
        let ctx = MapContext::new();
        ctx.set("name", Value::str("world"));
        assert_eq!(tpl.evaluate(&ctx, &[]).unwrap(), "Hello world!");
    }

    #[test]
    fn prepare_bakes_deferred_leaving_immediate_live() {
        let engine = Engine::builder().build();
        let jxlt = engine.create_jxlt_engine();
        let tpl = jxlt.create_template("$$", "Dear ${p} #{name};", &[]).unwrap();
        let prep_ctx = MapContext::new();
        prep_ctx.set("name", Value::str("Doe"));
        let prepared = tpl.prepare(&prep_ctx).unwrap();
        assert_eq!(prepared.get_source_text(), "Dear ${p} Doe;");

        let render_ctx = MapContext::new();
        render_ctx.set("p", Value::str("John"));
        assert_eq!(prepared.evaluate(&render_ctx, &[]).unwrap(), "Dear John Doe;");
    }

    #[test]
    fn renders_statement_lines_with_control_flow() {
        let engine = Engine::builder().build();
        let jxlt = engine.create_jxlt_engine();
        let source = "$$ for(var x:list) {\n$$ if(x==42) {\nLife, the universe, and everything\n$$ } else if (x>42) {\nThe value ${x} is over fourty-two\n$$ } else {\nThe value ${x} is under fourty-two\n$$ }\n$$ }\n";
        let tpl = jxlt.create_template("$$", source, &[]).unwrap();
        let ctx = MapContext::new();
        ctx.set("list", Value::array(vec![Value::Int(1), Value::Int(3), Value::Int(5), Value::Int(42), Value::Int(169)]));
        let rendered = tpl.evaluate(&ctx, &[]).unwrap();
        let expected = "The value 1 is under fourty-two\nThe value 3 is under fourty-two\nThe value 5 is under fourty-two\nLife, the universe, and everything\nThe value 169 is over fourty-two\n";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn unterminated_immediate_is_malformed() {
        let engine = Engine::builder().build();
        let jxlt = engine.create_jxlt_engine();
        assert!(jxlt.create_template("$$", "hello ${oops", &[]).is_err());
    }

    #[test]
    fn deferred_containing_immediate_is_malformed() {
        let engine = Engine::builder().build();
        let jxlt = engine.create_jxlt_engine();
        assert!(jxlt.create_template("$$", "#{${hi} world}", &[]).is_err());
    }

    #[test]
    fn escaped_sigils_stay_literal() {
        let engine = Engine::builder().build();
        let jxlt = engine.create_jxlt_engine();
        let tpl = jxlt.create_template("$$", "\\${literal} and \\#{also literal}", &[]).unwrap();
        let ctx = MapContext::new();
        assert_eq!(tpl.evaluate(&ctx, &[]).unwrap(), "${literal} and #{also literal}");
    }

    #[test]
    fn named_parameters_are_bound() {
        let engine = Engine::builder().build();
        let jxlt = engine.create_jxlt_engine();
        let tpl = jxlt.create_template("$$", "Hi ${who}", &["who".to_string()]).unwrap();
        let ctx = MapContext::new();
        assert_eq!(tpl.evaluate(&ctx, &[Value::str("Ada")]).unwrap(), "Hi Ada");
    }
}
