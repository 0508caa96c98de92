// ABOUTME: Thin CLI/REPL demonstrating the host embedding API (file runner + interactive shell)

use clap::Parser;
use exl::{Engine, MapContext};
use rustyline::completion::Completer;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Config, Editor, Helper};
use std::path::PathBuf;

/// EXL — embeddable expression and scripting language
#[derive(Parser, Debug)]
#[command(name = "exl")]
#[command(version)]
#[command(about = "Evaluate EXL scripts and expressions")]
struct CliArgs {
    /// Script file to execute (if omitted, starts a REPL)
    #[arg(value_name = "FILE")]
    script: Option<PathBuf>,

    /// Treat the source as a single expression rather than a script
    #[arg(long)]
    expression: bool,

    /// Enable strict mode (undefined variables/operands raise instead of yielding null)
    #[arg(long)]
    strict: bool,

    /// Enable lexical declaration rules
    #[arg(long)]
    lexical: bool,

    /// Enable lexical shade (inner declarations hide outer bindings for the whole block)
    #[arg(long)]
    lexical_shade: bool,
}

/// Minimal REPL helper — no completion, hinting, or highlighting beyond
/// rustyline's defaults; EXL's core has no syntax-highlighting subsystem
/// of its own to wire in here.
struct ExlHelper;

impl Helper for ExlHelper {}

impl Completer for ExlHelper {
    type Candidate = String;
}

impl Hinter for ExlHelper {
    type Hint = String;
}

impl Validator for ExlHelper {}

impl Highlighter for ExlHelper {}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let engine = Engine::builder().strict(args.strict).lexical(args.lexical).lexical_shade(args.lexical_shade).build();

    if let Some(path) = args.script {
        let source = std::fs::read_to_string(&path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        let ctx = MapContext::new();
        let result = if args.expression {
            let expr = engine.create_expression(&source).map_err(|e| format!("parse error: {e}"))?;
            expr.evaluate(&ctx).map_err(|e| format!("eval error: {e}"))?
        } else {
            let script = engine.create_script(&source, &[]).map_err(|e| format!("parse error: {e}"))?;
            script.execute(&ctx, &[]).map_err(|e| format!("eval error: {e}"))?
        };
        println!("{result}");
        return Ok(());
    }

    run_repl(&engine)
}

fn run_repl(engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::builder().auto_add_history(true).build();
    let mut rl = Editor::with_config(config).map_err(|e| format!("failed to initialize REPL: {e}"))?;
    rl.set_helper(Some(ExlHelper));

    let history_file = ".exl_history";
    let _ = rl.load_history(history_file);

    println!("EXL — embeddable expression language");
    println!("Type an expression or statement; :quit or :exit to leave.");

    let ctx = MapContext::new();

    loop {
        let readline = rl.readline("exl> ");
        match readline {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match trimmed {
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    ":clear" => {
                        print!("\x1B[2J\x1B[H");
                        continue;
                    }
                    _ => {}
                }

                match engine.create_script(&line, &[]) {
                    Ok(script) => match script.execute(&ctx, &[]) {
                        Ok(value) => println!("=> {value}"),
                        Err(e) => eprintln!("Error: {e}"),
                    },
                    Err(e) => eprintln!("Parse error: {e}"),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }

    let _ = rl.save_history(history_file);
    Ok(())
}
