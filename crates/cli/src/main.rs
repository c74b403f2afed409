//! `ra` — command-line front door for the scripting language runtime.
//!
//! A thin collaborator per spec.md §6: argument parsing, file loading, a
//! line-oriented REPL, and colored fatal-error printing. All the actual
//! language semantics live in `ra-runtime`; this binary just drives it.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser as ClapParser, Subcommand};
use ra_lang::lexer::Lexer;
use ra_lang::parser::Parser as RaParser;
use ra_core::Interner;
use ra_runtime::Engine;

#[derive(ClapParser)]
#[command(name = "ra")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run or explore programs in the ra scripting language", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a source file
    Run {
        /// Input .ra source file
        file: PathBuf,

        /// Print the token stream instead of (or before) running
        #[arg(long)]
        dump_tokens: bool,

        /// Print the folded AST instead of (or before) running
        #[arg(long)]
        dump_ast: bool,

        /// Print wall-clock time for parsing and evaluation
        #[arg(long)]
        time: bool,

        /// Directory `load "name";` falls back to when no sibling file matches
        #[arg(long)]
        lib_dir: Option<PathBuf>,
    },

    /// Start an interactive read-eval-print loop
    Repl {
        /// Directory `load "name";` falls back to inside the REPL
        #[arg(long)]
        lib_dir: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .without_time()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Run { file, dump_tokens, dump_ast, time, lib_dir }) => {
            run_file(&file, dump_tokens, dump_ast, time, lib_dir)
        }
        Some(Commands::Repl { lib_dir }) => run_repl(lib_dir),
        None => run_repl(None),
    }
}

fn run_file(file: &Path, dump_tokens: bool, dump_ast: bool, time: bool, lib_dir: Option<PathBuf>) -> ExitCode {
    let source = match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("ra: cannot read {}: {}", file.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let file_label = file.to_string_lossy().into_owned();

    if dump_tokens {
        match Lexer::new(&source, &file_label).tokenize() {
            Ok(tokens) => {
                for token in &tokens {
                    println!("{token:?}");
                }
            }
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        }
    }

    let mut engine = Engine::with_lib_dir(lib_dir);

    if dump_ast {
        let mut interner = Interner::new();
        match RaParser::new(&source, &file_label, &mut interner).and_then(|mut p| p.parse_and_fold()) {
            Ok(program) => println!("{program:#?}"),
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        }
    }

    let started = Instant::now();
    let result = engine.run_source(&source, file);
    let elapsed = started.elapsed();

    match result {
        Ok(symbol) => {
            if time {
                eprintln!("ra: evaluated in {elapsed:?}");
            }
            let _ = symbol;
            ExitCode::SUCCESS
        }
        Err(err) => {
            err.print_colored();
            ExitCode::FAILURE
        }
    }
}

fn run_repl(lib_dir: Option<PathBuf>) -> ExitCode {
    let mut rl = match rustyline::DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("ra: failed to start line editor: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut engine = Engine::with_lib_dir(lib_dir);
    let mut line_no = 1usize;

    println!("ra {} — interactive mode, Ctrl-D to exit", env!("CARGO_PKG_VERSION"));

    loop {
        let prompt = format!("ra[{line_no}]> ");
        match rl.readline(&prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line.as_str());
                // `run_source` always evaluates into the engine's one root
                // scope, so top-level bindings from earlier lines stay
                // visible to later ones.
                let label = PathBuf::from(format!("<repl:{line_no}>"));
                match engine.run_source(&line, &label) {
                    Ok(symbol) => println!("{:?}", &*symbol.borrow()),
                    Err(err) => err.print_colored(),
                }
                line_no += 1;
            }
            Err(rustyline::error::ReadlineError::Interrupted) => continue,
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("ra: {e}");
                break;
            }
        }
    }

    ExitCode::SUCCESS
}
