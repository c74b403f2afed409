//! The embeddable front door: wires lexer -> parser -> fold -> lower -> eval
//! into one [`Engine`], and owns every piece of process state a running
//! program needs — the interner, the scope arena, the extern registry, and
//! the `load` file loader (spec.md §6).
//!
//! An embedder links this crate and drives it directly; the CLI (`ra-cli`)
//! is just the thinnest possible caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ra_core::{Hash, Interner};
use ra_lang::instr::{lower_program, LoweredProgram};
use ra_lang::parser::parse_source;
use ra_lang::token::{Token, TokenKind};

use crate::diagnostics::{CallStack, RaError};
use crate::eval::EvalOutcome;
use crate::extern_abi::ExternRegistry;
use crate::loader::Loader;
use crate::scope::{ScopeArena, ScopeKey};
use crate::symbol::Symbol;

/// A placeholder position used for fatals raised before any real token has
/// been seen (an empty program, or a top-level statement spec.md's own
/// lowering pass gives no token to — see `ra_lang::instr`'s `stmt_token`).
pub(crate) fn synthetic_token(file: &Path) -> Token {
    Token::new(TokenKind::Eof, "", &file.to_string_lossy(), 1, 1, std::rc::Rc::from(""))
}

/// Ties the whole pipeline together for one running program. Not `Clone` —
/// an `Engine` owns the one scope arena and interner a program's values are
/// indexed against; two engines never share keys.
pub struct Engine {
    pub interner: Interner,
    pub arena: ScopeArena,
    pub externs: ExternRegistry,
    pub(crate) loader: Loader,
    pub(crate) stack: CallStack,
    /// Stack of including-file paths. `load "x";` and the `parse(s)`
    /// metacircular eval push/pop so relative includes inside a loaded file
    /// resolve against *that* file's directory, not the original entry
    /// point's.
    pub(crate) file_stack: Vec<PathBuf>,
    /// `struct`/`static`/`virtual` name-hash -> its template scope
    /// (spec.md §4.4 "new Class(args)"). A template scope's own `vars` only
    /// ever holds bindings for a `Static` kind's singleton instance; for
    /// `Struct`/`Virtual` it is a registry entry plus an inheritance anchor
    /// only — member bodies replay into a fresh `Instance` scope per `new`,
    /// not into the template, so two instances never share field storage.
    pub(crate) class_templates: HashMap<Hash, ScopeKey>,
}

impl Engine {
    pub fn new() -> Self {
        Engine::with_lib_dir(None)
    }

    pub fn with_lib_dir(lib_dir: Option<PathBuf>) -> Self {
        Engine {
            interner: Interner::new(),
            arena: ScopeArena::new(),
            externs: ExternRegistry::new(),
            loader: Loader::new(lib_dir),
            stack: CallStack::new(),
            file_stack: vec![PathBuf::from(".")],
            class_templates: HashMap::new(),
        }
    }

    pub fn root_scope(&self) -> ScopeKey {
        self.arena.root
    }

    pub(crate) fn current_file(&self) -> PathBuf {
        self.file_stack.last().cloned().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Tokenizes, parses, constant-folds, and lowers `source` without
    /// evaluating it. Exposed for the CLI's `--dump-tokens`/`--dump-ast`
    /// flags and for embedders that want to inspect a program before
    /// running it.
    pub fn compile(&mut self, source: &str, file: &str) -> Result<LoweredProgram, RaError> {
        let program = parse_source(source, file, &mut self.interner)?;
        Ok(lower_program(program, &mut self.interner))
    }

    /// Runs a whole source file in the root scope. `file` seeds both
    /// diagnostics and the base directory any `load` statement inside it
    /// resolves against.
    #[tracing::instrument(level = "debug", skip(self, source))]
    pub fn run_source(&mut self, source: &str, file: &Path) -> Result<Symbol, RaError> {
        self.file_stack.push(file.to_path_buf());
        let root = self.root_scope();
        let result = self.run_in_scope(source, &file.to_string_lossy(), root);
        self.file_stack.pop();
        result
    }

    /// Runs `source` inside an already-live `scope` — used by `run_source`,
    /// by `load` (which runs the included file's top level into the
    /// *including* scope, per spec.md §6's textual-inclusion semantics),
    /// and by the `parse(s)` builtin (which evaluates into the *calling*
    /// scope, making it a metacircular `eval`).
    pub(crate) fn run_in_scope(&mut self, source: &str, file_label: &str, scope: ScopeKey) -> Result<Symbol, RaError> {
        let lowered = self.compile(source, file_label)?;
        let outcome = self.eval_top_level(&lowered, scope)?;
        Ok(outcome.into_value())
    }

    /// Evaluates every top-level instruction in order, tracking the
    /// approximate source position spec.md §4.5 wants on every fatal.
    /// Nested block instructions below the top level share whatever
    /// position was last seen at this level — see `ra_lang::instr`'s
    /// `stmt_token` doc comment for why only top-level statements carry one.
    pub(crate) fn eval_top_level(&mut self, lowered: &LoweredProgram, scope: ScopeKey) -> Result<EvalOutcome, RaError> {
        let mut last = EvalOutcome::Value(Symbol::new_nil());
        let mut current_token = synthetic_token(&self.current_file());
        for (instr, tok) in lowered.instructions.iter().zip(lowered.tokens.iter()) {
            if let Some(t) = tok {
                current_token = t.clone();
            }
            last = self.eval_instruction(instr, scope, &current_token)?;
            if !matches!(last, EvalOutcome::Value(_)) {
                break;
            }
        }
        Ok(last)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use ra_core::Number;

    fn run(src: &str) -> Value {
        let mut engine = Engine::new();
        let sym = engine.run_source(src, Path::new("<test>")).expect("eval failed");
        sym.borrow().clone()
    }

    fn as_number(v: &Value) -> Number {
        match v {
            Value::Number(n) => *n,
            other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn factorial_recursion() {
        let v = run("def fact(n) { if n <= 1 then { return 1; } return n * fact(n-1); } fact(10);");
        assert_eq!(as_number(&v), Number::Int(3628800));
    }

    #[test]
    fn array_concat_and_length() {
        let v = run("var x := [1,2,3] ++ [4,5]; length(x);");
        assert_eq!(as_number(&v), Number::Int(5));
    }

    #[test]
    fn const_folded_area() {
        let v = run("const PI = 3.14159; def area(r) { return PI * r ** 2; } area(2);");
        assert!((as_number(&v).as_f64() - 12.56636).abs() < 1e-9);
    }

    #[test]
    fn struct_instantiation_and_to_string_hook() {
        let v = run(
            r#"struct Point { var x, y; def init(a, b) { x = a; y = b; } def ->String() { return "(" ++ (x->String) ++ "," ++ (y->String) ++ ")"; } } var p := new Point(3,4); p->String;"#,
        );
        match v {
            Value::String(s) => assert_eq!(s, "(3,4)"),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn for_loop_accumulates() {
        let v = run("var s := 0; for i in 1..11 do { s += i; } s;");
        assert_eq!(as_number(&v), Number::Int(55));
    }

    #[test]
    fn dictionary_delete_shrinks_length() {
        let v = run(r#"var d := {"a": 1, "b": 2}; delete d["a"]; length(d);"#);
        assert_eq!(as_number(&v), Number::Int(1));
    }
}
