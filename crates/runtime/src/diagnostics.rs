//! The fatal-error channel: a closed catalog of message templates, the
//! (message, token, call stack) triple every fatal carries (spec.md §4.5,
//! §7), and a `colored`-driven terminal printer.
//!
//! Grounded in the teacher's `codegen/error.rs` (hand-rolled `Display` +
//! `std::error::Error`, no `thiserror`) and extended with the exact color
//! scheme spec.md §4.5 calls for: filename red, caret yellow, message red,
//! stack-frame names cyan.

use std::fmt;

use colored::Colorize;
use ra_lang::Token;

use crate::symbol::Symbol;

/// The seven observable fatal-error categories from spec.md §7. Not a type
/// hierarchy — every fatal is one `RaError`, tagged by this enum so callers
/// (`try`/`catch`, the CLI's exit-code logic) can branch on category without
/// string-matching the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lexical,
    Syntactic,
    Declaration,
    Arithmetic,
    Dispatch,
    Object,
    Io,
    User,
}

/// One format-string entry in the closed catalog, identified rather than
/// free-formed so the same wording is never typo'd twice across the
/// evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageId {
    UnterminatedString,
    InvalidEscape,
    UnexpectedToken,
    MissingToken,
    ConstReassignment,
    UnknownIdentifier,
    ShadowedBuiltin,
    NonIntegerIndex,
    IncompatibleVectorSizes,
    UnsupportedCast,
    ArityMismatch,
    NoViableOverload,
    UndeclaredOperator,
    CannotIndexNonNamespace,
    InstantiationFailed,
    CannotExtendStatic,
    LibraryNotFound,
    FileNotFound,
    SymbolNotFound,
    UserThrown,
    IndexOutOfRange,
    NotCallable,
    AllocNegativeSize,
    LoopControlOutsideLoop,
}

impl MessageId {
    fn template(self) -> &'static str {
        match self {
            MessageId::UnterminatedString => "unterminated string literal",
            MessageId::InvalidEscape => "invalid escape sequence '{0}'",
            MessageId::UnexpectedToken => "unexpected token '{0}'",
            MessageId::MissingToken => "expected '{0}', found '{1}'",
            MessageId::ConstReassignment => "cannot reassign constant '{0}'",
            MessageId::UnknownIdentifier => "unknown identifier '{0}'",
            MessageId::ShadowedBuiltin => "'{0}' shadows a built-in name",
            MessageId::NonIntegerIndex => "array index must be an integer, found {0}",
            MessageId::IncompatibleVectorSizes => {
                "arrays of length {0} and {1} are not compatible for elementwise '{2}'"
            }
            MessageId::UnsupportedCast => "no cast from {0} to {1}",
            MessageId::ArityMismatch => "no overload of '{0}' accepts {1} argument(s)",
            MessageId::NoViableOverload => "no viable overload of '{0}' for the given argument types",
            MessageId::UndeclaredOperator => "_UNDECLARED_OPERATOR_ERROR_: '{0}' is not defined for {1}",
            MessageId::CannotIndexNonNamespace => "cannot index a non-namespace object",
            MessageId::InstantiationFailed => "failed to instantiate '{0}'",
            MessageId::CannotExtendStatic => "cannot extend static object '{0}'",
            MessageId::LibraryNotFound => "extern library '{0}' not found",
            MessageId::FileNotFound => "file '{0}' not found",
            MessageId::SymbolNotFound => "symbol '{0}' not found in library '{1}'",
            MessageId::UserThrown => "{0}",
            MessageId::IndexOutOfRange => "index {0} out of range for length {1}",
            MessageId::NotCallable => "value of type {0} is not callable",
            MessageId::AllocNegativeSize => "alloc size must be non-negative, found {0}",
            MessageId::LoopControlOutsideLoop => "'{0}' used outside of a loop or function body",
        }
    }
}

fn format_message(id: MessageId, args: &[&str]) -> String {
    let mut out = id.template().to_string();
    for (i, arg) in args.iter().enumerate() {
        out = out.replace(&format!("{{{i}}}"), arg);
    }
    out
}

/// One (token, function-name) call-stack frame, unwound from the evaluator
/// at the point a fatal is raised (spec.md §4.5).
#[derive(Debug, Clone)]
pub struct Frame {
    pub function: String,
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl Frame {
    pub fn at_token(function: impl Into<String>, token: &Token) -> Self {
        Frame { function: function.into(), file: token.file.clone(), line: token.line, column: token.column }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallStack(pub Vec<Frame>);

impl CallStack {
    pub fn new() -> Self {
        CallStack::default()
    }

    pub fn push(&mut self, frame: Frame) {
        self.0.push(frame);
    }

    pub fn pop(&mut self) {
        self.0.pop();
    }
}

/// The single fatal-error type every layer of the pipeline propagates.
/// `try { … } catch ID then { … }` (spec.md §7) recovers both `throw`-origin
/// (`ErrorKind::User`) and every other kind uniformly.
#[derive(Debug, Clone)]
pub struct RaError {
    pub kind: ErrorKind,
    pub message: String,
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub source_line: String,
    pub stack: CallStack,
}

impl RaError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, token: &Token, stack: CallStack) -> Self {
        RaError {
            kind,
            message: message.into(),
            file: token.file.clone(),
            line: token.line,
            column: token.column,
            source_line: token.source_line.to_string(),
            stack,
        }
    }

    pub fn catalog(kind: ErrorKind, id: MessageId, args: &[&str], token: &Token, stack: CallStack) -> Self {
        RaError::new(kind, format_message(id, args), token, stack)
    }

    pub fn user_thrown(message: impl Into<String>, token: &Token, stack: CallStack) -> Self {
        RaError::new(ErrorKind::User, message, token, stack)
    }

    /// Renders this fatal to `stderr` with spec.md §4.5's exact color
    /// scheme: filename red, caret yellow, message red, stack-frame names
    /// cyan. Plain `Display` (used by `catch`, by `Debug` assertions, by
    /// tests) stays uncolored; only the CLI calls this.
    pub fn print_colored(&self) {
        eprintln!("{}:{}:{}: {}", self.file.red(), self.line, self.column, self.message.red());
        if let Some(line) = self.source_line.lines().next() {
            eprintln!("    {line}");
            let caret_col = self.column.saturating_sub(1);
            eprintln!("    {}{}", " ".repeat(caret_col), "^".yellow());
        }
        for frame in self.stack.0.iter().rev() {
            eprintln!("  at {} ({}:{}:{})", frame.function.cyan(), frame.file, frame.line, frame.column);
        }
    }
}

impl fmt::Display for RaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}: {}", self.file, self.line, self.column, self.message)
    }
}

impl std::error::Error for RaError {}

impl From<ra_lang::ParseError> for RaError {
    fn from(e: ra_lang::ParseError) -> Self {
        RaError {
            kind: ErrorKind::Syntactic,
            message: e.message,
            file: e.file,
            line: e.line,
            column: e.column,
            source_line: e.source_line,
            stack: CallStack::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_token() -> Token {
        use ra_lang::{Token as T, TokenKind};
        T::new(TokenKind::Eof, "", "test.ra", 3, 5, std::rc::Rc::from("var x := 1;"))
    }

    #[test]
    fn catalog_message_substitutes_positional_holes() {
        let msg = format_message(MessageId::MissingToken, &[";", "}"]);
        assert_eq!(msg, "expected ';', found '}'");
    }

    #[test]
    fn undeclared_operator_keeps_sentinel_name() {
        let token = dummy_token();
        let err = RaError::catalog(ErrorKind::Dispatch, MessageId::UndeclaredOperator, &["add", "Object"], &token, CallStack::new());
        assert!(err.message.contains("_UNDECLARED_OPERATOR_ERROR_"));
        assert_eq!(err.line, 3);
    }

    #[test]
    fn parse_error_converts_without_a_call_stack() {
        let pe = ra_lang::ParseError::new("bad token", "f.ra", 1, 1, "x");
        let err: RaError = pe.into();
        assert_eq!(err.kind, ErrorKind::Syntactic);
        assert!(err.stack.0.is_empty());
    }
}
