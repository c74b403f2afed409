//! Lexical and syntactic error type.
//!
//! Mirrors the shape `ra-runtime::diagnostics::RaError` uses for evaluation
//! errors, so the CLI can print both through one code path, but this crate
//! does not depend on `ra-runtime` — it only needs enough information
//! (message, file, line, column, source line) to render a caret diagnostic.

use std::fmt;

use crate::token::Token;

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub source_line: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>, file: &str, line: usize, column: usize, source_line: &str) -> Self {
        ParseError {
            message: message.into(),
            file: file.to_string(),
            line,
            column,
            source_line: source_line.to_string(),
        }
    }

    pub fn at_token(message: impl Into<String>, token: &Token) -> Self {
        ParseError {
            message: message.into(),
            file: token.file.clone(),
            line: token.line,
            column: token.column,
            source_line: token.source_line.to_string(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}",
            self.file, self.line, self.column, self.message
        )
    }
}

impl std::error::Error for ParseError {}
