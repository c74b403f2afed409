//! `load "name";` textual inclusion (spec.md §6). Resolves `name.ra` first in
//! the directory of the including file, then in a configured library
//! directory, and deduplicates by canonical path so a diamond of `load`
//! statements only includes a file once.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ra_lang::Token;

use crate::diagnostics::{CallStack, ErrorKind, MessageId, RaError};

pub struct Loader {
    lib_dir: Option<PathBuf>,
    loaded: HashSet<PathBuf>,
}

impl Loader {
    pub fn new(lib_dir: Option<PathBuf>) -> Self {
        Loader { lib_dir, loaded: HashSet::new() }
    }

    fn candidate_paths(&self, including_file: &Path, name: &str) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(dir) = including_file.parent() {
            candidates.push(dir.join(format!("{name}.ra")));
        }
        if let Some(lib_dir) = &self.lib_dir {
            candidates.push(lib_dir.join(format!("{name}.ra")));
        }
        candidates
    }

    /// Resolves and reads `name.ra`. Returns `Ok(None)` when the file was
    /// already loaded (the caller should treat the `load` statement as a
    /// no-op), `Ok(Some(source))` on a fresh inclusion, and an `Io` fatal
    /// when no candidate path exists.
    pub fn load(&mut self, including_file: &Path, name: &str, origin: &Token, stack: &CallStack) -> Result<Option<String>, RaError> {
        let candidates = self.candidate_paths(including_file, name);
        for candidate in &candidates {
            if candidate.is_file() {
                let canonical = candidate.canonicalize().unwrap_or_else(|_| candidate.clone());
                if self.loaded.contains(&canonical) {
                    return Ok(None);
                }
                let source = std::fs::read_to_string(candidate)
                    .map_err(|_| RaError::catalog(ErrorKind::Io, MessageId::FileNotFound, &[name], origin, stack.clone()))?;
                self.loaded.insert(canonical);
                return Ok(Some(source));
            }
        }
        Err(RaError::catalog(ErrorKind::Io, MessageId::FileNotFound, &[name], origin, stack.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ra_lang::TokenKind;

    fn dummy_token(file: &str) -> Token {
        Token::new(TokenKind::Eof, "", file, 1, 1, std::rc::Rc::from(""))
    }

    #[test]
    fn loads_once_then_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let including = dir.path().join("main.ra");
        std::fs::write(&including, "load \"util\";").unwrap();
        std::fs::write(dir.path().join("util.ra"), "var x := 1;").unwrap();

        let mut loader = Loader::new(None);
        let origin = dummy_token(including.to_str().unwrap());
        let first = loader.load(&including, "util", &origin, &CallStack::new()).unwrap();
        assert!(first.is_some());
        let second = loader.load(&including, "util", &origin, &CallStack::new()).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn falls_back_to_library_directory() {
        let including_dir = tempfile::tempdir().unwrap();
        let lib_dir = tempfile::tempdir().unwrap();
        let including = including_dir.path().join("main.ra");
        std::fs::write(&including, "load \"collections\";").unwrap();
        std::fs::write(lib_dir.path().join("collections.ra"), "var y := 2;").unwrap();

        let mut loader = Loader::new(Some(lib_dir.path().to_path_buf()));
        let origin = dummy_token(including.to_str().unwrap());
        let loaded = loader.load(&including, "collections", &origin, &CallStack::new()).unwrap();
        assert!(loaded.is_some());
    }

    #[test]
    fn missing_file_is_an_io_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let including = dir.path().join("main.ra");
        let mut loader = Loader::new(None);
        let origin = dummy_token(including.to_str().unwrap());
        let err = loader.load(&including, "nope", &origin, &CallStack::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Io);
    }
}
