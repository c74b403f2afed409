//! Host extension ABI: a collaborator *contract* (spec.md §6), not a real
//! `dlopen` loader. `extern "libname";` registers a name; `extern_call
//! libname.funcname(args)` resolves it against whatever [`HostLibrary`]
//! impls the embedder registered on the [`crate::engine::Engine`] — the core
//! ships none itself, matching spec.md §1's no-stable-ABI non-goal.

use std::collections::HashMap;

use ra_lang::Token;

use crate::diagnostics::{CallStack, ErrorKind, MessageId, RaError};
use crate::symbol::Symbol;

/// One host-provided library. Each exported function receives the raw
/// argument vector, the call-site token (for diagnostics), and the live call
/// stack, and returns a symbol or raises the fatal-error channel — the same
/// shape spec.md §6 describes for `<libname>_export_functions`.
pub trait HostLibrary {
    fn call(&self, name: &str, args: &[Symbol], origin: &Token, stack: &CallStack) -> Result<Symbol, RaError>;
}

/// Registry of libraries an embedder has made available. `extern "libname";`
/// only checks a name is registered here; the actual lookup happens at
/// `extern_call` time so a library can be registered after the `extern`
/// statement runs (e.g. lazily, or conditionally by the host).
#[derive(Default)]
pub struct ExternRegistry {
    libraries: HashMap<String, Box<dyn HostLibrary>>,
}

impl ExternRegistry {
    pub fn new() -> Self {
        ExternRegistry::default()
    }

    pub fn register(&mut self, name: impl Into<String>, library: Box<dyn HostLibrary>) {
        self.libraries.insert(name.into(), library);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.libraries.contains_key(name)
    }

    pub fn call(
        &self,
        library: &str,
        function: &str,
        args: &[Symbol],
        origin: &Token,
        stack: &CallStack,
    ) -> Result<Symbol, RaError> {
        match self.libraries.get(library) {
            Some(lib) => lib.call(function, args, origin, stack),
            None => Err(RaError::catalog(ErrorKind::Io, MessageId::LibraryNotFound, &[library], origin, stack.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    struct Echo;
    impl HostLibrary for Echo {
        fn call(&self, name: &str, args: &[Symbol], _origin: &Token, _stack: &CallStack) -> Result<Symbol, RaError> {
            assert_eq!(name, "ping");
            Ok(args[0].clone())
        }
    }

    #[test]
    fn unregistered_library_is_an_io_fatal() {
        use ra_lang::TokenKind;
        let registry = ExternRegistry::new();
        let token = Token::new(TokenKind::Eof, "", "t.ra", 1, 1, std::rc::Rc::from(""));
        let err = registry.call("missing", "f", &[], &token, &CallStack::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Io);
    }

    #[test]
    fn registered_library_dispatches_by_name() {
        use ra_lang::TokenKind;
        let mut registry = ExternRegistry::new();
        registry.register("echo", Box::new(Echo));
        let token = Token::new(TokenKind::Eof, "", "t.ra", 1, 1, std::rc::Rc::from(""));
        let arg = Symbol::new(Value::Boolean(true));
        let out = registry.call("echo", "ping", &[arg], &token, &CallStack::new()).unwrap();
        assert!(out.borrow().is_truthy());
    }
}
