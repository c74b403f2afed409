//! Process-local identifier interner (`hash_ull` in the language's own
//! vocabulary).
//!
//! Every distinct identifier string seen by the lexer is assigned a dense,
//! monotonically increasing [`Hash`] on first sight. Hash `0` is reserved
//! for the anonymous-lambda name so closures created with `=>`/`::` and no
//! explicit name can still be bound in a scope's function table.
//!
//! Unlike the C++ original this interner is never global mutable state: the
//! lexer, parser, and evaluator all take `&mut Interner` explicitly, so two
//! independent `Engine`s never see each other's ids.

use std::collections::HashMap;

/// A dense identifier id. Two `Hash` values are equal iff the identifiers
/// they were interned from are equal.
pub type Hash = u64;

/// Reserved hash for the anonymous lambda name.
pub const ANONYMOUS: Hash = 0;

/// Pre-interned hashes for names the evaluator dispatches on by id rather
/// than by string comparison: operator hook methods, reserved members, and
/// built-in type names.
#[derive(Debug, Clone, Copy)]
pub struct WellKnown {
    pub this: Hash,
    pub init: Hash,
    pub deleter: Hash,
    pub args: Hash,

    pub add: Hash,
    pub sub: Hash,
    pub mul: Hash,
    pub div: Hash,
    pub fdiv: Hash,
    pub rem: Hash,
    pub pow: Hash,

    pub b_and: Hash,
    pub b_or: Hash,
    pub b_xor: Hash,
    pub b_sh_l: Hash,
    pub b_sh_r: Hash,
    pub b_not: Hash,
    pub not: Hash,

    pub less: Hash,
    pub more: Hash,
    pub eless: Hash,
    pub emore: Hash,
    pub equals: Hash,
    pub nequals: Hash,

    pub get: Hash,
    pub set: Hash,
    pub call: Hash,
    pub range_inc: Hash,
    pub range_exc: Hash,

    pub length: Hash,
    pub hash: Hash,
    pub cct: Hash,
    pub del: Hash,
}

/// Bidirectional string <-> [`Hash`] table.
pub struct Interner {
    ids: HashMap<Box<str>, Hash>,
    names: Vec<Box<str>>,
    pub well_known: WellKnown,
}

impl Interner {
    pub fn new() -> Self {
        let mut interner = Interner {
            ids: HashMap::new(),
            names: Vec::new(),
            // Placeholder, overwritten below once every well-known name has
            // been interned in a fixed order.
            well_known: WellKnown {
                this: 0,
                init: 0,
                deleter: 0,
                args: 0,
                add: 0,
                sub: 0,
                mul: 0,
                div: 0,
                fdiv: 0,
                rem: 0,
                pow: 0,
                b_and: 0,
                b_or: 0,
                b_xor: 0,
                b_sh_l: 0,
                b_sh_r: 0,
                b_not: 0,
                not: 0,
                less: 0,
                more: 0,
                eless: 0,
                emore: 0,
                equals: 0,
                nequals: 0,
                get: 0,
                set: 0,
                call: 0,
                range_inc: 0,
                range_exc: 0,
                length: 0,
                hash: 0,
                cct: 0,
                del: 0,
            },
        };

        // Hash 0 is reserved for anonymous lambdas; intern a sentinel first
        // so well-known names never collide with it.
        let anon = interner.intern("");
        debug_assert_eq!(anon, ANONYMOUS);

        interner.well_known = WellKnown {
            this: interner.intern("this"),
            init: interner.intern("init"),
            deleter: interner.intern("deleter"),
            args: interner.intern("_args"),
            add: interner.intern("add"),
            sub: interner.intern("sub"),
            mul: interner.intern("mul"),
            div: interner.intern("div"),
            fdiv: interner.intern("fdiv"),
            rem: interner.intern("mod"),
            pow: interner.intern("pow"),
            b_and: interner.intern("b_and"),
            b_or: interner.intern("b_or"),
            b_xor: interner.intern("b_xor"),
            b_sh_l: interner.intern("b_sh_l"),
            b_sh_r: interner.intern("b_sh_r"),
            b_not: interner.intern("b_not"),
            not: interner.intern("not"),
            less: interner.intern("less"),
            more: interner.intern("more"),
            eless: interner.intern("eless"),
            emore: interner.intern("emore"),
            equals: interner.intern("equals"),
            nequals: interner.intern("nequals"),
            get: interner.intern("get"),
            set: interner.intern("set"),
            call: interner.intern("call"),
            range_inc: interner.intern("range_inc"),
            range_exc: interner.intern("range_exc"),
            length: interner.intern("length"),
            hash: interner.intern("hash"),
            cct: interner.intern("cct"),
            del: interner.intern("del"),
        };

        interner
    }

    /// Assigns (or looks up) the hash for `name`.
    pub fn intern(&mut self, name: &str) -> Hash {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as Hash;
        let boxed: Box<str> = name.into();
        self.names.push(boxed.clone());
        self.ids.insert(boxed, id);
        id
    }

    /// Resolves a hash back to its source string.
    ///
    /// A hash not produced by this interner is a logic error in the caller;
    /// debug builds assert, release builds return `""` rather than panic
    /// mid-evaluation.
    pub fn resolve(&self, id: Hash) -> &str {
        match self.names.get(id as usize) {
            Some(name) => name,
            None => {
                debug_assert!(false, "unresolvable interner hash {id}");
                ""
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Hash> {
        self.ids.get(name).copied()
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interns_are_stable_and_deduplicated() {
        let mut interner = Interner::new();
        let a1 = interner.intern("foo");
        let a2 = interner.intern("foo");
        let b = interner.intern("bar");
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_eq!(interner.resolve(a1), "foo");
    }

    #[test]
    fn anonymous_hash_is_zero() {
        let interner = Interner::new();
        assert_eq!(super::ANONYMOUS, 0);
        assert_eq!(interner.resolve(0), "");
    }

    #[test]
    fn well_known_names_round_trip() {
        let interner = Interner::new();
        assert_eq!(interner.resolve(interner.well_known.add), "add");
        assert_eq!(interner.resolve(interner.well_known.this), "this");
        assert_eq!(interner.resolve(interner.well_known.args), "_args");
    }
}
