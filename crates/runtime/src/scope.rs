//! Scope arena.
//!
//! The original interpreter links scopes with a strong/weak pointer pair
//! (parent: weak, function-captures-defining-scope: weak) and a `shift()`
//! operation that re-anchors a function's defining scope to its
//! grandparent when the parent is torn down, so closures survive block
//! cleanup without forming a reference cycle.
//!
//! This port replaces the whole pointer graph with [`slotmap`] keys:
//! scopes live in one arena (`ScopeArena`), `ScopeKey` is `Copy` and
//! generation-checked, and a function's "defining scope" is just the key
//! value. There is no cycle to break because a `ScopeKey` is a plain index,
//! not a smart pointer — nothing ever points *into* another owner's
//! reference count. `strong_count` on [`ScopeData`] tracks how many live
//! `Value::Object` handles reference an `Instance` scope purely so the
//! `deleter` hook (spec.md §3, §5) can run when the last one goes away;
//! losing track of a count here leaks a slot, it does not corrupt the
//! arena or create a cycle.

use std::collections::HashMap;

use ra_core::Hash;
use ra_lang::instr::Instruction;
use slotmap::{new_key_type, SlotMap};

use crate::symbol::Symbol;

new_key_type! {
    pub struct ScopeKey;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Bounded,
    Struct,
    Static,
    Instance,
    Virtual,
}

pub struct ScopeData {
    pub kind: ScopeKind,
    pub parent: Option<ScopeKey>,
    pub body: Option<std::rc::Rc<Vec<Instruction>>>,
    /// Dotted lexical path, outermost first, ending with this scope's own
    /// name (0 for anonymous/bounded blocks).
    pub name_trace: Vec<Hash>,
    /// Base struct name-hashes this scope (if a `Struct`/`Instance`)
    /// extends, outermost ancestor first.
    pub extensions: Vec<Hash>,
    pub vars: HashMap<Hash, Symbol>,
    pub strong_count: u32,
    /// For a `Struct`/`Virtual` template scope only: the template this one
    /// extends (`struct Derived : Base { ... }`). Not part of spec.md's
    /// literal `Scope` field list, but needed to walk the single-inheritance
    /// chain at `new` time without re-parsing — each ancestor's `body` runs
    /// into the fresh `Instance` scope, base first, so a derived definition
    /// naturally shadows an inherited one (spec.md §4.4 "new Class(args)").
    pub base_template: Option<ScopeKey>,
}

impl ScopeData {
    fn new(kind: ScopeKind, parent: Option<ScopeKey>) -> Self {
        ScopeData {
            kind,
            parent,
            body: None,
            name_trace: Vec::new(),
            extensions: Vec::new(),
            vars: HashMap::new(),
            strong_count: 0,
            base_template: None,
        }
    }
}

pub struct ScopeArena {
    scopes: SlotMap<ScopeKey, ScopeData>,
    pub root: ScopeKey,
}

impl ScopeArena {
    pub fn new() -> Self {
        let mut scopes = SlotMap::with_key();
        let root = scopes.insert(ScopeData::new(ScopeKind::Bounded, None));
        ScopeArena { scopes, root }
    }

    pub fn alloc(&mut self, kind: ScopeKind, parent: Option<ScopeKey>) -> ScopeKey {
        self.scopes.insert(ScopeData::new(kind, parent))
    }

    pub fn get(&self, key: ScopeKey) -> Option<&ScopeData> {
        self.scopes.get(key)
    }

    pub fn get_mut(&mut self, key: ScopeKey) -> Option<&mut ScopeData> {
        self.scopes.get_mut(key)
    }

    pub fn retain(&mut self, key: ScopeKey) {
        if let Some(data) = self.scopes.get_mut(key) {
            data.strong_count += 1;
        }
    }

    /// Decrements `key`'s strong count. Returns `true` exactly when the
    /// count reached zero this call — the caller is then responsible for
    /// running the `deleter` hook (if any) *before* calling
    /// [`ScopeArena::free`], matching spec.md's "deleter runs before member
    /// destruction" invariant.
    pub fn release(&mut self, key: ScopeKey) -> bool {
        if let Some(data) = self.scopes.get_mut(key) {
            data.strong_count = data.strong_count.saturating_sub(1);
            data.strong_count == 0
        } else {
            false
        }
    }

    pub fn free(&mut self, key: ScopeKey) {
        self.scopes.remove(key);
    }

    /// Looks up `name` by walking from `start` outward through parent
    /// links, a weak (non-owning) traversal since `parent` is just a key.
    pub fn resolve_var(&self, start: ScopeKey, name: Hash) -> Option<&Symbol> {
        let mut current = Some(start);
        while let Some(key) = current {
            let data = self.scopes.get(key)?;
            if let Some(sym) = data.vars.get(&name) {
                return Some(sym);
            }
            current = data.parent;
        }
        None
    }

    pub fn resolve_var_scope(&self, start: ScopeKey, name: Hash) -> Option<ScopeKey> {
        let mut current = Some(start);
        while let Some(key) = current {
            let data = self.scopes.get(key)?;
            if data.vars.contains_key(&name) {
                return Some(key);
            }
            current = data.parent;
        }
        None
    }

    /// Re-anchors `key`'s parent to its current grandparent. The arena
    /// equivalent of the original `shift()`: used when a bounded scope is
    /// about to be freed but a function still captures it as its defining
    /// scope, so the lexical chain above the freed scope stays reachable.
    pub fn shift(&mut self, key: ScopeKey) {
        let grandparent = self.scopes.get(key).and_then(|d| d.parent).and_then(|p| self.scopes.get(p)).and_then(|d| d.parent);
        if let Some(data) = self.scopes.get_mut(key) {
            data.parent = grandparent;
        }
    }
}

impl Default for ScopeArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_scope_resolves_through_parent_chain() {
        let mut arena = ScopeArena::new();
        let child = arena.alloc(ScopeKind::Bounded, Some(arena.root));
        arena.get_mut(arena.root).unwrap().vars.insert(1, Symbol::new_nil());
        assert!(arena.resolve_var(child, 1).is_some());
        assert!(arena.resolve_var(arena.root, 2).is_none());
    }

    #[test]
    fn release_reaching_zero_signals_caller() {
        let mut arena = ScopeArena::new();
        let key = arena.alloc(ScopeKind::Instance, Some(arena.root));
        arena.retain(key);
        assert!(arena.release(key));
    }

    #[test]
    fn retain_then_two_releases_frees() {
        let mut arena = ScopeArena::new();
        let key = arena.alloc(ScopeKind::Instance, Some(arena.root));
        arena.retain(key);
        arena.retain(key);
        assert!(!arena.release(key));
        assert!(arena.release(key));
    }
}
