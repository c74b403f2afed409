//! Value model, scope arena, and tree-walking evaluator for the `ra`
//! scripting language.
//!
//! This crate takes a folded [`ra_lang::Program`], lowers it to an
//! [`ra_lang::instr::Instruction`] tree, and walks it over a tagged
//! [`value::Value`] sum type with a slotmap-backed scope arena in place of
//! the original's weak/strong pointer graph (spec.md §9). [`engine::Engine`]
//! is the one embeddable front door: an embedder links this crate, builds an
//! `Engine`, and calls `run_source`.

pub mod diagnostics;
pub mod engine;
pub mod eval;
pub mod extern_abi;
pub mod function;
pub mod loader;
pub mod scope;
pub mod symbol;
pub mod value;

pub use diagnostics::{CallStack, ErrorKind, Frame, MessageId, RaError};
pub use engine::Engine;
pub use eval::EvalOutcome;
pub use extern_abi::{ExternRegistry, HostLibrary};
pub use scope::{ScopeArena, ScopeKey, ScopeKind};
pub use symbol::Symbol;
pub use value::{Dict, Parameter, Signature, Value};
