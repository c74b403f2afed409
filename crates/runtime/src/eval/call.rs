//! Function/closure dispatch and `struct`/`static`/`virtual` template
//! registration + instantiation (spec.md §4.4 "Call", "new Class(args)").
//!
//! A template scope records a type's shape (`name_trace`, `extensions`,
//! `base_template`) and, for `Struct`/`Virtual`, its raw declaration body —
//! replayed fresh into each new `Instance` scope rather than evaluated once,
//! so two instances of the same struct never share field storage. `Static`
//! has exactly one instance: its body runs once, straight into the template
//! scope, which doubles as that instance.

use std::collections::HashMap;
use std::rc::Rc;

use ra_core::Hash;
use ra_lang::instr::{ClassKind, CompiledFunction, Instruction};
use ra_lang::token::Token;

use super::EvalOutcome;
use crate::diagnostics::{ErrorKind, Frame, MessageId, RaError};
use crate::engine::Engine;
use crate::function::{collect_referenced_vars, lower_signature, new_function_value, FunctionBody, FunctionTable, Params};
use crate::scope::{ScopeKey, ScopeKind};
use crate::symbol::Symbol;
use crate::value::{Parameter, Value};

impl Engine {
    pub(crate) fn eval_call(&mut self, callee: &Instruction, args: &[Instruction], scope: ScopeKey, token: &Token) -> Result<EvalOutcome, RaError> {
        let func = self.eval_instruction(callee, scope, token)?.into_value();
        let arg_syms = self.eval_args(args, scope, token)?;
        let result = self.invoke(&func, arg_syms, token)?;
        Ok(EvalOutcome::Value(result))
    }

    fn eval_args(&mut self, args: &[Instruction], scope: ScopeKey, token: &Token) -> Result<Vec<Symbol>, RaError> {
        let mut out = Vec::with_capacity(args.len());
        for a in args {
            out.push(self.eval_instruction(a, scope, token)?.into_value());
        }
        Ok(out)
    }

    /// Used by every operator-hook/`get`/`set`/`del`/`length`/cast-hook call
    /// site elsewhere in `eval` — `scope` is accepted for a uniform call
    /// shape across those sites but unused here: a hook's activation scope
    /// is always anchored at its own `defining_scope`, never the caller's.
    pub(crate) fn call_function_value(&mut self, func: &Symbol, args: Vec<Symbol>, _scope: ScopeKey, token: &Token) -> Result<Symbol, RaError> {
        self.invoke(func, args, token)
    }

    fn invoke(&mut self, func: &Symbol, args: Vec<Symbol>, token: &Token) -> Result<Symbol, RaError> {
        let table_rc = match &*func.borrow() {
            Value::Function(t) => Rc::clone(t),
            Value::Object(key) => {
                let key = *key;
                let call_hash = self.interner.well_known.call;
                let hook = self.arena.get(key).and_then(|d| d.vars.get(&call_hash)).cloned();
                match hook {
                    Some(hook) => return self.invoke(&hook, args, token),
                    None => return Err(self.not_callable("Object", token)),
                }
            }
            other => return Err(self.not_callable(other.type_name(), token)),
        };

        let (dispatched, has_bucket, any_name) = {
            let table = table_rc.borrow();
            let dispatched = table.dispatch(&args, &self.interner, &self.arena);
            let has_bucket = table.by_arity.contains_key(&args.len());
            let any_name = table.by_arity.values().flatten().next().map(|b| b.name_hash).or_else(|| table.variadic.as_ref().map(|b| b.name_hash));
            (dispatched, has_bucket, any_name)
        };
        let name = any_name.map(|h| self.interner.resolve(h).to_string()).unwrap_or_default();
        let body = match dispatched {
            Some(b) => b,
            None if has_bucket => return Err(RaError::catalog(ErrorKind::Dispatch, MessageId::NoViableOverload, &[&name], token, self.stack.clone())),
            None => {
                return Err(RaError::catalog(ErrorKind::Dispatch, MessageId::ArityMismatch, &[&name, &args.len().to_string()], token, self.stack.clone()))
            }
        };
        self.call_function_body(&body, args, token)
    }

    fn call_function_body(&mut self, body: &Rc<FunctionBody>, args: Vec<Symbol>, token: &Token) -> Result<Symbol, RaError> {
        let activation = self.arena.alloc(ScopeKind::Bounded, Some(body.defining_scope));
        match &body.params {
            Params::Fixed(params) => {
                for (param, arg) in params.iter().zip(args) {
                    let bound = if param.by_ref { arg } else { arg.deep_clone() };
                    self.bind_and_retain(activation, param.name, bound);
                }
            }
            Params::Variadic => {
                let args_hash = self.interner.well_known.args;
                self.bind_and_retain(activation, args_hash, Symbol::new(Value::Array(args)));
            }
        }
        for (&name, captured) in &body.captured {
            let already_bound = self.arena.get(activation).map(|d| d.vars.contains_key(&name)).unwrap_or(false);
            if !already_bound {
                self.bind_and_retain(activation, name, captured.clone());
            }
        }

        let frame_name = self.interner.resolve(body.name_hash).to_string();
        self.stack.push(Frame::at_token(frame_name, token));
        let outcome = self.eval_block(&body.body, activation, token);
        self.stack.pop();

        match outcome? {
            EvalOutcome::Value(v) | EvalOutcome::Return(v) | EvalOutcome::Refer(v) => Ok(v),
            EvalOutcome::Break | EvalOutcome::Continue => {
                Err(RaError::catalog(ErrorKind::Dispatch, MessageId::LoopControlOutsideLoop, &["break/continue"], token, self.stack.clone()))
            }
        }
    }

    pub(crate) fn eval_define(&mut self, f: &Rc<CompiledFunction>, scope: ScopeKey) -> Result<EvalOutcome, RaError> {
        let body = self.build_function_body(f, scope);
        self.define_into(scope, f.name_hash, body);
        Ok(EvalOutcome::Value(Symbol::new_nil()))
    }

    pub(crate) fn eval_lambda(&mut self, f: &Rc<CompiledFunction>, scope: ScopeKey) -> Result<EvalOutcome, RaError> {
        let body = self.build_function_body(f, scope);
        let mut table = FunctionTable::new();
        table.define(body);
        Ok(EvalOutcome::Value(Symbol::new(Value::Function(new_function_value(table)))))
    }

    /// Value-snapshot capture (SPEC_FULL.md Open Questions #1): a name
    /// referenced anywhere in the body is snapshotted by `Symbol` handle at
    /// definition time, *except* one whose home scope is `scope` itself —
    /// struct field mutation (`init` writing `x`) and direct recursion
    /// (`fact` calling `fact`) both rely on those names resolving live
    /// through `defining_scope` at call time instead of a stale capture.
    fn build_function_body(&mut self, f: &Rc<CompiledFunction>, scope: ScopeKey) -> FunctionBody {
        let params = lower_signature(&f.signature);
        let mut referenced = std::collections::HashSet::new();
        collect_referenced_vars(&f.body, &mut referenced);

        let mut captured = HashMap::new();
        for name in referenced {
            if let Params::Fixed(ps) = &params {
                if ps.iter().any(|p| p.name == name) {
                    continue;
                }
            }
            if self.arena.resolve_var_scope(scope, name) == Some(scope) {
                continue;
            }
            if let Some(sym) = self.arena.resolve_var(scope, name) {
                captured.insert(name, sym.clone());
            }
        }

        FunctionBody { name_hash: f.name_hash, defining_scope: scope, params, body: Rc::clone(&f.body), captured }
    }

    /// Adds one overload to the `FunctionTable` already bound at `name` in
    /// `scope`, or creates a fresh one — the mechanism behind declaring the
    /// same function name multiple times with different arities/signatures.
    fn define_into(&mut self, scope: ScopeKey, name: Hash, body: FunctionBody) {
        let existing = self.arena.get(scope).and_then(|d| d.vars.get(&name)).cloned();
        let table_rc = existing.and_then(|s| match &*s.borrow() {
            Value::Function(t) => Some(Rc::clone(t)),
            _ => None,
        });
        match table_rc {
            Some(t) => t.borrow_mut().define(body),
            None => {
                let mut table = FunctionTable::new();
                table.define(body);
                let value = Symbol::new(Value::Function(new_function_value(table)));
                self.bind_and_retain(scope, name, value);
            }
        }
    }

    pub(crate) fn eval_class(
        &mut self,
        name: Hash,
        base: Option<Hash>,
        kind: ClassKind,
        body: &Rc<Vec<Instruction>>,
        scope: ScopeKey,
        token: &Token,
    ) -> Result<EvalOutcome, RaError> {
        let base_template = base.and_then(|b| self.class_templates.get(&b).copied());
        if kind == ClassKind::Static {
            let base_is_static = base_template.map(|b| matches!(self.arena.get(b).map(|d| d.kind), Some(ScopeKind::Static))).unwrap_or(false);
            if base_is_static {
                return Err(RaError::catalog(ErrorKind::Declaration, MessageId::CannotExtendStatic, &[self.interner.resolve(name)], token, self.stack.clone()));
            }
        }

        let scope_kind = match kind {
            ClassKind::Struct => ScopeKind::Struct,
            ClassKind::Static => ScopeKind::Static,
            ClassKind::Virtual => ScopeKind::Virtual,
        };
        let template_key = self.arena.alloc(scope_kind, Some(scope));
        let (name_trace, extensions) = {
            let mut nt = base_template.and_then(|b| self.arena.get(b)).map(|d| d.name_trace.clone()).unwrap_or_default();
            nt.push(name);
            let mut ext = base_template.and_then(|b| self.arena.get(b)).map(|d| d.extensions.clone()).unwrap_or_default();
            if let Some(b) = base {
                ext.push(b);
            }
            (nt, ext)
        };
        if let Some(data) = self.arena.get_mut(template_key) {
            data.name_trace = name_trace;
            data.extensions = extensions;
            data.base_template = base_template;
            data.body = Some(Rc::clone(body));
        }

        let bound_value = if kind == ClassKind::Static {
            self.eval_block(body, template_key, token)?;
            // `this` is a non-owning back-reference to the instance's own
            // scope — inserted directly into `vars` rather than through
            // `bind_and_retain`, so it never holds a strong count. A static
            // singleton's only real owner is the binding below.
            let this_hash = self.interner.well_known.this;
            let self_obj = Symbol::new(Value::Object(template_key));
            if let Some(data) = self.arena.get_mut(template_key) {
                data.vars.insert(this_hash, self_obj.clone());
            }
            self_obj
        } else {
            Symbol::new(Value::TypeName(Parameter { base: vec![name], qualifiers: vec![] }))
        };

        self.class_templates.insert(name, template_key);
        self.bind_and_retain(scope, name, bound_value);
        Ok(EvalOutcome::Value(Symbol::new_nil()))
    }

    pub(crate) fn eval_new(&mut self, callee: &Instruction, args: &[Instruction], scope: ScopeKey, token: &Token) -> Result<EvalOutcome, RaError> {
        let class_hash = match callee {
            Instruction::Variable(h) => *h,
            _ => return Err(self.not_callable_like("new target", token)),
        };
        let template_key = match self.class_templates.get(&class_hash).copied() {
            Some(k) => k,
            None => return Err(self.unknown_identifier(class_hash, token)),
        };
        if matches!(self.arena.get(template_key).map(|d| d.kind), Some(ScopeKind::Static)) {
            return Err(RaError::catalog(ErrorKind::Object, MessageId::InstantiationFailed, &[self.interner.resolve(class_hash)], token, self.stack.clone()));
        }

        let chain = self.template_chain(template_key);
        let instance_key = self.arena.alloc(ScopeKind::Instance, Some(scope));
        if let Some(data) = self.arena.get(template_key) {
            let name_trace = data.name_trace.clone();
            let extensions = data.extensions.clone();
            if let Some(inst) = self.arena.get_mut(instance_key) {
                inst.name_trace = name_trace;
                inst.extensions = extensions;
                inst.base_template = Some(template_key);
            }
        }
        // `this` is a non-owning back-reference, inserted directly rather
        // than through `bind_and_retain` — the object's real owner is
        // whatever `var`/argument slot the caller ultimately stores the
        // value returned below into.
        let this_hash = self.interner.well_known.this;
        let self_obj = Symbol::new(Value::Object(instance_key));
        if let Some(data) = self.arena.get_mut(instance_key) {
            data.vars.insert(this_hash, self_obj.clone());
        }

        for ancestor in &chain {
            let ancestor_body = self.arena.get(*ancestor).and_then(|d| d.body.clone());
            if let Some(ancestor_body) = ancestor_body {
                self.eval_block(&ancestor_body, instance_key, token)?;
            }
        }

        let arg_syms = self.eval_args(args, scope, token)?;
        let init_hash = self.interner.well_known.init;
        let init_fn = self.arena.get(instance_key).and_then(|d| d.vars.get(&init_hash)).cloned();
        if let Some(init_fn) = init_fn {
            self.invoke(&init_fn, arg_syms, token)?;
        }
        Ok(EvalOutcome::Value(self_obj))
    }

    /// Root-to-derived walk of a template's `base_template` chain, used to
    /// replay every ancestor's declaration body into a fresh `Instance`
    /// scope in inheritance order — a derived definition naturally shadows
    /// an inherited one since it replays last.
    fn template_chain(&self, template_key: ScopeKey) -> Vec<ScopeKey> {
        let mut chain = Vec::new();
        let mut current = Some(template_key);
        while let Some(k) = current {
            chain.push(k);
            current = self.arena.get(k).and_then(|d| d.base_template);
        }
        chain.reverse();
        chain
    }
}
