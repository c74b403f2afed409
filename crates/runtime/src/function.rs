//! Closures: captured scope, parameter list, body (spec.md §3 "Function
//! body") plus the arity-then-signature overload table spec.md §9 asks to
//! preserve verbatim ("arity pre-screens before type-scoring runs").

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use ra_core::{Hash, Interner};
use ra_lang::instr::{CompiledParam, CompiledSignature, Instruction};

use crate::scope::ScopeKey;
use crate::symbol::Symbol;
use crate::value::{Parameter, Signature};

#[derive(Debug, Clone)]
pub struct BoundParam {
    pub name: Hash,
    pub by_ref: bool,
    pub param: Parameter,
}

fn compiled_param_to_bound(p: &CompiledParam) -> BoundParam {
    let base = p.type_path.clone().unwrap_or_default();
    BoundParam {
        name: p.hash,
        by_ref: p.by_ref,
        param: Parameter { base, qualifiers: p.type_args.clone() },
    }
}

/// One overload: either a fixed parameter list or the variadic `_args`
/// binding (spec.md §3 "A variadic variant lacks the parameter list and
/// instead receives all arguments as a single array").
#[derive(Debug, Clone)]
pub enum Params {
    Fixed(Vec<BoundParam>),
    Variadic,
}

/// A single compiled closure: defining scope, parameters, body, and the
/// value-snapshot capture map (SPEC_FULL.md Open Questions #1).
#[derive(Debug, Clone)]
pub struct FunctionBody {
    pub name_hash: Hash,
    pub defining_scope: ScopeKey,
    pub params: Params,
    pub body: Rc<Vec<Instruction>>,
    pub captured: HashMap<Hash, Symbol>,
}

impl FunctionBody {
    pub fn arity(&self) -> Option<usize> {
        match &self.params {
            Params::Fixed(p) => Some(p.len()),
            Params::Variadic => None,
        }
    }

    pub fn signature(&self) -> Signature {
        match &self.params {
            Params::Fixed(p) => Signature(p.iter().map(|b| b.param.clone()).collect()),
            Params::Variadic => Signature(Vec::new()),
        }
    }
}

/// `arity -> [(signature, body)]` plus one optional variadic fallback
/// (spec.md §3 "Value" / "Function"). Declaration order inside each arity
/// bucket is preserved so ties in [`Signature::validity`] break in favor of
/// the earliest-declared overload, per spec.md §3 "Signature".
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    pub by_arity: HashMap<usize, Vec<Rc<FunctionBody>>>,
    pub variadic: Option<Rc<FunctionBody>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        FunctionTable::default()
    }

    pub fn define(&mut self, body: FunctionBody) {
        let body = Rc::new(body);
        match body.arity() {
            Some(arity) => self.by_arity.entry(arity).or_default().push(body),
            None => self.variadic = Some(body),
        }
    }

    /// Implements spec.md §4.4 "Call" step 2: arity bucket first, highest
    /// scorer within it, falling through to the variadic body when the
    /// call's arity has no bucket at all.
    pub fn dispatch(&self, args: &[Symbol], interner: &Interner, arena: &crate::scope::ScopeArena) -> Option<Rc<FunctionBody>> {
        if let Some(bucket) = self.by_arity.get(&args.len()) {
            let mut best: Option<(u32, &Rc<FunctionBody>)> = None;
            for body in bucket {
                let score = body.signature().validity(args, interner, arena);
                if score == 0 {
                    continue;
                }
                if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                    best = Some((score, body));
                }
            }
            if let Some((_, body)) = best {
                return Some(Rc::clone(body));
            }
        }
        self.variadic.clone()
    }
}

pub fn lower_signature(sig: &CompiledSignature) -> Params {
    match sig {
        CompiledSignature::Fixed(params) => Params::Fixed(params.iter().map(compiled_param_to_bound).collect()),
        CompiledSignature::Variadic => Params::Variadic,
    }
}

/// Collects every `Variable(hash)` referenced anywhere in `body`.
///
/// Used to snapshot a lambda's free variables at creation time (value
/// capture, SPEC_FULL.md Open Questions #1). Over-collecting names that
/// turn out to be the function's own parameters or locals is harmless: a
/// call's fresh activation scope is searched before the captured map, so a
/// same-named local always shadows a stale capture.
pub fn collect_referenced_vars(body: &[Instruction], out: &mut std::collections::HashSet<Hash>) {
    for instr in body {
        collect_in_instr(instr, out);
    }
}

fn collect_in_instr(instr: &Instruction, out: &mut std::collections::HashSet<Hash>) {
    use Instruction::*;
    match instr {
        Variable(h) => {
            out.insert(*h);
        }
        Container(_) | GetThis | Break | Continue | Extern(_) | Load(_) | TypeLiteral(..) => {}
        DeclareVars(_) => {}
        Declare(_, rhs) => collect_in_instr(rhs, out),
        Index(a, b) => {
            collect_in_instr(a, out);
            collect_in_instr(b, out);
        }
        SetIndex(a, b, c) => {
            collect_in_instr(a, out);
            collect_in_instr(b, out);
            collect_in_instr(c, out);
        }
        Inner(a, _) => collect_in_instr(a, out),
        Call(callee, args) | New(callee, args) => {
            collect_in_instr(callee, out);
            for a in args {
                collect_in_instr(a, out);
            }
        }
        Define(_) => {}
        Lambda(f) => collect_referenced_vars(&f.body, out),
        Class { body, .. } => collect_referenced_vars(body, out),
        If { branches, else_branch } => {
            for (cond, body) in branches {
                collect_in_instr(cond, out);
                collect_referenced_vars(body, out);
            }
            if let Some(b) = else_branch {
                collect_referenced_vars(b, out);
            }
        }
        While { cond, body } => {
            collect_in_instr(cond, out);
            collect_referenced_vars(body, out);
        }
        Until { start, end, step, body, .. } => {
            collect_in_instr(start, out);
            collect_in_instr(end, out);
            if let Some(s) = step {
                collect_in_instr(s, out);
            }
            collect_referenced_vars(body, out);
        }
        Each { iter, where_clause, do_clause, .. } => {
            collect_in_instr(iter, out);
            if let Some(w) = where_clause {
                collect_in_instr(w, out);
            }
            if let Some(d) = do_clause {
                collect_in_instr(d, out);
            }
        }
        Switch { scrutinee, arms, else_branch } => {
            collect_in_instr(scrutinee, out);
            for arm in arms {
                for l in &arm.labels {
                    collect_in_instr(l, out);
                }
                collect_referenced_vars(&arm.body, out);
            }
            if let Some(b) = else_branch {
                collect_referenced_vars(b, out);
            }
        }
        TryCatch { try_body, catch_body, .. } => {
            collect_referenced_vars(try_body, out);
            collect_referenced_vars(catch_body, out);
        }
        Throw(e) | Refer(e) | Length(e) | Parse(e) | CharN(e) | Chars(e) | Hash(e) | TypeOf(e) => collect_in_instr(e, out),
        Return(e) => {
            if let Some(e) = e {
                collect_in_instr(e, out);
            }
        }
        Assign(a, b) | Binary(_, a, b) => {
            collect_in_instr(a, out);
            collect_in_instr(b, out);
        }
        Delete(a, b) => {
            collect_in_instr(a, out);
            collect_in_instr(b, out);
        }
        Alloc(n, fill) => {
            collect_in_instr(n, out);
            if let Some(f) = fill {
                collect_in_instr(f, out);
            }
        }
        CastTo(e, _) => collect_in_instr(e, out),
        Array(items) => {
            for e in items {
                collect_in_instr(e, out);
            }
        }
        Map(entries) => {
            for (k, v) in entries {
                collect_in_instr(k, out);
                collect_in_instr(v, out);
            }
        }
        Unary(_, e) => collect_in_instr(e, out),
        Range(a, b, step, _) => {
            collect_in_instr(a, out);
            collect_in_instr(b, out);
            if let Some(s) = step {
                collect_in_instr(s, out);
            }
        }
        Sequence(body) => collect_referenced_vars(body, out),
    }
}

/// Used by `RefCell<FunctionTable>` construction at the call site (kept
/// here so `eval.rs` never constructs a raw `RefCell` inline).
pub fn new_function_value(table: FunctionTable) -> Rc<RefCell<FunctionTable>> {
    Rc::new(RefCell::new(table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeArena;
    use crate::value::Value;

    fn body_with_arity(arity: usize, name: &str, interner: &mut Interner) -> FunctionBody {
        let params = (0..arity)
            .map(|i| BoundParam { name: interner.intern(&format!("p{i}")), by_ref: false, param: Parameter::any() })
            .collect();
        FunctionBody {
            name_hash: interner.intern(name),
            defining_scope: ScopeArena::new().root,
            params: Params::Fixed(params),
            body: Rc::new(Vec::new()),
            captured: HashMap::new(),
        }
    }

    #[test]
    fn arity_pre_screens_before_any_scoring_runs() {
        let mut interner = Interner::new();
        let arena = ScopeArena::new();
        let mut table = FunctionTable::new();
        table.define(body_with_arity(1, "f", &mut interner));
        table.define(body_with_arity(2, "f", &mut interner));

        let one_arg = vec![Symbol::new(Value::Boolean(true))];
        let two_args = vec![Symbol::new(Value::Boolean(true)), Symbol::new(Value::Boolean(false))];

        let picked_one = table.dispatch(&one_arg, &interner, &arena).unwrap();
        assert_eq!(picked_one.arity(), Some(1));
        let picked_two = table.dispatch(&two_args, &interner, &arena).unwrap();
        assert_eq!(picked_two.arity(), Some(2));
    }

    #[test]
    fn missing_arity_falls_through_to_variadic() {
        let mut interner = Interner::new();
        let arena = ScopeArena::new();
        let mut table = FunctionTable::new();
        table.define(body_with_arity(1, "f", &mut interner));
        table.define(FunctionBody {
            name_hash: interner.intern("f"),
            defining_scope: arena.root,
            params: Params::Variadic,
            body: Rc::new(Vec::new()),
            captured: HashMap::new(),
        });

        let three_args = vec![Symbol::new_nil(); 3];
        let picked = table.dispatch(&three_args, &interner, &arena).unwrap();
        assert!(matches!(picked.params, Params::Variadic));
    }

    #[test]
    fn ties_break_in_declaration_order() {
        let mut interner = Interner::new();
        let arena = ScopeArena::new();
        let mut table = FunctionTable::new();
        table.define(body_with_arity(1, "first", &mut interner));
        table.define(body_with_arity(1, "second", &mut interner));

        let args = vec![Symbol::new(Value::Boolean(true))];
        let picked = table.dispatch(&args, &interner, &arena).unwrap();
        assert_eq!(interner.resolve(picked.name_hash), "first");
    }
}
