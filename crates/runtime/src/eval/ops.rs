//! Operator dispatch (spec.md §4.4's five-step chain) and value equality.
//!
//! Binary dispatch tries, in order: the numeric rule, array elementwise
//! broadcast (arithmetic operators only — comparisons and equality never
//! broadcast), string/array concatenation, the `&` positional-format
//! special case, an object operator-hook method, a scope-level fallback
//! hook, and finally `UndeclaredOperator`. `===`/`!==` bypass all of this:
//! identity for objects, structural equality for everything else.

use std::rc::Rc;

use ra_core::{Hash, Number};
use ra_lang::ast::{BinOp, UnOp};
use ra_lang::instr::Instruction;
use ra_lang::token::Token;

use crate::diagnostics::{ErrorKind, MessageId, RaError};
use crate::engine::Engine;
use crate::scope::ScopeKey;
use crate::symbol::Symbol;
use crate::value::{Parameter, Value};

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
        BinOp::Shl => "<<",
        BinOp::Shr => ">>",
        BinOp::Lt => "<",
        BinOp::Gt => ">",
        BinOp::Le => "<=",
        BinOp::Ge => ">=",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::PureEq => "===",
        BinOp::PureNe => "!==",
        BinOp::BAnd => "&",
        BinOp::BXor => "^",
        BinOp::BOr => "|",
        BinOp::And => "&&",
        BinOp::Or => "||",
        BinOp::RangeExc => "..",
        BinOp::RangeInc => ".+",
        BinOp::Concat => "++",
    }
}

fn is_arithmetic_op(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::FDiv | BinOp::Mod | BinOp::Pow | BinOp::BAnd | BinOp::BXor | BinOp::BOr | BinOp::Shl | BinOp::Shr
    )
}

/// Maps an operator to the well-known hash of the user-overridable hook
/// method for it. `And`/`Or` short-circuit in `eval_binary` before dispatch
/// ever runs; `PureEq`/`PureNe` bypass the chain entirely; `RangeExc`/
/// `RangeInc` are never constructed by lowering (see `Instruction::Range`).
/// All three return `None` here for an exhaustive match, not because a
/// caller is expected to reach them.
fn op_hook_hash(interner: &ra_core::Interner, op: BinOp) -> Option<Hash> {
    let wk = &interner.well_known;
    Some(match op {
        BinOp::Add => wk.add,
        BinOp::Sub => wk.sub,
        BinOp::Mul => wk.mul,
        BinOp::Div => wk.div,
        BinOp::FDiv => wk.fdiv,
        BinOp::Mod => wk.rem,
        BinOp::Pow => wk.pow,
        BinOp::Shl => wk.b_sh_l,
        BinOp::Shr => wk.b_sh_r,
        BinOp::Lt => wk.less,
        BinOp::Gt => wk.more,
        BinOp::Le => wk.eless,
        BinOp::Ge => wk.emore,
        BinOp::Eq => wk.equals,
        BinOp::Ne => wk.nequals,
        BinOp::BAnd => wk.b_and,
        BinOp::BXor => wk.b_xor,
        BinOp::BOr => wk.b_or,
        BinOp::Concat => wk.cct,
        BinOp::PureEq | BinOp::PureNe | BinOp::And | BinOp::Or | BinOp::RangeExc | BinOp::RangeInc => return None,
    })
}

fn numeric_binary(op: BinOp, x: Number, y: Number) -> Value {
    match op {
        BinOp::Add => Value::Number(x + y),
        BinOp::Sub => Value::Number(x - y),
        BinOp::Mul => Value::Number(x * y),
        BinOp::Div => Value::Number(x.div(y)),
        BinOp::FDiv => Value::Number(x.fdiv(y)),
        BinOp::Mod => Value::Number(x % y),
        BinOp::Pow => Value::Number(x.pow(y)),
        BinOp::Shl => Value::Number(x << y),
        BinOp::Shr => Value::Number(x >> y),
        BinOp::BAnd => Value::Number(x & y),
        BinOp::BOr => Value::Number(x | y),
        BinOp::BXor => Value::Number(x ^ y),
        BinOp::Lt => Value::Boolean(x.partial_cmp_widening(y) == Some(std::cmp::Ordering::Less)),
        BinOp::Gt => Value::Boolean(x.partial_cmp_widening(y) == Some(std::cmp::Ordering::Greater)),
        BinOp::Le => Value::Boolean(matches!(x.partial_cmp_widening(y), Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal))),
        BinOp::Ge => Value::Boolean(matches!(x.partial_cmp_widening(y), Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal))),
        BinOp::Eq => Value::Boolean(x == y),
        BinOp::Ne => Value::Boolean(x != y),
        BinOp::Concat => Value::String(format!("{x}{y}")),
        BinOp::PureEq | BinOp::PureNe | BinOp::And | BinOp::Or | BinOp::RangeExc | BinOp::RangeInc => {
            unreachable!("handled before numeric_binary is ever called")
        }
    }
}

/// Structural/value equality (spec.md §3 "Value" equality): everything
/// compares by content except `Function`/`Pointer` (handle identity) and
/// `Object` (scope-key identity — two distinct instances are never equal
/// even with identical fields, matching spec.md's reference semantics for
/// objects).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| values_equal(&p.borrow(), &q.borrow()))
        }
        (Value::Dictionary(x), Value::Dictionary(y)) => {
            let xs: Vec<_> = x.iter().collect();
            let ys: Vec<_> = y.iter().collect();
            xs.len() == ys.len() && xs.iter().zip(ys.iter()).all(|((k1, v1), (k2, v2))| k1 == k2 && values_equal(&v1.borrow(), &v2.borrow()))
        }
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Object(x), Value::Object(y)) => x == y,
        (Value::TypeName(x), Value::TypeName(y)) => x == y,
        (Value::Pointer(x), Value::Pointer(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

fn pure_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => x == y,
        _ => values_equal(a, b),
    }
}

/// `@x` (spec.md §3 "Hash"): a structural content hash. Dictionary entries
/// hash in iteration order, so two dictionaries built with the same
/// key/value pairs in different insertion orders hash differently — a
/// simplification noted in DESIGN.md rather than a true order-independent
/// structural hash.
pub fn structural_hash(v: &Value) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash as StdHash, Hasher};

    fn write(v: &Value, hasher: &mut DefaultHasher) {
        match v {
            Value::Nil => 0u8.hash(hasher),
            Value::Boolean(b) => {
                1u8.hash(hasher);
                b.hash(hasher);
            }
            Value::Number(n) => {
                2u8.hash(hasher);
                n.as_f64().to_bits().hash(hasher);
            }
            Value::String(s) => {
                3u8.hash(hasher);
                s.hash(hasher);
            }
            Value::Array(items) => {
                4u8.hash(hasher);
                for item in items {
                    write(&item.borrow(), hasher);
                }
            }
            Value::Dictionary(d) => {
                5u8.hash(hasher);
                for (k, val) in d.iter() {
                    k.hash(hasher);
                    write(&val.borrow(), hasher);
                }
            }
            Value::Function(_) => 6u8.hash(hasher),
            Value::Object(key) => {
                7u8.hash(hasher);
                format!("{key:?}").hash(hasher);
            }
            Value::TypeName(p) => {
                8u8.hash(hasher);
                p.base.hash(hasher);
                p.qualifiers.hash(hasher);
            }
            Value::Pointer(_) => 9u8.hash(hasher),
        }
    }

    let mut hasher = DefaultHasher::new();
    write(v, &mut hasher);
    hasher.finish()
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn eval_binary(&mut self, op: BinOp, a: &Instruction, b: &Instruction, scope: ScopeKey, token: &Token) -> Result<super::EvalOutcome, RaError> {
        if op == BinOp::And {
            let av = self.eval_instruction(a, scope, token)?.into_value();
            if !av.borrow().is_truthy() {
                return Ok(super::EvalOutcome::Value(Symbol::new(Value::Boolean(false))));
            }
            let bv = self.eval_instruction(b, scope, token)?.into_value();
            let truthy = bv.borrow().is_truthy();
            return Ok(super::EvalOutcome::Value(Symbol::new(Value::Boolean(truthy))));
        }
        if op == BinOp::Or {
            let av = self.eval_instruction(a, scope, token)?.into_value();
            if av.borrow().is_truthy() {
                return Ok(super::EvalOutcome::Value(Symbol::new(Value::Boolean(true))));
            }
            let bv = self.eval_instruction(b, scope, token)?.into_value();
            let truthy = bv.borrow().is_truthy();
            return Ok(super::EvalOutcome::Value(Symbol::new(Value::Boolean(truthy))));
        }

        let av = self.eval_instruction(a, scope, token)?.into_value();
        let bv = self.eval_instruction(b, scope, token)?.into_value();
        let result = self.apply_binary(op, &av, &bv, scope, token)?;
        Ok(super::EvalOutcome::Value(result))
    }

    pub(crate) fn apply_binary(&mut self, op: BinOp, a: &Symbol, b: &Symbol, scope: ScopeKey, token: &Token) -> Result<Symbol, RaError> {
        if matches!(op, BinOp::PureEq | BinOp::PureNe) {
            let eq = pure_equal(&a.borrow(), &b.borrow());
            let result = if op == BinOp::PureEq { eq } else { !eq };
            return Ok(Symbol::new(Value::Boolean(result)));
        }

        let numeric_pair = match (&*a.borrow(), &*b.borrow()) {
            (Value::Number(x), Value::Number(y)) => Some((*x, *y)),
            _ => None,
        };
        if let Some((x, y)) = numeric_pair {
            return Ok(Symbol::new(numeric_binary(op, x, y)));
        }

        if is_arithmetic_op(op) {
            let a_is_array = matches!(&*a.borrow(), Value::Array(_));
            let b_is_array = matches!(&*b.borrow(), Value::Array(_));
            if a_is_array || b_is_array {
                return self.elementwise_binary(op, a, b, scope, token);
            }
        }

        if matches!(op, BinOp::Add | BinOp::Concat) {
            let both_strings = matches!((&*a.borrow(), &*b.borrow()), (Value::String(_), Value::String(_)));
            if both_strings {
                let (sa, sb) = match (&*a.borrow(), &*b.borrow()) {
                    (Value::String(x), Value::String(y)) => (x.clone(), y.clone()),
                    _ => unreachable!(),
                };
                return Ok(Symbol::new(Value::String(format!("{sa}{sb}"))));
            }
            if op == BinOp::Concat {
                let both_arrays = matches!((&*a.borrow(), &*b.borrow()), (Value::Array(_), Value::Array(_)));
                if both_arrays {
                    let (xa, xb) = match (&*a.borrow(), &*b.borrow()) {
                        (Value::Array(x), Value::Array(y)) => (x.clone(), y.clone()),
                        _ => unreachable!(),
                    };
                    let mut combined = xa;
                    combined.extend(xb);
                    return Ok(Symbol::new(Value::Array(combined)));
                }
            }
        }

        if op == BinOp::BAnd {
            let format_pair = matches!(
                (&*a.borrow(), &*b.borrow()),
                (Value::String(_), Value::Array(_)) | (Value::Array(_), Value::String(_))
            );
            if format_pair {
                return self.positional_format(a, b, scope, token);
            }
        }

        if let Value::Object(key) = &*a.borrow() {
            let key = *key;
            if let Some(hash) = op_hook_hash(&self.interner, op) {
                if let Some(hook) = self.arena.get(key).and_then(|d| d.vars.get(&hash)).cloned() {
                    return self.call_function_value(&hook, vec![b.clone()], scope, token);
                }
            }
        }
        if let Value::Object(key) = &*b.borrow() {
            let key = *key;
            if let Some(hash) = op_hook_hash(&self.interner, op) {
                if let Some(hook) = self.arena.get(key).and_then(|d| d.vars.get(&hash)).cloned() {
                    return self.call_function_value(&hook, vec![a.clone()], scope, token);
                }
            }
        }

        if let Some(hash) = op_hook_hash(&self.interner, op) {
            if let Some(hook) = self.lookup_scope_hook(scope, hash) {
                return self.call_function_value(&hook, vec![a.clone(), b.clone()], scope, token);
            }
        }

        let type_name = { let av = a.borrow(); av.type_name() };
        Err(RaError::catalog(ErrorKind::Dispatch, MessageId::UndeclaredOperator, &[op_symbol(op), type_name], token, self.stack.clone()))
    }

    fn elementwise_binary(&mut self, op: BinOp, a: &Symbol, b: &Symbol, scope: ScopeKey, token: &Token) -> Result<Symbol, RaError> {
        let a_arr = matches!(&*a.borrow(), Value::Array(_));
        let b_arr = matches!(&*b.borrow(), Value::Array(_));

        if a_arr && b_arr {
            let (xa, xb) = match (&*a.borrow(), &*b.borrow()) {
                (Value::Array(x), Value::Array(y)) => (x.clone(), y.clone()),
                _ => unreachable!(),
            };
            if xa.len() != xb.len() {
                return Err(RaError::catalog(
                    ErrorKind::Arithmetic,
                    MessageId::IncompatibleVectorSizes,
                    &[&xa.len().to_string(), &xb.len().to_string(), op_symbol(op)],
                    token,
                    self.stack.clone(),
                ));
            }
            let mut out = Vec::with_capacity(xa.len());
            for (x, y) in xa.iter().zip(xb.iter()) {
                out.push(self.apply_binary(op, x, y, scope, token)?);
            }
            return Ok(Symbol::new(Value::Array(out)));
        }

        if a_arr {
            let xa = match &*a.borrow() {
                Value::Array(x) => x.clone(),
                _ => unreachable!(),
            };
            let mut out = Vec::with_capacity(xa.len());
            for x in &xa {
                out.push(self.apply_binary(op, x, b, scope, token)?);
            }
            return Ok(Symbol::new(Value::Array(out)));
        }

        let xb = match &*b.borrow() {
            Value::Array(x) => x.clone(),
            _ => unreachable!(),
        };
        let mut out = Vec::with_capacity(xb.len());
        for y in &xb {
            out.push(self.apply_binary(op, a, y, scope, token)?);
        }
        Ok(Symbol::new(Value::Array(out)))
    }

    /// `"fmt {} {}" & [a, b]` (the `BAnd` special case): substitutes each
    /// `{}` in source order with the stringified next array element.
    fn positional_format(&mut self, a: &Symbol, b: &Symbol, scope: ScopeKey, token: &Token) -> Result<Symbol, RaError> {
        let (template, items) = match (&*a.borrow(), &*b.borrow()) {
            (Value::String(s), Value::Array(items)) => (s.clone(), items.clone()),
            (Value::Array(items), Value::String(s)) => (s.clone(), items.clone()),
            _ => unreachable!(),
        };
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();
        let mut idx = 0usize;
        while let Some(c) = chars.next() {
            if c == '{' && chars.peek() == Some(&'}') {
                chars.next();
                if let Some(item) = items.get(idx) {
                    out.push_str(&self.stringify(item, scope, token)?);
                }
                idx += 1;
            } else {
                out.push(c);
            }
        }
        Ok(Symbol::new(Value::String(out)))
    }

    pub(crate) fn eval_unary(&mut self, op: UnOp, e: &Instruction, scope: ScopeKey, token: &Token) -> Result<super::EvalOutcome, RaError> {
        let v = self.eval_instruction(e, scope, token)?.into_value();
        match op {
            UnOp::Plus => match &*v.borrow() {
                Value::Number(n) => Ok(super::EvalOutcome::Value(Symbol::new(Value::Number(*n)))),
                other => Err(self.undeclared_unary("+", other.type_name(), token)),
            },
            UnOp::Neg => match &*v.borrow() {
                Value::Number(n) => Ok(super::EvalOutcome::Value(Symbol::new(Value::Number(-*n)))),
                other => Err(self.undeclared_unary("-", other.type_name(), token)),
            },
            UnOp::Not => {
                let truthy = v.borrow().is_truthy();
                Ok(super::EvalOutcome::Value(Symbol::new(Value::Boolean(!truthy))))
            }
            UnOp::BNot => {
                let hash = self.interner.well_known.b_not;
                match &*v.borrow() {
                    Value::Number(n) => return Ok(super::EvalOutcome::Value(Symbol::new(Value::Number(Number::int(!n.as_i64_truncating()))))),
                    Value::Object(key) => {
                        let key = *key;
                        if let Some(hook) = self.arena.get(key).and_then(|d| d.vars.get(&hash)).cloned() {
                            let result = self.call_function_value(&hook, vec![], scope, token)?;
                            return Ok(super::EvalOutcome::Value(result));
                        }
                    }
                    _ => {}
                }
                Err(self.undeclared_unary("~", v.borrow().type_name(), token))
            }
            UnOp::Hash => Ok(super::EvalOutcome::Value(Symbol::new(Value::Number(Number::int(structural_hash(&v.borrow()) as i64))))),
            UnOp::TypeOf => {
                let param = self.type_of(&v);
                Ok(super::EvalOutcome::Value(Symbol::new(Value::TypeName(param))))
            }
        }
    }

    fn undeclared_unary(&self, symbol: &str, type_name: &str, token: &Token) -> RaError {
        RaError::catalog(ErrorKind::Dispatch, MessageId::UndeclaredOperator, &[symbol, type_name], token, self.stack.clone())
    }

    pub(crate) fn eval_range(&mut self, a: &Instruction, b: &Instruction, step: Option<&Instruction>, inclusive: bool, scope: ScopeKey, token: &Token) -> Result<super::EvalOutcome, RaError> {
        let av = self.eval_instruction(a, scope, token)?.into_value();
        let bv = self.eval_instruction(b, scope, token)?.into_value();
        let sv = match step {
            Some(s) => self.eval_instruction(s, scope, token)?.into_value(),
            None => Symbol::new(Value::Number(Number::int(1))),
        };
        let (start, end, step_n) = match (&*av.borrow(), &*bv.borrow(), &*sv.borrow()) {
            (Value::Number(x), Value::Number(y), Value::Number(z)) => (*x, *y, *z),
            _ => return Err(self.not_callable("range bounds", token)),
        };
        let ascending = step_n.as_f64() >= 0.0;
        let mut items = Vec::new();
        let mut cur = start;
        loop {
            let in_range = match (ascending, inclusive) {
                (true, true) => cur.as_f64() <= end.as_f64(),
                (true, false) => cur.as_f64() < end.as_f64(),
                (false, true) => cur.as_f64() >= end.as_f64(),
                (false, false) => cur.as_f64() > end.as_f64(),
            };
            if !in_range {
                break;
            }
            items.push(Symbol::new(Value::Number(cur)));
            cur = cur + step_n;
        }
        Ok(super::EvalOutcome::Value(Symbol::new(Value::Array(items))))
    }

    pub(crate) fn lookup_scope_hook(&self, scope: ScopeKey, hash: Hash) -> Option<Symbol> {
        let sym = self.arena.resolve_var(scope, hash)?;
        if matches!(&*sym.borrow(), Value::Function(_)) {
            Some(sym.clone())
        } else {
            None
        }
    }

    /// Converts a value to display text (spec.md §3's implicit `->String`
    /// used by `throw`, dictionary keys, and array/dictionary rendering).
    /// Objects route through the same `->String` cast hook `CastTo` uses.
    pub(crate) fn stringify(&mut self, v: &Symbol, scope: ScopeKey, token: &Token) -> Result<String, RaError> {
        match &*v.borrow() {
            Value::Nil => return Ok("nil".to_string()),
            Value::Boolean(b) => return Ok(b.to_string()),
            Value::Number(n) => return Ok(n.to_string()),
            Value::String(s) => return Ok(s.clone()),
            _ => {}
        }
        let snapshot = v.borrow().clone();
        match snapshot {
            Value::Array(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in &items {
                    parts.push(self.stringify(item, scope, token)?);
                }
                Ok(format!("[{}]", parts.join(", ")))
            }
            Value::Dictionary(d) => {
                let mut parts = Vec::new();
                for (k, val) in d.iter() {
                    parts.push(format!("{}: {}", k, self.stringify(val, scope, token)?));
                }
                Ok(format!("{{{}}}", parts.join(", ")))
            }
            Value::Object(_) => {
                let string_hash = self.interner.intern("String");
                let cast = self.cast_to(v, &[string_hash], scope, token)?;
                match &*cast.borrow() {
                    Value::String(s) => Ok(s.clone()),
                    other => Ok(other.type_name().to_string()),
                }
            }
            Value::Function(_) => Ok("<function>".to_string()),
            Value::TypeName(_) => Ok("<type>".to_string()),
            Value::Pointer(_) => Ok("<pointer>".to_string()),
            Value::Nil | Value::Boolean(_) | Value::Number(_) | Value::String(_) => unreachable!(),
        }
    }

    /// Builds the `Parameter` describing `v`'s runtime type — the payload
    /// of `typeof x` / `#x`'s TypeName result (spec.md §3 "TypeName").
    pub(crate) fn type_of(&self, v: &Symbol) -> Parameter {
        let wk = crate::value::builtin_type_hash(&self.interner);
        match &*v.borrow() {
            Value::Nil => Parameter { base: vec![wk.nil], qualifiers: vec![] },
            Value::Boolean(_) => Parameter { base: vec![wk.boolean], qualifiers: vec![] },
            Value::Number(_) => Parameter { base: vec![wk.number], qualifiers: vec![] },
            Value::String(_) => Parameter { base: vec![wk.string], qualifiers: vec![] },
            Value::Array(_) => Parameter { base: vec![wk.array], qualifiers: vec![] },
            Value::Dictionary(_) => Parameter { base: vec![wk.dictionary], qualifiers: vec![] },
            Value::Function(_) => Parameter { base: vec![wk.function], qualifiers: vec![] },
            Value::TypeName(_) => Parameter { base: vec![wk.type_name], qualifiers: vec![] },
            Value::Pointer(_) => Parameter { base: vec![wk.pointer], qualifiers: vec![] },
            Value::Object(key) => {
                let name = self.arena.get(*key).and_then(|d| d.name_trace.last().copied()).unwrap_or(wk.object);
                Parameter { base: vec![name], qualifiers: vec![] }
            }
        }
    }
}
