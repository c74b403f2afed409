//! The cast matrix for `x -> T` (spec.md §4.4 "Cast"). Every combination
//! not covered by the builtin matrix falls back to a scope-level
//! `-><TypeName>` function, the cast equivalent of the binary-operator
//! dispatch chain's step 5.

use ra_core::{Hash, Number};
use ra_lang::token::Token;

use crate::diagnostics::{ErrorKind, MessageId, RaError};
use crate::engine::Engine;
use crate::scope::ScopeKey;
use crate::symbol::Symbol;
use crate::value::{Dict, Parameter, Value};

fn parse_number_literal(s: &str) -> Option<Number> {
    let trimmed = s.trim();
    if let Some(rest) = trimmed.strip_prefix("0b").or_else(|| trimmed.strip_prefix("0B")) {
        return i64::from_str_radix(rest, 2).ok().map(Number::int);
    }
    if let Some(rest) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return i64::from_str_radix(rest, 16).ok().map(Number::int);
    }
    if trimmed.len() > 1 && trimmed.starts_with('0') && trimmed.chars().nth(1).is_some_and(|c| c.is_ascii_digit()) {
        return i64::from_str_radix(&trimmed[1..], 8).ok().map(Number::int);
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Number::int(i));
    }
    trimmed.parse::<f64>().ok().map(Number::from_f64)
}

impl Engine {
    /// `path` is the dotted type-name path from a `CastTo` instruction; only
    /// its last segment names a builtin target, matching how `TypeLiteral`
    /// and declared parameter types resolve (spec.md §3 "Parameter").
    pub(crate) fn cast_to(&mut self, v: &Symbol, path: &[Hash], scope: ScopeKey, token: &Token) -> Result<Symbol, RaError> {
        let last = match path.last() {
            Some(h) => *h,
            None => return Err(self.unsupported_cast("?", "?", token)),
        };
        let type_name = self.interner.resolve(last).to_string();

        let object_key = match &*v.borrow() {
            Value::Object(key) => Some(*key),
            _ => None,
        };
        if let Some(key) = object_key {
            return self.cast_object(v, key, &type_name, last, scope, token);
        }

        let snapshot = v.borrow().clone();
        if type_name == "String" {
            if let Value::TypeName(p) = &snapshot {
                let text = p.base.iter().map(|h| self.interner.resolve(*h)).collect::<Vec<_>>().join(".");
                return Ok(Symbol::new(Value::String(format!("Type::{text}"))));
            }
            return Ok(Symbol::new(Value::String(self.stringify(v, scope, token)?)));
        }

        let result = match type_name.as_str() {
            "Number" => self.cast_to_number(&snapshot, token)?,
            "Boolean" => Value::Boolean(snapshot.is_truthy()),
            "Array" => self.cast_to_array(&snapshot, token)?,
            "Dictionary" => self.cast_to_dictionary(&snapshot, token)?,
            "Type" => self.cast_to_typename(&snapshot, token)?,
            _ => return self.cast_fallback(v, &type_name, scope, token),
        };
        Ok(Symbol::new(result))
    }

    fn cast_object(&mut self, v: &Symbol, key: ScopeKey, type_name: &str, last: Hash, scope: ScopeKey, token: &Token) -> Result<Symbol, RaError> {
        if type_name == "String" {
            let hook_hash = self.interner.intern("->String");
            if let Some(hook) = self.arena.get(key).and_then(|d| d.vars.get(&hook_hash)).cloned() {
                return self.call_function_value(&hook, vec![], scope, token);
            }
            return Err(self.unsupported_cast("Object", "String", token));
        }
        let own_name = self.arena.get(key).and_then(|d| d.name_trace.last().copied());
        if type_name == "Type" || own_name == Some(last) {
            let base = own_name.map(|n| vec![n]).unwrap_or_default();
            return Ok(Symbol::new(Value::TypeName(Parameter { base, qualifiers: vec![] })));
        }
        self.cast_fallback(v, type_name, scope, token)
    }

    fn cast_fallback(&mut self, v: &Symbol, type_name: &str, scope: ScopeKey, token: &Token) -> Result<Symbol, RaError> {
        let hook_hash = self.interner.intern(&format!("->{type_name}"));
        if let Some(hook) = self.lookup_scope_hook(scope, hook_hash) {
            return self.call_function_value(&hook, vec![v.clone()], scope, token);
        }
        let from_name = v.borrow().type_name().to_string();
        Err(self.unsupported_cast(&from_name, type_name, token))
    }

    fn unsupported_cast(&self, from: &str, to: &str, token: &Token) -> RaError {
        RaError::catalog(ErrorKind::Dispatch, MessageId::UnsupportedCast, &[from, to], token, self.stack.clone())
    }

    fn cast_to_number(&self, v: &Value, token: &Token) -> Result<Value, RaError> {
        match v {
            Value::Number(n) => Ok(Value::Number(*n)),
            Value::Boolean(b) => Ok(Value::Number(Number::int(i64::from(*b)))),
            Value::String(s) => parse_number_literal(s).map(Value::Number).ok_or_else(|| self.unsupported_cast("String", "Number", token)),
            other => Err(self.unsupported_cast(other.type_name(), "Number", token)),
        }
    }

    fn cast_to_array(&self, v: &Value, token: &Token) -> Result<Value, RaError> {
        match v {
            Value::String(s) => Ok(Value::Array(s.chars().map(|c| Symbol::new(Value::String(c.to_string()))).collect())),
            Value::Dictionary(d) => {
                let pairs = d
                    .iter()
                    .map(|(k, val)| Symbol::new(Value::Array(vec![Symbol::new(Value::String(k.to_string())), val.clone()])))
                    .collect();
                Ok(Value::Array(pairs))
            }
            Value::Array(items) => Ok(Value::Array(items.clone())),
            other => Err(self.unsupported_cast(other.type_name(), "Array", token)),
        }
    }

    fn cast_to_dictionary(&self, v: &Value, token: &Token) -> Result<Value, RaError> {
        match v {
            Value::Array(items) => {
                let mut d = Dict::new();
                for (i, item) in items.iter().enumerate() {
                    d.insert(i.to_string(), item.clone());
                }
                Ok(Value::Dictionary(d))
            }
            Value::Dictionary(d) => Ok(Value::Dictionary(d.clone())),
            other => Err(self.unsupported_cast(other.type_name(), "Dictionary", token)),
        }
    }

    fn cast_to_typename(&self, v: &Value, token: &Token) -> Result<Value, RaError> {
        match v {
            Value::TypeName(p) => Ok(Value::TypeName(p.clone())),
            other => Err(self.unsupported_cast(other.type_name(), "Type", token)),
        }
    }
}
