//! The tagged-sum `Value` type, its `Dictionary` backing store, and the
//! `Parameter`/`Signature` type-descriptor machinery used by both casts
//! (spec.md §4.4 "Cast") and call dispatch (spec.md §4.4 "Call").

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use ra_core::{Hash, Interner, Number};

use crate::function::FunctionTable;
use crate::scope::{ScopeArena, ScopeKey};
use crate::symbol::Symbol;

/// An opaque host-owned resource crossing the `Pointer` escape hatch
/// (spec.md §3 "Value", §5 "Pointer values wrap opaque host resources").
/// Dropping the last `Rc` runs the owner's destructor.
pub trait PointerResource: fmt::Debug {
    fn type_name(&self) -> &str;
}

/// spec.md's "dictionary iteration order" Open Question is resolved as
/// insertion-preserving (SPEC_FULL.md Open Questions #2): `order` is the
/// authoritative iteration sequence, `map` gives O(1) lookup.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    order: Vec<String>,
    map: HashMap<String, Symbol>,
}

impl Dict {
    pub fn new() -> Self {
        Dict::default()
    }

    pub fn get(&self, key: &str) -> Option<&Symbol> {
        self.map.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn insert(&mut self, key: String, value: Symbol) {
        if !self.map.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.map.insert(key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Symbol> {
        let removed = self.map.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }

    /// Live entries, with nil-valued keys pruned on read (spec.md §3
    /// "Dictionary"). Read access — not removal — is where nils vanish, so
    /// a previously-nil'd key still counts toward `contains_key`/`remove`
    /// bookkeeping but never shows up to a reader.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Symbol)> {
        self.order.iter().filter_map(move |k| {
            let v = self.map.get(k)?;
            if matches!(&*v.borrow(), Value::Nil) {
                None
            } else {
                Some((k.as_str(), v))
            }
        })
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// First-class type descriptor (spec.md §3 "Parameter"): a dotted base-type
/// chain (e.g. `Object.Foo.Bar`) plus an ordered list of generic-argument
/// qualifiers. Used both as the payload of `Value::TypeName` (the `$x`
/// built-in) and, compiled from a function's declared parameter types, as
/// the scoring key for overload dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameter {
    pub base: Vec<Hash>,
    pub qualifiers: Vec<Hash>,
}

impl Parameter {
    pub fn any() -> Self {
        Parameter::default()
    }

    pub fn is_any(&self) -> bool {
        self.base.is_empty()
    }
}

/// An ordered list of `Parameter`s — one function overload's declared
/// signature. `validity` is the sum of per-position match scores (spec.md
/// §3 "Signature"), `0` meaning "does not apply at this call site".
#[derive(Debug, Clone, Default)]
pub struct Signature(pub Vec<Parameter>);

/// 0 = no match, 1 = `Any`, 2 = base only, 3 = base + all qualifiers.
pub type Validity = u32;

impl Signature {
    pub fn validity(&self, args: &[Symbol], interner: &Interner, arena: &ScopeArena) -> Validity {
        if self.0.len() != args.len() {
            return 0;
        }
        let mut total = 0u32;
        for (param, arg) in self.0.iter().zip(args) {
            let score = score_match(param, arg, interner, arena);
            if score == 0 {
                return 0;
            }
            total += score as u32;
        }
        total
    }
}

/// Scores one argument against one declared parameter type. See spec.md §3
/// "Parameter" for the four score bands; user-object matching walks the
/// ancestor chain a struct's `extensions` list records (spec.md §3
/// "Scope").
pub fn score_match(param: &Parameter, arg: &Symbol, interner: &Interner, arena: &ScopeArena) -> u8 {
    if param.is_any() {
        return 1;
    }
    let head = param.base[0];
    let wk = builtin_type_hash(interner);
    let matches_builtin = |want: Hash| head == want;

    let base_ok = match &*arg.borrow() {
        Value::Number(_) => matches_builtin(wk.number),
        Value::String(_) => matches_builtin(wk.string),
        Value::Boolean(_) => matches_builtin(wk.boolean),
        Value::Array(_) => matches_builtin(wk.array),
        Value::Dictionary(_) => matches_builtin(wk.dictionary),
        Value::Function(_) => matches_builtin(wk.function),
        Value::TypeName(_) => matches_builtin(wk.type_name),
        Value::Pointer(_) => matches_builtin(wk.pointer),
        Value::Nil => matches_builtin(wk.nil),
        Value::Object(key) => {
            if let Some(data) = arena.get(*key) {
                data.name_trace.last().copied() == Some(head) || data.extensions.contains(&head)
            } else {
                false
            }
        }
    };

    if !base_ok {
        return 0;
    }
    if param.qualifiers.is_empty() {
        3
    } else {
        // Qualifier depth-matching (e.g. `Array<Number>`) is approximated:
        // an array/dictionary whose elements all satisfy the first
        // qualifier scores an exact match; anything else falls back to a
        // base-only match rather than failing outright.
        let deep_ok = match &*arg.borrow() {
            Value::Array(items) => items.iter().all(|s| {
                let elem_param = Parameter { base: vec![param.qualifiers[0]], qualifiers: vec![] };
                score_match(&elem_param, s, interner, arena) > 0
            }),
            _ => false,
        };
        if deep_ok {
            3
        } else {
            2
        }
    }
}

/// Well-known hashes for the builtin type names, interned lazily the first
/// time they are needed (a `Parameter`'s base path is built from the same
/// interner the parser used, so `"Number"`/`"Array"`/… already have stable
/// ids by the time any call site is scored).
pub struct BuiltinTypeHashes {
    pub number: Hash,
    pub string: Hash,
    pub boolean: Hash,
    pub array: Hash,
    pub dictionary: Hash,
    pub object: Hash,
    pub function: Hash,
    pub type_name: Hash,
    pub pointer: Hash,
    pub nil: Hash,
    pub any: Hash,
}

/// Resolving these by string lookup each call is cheap (a `HashMap` hit) and
/// keeps `Interner` itself ignorant of type-name concerns — only
/// `ra-runtime` cares about the cast/dispatch matrix.
pub fn builtin_type_hash(interner: &Interner) -> BuiltinTypeHashes {
    let lookup = |name: &str| interner.lookup(name).unwrap_or(Hash::MAX);
    BuiltinTypeHashes {
        number: lookup("Number"),
        string: lookup("String"),
        boolean: lookup("Boolean"),
        array: lookup("Array"),
        dictionary: lookup("Dictionary"),
        object: lookup("Object"),
        function: lookup("Function"),
        type_name: lookup("Type"),
        pointer: lookup("Pointer"),
        nil: lookup("Nil"),
        any: lookup("Any"),
    }
}

/// The sum type every expression evaluates to (spec.md §3 "Value").
#[derive(Clone)]
pub enum Value {
    Nil,
    Boolean(bool),
    Number(Number),
    String(String),
    Array(Vec<Symbol>),
    Dictionary(Dict),
    Function(Rc<std::cell::RefCell<FunctionTable>>),
    Object(ScopeKey),
    TypeName(Parameter),
    Pointer(Rc<dyn PointerResource>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "Nil",
            Value::Boolean(_) => "Boolean",
            Value::Number(_) => "Number",
            Value::String(_) => "String",
            Value::Array(_) => "Array",
            Value::Dictionary(_) => "Dictionary",
            Value::Function(_) => "Function",
            Value::Object(_) => "Object",
            Value::TypeName(_) => "Type",
            Value::Pointer(_) => "Pointer",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => n.is_truthy(),
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Dictionary(d) => !d.is_empty(),
            Value::Function(_) | Value::Object(_) | Value::TypeName(_) | Value::Pointer(_) => true,
        }
    }

    /// Deep (value) clone: arrays/dictionaries clone every element
    /// recursively; everything else is already a reference-y leaf (a
    /// `Function`/`Object`/`Pointer` shares its underlying handle, matching
    /// spec.md's "deep for composite values... except" assignment rule,
    /// where "except" names object `set` hooks, handled by the caller
    /// rather than here.
    pub fn deep_clone_value(&self) -> Value {
        match self {
            Value::Array(items) => Value::Array(items.iter().map(Symbol::deep_clone).collect()),
            Value::Dictionary(d) => {
                let mut cloned = Dict::new();
                for (k, v) in d.iter() {
                    cloned.insert(k.to_string(), v.deep_clone());
                }
                Value::Dictionary(cloned)
            }
            other => other.clone(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeKind;

    #[test]
    fn nil_valued_keys_are_pruned_on_read() {
        let mut d = Dict::new();
        d.insert("a".to_string(), Symbol::new(Value::Number(Number::int(1))));
        d.insert("b".to_string(), Symbol::new_nil());
        assert_eq!(d.len(), 1);
        assert!(d.iter().all(|(k, _)| k == "a"));
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut d = Dict::new();
        d.insert("z".to_string(), Symbol::new(Value::Number(Number::int(1))));
        d.insert("a".to_string(), Symbol::new(Value::Number(Number::int(2))));
        let keys: Vec<&str> = d.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn deep_clone_of_array_is_independent() {
        let inner = Symbol::new(Value::Number(Number::int(1)));
        let original = Value::Array(vec![inner.clone()]);
        let cloned = original.deep_clone_value();
        if let Value::Array(items) = &cloned {
            items[0].set(Value::Number(Number::int(99)));
        } else {
            panic!("expected array");
        }
        assert_eq!(inner.borrow().type_name(), "Number");
        match &*inner.borrow() {
            Value::Number(n) => assert_eq!(*n, Number::int(1)),
            _ => panic!("original mutated through clone"),
        }
    }

    #[test]
    fn any_parameter_matches_everything() {
        let interner = Interner::new();
        let mut arena = ScopeArena::new();
        let arg = Symbol::new(Value::Boolean(true));
        assert_eq!(score_match(&Parameter::any(), &arg, &interner, &arena), 1);
        let _ = arena.alloc(ScopeKind::Bounded, None);
    }
}
