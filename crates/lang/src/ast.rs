//! Abstract syntax tree.
//!
//! Every node owns the [`Token`] it was built from (for diagnostics) and a
//! snapshot of the parser's scope-path at the point it was parsed, so
//! constant folding ([`Expr::fold`]) can tell whether an identifier refers
//! to a local (never foldable) or to an outer constant.

use std::rc::Rc;

use ra_core::Number;

use crate::parser::ConstRegistry;
use crate::token::Token;

/// A fully-qualified lexical path, outermost scope first. The parser
/// snapshots this onto every node it builds.
pub type ScopePath = Rc<Vec<u64>>;

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub by_ref: bool,
    pub type_path: Option<Vec<String>>,
    pub type_args: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum Signature {
    Fixed(Vec<Param>),
    Variadic,
}

#[derive(Debug, Clone)]
pub struct FunctionLit {
    pub name: Option<String>,
    pub signature: Signature,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FDiv,
    Mod,
    Pow,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    PureEq,
    PureNe,
    BAnd,
    BXor,
    BOr,
    And,
    Or,
    RangeExc,
    RangeInc,
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Plus,
    Neg,
    Not,
    BNot,
    Hash,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundOp {
    Add,
    Sub,
    Mul,
    Div,
    FDiv,
    Mod,
    Pow,
    BOr,
    BAnd,
    BXor,
    Shl,
    Shr,
    Concat,
    Broadcast,
    And,
    Or,
}

#[derive(Debug, Clone)]
pub struct MatchArm {
    pub labels: Vec<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Nil,
    True,
    False,
    Number(Number),
    Str(String),
    Identifier(String),
    This,
    Array(Vec<Expr>),
    Dictionary(Vec<(Expr, Expr)>),
    FunctionLit(Rc<FunctionLit>),
    TypeName(Vec<String>, Vec<Expr>),

    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    New(Box<Expr>, Vec<Expr>),

    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Range(Box<Expr>, Box<Expr>, Option<Box<Expr>>, bool /* inclusive */),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Cast(Box<Expr>, Vec<String>),

    Assign(Box<Expr>, Box<Expr>),
    CompoundAssign(CompoundOp, Box<Expr>, Box<Expr>),
    Declare(Box<Expr>, Box<Expr>),

    Delete(Box<Expr>, Box<Expr>),

    Alloc(Box<Expr>, Option<Box<Expr>>),
    Length(Box<Expr>),
    Parse(Box<Expr>),
    CharN(Box<Expr>),
    Chars(Box<Expr>),

    /// A node that has been constant-folded: its value is already known.
    Container(ConstValue),
}

/// A compile-time-evaluated value, produced by [`Expr::fold`]. Kept
/// independent of `ra_runtime::Value` so this crate has no evaluator
/// dependency; the runtime translates these into real `Value`s.
#[derive(Debug, Clone)]
pub enum ConstValue {
    Nil,
    Boolean(bool),
    Number(Number),
    Str(String),
    Array(Vec<ConstValue>),
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub token: Token,
    pub scope_path: ScopePath,
}

impl Expr {
    pub fn new(kind: ExprKind, token: Token, scope_path: ScopePath) -> Self {
        Expr { kind, token, scope_path }
    }

    /// Whether this node *could* be constant — every input is itself
    /// constant. Literals, and compounds of literals, qualify. A node
    /// qualifying here still must evaluate without error in an empty scope
    /// before `fold` actually replaces it with a `Container`.
    pub fn is_const(&self) -> bool {
        match &self.kind {
            ExprKind::Nil
            | ExprKind::True
            | ExprKind::False
            | ExprKind::Number(_)
            | ExprKind::Str(_)
            | ExprKind::Container(_) => true,
            ExprKind::Array(items) => items.iter().all(Expr::is_const),
            ExprKind::Unary(_, e) => e.is_const(),
            ExprKind::Binary(_, a, b) => a.is_const() && b.is_const(),
            ExprKind::Identifier(_) => false, // resolved against the const registry separately
            _ => false,
        }
    }

    /// Folds this node and its children against `consts`, the registry of
    /// `const NAME = EXPR;` / `enum { ... }` bindings visible from
    /// `self.scope_path`. Identifier nodes resolve by walking the path
    /// outward until a match is found; everything else recurses into its
    /// children first (bottom-up folding) then checks `is_const`.
    ///
    /// Compound assignments are expanded here, before folding proper:
    /// `x += y` becomes `x = x + y`.
    pub fn fold(self, consts: &ConstRegistry) -> Expr {
        let token = self.token.clone();
        let scope_path = self.scope_path.clone();

        let kind = match self.kind {
            ExprKind::Identifier(name) => {
                if let Some(value) = consts.resolve(&name, &scope_path) {
                    ExprKind::Container(value)
                } else {
                    ExprKind::Identifier(name)
                }
            }
            ExprKind::Array(items) => {
                let folded: Vec<Expr> = items.into_iter().map(|e| e.fold(consts)).collect();
                if folded.iter().all(|e| matches!(e.kind, ExprKind::Container(_))) {
                    let values = folded
                        .into_iter()
                        .map(|e| match e.kind {
                            ExprKind::Container(v) => v,
                            _ => unreachable!(),
                        })
                        .collect();
                    ExprKind::Container(ConstValue::Array(values))
                } else {
                    ExprKind::Array(folded)
                }
            }
            ExprKind::Unary(op, inner) => {
                let inner = inner.fold(consts);
                if let ExprKind::Container(v) = &inner.kind {
                    match fold_unary(op, v) {
                        Some(folded) => ExprKind::Container(folded),
                        None => ExprKind::Unary(op, Box::new(inner)),
                    }
                } else {
                    ExprKind::Unary(op, Box::new(inner))
                }
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let lhs = lhs.fold(consts);
                let rhs = rhs.fold(consts);
                if let (ExprKind::Container(a), ExprKind::Container(b)) = (&lhs.kind, &rhs.kind) {
                    match fold_binary(op, a, b) {
                        Some(folded) => ExprKind::Container(folded),
                        None => ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
                    }
                } else {
                    ExprKind::Binary(op, Box::new(lhs), Box::new(rhs))
                }
            }
            ExprKind::CompoundAssign(op, lhs, rhs) => {
                // Expand `x op= y` into `x = x op y` before further folding,
                // as the source-language semantics specify.
                let expanded = ExprKind::Assign(
                    lhs.clone(),
                    Box::new(Expr::new(
                        ExprKind::Binary(compound_to_binop(op), lhs, rhs),
                        token.clone(),
                        scope_path.clone(),
                    )),
                );
                return Expr::new(expanded, token, scope_path).fold(consts);
            }
            ExprKind::Ternary(c, t, e) => {
                ExprKind::Ternary(Box::new(c.fold(consts)), Box::new(t.fold(consts)), Box::new(e.fold(consts)))
            }
            ExprKind::Index(a, b) => ExprKind::Index(Box::new(a.fold(consts)), Box::new(b.fold(consts))),
            ExprKind::Call(callee, args) => {
                ExprKind::Call(Box::new(callee.fold(consts)), args.into_iter().map(|e| e.fold(consts)).collect())
            }
            ExprKind::FunctionLit(lit) => ExprKind::FunctionLit(Rc::new(fold_function_lit(consts, &lit))),
            ExprKind::Nil => ExprKind::Container(ConstValue::Nil),
            ExprKind::True => ExprKind::Container(ConstValue::Boolean(true)),
            ExprKind::False => ExprKind::Container(ConstValue::Boolean(false)),
            ExprKind::Number(n) => ExprKind::Container(ConstValue::Number(n)),
            ExprKind::Str(s) => ExprKind::Container(ConstValue::Str(s)),
            other => other,
        };

        Expr::new(kind, token, scope_path)
    }
}

/// Folds a function/lambda literal's body against `consts` (spec.md §4.2:
/// a constant's substitution reaches into function bodies, not just
/// top-level statements).
pub fn fold_function_lit(consts: &ConstRegistry, lit: &FunctionLit) -> FunctionLit {
    FunctionLit { name: lit.name.clone(), signature: lit.signature.clone(), body: fold_block(consts, lit.body.clone()) }
}

/// Folds every statement in `stmts` against `consts`.
pub fn fold_block(consts: &ConstRegistry, stmts: Vec<Stmt>) -> Vec<Stmt> {
    stmts.into_iter().map(|s| fold_stmt(consts, s)).collect()
}

/// Folds one statement's expressions (and any nested blocks) against
/// `consts`.
pub fn fold_stmt(consts: &ConstRegistry, stmt: Stmt) -> Stmt {
    match stmt {
        Stmt::Expr(e) => Stmt::Expr(e.fold(consts)),
        Stmt::ConstDecl(name, e) => Stmt::ConstDecl(name, e.fold(consts)),
        Stmt::Return(e) => Stmt::Return(e.map(|e| e.fold(consts))),
        Stmt::Refer(e) => Stmt::Refer(e.fold(consts)),
        Stmt::Throw(e) => Stmt::Throw(e.fold(consts)),
        Stmt::Def(f) => Stmt::Def(Rc::new(fold_function_lit(consts, &f))),
        Stmt::If { branches, else_branch } => Stmt::If {
            branches: branches.into_iter().map(|(c, body)| (c.fold(consts), fold_block(consts, body))).collect(),
            else_branch: else_branch.map(|b| fold_block(consts, b)),
        },
        Stmt::While { cond, body } => Stmt::While { cond: cond.fold(consts), body: fold_block(consts, body) },
        Stmt::For { var, iter, body } => Stmt::For { var, iter: iter.fold(consts), body: fold_block(consts, body) },
        Stmt::Each { var, iter, where_clause, do_clause } => Stmt::Each {
            var,
            iter: iter.fold(consts),
            where_clause: where_clause.map(|e| e.fold(consts)),
            do_clause: do_clause.map(|e| e.fold(consts)),
        },
        Stmt::Switch { scrutinee, arms, else_branch } => Stmt::Switch {
            scrutinee: scrutinee.fold(consts),
            arms: arms
                .into_iter()
                .map(|arm| MatchArm {
                    labels: arm.labels.into_iter().map(|e| e.fold(consts)).collect(),
                    body: fold_block(consts, arm.body),
                })
                .collect(),
            else_branch: else_branch.map(|b| fold_block(consts, b)),
        },
        Stmt::TryCatch { try_body, catch_var, catch_body } => {
            Stmt::TryCatch { try_body: fold_block(consts, try_body), catch_var, catch_body: fold_block(consts, catch_body) }
        }
        Stmt::StructDef { name, base, kind, body } => {
            Stmt::StructDef { name, base, kind, body: fold_block(consts, body) }
        }
        Stmt::Block(body) => Stmt::Block(fold_block(consts, body)),
        other => other,
    }
}

fn compound_to_binop(op: CompoundOp) -> BinOp {
    match op {
        CompoundOp::Add => BinOp::Add,
        CompoundOp::Sub => BinOp::Sub,
        CompoundOp::Mul => BinOp::Mul,
        CompoundOp::Div => BinOp::Div,
        CompoundOp::FDiv => BinOp::FDiv,
        CompoundOp::Mod => BinOp::Mod,
        CompoundOp::Pow => BinOp::Pow,
        CompoundOp::BOr => BinOp::BOr,
        CompoundOp::BAnd => BinOp::BAnd,
        CompoundOp::BXor => BinOp::BXor,
        CompoundOp::Shl => BinOp::Shl,
        CompoundOp::Shr => BinOp::Shr,
        CompoundOp::Concat => BinOp::Concat,
        CompoundOp::Broadcast => BinOp::Concat, // `.=` is handled specially by the evaluator
        CompoundOp::And => BinOp::And,
        CompoundOp::Or => BinOp::Or,
    }
}

fn fold_unary(op: UnOp, v: &ConstValue) -> Option<ConstValue> {
    match (op, v) {
        (UnOp::Neg, ConstValue::Number(n)) => Some(ConstValue::Number(-*n)),
        (UnOp::Plus, ConstValue::Number(n)) => Some(ConstValue::Number(*n)),
        (UnOp::Not, ConstValue::Boolean(b)) => Some(ConstValue::Boolean(!b)),
        _ => None,
    }
}

fn fold_binary(op: BinOp, a: &ConstValue, b: &ConstValue) -> Option<ConstValue> {
    use ConstValue::*;
    match (a, b) {
        (Number(x), Number(y)) => Some(match op {
            BinOp::Add => Number(*x + *y),
            BinOp::Sub => Number(*x - *y),
            BinOp::Mul => Number(*x * *y),
            BinOp::Div => Number(x.div(*y)),
            BinOp::FDiv => Number(x.fdiv(*y)),
            BinOp::Mod => Number(*x % *y),
            BinOp::Pow => Number(x.pow(*y)),
            BinOp::Lt => Boolean(x.partial_cmp_widening(*y)? == std::cmp::Ordering::Less),
            BinOp::Gt => Boolean(x.partial_cmp_widening(*y)? == std::cmp::Ordering::Greater),
            BinOp::Eq | BinOp::PureEq => Boolean(x == y),
            BinOp::Ne | BinOp::PureNe => Boolean(x != y),
            _ => return None,
        }),
        (Str(x), Str(y)) => Some(match op {
            BinOp::Add | BinOp::Concat => Str(format!("{x}{y}")),
            BinOp::Eq | BinOp::PureEq => Boolean(x == y),
            BinOp::Ne | BinOp::PureNe => Boolean(x != y),
            _ => return None,
        }),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    VarDecl(Vec<String>),
    ConstDecl(String, Expr),
    Return(Option<Expr>),
    Refer(Expr),
    Break,
    Continue,
    Throw(Expr),
    Load(String),
    Extern(String),
    Def(Rc<FunctionLit>),
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        else_branch: Option<Vec<Stmt>>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    For {
        var: String,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Each {
        var: String,
        iter: Expr,
        where_clause: Option<Expr>,
        do_clause: Option<Expr>,
    },
    Switch {
        scrutinee: Expr,
        arms: Vec<MatchArm>,
        else_branch: Option<Vec<Stmt>>,
    },
    TryCatch {
        try_body: Vec<Stmt>,
        catch_var: String,
        catch_body: Vec<Stmt>,
    },
    StructDef {
        name: String,
        base: Option<String>,
        kind: StructKind,
        body: Vec<Stmt>,
    },
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructKind {
    Struct,
    Static,
    Virtual,
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }
}
