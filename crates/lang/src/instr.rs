//! Instruction tree: the evaluable form lowered from a folded [`Program`].
//!
//! The original class-per-opcode hierarchy (`Container, Sequence, Scope,
//! DeclareVars, Declare, Variable, GetThis, Index, Inner, Call,
//! CallWithInner, CallOp, Extern, If, While, For, Each, Switch, TryCatch,
//! Throw, Return, Refer, New, Class, Define, VargDefine, Length, Alloc,
//! Parse, CharN, CharS, CastTo, Type, Hash, SetIndex, Map, Until, <binary
//! ops>, <unary ops>, Concat, Delete`) collapses here into one sum type;
//! each variant owns its children and the originating [`Token`] by value.

use std::rc::Rc;

use ra_core::{Interner, Number};

use crate::ast::{BinOp, ConstValue, Expr, ExprKind, FunctionLit, Param, Program, Signature, Stmt, StructKind, UnOp};
use crate::token::Token;

#[derive(Debug, Clone)]
pub enum Literal {
    Nil,
    Boolean(bool),
    Number(Number),
    Str(String),
    Array(Vec<Literal>),
}

impl From<ConstValue> for Literal {
    fn from(v: ConstValue) -> Self {
        match v {
            ConstValue::Nil => Literal::Nil,
            ConstValue::Boolean(b) => Literal::Boolean(b),
            ConstValue::Number(n) => Literal::Number(n),
            ConstValue::Str(s) => Literal::Str(s),
            ConstValue::Array(items) => Literal::Array(items.into_iter().map(Literal::from).collect()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledParam {
    pub hash: u64,
    pub by_ref: bool,
    pub type_path: Option<Vec<u64>>,
    pub type_args: Vec<u64>,
}

#[derive(Debug, Clone)]
pub enum CompiledSignature {
    Fixed(Vec<CompiledParam>),
    Variadic,
}

#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub name_hash: u64,
    pub signature: CompiledSignature,
    pub body: Rc<Vec<Instruction>>,
}

#[derive(Debug, Clone)]
pub struct MatchArm {
    pub labels: Vec<Instruction>,
    pub body: Rc<Vec<Instruction>>,
}

#[derive(Debug, Clone)]
pub enum Instruction {
    Container(Literal),
    Sequence(Vec<Instruction>),

    Variable(u64),
    GetThis,
    DeclareVars(Vec<u64>),
    Declare(u64, Box<Instruction>),

    Index(Box<Instruction>, Box<Instruction>),
    SetIndex(Box<Instruction>, Box<Instruction>, Box<Instruction>),
    Inner(Box<Instruction>, u64),

    Call(Box<Instruction>, Vec<Instruction>),
    New(Box<Instruction>, Vec<Instruction>),

    Define(Rc<CompiledFunction>),
    Lambda(Rc<CompiledFunction>),

    Class {
        name: u64,
        base: Option<u64>,
        kind: ClassKind,
        body: Rc<Vec<Instruction>>,
    },

    If {
        branches: Vec<(Instruction, Vec<Instruction>)>,
        else_branch: Option<Vec<Instruction>>,
    },
    While {
        cond: Box<Instruction>,
        body: Vec<Instruction>,
    },
    Until {
        start: Box<Instruction>,
        end: Box<Instruction>,
        step: Option<Box<Instruction>>,
        var: u64,
        body: Vec<Instruction>,
    },
    Each {
        var: u64,
        iter: Box<Instruction>,
        where_clause: Option<Box<Instruction>>,
        do_clause: Option<Box<Instruction>>,
    },
    Switch {
        scrutinee: Box<Instruction>,
        arms: Vec<MatchArm>,
        else_branch: Option<Vec<Instruction>>,
    },
    TryCatch {
        try_body: Vec<Instruction>,
        catch_var: u64,
        catch_body: Vec<Instruction>,
    },

    Throw(Box<Instruction>),
    Return(Option<Box<Instruction>>),
    Refer(Box<Instruction>),
    Break,
    Continue,

    Assign(Box<Instruction>, Box<Instruction>),
    Delete(Box<Instruction>, Box<Instruction>),

    Alloc(Box<Instruction>, Option<Box<Instruction>>),
    Length(Box<Instruction>),
    Parse(Box<Instruction>),
    CharN(Box<Instruction>),
    Chars(Box<Instruction>),
    CastTo(Box<Instruction>, Vec<u64>),
    TypeOf(Box<Instruction>),
    Hash(Box<Instruction>),

    Array(Vec<Instruction>),
    Map(Vec<(Instruction, Instruction)>),

    Binary(BinOp, Box<Instruction>, Box<Instruction>),
    Unary(UnOp, Box<Instruction>),
    Range(Box<Instruction>, Box<Instruction>, Option<Box<Instruction>>, bool),

    /// A `$Base.Path<Arg, ...>` type-name literal (spec.md §3 "TypeName"):
    /// base path hashes, then qualifier-argument path hashes. Kept separate
    /// from `CastTo` — both used to funnel through one variant keyed on a
    /// `Nil` sentinel inner, which made a real `nil as T` cast and a type
    /// literal indistinguishable to the evaluator.
    TypeLiteral(Vec<u64>, Vec<u64>),

    Extern(String),
    Load(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Struct,
    Static,
    Virtual,
}

/// Best-effort source position for a top-level statement, used by the
/// evaluator to attach an approximate location to a fatal raised anywhere
/// while running that statement (spec.md §4.5 wants every node to carry its
/// own token; tracking one per top-level statement instead of threading a
/// `Token` through every `Instruction` variant trades precision for a much
/// simpler lowering pass — see DESIGN.md). `None` means the statement has no
/// token of its own (`break;`, `var x;`, …): the evaluator keeps whatever
/// position was last seen.
fn stmt_token(stmt: &Stmt) -> Option<Token> {
    match stmt {
        Stmt::Expr(e) | Stmt::Refer(e) | Stmt::Throw(e) | Stmt::ConstDecl(_, e) => Some(e.token.clone()),
        Stmt::Return(Some(e)) => Some(e.token.clone()),
        Stmt::If { branches, .. } => branches.first().map(|(c, _)| c.token.clone()),
        Stmt::While { cond, .. } => Some(cond.token.clone()),
        Stmt::For { iter, .. } | Stmt::Each { iter, .. } => Some(iter.token.clone()),
        Stmt::Switch { scrutinee, .. } => Some(scrutinee.token.clone()),
        Stmt::TryCatch { try_body, catch_body, .. } => {
            try_body.iter().find_map(stmt_token).or_else(|| catch_body.iter().find_map(stmt_token))
        }
        Stmt::StructDef { body, .. } | Stmt::Block(body) => body.iter().find_map(stmt_token),
        Stmt::Def(_)
        | Stmt::Return(None)
        | Stmt::Break
        | Stmt::Continue
        | Stmt::VarDecl(_)
        | Stmt::Load(_)
        | Stmt::Extern(_) => None,
    }
}

pub struct LoweredProgram {
    pub instructions: Vec<Instruction>,
    /// Parallel to `instructions`: the approximate source position of each
    /// top-level statement.
    pub tokens: Vec<Option<Token>>,
}

pub fn lower_program(program: Program, interner: &mut Interner) -> LoweredProgram {
    let tokens = program.statements.iter().map(stmt_token).collect();
    let instructions = program.statements.into_iter().map(|s| lower_stmt(s, interner)).collect();
    LoweredProgram { instructions, tokens }
}

fn lower_block(stmts: Vec<Stmt>, interner: &mut Interner) -> Vec<Instruction> {
    stmts.into_iter().map(|s| lower_stmt(s, interner)).collect()
}

fn lower_stmt(stmt: Stmt, interner: &mut Interner) -> Instruction {
    match stmt {
        Stmt::Expr(e) => lower_expr(e, interner),
        Stmt::VarDecl(names) => Instruction::DeclareVars(names.iter().map(|n| interner.intern(n)).collect()),
        // Folding has already substituted every reference to `name`
        // elsewhere in the program with its value; binding it here too
        // means a constant stays resolvable even where folding can't reach
        // (e.g. a name built dynamically through `parse(s)` in the same
        // scope).
        Stmt::ConstDecl(name, e) => Instruction::Declare(interner.intern(&name), Box::new(lower_expr(e, interner))),
        Stmt::Return(e) => Instruction::Return(e.map(|e| Box::new(lower_expr(e, interner)))),
        Stmt::Refer(e) => Instruction::Refer(Box::new(lower_expr(e, interner))),
        Stmt::Break => Instruction::Break,
        Stmt::Continue => Instruction::Continue,
        Stmt::Throw(e) => Instruction::Throw(Box::new(lower_expr(e, interner))),
        Stmt::Load(path) => Instruction::Load(path),
        Stmt::Extern(path) => Instruction::Extern(path),
        Stmt::Def(f) => Instruction::Define(Rc::new(lower_function(&f, interner))),
        Stmt::If { branches, else_branch } => Instruction::If {
            branches: branches
                .into_iter()
                .map(|(c, body)| (lower_expr(c, interner), lower_block(body, interner)))
                .collect(),
            else_branch: else_branch.map(|b| lower_block(b, interner)),
        },
        Stmt::While { cond, body } => {
            Instruction::While { cond: Box::new(lower_expr(cond, interner)), body: lower_block(body, interner) }
        }
        Stmt::For { var, iter, body } => {
            let var_hash = interner.intern(&var);
            match iter.kind {
                ExprKind::Range(start, end, step, _inclusive) => Instruction::Until {
                    start: Box::new(lower_expr(*start, interner)),
                    end: Box::new(lower_expr(*end, interner)),
                    step: step.map(|s| Box::new(lower_expr(*s, interner))),
                    var: var_hash,
                    body: lower_block(body, interner),
                },
                other => Instruction::Each {
                    var: var_hash,
                    iter: Box::new(lower_expr(Expr { kind: other, ..iter }, interner)),
                    where_clause: None,
                    do_clause: Some(Box::new(Instruction::Sequence(lower_block(body, interner)))),
                },
            }
        }
        Stmt::Each { var, iter, where_clause, do_clause } => Instruction::Each {
            var: interner.intern(&var),
            iter: Box::new(lower_expr(iter, interner)),
            where_clause: where_clause.map(|e| Box::new(lower_expr(e, interner))),
            do_clause: do_clause.map(|e| Box::new(lower_expr(e, interner))),
        },
        Stmt::Switch { scrutinee, arms, else_branch } => Instruction::Switch {
            scrutinee: Box::new(lower_expr(scrutinee, interner)),
            arms: arms
                .into_iter()
                .map(|arm| crate::instr::MatchArm {
                    labels: arm.labels.into_iter().map(|e| lower_expr(e, interner)).collect(),
                    body: Rc::new(lower_block(arm.body, interner)),
                })
                .collect(),
            else_branch: else_branch.map(|b| lower_block(b, interner)),
        },
        Stmt::TryCatch { try_body, catch_var, catch_body } => Instruction::TryCatch {
            try_body: lower_block(try_body, interner),
            catch_var: interner.intern(&catch_var),
            catch_body: lower_block(catch_body, interner),
        },
        Stmt::StructDef { name, base, kind, body } => Instruction::Class {
            name: interner.intern(&name),
            base: base.map(|b| interner.intern(&b)),
            kind: match kind {
                StructKind::Struct => ClassKind::Struct,
                StructKind::Static => ClassKind::Static,
                StructKind::Virtual => ClassKind::Virtual,
            },
            body: Rc::new(lower_block(body, interner)),
        },
        Stmt::Block(stmts) => Instruction::Sequence(lower_block(stmts, interner)),
    }
}

fn lower_params(params: &[Param], interner: &mut Interner) -> Vec<CompiledParam> {
    params
        .iter()
        .map(|p| CompiledParam {
            hash: interner.intern(&p.name),
            by_ref: p.by_ref,
            type_path: p.type_path.as_ref().map(|path| path.iter().map(|s| interner.intern(s)).collect()),
            type_args: p.type_args.iter().map(|s| interner.intern(s)).collect(),
        })
        .collect()
}

fn lower_function(f: &FunctionLit, interner: &mut Interner) -> CompiledFunction {
    let name_hash = f.name.as_deref().map(|n| interner.intern(n)).unwrap_or(ra_core::ANONYMOUS);
    let signature = match &f.signature {
        Signature::Fixed(params) => CompiledSignature::Fixed(lower_params(params, interner)),
        Signature::Variadic => CompiledSignature::Variadic,
    };
    let body = Rc::new(lower_block(f.body.clone(), interner));
    CompiledFunction { name_hash, signature, body }
}

fn lower_expr(expr: Expr, interner: &mut Interner) -> Instruction {
    match expr.kind {
        ExprKind::Nil => Instruction::Container(Literal::Nil),
        ExprKind::True => Instruction::Container(Literal::Boolean(true)),
        ExprKind::False => Instruction::Container(Literal::Boolean(false)),
        ExprKind::Number(n) => Instruction::Container(Literal::Number(n)),
        ExprKind::Str(s) => Instruction::Container(Literal::Str(s)),
        ExprKind::Container(v) => Instruction::Container(Literal::from(v)),
        ExprKind::Identifier(name) => Instruction::Variable(interner.intern(&name)),
        ExprKind::This => Instruction::GetThis,
        ExprKind::Array(items) => Instruction::Array(items.into_iter().map(|e| lower_expr(e, interner)).collect()),
        ExprKind::Dictionary(entries) => Instruction::Map(
            entries.into_iter().map(|(k, v)| (lower_expr(k, interner), lower_expr(v, interner))).collect(),
        ),
        ExprKind::FunctionLit(f) => Instruction::Lambda(Rc::new(lower_function(&f, interner))),
        ExprKind::TypeName(path, args) => Instruction::TypeLiteral(
            path.iter().map(|s| interner.intern(s)).collect(),
            args.into_iter()
                .map(|e| if let ExprKind::Identifier(name) = e.kind { interner.intern(&name) } else { 0 })
                .collect(),
        ),
        ExprKind::Index(a, b) => Instruction::Index(Box::new(lower_expr(*a, interner)), Box::new(lower_expr(*b, interner))),
        ExprKind::Call(callee, args) => Instruction::Call(
            Box::new(lower_expr(*callee, interner)),
            args.into_iter().map(|e| lower_expr(e, interner)).collect(),
        ),
        ExprKind::New(callee, args) => Instruction::New(
            Box::new(lower_expr(*callee, interner)),
            args.into_iter().map(|e| lower_expr(e, interner)).collect(),
        ),
        ExprKind::Unary(op, e) => Instruction::Unary(op, Box::new(lower_expr(*e, interner))),
        ExprKind::Binary(op, a, b) => Instruction::Binary(op, Box::new(lower_expr(*a, interner)), Box::new(lower_expr(*b, interner))),
        ExprKind::Range(a, b, step, inclusive) => Instruction::Range(
            Box::new(lower_expr(*a, interner)),
            Box::new(lower_expr(*b, interner)),
            step.map(|s| Box::new(lower_expr(*s, interner))),
            inclusive,
        ),
        ExprKind::Ternary(c, t, e) => Instruction::If {
            branches: vec![(lower_expr(*c, interner), vec![lower_expr(*t, interner)])],
            else_branch: Some(vec![lower_expr(*e, interner)]),
        },
        ExprKind::Cast(e, path) => {
            Instruction::CastTo(Box::new(lower_expr(*e, interner)), path.iter().map(|s| interner.intern(s)).collect())
        }
        ExprKind::Assign(lhs, rhs) => match lhs.kind {
            ExprKind::Index(a, b) => Instruction::SetIndex(
                Box::new(lower_expr(*a, interner)),
                Box::new(lower_expr(*b, interner)),
                Box::new(lower_expr(*rhs, interner)),
            ),
            _ => Instruction::Assign(Box::new(lower_expr(*lhs, interner)), Box::new(lower_expr(*rhs, interner))),
        },
        ExprKind::CompoundAssign(..) => unreachable!("compound assignment is expanded during fold"),
        ExprKind::Declare(lhs, rhs) => {
            if let ExprKind::Identifier(name) = lhs.kind {
                Instruction::Declare(interner.intern(&name), Box::new(lower_expr(*rhs, interner)))
            } else {
                Instruction::Assign(Box::new(lower_expr(*lhs, interner)), Box::new(lower_expr(*rhs, interner)))
            }
        }
        ExprKind::Delete(target, key) => {
            Instruction::Delete(Box::new(lower_expr(*target, interner)), Box::new(lower_expr(*key, interner)))
        }
        ExprKind::Alloc(n, fill) => {
            Instruction::Alloc(Box::new(lower_expr(*n, interner)), fill.map(|f| Box::new(lower_expr(*f, interner))))
        }
        ExprKind::Length(e) => Instruction::Length(Box::new(lower_expr(*e, interner))),
        ExprKind::Parse(e) => Instruction::Parse(Box::new(lower_expr(*e, interner))),
        ExprKind::CharN(e) => Instruction::CharN(Box::new(lower_expr(*e, interner))),
        ExprKind::Chars(e) => Instruction::Chars(Box::new(lower_expr(*e, interner))),
    }
}
