//! Recursive-descent parser.
//!
//! Maintains a scope stack (so every node can snapshot which lexical frame
//! it was parsed in) and a const registry (`const NAME = EXPR;` and
//! `enum { ... }` bindings), both threaded through [`Expr::fold`] after a
//! full [`Program`] has been parsed.

use std::collections::HashMap;
use std::rc::Rc;

use ra_core::{Interner, Number};

use crate::ast::{
    fold_block, BinOp, CompoundOp, ConstValue, Expr, ExprKind, FunctionLit, MatchArm, Param,
    Program, ScopePath, Signature, Stmt, StructKind, UnOp,
};
use crate::error::ParseError;
use crate::lexer::Lexer;
use crate::token::{BuiltinType, Keyword, Operator, Token, TokenKind};

/// Registry of compile-time constants, keyed by the scope path (the same
/// synthetic ids [`Parser::scope_path`] snapshots onto every node) a `const`
/// or `enum` variant was declared at, plus its name. Populated while parsing
/// `const`/`enum` and consulted by [`Expr::fold`] after parsing completes.
#[derive(Default)]
pub struct ConstRegistry {
    values: HashMap<(Vec<u64>, String), ConstValue>,
}

impl ConstRegistry {
    pub fn new() -> Self {
        ConstRegistry::default()
    }

    /// Registers `name` as visible from the scope `path` denotes and every
    /// scope nested under it.
    pub fn define(&mut self, path: &[u64], name: &str, value: ConstValue) {
        self.values.insert((path.to_vec(), name.to_string()), value);
    }

    /// Walks `scope_path` outward (innermost first), at each depth checking
    /// for a binding of `name` registered at exactly that path — the same
    /// key `define` builds, so a reference from inside the declaring scope
    /// or any of its descendants finds it.
    pub fn resolve(&self, name: &str, scope_path: &ScopePath) -> Option<ConstValue> {
        for depth in (0..=scope_path.len()).rev() {
            let prefix = scope_path[..depth].to_vec();
            if let Some(v) = self.values.get(&(prefix, name.to_string())) {
                return Some(v.clone());
            }
        }
        None
    }
}

struct ScopeFrame {
    id: u64,
    locals: Vec<String>,
}

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    interner: &'a mut Interner,
    scopes: Vec<ScopeFrame>,
    next_synthetic_scope: u64,
    pub consts: ConstRegistry,
    /// Nesting depth of `while`/`for`/`each` loop bodies currently being
    /// parsed. `break`/`continue` outside any loop is a compile-time error
    /// (spec.md §8: "a nested break terminates exactly one enclosing
    /// loop") — checked here rather than at runtime since the parser
    /// already knows the answer statically.
    loop_depth: usize,
}

type PResult<T> = Result<T, ParseError>;

impl<'a> Parser<'a> {
    pub fn new(source: &str, file: &str, interner: &'a mut Interner) -> PResult<Self> {
        let tokens = Lexer::new(source, file).tokenize()?;
        Ok(Parser {
            tokens,
            pos: 0,
            interner,
            scopes: vec![ScopeFrame { id: 0, locals: Vec::new() }],
            next_synthetic_scope: 1,
            consts: ConstRegistry::new(),
            loop_depth: 0,
        })
    }

    // -- token stream helpers ------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check_op(&self, op: Operator) -> bool {
        self.peek().is_op(op)
    }

    fn check_kw(&self, kw: Keyword) -> bool {
        self.peek().is_keyword(kw)
    }

    fn eat_op(&mut self, op: Operator) -> bool {
        if self.check_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        if self.check_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: Operator, what: &str) -> PResult<Token> {
        if self.check_op(op) {
            Ok(self.advance())
        } else {
            Err(ParseError::at_token(format!("expected {what}"), self.peek()))
        }
    }

    fn expect_kw(&mut self, kw: Keyword, what: &str) -> PResult<Token> {
        if self.check_kw(kw) {
            Ok(self.advance())
        } else {
            Err(ParseError::at_token(format!("expected {what}"), self.peek()))
        }
    }

    fn expect_identifier(&mut self) -> PResult<String> {
        if let TokenKind::Identifier = self.peek().kind {
            Ok(self.advance().lexeme)
        } else {
            Err(ParseError::at_token("expected identifier", self.peek()))
        }
    }

    // -- scope stack ----------------------------------------------------------

    fn scope_path(&self) -> ScopePath {
        Rc::new(self.scopes.iter().map(|f| f.id).collect())
    }

    fn push_scope(&mut self) {
        let id = self.next_synthetic_scope;
        self.next_synthetic_scope += 1;
        self.scopes.push(ScopeFrame { id, locals: Vec::new() });
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare_local(&mut self, name: &str) {
        if let Some(frame) = self.scopes.last_mut() {
            frame.locals.push(name.to_string());
        }
    }

    // -- entry point ------------------------------------------------------------

    pub fn parse_program(&mut self) -> PResult<Program> {
        let mut program = Program::new();
        while !self.at_eof() {
            program.statements.push(self.parse_statement()?);
        }
        Ok(program)
    }

    /// Parses the whole program and folds every statement's expressions
    /// against the const registry built up while parsing.
    pub fn parse_and_fold(&mut self) -> PResult<Program> {
        let program = self.parse_program()?;
        Ok(Program { statements: fold_block(&self.consts, program.statements) })
    }

    // -- statements ------------------------------------------------------------

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_op(Operator::LBrace, "'{'")?;
        self.push_scope();
        let mut stmts = Vec::new();
        while !self.check_op(Operator::RBrace) && !self.at_eof() {
            stmts.push(self.parse_statement()?);
        }
        self.expect_op(Operator::RBrace, "'}'")?;
        self.pop_scope();
        Ok(stmts)
    }

    fn parse_statement(&mut self) -> PResult<Stmt> {
        if self.eat_op(Operator::Semicolon) {
            return Ok(Stmt::Block(Vec::new()));
        }
        if self.check_kw(Keyword::Return) {
            self.advance();
            let e = if self.check_op(Operator::Semicolon) { None } else { Some(self.parse_expr()?) };
            self.expect_op(Operator::Semicolon, "';'")?;
            return Ok(Stmt::Return(e));
        }
        if self.check_kw(Keyword::Refer) {
            self.advance();
            let e = self.parse_expr()?;
            self.expect_op(Operator::Semicolon, "';'")?;
            return Ok(Stmt::Refer(e));
        }
        if self.check_kw(Keyword::Break) {
            let tok = self.advance();
            if self.loop_depth == 0 {
                return Err(ParseError::at_token("'break' used outside of a loop", &tok));
            }
            self.expect_op(Operator::Semicolon, "';'")?;
            return Ok(Stmt::Break);
        }
        if self.check_kw(Keyword::Continue) {
            let tok = self.advance();
            if self.loop_depth == 0 {
                return Err(ParseError::at_token("'continue' used outside of a loop", &tok));
            }
            self.expect_op(Operator::Semicolon, "';'")?;
            return Ok(Stmt::Continue);
        }
        if self.check_kw(Keyword::Throw) {
            self.advance();
            let e = self.parse_expr()?;
            self.expect_op(Operator::Semicolon, "';'")?;
            return Ok(Stmt::Throw(e));
        }
        if self.check_kw(Keyword::Var) {
            self.advance();
            let mut names = vec![self.expect_identifier()?];
            while self.eat_op(Operator::Comma) {
                names.push(self.expect_identifier()?);
            }
            for n in &names {
                self.declare_local(n);
            }
            self.expect_op(Operator::Semicolon, "';'")?;
            return Ok(Stmt::VarDecl(names));
        }
        if self.check_kw(Keyword::Const) {
            self.advance();
            let name = self.expect_identifier()?;
            self.expect_op(Operator::Assign, "'='")?;
            // Evaluate the RHS in an empty scope at parse time: if it does
            // not fold to a literal, the const declaration is a compile
            // error, per the grammar's contract.
            let path = self.scope_path();
            let rhs = self.parse_expr()?;
            self.expect_op(Operator::Semicolon, "';'")?;
            let folded = rhs.clone().fold(&self.consts);
            match &folded.kind {
                ExprKind::Container(v) => {
                    self.consts.define(&path, &name, v.clone());
                }
                _ => return Err(ParseError::at_token(
                    format!("const '{name}' initializer is not a compile-time constant"),
                    &rhs.token,
                )),
            }
            return Ok(Stmt::ConstDecl(name, rhs));
        }
        if self.check_kw(Keyword::Enum) {
            return self.parse_enum();
        }
        if self.check_kw(Keyword::Load) {
            self.advance();
            let path = self.expect_string()?;
            self.expect_op(Operator::Semicolon, "';'")?;
            return Ok(Stmt::Load(path));
        }
        if self.check_kw(Keyword::Extern) {
            self.advance();
            let path = self.expect_string()?;
            self.expect_op(Operator::Semicolon, "';'")?;
            return Ok(Stmt::Extern(path));
        }
        if self.check_kw(Keyword::Def) {
            let f = self.parse_function_def()?;
            return Ok(Stmt::Def(Rc::new(f)));
        }
        if self.check_kw(Keyword::If) {
            return self.parse_if();
        }
        if self.check_kw(Keyword::While) {
            self.advance();
            let cond = self.parse_expr()?;
            self.expect_kw(Keyword::Do, "'do'")?;
            self.loop_depth += 1;
            let body = self.parse_block()?;
            self.loop_depth -= 1;
            return Ok(Stmt::While { cond, body });
        }
        if self.check_kw(Keyword::For) {
            self.advance();
            let var = self.expect_identifier()?;
            self.expect_kw(Keyword::In, "'in'")?;
            let iter = self.parse_expr()?;
            self.expect_kw(Keyword::Do, "'do'")?;
            self.push_scope();
            self.declare_local(&var);
            self.loop_depth += 1;
            let body = self.parse_loop_body()?;
            self.loop_depth -= 1;
            self.pop_scope();
            return Ok(Stmt::For { var, iter, body });
        }
        if self.check_kw(Keyword::Each) {
            self.advance();
            let var = self.expect_identifier()?;
            self.expect_kw(Keyword::In, "'in'")?;
            let iter = self.parse_expr()?;
            self.push_scope();
            self.declare_local(&var);
            let where_clause = if self.eat_kw(Keyword::Where) { Some(self.parse_expr()?) } else { None };
            let do_clause = if self.eat_kw(Keyword::Do) { Some(self.parse_expr()?) } else { None };
            self.pop_scope();
            self.expect_op(Operator::Semicolon, "';'")?;
            return Ok(Stmt::Each { var, iter, where_clause, do_clause });
        }
        if self.check_kw(Keyword::Switch) {
            return self.parse_switch();
        }
        if self.check_kw(Keyword::Try) {
            self.advance();
            let try_body = self.parse_block()?;
            self.expect_kw(Keyword::Catch, "'catch'")?;
            let catch_var = self.expect_identifier()?;
            self.expect_kw(Keyword::Then, "'then'")?;
            self.push_scope();
            self.declare_local(&catch_var);
            let catch_body = self.parse_block()?;
            self.pop_scope();
            return Ok(Stmt::TryCatch { try_body, catch_var, catch_body });
        }
        if self.check_kw(Keyword::Struct) || self.check_kw(Keyword::Static) || self.check_kw(Keyword::Virtual) {
            return self.parse_struct_def();
        }
        if self.check_op(Operator::LBrace) {
            return Ok(Stmt::Block(self.parse_block()?));
        }

        let e = self.parse_expr()?;
        self.expect_op(Operator::Semicolon, "';'")?;
        Ok(Stmt::Expr(e))
    }

    /// `while`/`for` bodies are a single block; a loop body that is a lone
    /// expression statement is still wrapped in a block by `parse_block`.
    fn parse_loop_body(&mut self) -> PResult<Vec<Stmt>> {
        if self.check_op(Operator::LBrace) {
            self.parse_block()
        } else {
            let e = self.parse_expr()?;
            self.expect_op(Operator::Semicolon, "';'")?;
            Ok(vec![Stmt::Expr(e)])
        }
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        self.advance(); // `if`
        let mut branches = Vec::new();
        let cond = self.parse_expr()?;
        self.expect_kw(Keyword::Then, "'then'")?;
        branches.push((cond, self.parse_block()?));
        loop {
            if self.eat_kw(Keyword::Elif) {
                let cond = self.parse_expr()?;
                self.expect_kw(Keyword::Then, "'then'")?;
                branches.push((cond, self.parse_block()?));
                continue;
            }
            break;
        }
        let else_branch = if self.eat_kw(Keyword::Else) { Some(self.parse_block()?) } else { None };
        Ok(Stmt::If { branches, else_branch })
    }

    fn parse_switch(&mut self) -> PResult<Stmt> {
        self.advance(); // `switch`
        let scrutinee = self.parse_expr()?;
        self.expect_kw(Keyword::Of, "'of'")?;
        self.expect_op(Operator::LBrace, "'{'")?;
        let mut arms = Vec::new();
        while self.check_kw(Keyword::Case) {
            self.advance();
            let mut labels = vec![self.parse_expr()?];
            while self.eat_op(Operator::Comma) {
                labels.push(self.parse_expr()?);
            }
            self.expect_kw(Keyword::Do, "'do'")?;
            let body = if self.check_op(Operator::LBrace) {
                self.parse_block()?
            } else {
                let e = self.parse_expr()?;
                self.expect_op(Operator::Semicolon, "';'")?;
                vec![Stmt::Expr(e)]
            };
            arms.push(MatchArm { labels, body });
        }
        let else_branch = if self.eat_kw(Keyword::Else) { Some(self.parse_block()?) } else { None };
        self.expect_op(Operator::RBrace, "'}'")?;
        Ok(Stmt::Switch { scrutinee, arms, else_branch })
    }

    fn parse_struct_def(&mut self) -> PResult<Stmt> {
        let kind = if self.eat_kw(Keyword::Struct) {
            StructKind::Struct
        } else if self.eat_kw(Keyword::Static) {
            StructKind::Static
        } else {
            self.advance(); // virtual
            StructKind::Virtual
        };
        let name = self.expect_identifier()?;
        let base = if self.eat_op(Operator::Colon) { Some(self.expect_identifier()?) } else { None };
        self.push_scope();
        let body = self.parse_block()?;
        self.pop_scope();
        Ok(Stmt::StructDef { name, base, kind, body })
    }

    /// `enum { A, B=EXPR, C, ... };` (spec.md §3 "const registry"): each
    /// variant folds into the const registry as an auto-incrementing
    /// integer, an explicit `=EXPR` initializer re-anchoring the running
    /// count for the variants that follow it.
    fn parse_enum(&mut self) -> PResult<Stmt> {
        self.advance(); // `enum`
        self.expect_op(Operator::LBrace, "'{'")?;
        let path = self.scope_path();
        let mut index = Number::int(0);
        while !self.check_op(Operator::RBrace) {
            let name = self.expect_identifier()?;
            if self.eat_op(Operator::Assign) {
                let rhs = self.parse_expr()?;
                let folded = rhs.clone().fold(&self.consts);
                match folded.kind {
                    ExprKind::Container(ConstValue::Number(n)) => index = n,
                    _ => {
                        return Err(ParseError::at_token(
                            format!("enum variant '{name}' initializer is not a compile-time number"),
                            &rhs.token,
                        ))
                    }
                }
            }
            self.consts.define(&path, &name, ConstValue::Number(index));
            index = index + Number::int(1);
            if !self.eat_op(Operator::Comma) {
                break;
            }
        }
        self.expect_op(Operator::RBrace, "'}'")?;
        Ok(Stmt::Block(Vec::new()))
    }

    fn parse_function_def(&mut self) -> PResult<FunctionLit> {
        self.advance(); // `def`
        // `def -><Typename>(...)` declares a cast-overload hook (spec.md §4.4
        // "fall back to scope lookup of `-><typename>`"); the name is kept as
        // the literal string `"->Typename"` so dispatch can find it by the
        // same interned hash the evaluator builds from a cast's target path.
        let name = if self.check_op(Operator::Arrow) {
            self.advance();
            Some(format!("->{}", self.expect_identifier_or_type()?))
        } else {
            Some(self.expect_identifier()?)
        };
        let signature = self.parse_signature()?;
        self.push_scope();
        if let Signature::Fixed(params) = &signature {
            for p in params {
                self.declare_local(&p.name);
            }
        } else {
            self.declare_local("_args");
        }
        // A function body starts a fresh loop nesting: `break`/`continue`
        // cannot reach through a function boundary to an outer loop.
        let saved_depth = std::mem::replace(&mut self.loop_depth, 0);
        let body = self.parse_block()?;
        self.loop_depth = saved_depth;
        self.pop_scope();
        Ok(FunctionLit { name, signature, body })
    }

    fn parse_signature(&mut self) -> PResult<Signature> {
        self.expect_op(Operator::LParen, "'('")?;
        if self.check_op(Operator::RParen) {
            self.advance();
            return Ok(Signature::Fixed(Vec::new()));
        }
        // A single `...` marks varargs; the lexer tokenizes it as `..`
        // followed by `.` (the `..` range operator never appears alone in
        // a parameter list, so this is unambiguous).
        if self.check_op(Operator::DotDot) && self.peek_ahead_is_dot() {
            self.advance();
            self.advance();
            self.expect_op(Operator::RParen, "')'")?;
            return Ok(Signature::Variadic);
        }
        let mut params = Vec::new();
        loop {
            // `ref` is not a reserved word (it only has meaning in parameter
            // position), so it is recognized contextually: an identifier
            // literally spelled "ref" immediately followed by another
            // identifier marks the parameter as pass-by-reference.
            let by_ref = matches!(&self.peek().kind, TokenKind::Identifier if self.peek().lexeme == "ref")
                && matches!(self.tokens.get(self.pos + 1).map(|t| &t.kind), Some(TokenKind::Identifier));
            if by_ref {
                self.advance();
            }
            let name = self.expect_identifier()?;
            let mut type_path = None;
            let mut type_args = Vec::new();
            if self.eat_op(Operator::Colon) {
                let mut path = vec![self.expect_identifier_or_type()?];
                while self.eat_op(Operator::Dot) {
                    path.push(self.expect_identifier_or_type()?);
                }
                if self.eat_op(Operator::Lt) {
                    type_args.push(self.expect_identifier_or_type()?);
                    while self.eat_op(Operator::Comma) {
                        type_args.push(self.expect_identifier_or_type()?);
                    }
                    self.expect_op(Operator::Gt, "'>'")?;
                }
                type_path = Some(path);
            }
            params.push(Param { name, by_ref, type_path, type_args });
            if !self.eat_op(Operator::Comma) {
                break;
            }
        }
        self.expect_op(Operator::RParen, "')'")?;
        Ok(Signature::Fixed(params))
    }

    fn peek_ahead_is_dot(&self) -> bool {
        matches!(self.tokens.get(self.pos + 1).map(|t| &t.kind), Some(TokenKind::Operator(Operator::Dot)))
            && matches!(self.tokens.get(self.pos + 2).map(|t| &t.kind), Some(TokenKind::Operator(Operator::RParen)))
    }

    fn expect_identifier_or_type(&mut self) -> PResult<String> {
        match &self.peek().kind {
            TokenKind::Identifier => Ok(self.advance().lexeme),
            TokenKind::TypeName(_) => Ok(self.advance().lexeme),
            _ => Err(ParseError::at_token("expected a type name", self.peek())),
        }
    }

    fn expect_string(&mut self) -> PResult<String> {
        if let TokenKind::String = self.peek().kind {
            Ok(self.advance().lexeme)
        } else {
            Err(ParseError::at_token("expected a string literal", self.peek()))
        }
    }

    // -- expressions (precedence climbing) -------------------------------------

    pub fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        let lhs = self.parse_declare()?;
        let compound = match &self.peek().kind {
            TokenKind::Operator(op) => match op {
                Operator::PlusEq => Some(CompoundOp::Add),
                Operator::MinusEq => Some(CompoundOp::Sub),
                Operator::StarEq => Some(CompoundOp::Mul),
                Operator::SlashEq => Some(CompoundOp::Div),
                Operator::SlashSlashEq => Some(CompoundOp::FDiv),
                Operator::PercentEq => Some(CompoundOp::Mod),
                Operator::StarStarEq => Some(CompoundOp::Pow),
                Operator::PipeEq => Some(CompoundOp::BOr),
                Operator::AmpEq => Some(CompoundOp::BAnd),
                Operator::CaretEq => Some(CompoundOp::BXor),
                Operator::ShlEq => Some(CompoundOp::Shl),
                Operator::ShrEq => Some(CompoundOp::Shr),
                Operator::PlusPlusEq => Some(CompoundOp::Concat),
                Operator::DotEq => Some(CompoundOp::Broadcast),
                Operator::AmpAmpEq => Some(CompoundOp::And),
                Operator::PipePipeEq => Some(CompoundOp::Or),
                _ => None,
            },
            _ => None,
        };
        if let Some(op) = compound {
            let tok = self.advance();
            let rhs = self.parse_assignment()?;
            return Ok(Expr::new(
                ExprKind::CompoundAssign(op, Box::new(lhs), Box::new(rhs)),
                tok,
                self.scope_path(),
            ));
        }
        if self.check_op(Operator::Assign) {
            let tok = self.advance();
            let rhs = self.parse_assignment()?;
            return Ok(Expr::new(ExprKind::Assign(Box::new(lhs), Box::new(rhs)), tok, self.scope_path()));
        }
        Ok(lhs)
    }

    fn parse_declare(&mut self) -> PResult<Expr> {
        let lhs = self.parse_cast()?;
        if self.check_op(Operator::ColonEquals) {
            let tok = self.advance();
            let rhs = self.parse_declare()?;
            if let ExprKind::Identifier(name) = &lhs.kind {
                self.declare_local(name);
            }
            return Ok(Expr::new(ExprKind::Declare(Box::new(lhs), Box::new(rhs)), tok, self.scope_path()));
        }
        Ok(lhs)
    }

    fn parse_cast(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_ternary()?;
        while self.check_op(Operator::Arrow) {
            let tok = self.advance();
            let mut path = vec![self.expect_identifier_or_type()?];
            while self.eat_op(Operator::Dot) {
                path.push(self.expect_identifier_or_type()?);
            }
            lhs = Expr::new(ExprKind::Cast(Box::new(lhs), path), tok, self.scope_path());
        }
        Ok(lhs)
    }

    fn parse_ternary(&mut self) -> PResult<Expr> {
        let cond = self.parse_range()?;
        if self.check_op(Operator::Question) {
            let tok = self.advance();
            let then_branch = self.parse_assignment()?;
            self.expect_op(Operator::Colon, "':'")?;
            let else_branch = self.parse_assignment()?;
            return Ok(Expr::new(
                ExprKind::Ternary(Box::new(cond), Box::new(then_branch), Box::new(else_branch)),
                tok,
                self.scope_path(),
            ));
        }
        Ok(cond)
    }

    fn parse_range(&mut self) -> PResult<Expr> {
        let lhs = self.parse_or()?;
        if self.check_op(Operator::DotDot) || self.check_op(Operator::DotPlus) {
            let inclusive = self.check_op(Operator::DotPlus);
            let tok = self.advance();
            let rhs = self.parse_or()?;
            let step = if self.eat_op(Operator::Colon) { Some(Box::new(self.parse_or()?)) } else { None };
            return Ok(Expr::new(ExprKind::Range(Box::new(lhs), Box::new(rhs), step, inclusive), tok, self.scope_path()));
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        self.parse_left_assoc_bin(Self::parse_and, &[(Operator::PipePipe, BinOp::Or)])
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        self.parse_left_assoc_bin(Self::parse_bitor, &[(Operator::AmpAmp, BinOp::And)])
    }

    fn parse_bitor(&mut self) -> PResult<Expr> {
        self.parse_left_assoc_bin(
            Self::parse_equality,
            &[(Operator::Amp, BinOp::BAnd), (Operator::Caret, BinOp::BXor), (Operator::Pipe, BinOp::BOr)],
        )
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        self.parse_left_assoc_bin(
            Self::parse_comparison,
            &[
                (Operator::EqEq, BinOp::Eq),
                (Operator::NotEq, BinOp::Ne),
                (Operator::EqEqEq, BinOp::PureEq),
                (Operator::NotEqEq, BinOp::PureNe),
            ],
        )
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        self.parse_left_assoc_bin(
            Self::parse_shift,
            &[
                (Operator::Lt, BinOp::Lt),
                (Operator::Gt, BinOp::Gt),
                (Operator::Le, BinOp::Le),
                (Operator::Ge, BinOp::Ge),
            ],
        )
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        self.parse_left_assoc_bin(Self::parse_additive, &[(Operator::Shl, BinOp::Shl), (Operator::Shr, BinOp::Shr)])
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        self.parse_left_assoc_bin(
            Self::parse_multiplicative,
            &[(Operator::Plus, BinOp::Add), (Operator::Minus, BinOp::Sub)],
        )
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        self.parse_left_assoc_bin(
            Self::parse_power,
            &[
                (Operator::Star, BinOp::Mul),
                (Operator::Slash, BinOp::Div),
                (Operator::SlashSlash, BinOp::FDiv),
                (Operator::Percent, BinOp::Mod),
            ],
        )
    }

    /// `**` is right-associative.
    fn parse_power(&mut self) -> PResult<Expr> {
        let lhs = self.parse_concat()?;
        if self.check_op(Operator::StarStar) {
            let tok = self.advance();
            let rhs = self.parse_power()?;
            return Ok(Expr::new(ExprKind::Binary(BinOp::Pow, Box::new(lhs), Box::new(rhs)), tok, self.scope_path()));
        }
        Ok(lhs)
    }

    fn parse_concat(&mut self) -> PResult<Expr> {
        self.parse_left_assoc_bin(Self::parse_unary, &[(Operator::PlusPlus, BinOp::Concat)])
    }

    fn parse_left_assoc_bin(
        &mut self,
        mut next: impl FnMut(&mut Self) -> PResult<Expr>,
        ops: &[(Operator, BinOp)],
    ) -> PResult<Expr> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (op, bin) in ops {
                if self.check_op(*op) {
                    let tok = self.advance();
                    let rhs = next(self)?;
                    lhs = Expr::new(ExprKind::Binary(*bin, Box::new(lhs), Box::new(rhs)), tok, self.scope_path());
                    continue 'outer;
                }
            }
            break;
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let (op, is_unary) = match &self.peek().kind {
            TokenKind::Operator(Operator::Plus) => (Some(UnOp::Plus), true),
            TokenKind::Operator(Operator::Minus) => (Some(UnOp::Neg), true),
            TokenKind::Operator(Operator::Bang) => (Some(UnOp::Not), true),
            TokenKind::Operator(Operator::Dollar) => (Some(UnOp::TypeOf), true),
            TokenKind::Operator(Operator::Tilde) => (Some(UnOp::BNot), true),
            TokenKind::Operator(Operator::At) => (Some(UnOp::Hash), true),
            _ => (None, false),
        };
        if is_unary {
            let tok = self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::new(ExprKind::Unary(op.unwrap(), Box::new(operand)), tok, self.scope_path()));
        }
        if self.check_kw(Keyword::Delete) {
            let tok = self.advance();
            let target = self.parse_unary()?;
            self.expect_op(Operator::LBracket, "'['")?;
            let key = self.parse_expr()?;
            self.expect_op(Operator::RBracket, "']'")?;
            return Ok(Expr::new(ExprKind::Delete(Box::new(target), Box::new(key)), tok, self.scope_path()));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check_op(Operator::LBracket) {
                let tok = self.advance();
                let index = self.parse_expr()?;
                self.expect_op(Operator::RBracket, "']'")?;
                expr = Expr::new(ExprKind::Index(Box::new(expr), Box::new(index)), tok, self.scope_path());
                continue;
            }
            if self.check_op(Operator::LParen) {
                let tok = self.advance();
                let mut args = Vec::new();
                if !self.check_op(Operator::RParen) {
                    args.push(self.parse_expr()?);
                    while self.eat_op(Operator::Comma) {
                        args.push(self.parse_expr()?);
                    }
                }
                self.expect_op(Operator::RParen, "')'")?;
                expr = Expr::new(ExprKind::Call(Box::new(expr), args), tok, self.scope_path());
                continue;
            }
            if self.check_op(Operator::Dot) {
                let tok = self.advance();
                let name = self.expect_identifier()?;
                let key = Expr::new(ExprKind::Str(name), tok.clone(), self.scope_path());
                expr = Expr::new(ExprKind::Index(Box::new(expr), Box::new(key)), tok, self.scope_path());
                continue;
            }
            break;
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let path = self.scope_path();
        let tok = self.peek().clone();
        match &tok.kind {
            TokenKind::Number => {
                self.advance();
                Ok(Expr::new(ExprKind::Number(tok.number.unwrap()), tok, path))
            }
            TokenKind::String => {
                self.advance();
                Ok(Expr::new(ExprKind::Str(tok.lexeme.clone()), tok, path))
            }
            TokenKind::Keyword(Keyword::Nil) => {
                self.advance();
                Ok(Expr::new(ExprKind::Nil, tok, path))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::new(ExprKind::True, tok, path))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::new(ExprKind::False, tok, path))
            }
            TokenKind::Keyword(Keyword::New) => {
                self.advance();
                let callee = self.parse_postfix()?;
                if let ExprKind::Call(target, args) = callee.kind {
                    Ok(Expr::new(ExprKind::New(target, args), tok, path))
                } else {
                    Ok(Expr::new(ExprKind::New(Box::new(callee), Vec::new()), tok, path))
                }
            }
            TokenKind::Keyword(Keyword::Alloc) => {
                self.advance();
                self.expect_op(Operator::LParen, "'('")?;
                let n = self.parse_expr()?;
                let fill = if self.eat_op(Operator::Comma) { Some(Box::new(self.parse_expr()?)) } else { None };
                self.expect_op(Operator::RParen, "')'")?;
                Ok(Expr::new(ExprKind::Alloc(Box::new(n), fill), tok, path))
            }
            TokenKind::Keyword(Keyword::Length) => {
                self.advance();
                self.expect_op(Operator::LParen, "'('")?;
                let e = self.parse_expr()?;
                self.expect_op(Operator::RParen, "')'")?;
                Ok(Expr::new(ExprKind::Length(Box::new(e)), tok, path))
            }
            TokenKind::Keyword(Keyword::Parse) => {
                self.advance();
                self.expect_op(Operator::LParen, "'('")?;
                let e = self.parse_expr()?;
                self.expect_op(Operator::RParen, "')'")?;
                Ok(Expr::new(ExprKind::Parse(Box::new(e)), tok, path))
            }
            TokenKind::Keyword(Keyword::Charn) => {
                self.advance();
                self.expect_op(Operator::LParen, "'('")?;
                let e = self.parse_expr()?;
                self.expect_op(Operator::RParen, "')'")?;
                Ok(Expr::new(ExprKind::CharN(Box::new(e)), tok, path))
            }
            TokenKind::Keyword(Keyword::Chars) => {
                self.advance();
                self.expect_op(Operator::LParen, "'('")?;
                let e = self.parse_expr()?;
                self.expect_op(Operator::RParen, "')'")?;
                Ok(Expr::new(ExprKind::Chars(Box::new(e)), tok, path))
            }
            TokenKind::Identifier if tok.lexeme == "this" => {
                self.advance();
                Ok(Expr::new(ExprKind::This, tok, path))
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Expr::new(ExprKind::Identifier(tok.lexeme.clone()), tok, path))
            }
            TokenKind::TypeName(_) => {
                self.advance();
                let mut names = vec![tok.lexeme.clone()];
                while self.eat_op(Operator::Dot) {
                    names.push(self.expect_identifier_or_type()?);
                }
                Ok(Expr::new(ExprKind::TypeName(names, Vec::new()), tok, path))
            }
            TokenKind::Operator(Operator::LParen) => {
                self.advance();
                // Could be a grouped expression or a `(params) => body` lambda.
                if self.looks_like_lambda_params() {
                    return self.parse_lambda_from_paren(tok, path);
                }
                let inner = self.parse_expr()?;
                self.expect_op(Operator::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Operator(Operator::ColonColon) => {
                self.advance();
                self.parse_lambda_body(Vec::new(), tok, path)
            }
            TokenKind::Operator(Operator::LBracket) => {
                self.advance();
                let mut items = Vec::new();
                if !self.check_op(Operator::RBracket) {
                    items.push(self.parse_expr()?);
                    while self.eat_op(Operator::Comma) {
                        items.push(self.parse_expr()?);
                    }
                }
                self.expect_op(Operator::RBracket, "']'")?;
                Ok(Expr::new(ExprKind::Array(items), tok, path))
            }
            TokenKind::Operator(Operator::LBrace) => {
                self.advance();
                let mut entries = Vec::new();
                if !self.check_op(Operator::RBrace) {
                    entries.push(self.parse_dict_entry()?);
                    while self.eat_op(Operator::Comma) {
                        entries.push(self.parse_dict_entry()?);
                    }
                }
                self.expect_op(Operator::RBrace, "'}'")?;
                Ok(Expr::new(ExprKind::Dictionary(entries), tok, path))
            }
            _ => Err(ParseError::at_token(format!("unexpected token '{}'", tok.lexeme), &tok)),
        }
    }

    fn parse_dict_entry(&mut self) -> PResult<(Expr, Expr)> {
        let key = self.parse_expr()?;
        self.expect_op(Operator::Colon, "':'")?;
        let value = self.parse_expr()?;
        Ok((key, value))
    }

    /// Heuristic: `(` starts a lambda parameter list when it is immediately
    /// followed by `)` then `=>`, or by an identifier list then `)`/`=>`.
    fn looks_like_lambda_params(&self) -> bool {
        let mut i = self.pos;
        if matches!(self.tokens.get(i).map(|t| &t.kind), Some(TokenKind::Operator(Operator::RParen))) {
            return matches!(
                self.tokens.get(i + 1).map(|t| &t.kind),
                Some(TokenKind::Operator(Operator::FatArrow))
            );
        }
        let mut depth = 1;
        while let Some(t) = self.tokens.get(i) {
            match &t.kind {
                TokenKind::Operator(Operator::LParen) => depth += 1,
                TokenKind::Operator(Operator::RParen) => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(
                            self.tokens.get(i + 1).map(|t| &t.kind),
                            Some(TokenKind::Operator(Operator::FatArrow))
                        );
                    }
                }
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn parse_lambda_from_paren(&mut self, tok: Token, path: ScopePath) -> PResult<Expr> {
        self.pos -= 1; // back up onto `(`
        let signature = self.parse_signature()?;
        self.expect_op(Operator::FatArrow, "'=>'")?;
        self.push_scope();
        if let Signature::Fixed(params) = &signature {
            for p in params {
                self.declare_local(&p.name);
            }
        } else {
            self.declare_local("_args");
        }
        let saved_depth = std::mem::replace(&mut self.loop_depth, 0);
        let body = if self.check_op(Operator::LBrace) {
            self.parse_block()?
        } else {
            let e = self.parse_expr()?;
            vec![Stmt::Return(Some(e))]
        };
        self.loop_depth = saved_depth;
        self.pop_scope();
        let lit = FunctionLit { name: None, signature, body };
        Ok(Expr::new(ExprKind::FunctionLit(Rc::new(lit)), tok, path))
    }

    fn parse_lambda_body(&mut self, params: Vec<Param>, tok: Token, path: ScopePath) -> PResult<Expr> {
        self.push_scope();
        for p in &params {
            self.declare_local(&p.name);
        }
        let saved_depth = std::mem::replace(&mut self.loop_depth, 0);
        let body = if self.check_op(Operator::LBrace) {
            self.parse_block()?
        } else {
            let e = self.parse_expr()?;
            vec![Stmt::Return(Some(e))]
        };
        self.loop_depth = saved_depth;
        self.pop_scope();
        let lit = FunctionLit { name: None, signature: Signature::Fixed(params), body };
        Ok(Expr::new(ExprKind::FunctionLit(Rc::new(lit)), tok, path))
    }
}

/// Convenience wrapper matching the shape `ra-runtime` calls for the
/// `parse(s)` metacircular-eval builtin: tokenize + parse + fold in one
/// step, reusing the caller's interner.
pub fn parse_source(source: &str, file: &str, interner: &mut Interner) -> PResult<Program> {
    let mut parser = Parser::new(source, file, interner)?;
    parser.parse_and_fold()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        let mut interner = Interner::new();
        parse_source(src, "<test>", &mut interner).expect("parse failed")
    }

    #[test]
    fn folds_constant_arithmetic() {
        let program = parse("const X = 1 + 2 * 3;");
        match &program.statements[0] {
            Stmt::ConstDecl(name, expr) => {
                assert_eq!(name, "X");
                assert!(matches!(expr.kind, ExprKind::Container(ConstValue::Number(_))));
            }
            _ => panic!("expected const decl"),
        }
    }

    #[test]
    fn const_folds_into_function_bodies() {
        let program = parse("const PI = 3.14159; def area(r) { return PI * r ** 2; }");
        match &program.statements[1] {
            Stmt::Def(f) => match &f.body[0] {
                Stmt::Return(Some(expr)) => match &expr.kind {
                    ExprKind::Binary(BinOp::Mul, lhs, _rhs) => {
                        assert!(matches!(lhs.kind, ExprKind::Container(ConstValue::Number(_))));
                    }
                    other => panic!("expected a binary multiply, got {other:?}"),
                },
                other => panic!("expected a return statement, got {other:?}"),
            },
            other => panic!("expected a function def, got {other:?}"),
        }
    }

    #[test]
    fn enum_variants_auto_increment() {
        let program = parse(
            "enum { A, B=10, C }; const USE_A = A; const USE_B = B; const USE_C = C;",
        );
        let number_of = |stmt: &Stmt| match stmt {
            Stmt::ConstDecl(_, expr) => match &expr.kind {
                ExprKind::Container(ConstValue::Number(n)) => n.as_f64(),
                other => panic!("expected a folded number, got {other:?}"),
            },
            other => panic!("expected const decl, got {other:?}"),
        };
        assert_eq!(number_of(&program.statements[1]), 0.0);
        assert_eq!(number_of(&program.statements[2]), 10.0);
        assert_eq!(number_of(&program.statements[3]), 11.0);
    }

    #[test]
    fn compound_assign_is_parsed() {
        let program = parse("var x; x += 1;");
        assert!(matches!(program.statements[1], Stmt::Expr(_)));
    }

    #[test]
    fn function_def_with_signature_parses() {
        let program = parse("def add(a, b) { return a + b; }");
        assert!(matches!(program.statements[0], Stmt::Def(_)));
    }

    #[test]
    fn struct_def_parses() {
        let program = parse("struct Point { var x, y; def init(a, b) { x = a; y = b; } }");
        assert!(matches!(program.statements[0], Stmt::StructDef { .. }));
    }

    #[test]
    fn non_constant_const_is_a_parse_error() {
        let mut interner = Interner::new();
        assert!(parse_source("var y := 1; const X = y;", "<test>", &mut interner).is_err());
    }
}
