/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the py0g Contract Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

//! Contract source AST.
//!
//! Produced by `parser.rs`, traversed (never mutated) by the validator, the
//! code generator and the ABI generator. Every statement and expression keeps
//! the 1-based line it started on so diagnostics can point back at the source.

use serde::{Deserialize, Serialize};

/// Name of the constructor method; never dispatch-exposed.
pub const CONSTRUCTOR: &str = "__init__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Module {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub line: u32,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    Import(Vec<Alias>),
    ImportFrom {
        module: String,
        names: Vec<Alias>,
    },
    ClassDef(ClassDef),
    FunctionDef(FunctionDef),
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },
    With {
        items: Vec<WithItem>,
        body: Vec<Stmt>,
    },
    Return(Option<Expr>),
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    AnnAssign {
        target: Expr,
        annotation: Expr,
        value: Option<Expr>,
    },
    AugAssign {
        target: Expr,
        op: BinOp,
        value: Expr,
    },
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Delete(Vec<Expr>),
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    Expr(Expr),
    Pass,
    Break,
    Continue,
}

/// `import a.b as c` / `from m import a as c`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptHandler {
    pub line: u32,
    pub kind: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithItem {
    pub context: Expr,
    pub target: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    pub bases: Vec<Expr>,
    pub decorators: Vec<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    /// `async def`: never dispatch-exposed.
    #[serde(default)]
    pub is_async: bool,
    /// Implicit receiver (`self`) of a method, split off from `params`.
    pub receiver: Option<Param>,
    /// Positional parameters only; `*args` and `**kwargs` are kept apart and
    /// take no part in the arity.
    pub params: Vec<Param>,
    #[serde(default)]
    pub vararg: Option<Param>,
    #[serde(default)]
    pub kwarg: Option<Param>,
    pub returns: Option<Expr>,
    pub decorators: Vec<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub annotation: Option<Expr>,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub line: u32,
    pub kind: ExprKind,
}

/// Unsigned integer literal, held as one 256-bit big-endian machine word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntLit(pub [u8; 32]);

impl IntLit {
    /// Parses `digits` (separators already stripped) in `radix`. `None` when
    /// a digit is out of range or the value does not fit in a word.
    pub fn from_digits(digits: &str, radix: u32) -> Option<IntLit> {
        if digits.is_empty() {
            return None;
        }
        let mut word = [0u8; 32];
        for c in digits.chars() {
            let mut carry = c.to_digit(radix)?;
            for byte in word.iter_mut().rev() {
                let v = u32::from(*byte) * radix + carry;
                *byte = v as u8;
                carry = v >> 8;
            }
            if carry != 0 {
                return None;
            }
        }
        Some(IntLit(word))
    }

    pub fn to_u128(&self) -> Option<u128> {
        if self.0[..16].iter().any(|b| *b != 0) {
            return None;
        }
        let mut low = [0u8; 16];
        low.copy_from_slice(&self.0[16..]);
        Some(u128::from_be_bytes(low))
    }
}

impl From<u128> for IntLit {
    fn from(value: u128) -> Self {
        let mut word = [0u8; 32];
        word[16..].copy_from_slice(&value.to_be_bytes());
        IntLit(word)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Name(String),
    Int(IntLit),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// f-string; the raw template text, placeholders are not parsed.
    FormattedStr(String),
    Bool(bool),
    NoneLit,
    Ellipsis,
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Lambda {
        params: Vec<Param>,
        body: Box<Expr>,
    },
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Set(Vec<Expr>),
    /// `None` key marks a `**mapping` spread.
    Dict(Vec<(Option<Expr>, Expr)>),
    Comprehension {
        kind: ComprehensionKind,
        element: Box<Expr>,
        /// Value expression of a dict comprehension.
        value: Option<Box<Expr>>,
        generators: Vec<Generator>,
    },
    Starred(Box<Expr>),
    Await(Box<Expr>),
}

/// Keyword argument; `arg` is `None` for `**kwargs` spreads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub arg: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComprehensionKind {
    List,
    Set,
    Dict,
    Generator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generator {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    MatMul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl Expr {
    pub fn new(kind: ExprKind, line: u32) -> Self {
        Expr { line, kind }
    }

    /// Identifier text when the expression is a bare name.
    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name(n) => Some(n),
            _ => None,
        }
    }
}

impl Stmt {
    pub fn new(kind: StmtKind, line: u32) -> Self {
        Stmt { line, kind }
    }
}

impl FunctionDef {
    /// Dispatch-exposed: a plain `def`, not underscore-prefixed and not the
    /// constructor.
    pub fn is_public(&self) -> bool {
        !self.is_async && !self.name.starts_with('_') && self.name != CONSTRUCTOR
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

// ─── Contract View ───────────────────────────────────────────────────────────

/// The contract-shaped view of a module: its top-level class and the
/// methods declared directly in that class body, in declaration order.
#[derive(Debug, Clone, Copy)]
pub struct Contract<'a> {
    pub class: &'a ClassDef,
}

impl<'a> Contract<'a> {
    pub fn name(&self) -> &'a str {
        &self.class.name
    }

    pub fn functions(&self) -> impl Iterator<Item = &'a FunctionDef> + 'a {
        self.class.body.iter().filter_map(|stmt| match &stmt.kind {
            StmtKind::FunctionDef(f) => Some(f),
            _ => None,
        })
    }

    pub fn public_functions(&self) -> impl Iterator<Item = &'a FunctionDef> + 'a {
        self.functions().filter(|f| f.is_public())
    }
}

impl Module {
    /// All top-level class definitions, in source order.
    pub fn classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.body.iter().filter_map(|stmt| match &stmt.kind {
            StmtKind::ClassDef(c) => Some(c),
            _ => None,
        })
    }

    /// The first top-level class, treated as the contract.
    pub fn contract(&self) -> Option<Contract<'_>> {
        self.classes().next().map(|class| Contract { class })
    }
}

// ─── Traversal ───────────────────────────────────────────────────────────────

/// Read-only AST visitor. Override the hooks you care about and call the
/// matching `walk_*` function to keep descending.
pub trait Visitor {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }
}

pub fn walk_module<V: Visitor + ?Sized>(v: &mut V, module: &Module) {
    for stmt in &module.body {
        v.visit_stmt(stmt);
    }
}

fn walk_block<V: Visitor + ?Sized>(v: &mut V, stmts: &[Stmt]) {
    for stmt in stmts {
        v.visit_stmt(stmt);
    }
}

fn walk_params<V: Visitor + ?Sized>(v: &mut V, params: &[Param]) {
    for p in params {
        if let Some(a) = &p.annotation {
            v.visit_expr(a);
        }
        if let Some(d) = &p.default {
            v.visit_expr(d);
        }
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(v: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::Import(_)
        | StmtKind::ImportFrom { .. }
        | StmtKind::Global(_)
        | StmtKind::Nonlocal(_)
        | StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue => {}
        StmtKind::ClassDef(c) => {
            for e in c.decorators.iter().chain(&c.bases) {
                v.visit_expr(e);
            }
            walk_block(v, &c.body);
        }
        StmtKind::FunctionDef(f) => {
            for d in &f.decorators {
                v.visit_expr(d);
            }
            if let Some(r) = &f.receiver {
                walk_params(v, std::slice::from_ref(r));
            }
            walk_params(v, &f.params);
            for p in f.vararg.iter().chain(&f.kwarg) {
                walk_params(v, std::slice::from_ref(p));
            }
            if let Some(r) = &f.returns {
                v.visit_expr(r);
            }
            walk_block(v, &f.body);
        }
        StmtKind::If { test, body, orelse } | StmtKind::While { test, body, orelse } => {
            v.visit_expr(test);
            walk_block(v, body);
            walk_block(v, orelse);
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
        } => {
            v.visit_expr(target);
            v.visit_expr(iter);
            walk_block(v, body);
            walk_block(v, orelse);
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            walk_block(v, body);
            for h in handlers {
                if let Some(k) = &h.kind {
                    v.visit_expr(k);
                }
                walk_block(v, &h.body);
            }
            walk_block(v, orelse);
            walk_block(v, finalbody);
        }
        StmtKind::With { items, body } => {
            for item in items {
                v.visit_expr(&item.context);
                if let Some(t) = &item.target {
                    v.visit_expr(t);
                }
            }
            walk_block(v, body);
        }
        StmtKind::Return(value) => {
            if let Some(e) = value {
                v.visit_expr(e);
            }
        }
        StmtKind::Assign { targets, value } => {
            for t in targets {
                v.visit_expr(t);
            }
            v.visit_expr(value);
        }
        StmtKind::AnnAssign {
            target,
            annotation,
            value,
        } => {
            v.visit_expr(target);
            v.visit_expr(annotation);
            if let Some(e) = value {
                v.visit_expr(e);
            }
        }
        StmtKind::AugAssign { target, value, .. } => {
            v.visit_expr(target);
            v.visit_expr(value);
        }
        StmtKind::Raise { exc, cause } => {
            for e in exc.iter().chain(cause) {
                v.visit_expr(e);
            }
        }
        StmtKind::Assert { test, msg } => {
            v.visit_expr(test);
            if let Some(m) = msg {
                v.visit_expr(m);
            }
        }
        StmtKind::Delete(targets) => {
            for t in targets {
                v.visit_expr(t);
            }
        }
        StmtKind::Expr(e) => v.visit_expr(e),
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(v: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Name(_)
        | ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Bytes(_)
        | ExprKind::FormattedStr(_)
        | ExprKind::Bool(_)
        | ExprKind::NoneLit
        | ExprKind::Ellipsis => {}
        ExprKind::Attribute { value, .. } => v.visit_expr(value),
        ExprKind::Subscript { value, index } => {
            v.visit_expr(value);
            v.visit_expr(index);
        }
        ExprKind::Slice { lower, upper, step } => {
            for e in [lower, upper, step].into_iter().flatten() {
                v.visit_expr(e);
            }
        }
        ExprKind::Call {
            func,
            args,
            keywords,
        } => {
            v.visit_expr(func);
            for a in args {
                v.visit_expr(a);
            }
            for k in keywords {
                v.visit_expr(&k.value);
            }
        }
        ExprKind::BinOp { left, right, .. } => {
            v.visit_expr(left);
            v.visit_expr(right);
        }
        ExprKind::UnaryOp { operand, .. } => v.visit_expr(operand),
        ExprKind::BoolOp { values, .. } => {
            for e in values {
                v.visit_expr(e);
            }
        }
        ExprKind::Compare {
            left, comparators, ..
        } => {
            v.visit_expr(left);
            for e in comparators {
                v.visit_expr(e);
            }
        }
        ExprKind::IfExp { test, body, orelse } => {
            v.visit_expr(test);
            v.visit_expr(body);
            v.visit_expr(orelse);
        }
        ExprKind::Lambda { params, body } => {
            walk_params(v, params);
            v.visit_expr(body);
        }
        ExprKind::Tuple(items) | ExprKind::List(items) | ExprKind::Set(items) => {
            for e in items {
                v.visit_expr(e);
            }
        }
        ExprKind::Dict(entries) => {
            for (k, val) in entries {
                if let Some(k) = k {
                    v.visit_expr(k);
                }
                v.visit_expr(val);
            }
        }
        ExprKind::Comprehension {
            element,
            value,
            generators,
            ..
        } => {
            v.visit_expr(element);
            if let Some(val) = value {
                v.visit_expr(val);
            }
            for g in generators {
                v.visit_expr(&g.target);
                v.visit_expr(&g.iter);
                for cond in &g.ifs {
                    v.visit_expr(cond);
                }
            }
        }
        ExprKind::Starred(inner) | ExprKind::Await(inner) => v.visit_expr(inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(name: &str, params: &[&str]) -> Stmt {
        Stmt::new(
            StmtKind::FunctionDef(FunctionDef {
                name: name.to_string(),
                is_async: false,
                receiver: Some(Param {
                    name: "self".to_string(),
                    annotation: None,
                    default: None,
                }),
                params: params
                    .iter()
                    .map(|p| Param {
                        name: p.to_string(),
                        annotation: None,
                        default: None,
                    })
                    .collect(),
                vararg: None,
                kwarg: None,
                returns: None,
                decorators: vec![],
                body: vec![Stmt::new(StmtKind::Pass, 1)],
            }),
            1,
        )
    }

    fn class(name: &str, body: Vec<Stmt>) -> Stmt {
        Stmt::new(
            StmtKind::ClassDef(ClassDef {
                name: name.to_string(),
                bases: vec![],
                decorators: vec![],
                body,
            }),
            1,
        )
    }

    #[test]
    fn test_public_function_rules() {
        let module = Module {
            body: vec![class(
                "Token",
                vec![
                    method("__init__", &["owner"]),
                    method("_helper", &[]),
                    method("transfer", &["to", "amount"]),
                ],
            )],
        };
        let contract = module.contract().unwrap();
        assert_eq!(contract.name(), "Token");
        assert_eq!(contract.functions().count(), 3);
        let public: Vec<_> = contract.public_functions().map(|f| f.name.as_str()).collect();
        assert_eq!(public, vec!["transfer"]);
        assert_eq!(contract.public_functions().next().unwrap().arity(), 2);
    }

    #[test]
    fn test_first_class_is_contract() {
        let module = Module {
            body: vec![class("First", vec![]), class("Second", vec![])],
        };
        assert_eq!(module.classes().count(), 2);
        assert_eq!(module.contract().unwrap().name(), "First");
        assert!(Module::default().contract().is_none());
    }

    struct NameCounter(usize);

    impl Visitor for NameCounter {
        fn visit_expr(&mut self, expr: &Expr) {
            if expr.as_name().is_some() {
                self.0 += 1;
            }
            walk_expr(self, expr);
        }
    }

    #[test]
    fn test_visitor_descends_into_nested_expressions() {
        let call = Expr::new(
            ExprKind::Call {
                func: Box::new(Expr::new(ExprKind::Name("f".into()), 3)),
                args: vec![Expr::new(
                    ExprKind::BinOp {
                        left: Box::new(Expr::new(ExprKind::Name("a".into()), 3)),
                        op: BinOp::Add,
                        right: Box::new(Expr::new(ExprKind::Int(IntLit::from(1)), 3)),
                    },
                    3,
                )],
                keywords: vec![],
            },
            3,
        );
        let module = Module {
            body: vec![Stmt::new(StmtKind::Expr(call), 3)],
        };
        let mut counter = NameCounter(0);
        walk_module(&mut counter, &module);
        assert_eq!(counter.0, 2);
    }

    #[test]
    fn test_int_literal_fills_a_word() {
        let max = IntLit::from_digits(&"f".repeat(64), 16).unwrap();
        assert_eq!(max.0, [0xff; 32]);
        assert_eq!(max.to_u128(), None);

        let big = IntLit::from_digits(&format!("1{}", "0".repeat(39)), 10).unwrap();
        assert_eq!(big.0[15], 0x02);
        assert_eq!(IntLit::from_digits("1000", 10).unwrap().to_u128(), Some(1000));
        assert_eq!(IntLit::from_digits("101", 2), Some(IntLit::from(5)));
    }

    #[test]
    fn test_int_literal_rejects_overflow() {
        assert!(IntLit::from_digits(&format!("1{}", "0".repeat(64)), 16).is_none());
        assert!(IntLit::from_digits("12a", 10).is_none());
        assert!(IntLit::from_digits("", 10).is_none());
    }
}
