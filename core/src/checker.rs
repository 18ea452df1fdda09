/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the py0g Contract Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

//! Contract validator.
//!
//! Walks every node of the module and collects violations; nothing
//! short-circuits, so one pass reports every problem in the source. Whether
//! violations stop compilation is decided by the pipeline, not here.

use crate::ast::{walk_expr, walk_stmt, ClassDef, Expr, ExprKind, Module, Stmt, StmtKind, Visitor};
use crate::selector::{signature, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

lazy_static::lazy_static! {
    static ref FORBIDDEN_IMPORTS: HashSet<&'static str> =
        ["os", "sys", "subprocess", "socket", "urllib"].into_iter().collect();
    static ref FORBIDDEN_CALLS: HashSet<&'static str> =
        ["eval", "exec", "open", "input", "print"].into_iter().collect();
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    #[error("Forbidden import: {0}")]
    ForbiddenImport(String),
    #[error("Forbidden function call: {0}")]
    ForbiddenCall(String),
    #[error("Floating point numbers not allowed")]
    FloatLiteral,
    #[error("Multiple contract definitions: {}", .0.join(", "))]
    MultipleContracts(Vec<String>),
    #[error("Selector collision: {first} and {second} both map to {selector}")]
    SelectorCollision {
        first: String,
        second: String,
        selector: Selector,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub line: u32,
    pub kind: ViolationKind,
}

impl Violation {
    pub fn new(kind: ViolationKind, line: u32) -> Self {
        Violation { line, kind }
    }

    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

pub struct ContractChecker {
    violations: Vec<Violation>,
    check_collisions: bool,
}

impl Default for ContractChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl ContractChecker {
    pub fn new() -> Self {
        ContractChecker {
            violations: Vec::new(),
            check_collisions: true,
        }
    }

    pub fn with_collision_check(mut self, enabled: bool) -> Self {
        self.check_collisions = enabled;
        self
    }

    /// Validate with every rule enabled.
    pub fn check(module: &Module) -> Vec<Violation> {
        ContractChecker::new().run(module)
    }

    pub fn run(mut self, module: &Module) -> Vec<Violation> {
        for stmt in &module.body {
            self.visit_stmt(stmt);
        }
        self.check_single_contract(module);
        if self.check_collisions {
            if let Some(class) = module.classes().next() {
                self.check_selectors(class);
            }
        }
        self.violations
    }

    fn report(&mut self, kind: ViolationKind, line: u32) {
        self.violations.push(Violation::new(kind, line));
    }

    fn check_import(&mut self, module: &str, line: u32) {
        let root = module.split('.').next().unwrap_or(module);
        if FORBIDDEN_IMPORTS.contains(root) {
            self.report(ViolationKind::ForbiddenImport(root.to_string()), line);
        }
    }

    fn check_single_contract(&mut self, module: &Module) {
        let classes: Vec<&Stmt> = module
            .body
            .iter()
            .filter(|s| matches!(s.kind, StmtKind::ClassDef(_)))
            .collect();
        if classes.len() < 2 {
            return;
        }
        let names = classes
            .iter()
            .filter_map(|s| match &s.kind {
                StmtKind::ClassDef(c) => Some(c.name.clone()),
                _ => None,
            })
            .collect();
        self.report(ViolationKind::MultipleContracts(names), classes[1].line);
    }

    fn check_selectors(&mut self, class: &ClassDef) {
        let mut seen: HashMap<Selector, String> = HashMap::new();
        for stmt in &class.body {
            let StmtKind::FunctionDef(func) = &stmt.kind else {
                continue;
            };
            if !func.is_public() {
                continue;
            }
            let sig = signature(&func.name, func.arity());
            let selector = Selector::of(func);
            match seen.get(&selector) {
                Some(first) => {
                    let kind = ViolationKind::SelectorCollision {
                        first: first.clone(),
                        second: sig,
                        selector,
                    };
                    self.report(kind, stmt.line);
                }
                None => {
                    seen.insert(selector, sig);
                }
            }
        }
    }
}

impl Visitor for ContractChecker {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Import(names) => {
                for alias in names {
                    self.check_import(&alias.name, stmt.line);
                }
            }
            StmtKind::ImportFrom { module, .. } => self.check_import(module, stmt.line),
            _ => {}
        }
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Float(_) => self.report(ViolationKind::FloatLiteral, expr.line),
            ExprKind::Call { func, .. } => {
                if let Some(name) = func.as_name() {
                    if FORBIDDEN_CALLS.contains(name) {
                        self.report(ViolationKind::ForbiddenCall(name.to_string()), expr.line);
                    }
                }
            }
            _ => {}
        }
        walk_expr(self, expr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn check(source: &str) -> Vec<Violation> {
        ContractChecker::check(&parse_source(source).unwrap())
    }

    fn messages(source: &str) -> Vec<String> {
        check(source).iter().map(|v| v.message()).collect()
    }

    #[test]
    fn test_clean_contract_has_no_violations() {
        let src = "class Counter:\n    def __init__(self, owner):\n        self.count = 0\n\n    def get_count(self) -> int:\n        return self.count\n";
        assert!(check(src).is_empty());
    }

    #[test]
    fn test_forbidden_import() {
        let v = check("import os\n\nclass A:\n    pass\n");
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].message(), "Forbidden import: os");
        assert_eq!(v[0].line, 1);
    }

    #[test]
    fn test_forbidden_import_forms() {
        assert_eq!(
            messages("import os.path, json, sys as system\nfrom subprocess import run\nfrom .socket import x\nclass A:\n    pass\n"),
            vec!["Forbidden import: os", "Forbidden import: sys", "Forbidden import: subprocess"]
        );
    }

    #[test]
    fn test_forbidden_calls_anywhere() {
        let src = "\
class A:
    def f(self):
        print('x')
        self.eval(1)
        if True:
            return [exec(c) for c in items]
";
        let v = check(src);
        assert_eq!(
            v.iter().map(|v| v.message()).collect::<Vec<_>>(),
            vec!["Forbidden function call: print", "Forbidden function call: exec"]
        );
        assert_eq!(v[0].line, 3);
        assert_eq!(v[1].line, 6);
    }

    #[test]
    fn test_float_literals() {
        let src = "class A:\n    rate = 1.5\n    def f(self, x=2.0):\n        return 3\n";
        assert_eq!(
            messages(src),
            vec!["Floating point numbers not allowed", "Floating point numbers not allowed"]
        );
    }

    #[test]
    fn test_all_violations_collected() {
        let src = "import sys\nclass A:\n    def f(self):\n        open('x')\n        return 0.5\n";
        assert_eq!(check(src).len(), 3);
    }

    #[test]
    fn test_multiple_contracts() {
        let v = check("class A:\n    pass\n\nclass B:\n    pass\n");
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].message(), "Multiple contract definitions: A, B");
        assert_eq!(v[0].line, 4);
    }

    #[test]
    fn test_duplicate_signature_is_a_collision() {
        let src = "class A:\n    def f(self, x):\n        pass\n    def f(self, y):\n        pass\n    def f(self):\n        pass\n";
        let v = check(src);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].line, 4);
        match &v[0].kind {
            ViolationKind::SelectorCollision { first, second, selector } => {
                assert_eq!(first, "f(uint256)");
                assert_eq!(second, "f(uint256)");
                assert_eq!(*selector, Selector::compute("f", 1));
            }
            other => panic!("expected collision, got {:?}", other),
        }
    }

    #[test]
    fn test_private_duplicates_ignored_and_check_can_be_disabled() {
        let src = "class A:\n    def _f(self):\n        pass\n    def _f(self):\n        pass\n";
        assert!(check(src).is_empty());

        let dup = "class A:\n    def f(self):\n        pass\n    def f(self):\n        pass\n";
        let module = parse_source(dup).unwrap();
        assert!(ContractChecker::new()
            .with_collision_check(false)
            .run(&module)
            .is_empty());
    }
}
