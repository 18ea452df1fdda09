/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the py0g Contract Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

//! Interface descriptor generation.

use crate::ast::{Contract, FunctionDef};
use crate::types::AbiType;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref VIEW_PREFIXES: Vec<&'static str> =
        vec!["get_", "is_", "balance_of", "allowance", "total_supply"];
    static ref VIEW_NAMES: Vec<&'static str> = vec!["name", "symbol", "decimals"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateMutability {
    View,
    Nonpayable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiParam {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: AbiType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiOutput {
    #[serde(rename = "type")]
    pub ty: AbiType,
}

/// One `{type:"function", ...}` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbiEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub inputs: Vec<AbiParam>,
    pub outputs: Vec<AbiOutput>,
    pub state_mutability: StateMutability,
}

impl AbiEntry {
    pub fn from_function(func: &FunctionDef) -> Self {
        AbiEntry {
            kind: "function".to_string(),
            name: func.name.clone(),
            inputs: func
                .params
                .iter()
                .map(|p| AbiParam {
                    name: p.name.clone(),
                    ty: AbiType::from_annotation(p.annotation.as_ref()),
                })
                .collect(),
            outputs: func
                .returns
                .as_ref()
                .map(|r| AbiOutput {
                    ty: AbiType::from_annotation(Some(r)),
                })
                .into_iter()
                .collect(),
            state_mutability: mutability(&func.name),
        }
    }
}

/// Naming-convention heuristic; no semantic analysis is done.
pub fn mutability(name: &str) -> StateMutability {
    let view = VIEW_PREFIXES.iter().any(|p| name.starts_with(p))
        || VIEW_NAMES.iter().any(|n| name == *n);
    if view {
        StateMutability::View
    } else {
        StateMutability::Nonpayable
    }
}

/// Entries for every public function, in declaration order. The receiver is
/// never listed as an input.
pub fn generate(contract: &Contract<'_>) -> Vec<AbiEntry> {
    contract
        .public_functions()
        .map(AbiEntry::from_function)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn abi_for(source: &str) -> Vec<AbiEntry> {
        let module = parse_source(source).unwrap();
        generate(&module.contract().unwrap())
    }

    #[test]
    fn test_mutability_heuristic() {
        for name in [
            "get_owner", "balance_of", "name", "symbol", "decimals", "total_supply",
            "is_paused", "get_count", "allowance",
        ] {
            assert_eq!(mutability(name), StateMutability::View, "{}", name);
        }
        for name in ["increment", "transfer", "rename", "mint", "names", "set_owner"] {
            assert_eq!(mutability(name), StateMutability::Nonpayable, "{}", name);
        }
    }

    #[test]
    fn test_counter_abi_json() {
        let abi = abi_for(
            "\
class Counter:
    def __init__(self, owner):
        self.owner = owner
    def get_count(self) -> int:
        return 0
    def increment(self, caller) -> bool:
        return True
",
        );
        insta::assert_snapshot!(serde_json::to_string_pretty(&abi).unwrap(), @r###"
        [
          {
            "type": "function",
            "name": "get_count",
            "inputs": [],
            "outputs": [
              {
                "type": "uint256"
              }
            ],
            "stateMutability": "view"
          },
          {
            "type": "function",
            "name": "increment",
            "inputs": [
              {
                "name": "caller",
                "type": "uint256"
              }
            ],
            "outputs": [
              {
                "type": "bool"
              }
            ],
            "stateMutability": "nonpayable"
          }
        ]
        "###);
    }

    #[test]
    fn test_types_and_missing_returns() {
        let abi = abi_for(
            "\
class T:
    def label(self, text: str, raw: bytes, flag: bool, n: uint256, x: Foo):
        pass
    def _private(self):
        pass
",
        );
        assert_eq!(abi.len(), 1);
        let types: Vec<_> = abi[0].inputs.iter().map(|p| p.ty).collect();
        assert_eq!(
            types,
            vec![
                AbiType::String,
                AbiType::Bytes,
                AbiType::Bool,
                AbiType::Uint256,
                AbiType::Uint256
            ]
        );
        assert!(abi[0].outputs.is_empty());
    }

    #[test]
    fn test_staticmethod_has_no_receiver() {
        let abi = abi_for("class T:\n    @staticmethod\n    def add(a, b):\n        pass\n");
        let names: Vec<_> = abi[0].inputs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_async_and_variadic_methods() {
        let abi = abi_for(
            "\
class Oracle:
    async def get_price_prediction(self, caller: str, asset: str) -> int:
        return 0
    def call_read_function(self, function_name: str, *args) -> int:
        return 0
",
        );
        assert_eq!(abi.len(), 1);
        assert_eq!(abi[0].name, "call_read_function");
        let names: Vec<_> = abi[0].inputs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["function_name"]);
    }
}
