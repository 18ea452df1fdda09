/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the py0g Contract Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

use crate::ast::{Expr, ExprKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Interface-level type of a parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbiType {
    #[serde(rename = "uint256")]
    Uint256,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "bytes")]
    Bytes,
}

lazy_static::lazy_static! {
    /// Source annotation name -> interface type. Anything missing maps to uint256.
    static ref ANNOTATION_TYPES: HashMap<&'static str, AbiType> = {
        let mut m = HashMap::new();
        m.insert("int", AbiType::Uint256);
        m.insert("uint256", AbiType::Uint256);
        m.insert("str", AbiType::String);
        m.insert("bool", AbiType::Bool);
        m.insert("bytes", AbiType::Bytes);
        m
    };
}

impl AbiType {
    /// The canonical numeric type every selector signature uses.
    pub const CANONICAL: AbiType = AbiType::Uint256;

    pub fn as_str(&self) -> &'static str {
        match self {
            AbiType::Uint256 => "uint256",
            AbiType::String => "string",
            AbiType::Bool => "bool",
            AbiType::Bytes => "bytes",
        }
    }

    pub fn from_name(name: &str) -> AbiType {
        ANNOTATION_TYPES
            .get(name)
            .copied()
            .unwrap_or(AbiType::CANONICAL)
    }

    /// Maps an optional annotation expression. Bare names and string
    /// (forward-reference) annotations are looked up; generic or dotted
    /// annotations fall back to uint256.
    pub fn from_annotation(annotation: Option<&Expr>) -> AbiType {
        match annotation.map(|e| &e.kind) {
            Some(ExprKind::Name(name)) | Some(ExprKind::Str(name)) => AbiType::from_name(name),
            _ => AbiType::CANONICAL,
        }
    }
}

impl fmt::Display for AbiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
