/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the py0g Contract Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

//! Function selectors.
//!
//! A selector is the first four bytes (big-endian) of the SHA-256 digest of
//! `name(uint256,...)`. Every parameter is treated as the canonical numeric
//! type, so the selector depends only on name and arity.

use crate::ast::FunctionDef;
use crate::crypto;
use crate::types::AbiType;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Selector(pub u32);

/// Canonical signature text, e.g. `transfer(uint256,uint256)`.
pub fn signature(name: &str, arity: usize) -> String {
    let params = vec![AbiType::CANONICAL.as_str(); arity];
    format!("{}({})", name, params.join(","))
}

impl Selector {
    pub fn compute(name: &str, arity: usize) -> Selector {
        let digest = crypto::sha256(signature(name, arity).as_bytes());
        Selector(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]))
    }

    pub fn of(func: &FunctionDef) -> Selector {
        Selector::compute(&func.name, func.arity())
    }

    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
