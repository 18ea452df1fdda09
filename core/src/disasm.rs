/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the py0g Contract Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

//! Disassembly and post-assembly checks over raw bytecode.

use crate::opcode::Opcode;
use crate::selector::Selector;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub opcode: Opcode,
    /// Inline push data; shorter than declared if the code is truncated.
    pub immediate: Vec<u8>,
}

impl Instruction {
    /// Push data as an integer (big-endian), for pushes of up to 8 bytes.
    pub fn immediate_value(&self) -> Option<u64> {
        if self.immediate.is_empty() || self.immediate.len() > 8 {
            return None;
        }
        Some(self.immediate.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}  {}", self.offset, self.opcode)?;
        if !self.immediate.is_empty() {
            write!(f, " 0x{}", hex::encode(&self.immediate))?;
        }
        Ok(())
    }
}

/// A full instruction listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing(pub Vec<Instruction>);

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ins in &self.0 {
            writeln!(f, "{}", ins)?;
        }
        Ok(())
    }
}

pub fn disassemble(code: &[u8]) -> Listing {
    let mut out = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        let opcode = Opcode::from_byte(code[pc]);
        let start = pc + 1;
        let end = (start + opcode.immediate_len()).min(code.len());
        out.push(Instruction {
            offset: pc,
            opcode,
            immediate: code[start..end].to_vec(),
        });
        pc = end;
    }
    Listing(out)
}

/// Offsets of real JUMPDEST instructions (push data excluded).
pub fn jumpdests(code: &[u8]) -> HashSet<usize> {
    disassemble(code)
        .0
        .into_iter()
        .filter(|ins| ins.opcode == Opcode::JumpDest)
        .map(|ins| ins.offset)
        .collect()
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JumpError {
    #[error("{op} at {at:#06x} targets {target:#06x}, which is not a JUMPDEST")]
    InvalidTarget { op: String, at: usize, target: u64 },
    #[error("{op} at {at:#06x} has no constant target")]
    DynamicTarget { op: String, at: usize },
}

/// Checks every `PUSHn target; JUMP|JUMPI` pair. Returns the number of
/// jumps checked.
pub fn verify_jumps(code: &[u8]) -> Result<usize, JumpError> {
    let listing = disassemble(code);
    let dests = jumpdests(code);
    let mut checked = 0;
    for (i, ins) in listing.0.iter().enumerate() {
        if !ins.opcode.is_jump() {
            continue;
        }
        let target = i
            .checked_sub(1)
            .map(|p| &listing.0[p])
            .filter(|prev| matches!(prev.opcode, Opcode::Push(n) if n > 0))
            .and_then(Instruction::immediate_value)
            .ok_or_else(|| JumpError::DynamicTarget {
                op: ins.opcode.to_string(),
                at: ins.offset,
            })?;
        let valid = usize::try_from(target)
            .map(|t| dests.contains(&t))
            .unwrap_or(false);
        if !valid {
            return Err(JumpError::InvalidTarget {
                op: ins.opcode.to_string(),
                at: ins.offset,
                target,
            });
        }
        checked += 1;
    }
    Ok(checked)
}

/// Recovers `(selector, target)` pairs from the dispatcher's
/// `DUP1 PUSH4 s EQ PUSHn t JUMPI` chain.
pub fn dispatch_table(code: &[u8]) -> Vec<(Selector, usize)> {
    let listing = disassemble(code);
    listing
        .0
        .windows(5)
        .filter_map(|w| match (w[0].opcode, w[1].opcode, w[2].opcode, w[3].opcode, w[4].opcode) {
            (Opcode::Dup(1), Opcode::Push(4), Opcode::Eq, Opcode::Push(_), Opcode::JumpI) => {
                let selector = Selector(w[1].immediate_value()? as u32);
                let target = w[3].immediate_value()? as usize;
                Some((selector, target))
            }
            _ => None,
        })
        .collect()
}
