/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the py0g Contract Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

//! Instruction set of the target stack machine.
//!
//! Only the instructions the code generator emits or the disassembler needs
//! to recognise are listed; everything else decodes as `Unknown`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Stop,
    Add,
    Mul,
    Sub,
    Div,
    Lt,
    Gt,
    Eq,
    IsZero,
    And,
    Or,
    Not,
    Shl,
    Shr,
    Caller,
    CallValue,
    CallDataLoad,
    CallDataSize,
    CodeCopy,
    Pop,
    MLoad,
    MStore,
    SLoad,
    SStore,
    Jump,
    JumpI,
    JumpDest,
    /// PUSH0..PUSH32; the payload is the immediate width in bytes.
    Push(u8),
    /// DUP1..DUP16
    Dup(u8),
    /// SWAP1..SWAP16
    Swap(u8),
    /// LOG0..LOG4
    Log(u8),
    Return,
    Revert,
    Invalid,
    Unknown(u8),
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Opcode {
        match byte {
            0x00 => Opcode::Stop,
            0x01 => Opcode::Add,
            0x02 => Opcode::Mul,
            0x03 => Opcode::Sub,
            0x04 => Opcode::Div,
            0x10 => Opcode::Lt,
            0x11 => Opcode::Gt,
            0x14 => Opcode::Eq,
            0x15 => Opcode::IsZero,
            0x16 => Opcode::And,
            0x17 => Opcode::Or,
            0x19 => Opcode::Not,
            0x1B => Opcode::Shl,
            0x1C => Opcode::Shr,
            0x33 => Opcode::Caller,
            0x34 => Opcode::CallValue,
            0x35 => Opcode::CallDataLoad,
            0x36 => Opcode::CallDataSize,
            0x39 => Opcode::CodeCopy,
            0x50 => Opcode::Pop,
            0x51 => Opcode::MLoad,
            0x52 => Opcode::MStore,
            0x54 => Opcode::SLoad,
            0x55 => Opcode::SStore,
            0x56 => Opcode::Jump,
            0x57 => Opcode::JumpI,
            0x5B => Opcode::JumpDest,
            0x5F..=0x7F => Opcode::Push(byte - 0x5F),
            0x80..=0x8F => Opcode::Dup(byte - 0x7F),
            0x90..=0x9F => Opcode::Swap(byte - 0x8F),
            0xA0..=0xA4 => Opcode::Log(byte - 0xA0),
            0xF3 => Opcode::Return,
            0xFD => Opcode::Revert,
            0xFE => Opcode::Invalid,
            other => Opcode::Unknown(other),
        }
    }

    pub fn byte(self) -> u8 {
        match self {
            Opcode::Stop => 0x00,
            Opcode::Add => 0x01,
            Opcode::Mul => 0x02,
            Opcode::Sub => 0x03,
            Opcode::Div => 0x04,
            Opcode::Lt => 0x10,
            Opcode::Gt => 0x11,
            Opcode::Eq => 0x14,
            Opcode::IsZero => 0x15,
            Opcode::And => 0x16,
            Opcode::Or => 0x17,
            Opcode::Not => 0x19,
            Opcode::Shl => 0x1B,
            Opcode::Shr => 0x1C,
            Opcode::Caller => 0x33,
            Opcode::CallValue => 0x34,
            Opcode::CallDataLoad => 0x35,
            Opcode::CallDataSize => 0x36,
            Opcode::CodeCopy => 0x39,
            Opcode::Pop => 0x50,
            Opcode::MLoad => 0x51,
            Opcode::MStore => 0x52,
            Opcode::SLoad => 0x54,
            Opcode::SStore => 0x55,
            Opcode::Jump => 0x56,
            Opcode::JumpI => 0x57,
            Opcode::JumpDest => 0x5B,
            Opcode::Push(n) => 0x5F + n,
            Opcode::Dup(n) => 0x7F + n,
            Opcode::Swap(n) => 0x8F + n,
            Opcode::Log(n) => 0xA0 + n,
            Opcode::Return => 0xF3,
            Opcode::Revert => 0xFD,
            Opcode::Invalid => 0xFE,
            Opcode::Unknown(b) => b,
        }
    }

    /// PUSHn for an immediate of `len` bytes (1..=32).
    pub fn push(len: usize) -> Option<Opcode> {
        (1..=32).contains(&len).then_some(Opcode::Push(len as u8))
    }

    /// Bytes of inline data following the opcode.
    pub fn immediate_len(self) -> usize {
        match self {
            Opcode::Push(n) => n as usize,
            _ => 0,
        }
    }

    /// (items popped, items pushed)
    pub fn stack_effect(self) -> (usize, usize) {
        match self {
            Opcode::Stop | Opcode::JumpDest | Opcode::Invalid | Opcode::Unknown(_) => (0, 0),
            Opcode::Add
            | Opcode::Mul
            | Opcode::Sub
            | Opcode::Div
            | Opcode::Lt
            | Opcode::Gt
            | Opcode::Eq
            | Opcode::And
            | Opcode::Or
            | Opcode::Shl
            | Opcode::Shr => (2, 1),
            Opcode::IsZero | Opcode::Not | Opcode::CallDataLoad | Opcode::MLoad | Opcode::SLoad => {
                (1, 1)
            }
            Opcode::Caller | Opcode::CallValue | Opcode::CallDataSize => (0, 1),
            Opcode::CodeCopy => (3, 0),
            Opcode::Pop | Opcode::Jump => (1, 0),
            Opcode::MStore | Opcode::SStore | Opcode::JumpI | Opcode::Return | Opcode::Revert => {
                (2, 0)
            }
            Opcode::Push(_) => (0, 1),
            Opcode::Dup(n) => (n as usize, n as usize + 1),
            Opcode::Swap(n) => (n as usize + 1, n as usize + 1),
            Opcode::Log(n) => (n as usize + 2, 0),
        }
    }

    /// Execution never falls through to the next instruction.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Stop | Opcode::Return | Opcode::Revert | Opcode::Jump | Opcode::Invalid
        )
    }

    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::JumpI)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Stop => write!(f, "STOP"),
            Opcode::Add => write!(f, "ADD"),
            Opcode::Mul => write!(f, "MUL"),
            Opcode::Sub => write!(f, "SUB"),
            Opcode::Div => write!(f, "DIV"),
            Opcode::Lt => write!(f, "LT"),
            Opcode::Gt => write!(f, "GT"),
            Opcode::Eq => write!(f, "EQ"),
            Opcode::IsZero => write!(f, "ISZERO"),
            Opcode::And => write!(f, "AND"),
            Opcode::Or => write!(f, "OR"),
            Opcode::Not => write!(f, "NOT"),
            Opcode::Shl => write!(f, "SHL"),
            Opcode::Shr => write!(f, "SHR"),
            Opcode::Caller => write!(f, "CALLER"),
            Opcode::CallValue => write!(f, "CALLVALUE"),
            Opcode::CallDataLoad => write!(f, "CALLDATALOAD"),
            Opcode::CallDataSize => write!(f, "CALLDATASIZE"),
            Opcode::CodeCopy => write!(f, "CODECOPY"),
            Opcode::Pop => write!(f, "POP"),
            Opcode::MLoad => write!(f, "MLOAD"),
            Opcode::MStore => write!(f, "MSTORE"),
            Opcode::SLoad => write!(f, "SLOAD"),
            Opcode::SStore => write!(f, "SSTORE"),
            Opcode::Jump => write!(f, "JUMP"),
            Opcode::JumpI => write!(f, "JUMPI"),
            Opcode::JumpDest => write!(f, "JUMPDEST"),
            Opcode::Push(n) => write!(f, "PUSH{}", n),
            Opcode::Dup(n) => write!(f, "DUP{}", n),
            Opcode::Swap(n) => write!(f, "SWAP{}", n),
            Opcode::Log(n) => write!(f, "LOG{}", n),
            Opcode::Return => write!(f, "RETURN"),
            Opcode::Revert => write!(f, "REVERT"),
            Opcode::Invalid => write!(f, "INVALID"),
            Opcode::Unknown(b) => write!(f, "UNKNOWN(0x{:02x})", b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_roundtrip_covers_table() {
        for b in 0u8..=255 {
            assert_eq!(Opcode::from_byte(b).byte(), b);
        }
    }

    #[test]
    fn test_push_family() {
        assert_eq!(Opcode::push(1), Some(Opcode::Push(1)));
        assert_eq!(Opcode::Push(1).byte(), 0x60);
        assert_eq!(Opcode::Push(32).byte(), 0x7F);
        assert_eq!(Opcode::Push(4).immediate_len(), 4);
        assert_eq!(Opcode::push(0), None);
        assert_eq!(Opcode::push(33), None);
        assert_eq!(Opcode::Push(0).to_string(), "PUSH0");
    }

    #[test]
    fn test_stack_effects() {
        assert_eq!(Opcode::Dup(1).stack_effect(), (1, 2));
        assert_eq!(Opcode::Swap(2).stack_effect(), (3, 3));
        assert_eq!(Opcode::CodeCopy.stack_effect(), (3, 0));
        assert_eq!(Opcode::JumpI.stack_effect(), (2, 0));
        assert_eq!(Opcode::Log(2).stack_effect(), (4, 0));
    }

    #[test]
    fn test_terminators() {
        assert!(Opcode::Return.is_terminator());
        assert!(Opcode::Jump.is_terminator());
        assert!(!Opcode::JumpI.is_terminator());
        assert_eq!(Opcode::from_byte(0xEF).to_string(), "UNKNOWN(0xef)");
    }
}
