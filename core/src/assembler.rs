/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the py0g Contract Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

//! Label-resolving assembler with symbolic stack tracking.
//!
//! Code is built as a list of items (opcodes, pushes, label references,
//! label definitions, raw bytes) and assembled in two passes: the first
//! assigns every label its byte offset, the second emits bytes with label
//! references resolved. Label references always encode as PUSH2 so item
//! sizes never depend on the offsets being resolved.
//!
//! Every emission updates a symbolic stack depth. Jumps record the depth
//! they leave behind at their target, and a label must be entered with the
//! same depth from every path. Terminal instructions (RETURN, REVERT, STOP)
//! must leave the stack empty.
//!
//! Builder methods return `&mut Self` for chaining; the first error is
//! latched and reported by [`Assembly::assemble`].

use crate::opcode::Opcode;
use thiserror::Error;

/// Width of every label reference.
pub const LABEL_WIDTH: usize = 2;
pub const MAX_LABEL_OFFSET: usize = 0xFFFF;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodeGenError {
    #[error("stack underflow: {op} needs {needed} item(s) but the stack holds {depth}")]
    StackUnderflow {
        op: String,
        needed: usize,
        depth: usize,
    },
    #[error("unbalanced stack: {op} leaves {depth} item(s) behind")]
    Unbalanced { op: String, depth: usize },
    #[error("stack depth mismatch at label '{label}': expected {expected}, found {found}")]
    DepthMismatch {
        label: String,
        expected: usize,
        found: usize,
    },
    #[error("label '{0}' is reached with an unknown stack depth")]
    UnknownDepth(String),
    #[error("unreachable instruction {0} after a terminator")]
    Unreachable(String),
    #[error("label '{0}' is defined more than once")]
    DuplicateLabel(String),
    #[error("undefined label '{0}'")]
    UndefinedLabel(String),
    #[error("label '{0}' is a position marker, not a jump destination")]
    NotJumpDest(String),
    #[error("offset {offset:#x} of label '{label}' does not fit in 2 bytes")]
    OffsetOverflow { label: String, offset: usize },
    #[error("push immediate of {0} bytes is out of range (1..=32)")]
    InvalidPush(usize),
    #[error("{0} cannot be emitted directly; use the push/jump helpers")]
    InvalidInstruction(String),
    #[error("code size {size} exceeds the maximum of {max} bytes")]
    CodeTooLarge { size: usize, max: usize },
    #[error("dispatch table mismatch: found {found} entries, expected {expected}")]
    DispatchMismatch { found: usize, expected: usize },
}

/// Opaque handle to a label created by [`Assembly::new_label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelKind {
    JumpDest,
    Mark,
}

#[derive(Debug, Clone)]
struct LabelInfo {
    name: String,
    kind: Option<LabelKind>,
    /// Stack depth every path must arrive with.
    depth: Option<usize>,
}

#[derive(Debug, Clone)]
enum Item {
    Op(Opcode),
    Push(Vec<u8>),
    PushLabel { label: Label, jump: bool },
    JumpDest(Label),
    Mark(Label),
    Raw(Vec<u8>),
}

impl Item {
    fn size(&self) -> usize {
        match self {
            Item::Op(_) | Item::JumpDest(_) => 1,
            Item::Push(bytes) => 1 + bytes.len(),
            Item::PushLabel { .. } => 1 + LABEL_WIDTH,
            Item::Mark(_) => 0,
            Item::Raw(bytes) => bytes.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Assembly {
    items: Vec<Item>,
    labels: Vec<LabelInfo>,
    /// `None` while the current position is unreachable.
    depth: Option<usize>,
    error: Option<CodeGenError>,
}

impl Default for Assembly {
    fn default() -> Self {
        Self::new()
    }
}

/// Assembled code plus the resolved offset of every label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bytecode {
    pub code: Vec<u8>,
    offsets: Vec<Option<usize>>,
}

impl Bytecode {
    pub fn offset(&self, label: Label) -> Option<usize> {
        self.offsets.get(label.0).copied().flatten()
    }
}

/// Minimal big-endian encoding; zero encodes as a single byte.
pub fn minimal_be_bytes(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    bytes[first..].to_vec()
}

impl Assembly {
    pub fn new() -> Self {
        Assembly {
            items: Vec::new(),
            labels: Vec::new(),
            depth: Some(0),
            error: None,
        }
    }

    pub fn new_label(&mut self, name: impl Into<String>) -> Label {
        self.labels.push(LabelInfo {
            name: name.into(),
            kind: None,
            depth: None,
        });
        Label(self.labels.len() - 1)
    }

    /// Current symbolic depth, `None` when unreachable.
    pub fn depth(&self) -> Option<usize> {
        self.depth
    }

    pub fn is_reachable(&self) -> bool {
        self.depth.is_some()
    }

    fn fail(&mut self, err: CodeGenError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn label_name(&self, label: Label) -> String {
        self.labels
            .get(label.0)
            .map(|l| l.name.clone())
            .unwrap_or_default()
    }

    /// Applies a stack effect, returning the depth afterwards.
    fn apply(&mut self, op: Opcode) -> Option<usize> {
        let Some(depth) = self.depth else {
            self.fail(CodeGenError::Unreachable(op.to_string()));
            return None;
        };
        let (pops, pushes) = op.stack_effect();
        if depth < pops {
            self.fail(CodeGenError::StackUnderflow {
                op: op.to_string(),
                needed: pops,
                depth,
            });
            self.depth = None;
            return None;
        }
        let after = depth - pops + pushes;
        self.depth = Some(after);
        Some(after)
    }

    /// Requires `depth` at `label`, recording it on first use.
    fn expect_depth(&mut self, label: Label, depth: usize) {
        let Some(info) = self.labels.get_mut(label.0) else {
            return;
        };
        match info.depth {
            None => info.depth = Some(depth),
            Some(expected) if expected != depth => {
                let err = CodeGenError::DepthMismatch {
                    label: info.name.clone(),
                    expected,
                    found: depth,
                };
                self.fail(err);
            }
            Some(_) => {}
        }
    }

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        if matches!(op, Opcode::Push(_) | Opcode::Jump | Opcode::JumpI | Opcode::JumpDest) {
            self.fail(CodeGenError::InvalidInstruction(op.to_string()));
            return self;
        }
        if let Some(after) = self.apply(op) {
            if matches!(op, Opcode::Return | Opcode::Revert | Opcode::Stop) && after != 0 {
                self.fail(CodeGenError::Unbalanced {
                    op: op.to_string(),
                    depth: after,
                });
            }
        }
        if op.is_terminator() {
            self.depth = None;
        }
        self.items.push(Item::Op(op));
        self
    }

    pub fn ops(&mut self, ops: &[Opcode]) -> &mut Self {
        for op in ops {
            self.op(*op);
        }
        self
    }

    /// PUSHn with the given immediate bytes, kept at their given width.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        let Some(op) = Opcode::push(bytes.len()) else {
            self.fail(CodeGenError::InvalidPush(bytes.len()));
            return self;
        };
        self.apply(op);
        self.items.push(Item::Push(bytes.to_vec()));
        self
    }

    /// PUSH of `value` using the narrowest width that holds it.
    pub fn push(&mut self, value: u128) -> &mut Self {
        self.push_bytes(&minimal_be_bytes(value))
    }

    /// PUSH2 of a label's offset, used as data (not as a jump target).
    pub fn push_label(&mut self, label: Label) -> &mut Self {
        self.apply(Opcode::Push(LABEL_WIDTH as u8));
        self.items.push(Item::PushLabel { label, jump: false });
        self
    }

    fn emit_jump(&mut self, label: Label, op: Opcode) {
        self.apply(Opcode::Push(LABEL_WIDTH as u8));
        self.items.push(Item::PushLabel { label, jump: true });
        if let Some(after) = self.apply(op) {
            self.expect_depth(label, after);
        }
        self.items.push(Item::Op(op));
    }

    pub fn jump(&mut self, label: Label) -> &mut Self {
        self.emit_jump(label, Opcode::Jump);
        self.depth = None;
        self
    }

    /// Pops the condition; falls through when it is zero.
    pub fn jump_if(&mut self, label: Label) -> &mut Self {
        self.emit_jump(label, Opcode::JumpI);
        self
    }

    fn define(&mut self, label: Label, kind: LabelKind) -> bool {
        let Some(info) = self.labels.get_mut(label.0) else {
            return false;
        };
        if info.kind.is_some() {
            let name = info.name.clone();
            self.fail(CodeGenError::DuplicateLabel(name));
            return false;
        }
        info.kind = Some(kind);
        true
    }

    /// Defines `label` here and emits its JUMPDEST.
    pub fn label(&mut self, label: Label) -> &mut Self {
        if !self.define(label, LabelKind::JumpDest) {
            return self;
        }
        match self.depth {
            Some(depth) => self.expect_depth(label, depth),
            None => {
                let recorded = self.labels.get(label.0).and_then(|l| l.depth);
                match recorded {
                    Some(depth) => self.depth = Some(depth),
                    None => {
                        let name = self.label_name(label);
                        self.fail(CodeGenError::UnknownDepth(name));
                    }
                }
            }
        }
        self.items.push(Item::JumpDest(label));
        self
    }

    /// Defines `label` as a plain position marker; emits nothing.
    pub fn mark(&mut self, label: Label) -> &mut Self {
        if self.define(label, LabelKind::Mark) {
            self.items.push(Item::Mark(label));
        }
        self
    }

    /// Appends bytes verbatim without touching the stack model.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.items.push(Item::Raw(bytes.to_vec()));
        self
    }

    /// Assembled size in bytes; needs no label resolution.
    pub fn size(&self) -> usize {
        self.items.iter().map(Item::size).sum()
    }

    pub fn assemble(&self) -> Result<Bytecode, CodeGenError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        // Pass 1: offsets
        let mut offsets: Vec<Option<usize>> = vec![None; self.labels.len()];
        let mut pc = 0usize;
        for item in &self.items {
            if let Item::JumpDest(label) | Item::Mark(label) = item {
                offsets[label.0] = Some(pc);
            }
            pc += item.size();
        }

        // Pass 2: emission
        let mut code = Vec::with_capacity(pc);
        for item in &self.items {
            match item {
                Item::Op(op) => code.push(op.byte()),
                Item::Push(bytes) => {
                    code.push(Opcode::Push(bytes.len() as u8).byte());
                    code.extend_from_slice(bytes);
                }
                Item::PushLabel { label, jump } => {
                    let info = &self.labels[label.0];
                    let offset = offsets[label.0]
                        .ok_or_else(|| CodeGenError::UndefinedLabel(info.name.clone()))?;
                    if *jump && info.kind == Some(LabelKind::Mark) {
                        return Err(CodeGenError::NotJumpDest(info.name.clone()));
                    }
                    if offset > MAX_LABEL_OFFSET {
                        return Err(CodeGenError::OffsetOverflow {
                            label: info.name.clone(),
                            offset,
                        });
                    }
                    code.push(Opcode::Push(LABEL_WIDTH as u8).byte());
                    code.extend_from_slice(&(offset as u16).to_be_bytes());
                }
                Item::JumpDest(_) => code.push(Opcode::JumpDest.byte()),
                Item::Mark(_) => {}
                Item::Raw(bytes) => code.extend_from_slice(bytes),
            }
        }

        Ok(Bytecode { code, offsets })
    }
}
