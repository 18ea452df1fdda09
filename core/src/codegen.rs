/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the py0g Contract Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

//! Runtime dispatcher and deployment wrapper.
//!
//! Runtime layout:
//!
//! ```text
//! PUSH1 0x80 PUSH1 0x40 MSTORE                  free memory pointer
//! PUSH1 4 CALLDATASIZE LT PUSH2 fallback JUMPI  no selector possible
//! PUSH1 0 CALLDATALOAD PUSH1 0xE0 SHR           selector on the stack
//! DUP1 PUSH4 sel EQ PUSH2 body JUMPI            once per public function
//! POP
//! fallback: JUMPDEST PUSH1 0 DUP1 REVERT
//! body:     JUMPDEST POP <template>             once per public function
//! ```
//!
//! The deployment code copies the runtime into memory and returns it.

use crate::assembler::{Assembly, CodeGenError};
use crate::ast::Contract;
use crate::opcode::Opcode;
use crate::patterns::BodyPattern;
use crate::selector::Selector;

pub const MAX_CODE_SIZE: usize = 0xFFFF;
pub const FREE_MEMORY_POINTER: u128 = 0x40;
pub const FREE_MEMORY_START: u128 = 0x80;
pub const SELECTOR_SHIFT: u128 = 0xE0;

/// A public function with its dispatch key and body template chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionBody {
    pub name: String,
    pub arity: usize,
    pub selector: Selector,
    pub pattern: BodyPattern,
    /// Bytes the template assembles to on its own.
    pub template_size: usize,
}

/// Where a function's body landed in the runtime code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionLayout {
    pub name: String,
    pub selector: Selector,
    /// Offset of the body's JUMPDEST.
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCode {
    pub code: Vec<u8>,
    pub functions: Vec<FunctionLayout>,
    /// Offset of the shared revert block.
    pub fallback: usize,
}

/// Picks a template for every public function, in declaration order, and
/// checks that each one assembles to a stack-balanced sequence on its own.
pub fn plan_bodies(contract: &Contract<'_>) -> Result<Vec<FunctionBody>, CodeGenError> {
    contract
        .public_functions()
        .map(|func| {
            let pattern = BodyPattern::for_function(func);
            let mut scratch = Assembly::new();
            pattern.emit(&mut scratch, &func.name, func.arity());
            if scratch.is_reachable() {
                return Err(CodeGenError::Unbalanced {
                    op: format!("end of {}", func.name),
                    depth: scratch.depth().unwrap_or(0),
                });
            }
            let template_size = scratch.assemble()?.code.len();
            Ok(FunctionBody {
                name: func.name.clone(),
                arity: func.arity(),
                selector: Selector::of(func),
                pattern,
                template_size,
            })
        })
        .collect()
}

pub fn assemble_runtime(bodies: &[FunctionBody]) -> Result<RuntimeCode, CodeGenError> {
    let mut asm = Assembly::new();
    let fallback = asm.new_label("fallback");
    let entries: Vec<_> = bodies
        .iter()
        .map(|b| asm.new_label(format!("{}.entry", b.name)))
        .collect();

    asm.push(FREE_MEMORY_START)
        .push(FREE_MEMORY_POINTER)
        .op(Opcode::MStore);

    asm.push(4)
        .op(Opcode::CallDataSize)
        .op(Opcode::Lt)
        .jump_if(fallback);

    asm.push(0)
        .op(Opcode::CallDataLoad)
        .push(SELECTOR_SHIFT)
        .op(Opcode::Shr);

    for (body, entry) in bodies.iter().zip(&entries) {
        asm.op(Opcode::Dup(1))
            .push_bytes(&body.selector.to_bytes())
            .op(Opcode::Eq)
            .jump_if(*entry);
    }

    // No match: drop the selector so both ways into the fallback agree.
    asm.op(Opcode::Pop);
    asm.label(fallback)
        .push(0)
        .op(Opcode::Dup(1))
        .op(Opcode::Revert);

    for (body, entry) in bodies.iter().zip(&entries) {
        asm.label(*entry).op(Opcode::Pop);
        body.pattern.emit(&mut asm, &body.name, body.arity);
    }

    let assembled = asm.assemble()?;
    if assembled.code.len() > MAX_CODE_SIZE {
        return Err(CodeGenError::CodeTooLarge {
            size: assembled.code.len(),
            max: MAX_CODE_SIZE,
        });
    }

    let mut functions = Vec::with_capacity(bodies.len());
    for (body, entry) in bodies.iter().zip(&entries) {
        let offset = assembled
            .offset(*entry)
            .ok_or_else(|| CodeGenError::UndefinedLabel(format!("{}.entry", body.name)))?;
        functions.push(FunctionLayout {
            name: body.name.clone(),
            selector: body.selector,
            offset,
        });
    }
    let fallback = assembled
        .offset(fallback)
        .ok_or_else(|| CodeGenError::UndefinedLabel("fallback".into()))?;

    Ok(RuntimeCode {
        code: assembled.code,
        functions,
        fallback,
    })
}

/// Deployment code: copy the runtime (which follows this preamble) into
/// memory and return it.
pub fn wrap_deployment(runtime: &[u8]) -> Result<Vec<u8>, CodeGenError> {
    if runtime.len() > MAX_CODE_SIZE {
        return Err(CodeGenError::CodeTooLarge {
            size: runtime.len(),
            max: MAX_CODE_SIZE,
        });
    }
    let size = (runtime.len() as u16).to_be_bytes();

    let mut asm = Assembly::new();
    let start = asm.new_label("runtime");
    asm.push_bytes(&size)
        .push_label(start)
        .push(0)
        .op(Opcode::CodeCopy)
        .push_bytes(&size)
        .push(0)
        .op(Opcode::Return);
    asm.mark(start).raw(runtime);

    Ok(asm.assemble()?.code)
}

/// Byte length of the deployment preamble.
pub fn preamble_len() -> usize {
    // PUSH2 size, PUSH2 start, PUSH1 0, CODECOPY, PUSH2 size, PUSH1 0, RETURN
    3 + 3 + 2 + 1 + 3 + 2 + 1
}
