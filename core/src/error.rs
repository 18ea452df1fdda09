/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the py0g Contract Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

use crate::artifact::ArtifactError;
use crate::assembler::CodeGenError;
use crate::checker::Violation;
use crate::disasm::JumpError;
use crate::parser::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Orchestrator states, in the order a compilation moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Start,
    Parsed,
    Validated,
    BodiesGenerated,
    DispatcherAssembled,
    DeploymentWrapped,
    AbiGenerated,
    Hashed,
    Packaged,
    Done,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Start,
        Stage::Parsed,
        Stage::Validated,
        Stage::BodiesGenerated,
        Stage::DispatcherAssembled,
        Stage::DeploymentWrapped,
        Stage::AbiGenerated,
        Stage::Hashed,
        Stage::Packaged,
        Stage::Done,
    ];

    pub fn next(self) -> Option<Stage> {
        Stage::ALL.get(self as usize + 1).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Start => "start",
            Stage::Parsed => "parse",
            Stage::Validated => "validation",
            Stage::BodiesGenerated => "body generation",
            Stage::DispatcherAssembled => "dispatcher assembly",
            Stage::DeploymentWrapped => "deployment wrapping",
            Stage::AbiGenerated => "abi generation",
            Stage::Hashed => "source hashing",
            Stage::Packaged => "packaging",
            Stage::Done => "persistence",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum ErrorCause {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{} violation(s): {}", .0.len(), join_violations(.0))]
    Validation(Vec<Violation>),
    #[error(transparent)]
    CodeGen(#[from] CodeGenError),
    #[error(transparent)]
    Jump(#[from] JumpError),
    #[error(transparent)]
    Persist(#[from] ArtifactError),
    #[error("{0}")]
    Other(String),
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("line {}: {}", v.line, v))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A failed compilation: the stage that could not be reached and why.
#[derive(Error, Debug)]
#[error("compilation failed at {stage}: {cause}")]
pub struct CompileError {
    pub stage: Stage,
    pub cause: ErrorCause,
}

impl CompileError {
    pub fn new(stage: Stage, cause: impl Into<ErrorCause>) -> Self {
        CompileError {
            stage,
            cause: cause.into(),
        }
    }

    pub fn other(stage: Stage, message: impl Into<String>) -> Self {
        CompileError {
            stage,
            cause: ErrorCause::Other(message.into()),
        }
    }

    pub fn violations(&self) -> &[Violation] {
        match &self.cause {
            ErrorCause::Validation(v) => v,
            _ => &[],
        }
    }
}
