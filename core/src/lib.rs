/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the py0g Contract Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

pub mod log;

pub mod abi;
pub mod artifact;
pub mod assembler;
pub mod ast;
pub mod checker;
pub mod codegen;
pub mod config;
pub mod crypto;
pub mod disasm;
pub mod error;
pub mod opcode;
pub mod parser;
pub mod patterns;
pub mod pipeline;
pub mod selector;
pub mod types;
pub mod verify;

pub use artifact::{ArtifactStore, CompilationArtifact, FsArtifactStore};
pub use config::CompilerConfig;
pub use error::{CompileError, Stage};
pub use pipeline::Compiler;
