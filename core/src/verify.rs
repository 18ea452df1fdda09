/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the py0g Contract Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

use crate::config::CompilerConfig;
use crate::crypto;
use crate::error::CompileError;
use crate::log;
use crate::pipeline::{timestamp_now, Compiler};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeterminismReport {
    pub iterations: usize,
    pub deterministic: bool,
    /// SHA-256 of the first build's bytecode.
    pub bytecode_hash: String,
    pub source_hash: String,
    /// Iterations whose output differed from the first build.
    pub mismatches: Vec<usize>,
}

/// Compiles `source` `iterations` times without persisting and compares
/// each build's bytecode and source hash against the first.
pub fn check_determinism(
    source: &str,
    iterations: usize,
) -> Result<DeterminismReport, CompileError> {
    let config = CompilerConfig {
        persist_artifacts: false,
        log_level: log::level(),
        ..CompilerConfig::default()
    };
    let compiler = Compiler::new(config);
    let timestamp = timestamp_now();

    let first = compiler.compile_source_at(source, None, &timestamp)?;
    let mut mismatches = Vec::new();
    for i in 1..iterations.max(1) {
        let next = compiler.compile_source_at(source, None, &timestamp)?;
        if next.bytecode != first.bytecode || next.source_hash != first.source_hash {
            mismatches.push(i);
        }
    }

    Ok(DeterminismReport {
        iterations: iterations.max(1),
        deterministic: mismatches.is_empty(),
        bytecode_hash: crypto::hash(&first.bytecode),
        source_hash: first.source_hash,
        mismatches,
    })
}
