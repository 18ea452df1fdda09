/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the py0g Contract Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn hash(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Strips trailing whitespace from every line and drops blank lines, so the
/// digest is stable across insignificant whitespace edits.
pub fn normalize_source(source: &str) -> String {
    source
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Hex digest of the normalized source text.
pub fn source_hash(source: &str) -> String {
    hash(normalize_source(source).as_bytes())
}
