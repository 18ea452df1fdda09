/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the py0g Contract Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

//! Compilation artifacts and the on-disk bundle store.
//!
//! A bundle is three files keyed by name: `<name>.bin` (raw deployment
//! bytecode), `<name>.abi.json` and `<name>.metadata.json`.

use crate::abi::AbiEntry;
use crate::checker::Violation;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const COMPILER_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const BASE_GAS: u64 = 21_000;
pub const GAS_PER_BYTE: u64 = 200;

/// `21000 + 200 * len`.
pub fn gas_estimate(bytecode_len: usize) -> u64 {
    BASE_GAS + GAS_PER_BYTE * bytecode_len as u64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub compiler_version: String,
    pub source_hash: String,
    pub compilation_timestamp: String,
    pub gas_estimate: u64,
}

/// The immutable result of one successful compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationArtifact {
    /// Bundle name used for the output files.
    pub name: String,
    pub contract_name: String,
    /// Deployment bytecode (preamble followed by the runtime).
    pub bytecode: Vec<u8>,
    pub runtime_size: usize,
    pub abi: Vec<AbiEntry>,
    pub source_hash: String,
    pub metadata: Metadata,
    /// Non-fatal findings when strict validation is off.
    pub violations: Vec<Violation>,
}

impl CompilationArtifact {
    pub fn bytecode_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.bytecode))
    }

    pub fn runtime_code(&self) -> &[u8] {
        &self.bytecode[self.bytecode.len().saturating_sub(self.runtime_size)..]
    }

    pub fn abi_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.abi)
    }

    pub fn metadata_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.metadata)
    }
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed artifact {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persistence for finished artifacts.
pub trait ArtifactStore: Send + Sync {
    /// Writes the bundle and returns the paths written.
    fn persist(&self, artifact: &CompilationArtifact) -> Result<Vec<PathBuf>, ArtifactError>;
}

/// A bundle read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub bytecode: Vec<u8>,
    pub abi: Vec<AbiEntry>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    out_dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        FsArtifactStore {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn bin_path(&self, name: &str) -> PathBuf {
        self.out_dir.join(format!("{}.bin", name))
    }

    pub fn abi_path(&self, name: &str) -> PathBuf {
        self.out_dir.join(format!("{}.abi.json", name))
    }

    pub fn metadata_path(&self, name: &str) -> PathBuf {
        self.out_dir.join(format!("{}.metadata.json", name))
    }

    pub fn load(&self, name: &str) -> Result<StoredArtifact, ArtifactError> {
        let bin = self.bin_path(name);
        let bytecode = fs::read(&bin).map_err(|source| ArtifactError::Io { path: bin, source })?;
        Ok(StoredArtifact {
            bytecode,
            abi: read_json(&self.abi_path(name))?,
            metadata: read_json(&self.metadata_path(name))?,
        })
    }
}

fn write_file(path: PathBuf, contents: &[u8]) -> Result<PathBuf, ArtifactError> {
    match fs::write(&path, contents) {
        Ok(()) => Ok(path),
        Err(source) => Err(ArtifactError::Io { path, source }),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let text = fs::read_to_string(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ArtifactError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl ArtifactStore for FsArtifactStore {
    /// Files are written one after another; a failure leaves the ones
    /// already written in place.
    fn persist(&self, artifact: &CompilationArtifact) -> Result<Vec<PathBuf>, ArtifactError> {
        fs::create_dir_all(&self.out_dir).map_err(|source| ArtifactError::Io {
            path: self.out_dir.clone(),
            source,
        })?;
        let abi = artifact.abi_json()?;
        let metadata = artifact.metadata_json()?;
        Ok(vec![
            write_file(self.bin_path(&artifact.name), &artifact.bytecode)?,
            write_file(self.abi_path(&artifact.name), abi.as_bytes())?,
            write_file(self.metadata_path(&artifact.name), metadata.as_bytes())?,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::StateMutability;

    fn sample() -> CompilationArtifact {
        let bytecode = vec![0x61, 0x00, 0x01, 0x60, 0x00, 0xF3, 0x00];
        CompilationArtifact {
            name: "Sample".into(),
            contract_name: "Sample".into(),
            runtime_size: 1,
            abi: vec![AbiEntry {
                kind: "function".into(),
                name: "get_count".into(),
                inputs: vec![],
                outputs: vec![],
                state_mutability: StateMutability::View,
            }],
            source_hash: "ab".repeat(32),
            metadata: Metadata {
                name: "Sample".into(),
                compiler_version: COMPILER_VERSION.into(),
                source_hash: "ab".repeat(32),
                compilation_timestamp: "2026-01-01T00:00:00.000000".into(),
                gas_estimate: gas_estimate(bytecode.len()),
            },
            bytecode,
            violations: vec![],
        }
    }

    #[test]
    fn test_gas_formula() {
        assert_eq!(gas_estimate(0), 21_000);
        assert_eq!(gas_estimate(1), 21_200);
        assert_eq!(gas_estimate(328), 86_600);
        assert_eq!(gas_estimate(390), 99_000);
        assert_eq!(gas_estimate(20_000), 4_021_000);
    }

    #[test]
    fn test_metadata_has_exactly_five_keys() {
        let value = serde_json::to_value(&sample().metadata).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "compilation_timestamp",
                "compiler_version",
                "gas_estimate",
                "name",
                "source_hash"
            ]
        );
    }

    #[test]
    fn test_helpers() {
        let artifact = sample();
        assert_eq!(artifact.bytecode_hex(), "0x6100016000f300");
        assert_eq!(artifact.runtime_code(), &[0x00]);
    }

    #[test]
    fn test_persist_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path().join("out"));
        let artifact = sample();
        let written = store.persist(&artifact).unwrap();
        assert_eq!(written.len(), 3);
        assert!(written.iter().all(|p| p.exists()));

        let abi_text = fs::read_to_string(store.abi_path("Sample")).unwrap();
        assert!(abi_text.contains("\n  {\n    \"type\": \"function\""));

        let loaded = store.load("Sample").unwrap();
        assert_eq!(loaded.bytecode, artifact.bytecode);
        assert_eq!(loaded.abi, artifact.abi);
        assert_eq!(loaded.metadata, artifact.metadata);
    }

    #[test]
    fn test_failed_write_keeps_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        // A directory where the abi file should go makes that write fail.
        fs::create_dir(store.abi_path("Sample")).unwrap();
        let err = store.persist(&sample()).unwrap_err();
        match err {
            ArtifactError::Io { path, .. } => assert_eq!(path, store.abi_path("Sample")),
            other => panic!("unexpected error: {}", other),
        }
        assert!(store.bin_path("Sample").exists());
        assert!(!store.metadata_path("Sample").exists());
    }

    #[test]
    fn test_load_missing_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        assert!(matches!(store.load("Nope"), Err(ArtifactError::Io { .. })));
    }
}
