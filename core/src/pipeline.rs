/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the py0g Contract Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

//! Compiler orchestrator.
//!
//! One compilation walks `Start -> Parsed -> Validated -> BodiesGenerated ->
//! DispatcherAssembled -> DeploymentWrapped -> AbiGenerated -> Hashed ->
//! Packaged -> Done`. A failure is tagged with the stage that could not be
//! reached. Persistence happens only on the way into `Done`, so a failed
//! compilation never writes anything.

use crate::abi;
use crate::artifact::{
    gas_estimate, ArtifactStore, CompilationArtifact, FsArtifactStore, Metadata, COMPILER_VERSION,
};
use crate::assembler::CodeGenError;
use crate::checker::ContractChecker;
use crate::codegen::{self, RuntimeCode};
use crate::config::CompilerConfig;
use crate::crypto;
use crate::disasm;
use crate::error::{CompileError, ErrorCause, Stage};
use crate::log;
use crate::parser::parse_source;
use crate::{debug, info, warn};
use std::path::{Path, PathBuf};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

pub fn timestamp_now() -> String {
    chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Tracks the current stage of one compilation.
struct Run {
    stage: Stage,
}

impl Run {
    fn new() -> Self {
        Run {
            stage: Stage::Start,
        }
    }

    fn advance(&mut self, target: Stage) {
        debug!("{:?} -> {:?}", self.stage, target);
        self.stage = target;
    }

    /// Moves to `target` on success, or tags the error with it.
    fn step<T, E: Into<ErrorCause>>(
        &mut self,
        target: Stage,
        result: Result<T, E>,
    ) -> Result<T, CompileError> {
        match result {
            Ok(value) => {
                self.advance(target);
                Ok(value)
            }
            Err(cause) => {
                let err = CompileError::new(target, cause);
                crate::error!("{}", err);
                Err(err)
            }
        }
    }
}

pub struct Compiler {
    config: CompilerConfig,
    store: Option<Box<dyn ArtifactStore>>,
}

impl Compiler {
    /// Persists to `config.output_dir` when `persist_artifacts` is set.
    /// Applies `config.log_level` to the process-wide log.
    pub fn new(config: CompilerConfig) -> Self {
        log::set_level(config.log_level);
        let store: Option<Box<dyn ArtifactStore>> = if config.persist_artifacts {
            Some(Box::new(FsArtifactStore::new(config.output_dir.clone())))
        } else {
            None
        };
        Compiler { config, store }
    }

    pub fn with_store(mut self, store: impl ArtifactStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn without_store(mut self) -> Self {
        self.store = None;
        self
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compiles and persists a source file. The bundle is named after the
    /// file stem.
    pub fn compile_file(&self, path: &Path) -> Result<CompilationArtifact, CompileError> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            CompileError::other(Stage::Parsed, format!("cannot read {}: {}", path.display(), e))
        })?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string);
        info!("Compiling {}", path.display());
        self.compile_source_at(&source, name.as_deref(), &timestamp_now())
    }

    /// Compiles and persists source text. Without `name` the bundle is
    /// named after the contract class.
    pub fn compile_source(
        &self,
        source: &str,
        name: Option<&str>,
    ) -> Result<CompilationArtifact, CompileError> {
        self.compile_source_at(source, name, &timestamp_now())
    }

    /// As `compile_source`, with a caller-supplied timestamp.
    pub fn compile_source_at(
        &self,
        source: &str,
        name: Option<&str>,
        timestamp: &str,
    ) -> Result<CompilationArtifact, CompileError> {
        let mut run = Run::new();

        let module = run.step(Stage::Parsed, parse_source(source))?;

        let violations = ContractChecker::new()
            .with_collision_check(self.config.reject_selector_collisions)
            .run(&module);
        let checked = if !violations.is_empty() && self.config.strict_validation {
            Err(ErrorCause::Validation(violations.clone()))
        } else {
            for v in &violations {
                warn!("line {}: {}", v.line, v);
            }
            module
                .contract()
                .ok_or_else(|| ErrorCause::Other("no contract class defined".into()))
        };
        let contract = run.step(Stage::Validated, checked)?;
        let contract_name = contract.name().to_string();

        let bodies = run.step(Stage::BodiesGenerated, codegen::plan_bodies(&contract))?;
        for body in &bodies {
            debug!(
                "{} {} -> {} ({} bytes)",
                body.selector, body.name, body.pattern, body.template_size
            );
        }

        let runtime = run.step(
            Stage::DispatcherAssembled,
            codegen::assemble_runtime(&bodies)
                .map_err(ErrorCause::from)
                .and_then(|rt| verify_runtime(&rt).map(|_| rt)),
        )?;

        let bytecode = run.step(
            Stage::DeploymentWrapped,
            codegen::wrap_deployment(&runtime.code),
        )?;

        let abi = abi::generate(&contract);
        run.advance(Stage::AbiGenerated);

        let source_hash = crypto::source_hash(source);
        run.advance(Stage::Hashed);

        let name = name.unwrap_or(&contract_name).to_string();
        let artifact = CompilationArtifact {
            metadata: Metadata {
                name: name.clone(),
                compiler_version: COMPILER_VERSION.to_string(),
                source_hash: source_hash.clone(),
                compilation_timestamp: timestamp.to_string(),
                gas_estimate: gas_estimate(bytecode.len()),
            },
            name,
            contract_name,
            runtime_size: runtime.code.len(),
            bytecode,
            abi,
            source_hash,
            violations,
        };
        run.advance(Stage::Packaged);

        let written = match &self.store {
            Some(store) => store.persist(&artifact),
            None => Ok(Vec::new()),
        };
        let written: Vec<PathBuf> = run.step(Stage::Done, written)?;
        for path in &written {
            debug!("wrote {}", path.display());
        }

        info!(
            "Compiled {} ({} bytes, {} functions, gas ~{})",
            artifact.contract_name,
            artifact.bytecode.len(),
            artifact.abi.len(),
            artifact.metadata.gas_estimate
        );
        Ok(artifact)
    }
}

/// Every jump lands on a JUMPDEST, and the dispatch chain in the bytes
/// agrees with where the assembler placed each body.
fn verify_runtime(runtime: &RuntimeCode) -> Result<(), ErrorCause> {
    let jumps = disasm::verify_jumps(&runtime.code)?;
    debug!("verified {} jumps", jumps);

    let recovered = disasm::dispatch_table(&runtime.code);
    let expected: Vec<_> = runtime
        .functions
        .iter()
        .map(|f| (f.selector, f.offset))
        .collect();
    if recovered != expected {
        return Err(CodeGenError::DispatchMismatch {
            found: recovered.len(),
            expected: expected.len(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactError;
    use std::sync::{Arc, Mutex};

    const TS: &str = "2026-01-01T00:00:00.000000";

    fn compiler() -> Compiler {
        Compiler::new(CompilerConfig::default()).without_store()
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl ArtifactStore for Recorder {
        fn persist(&self, artifact: &CompilationArtifact) -> Result<Vec<PathBuf>, ArtifactError> {
            self.0.lock().unwrap().push(artifact.name.clone());
            Ok(vec![])
        }
    }

    #[test]
    fn test_name_defaults_to_contract() {
        let artifact = compiler()
            .compile_source_at("class Vault:\n    def get_owner(self):\n        pass\n", None, TS)
            .unwrap();
        assert_eq!(artifact.name, "Vault");
        assert_eq!(artifact.metadata.name, "Vault");
        assert_eq!(artifact.metadata.compilation_timestamp, TS);
        assert_eq!(artifact.metadata.compiler_version, "0.2.0");
        assert_eq!(
            artifact.metadata.gas_estimate,
            21_000 + 200 * artifact.bytecode.len() as u64
        );
        assert_eq!(artifact.runtime_size + codegen::preamble_len(), artifact.bytecode.len());
    }

    #[test]
    fn test_stage_tags() {
        let err = compiler().compile_source_at("class A(:\n", None, TS).unwrap_err();
        assert_eq!(err.stage, Stage::Parsed);

        let err = compiler().compile_source_at("x = 1\n", None, TS).unwrap_err();
        assert_eq!(err.stage, Stage::Validated);
        assert!(matches!(err.cause, ErrorCause::Other(_)));

        let err = compiler()
            .compile_source_at("import os\nclass A:\n    pass\n", None, TS)
            .unwrap_err();
        assert_eq!(err.stage, Stage::Validated);
        assert_eq!(err.violations().len(), 1);
    }

    #[test]
    fn test_lenient_mode_carries_violations() {
        let config = CompilerConfig {
            strict_validation: false,
            ..CompilerConfig::default()
        };
        let artifact = Compiler::new(config)
            .without_store()
            .compile_source_at("import os\nclass A:\n    def f(self):\n        x = 1.5\n", None, TS)
            .unwrap();
        let messages: Vec<_> = artifact.violations.iter().map(|v| v.message()).collect();
        assert_eq!(
            messages,
            vec!["Forbidden import: os", "Floating point numbers not allowed"]
        );
    }

    #[test]
    fn test_persists_only_on_success() {
        let recorder = Recorder::default();
        let compiler = Compiler::new(CompilerConfig::default()).with_store(recorder.clone());
        compiler
            .compile_source_at("class A:\n    def f(self):\n        pass\n", Some("bundle"), TS)
            .unwrap();
        assert!(compiler
            .compile_source_at("import sys\nclass B:\n    pass\n", None, TS)
            .is_err());
        assert_eq!(*recorder.0.lock().unwrap(), vec!["bundle".to_string()]);
    }

    #[test]
    fn test_compile_file_uses_stem() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("my_token.py");
        std::fs::write(&src, "class Token:\n    def symbol(self):\n        pass\n").unwrap();
        let out = dir.path().join("artifacts");
        let compiler = Compiler::new(CompilerConfig::default().with_output_dir(&out));
        let artifact = compiler.compile_file(&src).unwrap();
        assert_eq!(artifact.name, "my_token");
        assert_eq!(artifact.contract_name, "Token");
        assert!(out.join("my_token.bin").exists());
        assert!(out.join("my_token.abi.json").exists());
        assert!(out.join("my_token.metadata.json").exists());
    }

    #[test]
    fn test_timestamp_is_utc() {
        let stamp = timestamp_now();
        let parsed = chrono::NaiveDateTime::parse_from_str(&stamp, TIMESTAMP_FORMAT).unwrap();
        let drift = chrono::Utc::now().naive_utc() - parsed;
        assert!(drift.num_seconds().abs() < 60, "{} is not UTC", stamp);
    }

    #[test]
    fn test_dispatch_mismatch_is_a_codegen_error() {
        let module = parse_source("class A:\n    def f(self):\n        pass\n").unwrap();
        let bodies = codegen::plan_bodies(&module.contract().unwrap()).unwrap();
        let mut runtime = codegen::assemble_runtime(&bodies).unwrap();
        assert!(verify_runtime(&runtime).is_ok());

        runtime.functions.clear();
        let err = verify_runtime(&runtime).unwrap_err();
        assert!(matches!(
            err,
            ErrorCause::CodeGen(CodeGenError::DispatchMismatch {
                found: 1,
                expected: 0
            })
        ));
    }
}
