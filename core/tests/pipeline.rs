/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the py0g Contract Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

use py0g_core::abi::StateMutability;
use py0g_core::artifact::gas_estimate;
use py0g_core::checker::{ContractChecker, ViolationKind};
use py0g_core::disasm;
use py0g_core::error::ErrorCause;
use py0g_core::log::{self, Level};
use py0g_core::parser::parse_source;
use py0g_core::selector::Selector;
use py0g_core::{CompilationArtifact, Compiler, CompilerConfig, Stage};
use std::collections::HashSet;

const TS: &str = "2026-01-01T00:00:00.000000";

const COUNTER: &str = "\
class Counter:
    def __init__(self, owner):
        self.owner = owner
        self.count = 0

    def get_count(self) -> int:
        return self.count

    def increment(self, caller) -> bool:
        if caller == self.owner:
            self.count += 1
            return True
        return False
";

const TOKEN: &str = "\
class Token:
    def __init__(self):
        self.balances = {}

    def name(self) -> str:
        return 'TestToken'

    def symbol(self) -> str:
        return 'TEST'

    def decimals(self) -> int:
        return 18

    def total_supply(self) -> int:
        return 10 ** 24

    def balance_of(self, owner) -> int:
        return self.balances.get(owner, 0)

    def transfer(self, to, amount: int) -> bool:
        return amount > 0

    def get_pool_rate(self, days: int) -> int:
        return 1800 if days >= 90 else 500

    def is_owner(self, who) -> bool:
        return True

    def _audit(self):
        pass
";

fn config() -> CompilerConfig {
    CompilerConfig {
        persist_artifacts: false,
        log_level: Level::Error,
        ..CompilerConfig::default()
    }
}

fn compiler() -> Compiler {
    Compiler::new(config())
}

fn compile(source: &str) -> CompilationArtifact {
    compiler().compile_source_at(source, None, TS).unwrap()
}

// ─── Reference Machine ───────────────────────────────────────────────────────

type Word = [u8; 32];

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Return(Vec<u8>),
    Revert(Vec<u8>),
    Stop,
}

fn word(value: u128) -> Word {
    let mut w = [0u8; 32];
    w[16..].copy_from_slice(&value.to_be_bytes());
    w
}

fn to_usize(w: &Word) -> usize {
    assert!(w[..16].iter().all(|b| *b == 0), "word too large for an offset");
    let mut low = [0u8; 16];
    low.copy_from_slice(&w[16..]);
    u128::from_be_bytes(low) as usize
}

fn shr(value: &Word, shift: usize) -> Word {
    let mut out = [0u8; 32];
    if shift >= 256 {
        return out;
    }
    let bytes = shift / 8;
    let bits = shift % 8;
    for i in bytes..32 {
        let src = i - bytes;
        let mut b = value[src] >> bits;
        if bits > 0 && src > 0 {
            b |= value[src - 1] << (8 - bits);
        }
        out[i] = b;
    }
    out
}

fn memory_slice(memory: &mut Vec<u8>, offset: usize, size: usize) -> &mut [u8] {
    if memory.len() < offset + size {
        memory.resize(offset + size, 0);
    }
    &mut memory[offset..offset + size]
}

fn pop(stack: &mut Vec<Word>) -> Word {
    stack.pop().expect("stack underflow")
}

/// Executes the handful of instructions the code generator emits.
/// Panics on anything that would fault on a real machine.
fn execute(code: &[u8], calldata: &[u8]) -> Outcome {
    let dests = disasm::jumpdests(code);
    let mut stack: Vec<Word> = Vec::new();
    let mut memory: Vec<u8> = Vec::new();
    let mut pc = 0usize;

    for _ in 0..10_000 {
        let op = code.get(pc).copied().unwrap_or(0x00);
        pc += 1;
        match op {
            0x00 => return Outcome::Stop,
            0x10 | 0x11 | 0x14 => {
                let a = pop(&mut stack);
                let b = pop(&mut stack);
                let r = match op {
                    0x10 => a < b,
                    0x11 => a > b,
                    _ => a == b,
                };
                stack.push(word(r as u128));
            }
            0x15 => {
                let a = pop(&mut stack);
                stack.push(word((a == [0u8; 32]) as u128));
            }
            0x1C => {
                let shift = pop(&mut stack);
                let value = pop(&mut stack);
                stack.push(shr(&value, to_usize(&shift)));
            }
            0x35 => {
                let offset = to_usize(&pop(&mut stack));
                let mut w = [0u8; 32];
                for (i, b) in w.iter_mut().enumerate() {
                    *b = calldata.get(offset + i).copied().unwrap_or(0);
                }
                stack.push(w);
            }
            0x36 => stack.push(word(calldata.len() as u128)),
            0x39 => {
                let dest = to_usize(&pop(&mut stack));
                let offset = to_usize(&pop(&mut stack));
                let size = to_usize(&pop(&mut stack));
                let region = memory_slice(&mut memory, dest, size);
                for (i, b) in region.iter_mut().enumerate() {
                    *b = code.get(offset + i).copied().unwrap_or(0);
                }
            }
            0x50 => {
                pop(&mut stack);
            }
            0x52 => {
                let offset = to_usize(&pop(&mut stack));
                let value = pop(&mut stack);
                memory_slice(&mut memory, offset, 32).copy_from_slice(&value);
            }
            0x56 | 0x57 => {
                let dest = to_usize(&pop(&mut stack));
                let taken = op == 0x56 || pop(&mut stack) != [0u8; 32];
                if taken {
                    assert!(dests.contains(&dest), "jump to non-JUMPDEST {:#x}", dest);
                    pc = dest;
                }
            }
            0x5B => {}
            0x5F..=0x7F => {
                let n = (op - 0x5F) as usize;
                let mut w = [0u8; 32];
                w[32 - n..].copy_from_slice(&code[pc..pc + n]);
                stack.push(w);
                pc += n;
            }
            0x80..=0x8F => {
                let n = (op - 0x7F) as usize;
                let v = stack[stack.len() - n];
                stack.push(v);
            }
            0xF3 | 0xFD => {
                let offset = to_usize(&pop(&mut stack));
                let size = to_usize(&pop(&mut stack));
                let data = memory_slice(&mut memory, offset, size).to_vec();
                assert!(stack.is_empty(), "stack not balanced at exit: {}", stack.len());
                return if op == 0xF3 {
                    Outcome::Return(data)
                } else {
                    Outcome::Revert(data)
                };
            }
            other => panic!("unexpected opcode {:#04x} at {:#x}", other, pc - 1),
        }
    }
    panic!("step limit reached");
}

fn calldata(name: &str, args: &[u128]) -> Vec<u8> {
    let mut data = Selector::compute(name, args.len()).to_bytes().to_vec();
    for arg in args {
        data.extend_from_slice(&word(*arg));
    }
    data
}

fn call(artifact: &CompilationArtifact, name: &str, args: &[u128]) -> Outcome {
    execute(artifact.runtime_code(), &calldata(name, args))
}

// ─── Scenarios ───────────────────────────────────────────────────────────────

#[test]
fn counter_contract() {
    let artifact = compile(COUNTER);
    assert_eq!(artifact.contract_name, "Counter");
    assert!(!artifact.bytecode.is_empty());

    assert_eq!(artifact.abi.len(), 2);
    let get_count = &artifact.abi[0];
    assert_eq!(get_count.name, "get_count");
    assert_eq!(get_count.state_mutability, StateMutability::View);
    assert!(get_count.inputs.is_empty());
    assert_eq!(get_count.outputs[0].ty.as_str(), "uint256");
    let increment = &artifact.abi[1];
    assert_eq!(increment.name, "increment");
    assert_eq!(increment.state_mutability, StateMutability::Nonpayable);
    assert_eq!(increment.inputs.len(), 1);
    assert_eq!(increment.inputs[0].name, "caller");
    assert_eq!(increment.outputs[0].ty.as_str(), "bool");

    let runtime = artifact.runtime_code();
    let table = disasm::dispatch_table(runtime);
    assert_eq!(
        table.iter().map(|(s, _)| *s).collect::<Vec<_>>(),
        vec![
            Selector::compute("get_count", 0),
            Selector::compute("increment", 1)
        ]
    );
    let dests = disasm::jumpdests(runtime);
    let targets: HashSet<usize> = table.iter().map(|(_, t)| *t).collect();
    assert_eq!(targets.len(), 2);
    assert!(targets.is_subset(&dests));
    // fallback plus the two bodies
    assert_eq!(dests.len(), 3);
}

#[test]
fn empty_contract_always_reverts() {
    let artifact = compile("class Empty:\n    def __init__(self):\n        pass\n");
    assert!(artifact.abi.is_empty());
    assert!(disasm::dispatch_table(artifact.runtime_code()).is_empty());

    insta::assert_snapshot!(disasm::disassemble(&artifact.bytecode).to_string(), @r###"
    0000  PUSH2 0x0019
    0003  PUSH2 0x000f
    0006  PUSH1 0x00
    0008  CODECOPY
    0009  PUSH2 0x0019
    000c  PUSH1 0x00
    000e  RETURN
    000f  PUSH1 0x80
    0011  PUSH1 0x40
    0013  MSTORE
    0014  PUSH1 0x04
    0016  CALLDATASIZE
    0017  LT
    0018  PUSH2 0x0014
    001b  JUMPI
    001c  PUSH1 0x00
    001e  CALLDATALOAD
    001f  PUSH1 0xe0
    0021  SHR
    0022  POP
    0023  JUMPDEST
    0024  PUSH1 0x00
    0026  DUP1
    0027  REVERT
    "###);

    let runtime = artifact.runtime_code();
    assert_eq!(execute(runtime, &[0xAA, 0xBB, 0xCC, 0xDD]), Outcome::Revert(vec![]));
    assert_eq!(execute(runtime, &calldata("anything", &[1, 2])), Outcome::Revert(vec![]));
    assert_eq!(execute(runtime, &[]), Outcome::Revert(vec![]));
}

#[test]
fn forbidden_import_reported_once() {
    let module = parse_source("import os\n\nclass A:\n    def f(self):\n        pass\n").unwrap();
    let messages: Vec<String> = ContractChecker::check(&module)
        .iter()
        .map(|v| v.message())
        .collect();
    assert_eq!(messages, vec!["Forbidden import: os".to_string()]);

    let err = compiler()
        .compile_source_at("import os\n\nclass A:\n    pass\n", None, TS)
        .unwrap_err();
    assert_eq!(err.stage, Stage::Validated);
}

#[test]
fn duplicate_signature_is_rejected() {
    let source = "\
class Dup:
    def ping(self, a):
        return 1
    def ping(self, b):
        return 2
";
    let err = compiler().compile_source_at(source, None, TS).unwrap_err();
    assert_eq!(err.stage, Stage::Validated);
    match &err.cause {
        ErrorCause::Validation(violations) => {
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].line, 4);
            assert!(matches!(
                violations[0].kind,
                ViolationKind::SelectorCollision { .. }
            ));
        }
        other => panic!("unexpected cause: {}", other),
    }
}

#[test]
fn multiple_contracts_rejected_in_strict_mode() {
    let source = "class A:\n    pass\n\nclass B:\n    pass\n";
    let err = compiler().compile_source_at(source, None, TS).unwrap_err();
    assert_eq!(
        err.violations()[0].message(),
        "Multiple contract definitions: A, B"
    );

    let lenient = Compiler::new(CompilerConfig {
        strict_validation: false,
        ..config()
    });
    let artifact = lenient.compile_source_at(source, None, TS).unwrap();
    assert_eq!(artifact.contract_name, "A");
    assert_eq!(artifact.violations.len(), 1);
}

#[test]
fn word_sized_literals_compile() {
    let source = format!(
        "class Token:\n    MAX_UINT = 0x{}\n\n    def total_supply(self) -> int:\n        return 1{}\n",
        "f".repeat(64),
        "0".repeat(39)
    );
    let artifact = compile(&source);
    assert_eq!(artifact.abi.len(), 1);
    assert_eq!(
        call(&artifact, "total_supply", &[]),
        Outcome::Return(word(1_000_000_000_000_000_000_000_000).to_vec())
    );
}

#[test]
fn async_methods_stay_off_the_dispatcher() {
    let source = "\
class Oracle:
    def get_owner(self) -> int:
        return 0

    async def get_price_prediction(self, caller: str, asset: str, timeframe: int):
        data = await self.fetch(asset)
        return data

    def call_read_function(self, function_name: str, *args, **kwargs) -> int:
        return 0
";
    let artifact = compile(source);
    let names: Vec<_> = artifact.abi.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["get_owner", "call_read_function"]);
    assert_eq!(artifact.abi[1].inputs.len(), 1);

    let table = disasm::dispatch_table(artifact.runtime_code());
    assert_eq!(
        table.iter().map(|(s, _)| *s).collect::<Vec<_>>(),
        vec![
            Selector::compute("get_owner", 0),
            Selector::compute("call_read_function", 1)
        ]
    );
    assert_eq!(
        call(&artifact, "get_price_prediction", &[1, 2, 3]),
        Outcome::Revert(vec![])
    );
}

#[test]
fn compiler_applies_configured_log_level() {
    let _compiler = compiler();
    assert_eq!(log::level(), Level::Error);
}

// ─── Properties ──────────────────────────────────────────────────────────────

#[test]
fn compilation_is_deterministic() {
    let a = compiler().compile_source_at(TOKEN, None, TS).unwrap();
    let b = compiler()
        .compile_source_at(TOKEN, None, "2030-06-01T12:00:00.000000")
        .unwrap();
    assert_eq!(a.bytecode, b.bytecode);
    assert_eq!(a.source_hash, b.source_hash);
    assert_eq!(a.abi, b.abi);

    let report = py0g_core::verify::check_determinism(TOKEN, 3).unwrap();
    assert!(report.deterministic);
}

#[test]
fn abi_lists_exactly_the_public_functions() {
    let module = parse_source(TOKEN).unwrap();
    let contract = module.contract().unwrap();
    let public: HashSet<&str> = contract
        .public_functions()
        .map(|f| f.name.as_str())
        .collect();
    let artifact = compile(TOKEN);
    let listed: HashSet<&str> = artifact.abi.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(listed, public);
    assert!(!listed.contains("_audit"));
    assert!(!listed.contains("__init__"));
    assert_eq!(disasm::dispatch_table(artifact.runtime_code()).len(), public.len());
}

#[test]
fn mutability_follows_names() {
    let artifact = compile(TOKEN);
    let view: Vec<&str> = artifact
        .abi
        .iter()
        .filter(|e| e.state_mutability == StateMutability::View)
        .map(|e| e.name.as_str())
        .collect();
    assert_eq!(
        view,
        vec![
            "name",
            "symbol",
            "decimals",
            "total_supply",
            "balance_of",
            "get_pool_rate",
            "is_owner"
        ]
    );
}

#[test]
fn selectors_unique_across_generated_contracts() {
    for batch in 0..20 {
        let mut source = format!("class Gen{}:\n", batch);
        for i in 0..25 {
            source.push_str(&format!("    def fn_{}_{}(self, a, b):\n        pass\n", batch, i));
        }
        let artifact = compile(&source);
        let selectors: HashSet<Selector> = disasm::dispatch_table(artifact.runtime_code())
            .into_iter()
            .map(|(s, _)| s)
            .collect();
        assert_eq!(selectors.len(), 25);
    }
}

#[test]
fn gas_estimate_formula() {
    for len in [0usize, 1, 328, 390, 12_345] {
        assert_eq!(gas_estimate(len), 21_000 + 200 * len as u64);
    }
    let artifact = compile(TOKEN);
    assert_eq!(
        artifact.metadata.gas_estimate,
        21_000 + 200 * artifact.bytecode.len() as u64
    );
}

#[test]
fn every_jump_lands_on_a_jumpdest() {
    for source in [COUNTER, TOKEN] {
        let artifact = compile(source);
        let runtime = artifact.runtime_code();
        assert!(disasm::verify_jumps(runtime).is_ok());
        let dests = disasm::jumpdests(runtime);
        for (_, target) in disasm::dispatch_table(runtime) {
            assert!(dests.contains(&target));
            // body prologue drops the selector
            assert_eq!(runtime[target + 1], 0x50);
        }
    }
}

// ─── Execution ───────────────────────────────────────────────────────────────

#[test]
fn deployment_returns_the_runtime() {
    let artifact = compile(TOKEN);
    assert_eq!(
        execute(&artifact.bytecode, &[]),
        Outcome::Return(artifact.runtime_code().to_vec())
    );
}

#[test]
fn token_calls_dispatch_to_their_bodies() {
    let artifact = compile(TOKEN);

    assert_eq!(call(&artifact, "balance_of", &[0xBEEF]), Outcome::Return(word(1000).to_vec()));
    assert_eq!(call(&artifact, "decimals", &[]), Outcome::Return(word(18).to_vec()));
    assert_eq!(
        call(&artifact, "total_supply", &[]),
        Outcome::Return(word(1_000_000_000_000_000_000_000_000).to_vec())
    );
    assert_eq!(call(&artifact, "transfer", &[7, 0]), Outcome::Return(word(0).to_vec()));
    assert_eq!(call(&artifact, "transfer", &[7, 5]), Outcome::Return(word(1).to_vec()));
    assert_eq!(call(&artifact, "get_pool_rate", &[30]), Outcome::Return(word(500).to_vec()));
    assert_eq!(call(&artifact, "get_pool_rate", &[90]), Outcome::Return(word(1800).to_vec()));
    assert_eq!(call(&artifact, "get_pool_rate", &[365]), Outcome::Return(word(1800).to_vec()));
    assert_eq!(call(&artifact, "is_owner", &[1]), Outcome::Return(word(1).to_vec()));

    let mut expected = word(9).to_vec();
    let mut text = [0u8; 32];
    text[..9].copy_from_slice(b"TestToken");
    expected.extend_from_slice(&text);
    assert_eq!(call(&artifact, "name", &[]), Outcome::Return(expected));

    // arity is part of the signature
    assert_eq!(call(&artifact, "decimals", &[1]), Outcome::Revert(vec![]));
    assert_eq!(call(&artifact, "_audit", &[]), Outcome::Revert(vec![]));
}
