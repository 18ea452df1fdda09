/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the py0g Contract Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

use py0g_core::config::CompilerConfig;
use py0g_core::pipeline::Compiler;
use std::env;
use std::path::Path;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: py0gc <contract.py> [out_dir]");
        process::exit(2);
    }

    let mut config = match env::var("PY0G_CONFIG") {
        Ok(path) => match CompilerConfig::from_file(Path::new(&path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Config Error: {}", e);
                process::exit(2);
            }
        },
        Err(_) => CompilerConfig::default(),
    };
    if let Some(out_dir) = args.get(2) {
        config.output_dir = out_dir.into();
    }
    let compiler = Compiler::new(config);
    match compiler.compile_file(Path::new(&args[1])) {
        Ok(artifact) => {
            println!("Contract:   {}", artifact.contract_name);
            println!("Bytecode:   {} bytes", artifact.bytecode.len());
            println!("Functions:  {}", artifact.abi.len());
            println!("Gas:        {}", artifact.metadata.gas_estimate);
            println!("Source:     {}", artifact.source_hash);
            if compiler.config().persist_artifacts {
                println!("Artifacts:  {}", compiler.config().output_dir.display());
            }
            for v in &artifact.violations {
                println!("Warning:    line {}: {}", v.line, v);
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            for v in e.violations() {
                eprintln!("  line {}: {}", v.line, v);
            }
            process::exit(1);
        }
    }
}
