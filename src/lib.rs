//! lpcvm: a small LPC-style object language compiled to bytecode.
//!
//! Scripts run top to bottom with globals; object units are source files
//! that build one object each, with fields, methods and single inheritance
//! via `inherit "path";`. Both compile in a single pass to the same
//! bytecode and run on [`vm::Vm`].

#![allow(clippy::module_inception)]
#![allow(clippy::result_large_err)]
#![allow(clippy::new_without_default)]

pub mod config;
pub mod error;
pub mod lexer;
pub mod repl;
pub mod vm;

use std::path::Path;

use error::LpcError;
use vm::{Value, Vm};

/// Compile and run a script on a fresh VM with default settings.
pub fn run(source: &str) -> Result<Value, LpcError> {
    let mut vm = Vm::new();
    run_in(&mut vm, "main", source)
}

/// Compile and run a script on an existing VM, keeping its globals.
pub fn run_in(vm: &mut Vm, name: &str, source: &str) -> Result<Value, LpcError> {
    let script = vm::compile(name, source)?;
    vm.interpret(script)
}

/// Run the script file at `path`.
pub fn run_file(vm: &mut Vm, path: &Path) -> Result<Value, LpcError> {
    let source = std::fs::read_to_string(path)?;
    run_in(vm, &path.display().to_string(), &source)
}

/// Disassemble source compiled either as a script or as the object unit `name`.
pub fn disassemble_source(name: &str, source: &str, as_object: bool) -> Result<String, LpcError> {
    let compilation = if as_object {
        vm::compile_object(name, source)?
    } else {
        vm::compile(name, source)?
    };
    Ok(vm::disassemble(&compilation))
}
