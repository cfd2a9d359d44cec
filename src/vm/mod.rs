//! Bytecode VM for lpcvm: compiles source to bytecode and executes it on a stack machine.
//!
//! Scripts and object units share one instruction set. Object units are
//! compiled lazily, the first time something inherits from or loads them,
//! and the compiled program is cached per path.

pub mod chunk;
pub mod compiler;
pub mod compiler_exprs;
pub mod compiler_objects;
pub mod compiler_stmts;
pub mod disassembler;
pub mod loader;
pub mod natives;
pub mod object;
pub mod opcode;
pub mod scope;
pub mod upvalue;
pub mod value;
#[allow(clippy::module_inception)]
pub mod vm;
pub mod vm_calls;
pub mod vm_objects;

pub use chunk::{Chunk, Compilation, CompilationKind, Constant};
pub use compiler::compile;
pub use compiler_objects::compile_object;
pub use disassembler::disassemble;
pub use loader::{FsSource, MemorySource, ObjectLoader, ObjectSource};
pub use natives::NativeFunction;
pub use object::RuntimeObject;
pub use opcode::OpCode;
pub use upvalue::Closure;
pub use value::{ObjectRef, Value};
pub use vm::Vm;
