//! Host functions callable from scripts exactly like closures.

use std::fmt;
use std::rc::Rc;

use crate::error::RuntimeError;

use super::value::Value;
use super::vm::Vm;

/// Native function signature: arguments in, one value out.
pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, String>;

/// A host-implemented callable.
pub struct NativeFunction {
    pub name: &'static str,
    /// Exact argument count, or for negative values, at most `|arity|` arguments.
    pub arity: i8,
    pub func: NativeFn,
}

impl NativeFunction {
    pub fn new(name: &'static str, arity: i8, func: NativeFn) -> Self {
        Self { name, arity, func }
    }

    pub fn check_arity(&self, argc: usize) -> Result<(), RuntimeError> {
        let limit = self.arity.unsigned_abs() as usize;
        if self.arity >= 0 && argc != limit {
            return Err(RuntimeError::wrong_arity(limit, argc));
        }
        if self.arity < 0 && argc > limit {
            return Err(RuntimeError::TooManyArguments {
                max: limit,
                got: argc,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn {}/{}>", self.name, self.arity)
    }
}

/// Define every built-in native as a global.
pub fn install(vm: &mut Vm) {
    let natives: [(&'static str, i8, NativeFn); 4] = [
        ("clock", 0, clock),
        ("print", -1, print),
        ("println", -1, println),
        ("load", 1, load),
    ];
    for (name, arity, func) in natives {
        vm.define_native(Rc::new(NativeFunction::new(name, arity, func)));
    }
}

fn clock(vm: &mut Vm, _args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(vm.uptime().as_secs_f64()))
}

fn print(vm: &mut Vm, args: &[Value]) -> Result<Value, String> {
    if let Some(value) = args.first() {
        vm.write_output(&value.to_string());
    }
    Ok(Value::Nil)
}

fn println(vm: &mut Vm, args: &[Value]) -> Result<Value, String> {
    match args.first() {
        Some(value) => vm.write_output(&format!("{}\n", value)),
        None => vm.write_output("\n"),
    }
    Ok(Value::Nil)
}

/// Compile (or reuse) an object program; the VM runs it as soon as it lands on the stack.
fn load(vm: &mut Vm, args: &[Value]) -> Result<Value, String> {
    let path = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| "expects an object path string".to_string())?;
    vm.loader
        .load(path)
        .map(Value::Compilation)
        .map_err(|e| e.to_string())
}
