//! Function call dispatch for the VM.

use std::rc::Rc;

use crate::error::RuntimeError;

use super::chunk::Constant;
use super::natives::NativeFunction;
use super::upvalue::Closure;
use super::value::{Callable, Value};
use super::vm::{CallFrame, Vm};

impl Vm {
    /// Call a value with the given number of arguments on the stack.
    /// The callee is below the arguments on the stack.
    pub fn call_value(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let callee = self.peek(argc);
        match callee.callable() {
            Some(Callable::Closure(closure)) => self.call_closure(closure, argc),
            Some(Callable::Native(native)) => self.call_native(&native, argc),
            Some(Callable::Pending(_)) if argc != 0 => Err(RuntimeError::wrong_arity(0, argc)),
            Some(Callable::Pending(_)) => {
                let slot = self.stack.len() - 1;
                self.call_pending(slot)
            }
            None => Err(RuntimeError::NotCallable(callee.type_name())),
        }
    }

    /// Push a frame for `closure`; the callee slot becomes local slot 0.
    pub(super) fn call_closure(&mut self, closure: Rc<Closure>, argc: usize) -> Result<(), RuntimeError> {
        let arity = closure.compilation.arity as usize;
        if argc != arity {
            return Err(RuntimeError::wrong_arity(arity, argc));
        }
        if self.frames.len() >= self.config.max_frames {
            return Err(RuntimeError::StackOverflow);
        }

        let base = self.stack.len() - argc - 1;
        self.frames.push(CallFrame { closure, ip: 0, base });
        Ok(())
    }

    fn call_native(&mut self, native: &NativeFunction, argc: usize) -> Result<(), RuntimeError> {
        native.check_arity(argc)?;

        // Collect arguments from the stack, then pop the callee
        let args = self.stack.split_off(self.stack.len() - argc);
        self.pop();

        let result = (native.func)(self, &args).map_err(|e| RuntimeError::native(native.name, e))?;
        self.push(result);
        Ok(())
    }

    /// Start running the object program sitting at stack `slot`.
    ///
    /// The slot is overwritten with a closure over the program so the
    /// pending check in the run loop does not fire again; the program's
    /// OBJECT instruction later replaces it with the new object.
    pub(super) fn call_pending(&mut self, slot: usize) -> Result<(), RuntimeError> {
        let Value::Compilation(program) = &self.stack[slot] else {
            return Err(RuntimeError::new("No object program to run."));
        };
        let closure = Rc::new(Closure::new(program.clone(), Vec::new()));
        self.stack[slot] = Value::Closure(closure.clone());
        self.call_closure(closure, 0)
    }

    /// Build a closure from the compilation constant at `idx`, capturing
    /// upvalues as described by the CLOSURE instruction's trailing operands.
    pub(super) fn make_closure(&mut self, frame_idx: usize, idx: u16) -> Result<Rc<Closure>, RuntimeError> {
        let frame = &self.frames[frame_idx];
        let Constant::Compilation(compilation) = &frame.closure.compilation.chunk.constants[idx as usize] else {
            return Err(RuntimeError::new("CLOSURE operand is not a function."));
        };
        let compilation = compilation.clone();
        let enclosing = frame.closure.clone();
        let base = frame.base;
        let mut ip = frame.ip;

        let mut upvalues = Vec::with_capacity(compilation.upvalue_count);
        for _ in 0..compilation.upvalue_count {
            let code = &enclosing.compilation.chunk.code;
            let is_local = code[ip] == 1;
            let index = code[ip + 1] as usize;
            ip += 2;
            let cell = if is_local {
                self.upvalues.capture(base + index)
            } else {
                enclosing.upvalues[index].clone()
            };
            upvalues.push(cell);
        }
        self.frames[frame_idx].ip = ip;

        Ok(Rc::new(Closure::new(compilation, upvalues)))
    }
}
