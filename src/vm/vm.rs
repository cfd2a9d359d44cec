//! The bytecode virtual machine: a stack-based execution engine.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use tracing::{debug, trace};

use crate::config::VmConfig;
use crate::error::{CallTrace, LpcError, RuntimeError, TraceFrame};

use super::chunk::Compilation;
use super::disassembler::disassemble_instruction;
use super::loader::{ObjectLoader, ObjectSource};
use super::natives::{self, NativeFunction};
use super::object::{find_ancestor, RuntimeObject};
use super::opcode::OpCode;
use super::upvalue::{read_upvalue, write_upvalue, Closure, OpenUpvalues};
use super::value::{ObjectRef, Value};

/// A call frame on the VM call stack.
#[derive(Clone)]
pub struct CallFrame {
    /// The closure being executed.
    pub closure: Rc<Closure>,
    /// Instruction pointer (index into chunk.code).
    pub ip: usize,
    /// Stack index of the callee slot; locals start here.
    pub base: usize,
}

/// The bytecode VM.
pub struct Vm {
    /// Value stack.
    pub(super) stack: Vec<Value>,
    /// Call frame stack.
    pub(super) frames: Vec<CallFrame>,
    /// Global variables.
    pub globals: AHashMap<Rc<str>, Value>,
    /// Upvalues still pointing into the stack.
    pub(super) upvalues: OpenUpvalues,
    /// Compiles and caches object programs.
    pub loader: ObjectLoader,
    pub(super) config: VmConfig,
    /// Captured output, when capturing.
    output: Option<String>,
    started: Instant,
}

impl Vm {
    /// A VM with default settings, loading objects from the current directory.
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let loader = ObjectLoader::from_fs(&config.object_root, &config.object_extension);
        Self::with_loader(config, loader)
    }

    /// A VM reading objects from `source`.
    pub fn with_source(config: VmConfig, source: Box<dyn ObjectSource>) -> Self {
        let loader = ObjectLoader::new(source, config.object_extension.clone());
        Self::with_loader(config, loader)
    }

    pub fn with_loader(config: VmConfig, loader: ObjectLoader) -> Self {
        let mut vm = Self {
            stack: Vec::with_capacity(config.stack_capacity),
            frames: Vec::with_capacity(64),
            globals: AHashMap::new(),
            upvalues: OpenUpvalues::new(),
            loader,
            config,
            output: None,
            started: Instant::now(),
        };
        natives::install(&mut vm);
        vm
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Run a compiled script to completion.
    ///
    /// On a runtime error the stack, frames and open upvalues are reset
    /// before returning; globals and cached objects survive.
    pub fn interpret(&mut self, script: Rc<Compilation>) -> Result<Value, LpcError> {
        let closure = Rc::new(Closure::new(script, Vec::new()));
        self.push(Value::Closure(closure.clone()));
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            base: self.stack.len() - 1,
        });
        self.execute()
    }

    /// Construct the object at `path`, running its program (and its parents').
    pub fn load_object(&mut self, path: &str) -> Result<ObjectRef, LpcError> {
        let program = self.loader.load(path)?;
        self.push(Value::Compilation(program));
        let pending = self.stack.len() - 1;
        if let Err(error) = self.call_pending(pending) {
            return Err(self.runtime_failure(error));
        }
        match self.execute()? {
            Value::Object(object) => Ok(object),
            other => Err(LpcError::Runtime {
                error: RuntimeError::type_error(format!(
                    "Object program returned {}.",
                    other.type_name()
                )),
                trace: CallTrace::default(),
            }),
        }
    }

    fn execute(&mut self) -> Result<Value, LpcError> {
        self.run().map_err(|error| self.runtime_failure(error))
    }

    fn runtime_failure(&mut self, error: RuntimeError) -> LpcError {
        let trace = self.call_trace();
        self.reset();
        LpcError::Runtime { error, trace }
    }

    /// Active frames, innermost first.
    pub fn call_trace(&self) -> CallTrace {
        let frames = self
            .frames
            .iter()
            .rev()
            .map(|frame| {
                let compilation = &frame.closure.compilation;
                TraceFrame {
                    line: compilation.chunk.line_at(frame.ip.saturating_sub(1)),
                    name: compilation.frame_name(),
                }
            })
            .collect();
        CallTrace { frames }
    }

    /// Drop all execution state. Globals and the object cache are kept.
    pub fn reset(&mut self) {
        self.upvalues.close_from(0, &self.stack);
        self.stack.clear();
        self.frames.clear();
        debug!("vm reset");
    }

    /// Run the dispatch loop until the outermost frame returns.
    pub(super) fn run(&mut self) -> Result<Value, RuntimeError> {
        loop {
            // A freshly loaded object program on top of the stack runs before anything else.
            if matches!(self.stack.last(), Some(Value::Compilation(_))) {
                let slot = self.stack.len() - 1;
                self.call_pending(slot)?;
            }

            let frame_idx = self.frames.len() - 1;
            let frame = &self.frames[frame_idx];
            let ip = frame.ip;
            let Some(&byte) = frame.closure.compilation.chunk.code.get(ip) else {
                return Ok(Value::Nil);
            };
            if self.config.trace_execution {
                let (text, _) = disassemble_instruction(&frame.closure.compilation.chunk, ip);
                trace!(depth = self.frames.len(), stack = self.stack.len(), "{}", text);
            }
            let op = OpCode::from_u8(byte).ok_or(RuntimeError::InvalidOpcode(byte))?;

            // Advance IP
            self.frames[frame_idx].ip += 1;

            match op {
                OpCode::Constant => {
                    let idx = self.read_u16(frame_idx);
                    let value =
                        Value::from(&self.frames[frame_idx].closure.compilation.chunk.constants[idx as usize]);
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),

                OpCode::Pop => {
                    self.pop();
                }
                OpCode::Dup => {
                    let val = self.peek(0).clone();
                    self.push(val);
                }

                OpCode::GetLocal => {
                    let slot = self.read_byte(frame_idx) as usize;
                    let base = self.frames[frame_idx].base;
                    let val = self.stack[base + slot].clone();
                    self.push(val);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte(frame_idx) as usize;
                    let val = self.peek(0).clone();
                    let base = self.frames[frame_idx].base;
                    self.stack[base + slot] = val;
                }
                OpCode::GetGlobal => {
                    let name = self.read_name(frame_idx);
                    match self.globals.get(&name) {
                        Some(val) => {
                            let val = val.clone();
                            self.push(val);
                        }
                        None => return Err(RuntimeError::undefined_variable(&*name)),
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_name(frame_idx);
                    let val = self.pop();
                    self.globals.insert(name, val);
                }
                OpCode::SetGlobal => {
                    let name = self.read_name(frame_idx);
                    let val = self.peek(0).clone();
                    match self.globals.get_mut(&name) {
                        Some(slot) => *slot = val,
                        None => return Err(RuntimeError::undefined_variable(&*name)),
                    }
                }

                OpCode::GetUpvalue => {
                    let idx = self.read_byte(frame_idx) as usize;
                    let val = read_upvalue(&self.frames[frame_idx].closure.upvalues[idx], &self.stack);
                    self.push(val);
                }
                OpCode::SetUpvalue => {
                    let idx = self.read_byte(frame_idx) as usize;
                    let cell = self.frames[frame_idx].closure.upvalues[idx].clone();
                    let val = self.peek(0).clone();
                    write_upvalue(&cell, &mut self.stack, val);
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.upvalues.close_from(top, &self.stack);
                    self.pop();
                }

                OpCode::GetProperty => {
                    let name = self.read_name(frame_idx);
                    let receiver = self.pop();
                    let val = self.get_property(&receiver, &name)?;
                    self.push(val);
                }
                OpCode::SetProperty => {
                    let name = self.read_name(frame_idx);
                    let val = self.pop();
                    let receiver = self.pop();
                    self.set_property(&receiver, &name, val.clone())?;
                    self.push(val);
                }

                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::NotEqual => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a != b));
                }
                OpCode::Greater | OpCode::GreaterEqual | OpCode::Less | OpCode::LessEqual => {
                    let b = self.pop();
                    let a = self.pop();
                    let result = self.op_compare(op, &a, &b)?;
                    self.push(Value::Bool(result));
                }

                OpCode::Add => {
                    let b = self.pop();
                    let a = self.pop();
                    let result = self.op_add(a, b)?;
                    self.push(result);
                }
                OpCode::Subtract | OpCode::Multiply | OpCode::Divide | OpCode::Modulo => {
                    let b = self.pop();
                    let a = self.pop();
                    let result = self.op_arithmetic(op, &a, &b)?;
                    self.push(result);
                }
                OpCode::Not => {
                    let val = self.pop();
                    self.push(Value::Bool(!val.is_truthy()));
                }
                OpCode::Negate => match self.pop() {
                    Value::Number(n) => self.push(Value::Number(-n)),
                    _ => return Err(RuntimeError::type_error("Operand must be a number.")),
                },

                OpCode::Jump => {
                    let offset = self.read_u16(frame_idx) as usize;
                    self.frames[frame_idx].ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16(frame_idx) as usize;
                    if !self.peek(0).is_truthy() {
                        self.frames[frame_idx].ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16(frame_idx) as usize;
                    self.frames[frame_idx].ip -= offset;
                }

                OpCode::Call => {
                    let argc = self.read_byte(frame_idx) as usize;
                    self.call_value(argc)?;
                }
                OpCode::Invoke => {
                    let name = self.read_name(frame_idx);
                    let argc = self.read_byte(frame_idx) as usize;
                    self.invoke(&name, argc)?;
                }
                OpCode::SuperInvoke => {
                    let name = self.read_name(frame_idx);
                    let argc = self.read_byte(frame_idx) as usize;
                    self.super_invoke(&name, argc)?;
                }
                OpCode::Closure => {
                    let idx = self.read_u16(frame_idx);
                    let closure = self.make_closure(frame_idx, idx)?;
                    self.push(Value::Closure(closure));
                }
                OpCode::Return => {
                    let result = self.pop();
                    let base = self.frames[frame_idx].base;
                    self.upvalues.close_from(base, &self.stack);
                    self.frames.pop();
                    self.stack.truncate(base);
                    if self.frames.is_empty() {
                        return Ok(result);
                    }
                    self.push(result);
                }

                OpCode::Object => {
                    let name = self.read_name(frame_idx);
                    let base = self.frames[frame_idx].base;
                    debug!(object = %name, "constructing object");
                    let object = Rc::new(RefCell::new(RuntimeObject::new(name)));
                    self.stack[base] = Value::Object(object);
                }
                OpCode::Compile => {
                    let path = self.pop();
                    let Some(path) = path.as_str() else {
                        return Err(RuntimeError::type_error(format!(
                            "Object path must be a string, not {}.",
                            path.type_name()
                        )));
                    };
                    let program = self.loader.load(path)?;
                    self.push(Value::Compilation(program));
                }
                OpCode::Inherit => {
                    let parent = self.pop();
                    self.inherit(parent)?;
                }
                OpCode::Field => {
                    let name = self.read_name(frame_idx);
                    let value = self.pop();
                    self.define_field(name, value)?;
                }
                OpCode::Method => {
                    let name = self.read_name(frame_idx);
                    let value = self.pop();
                    self.define_method(name, value)?;
                }
                OpCode::Super => {
                    let receiver = self.pop();
                    let parent = self.super_of(frame_idx, &receiver)?;
                    self.push(Value::Object(parent));
                }
            }
        }
    }

    // --- Stack operations ---

    #[inline]
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or(Value::Nil)
    }

    #[inline]
    pub fn peek(&self, distance: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - distance]
    }

    /// Number of values currently on the stack.
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Number of upvalues still pointing into the stack.
    pub fn open_upvalues(&self) -> usize {
        self.upvalues.open_count()
    }

    // --- Bytecode reading ---

    #[inline]
    fn read_byte(&mut self, frame_idx: usize) -> u8 {
        let frame = &mut self.frames[frame_idx];
        let byte = frame.closure.compilation.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    #[inline]
    fn read_u16(&mut self, frame_idx: usize) -> u16 {
        let frame = &mut self.frames[frame_idx];
        let value = frame.closure.compilation.chunk.read_u16(frame.ip);
        frame.ip += 2;
        value
    }

    /// Read a u16 operand naming a string constant.
    fn read_name(&mut self, frame_idx: usize) -> Rc<str> {
        let idx = self.read_u16(frame_idx) as usize;
        match &self.frames[frame_idx].closure.compilation.chunk.constants[idx] {
            super::chunk::Constant::String(s) => s.clone(),
            _ => Rc::from(""),
        }
    }

    /// The parent of the object that defines the running method.
    fn super_of(&self, frame_idx: usize, receiver: &Value) -> Result<ObjectRef, RuntimeError> {
        let Some(object) = receiver.as_object() else {
            return Err(RuntimeError::type_error(format!(
                "'::' needs an object receiver, not {}.",
                receiver.type_name()
            )));
        };
        let compilation = &self.frames[frame_idx].closure.compilation;
        let owner = compilation.owner.as_deref().unwrap_or(compilation.name.as_str());
        let defining = find_ancestor(object, owner).unwrap_or_else(|| object.clone());
        let parent = defining.borrow().super_object.clone();
        parent.ok_or_else(|| RuntimeError::NoParent(defining.borrow().name.to_string()))
    }

    // --- Natives and output ---

    pub fn define_native(&mut self, native: Rc<NativeFunction>) {
        self.globals.insert(Rc::from(native.name), Value::Native(native));
    }

    /// Time since this VM was created.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Buffer program output instead of writing it to stdout.
    pub fn capture_output(&mut self) {
        self.output.get_or_insert_with(String::new);
    }

    /// Take everything captured so far.
    pub fn take_output(&mut self) -> String {
        self.output.as_mut().map(std::mem::take).unwrap_or_default()
    }

    pub fn write_output(&mut self, text: &str) {
        match &mut self.output {
            Some(buffer) => buffer.push_str(text),
            None => {
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
            }
        }
    }

    // --- Arithmetic operations ---

    fn op_add(&self, a: Value, b: Value) -> Result<Value, RuntimeError> {
        match (&a, &b) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(Rc::from(format!("{}{}", a, b))))
            }
            _ => Err(RuntimeError::type_error(format!(
                "Cannot add {} and {}.",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    fn op_arithmetic(&self, op: OpCode, a: &Value, b: &Value) -> Result<Value, RuntimeError> {
        let (Value::Number(a), Value::Number(b)) = (a, b) else {
            return Err(RuntimeError::type_error("Operands must be numbers."));
        };
        let result = match op {
            OpCode::Subtract => a - b,
            OpCode::Multiply => a * b,
            OpCode::Divide | OpCode::Modulo if *b == 0.0 => {
                return Err(RuntimeError::new("Division by zero."));
            }
            OpCode::Divide => a / b,
            _ => a % b,
        };
        Ok(Value::Number(result))
    }

    fn op_compare(&self, op: OpCode, a: &Value, b: &Value) -> Result<bool, RuntimeError> {
        let ordering = match (a, b) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => {
                return Err(RuntimeError::type_error(format!(
                    "Cannot compare {} and {}.",
                    a.type_name(),
                    b.type_name()
                )))
            }
        };
        let Some(ordering) = ordering else {
            return Ok(false);
        };
        Ok(match op {
            OpCode::Greater => ordering.is_gt(),
            OpCode::GreaterEqual => ordering.is_ge(),
            OpCode::Less => ordering.is_lt(),
            _ => ordering.is_le(),
        })
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
