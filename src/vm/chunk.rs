//! Bytecode chunk and compilation unit types.

use std::rc::Rc;

use ahash::AHashMap;
use thiserror::Error;

use super::opcode::OpCode;

/// A constant value stored in a chunk's constant pool.
#[derive(Debug, Clone)]
pub enum Constant {
    Number(f64),
    String(Rc<str>),
    /// A compiled function, method or object program.
    Compilation(Rc<Compilation>),
}

/// Hashable identity of a deduplicated constant. Numbers compare by bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstantKey {
    Number(u64),
    String(Rc<str>),
}

impl ConstantKey {
    fn of(constant: &Constant) -> Option<Self> {
        match constant {
            Constant::Number(n) => Some(Self::Number(n.to_bits())),
            Constant::String(s) => Some(Self::String(s.clone())),
            Constant::Compilation(_) => None,
        }
    }
}

/// Limits hit while appending to a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("Too many constants in one chunk.")]
    TooManyConstants,
    #[error("Too much code to jump over.")]
    JumpTooLarge,
    #[error("Loop body too large.")]
    LoopTooLarge,
}

/// A chunk of bytecode: instructions + constant pool + line info.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    /// The bytecode instructions and their operands.
    pub code: Vec<u8>,
    /// Source line numbers, parallel to `code`.
    pub lines: Vec<usize>,
    /// Constant pool.
    pub constants: Vec<Constant>,
    /// Pool index of each number and string constant.
    interned: AHashMap<ConstantKey, u16>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write an opcode to the chunk.
    pub fn write_op(&mut self, op: OpCode, line: usize) {
        self.write_byte(op as u8, line);
    }

    /// Write a raw byte to the chunk.
    pub fn write_byte(&mut self, byte: u8, line: usize) {
        self.code.push(byte);
        self.lines.push(line);
    }

    /// Write a 16-bit value to the chunk (big-endian).
    pub fn write_u16(&mut self, value: u16, line: usize) {
        for byte in value.to_be_bytes() {
            self.write_byte(byte, line);
        }
    }

    /// Read a 16-bit value from the chunk at offset.
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.code[offset], self.code[offset + 1]])
    }

    /// Add a constant to the pool and return its index.
    /// Strings and numbers are deduplicated.
    pub fn add_constant(&mut self, constant: Constant) -> Result<u16, ChunkError> {
        let key = ConstantKey::of(&constant);
        if let Some(idx) = key.as_ref().and_then(|k| self.interned.get(k)) {
            return Ok(*idx);
        }
        let idx = u16::try_from(self.constants.len()).map_err(|_| ChunkError::TooManyConstants)?;
        if let Some(key) = key {
            self.interned.insert(key, idx);
        }
        self.constants.push(constant);
        Ok(idx)
    }

    /// Get the current offset (next byte index).
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Patch the jump operand at `offset` so it lands on the current end of code.
    pub fn patch_jump(&mut self, offset: usize) -> Result<(), ChunkError> {
        let jump = self.code.len() - offset - 2;
        let jump = u16::try_from(jump).map_err(|_| ChunkError::JumpTooLarge)?;
        self.patch_u16(offset, jump);
        Ok(())
    }

    /// Overwrite a 16-bit value at offset.
    pub fn patch_u16(&mut self, offset: usize, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.code[offset] = hi;
        self.code[offset + 1] = lo;
    }

    /// Source line of the byte at `offset`.
    pub fn line_at(&self, offset: usize) -> usize {
        self.lines.get(offset).copied().unwrap_or(0)
    }
}

/// What kind of source construct a compilation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilationKind {
    Script,
    Function,
    Method,
    Object,
}

/// A compiled unit: a script, function, method or object program.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub kind: CompilationKind,
    /// Script name, function name, or object path.
    pub name: String,
    /// Number of parameters.
    pub arity: u8,
    /// Number of upvalues a closure over this compilation captures.
    pub upvalue_count: usize,
    /// The bytecode.
    pub chunk: Chunk,
    /// Path of the object unit a method (or a function nested in one) was compiled in.
    pub owner: Option<Rc<str>>,
}

impl Compilation {
    pub fn new(kind: CompilationKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
            owner: None,
        }
    }

    /// How this unit is named in backtraces.
    pub fn frame_name(&self) -> String {
        match self.kind {
            CompilationKind::Script => format!("script {}", self.name),
            CompilationKind::Object => format!("object {}", self.name),
            CompilationKind::Function | CompilationKind::Method if self.name.is_empty() => {
                "function()".to_string()
            }
            CompilationKind::Function | CompilationKind::Method => format!("{}()", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_basics() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Nil, 1);
        chunk.write_op(OpCode::Return, 2);
        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk.code[0], OpCode::Nil as u8);
        assert_eq!(chunk.line_at(1), 2);
    }

    #[test]
    fn test_u16_is_big_endian() {
        let mut chunk = Chunk::new();
        chunk.write_u16(0x1234, 1);
        assert_eq!(chunk.code, vec![0x12, 0x34]);
        assert_eq!(chunk.read_u16(0), 0x1234);
        assert_eq!(chunk.lines, vec![1, 1]);
    }

    #[test]
    fn test_constant_pool_dedup() {
        let mut chunk = Chunk::new();
        let a = chunk.add_constant(Constant::String("hp".into())).unwrap();
        let b = chunk.add_constant(Constant::Number(1.0)).unwrap();
        let c = chunk.add_constant(Constant::String("hp".into())).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(c, 0);
    }

    #[test]
    fn test_full_constant_pool() {
        let mut chunk = Chunk::new();
        for n in 0..=u16::MAX {
            assert_eq!(chunk.add_constant(Constant::Number(n as f64)), Ok(n));
        }
        // Existing constants are still found once the pool is full.
        assert_eq!(chunk.add_constant(Constant::Number(42.0)), Ok(42));
        assert_eq!(
            chunk.add_constant(Constant::String("new".into())),
            Err(ChunkError::TooManyConstants)
        );
        assert_eq!(chunk.constants.len(), 65_536);
    }

    #[test]
    fn test_functions_are_never_shared() {
        let mut chunk = Chunk::new();
        let f = Rc::new(Compilation::new(CompilationKind::Function, "f"));
        let a = chunk.add_constant(Constant::Compilation(f.clone())).unwrap();
        let b = chunk.add_constant(Constant::Compilation(f)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_jump_patching() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Jump, 1);
        let operand = chunk.len();
        chunk.write_u16(0xffff, 1);
        chunk.write_op(OpCode::Nil, 1);
        chunk.write_op(OpCode::Pop, 1);
        chunk.patch_jump(operand).unwrap();
        assert_eq!(chunk.read_u16(operand), 2);
    }

    #[test]
    fn test_jump_too_large() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Jump, 1);
        let operand = chunk.len();
        chunk.write_u16(0xffff, 1);
        for _ in 0..=u16::MAX as usize {
            chunk.write_op(OpCode::Nil, 1);
        }
        assert_eq!(chunk.patch_jump(operand), Err(ChunkError::JumpTooLarge));
    }

    #[test]
    fn test_frame_names() {
        assert_eq!(
            Compilation::new(CompilationKind::Function, "add").frame_name(),
            "add()"
        );
        assert_eq!(
            Compilation::new(CompilationKind::Object, "/std/base").frame_name(),
            "object /std/base"
        );
    }
}
