//! Bytecode instruction definitions.
//!
//! Operands follow the opcode byte. Constant-pool indices and jump offsets are
//! big-endian `u16`; slots, upvalue indices and argument counts are one byte.

/// Opcodes for the bytecode virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    // ============ Constants & Stack ============
    /// Load a constant from the constant pool: CONSTANT <index:u16>
    Constant = 0,
    /// Push nil onto the stack
    Nil,
    /// Push true onto the stack
    True,
    /// Push false onto the stack
    False,
    /// Pop the top value from the stack
    Pop,
    /// Duplicate the top value on the stack
    Dup,

    // ============ Variables ============
    /// Get a local variable: GET_LOCAL <slot:u8>
    GetLocal,
    /// Set a local variable: SET_LOCAL <slot:u8>
    SetLocal,
    /// Get a global variable: GET_GLOBAL <name_index:u16>
    GetGlobal,
    /// Define a global variable: DEFINE_GLOBAL <name_index:u16>
    DefineGlobal,
    /// Set an existing global variable: SET_GLOBAL <name_index:u16>
    SetGlobal,
    /// Get an upvalue (captured variable): GET_UPVALUE <index:u8>
    GetUpvalue,
    /// Set an upvalue: SET_UPVALUE <index:u8>
    SetUpvalue,
    /// Close the upvalue for the slot on top of the stack, then pop it
    CloseUpvalue,

    // ============ Properties ============
    /// Read a property of the object on top: GET_PROPERTY <name_index:u16>
    GetProperty,
    /// Write a property: stack has [object, value]: SET_PROPERTY <name_index:u16>
    SetProperty,

    // ============ Comparison ============
    /// Equal: a == b
    Equal,
    /// Not equal: a != b
    NotEqual,
    /// Greater than: a > b
    Greater,
    /// Greater or equal: a >= b
    GreaterEqual,
    /// Less than: a < b
    Less,
    /// Less or equal: a <= b
    LessEqual,

    // ============ Arithmetic ============
    /// Add two numbers, or concatenate when either side is a string
    Add,
    /// Subtract two values: a - b
    Subtract,
    /// Multiply two values: a * b
    Multiply,
    /// Divide two values: a / b
    Divide,
    /// Modulo: a % b
    Modulo,
    /// Logical not: !a
    Not,
    /// Negate a value: -a
    Negate,

    // ============ Control Flow ============
    /// Unconditional forward jump: JUMP <offset:u16>
    Jump,
    /// Jump forward if the top is falsy, without popping: JUMP_IF_FALSE <offset:u16>
    JumpIfFalse,
    /// Jump backward: LOOP <offset:u16>
    Loop,

    // ============ Functions ============
    /// Call the value below N arguments: CALL <argc:u8>
    Call,
    /// Call a method on the receiver below N arguments: INVOKE <name:u16> <argc:u8>
    Invoke,
    /// Call a method on an explicit parent object: SUPER_INVOKE <name:u16> <argc:u8>
    SuperInvoke,
    /// Create a closure: CLOSURE <index:u16> then (is_local:u8, index:u8) per upvalue
    Closure,
    /// Return from the current frame
    Return,

    // ============ Objects ============
    /// Install a fresh object in the receiver slot: OBJECT <name_index:u16>
    Object,
    /// Replace the path string on top with its compiled object program
    Compile,
    /// Link the object on top as the parent of the object below it, popping the parent
    Inherit,
    /// Record the value on top as a field of the object below: FIELD <name_index:u16>
    Field,
    /// Record the closure on top as a method of the object below: METHOD <name_index:u16>
    Method,
    /// Replace the receiver on top with the parent of the running method's object
    Super,
}

impl OpCode {
    /// Get the number of operand bytes following this opcode.
    /// `Closure` reports only its constant index; its capture pairs are variable.
    pub fn operand_size(&self) -> usize {
        match self {
            // No operands
            OpCode::Nil
            | OpCode::True
            | OpCode::False
            | OpCode::Pop
            | OpCode::Dup
            | OpCode::CloseUpvalue
            | OpCode::Equal
            | OpCode::NotEqual
            | OpCode::Greater
            | OpCode::GreaterEqual
            | OpCode::Less
            | OpCode::LessEqual
            | OpCode::Add
            | OpCode::Subtract
            | OpCode::Multiply
            | OpCode::Divide
            | OpCode::Modulo
            | OpCode::Not
            | OpCode::Negate
            | OpCode::Return
            | OpCode::Compile
            | OpCode::Inherit
            | OpCode::Super => 0,

            // 1 byte operand
            OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetUpvalue
            | OpCode::SetUpvalue
            | OpCode::Call => 1,

            // 2 byte operand
            OpCode::Constant
            | OpCode::GetGlobal
            | OpCode::DefineGlobal
            | OpCode::SetGlobal
            | OpCode::GetProperty
            | OpCode::SetProperty
            | OpCode::Jump
            | OpCode::JumpIfFalse
            | OpCode::Loop
            | OpCode::Closure
            | OpCode::Object
            | OpCode::Field
            | OpCode::Method => 2,

            // 3 byte operand (2 bytes + 1 byte)
            OpCode::Invoke | OpCode::SuperInvoke => 3,
        }
    }

    /// Mnemonic used by the disassembler.
    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Constant => "CONSTANT",
            OpCode::Nil => "NIL",
            OpCode::True => "TRUE",
            OpCode::False => "FALSE",
            OpCode::Pop => "POP",
            OpCode::Dup => "DUP",
            OpCode::GetLocal => "GET_LOCAL",
            OpCode::SetLocal => "SET_LOCAL",
            OpCode::GetGlobal => "GET_GLOBAL",
            OpCode::DefineGlobal => "DEFINE_GLOBAL",
            OpCode::SetGlobal => "SET_GLOBAL",
            OpCode::GetUpvalue => "GET_UPVALUE",
            OpCode::SetUpvalue => "SET_UPVALUE",
            OpCode::CloseUpvalue => "CLOSE_UPVALUE",
            OpCode::GetProperty => "GET_PROPERTY",
            OpCode::SetProperty => "SET_PROPERTY",
            OpCode::Equal => "EQUAL",
            OpCode::NotEqual => "NOT_EQUAL",
            OpCode::Greater => "GREATER",
            OpCode::GreaterEqual => "GREATER_EQUAL",
            OpCode::Less => "LESS",
            OpCode::LessEqual => "LESS_EQUAL",
            OpCode::Add => "ADD",
            OpCode::Subtract => "SUBTRACT",
            OpCode::Multiply => "MULTIPLY",
            OpCode::Divide => "DIVIDE",
            OpCode::Modulo => "MODULO",
            OpCode::Not => "NOT",
            OpCode::Negate => "NEGATE",
            OpCode::Jump => "JUMP",
            OpCode::JumpIfFalse => "JUMP_IF_FALSE",
            OpCode::Loop => "LOOP",
            OpCode::Call => "CALL",
            OpCode::Invoke => "INVOKE",
            OpCode::SuperInvoke => "SUPER_INVOKE",
            OpCode::Closure => "CLOSURE",
            OpCode::Return => "RETURN",
            OpCode::Object => "OBJECT",
            OpCode::Compile => "COMPILE",
            OpCode::Inherit => "INHERIT",
            OpCode::Field => "FIELD",
            OpCode::Method => "METHOD",
            OpCode::Super => "SUPER",
        }
    }

    /// Convert from u8 to OpCode.
    pub fn from_u8(byte: u8) -> Option<OpCode> {
        if byte <= OpCode::Super as u8 {
            // SAFETY: the enum is `repr(u8)` with dense discriminants 0..=Super.
            Some(unsafe { std::mem::transmute::<u8, OpCode>(byte) })
        } else {
            None
        }
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> u8 {
        op as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for i in 0..=OpCode::Super as u8 {
            let op = OpCode::from_u8(i).expect("valid opcode");
            assert_eq!(i, op as u8);
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert!(OpCode::from_u8(OpCode::Super as u8 + 1).is_none());
        assert!(OpCode::from_u8(255).is_none());
    }

    #[test]
    fn test_invoke_operands() {
        assert_eq!(OpCode::Invoke.operand_size(), 3);
        assert_eq!(OpCode::GetLocal.operand_size(), 1);
        assert_eq!(OpCode::Jump.operand_size(), 2);
    }
}
