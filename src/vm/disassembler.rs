//! Bytecode disassembler for debug output.

use super::chunk::{Chunk, Compilation, Constant};
use super::opcode::OpCode;

/// Disassemble a compilation and every function nested in it.
pub fn disassemble(compilation: &Compilation) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "== {} (arity={}, upvalues={}) ==\n",
        compilation.frame_name(),
        compilation.arity,
        compilation.upvalue_count
    ));

    let chunk = &compilation.chunk;
    let mut offset = 0;
    while offset < chunk.len() {
        let (text, next) = disassemble_instruction(chunk, offset);
        out.push_str(&text);
        out.push('\n');
        offset = next;
    }

    // Recursively disassemble nested functions
    for constant in &chunk.constants {
        if let Constant::Compilation(nested) = constant {
            out.push('\n');
            out.push_str(&disassemble(nested));
        }
    }
    out
}

/// Render the instruction at `offset`; returns the text and the next instruction's offset.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> (String, usize) {
    let line = chunk.line_at(offset);
    let line_str = if offset > 0 && chunk.line_at(offset - 1) == line {
        "   |".to_string()
    } else {
        format!("{:4}", line)
    };
    let prefix = format!("{:04} {} ", offset, line_str);

    let byte = chunk.code[offset];
    let Some(op) = OpCode::from_u8(byte) else {
        return (format!("{}UNKNOWN {}", prefix, byte), offset + 1);
    };
    let name = op.name();
    let operands = offset + 1;

    let (text, next) = match op {
        OpCode::GetLocal
        | OpCode::SetLocal
        | OpCode::GetUpvalue
        | OpCode::SetUpvalue
        | OpCode::Call => (format!("{:<16} {:>4}", name, chunk.code[operands]), operands + 1),

        OpCode::Constant
        | OpCode::GetGlobal
        | OpCode::DefineGlobal
        | OpCode::SetGlobal
        | OpCode::GetProperty
        | OpCode::SetProperty
        | OpCode::Object
        | OpCode::Field
        | OpCode::Method => {
            let idx = chunk.read_u16(operands);
            (
                format!("{:<16} {:>4} ({})", name, idx, format_constant(chunk, idx)),
                operands + 2,
            )
        }

        OpCode::Jump | OpCode::JumpIfFalse | OpCode::Loop => {
            let jump = chunk.read_u16(operands) as usize;
            let after = operands + 2;
            let target = if op == OpCode::Loop {
                after.saturating_sub(jump)
            } else {
                after + jump
            };
            (format!("{:<16} {:>4} -> {:04}", name, jump, target), after)
        }

        OpCode::Invoke | OpCode::SuperInvoke => {
            let idx = chunk.read_u16(operands);
            let argc = chunk.code[operands + 2];
            (
                format!(
                    "{:<16} {:>4} ({}) args={}",
                    name,
                    idx,
                    format_constant(chunk, idx),
                    argc
                ),
                operands + 3,
            )
        }

        OpCode::Closure => {
            let idx = chunk.read_u16(operands);
            let mut text = format!("{:<16} {:>4} ({})", name, idx, format_constant(chunk, idx));
            let mut next = operands + 2;
            if let Some(Constant::Compilation(function)) = chunk.constants.get(idx as usize) {
                for _ in 0..function.upvalue_count {
                    let kind = if chunk.code[next] == 1 { "local" } else { "upvalue" };
                    text.push_str(&format!(
                        "\n{:04}    |   {} {}",
                        next,
                        kind,
                        chunk.code[next + 1]
                    ));
                    next += 2;
                }
            }
            (text, next)
        }

        _ => (name.to_string(), operands),
    };

    (format!("{}{}", prefix, text), next)
}

fn format_constant(chunk: &Chunk, idx: u16) -> String {
    match chunk.constants.get(idx as usize) {
        Some(Constant::Number(n)) => {
            if n.fract() == 0.0 && n.is_finite() {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        Some(Constant::String(s)) => s.to_string(),
        Some(Constant::Compilation(c)) => format!("<fn {}>", c.name),
        None => "???".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::compiler::compile;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_disassemble_script() {
        let script = compile("test", "println(1);").unwrap();
        let expected = "\
== script test (arity=0, upvalues=0) ==
0000    1 GET_GLOBAL          0 (println)
0003    | CONSTANT            1 (1)
0006    | CALL                1
0008    | POP
0009    | NIL
0010    | RETURN
";
        assert_eq!(disassemble(&script), expected);
    }

    #[test]
    fn test_disassemble_jump_target() {
        let script = compile("test", "if (true) nil;").unwrap();
        let (text, next) = disassemble_instruction(&script.chunk, 1);
        assert_eq!(text, "0001    | JUMP_IF_FALSE       6 -> 0010");
        assert_eq!(next, 4);
    }

    #[test]
    fn test_disassemble_closure_captures() {
        let script = compile(
            "test",
            "void outer() { int x = 1; mixed f = function() { return x; }; }",
        )
        .unwrap();
        let text = disassemble(&script);
        assert!(text.contains("== outer() (arity=0, upvalues=0) =="));
        assert!(text.contains("|   local 1"));
        assert!(text.contains("== function() (arity=0, upvalues=1) =="));
    }
}
