use std::fmt::Write;

use crate::bytecode::chunk::Chunk;
use crate::bytecode::op_code::{OpCode, operand_widths, read_u8, read_u16, read_u24};
use crate::runtime::gc::Heap;

/// Renders a whole chunk, one instruction per line.
pub fn disassemble_chunk(heap: &Heap, chunk: &Chunk, name: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ==", name);

    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(heap, chunk, offset, &mut out);
    }
    out
}

/// Renders the instruction at `offset` and returns the offset of the next
/// one. Constant operands are followed by the rendered constant; `OpClosure`
/// additionally decodes its run of `(is_local, index)` capture pairs.
pub fn disassemble_instruction(
    heap: &Heap,
    chunk: &Chunk,
    offset: usize,
    out: &mut String,
) -> usize {
    let op = OpCode::from(chunk.code[offset]);
    let _ = write!(out, "{:04} {}", offset, op);

    let mut operands = Vec::new();
    let mut next = offset + 1;
    for width in operand_widths(op) {
        let operand = match width {
            1 => read_u8(&chunk.code, next) as usize,
            2 => read_u16(&chunk.code, next) as usize,
            3 => read_u24(&chunk.code, next) as usize,
            _ => unreachable!("unsupported operand width"),
        };
        operands.push(operand);
        next += width;
    }

    for operand in &operands {
        let _ = write!(out, " {}", operand);
    }
    if let Some(&constant) = operands.first() {
        if is_constant_indexed(op) {
            let rendered = heap.value_to_string(chunk.constants[constant]);
            let _ = write!(out, " ({})", rendered);
        }
    }

    if op == OpCode::OpClosure {
        let function = chunk.constants[operands[0]]
            .as_obj()
            .expect("closure constant must be a function");
        for _ in 0..heap.function(function).upvalue_count {
            let is_local = read_u8(&chunk.code, next) != 0;
            let index = read_u8(&chunk.code, next + 1);
            let _ = write!(
                out,
                " |{} {}",
                if is_local { "local" } else { "upvalue" },
                index
            );
            next += 2;
        }
    }

    let _ = writeln!(out);
    next
}

fn is_constant_indexed(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::OpConstant
            | OpCode::OpConstantLong
            | OpCode::OpDefineGlobal
            | OpCode::OpDefineGlobalLong
            | OpCode::OpGetGlobal
            | OpCode::OpGetGlobalLong
            | OpCode::OpSetGlobal
            | OpCode::OpSetGlobalLong
            | OpCode::OpClosure
            | OpCode::OpClass
            | OpCode::OpClassLong
            | OpCode::OpMethod
            | OpCode::OpMethodLong
            | OpCode::OpGetProperty
            | OpCode::OpGetPropertyLong
            | OpCode::OpSetProperty
            | OpCode::OpSetPropertyLong
            | OpCode::OpGetSuper
            | OpCode::OpGetSuperLong
            | OpCode::OpInvoke
            | OpCode::OpInvokeLong
            | OpCode::OpSuperInvoke
            | OpCode::OpSuperInvokeLong
    )
}
