use super::{CompileError, compile};
use crate::bytecode::op_code::{OpCode, operand_widths};
use crate::runtime::gc::{Handle, Heap};
use crate::runtime::object::HeapObject;
use crate::runtime::value::Value;

fn compile_ok(source: &str) -> (Heap, Handle) {
    let mut heap = Heap::new();
    let script = compile(source, &mut heap)
        .unwrap_or_else(|errors| panic!("compile failed for {:?}: {:?}", source, errors));
    (heap, script)
}

fn script_code(source: &str) -> Vec<u8> {
    let (heap, script) = compile_ok(source);
    heap.function(script).chunk.code.clone()
}

fn compile_errors(source: &str) -> Vec<CompileError> {
    let mut heap = Heap::new();
    compile(source, &mut heap).expect_err("expected compile errors")
}

fn first_error(source: &str) -> String {
    compile_errors(source)[0].message.clone()
}

/// Decodes the opcode stream, skipping operands. Assumes the code contains
/// no `OpClosure` (whose trailing capture pairs are not width-described).
fn opcodes(code: &[u8]) -> Vec<OpCode> {
    let mut ops = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let op = OpCode::from(code[offset]);
        assert_ne!(op, OpCode::OpClosure, "opcodes() cannot walk closures");
        ops.push(op);
        offset += 1 + operand_widths(op).iter().sum::<usize>();
    }
    ops
}

#[test]
fn test_expression_statement_bytecode() {
    assert_eq!(
        script_code("1;"),
        vec![
            OpCode::OpConstant as u8,
            0,
            OpCode::OpPop as u8,
            OpCode::OpNil as u8,
            OpCode::OpReturn as u8,
        ]
    );
}

#[test]
fn test_print_statement_bytecode() {
    assert_eq!(
        script_code("print 1;"),
        vec![
            OpCode::OpConstant as u8,
            0,
            OpCode::OpPrint as u8,
            OpCode::OpNil as u8,
            OpCode::OpReturn as u8,
        ]
    );
}

#[test]
fn test_chunk_always_ends_with_return() {
    for source in ["", "1;", "var a = 1;", "print 1 + 2;", "{ var a = 1; }"] {
        let code = script_code(source);
        assert_eq!(*code.last().unwrap(), OpCode::OpReturn as u8, "{:?}", source);
    }
}

#[test]
fn test_local_slots() {
    // Slot 0 is reserved, so the first local lands in slot 1.
    assert_eq!(
        script_code("{ var a = 1; a = 2; a; }"),
        vec![
            OpCode::OpConstant as u8,
            0,
            OpCode::OpConstant as u8,
            1,
            OpCode::OpSetLocal as u8,
            1,
            OpCode::OpPop as u8,
            OpCode::OpGetLocal as u8,
            1,
            OpCode::OpPop as u8,
            OpCode::OpPop as u8,
            OpCode::OpNil as u8,
            OpCode::OpReturn as u8,
        ]
    );
}

#[test]
fn test_global_define_and_get() {
    // The name constant is added before the initializer's constant.
    let (heap, script) = compile_ok("var a = 1; print a;");
    let chunk = &heap.function(script).chunk;
    assert_eq!(
        chunk.code,
        vec![
            OpCode::OpConstant as u8,
            1,
            OpCode::OpDefineGlobal as u8,
            0,
            OpCode::OpGetGlobal as u8,
            2,
            OpCode::OpPrint as u8,
            OpCode::OpNil as u8,
            OpCode::OpReturn as u8,
        ]
    );
    assert_eq!(chunk.constants.len(), 3);
    assert_eq!(chunk.constants[1], Value::Number(1.0));
}

#[test]
fn test_if_else_jump_patching() {
    let code = script_code("if (true) print 1;");
    assert_eq!(
        code,
        vec![
            OpCode::OpTrue as u8,
            OpCode::OpJumpIfFalse as u8,
            0,
            7,
            OpCode::OpPop as u8,
            OpCode::OpConstant as u8,
            0,
            OpCode::OpPrint as u8,
            OpCode::OpJump as u8,
            0,
            1,
            OpCode::OpPop as u8,
            OpCode::OpNil as u8,
            OpCode::OpReturn as u8,
        ]
    );
}

#[test]
fn test_while_loop_shape() {
    let ops = opcodes(&script_code("while (true) print 1;"));
    assert_eq!(
        ops,
        vec![
            OpCode::OpTrue,
            OpCode::OpJumpIfFalse,
            OpCode::OpPop,
            OpCode::OpConstant,
            OpCode::OpPrint,
            OpCode::OpLoop,
            OpCode::OpPop,
            OpCode::OpNil,
            OpCode::OpReturn,
        ]
    );
}

#[test]
fn test_logical_operators_emit_explicit_pops() {
    let ops = opcodes(&script_code("1 and 2;"));
    assert_eq!(
        ops,
        vec![
            OpCode::OpConstant,
            OpCode::OpJumpIfFalse,
            OpCode::OpPop,
            OpCode::OpConstant,
            OpCode::OpPop,
            OpCode::OpNil,
            OpCode::OpReturn,
        ]
    );

    let ops = opcodes(&script_code("1 or 2;"));
    assert_eq!(
        ops,
        vec![
            OpCode::OpConstant,
            OpCode::OpJumpIfFalse,
            OpCode::OpJump,
            OpCode::OpPop,
            OpCode::OpConstant,
            OpCode::OpPop,
            OpCode::OpNil,
            OpCode::OpReturn,
        ]
    );
}

#[test]
fn test_fused_comparison_opcodes() {
    assert!(script_code("1 != 2;").contains(&(OpCode::OpNotEqual as u8)));
    assert!(script_code("1 <= 2;").contains(&(OpCode::OpLessEqual as u8)));
    assert!(script_code("1 >= 2;").contains(&(OpCode::OpGreaterEqual as u8)));
}

#[test]
fn test_upvalue_descriptors() {
    let (heap, script) = compile_ok("fun outer() { var x = 1; fun inner() { print x; } }");

    // outer is the script's only function constant.
    let outer = heap.function(script)
        .chunk
        .constants
        .iter()
        .find_map(|c| match c {
            Value::Obj(h) if matches!(heap.get(*h), HeapObject::Function(_)) => Some(*h),
            _ => None,
        })
        .expect("outer function constant");

    let outer_fn = heap.function(outer);
    let inner = outer_fn
        .chunk
        .constants
        .iter()
        .find_map(|c| match c {
            Value::Obj(h) if matches!(heap.get(*h), HeapObject::Function(_)) => Some(*h),
            _ => None,
        })
        .expect("inner function constant");

    assert_eq!(heap.function(inner).upvalue_count, 1);

    // outer's OpClosure is followed by the constant index and one
    // (is_local=1, slot=1) pair: x lives in outer's slot 1.
    let code = &outer_fn.chunk.code;
    let closure_at = code
        .iter()
        .position(|&b| b == OpCode::OpClosure as u8)
        .expect("OpClosure in outer");
    assert_eq!(code[closure_at + 2], 1);
    assert_eq!(code[closure_at + 3], 1);
}

#[test]
fn test_block_close_upvalue_emission() {
    // f captures x; leaving the block must close x, not pop it.
    let code = script_code("{ var x = 1; fun f() { print x; } }");
    assert!(code.contains(&(OpCode::OpCloseUpvalue as u8)));
}

#[test]
fn test_function_arity_recorded() {
    let (heap, script) = compile_ok("fun three(a, b, c) {}");
    let function = heap.function(script)
        .chunk
        .constants
        .iter()
        .find_map(|c| match c {
            Value::Obj(h) if matches!(heap.get(*h), HeapObject::Function(_)) => Some(*h),
            _ => None,
        })
        .expect("function constant");
    assert_eq!(heap.function(function).arity, 3);
}

#[test]
fn test_long_constant_operands() {
    // Enough distinct globals to push name constants past index 255.
    let mut source = String::new();
    for i in 0..200 {
        source.push_str(&format!("var name{} = {};\n", i, i));
    }
    let (heap, script) = compile_ok(&source);
    let chunk = &heap.function(script).chunk;
    assert!(chunk.constants.len() > 256);
    assert!(opcodes(&chunk.code).contains(&OpCode::OpDefineGlobalLong));
}

#[test]
fn test_same_scope_shadowing_rejected() {
    assert_eq!(
        first_error("{ var a = 1; var a = 2; }"),
        "Already a variable with this name in this scope."
    );
    // Across scopes it is fine.
    compile_ok("{ var a = 1; { var a = 2; } }");
    compile_ok("var a = 1; { var a = 2; }");
}

#[test]
fn test_local_initializer_self_reference() {
    assert_eq!(
        first_error("{ var x = x; }"),
        "Can't read local variable in its own initializer."
    );
}

#[test]
fn test_invalid_assignment_target() {
    assert_eq!(first_error("1 + 2 = 3;"), "Invalid assignment target.");
    assert_eq!(first_error("var a; var b; a + b = 1;"), "Invalid assignment target.");
}

#[test]
fn test_return_restrictions() {
    assert_eq!(first_error("return 1;"), "Can't return from top-level code.");
    assert_eq!(
        first_error("class Q { init() { return 1; } }"),
        "Can't return a value from an initializer."
    );
    // A bare return inside init is allowed.
    compile_ok("class Q { init() { return; } }");
}

#[test]
fn test_this_and_super_restrictions() {
    assert_eq!(first_error("print this;"), "Can't use 'this' outside of a class.");
    assert_eq!(
        first_error("fun f() { return this; }"),
        "Can't use 'this' outside of a class."
    );
    assert_eq!(
        first_error("print super.x;"),
        "Can't use 'super' outside of a class."
    );
    assert_eq!(
        first_error("class A { f() { super.f(); } }"),
        "Can't use 'super' in a class with no superclass."
    );
}

#[test]
fn test_class_cannot_inherit_from_itself() {
    assert_eq!(
        first_error("class A < A {}"),
        "A class can't inherit from itself."
    );
}

#[test]
fn test_parameter_limit() {
    let mut source = String::from("fun f(");
    for i in 0..256 {
        if i > 0 {
            source.push_str(", ");
        }
        source.push_str(&format!("p{}", i));
    }
    source.push_str(") {}");
    assert_eq!(
        first_error(&source),
        "Can't have more than 255 parameters."
    );
}

#[test]
fn test_argument_limit() {
    let mut source = String::from("fun f() {} f(");
    for i in 0..256 {
        if i > 0 {
            source.push_str(", ");
        }
        source.push_str(&format!("{}", i));
    }
    source.push_str(");");
    assert_eq!(first_error(&source), "Can't have more than 255 arguments.");
}

#[test]
fn test_synchronization_reports_multiple_errors() {
    let errors = compile_errors("var 1;\nprint;\n");
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].message, "Expect variable name.");
    assert_eq!(errors[0].line, 1);
    assert_eq!(errors[1].message, "Expect expression.");
    assert_eq!(errors[1].line, 2);
}

#[test]
fn test_error_rendering() {
    let errors = compile_errors("var 1;");
    assert_eq!(
        errors[0].to_string(),
        "[line 1] Error at '1': Expect variable name."
    );

    let errors = compile_errors("print 1");
    assert_eq!(
        errors[0].to_string(),
        "[line 1] Error at end: Expect ';' after value."
    );
}

#[test]
fn test_unterminated_string_is_reported_plain() {
    let errors = compile_errors("\"oops");
    assert_eq!(errors[0].to_string(), "[line 1] Error: Unterminated string.");
}

#[test]
fn test_script_constants_are_interned_strings() {
    let (heap, script) = compile_ok("var greeting = \"hi\"; var other = \"hi\";");
    let chunk = &heap.function(script).chunk;
    // Both "hi" literals collapse to the same interned handle.
    let strings: Vec<Handle> = chunk
        .constants
        .iter()
        .filter_map(|c| match c {
            Value::Obj(h) if matches!(heap.get(*h), HeapObject::Str(_)) => Some(*h),
            _ => None,
        })
        .collect();
    let hi: Vec<Handle> = strings
        .iter()
        .copied()
        .filter(|&h| &*heap.string(h).chars == "hi")
        .collect();
    assert_eq!(hi.len(), 2);
    assert_eq!(hi[0], hi[1]);
}
