use std::io::Write;

use crate::bytecode::op_code::OpCode;
use crate::runtime::object::{HeapObject, ObjClass, ObjClosure, UpvalueSlot};
use crate::runtime::table::Table;
use crate::runtime::value::Value;

use super::Vm;

impl Vm {
    /// Executes one instruction whose opcode byte has already been read.
    /// Returns `Ok(true)` when the program has finished.
    pub(super) fn dispatch(&mut self, op: OpCode) -> Result<bool, String> {
        match op {
            OpCode::OpConstant => {
                let value = self.read_constant();
                self.push(value);
            }
            OpCode::OpConstantLong => {
                let value = self.read_constant_long();
                self.push(value);
            }
            OpCode::OpNil => self.push(Value::Nil),
            OpCode::OpTrue => self.push(Value::Bool(true)),
            OpCode::OpFalse => self.push(Value::Bool(false)),

            OpCode::OpEqual => {
                let b = self.pop();
                let a = self.pop();
                self.push(Value::Bool(a == b));
            }
            OpCode::OpNotEqual => {
                let b = self.pop();
                let a = self.pop();
                self.push(Value::Bool(a != b));
            }
            OpCode::OpGreater
            | OpCode::OpGreaterEqual
            | OpCode::OpLess
            | OpCode::OpLessEqual
            | OpCode::OpSubtract
            | OpCode::OpMultiply
            | OpCode::OpDivide => self.binary_number_op(op)?,

            OpCode::OpAdd => self.add()?,

            OpCode::OpNot => {
                let value = self.pop();
                self.push(Value::Bool(value.is_falsey()));
            }
            OpCode::OpNegate => {
                let Value::Number(n) = self.peek(0) else {
                    return Err("Operand must be a number.".to_string());
                };
                self.pop();
                self.push(Value::Number(-n));
            }

            OpCode::OpPrint => {
                let value = self.pop();
                let text = self.heap.value_to_string(value);
                let _ = writeln!(self.out, "{}", text);
            }
            OpCode::OpPop => {
                self.pop();
            }

            OpCode::OpDefineGlobal | OpCode::OpDefineGlobalLong => {
                let (name, hash) = self.read_name(op == OpCode::OpDefineGlobalLong);
                let value = self.peek(0);
                self.globals.set(name, hash, value);
                self.pop();
            }
            OpCode::OpGetGlobal | OpCode::OpGetGlobalLong => {
                let (name, hash) = self.read_name(op == OpCode::OpGetGlobalLong);
                match self.globals.get(name, hash) {
                    Some(value) => self.push(value),
                    None => return Err(self.undefined_variable(name)),
                }
            }
            OpCode::OpSetGlobal | OpCode::OpSetGlobalLong => {
                let (name, hash) = self.read_name(op == OpCode::OpSetGlobalLong);
                let value = self.peek(0);
                if self.globals.set(name, hash, value) {
                    self.globals.delete(name, hash);
                    return Err(self.undefined_variable(name));
                }
                // The assigned value stays on the stack: assignment is an
                // expression.
            }

            OpCode::OpGetLocal => {
                let slot = self.read_byte() as usize;
                let value = self.stack[self.frame().slots + slot];
                self.push(value);
            }
            OpCode::OpSetLocal => {
                let slot = self.read_byte() as usize;
                let base = self.frame().slots;
                self.stack[base + slot] = self.peek(0);
            }

            OpCode::OpGetUpvalue => {
                let slot = self.read_byte() as usize;
                let upvalue = self.heap.closure(self.frame().closure).upvalues[slot];
                let value = match self.heap.upvalue(upvalue).slot {
                    UpvalueSlot::Open(stack_slot) => self.stack[stack_slot],
                    UpvalueSlot::Closed(value) => value,
                };
                self.push(value);
            }
            OpCode::OpSetUpvalue => {
                let slot = self.read_byte() as usize;
                let value = self.peek(0);
                let upvalue = self.heap.closure(self.frame().closure).upvalues[slot];
                match self.heap.upvalue(upvalue).slot {
                    UpvalueSlot::Open(stack_slot) => self.stack[stack_slot] = value,
                    UpvalueSlot::Closed(_) => {
                        self.heap.upvalue_mut(upvalue).slot = UpvalueSlot::Closed(value)
                    }
                }
            }

            OpCode::OpJump => {
                let offset = self.read_u16() as usize;
                self.frames.last_mut().unwrap().ip += offset;
            }
            OpCode::OpJumpIfFalse => {
                let offset = self.read_u16() as usize;
                // The condition is left on the stack; the compiler emits the
                // pops that keep both paths balanced.
                if self.peek(0).is_falsey() {
                    self.frames.last_mut().unwrap().ip += offset;
                }
            }
            OpCode::OpLoop => {
                let offset = self.read_u16() as usize;
                self.frames.last_mut().unwrap().ip -= offset;
            }

            OpCode::OpCall => {
                let arg_count = self.read_byte() as usize;
                let callee = self.peek(arg_count);
                self.call_value(callee, arg_count)?;
            }
            OpCode::OpClosure => {
                let index = self.read_byte() as usize;
                let function = self.current_chunk().constants[index]
                    .as_obj()
                    .expect("closure constant must be a function");
                self.maybe_collect();
                let upvalue_count = self.heap.function(function).upvalue_count;
                let closure = self.heap.alloc(HeapObject::Closure(ObjClosure {
                    function,
                    upvalues: Vec::with_capacity(upvalue_count),
                }));
                // Rooted before the upvalues are allocated one by one
                // (transient-allocation pattern).
                self.push(Value::Obj(closure));
                for _ in 0..upvalue_count {
                    let is_local = self.read_byte() != 0;
                    let index = self.read_byte() as usize;
                    let upvalue = if is_local {
                        let base = self.frame().slots;
                        self.capture_upvalue(base + index)
                    } else {
                        self.heap.closure(self.frame().closure).upvalues[index]
                    };
                    self.heap.closure_mut(closure).upvalues.push(upvalue);
                }
            }
            OpCode::OpCloseUpvalue => {
                self.close_upvalues(self.stack.len() - 1);
                self.pop();
            }

            OpCode::OpClass | OpCode::OpClassLong => {
                let (name, _) = self.read_name(op == OpCode::OpClassLong);
                self.maybe_collect();
                let class = self.heap.alloc(HeapObject::Class(ObjClass {
                    name,
                    methods: Table::new(),
                }));
                self.push(Value::Obj(class));
            }
            OpCode::OpInherit => {
                let Some(superclass) = self.peek(1).as_obj() else {
                    return Err("Superclass must be a class.".to_string());
                };
                if !matches!(self.heap.get(superclass), HeapObject::Class(_)) {
                    return Err("Superclass must be a class.".to_string());
                }
                let subclass = self
                    .peek(0)
                    .as_obj()
                    .expect("subclass must be on the stack");
                let methods = self.heap.class(superclass).methods.clone();
                self.heap.class_mut(subclass).methods.add_all(&methods);
                // Pop the subclass; the superclass stays bound as the
                // synthetic `super` local.
                self.pop();
            }
            OpCode::OpMethod | OpCode::OpMethodLong => {
                let (name, hash) = self.read_name(op == OpCode::OpMethodLong);
                let method = self.peek(0);
                let class = self
                    .peek(1)
                    .as_obj()
                    .expect("class must be on the stack");
                self.heap.class_mut(class).methods.set(name, hash, method);
                self.pop();
            }

            OpCode::OpGetProperty | OpCode::OpGetPropertyLong => {
                let (name, hash) = self.read_name(op == OpCode::OpGetPropertyLong);
                let instance = match self.peek(0).as_obj() {
                    Some(handle) if matches!(self.heap.get(handle), HeapObject::Instance(_)) => {
                        handle
                    }
                    _ => return Err("Only instances have properties.".to_string()),
                };
                if let Some(value) = self.heap.instance(instance).fields.get(name, hash) {
                    self.pop();
                    self.push(value);
                } else {
                    let class = self.heap.instance(instance).class;
                    self.bind_method(class, name)?;
                }
            }
            OpCode::OpSetProperty | OpCode::OpSetPropertyLong => {
                let (name, hash) = self.read_name(op == OpCode::OpSetPropertyLong);
                let instance = match self.peek(1).as_obj() {
                    Some(handle) if matches!(self.heap.get(handle), HeapObject::Instance(_)) => {
                        handle
                    }
                    _ => return Err("Only instances have fields.".to_string()),
                };
                let value = self.peek(0);
                self.heap
                    .instance_mut(instance)
                    .fields
                    .set(name, hash, value);
                let value = self.pop();
                self.pop();
                self.push(value);
            }
            OpCode::OpGetSuper | OpCode::OpGetSuperLong => {
                let (name, _) = self.read_name(op == OpCode::OpGetSuperLong);
                let superclass = self
                    .pop()
                    .as_obj()
                    .expect("superclass must be on the stack");
                self.bind_method(superclass, name)?;
            }

            OpCode::OpInvoke | OpCode::OpInvokeLong => {
                let (name, hash) = self.read_name(op == OpCode::OpInvokeLong);
                let arg_count = self.read_byte() as usize;
                self.invoke(name, hash, arg_count)?;
            }
            OpCode::OpSuperInvoke | OpCode::OpSuperInvokeLong => {
                let (name, hash) = self.read_name(op == OpCode::OpSuperInvokeLong);
                let arg_count = self.read_byte() as usize;
                let superclass = self
                    .pop()
                    .as_obj()
                    .expect("superclass must be on the stack");
                self.invoke_from_class(superclass, name, hash, arg_count)?;
            }

            OpCode::OpReturn => {
                let result = self.pop();
                let frame = self.frames.pop().expect("return without a frame");
                self.close_upvalues(frame.slots);
                if self.frames.is_empty() {
                    // Pop the script closure itself; the stack is now empty.
                    self.pop();
                    return Ok(true);
                }
                self.stack.truncate(frame.slots);
                self.push(result);
            }
        }
        Ok(false)
    }

    fn binary_number_op(&mut self, op: OpCode) -> Result<(), String> {
        let (Value::Number(a), Value::Number(b)) = (self.peek(1), self.peek(0)) else {
            return Err("Operands must be numbers.".to_string());
        };
        self.pop();
        self.pop();
        let result = match op {
            OpCode::OpGreater => Value::Bool(a > b),
            OpCode::OpGreaterEqual => Value::Bool(a >= b),
            OpCode::OpLess => Value::Bool(a < b),
            OpCode::OpLessEqual => Value::Bool(a <= b),
            OpCode::OpSubtract => Value::Number(a - b),
            OpCode::OpMultiply => Value::Number(a * b),
            // Division by zero is whatever IEEE-754 division produces.
            OpCode::OpDivide => Value::Number(a / b),
            _ => unreachable!("not a binary numeric opcode: {}", op),
        };
        self.push(result);
        Ok(())
    }

    fn add(&mut self) -> Result<(), String> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(a + b));
            }
            (Value::Obj(a), Value::Obj(b))
                if matches!(self.heap.get(a), HeapObject::Str(_))
                    && matches!(self.heap.get(b), HeapObject::Str(_)) =>
            {
                self.concatenate(a, b);
            }
            _ => return Err("Operands must be two numbers or two strings.".to_string()),
        }
        Ok(())
    }

    fn concatenate(&mut self, a: crate::runtime::gc::Handle, b: crate::runtime::gc::Handle) {
        // Both operands stay on the stack while the result is interned, so a
        // collection triggered by the allocation cannot free them
        // (transient-allocation pattern).
        self.maybe_collect();
        let mut text =
            String::with_capacity(self.heap.string(a).chars.len() + self.heap.string(b).chars.len());
        text.push_str(&self.heap.string(a).chars);
        text.push_str(&self.heap.string(b).chars);
        let result = self.heap.intern(&text);
        self.pop();
        self.pop();
        self.push(Value::Obj(result));
    }

    fn undefined_variable(&self, name: crate::runtime::gc::Handle) -> String {
        format!("Undefined variable '{}'.", self.heap.string(name).chars)
    }
}
