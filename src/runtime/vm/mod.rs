use std::io::Write;

use crate::bytecode::chunk::Chunk;
use crate::bytecode::compiler::compile_with_roots;
use crate::bytecode::disassemble::disassemble_instruction;
use crate::bytecode::op_code::OpCode;
use crate::runtime::colors::Colors;
use crate::runtime::frame::CallFrame;
use crate::runtime::gc::{ExternalRoots, Handle, Heap};
use crate::runtime::object::{HeapObject, ObjClosure, ObjNative};
use crate::runtime::natives::NATIVES;
use crate::runtime::table::Table;
use crate::runtime::value::Value;

mod calls;
mod dispatch;

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

/// Outcome of one `interpret` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

/// The virtual machine: value stack, call-frame stack, globals, the open
/// upvalue list, and the heap everything lives in.
///
/// One VM instance survives across `interpret` calls, which is what gives
/// the REPL persistent globals and interned strings.
pub struct Vm {
    pub heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    /// Head of the intrusive list of open upvalues, sorted by descending
    /// stack slot.
    open_upvalues: Option<Handle>,
    /// Cached interned `"init"`, so constructor dispatch never re-hashes.
    init_string: Handle,
    out: Box<dyn Write>,
    trace: bool,
    last_error: Option<String>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_output(Box::new(std::io::stdout()))
    }

    /// A VM writing program output (the `print` statement) to `out`.
    pub fn with_output(out: Box<dyn Write>) -> Self {
        let mut heap = Heap::new();
        let init_string = heap.intern("init");

        let mut vm = Self {
            heap,
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            open_upvalues: None,
            init_string,
            out,
            trace: false,
            last_error: None,
        };

        for &(name, arity, function) in NATIVES {
            vm.define_native(name, arity, function);
        }
        vm
    }

    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    pub fn set_stress_gc(&mut self, stress: bool) {
        self.heap.set_stress(stress);
    }

    /// The message of the most recent runtime error, if the last `interpret`
    /// failed at runtime.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Compiles and runs one source text. Compile errors go to stderr and
    /// leave the VM untouched; runtime errors print a stack trace and reset
    /// the stacks, leaving globals intact for the next call.
    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        self.last_error = None;

        let tables = [&self.globals];
        let values = [Value::Obj(self.init_string)];
        let roots = ExternalRoots {
            tables: &tables,
            values: &values,
        };
        let function = match compile_with_roots(source, &mut self.heap, roots) {
            Ok(function) => function,
            Err(errors) => {
                for error in errors {
                    eprintln!("{}", error);
                }
                return InterpretResult::CompileError;
            }
        };

        // The script function is rooted through the stack while its closure
        // is allocated, so a collection here cannot free it.
        self.push(Value::Obj(function));
        self.maybe_collect();
        let closure = self.heap.alloc(HeapObject::Closure(ObjClosure {
            function,
            upvalues: Vec::new(),
        }));
        self.pop();
        self.push(Value::Obj(closure));
        if let Err(message) = self.call(closure, 0) {
            self.report_runtime_error(&message);
            return InterpretResult::RuntimeError;
        }

        let result = match self.run() {
            Ok(()) => InterpretResult::Ok,
            Err(message) => {
                self.report_runtime_error(&message);
                InterpretResult::RuntimeError
            }
        };
        let _ = self.out.flush();
        result
    }

    fn run(&mut self) -> Result<(), String> {
        loop {
            if self.trace {
                self.trace_instruction();
            }
            let op = OpCode::from(self.read_byte());
            if self.dispatch(op)? {
                return Ok(());
            }
        }
    }

    // --- Stack ------------------------------------------------------------

    fn push(&mut self, value: Value) {
        debug_assert!(self.stack.len() < STACK_MAX, "value stack overflow");
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        debug_assert!(!self.stack.is_empty(), "value stack underflow");
        self.stack.pop().unwrap_or(Value::Nil)
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    // --- Instruction fetch ------------------------------------------------

    fn frame(&self) -> CallFrame {
        *self.frames.last().expect("no active call frame")
    }

    fn current_chunk(&self) -> &Chunk {
        let frame = self.frames.last().expect("no active call frame");
        &self
            .heap
            .function(self.heap.closure(frame.closure).function)
            .chunk
    }

    fn read_byte(&mut self) -> u8 {
        let ip = self.frame().ip;
        let byte = self.current_chunk().code[ip];
        self.frames.last_mut().unwrap().ip = ip + 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let high = self.read_byte() as u16;
        let low = self.read_byte() as u16;
        (high << 8) | low
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        self.current_chunk().constants[index]
    }

    fn read_constant_long(&mut self) -> Value {
        let high = self.read_byte() as usize;
        let mid = self.read_byte() as usize;
        let low = self.read_byte() as usize;
        self.current_chunk().constants[(high << 16) | (mid << 8) | low]
    }

    /// Reads a name constant (always an interned string) plus its hash.
    fn read_name(&mut self, long: bool) -> (Handle, u32) {
        let value = if long {
            self.read_constant_long()
        } else {
            self.read_constant()
        };
        let handle = value.as_obj().expect("name constant must be a string");
        let hash = self.heap.string(handle).hash;
        (handle, hash)
    }

    // --- Garbage collection -----------------------------------------------

    /// Runs a collection if the heap asks for one. Call sites sit right
    /// before an allocation, at a point where every live value is reachable
    /// from the roots marked here.
    pub(crate) fn maybe_collect(&mut self) {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
    }

    fn collect_garbage(&mut self) {
        for &value in &self.stack {
            self.heap.mark_value(value);
        }
        for frame in &self.frames {
            self.heap.mark_object(frame.closure);
        }
        let mut open = self.open_upvalues;
        while let Some(upvalue) = open {
            self.heap.mark_object(upvalue);
            open = self.heap.upvalue(upvalue).next;
        }
        self.heap.mark_table(&self.globals);
        self.heap.mark_object(self.init_string);

        self.heap.trace_references();
        self.heap.sweep();
    }

    // --- Error reporting and tracing ---------------------------------------

    fn report_runtime_error(&mut self, message: &str) {
        let colors = Colors::new();
        eprintln!("{}runtime error{}: {}", colors.red, colors.reset, message);

        // Innermost frame first, frame 0 included.
        for frame in self.frames.iter().rev() {
            let closure = self.heap.closure(frame.closure);
            let function = self.heap.function(closure.function);
            let line = function.chunk.get_line(frame.ip.saturating_sub(1));
            match function.name {
                Some(name) => {
                    eprintln!("[line {}] in {}()", line, self.heap.string(name).chars)
                }
                None => eprintln!("[line {}] in script", line),
            }
        }

        self.last_error = Some(message.to_string());
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;
    }

    fn trace_instruction(&self) {
        let frame = self.frame();
        let chunk = self.current_chunk();
        let mut text = String::new();
        disassemble_instruction(&self.heap, chunk, frame.ip, &mut text);
        print!("{}", text);

        let items: Vec<String> = self.stack
            .iter()
            .map(|&value| self.heap.value_to_string(value))
            .collect();
        println!("  stack: [{}]", items.join(", "));
    }

    // --- Natives ----------------------------------------------------------

    fn define_native(
        &mut self,
        name: &'static str,
        arity: usize,
        function: crate::runtime::object::NativeFn,
    ) {
        // Pin the name on the stack while the native object is allocated
        // (transient-allocation pattern).
        let name_handle = self.heap.intern(name);
        self.push(Value::Obj(name_handle));
        self.maybe_collect();
        let native = self.heap.alloc(HeapObject::Native(ObjNative {
            name,
            arity,
            function,
        }));
        let hash = self.heap.string(name_handle).hash;
        self.globals.set(name_handle, hash, Value::Obj(native));
        self.pop();
    }
}
