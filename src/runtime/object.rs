use crate::bytecode::chunk::Chunk;
use crate::runtime::gc::{Handle, Heap};
use crate::runtime::table::Table;
use crate::runtime::value::Value;

/// Host-provided callable: receives the evaluated arguments and may allocate
/// through the heap (e.g. to intern a result string).
pub type NativeFn = fn(&mut Heap, &[Value]) -> Result<Value, String>;

/// Every heap-allocated object kind. The allocator stores one of these per
/// arena slot together with its mark bit.
#[derive(Debug)]
pub enum HeapObject {
    Str(ObjStr),
    Function(ObjFunction),
    Native(ObjNative),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
}

impl HeapObject {
    pub fn kind_name(&self) -> &'static str {
        match self {
            HeapObject::Str(_) => "string",
            HeapObject::Function(_) => "function",
            HeapObject::Native(_) => "native",
            HeapObject::Closure(_) => "closure",
            HeapObject::Upvalue(_) => "upvalue",
            HeapObject::Class(_) => "class",
            HeapObject::Instance(_) => "instance",
            HeapObject::BoundMethod(_) => "bound method",
        }
    }
}

/// An immutable, interned string with its cached FNV-1a hash. At most one
/// live `ObjStr` exists per byte sequence, so equality is handle identity.
#[derive(Debug)]
pub struct ObjStr {
    pub chars: Box<str>,
    pub hash: u32,
}

/// A compiled routine. Built by the compiler and frozen once compilation of
/// the function ends; `name` is `None` for the top-level script.
#[derive(Debug)]
pub struct ObjFunction {
    pub arity: usize,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    pub name: Option<Handle>,
}

impl ObjFunction {
    pub fn new(name: Option<Handle>) -> Self {
        Self {
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name,
        }
    }
}

#[derive(Debug)]
pub struct ObjNative {
    pub name: &'static str,
    pub arity: usize,
    pub function: NativeFn,
}

/// Runtime pairing of a function with its captured upvalues. Every
/// user-defined call target is a closure; bare functions only exist as
/// constants inside chunks.
#[derive(Debug)]
pub struct ObjClosure {
    pub function: Handle,
    pub upvalues: Vec<Handle>,
}

/// A captured variable cell.
///
/// While open it designates a live value-stack slot; closing copies the
/// value inline and detaches it from the stack. `next` links the VM's list
/// of open upvalues, sorted by descending stack slot.
#[derive(Debug)]
pub struct ObjUpvalue {
    pub slot: UpvalueSlot,
    pub next: Option<Handle>,
}

#[derive(Debug, Clone, Copy)]
pub enum UpvalueSlot {
    Open(usize),
    Closed(Value),
}

#[derive(Debug)]
pub struct ObjClass {
    pub name: Handle,
    pub methods: Table,
}

/// Fields are created on first assignment; lookup falls back to the class's
/// method table.
#[derive(Debug)]
pub struct ObjInstance {
    pub class: Handle,
    pub fields: Table,
}

/// A method value extracted from an instance: the receiver it was read from
/// plus the method closure.
#[derive(Debug)]
pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: Handle,
}
