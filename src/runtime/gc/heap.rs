use crate::runtime::gc::Handle;
use crate::runtime::object::{
    HeapObject, ObjBoundMethod, ObjClass, ObjClosure, ObjFunction, ObjInstance, ObjNative, ObjStr,
    ObjUpvalue, UpvalueSlot,
};
use crate::runtime::table::{Table, hash_str};
use crate::runtime::value::Value;

const FIRST_GC_THRESHOLD: usize = 1024 * 1024;
const HEAP_GROW_FACTOR: usize = 2;

#[derive(Debug)]
struct HeapEntry {
    object: HeapObject,
    marked: bool,
    /// Footprint recorded at allocation and given back at sweep, so the
    /// trigger accounting stays balanced even though live objects may grow.
    size: usize,
}

/// Allocation and collection counters, surfaced by `--gc-stats`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    pub total_allocations: usize,
    pub total_collections: usize,
    pub objects_freed: usize,
}

/// Roots owned by someone other than the collecting party. The VM passes its
/// globals table and cached strings here so that collections triggered while
/// compiling (REPL sessions keep one heap alive across inputs) cannot free
/// them.
#[derive(Clone, Copy, Default)]
pub struct ExternalRoots<'a> {
    pub tables: &'a [&'a Table],
    pub values: &'a [Value],
}

/// The object heap: a non-moving arena addressed by [`Handle`]s.
///
/// Freed slots are recycled through a free list. Collection is mark-sweep
/// with an explicit gray work list: roots are marked by the owner (VM or
/// compiler), `trace_references` blackens the graph, and `sweep` frees
/// whatever stayed white. The string-interning table lives here and holds
/// its keys weakly: entries whose string died are removed in the same cycle.
#[derive(Debug)]
pub struct Heap {
    entries: Vec<Option<HeapEntry>>,
    free_list: Vec<u32>,
    strings: Table,
    gray: Vec<Handle>,
    bytes_allocated: usize,
    next_gc: usize,
    stress: bool,
    stats: GcStats,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            strings: Table::new(),
            gray: Vec::new(),
            bytes_allocated: 0,
            next_gc: FIRST_GC_THRESHOLD,
            stress: false,
            stats: GcStats::default(),
        }
    }

    /// Stress mode requests a collection before every allocation, which
    /// shakes out roots that were not reachable when the allocator ran.
    pub fn set_stress(&mut self, stress: bool) {
        self.stress = stress;
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    /// Whether the owner should run a collection before its next allocation.
    pub fn should_collect(&self) -> bool {
        self.stress || self.bytes_allocated > self.next_gc
    }

    /// Allocates a heap object and returns its handle. Never collects; the
    /// caller checks [`Self::should_collect`] first, while everything it
    /// holds is still reachable from a root.
    pub fn alloc(&mut self, object: HeapObject) -> Handle {
        let size = object_size(&object);
        self.bytes_allocated += size;
        self.stats.total_allocations += 1;

        let entry = HeapEntry {
            object,
            marked: false,
            size,
        };

        if let Some(index) = self.free_list.pop() {
            self.entries[index as usize] = Some(entry);
            Handle(index)
        } else {
            let index = self.entries.len() as u32;
            self.entries.push(Some(entry));
            Handle(index)
        }
    }

    /// Returns the canonical string object for `chars`, allocating only when
    /// no live string has the same bytes.
    pub fn intern(&mut self, chars: &str) -> Handle {
        let hash = hash_str(chars);
        if let Some(existing) = self.find_interned(chars, hash) {
            return existing;
        }

        let handle = self.alloc(HeapObject::Str(ObjStr {
            chars: chars.into(),
            hash,
        }));
        self.strings.set(handle, hash, Value::Nil);
        handle
    }

    /// Byte-equality probe of the intern table; only interning itself needs
    /// it, everything else compares interned strings by handle.
    fn find_interned(&self, chars: &str, hash: u32) -> Option<Handle> {
        if self.strings.is_empty() {
            return None;
        }

        let capacity = self.strings.entries.len();
        let mut index = hash as usize % capacity;
        loop {
            let entry = &self.strings.entries[index];
            match entry.key {
                None => {
                    if matches!(entry.value, Value::Nil) {
                        return None;
                    }
                }
                Some(handle) => {
                    let string = self.string(handle);
                    if string.hash == hash && &*string.chars == chars {
                        return Some(handle);
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    pub fn get(&self, handle: Handle) -> &HeapObject {
        &self.entries[handle.index()]
            .as_ref()
            .expect("Heap::get: freed or invalid handle")
            .object
    }

    pub fn get_mut(&mut self, handle: Handle) -> &mut HeapObject {
        &mut self.entries[handle.index()]
            .as_mut()
            .expect("Heap::get_mut: freed or invalid handle")
            .object
    }

    pub fn string(&self, handle: Handle) -> &ObjStr {
        match self.get(handle) {
            HeapObject::Str(s) => s,
            other => panic!("expected string, found {}", other.kind_name()),
        }
    }

    pub fn function(&self, handle: Handle) -> &ObjFunction {
        match self.get(handle) {
            HeapObject::Function(f) => f,
            other => panic!("expected function, found {}", other.kind_name()),
        }
    }

    pub fn native(&self, handle: Handle) -> &ObjNative {
        match self.get(handle) {
            HeapObject::Native(n) => n,
            other => panic!("expected native, found {}", other.kind_name()),
        }
    }

    pub fn closure(&self, handle: Handle) -> &ObjClosure {
        match self.get(handle) {
            HeapObject::Closure(c) => c,
            other => panic!("expected closure, found {}", other.kind_name()),
        }
    }

    pub fn closure_mut(&mut self, handle: Handle) -> &mut ObjClosure {
        match self.get_mut(handle) {
            HeapObject::Closure(c) => c,
            other => panic!("expected closure, found {}", other.kind_name()),
        }
    }

    pub fn upvalue(&self, handle: Handle) -> &ObjUpvalue {
        match self.get(handle) {
            HeapObject::Upvalue(u) => u,
            other => panic!("expected upvalue, found {}", other.kind_name()),
        }
    }

    pub fn upvalue_mut(&mut self, handle: Handle) -> &mut ObjUpvalue {
        match self.get_mut(handle) {
            HeapObject::Upvalue(u) => u,
            other => panic!("expected upvalue, found {}", other.kind_name()),
        }
    }

    pub fn class(&self, handle: Handle) -> &ObjClass {
        match self.get(handle) {
            HeapObject::Class(c) => c,
            other => panic!("expected class, found {}", other.kind_name()),
        }
    }

    pub fn class_mut(&mut self, handle: Handle) -> &mut ObjClass {
        match self.get_mut(handle) {
            HeapObject::Class(c) => c,
            other => panic!("expected class, found {}", other.kind_name()),
        }
    }

    pub fn instance(&self, handle: Handle) -> &ObjInstance {
        match self.get(handle) {
            HeapObject::Instance(i) => i,
            other => panic!("expected instance, found {}", other.kind_name()),
        }
    }

    pub fn instance_mut(&mut self, handle: Handle) -> &mut ObjInstance {
        match self.get_mut(handle) {
            HeapObject::Instance(i) => i,
            other => panic!("expected instance, found {}", other.kind_name()),
        }
    }

    pub fn bound_method(&self, handle: Handle) -> &ObjBoundMethod {
        match self.get(handle) {
            HeapObject::BoundMethod(b) => b,
            other => panic!("expected bound method, found {}", other.kind_name()),
        }
    }

    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    // --- Mark phase -------------------------------------------------------

    /// White -> gray: sets the mark bit and queues the object for tracing.
    pub fn mark_object(&mut self, handle: Handle) {
        let entry = self.entries[handle.index()]
            .as_mut()
            .expect("marked a freed handle");
        if entry.marked {
            return;
        }
        entry.marked = true;
        self.gray.push(handle);
    }

    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(handle) = value {
            self.mark_object(handle);
        }
    }

    pub fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_object(key);
            self.mark_value(value);
        }
    }

    pub fn mark_external(&mut self, roots: ExternalRoots<'_>) {
        for table in roots.tables {
            self.mark_table(table);
        }
        for &value in roots.values {
            self.mark_value(value);
        }
    }

    /// Gray -> black: drains the work list, marking each object's children.
    /// No heap allocation may happen until the following [`Self::sweep`].
    pub fn trace_references(&mut self) {
        while let Some(handle) = self.gray.pop() {
            self.blacken(handle);
        }
    }

    fn blacken(&mut self, handle: Handle) {
        let mut children: Vec<Value> = Vec::new();
        match self.get(handle) {
            HeapObject::Str(_) | HeapObject::Native(_) => {}
            HeapObject::Function(f) => {
                if let Some(name) = f.name {
                    children.push(Value::Obj(name));
                }
                children.extend_from_slice(&f.chunk.constants);
            }
            HeapObject::Closure(c) => {
                children.push(Value::Obj(c.function));
                children.extend(c.upvalues.iter().map(|&u| Value::Obj(u)));
            }
            HeapObject::Upvalue(u) => {
                if let UpvalueSlot::Closed(value) = u.slot {
                    children.push(value);
                }
                if let Some(next) = u.next {
                    children.push(Value::Obj(next));
                }
            }
            HeapObject::Class(c) => {
                children.push(Value::Obj(c.name));
                for (key, value) in c.methods.iter() {
                    children.push(Value::Obj(key));
                    children.push(value);
                }
            }
            HeapObject::Instance(i) => {
                children.push(Value::Obj(i.class));
                for (key, value) in i.fields.iter() {
                    children.push(Value::Obj(key));
                    children.push(value);
                }
            }
            HeapObject::BoundMethod(b) => {
                children.push(b.receiver);
                children.push(Value::Obj(b.method));
            }
        }

        for child in children {
            self.mark_value(child);
        }
    }

    // --- Sweep phase ------------------------------------------------------

    /// Frees every unmarked object, clears surviving mark bits, and resets
    /// the collection threshold. Intern-table entries are weak: any entry
    /// whose key string stayed white is removed before the key is freed.
    pub fn sweep(&mut self) {
        // Weak-reference fix-up.
        let mut dead_strings = Vec::new();
        for entry in &self.strings.entries {
            if let Some(key) = entry.key {
                let alive = self.entries[key.index()]
                    .as_ref()
                    .is_some_and(|e| e.marked);
                if !alive {
                    dead_strings.push((key, entry.hash));
                }
            }
        }
        for (key, hash) in dead_strings {
            self.strings.delete(key, hash);
        }

        for slot in 0..self.entries.len() {
            if let Some(entry) = &mut self.entries[slot] {
                if entry.marked {
                    entry.marked = false;
                } else {
                    self.bytes_allocated -= entry.size;
                    self.entries[slot] = None;
                    self.free_list.push(slot as u32);
                    self.stats.objects_freed += 1;
                }
            }
        }

        self.next_gc = self.bytes_allocated * HEAP_GROW_FACTOR;
        self.stats.total_collections += 1;
    }

    // --- Rendering --------------------------------------------------------

    /// The user-visible textual form of a value, as `print` produces it.
    pub fn value_to_string(&self, value: Value) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Obj(handle) => self.object_to_string(handle),
        }
    }

    fn object_to_string(&self, handle: Handle) -> String {
        match self.get(handle) {
            HeapObject::Str(s) => s.chars.to_string(),
            HeapObject::Function(f) => self.function_name(f),
            HeapObject::Native(_) => "<native fn>".to_string(),
            HeapObject::Closure(c) => self.function_name(self.function(c.function)),
            HeapObject::Upvalue(_) => "upvalue".to_string(),
            HeapObject::Class(c) => self.string(c.name).chars.to_string(),
            HeapObject::Instance(i) => {
                format!("{} instance", self.string(self.class(i.class).name).chars)
            }
            HeapObject::BoundMethod(b) => {
                self.function_name(self.function(self.closure(b.method).function))
            }
        }
    }

    fn function_name(&self, function: &ObjFunction) -> String {
        match function.name {
            Some(name) => format!("<fn {}>", self.string(name).chars),
            None => "<script>".to_string(),
        }
    }
}

fn object_size(object: &HeapObject) -> usize {
    use std::mem::size_of;

    let payload = match object {
        HeapObject::Str(s) => s.chars.len(),
        HeapObject::Function(f) => {
            f.chunk.code.len()
                + f.chunk.lines.len() * size_of::<crate::bytecode::chunk::LineStart>()
                + f.chunk.constants.len() * size_of::<Value>()
        }
        HeapObject::Native(_) => 0,
        HeapObject::Closure(c) => c.upvalues.len() * size_of::<Handle>(),
        HeapObject::Upvalue(_) => 0,
        HeapObject::Class(c) => c.methods.entries.len() * size_of::<crate::runtime::table::Entry>(),
        HeapObject::Instance(i) => {
            i.fields.entries.len() * size_of::<crate::runtime::table::Entry>()
        }
        HeapObject::BoundMethod(_) => 0,
    };
    size_of::<HeapEntry>() + payload
}
