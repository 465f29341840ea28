use crate::runtime::frame::CallFrame;
use crate::runtime::gc::Handle;
use crate::runtime::object::{HeapObject, ObjBoundMethod, ObjInstance, ObjUpvalue, UpvalueSlot};
use crate::runtime::table::Table;
use crate::runtime::value::Value;

use super::{FRAMES_MAX, Vm};

impl Vm {
    /// Dispatches a call on any callee value: closures, natives, classes
    /// (construction), and bound methods. `arg_count` values sit on top of
    /// the stack, with the callee right below them.
    pub(super) fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<(), String> {
        let Some(handle) = callee.as_obj() else {
            return Err("Can only call functions and classes.".to_string());
        };

        match self.heap.get(handle) {
            HeapObject::Closure(_) => self.call(handle, arg_count),
            HeapObject::BoundMethod(bound) => {
                let receiver = bound.receiver;
                let method = bound.method;
                let slot = self.stack.len() - arg_count - 1;
                self.stack[slot] = receiver;
                self.call(method, arg_count)
            }
            HeapObject::Class(_) => {
                self.maybe_collect();
                let instance = self.heap.alloc(HeapObject::Instance(ObjInstance {
                    class: handle,
                    fields: Table::new(),
                }));
                // The instance replaces the class in slot 0, which roots it
                // for the whole constructor call.
                let slot = self.stack.len() - arg_count - 1;
                self.stack[slot] = Value::Obj(instance);

                let init_hash = self.heap.string(self.init_string).hash;
                match self.heap.class(handle).methods.get(self.init_string, init_hash) {
                    Some(initializer) => {
                        let initializer = initializer
                            .as_obj()
                            .expect("initializer must be a closure");
                        self.call(initializer, arg_count)
                    }
                    None if arg_count != 0 => {
                        Err(format!("Expected 0 arguments, but got {}.", arg_count))
                    }
                    None => Ok(()),
                }
            }
            HeapObject::Native(native) => {
                if arg_count != native.arity {
                    return Err(format!(
                        "Expected {} arguments, but got {}.",
                        native.arity, arg_count
                    ));
                }
                let function = native.function;
                self.maybe_collect();
                let args_start = self.stack.len() - arg_count;
                let args: Vec<Value> = self.stack[args_start..].to_vec();
                let result = function(&mut self.heap, &args)?;
                self.stack.truncate(args_start - 1);
                self.push(result);
                Ok(())
            }
            _ => Err("Can only call functions and classes.".to_string()),
        }
    }

    /// Pushes a frame for a closure call after checking arity and the frame
    /// cap.
    pub(super) fn call(&mut self, closure: Handle, arg_count: usize) -> Result<(), String> {
        let arity = self
            .heap
            .function(self.heap.closure(closure).function)
            .arity;
        if arg_count != arity {
            return Err(format!(
                "Expected {} arguments, but got {}.",
                arity, arg_count
            ));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err("Stack overflow.".to_string());
        }

        let slots = self.stack.len() - arg_count - 1;
        self.frames.push(CallFrame::new(closure, slots));
        Ok(())
    }

    /// Fused property access + call. A field with the method's name shadows
    /// the method and is called as an ordinary value.
    pub(super) fn invoke(
        &mut self,
        name: Handle,
        hash: u32,
        arg_count: usize,
    ) -> Result<(), String> {
        let receiver = self.peek(arg_count);
        let instance = match receiver.as_obj() {
            Some(handle) if matches!(self.heap.get(handle), HeapObject::Instance(_)) => handle,
            _ => return Err("Only instances have methods.".to_string()),
        };

        if let Some(field) = self.heap.instance(instance).fields.get(name, hash) {
            let slot = self.stack.len() - arg_count - 1;
            self.stack[slot] = field;
            return self.call_value(field, arg_count);
        }

        let class = self.heap.instance(instance).class;
        self.invoke_from_class(class, name, hash, arg_count)
    }

    pub(super) fn invoke_from_class(
        &mut self,
        class: Handle,
        name: Handle,
        hash: u32,
        arg_count: usize,
    ) -> Result<(), String> {
        match self.heap.class(class).methods.get(name, hash) {
            Some(method) => {
                let method = method.as_obj().expect("method must be a closure");
                self.call(method, arg_count)
            }
            None => Err(self.undefined_property(name)),
        }
    }

    /// Replaces the receiver on top of the stack with a bound method for
    /// `name`, or errors if the class has no such method.
    pub(super) fn bind_method(&mut self, class: Handle, name: Handle) -> Result<(), String> {
        let hash = self.heap.string(name).hash;
        let Some(method) = self.heap.class(class).methods.get(name, hash) else {
            return Err(self.undefined_property(name));
        };
        let method = method.as_obj().expect("method must be a closure");

        // The receiver stays on the stack until the bound method exists
        // (transient-allocation pattern).
        self.maybe_collect();
        let receiver = self.peek(0);
        let bound = self.heap.alloc(HeapObject::BoundMethod(ObjBoundMethod {
            receiver,
            method,
        }));
        self.pop();
        self.push(Value::Obj(bound));
        Ok(())
    }

    /// Finds or creates the open upvalue for a stack slot. The list is kept
    /// sorted by descending slot so the walk can stop early, and no slot
    /// ever has two open upvalues.
    pub(super) fn capture_upvalue(&mut self, slot: usize) -> Handle {
        let mut previous: Option<Handle> = None;
        let mut current = self.open_upvalues;
        while let Some(handle) = current {
            let existing_slot = self.open_slot(handle);
            if existing_slot == slot {
                return handle;
            }
            if existing_slot < slot {
                break;
            }
            previous = Some(handle);
            current = self.heap.upvalue(handle).next;
        }

        // The surrounding closure is already on the stack, so collecting
        // before this allocation is safe.
        self.maybe_collect();
        let created = self.heap.alloc(HeapObject::Upvalue(ObjUpvalue {
            slot: UpvalueSlot::Open(slot),
            next: current,
        }));
        match previous {
            None => self.open_upvalues = Some(created),
            Some(previous) => self.heap.upvalue_mut(previous).next = Some(created),
        }
        created
    }

    /// Closes every open upvalue at or above `last`: the captured value is
    /// copied into the upvalue and the cell leaves the open list.
    pub(super) fn close_upvalues(&mut self, last: usize) {
        while let Some(handle) = self.open_upvalues {
            let slot = self.open_slot(handle);
            if slot < last {
                break;
            }
            let value = self.stack[slot];
            let upvalue = self.heap.upvalue_mut(handle);
            self.open_upvalues = upvalue.next;
            upvalue.next = None;
            upvalue.slot = UpvalueSlot::Closed(value);
        }
    }

    fn open_slot(&self, handle: Handle) -> usize {
        match self.heap.upvalue(handle).slot {
            UpvalueSlot::Open(slot) => slot,
            UpvalueSlot::Closed(_) => unreachable!("closed upvalue on the open list"),
        }
    }

    fn undefined_property(&self, name: Handle) -> String {
        format!("Undefined property '{}'.", self.heap.string(name).chars)
    }
}
