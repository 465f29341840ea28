//! Host functions installed into the global scope at VM startup.

use std::io::BufRead;
use std::sync::OnceLock;
use std::time::Instant;

use crate::runtime::gc::Heap;
use crate::runtime::object::NativeFn;
use crate::runtime::value::Value;

/// Name, arity, implementation. Arity is checked by the VM's calling
/// convention before the function runs.
pub const NATIVES: &[(&str, usize, NativeFn)] = &[("clock", 0, clock), ("readln", 0, readln)];

static START: OnceLock<Instant> = OnceLock::new();

/// Seconds elapsed since the interpreter first needed a clock.
fn clock(_heap: &mut Heap, _args: &[Value]) -> Result<Value, String> {
    let start = START.get_or_init(Instant::now);
    Ok(Value::Number(start.elapsed().as_secs_f64()))
}

/// Reads one line from stdin (without the trailing newline) as an interned
/// string; `nil` at end of input.
fn readln(heap: &mut Heap, _args: &[Value]) -> Result<Value, String> {
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) => Ok(Value::Nil),
        Ok(_) => {
            if line.ends_with('\n') {
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
            }
            Ok(Value::Obj(heap.intern(&line)))
        }
        Err(err) => Err(format!("readln failed: {}.", err)),
    }
}
