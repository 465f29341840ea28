use std::{env, fs, process};

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use cinder::bytecode::{compiler, disassemble::disassemble_chunk};
use cinder::runtime::gc::Heap;
use cinder::runtime::value::Value;
use cinder::runtime::vm::{InterpretResult, Vm};
use cinder::syntax::scanner::Scanner;

const EXIT_COMPILE_ERROR: i32 = 65;
const EXIT_RUNTIME_ERROR: i32 = 70;
const EXIT_IO_ERROR: i32 = 74;

fn main() {
    let mut args: Vec<String> = env::args().collect();
    let trace = extract_flag(&mut args, "--trace");
    let gc_stats = extract_flag(&mut args, "--gc-stats");
    let stress_gc = extract_flag(&mut args, "--stress-gc");

    if args.len() < 2 {
        repl(trace, stress_gc);
        return;
    }

    match args[1].as_str() {
        "-h" | "--help" | "help" => print_help(),
        "run" => {
            if args.len() < 3 {
                eprintln!("Usage: cinder run <file.cdr>");
                process::exit(EXIT_IO_ERROR);
            }
            run_file(&args[2], trace, gc_stats, stress_gc);
        }
        "tokens" => {
            if args.len() < 3 {
                eprintln!("Usage: cinder tokens <file.cdr>");
                process::exit(EXIT_IO_ERROR);
            }
            show_tokens(&args[2]);
        }
        "bytecode" => {
            if args.len() < 3 {
                eprintln!("Usage: cinder bytecode <file.cdr>");
                process::exit(EXIT_IO_ERROR);
            }
            show_bytecode(&args[2]);
        }
        path => run_file(path, trace, gc_stats, stress_gc),
    }
}

fn print_help() {
    println!(
        "\
Cinder CLI

Usage:
  cinder                   Start the REPL
  cinder <file.cdr>        Run a script
  cinder run <file.cdr>    Run a script
  cinder tokens <file.cdr>     Dump the token stream
  cinder bytecode <file.cdr>   Dump compiled bytecode

Flags:
  --trace      Print each instruction and the stack while running
  --gc-stats   Print allocator statistics after the run
  --stress-gc  Collect before every allocation
  -h, --help   Show this help message
"
    );
}

fn extract_flag(args: &mut Vec<String>, flag: &str) -> bool {
    let present = args.iter().any(|arg| arg == flag);
    if present {
        args.retain(|arg| arg != flag);
    }
    present
}

fn read_source(path: &str) -> String {
    match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Error reading {}: {}", path, err);
            process::exit(EXIT_IO_ERROR);
        }
    }
}

fn run_file(path: &str, trace: bool, gc_stats: bool, stress_gc: bool) {
    let source = read_source(path);

    let mut vm = Vm::new();
    vm.set_trace(trace);
    vm.set_stress_gc(stress_gc);

    let result = vm.interpret(&source);
    if gc_stats {
        print_gc_stats(&vm);
    }
    match result {
        InterpretResult::Ok => {}
        InterpretResult::CompileError => process::exit(EXIT_COMPILE_ERROR),
        InterpretResult::RuntimeError => process::exit(EXIT_RUNTIME_ERROR),
    }
}

fn print_gc_stats(vm: &Vm) {
    let stats = vm.heap.stats();
    println!(
        "\nGC stats:\n  live bytes: {}\n  live objects: {}\n  total allocations: {}\n  collections: {}\n  objects freed: {}",
        vm.heap.bytes_allocated(),
        vm.heap.live_count(),
        stats.total_allocations,
        stats.total_collections,
        stats.objects_freed
    );
}

fn repl(trace: bool, stress_gc: bool) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("Error starting REPL: {}", err);
            process::exit(EXIT_IO_ERROR);
        }
    };

    let mut vm = Vm::new();
    vm.set_trace(trace);
    vm.set_stress_gc(stress_gc);

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                // Errors are reported and forgotten; the session carries on
                // with its globals intact.
                vm.interpret(&line);
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("REPL error: {}", err);
                break;
            }
        }
    }
}

fn show_tokens(path: &str) {
    let source = read_source(path);
    println!("Tokens from {}:", path);
    for token in Scanner::new(&source).tokenize() {
        println!("{:>4} {:?} {:?}", token.line, token.kind, token.lexeme);
    }
}

fn show_bytecode(path: &str) {
    let source = read_source(path);
    let mut heap = Heap::new();

    let script = match compiler::compile(&source, &mut heap) {
        Ok(script) => script,
        Err(errors) => {
            for error in errors {
                eprintln!("{}", error);
            }
            process::exit(EXIT_COMPILE_ERROR);
        }
    };

    print!(
        "{}",
        disassemble_chunk(&heap, &heap.function(script).chunk, "script")
    );

    // Nested functions live in the constants pool; dump each of them too.
    let mut pending = vec![script];
    while let Some(function) = pending.pop() {
        for constant in &heap.function(function).chunk.constants {
            if let Value::Obj(handle) = constant {
                if let cinder::runtime::object::HeapObject::Function(nested) = heap.get(*handle) {
                    let name = match nested.name {
                        Some(name) => heap.string(name).chars.to_string(),
                        None => "<anonymous>".to_string(),
                    };
                    println!();
                    print!("{}", disassemble_chunk(&heap, &nested.chunk, &name));
                    pending.push(*handle);
                }
            }
        }
    }
}
