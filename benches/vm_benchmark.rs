use criterion::{Criterion, black_box, criterion_group, criterion_main};

use cinder::runtime::vm::{InterpretResult, Vm};

fn run_source(source: &str) {
    let mut vm = Vm::with_output(Box::new(std::io::sink()));
    let result = vm.interpret(source);
    assert_eq!(result, InterpretResult::Ok, "{:?}", vm.last_error());
}

fn fibonacci_source(n: u32) -> String {
    format!(
        "fun fib(n) {{ if (n < 2) return n; return fib(n - 1) + fib(n - 2); }}
         print fib({});",
        n
    )
}

fn counter_source(calls: u32) -> String {
    format!(
        "fun makeCounter() {{ var i = 0; fun c() {{ i = i + 1; return i; }} return c; }}
         var counter = makeCounter();
         for (var i = 0; i < {}; i = i + 1) counter();
         print counter();",
        calls
    )
}

fn method_dispatch_source(iterations: u32) -> String {
    format!(
        "class Accumulator {{
           init() {{ this.total = 0; }}
           add(n) {{ this.total = this.total + n; }}
         }}
         var acc = Accumulator();
         for (var i = 0; i < {}; i = i + 1) acc.add(i);
         print acc.total;",
        iterations
    )
}

fn bench_fibonacci(c: &mut Criterion) {
    let source = fibonacci_source(18);
    c.bench_function("fib_18", |b| b.iter(|| run_source(black_box(&source))));
}

fn bench_closure_calls(c: &mut Criterion) {
    let source = counter_source(10_000);
    c.bench_function("counter_10k", |b| b.iter(|| run_source(black_box(&source))));
}

fn bench_method_dispatch(c: &mut Criterion) {
    let source = method_dispatch_source(10_000);
    c.bench_function("method_dispatch_10k", |b| {
        b.iter(|| run_source(black_box(&source)))
    });
}

criterion_group!(
    benches,
    bench_fibonacci,
    bench_closure_calls,
    bench_method_dispatch
);
criterion_main!(benches);
