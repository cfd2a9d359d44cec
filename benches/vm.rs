//! VM benchmarks: compile cost, call-heavy scripts, and method dispatch on loaded objects.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lpcvm::config::VmConfig;
use lpcvm::vm::{compile, MemorySource, Vm};

const FIB: &str = r#"
int fib(int n) {
    if (n < 2) return n;
    return fib(n - 1) + fib(n - 2);
}
fib(20);
"#;

const LOOP: &str = r#"
int total = 0;
for (int i = 0; i < 100000; i += 1) {
    total += i % 7;
}
"#;

const CLOSURES: &str = r#"
mixed make() {
    int count = 0;
    return function() { count += 1; return count; };
}
mixed next = make();
for (int i = 0; i < 10000; i += 1) next();
"#;

const DISPATCH: &str = r#"
var orc = load("/obj/orc");
for (int i = 0; i < 10000; i += 1) {
    orc->hit(1);
    orc->describe();
}
"#;

fn world() -> MemorySource {
    MemorySource::new()
        .with(
            "/std/monster",
            r#"
int hp = 1000000;
string kind() { return "monster"; }
void hit(int n) { hp -= n; }
string describe() { return kind() + " " + hp; }
"#,
        )
        .with(
            "/obj/orc",
            r#"
inherit "/std/monster";
string kind() { return "orc<" + ::kind() + ">"; }
"#,
        )
}

fn run_script(source: &str) {
    let script = compile("bench", source).expect("compile error");
    let mut vm = Vm::new();
    vm.capture_output();
    vm.interpret(script).expect("runtime error");
}

fn compile_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    group.bench_function("fib", |b| b.iter(|| compile("bench", black_box(FIB))));
    group.bench_function("dispatch", |b| {
        b.iter(|| compile("bench", black_box(DISPATCH)))
    });
    group.finish();
}

fn execute_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("execute");
    group.sample_size(20);
    group.bench_function("fib_20", |b| b.iter(|| run_script(black_box(FIB))));
    group.bench_function("loop_100k", |b| b.iter(|| run_script(black_box(LOOP))));
    group.bench_function("closure_counter", |b| {
        b.iter(|| run_script(black_box(CLOSURES)))
    });
    group.finish();
}

fn dispatch_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("objects");
    group.sample_size(20);

    // Fresh VM per iteration: includes the lazy compile of both objects.
    group.bench_function("cold_load_and_dispatch", |b| {
        b.iter(|| {
            let script = compile("bench", DISPATCH).expect("compile error");
            let mut vm = Vm::with_source(VmConfig::default(), Box::new(world()));
            vm.interpret(script).expect("runtime error");
        })
    });

    // Shared VM: objects come from the compilation cache after the first run.
    let mut vm = Vm::with_source(VmConfig::default(), Box::new(world()));
    let script = compile("bench", DISPATCH).expect("compile error");
    group.bench_function("warm_dispatch", |b| {
        b.iter(|| vm.interpret(script.clone()).expect("runtime error"))
    });
    group.finish();
}

criterion_group!(
    benches,
    compile_benchmarks,
    execute_benchmarks,
    dispatch_benchmarks
);
criterion_main!(benches);
