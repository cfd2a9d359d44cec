//! End-to-end script execution: control flow, closures, errors and VM reuse.

use pretty_assertions::assert_eq;

use lpcvm::error::LpcError;
use lpcvm::vm::{compile, Vm};

fn run(vm: &mut Vm, source: &str) -> Result<String, LpcError> {
    let script = compile("test", source)?;
    vm.interpret(script)?;
    Ok(vm.take_output())
}

fn output(source: &str) -> String {
    let mut vm = Vm::new();
    vm.capture_output();
    run(&mut vm, source).unwrap()
}

#[test]
fn test_for_loop_leaves_stack_clean() {
    let mut vm = Vm::new();
    vm.capture_output();
    let out = run(&mut vm, "for (int i = 0; i < 3; i += 1) println(i);").unwrap();
    assert_eq!(out, "0\n1\n2\n");
    assert_eq!(vm.stack_len(), 0);
    assert_eq!(vm.open_upvalues(), 0);
}

#[test]
fn test_nested_loops_with_break_and_continue() {
    let out = output(
        r#"
for (int i = 0; i < 4; i += 1) {
    if (i == 1) continue;
    int j = 0;
    while (true) {
        if (j >= i) break;
        print(j);
        j += 1;
    }
    println();
}
"#,
    );
    assert_eq!(out, "\n01\n012\n");
}

#[test]
fn test_closures_share_captured_variable() {
    let out = output(
        r#"
mixed inc;
mixed get;
void make() {
    int n = 0;
    inc = function() { n += 1; };
    get = function() { return n; };
}
make();
inc();
inc();
println(get());
"#,
    );
    assert_eq!(out, "2\n");
}

#[test]
fn test_enclosing_function_and_closure_share_live_cell() {
    let out = output(
        r#"
mixed get;
mixed set;
void scope() {
    int n = 1;
    get = function() { return n; };
    set = function(int v) { n = v; };
    n = 5;
    println(get());
    set(9);
    println(n);
}
scope();
"#,
    );
    assert_eq!(out, "5\n9\n");
}

#[test]
fn test_closures_capture_per_iteration_copies() {
    let out = output(
        r#"
mixed first;
mixed second;
for (int i = 0; i < 2; i += 1) {
    int captured = i * 10;
    if (i == 0) first = function() { return captured; };
    else second = function() { return captured; };
}
println(first());
println(second());
"#,
    );
    assert_eq!(out, "0\n10\n");
}

#[test]
fn test_recursion() {
    let out = output(
        "int fact(int n) { if (n <= 1) return 1; return n * fact(n - 1); } println(fact(10));",
    );
    assert_eq!(out, "3628800\n");
}

#[test]
fn test_same_compilation_in_two_vms() {
    let script = compile(
        "shared",
        "int total = 0; for (int i = 1; i <= 4; i += 1) total += i; println(\"total \" + total);",
    )
    .unwrap();

    let mut first = Vm::new();
    first.capture_output();
    first.interpret(script.clone()).unwrap();

    let mut second = Vm::new();
    second.capture_output();
    second.interpret(script).unwrap();

    assert_eq!(first.take_output(), "total 10\n");
    assert_eq!(second.take_output(), "total 10\n");
}

#[test]
fn test_println_arity() {
    let mut vm = Vm::new();
    vm.capture_output();
    let err = run(&mut vm, "println(1, 2);").unwrap_err();
    assert_eq!(
        err.as_runtime().unwrap().to_string(),
        "Expected at most 1 arguments but got 2."
    );
    assert_eq!(run(&mut vm, "println();").unwrap(), "\n");
}

#[test]
fn test_function_arity() {
    let mut vm = Vm::new();
    let err = run(&mut vm, "void f(int a) {} f();").unwrap_err();
    assert_eq!(
        err.as_runtime().unwrap().to_string(),
        "Expected 1 arguments but got 0."
    );
}

#[test]
fn test_runtime_error_backtrace() {
    let mut vm = Vm::new();
    let err = run(
        &mut vm,
        "void boom() {\n  1 - \"a\";\n}\nboom();",
    )
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Operands must be numbers.\n[line 2] in boom()\n[line 4] in script test"
    );
    assert_eq!(vm.stack_len(), 0);
}

#[test]
fn test_stack_overflow_resets_vm() {
    let mut vm = Vm::new();
    vm.capture_output();
    let err = run(&mut vm, "void f() { f(); } f();").unwrap_err();
    assert_eq!(err.as_runtime().unwrap().to_string(), "Stack overflow.");
    assert_eq!(vm.stack_len(), 0);

    // The VM is usable again and keeps its globals.
    let out = run(&mut vm, "println(f == f);").unwrap();
    assert_eq!(out, "true\n");
}

#[test]
fn test_division_by_zero() {
    let mut vm = Vm::new();
    let err = run(&mut vm, "println(1 / 0);").unwrap_err();
    assert_eq!(err.as_runtime().unwrap().to_string(), "Division by zero.");
}

#[test]
fn test_compile_errors_are_collected() {
    let err = compile("test", "var = 1;\nprintln(;").unwrap_err();
    assert_eq!(err.len(), 2);
    assert!(err.to_string().starts_with("[line 1] Error at '='"));
}

#[test]
fn test_run_helper_uses_fresh_vm() {
    let value = lpcvm::run("var x = 1;").unwrap();
    assert_eq!(value.to_string(), "nil");
}
