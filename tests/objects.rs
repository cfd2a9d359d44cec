//! Object loading, inheritance and dispatch through the public API.

use std::fs;
use std::rc::Rc;

use pretty_assertions::assert_eq;

use lpcvm::config::VmConfig;
use lpcvm::error::LpcError;
use lpcvm::vm::{compile, MemorySource, Vm};

const MONSTER: &str = r#"
int hp = 10;
string kind() { return "monster"; }
void hit(int n) { hp -= n; }
string describe() { return kind() + " " + hp; }
"#;

const ORC: &str = r#"
inherit "/std/monster";
string kind() { return "orc(" + ::kind() + ")"; }
"#;

fn world() -> MemorySource {
    MemorySource::new()
        .with("/std/monster", MONSTER)
        .with("/obj/orc", ORC)
        .with("/obj/box", "int size = 1;")
}

fn vm() -> Vm {
    let mut vm = Vm::with_source(VmConfig::default(), Box::new(world()));
    vm.capture_output();
    vm
}

fn run(vm: &mut Vm, source: &str) -> Result<String, LpcError> {
    let script = compile("test", source)?;
    vm.interpret(script)?;
    Ok(vm.take_output())
}

#[test]
fn test_inherited_dispatch_uses_receiver() {
    let mut vm = vm();
    let out = run(
        &mut vm,
        "var o = load(\"/obj/orc\"); o->hit(3); println(o->describe());",
    )
    .unwrap();
    assert_eq!(out, "orc(monster) 7\n");
}

#[test]
fn test_compilation_is_cached_per_path() {
    let mut vm = vm();
    let out = run(
        &mut vm,
        r#"
var a = load("/obj/box");
var b = load("/obj/box");
a->size = 5;
println(b->size);
println(a == b);
"#,
    )
    .unwrap();
    // Separate objects, one compiled program.
    assert_eq!(out, "1\nfalse\n");
    assert_eq!(vm.loader.compiles(), 1);

    let first = vm.loader.load("/obj/box").unwrap();
    let second = vm.loader.load("obj/box").unwrap();
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(vm.loader.compiles(), 1);
}

#[test]
fn test_parent_compiled_once_for_many_children() {
    let mut vm = vm();
    run(
        &mut vm,
        "for (int i = 0; i < 5; i += 1) load(\"/obj/orc\");",
    )
    .unwrap();
    assert_eq!(vm.loader.compiles(), 2);
    assert!(vm.loader.is_cached("/std/monster"));
    assert!(vm.loader.is_cached("/obj/orc"));
}

#[test]
fn test_loading_is_lazy() {
    let mut vm = vm();
    run(
        &mut vm,
        "void never() { load(\"/obj/orc\"); } println(\"done\");",
    )
    .unwrap();
    assert_eq!(vm.loader.compiles(), 0);
    assert!(!vm.loader.is_cached("/obj/orc"));
}

#[test]
fn test_load_object_from_host() {
    let mut vm = vm();
    let orc = vm.load_object("/obj/orc").unwrap();
    let orc = orc.borrow();
    assert_eq!(&*orc.name, "/obj/orc");
    let parent = orc.super_object.as_ref().unwrap().borrow();
    assert_eq!(&*parent.name, "/std/monster");
    assert_eq!(vm.stack_len(), 0);
}

#[test]
fn test_double_inherit_is_rejected() {
    let source = MemorySource::new()
        .with("/a", "")
        .with("/b", "")
        .with("/obj/c", "inherit \"/a\";\ninherit \"/b\";");
    let mut vm = Vm::with_source(VmConfig::default(), Box::new(source));
    let err = vm.load_object("/obj/c").unwrap_err();
    assert_eq!(
        err.as_runtime().unwrap().to_string(),
        "Object '/obj/c' already inherits from '/a'."
    );
}

#[test]
fn test_object_compile_error_reports_path() {
    let source = MemorySource::new().with("/obj/bad", "int x = ;");
    let mut vm = Vm::with_source(VmConfig::default(), Box::new(source));
    vm.capture_output();
    let err = run(&mut vm, "load(\"/obj/bad\");").unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("load: Object '/obj/bad' failed to compile:"));
    assert!(message.contains("[line 1] Error at ';': Expect expression."));
    assert!(!vm.loader.is_cached("/obj/bad"));
}

#[test]
fn test_objects_from_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("std")).unwrap();
    fs::create_dir_all(dir.path().join("obj")).unwrap();
    fs::write(dir.path().join("std/monster.c"), MONSTER).unwrap();
    fs::write(dir.path().join("obj/orc.c"), ORC).unwrap();

    let config = VmConfig {
        object_root: dir.path().to_path_buf(),
        ..VmConfig::default()
    };
    let mut vm = Vm::with_config(config);
    vm.capture_output();
    let out = run(&mut vm, "println(load(\"/obj/orc.c\")->describe());").unwrap();
    assert_eq!(out, "orc(monster) 10\n");
}

#[test]
fn test_missing_object_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = VmConfig {
        object_root: dir.path().to_path_buf(),
        ..VmConfig::default()
    };
    let mut vm = Vm::with_config(config);
    let err = run(&mut vm, "load(\"/obj/ghost\");").unwrap_err();
    assert!(err.to_string().starts_with("load: Can't read object '/obj/ghost'"));
    assert_eq!(vm.stack_len(), 0);
}
