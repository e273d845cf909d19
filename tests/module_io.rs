mod util;

use std::fs;

use nsscript::bytecode::NsxModule;
use nsscript::bytecode::globals::GlobalsTable;
use nsscript::vm::value::ValueKind;
use nsscript::{Compilation, Vm, VmOptions};
use util::TestEngine;

#[test]
fn compiled_modules_round_trip_through_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join("boot.nss"),
        "chapter main { $x = 7; }\nscene title { $t = 1; }",
    )
    .expect("write source");

    let mut compilation = Compilation::new(dir.path());
    let module = compilation.compile_module("boot").expect("compile");
    assert!(module.mtime > 0, "mtime should come from the source file");

    let path = dir.path().join("boot.nsx");
    fs::write(&path, module.to_bytes().expect("encode")).expect("write module");
    let decoded = NsxModule::decode(&fs::read(&path).expect("read"), "boot").expect("decode");

    assert_eq!(decoded, module);
}

#[test]
fn the_vm_loads_modules_from_its_root_case_insensitively() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("boot.nss"), "chapter main { $x = 7; }").expect("write source");

    let mut compilation = Compilation::new(dir.path());
    let module = compilation.compile_module("boot").expect("compile");
    fs::write(
        dir.path().join("Boot.nsx"),
        module.to_bytes().expect("encode"),
    )
    .expect("write module");

    let mut vm = Vm::with_module_root(dir.path().to_path_buf(), VmOptions::default());
    vm.start("BOOT", "main").expect("start");
    let mut engine = TestEngine::default();
    util::run_to_idle(&mut vm, &mut engine, 2);

    assert_eq!(
        util::global(&vm, &compilation, "$x").kind,
        ValueKind::Number(7.0)
    );
}

#[test]
fn included_subroutines_resolve_to_far_calls_across_modules() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join("common.nss"),
        "scene title { $t = 1; }",
    )
    .expect("write common");
    fs::write(
        dir.path().join("boot.nss"),
        "#include \"common.nss\"\nchapter main { call_scene title; $after = 1; }",
    )
    .expect("write boot");

    let mut compilation = Compilation::new(dir.path());
    for name in ["boot", "common"] {
        let module = compilation.compile_module(name).expect("compile");
        fs::write(
            dir.path().join(format!("{name}.nsx")),
            module.to_bytes().expect("encode"),
        )
        .expect("write module");
    }
    assert!(!compilation.diagnostics().has_errors());

    let mut vm = Vm::with_module_root(dir.path().to_path_buf(), VmOptions::default());
    vm.start("boot", "main").expect("start");
    let mut engine = TestEngine::default();
    util::run_to_idle(&mut vm, &mut engine, 4);

    assert_eq!(
        util::global(&vm, &compilation, "$t").kind,
        ValueKind::Number(1.0)
    );
    assert_eq!(
        util::global(&vm, &compilation, "$after").kind,
        ValueKind::Number(1.0)
    );
}

#[test]
fn the_globals_table_round_trips_through_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut table = GlobalsTable::new();
    table.get_or_insert("$x");
    table.get_or_insert("#flag");
    table.get_or_insert("$name");

    let path = dir.path().join("globals.nsb");
    fs::write(&path, table.to_bytes().expect("encode")).expect("write");
    let decoded = GlobalsTable::decode(&fs::read(&path).expect("read")).expect("decode");

    assert_eq!(decoded.len(), 3);
    assert_eq!(decoded.slot("$x"), Some(0));
    assert_eq!(decoded.slot("#flag"), Some(1));
    assert_eq!(decoded.slot("$name"), Some(2));
}

#[test]
fn start_dialogue_enters_at_the_block_not_the_subroutine() {
    let (module, compilation) = util::compile_one(
        "chapter main {\n$before = 1;\n<pre box01>\nHi.\n</pre>\n}",
    );
    let mut vm = Vm::new(VmOptions::default());
    vm.add_module(module);
    vm.start_dialogue("boot", "text001").expect("start block");

    let mut engine = TestEngine::default();
    util::run_to_idle(&mut vm, &mut engine, 4);

    // The statement before the block never runs.
    assert_eq!(
        util::global(&vm, &compilation, "$before").kind,
        ValueKind::Number(0.0)
    );
    assert_eq!(engine.lines, vec!["Hi.".to_string()]);
}
