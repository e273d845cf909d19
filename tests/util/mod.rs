#![allow(dead_code)]

use std::time::Duration;

use nsscript::bytecode::NsxModule;
use nsscript::vm::builtins::{EaseFunction, EntityPath, EntityQuery};
use nsscript::vm::value::Value;
use nsscript::{Compilation, EngineCallbacks, Vm, VmOptions};

/// Compile one in-memory source file as module `boot`.
pub fn compile_one(source: &str) -> (NsxModule, Compilation) {
    let mut compilation = Compilation::new(".");
    let module = compilation
        .compile_source("boot", source, 0)
        .expect("compile");
    assert!(
        !compilation.diagnostics().has_errors(),
        "compile errors: {:?}",
        compilation.diagnostics().all()
    );
    (module, compilation)
}

/// A VM preloaded with the compiled form of `source`, started on
/// `boot -> main`.
pub fn boot_vm(source: &str) -> (Vm, Compilation) {
    let (module, compilation) = compile_one(source);
    let mut vm = Vm::new(VmOptions::default());
    vm.add_module(module);
    vm.start("boot", "main").expect("start");
    (vm, compilation)
}

/// Tick until every thread is gone; panics after `max_ticks`. Returns the
/// number of ticks taken.
pub fn run_to_idle(vm: &mut Vm, engine: &mut dyn EngineCallbacks, max_ticks: usize) -> usize {
    let dt = Duration::from_millis(16);
    for tick in 1..=max_ticks {
        vm.run_tick(dt, engine).expect("tick");
        if !vm.has_live_threads() {
            return tick;
        }
    }
    panic!("still running after {max_ticks} ticks");
}

/// Read the global the compiler assigned to `name`.
pub fn global(vm: &Vm, compilation: &Compilation, name: &str) -> Value {
    let slot = compilation
        .globals()
        .slot(name)
        .unwrap_or_else(|| panic!("no global `{name}`"));
    vm.globals().get(slot)
}

#[derive(Debug)]
pub struct MoveCall {
    pub query: String,
    pub duration: Duration,
    pub ease: Option<EaseFunction>,
    pub delay: Duration,
}

/// Recording engine for integration tests: logs the callbacks scripts hit
/// and simulates choice presses.
#[derive(Default)]
pub struct TestEngine {
    pub calls: Vec<String>,
    pub blocks: Vec<(String, String)>,
    pub lines: Vec<String>,
    pub line_ends: usize,
    pub moves: Vec<MoveCall>,
    /// Choice to report pressed, after ignoring it `press_after` times.
    pub press: Option<String>,
    pub press_after: usize,
    pub cursor: (f32, f32),
}

impl EngineCallbacks for TestEngine {
    fn activate_dialogue_block(&mut self, box_name: &str, block_name: &str) {
        self.blocks
            .push((box_name.to_string(), block_name.to_string()));
    }

    fn append_dialogue(&mut self, text: &str) {
        self.lines.push(text.to_string());
    }

    fn dialogue_line_end(&mut self) {
        self.line_ends += 1;
    }

    fn is_pressed(&mut self, choice: &str) -> bool {
        if self.press.as_deref() != Some(choice) {
            return false;
        }
        if self.press_after > 0 {
            self.press_after -= 1;
            return false;
        }
        true
    }

    fn create_texture(
        &mut self,
        path: EntityPath,
        priority: i32,
        _x: &Value,
        _y: &Value,
        source: &str,
    ) {
        self.calls
            .push(format!("CreateTexture {} {priority} {source}", path.0));
    }

    fn do_move(
        &mut self,
        query: EntityQuery,
        duration: Duration,
        _x: &Value,
        _y: &Value,
        ease: Option<EaseFunction>,
        delay: Duration,
    ) {
        self.moves.push(MoveCall {
            query: query.0,
            duration,
            ease,
            delay,
        });
    }

    fn cursor_position(&mut self) -> (f32, f32) {
        self.cursor
    }
}
