mod util;

use std::time::Duration;

use nsscript::vm::value::ValueKind;
use util::TestEngine;

fn number(vm: &nsscript::Vm, compilation: &nsscript::Compilation, name: &str) -> f32 {
    match util::global(vm, compilation, name).kind {
        ValueKind::Number(n) => n,
        other => panic!("expected `{name}` to be a number, got {other:?}"),
    }
}

#[test]
fn wait_parks_the_thread_until_virtual_time_passes() {
    let (mut vm, compilation) = util::boot_vm(
        r#"chapter main {
            $a = 1;
            Wait(100);
            $b = 1;
        }"#,
    );
    let mut engine = TestEngine::default();
    let dt = Duration::from_millis(50);

    vm.run_tick(dt, &mut engine).expect("tick");
    assert_eq!(number(&vm, &compilation, "$a"), 1.0);
    assert_eq!(number(&vm, &compilation, "$b"), 0.0);

    // 50ms of the 100ms timeout elapsed; still parked.
    vm.run_tick(dt, &mut engine).expect("tick");
    assert_eq!(number(&vm, &compilation, "$b"), 0.0);

    vm.run_tick(dt, &mut engine).expect("tick");
    assert_eq!(number(&vm, &compilation, "$b"), 1.0);
    assert!(!vm.has_live_threads());
}

#[test]
fn call_scene_joins_before_the_caller_continues() {
    let (mut vm, compilation) = util::boot_vm(
        r#"scene intro {
            $i = 1;
        }
        chapter main {
            call_scene intro;
            $after = 1;
        }"#,
    );
    let mut engine = TestEngine::default();
    let dt = Duration::from_millis(16);

    // Tick 1: the scene thread spawns and is reported, but runs next tick.
    let first = vm.run_tick(dt, &mut engine).expect("tick");
    assert_eq!(first.new.len(), 1, "expected one new thread");
    assert_eq!(number(&vm, &compilation, "$i"), 0.0);
    assert_eq!(number(&vm, &compilation, "$after"), 0.0);

    // Tick 2: the scene finishes and the join wakes the caller in the same
    // tick, so both run to completion.
    let second = vm.run_tick(dt, &mut engine).expect("tick");
    assert_eq!(number(&vm, &compilation, "$i"), 1.0);
    assert_eq!(number(&vm, &compilation, "$after"), 1.0);
    assert_eq!(second.terminated.len(), 2);
    assert_eq!(second.terminated[0], first.new[0]);
    assert!(!vm.has_live_threads());
}

#[test]
fn create_thread_reports_on_spawn_tick_and_runs_next() {
    let (mut vm, compilation) = util::boot_vm(
        r#"function side() {
            $s = 1;
        }
        chapter main {
            CreateThread("worker", "side");
            $m = 1;
        }"#,
    );
    let mut engine = TestEngine::default();
    let dt = Duration::from_millis(16);

    let first = vm.run_tick(dt, &mut engine).expect("tick");
    assert_eq!(first.new.len(), 1);
    assert_eq!(number(&vm, &compilation, "$s"), 0.0);

    vm.run_tick(dt, &mut engine).expect("tick");
    assert_eq!(number(&vm, &compilation, "$s"), 1.0);
    assert_eq!(number(&vm, &compilation, "$m"), 1.0);
    assert!(!vm.has_live_threads());
}

#[test]
fn select_polls_once_per_tick_until_a_choice_is_pressed() {
    let (mut vm, compilation) = util::boot_vm(
        r#"chapter main {
            select {
                case yes: { $choice = 1; }
                case no: { $choice = 2; }
            }
            $done = 1;
        }"#,
    );
    let mut engine = TestEngine {
        press: Some("no".to_string()),
        press_after: 2,
        ..TestEngine::default()
    };
    let ticks = util::run_to_idle(&mut vm, &mut engine, 8);

    // Two idle polls, then the press lands on the third tick.
    assert_eq!(ticks, 3, "expected three ticks, got {ticks}");
    assert_eq!(number(&vm, &compilation, "$choice"), 2.0);
    assert_eq!(number(&vm, &compilation, "$done"), 1.0);
}

#[test]
fn dialogue_blocks_stream_one_line_per_tick() {
    let (mut vm, _) = util::boot_vm(
        "chapter main {\n<pre box01>\nFirst line.\nSecond line.\n</pre>\n}",
    );
    let mut engine = TestEngine::default();
    util::run_to_idle(&mut vm, &mut engine, 6);

    assert_eq!(
        engine.blocks,
        vec![("box01".to_string(), "text001".to_string())]
    );
    assert_eq!(
        engine.lines,
        vec!["First line.".to_string(), "Second line.".to_string()]
    );
    assert_eq!(engine.line_ends, 2);
}
