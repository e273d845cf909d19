mod util;

use std::time::Duration;

use nsscript::VmError;
use nsscript::vm::builtins::EaseFunction;
use nsscript::vm::value::ValueKind;
use util::TestEngine;

#[test]
fn a_wrong_argument_kind_fails_the_tick_with_its_position() {
    let (mut vm, _) = util::boot_vm(r#"chapter main { Fade("bg", true, 1000, Axl1, true); }"#);
    let mut engine = TestEngine::default();

    let err = vm
        .run_tick(Duration::from_millis(16), &mut engine)
        .expect_err("bad argument should fail the tick");
    match err {
        VmError::Dispatch(e) => {
            assert_eq!(e.builtin, "Fade");
            assert_eq!(e.index, 1, "argument positions count from zero");
            assert_eq!(e.actual, "bool");
        }
        other => panic!("expected a dispatch error, got {other}"),
    }
}

#[test]
fn move_accepts_both_trailing_argument_orders() {
    let (mut vm, _) = util::boot_vm(
        r#"chapter main {
            Move("spr", 1000, 10, 20, Axl1, 500);
            Move("spr", 1000, 10, 20, 500, Axl1);
        }"#,
    );
    let mut engine = TestEngine::default();
    util::run_to_idle(&mut vm, &mut engine, 6);

    assert_eq!(engine.moves.len(), 2);
    for call in &engine.moves {
        assert_eq!(call.query, "spr");
        assert_eq!(call.duration, Duration::from_millis(1000));
        assert_eq!(call.ease, Some(EaseFunction::QuadIn));
        assert_eq!(call.delay, Duration::from_millis(500));
    }
}

#[test]
fn out_parameters_write_back_through_their_slots() {
    let (mut vm, compilation) = util::boot_vm("chapter main { CursorPosition($mx, $my); }");
    let mut engine = TestEngine {
        cursor: (120.0, 64.0),
        ..TestEngine::default()
    };
    util::run_to_idle(&mut vm, &mut engine, 4);

    assert_eq!(
        util::global(&vm, &compilation, "$mx").kind,
        ValueKind::Number(120.0)
    );
    assert_eq!(
        util::global(&vm, &compilation, "$my").kind,
        ValueKind::Number(64.0)
    );
}

#[test]
fn entity_paths_and_sources_reach_the_engine() {
    let (mut vm, _) =
        util::boot_vm(r#"chapter main { CreateTexture("bg", 100, 0, 0, "cg/bg01.png"); }"#);
    let mut engine = TestEngine::default();
    util::run_to_idle(&mut vm, &mut engine, 4);

    assert_eq!(engine.calls, vec!["CreateTexture bg 100 cg/bg01.png".to_string()]);
}
