mod util;

use nsscript::vm::value::ValueKind;
use util::TestEngine;

#[test]
fn assignments_and_arithmetic_reach_the_global_table() {
    let (mut vm, compilation) = util::boot_vm(
        r#"chapter main {
            $x = 3;
            $x += 2;
            $msg = "x=" + $x;
            $d = "@" + 40;
            #seen = true;
        }"#,
    );
    let mut engine = TestEngine::default();
    util::run_to_idle(&mut vm, &mut engine, 4);

    assert_eq!(
        util::global(&vm, &compilation, "$x").kind,
        ValueKind::Number(5.0)
    );
    assert_eq!(
        util::global(&vm, &compilation, "$msg").as_str(),
        Some("x=5")
    );
    assert_eq!(
        util::global(&vm, &compilation, "$d").kind,
        ValueKind::Delta(40.0)
    );
    assert!(util::global(&vm, &compilation, "#seen").is_truthy());
}

#[test]
fn function_arguments_arrive_through_parameter_slots() {
    let (mut vm, compilation) = util::boot_vm(
        r#"function add($a, $b) {
            $sum = $a + $b;
        }
        chapter main {
            add(2, 3);
        }"#,
    );
    let mut engine = TestEngine::default();
    util::run_to_idle(&mut vm, &mut engine, 4);

    assert_eq!(
        util::global(&vm, &compilation, "$a").kind,
        ValueKind::Number(2.0)
    );
    assert_eq!(
        util::global(&vm, &compilation, "$b").kind,
        ValueKind::Number(3.0)
    );
    assert_eq!(
        util::global(&vm, &compilation, "$sum").kind,
        ValueKind::Number(5.0)
    );
}

#[test]
fn while_loops_finish_inside_a_single_tick() {
    let (mut vm, compilation) = util::boot_vm(
        r#"chapter main {
            $n = 3;
            while ($n > 0) {
                $n--;
                $total = $total + $n;
            }
        }"#,
    );
    let mut engine = TestEngine::default();
    let ticks = util::run_to_idle(&mut vm, &mut engine, 4);

    // Plain control flow never yields.
    assert_eq!(ticks, 1, "expected one tick, got {ticks}");
    assert_eq!(
        util::global(&vm, &compilation, "$n").kind,
        ValueKind::Number(0.0)
    );
    assert_eq!(
        util::global(&vm, &compilation, "$total").kind,
        ValueKind::Number(3.0)
    );
}

#[test]
fn untouched_globals_read_as_zero() {
    let (mut vm, compilation) = util::boot_vm(
        r#"chapter main {
            if ($never) {
                $taken = 1;
            }
        }"#,
    );
    let mut engine = TestEngine::default();
    util::run_to_idle(&mut vm, &mut engine, 2);

    assert_eq!(
        util::global(&vm, &compilation, "$never").kind,
        ValueKind::Number(0.0)
    );
    assert_eq!(
        util::global(&vm, &compilation, "$taken").kind,
        ValueKind::Number(0.0)
    );
}
