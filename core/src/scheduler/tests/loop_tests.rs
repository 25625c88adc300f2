//! Tests for loop iterations: FIRST, NEXT and LAST

use super::helpers::*;
use crate::scheduler::*;

/// One iteration with FIRST/ENTER/NEXT/LEAVE/LAST/POST all declared
fn iteration(sched: &PhaseScheduler, log: &Log, first: bool, last: bool) -> BlockContext {
    let mut ctx = BlockContext::loop_iteration("body", first, last);
    sched.register(&mut ctx, PhaseKind::LoopFirst, record(log, "F")).unwrap();
    sched.register(&mut ctx, PhaseKind::BlockEnter, record(log, "E")).unwrap();
    sched.register(&mut ctx, PhaseKind::LoopNext, record(log, "N")).unwrap();
    sched.register(&mut ctx, PhaseKind::BlockLeave, record(log, "L")).unwrap();
    sched.register(&mut ctx, PhaseKind::LoopLast, record(log, "Z")).unwrap();
    sched.register(&mut ctx, PhaseKind::PostCondition, record(log, "Q")).unwrap();
    ctx
}

#[test]
fn test_first_fires_only_on_first_iteration() {
    let sched = scheduler();
    let log = new_log();

    for i in 0..3 {
        let mut ctx = iteration(&sched, &log, i == 0, i == 2);
        sched.enter_block(&mut ctx).unwrap();
        sched
            .exit_block(&mut ctx, ExitReason::Normal(Val::Num(i as f64)))
            .unwrap();
    }

    let firsts = entries(&log).iter().filter(|e| *e == "F").count();
    assert_eq!(firsts, 1);
    assert_eq!(entries(&log)[0], "F");
}

#[test]
fn test_next_fires_on_fall_through() {
    let sched = scheduler();
    let log = new_log();
    let mut ctx = iteration(&sched, &log, false, false);

    sched.enter_block(&mut ctx).unwrap();
    sched.exit_block(&mut ctx, ExitReason::Normal(Val::Null)).unwrap();

    assert_eq!(entries(&log), vec!["E", "N", "L", "Q"]);
}

#[test]
fn test_next_fires_on_explicit_next() {
    let sched = scheduler();
    let log = new_log();
    let mut ctx = iteration(&sched, &log, false, false);

    sched.enter_block(&mut ctx).unwrap();
    let outcome = sched
        .exit_block(&mut ctx, ExitReason::Next(Val::Num(3.0)))
        .unwrap();

    assert_eq!(outcome, ExitOutcome::Left(Val::Num(3.0)));
    assert_eq!(entries(&log), vec!["E", "N", "L", "Q"]);
}

#[test]
fn test_last_fires_after_leave_and_skips_next() {
    let sched = scheduler();
    let log = new_log();
    let mut ctx = iteration(&sched, &log, false, false);

    sched.enter_block(&mut ctx).unwrap();
    sched.exit_block(&mut ctx, ExitReason::Last(Val::Null)).unwrap();

    assert_eq!(entries(&log), vec!["E", "L", "Z", "Q"]);
}

#[test]
fn test_final_iteration_fires_next_then_last() {
    let sched = scheduler();
    let log = new_log();
    let mut ctx = iteration(&sched, &log, false, true);

    sched.enter_block(&mut ctx).unwrap();
    sched.exit_block(&mut ctx, ExitReason::Normal(Val::Null)).unwrap();

    assert_eq!(entries(&log), vec!["E", "N", "L", "Z", "Q"]);
}

#[test]
fn test_mark_final_iteration_late() {
    let sched = scheduler();
    let log = new_log();
    let mut ctx = iteration(&sched, &log, true, false);

    sched.enter_block(&mut ctx).unwrap();
    // The driver finds out mid-body that nothing follows
    ctx.mark_final_iteration();
    sched.exit_block(&mut ctx, ExitReason::Normal(Val::Null)).unwrap();

    assert_eq!(entries(&log), vec!["F", "E", "N", "L", "Z", "Q"]);
}

#[test]
fn test_unwound_iteration_fires_neither_next_nor_last() {
    let sched = scheduler();
    let log = new_log();
    let mut ctx = iteration(&sched, &log, false, true);

    sched.enter_block(&mut ctx).unwrap();
    let err = sched
        .exit_block(
            &mut ctx,
            ExitReason::Unwound(Condition::exception(error("Boom"))),
        )
        .unwrap_err();

    assert_eq!(err.code(), "Boom");
    assert_eq!(entries(&log), vec!["E", "L", "Q"]);
}

#[test]
fn test_next_phasers_fire_in_reverse() {
    let sched = scheduler();
    let log = new_log();
    let mut ctx = BlockContext::loop_iteration("body", false, false);
    sched.register(&mut ctx, PhaseKind::LoopNext, record(&log, "N1")).unwrap();
    sched.register(&mut ctx, PhaseKind::LoopNext, record(&log, "N2")).unwrap();

    sched.enter_block(&mut ctx).unwrap();
    sched.exit_block(&mut ctx, ExitReason::Normal(Val::Null)).unwrap();

    assert_eq!(entries(&log), vec!["N2", "N1"]);
}

#[test]
fn test_next_failure_is_collected_and_leave_still_runs() {
    let sched = scheduler();
    let log = new_log();
    let mut ctx = BlockContext::loop_iteration("body", false, false);
    sched.register(&mut ctx, PhaseKind::BlockLeave, record(&log, "L")).unwrap();
    sched.register(&mut ctx, PhaseKind::LoopNext, raise(&log, "N", "NextBroke")).unwrap();

    sched.enter_block(&mut ctx).unwrap();
    let err = sched
        .exit_block(&mut ctx, ExitReason::Normal(Val::Null))
        .unwrap_err();

    assert_eq!(err.code(), "NextBroke");
    assert_eq!(entries(&log), vec!["N", "L"]);
    assert_eq!(ctx.state(), ContextState::Left);
}
