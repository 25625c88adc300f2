//! Tests for registration and block entry

use super::helpers::*;
use crate::scheduler::*;

#[test]
fn test_enter_callbacks_fire_in_declaration_order() {
    let sched = scheduler();
    let log = new_log();
    let mut ctx = BlockContext::new("block");
    sched.register(&mut ctx, PhaseKind::BlockEnter, record(&log, "E1")).unwrap();
    sched.register(&mut ctx, PhaseKind::BlockEnter, record(&log, "E2")).unwrap();
    sched.register(&mut ctx, PhaseKind::BlockEnter, record(&log, "E3")).unwrap();

    sched.enter_block(&mut ctx).unwrap();

    assert_eq!(entries(&log), vec!["E1", "E2", "E3"]);
    assert_eq!(ctx.state(), ContextState::Active);
}

#[test]
fn test_enter_failure_aborts_remaining_enter_callbacks() {
    let sched = scheduler();
    let log = new_log();
    let mut ctx = BlockContext::new("block");
    sched.register(&mut ctx, PhaseKind::BlockEnter, record(&log, "E1")).unwrap();
    sched.register(&mut ctx, PhaseKind::BlockEnter, raise(&log, "E2", "EnterBroke")).unwrap();
    sched.register(&mut ctx, PhaseKind::BlockEnter, record(&log, "E3")).unwrap();
    sched.register(&mut ctx, PhaseKind::BlockLeave, record(&log, "L")).unwrap();

    let err = sched.enter_block(&mut ctx).unwrap_err();

    assert_eq!(err.code(), "EnterBroke");
    assert_eq!(entries(&log), vec!["E1", "E2"]);
    assert_eq!(ctx.state(), ContextState::EntryAborted);

    // An aborted context owes no leave phases and cannot be left
    let exit = sched.exit_block(&mut ctx, ExitReason::Normal(Val::Null));
    assert!(matches!(exit, Err(PhaseError::InvalidTransition { .. })));
    assert_eq!(entries(&log), vec!["E1", "E2"]);
}

#[test]
fn test_precondition_failure_skips_first_and_enter() {
    let sched = scheduler();
    let log = new_log();
    let mut ctx = BlockContext::loop_iteration("body", true, false);
    sched.register(&mut ctx, PhaseKind::PreCondition, record(&log, "P1")).unwrap();
    sched
        .register(
            &mut ctx,
            PhaseKind::PreCondition,
            record_value(&log, "P2", Val::Bool(false)),
        )
        .unwrap();
    sched.register(&mut ctx, PhaseKind::PreCondition, record(&log, "P3")).unwrap();
    sched.register(&mut ctx, PhaseKind::LoopFirst, record(&log, "F")).unwrap();
    sched.register(&mut ctx, PhaseKind::BlockEnter, record(&log, "E")).unwrap();
    sched.register(&mut ctx, PhaseKind::PostCondition, record(&log, "Q")).unwrap();

    let err = sched.enter_block(&mut ctx).unwrap_err();

    assert_eq!(
        err,
        PhaseError::PreconditionFailed {
            block: ctx.id(),
            index: 1
        }
    );
    assert_eq!(entries(&log), vec!["P1", "P2"]);
    assert!(ctx.pre_failed());
    assert_eq!(ctx.state(), ContextState::EntryAborted);
}

#[test]
fn test_precondition_raising_aborts_entry() {
    let sched = scheduler();
    let log = new_log();
    let mut ctx = BlockContext::new("block");
    sched.register(&mut ctx, PhaseKind::PreCondition, raise(&log, "P", "Bad")).unwrap();
    sched.register(&mut ctx, PhaseKind::BlockEnter, record(&log, "E")).unwrap();

    let err = sched.enter_block(&mut ctx).unwrap_err();

    assert_eq!(err.code(), "Bad");
    assert_eq!(entries(&log), vec!["P"]);
}

#[test]
fn test_first_fires_between_pre_and_enter() {
    let sched = scheduler();
    let log = new_log();
    let mut ctx = BlockContext::loop_iteration("body", true, false);
    sched.register(&mut ctx, PhaseKind::BlockEnter, record(&log, "E")).unwrap();
    sched.register(&mut ctx, PhaseKind::LoopFirst, record(&log, "F")).unwrap();
    sched.register(&mut ctx, PhaseKind::PreCondition, record(&log, "P")).unwrap();

    sched.enter_block(&mut ctx).unwrap();

    assert_eq!(entries(&log), vec!["P", "F", "E"]);
}

#[test]
fn test_first_failure_aborts_entry() {
    let sched = scheduler();
    let log = new_log();
    let mut ctx = BlockContext::loop_iteration("body", true, false);
    sched.register(&mut ctx, PhaseKind::LoopFirst, raise(&log, "F", "FirstBroke")).unwrap();
    sched.register(&mut ctx, PhaseKind::BlockEnter, record(&log, "E")).unwrap();

    let err = sched.enter_block(&mut ctx).unwrap_err();

    assert_eq!(err.code(), "FirstBroke");
    assert_eq!(entries(&log), vec!["F"]);
    assert_eq!(ctx.state(), ContextState::EntryAborted);
}

#[test]
fn test_register_rejects_mismatched_callbacks() {
    let sched = scheduler();
    let log = new_log();
    let mut ctx = BlockContext::new("block");

    let err = sched
        .register(&mut ctx, PhaseKind::Catch, record(&log, "C"))
        .unwrap_err();
    assert_eq!(err, PhaseError::CallbackMismatch { kind: PhaseKind::Catch });

    let err = sched
        .register(
            &mut ctx,
            PhaseKind::BlockEnter,
            handler(&log, "H", HandlerOutcome::Decline),
        )
        .unwrap_err();
    assert_eq!(
        err,
        PhaseError::CallbackMismatch {
            kind: PhaseKind::BlockEnter
        }
    );
}

#[test]
fn test_register_rejects_kinds_that_do_not_belong_to_the_block() {
    let sched = scheduler();
    let log = new_log();
    let mut ctx = BlockContext::new("block");

    for kind in [
        PhaseKind::RuntimeInit,
        PhaseKind::CompileBegin,
        PhaseKind::AsyncClose,
        PhaseKind::LoopFirst,
        PhaseKind::LoopLast,
    ] {
        let err = sched.register(&mut ctx, kind, record(&log, "x")).unwrap_err();
        assert!(
            matches!(err, PhaseError::KindNotAllowed { kind: k, .. } if k == kind),
            "expected {} to be rejected, got {:?}",
            kind,
            err
        );
    }
}

#[test]
fn test_register_after_entry_is_rejected() {
    let sched = scheduler();
    let log = new_log();
    let mut ctx = BlockContext::new("block");
    sched.enter_block(&mut ctx).unwrap();

    let err = sched
        .register(&mut ctx, PhaseKind::BlockLeave, record(&log, "L"))
        .unwrap_err();

    assert!(matches!(err, PhaseError::KindNotAllowed { .. }));
}

#[test]
fn test_captured_context_is_passed_to_callbacks() {
    let sched = scheduler();
    let log = new_log();
    let mut ctx = BlockContext::new("block").with_captured(Val::Str("self".to_string()));
    let sink = log.clone();
    sched
        .register(
            &mut ctx,
            PhaseKind::BlockEnter,
            Callback::phase(move |call| {
                sink.lock().push(format!("{}:{}", call.kind, call.captured));
                Ok(Val::Null)
            }),
        )
        .unwrap();

    sched.enter_block(&mut ctx).unwrap();

    assert_eq!(entries(&log), vec!["block-enter:self"]);
}
