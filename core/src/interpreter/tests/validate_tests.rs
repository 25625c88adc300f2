//! Tests for static program validation

use super::helpers::program;
use crate::interpreter::{validate_program, ValidationError};
use crate::scheduler::PhaseKind;

fn errors_of(json: &str) -> Vec<ValidationError> {
    validate_program(&program(json)).expect_err("program should be rejected")
}

#[test]
fn test_valid_program_passes() {
    let json = r#"{
        "name": "ok",
        "phasers": [
            {"kind": "compile-begin", "body": [{"type": "Emit", "text": "b"}]},
            {"kind": "block-enter"}
        ],
        "body": [{
            "type": "Loop",
            "iterations": 2,
            "phasers": [{"kind": "loop-first"}],
            "body": [
                {"type": "Block", "body": [{"type": "Next"}]}
            ]
        }]
    }"#;

    assert_eq!(validate_program(&program(json)), Ok(()));
}

#[test]
fn test_next_outside_loop_is_rejected() {
    let errors = errors_of(r#"{
        "name": "p",
        "body": [{"type": "Block", "body": [{"type": "Last"}]}]
    }"#);

    assert_eq!(
        errors,
        vec![ValidationError::ControlFlowOutsideLoop {
            statement: "Last".to_string(),
            path: "p/0/0".to_string(),
        }]
    );
}

#[test]
fn test_phaser_bodies_are_restricted() {
    let errors = errors_of(r#"{
        "body": [{
            "type": "Block",
            "phasers": [{
                "kind": "block-leave",
                "body": [
                    {"type": "Emit", "text": "ok"},
                    {"type": "Warn", "message": "no"},
                    {"type": "Block", "body": []}
                ]
            }],
            "body": []
        }]
    }"#);

    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| matches!(e, ValidationError::StatementInPhaser { .. })));
}

#[test]
fn test_kinds_are_checked_against_their_position() {
    let errors = errors_of(r#"{
        "body": [{
            "type": "Block",
            "phasers": [
                {"kind": "loop-first"},
                {"kind": "runtime-end"},
                {"kind": "async-quit"}
            ],
            "body": []
        }]
    }"#);

    let kinds: Vec<PhaseKind> = errors
        .iter()
        .filter_map(|e| match e {
            ValidationError::KindNotAllowed { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect();
    assert_eq!(
        kinds,
        vec![PhaseKind::LoopFirst, PhaseKind::RuntimeEnd, PhaseKind::AsyncQuit]
    );
}

#[test]
fn test_handler_specs_belong_to_catch_and_control() {
    let errors = errors_of(r#"{
        "phasers": [
            {"kind": "catch"},
            {"kind": "block-enter", "handler": {"outcome": {"outcome": "decline"}}}
        ],
        "body": []
    }"#);

    assert!(matches!(
        errors[0],
        ValidationError::MissingHandler { kind: PhaseKind::Catch, .. }
    ));
    assert!(matches!(
        errors[1],
        ValidationError::UnexpectedHandler { kind: PhaseKind::BlockEnter, .. }
    ));
}

#[test]
fn test_run_once_sites_must_be_unique() {
    let errors = errors_of(r#"{
        "body": [
            {"type": "Once", "kind": "runtime-init", "site": "s", "body": []},
            {"type": "Block", "body": [
                {"type": "Once", "kind": "runtime-init", "site": "s", "body": []}
            ]},
            {"type": "Once", "kind": "compile-begin", "site": "s", "body": []}
        ]
    }"#);

    assert_eq!(
        errors,
        vec![ValidationError::DuplicateSite {
            kind: PhaseKind::RuntimeInit,
            site: "s".to_string(),
        }]
    );
}

#[test]
fn test_end_cannot_run_in_place() {
    let errors = errors_of(r#"{
        "body": [{"type": "Once", "kind": "runtime-end", "site": "e", "body": []}]
    }"#);

    assert!(matches!(
        errors[0],
        ValidationError::KindNotAllowed { kind: PhaseKind::RuntimeEnd, .. }
    ));
}

#[test]
fn test_error_messages_name_the_keyword() {
    let error = ValidationError::MissingHandler {
        kind: PhaseKind::Control,
        path: "main#control".to_string(),
    };

    assert_eq!(error.to_string(), "CONTROL at main#control needs a handler");
}
