// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::node::turn::TurnProtocol;
use huddle_core::limits::TASK_TURN;

#[test]
fn registry_finds_registered_kind() {
    let registry = TaskRegistry::new();
    assert!(registry.find(TASK_TURN).is_none());

    registry.register(Arc::new(TurnProtocol));
    assert!(registry.find(TASK_TURN).is_some());
    assert!(registry.find(99).is_none());
}

#[test]
fn registration_is_idempotent_by_kind() {
    let registry = TaskRegistry::new();
    let first = Arc::new(TurnProtocol);
    registry.register(Arc::clone(&first) as Arc<dyn TaskProtocol>);
    let kept = registry.find(TASK_TURN).unwrap();

    // A second registration for the same kind does not replace it.
    registry.register(Arc::new(TurnProtocol));
    assert!(Arc::ptr_eq(&kept, &registry.find(TASK_TURN).unwrap()));
}

#[test]
fn unregister_removes_the_kind() {
    let registry = TaskRegistry::with_builtin();
    assert!(registry.find(TASK_TURN).is_some());
    registry.unregister(TASK_TURN);
    assert!(registry.find(TASK_TURN).is_none());
}
