//! Operation queue unit tests

use provisioner::deploy::queue::{NextOperation, OperationQueue};
use provisioner::models::operation::OperationStatus;

use crate::support::descriptors;

fn queue(ids: &[&str]) -> OperationQueue {
    OperationQueue::from_descriptors(descriptors(ids)).unwrap()
}

fn next_id(queue: &OperationQueue) -> Option<String> {
    match queue.next_operation() {
        NextOperation::Ready(op) => Some(op.id),
        _ => None,
    }
}

#[test]
fn test_complete_first_operation_advances_cursor() {
    let mut queue = queue(&["op1", "op2"]);

    assert!(queue.mark_completed("op1").unwrap());

    let state = queue.state();
    assert_eq!(state.current_index, 1);
    assert_eq!(state.completed_ids.iter().collect::<Vec<_>>(), vec!["op1"]);
    assert_eq!(next_id(&queue).as_deref(), Some("op2"));
}

#[test]
fn test_failure_holds_cursor_and_blocks() {
    let mut queue = queue(&["op1", "op2"]);

    queue.mark_failed("op1", "ssh timeout").unwrap();

    let state = queue.state();
    assert_eq!(state.current_index, 0);
    assert_eq!(state.failed_ids.iter().collect::<Vec<_>>(), vec!["op1"]);
    match queue.next_operation() {
        NextOperation::Blocked(op) => {
            assert_eq!(op.id, "op1");
            assert_eq!(op.error.as_deref(), Some("ssh timeout"));
        }
        other => panic!("expected blocked, got {:?}", other),
    }
}

#[test]
fn test_reset_failed_returns_to_pending() {
    let mut queue = queue(&["op1", "op2"]);
    queue.mark_failed("op1", "ssh timeout").unwrap();

    let reset = queue.reset_failed();

    assert_eq!(reset, vec!["op1".to_string()]);
    let state = queue.state();
    assert_eq!(state.operations[0].status, OperationStatus::Pending);
    assert!(state.operations[0].error.is_none());
    assert!(state.failed_ids.is_empty());
    assert_eq!(state.current_index, 0);
    assert_eq!(next_id(&queue).as_deref(), Some("op1"));
}

#[test]
fn test_mark_completed_is_idempotent() {
    let mut queue = queue(&["op1", "op2", "op3"]);
    queue.mark_completed("op1").unwrap();
    let once = queue.state().clone();

    assert!(!queue.mark_completed("op1").unwrap());

    // an idempotent call leaves the timestamp untouched too
    assert_eq!(queue.state(), &once);
}

#[test]
fn test_mark_failed_keeps_first_message() {
    let mut queue = queue(&["op1"]);
    queue.mark_failed("op1", "first").unwrap();

    assert!(!queue.mark_failed("op1", "second").unwrap());
    assert_eq!(
        queue.state().operations[0].error.as_deref(),
        Some("first")
    );
}

#[test]
fn test_cursor_never_decreases_without_reset() {
    let mut queue = queue(&["op1", "op2", "op3", "op4"]);
    let mut last = queue.state().current_index;

    // out-of-order completion does not move the cursor past op1
    queue.mark_completed("op3").unwrap();
    assert_eq!(queue.state().current_index, 0);

    for id in ["op1", "op2", "op2", "op1", "op4"] {
        queue.mark_completed(id).unwrap();
        let index = queue.state().current_index;
        assert!(index >= last, "cursor moved back from {} to {}", last, index);
        last = index;
    }

    // completing op2 skipped the already completed op3
    assert_eq!(queue.state().current_index, 4);
    assert_eq!(queue.next_operation(), NextOperation::Complete);
}

#[test]
fn test_completion_skips_already_completed_entries() {
    let mut queue = queue(&["op1", "op2", "op3"]);
    queue.mark_completed("op2").unwrap();

    queue.mark_completed("op1").unwrap();

    assert_eq!(queue.state().current_index, 2);
    assert_eq!(next_id(&queue).as_deref(), Some("op3"));
}

#[test]
fn test_failed_operation_ahead_of_cursor_blocks() {
    let mut queue = queue(&["op1", "op2", "op3"]);
    queue.mark_failed("op2", "boom").unwrap();
    queue.mark_completed("op1").unwrap();

    // the cursor lands on the failed op2
    assert_eq!(queue.state().current_index, 1);
    assert!(matches!(queue.next_operation(), NextOperation::Blocked(op) if op.id == "op2"));
}

#[test]
fn test_failed_downstream_of_completed_cursor_blocks() {
    let mut queue = queue(&["op1", "op2", "op3"]);
    queue.mark_failed("op2", "boom").unwrap();
    queue.mark_completed("op1").unwrap();
    queue.reset_failed();

    // cursor rewound to 0, op1 completed, op2 pending again
    assert_eq!(queue.state().current_index, 0);
    assert_eq!(next_id(&queue).as_deref(), Some("op2"));

    queue.mark_failed("op2", "boom again").unwrap();
    assert!(matches!(queue.next_operation(), NextOperation::Blocked(op) if op.id == "op2"));
    assert_eq!(queue.state().current_index, 0);
}

#[test]
fn test_blocked_until_reset_for_every_failure_position() {
    let ids = ["op1", "op2", "op3", "op4"];
    for failed in 0..ids.len() {
        let mut queue = queue(&ids);
        for id in &ids[..failed] {
            queue.mark_completed(id).unwrap();
        }
        queue.mark_failed(ids[failed], "boom").unwrap();

        // nothing later may run, whatever else completes out of order
        for id in &ids[failed + 1..] {
            queue.mark_completed(id).unwrap();
            assert!(
                matches!(queue.next_operation(), NextOperation::Blocked(ref op) if op.id == ids[failed]),
                "failure at {} not blocking",
                failed
            );
        }

        queue.reset_failed();
        assert_eq!(next_id(&queue).as_deref(), Some(ids[failed]));
    }
}

#[test]
fn test_running_then_completed_flow() {
    let mut queue = queue(&["op1", "op2"]);

    queue.mark_running("op1").unwrap();
    assert!(matches!(queue.next_operation(), NextOperation::Blocked(op) if op.status == OperationStatus::Running));

    queue.mark_completed("op1").unwrap();
    queue.mark_running("op2").unwrap();
    queue.mark_completed("op2").unwrap();

    assert_eq!(queue.completed_count(), 2);
    assert_eq!(queue.next_operation(), NextOperation::Complete);
    assert!(queue.state().validate().is_ok());
}
