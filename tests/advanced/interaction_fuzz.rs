#![cfg(feature = "advanced-tests")]
//! Property-based fuzzing of write queue interactions.
//!
//! Random sequences of enqueues, drains, completions, failures and
//! cancellations are replayed against a `WriteQueue`. Whatever the
//! sequence, callbacks must run once per record and in submission order.

use std::io;

use proptest::prelude::*;
use rstest::rstest;
use wireline::{
    CloseReason,
    connection::ConnectionId,
    write_queue::{FailurePolicy, WriteQueue, WriteQueueConfig, WriteRecord},
};
use wireline_testing::CompletionRecorder;

#[derive(Debug, Clone)]
enum Action {
    Enqueue(Vec<u8>),
    Drain,
    Complete,
    Fail,
    Cancel,
}

struct Replay {
    enqueued: Vec<String>,
    refused: usize,
    recorder: CompletionRecorder,
    queue: WriteQueue,
}

fn replay(policy: FailurePolicy, actions: &[Action]) -> Replay {
    let queue = WriteQueue::new(
        ConnectionId::new(99),
        WriteQueueConfig::default()
            .failure_policy(policy)
            .max_pending_bytes(Some(16)),
    );
    let recorder = CompletionRecorder::new();
    let mut in_flight: Vec<WriteRecord> = Vec::new();
    let mut enqueued = Vec::new();
    let mut refused = 0;

    for action in actions {
        match action {
            Action::Enqueue(payload) => {
                let tag = enqueued.len().to_string();
                match queue.enqueue(recorder.request(&tag, payload.clone())) {
                    Ok(_) => enqueued.push(tag),
                    Err(_) => refused += 1,
                }
            }
            Action::Drain => in_flight.extend(queue.drain_next()),
            Action::Complete | Action::Fail => {
                if in_flight.is_empty() {
                    continue;
                }
                let record = in_flight.remove(0);
                let result = if matches!(action, Action::Fail) {
                    Err(io::ErrorKind::ConnectionReset.into())
                } else {
                    Ok(record.len().unwrap_or(0))
                };
                queue.complete(&record, result).expect("oldest in-flight record");
            }
            Action::Cancel => {
                queue.cancel_all(CloseReason::Remote);
                in_flight.clear();
            }
        }
    }
    Replay {
        enqueued,
        refused,
        recorder,
        queue,
    }
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        4 => proptest::collection::vec(any::<u8>(), 0..8).prop_map(Action::Enqueue),
        3 => Just(Action::Drain),
        3 => Just(Action::Complete),
        1 => Just(Action::Fail),
        1 => Just(Action::Cancel),
    ]
}

fn policy_strategy() -> impl Strategy<Value = FailurePolicy> {
    prop_oneof![Just(FailurePolicy::CancelRemaining), Just(FailurePolicy::Isolate)]
}

proptest! {
    #[test]
    fn callbacks_run_once_in_submission_order(
        policy in policy_strategy(),
        actions in proptest::collection::vec(action_strategy(), 0..48),
    ) {
        let run = replay(policy, &actions);
        let settled = run.recorder.tags();
        prop_assert!(settled.len() <= run.enqueued.len());
        prop_assert_eq!(&run.enqueued[..settled.len()], settled.as_slice());

        let stats = run.queue.stats();
        let unsettled = run.enqueued.len() - settled.len();
        prop_assert_eq!(stats.queued + stats.in_flight, unsettled);
        if run.queue.is_closed() {
            prop_assert_eq!(unsettled, 0);
        } else {
            prop_assert_eq!(run.refused, 0);
        }

        run.queue.cancel_all(CloseReason::Shutdown);
        prop_assert_eq!(run.recorder.tags(), run.enqueued);
    }
}

#[rstest]
#[case::empty(Vec::new(), 0)]
#[case::drain_without_completion(vec![Action::Enqueue(vec![1]), Action::Drain], 0)]
#[case::fail_then_cancel_rest(
    vec![
        Action::Enqueue(vec![1]),
        Action::Enqueue(vec![2]),
        Action::Drain,
        Action::Fail,
    ],
    2
)]
#[case::closed_queue_refuses(vec![Action::Cancel, Action::Enqueue(vec![3])], 0)]
fn boundary_sequences(#[case] actions: Vec<Action>, #[case] settled: usize) {
    let run = replay(FailurePolicy::CancelRemaining, &actions);
    assert_eq!(run.recorder.tags().len(), settled);
    assert_eq!(run.recorder.tags(), run.enqueued[..settled]);
}
