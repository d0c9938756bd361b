use std::collections::{HashMap, VecDeque};

use proptest::prelude::*;
use serde_json::{json, Value};
use tokio::time::{Duration, Instant};

use sensorfan::{
    coordinator::{Admission, Coordinator, Effect},
    core::{ledger::Ledger, subtask::SubTaskStatus},
    error::{Outcome, StoreError},
    operation::{Operation, OperationResult},
    retry::policy::{RetryConfig, RetryPolicy},
    sensor::{GeoPoint, Reading, SensorSpec},
    types::{Phase, Target},
};

const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy)]
enum Reply {
    Ok,
    Transient,
    Rejected,
    Missing,
}

fn reply_strategy() -> impl Strategy<Value = Reply> {
    prop_oneof![
        6 => Just(Reply::Ok),
        3 => Just(Reply::Transient),
        1 => Just(Reply::Rejected),
        1 => Just(Reply::Missing),
    ]
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        Just(Operation::create_sensor(
            1,
            SensorSpec {
                name: "p".to_string(),
                location: GeoPoint {
                    latitude: 1.0,
                    longitude: 2.0,
                },
                sensor_type: "thermo".to_string(),
                mac_address: "m".to_string(),
                manufacturer: "a".to_string(),
                model: "t".to_string(),
                serial_number: "s".to_string(),
                firmware_version: "1".to_string(),
                description: "d".to_string(),
            },
        )),
        (proptest::option::of(-20.0f64..40.0), 0.0f64..1.0).prop_map(|(temperature, battery_level)| {
            Operation::record_reading(
                2,
                Reading {
                    observed_at_ms: 10,
                    temperature,
                    humidity: None,
                    velocity: None,
                    battery_level,
                },
            )
        }),
        Just(Operation::delete_sensor(3)),
    ]
}

fn outcome_for(reply: Reply, target: Target, phase: Phase) -> Outcome {
    match reply {
        Reply::Ok if phase == Phase::Forward && target.is_read() => {
            Outcome::Succeeded(json!({ "sensor_type": "thermo" }))
        }
        Reply::Ok if phase == Phase::Forward => Outcome::Succeeded(json!({ "previous": null })),
        Reply::Ok => Outcome::Succeeded(Value::Null),
        Reply::Transient => Outcome::FailedRetryable(StoreError::transient("flaky")),
        Reply::Rejected => Outcome::FailedPermanent(StoreError::rejected("no")),
        Reply::Missing => Outcome::FailedPermanent(StoreError::not_found("gone")),
    }
}

/// Runs one operation to completion, answering dispatches from `replies`
/// round-robin. Returns the result and how often each inverse succeeded.
fn drive(
    c: &mut Coordinator,
    op: Operation,
    replies: &[Reply],
) -> (OperationResult, HashMap<Target, usize>) {
    let mut now = Instant::now();
    let id = match c.admit(op).expect("admit") {
        Admission::Opened(id) => id,
        other => panic!("fresh id expected, got {other:?}"),
    };
    let mut queue: VecDeque<Effect> = VecDeque::new();
    let mut effects = Vec::new();
    c.start(&id, now, &mut effects).expect("start");
    queue.extend(effects);

    let mut undone: HashMap<Target, usize> = HashMap::new();
    let mut next_reply = 0usize;
    for _ in 0..10_000 {
        let Some(effect) = queue.pop_front() else {
            assert!(c.scheduled_retries() > 0, "stalled without retries");
            now += Duration::from_secs(60);
            let mut effects = Vec::new();
            c.on_tick(now, &mut effects).expect("tick");
            queue.extend(effects);
            continue;
        };
        match effect {
            Effect::Finished { result, .. } => {
                assert!(queue.is_empty(), "dispatches left after finish: {queue:?}");
                return (result, undone);
            }
            Effect::Dispatch(req) => {
                let reply = replies[next_reply % replies.len()];
                next_reply += 1;
                let outcome = outcome_for(reply, req.target, req.phase);
                if req.phase == Phase::Compensate && outcome.is_success() {
                    *undone.entry(req.target).or_default() += 1;
                }
                let mut effects = Vec::new();
                c.on_outcome(&id, req.target, req.phase, outcome, now, &mut effects)
                    .expect("outcome");
                queue.extend(effects);
            }
        }
    }
    panic!("operation did not finish");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn terminal_results_match_subtask_states(
        op in operation_strategy(),
        replies in proptest::collection::vec(reply_strategy(), 1..24),
        seed in any::<u64>(),
    ) {
        let mut c = Coordinator::with_seed(
            Ledger::new(),
            RetryConfig::uniform(RetryPolicy::exponential(MAX_ATTEMPTS, 10)),
            seed,
        );
        let id = op.operation_id.clone();
        let (result, undone) = drive(&mut c, op, &replies);
        let entry = c.snapshot(&id).expect("snapshot");

        prop_assert!(undone.values().all(|n| *n == 1), "{undone:?}");
        for s in &entry.subtasks {
            prop_assert!(s.attempt_count <= MAX_ATTEMPTS);
            prop_assert!(s.status.is_terminal());
            if let Some(progress) = &s.compensation {
                prop_assert!(progress.attempt_count <= MAX_ATTEMPTS);
                prop_assert!(s.needs_compensation());
            }
        }

        match &result {
            OperationResult::Committed(summary) => {
                prop_assert!(entry.all_succeeded());
                prop_assert_eq!(summary.applied.len(), entry.subtasks.len());
                prop_assert!(entry.subtasks.iter().all(|s| s.compensation.is_none()));
            }
            OperationResult::RolledBack(report) => {
                prop_assert!(!entry.all_succeeded());
                let expected: Vec<Target> = entry
                    .subtasks
                    .iter()
                    .filter(|s| s.needs_compensation())
                    .map(|s| s.target)
                    .collect();
                prop_assert_eq!(&report.compensated, &expected);
                for target in &expected {
                    prop_assert_eq!(undone.get(target), Some(&1));
                }
            }
            OperationResult::Abandoned(reconciliation) => {
                prop_assert!(!reconciliation.targets.is_empty());
                for target in &reconciliation.targets {
                    let status = entry
                        .subtask(*target)
                        .and_then(|s| s.compensation_status());
                    prop_assert_eq!(status, Some(SubTaskStatus::FailedPermanent));
                }
                prop_assert_eq!(c.reconciliation_report(), vec![reconciliation.clone()]);
            }
            OperationResult::Accepted(_) => prop_assert!(false, "accepted is never terminal"),
        }
        prop_assert_eq!(c.scheduled_retries(), 0);
    }

    #[test]
    fn journal_replay_matches_live_ledger(
        op in operation_strategy(),
        replies in proptest::collection::vec(reply_strategy(), 1..24),
    ) {
        let mut c = Coordinator::with_seed(
            Ledger::new(),
            RetryConfig::uniform(RetryPolicy::fixed(MAX_ATTEMPTS, 5)),
            7,
        );
        drive(&mut c, op, &replies);

        let mut replayed = Ledger::new();
        for stored in c.drain_mutations() {
            replayed.apply_replayed(stored).expect("replay");
        }
        prop_assert_eq!(replayed.export_snapshot(), c.ledger().export_snapshot());
    }
}
