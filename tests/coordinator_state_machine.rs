use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;

use sensorfan::{
    coordinator::{Admission, Coordinator, CoordinatorError, Effect},
    core::{
        ledger::{Ledger, OperationPhase},
        subtask::{SubTaskStatus, SubTaskUpdate},
    },
    error::{Outcome, StoreError},
    operation::{Operation, OperationResult},
    retry::policy::{RetryConfig, RetryPolicy},
    sensor::{GeoPoint, Reading, SensorSpec},
    types::{OperationId, Phase, StoreKind, Target},
};

fn coordinator() -> Coordinator {
    Coordinator::with_seed(
        Ledger::new(),
        RetryConfig::uniform(RetryPolicy::fixed(3, 10)),
        1,
    )
}

fn reading(temperature: Option<f64>, battery_level: f64) -> Reading {
    Reading {
        observed_at_ms: 1_700_000_000_000,
        temperature,
        humidity: Some(55.0),
        velocity: None,
        battery_level,
    }
}

fn spec() -> SensorSpec {
    SensorSpec {
        name: "gauge".to_string(),
        location: GeoPoint {
            latitude: 48.1,
            longitude: 11.6,
        },
        sensor_type: "thermo".to_string(),
        mac_address: "aa:bb:cc".to_string(),
        manufacturer: "acme".to_string(),
        model: "t1".to_string(),
        serial_number: "sn-1".to_string(),
        firmware_version: "2.0".to_string(),
        description: "roof".to_string(),
    }
}

fn pre_image() -> Outcome {
    Outcome::Succeeded(json!({ "previous": null }))
}

fn sensor_doc() -> Outcome {
    Outcome::Succeeded(json!({ "sensor_id": 42, "sensor_type": "thermo" }))
}

fn sensor_row() -> Outcome {
    Outcome::Succeeded(json!({ "sensor_id": 42, "name": "gauge" }))
}

fn start(c: &mut Coordinator, op: Operation, now: Instant) -> (OperationId, Vec<Effect>) {
    let id = match c.admit(op).expect("admit") {
        Admission::Opened(id) => id,
        other => panic!("expected a new entry, got {other:?}"),
    };
    let mut effects = Vec::new();
    c.start(&id, now, &mut effects).expect("start");
    (id, effects)
}

fn settle(
    c: &mut Coordinator,
    id: &OperationId,
    target: Target,
    phase: Phase,
    outcome: Outcome,
    now: Instant,
) -> Vec<Effect> {
    let mut effects = Vec::new();
    c.on_outcome(id, target, phase, outcome, now, &mut effects)
        .expect("outcome");
    effects
}

fn tick(c: &mut Coordinator, now: Instant) -> Vec<Effect> {
    let mut effects = Vec::new();
    c.on_tick(now, &mut effects).expect("tick");
    effects
}

fn dispatched(effects: &[Effect]) -> Vec<(Target, Phase, u32)> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Dispatch(req) => Some((req.target, req.phase, req.attempt)),
            Effect::Finished { .. } => None,
        })
        .collect()
}

fn finished(effects: &[Effect]) -> Option<OperationResult> {
    effects.iter().find_map(|e| match e {
        Effect::Finished { result, .. } => Some(result.clone()),
        Effect::Dispatch(_) => None,
    })
}

#[test]
fn all_success_commits_without_compensation() {
    let mut c = coordinator();
    let now = Instant::now();
    let (id, effects) = start(&mut c, Operation::record_reading(42, reading(None, 0.9)), now);

    assert_eq!(
        dispatched(&effects),
        vec![
            (Target::SensorLookup, Phase::Forward, 1),
            (Target::MetadataLookup, Phase::Forward, 1),
        ]
    );

    let effects = settle(&mut c, &id, Target::SensorLookup, Phase::Forward, sensor_row(), now);
    assert_eq!(
        dispatched(&effects),
        vec![
            (Target::LatestReading, Phase::Forward, 1),
            (Target::ReadingSeries, Phase::Forward, 1),
        ]
    );

    let effects = settle(&mut c, &id, Target::MetadataLookup, Phase::Forward, sensor_doc(), now);
    let Some(Effect::Dispatch(count)) = effects.first() else {
        panic!("type-count rollup should follow the lookup");
    };
    assert_eq!(count.target, Target::TypeCountRollup);
    assert_eq!(
        count.prerequisite(Target::MetadataLookup).and_then(|d| d.get("sensor_type")),
        Some(&json!("thermo"))
    );

    let mut all = Vec::new();
    for target in [Target::LatestReading, Target::ReadingSeries, Target::TypeCountRollup] {
        all.extend(settle(&mut c, &id, target, Phase::Forward, pre_image(), now));
    }

    match finished(&all) {
        Some(OperationResult::Committed(summary)) => {
            assert_eq!(summary.sensor_id, 42);
            assert_eq!(summary.applied.len(), 5);
            let view = summary.sensor.expect("sensor view");
            assert_eq!(view["name"], json!("gauge"));
            assert_eq!(view["sensor_type"], json!("thermo"));
            assert_eq!(view["reading"]["humidity"], json!(55.0));
        }
        other => panic!("expected commit, got {other:?}"),
    }
    assert!(dispatched(&all).iter().all(|(_, phase, _)| *phase == Phase::Forward));

    let entry = c.snapshot(&id).expect("snapshot");
    assert_eq!(entry.phase, OperationPhase::Committed);
    assert!(entry.subtasks.iter().all(|s| s.compensation.is_none()));
    assert!(!c.ledger().is_active(&id));
}

#[test]
fn permanent_failure_compensates_each_success_once() {
    let mut c = coordinator();
    let now = Instant::now();
    let (id, effects) = start(&mut c, Operation::record_reading(42, reading(Some(21.5), 0.15)), now);
    assert_eq!(dispatched(&effects).len(), 2);
    let effects = settle(&mut c, &id, Target::SensorLookup, Phase::Forward, sensor_row(), now);
    assert_eq!(dispatched(&effects).len(), 4);

    assert!(settle(&mut c, &id, Target::LatestReading, Phase::Forward, pre_image(), now).is_empty());
    let effects = settle(
        &mut c,
        &id,
        Target::ReadingSeries,
        Phase::Forward,
        Outcome::FailedPermanent(StoreError::rejected("bad reading")),
        now,
    );
    assert!(effects.is_empty(), "siblings still in flight: {effects:?}");

    let entry = c.snapshot(&id).expect("snapshot");
    assert_eq!(entry.phase, OperationPhase::Compensating);
    let count = entry.subtask(Target::TypeCountRollup).expect("count");
    assert_eq!(count.status, SubTaskStatus::FailedPermanent);
    assert_eq!(count.attempt_count, 0);

    assert!(settle(&mut c, &id, Target::TemperatureRollup, Phase::Forward, pre_image(), now).is_empty());
    assert!(settle(
        &mut c,
        &id,
        Target::LowBatteryRollup,
        Phase::Forward,
        Outcome::FailedRetryable(StoreError::transient("timeout")),
        now,
    )
    .is_empty());
    assert_eq!(c.scheduled_retries(), 0);

    let effects = settle(&mut c, &id, Target::MetadataLookup, Phase::Forward, sensor_doc(), now);
    assert_eq!(
        dispatched(&effects),
        vec![
            (Target::LatestReading, Phase::Compensate, 1),
            (Target::TemperatureRollup, Phase::Compensate, 1),
        ]
    );
    let Some(Effect::Dispatch(undo)) = effects.first() else {
        panic!("compensation dispatch expected");
    };
    assert_eq!(undo.forward_output, Some(json!({ "previous": null })));

    let mut tail = settle(&mut c, &id, Target::LatestReading, Phase::Compensate, Outcome::Succeeded(Value::Null), now);
    tail.extend(settle(&mut c, &id, Target::TemperatureRollup, Phase::Compensate, Outcome::Succeeded(Value::Null), now));

    match finished(&tail) {
        Some(OperationResult::RolledBack(report)) => {
            assert_eq!(
                report.compensated,
                vec![Target::LatestReading, Target::TemperatureRollup]
            );
            assert!(report.reason.contains("reading_series"), "{}", report.reason);
        }
        other => panic!("expected rollback, got {other:?}"),
    }
    let entry = c.snapshot(&id).expect("snapshot");
    let low = entry.subtask(Target::LowBatteryRollup).expect("low battery");
    assert!(matches!(low.last_error, Some(StoreError::Aborted { .. })));
    assert!(entry
        .subtasks
        .iter()
        .filter(|s| s.compensation.is_some())
        .all(|s| s.compensation.as_ref().is_some_and(|p| p.attempt_count == 1)));
}

#[test]
fn transient_failure_is_retried_after_backoff() {
    let mut c = coordinator();
    let now = Instant::now();
    let (id, _) = start(&mut c, Operation::delete_sensor(5), now);

    let effects = settle(
        &mut c,
        &id,
        Target::SensorRow,
        Phase::Forward,
        Outcome::FailedRetryable(StoreError::transient("timeout")),
        now,
    );
    assert!(effects.is_empty());
    assert_eq!(c.scheduled_retries(), 1);
    assert_eq!(c.next_retry_at(), Some(now + Duration::from_millis(10)));

    assert!(tick(&mut c, now + Duration::from_millis(5)).is_empty());
    let effects = tick(&mut c, now + Duration::from_millis(10));
    assert_eq!(dispatched(&effects), vec![(Target::SensorRow, Phase::Forward, 2)]);
}

#[test]
fn exhausted_subtask_fails_permanently_and_is_not_rescheduled() {
    let mut c = coordinator();
    let mut now = Instant::now();
    let (id, _) = start(&mut c, Operation::delete_sensor(5), now);

    let mut last = Vec::new();
    for attempt in 1..=3u32 {
        last = settle(
            &mut c,
            &id,
            Target::SensorRow,
            Phase::Forward,
            Outcome::FailedRetryable(StoreError::transient("timeout")),
            now,
        );
        if attempt < 3 {
            now += Duration::from_millis(10);
            assert_eq!(
                dispatched(&tick(&mut c, now)),
                vec![(Target::SensorRow, Phase::Forward, attempt + 1)]
            );
        }
    }

    assert_eq!(c.scheduled_retries(), 0);
    assert!(tick(&mut c, now + Duration::from_secs(10)).is_empty());
    assert!(matches!(finished(&last), Some(OperationResult::RolledBack(_))));

    let entry = c.snapshot(&id).expect("snapshot");
    let row = entry.subtask(Target::SensorRow).expect("row");
    assert_eq!(row.status, SubTaskStatus::FailedPermanent);
    assert_eq!(row.attempt_count, 3);
    assert!(matches!(
        row.last_error,
        Some(StoreError::Exhausted { attempts: 3, .. })
    ));
}

#[test]
fn not_found_aborts_dependents_without_dispatching_them() {
    let mut c = coordinator();
    let now = Instant::now();
    let (id, _) = start(&mut c, Operation::record_reading(404, reading(None, 0.9)), now);
    settle(&mut c, &id, Target::SensorLookup, Phase::Forward, sensor_row(), now);

    settle(
        &mut c,
        &id,
        Target::MetadataLookup,
        Phase::Forward,
        Outcome::FailedPermanent(StoreError::not_found("sensor_documents/404")),
        now,
    );
    let entry = c.snapshot(&id).expect("snapshot");
    let count = entry.subtask(Target::TypeCountRollup).expect("count");
    assert_eq!(count.status, SubTaskStatus::FailedPermanent);
    assert_eq!(count.attempt_count, 0);
    match &count.last_error {
        Some(StoreError::Aborted { message }) => assert!(message.contains("metadata_lookup")),
        other => panic!("expected abort, got {other:?}"),
    }

    // Independent siblings finish and are then undone.
    settle(&mut c, &id, Target::LatestReading, Phase::Forward, pre_image(), now);
    let effects = settle(&mut c, &id, Target::ReadingSeries, Phase::Forward, pre_image(), now);
    assert_eq!(
        dispatched(&effects),
        vec![
            (Target::LatestReading, Phase::Compensate, 1),
            (Target::ReadingSeries, Phase::Compensate, 1),
        ]
    );
}

#[test]
fn unknown_sensor_reading_touches_no_store() {
    let mut c = coordinator();
    let now = Instant::now();
    let (id, _) = start(&mut c, Operation::record_reading(5, reading(Some(19.0), 0.1)), now);

    let effects = settle(
        &mut c,
        &id,
        Target::SensorLookup,
        Phase::Forward,
        Outcome::FailedPermanent(StoreError::not_found("sensors/5")),
        now,
    );
    assert!(dispatched(&effects).is_empty(), "{effects:?}");

    // A stray document still answers; nothing was written, nothing to undo.
    let effects = settle(&mut c, &id, Target::MetadataLookup, Phase::Forward, sensor_doc(), now);
    assert!(dispatched(&effects).is_empty(), "{effects:?}");
    match finished(&effects) {
        Some(OperationResult::RolledBack(report)) => {
            assert!(report.compensated.is_empty());
            assert!(report.reason.contains("sensor_lookup"), "{}", report.reason);
        }
        other => panic!("expected rollback, got {other:?}"),
    }

    let entry = c.snapshot(&id).expect("snapshot");
    assert!(entry
        .subtasks
        .iter()
        .filter(|s| !s.target.is_read())
        .all(|s| s.attempt_count == 0 && s.status == SubTaskStatus::FailedPermanent));
}

#[test]
fn redelivered_insert_is_still_compensated() {
    let mut c = coordinator();
    let now = Instant::now();
    let (id, _) = start(&mut c, Operation::create_sensor(9, spec()), now);

    // The first attempt landed but its reply was lost; the retry hits its own row.
    settle(
        &mut c,
        &id,
        Target::SensorRow,
        Phase::Forward,
        Outcome::FailedRetryable(StoreError::transient("reply lost")),
        now,
    );
    let effects = tick(&mut c, now + Duration::from_millis(10));
    assert_eq!(dispatched(&effects), vec![(Target::SensorRow, Phase::Forward, 2)]);
    let collision = Outcome::from_result(Err(StoreError::ConstraintViolation {
        message: "sensors/9 already exists".to_string(),
        idempotent: true,
    }));
    assert_eq!(collision, pre_image());
    settle(&mut c, &id, Target::SensorRow, Phase::Forward, collision, now);

    let effects = settle(
        &mut c,
        &id,
        Target::SensorDocument,
        Phase::Forward,
        Outcome::FailedPermanent(StoreError::rejected("latitude out of range")),
        now,
    );
    assert_eq!(dispatched(&effects), vec![(Target::SensorRow, Phase::Compensate, 1)]);
    let Some(Effect::Dispatch(undo)) = effects.first() else {
        panic!("compensation dispatch expected");
    };
    assert_eq!(undo.forward_output, Some(json!({ "previous": null })));

    let effects = settle(&mut c, &id, Target::SensorRow, Phase::Compensate, Outcome::Succeeded(Value::Null), now);
    match finished(&effects) {
        Some(OperationResult::RolledBack(report)) => {
            assert_eq!(report.compensated, vec![Target::SensorRow]);
        }
        other => panic!("expected rollback, got {other:?}"),
    }
}

#[test]
fn non_finite_payload_is_refused_before_opening() {
    let mut c = coordinator();
    let mut bad_spec = spec();
    bad_spec.location.latitude = f64::NAN;
    let op = Operation::create_sensor(9, bad_spec).with_operation_id("nan-9");
    match c.admit(op.clone()) {
        Err(CoordinatorError::InvalidOperation { operation_id, reason }) => {
            assert_eq!(operation_id, OperationId::new("nan-9"));
            assert!(reason.contains("location"), "{reason}");
        }
        other => panic!("expected refusal, got {other:?}"),
    }
    // Redelivery is refused the same way instead of conflicting.
    assert!(matches!(
        c.admit(op),
        Err(CoordinatorError::InvalidOperation { .. })
    ));

    let gusty = Reading {
        velocity: Some(f64::INFINITY),
        ..reading(Some(20.0), 0.5)
    };
    assert!(matches!(
        c.admit(Operation::record_reading(9, gusty)),
        Err(CoordinatorError::InvalidOperation { .. })
    ));
    assert_eq!(c.ledger().active_len(), 0);
    assert!(c.drain_mutations().is_empty());

    // Out-of-range but finite coordinates are admitted; the document store decides.
    let mut far = spec();
    far.location.latitude = 123.0;
    assert!(matches!(
        c.admit(Operation::create_sensor(10, far)),
        Ok(Admission::Opened(_))
    ));
}

#[test]
fn compensation_exhaustion_abandons_with_reconciliation_entry() {
    let mut c = coordinator();
    let mut now = Instant::now();
    let (id, _) = start(&mut c, Operation::create_sensor(9, spec()), now);

    let effects = settle(&mut c, &id, Target::SensorRow, Phase::Forward, pre_image(), now);
    assert_eq!(dispatched(&effects), vec![(Target::SensorDocument, Phase::Forward, 1)]);
    let effects = settle(
        &mut c,
        &id,
        Target::SensorDocument,
        Phase::Forward,
        Outcome::FailedPermanent(StoreError::rejected("latitude out of range")),
        now,
    );
    assert_eq!(dispatched(&effects), vec![(Target::SensorRow, Phase::Compensate, 1)]);

    let mut last = Vec::new();
    for attempt in 1..=3u32 {
        last = settle(
            &mut c,
            &id,
            Target::SensorRow,
            Phase::Compensate,
            Outcome::FailedRetryable(StoreError::transient("connection reset")),
            now,
        );
        if attempt < 3 {
            now += Duration::from_millis(10);
            assert_eq!(
                dispatched(&tick(&mut c, now)),
                vec![(Target::SensorRow, Phase::Compensate, attempt + 1)]
            );
        }
    }

    match finished(&last) {
        Some(OperationResult::Abandoned(entry)) => {
            assert_eq!(entry.sensor_id, 9);
            assert_eq!(entry.stores_in_inconsistent_state, vec![StoreKind::Relational]);
            assert_eq!(entry.targets, vec![Target::SensorRow]);
            assert!(entry.reason.contains("sensor_document"), "{}", entry.reason);
        }
        other => panic!("expected abandonment, got {other:?}"),
    }
    assert_eq!(c.reconciliation_report().len(), 1);
    assert_eq!(c.scheduled_retries(), 0);
}

#[test]
fn permanent_compensation_failure_abandons_immediately() {
    let mut c = coordinator();
    let now = Instant::now();
    let (id, _) = start(&mut c, Operation::create_sensor(9, spec()), now);
    settle(&mut c, &id, Target::SensorRow, Phase::Forward, pre_image(), now);
    settle(
        &mut c,
        &id,
        Target::SensorDocument,
        Phase::Forward,
        Outcome::FailedPermanent(StoreError::rejected("bad")),
        now,
    );
    let effects = settle(
        &mut c,
        &id,
        Target::SensorRow,
        Phase::Compensate,
        Outcome::FailedPermanent(StoreError::rejected("row locked")),
        now,
    );
    assert!(matches!(finished(&effects), Some(OperationResult::Abandoned(_))));

    let entry = c.snapshot(&id).expect("snapshot");
    let progress = entry
        .subtask(Target::SensorRow)
        .and_then(|s| s.compensation.clone())
        .expect("progress");
    assert_eq!(progress.status, SubTaskStatus::FailedPermanent);
    assert!(matches!(
        progress.last_error,
        Some(StoreError::CompensationFailure { .. })
    ));
}

#[test]
fn resubmission_is_deduplicated_by_operation_id() {
    let mut c = coordinator();
    let now = Instant::now();
    let op = Operation::delete_sensor(77).with_operation_id("del-77");
    let (id, _) = start(&mut c, op.clone(), now);

    assert_eq!(c.admit(op.clone()).expect("attach"), Admission::Attached(id.clone()));
    let other = Operation::delete_sensor(78).with_operation_id("del-77");
    assert!(matches!(
        c.admit(other),
        Err(CoordinatorError::IdempotencyConflict(_))
    ));

    let mut effects = settle(&mut c, &id, Target::SensorRow, Phase::Forward, pre_image(), now);
    let followers: Vec<Target> = dispatched(&effects).into_iter().map(|(t, _, _)| t).collect();
    for target in followers {
        effects.extend(settle(&mut c, &id, target, Phase::Forward, pre_image(), now));
    }
    let result = finished(&effects).expect("finished");
    assert!(matches!(result, OperationResult::Committed(_)));

    assert_eq!(c.admit(op).expect("replay"), Admission::Finished(result));
    assert_eq!(c.ledger().archived_len(), 1);
    assert_eq!(c.ledger().active_len(), 0);
}

#[test]
fn cancel_rolls_back_applied_stores() {
    let mut c = coordinator();
    let now = Instant::now();
    let (id, _) = start(&mut c, Operation::record_reading(42, reading(None, 0.9)), now);
    settle(&mut c, &id, Target::SensorLookup, Phase::Forward, sensor_row(), now);
    settle(&mut c, &id, Target::LatestReading, Phase::Forward, pre_image(), now);

    let mut effects = Vec::new();
    c.cancel(&id, now, &mut effects).expect("cancel");
    assert!(effects.is_empty(), "lookup and series still in flight");
    assert_eq!(c.snapshot(&id).expect("snapshot").phase, OperationPhase::Compensating);

    let mut effects = Vec::new();
    assert!(matches!(
        c.cancel(&id, now, &mut effects),
        Err(CoordinatorError::NotCancellable {
            phase: OperationPhase::Compensating,
            ..
        })
    ));

    settle(&mut c, &id, Target::MetadataLookup, Phase::Forward, sensor_doc(), now);
    let effects = settle(&mut c, &id, Target::ReadingSeries, Phase::Forward, pre_image(), now);
    assert_eq!(
        dispatched(&effects),
        vec![
            (Target::LatestReading, Phase::Compensate, 1),
            (Target::ReadingSeries, Phase::Compensate, 1),
        ]
    );
    let mut tail = settle(&mut c, &id, Target::LatestReading, Phase::Compensate, Outcome::Succeeded(Value::Null), now);
    tail.extend(settle(&mut c, &id, Target::ReadingSeries, Phase::Compensate, Outcome::Succeeded(Value::Null), now));
    match finished(&tail) {
        Some(OperationResult::RolledBack(report)) => {
            assert!(report.reason.contains("cancelled"), "{}", report.reason);
        }
        other => panic!("expected rollback, got {other:?}"),
    }

    let mut effects = Vec::new();
    assert!(matches!(
        c.cancel(&OperationId::new("missing"), now, &mut effects),
        Err(CoordinatorError::UnknownOperation(_))
    ));
}

#[test]
fn late_outcome_for_finished_operation_is_ignored() {
    let mut c = coordinator();
    let now = Instant::now();
    let (id, _) = start(&mut c, Operation::delete_sensor(5), now);
    let mut effects = Vec::new();
    c.cancel(&id, now, &mut effects).expect("cancel");
    settle(
        &mut c,
        &id,
        Target::SensorRow,
        Phase::Forward,
        Outcome::FailedPermanent(StoreError::not_found("sensors/5")),
        now,
    );
    assert!(!c.ledger().is_active(&id));

    let effects = settle(&mut c, &id, Target::SensorRow, Phase::Forward, pre_image(), now);
    assert!(effects.is_empty());
}

#[test]
fn resume_redispatches_interrupted_and_open_entries() {
    let mut ledger = Ledger::new();
    let interrupted = Operation::delete_sensor(1).with_operation_id("interrupted");
    let fresh = Operation::delete_sensor(2).with_operation_id("fresh");
    let interrupted_id = interrupted.operation_id.clone();
    ledger.open(interrupted).expect("open");
    ledger
        .set_phase(&interrupted_id, OperationPhase::Dispatching)
        .expect("dispatching");
    ledger
        .record(&interrupted_id, Target::SensorRow, SubTaskUpdate::Dispatched)
        .expect("in flight");
    ledger.open(fresh).expect("open");

    let mut c = Coordinator::with_seed(ledger, RetryConfig::uniform(RetryPolicy::fixed(3, 10)), 3);
    let now = Instant::now();
    let mut effects = Vec::new();
    assert_eq!(c.resume(now, &mut effects).expect("resume"), 2);

    let dispatched_now: Vec<(String, Target, u32)> = effects
        .iter()
        .filter_map(|e| match e {
            Effect::Dispatch(req) => Some((req.operation_id().to_string(), req.target, req.attempt)),
            Effect::Finished { .. } => None,
        })
        .collect();
    assert_eq!(dispatched_now, vec![("fresh".to_string(), Target::SensorRow, 1)]);

    let row = c
        .snapshot(&interrupted_id)
        .expect("snapshot")
        .subtask(Target::SensorRow)
        .cloned()
        .expect("row");
    assert_eq!(row.status, SubTaskStatus::FailedRetryable);

    let effects = tick(&mut c, now + Duration::from_millis(10));
    assert_eq!(dispatched(&effects), vec![(Target::SensorRow, Phase::Forward, 2)]);
}
