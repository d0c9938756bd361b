use std::time::Duration;

use rand::{rngs::StdRng, SeedableRng};
use tokio::time::Instant;

use sensorfan::{
    retry::{
        policy::{RetryConfig, RetryPolicy},
        scheduler::{RetryKey, RetryScheduler},
    },
    types::{OperationId, Phase, StoreKind, Target},
};

fn key(id: &str, target: Target, phase: Phase) -> RetryKey {
    RetryKey {
        operation_id: OperationId::new(id),
        target,
        phase,
    }
}

#[test]
fn exponential_delays_double_and_cap() {
    let policy = RetryPolicy::new(10, 100, 1_000, 2.0, 0.0);
    let delays: Vec<u128> = (1..=6)
        .map(|n| policy.base_delay_after(n).as_millis())
        .collect();
    assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    assert_eq!(policy.base_delay_after(0), Duration::ZERO);
}

#[test]
fn jitter_stays_within_band() {
    let policy = RetryPolicy::new(10, 1_000, 60_000, 2.0, 0.25);
    let mut rng = StdRng::seed_from_u64(7);
    for attempt in 1..=5 {
        let base = policy.base_delay_after(attempt).as_secs_f64();
        for _ in 0..50 {
            let d = policy.delay_after(attempt, &mut rng).as_secs_f64();
            assert!(d >= base * 0.75 - 1e-9 && d <= base * 1.25 + 1e-9);
        }
    }
}

#[test]
fn attempt_budget_includes_first_attempt() {
    let policy = RetryPolicy::fixed(3, 10);
    assert!(policy.allows_another(1));
    assert!(policy.allows_another(2));
    assert!(!policy.allows_another(3));
}

#[test]
fn default_policies_favour_cache_over_relational() {
    let cfg = RetryConfig::default();
    let cache = cfg.policy_for(StoreKind::Cache);
    let relational = cfg.policy_for(StoreKind::Relational);
    assert!(cache.max_attempts > relational.max_attempts);
    assert!(cache.base_delay_ms < relational.base_delay_ms);
}

#[test]
fn per_kind_override_leaves_other_kinds_alone() {
    let cfg = RetryConfig::uniform(RetryPolicy::fixed(2, 50))
        .with_policy(StoreKind::Cache, RetryPolicy::fixed(9, 1));
    assert_eq!(cfg.policy_for(StoreKind::Cache).max_attempts, 9);
    assert_eq!(cfg.policy_for(StoreKind::SearchIndex).max_attempts, 2);
}

#[test]
fn drain_returns_due_keys_in_deadline_order() {
    let mut scheduler = RetryScheduler::new();
    let now = Instant::now();
    scheduler.schedule(key("a", Target::ReadingSeries, Phase::Forward), Duration::from_millis(30), now);
    scheduler.schedule(key("b", Target::LatestReading, Phase::Forward), Duration::from_millis(10), now);
    scheduler.schedule(key("c", Target::SensorRow, Phase::Compensate), Duration::from_millis(50), now);

    assert_eq!(scheduler.next_due(), Some(now + Duration::from_millis(10)));
    let due = scheduler.drain(now + Duration::from_millis(30));
    assert_eq!(
        due,
        vec![
            key("b", Target::LatestReading, Phase::Forward),
            key("a", Target::ReadingSeries, Phase::Forward),
        ]
    );
    assert_eq!(scheduler.len(), 1);
    assert!(scheduler.drain(now + Duration::from_millis(40)).is_empty());
}

#[test]
fn rescheduling_supersedes_earlier_deadline() {
    let mut scheduler = RetryScheduler::new();
    let now = Instant::now();
    let k = key("a", Target::ReadingSeries, Phase::Forward);
    scheduler.schedule(k.clone(), Duration::from_millis(5), now);
    scheduler.schedule(k.clone(), Duration::from_millis(50), now);

    assert!(scheduler.drain(now + Duration::from_millis(10)).is_empty());
    assert_eq!(scheduler.drain(now + Duration::from_millis(60)), vec![k]);
    assert!(scheduler.is_empty());
}

#[test]
fn cancelled_keys_are_dropped_silently() {
    let mut scheduler = RetryScheduler::new();
    let now = Instant::now();
    scheduler.schedule(key("a", Target::ReadingSeries, Phase::Forward), Duration::ZERO, now);
    scheduler.schedule(key("a", Target::LatestReading, Phase::Forward), Duration::ZERO, now);
    scheduler.schedule(key("a", Target::SensorRow, Phase::Compensate), Duration::ZERO, now);
    scheduler.schedule(key("b", Target::ReadingSeries, Phase::Forward), Duration::ZERO, now);

    assert_eq!(scheduler.cancel_operation(&OperationId::new("a"), Phase::Forward), 2);
    assert!(!scheduler.is_scheduled(&key("a", Target::ReadingSeries, Phase::Forward)));

    let mut due = scheduler.drain(now);
    due.sort_by(|x, y| x.operation_id.cmp(&y.operation_id));
    assert_eq!(
        due,
        vec![
            key("a", Target::SensorRow, Phase::Compensate),
            key("b", Target::ReadingSeries, Phase::Forward),
        ]
    );
    assert_eq!(scheduler.next_due(), None);
}
