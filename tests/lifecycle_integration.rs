use std::time::Duration;

use chrono::Utc;

use kube_sweep::crd::{PolicyPhase, TargetResource};
use kube_sweep::ratelimit::RateLimiterPool;
use kube_sweep::reconciler::target_drifted;
use kube_sweep::status::{EvaluationCounts, merge_status, next_phase};

// ══════════════════════════════════════════════════════════════════
// Policy lifecycle integration tests (no cluster required)
//
// Drift detection, the phase state machine over consecutive
// evaluations, and the per-uid registry invariants.
// ══════════════════════════════════════════════════════════════════

fn target(kind: &str, namespace: Option<&str>) -> TargetResource {
    TargetResource {
        api_version: "v1".to_string(),
        kind: kind.to_string(),
        namespace: namespace.map(str::to_string),
        ..Default::default()
    }
}

// ── Spec drift ──

#[test]
fn test_kind_change_requires_informer_rebuild() {
    let before = target("ConfigMap", None);
    let after = target("Secret", None);
    assert!(target_drifted(&before, &after));
}

#[test]
fn test_ttl_or_behavior_edits_keep_informer() {
    let before = target("ConfigMap", Some("prod"));
    let after = before.clone();
    // only TTL/conditions/behavior change on the policy; the target is equal
    assert!(!target_drifted(&before, &after));
}

// ── Phase state machine over consecutive evaluations ──

/// Walk the phase machine the way consecutive reconciles do: a success
/// increments the streak, a failure resets it.
fn walk(results: &[bool], recovery_threshold: u32) -> Vec<PolicyPhase> {
    let mut phase = PolicyPhase::Active;
    let mut streak = 0u32;
    results
        .iter()
        .map(|&success| {
            if success {
                streak += 1;
            } else {
                streak = 0;
            }
            phase = next_phase(false, Some(phase), !success, streak, recovery_threshold);
            phase
        })
        .collect()
}

#[test]
fn test_single_success_clears_error_by_default() {
    assert_eq!(
        walk(&[false, true], 1),
        vec![PolicyPhase::Error, PolicyPhase::Active]
    );
}

#[test]
fn test_error_holds_until_threshold_met() {
    assert_eq!(
        walk(&[false, true, true, true], 3),
        vec![
            PolicyPhase::Error,
            PolicyPhase::Error,
            PolicyPhase::Error,
            PolicyPhase::Active
        ]
    );
}

#[test]
fn test_interleaved_failure_restarts_recovery() {
    assert_eq!(
        walk(&[false, true, false, true, true], 2),
        vec![
            PolicyPhase::Error,
            PolicyPhase::Error,
            PolicyPhase::Error,
            PolicyPhase::Error,
            PolicyPhase::Active
        ]
    );
}

#[test]
fn test_pause_and_unpause_round_trip() {
    // paused wins regardless of history
    assert_eq!(
        next_phase(true, Some(PolicyPhase::Active), false, 3, 1),
        PolicyPhase::Paused
    );
    // unpausing an otherwise healthy policy goes straight back to Active
    assert_eq!(
        next_phase(false, Some(PolicyPhase::Paused), false, 4, 1),
        PolicyPhase::Active
    );
}

// ── Status merge across runs ──

#[test]
fn test_status_reflects_two_consecutive_runs() {
    let interval = Duration::from_secs(60);
    let first_now = Utc::now();

    let first = merge_status(
        None,
        Some(EvaluationCounts {
            matched: 5,
            deleted: 2,
            pending: 3,
        }),
        PolicyPhase::Active,
        None,
        first_now,
        interval,
    );

    let second_now = first_now + chrono::Duration::seconds(60);
    let second = merge_status(
        Some(&first),
        Some(EvaluationCounts {
            matched: 3,
            deleted: 0,
            pending: 3,
        }),
        PolicyPhase::Active,
        None,
        second_now,
        interval,
    );

    assert_eq!(second.resources_matched, Some(3));
    assert_eq!(second.resources_deleted, Some(0));
    assert!(second.last_gc_run > first.last_gc_run);
    assert!(second.next_gc_run > first.next_gc_run);

    // Ready stayed True across both runs, so its transition time is stable
    let first_ready = &first.conditions.as_ref().unwrap()[0];
    let second_ready = &second.conditions.as_ref().unwrap()[0];
    assert_eq!(
        first_ready.last_transition_time,
        second_ready.last_transition_time
    );
}

#[test]
fn test_paused_status_update_keeps_counts() {
    let interval = Duration::from_secs(60);
    let active = merge_status(
        None,
        Some(EvaluationCounts {
            matched: 9,
            deleted: 1,
            pending: 8,
        }),
        PolicyPhase::Active,
        None,
        Utc::now(),
        interval,
    );

    let paused = merge_status(
        Some(&active),
        None,
        PolicyPhase::Paused,
        Some("policy is paused"),
        Utc::now(),
        interval,
    );

    assert_eq!(paused.resources_matched, Some(9));
    assert_eq!(paused.resources_pending, Some(8));
    assert_eq!(paused.phase, Some(PolicyPhase::Paused));
    let ready = &paused.conditions.as_ref().unwrap()[0];
    assert_eq!(ready.status, "False");
    assert_eq!(ready.reason.as_deref(), Some("PolicyPaused"));
}

// ── Registry invariants ──

#[test]
fn test_one_rate_limiter_entry_per_uid() {
    let pool = RateLimiterPool::new();

    for _ in 0..5 {
        pool.get_or_create("uid-1", 10);
    }
    assert_eq!(pool.len(), 1);

    pool.get_or_create("uid-2", 10);
    assert_eq!(pool.len(), 2);
}

#[test]
fn test_cleanup_leaves_no_entry_behind() {
    let pool = RateLimiterPool::new();
    pool.get_or_create("uid-1", 10);
    pool.get_or_create("uid-2", 10);

    assert!(pool.cleanup("uid-1"));
    assert_eq!(pool.len(), 1);

    // a second observation of the deletion is a no-op
    assert!(!pool.cleanup("uid-1"));
    assert_eq!(pool.len(), 1);
}

#[test]
fn test_pause_preserves_rate_limiter_entry() {
    let pool = RateLimiterPool::new();
    let before = pool.get_or_create("uid-1", 10);

    // pausing performs no pool operations; unpausing reuses the entry
    let after = pool.get_or_create("uid-1", 10);
    assert!(std::sync::Arc::ptr_eq(&before, &after));
    assert_eq!(pool.len(), 1);
}
