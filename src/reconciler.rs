//! Per-policy reconciliation.
//!
//! The controller runtime guarantees single-flight per policy key; distinct
//! policies reconcile concurrently. One reconcile runs strictly in order:
//! lifecycle bookkeeping → informer acquisition → evaluation → deletion →
//! status/events, then returns the policy's requeue interval. Evaluation
//! failures never bubble out of a reconcile; they are logged, accounted, and
//! retried on a short backoff so the controller stays self-healing.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::crd::{GarbageCollectionPolicy, PolicyPhase, TargetResource};
use crate::error::{Error, Result};
use crate::executor::{self, DeletionExecutor};
use crate::gvr::GvrResolver;
use crate::informers::InformerRegistry;
use crate::metrics;
use crate::ratelimit::RateLimiterPool;
use crate::status::{self, EvaluationCounts, StatusReporter};

pub const FINALIZER: &str = "sweep.dev/cleanup";

/// Requeue applied when the informer cannot be built; the condition is
/// transient (discovery hiccup, cache sync timeout) and clears on its own.
const INFORMER_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/* ============================= CONTEXT ============================= */

#[derive(Debug, Default, Clone, Copy)]
struct PolicyTrack {
    phase: PolicyPhase,
    success_streak: u32,
}

enum TargetChange {
    FirstSeen,
    Unchanged,
    /// Carries the previous shape so its gauge labels can be retired.
    Drifted(TargetResource),
}

/// Shared state of the running controller. One instance lives for the whole
/// process and is handed to every reconcile.
pub struct Context {
    pub client: Client,
    pub config: ControllerConfig,
    pub resolver: GvrResolver,
    pub informers: InformerRegistry,
    pub rate_limiters: RateLimiterPool,
    pub reporter: StatusReporter,
    /// Cancelled on shutdown; observed by evaluation and deletion loops so
    /// partial progress is reported before the controller stops.
    pub shutdown: CancellationToken,
    snapshots: RwLock<HashMap<String, TargetResource>>,
    tracks: RwLock<HashMap<String, PolicyTrack>>,
}

impl Context {
    pub fn new(client: Client, config: ControllerConfig, shutdown: CancellationToken) -> Self {
        let reporter = StatusReporter::new(client.clone());
        Self {
            client,
            config,
            resolver: GvrResolver::new(),
            informers: InformerRegistry::new(),
            rate_limiters: RateLimiterPool::new(),
            reporter,
            shutdown,
            snapshots: RwLock::new(HashMap::new()),
            tracks: RwLock::new(HashMap::new()),
        }
    }

    /// Compare the policy's target against the last-seen shape and store a
    /// deep copy of the current one.
    fn observe_target(&self, uid: &str, target: &TargetResource) -> TargetChange {
        let mut snapshots = self.snapshots.write().expect("snapshot lock");
        let change = match snapshots.get(uid) {
            None => TargetChange::FirstSeen,
            Some(previous) if target_drifted(previous, target) => {
                TargetChange::Drifted(previous.clone())
            }
            Some(_) => TargetChange::Unchanged,
        };
        snapshots.insert(uid.to_string(), target.clone());
        change
    }

    /// Fold one evaluation outcome into the policy's phase history and
    /// return the phase to report.
    fn record_result(&self, uid: &str, paused: bool, failed: bool) -> PolicyPhase {
        let mut tracks = self.tracks.write().expect("track lock");
        let track = tracks.entry(uid.to_string()).or_default();

        if paused {
            track.phase = PolicyPhase::Paused;
            return track.phase;
        }

        if failed {
            track.success_streak = 0;
        } else {
            track.success_streak = track.success_streak.saturating_add(1);
        }

        let next = status::next_phase(
            false,
            Some(track.phase),
            failed,
            track.success_streak,
            self.config.error_recovery_successes,
        );
        track.phase = next;
        next
    }

    /// Recompute the per-phase policy gauge from everything we track.
    fn refresh_phase_gauge(&self) {
        let tracks = self.tracks.read().expect("track lock");
        let mut counts: HashMap<PolicyPhase, i64> = HashMap::new();
        for track in tracks.values() {
            *counts.entry(track.phase).or_insert(0) += 1;
        }
        for phase in [PolicyPhase::Active, PolicyPhase::Paused, PolicyPhase::Error] {
            metrics::POLICIES_TOTAL
                .with_label_values(&[phase.as_str()])
                .set(counts.get(&phase).copied().unwrap_or(0));
        }
    }

    /// Drop all bookkeeping for a deleted policy.
    fn forget(&self, uid: &str, policy_key: &str) {
        let snapshot = self
            .snapshots
            .write()
            .expect("snapshot lock")
            .remove(uid);
        if let Some(target) = snapshot {
            let _ = metrics::RESOURCES_PENDING
                .remove_label_values(&[policy_key, &gvk_label(&target)]);
        }
        self.tracks.write().expect("track lock").remove(uid);
        self.refresh_phase_gauge();
    }
}

/// Shapes requiring an informer rebuild: the watch coordinates or the
/// server-side filter changed. TTL, condition, and behavior edits do not
/// invalidate the cache.
pub fn target_drifted(previous: &TargetResource, current: &TargetResource) -> bool {
    previous.api_group != current.api_group
        || previous.api_version != current.api_version
        || previous.kind != current.kind
        || previous.namespace != current.namespace
        || previous.label_selector != current.label_selector
}

/// The policy's requeue interval: its own `evaluationInterval` when parseable
/// and non-zero, the controller default otherwise.
pub fn evaluation_interval(policy: &GarbageCollectionPolicy, config: &ControllerConfig) -> Duration {
    match policy.spec.evaluation_interval.as_deref() {
        Some(raw) if !raw.is_empty() => match humantime::parse_duration(raw) {
            Ok(interval) if !interval.is_zero() => interval,
            Ok(_) => config.gc_interval,
            Err(err) => {
                warn!(policy = %policy.name_any(), interval = raw, error = %err, "invalid_evaluation_interval");
                config.gc_interval
            }
        },
        _ => config.gc_interval,
    }
}

fn gvk_label(target: &TargetResource) -> String {
    match target.api_group.as_deref() {
        Some(group) if !group.is_empty() => {
            format!("{group}/{}/{}", target.api_version, target.kind)
        }
        _ => format!("{}/{}", target.api_version, target.kind),
    }
}

/* ============================= RECONCILE ============================= */

struct Evaluation {
    counts: EvaluationCounts,
    deleted_resources: Vec<String>,
    failures: Vec<String>,
}

pub async fn reconcile(
    policy: Arc<GarbageCollectionPolicy>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let name = policy.name_any();
    let namespace = policy.namespace().unwrap_or_default();
    let policy_key = format!("{namespace}/{name}");
    let Some(uid) = policy.uid() else {
        // modelled defensively; the server always assigns a uid
        warn!(policy = %policy_key, "policy_without_uid_skipped");
        return Ok(Action::requeue(ctx.config.gc_interval));
    };
    let requeue_after = evaluation_interval(&policy, &ctx.config);

    if policy.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&policy, &uid, &policy_key, &ctx).await;
    }

    if !has_finalizer(&policy) {
        add_finalizer(&policy, &ctx.client).await?;
    }

    match ctx.observe_target(&uid, &policy.spec.target_resource) {
        TargetChange::FirstSeen => {
            info!(policy = %policy_key, uid = %uid, "policy_tracked");
            ctx.reporter
                .emit(&policy, status::EVENT_POLICY_CREATED, "policy tracked".to_string())
                .await;
        }
        TargetChange::Drifted(previous) => {
            info!(policy = %policy_key, "target_drifted_rebuilding_informer");
            ctx.informers.cleanup(&uid).await;
            ctx.rate_limiters.cleanup(&uid);
            let _ = metrics::RESOURCES_PENDING
                .remove_label_values(&[&policy_key, &gvk_label(&previous)]);
            ctx.reporter
                .emit(
                    &policy,
                    status::EVENT_POLICY_UPDATED,
                    "target resource changed; informer rebuilt".to_string(),
                )
                .await;
        }
        TargetChange::Unchanged => {}
    }

    if policy.spec.paused.unwrap_or(false) {
        let phase = ctx.record_result(&uid, true, false);
        debug!(policy = %policy_key, "policy_paused");
        if let Err(err) = ctx
            .reporter
            .publish(&policy, None, phase, Some("policy is paused"), requeue_after)
            .await
        {
            metrics::ERRORS_TOTAL
                .with_label_values(&[err.metric_label()])
                .inc();
            warn!(policy = %policy_key, error = %err, "status_update_failed");
        }
        ctx.refresh_phase_gauge();
        return Ok(Action::requeue(requeue_after));
    }

    match evaluate(&policy, &uid, &policy_key, &ctx).await {
        Ok(evaluation) => {
            let failed = !evaluation.failures.is_empty();
            let phase = ctx.record_result(&uid, false, failed);
            let message = failed.then(|| {
                format!(
                    "{} of {} deletions failed",
                    evaluation.failures.len(),
                    evaluation.failures.len() as u64 + evaluation.counts.deleted
                )
            });

            if let Err(err) = ctx
                .reporter
                .publish(
                    &policy,
                    Some(evaluation.counts),
                    phase,
                    message.as_deref(),
                    requeue_after,
                )
                .await
            {
                metrics::ERRORS_TOTAL
                    .with_label_values(&[err.metric_label()])
                    .inc();
                warn!(policy = %policy_key, error = %err, "status_update_failed");
                ctx.reporter
                    .emit_warning(&policy, status::EVENT_STATUS_UPDATE_FAILED, err.to_string())
                    .await;
            }

            for resource in &evaluation.deleted_resources {
                ctx.reporter
                    .emit(
                        &policy,
                        status::EVENT_RESOURCE_DELETED,
                        format!("deleted {resource} ({})", executor::REASON_TTL_EXPIRED),
                    )
                    .await;
            }
            ctx.reporter
                .emit(
                    &policy,
                    status::EVENT_POLICY_EVALUATED,
                    format!(
                        "matched={} deleted={} pending={}",
                        evaluation.counts.matched,
                        evaluation.counts.deleted,
                        evaluation.counts.pending
                    ),
                )
                .await;
            if failed {
                ctx.reporter
                    .emit_warning(
                        &policy,
                        status::EVENT_EVALUATION_FAILED,
                        evaluation.failures.join("; "),
                    )
                    .await;
            }

            ctx.refresh_phase_gauge();
            info!(
                policy = %policy_key,
                matched = evaluation.counts.matched,
                deleted = evaluation.counts.deleted,
                pending = evaluation.counts.pending,
                phase = phase.as_str(),
                "reconcile_complete"
            );
            Ok(Action::requeue(requeue_after))
        }
        Err(err) => {
            metrics::ERRORS_TOTAL
                .with_label_values(&[err.metric_label()])
                .inc();
            warn!(policy = %policy_key, error = %err, "evaluation_failed");

            let phase = ctx.record_result(&uid, false, true);
            if let Err(status_err) = ctx
                .reporter
                .publish(&policy, None, phase, Some(&err.to_string()), requeue_after)
                .await
            {
                warn!(policy = %policy_key, error = %status_err, "status_update_failed");
            }
            ctx.reporter
                .emit_warning(&policy, status::EVENT_EVALUATION_FAILED, err.to_string())
                .await;
            ctx.refresh_phase_gauge();
            Ok(Action::requeue(INFORMER_RETRY_BACKOFF))
        }
    }
}

/// One evaluation pass: synced store → classification → batched deletion.
async fn evaluate(
    policy: &GarbageCollectionPolicy,
    uid: &str,
    policy_key: &str,
    ctx: &Context,
) -> Result<Evaluation> {
    let (store, resource) = ctx
        .informers
        .get_or_create(
            &ctx.client,
            uid,
            &policy.spec.target_resource,
            &ctx.resolver,
            &ctx.config,
        )
        .await?;

    let behavior = policy.spec.behavior.as_ref();
    let rate = behavior
        .and_then(|b| b.max_deletions_per_second)
        .filter(|rate| *rate > 0)
        .unwrap_or(ctx.config.max_deletions_per_second);
    let limiter = ctx.rate_limiters.get_or_create(uid, rate);

    let evaluation_timer = metrics::EVALUATION_DURATION
        .with_label_values(&[policy_key])
        .start_timer();

    let objects = store.state();
    let plan = executor::plan_deletions(&policy.spec, &objects, Utc::now(), &ctx.shutdown);

    metrics::RESOURCES_MATCHED_TOTAL.inc_by(plan.matched);
    let gvk = gvk_label(&policy.spec.target_resource);
    metrics::RESOURCES_PENDING
        .with_label_values(&[policy_key, &gvk])
        .set(plan.pending as i64);

    let deletion = if plan.to_delete.is_empty() {
        Default::default()
    } else {
        let executor = DeletionExecutor::new(
            ctx.client.clone(),
            resource,
            limiter,
            behavior,
            &ctx.config,
        );
        let deletion_timer = metrics::DELETION_DURATION
            .with_label_values(&[policy_key, &gvk])
            .start_timer();
        let outcome = executor.execute(&plan.to_delete, &ctx.shutdown).await;
        deletion_timer.observe_duration();
        outcome
    };

    evaluation_timer.observe_duration();

    metrics::RESOURCES_DELETED_TOTAL
        .with_label_values(&[executor::REASON_TTL_EXPIRED])
        .inc_by(deletion.deleted);
    if !deletion.failures.is_empty() {
        metrics::ERRORS_TOTAL
            .with_label_values(&["deletion_failed"])
            .inc_by(deletion.failures.len() as u64);
    }

    Ok(Evaluation {
        counts: EvaluationCounts {
            matched: plan.matched,
            deleted: deletion.deleted,
            pending: plan.pending,
        },
        deleted_resources: deletion.deleted_resources,
        failures: deletion.failures,
    })
}

/* ============================= LIFECYCLE ============================= */

async fn handle_deletion(
    policy: &GarbageCollectionPolicy,
    uid: &str,
    policy_key: &str,
    ctx: &Context,
) -> Result<Action> {
    info!(policy = %policy_key, uid = %uid, "policy_deleted_tearing_down");

    // both registry entries go before the finalizer does, so no later
    // reconcile of this key can observe them
    ctx.informers.cleanup(uid).await;
    ctx.rate_limiters.cleanup(uid);
    ctx.forget(uid, policy_key);

    ctx.reporter
        .emit(policy, status::EVENT_POLICY_DELETED, "policy removed; informer and rate limiter released".to_string())
        .await;

    if has_finalizer(policy) {
        remove_finalizer(policy, &ctx.client).await?;
    }

    Ok(Action::await_change())
}

pub fn error_policy(
    policy: Arc<GarbageCollectionPolicy>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    metrics::ERRORS_TOTAL
        .with_label_values(&[error.metric_label()])
        .inc();
    warn!(policy = %policy.name_any(), error = %error, "reconcile_error");
    Action::requeue(Duration::from_secs(30))
}

/* ============================= FINALIZER ============================= */

fn has_finalizer(policy: &GarbageCollectionPolicy) -> bool {
    policy
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|finalizers| finalizers.iter().any(|f| f == FINALIZER))
}

async fn add_finalizer(policy: &GarbageCollectionPolicy, client: &Client) -> Result<()> {
    let name = policy.name_any();
    let namespace = policy.namespace().unwrap_or_default();
    let api: Api<GarbageCollectionPolicy> = Api::namespaced(client.clone(), &namespace);

    let mut finalizers = policy.metadata.finalizers.clone().unwrap_or_default();
    finalizers.push(FINALIZER.to_string());
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });

    api.patch(
        &name,
        &PatchParams::apply("kube-sweep"),
        &Patch::Merge(&patch),
    )
    .await?;

    debug!(policy = %name, "finalizer_added");
    Ok(())
}

async fn remove_finalizer(policy: &GarbageCollectionPolicy, client: &Client) -> Result<()> {
    let name = policy.name_any();
    let namespace = policy.namespace().unwrap_or_default();
    let api: Api<GarbageCollectionPolicy> = Api::namespaced(client.clone(), &namespace);

    let finalizers: Vec<String> = policy
        .metadata
        .finalizers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f != FINALIZER)
        .collect();
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });

    api.patch(
        &name,
        &PatchParams::apply("kube-sweep"),
        &Patch::Merge(&patch),
    )
    .await?;

    debug!(policy = %name, "finalizer_removed");
    Ok(())
}

/* ============================= TESTS ============================= */
