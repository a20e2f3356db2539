//! The evaluation pipeline and batched deletion.
//!
//! One reconcile tick snapshots the policy's informer store, classifies every
//! object (selector match → conditions → TTL), then deletes the eligible set
//! in batches. Each delete attempt takes one token from the policy's rate
//! limiter, dry-run included. Batches never run items in parallel, so the
//! limiter cannot be bypassed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::{DateTime, Utc};
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, PropagationPolicy};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::crd::{GarbageCollectionPolicySpec, GcBehavior, GcPropagationPolicy};
use crate::ratelimit::PolicyRateLimiter;
use crate::selector;
use crate::ttl::TtlModel;

/* ============================= REASONS ============================= */

pub const REASON_TTL_EXPIRED: &str = "ttl_expired";
pub const REASON_CONDITION_NOT_MET: &str = "condition_not_met";
pub const REASON_NO_TTL: &str = "no_ttl";
pub const REASON_NOT_EXPIRED: &str = "not_expired";

/* ============================= EVALUATION ============================= */

/// One resource scheduled for deletion, with the reason it qualified.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletionCandidate {
    pub name: String,
    pub namespace: Option<String>,
    pub reason: &'static str,
}

impl DeletionCandidate {
    pub fn display_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}/{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Classification of one store snapshot.
#[derive(Debug, Default)]
pub struct EvaluationPlan {
    pub matched: u64,
    pub pending: u64,
    pub pending_reasons: HashMap<&'static str, u64>,
    pub to_delete: Vec<DeletionCandidate>,
    pub cancelled: bool,
}

/// Classify every object in the store snapshot against the policy.
///
/// Cancellation is polled every 100 objects; a cancelled pass returns the
/// partial classification accumulated so far.
pub fn plan_deletions(
    spec: &GarbageCollectionPolicySpec,
    objects: &[Arc<DynamicObject>],
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> EvaluationPlan {
    let ttl = TtlModel::from_spec(&spec.ttl);
    let mut plan = EvaluationPlan {
        to_delete: Vec::with_capacity((objects.len() / 10).max(10)),
        ..Default::default()
    };

    for (index, obj) in objects.iter().enumerate() {
        if index % 100 == 0 && cancel.is_cancelled() {
            plan.cancelled = true;
            return plan;
        }

        if !selector::matches_target(&spec.target_resource, obj) {
            continue;
        }
        plan.matched += 1;

        if !selector::meets_conditions(spec.conditions.as_ref(), obj) {
            pend(&mut plan, REASON_CONDITION_NOT_MET);
            continue;
        }

        let Some(ttl) = &ttl else {
            pend(&mut plan, REASON_NO_TTL);
            continue;
        };

        match ttl.expires_at(obj) {
            Ok(expires) if now > expires => plan.to_delete.push(DeletionCandidate {
                name: obj.metadata.name.clone().unwrap_or_default(),
                namespace: obj.metadata.namespace.clone(),
                reason: REASON_TTL_EXPIRED,
            }),
            Ok(_) => pend(&mut plan, REASON_NOT_EXPIRED),
            Err(err) => {
                debug!(
                    resource = %obj.metadata.name.as_deref().unwrap_or_default(),
                    error = %err,
                    "ttl_not_evaluable"
                );
                pend(&mut plan, REASON_NO_TTL);
            }
        }
    }

    plan
}

fn pend(plan: &mut EvaluationPlan, reason: &'static str) {
    plan.pending += 1;
    *plan.pending_reasons.entry(reason).or_insert(0) += 1;
}

/* ============================= RETRY ============================= */

const MAX_DELETE_ATTEMPTS: u32 = 5;

/// Result of one item's delete, after retries.
#[derive(Debug)]
pub enum ItemOutcome {
    Deleted,
    /// `NotFound` from the server: the resource is already gone.
    AlreadyGone,
    Failed(kube::Error),
    Cancelled,
}

fn delete_backoff() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(100))
        .with_randomization_factor(0.1)
        .with_multiplier(2.0)
        .with_max_interval(Duration::from_secs(30))
        .with_max_elapsed_time(None)
        .build()
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

/// Transient server failures worth retrying: timeouts, server timeouts,
/// too-many-requests, service-unavailable, and transport-level errors.
fn is_transient(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(response) => matches!(response.code, 429 | 500 | 503 | 504),
        kube::Error::HyperError(_) | kube::Error::Service(_) => true,
        _ => false,
    }
}

/// Drive one delete to completion under the retry policy: up to five
/// attempts, exponential backoff between transient failures, cancellation
/// observed during the backoff sleeps.
pub(crate) async fn delete_with_backoff<F, Fut>(
    mut attempt_delete: F,
    cancel: &CancellationToken,
) -> ItemOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), kube::Error>>,
{
    let mut backoff = delete_backoff();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match attempt_delete().await {
            Ok(()) => return ItemOutcome::Deleted,
            Err(err) if is_not_found(&err) => return ItemOutcome::AlreadyGone,
            Err(err) if is_transient(&err) && attempt < MAX_DELETE_ATTEMPTS => {
                let delay = backoff
                    .next_backoff()
                    .unwrap_or_else(|| Duration::from_secs(30));
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "delete_retry");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return ItemOutcome::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => return ItemOutcome::Failed(err),
        }
    }
}

/* ============================= BATCHES ============================= */

/// Aggregate result of the deletion phase.
#[derive(Debug, Default)]
pub struct DeletionOutcome {
    /// Successful deletions, dry-run and already-gone included.
    pub deleted: u64,
    /// Names of resources actually removed from the server, for events.
    pub deleted_resources: Vec<String>,
    /// Per-item failures, collected without aborting the batch.
    pub failures: Vec<String>,
    pub cancelled: bool,
}

/// Run the deletion list through batches of `batch_size`, taking one rate
/// limiter token per item. Generic over the delete call so the batch engine
/// is testable without a server.
pub(crate) async fn run_batches<F, Fut>(
    candidates: &[DeletionCandidate],
    batch_size: usize,
    dry_run: bool,
    limiter: &PolicyRateLimiter,
    cancel: &CancellationToken,
    mut delete_one: F,
) -> DeletionOutcome
where
    F: FnMut(DeletionCandidate) -> Fut,
    Fut: Future<Output = ItemOutcome>,
{
    let mut outcome = DeletionOutcome::default();

    for batch in candidates.chunks(batch_size.max(1)) {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            return outcome;
        }

        for candidate in batch {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    outcome.cancelled = true;
                    return outcome;
                }
                _ = limiter.acquire() => {}
            }

            if dry_run {
                info!(resource = %candidate.display_name(), reason = candidate.reason, "dry_run_delete");
                outcome.deleted += 1;
                continue;
            }

            match delete_one(candidate.clone()).await {
                ItemOutcome::Deleted => {
                    outcome.deleted += 1;
                    outcome.deleted_resources.push(candidate.display_name());
                }
                ItemOutcome::AlreadyGone => {
                    debug!(resource = %candidate.display_name(), "already_gone");
                    outcome.deleted += 1;
                }
                ItemOutcome::Failed(err) => {
                    warn!(resource = %candidate.display_name(), error = %err, "delete_failed");
                    outcome
                        .failures
                        .push(format!("{}: {err}", candidate.display_name()));
                }
                ItemOutcome::Cancelled => {
                    outcome.cancelled = true;
                    return outcome;
                }
            }
        }
    }

    outcome
}

/* ============================= EXECUTOR ============================= */

pub(crate) fn effective_batch_size(
    behavior: Option<&GcBehavior>,
    config: &ControllerConfig,
) -> usize {
    behavior
        .and_then(|b| b.batch_size)
        .filter(|size| *size > 0)
        .map(|size| size as usize)
        .unwrap_or(config.batch_size)
}

pub(crate) fn build_delete_params(behavior: Option<&GcBehavior>) -> DeleteParams {
    let propagation = match behavior.and_then(|b| b.propagation_policy.clone()) {
        Some(GcPropagationPolicy::Foreground) => PropagationPolicy::Foreground,
        Some(GcPropagationPolicy::Orphan) => PropagationPolicy::Orphan,
        Some(GcPropagationPolicy::Background) | None => PropagationPolicy::Background,
    };
    DeleteParams {
        grace_period_seconds: behavior.and_then(|b| b.grace_period_seconds),
        propagation_policy: Some(propagation),
        ..DeleteParams::default()
    }
}

/// Carries everything a deletion pass needs: the dynamic API coordinates,
/// the policy's limiter, and the resolved behavior knobs.
pub struct DeletionExecutor {
    client: Client,
    resource: ApiResource,
    limiter: Arc<PolicyRateLimiter>,
    batch_size: usize,
    dry_run: bool,
    delete_params: DeleteParams,
}

impl DeletionExecutor {
    pub fn new(
        client: Client,
        resource: ApiResource,
        limiter: Arc<PolicyRateLimiter>,
        behavior: Option<&GcBehavior>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            client,
            resource,
            limiter,
            batch_size: effective_batch_size(behavior, config),
            dry_run: behavior.and_then(|b| b.dry_run).unwrap_or(false),
            delete_params: build_delete_params(behavior),
        }
    }

    /// Delete the planned candidates, honoring rate, batching, dry-run, and
    /// cancellation. Partial progress is retained in the outcome.
    pub async fn execute(
        &self,
        candidates: &[DeletionCandidate],
        cancel: &CancellationToken,
    ) -> DeletionOutcome {
        if candidates.is_empty() {
            return DeletionOutcome::default();
        }

        run_batches(
            candidates,
            self.batch_size,
            self.dry_run,
            &self.limiter,
            cancel,
            |candidate| self.delete_one(candidate, cancel),
        )
        .await
    }

    async fn delete_one(
        &self,
        candidate: DeletionCandidate,
        cancel: &CancellationToken,
    ) -> ItemOutcome {
        let api: Api<DynamicObject> = match candidate.namespace.as_deref() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &self.resource),
            None => Api::all_with(self.client.clone(), &self.resource),
        };
        let params = self.delete_params.clone();
        let name = candidate.name.clone();

        delete_with_backoff(
            move || {
                let api = api.clone();
                let params = params.clone();
                let name = name.clone();
                async move { api.delete(&name, &params).await.map(|_| ()) }
            },
            cancel,
        )
        .await
    }
}

/* ============================= TESTS ============================= */
