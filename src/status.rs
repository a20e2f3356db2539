//! Status reporting and event emission.
//!
//! After every evaluation the reporter merge-patches the policy's status
//! subresource under a bounded timeout and emits the evaluation events. A
//! timed-out or cancelled status write is logged and skipped; the next
//! evaluation overwrites it anyway.

use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, warn};

use crate::crd::{
    GarbageCollectionPolicy, GarbageCollectionPolicyStatus, PolicyCondition, PolicyPhase,
};
use crate::error::{Error, Result};

/* ============================= VOCABULARY ============================= */

pub const EVENT_POLICY_EVALUATED: &str = "PolicyEvaluated";
pub const EVENT_RESOURCE_DELETED: &str = "ResourceDeleted";
pub const EVENT_EVALUATION_FAILED: &str = "EvaluationFailed";
pub const EVENT_STATUS_UPDATE_FAILED: &str = "StatusUpdateFailed";
pub const EVENT_POLICY_CREATED: &str = "PolicyCreated";
pub const EVENT_POLICY_UPDATED: &str = "PolicyUpdated";
pub const EVENT_POLICY_DELETED: &str = "PolicyDeleted";

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_ERROR: &str = "Error";
pub const REASON_POLICY_PAUSED: &str = "PolicyPaused";
pub const REASON_POLICY_ERROR: &str = "PolicyError";
pub const REASON_EVALUATION_SUCCEEDED: &str = "EvaluationSucceeded";

const STATUS_UPDATE_TIMEOUT: Duration = Duration::from_secs(10);
const CONTROLLER_NAME: &str = "kube-sweep";

/* ============================= PHASE MACHINE ============================= */

/// Counters from one evaluation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvaluationCounts {
    pub matched: u64,
    pub deleted: u64,
    pub pending: u64,
}

/// Compute the next phase.
///
/// `Error` is sticky: once entered it holds until `success_streak` reaches
/// `recovery_threshold` consecutive fully-successful evaluations (threshold 1
/// means a single success clears it).
pub fn next_phase(
    paused: bool,
    current: Option<PolicyPhase>,
    evaluation_failed: bool,
    success_streak: u32,
    recovery_threshold: u32,
) -> PolicyPhase {
    if paused {
        return PolicyPhase::Paused;
    }
    if evaluation_failed {
        return PolicyPhase::Error;
    }
    if current == Some(PolicyPhase::Error) && success_streak < recovery_threshold {
        return PolicyPhase::Error;
    }
    PolicyPhase::Active
}

/// Build the `Ready` (and, in error phases, `Error`) conditions, preserving
/// `lastTransitionTime` when a condition's status did not flip.
pub fn build_conditions(
    phase: PolicyPhase,
    message: Option<&str>,
    now: DateTime<Utc>,
    existing: &[PolicyCondition],
) -> Vec<PolicyCondition> {
    let (ready_status, ready_reason) = match phase {
        PolicyPhase::Active => ("True", REASON_EVALUATION_SUCCEEDED),
        PolicyPhase::Paused => ("False", REASON_POLICY_PAUSED),
        PolicyPhase::Error => ("False", REASON_POLICY_ERROR),
    };

    let transition_time = |type_: &str, status: &str| -> String {
        existing
            .iter()
            .find(|c| c.type_ == type_ && c.status == status)
            .and_then(|c| c.last_transition_time.clone())
            .unwrap_or_else(|| now.to_rfc3339())
    };

    let mut conditions = vec![PolicyCondition {
        type_: CONDITION_READY.to_string(),
        status: ready_status.to_string(),
        last_transition_time: Some(transition_time(CONDITION_READY, ready_status)),
        reason: Some(ready_reason.to_string()),
        message: message.map(str::to_string),
    }];

    if phase == PolicyPhase::Error {
        conditions.push(PolicyCondition {
            type_: CONDITION_ERROR.to_string(),
            status: "True".to_string(),
            last_transition_time: Some(transition_time(CONDITION_ERROR, "True")),
            reason: Some(REASON_POLICY_ERROR.to_string()),
            message: message.map(str::to_string),
        });
    }

    conditions
}

/// Merge the computed fields into the last observed status, leaving fields
/// this controller does not own untouched.
pub fn merge_status(
    existing: Option<&GarbageCollectionPolicyStatus>,
    counts: Option<EvaluationCounts>,
    phase: PolicyPhase,
    message: Option<&str>,
    now: DateTime<Utc>,
    interval: Duration,
) -> GarbageCollectionPolicyStatus {
    let mut status = existing.cloned().unwrap_or_default();

    if let Some(counts) = counts {
        status.resources_matched = Some(counts.matched as i64);
        status.resources_deleted = Some(counts.deleted as i64);
        status.resources_pending = Some(counts.pending as i64);
    }
    status.last_gc_run = Some(now.to_rfc3339());
    let interval = chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::zero());
    status.next_gc_run = Some((now + interval).to_rfc3339());
    status.phase = Some(phase);
    status.conditions = Some(build_conditions(
        phase,
        message,
        now,
        status.conditions.as_deref().unwrap_or_default(),
    ));

    status
}

/* ============================= REPORTER ============================= */

pub struct StatusReporter {
    client: Client,
    reporter: Reporter,
}

impl StatusReporter {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: CONTROLLER_NAME.to_string(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }

    /// Merge-update the policy's status subresource within the status
    /// timeout. Timeout expiry is not fatal; other failures surface so the
    /// caller can account and emit a warning event.
    pub async fn publish(
        &self,
        policy: &GarbageCollectionPolicy,
        counts: Option<EvaluationCounts>,
        phase: PolicyPhase,
        message: Option<&str>,
        interval: Duration,
    ) -> Result<()> {
        let name = policy.name_any();
        let namespace = policy.namespace().unwrap_or_default();

        let update = self.update_status(&namespace, &name, counts, phase, message, interval);
        match tokio::time::timeout(STATUS_UPDATE_TIMEOUT, update).await {
            Ok(result) => result,
            Err(_elapsed) => {
                warn!(policy = %name, namespace = %namespace, "status_update_timed_out");
                Ok(())
            }
        }
    }

    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        counts: Option<EvaluationCounts>,
        phase: PolicyPhase,
        message: Option<&str>,
        interval: Duration,
    ) -> Result<()> {
        let api: Api<GarbageCollectionPolicy> = Api::namespaced(self.client.clone(), namespace);

        let current = api.get(name).await.map_err(Error::StatusGet)?;
        let status = merge_status(
            current.status.as_ref(),
            counts,
            phase,
            message,
            Utc::now(),
            interval,
        );

        let patch = serde_json::json!({ "status": status });
        api.patch_status(
            name,
            &PatchParams::apply(CONTROLLER_NAME),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(Error::StatusUpdate)?;

        debug!(policy = %name, namespace = %namespace, phase = phase.as_str(), "status_updated");
        Ok(())
    }

    /// Emit a normal event against the policy. Failures are logged only;
    /// events are best-effort.
    pub async fn emit(&self, policy: &GarbageCollectionPolicy, reason: &str, note: String) {
        self.emit_typed(policy, EventType::Normal, reason, note).await;
    }

    pub async fn emit_warning(&self, policy: &GarbageCollectionPolicy, reason: &str, note: String) {
        self.emit_typed(policy, EventType::Warning, reason, note).await;
    }

    async fn emit_typed(
        &self,
        policy: &GarbageCollectionPolicy,
        type_: EventType,
        reason: &str,
        note: String,
    ) {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            policy.object_ref(&()),
        );
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(err) = recorder.publish(event).await {
            warn!(policy = %policy.name_any(), reason = %reason, error = %err, "event_publish_failed");
        }
    }
}

/* ============================= TESTS ============================= */
