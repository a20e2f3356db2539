use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/* ============================= TARGET ============================= */

/// The class of resources a policy collects.
///
/// `apiGroup` is empty for the core group. An empty or `"*"` namespace means
/// the policy watches the whole cluster.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetResource {
    /// API group of the target, e.g. "batch". Empty for core resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,

    /// API version of the target, e.g. "v1".
    pub api_version: String,

    /// Kind of the target, e.g. "Job".
    pub kind: String,

    /// Namespace to watch. Empty or "*" selects every namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Label selector pushed down to the list/watch call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,

    /// Field requirements evaluated client-side: dot-path → expected string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_selector: Option<BTreeMap<String, String>>,
}

/* ============================= TTL ============================= */

/// Time-to-live configuration. The four shapes are mutually exclusive and
/// checked in declaration order; see [`crate::ttl::TtlModel`] for the
/// resolved model.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TtlSpec {
    /// Fixed offset in seconds from the resource's creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds_after_creation: Option<i64>,

    /// Dot-path to a field holding either an integer number of seconds or a
    /// string key into `mappings`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,

    /// Seconds per string value of the field at `fieldPath`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mappings: Option<BTreeMap<String, i64>>,

    /// Fallback seconds when the field is absent or unmapped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<i64>,

    /// Dot-path to an RFC3339 timestamp field the TTL is anchored to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_to: Option<String>,

    /// Seconds after the `relativeTo` timestamp at which the resource expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds_after: Option<i64>,
}

/* ============================= CONDITIONS ============================= */

/// A label requirement on candidate resources.
///
/// `operator` is one of `Exists`, `Equals` (default when empty), `In`, or
/// `NotIn`. `In` takes a single `value` and behaves as an alias for `Equals`.
/// Unknown operators never match.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelCondition {
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
}

/// An annotation requirement: the key must exist with exactly this value.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationCondition {
    pub key: String,
    pub value: String,
}

/// A predicate on an arbitrary field of the candidate resource.
///
/// `operator` is one of `Equals`, `NotEquals`, `In`, `NotIn`. A missing
/// field path or an unknown operator fails the predicate.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldPredicate {
    pub field_path: String,

    pub operator: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

/// Deletion gates. Every populated family must pass before a resource is
/// eligible, regardless of its TTL.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeletionConditions {
    /// Acceptable values of `status.phase`. Empty list passes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_labels: Option<Vec<LabelCondition>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_annotations: Option<Vec<AnnotationCondition>>,

    /// Field predicates, all of which must hold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub and: Option<Vec<FieldPredicate>>,
}

/* ============================= BEHAVIOR ============================= */

/// How deletions cascade to dependents.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum GcPropagationPolicy {
    Foreground,
    #[default]
    Background,
    Orphan,
}

/// Execution behavior for the deletion phase.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GcBehavior {
    /// Count eligible resources without calling the delete API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,

    /// Deletions per batch. Zero or omitted falls back to the controller
    /// default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,

    /// Token rate for this policy. Zero or omitted falls back to the
    /// controller default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_deletions_per_second: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_seconds: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagation_policy: Option<GcPropagationPolicy>,
}

/* ============================= SPEC ============================= */

/// GarbageCollectionPolicy declares a class of resources to expire and the
/// rules under which the controller deletes them.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "sweep.dev",
    version = "v1",
    kind = "GarbageCollectionPolicy",
    plural = "garbagecollectionpolicies",
    shortname = "gcp",
    status = "GarbageCollectionPolicyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GarbageCollectionPolicySpec {
    /// When true the controller records the phase but performs no work.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,

    /// Per-policy reconcile interval, e.g. "5m". Overrides the global
    /// default when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_interval: Option<String>,

    pub target_resource: TargetResource,

    #[serde(default)]
    pub ttl: TtlSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<DeletionConditions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<GcBehavior>,
}

/* ============================= STATUS ============================= */

/// Observed phase of a policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Hash)]
pub enum PolicyPhase {
    #[default]
    Active,
    Paused,
    Error,
}

impl PolicyPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyPhase::Active => "Active",
            PolicyPhase::Paused => "Paused",
            PolicyPhase::Error => "Error",
        }
    }
}

/// One entry of the status `conditions` list.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCondition {
    #[serde(rename = "type")]
    pub type_: String,

    /// "True" or "False".
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Status reported by the controller after every evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GarbageCollectionPolicyStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources_matched: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources_deleted: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources_pending: Option<i64>,

    /// RFC3339 timestamp of the last completed evaluation.
    #[serde(default, rename = "lastGCRun", skip_serializing_if = "Option::is_none")]
    pub last_gc_run: Option<String>,

    /// RFC3339 timestamp of the next scheduled evaluation.
    #[serde(default, rename = "nextGCRun", skip_serializing_if = "Option::is_none")]
    pub next_gc_run: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<PolicyPhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<PolicyCondition>>,
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_crd_generates_valid_yaml() {
        let crd = GarbageCollectionPolicy::crd();
        let yaml = serde_yaml::to_string(&crd).expect("CRD should serialize to YAML");
        assert!(yaml.contains("sweep.dev"));
        assert!(yaml.contains("GarbageCollectionPolicy"));
        assert!(yaml.contains("garbagecollectionpolicies"));
    }

    #[test]
    fn test_crd_is_namespaced_with_status() {
        let crd = GarbageCollectionPolicy::crd();
        assert_eq!(crd.spec.scope, "Namespaced");
        let version = &crd.spec.versions[0];
        assert_eq!(version.name, "v1");
        assert!(version.subresources.as_ref().is_some_and(|s| s.status.is_some()));
    }

    #[test]
    fn test_spec_minimal_json_deserializes() {
        let json = r#"{"targetResource":{"apiVersion":"v1","kind":"ConfigMap"}}"#;
        let spec: GarbageCollectionPolicySpec =
            serde_json::from_str(json).expect("minimal spec should deserialize");

        assert_eq!(spec.target_resource.kind, "ConfigMap");
        assert_eq!(spec.target_resource.api_version, "v1");
        assert_eq!(spec.paused, None);
        assert_eq!(spec.ttl, TtlSpec::default());
        assert_eq!(spec.conditions, None);
        assert_eq!(spec.behavior, None);
    }

    #[test]
    fn test_spec_serialization_roundtrip() {
        let spec = GarbageCollectionPolicySpec {
            paused: Some(false),
            evaluation_interval: Some("5m".to_string()),
            target_resource: TargetResource {
                api_group: Some("batch".to_string()),
                api_version: "v1".to_string(),
                kind: "Job".to_string(),
                namespace: Some("ci".to_string()),
                ..Default::default()
            },
            ttl: TtlSpec {
                seconds_after_creation: Some(3600),
                ..Default::default()
            },
            conditions: Some(DeletionConditions {
                phase: Some(vec!["Succeeded".to_string()]),
                ..Default::default()
            }),
            behavior: Some(GcBehavior {
                dry_run: Some(true),
                batch_size: Some(25),
                max_deletions_per_second: Some(5),
                grace_period_seconds: Some(0),
                propagation_policy: Some(GcPropagationPolicy::Foreground),
            }),
        };

        let json = serde_json::to_string(&spec).expect("should serialize");
        let deserialized: GarbageCollectionPolicySpec =
            serde_json::from_str(&json).expect("should deserialize");

        assert_eq!(deserialized.evaluation_interval.as_deref(), Some("5m"));
        assert_eq!(deserialized.target_resource.api_group.as_deref(), Some("batch"));
        assert_eq!(deserialized.ttl.seconds_after_creation, Some(3600));
        assert_eq!(
            deserialized.behavior.as_ref().unwrap().propagation_policy,
            Some(GcPropagationPolicy::Foreground)
        );
    }

    #[test]
    fn test_ttl_field_names_are_camel_case() {
        let ttl = TtlSpec {
            field_path: Some("spec.severity".to_string()),
            mappings: Some(BTreeMap::from([("CRITICAL".to_string(), 1_814_400)])),
            default: Some(604_800),
            ..Default::default()
        };

        let json = serde_json::to_string(&ttl).expect("should serialize");
        assert!(json.contains("fieldPath"));
        assert!(json.contains("mappings"));
        assert!(json.contains("default"));
        assert!(!json.contains("secondsAfterCreation"));
    }

    #[test]
    fn test_propagation_policy_serializes_as_pascal_case() {
        let json = serde_json::to_string(&GcPropagationPolicy::Background).unwrap();
        assert_eq!(json, r#""Background""#);
        let parsed: GcPropagationPolicy = serde_json::from_str(r#""Orphan""#).unwrap();
        assert_eq!(parsed, GcPropagationPolicy::Orphan);
    }

    #[test]
    fn test_status_gc_run_field_names() {
        let status = GarbageCollectionPolicyStatus {
            resources_matched: Some(12),
            resources_deleted: Some(3),
            resources_pending: Some(9),
            last_gc_run: Some("2026-03-01T00:00:00Z".to_string()),
            next_gc_run: Some("2026-03-01T00:01:00Z".to_string()),
            phase: Some(PolicyPhase::Active),
            conditions: None,
        };

        let json = serde_json::to_string(&status).expect("should serialize");
        assert!(json.contains("lastGCRun"));
        assert!(json.contains("nextGCRun"));
        assert!(json.contains(r#""phase":"Active""#));
        assert!(!json.contains("lastGcRun"));
    }

    #[test]
    fn test_condition_type_field_renamed() {
        let cond = PolicyCondition {
            type_: "Ready".to_string(),
            status: "True".to_string(),
            last_transition_time: Some("2026-03-01T00:00:00Z".to_string()),
            reason: None,
            message: None,
        };
        let json = serde_json::to_string(&cond).unwrap();
        assert!(json.contains(r#""type":"Ready""#));
        assert!(json.contains("lastTransitionTime"));
    }

    #[test]
    fn test_phase_strings() {
        assert_eq!(PolicyPhase::Active.as_str(), "Active");
        assert_eq!(PolicyPhase::Paused.as_str(), "Paused");
        assert_eq!(PolicyPhase::Error.as_str(), "Error");
        assert_eq!(serde_json::to_string(&PolicyPhase::Error).unwrap(), r#""Error""#);
    }

    #[test]
    fn test_old_status_json_still_deserializes() {
        let json = r#"{"resourcesMatched":4,"phase":"Paused"}"#;
        let status: GarbageCollectionPolicyStatus =
            serde_json::from_str(json).expect("sparse status should deserialize");
        assert_eq!(status.resources_matched, Some(4));
        assert_eq!(status.phase, Some(PolicyPhase::Paused));
        assert_eq!(status.conditions, None);
    }

    #[test]
    fn test_target_resource_default_is_cluster_wide() {
        let target = TargetResource {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            ..Default::default()
        };
        assert_eq!(target.namespace, None);
        assert_eq!(target.label_selector, None);
        assert_eq!(target.field_selector, None);
    }
}
