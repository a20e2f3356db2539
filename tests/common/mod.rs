use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{DynamicObject, ObjectMeta};
use serde_json::Value;

use kube_sweep::crd::{GarbageCollectionPolicySpec, TargetResource, TtlSpec};

/// Build a schemaless watched resource the way the informer cache would hold
/// it: metadata plus an arbitrary payload.
pub fn make_resource(
    name: &str,
    namespace: &str,
    age_seconds: i64,
    labels: &[(&str, &str)],
    data: Value,
) -> Arc<DynamicObject> {
    let labels: BTreeMap<String, String> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    Arc::new(DynamicObject {
        types: None,
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{name}")),
            labels: if labels.is_empty() { None } else { Some(labels) },
            creation_timestamp: Some(Time(Utc::now() - chrono::Duration::seconds(age_seconds))),
            ..Default::default()
        },
        data,
    })
}

/// A policy spec targeting core-group ConfigMaps with the given TTL.
pub fn configmap_policy(ttl: TtlSpec) -> GarbageCollectionPolicySpec {
    GarbageCollectionPolicySpec {
        target_resource: TargetResource {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            ..Default::default()
        },
        ttl,
        ..Default::default()
    }
}

pub fn fixed_ttl(seconds: i64) -> TtlSpec {
    TtlSpec {
        seconds_after_creation: Some(seconds),
        ..Default::default()
    }
}
