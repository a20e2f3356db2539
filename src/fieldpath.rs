//! Dot-path lookups over schemaless objects.
//!
//! Watched resources are never deserialized into typed structs; TTL and
//! condition evaluation address them through dot-separated paths like
//! `status.phase` or `metadata.labels.team`. Paths are plain field names
//! joined by dots: no array indexing, no escaping. An empty path resolves to
//! nothing.

use kube::api::DynamicObject;
use serde_json::Value;

/// Walk `path` through a JSON tree. Returns `None` on the first missing or
/// non-object step.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut current = root;
    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Resolve a path against a dynamic object, including its typed metadata.
///
/// `metadata.*` paths are answered from [`kube::api::ObjectMeta`]; everything
/// else is answered from the object's schemaless payload.
pub fn resolve(obj: &DynamicObject, path: &str) -> Option<Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    if head != "metadata" {
        return lookup(&obj.data, path).cloned();
    }

    let meta = &obj.metadata;
    match rest? {
        "name" => meta.name.clone().map(Value::String),
        "namespace" => meta.namespace.clone().map(Value::String),
        "uid" => meta.uid.clone().map(Value::String),
        "creationTimestamp" => meta
            .creation_timestamp
            .as_ref()
            .map(|t| Value::String(t.0.to_rfc3339())),
        rest => {
            let (map_name, key) = rest.split_once('.')?;
            let map = match map_name {
                "labels" => meta.labels.as_ref()?,
                "annotations" => meta.annotations.as_ref()?,
                _ => return None,
            };
            map.get(key).cloned().map(Value::String)
        }
    }
}

/// String value at `path`, if the field is a string.
pub fn resolve_string(obj: &DynamicObject, path: &str) -> Option<String> {
    match resolve(obj, path)? {
        Value::String(s) => Some(s),
        _ => None,
    }
}

/// Integer value at `path`. Accepts JSON integers, integral floats, and
/// strings of digits, since annotation-borne counters arrive as strings.
pub fn resolve_i64(obj: &DynamicObject, path: &str) -> Option<i64> {
    match resolve(obj, path)? {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| f as i64)
            }
        }
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// String form of a scalar at `path`: strings as-is, numbers and booleans
/// stringified. Used by field predicates, which compare against string
/// operands from the policy spec.
pub fn resolve_scalar(obj: &DynamicObject, path: &str) -> Option<String> {
    match resolve(obj, path)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;
    use serde_json::json;

    fn obj(data: Value) -> DynamicObject {
        DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some("res-1".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("abc-123".to_string()),
                labels: Some([("team".to_string(), "ml".to_string())].into()),
                annotations: Some([("retain".to_string(), "false".to_string())].into()),
                creation_timestamp: Some(Time(
                    chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                        .unwrap()
                        .with_timezone(&chrono::Utc),
                )),
                ..Default::default()
            },
            data,
        }
    }

    #[test]
    fn test_lookup_nested_value() {
        let data = json!({"status": {"phase": "Succeeded", "attempts": 3}});
        assert_eq!(
            lookup(&data, "status.phase"),
            Some(&Value::String("Succeeded".to_string()))
        );
        assert_eq!(lookup(&data, "status.attempts"), Some(&json!(3)));
    }

    #[test]
    fn test_lookup_missing_path() {
        let data = json!({"status": {"phase": "Running"}});
        assert_eq!(lookup(&data, "status.missing"), None);
        assert_eq!(lookup(&data, "spec.anything"), None);
    }

    #[test]
    fn test_lookup_empty_path_resolves_to_nothing() {
        let data = json!({"spec": {}});
        assert_eq!(lookup(&data, ""), None);
        assert_eq!(lookup(&data, "spec..x"), None);
    }

    #[test]
    fn test_lookup_stops_at_non_object() {
        let data = json!({"status": {"phase": "Running"}});
        assert_eq!(lookup(&data, "status.phase.inner"), None);
    }

    #[test]
    fn test_resolve_data_field() {
        let o = obj(json!({"spec": {"severity": "CRITICAL"}}));
        assert_eq!(
            resolve_string(&o, "spec.severity").as_deref(),
            Some("CRITICAL")
        );
    }

    #[test]
    fn test_resolve_metadata_fields() {
        let o = obj(json!({}));
        assert_eq!(resolve_string(&o, "metadata.name").as_deref(), Some("res-1"));
        assert_eq!(
            resolve_string(&o, "metadata.namespace").as_deref(),
            Some("default")
        );
        assert_eq!(
            resolve_string(&o, "metadata.labels.team").as_deref(),
            Some("ml")
        );
        assert_eq!(
            resolve_string(&o, "metadata.annotations.retain").as_deref(),
            Some("false")
        );
        assert!(
            resolve_string(&o, "metadata.creationTimestamp")
                .unwrap()
                .starts_with("2026-01-01T00:00:00")
        );
    }

    #[test]
    fn test_resolve_metadata_missing_key() {
        let o = obj(json!({}));
        assert_eq!(resolve(&o, "metadata.labels.owner"), None);
        assert_eq!(resolve(&o, "metadata"), None);
        assert_eq!(resolve(&o, "metadata.generation"), None);
    }

    #[test]
    fn test_resolve_i64_accepts_numbers_and_digit_strings() {
        let o = obj(json!({
            "spec": {"ttl": 3600, "ttlFloat": 120.0, "ttlString": "900", "ttlBad": "soon"}
        }));
        assert_eq!(resolve_i64(&o, "spec.ttl"), Some(3600));
        assert_eq!(resolve_i64(&o, "spec.ttlFloat"), Some(120));
        assert_eq!(resolve_i64(&o, "spec.ttlString"), Some(900));
        assert_eq!(resolve_i64(&o, "spec.ttlBad"), None);
    }

    #[test]
    fn test_resolve_scalar_stringifies_numbers_and_bools() {
        let o = obj(json!({"spec": {"replicas": 2, "suspended": true}}));
        assert_eq!(resolve_scalar(&o, "spec.replicas").as_deref(), Some("2"));
        assert_eq!(resolve_scalar(&o, "spec.suspended").as_deref(), Some("true"));
        assert_eq!(resolve_scalar(&o, "spec"), None);
    }
}
