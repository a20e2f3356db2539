//! Resource matching: namespace scope, label selectors, client-side field
//! selectors, and deletion conditions.
//!
//! Label selectors are pushed down to the list/watch call when possible, but
//! every cached object is re-checked locally since the informer may be
//! broader than the policy scope. Field selectors are never sent to the
//! server; many APIs reject unknown field selectors, so they are evaluated
//! here against the cache instead.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::DynamicObject;

use crate::crd::{DeletionConditions, TargetResource};
use crate::error::Error;
use crate::fieldpath;

/* ============================= LABEL SELECTORS ============================= */

/// Render a label selector as the canonical query expression understood by
/// the list/watch API, e.g. `app=web,tier in (a,b),!legacy`.
///
/// Unknown `matchExpressions` operators are an error; callers treat the
/// selector as matching nothing.
pub fn selector_to_query(selector: &LabelSelector) -> Result<String, Error> {
    let mut parts = Vec::new();

    if let Some(labels) = &selector.match_labels {
        for (key, value) in labels {
            parts.push(format!("{key}={value}"));
        }
    }

    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let values = expr.values.clone().unwrap_or_default();
            match expr.operator.as_str() {
                "In" => parts.push(format!("{} in ({})", expr.key, values.join(","))),
                "NotIn" => parts.push(format!("{} notin ({})", expr.key, values.join(","))),
                "Exists" => parts.push(expr.key.clone()),
                "DoesNotExist" => parts.push(format!("!{}", expr.key)),
                other => {
                    return Err(Error::InvalidLabelSelector(format!(
                        "unknown operator {other:?} for key {:?}",
                        expr.key
                    )));
                }
            }
        }
    }

    Ok(parts.join(","))
}

/// Evaluate a label selector against an object's labels.
///
/// Fail-closed: an unknown expression operator matches nothing.
pub fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    if let Some(required) = &selector.match_labels {
        for (key, value) in required {
            if labels.get(key) != Some(value) {
                return false;
            }
        }
    }

    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let actual = labels.get(&expr.key);
            let values = expr.values.as_deref().unwrap_or_default();
            let ok = match expr.operator.as_str() {
                "In" => actual.is_some_and(|v| values.iter().any(|want| want == v)),
                "NotIn" => actual.is_none_or(|v| !values.iter().any(|want| want == v)),
                "Exists" => actual.is_some(),
                "DoesNotExist" => actual.is_none(),
                _ => false,
            };
            if !ok {
                return false;
            }
        }
    }

    true
}

/* ============================= SCOPE MATCHING ============================= */

/// Whether a policy namespace constrains matching at all.
pub fn is_cluster_wide(namespace: Option<&str>) -> bool {
    matches!(namespace, None | Some("") | Some("*"))
}

/// Full in-memory selector check: namespace scope, labels, and field
/// requirements, in that order.
pub fn matches_target(target: &TargetResource, obj: &DynamicObject) -> bool {
    if !is_cluster_wide(target.namespace.as_deref())
        && target.namespace.as_deref() != obj.metadata.namespace.as_deref()
    {
        return false;
    }

    if let Some(selector) = &target.label_selector {
        static EMPTY: BTreeMap<String, String> = BTreeMap::new();
        let labels = obj.metadata.labels.as_ref().unwrap_or(&EMPTY);
        if !selector_matches(selector, labels) {
            return false;
        }
    }

    if let Some(fields) = &target.field_selector {
        for (path, expected) in fields {
            match fieldpath::resolve_string(obj, path) {
                Some(actual) if &actual == expected => {}
                _ => return false,
            }
        }
    }

    true
}

/* ============================= CONDITIONS ============================= */

/// Whether the object clears every deletion gate. `None` conditions pass.
pub fn meets_conditions(conditions: Option<&DeletionConditions>, obj: &DynamicObject) -> bool {
    let Some(conditions) = conditions else {
        return true;
    };

    if let Some(phases) = &conditions.phase {
        if !phases.is_empty() {
            let phase = fieldpath::resolve_string(obj, "status.phase");
            match phase {
                Some(phase) if phases.contains(&phase) => {}
                _ => return false,
            }
        }
    }

    if let Some(label_conditions) = &conditions.has_labels {
        static EMPTY: BTreeMap<String, String> = BTreeMap::new();
        let labels = obj.metadata.labels.as_ref().unwrap_or(&EMPTY);
        for cond in label_conditions {
            let actual = labels.get(&cond.key);
            let expected = cond.value.as_deref();
            let ok = match cond.operator.as_deref().unwrap_or("") {
                "Exists" => actual.is_some(),
                // `In` carries a single value in this spec shape and is an
                // alias for `Equals`.
                "" | "Equals" | "In" => {
                    actual.is_some() && actual.map(String::as_str) == expected
                }
                "NotIn" => match actual {
                    None => true,
                    Some(v) => Some(v.as_str()) != expected,
                },
                _ => false,
            };
            if !ok {
                return false;
            }
        }
    }

    if let Some(annotation_conditions) = &conditions.has_annotations {
        static EMPTY: BTreeMap<String, String> = BTreeMap::new();
        let annotations = obj.metadata.annotations.as_ref().unwrap_or(&EMPTY);
        for cond in annotation_conditions {
            if annotations.get(&cond.key) != Some(&cond.value) {
                return false;
            }
        }
    }

    if let Some(predicates) = &conditions.and {
        for pred in predicates {
            let Some(actual) = fieldpath::resolve_scalar(obj, &pred.field_path) else {
                return false;
            };
            let value = pred.value.as_deref();
            let values = pred.values.as_deref().unwrap_or_default();
            let ok = match pred.operator.as_str() {
                "Equals" => Some(actual.as_str()) == value,
                "NotEquals" => Some(actual.as_str()) != value,
                "In" => values.iter().any(|v| v == &actual),
                "NotIn" => !values.iter().any(|v| v == &actual),
                _ => false,
            };
            if !ok {
                return false;
            }
        }
    }

    true
}

/* ============================= TESTS ============================= */
