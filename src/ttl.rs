//! TTL evaluation: from a policy's TTL spec and a watched resource to an
//! absolute expiration time.
//!
//! The CRD carries the four TTL shapes as one flat struct with mutually
//! exclusive fields; that is a serialization concession. Internally they
//! resolve to a tagged [`TtlModel`] with a single [`TtlModel::expires_at`].

use chrono::{DateTime, Utc};
use kube::api::DynamicObject;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::crd::TtlSpec;
use crate::fieldpath;

/* ============================= ERRORS ============================= */

/// Why a resource has no usable expiration time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TtlError {
    #[error("no valid TTL configuration")]
    NotConfigured,

    #[error("resource has no creation timestamp")]
    MissingCreationTimestamp,

    #[error("TTL field {0:?} not found")]
    FieldNotFound(String),

    #[error("no mapping for value {0:?}")]
    NoMapping(String),

    #[error("invalid timestamp at {0:?}")]
    InvalidTimestamp(String),

    /// The anchor-relative expiration already lay in the past when it was
    /// computed, which signals stale input rather than eligibility.
    #[error("relative TTL expired")]
    RelativeExpired,
}

/* ============================= MODEL ============================= */

/// A TTL spec resolved to its effective shape.
#[derive(Debug, Clone, PartialEq)]
pub enum TtlModel {
    /// Fixed number of seconds after creation.
    Fixed { seconds: i64 },

    /// Seconds read from a field: either directly as an integer, or via a
    /// string value mapped through `mappings`, with an optional fallback.
    Field {
        path: String,
        mappings: BTreeMap<String, i64>,
        default: Option<i64>,
    },

    /// Absolute expiration anchored to an RFC3339 timestamp field.
    Relative { path: String, seconds_after: i64 },
}

impl TtlModel {
    /// Pick the effective shape. Shapes are checked in spec order:
    /// `secondsAfterCreation`, then `fieldPath`, then `relativeTo`.
    pub fn from_spec(spec: &TtlSpec) -> Option<TtlModel> {
        if let Some(seconds) = spec.seconds_after_creation {
            return Some(TtlModel::Fixed { seconds });
        }
        if let Some(path) = &spec.field_path {
            if !path.is_empty() {
                return Some(TtlModel::Field {
                    path: path.clone(),
                    mappings: spec.mappings.clone().unwrap_or_default(),
                    default: spec.default,
                });
            }
        }
        if let (Some(path), Some(seconds_after)) = (&spec.relative_to, spec.seconds_after) {
            if !path.is_empty() {
                return Some(TtlModel::Relative {
                    path: path.clone(),
                    seconds_after,
                });
            }
        }
        None
    }

    /// Absolute expiration time of `obj` under this TTL.
    pub fn expires_at(&self, obj: &DynamicObject) -> Result<DateTime<Utc>, TtlError> {
        match self {
            TtlModel::Fixed { seconds } => Ok(creation_timestamp(obj)?
                + chrono::Duration::seconds(*seconds)),

            TtlModel::Field {
                path,
                mappings,
                default,
            } => {
                let offset = field_offset(obj, path, mappings, *default)?;
                Ok(creation_timestamp(obj)? + chrono::Duration::seconds(offset))
            }

            TtlModel::Relative { path, seconds_after } => {
                let raw = fieldpath::resolve_string(obj, path)
                    .ok_or_else(|| TtlError::FieldNotFound(path.clone()))?;
                let anchor = DateTime::parse_from_rfc3339(&raw)
                    .map_err(|_| TtlError::InvalidTimestamp(path.clone()))?
                    .with_timezone(&Utc);
                let expiration = anchor + chrono::Duration::seconds(*seconds_after);
                if expiration < Utc::now() {
                    return Err(TtlError::RelativeExpired);
                }
                Ok(expiration)
            }
        }
    }
}

fn creation_timestamp(obj: &DynamicObject) -> Result<DateTime<Utc>, TtlError> {
    obj.metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0)
        .ok_or(TtlError::MissingCreationTimestamp)
}

fn field_offset(
    obj: &DynamicObject,
    path: &str,
    mappings: &BTreeMap<String, i64>,
    default: Option<i64>,
) -> Result<i64, TtlError> {
    if let Some(seconds) = fieldpath::resolve_i64(obj, path) {
        return Ok(seconds);
    }

    match fieldpath::resolve_string(obj, path) {
        Some(value) if !mappings.is_empty() => mappings
            .get(&value)
            .copied()
            .or(default)
            .ok_or(TtlError::NoMapping(value)),
        // a string value with no mapping table configured is not a usable TTL
        Some(_) => Err(TtlError::NotConfigured),
        None => default.ok_or_else(|| TtlError::FieldNotFound(path.to_string())),
    }
}

/* ============================= TESTS ============================= */
