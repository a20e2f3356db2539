use std::time::Duration;

use thiserror::Error;

/// Controller-level failures. Every variant maps onto one value of the
/// `gc_errors_total{error_type}` metric dimension via [`Error::metric_label`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("target resource has no resolvable group/version/kind: {0}")]
    InvalidGvr(String),

    #[error("failed to create informer: {0}")]
    InformerCreation(#[source] kube::Error),

    #[error("informer watch stopped before the cache synced")]
    InformerStopped,

    #[error("informer cache did not sync within {0:?}")]
    CacheSyncTimeout(Duration),

    #[error("failed to list resources: {0}")]
    ListResources(#[source] kube::Error),

    #[error("failed to delete {resource}: {source}")]
    Deletion {
        resource: String,
        #[source]
        source: kube::Error,
    },

    #[error("rate limiter unavailable for policy {0}")]
    RateLimiter(String),

    #[error("failed to read policy for status update: {0}")]
    StatusGet(#[source] kube::Error),

    #[error("failed to patch policy status: {0}")]
    StatusUpdate(#[source] kube::Error),

    #[error("invalid label selector: {0}")]
    InvalidLabelSelector(String),

    #[error(transparent)]
    Kube(#[from] kube::Error),
}

impl Error {
    /// Stable label for the `error_type` metric dimension.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::InvalidGvr(_) => "invalid_gvr",
            Error::InformerCreation(_) | Error::InformerStopped => "informer_creation_failed",
            Error::CacheSyncTimeout(_) => "cache_sync_timeout",
            Error::ListResources(_) => "list_resources_failed",
            Error::Deletion { .. } => "deletion_failed",
            Error::RateLimiter(_) => "rate_limiter_error",
            Error::StatusGet(_) => "status_get_failed",
            Error::StatusUpdate(_) => "status_update_failed",
            Error::InvalidLabelSelector(_) => "invalid_label_selector",
            Error::Kube(_) => "kube_api",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_labels_are_stable() {
        assert_eq!(
            Error::InvalidGvr("x".into()).metric_label(),
            "invalid_gvr"
        );
        assert_eq!(
            Error::CacheSyncTimeout(Duration::from_secs(60)).metric_label(),
            "cache_sync_timeout"
        );
        assert_eq!(Error::InformerStopped.metric_label(), "informer_creation_failed");
        assert_eq!(
            Error::InvalidLabelSelector("bad op".into()).metric_label(),
            "invalid_label_selector"
        );
        assert_eq!(
            Error::RateLimiter("uid".into()).metric_label(),
            "rate_limiter_error"
        );
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::InvalidGvr("v1/Unknown".into());
        assert!(err.to_string().contains("v1/Unknown"));

        let err = Error::CacheSyncTimeout(Duration::from_secs(60));
        assert!(err.to_string().contains("60s"));
    }
}
