use std::time::Duration;

/* ============================= DEFAULTS ============================= */

pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_DELETIONS_PER_SECOND: u32 = 10;
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/* ============================= CONFIG ============================= */

/// Process-wide controller options. Per-policy spec fields override the
/// corresponding defaults; zero values in a policy always fall back here.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Default reconcile requeue interval and informer resync period.
    pub gc_interval: Duration,

    /// Default token rate when a policy omits `maxDeletionsPerSecond`.
    pub max_deletions_per_second: u32,

    /// Default deletion batch size when a policy omits `batchSize`.
    pub batch_size: usize,

    /// Reserved for a worker pool across policies.
    pub max_concurrent_evaluations: usize,

    /// Upper bound on the wait for a fresh informer cache.
    pub cache_sync_timeout: Duration,

    /// Consecutive fully-successful evaluations required to clear a sticky
    /// `Error` phase.
    pub error_recovery_successes: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            gc_interval: DEFAULT_GC_INTERVAL,
            max_deletions_per_second: DEFAULT_MAX_DELETIONS_PER_SECOND,
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_evaluations: 1,
            cache_sync_timeout: DEFAULT_CACHE_SYNC_TIMEOUT,
            error_recovery_successes: 1,
        }
    }
}
