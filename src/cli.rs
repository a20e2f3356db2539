use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kube-sweep")]
#[command(about = "Declarative garbage collection for Kubernetes resources")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display application version
    Version,

    /// Check cluster connectivity and CRD installation
    Check,

    /// List GarbageCollectionPolicies and their status
    Policies,

    /// Manage the GarbageCollectionPolicy CRD
    Crd {
        #[command(subcommand)]
        action: CrdAction,
    },

    /// Start the garbage-collection controller
    Run {
        /// Default reconcile interval and informer resync period
        #[arg(long, default_value = "60s")]
        gc_interval: String,

        /// Default deletion rate when a policy omits it
        #[arg(long, default_value_t = 10)]
        max_deletions_per_second: u32,

        /// Default deletion batch size when a policy omits it
        #[arg(long, default_value_t = 50)]
        batch_size: usize,

        /// Upper bound on the wait for informer cache sync
        #[arg(long, default_value = "60s")]
        cache_sync_timeout: String,

        /// Consecutive successful evaluations needed to clear an Error phase
        #[arg(long, default_value_t = 1)]
        error_recovery_successes: u32,

        /// Reserved worker-pool width for evaluations across policies
        #[arg(long, default_value_t = 1)]
        max_concurrent_evaluations: usize,

        /// Bind address of the health and metrics endpoints
        #[arg(long, default_value = "0.0.0.0:9090")]
        metrics_addr: String,
    },
}

#[derive(Subcommand)]
pub enum CrdAction {
    /// Print the CRD YAML to stdout
    Generate,

    /// Install the CRD into the connected cluster
    Install,
}
