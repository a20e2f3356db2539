use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use futures::StreamExt;
use kube::api::ListParams;
use kube::runtime::controller::Controller;
use kube::{Api, Client};
use tokio::signal;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kube_sweep::config::ControllerConfig;
use kube_sweep::crd::GarbageCollectionPolicy;
use kube_sweep::metrics;
use kube_sweep::reconciler::{self, Context};

/// Grace period after a shutdown signal in which cancelled evaluation and
/// deletion loops report their partial progress before the stream is dropped.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct RunArgs {
    pub gc_interval: String,
    pub max_deletions_per_second: u32,
    pub batch_size: usize,
    pub cache_sync_timeout: String,
    pub error_recovery_successes: u32,
    pub max_concurrent_evaluations: usize,
    pub metrics_addr: String,
}

/* ============================= STATE ============================= */

pub(crate) struct ServeState {
    pub(crate) ready: bool,
}

/* ============================= ENTRY ============================= */

pub async fn run(args: RunArgs) -> Result<()> {
    let gc_interval =
        humantime::parse_duration(&args.gc_interval).context("Invalid --gc-interval")?;
    let cache_sync_timeout = humantime::parse_duration(&args.cache_sync_timeout)
        .context("Invalid --cache-sync-timeout")?;
    let addr: SocketAddr = args
        .metrics_addr
        .parse()
        .context("Invalid --metrics-addr")?;

    let config = ControllerConfig {
        gc_interval,
        max_deletions_per_second: args.max_deletions_per_second,
        batch_size: args.batch_size,
        max_concurrent_evaluations: args.max_concurrent_evaluations.max(1),
        cache_sync_timeout,
        error_recovery_successes: args.error_recovery_successes.max(1),
    };

    println!("Starting kube-sweep controller...\n");

    let client = Client::try_default()
        .await
        .context("Failed to load kubeconfig")?;

    print!("  Cluster connection .......... ");
    match client.apiserver_version().await {
        Ok(v) => println!("OK (v{}.{})", v.major, v.minor),
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot reach cluster: {}. Is the cluster running?", e);
        }
    }

    print!("  CRD installed ............... ");
    let policies: Api<GarbageCollectionPolicy> = Api::all(client.clone());
    match policies.list(&ListParams::default().limit(1)).await {
        Ok(_) => println!("OK"),
        Err(e) => {
            println!("FAIL");
            anyhow::bail!(
                "GarbageCollectionPolicy CRD is not queryable: {e}. Install it with: kube-sweep crd install"
            );
        }
    }

    metrics::force_init();

    println!("  CRD watch ................... GarbageCollectionPolicy.sweep.dev/v1");
    println!("  Default GC interval ......... {}", args.gc_interval);
    println!(
        "  Default deletion rate ....... {}/s",
        config.max_deletions_per_second
    );
    println!("  Default batch size .......... {}", config.batch_size);
    println!("  Metrics server .............. http://{addr}");
    println!();
    println!("  Available endpoints:");
    println!("    GET /healthz .............. Liveness probe (always 200 OK)");
    println!("    GET /readyz ............... Readiness probe (503 until first reconcile, then 200)");
    println!("    GET /metrics .............. Prometheus metrics scrape endpoint");
    println!();
    println!("Controller running. Press Ctrl+C to stop.\n");
    println!("{}", "=".repeat(70));

    info!("controller_started");

    let shutdown = CancellationToken::new();
    let ctx = Arc::new(Context::new(client.clone(), config, shutdown.clone()));

    let serve_state = Arc::new(Mutex::new(ServeState { ready: false }));
    let http_state = serve_state.clone();
    let http_shutdown = shutdown.clone();
    let http_handle =
        tokio::spawn(async move { serve_http(http_state, http_shutdown, addr).await });

    let controller_state = serve_state.clone();
    let mut controller = tokio::spawn(
        Controller::new(policies, Default::default())
            .run(reconciler::reconcile, reconciler::error_policy, ctx)
            .for_each(move |result| {
                let state = controller_state.clone();
                async move {
                    {
                        let mut s = state.lock().await;
                        if !s.ready {
                            s.ready = true;
                        }
                    }
                    if let Err(e) = result {
                        warn!(error = %e, "reconcile_dispatch_error");
                    }
                }
            }),
    );

    tokio::select! {
        _ = &mut controller => {
            info!("controller_stream_ended");
            println!("\nController stream ended unexpectedly.");
        }
        _ = signal::ctrl_c() => {
            info!("shutdown_signal_received");
            println!("\n{}", "=".repeat(70));
            println!("Shutdown signal received. Stopping controller...");
            println!("{}", "=".repeat(70));

            // cancel first so in-flight batches return partial counts, then
            // give the stream a bounded window to finish those reconciles
            shutdown.cancel();
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut controller).await.is_err() {
                controller.abort();
            }
        }
    }

    shutdown.cancel();
    let _ = http_handle.await?;

    info!("controller_stopped");
    println!("Controller stopped.");

    Ok(())
}

/* ============================= HTTP SERVER ============================= */

pub(crate) fn build_router(state: Arc<Mutex<ServeState>>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route(
            "/readyz",
            get({
                let state = state.clone();
                move || ready_handler(state.clone())
            }),
        )
}

async fn serve_http(
    state: Arc<Mutex<ServeState>>,
    shutdown: CancellationToken,
    addr: SocketAddr,
) -> Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server on {addr}"))?;

    info!(addr = %addr, "metrics_server_started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

async fn ready_handler(state: Arc<Mutex<ServeState>>) -> impl IntoResponse {
    let state = state.lock().await;
    if state.ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::render() {
        Ok(body) => (StatusCode::OK, body),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "metrics encoding error".to_string(),
        ),
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state(ready: bool) -> Arc<Mutex<ServeState>> {
        Arc::new(Mutex::new(ServeState { ready }))
    }

    #[tokio::test]
    async fn test_healthz_returns_ok() {
        let app = build_router(test_state(false));
        let req = Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_readyz_when_ready() {
        let app = build_router(test_state(true));
        let req = Request::builder()
            .uri("/readyz")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"READY");
    }

    #[tokio::test]
    async fn test_readyz_when_not_ready() {
        let app = build_router(test_state(false));
        let req = Request::builder()
            .uri("/readyz")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"NOT READY");
    }

    #[tokio::test]
    async fn test_metrics_returns_ok() {
        let app = build_router(test_state(false));
        let req = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_returns_404() {
        let app = build_router(test_state(false));
        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
