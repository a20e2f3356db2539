//! Per-policy cached watches.
//!
//! Each policy gets exactly one reflector-backed store for its target
//! resource class, keyed by policy uid. The watch runs on its own task;
//! tearing an entry down aborts that task, which stops the underlying watch.
//! Entries are built lazily on first evaluation and rebuilt only when the
//! target shape drifts (the reconciler decides that).

use std::collections::HashMap;

use futures::StreamExt;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{reflector, Store};
use kube::runtime::watcher::{watcher, Config as WatchConfig};
use kube::runtime::WatchStreamExt;
use kube::Client;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::crd::TargetResource;
use crate::error::{Error, Result};
use crate::gvr::GvrResolver;
use crate::metrics;
use crate::selector;

/* ============================= ENTRY ============================= */

struct InformerEntry {
    store: Store<DynamicObject>,
    resource: ApiResource,
    watch_task: JoinHandle<()>,
}

impl Drop for InformerEntry {
    fn drop(&mut self) {
        self.watch_task.abort();
    }
}

/* ============================= REGISTRY ============================= */

#[derive(Default)]
pub struct InformerRegistry {
    entries: RwLock<HashMap<String, InformerEntry>>,
}

impl InformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the synced store for a policy, creating the watch on first use.
    ///
    /// Uses double-checked locking: the common path is a read-locked cache
    /// hit; the miss path re-checks under the write lock before building.
    pub async fn get_or_create(
        &self,
        client: &Client,
        uid: &str,
        target: &TargetResource,
        resolver: &GvrResolver,
        config: &ControllerConfig,
    ) -> Result<(Store<DynamicObject>, ApiResource)> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(uid) {
                return Ok((entry.store.clone(), entry.resource.clone()));
            }
        }

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(uid) {
            return Ok((entry.store.clone(), entry.resource.clone()));
        }

        let resource = resolver.resolve(client, target).await?;

        let api: Api<DynamicObject> = match target.namespace.as_deref() {
            Some(ns) if !selector::is_cluster_wide(Some(ns)) => {
                Api::namespaced_with(client.clone(), ns, &resource)
            }
            _ => Api::all_with(client.clone(), &resource),
        };

        // Push the label selector down to the server when it converts
        // cleanly; local matching re-checks it either way.
        let mut watch_config = WatchConfig::default();
        if let Some(label_selector) = &target.label_selector {
            match selector::selector_to_query(label_selector) {
                Ok(query) if !query.is_empty() => watch_config = watch_config.labels(&query),
                Ok(_) => {}
                Err(err) => {
                    metrics::ERRORS_TOTAL
                        .with_label_values(&[err.metric_label()])
                        .inc();
                    warn!(policy_uid = %uid, error = %err, "label_selector_not_pushed_down");
                }
            }
        }

        let writer = Writer::new(resource.clone());
        let store = writer.as_reader();

        let stream = watcher(api, watch_config).default_backoff();
        let mut reflected = Box::pin(reflector(writer, stream));
        let watch_uid = uid.to_string();
        let watch_task = tokio::spawn(async move {
            while let Some(event) = reflected.next().await {
                if let Err(err) = event {
                    warn!(policy_uid = %watch_uid, error = %err, "informer_watch_error");
                }
            }
            debug!(policy_uid = %watch_uid, "informer_watch_stopped");
        });

        match tokio::time::timeout(config.cache_sync_timeout, store.wait_until_ready()).await {
            Ok(Ok(())) => {}
            Ok(Err(_writer_dropped)) => {
                watch_task.abort();
                return Err(Error::InformerStopped);
            }
            Err(_elapsed) => {
                watch_task.abort();
                return Err(Error::CacheSyncTimeout(config.cache_sync_timeout));
            }
        }

        info!(
            policy_uid = %uid,
            kind = %resource.kind,
            plural = %resource.plural,
            "informer_started"
        );

        entries.insert(
            uid.to_string(),
            InformerEntry {
                store: store.clone(),
                resource: resource.clone(),
                watch_task,
            },
        );
        metrics::INFORMERS_ACTIVE.set(entries.len() as i64);

        Ok((store, resource))
    }

    /// Tear down a policy's watch. Dropping the entry aborts the watch task,
    /// so no blocking wait is needed.
    pub async fn cleanup(&self, uid: &str) -> bool {
        let mut entries = self.entries.write().await;
        let removed = entries.remove(uid).is_some();
        metrics::INFORMERS_ACTIVE.set(entries.len() as i64);
        if removed {
            info!(policy_uid = %uid, "informer_removed");
        }
        removed
    }

    pub async fn contains(&self, uid: &str) -> bool {
        self.entries.read().await.contains_key(uid)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/* ============================= TESTS ============================= */
