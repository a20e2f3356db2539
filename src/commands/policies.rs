use anyhow::Context;
use kube::api::ListParams;
use kube::{Api, Client};

use kube_sweep::crd::GarbageCollectionPolicy;

pub async fn run() -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .context("Failed to connect to Kubernetes cluster. Is your kubeconfig valid?")?;

    let policies: Api<GarbageCollectionPolicy> = Api::all(client);
    let list = policies
        .list(&ListParams::default())
        .await
        .context("Failed to list GarbageCollectionPolicies. Is the CRD installed?")?;

    let mut rows: Vec<(String, String, String, String, String, String)> = list
        .into_iter()
        .map(|p| {
            let namespace = p.metadata.namespace.clone().unwrap_or_default();
            let name = p.metadata.name.clone().unwrap_or_default();
            let target = format!(
                "{}/{}",
                p.spec.target_resource.api_version, p.spec.target_resource.kind
            );
            let status = p.status.unwrap_or_default();
            let phase = status
                .phase
                .map(|phase| phase.as_str().to_string())
                .unwrap_or_else(|| "Unknown".to_string());
            let counts = format!(
                "{}/{}/{}",
                status.resources_matched.unwrap_or(0),
                status.resources_deleted.unwrap_or(0),
                status.resources_pending.unwrap_or(0)
            );
            let last_run = status.last_gc_run.unwrap_or_else(|| "never".to_string());
            (namespace, name, target, phase, counts, last_run)
        })
        .collect();

    rows.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    println!(
        "{:<16} {:<32} {:<24} {:<8} {:<18} {:<25}",
        "NAMESPACE", "NAME", "TARGET", "PHASE", "MATCH/DEL/PEND", "LAST GC RUN"
    );
    println!("{}", "-".repeat(125));

    for (namespace, name, target, phase, counts, last_run) in &rows {
        println!(
            "{:<16} {:<32} {:<24} {:<8} {:<18} {:<25}",
            namespace, name, target, phase, counts, last_run
        );
    }

    println!("\nTotal: {} policies", rows.len());

    Ok(())
}
