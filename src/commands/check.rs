use kube::api::ListParams;
use kube::{Api, Client};

use kube_sweep::crd::GarbageCollectionPolicy;

pub async fn run() -> anyhow::Result<()> {
    println!("Running cluster connectivity checks...\n");

    print!("  Kubeconfig .................. ");
    let client = match Client::try_default().await {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot load kubeconfig: {}", e);
        }
    };

    print!("  Cluster connection .......... ");
    let version = match client.apiserver_version().await {
        Ok(v) => {
            println!("OK (v{}.{})", v.major, v.minor);
            Some(v)
        }
        Err(e) => {
            println!("FAIL");
            println!("\n  Error: {}", e);
            println!("  Hint:  Is the cluster running? Check with: kubectl cluster-info\n");
            return Ok(());
        }
    };

    print!("  GarbageCollectionPolicy CRD . ");
    let policies: Api<GarbageCollectionPolicy> = Api::all(client.clone());
    match policies.list(&ListParams::default().limit(1)).await {
        Ok(_) => println!("OK"),
        Err(e) => {
            println!("FAIL ({})", e);
            println!("  Hint:  Install it with: kube-sweep crd install");
        }
    }

    print!("  Event create permission ..... ");
    match client
        .list_api_group_resources("events.k8s.io/v1")
        .await
    {
        Ok(_) => println!("OK"),
        Err(e) => println!("FAIL ({})", e),
    }

    if let Some(v) = version {
        println!("\n  Kubernetes version: {}.{}", v.major, v.minor);
    }

    println!("\nAll checks completed.");
    Ok(())
}
