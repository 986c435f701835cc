use core::time::Duration;
use std::sync::Arc;

use quorum_lock::{store::etcd::EtcdStore, LockManager, LockManagerOptions, LockStore};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Each endpoint must be an independent etcd cluster.
    let endpoints: Vec<String> = std::env::args().skip(1).collect();
    let endpoints = if endpoints.is_empty() {
        vec![
            "http://localhost:2379".to_string(),
            "http://localhost:22379".to_string(),
            "http://localhost:32379".to_string(),
        ]
    } else {
        endpoints
    };

    let stores: Vec<Arc<dyn LockStore>> = endpoints
        .iter()
        .map(|addr| Arc::new(EtcdStore::new(addr.as_str(), [addr.as_str()], None)) as Arc<dyn LockStore>)
        .collect();
    let lock_manager =
        LockManager::new(stores, LockManagerOptions::default()).expect("invalid lock manager config");

    if !lock_manager.connect().await {
        eprintln!("some etcd endpoints are unreachable, continuing with the others");
    }

    let ttl = Duration::from_secs(5);
    let lock_name = "example-lock";

    let my_lock = lock_manager
        .lock(lock_name, ttl)
        .await
        .expect("invalid lock request")
        .expect("failed to lock");
    println!("Lock acquired in main task, valid for {:?}!", my_lock.validity());

    let lock_manager2 = lock_manager.clone();
    let h = tokio::spawn(async move {
        loop {
            match lock_manager2.lock(lock_name, ttl).await.expect("invalid lock request") {
                Some(lock) => {
                    println!("Lock acquired in task 2!");
                    lock_manager2.unlock(&lock).await;
                    break;
                }
                None => {
                    println!("task 2: lock is busy, retrying...");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    });

    let result = my_lock
        .scope(|| async {
            println!("Sleeping for 2 second...");
            for i in 1..=2 {
                println!("{}...", i);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        })
        .await;
    if let Err(e) = result {
        println!("{e}");
    }

    println!("Releasing lock!");
    lock_manager.unlock(&my_lock).await;

    println!("Waiting for task 2 to acquire lock...");
    h.await.expect("task 2 failed to acquire lock");
    println!("Finished!");
}
