//! Dispatcher and poller tests
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use ansigent::deploy::fsm::DeploymentStatus;
use ansigent::models::deployment::Deployment;
use ansigent::storage::deployments::DeploymentStore;
use ansigent::workers::dispatcher::{self, JobQueue};
use ansigent::workers::poller;

use crate::common::{template, Fixture};

async fn wait_terminal(fixture: &Fixture, id: &str) -> Deployment {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let record = fixture.store.get(id).await.unwrap();
        if record.status.is_terminal() {
            return record;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "deployment {} still {}",
            id,
            record.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dispatcher_runs_queued_deployments() {
    let fixture = Fixture::with_script("echo done").with_single_host();
    let (handle, worker) = dispatcher::channel(&dispatcher::Options {
        queue_capacity: 8,
        max_concurrent: 2,
    });
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(dispatcher::run(
        worker,
        fixture.engine.clone(),
        Box::pin(async move {
            let _ = stop_rx.await;
        }),
    ));

    let mut ids = Vec::new();
    for _ in 0..3 {
        let deployment = fixture.pending(&["web-1"]).await;
        assert!(handle.enqueue(&deployment.id).await.unwrap());
        ids.push(deployment.id);
    }

    for id in &ids {
        let record = wait_terminal(&fixture, id).await;
        assert_eq!(record.status, DeploymentStatus::Success);
        assert_eq!(record.command_output.as_deref(), Some("done\n"));
    }

    let _ = stop_tx.send(());
    task.await.unwrap();
}

#[tokio::test]
async fn test_enqueue_deduplicates_queued_ids() {
    let fixture = Fixture::with_script("exit 0").with_single_host();
    let (handle, _worker) = dispatcher::channel(&dispatcher::Options::default());
    let deployment = fixture.pending(&["web-1"]).await;

    assert!(handle.enqueue(&deployment.id).await.unwrap());
    assert!(!handle.enqueue(&deployment.id).await.unwrap());
}

#[tokio::test]
async fn test_enqueue_after_dispatcher_stopped_is_an_error() {
    let (handle, worker) = dispatcher::channel(&dispatcher::Options::default());
    drop(worker);
    assert!(handle.enqueue("dep-1").await.is_err());
    // the id is released again
    assert!(handle.enqueue("dep-1").await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_preflight_failure_reaches_failed_state() {
    let fixture = Fixture::with_script("exit 0").with_single_host();
    fixture.catalog.put_template(template(None, None));
    let (handle, worker) = dispatcher::channel(&dispatcher::Options::default());
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(dispatcher::run(
        worker,
        fixture.engine.clone(),
        Box::pin(async move {
            let _ = stop_rx.await;
        }),
    ));

    let deployment = fixture.pending(&["web-1"]).await;
    handle.enqueue(&deployment.id).await.unwrap();

    let record = wait_terminal(&fixture, &deployment.id).await;
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert!(record.command_output.unwrap().contains("No playbook"));
    assert_eq!(record.exit_code, None);

    let _ = stop_tx.send(());
    task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_poller_feeds_pending_deployments_to_dispatcher() {
    let fixture = Fixture::with_script("echo polled").with_single_host();
    let (handle, worker) = dispatcher::channel(&dispatcher::Options::default());
    let queue: Arc<dyn JobQueue> = Arc::new(handle);

    let (stop_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let mut dispatcher_rx = stop_tx.subscribe();
    let mut poller_rx = stop_tx.subscribe();

    let dispatcher_task = tokio::spawn(dispatcher::run(
        worker,
        fixture.engine.clone(),
        Box::pin(async move {
            let _ = dispatcher_rx.recv().await;
        }),
    ));

    // written directly to the store, as another process would
    let deployment = fixture.pending(&["web-1"]).await;

    let store: Arc<dyn DeploymentStore> = fixture.store.clone();
    let options = poller::Options {
        interval: Duration::from_millis(20),
        initial_delay: Duration::from_millis(1),
        ..Default::default()
    };
    let poller_task = tokio::spawn(async move {
        poller::run(
            &options,
            store,
            queue,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = poller_rx.recv().await;
            }),
        )
        .await;
    });

    let record = wait_terminal(&fixture, &deployment.id).await;
    assert_eq!(record.status, DeploymentStatus::Success);
    assert_eq!(record.command_output.as_deref(), Some("polled\n"));

    let _ = stop_tx.send(());
    poller_task.await.unwrap();
    dispatcher_task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_leaves_backlog_pending() {
    let fixture = Fixture::with_script("sleep 0.5; echo done").with_single_host();
    let (handle, worker) = dispatcher::channel(&dispatcher::Options {
        queue_capacity: 8,
        max_concurrent: 1,
    });
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(dispatcher::run(
        worker,
        fixture.engine.clone(),
        Box::pin(async move {
            let _ = stop_rx.await;
        }),
    ));

    let mut ids = Vec::new();
    for _ in 0..3 {
        let deployment = fixture.pending(&["web-1"]).await;
        assert!(handle.enqueue(&deployment.id).await.unwrap());
        ids.push(deployment.id);
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    let _ = stop_tx.send(());
    task.await.unwrap();

    // the attempt in flight ran to completion
    let first = fixture.store.get(&ids[0]).await.unwrap();
    assert_eq!(first.status, DeploymentStatus::Success);

    for id in &ids[1..] {
        let record = fixture.store.get(id).await.unwrap();
        assert_eq!(record.status, DeploymentStatus::Pending);
        assert!(record.started_at.is_none());
    }

    // released rather than reported as already queued
    assert!(handle.enqueue(&ids[1]).await.is_err());
}
