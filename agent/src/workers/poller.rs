//! Polling worker that queues pending deployments

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::DeployError;
use crate::storage::deployments::DeploymentStore;
use crate::utils::{calc_exp_backoff, CooldownOptions};
use crate::workers::dispatcher::JobQueue;

/// Poller worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Polling interval
    pub interval: Duration,

    /// Initial delay before first poll
    pub initial_delay: Duration,

    /// Backoff applied after failed polls
    pub cooldown: CooldownOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            initial_delay: Duration::from_secs(1),
            cooldown: CooldownOptions::default(),
        }
    }
}

/// Run the poller worker
pub async fn run<S, F>(
    options: &Options,
    store: Arc<dyn DeploymentStore>,
    queue: Arc<dyn JobQueue>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Poller worker starting...");

    let mut wait = options.initial_delay;
    let mut failures = 0u32;

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Poller worker shutting down...");
                return;
            }
            _ = sleep_fn(wait) => {}
        }

        match poll_once(store.as_ref(), queue.as_ref()).await {
            Ok(queued) => {
                if queued > 0 {
                    info!("Queued {} pending deployment(s)", queued);
                }
                failures = 0;
                wait = options.interval;
            }
            Err(e) => {
                wait = calc_exp_backoff(&options.cooldown, failures);
                failures = failures.saturating_add(1);
                error!("Polling for pending deployments failed, retrying in {:?}: {}", wait, e);
            }
        }
    }
}

/// Queue every pending deployment, oldest first. Returns how many were newly queued.
pub async fn poll_once(
    store: &dyn DeploymentStore,
    queue: &dyn JobQueue,
) -> Result<usize, DeployError> {
    let mut pending = store.list_by_status(DeploymentStatus::Pending).await?;
    pending.reverse();
    debug!("Found {} pending deployment(s)", pending.len());

    let mut queued = 0;
    for deployment in pending {
        if queue.enqueue(&deployment.id).await? {
            queued += 1;
        }
    }
    Ok(queued)
}
