//! Job dispatcher for deployment attempts.
//!
//! Deployment ids are queued through a [`DispatchHandle`]; the worker runs each
//! one on the engine in its own task, with at most `max_concurrent` attempts in
//! flight. The next id is taken off the queue only when it can start. An id
//! already queued or running is not queued again. When an attempt returns an
//! error or panics, the engine's failure hook is invoked. The dispatcher never
//! retries.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::deploy::engine::{Engine, Outcome};
use crate::errors::DeployError;

/// Where the service layer sends deployment ids to be executed
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Queue `id`. Returns `false` when it is already queued or running.
    async fn enqueue(&self, id: &str) -> Result<bool, DeployError>;
}

/// Dispatcher worker options
#[derive(Debug, Clone)]
pub struct Options {
    pub queue_capacity: usize,
    pub max_concurrent: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_concurrent: 4,
        }
    }
}

type Tracked = Arc<Mutex<HashSet<String>>>;

fn untrack(tracked: &Tracked, id: &str) {
    tracked.lock().unwrap_or_else(|e| e.into_inner()).remove(id);
}

/// Sending half of the dispatcher queue
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<String>,
    tracked: Tracked,
}

#[async_trait]
impl JobQueue for DispatchHandle {
    async fn enqueue(&self, id: &str) -> Result<bool, DeployError> {
        {
            let mut tracked = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
            if !tracked.insert(id.to_string()) {
                debug!("Deployment {} already queued", id);
                return Ok(false);
            }
        }

        if self.tx.send(id.to_string()).await.is_err() {
            untrack(&self.tracked, id);
            return Err(DeployError::ShutdownError(
                "dispatcher is not accepting work".to_string(),
            ));
        }
        debug!("Queued deployment {}", id);
        Ok(true)
    }
}

/// Queue that accepts nothing; ids stay pending for a running agent's poller
#[derive(Debug, Clone, Copy, Default)]
pub struct Deferred;

#[async_trait]
impl JobQueue for Deferred {
    async fn enqueue(&self, id: &str) -> Result<bool, DeployError> {
        debug!("Deployment {} left pending", id);
        Ok(false)
    }
}

/// Receiving half of the dispatcher queue, consumed by [`run`]
pub struct Dispatcher {
    rx: mpsc::Receiver<String>,
    tracked: Tracked,
    max_concurrent: usize,
}

/// Create a dispatcher queue
pub fn channel(options: &Options) -> (DispatchHandle, Dispatcher) {
    let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
    let tracked: Tracked = Arc::new(Mutex::new(HashSet::new()));
    (
        DispatchHandle {
            tx,
            tracked: tracked.clone(),
        },
        Dispatcher {
            rx,
            tracked,
            max_concurrent: options.max_concurrent.max(1),
        },
    )
}

/// Run the dispatcher worker.
///
/// An id is taken off the queue only once a concurrency permit is free, so on
/// shutdown the ids still queued are left pending and only in-flight attempts
/// are awaited.
pub async fn run(
    dispatcher: Dispatcher,
    engine: Arc<Engine>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Dispatcher worker starting...");

    let Dispatcher {
        mut rx,
        tracked,
        max_concurrent,
    } = dispatcher;
    let permits = Arc::new(Semaphore::new(max_concurrent));
    let mut attempts = JoinSet::new();

    'dispatch: loop {
        let permit = tokio::select! {
            _ = &mut shutdown_signal => break 'dispatch,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break 'dispatch,
            },
            Some(_) = attempts.join_next(), if !attempts.is_empty() => continue 'dispatch,
        };

        tokio::select! {
            _ = &mut shutdown_signal => break 'dispatch,
            next = rx.recv() => match next {
                Some(id) => {
                    attempts.spawn(attempt(engine.clone(), permit, tracked.clone(), id));
                }
                None => {
                    debug!("Dispatcher queue closed");
                    break 'dispatch;
                }
            },
            // the permit goes back and is taken again on the next pass
            Some(_) = attempts.join_next(), if !attempts.is_empty() => {}
        }
    }
    info!("Dispatcher worker shutting down...");

    rx.close();
    while let Some(id) = rx.recv().await {
        debug!("Leaving deployment {} pending", id);
        untrack(&tracked, &id);
    }

    if !attempts.is_empty() {
        info!("Waiting for {} deployment attempt(s) to finish...", attempts.len());
    }
    while attempts.join_next().await.is_some() {}
}

async fn attempt(
    engine: Arc<Engine>,
    _permit: OwnedSemaphorePermit,
    tracked: Tracked,
    id: String,
) {
    let task = {
        let engine = engine.clone();
        let id = id.clone();
        tokio::spawn(async move { engine.execute(&id).await })
    };

    let failure = match task.await {
        Ok(Ok(Outcome::Completed { status, exit_code })) => {
            debug!("Deployment {} completed: {} ({})", id, status, exit_code);
            None
        }
        Ok(Ok(Outcome::Skipped(status))) => {
            debug!("Deployment {} skipped, already {}", id, status);
            None
        }
        Ok(Err(e)) => Some(e.to_string()),
        Err(e) => Some(format!("deployment attempt crashed: {}", e)),
    };

    if let Some(message) = failure {
        warn!("Deployment {} attempt failed: {}", id, message);
        if let Err(e) = engine.on_failure(&id, &message).await {
            error!("Failure hook for deployment {} failed: {}", id, e);
        }
    }

    untrack(&tracked, &id);
}
