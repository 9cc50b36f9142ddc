//! Deployment service: the entry points used by the API, the CLI and workers

use std::sync::Arc;

use tracing::{info, warn};

use crate::deploy::engine::{Engine, Outcome};
use crate::deploy::fsm::DeploymentStatus;
use crate::errors::DeployError;
use crate::models::deployment::{Deployment, NewDeployment};
use crate::storage::catalog::Catalog;
use crate::storage::deployments::DeploymentStore;
use crate::workers::dispatcher::JobQueue;

pub const INTERRUPTED_MESSAGE: &str =
    "Deployment interrupted: the agent stopped while the deployment was running";

/// Dashboard counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeploymentStats {
    pub active_hosts: usize,
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub successful: usize,
    pub failed: usize,
}

pub struct DeploymentService {
    engine: Arc<Engine>,
    queue: Arc<dyn JobQueue>,
}

impl DeploymentService {
    pub fn new(engine: Arc<Engine>, queue: Arc<dyn JobQueue>) -> Self {
        Self { engine, queue }
    }

    /// The queue new deployments are sent to
    pub fn queue(&self) -> Arc<dyn JobQueue> {
        self.queue.clone()
    }

    fn store(&self) -> &dyn DeploymentStore {
        self.engine.store().as_ref()
    }

    fn catalog(&self) -> &dyn Catalog {
        self.engine.catalog().as_ref()
    }

    /// Record a new pending deployment and queue it.
    ///
    /// The template and environment must exist. If the queue refuses the id
    /// the record stays pending for the poller.
    pub async fn create(&self, inputs: NewDeployment) -> Result<Deployment, DeployError> {
        if self.catalog().task_template(&inputs.task_template_id).await?.is_none() {
            return Err(DeployError::NotFound(format!(
                "task template {}",
                inputs.task_template_id
            )));
        }
        if let Some(env_id) = &inputs.environment_id {
            if self.catalog().environment(env_id).await?.is_none() {
                return Err(DeployError::NotFound(format!("environment {}", env_id)));
            }
        }

        let deployment = Deployment::new(inputs);
        self.store().insert(&deployment).await?;
        info!(
            "Created deployment {} of template {} for user {}",
            deployment.id, deployment.task_template_id, deployment.user_id
        );

        if let Err(e) = self.queue.enqueue(&deployment.id).await {
            warn!("Deployment {} left pending: {}", deployment.id, e);
        }
        Ok(deployment)
    }

    /// Queue an existing deployment. Returns `false` unless it is pending and
    /// was not already queued.
    pub async fn execute_pending(&self, id: &str) -> Result<bool, DeployError> {
        let deployment = self.store().get(id).await?;
        if deployment.status != DeploymentStatus::Pending {
            info!("Deployment {} is {}, not queued", id, deployment.status);
            return Ok(false);
        }
        self.queue.enqueue(id).await
    }

    /// Create and queue a new deployment with the inputs of `id`.
    ///
    /// The original record is left untouched.
    pub async fn retry(&self, id: &str, user_id: Option<String>) -> Result<Deployment, DeployError> {
        let original = self.store().get(id).await?;
        let mut inputs = original.inputs();
        if let Some(user_id) = user_id {
            inputs.user_id = user_id;
        }
        let retried = self.create(inputs).await?;
        info!("Deployment {} retried as {}", id, retried.id);
        Ok(retried)
    }

    /// Run a deployment in the current task, bypassing the queue
    pub async fn run_now(&self, id: &str) -> Result<Outcome, DeployError> {
        match self.engine.execute(id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.engine.on_failure(id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    pub async fn get(&self, id: &str) -> Result<Deployment, DeployError> {
        self.store().get(id).await
    }

    /// The `limit` most recently created deployments
    pub async fn latest(&self, limit: usize) -> Result<Vec<Deployment>, DeployError> {
        let mut deployments = self.store().list().await?;
        deployments.truncate(limit);
        Ok(deployments)
    }

    pub async fn stats(&self) -> Result<DeploymentStats, DeployError> {
        let deployments = self.store().list().await?;
        let count =
            |status: DeploymentStatus| deployments.iter().filter(|d| d.status == status).count();

        Ok(DeploymentStats {
            active_hosts: self.catalog().active_hosts().await?.len(),
            total: deployments.len(),
            pending: count(DeploymentStatus::Pending),
            running: count(DeploymentStatus::Running),
            successful: count(DeploymentStatus::Success),
            failed: count(DeploymentStatus::Failed),
        })
    }

    /// Fail every deployment left running by a previous agent process.
    ///
    /// Must only be called before the dispatcher starts. Returns the ids failed.
    pub async fn recover_orphans(&self) -> Result<Vec<String>, DeployError> {
        let running = self.store().list_by_status(DeploymentStatus::Running).await?;
        let mut recovered = Vec::with_capacity(running.len());
        for deployment in running {
            warn!("Deployment {} was interrupted, marking failed", deployment.id);
            self.engine
                .on_failure(&deployment.id, INTERRUPTED_MESSAGE)
                .await?;
            recovered.push(deployment.id);
        }
        if !recovered.is_empty() {
            info!("Recovered {} interrupted deployment(s)", recovered.len());
        }
        Ok(recovered)
    }
}
