//! Execution engine: runs one deployment attempt end to end.
//!
//! An attempt claims the record (pending -> running), renders the inventory
//! (materializing credentials on the way), resolves the playbook, builds the
//! command and streams the child process output into the record until it
//! exits. Pre-flight failures abort the record and are returned to the caller.
//! Scratch files are purged whichever way the attempt ends.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::deploy::command::{build_command, CommandSpec};
use crate::deploy::fsm::DeploymentStatus;
use crate::deploy::inventory::{render_inventory, RenderedInventory};
use crate::deploy::playbook::{write_playbook, RenderedPlaybook};
use crate::deploy::process::{self, OutputBuffer};
use crate::deploy::scratch::ScratchSpace;
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::models::catalog::TemplateKind;
use crate::models::deployment::Deployment;
use crate::storage::catalog::Catalog;
use crate::storage::deployments::{Claim, DeploymentStore};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub scratch_dir: PathBuf,
    pub ansible_playbook_bin: String,
    pub shell: String,
    pub output_cap_bytes: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("ansigent"),
            ansible_playbook_bin: "ansible-playbook".to_string(),
            shell: "/bin/sh".to_string(),
            output_cap_bytes: 1024 * 1024,
        }
    }
}

/// How an invocation of [`Engine::execute`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The process ran and exited
    Completed {
        status: DeploymentStatus,
        exit_code: i32,
    },

    /// The record was not pending; nothing ran
    Skipped(DeploymentStatus),
}

pub struct Engine {
    store: Arc<dyn DeploymentStore>,
    catalog: Arc<dyn Catalog>,
    options: EngineOptions,
}

impl Engine {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        catalog: Arc<dyn Catalog>,
        options: EngineOptions,
    ) -> Self {
        Self {
            store,
            catalog,
            options,
        }
    }

    pub fn store(&self) -> &Arc<dyn DeploymentStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Run deployment `id`.
    ///
    /// Invoking this on a record that is not pending is a no-op returning
    /// [`Outcome::Skipped`]. A non-zero exit is a normal outcome; only failures
    /// before the process exits are returned as errors, after the record has
    /// been marked failed.
    pub async fn execute(&self, id: &str) -> Result<Outcome, DeployError> {
        let deployment = match self.store.claim(id, Utc::now()).await? {
            Claim::Claimed(deployment) => deployment,
            Claim::Skipped(status) => {
                info!("Deployment {} is {}, skipping", id, status);
                return Ok(Outcome::Skipped(status));
            }
        };
        info!("Executing deployment {}", id);

        let result = match ScratchSpace::open(Dir::new(&self.options.scratch_dir), id).await {
            Ok(mut scratch) => {
                let result = self.run_attempt(&deployment, &mut scratch).await;
                scratch.purge().await;
                result
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("Deployment {} aborted: {}", id, e);
                if let Err(store_err) = self.store.abort(id, e.to_string(), Utc::now()).await {
                    error!("Failed to record abort of deployment {}: {}", id, store_err);
                }
                Err(e)
            }
        }
    }

    /// Failure hook for the job infrastructure.
    ///
    /// Marks a pending or running record failed with `message` as its output.
    /// Terminal records are left untouched.
    pub async fn on_failure(&self, id: &str, message: &str) -> Result<(), DeployError> {
        match self.store.fail(id, message.to_string(), Utc::now()).await? {
            Some(_) => warn!("Deployment {} failed by infrastructure: {}", id, message),
            None => debug!("Deployment {} already terminal, failure ignored", id),
        }
        Ok(())
    }

    async fn run_attempt(
        &self,
        deployment: &Deployment,
        scratch: &mut ScratchSpace,
    ) -> Result<Outcome, DeployError> {
        let template = self
            .catalog
            .task_template(&deployment.task_template_id)
            .await?
            .ok_or_else(|| {
                DeployError::NotFound(format!("task template {}", deployment.task_template_id))
            })?;
        if template.kind == TemplateKind::Adhoc {
            debug!("Template {} is adhoc, running it as a playbook", template.id);
        }

        let environment = match &deployment.environment_id {
            Some(env_id) => Some(
                self.catalog
                    .environment(env_id)
                    .await?
                    .ok_or_else(|| DeployError::NotFound(format!("environment {}", env_id)))?,
            ),
            None => None,
        };

        let inventory = render_inventory(deployment, self.catalog.as_ref(), scratch).await?;
        let playbook = write_playbook(&template, scratch).await?;

        let built = build_command(&CommandSpec {
            program: &self.options.ansible_playbook_bin,
            inventory: &inventory.path,
            playbook: &playbook.path,
            extra_vars: template.extra_vars.as_ref(),
            env: environment.as_ref().map(|e| &e.variables),
        })?;

        self.store
            .save_command_input(&deployment.id, audit_input(&built.display, &inventory, &playbook))
            .await?;

        info!(
            "Deployment {} running against {} host(s): {}",
            deployment.id, inventory.host_count, built.display
        );
        let mut process = process::spawn(&self.options.shell, &built.command)?;

        let mut buffer = OutputBuffer::new(self.options.output_cap_bytes);
        while let Some(chunk) = process.next_chunk().await {
            buffer.push(&chunk);
            if let Err(e) = self.store.update_output(&deployment.id, buffer.text()).await {
                warn!("Failed to persist output of deployment {}: {}", deployment.id, e);
            }
        }

        let exit_code = process.wait().await?;
        let record = self
            .store
            .finalize(&deployment.id, exit_code, buffer.text(), Utc::now())
            .await?;

        info!(
            "Deployment {} finished: {} (exit code {})",
            deployment.id, record.status, exit_code
        );
        Ok(Outcome::Completed {
            status: record.status,
            exit_code,
        })
    }
}

/// The audit text saved as a deployment's command input
pub fn audit_input(
    display: &str,
    inventory: &RenderedInventory,
    playbook: &RenderedPlaybook,
) -> String {
    format!(
        "=== Command ===\n{}\n\n=== Inventory File ({}) ===\n{}\n\n=== Playbook File ({}) ===\n{}",
        display,
        inventory.path.display(),
        inventory.contents,
        playbook.path.display(),
        playbook.contents
    )
}
