//! Deployment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::{transition, DeploymentEvent, DeploymentStatus};
use crate::errors::DeployError;
use crate::utils::generate_uuid;

/// Target id meaning "every active host at render time"
pub const ALL_TARGETS: &str = "all";

/// One execution attempt of a task template against a set of hosts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment ID
    pub id: String,

    /// Task template to run
    pub task_template_id: String,

    /// Optional environment variable set
    #[serde(default)]
    pub environment_id: Option<String>,

    /// Requesting user
    pub user_id: String,

    /// Host ids, or the `all` sentinel
    #[serde(default)]
    pub targets: Vec<String>,

    /// Current status
    pub status: DeploymentStatus,

    /// Rendered command and artifacts, for audit
    #[serde(default)]
    pub command_input: Option<String>,

    /// Accumulated process output, possibly partial
    #[serde(default)]
    pub command_output: Option<String>,

    #[serde(default)]
    pub exit_code: Option<i32>,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Inputs of a deployment, fixed at creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDeployment {
    pub task_template_id: String,
    pub user_id: String,
    pub targets: Vec<String>,
    #[serde(default)]
    pub environment_id: Option<String>,
}

impl Deployment {
    /// Create a pending deployment with a fresh id
    pub fn new(inputs: NewDeployment) -> Self {
        Self {
            id: generate_uuid(),
            task_template_id: inputs.task_template_id,
            environment_id: inputs.environment_id,
            user_id: inputs.user_id,
            targets: inputs.targets,
            status: DeploymentStatus::Pending,
            command_input: None,
            command_output: None,
            exit_code: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// The immutable inputs of this deployment
    pub fn inputs(&self) -> NewDeployment {
        NewDeployment {
            task_template_id: self.task_template_id.clone(),
            user_id: self.user_id.clone(),
            targets: self.targets.clone(),
            environment_id: self.environment_id.clone(),
        }
    }

    pub fn targets_all(&self) -> bool {
        self.targets.iter().any(|t| t == ALL_TARGETS)
    }

    /// pending -> running
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), DeployError> {
        self.apply(DeploymentEvent::Start)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// running -> success/failed from a process exit code
    pub fn complete(
        &mut self,
        exit_code: i32,
        output: String,
        now: DateTime<Utc>,
    ) -> Result<(), DeployError> {
        self.apply(DeploymentEvent::Exit(exit_code))?;
        self.exit_code = Some(exit_code);
        self.command_output = Some(output);
        self.completed_at = Some(now);
        Ok(())
    }

    /// running -> failed, before the process exited.
    ///
    /// `exit_code` stays `None`: no process produced one. A terminal record
    /// without an exit code therefore means the attempt never ran to exit.
    pub fn abort(&mut self, message: String, now: DateTime<Utc>) -> Result<(), DeployError> {
        self.apply(DeploymentEvent::Abort)?;
        self.command_output = Some(message);
        self.completed_at = Some(now);
        Ok(())
    }

    /// pending/running -> failed, reported by the job infrastructure.
    ///
    /// Like [`Deployment::abort`], leaves `exit_code` unset.
    pub fn fail_infrastructure(
        &mut self,
        message: String,
        now: DateTime<Utc>,
    ) -> Result<(), DeployError> {
        self.apply(DeploymentEvent::InfrastructureFailure)?;
        self.command_output = Some(message);
        self.completed_at = Some(now);
        Ok(())
    }

    fn apply(&mut self, event: DeploymentEvent) -> Result<(), DeployError> {
        self.status = transition(self.status, event).map_err(|e| {
            DeployError::InvalidTransition(format!("deployment {}: {}", self.id, e))
        })?;
        Ok(())
    }
}
