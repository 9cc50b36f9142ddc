//! Finite State Machine for deployment status

use serde::{Deserialize, Serialize};

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// Created, waiting for a worker
    Pending,

    /// Claimed by the engine, command in progress
    Running,

    /// Process exited with code 0
    Success,

    /// Process exited non-zero, or the attempt aborted
    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(DeploymentStatus::Pending),
            "running" => Ok(DeploymentStatus::Running),
            "success" => Ok(DeploymentStatus::Success),
            "failed" => Ok(DeploymentStatus::Failed),
            _ => Err(format!("Invalid deployment status: {}", s)),
        }
    }
}

/// Deployment event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentEvent {
    /// The engine claimed the deployment
    Start,

    /// The process exited with the given code
    Exit(i32),

    /// The attempt aborted before or while running
    Abort,

    /// The job infrastructure gave up on the attempt
    InfrastructureFailure,
}

/// Compute the status that follows `status` on `event`.
///
/// Terminal states accept no event. `InfrastructureFailure` is the only way
/// to fail a deployment that never started.
pub fn transition(
    status: DeploymentStatus,
    event: DeploymentEvent,
) -> Result<DeploymentStatus, String> {
    match (status, event) {
        (DeploymentStatus::Pending, DeploymentEvent::Start) => Ok(DeploymentStatus::Running),
        (DeploymentStatus::Pending, DeploymentEvent::InfrastructureFailure) => {
            Ok(DeploymentStatus::Failed)
        }

        (DeploymentStatus::Running, DeploymentEvent::Exit(0)) => Ok(DeploymentStatus::Success),
        (DeploymentStatus::Running, DeploymentEvent::Exit(_)) => Ok(DeploymentStatus::Failed),
        (DeploymentStatus::Running, DeploymentEvent::Abort)
        | (DeploymentStatus::Running, DeploymentEvent::InfrastructureFailure) => {
            Ok(DeploymentStatus::Failed)
        }

        (state, event) => Err(format!("Invalid transition: {:?} -> {:?}", state, event)),
    }
}
