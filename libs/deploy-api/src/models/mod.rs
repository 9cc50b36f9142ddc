//! Agent API models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// A deployment as seen by API consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResponse {
    pub id: String,
    pub task_template_id: String,
    pub environment_id: Option<String>,
    pub user_id: String,
    pub targets: Vec<String>,
    pub status: String,
    pub command_input: Option<String>,
    pub command_output: Option<String>,
    pub exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Deployment list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentListResponse {
    pub deployments: Vec<DeploymentSummary>,
    pub total: usize,
}

/// Deployment summary (no audit blobs)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSummary {
    pub id: String,
    pub task_template_id: String,
    pub status: String,
    pub exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Create deployment request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDeploymentRequest {
    pub task_template_id: String,
    pub user_id: String,
    /// Host ids, or `["all"]`
    pub targets: Vec<String>,
    #[serde(default)]
    pub environment_id: Option<String>,
}

/// Retry request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryDeploymentRequest {
    pub user_id: String,
}

/// Deployment control response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentControlResponse {
    pub success: bool,
    pub deployment_id: String,
    pub status: String,
    pub message: Option<String>,
}

/// Dashboard counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsResponse {
    pub active_hosts: usize,
    pub total_deployments: usize,
    pub pending_deployments: usize,
    pub running_deployments: usize,
    pub successful_deployments: usize,
    pub failed_deployments: usize,
}

/// Error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}
