//! HTTP request handlers

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use deploy_api::{
    CreateDeploymentRequest, DeploymentControlResponse, DeploymentListResponse,
    DeploymentResponse, DeploymentSummary, ErrorResponse, HealthResponse,
    RetryDeploymentRequest, StatsResponse, VersionResponse,
};
use serde::Deserialize;
use tracing::error;

use crate::errors::DeployError;
use crate::models::deployment::{Deployment, NewDeployment};
use crate::server::state::ServerState;
use crate::services::deployments::DeploymentStats;
use crate::utils::version_info;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 500;

/// A [`DeployError`] rendered as a JSON error response
pub struct ApiError(pub DeployError);

impl From<DeployError> for ApiError {
    fn from(err: DeployError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DeployError::NotFound(_) => StatusCode::NOT_FOUND,
            DeployError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
            DeployError::InvalidTransition(_) => StatusCode::CONFLICT,
            DeployError::ShutdownError(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
        }

        let body = ErrorResponse {
            error: self.0.to_string(),
            details: BTreeMap::new(),
        };
        (status, Json(body)).into_response()
    }
}

fn deployment_response(deployment: Deployment) -> DeploymentResponse {
    DeploymentResponse {
        id: deployment.id,
        task_template_id: deployment.task_template_id,
        environment_id: deployment.environment_id,
        user_id: deployment.user_id,
        targets: deployment.targets,
        status: deployment.status.to_string(),
        command_input: deployment.command_input,
        command_output: deployment.command_output,
        exit_code: deployment.exit_code,
        created_at: deployment.created_at,
        started_at: deployment.started_at,
        completed_at: deployment.completed_at,
    }
}

fn deployment_summary(deployment: &Deployment) -> DeploymentSummary {
    DeploymentSummary {
        id: deployment.id.clone(),
        task_template_id: deployment.task_template_id.clone(),
        status: deployment.status.to_string(),
        exit_code: deployment.exit_code,
        created_at: deployment.created_at,
        completed_at: deployment.completed_at,
    }
}

fn stats_response(stats: DeploymentStats) -> StatsResponse {
    StatsResponse {
        active_hosts: stats.active_hosts,
        total_deployments: stats.total,
        pending_deployments: stats.pending,
        running_deployments: stats.running,
        successful_deployments: stats.successful,
        failed_deployments: stats.failed,
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "ansigent".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

/// Latest deployments, newest first
pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DeploymentListResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let deployments = state.deployments.latest(limit).await?;

    Ok(Json(DeploymentListResponse {
        total: deployments.len(),
        deployments: deployments.iter().map(deployment_summary).collect(),
    }))
}

pub async fn create_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CreateDeploymentRequest>,
) -> Result<(StatusCode, Json<DeploymentResponse>), ApiError> {
    let deployment = state
        .deployments
        .create(NewDeployment {
            task_template_id: request.task_template_id,
            user_id: request.user_id,
            targets: request.targets,
            environment_id: request.environment_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(deployment_response(deployment))))
}

pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentResponse>, ApiError> {
    let deployment = state.deployments.get(&id).await?;
    Ok(Json(deployment_response(deployment)))
}

/// Queue a pending deployment
pub async fn execute_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentControlResponse>, ApiError> {
    let queued = state.deployments.execute_pending(&id).await?;
    let deployment = state.deployments.get(&id).await?;

    let message = if queued {
        "Deployment queued"
    } else {
        "Deployment not queued: it is not pending or already queued"
    };
    Ok(Json(DeploymentControlResponse {
        success: queued,
        deployment_id: id,
        status: deployment.status.to_string(),
        message: Some(message.to_string()),
    }))
}

/// Create a new deployment with the inputs of an existing one
pub async fn retry_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(request): Json<RetryDeploymentRequest>,
) -> Result<(StatusCode, Json<DeploymentResponse>), ApiError> {
    let deployment = state.deployments.retry(&id, Some(request.user_id)).await?;
    Ok((StatusCode::CREATED, Json(deployment_response(deployment))))
}

pub async fn stats_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.deployments.stats().await?;
    Ok(Json(stats_response(stats)))
}
