//! HTTP request handlers for the agent server

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::Json as ResponseJson,
};
use std::collections::HashSet;
use std::sync::Arc;

use crate::middleware::ApiKeyAuth;
use crate::operation_tracker::BackupOperation;
use crate::types::*;
use crate::AppState;

type HandlerResult<T> = Result<ResponseJson<ApiResponse<T>>, StatusCode>;

// === Target handlers ===

pub async fn list_targets(
    _auth: ApiKeyAuth,
    State(state): State<Arc<AppState>>,
) -> HandlerResult<Vec<TargetSummary>> {
    let targets = state
        .config
        .targets
        .keys()
        .filter_map(|name| state.config.target(name))
        .map(|target| TargetSummary::from(&target))
        .collect();

    Ok(ResponseJson(ApiResponse::success_with_data(targets)))
}

pub async fn exclude_args(
    _auth: ApiKeyAuth,
    State(state): State<Arc<AppState>>,
    Json(request): Json<TargetRequest>,
) -> HandlerResult<ExcludeArgs> {
    match state.resolve_target(&request.target) {
        Ok(target) => Ok(ResponseJson(ApiResponse::success_with_data(ExcludeArgs {
            args: target.exclude_args(),
            target: target.name,
            strategy: target.strategy,
        }))),
        Err(err) => Ok(ResponseJson(ApiResponse::error(err))),
    }
}

// === Async operation handlers ===

pub async fn dump_async(
    _auth: ApiKeyAuth,
    State(state): State<Arc<AppState>>,
    Json(request): Json<TargetRequest>,
) -> HandlerResult<()> {
    let target = match state.resolve_target(&request.target) {
        Ok(target) => target,
        Err(err) => return Ok(ResponseJson(ApiResponse::error(err))),
    };

    let workflow = state.workflow.clone();
    let name = target.name.clone();
    match state
        .execute_async_operation(&name, BackupOperation::Dump, move || async move {
            workflow.dump(&target).await?;
            Ok(serde_json::json!({
                "operation": "dump",
                "target": target.name,
                "strategy": target.strategy,
            }))
        })
        .await
    {
        Ok(job_id) => Ok(ResponseJson(ApiResponse::success_with_job(
            job_id,
            "started".to_string(),
        ))),
        Err(err) => Ok(ResponseJson(ApiResponse::error(err))),
    }
}

pub async fn restore_async(
    _auth: ApiKeyAuth,
    State(state): State<Arc<AppState>>,
    Json(request): Json<TargetRequest>,
) -> HandlerResult<()> {
    let target = match state.resolve_target(&request.target) {
        Ok(target) => target,
        Err(err) => return Ok(ResponseJson(ApiResponse::error(err))),
    };

    let workflow = state.workflow.clone();
    let name = target.name.clone();
    match state
        .execute_async_operation(&name, BackupOperation::Restore, move || async move {
            workflow.restore(&target).await?;
            Ok(serde_json::json!({
                "operation": "restore",
                "target": target.name,
                "strategy": target.strategy,
            }))
        })
        .await
    {
        Ok(job_id) => Ok(ResponseJson(ApiResponse::success_with_job(
            job_id,
            "started".to_string(),
        ))),
        Err(err) => Ok(ResponseJson(ApiResponse::error(err))),
    }
}

// === Job status handlers ===

pub async fn get_job_status(
    _auth: ApiKeyAuth,
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> HandlerResult<()> {
    match state.job_manager.get_job_status(&job_id).await {
        Some(job_info) => {
            let mut response = ApiResponse::success();
            response.job_id = Some(job_info.job_id);
            response.job_status = Some(format!("{:?}", job_info.status));

            match job_info.status {
                JobStatus::Completed => {
                    response.output = job_info.result.map(|result| result.to_string());
                }
                JobStatus::Failed => {
                    response.success = false;
                    response.error = job_info.error_message;
                }
                JobStatus::Running => {
                    response.output = Some("Operation still running".to_string());
                }
            }

            Ok(ResponseJson(response))
        }
        None => Ok(ResponseJson(ApiResponse::error(format!(
            "Job {} not found",
            job_id
        )))),
    }
}

// === Status handlers ===

pub async fn get_busy_status(
    _auth: ApiKeyAuth,
    State(state): State<Arc<AppState>>,
) -> HandlerResult<serde_json::Value> {
    let busy_status = state.get_busy_status().await;
    let running_jobs = state.job_manager.get_running_jobs().await;

    Ok(ResponseJson(ApiResponse::success_with_data(serde_json::json!({
        "busy_targets": busy_status,
        "total_busy": busy_status.len(),
        "running_jobs": running_jobs.len(),
    }))))
}

pub async fn cleanup_operations(
    _auth: ApiKeyAuth,
    State(state): State<Arc<AppState>>,
    Json(request): Json<CleanupRequest>,
) -> HandlerResult<serde_json::Value> {
    let max_hours = request.max_hours.unwrap_or(12);

    let running: HashSet<String> = state
        .job_manager
        .get_running_jobs()
        .await
        .into_iter()
        .map(|job| job.target_name)
        .collect();
    let cleaned_operations = state
        .operation_tracker
        .cleanup_old_operations(max_hours, |target| running.contains(target))
        .await;
    let cleaned_jobs = state.job_manager.cleanup_old_jobs(max_hours).await;

    Ok(ResponseJson(ApiResponse::success_with_data(serde_json::json!({
        "cleaned_operations": cleaned_operations,
        "cleaned_jobs": cleaned_jobs,
        "max_hours": max_hours,
    }))))
}
