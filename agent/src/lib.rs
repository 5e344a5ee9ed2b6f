//! Backup agent: dumps and restores named data directories through external
//! archiving tools, driven over an authenticated HTTP API.

pub mod backup;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod operation_tracker;
pub mod services;
pub mod types;

use axum::{
    routing::{get, post},
    Router,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::error;

use backup::{BackupTarget, BackupWorkflow};
use config::AgentConfig;
use operation_tracker::{BackupOperation, OperationTracker};
use services::job_manager::JobManager;

pub struct AppState {
    pub api_key: String,
    pub config: Arc<AgentConfig>,
    pub workflow: Arc<BackupWorkflow>,
    pub operation_tracker: OperationTracker,
    pub job_manager: JobManager,
}

impl AppState {
    pub fn new(config: AgentConfig, workflow: BackupWorkflow) -> Self {
        Self {
            api_key: config.api_key.clone(),
            config: Arc::new(config),
            workflow: Arc::new(workflow),
            operation_tracker: OperationTracker::new(),
            job_manager: JobManager::new(),
        }
    }

    pub fn resolve_target(&self, name: &str) -> Result<BackupTarget, String> {
        self.config
            .target(name)
            .ok_or_else(|| format!("Unknown backup target: {}", name))
    }

    /// Claims the target, records a job and runs `work` in the background.
    /// Returns the job id, or an error if the target is busy.
    pub async fn execute_async_operation<F, Fut>(
        &self,
        target_name: &str,
        operation: BackupOperation,
        work: F,
    ) -> Result<String, String>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        self.operation_tracker
            .try_start_operation(target_name, operation)
            .await
            .map_err(|e| e.to_string())?;

        let job_id = self.job_manager.create_job(operation, target_name).await;

        let job_manager = self.job_manager.clone();
        let operation_tracker = self.operation_tracker.clone();
        let target = target_name.to_string();
        let id = job_id.clone();

        tokio::spawn(async move {
            // A panic in `work` surfaces as a JoinError here, so the job is
            // still failed and the target released.
            match tokio::spawn(async move { work().await }).await {
                Ok(Ok(result)) => job_manager.complete_job(&id, result).await,
                Ok(Err(e)) => {
                    error!("{} of {} failed: {}", operation, target, e);
                    job_manager.fail_job(&id, e.to_string()).await;
                }
                Err(e) => {
                    error!("{} of {} aborted: {}", operation, target, e);
                    job_manager
                        .fail_job(&id, format!("{} aborted: {}", operation, e))
                        .await;
                }
            }
            operation_tracker.finish_operation(&target).await;
        });

        Ok(job_id)
    }

    pub async fn get_busy_status(&self) -> HashMap<String, String> {
        self.operation_tracker
            .get_operation_status()
            .await
            .busy_targets
            .into_iter()
            .map(|(target, op)| (target, op.operation.to_string()))
            .collect()
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/targets", get(handlers::list_targets))
        .route("/backup/dump", post(handlers::dump_async))
        .route("/backup/restore", post(handlers::restore_async))
        .route("/backup/excludes", post(handlers::exclude_args))
        .route("/job/{job_id}", get(handlers::get_job_status))
        .route("/operations/busy", get(handlers::get_busy_status))
        .route("/operations/cleanup", post(handlers::cleanup_operations))
        .with_state(state)
}
