use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::operation_tracker::BackupOperation;
use crate::types::{JobInfo, JobStatus};

/// Bookkeeping for dump/restore jobs started over HTTP.
#[derive(Clone, Default)]
pub struct JobManager {
    jobs: Arc<RwLock<HashMap<String, JobInfo>>>,
}

impl JobManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_job(&self, operation: BackupOperation, target_name: &str) -> String {
        let started_at = Utc::now();
        let job_id = format!(
            "{}_{}_{}",
            operation,
            target_name,
            started_at.timestamp_millis()
        );

        let job_info = JobInfo {
            job_id: job_id.clone(),
            operation,
            target_name: target_name.to_string(),
            status: JobStatus::Running,
            started_at,
            completed_at: None,
            result: None,
            error_message: None,
        };

        self.jobs.write().await.insert(job_id.clone(), job_info);

        info!("Created job {}: {} for {}", job_id, operation, target_name);
        job_id
    }

    pub async fn complete_job(&self, job_id: &str, result: serde_json::Value) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
            job.result = Some(result);
            info!("Job {} completed successfully", job_id);
        }
    }

    pub async fn fail_job(&self, job_id: &str, error_message: String) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
            warn!("Job {} failed: {}", job_id, error_message);
            job.error_message = Some(error_message);
        }
    }

    pub async fn get_job_status(&self, job_id: &str) -> Option<JobInfo> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// Drops finished jobs that started more than `max_hours` ago.
    /// Running jobs are kept regardless of age.
    pub async fn cleanup_old_jobs(&self, max_hours: i64) -> u32 {
        let mut jobs = self.jobs.write().await;
        let cutoff = Utc::now() - chrono::Duration::hours(max_hours);
        let initial_count = jobs.len();

        jobs.retain(|_, job| job.status == JobStatus::Running || job.started_at > cutoff);

        let cleaned = initial_count - jobs.len();
        if cleaned > 0 {
            info!("Cleaned up {} old jobs older than {}h", cleaned, max_hours);
        }
        cleaned as u32
    }

    pub async fn get_running_jobs(&self) -> Vec<JobInfo> {
        self.jobs
            .read()
            .await
            .values()
            .filter(|job| job.status == JobStatus::Running)
            .cloned()
            .collect()
    }
}
