use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::backup::{BackupTarget, Strategy};
use crate::operation_tracker::BackupOperation;

// === REQUEST STRUCTURES ===

#[derive(Debug, Deserialize)]
pub struct TargetRequest {
    pub target: String,
}

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    pub max_hours: Option<i64>,
}

// === RESPONSE STRUCTURES ===

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_status: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success_with_data(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            output: None,
            error: None,
            job_id: None,
            job_status: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            output: None,
            error: Some(message),
            job_id: None,
            job_status: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn success() -> Self {
        Self {
            success: true,
            data: None,
            output: None,
            error: None,
            job_id: None,
            job_status: None,
        }
    }

    pub fn success_with_job(job_id: String, job_status: String) -> Self {
        Self {
            success: true,
            data: None,
            output: None,
            error: None,
            job_id: Some(job_id),
            job_status: Some(job_status),
        }
    }
}

/// A configured target as reported by `GET /targets`.
#[derive(Debug, Clone, Serialize)]
pub struct TargetSummary {
    pub name: String,
    pub path: PathBuf,
    pub excludes: Vec<String>,
    pub strategy: Strategy,
}

impl From<&BackupTarget> for TargetSummary {
    fn from(target: &BackupTarget) -> Self {
        Self {
            name: target.name.clone(),
            path: target.source_path.clone(),
            excludes: target.exclude_patterns.clone(),
            strategy: target.strategy,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExcludeArgs {
    pub target: String,
    pub strategy: Strategy,
    pub args: Vec<String>,
}

// === JOB TRACKING ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub job_id: String,
    pub operation: BackupOperation,
    pub target_name: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
}
