//! Per-target mutual exclusion
//!
//! Two dumps/restores of the same target would fight over the same source
//! directory and the same quarantine name, so only one operation may hold a
//! target at a time. Different targets never block each other.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupOperation {
    Dump,
    Restore,
}

impl fmt::Display for BackupOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupOperation::Dump => write!(f, "dump"),
            BackupOperation::Restore => write!(f, "restore"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveOperation {
    pub operation: BackupOperation,
    pub target_name: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationStatus {
    pub busy_targets: HashMap<String, ActiveOperation>,
    pub total_active: usize,
}

#[derive(Clone, Default)]
pub struct OperationTracker {
    active_operations: Arc<RwLock<HashMap<String, ActiveOperation>>>, // target_name -> operation
}

fn format_elapsed(since: DateTime<Utc>) -> String {
    let elapsed = Utc::now().signed_duration_since(since);
    if elapsed.num_hours() > 0 {
        format!("{}h {}m", elapsed.num_hours(), elapsed.num_minutes() % 60)
    } else {
        format!("{}m", elapsed.num_minutes())
    }
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `target_name`, failing if another operation holds it.
    #[instrument(skip(self, operation), fields(target = %target_name, operation = %operation))]
    pub async fn try_start_operation(
        &self,
        target_name: &str,
        operation: BackupOperation,
    ) -> Result<()> {
        let mut active = self.active_operations.write().await;

        if let Some(current) = active.get(target_name) {
            return Err(anyhow!(
                "Target {} is currently busy with '{}' (started {} ago)",
                target_name,
                current.operation,
                format_elapsed(current.started_at)
            ));
        }

        active.insert(
            target_name.to_string(),
            ActiveOperation {
                operation,
                target_name: target_name.to_string(),
                started_at: Utc::now(),
            },
        );
        info!("Started {} on {}", operation, target_name);
        Ok(())
    }

    #[instrument(skip(self), fields(target = %target_name))]
    pub async fn finish_operation(&self, target_name: &str) {
        let mut active = self.active_operations.write().await;
        if let Some(op) = active.remove(target_name) {
            info!(
                "Finished {} on {} (took {})",
                op.operation,
                target_name,
                format_elapsed(op.started_at)
            );
        }
    }

    pub async fn get_operation_status(&self) -> OperationStatus {
        let active = self.active_operations.read().await;
        OperationStatus {
            busy_targets: active.clone(),
            total_active: active.len(),
        }
    }

    pub async fn is_busy(&self, target_name: &str) -> bool {
        self.active_operations.read().await.contains_key(target_name)
    }

    /// Releases claims older than `max_hours`. A claim whose target
    /// `is_running` still reports as in progress is kept whatever its age:
    /// dumps and restores have no time limit.
    pub async fn cleanup_old_operations<F>(&self, max_hours: i64, is_running: F) -> u32
    where
        F: Fn(&str) -> bool,
    {
        let mut active = self.active_operations.write().await;
        let cutoff = Utc::now() - chrono::Duration::hours(max_hours);
        let initial_count = active.len();

        active.retain(|target_name, op| {
            let keep = op.started_at > cutoff || is_running(target_name);
            if !keep {
                warn!(
                    "Released stuck {} on {} (held for {})",
                    op.operation,
                    target_name,
                    format_elapsed(op.started_at)
                );
            }
            keep
        });

        (initial_count - active.len()) as u32
    }
}
