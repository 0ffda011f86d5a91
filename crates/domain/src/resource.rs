//! Resource Pool data model (spec §3 "Resource"). An executor handles
//! exactly one task at a time; `status` and `load_pct` track that invariant.

use serde::{Deserialize, Serialize};

use crate::config::ExecutorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Initializing,
    Idle,
    Busy,
    ShuttingDown,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub resource_id: String,
    pub kind: ExecutorKind,
    pub status: ResourceStatus,
    /// 0 or 100 — exactly-one-task-at-a-time invariant (spec §3).
    pub load_pct: u8,
    pub memory_mb: Option<u64>,
    pub last_heartbeat: chrono::DateTime<chrono::Utc>,
    pub total_tasks: u64,
    pub errors: u64,
    pub successes: u64,
}

impl Resource {
    pub fn new(resource_id: impl Into<String>, kind: ExecutorKind) -> Self {
        Self {
            resource_id: resource_id.into(),
            kind,
            status: ResourceStatus::Initializing,
            load_pct: 0,
            memory_mb: None,
            last_heartbeat: chrono::Utc::now(),
            total_tasks: 0,
            errors: 0,
            successes: 0,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == ResourceStatus::Idle
    }

    pub fn mark_busy(&mut self) {
        self.status = ResourceStatus::Busy;
        self.load_pct = 100;
    }

    pub fn mark_idle(&mut self) {
        self.status = ResourceStatus::Idle;
        self.load_pct = 0;
        self.last_heartbeat = chrono::Utc::now();
    }
}

/// Task kind (spec §4.3). `Inference` tasks preferentially route to the
/// dedicated inference executor when one is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Job,
    Inference,
}

#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub task_type: TaskType,
    pub retry_count: u32,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self { task_type: TaskType::Job, retry_count: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}
