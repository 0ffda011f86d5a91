//! Running Job record (spec §3). Owned exclusively by the Worker
//! Supervisor's `current_jobs` table.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Launching,
    Running,
    Draining,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RoomDescriptor {
    pub room_id: String,
    pub room_name: String,
    pub url: String,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct RunningJob {
    pub job_id: String,
    pub room: RoomDescriptor,
    pub accept_args: serde_json::Value,
    pub worker_id: String,
    pub state: JobState,
}

impl RunningJob {
    pub fn new(job_id: impl Into<String>, room: RoomDescriptor, worker_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            room,
            accept_args: serde_json::Value::Null,
            worker_id: worker_id.into(),
            state: JobState::Launching,
        }
    }
}
