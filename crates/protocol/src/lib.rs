//! Registry wire protocol (spec §6): full-duplex, JSON messages, delivery
//! ordered per connection. Only non-null fields are serialized; unknown
//! inbound message types are logged and ignored by the registry client.
//!
//! This redesigns the teacher's `node-protocol` crate, which modeled a
//! different problem (remote-node tool dispatch, `WsMessage::ToolRequest`/
//! `ToolResponse`) — this protocol is worker registration and heartbeat, not
//! tool RPC, so the message set is built from spec §6 rather than reused.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Available,
    Draining,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobUpdateStatus {
    Running,
    Completed,
    Failed,
    Error,
}

/// Worker → Registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Register {
        #[serde(skip_serializing_if = "Option::is_none")]
        worker_id: Option<String>,
        agent_name: String,
        namespace: String,
        version: String,
        capabilities: Vec<String>,
        load_threshold: f64,
        max_processes: usize,
        token: String,
    },
    StatusUpdate {
        worker_id: String,
        agent_name: String,
        status: WorkerStatus,
        load: f64,
        job_count: usize,
    },
    AvailabilityResponse {
        job_id: String,
        available: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    JobUpdate {
        job_id: String,
        status: JobUpdateStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Ping {
        timestamp: i64,
    },
}

/// Registry → Worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Register {
        success: bool,
        worker_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    AvailabilityRequest {
        job_id: String,
        job_type: String,
        room_id: String,
        room_name: String,
        agent_name: String,
        namespace: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    JobAssignment {
        job_id: String,
        room_id: String,
        room_name: String,
        url: String,
        token: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_options: Option<serde_json::Value>,
    },
    JobTermination {
        job_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Pong {
        timestamp: i64,
    },
}

impl Inbound {
    /// Parse a registry frame, returning `None` (and letting the caller log)
    /// for unknown message types rather than failing the connection — spec
    /// §6: "Unknown message types are logged and ignored."
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_omits_null_worker_id() {
        let msg = Outbound::Register {
            worker_id: None,
            agent_name: "demo".into(),
            namespace: "default".into(),
            version: "1.0.0".into(),
            capabilities: vec![],
            load_threshold: 0.8,
            max_processes: 10,
            token: "tok".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(!json.as_object().unwrap().contains_key("worker_id"));
    }

    #[test]
    fn unknown_inbound_type_is_ignored_not_fatal() {
        assert!(Inbound::parse(r#"{"type":"some_future_message"}"#).is_none());
    }

    #[test]
    fn job_assignment_round_trips() {
        let raw = r#"{"type":"job_assignment","job_id":"j1","room_id":"r1","room_name":"demo","url":"wss://x","token":"t"}"#;
        let parsed = Inbound::parse(raw).unwrap();
        assert!(matches!(parsed, Inbound::JobAssignment { ref job_id, .. } if job_id == "j1"));
    }
}
