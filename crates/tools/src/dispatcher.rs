//! Wires the exec/process tool pair into [`voicecore_providers::traits::ToolDispatcher`],
//! so the cascading pipeline's tool-call loop can invoke them without
//! knowing about `ProcessManager` directly. Grounded on
//! `crates/gateway/src/runtime/tools.rs`'s `build_tool_definitions` +
//! `dispatch_tool`, narrowed to the two tools this workspace still owns.

use std::sync::Arc;

use async_trait::async_trait;
use voicecore_domain::tool::ToolDefinition;
use voicecore_providers::traits::ToolDispatcher;

use crate::exec::{self, ExecRequest};
use crate::manager::ProcessManager;
use crate::process::{self, ProcessRequest};

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "exec".into(),
            description: "Run a shell command. Returns output or a background session ID.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Shell command to execute" },
                    "background": { "type": "boolean", "description": "Run in background" },
                    "workdir": { "type": "string", "description": "Working directory" },
                    "timeout_sec": { "type": "integer", "description": "Hard timeout in seconds" }
                },
                "required": ["command"]
            }),
        },
        ToolDefinition {
            name: "process".into(),
            description: "Manage background processes: list, poll, log, write, kill, remove.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["list", "poll", "log", "write", "kill", "clear", "remove"],
                        "description": "Action to perform"
                    },
                    "session_id": { "type": "string", "description": "Process session ID" },
                    "data": { "type": "string", "description": "Data to write to stdin" }
                },
                "required": ["action"]
            }),
        },
    ]
}

pub struct ProcessToolDispatcher {
    processes: Arc<ProcessManager>,
}

impl ProcessToolDispatcher {
    pub fn new(processes: Arc<ProcessManager>) -> Self {
        Self { processes }
    }
}

#[async_trait]
impl ToolDispatcher for ProcessToolDispatcher {
    async fn dispatch(&self, tool_name: &str, arguments: &serde_json::Value) -> (String, bool) {
        match tool_name {
            "exec" => {
                let req: ExecRequest = match serde_json::from_value(arguments.clone()) {
                    Ok(r) => r,
                    Err(e) => return (format!("invalid exec arguments: {e}"), true),
                };
                let resp = exec::exec(self.processes.as_ref(), req).await;
                (serde_json::to_string_pretty(&resp).unwrap_or_default(), false)
            }
            "process" => {
                let req: ProcessRequest = match serde_json::from_value(arguments.clone()) {
                    Ok(r) => r,
                    Err(e) => return (format!("invalid process arguments: {e}"), true),
                };
                let resp = process::handle_process(self.processes.as_ref(), req).await;
                (serde_json::to_string_pretty(&resp).unwrap_or_default(), false)
            }
            other => (format!("unknown tool: {other}"), true),
        }
    }
}
