use serde::{Deserialize, Serialize};

/// Provider-agnostic tool call assembled from an LLM stream (spec §6
/// `LLM.Chat` contract: "function_call" chunks carry name/arguments/call_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition exposed to the LLM alongside the Chat Context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}
