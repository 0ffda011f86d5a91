//! Chat Context: the ordered conversation record shared by the cascading
//! and realtime pipelines. Single-writer (the Conversation Flow task), no
//! locking required per-context.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Text or an image reference. Images carry a data-url/ref rather than raw
/// bytes; encoding is a provider concern (§6, out of scope here).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.clone()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: MessageContent,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Set true if generation was cut short by barge-in; the partial text is
    /// still recorded (spec §4.5 barge-in step 6).
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments, as emitted by the LLM stream.
    pub arguments: String,
    pub call_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallOutput {
    pub id: String,
    pub name: String,
    pub call_id: String,
    pub output: String,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatItem {
    Message(ChatMessage),
    FunctionCall(FunctionCall),
    FunctionCallOutput(FunctionCallOutput),
}

impl ChatItem {
    pub fn id(&self) -> &str {
        match self {
            ChatItem::Message(m) => &m.id,
            ChatItem::FunctionCall(c) => &c.id,
            ChatItem::FunctionCallOutput(o) => &o.id,
        }
    }
}

/// Ordered sequence of chat items. Invariants (spec §3, testable property #3):
/// a `FunctionCallOutput`'s `call_id` must match an earlier `FunctionCall` in
/// the same context; truncation preserves at most one leading System Message
/// and never leaves a `FunctionCallOutput` without its `FunctionCall`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatContext {
    items: Vec<ChatItem>,
}

impl ChatContext {
    pub fn empty() -> Self {
        Self { items: Vec::new() }
    }

    pub fn items(&self) -> &[ChatItem] {
        &self.items
    }

    pub fn add_message(&mut self, role: Role, content: MessageContent) -> &ChatMessage {
        let message = ChatMessage {
            id: format!("msg_{}", Uuid::new_v4()),
            role,
            content,
            created_at: chrono::Utc::now(),
            interrupted: false,
        };
        self.items.push(ChatItem::Message(message));
        match self.items.last().unwrap() {
            ChatItem::Message(m) => m,
            _ => unreachable!(),
        }
    }

    pub fn add_function_call(&mut self, name: impl Into<String>, arguments: impl Into<String>, call_id: impl Into<String>) -> &FunctionCall {
        let call = FunctionCall {
            id: format!("call_{}", Uuid::new_v4()),
            name: name.into(),
            arguments: arguments.into(),
            call_id: call_id.into(),
        };
        self.items.push(ChatItem::FunctionCall(call));
        match self.items.last().unwrap() {
            ChatItem::FunctionCall(c) => c,
            _ => unreachable!(),
        }
    }

    pub fn add_function_output(
        &mut self,
        name: impl Into<String>,
        call_id: impl Into<String>,
        output: impl Into<String>,
        is_error: bool,
    ) -> &FunctionCallOutput {
        let out = FunctionCallOutput {
            id: format!("output_{}", Uuid::new_v4()),
            name: name.into(),
            call_id: call_id.into(),
            output: output.into(),
            is_error,
        };
        self.items.push(ChatItem::FunctionCallOutput(out));
        match self.items.last().unwrap() {
            ChatItem::FunctionCallOutput(o) => o,
            _ => unreachable!(),
        }
    }

    pub fn get_by_id(&self, id: &str) -> Option<&ChatItem> {
        self.items.iter().find(|item| item.id() == id)
    }

    /// Filtered clone. `tools` restricts function calls/outputs to the given
    /// set of tool names when provided (mirrors the Python original's
    /// `copy(tools=...)`, used when replaying context against a narrowed
    /// tool set after a hot-swap).
    pub fn copy(
        &self,
        exclude_function_calls: bool,
        exclude_system_messages: bool,
        tools: Option<&[String]>,
    ) -> ChatContext {
        let items = self
            .items
            .iter()
            .filter(|item| {
                if exclude_function_calls
                    && matches!(item, ChatItem::FunctionCall(_) | ChatItem::FunctionCallOutput(_))
                {
                    return false;
                }
                if exclude_system_messages {
                    if let ChatItem::Message(m) = item {
                        if m.role == Role::System {
                            return false;
                        }
                    }
                }
                if let Some(tools) = tools {
                    let name = match item {
                        ChatItem::FunctionCall(c) => Some(&c.name),
                        ChatItem::FunctionCallOutput(o) => Some(&o.name),
                        ChatItem::Message(_) => None,
                    };
                    if let Some(name) = name {
                        if !tools.iter().any(|t| t == name) {
                            return false;
                        }
                    }
                }
                true
            })
            .cloned()
            .collect();
        ChatContext { items }
    }

    /// Truncate to the last `max_items`, preserving at most one leading
    /// System Message and never leaving an orphaned `FunctionCallOutput`.
    ///
    /// Strengthens the ported Python original (`chat_context.py::truncate`),
    /// which only strips items from the *front* of the slice, which can
    /// leave a `FunctionCallOutput` orphaned elsewhere in the slice if its
    /// matching `FunctionCall` fell just outside the `max_items` window. This
    /// does a full forward scan after slicing instead.
    pub fn truncate(&mut self, max_items: usize) {
        let system_msg = self
            .items
            .iter()
            .find(|item| matches!(item, ChatItem::Message(m) if m.role == Role::System))
            .cloned();

        let start = self.items.len().saturating_sub(max_items);
        let mut new_items: Vec<ChatItem> = self.items[start..].to_vec();

        while matches!(
            new_items.first(),
            Some(ChatItem::FunctionCall(_)) | Some(ChatItem::FunctionCallOutput(_))
        ) {
            new_items.remove(0);
        }

        let live_call_ids: std::collections::HashSet<&str> = new_items
            .iter()
            .filter_map(|item| match item {
                ChatItem::FunctionCall(c) => Some(c.call_id.as_str()),
                _ => None,
            })
            .collect();
        new_items.retain(|item| match item {
            ChatItem::FunctionCallOutput(o) => live_call_ids.contains(o.call_id.as_str()),
            _ => true,
        });

        if let Some(system_msg) = system_msg {
            let already_present = new_items.iter().any(|i| i.id() == system_msg.id());
            if !already_present {
                new_items.insert(0, system_msg);
            }
        }

        self.items = new_items;
    }

    /// Drop large payloads to free memory promptly at job end; mirrors the
    /// Python original's `cleanup()`.
    pub fn cleanup(&mut self) {
        tracing::info!(items = self.items.len(), "clearing chat context");
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(items: Vec<ChatItem>) -> ChatContext {
        ChatContext { items }
    }

    fn sys() -> ChatItem {
        ChatItem::Message(ChatMessage {
            id: "sys1".into(),
            role: Role::System,
            content: MessageContent::Text("you are an agent".into()),
            created_at: chrono::Utc::now(),
            interrupted: false,
        })
    }

    fn user(id: &str, text: &str) -> ChatItem {
        ChatItem::Message(ChatMessage {
            id: id.into(),
            role: Role::User,
            content: MessageContent::Text(text.into()),
            created_at: chrono::Utc::now(),
            interrupted: false,
        })
    }

    fn call(id: &str, call_id: &str) -> ChatItem {
        ChatItem::FunctionCall(FunctionCall {
            id: id.into(),
            name: "get_weather".into(),
            arguments: "{}".into(),
            call_id: call_id.into(),
        })
    }

    fn output(id: &str, call_id: &str) -> ChatItem {
        ChatItem::FunctionCallOutput(FunctionCallOutput {
            id: id.into(),
            name: "get_weather".into(),
            call_id: call_id.into(),
            output: "11C".into(),
            is_error: false,
        })
    }

    #[test]
    fn truncate_preserves_leading_system_message() {
        let mut ctx = ctx_with(vec![
            sys(),
            user("u1", "hi"),
            user("u2", "again"),
            user("u3", "third"),
        ]);
        ctx.truncate(2);
        assert!(matches!(ctx.items()[0], ChatItem::Message(ref m) if m.role == Role::System));
        assert_eq!(ctx.items().len(), 3);
    }

    #[test]
    fn truncate_never_leaves_orphaned_output() {
        // call falls outside the window, output would fall inside it.
        let mut ctx = ctx_with(vec![sys(), call("c1", "cid1"), user("u1", "hi"), output("o1", "cid1")]);
        ctx.truncate(2);
        assert!(ctx
            .items()
            .iter()
            .all(|i| !matches!(i, ChatItem::FunctionCallOutput(_))));
    }

    #[test]
    fn round_trip_serialization() {
        let ctx = ctx_with(vec![sys(), user("u1", "hi"), call("c1", "cid1"), output("o1", "cid1")]);
        let json = serde_json::to_string(&ctx).unwrap();
        let back: ChatContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back.items().len(), ctx.items().len());
        for (a, b) in ctx.items().iter().zip(back.items().iter()) {
            assert_eq!(a.id(), b.id());
        }
    }
}
