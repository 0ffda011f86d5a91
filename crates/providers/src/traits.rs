//! Provider contracts (spec §6). Every plug-in implements exactly one of
//! these; none are implemented in this workspace — plug-ins are an
//! out-of-scope collaborator (spec §1).

use async_trait::async_trait;
use voicecore_domain::capability::LlmCapabilities;
use voicecore_domain::chat::ChatContext;
use voicecore_domain::error::Result;
use voicecore_domain::stream::{BoxStream, StreamEvent};
use voicecore_domain::tool::ToolDefinition;

// ── STT ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttEventKind {
    Start,
    Interim,
    Final,
    End,
}

#[derive(Debug, Clone)]
pub struct SttEvent {
    pub kind: SttEventKind,
    pub text: String,
    pub confidence: Option<f32>,
    pub language: Option<String>,
    pub start: Option<std::time::Duration>,
    pub end: Option<std::time::Duration>,
}

pub type SttCallback = Box<dyn Fn(SttEvent) + Send + Sync>;

#[async_trait]
pub trait Stt: Send + Sync {
    async fn process_audio(&self, pcm: &[u8]) -> Result<()>;
    fn on_transcript(&self, callback: SttCallback);
    async fn aclose(&self) -> Result<()>;
}

// ── LLM ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub context: ChatContext,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub model: Option<String>,
}

#[async_trait]
pub trait Llm: Send + Sync {
    /// Opens a streaming chat completion over the given context and tools
    /// (spec §4.5 "Response generation" step 1).
    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// Cancels whatever stream is currently open on this engine (barge-in,
    /// spec §4.5 step 4).
    async fn cancel_current(&self);

    fn capabilities(&self) -> &LlmCapabilities;
    fn provider_id(&self) -> &str;
    async fn aclose(&self) -> Result<()>;
}

// ── TTS ─────────────────────────────────────────────────────────────

pub type FirstByteCallback = Box<dyn Fn() + Send + Sync>;

#[async_trait]
pub trait Tts: Send + Sync {
    /// Synthesizes from a re-yielded text stream (spec §4.5's TTS consumer
    /// feeds segmented chunks, not the whole response, to cut first-audio
    /// latency), emitting PCM frames to the audio track as they're produced.
    async fn synthesize(&self, text: BoxStream<'static, String>, voice: Option<&str>) -> Result<()>;

    /// Drops the buffered audio track contents (barge-in, spec §4.5 step 4).
    async fn interrupt(&self) -> Result<()>;

    fn on_first_audio_byte(&self, callback: FirstByteCallback);
    /// Resets first-byte tracking; the callback fires at most once per
    /// `synthesize` call (spec §5 "TTS chunks" ordering guarantee).
    fn reset_first_audio_tracking(&self);

    async fn aclose(&self) -> Result<()>;
}

// ── Denoise ─────────────────────────────────────────────────────────

#[async_trait]
pub trait Denoise: Send + Sync {
    /// Strips noise from a PCM16 frame before it reaches STT/VAD (spec §4.5
    /// "Audio ingress").
    async fn process(&self, pcm: &[u8]) -> Result<Vec<u8>>;
    async fn aclose(&self) -> Result<()>;
}

// ── VAD ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEventKind {
    SpeechStart,
    SpeechEnd,
}

#[derive(Debug, Clone)]
pub struct VadEvent {
    pub kind: VadEventKind,
    pub confidence: f32,
    pub timestamp: std::time::Instant,
}

pub type VadCallback = Box<dyn Fn(VadEvent) + Send + Sync>;

#[async_trait]
pub trait Vad: Send + Sync {
    async fn process_audio(&self, pcm: &[u8]) -> Result<()>;
    fn on_event(&self, callback: VadCallback);
    async fn aclose(&self) -> Result<()>;
}

// ── EOU ─────────────────────────────────────────────────────────────

#[async_trait]
pub trait Eou: Send + Sync {
    /// Returns `true` if the user appears done speaking, given the agent's
    /// context extended with the accumulated transcript (spec §4.5).
    async fn detect_end_of_utterance(&self, context: &ChatContext, threshold: Option<f32>) -> Result<bool>;
    async fn get_eou_probability(&self, context: &ChatContext) -> Result<f32>;
    async fn aclose(&self) -> Result<()>;
}

// ── Realtime (C6) ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RealtimeToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[async_trait]
pub trait RealtimeModel: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn handle_audio_input(&self, pcm: &[u8]) -> Result<()>;
    async fn handle_video_input(&self, _frame: &[u8]) -> Result<()> {
        Ok(())
    }
    async fn send_message(&self, text: &str) -> Result<()>;
    async fn send_text_message(&self, text: &str) -> Result<()>;
    /// Reply to a provider-initiated tool call with its result (spec §4.6
    /// "execute tool calls the provider requests ... reply with
    /// `tool_response{id,result}`").
    async fn send_tool_response(&self, call_id: &str, result: &str, is_error: bool) -> Result<()>;
    async fn interrupt(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

// ── Tool dispatch ───────────────────────────────────────────────────

/// Backs the tool-call loop (spec §4.5 step 3): given a tool name and its
/// JSON arguments, runs it and reports back `(result_content, is_error)`,
/// mirroring the teacher's `runtime::tools::dispatch_tool` shape.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn dispatch(&self, tool_name: &str, arguments: &serde_json::Value) -> (String, bool);
}
