//! Room interface (spec §6): the abstract media-transport contract required
//! by the pipelines. Room/SFU transport itself is an out-of-scope
//! collaborator (spec §1) — this crate specifies only the trait boundary.

use async_trait::async_trait;

use crate::audio::AudioFrame;
use crate::error::Result;

#[derive(Debug, Clone)]
pub enum RoomEvent {
    MeetingJoined,
    MeetingLeft,
    ParticipantJoined(String),
    ParticipantLeft(String),
    Error(String),
    StreamEnabled { stream: String, participant: String },
    StreamDisabled { stream: String, participant: String },
}

/// Writable audio egress track: `AddBytes` queues PCM for playback,
/// `Interrupt` drops whatever is currently buffered (used by barge-in).
#[async_trait]
pub trait AudioEgressTrack: Send + Sync {
    async fn add_bytes(&self, pcm: &[u8]) -> Result<()>;
    async fn interrupt(&self) -> Result<()>;
}

#[async_trait]
pub trait Room: Send + Sync {
    async fn join(&self) -> Result<()>;
    async fn leave(&self) -> Result<()>;
    async fn wait_for_participant(&self, id: Option<&str>) -> Result<String>;
    async fn subscribe(&self, topic: &str) -> Result<tokio::sync::mpsc::Receiver<serde_json::Value>>;
    async fn publish(&self, topic: &str, message: serde_json::Value) -> Result<()>;

    fn audio_egress(&self) -> std::sync::Arc<dyn AudioEgressTrack>;

    /// Read-only ingress stream of 20 ms PCM frames for a participant.
    fn audio_ingress(&self, participant: &str) -> tokio::sync::mpsc::Receiver<AudioFrame>;

    fn events(&self) -> tokio::sync::broadcast::Receiver<RoomEvent>;
}
