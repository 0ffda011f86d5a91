//! `voicecore-pipeline` — Cascading Conversation Flow (C5) and Realtime
//! Pipeline (C6): the two turn-taking engines a job's entrypoint chooses
//! between at startup (spec §1 "Non-goals": a job runs exactly one).

pub mod background;
pub mod cancel;
pub mod cascading;
pub mod realtime;
pub mod segment;

pub use cascading::{Components, ConversationFlow, TurnState};
pub use realtime::RealtimePipeline;
