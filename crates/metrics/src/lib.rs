//! `voicecore-metrics` — Metrics & Trace Collector (C7): per-turn latency
//! tracking for both pipeline kinds, plus the analytics wire payload they
//! emit through `tracing`.

pub mod cascading;
pub mod realtime;
pub mod span_tree;
pub mod timeline;

pub use cascading::{CascadingMetricsCollector, CascadingTurn, ErrorSource};
pub use realtime::{RealtimeMetricsCollector, RealtimeTurn};
pub use span_tree::SessionSpans;
pub use timeline::TimelineEvent;
