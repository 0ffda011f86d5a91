//! Per-turn timeline events (spec §4.7), ported from the original's
//! `TimelineEvent` dataclass.

#[derive(Debug, Clone, serde::Serialize)]
pub struct TimelineEvent {
    pub event_type: String,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub duration_ms: Option<f64>,
    pub text: String,
}

impl TimelineEvent {
    pub fn new(event_type: impl Into<String>, start_time: f64) -> Self {
        Self {
            event_type: event_type.into(),
            start_time,
            end_time: None,
            duration_ms: None,
            text: String::new(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsTimelineEvent {
    pub event_type: String,
    pub start_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "durationInMs")]
    pub duration_ms: Option<f64>,
    pub text: String,
}

impl From<&TimelineEvent> for AnalyticsTimelineEvent {
    fn from(e: &TimelineEvent) -> Self {
        Self {
            event_type: e.event_type.clone(),
            start_time: e.start_time,
            end_time: e.end_time,
            duration_ms: e.duration_ms,
            text: e.text.clone(),
        }
    }
}
