//! Cascading pipeline metrics (spec §4.7), ported from
//! `cascading_metrics_collector.py` / `models.py`'s `CascadingTurnData` +
//! `CascadingMetricsData`. Clocked against an internal monotonic epoch
//! (`Instant`) rather than wall time, matching the original's
//! `time.perf_counter()` usage.

use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

use crate::timeline::{AnalyticsTimelineEvent, TimelineEvent};

/// One user-agent turn's full metrics record (spec §3 "Turn (Cascading)").
#[derive(Debug, Clone, Default)]
pub struct CascadingTurn {
    pub user_speech_start_time: Option<f64>,
    pub user_speech_end_time: Option<f64>,

    pub stt_start_time: Option<f64>,
    pub stt_end_time: Option<f64>,
    pub stt_latency: Option<f64>,

    pub llm_start_time: Option<f64>,
    pub llm_end_time: Option<f64>,
    pub llm_latency: Option<f64>,

    pub tts_start_time: Option<f64>,
    pub tts_end_time: Option<f64>,
    pub tts_latency: Option<f64>,
    pub ttfb: Option<f64>,

    pub eou_start_time: Option<f64>,
    pub eou_end_time: Option<f64>,
    pub eou_latency: Option<f64>,

    pub function_tool_timestamps: Vec<FunctionToolTimestamp>,
    pub function_tools_called: Vec<String>,

    pub e2e_latency: Option<f64>,
    pub interrupted: bool,
    pub system_instructions: String,

    pub llm_provider_class: String,
    pub llm_model_name: String,
    pub stt_provider_class: String,
    pub stt_model_name: String,
    pub tts_provider_class: String,
    pub tts_model_name: String,
    pub vad_provider_class: String,
    pub vad_model_name: String,
    pub eou_provider_class: String,
    pub eou_model_name: String,

    pub timeline: Vec<TimelineEvent>,
    pub errors: Vec<TurnError>,
    /// Present on every Turn record but only emitted in analytics payloads
    /// when true (spec §3 "SUPPLEMENT" a2a bookkeeping fields).
    pub is_a2a_enabled: bool,
    pub handoff_occurred: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionToolTimestamp {
    pub tool_name: String,
    pub timestamp: f64,
}

/// Provider error tagged by source component (spec §4.5 failure semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    Stt,
    Llm,
    Tts,
    Vad,
    TurnDetector,
}

impl ErrorSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorSource::Stt => "STT",
            ErrorSource::Llm => "LLM",
            ErrorSource::Tts => "TTS",
            ErrorSource::Vad => "VAD",
            ErrorSource::TurnDetector => "TURN-D",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnError {
    pub source: String,
    pub message: String,
    pub timestamp: f64,
}

/// Analytics wire payload (spec §4.7 camelCase transform + field omission).
/// Fields the original always strips (`errors`, per-engine start/end times,
/// `is_a2a_enabled`, `interactionId`, `timestamp`) are simply absent from
/// this type rather than deleted at emit time — the idiomatic Rust
/// equivalent of the Python's imperative dict-key removal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsCascadingTurn {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_speech_start_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_speech_end_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_latency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_latency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_latency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttfb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eou_latency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e2e_latency: Option<f64>,
    pub interrupted: bool,
    pub function_tools_called: Vec<String>,
    pub timeline: Vec<AnalyticsTimelineEvent>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "handOffOccurred")]
    pub handoff_occurred: Option<bool>,
    // Provider/instruction fields: only present on turn #1 (spec §4.7).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_provider_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_provider_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_provider_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_model_name: Option<String>,
}

impl CascadingTurn {
    fn to_analytics_payload(&self, is_first_turn: bool) -> AnalyticsCascadingTurn {
        AnalyticsCascadingTurn {
            user_speech_start_time: self.user_speech_start_time,
            user_speech_end_time: self.user_speech_end_time,
            stt_latency: self.stt_latency,
            llm_latency: self.llm_latency,
            tts_latency: self.tts_latency,
            ttfb: self.ttfb,
            eou_latency: self.eou_latency,
            e2e_latency: self.e2e_latency,
            interrupted: self.interrupted,
            function_tools_called: self.function_tools_called.clone(),
            timeline: self.timeline.iter().map(AnalyticsTimelineEvent::from).collect(),
            handoff_occurred: self.is_a2a_enabled.then_some(self.handoff_occurred),
            system_instructions: is_first_turn.then(|| self.system_instructions.clone()),
            llm_provider_class: is_first_turn.then(|| self.llm_provider_class.clone()),
            llm_model_name: is_first_turn.then(|| self.llm_model_name.clone()),
            stt_provider_class: is_first_turn.then(|| self.stt_provider_class.clone()),
            stt_model_name: is_first_turn.then(|| self.stt_model_name.clone()),
            tts_provider_class: is_first_turn.then(|| self.tts_provider_class.clone()),
            tts_model_name: is_first_turn.then(|| self.tts_model_name.clone()),
        }
    }
}

struct State {
    session_id: Option<String>,
    system_instructions: String,
    total_interruptions: u64,
    total_turns: u64,
    current_turn: Option<CascadingTurn>,
    pending_user_start_time: Option<f64>,

    user_input_start_time: Option<f64>,
    user_speech_end_time: Option<f64>,
    agent_speech_start_time: Option<f64>,
    is_agent_speaking: bool,
    is_user_speaking: bool,

    stt_start_time: Option<f64>,
    llm_start_time: Option<f64>,
    tts_start_time: Option<f64>,
    tts_first_byte_time: Option<f64>,
    eou_start_time: Option<f64>,

    llm_provider_class: String,
    llm_model_name: String,
    stt_provider_class: String,
    stt_model_name: String,
    tts_provider_class: String,
    tts_model_name: String,
    vad_provider_class: String,
    vad_model_name: String,
    eou_provider_class: String,
    eou_model_name: String,
}

impl Default for State {
    fn default() -> Self {
        Self {
            session_id: None,
            system_instructions: String::new(),
            total_interruptions: 0,
            total_turns: 0,
            current_turn: None,
            pending_user_start_time: None,
            user_input_start_time: None,
            user_speech_end_time: None,
            agent_speech_start_time: None,
            is_agent_speaking: false,
            is_user_speaking: false,
            stt_start_time: None,
            llm_start_time: None,
            tts_start_time: None,
            tts_first_byte_time: None,
            eou_start_time: None,
            llm_provider_class: String::new(),
            llm_model_name: String::new(),
            stt_provider_class: String::new(),
            stt_model_name: String::new(),
            tts_provider_class: String::new(),
            tts_model_name: String::new(),
            vad_provider_class: String::new(),
            vad_model_name: String::new(),
            eou_provider_class: String::new(),
            eou_model_name: String::new(),
        }
    }
}

/// Collects cascading-pipeline turn metrics across a session. Shared via
/// `Arc` between the ingress, response-generation, and TTS tasks; all
/// mutation goes through `&self` methods backed by an internal lock.
pub struct CascadingMetricsCollector {
    epoch: Instant,
    state: Mutex<State>,
    completed_turns: Mutex<u64>,
}

impl Default for CascadingMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl CascadingMetricsCollector {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            state: Mutex::new(State::default()),
            completed_turns: Mutex::new(0),
        }
    }

    fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }

    fn round_latency(ms: f64) -> f64 {
        (ms.max(0.0) * 10_000.0).round() / 10_000.0
    }

    pub fn set_session_id(&self, session_id: impl Into<String>) {
        self.state.lock().session_id = Some(session_id.into());
    }

    pub fn set_system_instructions(&self, instructions: impl Into<String>) {
        self.state.lock().system_instructions = instructions.into();
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_provider_info(
        &self,
        llm_provider: &str,
        llm_model: &str,
        stt_provider: &str,
        stt_model: &str,
        tts_provider: &str,
        tts_model: &str,
        vad_provider: &str,
        vad_model: &str,
        eou_provider: &str,
        eou_model: &str,
    ) {
        let mut s = self.state.lock();
        s.llm_provider_class = llm_provider.to_string();
        s.llm_model_name = llm_model.to_string();
        s.stt_provider_class = stt_provider.to_string();
        s.stt_model_name = stt_model.to_string();
        s.tts_provider_class = tts_provider.to_string();
        s.tts_model_name = tts_model.to_string();
        s.vad_provider_class = vad_provider.to_string();
        s.vad_model_name = vad_model.to_string();
        s.eou_provider_class = eou_provider.to_string();
        s.eou_model_name = eou_model.to_string();
    }

    /// Start tracking a new turn, completing (and possibly emitting) the
    /// previous one first.
    pub fn start_new_interaction(&self, user_transcript: &str) {
        self.complete_current_turn();

        let mut s = self.state.lock();
        s.total_turns += 1;

        let mut turn = CascadingTurn {
            system_instructions: if s.total_turns == 1 { s.system_instructions.clone() } else { String::new() },
            llm_provider_class: s.llm_provider_class.clone(),
            llm_model_name: s.llm_model_name.clone(),
            stt_provider_class: s.stt_provider_class.clone(),
            stt_model_name: s.stt_model_name.clone(),
            tts_provider_class: s.tts_provider_class.clone(),
            tts_model_name: s.tts_model_name.clone(),
            vad_provider_class: s.vad_provider_class.clone(),
            vad_model_name: s.vad_model_name.clone(),
            eou_provider_class: s.eou_provider_class.clone(),
            eou_model_name: s.eou_model_name.clone(),
            ..Default::default()
        };

        if let Some(pending) = s.pending_user_start_time {
            turn.user_speech_start_time = Some(pending);
            turn.timeline.push(TimelineEvent::new("user_speech", pending));
        } else if s.is_user_speaking {
            if let Some(start) = s.user_input_start_time {
                turn.user_speech_start_time = Some(start);
                turn.timeline.push(TimelineEvent::new("user_speech", start));
            }
        }

        s.current_turn = Some(turn);
        drop(s);

        if !user_transcript.is_empty() {
            self.set_user_transcript(user_transcript);
        }
    }

    /// Turn retention rule (testable property #10): a turn with no latency
    /// at all is dropped, and its user-speech start is carried forward as
    /// the next turn's pending start — it never reaches the analytics sink.
    pub fn complete_current_turn(&self) -> Option<serde_json::Value> {
        let mut s = self.state.lock();
        let Some(mut turn) = s.current_turn.take() else { return None };

        let components: Vec<f64> = [turn.stt_latency, turn.eou_latency, turn.llm_latency, turn.tts_latency]
            .into_iter()
            .flatten()
            .collect();
        if !components.is_empty() {
            turn.e2e_latency = Some(Self::round_latency(components.iter().sum()));
        }

        let has_any_latency =
            turn.stt_latency.is_some() || turn.tts_latency.is_some() || turn.llm_latency.is_some() || turn.eou_latency.is_some();
        if !has_any_latency {
            if let Some(start) = turn.user_speech_start_time {
                s.pending_user_start_time = Some(match s.pending_user_start_time {
                    Some(existing) if existing <= start => existing,
                    _ => start,
                });
            }
            return None;
        }

        let mut completed = self.completed_turns.lock();
        *completed += 1;
        let is_first_turn = *completed == 1;
        let payload = turn.to_analytics_payload(is_first_turn);
        s.pending_user_start_time = None;
        drop(s);

        let json = serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null);
        tracing::info!(turn = %serde_json::to_string(&json).unwrap_or_default(), "cascading turn completed");
        Some(json)
    }

    pub fn on_interrupted(&self) {
        let mut s = self.state.lock();
        if s.is_agent_speaking {
            s.total_interruptions += 1;
            if let Some(turn) = s.current_turn.as_mut() {
                turn.interrupted = true;
            }
        }
    }

    pub fn on_user_speech_start(&self) {
        let now = self.now_ms();
        let mut s = self.state.lock();
        if s.is_user_speaking {
            return;
        }
        if s.current_turn.is_none() {
            drop(s);
            self.start_new_interaction("");
            s = self.state.lock();
        }
        s.is_user_speaking = true;
        s.user_input_start_time = Some(now);
        if let Some(turn) = s.current_turn.as_mut() {
            if turn.user_speech_start_time.is_none() {
                turn.user_speech_start_time = Some(now);
            }
            if !turn.timeline.iter().any(|e| e.event_type == "user_speech") {
                turn.timeline.push(TimelineEvent::new("user_speech", now));
            }
        }
    }

    pub fn on_user_speech_end(&self) {
        let now = self.now_ms();
        let mut s = self.state.lock();
        s.is_user_speaking = false;
        s.user_speech_end_time = Some(now);
        if let Some(turn) = s.current_turn.as_mut() {
            turn.user_speech_end_time = Some(now);
            end_timeline_event(turn, "user_speech", now);
        }
    }

    pub fn on_agent_speech_start(&self) {
        let now = self.now_ms();
        let mut s = self.state.lock();
        s.is_agent_speaking = true;
        s.agent_speech_start_time = Some(now);
        if let Some(turn) = s.current_turn.as_mut() {
            if !turn.timeline.iter().any(|e| e.event_type == "agent_speech" && e.end_time.is_none()) {
                turn.timeline.push(TimelineEvent::new("agent_speech", now));
            }
        }
    }

    pub fn on_agent_speech_end(&self) {
        let now = self.now_ms();
        let mut s = self.state.lock();
        s.is_agent_speaking = false;
        if let Some(turn) = s.current_turn.as_mut() {
            end_timeline_event(turn, "agent_speech", now);
        }
        if let (Some(start), Some(first_byte)) = (s.tts_start_time, s.tts_first_byte_time) {
            if let Some(turn) = s.current_turn.as_mut() {
                turn.tts_end_time = Some(now);
                turn.tts_latency = Some(Self::round_latency(first_byte - start));
            }
        }
        s.tts_start_time = None;
        s.tts_first_byte_time = None;
    }

    pub fn on_stt_start(&self) {
        let now = self.now_ms();
        let mut s = self.state.lock();
        s.stt_start_time = Some(now);
        if let Some(turn) = s.current_turn.as_mut() {
            turn.stt_start_time = Some(now);
        }
    }

    pub fn on_stt_complete(&self) {
        let now = self.now_ms();
        let mut s = self.state.lock();
        if let Some(start) = s.stt_start_time.take() {
            if let Some(turn) = s.current_turn.as_mut() {
                turn.stt_end_time = Some(now);
                turn.stt_latency = Some(Self::round_latency(now - start));
            }
        }
    }

    pub fn on_llm_start(&self) {
        let now = self.now_ms();
        let mut s = self.state.lock();
        s.llm_start_time = Some(now);
        if let Some(turn) = s.current_turn.as_mut() {
            turn.llm_start_time = Some(now);
        }
    }

    pub fn on_llm_complete(&self) {
        let now = self.now_ms();
        let mut s = self.state.lock();
        if let Some(start) = s.llm_start_time.take() {
            if let Some(turn) = s.current_turn.as_mut() {
                turn.llm_end_time = Some(now);
                turn.llm_latency = Some(Self::round_latency(now - start));
            }
        }
    }

    pub fn on_tts_start(&self) {
        let now = self.now_ms();
        let mut s = self.state.lock();
        s.tts_start_time = Some(now);
        s.tts_first_byte_time = None;
        if let Some(turn) = s.current_turn.as_mut() {
            turn.tts_start_time = Some(now);
        }
    }

    pub fn on_tts_first_byte(&self) {
        let now = self.now_ms();
        let mut s = self.state.lock();
        if s.tts_start_time.is_some() {
            if let Some(turn) = s.current_turn.as_mut() {
                turn.ttfb = Some(now);
            }
            s.tts_first_byte_time = Some(now);
        }
    }

    pub fn on_eou_start(&self) {
        let now = self.now_ms();
        let mut s = self.state.lock();
        s.eou_start_time = Some(now);
        if let Some(turn) = s.current_turn.as_mut() {
            turn.eou_start_time = Some(now);
        }
    }

    pub fn on_eou_complete(&self) {
        let now = self.now_ms();
        let mut s = self.state.lock();
        if let Some(start) = s.eou_start_time.take() {
            if let Some(turn) = s.current_turn.as_mut() {
                turn.eou_end_time = Some(now);
                turn.eou_latency = Some(Self::round_latency(now - start));
            }
        }
    }

    pub fn set_user_transcript(&self, transcript: &str) {
        let mut s = self.state.lock();
        if let Some(turn) = s.current_turn.as_mut() {
            if let Some(event) = turn.timeline.iter_mut().rev().find(|e| e.event_type == "user_speech") {
                event.text = transcript.to_string();
            } else {
                let now = self.now_ms();
                let mut event = TimelineEvent::new("user_speech", now);
                event.text = transcript.to_string();
                turn.timeline.push(event);
            }
        }
    }

    pub fn set_agent_response(&self, response: &str) {
        let now = self.now_ms();
        let mut s = self.state.lock();
        if let Some(turn) = s.current_turn.as_mut() {
            if !turn.timeline.iter().any(|e| e.event_type == "agent_speech") {
                turn.timeline.push(TimelineEvent::new("agent_speech", now));
            }
            if let Some(event) = turn.timeline.iter_mut().rev().find(|e| e.event_type == "agent_speech" && e.text.is_empty()) {
                event.text = response.to_string();
            }
        }
    }

    pub fn add_function_tool_call(&self, tool_name: &str) {
        let now = self.now_ms();
        let mut s = self.state.lock();
        if let Some(turn) = s.current_turn.as_mut() {
            turn.function_tools_called.push(tool_name.to_string());
            turn.function_tool_timestamps.push(FunctionToolTimestamp { tool_name: tool_name.to_string(), timestamp: now });
        }
    }

    pub fn add_error(&self, source: ErrorSource, message: impl Into<String>) {
        let now = self.now_ms();
        let mut s = self.state.lock();
        if let Some(turn) = s.current_turn.as_mut() {
            turn.errors.push(TurnError { source: source.as_str().to_string(), message: message.into(), timestamp: now });
        }
    }

    pub fn set_a2a_handoff(&self) {
        let mut s = self.state.lock();
        if let Some(turn) = s.current_turn.as_mut() {
            turn.is_a2a_enabled = true;
            turn.handoff_occurred = true;
        }
    }

    pub fn is_agent_speaking(&self) -> bool {
        self.state.lock().is_agent_speaking
    }
}

fn end_timeline_event(turn: &mut CascadingTurn, event_type: &str, end_time: f64) {
    if let Some(event) = turn.timeline.iter_mut().rev().find(|e| e.event_type == event_type && e.end_time.is_none()) {
        event.end_time = Some(end_time);
        event.duration_ms = Some(CascadingMetricsCollector::round_latency(end_time - event.start_time));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_with_no_latency_is_dropped_and_carried_forward() {
        let c = CascadingMetricsCollector::new();
        c.on_user_speech_start();
        c.on_user_speech_end();
        let emitted = c.complete_current_turn();
        assert!(emitted.is_none());
        // next turn should carry the earlier user_speech_start_time forward
        c.start_new_interaction("hello");
        c.on_stt_start();
        c.on_stt_complete();
        let emitted = c.complete_current_turn().unwrap();
        assert!(emitted.get("userSpeechStartTime").is_some());
    }

    #[test]
    fn first_turn_carries_provider_fields_later_turns_do_not() {
        let c = CascadingMetricsCollector::new();
        c.set_provider_info("openai", "gpt-4o", "deepgram", "nova-2", "elevenlabs", "turbo", "", "", "", "");
        c.start_new_interaction("hi");
        c.on_llm_start();
        c.on_llm_complete();
        let first = c.complete_current_turn().unwrap();
        assert_eq!(first["llmProviderClass"], "openai");

        c.start_new_interaction("again");
        c.on_llm_start();
        c.on_llm_complete();
        let second = c.complete_current_turn().unwrap();
        assert!(second.get("llmProviderClass").is_none());
    }

    #[test]
    fn errors_and_internal_timestamps_never_reach_analytics_payload() {
        let c = CascadingMetricsCollector::new();
        c.start_new_interaction("hi");
        c.add_error(ErrorSource::Stt, "boom");
        c.on_llm_start();
        c.on_llm_complete();
        let payload = c.complete_current_turn().unwrap();
        assert!(payload.get("errors").is_none());
        assert!(payload.get("sttStartTime").is_none());
        assert!(payload.get("timestamp").is_none());
    }

    #[test]
    fn interruption_marks_current_turn() {
        let c = CascadingMetricsCollector::new();
        c.start_new_interaction("hi");
        c.on_agent_speech_start();
        c.on_interrupted();
        assert!(c.state.lock().current_turn.as_ref().unwrap().interrupted);
    }
}
