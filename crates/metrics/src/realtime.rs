//! Realtime pipeline metrics (spec §4.7), ported from `models.py`'s
//! `RealtimeTurnData`. Simpler than the cascading turn: a single integrated
//! provider session reports speech boundaries directly, so there is no
//! per-engine start/stop bookkeeping — only the four timestamps needed to
//! derive the four headline latencies.

use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

use crate::timeline::{AnalyticsTimelineEvent, TimelineEvent};

#[derive(Debug, Clone, Default)]
pub struct RealtimeTurn {
    pub user_speech_start_time: Option<f64>,
    pub user_speech_end_time: Option<f64>,
    pub agent_speech_start_time: Option<f64>,
    pub agent_speech_end_time: Option<f64>,

    pub ttfb: Option<f64>,
    pub thinking_delay: Option<f64>,
    pub e2e_latency: Option<f64>,
    pub agent_speech_duration: Option<f64>,

    pub interrupted: bool,
    pub function_tools_called: Vec<String>,
    pub timeline: Vec<TimelineEvent>,
    pub realtime_model_errors: Vec<String>,
    pub is_a2a_enabled: bool,
    pub handoff_occurred: bool,

    pub system_instructions: String,
    pub provider_class_name: String,
    pub provider_model_name: String,
}

impl RealtimeTurn {
    /// Derive ttfb / thinking_delay / e2e_latency / agent_speech_duration
    /// from the four recorded timestamps, each clamped to non-negative.
    pub fn compute_latencies(&mut self) {
        if let (Some(user_end), Some(agent_start)) = (self.user_speech_end_time, self.agent_speech_start_time) {
            let ttfb = (agent_start - user_end).max(0.0);
            self.ttfb = Some(ttfb);
            self.thinking_delay = Some(ttfb);
            self.e2e_latency = Some(ttfb);
        }
        if let (Some(start), Some(end)) = (self.agent_speech_start_time, self.agent_speech_end_time) {
            self.agent_speech_duration = Some((end - start).max(0.0));
        }
    }

    fn to_analytics_payload(&self, is_first_turn: bool) -> AnalyticsRealtimeTurn {
        AnalyticsRealtimeTurn {
            user_speech_start_time: self.user_speech_start_time,
            user_speech_end_time: self.user_speech_end_time,
            ttfb: self.ttfb,
            thinking_delay: self.thinking_delay,
            e2e_latency: self.e2e_latency,
            agent_speech_duration: self.agent_speech_duration,
            interrupted: self.interrupted,
            function_tools_called: self.function_tools_called.clone(),
            timeline: self.timeline.iter().map(AnalyticsTimelineEvent::from).collect(),
            handoff_occurred: self.is_a2a_enabled.then_some(self.handoff_occurred),
            system_instructions: is_first_turn.then(|| self.system_instructions.clone()),
            provider_class_name: is_first_turn.then(|| self.provider_class_name.clone()),
            provider_model_name: is_first_turn.then(|| self.provider_model_name.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsRealtimeTurn {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_speech_start_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_speech_end_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttfb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_delay: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e2e_latency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_speech_duration: Option<f64>,
    pub interrupted: bool,
    pub function_tools_called: Vec<String>,
    pub timeline: Vec<AnalyticsTimelineEvent>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "handOffOccurred")]
    pub handoff_occurred: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_model_name: Option<String>,
}

struct State {
    current_turn: Option<RealtimeTurn>,
    system_instructions: String,
    provider_class_name: String,
    provider_model_name: String,
    is_agent_speaking: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            current_turn: None,
            system_instructions: String::new(),
            provider_class_name: String::new(),
            provider_model_name: String::new(),
            is_agent_speaking: false,
        }
    }
}

/// Collects realtime-pipeline turn metrics (spec §4.6 / §4.7). Far fewer
/// hooks than [`crate::cascading::CascadingMetricsCollector`] — the
/// integrated provider session reports whole speech turns, not per-engine
/// stages.
pub struct RealtimeMetricsCollector {
    epoch: Instant,
    state: Mutex<State>,
    completed_turns: Mutex<u64>,
}

impl Default for RealtimeMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeMetricsCollector {
    pub fn new() -> Self {
        Self { epoch: Instant::now(), state: Mutex::new(State::default()), completed_turns: Mutex::new(0) }
    }

    fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }

    pub fn set_system_instructions(&self, instructions: impl Into<String>) {
        self.state.lock().system_instructions = instructions.into();
    }

    pub fn set_provider_info(&self, class_name: &str, model_name: &str) {
        let mut s = self.state.lock();
        s.provider_class_name = class_name.to_string();
        s.provider_model_name = model_name.to_string();
    }

    pub fn start_new_interaction(&self) {
        self.complete_current_turn();
        let is_first_turn = *self.completed_turns.lock() == 0;

        let mut s = self.state.lock();
        s.current_turn = Some(RealtimeTurn {
            system_instructions: if is_first_turn { s.system_instructions.clone() } else { String::new() },
            provider_class_name: s.provider_class_name.clone(),
            provider_model_name: s.provider_model_name.clone(),
            ..Default::default()
        });
    }

    pub fn on_user_speech_start(&self) {
        let now = self.now_ms();
        let mut s = self.state.lock();
        if s.current_turn.is_none() {
            drop(s);
            self.start_new_interaction();
            s = self.state.lock();
        }
        if let Some(turn) = s.current_turn.as_mut() {
            turn.user_speech_start_time.get_or_insert(now);
            turn.timeline.push(TimelineEvent::new("user_speech", now));
        }
    }

    pub fn on_user_speech_end(&self) {
        let now = self.now_ms();
        let mut s = self.state.lock();
        if let Some(turn) = s.current_turn.as_mut() {
            turn.user_speech_end_time = Some(now);
        }
    }

    pub fn on_agent_speech_start(&self) {
        let now = self.now_ms();
        let mut s = self.state.lock();
        s.is_agent_speaking = true;
        if let Some(turn) = s.current_turn.as_mut() {
            turn.agent_speech_start_time.get_or_insert(now);
            turn.timeline.push(TimelineEvent::new("agent_speech", now));
        }
    }

    /// Agent speech end is *provisional*: callers debounce this with a
    /// short extension window (spec §4.6 `REALTIME_FINALIZE_DEBOUNCE`)
    /// before treating the turn as actually finished, since the provider
    /// may resume speaking within it.
    pub fn on_agent_speech_end(&self) {
        let now = self.now_ms();
        let mut s = self.state.lock();
        s.is_agent_speaking = false;
        if let Some(turn) = s.current_turn.as_mut() {
            turn.agent_speech_end_time = Some(now);
            turn.compute_latencies();
        }
    }

    pub fn on_interrupted(&self) {
        let mut s = self.state.lock();
        if s.is_agent_speaking {
            if let Some(turn) = s.current_turn.as_mut() {
                turn.interrupted = true;
            }
        }
    }

    pub fn add_function_tool_call(&self, tool_name: &str) {
        let mut s = self.state.lock();
        if let Some(turn) = s.current_turn.as_mut() {
            turn.function_tools_called.push(tool_name.to_string());
        }
    }

    pub fn add_error(&self, message: impl Into<String>) {
        let mut s = self.state.lock();
        if let Some(turn) = s.current_turn.as_mut() {
            turn.realtime_model_errors.push(message.into());
        }
    }

    pub fn set_a2a_handoff(&self) {
        let mut s = self.state.lock();
        if let Some(turn) = s.current_turn.as_mut() {
            turn.is_a2a_enabled = true;
            turn.handoff_occurred = true;
        }
    }

    pub fn complete_current_turn(&self) -> Option<serde_json::Value> {
        let mut s = self.state.lock();
        let turn = s.current_turn.take()?;
        let has_speech = turn.user_speech_start_time.is_some() || turn.agent_speech_start_time.is_some();
        if !has_speech {
            return None;
        }

        let mut completed = self.completed_turns.lock();
        *completed += 1;
        let is_first_turn = *completed == 1;
        let payload = turn.to_analytics_payload(is_first_turn);
        drop(s);

        let json = serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null);
        tracing::info!(turn = %serde_json::to_string(&json).unwrap_or_default(), "realtime turn completed");
        Some(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_latencies_derives_ttfb_and_duration() {
        let mut turn = RealtimeTurn { user_speech_end_time: Some(100.0), agent_speech_start_time: Some(150.0), agent_speech_end_time: Some(400.0), ..Default::default() };
        turn.compute_latencies();
        assert_eq!(turn.ttfb, Some(50.0));
        assert_eq!(turn.thinking_delay, Some(50.0));
        assert_eq!(turn.agent_speech_duration, Some(250.0));
    }

    #[test]
    fn turn_with_no_speech_is_dropped() {
        let c = RealtimeMetricsCollector::new();
        c.start_new_interaction();
        assert!(c.complete_current_turn().is_none());
    }

    #[test]
    fn first_turn_carries_provider_info_subsequent_do_not() {
        let c = RealtimeMetricsCollector::new();
        c.set_provider_info("openai-realtime", "gpt-4o-realtime");
        c.on_user_speech_start();
        c.on_agent_speech_start();
        c.on_agent_speech_end();
        let first = c.complete_current_turn().unwrap();
        assert_eq!(first["providerClassName"], "openai-realtime");

        c.on_user_speech_start();
        c.on_agent_speech_start();
        c.on_agent_speech_end();
        let second = c.complete_current_turn().unwrap();
        assert!(second.get("providerClassName").is_none());
    }
}
