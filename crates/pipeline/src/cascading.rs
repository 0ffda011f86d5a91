//! Cascading Conversation Flow (C5): the STT→EOU→LLM→TTS turn-taking state
//! machine, ported from `conversation_flow.py` / `cascading_pipeline.py`.
//!
//! One [`ConversationFlow`] runs per job. It owns the active `ChatContext`,
//! the current turn's metrics, and the component set (STT/LLM/TTS/VAD/EOU),
//! each swappable at runtime via [`ConversationFlow::change_component`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex as PLMutex;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::timeout;

use voicecore_domain::audio::AudioFrame;
use voicecore_domain::chat::{ChatContext, MessageContent, Role};
use voicecore_domain::config::pipeline_tunables::{
    BARGE_IN_GRACE, EOU_WAIT, LLM_TTS_CHANNEL_CAPACITY, MAX_TOOL_LOOPS,
};
use voicecore_domain::error::{Error, Result};
use voicecore_domain::stream::StreamEvent;
use voicecore_domain::tool::ToolDefinition;
use voicecore_metrics::{CascadingMetricsCollector, ErrorSource};
use voicecore_providers::traits::{
    ChatRequest, Denoise, Eou, Llm, SttEvent, SttEventKind, Tts, ToolDispatcher, Vad, VadEvent,
    VadEventKind,
};

use crate::background::BackgroundAudioPlayer;
use crate::cancel::{CancelMap, CancelToken};
use crate::segment::Segmenter;

/// Turn-taking state (spec §3 "Turn state machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// No user speech accumulated, nothing being generated.
    Idle,
    /// Accumulating user transcript, waiting on the EOU timer or a final
    /// STT result before finalizing.
    Waiting,
    /// A response is being generated and spoken.
    Responding,
}

/// Swappable pipeline components (spec §4.5 "component hot-swap").
#[derive(Default)]
pub struct Components {
    pub stt: Option<Arc<dyn voicecore_providers::traits::Stt>>,
    pub llm: Option<Arc<dyn Llm>>,
    pub tts: Option<Arc<dyn Tts>>,
    pub vad: Option<Arc<dyn Vad>>,
    pub eou: Option<Arc<dyn Eou>>,
    pub denoise: Option<Arc<dyn Denoise>>,
}

struct Accumulator {
    parts: Vec<String>,
    waiting: bool,
}

impl Accumulator {
    fn new() -> Self {
        Self { parts: Vec::new(), waiting: false }
    }

    fn push(&mut self, text: &str) {
        if !text.is_empty() {
            self.parts.push(text.to_string());
        }
    }

    fn joined(&self) -> String {
        self.parts.join(" ")
    }

    fn clear(&mut self) {
        self.parts.clear();
        self.waiting = false;
    }

    fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Drives one job's cascading conversation. Held behind an `Arc` and shared
/// across the ingress (STT/VAD) task, the response-generation task, and
/// whatever surfaces reply-with-context/barge-in requests.
pub struct ConversationFlow {
    components: Mutex<Components>,
    tools: Vec<ToolDefinition>,
    tool_dispatcher: Option<Arc<dyn ToolDispatcher>>,
    context: PLMutex<ChatContext>,
    metrics: Arc<CascadingMetricsCollector>,
    background_audio: BackgroundAudioPlayer,

    state: PLMutex<TurnState>,
    accumulator: PLMutex<Accumulator>,
    eou_wait_generation: AtomicU64,
    wait_timer_notify: Notify,

    cancel_map: CancelMap,
    turn_counter: AtomicU64,
    interrupted: AtomicBool,
    /// While true, STT/VAD events are swallowed (spec §4.5 "reply with
    /// context" with `wait_for_playback=true`).
    handlers_suspended: AtomicBool,

    /// Testable property #1: at most one active reply at a time: both
    /// `reply_with_context` and STT-triggered `finalize_and_respond` check
    /// and set this before running generation, and clear it when done.
    reply_in_progress: AtomicBool,
    /// Notified whenever the in-flight response generation finishes, so
    /// barge-in can wait on it with a soft deadline.
    turn_complete_notify: Notify,
    /// Tracks whether `on_stt_start` has fired for the in-flight turn, so
    /// repeated VAD speech-end events within one turn don't restart the
    /// STT latency clock (spec §4.7, ported from `_stt_started`).
    stt_started: AtomicBool,
}

impl ConversationFlow {
    pub fn new(
        components: Components,
        tools: Vec<ToolDefinition>,
        tool_dispatcher: Option<Arc<dyn ToolDispatcher>>,
        metrics: Arc<CascadingMetricsCollector>,
    ) -> Arc<Self> {
        let initial_stt = components.stt.clone();
        let initial_vad = components.vad.clone();

        let flow = Arc::new(Self {
            components: Mutex::new(components),
            tools,
            tool_dispatcher,
            context: PLMutex::new(ChatContext::empty()),
            metrics,
            background_audio: BackgroundAudioPlayer::new(),
            state: PLMutex::new(TurnState::Idle),
            accumulator: PLMutex::new(Accumulator::new()),
            eou_wait_generation: AtomicU64::new(0),
            wait_timer_notify: Notify::new(),
            cancel_map: CancelMap::new(),
            turn_counter: AtomicU64::new(0),
            interrupted: AtomicBool::new(false),
            handlers_suspended: AtomicBool::new(false),
            reply_in_progress: AtomicBool::new(false),
            turn_complete_notify: Notify::new(),
            stt_started: AtomicBool::new(false),
        });

        if let Some(stt) = initial_stt {
            flow.register_stt_callback(&stt);
        }
        if let Some(vad) = initial_vad {
            flow.register_vad_callback(&vad);
        }

        flow
    }

    pub fn context(&self) -> ChatContext {
        self.context.lock().clone()
    }

    pub fn state(&self) -> TurnState {
        *self.state.lock()
    }

    /// Re-register the STT transcript callback onto whatever engine is
    /// active (initial wiring and every hot-swap, spec §4.5
    /// "component hot-swap" step "re-registers the STT transcript
    /// callback").
    fn register_stt_callback(self: &Arc<Self>, stt: &Arc<dyn voicecore_providers::traits::Stt>) {
        let flow = self.clone();
        stt.on_transcript(Box::new(move |event: SttEvent| {
            if event.kind != SttEventKind::Final {
                return;
            }
            let flow = flow.clone();
            tokio::spawn(async move {
                flow.on_final_transcript(&event.text).await;
            });
        }));
    }

    /// Re-register the VAD event callback (same hot-swap requirement as
    /// STT, applied to `change_component_vad`).
    fn register_vad_callback(self: &Arc<Self>, vad: &Arc<dyn Vad>) {
        let flow = self.clone();
        vad.on_event(Box::new(move |event: VadEvent| {
            flow.on_vad_event(event.kind);
        }));
    }

    // ── Ingress: audio/VAD/STT events ─────────────────────────────────

    /// Audio ingress (spec §4.5 "Audio ingress"): optionally denoise, then
    /// fan the frame out to STT (guarded by the shared components lock,
    /// filling in for a dedicated `stt_lock`) and VAD. Spawned off the
    /// caller's task so a slow provider doesn't back up the room's receive
    /// path.
    pub fn push_audio(self: &Arc<Self>, frame: AudioFrame) {
        let flow = self.clone();
        tokio::spawn(async move {
            let mut pcm = frame.as_bytes();
            let comps = flow.components.lock().await;
            if let Some(denoise) = &comps.denoise {
                match denoise.process(&pcm).await {
                    Ok(clean) => pcm = clean,
                    Err(e) => tracing::warn!(error = %e, "denoise failed, forwarding raw audio"),
                }
            }
            if let Some(stt) = &comps.stt {
                if let Err(e) = stt.process_audio(&pcm).await {
                    flow.metrics.add_error(ErrorSource::Stt, e.to_string());
                }
            }
            if let Some(vad) = &comps.vad {
                if let Err(e) = vad.process_audio(&pcm).await {
                    flow.metrics.add_error(ErrorSource::Vad, e.to_string());
                }
            }
        });
    }

    pub fn on_vad_event(self: &Arc<Self>, kind: VadEventKind) {
        if self.handlers_suspended.load(Ordering::Acquire) {
            return;
        }
        match kind {
            VadEventKind::SpeechStart => {
                self.metrics.on_user_speech_start();
                if self.metrics.is_agent_speaking() {
                    self.handle_barge_in();
                }
                self.stt_started.store(false, Ordering::Release);
            }
            VadEventKind::SpeechEnd => {
                self.metrics.on_user_speech_end();
                if !self.stt_started.swap(true, Ordering::AcqRel) {
                    self.metrics.on_stt_start();
                }
            }
        }
    }

    /// Handle a final STT transcript chunk: append to the accumulated
    /// transcript, re-query EOU against the full accumulation, and either
    /// finalize immediately or (re)start the 800ms wait timer
    /// (spec §4.5 "accumulated transcript EOU logic").
    pub async fn on_final_transcript(self: &Arc<Self>, text: &str) {
        if self.handlers_suspended.load(Ordering::Acquire) || text.trim().is_empty() {
            return;
        }

        {
            let mut acc = self.accumulator.lock();
            acc.push(text.trim());
            *self.state.lock() = TurnState::Waiting;
        }

        let accumulated = self.accumulator.lock().joined();
        self.metrics.set_user_transcript(&accumulated);
        self.metrics.on_stt_complete();

        let eou = self.components.lock().await.eou.clone();
        let should_finalize = match eou {
            Some(eou) => {
                self.metrics.on_eou_start();
                let ctx = self.context.lock().clone();
                let detected = eou.detect_end_of_utterance(&ctx, None).await.unwrap_or(true);
                self.metrics.on_eou_complete();
                detected
            }
            // No EOU model configured: every final transcript finalizes immediately.
            None => true,
        };

        if should_finalize {
            self.finalize_and_respond().await;
        } else {
            self.start_wait_timer();
        }
    }

    /// Spawn (or restart, via the generation counter) the EOU wait timer.
    /// If no further transcript arrives within `EOU_WAIT`, finalize anyway.
    fn start_wait_timer(self: &Arc<Self>) {
        let generation = self.eou_wait_generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.accumulator.lock().waiting = true;

        let flow = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(EOU_WAIT) => {
                    if flow.eou_wait_generation.load(Ordering::Acquire) == generation {
                        flow.finalize_and_respond().await;
                    }
                }
                _ = flow.wait_timer_notify.notified() => {
                    // Superseded by a newer transcript chunk or a cancel.
                }
            }
        });
    }

    async fn finalize_and_respond(self: &Arc<Self>) {
        self.eou_wait_generation.fetch_add(1, Ordering::AcqRel);
        self.wait_timer_notify.notify_waiters();

        let transcript = {
            let mut acc = self.accumulator.lock();
            let joined = acc.joined();
            acc.clear();
            joined
        };
        if transcript.trim().is_empty() {
            *self.state.lock() = TurnState::Idle;
            return;
        }

        // Testable property #1: at most one active reply at a time.
        if self.reply_in_progress.swap(true, Ordering::AcqRel) {
            *self.state.lock() = TurnState::Idle;
            return;
        }

        let turn_index = self.turn_counter.fetch_add(1, Ordering::AcqRel) + 1;
        self.metrics.start_new_interaction(&transcript);
        self.context.lock().add_message(Role::User, MessageContent::Text(transcript));

        *self.state.lock() = TurnState::Responding;
        self.interrupted.store(false, Ordering::Release);
        self.run_response_generation(turn_index).await;
        *self.state.lock() = TurnState::Idle;
        self.metrics.complete_current_turn();

        self.reply_in_progress.store(false, Ordering::Release);
        self.turn_complete_notify.notify_waiters();
    }

    // ── Response generation ──────────────────────────────────────────

    /// Runs the LLM→TTS pipeline for one turn: a collector task reads the
    /// LLM's stream, segments text onto a bounded channel, and a consumer
    /// task feeds TTS from that channel. Mid-stream function calls are
    /// executed and looped back into the LLM up to `MAX_TOOL_LOOPS` times
    /// (spec §4.5 "Response generation" / "Tool-call loop").
    async fn run_response_generation(self: &Arc<Self>, turn_index: u64) {
        let turn_key = format!("turn-{turn_index}");
        let cancel = self.cancel_map.register(&turn_key);

        let (llm, tts) = {
            let comps = self.components.lock().await;
            (comps.llm.clone(), comps.tts.clone())
        };
        let Some(llm) = llm else {
            self.cancel_map.remove(&turn_key);
            return;
        };

        let mut full_response = String::new();
        let mut tool_loops = 0usize;

        'tool_loop: loop {
            if cancel.is_cancelled() {
                break;
            }
            let ctx = self.context.lock().clone();
            self.metrics.on_llm_start();
            let req = ChatRequest { context: ctx, tools: self.tools.clone(), ..Default::default() };
            let stream = match llm.chat_stream(req).await {
                Ok(s) => s,
                Err(e) => {
                    self.metrics.add_error(ErrorSource::Llm, e.to_string());
                    break;
                }
            };

            let (tx, rx) = mpsc::channel::<String>(LLM_TTS_CHANNEL_CAPACITY);
            let mut segmenter = Segmenter::new();
            let mut tool_calls: Vec<(String, String, String)> = Vec::new(); // (call_id, name, args_json)
            let mut straggler: Option<(String, String, String)> = None;

            let tts_task = tts.clone().map(|tts| {
                let rx_stream = tokio_stream_from_receiver(rx);
                let flow = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    flow.metrics.on_tts_start();
                    tts.reset_first_audio_tracking();
                    {
                        let flow = flow.clone();
                        tts.on_first_audio_byte(Box::new(move || {
                            flow.background_audio.stop();
                            flow.metrics.on_tts_first_byte();
                            flow.metrics.on_agent_speech_start();
                        }));
                    }
                    if !cancel.is_cancelled() {
                        let _ = tts.synthesize(rx_stream, None).await;
                    }
                    flow.metrics.on_agent_speech_end();
                })
            });

            use futures_util::StreamExt;
            let mut stream = stream;
            while let Some(event) = stream.next().await {
                if cancel.is_cancelled() {
                    break;
                }
                match event {
                    Ok(StreamEvent::Token { text }) => {
                        full_response.push_str(&text);
                        for seg in segmenter.push(&text) {
                            let _ = tx.send(seg).await;
                        }
                    }
                    Ok(StreamEvent::ToolCallStarted { call_id, tool_name }) => {
                        straggler = Some((call_id, tool_name, String::new()));
                    }
                    Ok(StreamEvent::ToolCallDelta { call_id, delta }) => {
                        if let Some((sid, _, args)) = straggler.as_mut() {
                            if *sid == call_id {
                                args.push_str(&delta);
                            }
                        }
                    }
                    Ok(StreamEvent::ToolCallFinished { call_id, tool_name, arguments }) => {
                        tool_calls.push((call_id, tool_name, arguments.to_string()));
                        straggler = None;
                    }
                    Ok(StreamEvent::Done { .. }) => break,
                    Ok(StreamEvent::Error { message }) => {
                        self.metrics.add_error(ErrorSource::Llm, message);
                        break;
                    }
                    Err(e) => {
                        self.metrics.add_error(ErrorSource::Llm, e.to_string());
                        break;
                    }
                }
            }
            // A tool call that never saw a `ToolCallFinished` event: fall back
            // to whatever arguments JSON was assembled from the deltas.
            if let Some((call_id, tool_name, args)) = straggler.take() {
                tool_calls.push((call_id, tool_name, args));
            }

            if let Some(seg) = segmenter.flush() {
                let _ = tx.send(seg).await;
            }
            drop(tx);
            self.metrics.on_llm_complete();

            if let Some(handle) = tts_task {
                let _ = handle.await;
            }

            if tool_calls.is_empty() || cancel.is_cancelled() {
                break 'tool_loop;
            }
            if tool_loops >= MAX_TOOL_LOOPS {
                tracing::warn!(turn = turn_index, "tool-call loop bound reached");
                break 'tool_loop;
            }
            tool_loops += 1;

            let Some(dispatcher) = self.tool_dispatcher.clone() else {
                break 'tool_loop;
            };
            let dispatch_futures = tool_calls.iter().map(|(call_id, name, args)| {
                let dispatcher = dispatcher.clone();
                let name = name.clone();
                let call_id = call_id.clone();
                let args_value: serde_json::Value = serde_json::from_str(args).unwrap_or(serde_json::Value::Null);
                async move {
                    let (result, is_error) = dispatcher.dispatch(&name, &args_value).await;
                    (call_id, name, result, is_error)
                }
            });
            let results = join_all(dispatch_futures).await;

            for (call_id, name, args) in &tool_calls {
                self.context.lock().add_function_call(name, args.clone(), call_id);
                self.metrics.add_function_tool_call(name);
            }
            for (call_id, name, result, is_error) in results {
                self.context.lock().add_function_output(name, call_id, result, is_error);
            }
            full_response.clear();
        }

        if !full_response.is_empty() && !self.interrupted.load(Ordering::Acquire) {
            self.context.lock().add_message(Role::Assistant, MessageContent::Text(full_response.clone()));
            self.metrics.set_agent_response(&full_response);
        }

        self.cancel_map.remove(&turn_key);
    }

    // ── Barge-in ───────────────────────────────────────────────────

    /// Exact 6-step ordering (spec §4.5 "barge-in"): stop background audio,
    /// mark interrupted, cancel the wait timer, interrupt TTS + cancel the
    /// LLM stream, gracefully cancel the collector/TTS tasks with a soft
    /// deadline, then mark the turn interrupted without appending a partial
    /// assistant message.
    fn handle_barge_in(self: &Arc<Self>) {
        let flow = self.clone();
        tokio::spawn(async move {
            // 1. stop background audio
            flow.background_audio.stop();
            // 2. mark interrupted
            flow.interrupted.store(true, Ordering::Release);
            flow.metrics.on_interrupted();
            // 3. cancel the wait timer / clear waiting flag
            flow.eou_wait_generation.fetch_add(1, Ordering::AcqRel);
            flow.wait_timer_notify.notify_waiters();
            flow.accumulator.lock().waiting = false;
            // 4. interrupt TTS + cancel the LLM stream
            let (llm, tts) = {
                let comps = flow.components.lock().await;
                (comps.llm.clone(), comps.tts.clone())
            };
            if let Some(tts) = tts {
                let _ = tts.interrupt().await;
            }
            if let Some(llm) = llm {
                llm.cancel_current().await;
            }
            // 5. graceful-cancel collector/TTS tasks with a soft deadline
            let current_turn = flow.turn_counter.load(Ordering::Acquire);
            let turn_key = format!("turn-{current_turn}");
            flow.cancel_map.cancel(&turn_key);
            if flow.reply_in_progress.load(Ordering::Acquire) {
                let _ = timeout(BARGE_IN_GRACE, flow.turn_complete_notify.notified()).await;
            }
            // 6. the turn is marked interrupted above; run_response_generation's
            // final append is gated on `interrupted`, so no partial message
            // reaches the chat context.
        });
    }

    // ── Reply with context / component hot-swap ──────────────────────

    /// Inject an assistant-authored message and optionally speak it,
    /// bypassing STT/VAD for the duration (spec §4.5 `_process_reply_instructions`).
    pub async fn reply_with_context(self: &Arc<Self>, text: &str, wait_for_playback: bool) {
        // Testable property #1: at most one active reply at a time.
        if self.reply_in_progress.swap(true, Ordering::AcqRel) {
            return;
        }

        self.handlers_suspended.store(true, Ordering::Release);
        self.context.lock().add_message(Role::User, MessageContent::Text(text.to_string()));

        let turn_index = self.turn_counter.fetch_add(1, Ordering::AcqRel) + 1;
        self.metrics.start_new_interaction(text);
        *self.state.lock() = TurnState::Responding;
        self.interrupted.store(false, Ordering::Release);

        if wait_for_playback {
            self.run_response_generation(turn_index).await;
        } else {
            let flow = self.clone();
            tokio::spawn(async move {
                flow.run_response_generation(turn_index).await;
                *flow.state.lock() = TurnState::Idle;
                flow.metrics.complete_current_turn();
                flow.handlers_suspended.store(false, Ordering::Release);
                flow.reply_in_progress.store(false, Ordering::Release);
                flow.turn_complete_notify.notify_waiters();
            });
            return;
        }

        *self.state.lock() = TurnState::Idle;
        self.metrics.complete_current_turn();
        self.handlers_suspended.store(false, Ordering::Release);
        self.reply_in_progress.store(false, Ordering::Release);
        self.turn_complete_notify.notify_waiters();
    }

    /// Swap a single component while holding its lock; per-component, so
    /// other components keep running uninterrupted (spec §4.5
    /// `change_component`).
    pub async fn change_component_llm(&self, new_llm: Arc<dyn Llm>) -> Result<()> {
        let mut comps = self.components.lock().await;
        if let Some(old) = comps.llm.take() {
            old.aclose().await.map_err(|e| Error::Provider { provider: "llm".into(), message: e.to_string() })?;
        }
        comps.llm = Some(new_llm);
        Ok(())
    }

    pub async fn change_component_tts(&self, new_tts: Arc<dyn Tts>) -> Result<()> {
        let mut comps = self.components.lock().await;
        if let Some(old) = comps.tts.take() {
            old.aclose().await.map_err(|e| Error::Provider { provider: "tts".into(), message: e.to_string() })?;
        }
        comps.tts = Some(new_tts);
        Ok(())
    }

    pub async fn change_component_stt(self: &Arc<Self>, new_stt: Arc<dyn voicecore_providers::traits::Stt>) -> Result<()> {
        {
            let mut comps = self.components.lock().await;
            if let Some(old) = comps.stt.take() {
                old.aclose().await.map_err(|e| Error::Provider { provider: "stt".into(), message: e.to_string() })?;
            }
            comps.stt = Some(new_stt.clone());
        }
        self.register_stt_callback(&new_stt);
        Ok(())
    }

    pub async fn change_component_vad(self: &Arc<Self>, new_vad: Arc<dyn Vad>) -> Result<()> {
        {
            let mut comps = self.components.lock().await;
            if let Some(old) = comps.vad.take() {
                old.aclose().await.map_err(|e| Error::Provider { provider: "vad".into(), message: e.to_string() })?;
            }
            comps.vad = Some(new_vad.clone());
        }
        self.register_vad_callback(&new_vad);
        Ok(())
    }

    pub fn on_component_error(&self, source: ErrorSource, message: impl Into<String>) {
        self.metrics.add_error(source, message);
    }
}

fn tokio_stream_from_receiver(rx: mpsc::Receiver<String>) -> voicecore_domain::stream::BoxStream<'static, String> {
    Box::pin(async_stream::stream! {
        let mut rx = rx;
        while let Some(item) = rx.recv().await {
            yield item;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_joins_with_space() {
        let mut acc = Accumulator::new();
        acc.push("hello");
        acc.push("world");
        assert_eq!(acc.joined(), "hello world");
    }

    #[test]
    fn accumulator_clear_resets_waiting() {
        let mut acc = Accumulator::new();
        acc.push("hi");
        acc.waiting = true;
        acc.clear();
        assert!(acc.is_empty());
        assert!(!acc.waiting);
    }
}
