//! Session span hierarchy (spec §4.7): "Agent Session" → "Session
//! Configuration" / "Session Started" → "User & Agent Turns" → "Turn #N" →
//! per-engine child spans. The original tracked this by hand with an
//! `active_spans: Dict[str, Span]` lookup table; native `tracing::Span`
//! parenting (entered spans become the implicit parent of spans created
//! while they're active) replaces that bookkeeping outright.

use tracing::Span;

/// Owns the session-level span and the currently open turn span, if any.
/// Dropping a held `Span` handle does not close it for children created
/// while it was entered — only `Span::in_scope`/explicit `.enter()` guards
/// control the active parent, so callers open a scope around the work each
/// span should cover.
pub struct SessionSpans {
    session: Span,
    turns_root: Span,
    current_turn: Option<Span>,
}

impl SessionSpans {
    pub fn start(session_id: &str) -> Self {
        let session = tracing::info_span!("agent_session", session_id = %session_id);
        let turns_root = session.in_scope(|| tracing::info_span!("user_and_agent_turns"));
        Self { session, turns_root, current_turn: None }
    }

    pub fn session_configuration(&self, provider_summary: &str) {
        self.session.in_scope(|| {
            let _span = tracing::info_span!("session_configuration", providers = %provider_summary).entered();
            tracing::info!("session configured");
        });
    }

    pub fn session_started(&self) {
        self.session.in_scope(|| {
            let _span = tracing::info_span!("session_started").entered();
            tracing::info!("session started");
        });
    }

    /// Open (or re-open) the span for turn `index`, parented under the
    /// shared "User & Agent Turns" span.
    pub fn start_turn(&mut self, index: u64) -> Span {
        let turn_span = self.turns_root.in_scope(|| tracing::info_span!("turn", number = index));
        self.current_turn = Some(turn_span.clone());
        turn_span
    }

    pub fn end_turn(&mut self) {
        self.current_turn = None;
    }

    /// A per-engine child span (e.g. "stt", "llm") under the current turn.
    /// Returns `None` if no turn is open — callers should treat that as a
    /// logging no-op rather than panic, since span bookkeeping must never
    /// be load-bearing for pipeline correctness.
    pub fn child_span(&self, name: &'static str) -> Option<Span> {
        self.current_turn.as_ref().map(|turn| turn.in_scope(|| tracing::info_span!("engine", name)))
    }
}
