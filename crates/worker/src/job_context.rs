//! Job Context (C4) — connects a job's Room, holds its pipeline, and runs
//! an ordered, idempotent shutdown chain. Grounded on the `AddShutdownCallback`
//! pattern (spec §4.4) and the `catch_unwind` panic-isolation idiom the
//! registry client uses for per-call failure containment.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_core::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use voicecore_domain::room::Room;

type ShutdownCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Canonical per-job lifecycle handle (spec §4.4). One instance is created
/// per job assignment and handed to the configured entrypoint.
pub struct JobContext {
    pub room_options: serde_json::Value,
    room: Mutex<Option<Arc<dyn Room>>>,
    shutdown_callbacks: Mutex<Vec<ShutdownCallback>>,
    is_shutting_down: AtomicBool,
    session_end: Arc<Notify>,
    /// Cancelled and reset on every participant join; when it finally fires
    /// uninterrupted for `session_timeout`, the session auto-ends (spec §4.4
    /// "Session auto-end", scenario S6).
    auto_end_cancel: Mutex<Option<CancellationToken>>,
}

impl JobContext {
    pub fn new(room_options: serde_json::Value) -> Self {
        Self {
            room_options,
            room: Mutex::new(None),
            shutdown_callbacks: Mutex::new(Vec::new()),
            is_shutting_down: AtomicBool::new(false),
            session_end: Arc::new(Notify::new()),
            auto_end_cancel: Mutex::new(None),
        }
    }

    /// Install the connected Room handle (console mode substitutes a local
    /// audio I/O shim in place of a real Room — the contract is the same).
    pub fn set_room(&self, room: Arc<dyn Room>) {
        *self.room.lock() = Some(room);
    }

    pub fn room(&self) -> Option<Arc<dyn Room>> {
        self.room.lock().clone()
    }

    /// Append a shutdown callback. Callbacks run in registration order on
    /// [`shutdown`](Self::shutdown), each isolated so a panicking callback
    /// does not skip the rest.
    pub fn add_shutdown_callback<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.shutdown_callbacks.lock().push(Box::new(move || {
            Box::pin(callback()) as Pin<Box<dyn Future<Output = ()> + Send>>
        }));
    }

    /// Run every registered callback exactly once, in order. Idempotent:
    /// a second call is a no-op.
    pub async fn shutdown(&self) {
        if self.is_shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let callbacks = std::mem::take(&mut *self.shutdown_callbacks.lock());
        for callback in callbacks {
            if AssertUnwindSafe(callback()).catch_unwind().await.is_err() {
                tracing::error!("job shutdown callback panicked, continuing with remaining callbacks");
            }
        }
    }

    /// Signal that the session has ended, waking any `RunUntilShutdown` caller.
    pub fn notify_session_end(&self) {
        self.session_end.notify_one();
    }

    /// Arm (or re-arm) the session auto-end timer. Cancelling the returned
    /// token before it fires resets the countdown — callers cancel the
    /// previous token on every participant join.
    pub fn arm_auto_end(self: &Arc<Self>, timeout: Duration) -> CancellationToken {
        let token = CancellationToken::new();
        *self.auto_end_cancel.lock() = Some(token.clone());

        let ctx = self.clone();
        let token_clone = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    tracing::info!("session auto-end timer elapsed");
                    ctx.notify_session_end();
                }
                _ = token_clone.cancelled() => {}
            }
        });
        token
    }

    pub fn cancel_auto_end(&self) {
        if let Some(token) = self.auto_end_cancel.lock().take() {
            token.cancel();
        }
    }

    /// The canonical lifecycle: connect the room, install a session-end
    /// callback, optionally wait for one participant, start the session,
    /// then block until it ends. On any exit path the session is closed,
    /// then the context, in that order (spec §4.4).
    pub async fn run_until_shutdown<S, F>(
        self: &Arc<Self>,
        wait_for_participant: Option<&str>,
        start_session: S,
        close_session: F,
    ) where
        S: FnOnce() -> BoxFuture<'static, ()>,
        F: FnOnce() -> BoxFuture<'static, ()>,
    {
        if let Some(room) = self.room() {
            if let Err(e) = room.join().await {
                tracing::error!(error = %e, "room join failed");
            }
            if wait_for_participant.is_some() {
                let _ = room.wait_for_participant(wait_for_participant).await;
            }
        }

        start_session().await;

        self.session_end.notified().await;

        close_session().await;
        self.shutdown().await;
    }
}
