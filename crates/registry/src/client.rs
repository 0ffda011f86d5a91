//! Registry Client (C1) — a persistent duplex link to the job registry.
//!
//! Connect → handshake → message loop shape, the ping/writer/reader task
//! split via `mpsc`, and the reconnect-with-backoff outer loop are ported
//! from the teacher's node client; the message set and handshake semantics
//! are this system's own.

use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use voicecore_protocol::{Inbound, JobUpdateStatus, Outbound, WorkerStatus};

use crate::error::RegistryError;
use crate::reconnect::ReconnectBackoff;
use crate::worker_id;

/// Minimum interval between non-immediate `status_update` frames.
const STATUS_DEBOUNCE: Duration = Duration::from_secs(2);

/// Events delivered from the registry to the Worker Supervisor.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    AvailabilityRequest {
        job_id: String,
        job_type: String,
        room_id: String,
        room_name: String,
        agent_name: String,
        namespace: String,
        payload: Option<serde_json::Value>,
    },
    JobAssignment {
        job_id: String,
        room_id: String,
        room_name: String,
        url: String,
        token: String,
        room_options: Option<serde_json::Value>,
    },
    JobTermination {
        job_id: String,
        reason: Option<String>,
    },
}

/// Commands accepted from the Worker Supervisor and forwarded to the registry.
#[derive(Debug, Clone)]
pub enum RegistryCommand {
    StatusUpdate {
        status: WorkerStatus,
        load: f64,
        job_count: usize,
        /// Bypasses the 2s debounce (job-count-change-triggered updates).
        immediate: bool,
    },
    AvailabilityResponse {
        job_id: String,
        available: bool,
        token: Option<String>,
        error: Option<String>,
    },
    JobUpdate {
        job_id: String,
        status: JobUpdateStatus,
        error: Option<String>,
    },
}

/// A fully-configured registry client ready to connect.
pub struct RegistryClient {
    pub registry_ws_url: String,
    pub auth_token: String,
    pub agent_id: String,
    pub agent_name: String,
    pub namespace: String,
    pub version: String,
    pub capabilities: Vec<String>,
    pub load_threshold: f64,
    pub max_processes: usize,
    pub ping_interval: Duration,
    pub initialize_timeout: Duration,
    pub reconnect_backoff: ReconnectBackoff,
}

impl RegistryClient {
    /// Run the client. Connects, handshakes, and enters the message loop;
    /// automatically reconnects per [`ReconnectBackoff`] on transport loss.
    /// Returns only on authentication failure, reconnect exhaustion, or
    /// `shutdown` cancellation.
    pub async fn run(
        self,
        events_tx: mpsc::Sender<RegistryEvent>,
        mut commands_rx: mpsc::Receiver<RegistryCommand>,
        shutdown: CancellationToken,
    ) -> Result<(), RegistryError> {
        let mut attempt: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                return Err(RegistryError::Shutdown);
            }

            let result = tokio::select! {
                r = self.connect_and_run(&events_tx, &mut commands_rx) => r,
                _ = shutdown.cancelled() => {
                    tracing::info!(agent_id = %self.agent_id, "shutdown requested");
                    return Err(RegistryError::Shutdown);
                }
            };

            match result {
                Ok(handshake_completed) => {
                    tracing::info!(
                        agent_id = %self.agent_id,
                        handshake_completed,
                        "registry connection closed"
                    );
                    if handshake_completed {
                        attempt = 0;
                    }
                }
                Err(RegistryError::Authentication(msg)) => {
                    tracing::error!(agent_id = %self.agent_id, error = %msg, "registry authentication failed");
                    return Err(RegistryError::Authentication(msg));
                }
                Err(e) => {
                    tracing::warn!(agent_id = %self.agent_id, attempt, error = %e, "registry connection lost");
                }
            }

            if self.reconnect_backoff.should_give_up(attempt) {
                tracing::error!(agent_id = %self.agent_id, attempts = attempt, "max reconnect attempts exhausted");
                return Err(RegistryError::ReconnectExhausted(attempt));
            }

            let delay = self.reconnect_backoff.delay_for_attempt(attempt);
            tracing::info!(
                agent_id = %self.agent_id,
                delay_ms = delay.as_millis() as u64,
                attempt = attempt + 1,
                "reconnecting"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return Err(RegistryError::Shutdown),
            }

            attempt += 1;
        }
    }

    /// Same as [`run`](Self::run), spawned onto the runtime.
    pub fn spawn(
        self,
        events_tx: mpsc::Sender<RegistryEvent>,
        commands_rx: mpsc::Receiver<RegistryCommand>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<Result<(), RegistryError>> {
        tokio::spawn(async move { self.run(events_tx, commands_rx, shutdown).await })
    }

    /// Single connection lifecycle: connect -> handshake -> message loop.
    /// Returns `Ok(true)` once the handshake has completed.
    async fn connect_and_run(
        &self,
        events_tx: &mpsc::Sender<RegistryEvent>,
        commands_rx: &mut mpsc::Receiver<RegistryCommand>,
    ) -> Result<bool, RegistryError> {
        tracing::info!(url = %self.registry_ws_url, agent_id = %self.agent_id, "connecting to registry");

        let (ws, _response) = tokio_tungstenite::connect_async(&self.registry_ws_url)
            .await
            .map_err(|e| RegistryError::Transport(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let remembered_worker_id = worker_id::recall(&self.agent_id);
        let register = Outbound::Register {
            worker_id: remembered_worker_id,
            agent_name: self.agent_name.clone(),
            namespace: self.namespace.clone(),
            version: self.version.clone(),
            capabilities: self.capabilities.clone(),
            load_threshold: self.load_threshold,
            max_processes: self.max_processes,
            token: self.auth_token.clone(),
        };
        let json = serde_json::to_string(&register).map_err(|e| RegistryError::Other(e.into()))?;
        sink.send(Message::Text(json))
            .await
            .map_err(|e| RegistryError::Transport(e.to_string()))?;

        let handshake = tokio::time::timeout(self.initialize_timeout, async {
            while let Some(Ok(msg)) = stream.next().await {
                if let Message::Text(text) = msg {
                    match Inbound::parse(&text) {
                        Some(Inbound::Register { success: true, worker_id, .. }) => {
                            return Ok(worker_id);
                        }
                        Some(Inbound::Register { success: false, message, .. }) => {
                            return Err(RegistryError::Authentication(
                                message.unwrap_or_else(|| "registration rejected".into()),
                            ));
                        }
                        _ => continue,
                    }
                }
            }
            Err(RegistryError::Handshake(
                "connection closed before register ack".into(),
            ))
        })
        .await;

        let worker_id = match handshake {
            Ok(inner) => inner?,
            Err(_) => return Err(RegistryError::Handshake("register ack timeout".into())),
        };

        worker_id::remember(&self.agent_id, &worker_id);
        tracing::info!(agent_id = %self.agent_id, worker_id = %worker_id, "registered with registry");

        let ws = sink
            .reunite(stream)
            .map_err(|e| RegistryError::Transport(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(64);

        let ping_tx = outbound_tx.clone();
        let ping_interval = self.ping_interval;
        let ping_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(ping_interval);
            loop {
                interval.tick().await;
                let msg = Outbound::Ping { timestamp: Utc::now().timestamp_millis() };
                if ping_tx.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let writer_task = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize outbound registry message");
                        continue;
                    }
                };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        });

        let mut last_status_sent: Option<Instant> = None;

        loop {
            tokio::select! {
                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match Inbound::parse(&text) {
                                Some(Inbound::AvailabilityRequest { job_id, job_type, room_id, room_name, agent_name, namespace, payload }) => {
                                    let _ = events_tx.send(RegistryEvent::AvailabilityRequest {
                                        job_id, job_type, room_id, room_name, agent_name, namespace, payload,
                                    }).await;
                                }
                                Some(Inbound::JobAssignment { job_id, room_id, room_name, url, token, room_options }) => {
                                    let _ = events_tx.send(RegistryEvent::JobAssignment {
                                        job_id, room_id, room_name, url, token, room_options,
                                    }).await;
                                }
                                Some(Inbound::JobTermination { job_id, reason }) => {
                                    let _ = events_tx.send(RegistryEvent::JobTermination { job_id, reason }).await;
                                }
                                Some(Inbound::Pong { .. }) => {
                                    tracing::trace!("received pong");
                                }
                                Some(Inbound::Register { .. }) => {
                                    tracing::warn!("unexpected register ack after handshake, ignoring");
                                }
                                None => {
                                    tracing::debug!(raw = %text, "unknown or malformed registry message, dropping");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("registry closed connection");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "registry transport error");
                            break;
                        }
                    }
                }
                cmd = commands_rx.recv() => {
                    match cmd {
                        Some(RegistryCommand::StatusUpdate { status, load, job_count, immediate }) => {
                            let now = Instant::now();
                            let due = immediate
                                || last_status_sent.map_or(true, |t| now.duration_since(t) >= STATUS_DEBOUNCE);
                            if due {
                                last_status_sent = Some(now);
                                let _ = outbound_tx.send(Outbound::StatusUpdate {
                                    worker_id: worker_id.clone(),
                                    agent_name: self.agent_name.clone(),
                                    status,
                                    load,
                                    job_count,
                                }).await;
                            }
                        }
                        Some(RegistryCommand::AvailabilityResponse { job_id, available, token, error }) => {
                            let _ = outbound_tx.send(Outbound::AvailabilityResponse { job_id, available, token, error }).await;
                        }
                        Some(RegistryCommand::JobUpdate { job_id, status, error }) => {
                            let _ = outbound_tx.send(Outbound::JobUpdate { job_id, status, error }).await;
                        }
                        None => {
                            tracing::info!("command channel closed, disconnecting");
                            break;
                        }
                    }
                }
            }
        }

        let _ = outbound_tx.send(Outbound::StatusUpdate {
            worker_id,
            agent_name: self.agent_name.clone(),
            status: WorkerStatus::Offline,
            load: 0.0,
            job_count: 0,
        }).await;
        // Give the writer task a moment to flush the offline status before
        // the connection is torn down.
        tokio::time::sleep(Duration::from_millis(50)).await;

        ping_task.abort();
        writer_task.abort();

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> RegistryClient {
        RegistryClient {
            registry_ws_url: "ws://localhost:4000/v1/worker".into(),
            auth_token: "secret".into(),
            agent_id: "agent-1".into(),
            agent_name: "demo-agent".into(),
            namespace: "default".into(),
            version: "0.1.0".into(),
            capabilities: vec!["voice".into()],
            load_threshold: 0.8,
            max_processes: 10,
            ping_interval: Duration::from_secs(15),
            initialize_timeout: Duration::from_secs(30),
            reconnect_backoff: ReconnectBackoff::default(),
        }
    }

    #[test]
    fn builds_with_expected_defaults() {
        let client = test_client();
        assert_eq!(client.max_processes, 10);
        assert_eq!(client.reconnect_backoff.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn status_debounce_window_matches_spec() {
        assert_eq!(STATUS_DEBOUNCE, Duration::from_secs(2));
    }
}
