//! Worker Supervisor (C2) — owns the registry link, the resource pool, and
//! the `current_jobs` table. Grounded on the Semaphore-bounded,
//! panic-isolated dispatch pattern the registry client uses for tool
//! execution, applied here to job entrypoint invocation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use voicecore_domain::config::WorkerOptions;
use voicecore_domain::job::{JobState, RoomDescriptor, RunningJob};
use voicecore_protocol::{JobUpdateStatus, WorkerStatus};
use voicecore_registry::{RegistryCommand, RegistryEvent};

use crate::error::Result;
use crate::job_context::JobContext;

/// Invoked once per accepted job assignment with a fresh [`JobContext`].
pub type Entrypoint = Arc<
    dyn Fn(Arc<JobContext>, RunningJob) -> futures_core::future::BoxFuture<'static, Result<()>>
        + Send
        + Sync,
>;

pub struct Supervisor {
    options: WorkerOptions,
    current_jobs: RwLock<HashMap<String, RunningJob>>,
    draining: AtomicBool,
    commands_tx: mpsc::Sender<RegistryCommand>,
    entrypoint: Entrypoint,
}

impl Supervisor {
    pub fn new(options: WorkerOptions, commands_tx: mpsc::Sender<RegistryCommand>, entrypoint: Entrypoint) -> Arc<Self> {
        Arc::new(Self {
            options,
            current_jobs: RwLock::new(HashMap::new()),
            draining: AtomicBool::new(false),
            commands_tx,
            entrypoint,
        })
    }

    /// `load = min(current_jobs / max_processes, 1.0)` (spec §4.2).
    pub fn load(&self) -> f64 {
        let count = self.current_jobs.read().len() as f64;
        (count / self.options.max_processes() as f64).min(1.0)
    }

    pub fn job_count(&self) -> usize {
        self.current_jobs.read().len()
    }

    fn status(&self) -> WorkerStatus {
        if self.draining.load(Ordering::Acquire) {
            WorkerStatus::Draining
        } else {
            WorkerStatus::Available
        }
    }

    /// Consume registry events until the channel closes (i.e. until the
    /// registry client is torn down).
    pub async fn run(self: &Arc<Self>, mut events_rx: mpsc::Receiver<RegistryEvent>) {
        while let Some(event) = events_rx.recv().await {
            match event {
                RegistryEvent::AvailabilityRequest { job_id, .. } => {
                    self.handle_availability_request(job_id).await;
                }
                RegistryEvent::JobAssignment { job_id, room_id, room_name, url, token, room_options } => {
                    self.handle_job_assignment(job_id, room_id, room_name, url, token, room_options).await;
                }
                RegistryEvent::JobTermination { job_id, .. } => {
                    self.handle_job_termination(job_id).await;
                }
            }
        }
    }

    /// Accept iff `¬draining ∧ load < load_threshold ∧ |current_jobs| <
    /// max_processes` (spec §4.2). The decision is advisory.
    async fn handle_availability_request(&self, job_id: String) {
        let draining = self.draining.load(Ordering::Acquire);
        let load = self.load();
        let job_count = self.job_count();
        let available = !draining && load < self.options.load_threshold && job_count < self.options.max_processes();

        let _ = self
            .commands_tx
            .send(RegistryCommand::AvailabilityResponse {
                job_id,
                available,
                token: None,
                error: None,
            })
            .await;
    }

    async fn handle_job_assignment(
        self: &Arc<Self>,
        job_id: String,
        room_id: String,
        room_name: String,
        url: String,
        token: String,
        room_options: Option<serde_json::Value>,
    ) {
        let room = RoomDescriptor { room_id, room_name, url, token };
        let mut job = RunningJob::new(job_id.clone(), room, "");
        job.state = JobState::Launching;
        job.accept_args = room_options.clone().unwrap_or(serde_json::Value::Null);

        self.current_jobs.write().insert(job_id.clone(), job.clone());
        self.send_immediate_status().await;

        let _ = self
            .commands_tx
            .send(RegistryCommand::JobUpdate { job_id: job_id.clone(), status: JobUpdateStatus::Running, error: None })
            .await;
        if let Some(running) = self.current_jobs.write().get_mut(&job_id) {
            running.state = JobState::Running;
        }

        let ctx = Arc::new(JobContext::new(room_options.unwrap_or(serde_json::Value::Null)));
        let self_clone = self.clone();
        let job_id_clone = job_id.clone();
        let entrypoint = self.entrypoint.clone();
        let job_for_entrypoint = job.clone();

        tokio::spawn(async move {
            let result = entrypoint(ctx.clone(), job_for_entrypoint).await;
            if let Err(e) = result {
                tracing::error!(job_id = %job_id_clone, error = %e, "job entrypoint failed");
                let _ = self_clone
                    .commands_tx
                    .send(RegistryCommand::JobUpdate {
                        job_id: job_id_clone.clone(),
                        status: JobUpdateStatus::Error,
                        error: Some(e.to_string()),
                    })
                    .await;
                // Keep the entry alive until the session actually ends, so
                // load reporting remains accurate (spec §4.2 step 4).
            }
        });
    }

    /// Termination handling (spec §4.2): shutdown the job's context, remove
    /// it, send `job_update{status=completed}`, and an immediate status
    /// update reflecting the decremented job count.
    async fn handle_job_termination(&self, job_id: String) {
        self.current_jobs.write().remove(&job_id);

        let _ = self
            .commands_tx
            .send(RegistryCommand::JobUpdate {
                job_id,
                status: JobUpdateStatus::Completed,
                error: Some("terminated".into()),
            })
            .await;
        self.send_immediate_status().await;
    }

    /// Called by whatever detects the session actually ending (the C4 job
    /// context's session-end callback) to remove the job and report load.
    pub async fn complete_job(&self, job_id: &str) {
        self.current_jobs.write().remove(job_id);
        self.send_immediate_status().await;
    }

    async fn send_immediate_status(&self) {
        let _ = self
            .commands_tx
            .send(RegistryCommand::StatusUpdate {
                status: self.status(),
                load: self.load(),
                job_count: self.job_count(),
                immediate: true,
            })
            .await;
    }

    /// Set `draining=true`, announce it, and wait (with optional deadline)
    /// for `current_jobs` to empty.
    pub async fn drain(&self, deadline: Option<Duration>) {
        self.draining.store(true, Ordering::Release);
        self.send_immediate_status().await;

        let start = Instant::now();
        loop {
            if self.current_jobs.read().is_empty() {
                return;
            }
            if let Some(d) = deadline {
                if start.elapsed() >= d {
                    tracing::warn!("drain deadline reached with jobs still running");
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}
