//! Resource Pool (C3) — a pool of homogeneous executors plus an optional
//! dedicated inference executor, ported from the original's
//! `ResourceManager`: idle-target creation loop, health-check-and-replace
//! loop, and task dispatch that preferentially routes inference tasks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use voicecore_domain::config::{ExecutorKind, WorkerOptions};
use voicecore_domain::resource::{Resource, ResourceStatus, TaskConfig, TaskResult, TaskStatus, TaskType};

use crate::error::{Result, WorkerError};

/// Interval at which the resource-creation loop checks the idle target.
/// Ported verbatim from the original's comment "Check every 10 seconds
/// instead of 5" — a deliberately slowed, tuned operational constant.
const RESOURCE_CREATION_INTERVAL: Duration = Duration::from_secs(10);
const RESOURCE_CREATION_INITIAL_DELAY: Duration = Duration::from_secs(10);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// An executor entrypoint: runs one task to completion. Process vs. thread
/// isolation is a deployment concern of the concrete implementation; the
/// pool only cares about the `initializing -> idle -> busy -> idle -> ...`
/// lifecycle and health-check liveness.
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn health_check(&self) -> bool;
    async fn shutdown(&self);
    async fn run_task(&self, entrypoint: Arc<dyn Fn() -> Result<serde_json::Value> + Send + Sync>) -> Result<serde_json::Value>;
}

struct ManagedExecutor {
    info: RwLock<Resource>,
    executor: Arc<dyn Executor>,
}

/// A pool of executors (spec §4.3). Targets `num_idle_resources` idle
/// executors bounded by `max_resources`; routes `TaskType::Inference` tasks
/// to a dedicated inference executor when one is configured.
pub struct ResourcePool {
    executor_kind: ExecutorKind,
    num_idle_resources: usize,
    max_resources: usize,
    health_check_interval: Duration,
    make_executor: Box<dyn Fn(&str) -> Arc<dyn Executor> + Send + Sync>,
    resources: RwLock<Vec<Arc<ManagedExecutor>>>,
    dedicated_inference: RwLock<Option<Arc<ManagedExecutor>>>,
    shutdown: CancellationToken,
}

impl ResourcePool {
    pub fn new(
        opts: &WorkerOptions,
        make_executor: impl Fn(&str) -> Arc<dyn Executor> + Send + Sync + 'static,
    ) -> Self {
        Self {
            executor_kind: opts.executor_kind,
            num_idle_resources: opts.num_idle_resources,
            max_resources: opts.max_resources,
            health_check_interval: HEALTH_CHECK_INTERVAL,
            make_executor: Box::new(make_executor),
            resources: RwLock::new(Vec::new()),
            dedicated_inference: RwLock::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start the pool: optionally create the dedicated inference executor,
    /// create the initial idle set, then spawn the creation and health-check
    /// background loops.
    pub async fn start(self: &Arc<Self>, use_dedicated_inference: bool) -> Result<()> {
        tracing::info!("starting resource pool");

        if use_dedicated_inference {
            self.create_dedicated_inference().await?;
        }

        for _ in 0..self.num_idle_resources {
            self.create_resource().await?;
        }

        let creation_pool = self.clone();
        tokio::spawn(async move { creation_pool.resource_creation_loop().await });

        let health_pool = self.clone();
        tokio::spawn(async move { health_pool.health_check_loop().await });

        tracing::info!("resource pool started");
        Ok(())
    }

    pub async fn stop(&self) {
        tracing::info!("stopping resource pool");
        self.shutdown.cancel();

        for managed in self.resources.read().iter() {
            managed.executor.shutdown().await;
        }
        if let Some(managed) = self.dedicated_inference.read().clone() {
            managed.executor.shutdown().await;
        }
        tracing::info!("resource pool stopped");
    }

    async fn create_resource(&self) -> Result<()> {
        let resource_id = format!("{:?}-{}", self.executor_kind, uuid::Uuid::new_v4().simple());
        let executor = (self.make_executor)(&resource_id);
        executor
            .initialize()
            .await
            .map_err(|e| WorkerError::ResourceInit(resource_id.clone(), e.to_string()))?;

        let mut info = Resource::new(resource_id.clone(), self.executor_kind);
        info.status = ResourceStatus::Idle;
        let managed = Arc::new(ManagedExecutor { info: RwLock::new(info), executor });

        self.resources.write().push(managed);
        tracing::info!(resource_id = %resource_id, "created resource");
        Ok(())
    }

    async fn create_dedicated_inference(&self) -> Result<()> {
        tracing::info!("creating dedicated inference resource");
        let resource_id = "dedicated-inference".to_string();
        let executor = (self.make_executor)(&resource_id);
        executor
            .initialize()
            .await
            .map_err(|e| WorkerError::ResourceInit(resource_id.clone(), e.to_string()))?;

        let mut info = Resource::new(resource_id.clone(), self.executor_kind);
        info.status = ResourceStatus::Idle;
        let managed = Arc::new(ManagedExecutor { info: RwLock::new(info), executor });
        *self.dedicated_inference.write() = Some(managed);
        Ok(())
    }

    async fn resource_creation_loop(self: Arc<Self>) {
        tokio::select! {
            _ = tokio::time::sleep(RESOURCE_CREATION_INITIAL_DELAY) => {}
            _ = self.shutdown.cancelled() => return,
        }

        loop {
            if self.shutdown.is_cancelled() {
                return;
            }

            let (available, total) = {
                let resources = self.resources.read();
                (
                    resources.iter().filter(|r| r.info.read().is_available()).count(),
                    resources.len(),
                )
            };

            if available < self.num_idle_resources && total < self.max_resources {
                if let Err(e) = self.create_resource().await {
                    tracing::error!(error = %e, "error in resource creation loop");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(RESOURCE_CREATION_INTERVAL) => {}
                _ = self.shutdown.cancelled() => return,
            }
        }
    }

    async fn health_check_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }

            let snapshot: Vec<Arc<ManagedExecutor>> = self.resources.read().clone();
            for managed in snapshot {
                if !managed.executor.health_check().await {
                    tracing::warn!(resource_id = %managed.info.read().resource_id, "unhealthy resource detected");
                    self.resources.write().retain(|r| !Arc::ptr_eq(r, &managed));
                    managed.executor.shutdown().await;

                    if self.resources.read().len() < self.num_idle_resources {
                        if let Err(e) = self.create_resource().await {
                            tracing::error!(error = %e, "failed to replace unhealthy resource");
                        }
                    }
                }
            }

            let dedicated = self.dedicated_inference.read().clone();
            if let Some(managed) = dedicated {
                if !managed.executor.health_check().await {
                    tracing::warn!("unhealthy dedicated inference resource detected");
                    managed.executor.shutdown().await;
                    if let Err(e) = self.create_dedicated_inference().await {
                        tracing::error!(error = %e, "failed to recreate dedicated inference resource");
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.health_check_interval) => {}
                _ = self.shutdown.cancelled() => return,
            }
        }
    }

    /// Execute a task, retrying up to `task_config.retry_count` times with
    /// linear backoff (`attempt * 1s`, spec §4.3).
    pub async fn execute_task(
        &self,
        task_config: TaskConfig,
        entrypoint: Arc<dyn Fn() -> Result<serde_json::Value> + Send + Sync>,
    ) -> Result<TaskResult> {
        let mut attempt = 0;
        loop {
            let started = Instant::now();
            let outcome = self.execute_task_once(&task_config, entrypoint.clone()).await;
            match outcome {
                Ok(value) => {
                    return Ok(TaskResult {
                        status: TaskStatus::Completed,
                        result: Some(value),
                        error: None,
                        execution_time_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Err(e) if attempt < task_config.retry_count => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                }
                Err(e) => {
                    return Ok(TaskResult {
                        status: TaskStatus::Failed,
                        result: None,
                        error: Some(e.to_string()),
                        execution_time_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }
        }
    }

    async fn execute_task_once(
        &self,
        task_config: &TaskConfig,
        entrypoint: Arc<dyn Fn() -> Result<serde_json::Value> + Send + Sync>,
    ) -> Result<serde_json::Value> {
        if task_config.task_type == TaskType::Inference {
            if let Some(managed) = self.dedicated_inference.read().clone() {
                tracing::info!("routing inference task to dedicated inference resource");
                return self.run_on(&managed, entrypoint).await;
            }
        }

        let managed = self
            .resources
            .read()
            .iter()
            .find(|r| r.info.read().is_available())
            .cloned()
            .ok_or(WorkerError::NoAvailableResources)?;

        self.run_on(&managed, entrypoint).await
    }

    async fn run_on(
        &self,
        managed: &Arc<ManagedExecutor>,
        entrypoint: Arc<dyn Fn() -> Result<serde_json::Value> + Send + Sync>,
    ) -> Result<serde_json::Value> {
        managed.info.write().mark_busy();
        let result = managed.executor.run_task(entrypoint).await;
        {
            let mut info = managed.info.write();
            info.mark_idle();
            info.total_tasks += 1;
            match &result {
                Ok(_) => info.successes += 1,
                Err(_) => info.errors += 1,
            }
        }
        result
    }

    /// Snapshot statistics for diagnostics (spec §4.3 `get_stats`-equivalent).
    pub fn stats(&self) -> Vec<Resource> {
        self.resources.read().iter().map(|r| r.info.read().clone()).collect()
    }
}
