//! `voicecore-worker` — Worker Supervisor (C2), Resource Pool (C3), and Job
//! Context (C4): everything between the registry link and the pipeline.

pub mod error;
pub mod job_context;
pub mod resource_pool;
pub mod supervisor;

pub use error::{Result, WorkerError};
pub use job_context::JobContext;
pub use resource_pool::{Executor, ResourcePool};
pub use supervisor::{Entrypoint, Supervisor};
