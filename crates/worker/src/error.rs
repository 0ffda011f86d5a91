#[derive(thiserror::Error, Debug)]
pub enum WorkerError {
    #[error("no available resources for task execution")]
    NoAvailableResources,
    #[error("resource {0} failed to initialize: {1}")]
    ResourceInit(String, String),
    #[error("job {0} not found")]
    JobNotFound(String),
    #[error("entrypoint failed: {0}")]
    Entrypoint(String),
    #[error("{0}")]
    Domain(#[from] voicecore_domain::Error),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
