#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("handshake: {0}")]
    Handshake(String),
    /// Registration ack failure or missing token — fatal to the worker
    /// (spec §7 Authentication).
    #[error("authentication: {0}")]
    Authentication(String),
    #[error("reconnect exhausted after {0} attempts")]
    ReconnectExhausted(u32),
    #[error("shutdown")]
    Shutdown,
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
