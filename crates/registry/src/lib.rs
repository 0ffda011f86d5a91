//! `voicecore-registry` — Registry Client (C1): a persistent duplex link
//! between a worker process and the job registry.
//!
//! A worker opens one connection, registers with its capabilities and
//! current load, then exchanges `availability_request` / `job_assignment`
//! / `job_termination` frames with the registry for as long as the process
//! runs. This crate owns the transport, the handshake, the reconnect policy,
//! and the outbound debounce; it knows nothing about job execution —
//! `voicecore-worker` consumes [`RegistryEvent`] and produces
//! [`RegistryCommand`].
//!
//! # Connection flow
//!
//! 1. Connect WS, send `register { agent_name, namespace, capabilities, .. }`
//! 2. Wait for `register { success, worker_id }` within `initialize_timeout`
//! 3. Main loop: dispatch inbound frames to `events_tx`, forward outbound
//!    commands from `commands_rx` (debouncing `status_update`)
//! 4. On disconnect: reconnect with jittered exponential back-off

pub mod client;
pub mod error;
pub mod reconnect;
pub mod worker_id;

pub use client::{RegistryClient, RegistryCommand, RegistryEvent};
pub use error::RegistryError;
pub use reconnect::ReconnectBackoff;

pub use voicecore_protocol::{Inbound, JobUpdateStatus, Outbound, WorkerStatus};
