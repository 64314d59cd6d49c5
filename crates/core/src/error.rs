use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in the zeus control plane.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no free ports in range [{0}, {1})")]
    NoPortsAvailable(u16, u16),

    #[error("port {0} is already in use")]
    PortInUse(u16),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("No healthy {0} workers available")]
    NoHealthyWorkers(String),

    #[error("worker {0} is not connected")]
    NotConnected(String),

    #[error("worker {0} did not become ready within {1:?}")]
    SpawnTimeout(String, Duration),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("malformed envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("launch error: {0}")]
    Launch(String),

    #[error("probe error: {0}")]
    Probe(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
