//! Error types for the delivery core.

use thiserror::Error;

use crate::template::TemplateError;

/// Errors surfaced to the host by driver construction and lifecycle calls.
///
/// Delivery failures are not part of this type: they never reach the host
/// and are handled by the worker (requeue and suspend).
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration rejected by validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A template failed to compile.
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Another running driver holds the queue with this persist name.
    #[error("Delivery queue already in use: {0}")]
    QueueInUse(String),

    /// The worker thread could not be spawned.
    #[error("Failed to spawn delivery worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// The transport runtime could not be built.
    #[error("Failed to build transport runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// The driver is not initialised.
    #[error("Driver is not running")]
    NotRunning,

    /// `init` called on a driver that is already running.
    #[error("Driver is already running")]
    AlreadyRunning,

    /// The worker thread panicked or never started; its transport state is lost.
    #[error("Delivery worker is gone (it panicked or failed to start)")]
    WorkerPanicked,

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
