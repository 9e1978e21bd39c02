//! Error types for the worker pool.

use crate::worker::state::TaskId;

/// Top-level error type for the pool.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Workload error: {0}")]
    Workload(#[from] WorkloadError),

    #[error("Barrier error: {0}")]
    Barrier(#[from] BarrierError),

    #[error("Console error: {0}")]
    Console(#[from] ConsoleError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Task lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {id} not found")]
    NotFound { id: TaskId },

    #[error("Task {id} could not allocate its scratch resource: {reason}")]
    ScratchSetup { id: TaskId, reason: String },

    #[error("Task {id} cannot start outside of a tokio runtime")]
    NoRuntime { id: TaskId },
}

/// Failures raised while executing a single unit of simulated work.
#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error("Scratch resource is not allocated for this run")]
    ScratchMissing,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rendezvous errors.
#[derive(Debug, thiserror::Error)]
pub enum BarrierError {
    #[error("Barrier expecting {expected} participants received an extra arrival")]
    Overflow { expected: usize },
}

/// Interactive console errors.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Missing argument for {command}: {argument}")]
    MissingArgument { command: String, argument: String },

    #[error("Invalid argument {value:?}: {reason}")]
    InvalidArgument { value: String, reason: String },
}

/// Result type alias for the pool.
pub type Result<T> = std::result::Result<T, Error>;
