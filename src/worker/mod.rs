//! Worker system — simulated tasks under interactive control.
//!
//! Core components:
//! - `state` — Identity types and the task state machine (Ready → Running → Completed/Stopped/Error)
//! - `workload` — Per-unit cost planning and execution for each workload kind
//! - `scratch` — Per-run scratch file, deleted when dropped
//! - `gate` — Pause gate and per-run cancellation
//! - `barrier` — One-shot rendezvous barrier
//! - `events` — Change notifications
//! - `task` — A single worker task and its run loop
//! - `registry` — TaskRegistry owning every task and routing commands

pub mod barrier;
pub mod events;
pub mod gate;
pub mod registry;
pub mod scratch;
pub mod state;
pub mod task;
pub mod workload;

pub use barrier::SyncBarrier;
pub use events::{EventBus, TaskChange, TaskEvent};
pub use registry::{PoolSummary, SyncReport, TaskCommand, TaskRegistry};
pub use state::{Priority, TaskId, TaskStatus, WorkloadKind};
pub use task::{TaskSnapshot, WorkerTask};
