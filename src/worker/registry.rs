//! Task registry: owns the worker tasks and routes commands to them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tracing::info;

use crate::config::PoolConfig;
use crate::error::{ConfigError, TaskError};
use crate::worker::barrier::SyncBarrier;
use crate::worker::events::{EventBus, TaskEvent};
use crate::worker::state::{Priority, TaskId, TaskStatus, WorkloadKind};
use crate::worker::task::{TaskSnapshot, WorkerTask};

/// A command that can be routed to one task or to all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCommand {
    Start,
    Pause,
    Resume,
    Stop,
}

impl TaskCommand {
    fn apply(self, task: &WorkerTask) {
        match self {
            Self::Start => task.start(),
            Self::Pause => task.pause(),
            Self::Resume => task.resume(),
            Self::Stop => task.stop(),
        }
    }
}

/// Result of a synchronize request.
#[derive(Debug, Clone)]
pub enum SyncReport {
    /// No task was Running or Ready; no barrier was built.
    NothingToSynchronize,
    /// A barrier was built for `participants` tasks.
    Started {
        participants: usize,
        barrier: Arc<SyncBarrier>,
    },
}

/// Manages the collection of worker tasks.
pub struct TaskRegistry {
    /// Tasks in insertion order.
    tasks: RwLock<Vec<WorkerTask>>,
    next_id: AtomicU64,
    config: Arc<PoolConfig>,
    events: EventBus,
}

impl TaskRegistry {
    /// Create an empty registry. Rejects configs that `validate()` refuses.
    pub fn new(config: PoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let events = EventBus::new(config.event_capacity);
        Ok(Self {
            tasks: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            config: Arc::new(config),
            events,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Subscribe to change notifications from every task.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Create a new task in the `Ready` state.
    pub async fn add_task(
        &self,
        name: impl Into<String>,
        priority: Priority,
        kind: WorkloadKind,
    ) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let task = WorkerTask::new(
            id,
            name,
            priority,
            kind,
            Arc::clone(&self.config),
            self.events.clone(),
        );
        info!(task_id = %id, name = task.name(), %priority, workload = %kind, "Task added");
        self.tasks.write().await.push(task);
        id
    }

    /// Get a task by ID.
    pub async fn get(&self, id: TaskId) -> Result<WorkerTask, TaskError> {
        self.tasks
            .read()
            .await
            .iter()
            .find(|t| t.id() == id)
            .cloned()
            .ok_or(TaskError::NotFound { id })
    }

    /// Apply a command to one task.
    pub async fn command(&self, id: TaskId, command: TaskCommand) -> Result<(), TaskError> {
        let task = self.get(id).await?;
        command.apply(&task);
        Ok(())
    }

    pub async fn start(&self, id: TaskId) -> Result<(), TaskError> {
        self.command(id, TaskCommand::Start).await
    }

    pub async fn pause(&self, id: TaskId) -> Result<(), TaskError> {
        self.command(id, TaskCommand::Pause).await
    }

    pub async fn resume(&self, id: TaskId) -> Result<(), TaskError> {
        self.command(id, TaskCommand::Resume).await
    }

    pub async fn stop(&self, id: TaskId) -> Result<(), TaskError> {
        self.command(id, TaskCommand::Stop).await
    }

    /// Apply a command to every task. A task that faults while handling it
    /// ends up in `Error` on its own; the others are unaffected.
    pub async fn for_each(&self, command: TaskCommand) {
        let tasks = self.tasks.read().await.clone();
        for task in &tasks {
            command.apply(task);
        }
        info!(?command, tasks = tasks.len(), "Command applied to all tasks");
    }

    pub async fn start_all(&self) {
        self.for_each(TaskCommand::Start).await
    }

    pub async fn pause_all(&self) {
        self.for_each(TaskCommand::Pause).await
    }

    pub async fn resume_all(&self) {
        self.for_each(TaskCommand::Resume).await
    }

    pub async fn stop_all(&self) {
        self.for_each(TaskCommand::Stop).await
    }

    /// Rendezvous every Running or Ready task on a fresh barrier.
    ///
    /// Returns without waiting for the release.
    pub async fn synchronize_all(&self) -> SyncReport {
        let eligible: Vec<WorkerTask> = self
            .tasks
            .read()
            .await
            .iter()
            .filter(|t| matches!(t.status(), TaskStatus::Running | TaskStatus::Ready))
            .cloned()
            .collect();

        if eligible.is_empty() {
            info!("No tasks to synchronize");
            return SyncReport::NothingToSynchronize;
        }

        let barrier = Arc::new(SyncBarrier::new(eligible.len()));
        let blocking = eligible
            .iter()
            .filter(|task| task.join_synchronization(Arc::clone(&barrier)))
            .count();

        info!(
            participants = eligible.len(),
            blocking, "Synchronization started"
        );
        SyncReport::Started {
            participants: eligible.len(),
            barrier,
        }
    }

    /// Stop a task and remove it, releasing its scratch resource.
    pub async fn remove_task(&self, id: TaskId) -> Result<TaskSnapshot, TaskError> {
        let task = {
            let mut tasks = self.tasks.write().await;
            let index = tasks
                .iter()
                .position(|t| t.id() == id)
                .ok_or(TaskError::NotFound { id })?;
            tasks.remove(index)
        };

        task.dispose();
        task.join().await;
        info!(task_id = %id, "Task removed");
        Ok(task.snapshot())
    }

    /// Stop every task and wait for all run loops to exit.
    pub async fn shutdown(&self) {
        let tasks = self.tasks.read().await.clone();
        for task in &tasks {
            task.stop();
        }
        join_all(tasks.iter().map(WorkerTask::join)).await;
        info!(tasks = tasks.len(), "All run loops exited");
    }

    /// Snapshots of all tasks, in insertion order.
    pub async fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.tasks
            .read()
            .await
            .iter()
            .map(WorkerTask::snapshot)
            .collect()
    }

    /// Tasks currently Running, Paused or Synchronizing.
    pub async fn active_count(&self) -> usize {
        self.tasks
            .read()
            .await
            .iter()
            .filter(|t| t.status().is_active())
            .count()
    }

    pub async fn total_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Get summary of all tasks.
    pub async fn summary(&self) -> PoolSummary {
        let tasks = self.tasks.read().await;

        let mut summary = PoolSummary::default();
        for task in tasks.iter() {
            match task.status() {
                TaskStatus::Ready => summary.ready += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::Paused => summary.paused += 1,
                TaskStatus::Synchronizing => summary.synchronizing += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Stopped => summary.stopped += 1,
                TaskStatus::Error => summary.error += 1,
            }
        }

        summary.total = tasks.len();
        summary.active = summary.running + summary.paused + summary.synchronizing;
        summary
    }
}

/// Summary of all tasks.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub total: usize,
    pub active: usize,
    pub ready: usize,
    pub running: usize,
    pub paused: usize,
    pub synchronizing: usize,
    pub completed: usize,
    pub stopped: usize,
    pub error: usize,
}
