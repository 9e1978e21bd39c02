//! Worker task: one run loop, its status state machine and its signals.
//!
//! All mutable task state sits behind a single mutex. Commands (`start`,
//! `pause`, `resume`, `stop`, `join_synchronization`) take that lock briefly,
//! flip signals and return; they never wait on the run loop. The run loop only
//! touches the state through short synchronous critical sections and checks
//! its own stop token inside each one, so a loop from an earlier run can never
//! write into a later run.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::error::TaskError;
use crate::worker::barrier::SyncBarrier;
use crate::worker::events::{EventBus, TaskChange};
use crate::worker::gate::{PauseGate, RunGate};
use crate::worker::scratch::{ScratchHandle, ScratchResource};
use crate::worker::state::{
    Priority, StateTransition, TaskId, TaskStatus, WorkloadKind,
};
use crate::worker::workload;

/// Transition records kept per task.
const MAX_TRANSITIONS: usize = 64;

/// Handle to a worker task. Cheap to clone; all clones share the same task.
#[derive(Clone)]
pub struct WorkerTask {
    inner: Arc<TaskInner>,
}

struct TaskInner {
    id: TaskId,
    name: String,
    priority: Priority,
    kind: WorkloadKind,
    config: Arc<PoolConfig>,
    events: EventBus,
    pause: PauseGate,
    state: Mutex<TaskState>,
}

struct TaskState {
    status: TaskStatus,
    progress: u8,
    cpu_usage: f64,
    error: Option<String>,
    /// Signals of the current run. `None` outside Running/Paused/Synchronizing.
    run: Option<RunGate>,
    scratch: Option<ScratchResource>,
    loop_handle: Option<JoinHandle<()>>,
    runs: u64,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    transitions: Vec<StateTransition>,
}

/// Point-in-time view of a task for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub priority: Priority,
    pub workload: WorkloadKind,
    pub status: TaskStatus,
    pub progress: u8,
    pub cpu_usage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub runs: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

enum RunOutcome {
    Completed,
    Stopped,
    Faulted(String),
}

enum Advance {
    Continue,
    Completed,
    /// The run this loop belongs to has been stopped.
    Stale,
}

impl WorkerTask {
    /// Create a task in the `Ready` state.
    pub fn new(
        id: TaskId,
        name: impl Into<String>,
        priority: Priority,
        kind: WorkloadKind,
        config: Arc<PoolConfig>,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id,
                name: name.into(),
                priority,
                kind,
                config,
                events,
                pause: PauseGate::new(),
                state: Mutex::new(TaskState {
                    status: TaskStatus::Ready,
                    progress: 0,
                    cpu_usage: 0.0,
                    error: None,
                    run: None,
                    scratch: None,
                    loop_handle: None,
                    runs: 0,
                    started_at: None,
                    finished_at: None,
                    transitions: Vec::new(),
                }),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn priority(&self) -> Priority {
        self.inner.priority
    }

    pub fn workload_kind(&self) -> WorkloadKind {
        self.inner.kind
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.lock().status
    }

    pub fn progress(&self) -> u8 {
        self.inner.lock().progress
    }

    pub fn cpu_usage(&self) -> f64 {
        self.inner.lock().cpu_usage
    }

    /// Cause of the last fault, while in `Error`.
    pub fn error(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    /// Number of run loops spawned so far.
    pub fn runs(&self) -> u64 {
        self.inner.lock().runs
    }

    /// Path of the current run's scratch file, if one is allocated.
    pub fn scratch_path(&self) -> Option<PathBuf> {
        self.inner
            .lock()
            .scratch
            .as_ref()
            .map(|s| s.path().to_path_buf())
    }

    /// Recent status transitions, oldest first.
    pub fn transitions(&self) -> Vec<StateTransition> {
        self.inner.lock().transitions.clone()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.inner.lock();
        TaskSnapshot {
            id: self.inner.id,
            name: self.inner.name.clone(),
            priority: self.inner.priority,
            workload: self.inner.kind,
            status: state.status,
            progress: state.progress,
            cpu_usage: state.cpu_usage,
            error: state.error.clone(),
            runs: state.runs,
            started_at: state.started_at,
            finished_at: state.finished_at,
        }
    }

    /// Begin a fresh run, or resume a paused one. No-op while running.
    ///
    /// Setup failures move the task to `Error` instead of being returned.
    pub fn start(&self) {
        let mut state = self.inner.lock();
        match state.status {
            TaskStatus::Running | TaskStatus::Synchronizing => {
                debug!(task_id = %self.inner.id, "Start ignored, already running");
            }
            TaskStatus::Paused => self.inner.resume_locked(&mut state),
            TaskStatus::Ready | TaskStatus::Stopped | TaskStatus::Completed | TaskStatus::Error => {
                self.inner.begin_run(&mut state);
            }
        }
    }

    /// Close the pause gate. No-op unless running.
    pub fn pause(&self) {
        let mut state = self.inner.lock();
        if state.status != TaskStatus::Running {
            debug!(task_id = %self.inner.id, status = %state.status, "Pause ignored");
            return;
        }
        self.inner.pause.close();
        self.inner
            .set_status(&mut state, TaskStatus::Paused, Some("pause requested"));
        info!(task_id = %self.inner.id, "Task paused");
    }

    /// Reopen the pause gate. No-op unless paused.
    pub fn resume(&self) {
        let mut state = self.inner.lock();
        if state.status != TaskStatus::Paused {
            debug!(task_id = %self.inner.id, status = %state.status, "Resume ignored");
            return;
        }
        self.inner.resume_locked(&mut state);
    }

    /// Stop the current run. Idempotent and safe from any state.
    ///
    /// The run loop observes the stop at its next safe point; the state reset
    /// and scratch release happen here, immediately.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        if !state.status.is_running() {
            debug!(task_id = %self.inner.id, status = %state.status, "Stop ignored");
            return;
        }

        if let Some(mut run) = state.run.take() {
            run.cancel();
        }
        self.inner.pause.open();
        state.scratch = None;
        self.inner
            .set_status(&mut state, TaskStatus::Stopped, Some("stop requested"));
        self.inner.set_progress(&mut state, 0);
        self.inner.set_cpu_usage(&mut state, 0.0);
        info!(task_id = %self.inner.id, "Task stopped");
    }

    /// Ask this task to take part in `barrier`.
    ///
    /// A running task joins at the top of its next iteration and blocks there
    /// until the barrier opens. Any other task cannot reach the rendezvous, so
    /// its arrival is counted immediately. Returns whether the task will block.
    pub fn join_synchronization(&self, barrier: Arc<SyncBarrier>) -> bool {
        let mut state = self.inner.lock();
        if state.status == TaskStatus::Running {
            if let Some(run) = state.run.as_mut() {
                run.barrier_slot.request(barrier);
                debug!(task_id = %self.inner.id, "Rendezvous requested");
                return true;
            }
        }

        if let Err(e) = barrier.signal() {
            warn!(task_id = %self.inner.id, error = %e, "Could not count arrival");
        }
        false
    }

    /// Wait for the current run loop, if any, to exit.
    pub async fn join(&self) {
        let handle = self.inner.lock().loop_handle.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(task_id = %self.inner.id, error = %e, "Run loop panicked");
            }
        }
    }

    /// Stop the task and release everything it owns.
    pub fn dispose(&self) {
        self.stop();
        let mut state = self.inner.lock();
        state.scratch = None;
        if let Some(mut run) = state.run.take() {
            run.cancel();
        }
    }
}

impl std::fmt::Debug for WorkerTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerTask")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("priority", &self.inner.priority)
            .field("kind", &self.inner.kind)
            .finish_non_exhaustive()
    }
}

impl TaskInner {
    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, state: &mut TaskState, status: TaskStatus, reason: Option<&str>) {
        debug_assert!(
            state.status.can_transition_to(status),
            "invalid transition {} -> {}",
            state.status,
            status
        );

        state.transitions.push(StateTransition {
            from: state.status,
            to: status,
            timestamp: Utc::now(),
            reason: reason.map(str::to_string),
        });
        if state.transitions.len() > MAX_TRANSITIONS {
            let drain_count = state.transitions.len() - MAX_TRANSITIONS;
            state.transitions.drain(..drain_count);
        }

        state.status = status;
        match status {
            TaskStatus::Running if state.started_at.is_none() => {
                state.started_at = Some(Utc::now());
            }
            TaskStatus::Completed | TaskStatus::Stopped | TaskStatus::Error => {
                state.finished_at = Some(Utc::now());
            }
            _ => {}
        }

        let error = match status {
            TaskStatus::Error => state.error.clone(),
            _ => None,
        };
        self.events
            .emit(self.id, TaskChange::Status { status, error });
    }

    fn set_progress(&self, state: &mut TaskState, value: u8) {
        if state.progress != value {
            state.progress = value;
            self.events.emit(self.id, TaskChange::Progress { value });
        }
    }

    fn set_cpu_usage(&self, state: &mut TaskState, value: f64) {
        if state.cpu_usage != value {
            state.cpu_usage = value;
            self.events.emit(self.id, TaskChange::CpuUsage { value });
        }
    }

    fn resume_locked(&self, state: &mut TaskState) {
        self.pause.open();
        self.set_status(state, TaskStatus::Running, Some("resume requested"));
        info!(task_id = %self.id, "Task resumed");
    }

    fn begin_run(self: &Arc<Self>, state: &mut TaskState) {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                self.fail_setup(state, TaskError::NoRuntime { id: self.id });
                return;
            }
        };

        state.error = None;
        state.started_at = None;
        state.finished_at = None;
        self.set_progress(state, 0);
        self.set_cpu_usage(state, 0.0);
        self.pause.open();

        if self.kind.needs_scratch() {
            match ScratchResource::create(&self.config.scratch_dir, self.id, self.config.scratch_size)
            {
                Ok(scratch) => state.scratch = Some(scratch),
                Err(e) => {
                    self.fail_setup(
                        state,
                        TaskError::ScratchSetup {
                            id: self.id,
                            reason: e.to_string(),
                        },
                    );
                    return;
                }
            }
        }

        let run = RunGate::new();
        let stop = run.stop.clone();
        let refresh = run.refresh.clone();
        state.run = Some(run);
        state.runs += 1;
        self.set_status(state, TaskStatus::Running, Some("start requested"));

        let previous = state.loop_handle.take();
        state.loop_handle = Some(runtime.spawn(Arc::clone(self).run_loop(stop, previous)));
        runtime.spawn(Arc::clone(self).refresh_cpu_usage(refresh));

        info!(
            task_id = %self.id,
            name = %self.name,
            priority = %self.priority,
            workload = %self.kind,
            run = state.runs,
            "Task started"
        );
    }

    fn fail_setup(&self, state: &mut TaskState, cause: TaskError) {
        error!(task_id = %self.id, error = %cause, "Task setup failed");
        state.scratch = None;
        state.error = Some(cause.to_string());
        self.set_cpu_usage(state, 0.0);
        self.set_status(state, TaskStatus::Error, Some("setup failed"));
    }

    async fn run_loop(self: Arc<Self>, stop: CancellationToken, previous: Option<JoinHandle<()>>) {
        // A stopped run may still be finishing its last unit.
        if let Some(previous) = previous {
            let _ = previous.await;
        }

        let mut rng = StdRng::from_entropy();
        debug!(task_id = %self.id, "Run loop started");

        let outcome = loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break RunOutcome::Stopped,
                _ = self.pause.wait_open() => {}
            }
            if stop.is_cancelled() {
                break RunOutcome::Stopped;
            }

            if let Some(barrier) = self.claim_barrier(&stop) {
                self.rendezvous(barrier, &stop).await;
                continue;
            }

            let Some((progress, scratch)) = self.unit_inputs(&stop) else {
                break RunOutcome::Stopped;
            };
            // Planning and execution both count as the unit.
            let unit = AssertUnwindSafe(async {
                let plan =
                    workload::plan_unit(self.kind, self.priority, progress, &self.config, &mut rng);
                workload::execute(&plan.step, scratch.as_ref())
                    .await
                    .map(|()| plan.increment)
            })
            .catch_unwind()
            .await;
            let increment = match unit {
                Ok(Ok(increment)) => increment,
                Ok(Err(e)) => break RunOutcome::Faulted(e.to_string()),
                Err(panic) => break RunOutcome::Faulted(panic_message(panic.as_ref())),
            };

            match self.advance(&stop, increment) {
                Advance::Continue => {}
                Advance::Completed => break RunOutcome::Completed,
                Advance::Stale => break RunOutcome::Stopped,
            }

            tokio::select! {
                biased;
                _ = stop.cancelled() => break RunOutcome::Stopped,
                _ = tokio::time::sleep(self.config.unit_interval) => {}
            }
        };

        match outcome {
            RunOutcome::Faulted(reason) => self.fault(&stop, reason),
            RunOutcome::Completed => debug!(task_id = %self.id, "Run loop finished"),
            RunOutcome::Stopped => debug!(task_id = %self.id, "Run loop observed stop"),
        }
    }

    /// Take a pending rendezvous request and enter `Synchronizing`.
    fn claim_barrier(&self, stop: &CancellationToken) -> Option<Arc<SyncBarrier>> {
        let mut state = self.lock();
        if stop.is_cancelled() || state.status != TaskStatus::Running {
            return None;
        }
        let barrier = state.run.as_mut()?.barrier_slot.take()?;
        self.set_status(&mut state, TaskStatus::Synchronizing, Some("rendezvous joined"));
        Some(barrier)
    }

    async fn rendezvous(&self, barrier: Arc<SyncBarrier>, stop: &CancellationToken) {
        match barrier.arrive() {
            Ok(arrival) => {
                debug!(
                    task_id = %self.id,
                    arrived = barrier.arrived(),
                    expected = barrier.expected(),
                    "Waiting at rendezvous"
                );
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => return,
                    _ = arrival.released() => {}
                }
            }
            Err(e) => warn!(task_id = %self.id, error = %e, "Rendezvous arrival rejected"),
        }
        self.leave_rendezvous(stop);
    }

    fn leave_rendezvous(&self, stop: &CancellationToken) {
        let mut state = self.lock();
        if !stop.is_cancelled() && state.status == TaskStatus::Synchronizing {
            self.set_status(&mut state, TaskStatus::Running, Some("rendezvous released"));
            debug!(task_id = %self.id, "Released from rendezvous");
        }
    }

    fn unit_inputs(&self, stop: &CancellationToken) -> Option<(u8, Option<ScratchHandle>)> {
        let state = self.lock();
        if stop.is_cancelled() {
            return None;
        }
        Some((state.progress, state.scratch.as_ref().map(ScratchResource::handle)))
    }

    /// Credit a finished unit. Work finished after a pause request earns nothing.
    fn advance(&self, stop: &CancellationToken, increment: u8) -> Advance {
        let mut state = self.lock();
        if stop.is_cancelled() {
            return Advance::Stale;
        }
        if state.status != TaskStatus::Running {
            return Advance::Continue;
        }

        let next = state.progress.saturating_add(increment).min(100);
        self.set_progress(&mut state, next);
        if next < 100 {
            return Advance::Continue;
        }

        if let Some(mut run) = state.run.take() {
            run.cancel();
        }
        state.scratch = None;
        self.set_cpu_usage(&mut state, 0.0);
        self.set_status(&mut state, TaskStatus::Completed, Some("progress reached 100"));
        info!(task_id = %self.id, "Task completed");
        Advance::Completed
    }

    fn fault(&self, stop: &CancellationToken, reason: String) {
        let mut state = self.lock();
        if stop.is_cancelled() {
            return;
        }

        error!(task_id = %self.id, error = %reason, "Run loop fault");
        if let Some(mut run) = state.run.take() {
            run.cancel();
        }
        state.scratch = None;
        state.error = Some(reason);
        self.set_cpu_usage(&mut state, 0.0);
        self.set_status(&mut state, TaskStatus::Error, Some("run loop fault"));
    }

    async fn refresh_cpu_usage(self: Arc<Self>, refresh: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.cpu_refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = refresh.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !self.refresh_estimate(&refresh) {
                break;
            }
        }
    }

    /// Recompute the CPU estimate if running. Returns false once the run is over.
    fn refresh_estimate(&self, refresh: &CancellationToken) -> bool {
        let mut state = self.lock();
        if refresh.is_cancelled() {
            return false;
        }
        if state.status == TaskStatus::Running {
            let value = workload::estimate_cpu_usage(self.kind, self.priority, state.progress);
            self.set_cpu_usage(&mut state, value);
        }
        true
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("unit of work panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("unit of work panicked: {message}")
    } else {
        "unit of work panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::worker::events::TaskEvent;

    fn fast_config(scratch_dir: &std::path::Path) -> Arc<PoolConfig> {
        Arc::new(PoolConfig {
            scratch_dir: scratch_dir.to_path_buf(),
            scratch_size: 4096,
            io_block_size: 256,
            unit_interval: Duration::from_millis(2),
            io_latency_min: Duration::from_millis(1),
            io_latency_max: Duration::from_millis(2),
            rest_delay: Duration::from_millis(1),
            cpu_refresh_interval: Duration::from_millis(5),
            cpu_base_iterations: 500,
            ..PoolConfig::default()
        })
    }

    fn task(config: Arc<PoolConfig>, priority: Priority, kind: WorkloadKind) -> (WorkerTask, EventBus) {
        let events = EventBus::new(4096);
        let task = WorkerTask::new(TaskId(1), "test", priority, kind, config, events.clone());
        (task, events)
    }

    async fn wait_for_status(task: &WorkerTask, status: TaskStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while task.status() != status {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("task never reached {status}, stuck in {}", task.status()));
    }

    #[tokio::test]
    async fn new_task_is_ready() {
        let dir = tempfile::tempdir().unwrap();
        let (task, _) = task(fast_config(dir.path()), Priority::Normal, WorkloadKind::Mixed);
        assert_eq!(task.status(), TaskStatus::Ready);
        assert_eq!(task.progress(), 0);
        assert_eq!(task.cpu_usage(), 0.0);
        assert_eq!(task.runs(), 0);
        assert!(task.scratch_path().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cpu_task_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let (task, _) = task(fast_config(dir.path()), Priority::Normal, WorkloadKind::CpuIntensive);

        task.start();
        wait_for_status(&task, TaskStatus::Completed).await;

        assert_eq!(task.progress(), 100);
        assert_eq!(task.cpu_usage(), 0.0);
        task.join().await;
    }

    #[tokio::test]
    async fn double_start_spawns_one_loop() {
        let dir = tempfile::tempdir().unwrap();
        let (task, events) = task(fast_config(dir.path()), Priority::Lowest, WorkloadKind::Burst);
        let mut rx = events.subscribe();

        task.start();
        task.start();
        assert_eq!(task.runs(), 1);
        task.stop();

        let mut running = 0;
        while let Ok(event) = rx.try_recv() {
            if event.status() == Some(TaskStatus::Running) {
                running += 1;
            }
        }
        assert_eq!(running, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_resets_and_releases_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let (task, _) = task(fast_config(dir.path()), Priority::Lowest, WorkloadKind::IoIntensive);

        task.start();
        let scratch = task.scratch_path().expect("io task owns a scratch file");
        assert!(scratch.exists());
        tokio::time::sleep(Duration::from_millis(20)).await;

        task.stop();
        assert_eq!(task.status(), TaskStatus::Stopped);
        assert_eq!(task.progress(), 0);
        assert_eq!(task.cpu_usage(), 0.0);
        assert!(!scratch.exists());

        task.stop();
        assert_eq!(task.status(), TaskStatus::Stopped);
        task.join().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pause_freezes_progress() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(PoolConfig {
            unit_interval: Duration::from_millis(10),
            ..(*fast_config(dir.path())).clone()
        });
        let (task, _) = task(config, Priority::Lowest, WorkloadKind::CpuIntensive);

        task.start();
        tokio::time::sleep(Duration::from_millis(40)).await;
        task.pause();
        assert_eq!(task.status(), TaskStatus::Paused);
        let frozen = task.progress();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(task.progress(), frozen);

        task.resume();
        assert_eq!(task.status(), TaskStatus::Running);
        tokio::time::timeout(Duration::from_secs(2), async {
            while task.progress() == frozen {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("progress should move after resume");
        assert!(task.progress() > frozen);
        task.stop();
    }

    #[tokio::test]
    async fn start_while_paused_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let (task, _) = task(fast_config(dir.path()), Priority::Lowest, WorkloadKind::Burst);

        task.start();
        task.pause();
        task.start();
        assert_eq!(task.status(), TaskStatus::Running);
        assert_eq!(task.runs(), 1);
        task.stop();
    }

    #[tokio::test]
    async fn commands_outside_their_states_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (task, _) = task(fast_config(dir.path()), Priority::Normal, WorkloadKind::CpuIntensive);

        task.pause();
        task.resume();
        task.stop();
        assert_eq!(task.status(), TaskStatus::Ready);
        assert!(task.transitions().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn setup_failure_becomes_error_and_restart_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let scratch_dir = dir.path().join("scratch");
        let (task, _) = task(fast_config(&scratch_dir), Priority::Normal, WorkloadKind::IoIntensive);

        task.start();
        assert_eq!(task.status(), TaskStatus::Error);
        let cause = task.error().expect("error carries a cause");
        assert!(cause.contains("scratch"), "{cause}");
        assert_eq!(task.runs(), 0);

        std::fs::create_dir(&scratch_dir).unwrap();
        task.start();
        assert_eq!(task.status(), TaskStatus::Running);
        assert!(task.error().is_none());
        assert_eq!(task.progress(), 0);
        task.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panic_while_planning_becomes_error() {
        let dir = tempfile::tempdir().unwrap();
        // Built without validate(): an empty latency range makes planning panic.
        let config = Arc::new(PoolConfig {
            io_latency_min: Duration::from_millis(5),
            io_latency_max: Duration::from_millis(1),
            ..(*fast_config(dir.path())).clone()
        });
        let (task, _) = task(config, Priority::Normal, WorkloadKind::IoIntensive);

        task.start();
        wait_for_status(&task, TaskStatus::Error).await;
        task.join().await;

        let cause = task.error().expect("error carries a cause");
        assert!(cause.contains("panicked"), "{cause}");
        assert_eq!(task.progress(), 0);
        assert_eq!(task.cpu_usage(), 0.0);
        assert!(task.scratch_path().is_none());

        // A faulted task no longer holds up a rendezvous.
        let barrier = Arc::new(SyncBarrier::new(1));
        assert!(!task.join_synchronization(Arc::clone(&barrier)));
        assert!(barrier.is_released());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unit_fault_keeps_progress_and_restart_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(PoolConfig {
            unit_interval: Duration::from_millis(10),
            ..(*fast_config(dir.path())).clone()
        });
        let (task, _) = task(config, Priority::Lowest, WorkloadKind::IoIntensive);

        task.start();
        tokio::time::timeout(Duration::from_secs(5), async {
            while task.progress() == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();

        // Pull the scratch resource out from under the loop; its next IO unit fails.
        task.inner.lock().scratch = None;
        wait_for_status(&task, TaskStatus::Error).await;
        task.join().await;

        let cause = task.error().expect("error carries a cause");
        assert!(cause.contains("Scratch resource"), "{cause}");
        let frozen = task.progress();
        assert!(frozen > 0);
        assert_eq!(task.cpu_usage(), 0.0);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(task.progress(), frozen);
        assert_eq!(task.cpu_usage(), 0.0);

        task.start();
        assert_eq!(task.status(), TaskStatus::Running);
        assert_eq!(task.progress(), 0);
        assert!(task.error().is_none());
        assert_eq!(task.runs(), 2);
        task.stop();
    }

    #[test]
    fn start_outside_runtime_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (task, _) = task(fast_config(dir.path()), Priority::Normal, WorkloadKind::CpuIntensive);

        task.start();
        assert_eq!(task.status(), TaskStatus::Error);
        assert!(task.error().unwrap().contains("runtime"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn progress_events_never_decrease_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let (task, events) = task(fast_config(dir.path()), Priority::Highest, WorkloadKind::Mixed);
        let mut rx = events.subscribe();

        task.start();
        wait_for_status(&task, TaskStatus::Completed).await;

        let mut last = 0u8;
        let mut seen: Vec<TaskEvent> = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        for event in &seen {
            if let TaskChange::Progress { value } = event.change {
                assert!(value <= 100);
                assert!(value >= last, "progress went from {last} to {value}");
                last = value;
            }
        }
        assert_eq!(last, 100);
        assert_eq!(seen.last().and_then(TaskEvent::status), Some(TaskStatus::Completed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cpu_estimate_refreshes_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(PoolConfig {
            unit_interval: Duration::from_millis(50),
            ..(*fast_config(dir.path())).clone()
        });
        let (task, _) = task(config, Priority::Highest, WorkloadKind::CpuIntensive);

        task.start();
        tokio::time::timeout(Duration::from_secs(1), async {
            while task.cpu_usage() == 0.0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("estimate should be computed");
        assert!((0.1..=35.0).contains(&task.cpu_usage()));

        task.stop();
        assert_eq!(task.cpu_usage(), 0.0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(task.cpu_usage(), 0.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_then_start_is_a_fresh_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(PoolConfig {
            unit_interval: Duration::from_millis(10),
            ..(*fast_config(dir.path())).clone()
        });
        let (task, _) = task(config, Priority::Lowest, WorkloadKind::CpuIntensive);

        task.start();
        tokio::time::sleep(Duration::from_millis(40)).await;
        task.stop();
        task.start();

        assert_eq!(task.status(), TaskStatus::Running);
        assert_eq!(task.progress(), 0);
        assert_eq!(task.cpu_usage(), 0.0);
        assert_eq!(task.runs(), 2);
        task.stop();
        task.join().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn running_task_joins_and_leaves_rendezvous() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(PoolConfig {
            unit_interval: Duration::from_millis(10),
            ..(*fast_config(dir.path())).clone()
        });
        let (task, _) = task(config, Priority::Lowest, WorkloadKind::CpuIntensive);
        task.start();

        let barrier = Arc::new(SyncBarrier::new(2));
        assert!(task.join_synchronization(Arc::clone(&barrier)));
        wait_for_status(&task, TaskStatus::Synchronizing).await;

        let frozen = task.progress();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(task.status(), TaskStatus::Synchronizing);
        assert_eq!(task.progress(), frozen);

        barrier.signal().unwrap();
        wait_for_status(&task, TaskStatus::Running).await;
        task.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_releases_a_blocked_rendezvous() {
        let dir = tempfile::tempdir().unwrap();
        let (task, _) = task(fast_config(dir.path()), Priority::Lowest, WorkloadKind::CpuIntensive);
        task.start();

        let barrier = Arc::new(SyncBarrier::new(2));
        task.join_synchronization(Arc::clone(&barrier));
        wait_for_status(&task, TaskStatus::Synchronizing).await;

        task.stop();
        assert_eq!(task.status(), TaskStatus::Stopped);
        tokio::time::timeout(Duration::from_secs(1), task.join())
            .await
            .expect("stopped loop must exit");
    }

    #[tokio::test]
    async fn idle_task_arrives_without_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let (task, _) = task(fast_config(dir.path()), Priority::Normal, WorkloadKind::CpuIntensive);

        let barrier = Arc::new(SyncBarrier::new(1));
        assert!(!task.join_synchronization(Arc::clone(&barrier)));
        assert!(barrier.is_released());
        assert_eq!(task.status(), TaskStatus::Ready);
    }

    #[tokio::test]
    async fn transitions_are_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let (task, _) = task(fast_config(dir.path()), Priority::Normal, WorkloadKind::Burst);

        task.start();
        task.pause();
        task.resume();
        task.stop();

        let path: Vec<_> = task.transitions().iter().map(|t| t.to).collect();
        assert_eq!(
            path,
            vec![
                TaskStatus::Running,
                TaskStatus::Paused,
                TaskStatus::Running,
                TaskStatus::Stopped
            ]
        );
        let snapshot = task.snapshot();
        assert_eq!(snapshot.status, TaskStatus::Stopped);
        assert!(snapshot.started_at.is_some());
        assert!(snapshot.finished_at.is_some());
    }
}
