//! Per-task lifecycle signals: pause gate, stop signal, rendezvous slot.
//!
//! None of these ever block the caller that mutates them. Only the run loop
//! waits, and only on the pause gate, the stop signal or a released barrier.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::worker::barrier::SyncBarrier;

/// Resumable gate the run loop parks on while a task is paused.
///
/// `wait_open()` subscribes to the `Notify` *before* re-checking the flag so a
/// concurrent `open()` cannot be missed.
#[derive(Debug, Default)]
pub struct PauseGate {
    closed: AtomicBool,
    opened: Notify,
}

impl PauseGate {
    /// Create an open gate.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Open the gate and wake every parked waiter.
    #[inline]
    pub fn open(&self) {
        self.closed.store(false, Ordering::Release);
        self.opened.notify_waiters();
    }

    /// Wait until the gate is open. Returns immediately if it already is.
    pub async fn wait_open(&self) {
        if !self.is_closed() {
            return;
        }

        loop {
            let notified = self.opened.notified();
            if !self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

/// Signals scoped to a single run of a task.
///
/// A fresh set is created by every Start, so a stop request from a previous
/// run can never leak into the next one.
#[derive(Debug)]
pub struct RunGate {
    /// One-shot stop signal for this run.
    pub stop: CancellationToken,
    /// Ends the CPU-estimate refresher. Child of `stop`.
    pub refresh: CancellationToken,
    /// Rendezvous requested but not yet picked up by the run loop.
    pub barrier_slot: BarrierSlot,
}

impl RunGate {
    pub fn new() -> Self {
        let stop = CancellationToken::new();
        let refresh = stop.child_token();
        Self {
            stop,
            refresh,
            barrier_slot: BarrierSlot::default(),
        }
    }

    /// Set the stop signal and release any rendezvous still waiting on us.
    pub fn cancel(&mut self) {
        self.barrier_slot.force_release();
        self.stop.cancel();
    }
}

impl Default for RunGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds a barrier the run loop has been asked to join.
#[derive(Debug, Default)]
pub struct BarrierSlot {
    pending: Option<Arc<SyncBarrier>>,
}

impl BarrierSlot {
    /// Ask the run loop to join `barrier` at its next iteration. A barrier
    /// still pending from an earlier request is released on our behalf first.
    pub fn request(&mut self, barrier: Arc<SyncBarrier>) {
        self.force_release();
        self.pending = Some(barrier);
    }

    pub fn is_set(&self) -> bool {
        self.pending.is_some()
    }

    /// Hand the pending barrier to the run loop.
    pub fn take(&mut self) -> Option<Arc<SyncBarrier>> {
        self.pending.take()
    }

    /// Count an arrival for a rendezvous this run will never reach, so the
    /// other participants are not stranded.
    pub fn force_release(&mut self) {
        if let Some(barrier) = self.pending.take() {
            if let Err(e) = barrier.signal() {
                warn!(error = %e, "Failed to release pending rendezvous");
            }
        }
    }
}
