//! Single-use multi-party rendezvous.

use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;

use crate::error::BarrierError;

/// Releases every participant at once, after the last expected arrival.
///
/// Built fresh for each synchronize operation and never reset.
#[derive(Debug)]
pub struct SyncBarrier {
    expected: usize,
    arrived: Mutex<usize>,
    released: watch::Sender<bool>,
}

/// A registered arrival. Await [`Arrival::released`] to block until the
/// barrier opens.
#[derive(Debug)]
pub struct Arrival {
    released: watch::Receiver<bool>,
}

impl Arrival {
    pub async fn released(mut self) {
        // The sender lives inside the barrier; if it is gone nobody is left to wait for.
        let _ = self.released.wait_for(|open| *open).await;
    }
}

impl SyncBarrier {
    /// A barrier expecting `expected` arrivals. Zero opens immediately.
    pub fn new(expected: usize) -> Self {
        let (released, _) = watch::channel(expected == 0);
        Self {
            expected,
            arrived: Mutex::new(0),
            released,
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn arrived(&self) -> usize {
        *self.arrived.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_released(&self) -> bool {
        *self.released.borrow()
    }

    /// Register an arrival. The last expected arrival opens the barrier.
    pub fn arrive(&self) -> Result<Arrival, BarrierError> {
        let mut arrived = self.arrived.lock().unwrap_or_else(PoisonError::into_inner);
        if *arrived >= self.expected {
            return Err(BarrierError::Overflow {
                expected: self.expected,
            });
        }

        let receiver = self.released.subscribe();
        *arrived += 1;
        if *arrived == self.expected {
            self.released.send_replace(true);
        }

        Ok(Arrival { released: receiver })
    }

    /// Register an arrival without waiting for the release.
    pub fn signal(&self) -> Result<(), BarrierError> {
        self.arrive().map(drop)
    }

    /// Arrive and block until every participant has arrived.
    pub async fn wait(&self) -> Result<(), BarrierError> {
        self.arrive()?.released().await;
        Ok(())
    }

    /// Block until the barrier opens, without counting as an arrival.
    pub async fn released(&self) {
        let mut receiver = self.released.subscribe();
        let _ = receiver.wait_for(|open| *open).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn zero_participants_release_immediately() {
        let barrier = SyncBarrier::new(0);
        assert!(barrier.is_released());
        tokio::time::timeout(Duration::from_millis(50), barrier.released())
            .await
            .expect("empty barrier must not block");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn nobody_passes_before_last_arrival() {
        let barrier = Arc::new(SyncBarrier::new(3));

        let early: Vec<_> = (0..2)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move { barrier.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(barrier.arrived(), 2);
        assert!(!barrier.is_released());
        assert!(early.iter().all(|handle| !handle.is_finished()));

        barrier.wait().await.unwrap();

        for handle in early {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("participant should be released")
                .unwrap()
                .unwrap();
        }
        assert!(barrier.is_released());
    }

    #[test]
    fn extra_arrival_is_an_error() {
        let barrier = SyncBarrier::new(1);
        barrier.signal().unwrap();
        assert!(matches!(
            barrier.signal(),
            Err(BarrierError::Overflow { expected: 1 })
        ));
        assert_eq!(barrier.arrived(), 1);
    }

    #[tokio::test]
    async fn arrival_after_release_is_not_blocked() {
        let barrier = SyncBarrier::new(2);
        barrier.signal().unwrap();
        let last = barrier.arrive().unwrap();
        tokio::time::timeout(Duration::from_millis(50), last.released())
            .await
            .expect("last arrival opens the barrier");
    }
}
