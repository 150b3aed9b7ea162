//! One-shot cancellable timer backing the per-pick timeout.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug)]
struct Armed {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Holds at most one pending callback. Arming replaces whatever was pending.
#[derive(Debug, Default)]
pub struct PickTimer {
    armed: Mutex<Option<Armed>>,
}

impl PickTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Armed>> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `on_fire` after `duration` unless cancelled or re-armed first.
    ///
    /// `generation` identifies this arming; the callback passes it to
    /// [`disarm_fired`](Self::disarm_fired) to find out whether it is still current.
    pub fn arm<F>(&self, generation: u64, duration: Duration, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            on_fire.await;
        });

        if let Some(previous) = self.slot().replace(Armed { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Cancels the pending callback. Returns false if nothing was armed.
    pub fn cancel(&self) -> bool {
        match self.slot().take() {
            Some(armed) => {
                armed.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Called from inside a firing callback. Forgets the handle without
    /// aborting the running task, so later cancels cannot kill it midway.
    ///
    /// Returns false if the timer has been re-armed or cancelled since.
    pub fn disarm_fired(&self, generation: u64) -> bool {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|armed| armed.generation == generation) {
            slot.take();
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot().is_some()
    }
}
