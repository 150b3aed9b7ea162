//! Roster lock: the single mutual-exclusion point for team assignment writes
//!
//! Properties:
//! - Waiters are granted strictly in arrival order
//! - A call chain that already holds the lock re-enters it by presenting its
//!   [`LockGuard`] to [`RosterLock::acquire_nested`]; the lock is released
//!   only once every nested guard is gone
//! - No request waits longer than the configured timeout. A request that
//!   times out force-releases the lock: the holder is evicted and every
//!   queued request is rejected. A holder older than the timeout is evicted
//!   the same way when the next request arrives.
//!
//! An evicted holder is not told synchronously. It finds out when its guard
//! is released, which logs a warning and changes nothing.

use crate::error::LockError;
use log::{debug, error, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

type ChainId = u64;

#[derive(Debug)]
struct Holder {
    chain: ChainId,
    operation: String,
    depth: u32,
    acquired_at: Instant,
}

impl Holder {
    fn new(chain: ChainId, operation: &str) -> Self {
        Self {
            chain,
            operation: operation.to_string(),
            depth: 1,
            acquired_at: Instant::now(),
        }
    }
}

#[derive(Debug)]
struct Waiter {
    chain: ChainId,
    operation: String,
    grant: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
struct LockState {
    holder: Option<Holder>,
    queue: VecDeque<Waiter>,
    next_chain: ChainId,
}

impl LockState {
    fn new_chain(&mut self) -> ChainId {
        self.next_chain += 1;
        self.next_chain
    }

    /// Hands the lock to the oldest waiter that is still listening.
    fn grant_next(&mut self) {
        while let Some(Waiter {
            chain,
            operation,
            grant,
        }) = self.queue.pop_front()
        {
            self.holder = Some(Holder::new(chain, &operation));
            if grant.send(()).is_ok() {
                debug!("Roster lock handed to '{}'", operation);
                return;
            }
            self.holder = None;
        }
    }

    fn force_release(&mut self, cause: &str) {
        let holder = self.holder.take();
        let dropped = self.queue.len();
        // Dropping the senders rejects every queued request
        self.queue.clear();

        error!(
            "Forced release of roster lock ({}): evicted holder {:?}, dropped {} queued request(s)",
            cause,
            holder.map(|h| h.operation),
            dropped
        );
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<LockState>,
    timeout: Duration,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// FIFO, reentrant, self-healing lock over roster mutation.
#[derive(Debug, Clone)]
pub struct RosterLock {
    shared: Arc<Shared>,
}

impl RosterLock {
    pub fn new(timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LockState::default()),
                timeout,
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.shared.timeout
    }

    /// Acquires the lock for a new call chain, waiting behind earlier requests.
    pub async fn acquire(&self, operation: &str) -> Result<LockGuard, LockError> {
        let (chain, granted) = {
            let mut state = self.shared.state();
            let chain = state.new_chain();

            let stale = state
                .holder
                .as_ref()
                .filter(|holder| holder.acquired_at.elapsed() > self.shared.timeout)
                .map(|holder| {
                    format!(
                        "'{}' held for {:?}",
                        holder.operation,
                        holder.acquired_at.elapsed()
                    )
                });
            if let Some(cause) = stale {
                state.force_release(&cause);
            }

            if state.holder.is_none() {
                state.holder = Some(Holder::new(chain, operation));
                debug!("Roster lock acquired by '{}'", operation);
                return Ok(self.guard(chain, operation));
            }

            let (grant, granted) = oneshot::channel();
            state.queue.push_back(Waiter {
                chain,
                operation: operation.to_string(),
                grant,
            });
            debug!(
                "'{}' queued for roster lock at position {}",
                operation,
                state.queue.len()
            );
            (chain, granted)
        };

        match tokio::time::timeout(self.shared.timeout, granted).await {
            Ok(Ok(())) => Ok(self.guard(chain, operation)),
            Ok(Err(_)) => Err(LockError::ForcedRelease {
                operation: operation.to_string(),
            }),
            Err(_) => {
                let mut state = self.shared.state();
                // The grant may have landed just as the timer expired
                if state.holder.as_ref().is_some_and(|h| h.chain == chain) {
                    return Ok(self.guard(chain, operation));
                }

                state.queue.retain(|waiter| waiter.chain != chain);
                state.force_release(&format!(
                    "'{}' waited {:?}",
                    operation, self.shared.timeout
                ));
                Err(LockError::Timeout {
                    operation: operation.to_string(),
                    waited: self.shared.timeout,
                })
            }
        }
    }

    /// Re-enters the lock on behalf of the chain that holds `held`.
    ///
    /// If that chain has been evicted in the meantime this falls back to an
    /// ordinary queued acquisition.
    pub async fn acquire_nested(
        &self,
        held: &LockGuard,
        operation: &str,
    ) -> Result<LockGuard, LockError> {
        if Arc::ptr_eq(&self.shared, &held.shared) {
            let mut state = self.shared.state();
            if let Some(holder) = state.holder.as_mut().filter(|h| h.chain == held.chain) {
                holder.depth += 1;
                debug!(
                    "'{}' re-entered roster lock held by '{}' (depth {})",
                    operation, holder.operation, holder.depth
                );
                return Ok(self.guard(held.chain, operation));
            }
        }

        warn!(
            "'{}' tried to re-enter a roster lock its chain no longer holds, queueing instead",
            operation
        );
        self.acquire(operation).await
    }

    pub fn is_locked(&self) -> bool {
        self.shared.state().holder.is_some()
    }

    pub fn holder_operation(&self) -> Option<String> {
        self.shared
            .state()
            .holder
            .as_ref()
            .map(|holder| holder.operation.clone())
    }

    pub fn holder_depth(&self) -> u32 {
        self.shared
            .state()
            .holder
            .as_ref()
            .map_or(0, |holder| holder.depth)
    }

    pub fn queue_len(&self) -> usize {
        self.shared.state().queue.len()
    }

    fn guard(&self, chain: ChainId, operation: &str) -> LockGuard {
        LockGuard {
            shared: Arc::clone(&self.shared),
            chain,
            operation: operation.to_string(),
            released: false,
        }
    }
}

/// Proof of holding the roster lock. Releases on [`LockGuard::release`] or drop.
#[derive(Debug)]
pub struct LockGuard {
    shared: Arc<Shared>,
    chain: ChainId,
    operation: String,
    released: bool,
}

impl LockGuard {
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut state = self.shared.state();
        match state.holder.as_mut() {
            Some(holder) if holder.chain == self.chain => {
                holder.depth -= 1;
                if holder.depth == 0 {
                    debug!("Roster lock released by '{}'", self.operation);
                    state.holder = None;
                    state.grant_next();
                }
            }
            _ => warn!(
                "'{}' released a roster lock it no longer holds (it was force-released)",
                self.operation
            ),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_once();
    }
}
