//! Tunables for the roster core.

use shared::MAX_TEAM_SIZE;
use std::time::Duration;

pub const DEFAULT_PICK_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RosterConfig {
    /// Players allowed on each playing team.
    pub max_team_size: usize,
    /// Largest team size difference at which a draft may still start.
    pub max_start_imbalance: usize,
    /// Team players required before auto-balance moves anyone.
    pub min_auto_balance_players: usize,
    /// How long the eligible team gets for each pick before auto-assignment.
    pub pick_timeout: Duration,
    /// Window after which a stalled roster lock is force-released.
    pub lock_timeout: Duration,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            max_team_size: MAX_TEAM_SIZE,
            max_start_imbalance: 2,
            min_auto_balance_players: 3,
            pick_timeout: DEFAULT_PICK_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl RosterConfig {
    pub fn with_timeouts(mut self, pick_timeout: Duration, lock_timeout: Duration) -> Self {
        self.pick_timeout = pick_timeout;
        self.lock_timeout = lock_timeout;
        self
    }
}
