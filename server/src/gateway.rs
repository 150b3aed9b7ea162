//! Team writes, with and without the roster lock.

use crate::error::LockError;
use crate::lock::{LockGuard, RosterLock};
use crate::room::{RoomHost, TeamWrite};
use log::{debug, info};
use shared::{ParticipantId, Team};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamChange {
    pub participant: ParticipantId,
    pub team: Team,
    pub reason: String,
}

impl TeamChange {
    pub fn new(participant: ParticipantId, team: Team, reason: impl Into<String>) -> Self {
        Self {
            participant,
            team,
            reason: reason.into(),
        }
    }
}

#[derive(Clone)]
pub struct RosterGateway {
    host: Arc<dyn RoomHost>,
    lock: RosterLock,
}

impl RosterGateway {
    pub fn new(host: Arc<dyn RoomHost>, lock: RosterLock) -> Self {
        Self { host, lock }
    }

    pub fn lock(&self) -> &RosterLock {
        &self.lock
    }

    /// Writes the team without touching the lock. Callers must already hold it.
    ///
    /// Returns true only if the participant actually changed team.
    pub fn set_team_direct(&self, id: ParticipantId, team: Team, reason: &str) -> bool {
        match self.host.write_team(id, team) {
            TeamWrite::Moved { from } => {
                info!("Moved participant {} from {} to {} ({})", id, from, team, reason);
                true
            }
            TeamWrite::Unchanged => {
                debug!("Participant {} already on {} ({})", id, team, reason);
                false
            }
            TeamWrite::NotFound => {
                debug!("Participant {} is gone, skipped move to {} ({})", id, team, reason);
                false
            }
        }
    }

    pub async fn set_team_safe(
        &self,
        id: ParticipantId,
        team: Team,
        reason: &str,
    ) -> Result<bool, LockError> {
        let guard = self.lock.acquire(&format!("set_team: {}", reason)).await?;
        let moved = self.set_team_direct(id, team, reason);
        guard.release();
        Ok(moved)
    }

    /// Like [`set_team_safe`](Self::set_team_safe) for a caller that already holds the lock.
    pub async fn set_team_nested(
        &self,
        held: &LockGuard,
        id: ParticipantId,
        team: Team,
        reason: &str,
    ) -> Result<bool, LockError> {
        let guard = self
            .lock
            .acquire_nested(held, &format!("set_team: {}", reason))
            .await?;
        let moved = self.set_team_direct(id, team, reason);
        guard.release();
        Ok(moved)
    }

    /// Skips the lock entirely when the participant is already where they
    /// should be, or gone.
    pub async fn set_team_conditional(
        &self,
        id: ParticipantId,
        team: Team,
        reason: &str,
    ) -> Result<bool, LockError> {
        match self.host.participant(id) {
            Some(participant) if participant.team != team => {
                self.set_team_safe(id, team, reason).await
            }
            _ => Ok(false),
        }
    }

    /// Applies every change under one lock acquisition.
    pub async fn set_team_batch(&self, changes: &[TeamChange]) -> Result<Vec<bool>, LockError> {
        if changes.is_empty() {
            return Ok(Vec::new());
        }

        let guard = self
            .lock
            .acquire(&format!("set_team_batch: {} change(s)", changes.len()))
            .await?;
        let results = changes
            .iter()
            .map(|change| self.set_team_direct(change.participant, change.team, &change.reason))
            .collect();
        guard.release();
        Ok(results)
    }
}
