//! Per-room wiring of the roster core.
//!
//! A [`RosterContext`] owns one lock, one gateway and one draft controller
//! over a single [`RoomHost`]. Every trigger in the room goes through it, and
//! two contexts never share state.

use crate::balance::{BalanceEvaluator, RosterSnapshot};
use crate::config::RosterConfig;
use crate::error::LockError;
use crate::gateway::RosterGateway;
use crate::lock::RosterLock;
use crate::room::{RoomHost, RotationSignal};
use crate::selection::SelectionController;
use log::{debug, info, warn};
use shared::{ParticipantId, Team};
use std::sync::Arc;

/// What a call to [`RosterContext::rebalance`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalanceOutcome {
    /// A rotation is running or a draft is already in progress
    StoodDown,
    /// The newest player of the larger team went to the bench
    AutoBalanced { participant: ParticipantId, from: Team },
    DraftStarted,
    Unchanged,
}

#[derive(Clone)]
pub struct RosterContext {
    host: Arc<dyn RoomHost>,
    rotation: RotationSignal,
    config: RosterConfig,
    evaluator: BalanceEvaluator,
    gateway: RosterGateway,
    selection: SelectionController,
}

impl RosterContext {
    pub fn new(host: Arc<dyn RoomHost>, rotation: RotationSignal, config: RosterConfig) -> Self {
        let evaluator = BalanceEvaluator::new(&config);
        let gateway = RosterGateway::new(Arc::clone(&host), RosterLock::new(config.lock_timeout));
        let selection = SelectionController::new(
            Arc::clone(&host),
            gateway.clone(),
            evaluator,
            rotation.clone(),
            config.pick_timeout,
        );

        Self {
            host,
            rotation,
            config,
            evaluator,
            gateway,
            selection,
        }
    }

    pub fn host(&self) -> &Arc<dyn RoomHost> {
        &self.host
    }

    pub fn rotation(&self) -> &RotationSignal {
        &self.rotation
    }

    pub fn config(&self) -> &RosterConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &BalanceEvaluator {
        &self.evaluator
    }

    pub fn gateway(&self) -> &RosterGateway {
        &self.gateway
    }

    pub fn lock(&self) -> &RosterLock {
        self.gateway.lock()
    }

    pub fn selection(&self) -> &SelectionController {
        &self.selection
    }

    /// Runs auto-balance and then, if the roster calls for it, starts a draft.
    pub async fn rebalance(&self, trigger: &str) -> Result<RebalanceOutcome, LockError> {
        if self.rotation.is_raised() || self.selection.is_selection_active() {
            debug!("Rebalance on {} stood down", trigger);
            return Ok(RebalanceOutcome::StoodDown);
        }

        let snapshot = RosterSnapshot::capture(self.host.as_ref());
        if let Some(plan) = self.evaluator.auto_balance_plan(&snapshot, &self.rotation) {
            let moved = self
                .gateway
                .set_team_safe(plan.participant, Team::Spectator, "auto-balance")
                .await?;
            if moved {
                info!(
                    "Auto-balance on {} benched participant {} from {}",
                    trigger, plan.participant, plan.from
                );
                return Ok(RebalanceOutcome::AutoBalanced {
                    participant: plan.participant,
                    from: plan.from,
                });
            }
        }

        if self.selection.start_selection() {
            info!("Draft started on {}", trigger);
            return Ok(RebalanceOutcome::DraftStarted);
        }
        Ok(RebalanceOutcome::Unchanged)
    }

    /// Benches AFK participants still sitting on a team. Returns how many moved.
    pub async fn sweep_afk(&self) -> Result<usize, LockError> {
        let afk: Vec<ParticipantId> = self
            .host
            .participants()
            .into_iter()
            .filter(|p| p.afk && p.team.is_playing())
            .map(|p| p.id)
            .collect();

        let mut moved = 0;
        for id in afk {
            if self
                .gateway
                .set_team_conditional(id, Team::Spectator, "afk")
                .await?
            {
                moved += 1;
            }
        }

        self.selection.on_roster_changed();
        Ok(moved)
    }

    /// Call after a participant has been removed from the host.
    pub async fn handle_departure(&self, id: ParticipantId) {
        self.selection.on_roster_changed();
        if let Err(e) = self.rebalance(&format!("departure of {}", id)).await {
            warn!("Rebalance after departure of {} failed: {}", id, e);
        }
    }
}
