//! Balance decisions. Nothing in here mutates the roster.
//!
//! Every decision works on a [`RosterSnapshot`] taken from the host at call
//! time. Snapshots go stale the moment they are taken, so whoever acts on a
//! decision re-validates the specific participant before writing.

use crate::config::RosterConfig;
use crate::room::{RoomHost, RotationSignal};
use shared::{Participant, ParticipantId, Team, TeamCounts};

/// Live, non-AFK spectators in join order.
pub fn valid_spectators(host: &dyn RoomHost) -> Vec<Participant> {
    host.participants()
        .into_iter()
        .filter(Participant::is_available_spectator)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct RosterSnapshot {
    pub counts: TeamCounts,
    pub team_a: Vec<ParticipantId>,
    pub team_b: Vec<ParticipantId>,
    /// Spectators that could be drafted right now
    pub spectators: Vec<Participant>,
}

impl RosterSnapshot {
    pub fn capture(host: &dyn RoomHost) -> Self {
        Self::from_participants(&host.participants())
    }

    pub fn from_participants(participants: &[Participant]) -> Self {
        let members = |team: Team| -> Vec<ParticipantId> {
            participants
                .iter()
                .filter(|p| p.team == team)
                .map(|p| p.id)
                .collect()
        };

        let mut spectators: Vec<Participant> = participants
            .iter()
            .filter(|p| p.is_available_spectator())
            .cloned()
            .collect();
        spectators.sort_by_key(|p| p.id);

        Self {
            counts: TeamCounts::tally(participants),
            team_a: members(Team::TeamA),
            team_b: members(Team::TeamB),
            spectators,
        }
    }

    pub fn members(&self, team: Team) -> &[ParticipantId] {
        match team {
            Team::TeamA => &self.team_a,
            Team::TeamB => &self.team_b,
            Team::Spectator => &[],
        }
    }
}

/// One corrective move proposed by auto-balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoBalance {
    pub from: Team,
    pub participant: ParticipantId,
}

#[derive(Debug, Clone, Copy)]
pub struct BalanceEvaluator {
    max_team_size: usize,
    max_start_imbalance: usize,
    min_auto_balance_players: usize,
}

impl BalanceEvaluator {
    pub fn new(config: &RosterConfig) -> Self {
        Self {
            max_team_size: config.max_team_size,
            max_start_imbalance: config.max_start_imbalance,
            min_auto_balance_players: config.min_auto_balance_players,
        }
    }

    pub fn max_team_size(&self) -> usize {
        self.max_team_size
    }

    /// Whether a draft should start now.
    pub fn should_trigger_selection(
        &self,
        snapshot: &RosterSnapshot,
        rotation: &RotationSignal,
    ) -> bool {
        if rotation.is_raised() {
            return false;
        }

        let counts = snapshot.counts;
        let needed = if counts.is_tied() { 2 } else { 1 };
        snapshot.spectators.len() >= needed
            && self.has_open_slot(counts)
            && counts.difference() <= self.max_start_imbalance
    }

    /// Proposes moving the newest player of the larger team to the bench
    /// when the teams are uneven and nobody is left to draft.
    pub fn auto_balance_plan(
        &self,
        snapshot: &RosterSnapshot,
        rotation: &RotationSignal,
    ) -> Option<AutoBalance> {
        if rotation.is_raised() || !snapshot.spectators.is_empty() {
            return None;
        }

        let counts = snapshot.counts;
        if counts.total() < self.min_auto_balance_players {
            return None;
        }

        let from = counts.larger()?;
        let participant = snapshot.members(from).iter().copied().max()?;
        Some(AutoBalance { from, participant })
    }

    pub fn should_auto_balance(&self, snapshot: &RosterSnapshot, rotation: &RotationSignal) -> bool {
        self.auto_balance_plan(snapshot, rotation).is_some()
    }

    /// Whether a running draft should ask for another pick.
    pub fn should_continue_selection(&self, counts: TeamCounts, remaining_candidates: usize) -> bool {
        remaining_candidates > 0 && self.has_open_slot(counts) && counts.difference() <= 1
    }

    fn has_open_slot(&self, counts: TeamCounts) -> bool {
        counts.team_a < self.max_team_size || counts.team_b < self.max_team_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(team_a: usize, team_b: usize, spectators: usize) -> Vec<Participant> {
        let mut participants = Vec::new();
        let mut next_id = 1;
        for (team, count) in [
            (Team::TeamA, team_a),
            (Team::TeamB, team_b),
            (Team::Spectator, spectators),
        ] {
            for _ in 0..count {
                let mut p = Participant::new(next_id, format!("p{}", next_id));
                p.team = team;
                participants.push(p);
                next_id += 1;
            }
        }
        participants
    }

    fn snapshot(team_a: usize, team_b: usize, spectators: usize) -> RosterSnapshot {
        RosterSnapshot::from_participants(&roster(team_a, team_b, spectators))
    }

    fn evaluator() -> BalanceEvaluator {
        BalanceEvaluator::new(&RosterConfig::default())
    }

    #[test]
    fn test_snapshot_skips_afk_spectators() {
        let mut participants = roster(1, 1, 3);
        participants[2].afk = true;

        let snapshot = RosterSnapshot::from_participants(&participants);
        assert_eq!(snapshot.counts, TeamCounts::new(1, 1));
        assert_eq!(snapshot.spectators.len(), 2);
        assert_eq!(snapshot.members(Team::TeamA), &[1]);
        assert_eq!(snapshot.members(Team::TeamB), &[2]);
    }

    #[test]
    fn test_trigger_when_unequal_with_one_spectator() {
        let rotation = RotationSignal::new();
        assert!(evaluator().should_trigger_selection(&snapshot(4, 6, 2), &rotation));
        assert!(evaluator().should_trigger_selection(&snapshot(2, 3, 1), &rotation));
    }

    #[test]
    fn test_trigger_needs_two_spectators_when_tied() {
        let rotation = RotationSignal::new();
        assert!(!evaluator().should_trigger_selection(&snapshot(5, 5, 1), &rotation));
        assert!(evaluator().should_trigger_selection(&snapshot(5, 5, 2), &rotation));
        assert!(evaluator().should_trigger_selection(&snapshot(0, 0, 2), &rotation));
    }

    #[test]
    fn test_no_trigger_when_full_or_too_uneven() {
        let rotation = RotationSignal::new();
        assert!(!evaluator().should_trigger_selection(&snapshot(6, 6, 3), &rotation));
        assert!(!evaluator().should_trigger_selection(&snapshot(1, 4, 3), &rotation));
        assert!(!evaluator().should_trigger_selection(&snapshot(3, 4, 0), &rotation));
    }

    #[test]
    fn test_rotation_blocks_everything() {
        let rotation = RotationSignal::new();
        let _guard = rotation.begin().unwrap();

        assert!(!evaluator().should_trigger_selection(&snapshot(4, 6, 2), &rotation));
        assert!(!evaluator().should_auto_balance(&snapshot(3, 1, 0), &rotation));
    }

    #[test]
    fn test_auto_balance_picks_newest_of_larger_team() {
        let rotation = RotationSignal::new();
        let plan = evaluator().auto_balance_plan(&snapshot(1, 3, 0), &rotation);
        assert_eq!(
            plan,
            Some(AutoBalance {
                from: Team::TeamB,
                participant: 4,
            })
        );
    }

    #[test]
    fn test_auto_balance_declines() {
        let rotation = RotationSignal::new();
        // spectators available, the draft handles it
        assert!(!evaluator().should_auto_balance(&snapshot(1, 3, 1), &rotation));
        // even teams
        assert!(!evaluator().should_auto_balance(&snapshot(2, 2, 0), &rotation));
        // too few players
        assert!(!evaluator().should_auto_balance(&snapshot(2, 0, 0), &rotation));
    }

    #[test]
    fn test_should_continue_selection() {
        let evaluator = evaluator();
        assert!(evaluator.should_continue_selection(TeamCounts::new(5, 6), 1));
        assert!(evaluator.should_continue_selection(TeamCounts::new(3, 3), 2));
        assert!(!evaluator.should_continue_selection(TeamCounts::new(5, 6), 0));
        assert!(!evaluator.should_continue_selection(TeamCounts::new(6, 6), 4));
        assert!(!evaluator.should_continue_selection(TeamCounts::new(2, 4), 3));
    }
}
