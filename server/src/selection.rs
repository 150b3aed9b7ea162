//! Draft protocol: the smaller team picks waiting spectators one at a time
//!
//! ```text
//!   Idle --start_selection--> AwaitingPicks --end_selection--> Idle
//!                              |        ^
//!                              +--------+  accepted pick / pick timeout
//! ```
//!
//! The session is only ever touched through [`SelectionController`]. Team
//! writes go through the [`RosterGateway`] while the controller holds the
//! roster lock, so a pick and a pick timeout can never both assign.
//!
//! Every legitimate mutation of the session re-seals its digest. The digest
//! covers exactly these fields: `active`, candidate ids in list order, and
//! assignments in id order. A pick that finds the digest no longer matches
//! tears the session down.

use crate::balance::{valid_spectators, BalanceEvaluator, RosterSnapshot};
use crate::error::{PickError, SelectionError};
use crate::gateway::RosterGateway;
use crate::lock::LockGuard;
use crate::room::{Notice, RoomHost, RotationSignal};
use crate::timer::PickTimer;
use log::{debug, error, info, warn};
use shared::{Participant, ParticipantId, Team, TeamCounts};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Which teams may pick right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Eligibility {
    pub team_a: bool,
    pub team_b: bool,
}

impl Eligibility {
    pub const NONE: Eligibility = Eligibility {
        team_a: false,
        team_b: false,
    };

    pub fn only(team: Team) -> Self {
        Self {
            team_a: team == Team::TeamA,
            team_b: team == Team::TeamB,
        }
    }

    /// The strictly smaller team picks. On a tie with one candidate left the
    /// alternation team picks; on a tie with more, both may. Full teams never pick.
    pub fn compute(
        counts: TeamCounts,
        candidates: usize,
        max_team_size: usize,
        tie_break: impl FnOnce() -> Team,
    ) -> Self {
        let open = |team: Team| !counts.is_full(team, max_team_size);
        let eligibility = match counts.smaller() {
            Some(team) => Self::only(team),
            None if candidates == 1 => Self::only(tie_break()),
            None => Self {
                team_a: true,
                team_b: true,
            },
        };

        Self {
            team_a: eligibility.team_a && open(Team::TeamA),
            team_b: eligibility.team_b && open(Team::TeamB),
        }
    }

    pub fn allows(&self, team: Team) -> bool {
        match team {
            Team::TeamA => self.team_a,
            Team::TeamB => self.team_b,
            Team::Spectator => false,
        }
    }

    /// The single eligible team, if exactly one is.
    pub fn sole(&self) -> Option<Team> {
        match (self.team_a, self.team_b) {
            (true, false) => Some(Team::TeamA),
            (false, true) => Some(Team::TeamB),
            _ => None,
        }
    }

    pub fn is_both(&self) -> bool {
        self.team_a && self.team_b
    }
}

#[derive(Debug, Default)]
struct SelectionSession {
    active: bool,
    candidates: Vec<Participant>,
    eligibility: Eligibility,
    assignments: BTreeMap<ParticipantId, Team>,
    /// Alternation team decided for this session, once a tie needed one
    tie_break: Option<Team>,
    /// Generation of the currently armed pick timer
    timer_generation: u64,
    /// Distinguishes this session from earlier ones; zero when idle
    serial: u64,
    digest: u64,
}

impl SelectionSession {
    fn compute_digest(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.active.hash(&mut hasher);
        for candidate in &self.candidates {
            candidate.id.hash(&mut hasher);
        }
        for (id, team) in &self.assignments {
            id.hash(&mut hasher);
            team.hash(&mut hasher);
        }
        hasher.finish()
    }

    fn seal(&mut self) {
        self.digest = self.compute_digest();
    }

    fn verify(&self) -> Result<(), SelectionError> {
        let found = self.compute_digest();
        if found == self.digest {
            Ok(())
        } else {
            Err(SelectionError::StateCorruption {
                recorded: self.digest,
                found,
            })
        }
    }

    fn candidate_ids(&self) -> Vec<ParticipantId> {
        self.candidates.iter().map(|c| c.id).collect()
    }
}

#[derive(Debug)]
struct SelectionState {
    session: SelectionSession,
    /// Team that wins the next tie-break; flips every time one is used
    next_tie_break: Team,
    timer_generations: u64,
    sessions: u64,
}

impl SelectionState {
    fn tie_break(&mut self) -> Team {
        if let Some(team) = self.session.tie_break {
            return team;
        }
        let team = self.next_tie_break;
        self.next_tie_break = team.opponent();
        self.session.tie_break = Some(team);
        team
    }

    fn eligibility_for(&mut self, counts: TeamCounts, max_team_size: usize) -> Eligibility {
        let candidates = self.session.candidates.len();
        Eligibility::compute(counts, candidates, max_team_size, || self.tie_break())
    }

    /// Whether `serial` still names the running session.
    fn is_current(&self, serial: u64) -> bool {
        self.session.active && self.session.serial == serial
    }

    /// Rebuilds the candidate list from the live roster, dropping anyone who
    /// left, went AFK, was moved, or is already assigned.
    fn refresh_candidates(&mut self, host: &dyn RoomHost) {
        let assignments = &self.session.assignments;
        self.session.candidates = valid_spectators(host)
            .into_iter()
            .filter(|p| !assignments.contains_key(&p.id))
            .collect();
    }
}

/// What the controller does after a session mutation.
enum NextStep {
    Continue,
    End(&'static str),
}

struct Inner {
    host: Arc<dyn RoomHost>,
    gateway: RosterGateway,
    evaluator: BalanceEvaluator,
    rotation: RotationSignal,
    pick_timeout: Duration,
    state: Mutex<SelectionState>,
    timer: PickTimer,
}

/// Owns the draft session. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct SelectionController {
    inner: Arc<Inner>,
}

impl SelectionController {
    pub fn new(
        host: Arc<dyn RoomHost>,
        gateway: RosterGateway,
        evaluator: BalanceEvaluator,
        rotation: RotationSignal,
        pick_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                host,
                gateway,
                evaluator,
                rotation,
                pick_timeout,
                state: Mutex::new(SelectionState {
                    session: SelectionSession::default(),
                    next_tie_break: Team::TeamA,
                    timer_generations: 0,
                    sessions: 0,
                }),
                timer: PickTimer::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SelectionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn max_team_size(&self) -> usize {
        self.inner.evaluator.max_team_size()
    }

    fn fresh_counts(&self) -> TeamCounts {
        TeamCounts::tally(&self.inner.host.participants())
    }

    pub fn is_selection_active(&self) -> bool {
        self.state().session.active
    }

    pub fn candidates(&self) -> Vec<Participant> {
        self.state().session.candidates.clone()
    }

    pub fn eligibility(&self) -> Eligibility {
        self.state().session.eligibility
    }

    pub fn assignments(&self) -> BTreeMap<ParticipantId, Team> {
        self.state().session.assignments.clone()
    }

    pub fn is_timer_armed(&self) -> bool {
        self.inner.timer.is_armed()
    }

    /// Starts a draft if none is running and the roster calls for one.
    pub fn start_selection(&self) -> bool {
        let snapshot = RosterSnapshot::capture(self.inner.host.as_ref());
        let max_team_size = self.max_team_size();
        {
            let mut state = self.state();
            if state.session.active {
                debug!("Draft already running");
                return false;
            }
            if !self
                .inner
                .evaluator
                .should_trigger_selection(&snapshot, &self.inner.rotation)
            {
                return false;
            }

            state.sessions += 1;
            state.session = SelectionSession {
                active: true,
                candidates: snapshot.spectators,
                serial: state.sessions,
                ..SelectionSession::default()
            };
            let eligibility = state.eligibility_for(snapshot.counts, max_team_size);
            state.session.eligibility = eligibility;
            state.session.seal();

            info!(
                "Draft started at {} with {} candidate(s), eligible {:?}",
                snapshot.counts,
                state.session.candidates.len(),
                eligibility
            );
        }

        self.inner.host.set_paused(true);
        self.announce_candidates();
        self.arm_timer();
        true
    }

    /// Handles a chat message that might be a pick.
    ///
    /// Returns true when the message was consumed as a pick attempt, valid or
    /// not, so the caller does not also treat it as chat.
    pub async fn submit_pick(&self, picker: ParticipantId, raw: &str) -> bool {
        let Ok(index) = raw.trim().parse::<usize>() else {
            return false;
        };
        if !self.is_selection_active() {
            return false;
        }
        let on_team = self
            .inner
            .host
            .participant(picker)
            .is_some_and(|p| p.team.is_playing());
        if !on_team {
            return false;
        }

        match self.process_pick(picker, index).await {
            Ok(()) => {}
            Err(SelectionError::Pick(rejection)) => {
                debug!("Pick {} by {} rejected: {}", index, picker, rejection);
                self.inner
                    .host
                    .notify(Notice::to(picker, rejection.to_string()));
                if matches!(rejection, PickError::CandidateUnavailable { .. }) {
                    self.after_refresh();
                }
            }
            Err(SelectionError::Lock(e)) => {
                error!("Pick {} by {} failed: {}", index, picker, e);
                self.inner.host.notify(Notice::to(
                    picker,
                    "Your pick could not be processed, please try again",
                ));
            }
            Err(corruption @ SelectionError::StateCorruption { .. }) => {
                error!("Aborting draft: {}", corruption);
                self.end_selection("draft state was corrupted");
            }
        }
        true
    }

    async fn process_pick(&self, picker: ParticipantId, index: usize) -> Result<(), SelectionError> {
        let guard = self.inner.gateway.lock().acquire("draft pick").await?;
        let max_team_size = self.max_team_size();

        let (candidate, team, serial) = {
            let mut state = self.state();
            if !state.session.active {
                return Ok(());
            }
            state.session.verify()?;

            let Some(team) = self
                .inner
                .host
                .participant(picker)
                .map(|p| p.team)
                .filter(|team| team.is_playing())
            else {
                return Err(PickError::NotYourTurn.into());
            };

            let counts = self.fresh_counts();
            if !state.eligibility_for(counts, max_team_size).allows(team) {
                return Err(if counts.is_full(team, max_team_size) {
                    PickError::TeamFull
                } else {
                    PickError::NotYourTurn
                }
                .into());
            }

            let len = state.session.candidates.len();
            if index == 0 || index > len {
                return Err(PickError::OutOfRange { index, len }.into());
            }

            let candidate = state.session.candidates[index - 1].clone();
            let still_available = self
                .inner
                .host
                .participant(candidate.id)
                .is_some_and(|p| p.is_available_spectator());
            if !still_available {
                state.refresh_candidates(self.inner.host.as_ref());
                self.reevaluate(&mut state);
                return Err(PickError::CandidateUnavailable {
                    name: candidate.name,
                }
                .into());
            }

            (candidate, team, state.session.serial)
        };

        self.assign(guard, serial, candidate, team, "draft pick").await?;
        Ok(())
    }

    /// Writes one assignment under the held lock, then re-arms or ends.
    ///
    /// The session named by `serial` may have ended while the write was in
    /// flight. The write stands, but nothing is recorded against a dead session.
    async fn assign(
        &self,
        guard: LockGuard,
        serial: u64,
        candidate: Participant,
        team: Team,
        reason: &'static str,
    ) -> Result<(), SelectionError> {
        let moved = self
            .inner
            .gateway
            .set_team_nested(&guard, candidate.id, team, reason)
            .await?;

        let max_team_size = self.max_team_size();
        let (counts, step) = {
            let mut state = self.state();
            if !state.is_current(serial) {
                drop(state);
                guard.release();
                info!(
                    "Draft ended while {} was being moved to {}, nothing recorded",
                    candidate.name, team
                );
                return Ok(());
            }
            if moved {
                state.session.assignments.insert(candidate.id, team);
            }
            state.refresh_candidates(self.inner.host.as_ref());

            let counts = self.fresh_counts();
            let remaining = state.session.candidates.len();
            let step = if self
                .inner
                .evaluator
                .should_continue_selection(counts, remaining)
            {
                let eligibility = state.eligibility_for(counts, max_team_size);
                state.session.eligibility = eligibility;
                if eligibility == Eligibility::NONE {
                    NextStep::End("no team can pick")
                } else {
                    NextStep::Continue
                }
            } else if remaining == 0 {
                NextStep::End("no candidates left")
            } else {
                NextStep::End("teams are set")
            };
            state.session.seal();
            (counts, step)
        };
        guard.release();

        if moved {
            info!("{} drafted {} ({}), now {}", team, candidate.name, reason, counts);
            self.inner.host.notify(Notice::broadcast(format!(
                "{} joins {} ({})",
                candidate.name, team, reason
            )));
        } else {
            warn!("Draft write for {} had no effect", candidate.id);
        }

        match step {
            NextStep::Continue => {
                self.arm_timer();
                self.announce_candidates();
            }
            NextStep::End(reason) => {
                self.end_selection(reason);
            }
        }
        Ok(())
    }

    /// Auto-assigns the first candidate when the eligible team runs out of time.
    async fn handle_timeout(&self, generation: u64) {
        if !self.inner.timer.disarm_fired(generation) {
            return;
        }

        let guard = match self.inner.gateway.lock().acquire("draft timeout").await {
            Ok(guard) => guard,
            Err(e) => {
                error!("Pick timeout could not take the roster lock: {}", e);
                self.end_selection("roster lock unavailable");
                return;
            }
        };
        let max_team_size = self.max_team_size();

        let pick = {
            let mut state = self.state();
            if !state.session.active || state.session.timer_generation != generation {
                debug!("Stale pick timeout {} ignored", generation);
                return;
            }
            if let Err(corruption) = state.session.verify() {
                drop(state);
                guard.release();
                error!("Aborting draft: {}", corruption);
                self.end_selection("draft state was corrupted");
                return;
            }

            state.refresh_candidates(self.inner.host.as_ref());
            let counts = self.fresh_counts();
            let eligibility = state.eligibility_for(counts, max_team_size);
            let team = match (eligibility.sole(), eligibility.is_both()) {
                (Some(team), _) => Some(team),
                (None, true) => Some(state.tie_break()),
                (None, false) => None,
            };
            state.session.seal();

            match (state.session.candidates.first().cloned(), team) {
                (Some(candidate), Some(team)) => Some((candidate, team, state.session.serial)),
                _ => None,
            }
        };

        match pick {
            Some((candidate, team, serial)) => {
                info!("Pick timed out, auto-assigning {} to {}", candidate.name, team);
                let outcome = self
                    .assign(guard, serial, candidate, team, "pick timed out")
                    .await;
                if let Err(e) = outcome {
                    error!("Auto-assignment failed: {}", e);
                    self.end_selection("auto-assignment failed");
                }
            }
            None => {
                guard.release();
                self.end_selection("pick timed out with nobody left to assign");
            }
        }
    }

    /// Prunes candidates after joins, leaves, AFK changes or outside moves.
    pub fn on_roster_changed(&self) {
        let changed = {
            let mut state = self.state();
            if !state.session.active {
                return;
            }
            let before = (state.session.candidate_ids(), state.session.eligibility);
            state.refresh_candidates(self.inner.host.as_ref());
            self.reevaluate(&mut state);
            (state.session.candidate_ids(), state.session.eligibility) != before
        };

        if changed {
            self.after_refresh();
        }
    }

    /// Recomputes eligibility from the live counts and reseals.
    fn reevaluate(&self, state: &mut SelectionState) {
        let counts = self.fresh_counts();
        let eligibility = state.eligibility_for(counts, self.max_team_size());
        state.session.eligibility = eligibility;
        state.session.seal();
    }

    fn after_refresh(&self) {
        if self.candidates().is_empty() {
            self.end_selection("no candidates left");
        } else {
            self.announce_candidates();
        }
    }

    /// Tears the session down and resumes the match. Returns false if no
    /// session was running.
    pub fn end_selection(&self, reason: &str) -> bool {
        self.inner.timer.cancel();
        let session = {
            let mut state = self.state();
            if !state.session.active {
                return false;
            }
            std::mem::take(&mut state.session)
        };

        self.inner.host.set_paused(false);
        let counts = self.fresh_counts();
        info!(
            "Draft ended ({}) after {} pick(s), teams {}",
            reason,
            session.assignments.len(),
            counts
        );
        self.inner.host.notify(Notice::broadcast(format!(
            "Draft over ({}). {} {} - {} {}",
            reason,
            Team::TeamA,
            counts.team_a,
            counts.team_b,
            Team::TeamB
        )));
        true
    }

    /// Ends the draft on an admin's request. Waits for any pick or timeout
    /// holding the roster lock to finish first.
    pub async fn force_end_selection(&self) -> bool {
        match self.inner.gateway.lock().acquire("draft force end").await {
            Ok(guard) => {
                let ended = self.end_selection("ended by admin");
                guard.release();
                ended
            }
            Err(e) => {
                warn!("Ending draft without the roster lock: {}", e);
                self.end_selection("ended by admin")
            }
        }
    }

    fn arm_timer(&self) {
        let generation = {
            let mut state = self.state();
            state.timer_generations += 1;
            let generation = state.timer_generations;
            state.session.timer_generation = generation;
            generation
        };

        let controller = self.clone();
        self.inner
            .timer
            .arm(generation, self.inner.pick_timeout, async move {
                controller.handle_timeout(generation).await;
            });
    }

    fn announce_candidates(&self) {
        let (candidates, eligibility) = {
            let state = self.state();
            (state.session.candidates.clone(), state.session.eligibility)
        };

        let turn = match (eligibility.team_a, eligibility.team_b) {
            (true, true) => format!("{} or {}", Team::TeamA, Team::TeamB),
            (true, false) => Team::TeamA.to_string(),
            (false, true) => Team::TeamB.to_string(),
            (false, false) => "nobody".to_string(),
        };
        let list = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{}. {}", i + 1, c.name))
            .collect::<Vec<_>>()
            .join("  ");

        self.inner.host.notify(Notice::broadcast(format!(
            "{} to pick ({}s): {}",
            turn,
            self.inner.pick_timeout.as_secs(),
            list
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RosterConfig;
    use crate::lock::RosterLock;
    use crate::room::{Room, TeamWrite};
    use std::sync::OnceLock;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    fn controller_for(host: Arc<dyn RoomHost>, pick_timeout: Duration) -> SelectionController {
        let config = RosterConfig::default();
        let gateway = RosterGateway::new(
            Arc::clone(&host),
            RosterLock::new(Duration::from_secs(5)),
        );
        SelectionController::new(
            host,
            gateway,
            BalanceEvaluator::new(&config),
            RotationSignal::new(),
            pick_timeout,
        )
    }

    struct Fixture {
        room: Arc<Room>,
        controller: SelectionController,
        notices: mpsc::UnboundedReceiver<Notice>,
    }

    impl Fixture {
        fn new(pick_timeout: Duration) -> Self {
            let (tx, notices) = mpsc::unbounded_channel();
            let room = Arc::new(Room::new(tx));
            let controller = controller_for(room.clone(), pick_timeout);
            Self {
                room,
                controller,
                notices,
            }
        }

        fn seat(&self, team: Team, count: usize) -> Vec<ParticipantId> {
            (0..count)
                .map(|_| {
                    let p = self.room.join("player");
                    self.room.write_team(p.id, team);
                    p.id
                })
                .collect()
        }

        fn team_of(&self, id: ParticipantId) -> Team {
            self.room.participant(id).unwrap().team
        }

        fn bench(&self, count: usize) -> Vec<ParticipantId> {
            (0..count)
                .map(|i| self.room.join(&format!("bench{}", i)).id)
                .collect()
        }

        fn lock(&self) -> &RosterLock {
            self.controller.inner.gateway.lock()
        }

        fn broadcasts(&mut self) -> Vec<String> {
            let mut texts = Vec::new();
            while let Ok(notice) = self.notices.try_recv() {
                if notice.target.is_none() {
                    texts.push(notice.text);
                }
            }
            texts
        }

        fn notices_for(&mut self, id: ParticipantId) -> Vec<String> {
            let mut texts = Vec::new();
            while let Ok(notice) = self.notices.try_recv() {
                if notice.target == Some(id) {
                    texts.push(notice.text);
                }
            }
            texts
        }
    }

    #[test]
    fn test_eligibility_smaller_team() {
        let eligibility = Eligibility::compute(TeamCounts::new(4, 6), 2, 6, || Team::TeamB);
        assert_eq!(eligibility, Eligibility::only(Team::TeamA));
        assert_eq!(eligibility.sole(), Some(Team::TeamA));
    }

    #[test]
    fn test_eligibility_tie() {
        let one = Eligibility::compute(TeamCounts::new(5, 5), 1, 6, || Team::TeamB);
        assert_eq!(one, Eligibility::only(Team::TeamB));

        let many = Eligibility::compute(TeamCounts::new(5, 5), 3, 6, || panic!("not consulted"));
        assert!(many.is_both());

        let full = Eligibility::compute(TeamCounts::new(6, 6), 2, 6, || Team::TeamA);
        assert_eq!(full, Eligibility::NONE);
    }

    #[test]
    fn test_digest_detects_tampering() {
        let mut session = SelectionSession {
            active: true,
            candidates: vec![Participant::new(1, "a"), Participant::new(2, "b")],
            ..SelectionSession::default()
        };
        session.seal();
        assert!(session.verify().is_ok());

        session.candidates.pop();
        assert!(matches!(
            session.verify(),
            Err(SelectionError::StateCorruption { .. })
        ));
    }

    #[tokio::test]
    async fn test_start_pauses_and_snapshots() {
        let fixture = Fixture::new(Duration::from_secs(30));
        fixture.seat(Team::TeamA, 2);
        fixture.seat(Team::TeamB, 3);
        let spectator = fixture.room.join("bench");

        assert!(fixture.controller.start_selection());
        assert!(fixture.controller.is_selection_active());
        assert!(fixture.room.is_paused());
        assert!(fixture.controller.is_timer_armed());
        assert_eq!(fixture.controller.candidates()[0].id, spectator.id);
        assert_eq!(fixture.controller.eligibility(), Eligibility::only(Team::TeamA));

        assert!(!fixture.controller.start_selection());
        fixture.controller.force_end_selection().await;
    }

    #[tokio::test]
    async fn test_non_numeric_and_spectator_input_not_consumed() {
        let fixture = Fixture::new(Duration::from_secs(30));
        let red = fixture.seat(Team::TeamA, 1);
        fixture.seat(Team::TeamB, 2);
        let bench = fixture.room.join("bench");
        assert!(fixture.controller.start_selection());

        assert!(!fixture.controller.submit_pick(red[0], "gg").await);
        assert!(!fixture.controller.submit_pick(bench.id, "1").await);
        fixture.controller.force_end_selection().await;
        assert!(!fixture.controller.submit_pick(red[0], "1").await);
    }

    #[tokio::test]
    async fn test_invalid_picks_are_reported_to_picker() {
        let mut fixture = Fixture::new(Duration::from_secs(30));
        let red = fixture.seat(Team::TeamA, 1);
        let blue = fixture.seat(Team::TeamB, 2);
        fixture.room.join("bench");
        assert!(fixture.controller.start_selection());

        assert!(fixture.controller.submit_pick(red[0], "5").await);
        assert!(fixture.controller.submit_pick(blue[0], "1").await);

        let red_notices = fixture.notices_for(red[0]);
        assert_eq!(red_notices, vec!["Pick a number between 1 and 1".to_string()]);
        assert!(fixture.controller.is_selection_active());
        assert_eq!(fixture.controller.candidates().len(), 1);
    }

    #[tokio::test]
    async fn test_blue_rejected_when_not_their_turn() {
        let mut fixture = Fixture::new(Duration::from_secs(30));
        fixture.seat(Team::TeamA, 1);
        let blue = fixture.seat(Team::TeamB, 2);
        fixture.room.join("bench");
        assert!(fixture.controller.start_selection());

        assert!(fixture.controller.submit_pick(blue[0], "1").await);
        assert_eq!(
            fixture.notices_for(blue[0]),
            vec![PickError::NotYourTurn.to_string()]
        );
        fixture.controller.force_end_selection().await;
    }

    #[tokio::test]
    async fn test_accepted_pick_moves_candidate() {
        let fixture = Fixture::new(Duration::from_secs(30));
        let red = fixture.seat(Team::TeamA, 1);
        fixture.seat(Team::TeamB, 3);
        let first = fixture.room.join("first");
        let second = fixture.room.join("second");
        assert!(fixture.controller.start_selection());

        assert!(fixture.controller.submit_pick(red[0], "2").await);
        assert_eq!(fixture.team_of(second.id), Team::TeamA);
        assert_eq!(fixture.team_of(first.id), Team::Spectator);
        assert_eq!(fixture.controller.assignments().get(&second.id), Some(&Team::TeamA));
        assert_eq!(fixture.controller.candidates().len(), 1);
        assert!(fixture.controller.is_selection_active());
        assert!(!fixture.controller.inner.gateway.lock().is_locked());
        fixture.controller.force_end_selection().await;
    }

    #[tokio::test]
    async fn test_unavailable_candidate_refreshes_list() {
        let mut fixture = Fixture::new(Duration::from_secs(30));
        let red = fixture.seat(Team::TeamA, 1);
        fixture.seat(Team::TeamB, 3);
        let gone = fixture.room.join("gone");
        let stays = fixture.room.join("stays");
        assert!(fixture.controller.start_selection());

        // AFK without the controller being told
        fixture.room.set_afk(gone.id, true);
        assert!(fixture.controller.submit_pick(red[0], "1").await);

        let notices = fixture.notices_for(red[0]);
        assert!(notices[0].contains("no longer available"));
        assert_eq!(fixture.team_of(gone.id), Team::Spectator);
        let ids: Vec<_> = fixture.controller.candidates().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![stays.id]);

        assert!(fixture.controller.submit_pick(red[0], "1").await);
        assert_eq!(fixture.team_of(stays.id), Team::TeamA);
    }

    #[tokio::test]
    async fn test_corrupted_session_is_aborted() {
        let fixture = Fixture::new(Duration::from_secs(30));
        let red = fixture.seat(Team::TeamA, 1);
        fixture.seat(Team::TeamB, 2);
        fixture.room.join("bench");
        fixture.room.join("bench2");
        assert!(fixture.controller.start_selection());

        fixture.controller.state().session.candidates.pop();

        assert!(fixture.controller.submit_pick(red[0], "1").await);
        assert!(!fixture.controller.is_selection_active());
        assert!(!fixture.room.is_paused());
        assert!(!fixture.controller.is_timer_armed());
    }

    #[tokio::test]
    async fn test_leave_prunes_and_ends_when_empty() {
        let fixture = Fixture::new(Duration::from_secs(30));
        fixture.seat(Team::TeamA, 1);
        fixture.seat(Team::TeamB, 2);
        let bench = fixture.room.join("bench");
        assert!(fixture.controller.start_selection());

        fixture.room.leave(bench.id);
        fixture.controller.on_roster_changed();

        assert!(!fixture.controller.is_selection_active());
        assert!(!fixture.room.is_paused());
    }

    #[tokio::test]
    async fn test_timeout_auto_assigns_first_candidate() {
        let fixture = Fixture::new(Duration::from_millis(100));
        fixture.seat(Team::TeamA, 2);
        fixture.seat(Team::TeamB, 4);
        let first = fixture.room.join("first");
        let second = fixture.room.join("second");
        assert!(fixture.controller.start_selection());

        sleep(Duration::from_millis(150)).await;
        assert_eq!(fixture.team_of(first.id), Team::TeamA);
        assert_eq!(fixture.team_of(second.id), Team::Spectator);
        assert!(fixture.controller.is_selection_active());
        assert!(fixture.controller.is_timer_armed());

        sleep(Duration::from_millis(100)).await;
        assert_eq!(fixture.team_of(second.id), Team::TeamA);
        assert!(!fixture.controller.is_selection_active());
        assert!(!fixture.controller.is_timer_armed());
    }

    #[tokio::test]
    async fn test_tie_break_alternates_between_sessions() {
        let fixture = Fixture::new(Duration::from_secs(30));
        fixture.seat(Team::TeamA, 2);
        fixture.seat(Team::TeamB, 2);
        let a = fixture.room.join("a");
        let b = fixture.room.join("b");

        assert!(fixture.controller.start_selection());
        fixture.room.leave(b.id);
        fixture.controller.on_roster_changed();
        assert_eq!(fixture.controller.eligibility(), Eligibility::only(Team::TeamA));
        fixture.controller.force_end_selection().await;

        fixture.room.join("c");
        assert!(fixture.controller.start_selection());
        fixture.room.leave(a.id);
        fixture.controller.on_roster_changed();
        assert_eq!(fixture.controller.eligibility(), Eligibility::only(Team::TeamB));
        fixture.controller.force_end_selection().await;
    }

    #[tokio::test]
    async fn test_unavailable_pick_recomputes_eligibility() {
        let mut fixture = Fixture::new(Duration::from_secs(30));
        let red = fixture.seat(Team::TeamA, 5);
        fixture.seat(Team::TeamB, 5);
        let gone = fixture.room.join("gone");
        fixture.room.join("stays");
        assert!(fixture.controller.start_selection());
        assert!(fixture.controller.eligibility().is_both());

        fixture.room.set_afk(gone.id, true);
        assert!(fixture.controller.submit_pick(red[0], "1").await);

        // One candidate left on a tie, so only the alternation team picks
        assert_eq!(fixture.controller.eligibility(), Eligibility::only(Team::TeamA));
        let broadcasts = fixture.broadcasts();
        assert!(broadcasts.last().unwrap().starts_with("Red to pick"));
        fixture.controller.force_end_selection().await;
    }

    #[tokio::test]
    async fn test_roster_change_recomputes_eligibility_with_same_candidates() {
        let mut fixture = Fixture::new(Duration::from_secs(30));
        fixture.seat(Team::TeamA, 2);
        let blue = fixture.seat(Team::TeamB, 3);
        fixture.bench(2);
        assert!(fixture.controller.start_selection());
        assert_eq!(fixture.controller.eligibility(), Eligibility::only(Team::TeamA));
        fixture.broadcasts();

        fixture.room.leave(blue[0]);
        fixture.controller.on_roster_changed();

        assert_eq!(fixture.controller.candidates().len(), 2);
        assert!(fixture.controller.eligibility().is_both());
        let broadcasts = fixture.broadcasts();
        assert!(broadcasts.last().unwrap().starts_with("Red or Blue to pick"));
        fixture.controller.force_end_selection().await;
    }

    /// Ends the running draft from inside a team write, the way an unlocked
    /// end path can land between the write and the session update.
    struct EndingHost {
        room: Arc<Room>,
        controller: OnceLock<SelectionController>,
    }

    impl RoomHost for EndingHost {
        fn participants(&self) -> Vec<Participant> {
            self.room.participants()
        }

        fn participant(&self, id: ParticipantId) -> Option<Participant> {
            self.room.participant(id)
        }

        fn write_team(&self, id: ParticipantId, team: Team) -> TeamWrite {
            let outcome = self.room.write_team(id, team);
            if let Some(controller) = self.controller.get() {
                controller.end_selection("ended by admin");
            }
            outcome
        }

        fn set_paused(&self, paused: bool) {
            self.room.set_paused(paused);
        }

        fn notify(&self, notice: Notice) {
            self.room.notify(notice);
        }
    }

    #[tokio::test]
    async fn test_draft_ended_during_write_records_nothing() {
        let (tx, mut notices) = mpsc::unbounded_channel();
        let room = Arc::new(Room::new(tx));
        let host = Arc::new(EndingHost {
            room: Arc::clone(&room),
            controller: OnceLock::new(),
        });

        let red = room.join("red").id;
        room.write_team(red, Team::TeamA);
        for i in 0..3 {
            let blue = room.join(&format!("blue{}", i)).id;
            room.write_team(blue, Team::TeamB);
        }
        let bench: Vec<_> = (0..3)
            .map(|i| room.join(&format!("bench{}", i)).id)
            .collect();

        let controller = controller_for(host.clone(), Duration::from_secs(30));
        assert!(controller.start_selection());
        assert!(host.controller.set(controller.clone()).is_ok());

        assert!(controller.submit_pick(red, "1").await);

        // The write itself stands
        assert_eq!(room.participant(bench[0]).unwrap().team, Team::TeamA);
        assert!(!controller.is_selection_active());
        assert!(controller.candidates().is_empty());
        assert!(controller.assignments().is_empty());
        assert!(!controller.is_timer_armed());
        assert!(!room.is_paused());
        assert!(!controller.inner.gateway.lock().is_locked());

        let mut texts = Vec::new();
        while let Ok(notice) = notices.try_recv() {
            texts.push(notice.text);
        }
        assert!(texts.last().unwrap().starts_with("Draft over (ended by admin)"));
        assert!(!texts.iter().any(|text| text.contains("joins")));
    }

    #[tokio::test]
    async fn test_pick_queued_behind_lock_beats_timeout() {
        let fixture = Fixture::new(Duration::from_millis(100));
        let picker = fixture.seat(Team::TeamA, 1)[0];
        fixture.seat(Team::TeamB, 3);
        let bench = fixture.bench(3);
        assert!(fixture.controller.start_selection());

        let held = fixture.lock().acquire("held").await.unwrap();
        let controller = fixture.controller.clone();
        let pick = tokio::spawn(async move { controller.submit_pick(picker, "1").await });
        sleep(Duration::from_millis(20)).await;
        assert_eq!(fixture.lock().queue_len(), 1);

        // The timer fires and queues behind the pick
        sleep(Duration::from_millis(120)).await;
        assert!(!fixture.controller.is_timer_armed());
        assert_eq!(fixture.lock().queue_len(), 2);
        held.release();

        assert!(pick.await.unwrap());
        sleep(Duration::from_millis(20)).await;

        let assignments = fixture.controller.assignments();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments.get(&bench[0]), Some(&Team::TeamA));
        assert_eq!(fixture.team_of(bench[1]), Team::Spectator);
        assert_eq!(fixture.team_of(bench[2]), Team::Spectator);
        let ids: Vec<_> = fixture.controller.candidates().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![bench[1], bench[2]]);

        assert!(fixture.controller.state().session.verify().is_ok());
        assert!(fixture.controller.is_selection_active());
        assert!(fixture.controller.is_timer_armed());
        assert!(!fixture.lock().is_locked());
        fixture.controller.force_end_selection().await;
    }

    #[tokio::test]
    async fn test_pick_queued_behind_timeout_uses_renumbered_list() {
        let fixture = Fixture::new(Duration::from_millis(100));
        let picker = fixture.seat(Team::TeamA, 1)[0];
        fixture.seat(Team::TeamB, 3);
        let bench = fixture.bench(3);
        assert!(fixture.controller.start_selection());

        let held = fixture.lock().acquire("held").await.unwrap();
        sleep(Duration::from_millis(130)).await;
        assert_eq!(fixture.lock().queue_len(), 1);

        let controller = fixture.controller.clone();
        let pick = tokio::spawn(async move { controller.submit_pick(picker, "1").await });
        sleep(Duration::from_millis(20)).await;
        assert_eq!(fixture.lock().queue_len(), 2);
        held.release();

        assert!(pick.await.unwrap());

        // The timeout took bench0, so "1" now names bench1
        let assignments = fixture.controller.assignments();
        assert_eq!(assignments.len(), 2);
        assert_eq!(assignments.get(&bench[0]), Some(&Team::TeamA));
        assert_eq!(assignments.get(&bench[1]), Some(&Team::TeamA));
        for (id, team) in &assignments {
            assert_eq!(fixture.team_of(*id), *team);
        }
        assert_eq!(fixture.team_of(bench[2]), Team::Spectator);
        assert_eq!(
            TeamCounts::tally(&fixture.room.participants()),
            TeamCounts::new(3, 3)
        );

        assert!(fixture.controller.state().session.verify().is_ok());
        assert!(fixture.controller.is_selection_active());
        assert!(!fixture.lock().is_locked());
        fixture.controller.force_end_selection().await;
    }

    #[tokio::test]
    async fn test_force_end_waits_for_lock_holder() {
        let fixture = Fixture::new(Duration::from_secs(30));
        fixture.seat(Team::TeamA, 1);
        fixture.seat(Team::TeamB, 2);
        fixture.bench(1);
        assert!(fixture.controller.start_selection());

        let held = fixture.lock().acquire("draft pick").await.unwrap();
        let controller = fixture.controller.clone();
        let end = tokio::spawn(async move { controller.force_end_selection().await });
        sleep(Duration::from_millis(20)).await;
        assert!(fixture.controller.is_selection_active());

        held.release();
        assert!(end.await.unwrap());
        assert!(!fixture.controller.is_selection_active());
        assert!(!fixture.room.is_paused());
        assert!(!fixture.controller.force_end_selection().await);
    }
}
