//! The live room: who is connected and on which team
//!
//! [`RoomHost`] is the boundary the roster core talks to. [`Room`] is the
//! in-memory host the UDP server runs on; tests drive it directly.

use log::{debug, info};
use shared::{Participant, ParticipantId, Team, MAX_NAME_LEN};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Outcome of a single team write against the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamWrite {
    Moved { from: Team },
    Unchanged,
    /// The participant has left. Racing a disconnect is normal, not an error.
    NotFound,
}

/// A message for one participant or, without a target, for everyone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub target: Option<ParticipantId>,
    pub text: String,
}

impl Notice {
    pub fn broadcast(text: impl Into<String>) -> Self {
        Self {
            target: None,
            text: text.into(),
        }
    }

    pub fn to(participant: ParticipantId, text: impl Into<String>) -> Self {
        Self {
            target: Some(participant),
            text: text.into(),
        }
    }
}

/// What the roster core needs from whatever owns the participants.
pub trait RoomHost: Send + Sync {
    /// Every live participant, ordered by id.
    fn participants(&self) -> Vec<Participant>;

    fn participant(&self, id: ParticipantId) -> Option<Participant>;

    fn write_team(&self, id: ParticipantId, team: Team) -> TeamWrite;

    /// Pauses or resumes the match simulation.
    fn set_paused(&self, paused: bool);

    fn notify(&self, notice: Notice);
}

/// Raised while a post-match rotation rearranges the teams in bulk.
#[derive(Debug, Clone, Default)]
pub struct RotationSignal {
    raised: Arc<AtomicBool>,
}

impl RotationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Raises the signal until the returned guard is dropped.
    ///
    /// Returns `None` when a rotation is already in progress.
    pub fn begin(&self) -> Option<RotationGuard> {
        self.raised
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RotationGuard {
                signal: self.clone(),
            })
    }
}

/// Clears the rotation signal when dropped, including on early return or error.
#[derive(Debug)]
pub struct RotationGuard {
    signal: RotationSignal,
}

impl Drop for RotationGuard {
    fn drop(&mut self) {
        self.signal.raised.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct RoomState {
    participants: BTreeMap<ParticipantId, Participant>,
    next_id: ParticipantId,
    paused: bool,
    version: u64,
}

impl RoomState {
    fn touch(&mut self) {
        self.version += 1;
    }
}

pub struct Room {
    state: Mutex<RoomState>,
    notices: mpsc::UnboundedSender<Notice>,
}

impl Room {
    /// Creates an empty room. Notices produced by the room and the roster
    /// core are delivered on `notices`.
    pub fn new(notices: mpsc::UnboundedSender<Notice>) -> Self {
        Self {
            state: Mutex::new(RoomState {
                next_id: 1,
                ..RoomState::default()
            }),
            notices,
        }
    }

    fn state(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a participant to the spectator bench.
    ///
    /// The first participant in a room without an admin becomes the admin.
    pub fn join(&self, name: &str) -> Participant {
        let mut state = self.state();
        let id = state.next_id;
        state.next_id += 1;

        let mut participant = Participant::new(id, sanitize_name(name, id));
        participant.admin = !state.participants.values().any(|p| p.admin);

        info!(
            "Participant {} '{}' joined{}",
            id,
            participant.name,
            if participant.admin { " as admin" } else { "" }
        );
        state.participants.insert(id, participant.clone());
        state.touch();
        participant
    }

    /// Removes a participant, handing the admin role on if they held it.
    pub fn leave(&self, id: ParticipantId) -> Option<Participant> {
        let mut state = self.state();
        let participant = state.participants.remove(&id)?;

        if participant.admin {
            if let Some(successor) = state.participants.values_mut().next() {
                successor.admin = true;
                info!("Participant {} is now admin", successor.id);
            }
        }

        info!("Participant {} '{}' left", id, participant.name);
        state.touch();
        Some(participant)
    }

    /// Sets the AFK flag. Returns false if the participant is gone.
    pub fn set_afk(&self, id: ParticipantId, afk: bool) -> bool {
        let mut state = self.state();
        let Some(participant) = state.participants.get_mut(&id) else {
            return false;
        };
        if participant.afk != afk {
            participant.afk = afk;
            info!("Participant {} AFK: {}", id, afk);
            state.touch();
        }
        true
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    /// Bumped on every change to participants, teams or pause state.
    pub fn version(&self) -> u64 {
        self.state().version
    }

    pub fn len(&self) -> usize {
        self.state().participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().participants.is_empty()
    }
}

impl RoomHost for Room {
    fn participants(&self) -> Vec<Participant> {
        self.state().participants.values().cloned().collect()
    }

    fn participant(&self, id: ParticipantId) -> Option<Participant> {
        self.state().participants.get(&id).cloned()
    }

    fn write_team(&self, id: ParticipantId, team: Team) -> TeamWrite {
        let mut state = self.state();
        let Some(participant) = state.participants.get_mut(&id) else {
            return TeamWrite::NotFound;
        };
        if participant.team == team {
            return TeamWrite::Unchanged;
        }

        let from = participant.team;
        participant.team = team;
        state.touch();
        TeamWrite::Moved { from }
    }

    fn set_paused(&self, paused: bool) {
        let mut state = self.state();
        if state.paused != paused {
            state.paused = paused;
            state.touch();
            info!("Match {}", if paused { "paused" } else { "resumed" });
        }
    }

    fn notify(&self, notice: Notice) {
        if self.notices.send(notice).is_err() {
            debug!("Notice dropped, no listener");
        }
    }
}

fn sanitize_name(name: &str, id: ParticipantId) -> String {
    let trimmed: String = name
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NAME_LEN)
        .collect();
    if trimmed.is_empty() {
        format!("Player{}", id)
    } else {
        trimmed
    }
}
