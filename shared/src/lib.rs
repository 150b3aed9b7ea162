use serde::{Deserialize, Serialize};
use std::fmt;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_TEAM_SIZE: usize = 6;
pub const MAX_NAME_LEN: usize = 24;
pub const MAX_CHAT_LEN: usize = 140;

pub type ParticipantId = u32;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Team {
    #[default]
    Spectator,
    TeamA,
    TeamB,
}

impl Team {
    /// The other playing team. Spectator has no opponent and maps to itself.
    pub fn opponent(self) -> Team {
        match self {
            Team::TeamA => Team::TeamB,
            Team::TeamB => Team::TeamA,
            Team::Spectator => Team::Spectator,
        }
    }

    pub fn is_playing(self) -> bool {
        self != Team::Spectator
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Team::Spectator => "Spectators",
            Team::TeamA => "Red",
            Team::TeamB => "Blue",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub team: Team,
    pub afk: bool,
    pub admin: bool,
}

impl Participant {
    pub fn new(id: ParticipantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            team: Team::Spectator,
            afk: false,
            admin: false,
        }
    }

    /// A participant that may be drafted: on the spectator bench and not AFK.
    pub fn is_available_spectator(&self) -> bool {
        self.team == Team::Spectator && !self.afk
    }
}

/// Player counts of the two playing teams.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct TeamCounts {
    pub team_a: usize,
    pub team_b: usize,
}

impl TeamCounts {
    pub fn new(team_a: usize, team_b: usize) -> Self {
        Self { team_a, team_b }
    }

    pub fn tally<'a>(participants: impl IntoIterator<Item = &'a Participant>) -> Self {
        let mut counts = Self::default();
        for participant in participants {
            match participant.team {
                Team::TeamA => counts.team_a += 1,
                Team::TeamB => counts.team_b += 1,
                Team::Spectator => {}
            }
        }
        counts
    }

    pub fn of(&self, team: Team) -> usize {
        match team {
            Team::TeamA => self.team_a,
            Team::TeamB => self.team_b,
            Team::Spectator => 0,
        }
    }

    pub fn total(&self) -> usize {
        self.team_a + self.team_b
    }

    pub fn difference(&self) -> usize {
        self.team_a.abs_diff(self.team_b)
    }

    pub fn is_tied(&self) -> bool {
        self.team_a == self.team_b
    }

    /// The team with strictly fewer players, if any.
    pub fn smaller(&self) -> Option<Team> {
        if self.team_a < self.team_b {
            Some(Team::TeamA)
        } else if self.team_b < self.team_a {
            Some(Team::TeamB)
        } else {
            None
        }
    }

    /// The team with strictly more players, if any.
    pub fn larger(&self) -> Option<Team> {
        self.smaller().map(Team::opponent)
    }

    pub fn is_full(&self, team: Team, max_team_size: usize) -> bool {
        team.is_playing() && self.of(team) >= max_team_size
    }
}

impl fmt::Display for TeamCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.team_a, self.team_b)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Join {
        name: String,
        client_version: u32,
    },
    Chat {
        text: String,
    },
    Heartbeat,
    Leave,

    Welcome {
        participant_id: ParticipantId,
    },
    Notice {
        text: String,
    },
    Roster {
        paused: bool,
        participants: Vec<Participant>,
    },
    Rejected {
        reason: String,
    },
}
