//! Plain-text rendering of roster updates for the terminal

use shared::{Participant, ParticipantId, Team, TeamCounts};

fn label(participant: &Participant, me: Option<ParticipantId>) -> String {
    let mut label = participant.name.clone();
    if participant.admin {
        label.push_str(" [admin]");
    }
    if participant.afk {
        label.push_str(" [afk]");
    }
    if Some(participant.id) == me {
        label.push_str(" (you)");
    }
    label
}

fn team_line(team: Team, participants: &[Participant], me: Option<ParticipantId>) -> String {
    let members: Vec<String> = participants
        .iter()
        .filter(|p| p.team == team)
        .map(|p| label(p, me))
        .collect();

    if members.is_empty() {
        format!("{:<10} -", team.to_string())
    } else {
        format!("{:<10} {}", team.to_string(), members.join(", "))
    }
}

/// Renders the roster as one header line plus one line per team.
pub fn format_roster(
    participants: &[Participant],
    paused: bool,
    me: Option<ParticipantId>,
) -> String {
    let counts = TeamCounts::tally(participants);
    let mut lines = vec![format!(
        "== Roster {}{} ==",
        counts,
        if paused { " (paused)" } else { "" }
    )];
    for team in [Team::TeamA, Team::TeamB, Team::Spectator] {
        lines.push(team_line(team, participants, me));
    }
    lines.join("\n")
}

/// The team the given participant is on, if they are in the roster.
pub fn own_team(participants: &[Participant], me: Option<ParticipantId>) -> Option<Team> {
    let me = me?;
    participants.iter().find(|p| p.id == me).map(|p| p.team)
}
