//! Connection tracking for the room server
//!
//! This module maps UDP addresses onto room participants:
//! - Connection lifecycle (join, leave, heartbeat timeout)
//! - Capacity enforcement
//! - Address lookup for routing incoming packets and outgoing notices
//!
//! The client manager only knows about connections. Which team a participant
//! sits on lives in the room and is never touched from here.

use log::info;
use shared::ParticipantId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Silence after which a connection is treated as gone.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected client and the participant it speaks for
#[derive(Debug)]
pub struct Client {
    /// Participant id assigned by the room on join
    pub participant_id: ParticipantId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
}

impl Client {
    pub fn new(participant_id: ParticipantId, addr: SocketAddr) -> Self {
        Self {
            participant_id,
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Records activity from this client
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if no packets have been received within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected clients
///
/// Enforces the server capacity limit and lets the network layer resolve a
/// packet's source address to the participant that sent it.
pub struct ClientManager {
    /// Connected clients indexed by participant id
    clients: HashMap<ParticipantId, Client>,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            max_clients,
        }
    }

    /// Returns true if another client may join
    pub fn has_capacity(&self) -> bool {
        self.clients.len() < self.max_clients
    }

    /// Registers the connection for a participant that just joined the room
    ///
    /// Returns false if the server is at capacity or the address is already
    /// connected.
    pub fn add_client(&mut self, participant_id: ParticipantId, addr: SocketAddr) -> bool {
        if !self.has_capacity() || self.find_client_by_addr(addr).is_some() {
            return false;
        }

        info!("Client {} connected from {}", participant_id, addr);
        self.clients
            .insert(participant_id, Client::new(participant_id, addr));
        true
    }

    /// Removes a client. Returns false if they were already gone.
    pub fn remove_client(&mut self, participant_id: &ParticipantId) -> bool {
        if let Some(client) = self.clients.remove(participant_id) {
            info!("Client {} disconnected", client.participant_id);
            true
        } else {
            false
        }
    }

    /// Finds the participant connected from the given address
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<ParticipantId> {
        self.clients
            .values()
            .find(|client| client.addr == addr)
            .map(|client| client.participant_id)
    }

    pub fn find_addr(&self, participant_id: ParticipantId) -> Option<SocketAddr> {
        self.clients.get(&participant_id).map(|client| client.addr)
    }

    /// Updates the activity timestamp. Returns false for unknown participants.
    pub fn touch(&mut self, participant_id: ParticipantId) -> bool {
        match self.clients.get_mut(&participant_id) {
            Some(client) => {
                client.touch();
                true
            }
            None => false,
        }
    }

    /// Removes clients silent for longer than `timeout`
    ///
    /// Returns the removed participant ids so the room can process them as
    /// departures.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<ParticipantId> {
        let mut timed_out: Vec<ParticipantId> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(timeout))
            .map(|client| client.participant_id)
            .collect();
        timed_out.sort_unstable();

        for participant_id in &timed_out {
            self.remove_client(participant_id);
        }

        timed_out
    }

    /// All participant ids with their addresses, for broadcasting
    pub fn get_client_addrs(&self) -> Vec<(ParticipantId, SocketAddr)> {
        self.clients
            .values()
            .map(|client| (client.participant_id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
