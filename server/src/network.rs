//! Server network layer handling UDP communications and the room loop

use crate::client_manager::{ClientManager, HEARTBEAT_TIMEOUT};
use crate::config::RosterConfig;
use crate::context::{RebalanceOutcome, RosterContext};
use crate::room::{Notice, Room, RoomHost, RotationSignal};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, ParticipantId, Team, MAX_CHAT_LEN, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ClientTimeout {
        participant_id: ParticipantId,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from the room loop to the sender task
#[derive(Debug)]
pub enum OutboundMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<ParticipantId>,
    },
}

/// A `!`-prefixed chat command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Afk,
    Draft,
    EndDraft,
    Balance,
    Unknown(String),
}

impl ChatCommand {
    /// Returns `None` for ordinary chat.
    pub fn parse(text: &str) -> Option<Self> {
        let body = text.trim().strip_prefix('!')?;
        let name = body.split_whitespace().next().unwrap_or("").to_lowercase();
        Some(match name.as_str() {
            "afk" => ChatCommand::Afk,
            "draft" => ChatCommand::Draft,
            "enddraft" => ChatCommand::EndDraft,
            "balance" => ChatCommand::Balance,
            _ => ChatCommand::Unknown(name),
        })
    }

    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            ChatCommand::Draft | ChatCommand::EndDraft | ChatCommand::Balance
        )
    }
}

/// Main server coordinating networking and the room
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    room: Arc<Room>,
    roster: RosterContext,
    tick_duration: Duration,
    last_roster_version: Option<u64>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    out_tx: mpsc::UnboundedSender<OutboundMessage>,
    out_rx: mpsc::UnboundedReceiver<OutboundMessage>,
    notice_rx: mpsc::UnboundedReceiver<Notice>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_clients: usize,
        config: RosterConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let room = Arc::new(Room::new(notice_tx));
        let host: Arc<dyn RoomHost> = room.clone();
        let roster = RosterContext::new(host, RotationSignal::new(), config);

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            room,
            roster,
            tick_duration,
            last_roster_version: None,
            server_tx,
            server_rx,
            out_tx,
            out_rx,
            notice_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn roster(&self) -> &RosterContext {
        &self.roster
    }

    /// Spawns the task that reads datagrams and forwards decoded packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 4096];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns the task that delivers outbound packets and room notices
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut out_rx = std::mem::replace(&mut self.out_rx, mpsc::unbounded_channel().1);
        let mut notice_rx = std::mem::replace(&mut self.notice_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    Some(message) = out_rx.recv() => message,
                    Some(notice) = notice_rx.recv() => {
                        let packet = Packet::Notice { text: notice.text };
                        match notice.target {
                            None => OutboundMessage::BroadcastPacket { packet, exclude: None },
                            Some(id) => {
                                let addr = clients.read().await.find_addr(id);
                                match addr {
                                    Some(addr) => OutboundMessage::SendPacket { packet, addr },
                                    None => {
                                        debug!("Notice for departed participant {} dropped", id);
                                        continue;
                                    }
                                }
                            }
                        }
                    },
                    else => break,
                };

                match message {
                    OutboundMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    OutboundMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (participant_id, addr) in client_addrs {
                            if Some(participant_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", participant_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns the task that drops clients whose heartbeats stopped
    async fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts(HEARTBEAT_TIMEOUT)
                };

                for participant_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { participant_id }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.out_tx.send(OutboundMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<ParticipantId>) {
        if let Err(e) = self
            .out_tx
            .send(OutboundMessage::BroadcastPacket { packet, exclude })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    async fn participant_at(&self, addr: SocketAddr) -> Option<ParticipantId> {
        self.clients.read().await.find_client_by_addr(addr)
    }

    /// Processes a packet received from a client
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Join {
                name,
                client_version,
            } => self.handle_join(name, client_version, addr).await,

            Packet::Chat { text } => {
                if let Some(id) = self.participant_at(addr).await {
                    self.clients.write().await.touch(id);
                    self.handle_chat(id, &text).await;
                }
            }

            Packet::Heartbeat => {
                if let Some(id) = self.participant_at(addr).await {
                    self.clients.write().await.touch(id);
                }
            }

            Packet::Leave => {
                if let Some(id) = self.participant_at(addr).await {
                    self.handle_departure(id, "left the room").await;
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    async fn handle_join(&mut self, name: String, client_version: u32, addr: SocketAddr) {
        info!("Client joining from {} (version: {})", addr, client_version);

        if client_version != PROTOCOL_VERSION {
            let reason = format!(
                "Protocol version {} not supported, server speaks {}",
                client_version, PROTOCOL_VERSION
            );
            self.send_packet(Packet::Rejected { reason }, addr);
            return;
        }

        // A second join from the same address replaces the old participant
        if let Some(existing_id) = self.participant_at(addr).await {
            info!("Replacing participant {} from {}", existing_id, addr);
            self.handle_departure(existing_id, "reconnected").await;
        }

        if !self.clients.read().await.has_capacity() {
            self.send_packet(
                Packet::Rejected {
                    reason: "Server full".to_string(),
                },
                addr,
            );
            return;
        }

        let participant = self.room.join(&name);
        self.clients.write().await.add_client(participant.id, addr);
        self.send_packet(
            Packet::Welcome {
                participant_id: participant.id,
            },
            addr,
        );
        self.room
            .notify(Notice::broadcast(format!("{} joined the room", participant.name)));
        if participant.admin {
            self.room.notify(Notice::to(
                participant.id,
                "You are the room admin (!draft, !enddraft, !balance)",
            ));
        }

        self.roster.selection().on_roster_changed();
        self.rebalance("join").await;
    }

    async fn handle_departure(&mut self, id: ParticipantId, reason: &str) {
        self.clients.write().await.remove_client(&id);
        let Some(participant) = self.room.leave(id) else {
            return;
        };

        self.room
            .notify(Notice::broadcast(format!("{} {}", participant.name, reason)));
        if let Some(admin) = self.room.participants().into_iter().find(|p| p.admin) {
            if participant.admin {
                self.room
                    .notify(Notice::to(admin.id, "You are now the room admin"));
            }
        }

        self.roster.handle_departure(id).await;
    }

    async fn handle_chat(&mut self, id: ParticipantId, text: &str) {
        let text: String = text.chars().take(MAX_CHAT_LEN).collect();
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        if self.roster.selection().submit_pick(id, text).await {
            return;
        }

        if let Some(command) = ChatCommand::parse(text) {
            self.handle_command(id, command).await;
            return;
        }

        if let Some(participant) = self.room.participant(id) {
            self.room
                .notify(Notice::broadcast(format!("{}: {}", participant.name, text)));
        }
    }

    async fn handle_command(&mut self, id: ParticipantId, command: ChatCommand) {
        let Some(participant) = self.room.participant(id) else {
            return;
        };
        if command.requires_admin() && !participant.admin {
            self.room
                .notify(Notice::to(id, "Only the room admin can do that"));
            return;
        }

        match command {
            ChatCommand::Afk => {
                let afk = !participant.afk;
                self.room.set_afk(id, afk);
                if afk {
                    if let Err(e) = self
                        .roster
                        .gateway()
                        .set_team_conditional(id, Team::Spectator, "afk")
                        .await
                    {
                        warn!("Could not bench AFK participant {}: {}", id, e);
                    }
                }
                self.room.notify(Notice::broadcast(format!(
                    "{} is {}",
                    participant.name,
                    if afk { "AFK" } else { "back" }
                )));
                self.roster.selection().on_roster_changed();
                self.rebalance("afk").await;
            }
            ChatCommand::Draft => {
                let selection = self.roster.selection();
                if selection.is_selection_active() {
                    self.room.notify(Notice::to(id, "A draft is already running"));
                } else if !selection.start_selection() {
                    self.room
                        .notify(Notice::to(id, "The teams do not need a draft right now"));
                }
            }
            ChatCommand::EndDraft => {
                if !self.roster.selection().force_end_selection().await {
                    self.room.notify(Notice::to(id, "No draft is running"));
                }
            }
            ChatCommand::Balance => match self.roster.rebalance("admin").await {
                Ok(RebalanceOutcome::Unchanged) => {
                    self.room.notify(Notice::to(id, "The teams are already balanced"));
                }
                Ok(RebalanceOutcome::StoodDown) => {
                    self.room
                        .notify(Notice::to(id, "Balancing is paused right now"));
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Admin rebalance failed: {}", e);
                    self.room
                        .notify(Notice::to(id, "Could not rebalance, please try again"));
                }
            },
            ChatCommand::Unknown(name) => {
                self.room
                    .notify(Notice::to(id, format!("Unknown command !{}", name)));
            }
        }
    }

    async fn rebalance(&self, trigger: &str) {
        if let Err(e) = self.roster.rebalance(trigger).await {
            error!("Rebalance on {} failed: {}", trigger, e);
        }
    }

    /// Sends the roster to everyone if anything changed since the last send
    fn broadcast_roster(&mut self) {
        let version = self.room.version();
        if self.last_roster_version == Some(version) {
            return;
        }
        self.last_roster_version = Some(version);

        let packet = Packet::Roster {
            paused: self.room.is_paused(),
            participants: self.room.participants(),
        };
        self.broadcast_packet(packet, None);
    }

    async fn tick(&mut self) {
        match self.roster.sweep_afk().await {
            Ok(0) => {}
            Ok(moved) => debug!("AFK sweep benched {} participant(s)", moved),
            Err(e) => error!("AFK sweep failed: {}", e),
        }
        self.rebalance("tick").await;
        self.broadcast_roster();
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        let mut tick_interval = interval(self.tick_duration);

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { participant_id }) => {
                            self.handle_departure(participant_id, "timed out").await;
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    self.tick().await;
                },
            }
        }

        self.roster.selection().end_selection("server shutting down");
        Ok(())
    }
}
