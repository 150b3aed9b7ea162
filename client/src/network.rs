use crate::view::{format_roster, own_team};
use bincode::{deserialize, serialize};
use log::{error, info, warn};
use shared::{Packet, ParticipantId, MAX_CHAT_LEN, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::time::interval;

/// Interval between heartbeats; well inside the server's 5 second timeout.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// What the client should do after handling a packet.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    name: String,
    participant_id: Option<ParticipantId>,
    connected: bool,
}

impl Client {
    pub async fn new(server_addr: &str, name: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            name: name.to_string(),
            participant_id: None,
            connected: false,
        })
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Joining as '{}'...", self.name);

        let packet = Packet::Join {
            name: self.name.clone(),
            client_version: PROTOCOL_VERSION,
        };
        self.send_packet(&packet).await
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Applies a packet from the server and returns the text to show, if any.
    pub fn handle_packet(&mut self, packet: Packet) -> (Option<String>, Flow) {
        match packet {
            Packet::Welcome { participant_id } => {
                info!("Joined! Participant ID: {}", participant_id);
                self.participant_id = Some(participant_id);
                self.connected = true;
                (
                    Some("Joined the room. Type to chat, !afk to sit out.".to_string()),
                    Flow::Continue,
                )
            }

            Packet::Notice { text } => (Some(text), Flow::Continue),

            Packet::Roster {
                paused,
                participants,
            } => {
                if let Some(team) = own_team(&participants, self.participant_id) {
                    info!("Currently on {}", team);
                }
                (
                    Some(format_roster(&participants, paused, self.participant_id)),
                    Flow::Continue,
                )
            }

            Packet::Rejected { reason } => {
                warn!("Rejected: {}", reason);
                self.connected = false;
                self.participant_id = None;
                (Some(format!("Rejected by server: {}", reason)), Flow::Stop)
            }

            _ => {
                warn!("Unexpected packet type");
                (None, Flow::Continue)
            }
        }
    }

    async fn send_chat(&self, line: &str) -> Result<(), Box<dyn std::error::Error>> {
        let text: String = line.trim().chars().take(MAX_CHAT_LEN).collect();
        if text.is_empty() || !self.connected {
            return Ok(());
        }
        self.send_packet(&Packet::Chat { text }).await
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let mut heartbeat_interval = interval(HEARTBEAT_INTERVAL);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut buffer = [0u8; 4096];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                                let (output, flow) = self.handle_packet(packet);
                                if let Some(output) = output {
                                    println!("{}", output);
                                }
                                if flow == Flow::Stop {
                                    break;
                                }
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                line = lines.next_line() => {
                    match line? {
                        Some(line) if line.trim() == "/quit" => break,
                        Some(line) => {
                            if let Err(e) = self.send_chat(&line).await {
                                error!("Error sending chat: {}", e);
                            }
                        }
                        None => break,
                    }
                },

                _ = heartbeat_interval.tick() => {
                    if self.connected {
                        if let Err(e) = self.send_packet(&Packet::Heartbeat).await {
                            error!("Error sending heartbeat: {}", e);
                        }
                    }
                },
            }
        }

        if self.connected {
            if let Err(e) = self.send_packet(&Packet::Leave).await {
                warn!("Failed to send leave: {}", e);
            }
        }

        Ok(())
    }
}
