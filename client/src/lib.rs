//! # Room Client Library
//!
//! A terminal client for the room server. It joins a room, forwards typed
//! lines as chat and prints whatever the server sends back.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Owns the UDP socket and the session loop:
//! - Join handshake and protocol version
//! - Heartbeats so the server keeps the connection alive
//! - Chat forwarding from stdin, including draft picks and `!` commands
//!
//! ### View Module (`view`)
//! Turns roster updates into plain text, one line per team.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new("127.0.0.1:8080", "alice").await?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod view;
