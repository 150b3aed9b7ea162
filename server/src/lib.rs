//! # Room Server Library
//!
//! This library provides the room server for team-based matches: who is in
//! the room, which team each participant plays on, and the draft that fills
//! uneven teams from the spectator bench.
//!
//! ## Core Responsibilities
//!
//! ### Roster Integrity
//! Many triggers touch the roster at once (joins, leaves, AFK sweeps, admin
//! commands, pick timeouts). Every team write that races another goes
//! through one roster lock so counts stay consistent and nobody ends up
//! assigned twice.
//!
//! ### Drafting
//! When the teams are uneven and spectators are waiting, the smaller team
//! picks them one at a time by typing their number in chat. A pick that
//! does not arrive in time is made automatically.
//!
//! ### Client Management
//! Tracks the UDP connection behind each participant, drops silent clients
//! and broadcasts roster changes and notices.
//!
//! ## Module Organization
//!
//! - [`lock`]: reentrant FIFO roster lock with forced release on timeout
//! - [`gateway`]: direct, locked, conditional and batch team writes
//! - [`balance`]: pure decisions over a roster snapshot
//! - [`selection`]: the draft state machine
//! - [`timer`]: the cancellable per-pick timer
//! - [`context`]: one room's wiring of all of the above
//! - [`room`]: the in-memory room and the [`room::RoomHost`] boundary
//! - [`client_manager`] and [`network`]: the UDP server
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::RosterConfig;
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         Duration::from_millis(100),
//!         32,
//!         RosterConfig::default(),
//!     )
//!     .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod balance;
pub mod client_manager;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod lock;
pub mod network;
pub mod room;
pub mod selection;
pub mod timer;
