//! # Arena Client Library
//!
//! Client side of the city arena: connecting and completing the handshake,
//! receiving the map, and turning the server's full-state snapshots into
//! create/update/destroy operations for whatever draws the world.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Owns the TCP connection. A background task decodes snapshots and keeps only
//! the newest one; the presentation loop picks it up once per frame. Position
//! updates and collect requests are written straight to the socket.
//!
//! ### Map Transfer Module (`map_transfer`)
//! Receives the base64 map stream that precedes gameplay and stores the
//! decoded file in a scratch directory. Any problem with the asset falls back
//! to the map bundled with the client.
//!
//! ### Game Module (`game`)
//! Local mirror of remote players and collectibles, the pending-collect
//! tracker and the leaderboard text.
//!
//! ### Discovery Module (`discovery`)
//! Finds servers on the local /24 by probing the game port.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::game::ClientGameState;
//! use client::network::{ClientConfig, Connection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::default();
//!     let mut connection = Connection::connect(&config).await?;
//!     let mut game = ClientGameState::new(connection.player_id());
//!
//!     while let Some(snapshot) = connection.next_snapshot().await {
//!         let update = game.apply_snapshot(snapshot);
//!         println!("{} player changes", update.players.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod discovery;
pub mod game;
pub mod map_transfer;
pub mod network;
