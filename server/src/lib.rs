//! # Arena Server Library
//!
//! Authoritative server for the shared city arena. It owns the canonical
//! world (players, collectibles, scores) and pushes a full snapshot of it to
//! every active client after each accepted change.
//!
//! ## Concurrency Model
//!
//! One tokio task per TCP connection, plus one writer task per active
//! session. All tasks meet at a single mutex around [`broadcast::ServerState`],
//! which holds both the world and the session registry. A mutation and the
//! broadcast that follows it run inside one critical section, so every client
//! sees the same totally ordered sequence of snapshots.
//!
//! Delivery never blocks the lock: each session has a one-slot mailbox that
//! the broadcast overwrites and the writer task drains. A slow client skips
//! straight to the newest snapshot.
//!
//! ## Module Organization
//!
//! - `game`: world state, collectible pool and scoring rules
//! - `session_manager`: id allocation and per-session mailboxes
//! - `broadcast`: the locked server state and snapshot fan-out
//! - `map_transfer`: one-shot chunked base64 map stream
//! - `session`: per-connection state machine
//! - `network`: listener, configuration and shared state
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ServerConfig::default();
//!     let server = Server::new(&config).await.map_err(|e| e.to_string())?;
//!     server.run().await
//! }
//! ```

pub mod broadcast;
pub mod game;
pub mod map_transfer;
pub mod network;
pub mod session;
pub mod session_manager;
