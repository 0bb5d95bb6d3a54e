//! Registry of active sessions and their outbound mailboxes
//!
//! This module tracks the server side of every connection that completed its
//! handshake:
//! - Player id allocation (monotonic for the process lifetime, never reused)
//! - Registration of a session's mailbox when it becomes active
//! - Delivery of serialized frames to every registered mailbox
//! - Removal on disconnect or delivery failure
//!
//! A mailbox is a single-slot `watch` channel drained by the session's writer
//! task. Publishing replaces whatever frame is still waiting, so a slow peer
//! only ever skips to the newest snapshot and never holds up the others.

use log::info;
use shared::PlayerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// One encoded message, shared by every mailbox it is delivered to.
pub type Frame = Arc<[u8]>;

/// Creates an empty mailbox. The receiver starts with nothing to send.
pub fn mailbox() -> (watch::Sender<Frame>, watch::Receiver<Frame>) {
    watch::channel(Frame::from(Vec::new()))
}

/// A session that reached the active state
#[derive(Debug)]
pub struct Session {
    /// Player id assigned at accept time
    pub id: PlayerId,
    /// Peer address, for logging
    pub addr: SocketAddr,
    /// When the session became active
    pub joined_at: Instant,
    outbox: watch::Sender<Frame>,
}

impl Session {
    pub fn new(id: PlayerId, addr: SocketAddr, outbox: watch::Sender<Frame>) -> Self {
        Self {
            id,
            addr,
            joined_at: Instant::now(),
            outbox,
        }
    }

    /// Replaces the pending frame. Fails once the writer task has gone away.
    pub fn deliver(&self, frame: &Frame) -> bool {
        self.outbox.send(Frame::clone(frame)).is_ok()
    }
}

/// Manages all active sessions
///
/// Lives next to the world state behind the single world lock, so the set of
/// registered sessions always matches the set of player records.
#[derive(Debug)]
pub struct SessionManager {
    sessions: HashMap<PlayerId, Session>,
    next_id: PlayerId,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            next_id: 0,
        }
    }

    /// Hands out the next player id. Ids are not reused, even for connections
    /// that never finish their handshake.
    pub fn allocate_id(&mut self) -> PlayerId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn register(&mut self, id: PlayerId, addr: SocketAddr, outbox: watch::Sender<Frame>) {
        info!("Session {} from {} is active", id, addr);
        self.sessions.insert(id, Session::new(id, addr, outbox));
    }

    /// Removes a session. Dropping its mailbox sender stops the writer task.
    pub fn remove(&mut self, id: &PlayerId) -> bool {
        if let Some(session) = self.sessions.remove(id) {
            info!(
                "Session {} from {} closed after {:.1}s",
                session.id,
                session.addr,
                session.joined_at.elapsed().as_secs_f32()
            );
            true
        } else {
            false
        }
    }

    /// Delivers `frame` to every session and returns the ids whose mailbox is
    /// dead. Nothing is removed here; the caller does that after the loop.
    pub fn publish(&self, frame: &Frame) -> Vec<PlayerId> {
        self.sessions
            .values()
            .filter(|session| !session.deliver(frame))
            .map(|session| session.id)
            .collect()
    }

    pub fn ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
