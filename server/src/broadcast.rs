//! Everything that lives behind the world lock, and the broadcast that runs
//! after each mutation of it.
//!
//! Every mutation goes through [`ServerState`] while the caller holds the one
//! lock, and ends with [`ServerState::broadcast`] inside the same critical
//! section. Snapshots are therefore totally ordered and never show a
//! half-applied change. Delivery itself is a non-blocking mailbox swap, so the
//! lock is never held across socket I/O.

use crate::game::{CollectOutcome, GameState};
use crate::session_manager::{Frame, SessionManager};
use log::{debug, error, warn};
use shared::{encode, ClientInit, ClientMessage, PlayerId, PlayerState, ServerMessage};
use std::net::SocketAddr;
use tokio::sync::watch;

/// What one call to [`ServerState::broadcast`] did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Snapshots published, including corrective follow-ups.
    pub rounds: usize,
    /// Sessions that accepted the last snapshot.
    pub delivered: usize,
    /// Sessions removed because their writer had died.
    pub dropped: Vec<PlayerId>,
}

/// Effect of a steady-state message.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Moved,
    Collect(CollectOutcome),
    /// The session's player no longer exists; the session must end.
    SessionGone,
}

#[derive(Debug)]
pub struct ServerState {
    pub world: GameState,
    pub sessions: SessionManager,
}

impl ServerState {
    pub fn new(world: GameState) -> Self {
        Self {
            world,
            sessions: SessionManager::new(),
        }
    }

    /// Serializes the current world once and hands it to every session.
    ///
    /// Sessions whose mailbox is closed are removed after the delivery loop,
    /// together with their player, and a corrective snapshot follows until a
    /// round completes without failures.
    pub fn broadcast(&mut self) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        loop {
            let message = ServerMessage::Snapshot(self.world.snapshot());
            let frame = match encode(&message) {
                Ok(bytes) => Frame::from(bytes),
                Err(e) => {
                    error!("Failed to encode snapshot: {}", e);
                    return report;
                }
            };

            report.rounds += 1;
            let failed = self.sessions.publish(&frame);
            report.delivered = self.sessions.len() - failed.len();
            if failed.is_empty() {
                return report;
            }

            for id in failed {
                warn!("Delivery to session {} failed, removing it", id);
                self.sessions.remove(&id);
                self.world.remove_player(id);
                report.dropped.push(id);
            }
        }
    }

    /// Creates the player record, joins the broadcast set and announces the
    /// new player to everyone.
    pub fn activate(
        &mut self,
        id: PlayerId,
        addr: SocketAddr,
        init: &ClientInit,
        outbox: watch::Sender<Frame>,
    ) -> PlayerState {
        let player = self
            .world
            .add_player(id, init.name.as_deref(), init.color.as_deref())
            .clone();
        self.sessions.register(id, addr, outbox);
        self.broadcast();
        player
    }

    /// Applies one steady-state message and broadcasts, even when the message
    /// turned out to be a no-op.
    pub fn apply(&mut self, id: PlayerId, message: ClientMessage) -> Applied {
        if !self.world.has_player(id) {
            return Applied::SessionGone;
        }
        let applied = match message {
            ClientMessage::Position { x, y, z } => {
                self.world.update_position(id, x, y, z);
                Applied::Moved
            }
            ClientMessage::Collect { collectible_id } => {
                Applied::Collect(self.world.collect(id, collectible_id))
            }
        };
        self.broadcast();
        applied
    }

    /// Drops a session and its player. Broadcasts only if a player went away.
    pub fn disconnect(&mut self, id: PlayerId) -> bool {
        self.sessions.remove(&id);
        let removed = self.world.remove_player(id).is_some();
        if removed {
            debug!("Announcing departure of player {}", id);
            self.broadcast();
        }
        removed
    }

    /// True when every registered session has a player record and vice versa.
    pub fn is_consistent(&self) -> bool {
        self.sessions.len() == self.world.player_count()
            && self.sessions.ids().iter().all(|id| self.world.has_player(*id))
    }
}
