//! Client-side view of the world.
//!
//! The server sends complete snapshots, never deltas. This module turns each
//! snapshot into create/update/destroy operations for the presentation layer
//! and decides which collect requests are worth sending.

use shared::{
    Collectible, CollectibleId, PlayerId, PlayerState, WorldSnapshot, COLLECT_RADIUS,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub const LEADERBOARD_LIMIT: usize = 10;
pub const EMPTY_LEADERBOARD: &str = "Waiting for players...";

/// An entity that the presentation layer draws, keyed by id
pub trait Entity: Clone + PartialEq {
    fn id(&self) -> u64;
}

impl Entity for PlayerState {
    fn id(&self) -> u64 {
        self.id
    }
}

impl Entity for Collectible {
    fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityOp<T> {
    Create(T),
    Update(T),
    Destroy(u64),
}

/// Local mirror of one kind of server entity.
#[derive(Debug, Clone)]
pub struct EntitySet<T> {
    entities: BTreeMap<u64, T>,
}

pub type RemotePlayers = EntitySet<PlayerState>;
pub type RemoteCollectibles = EntitySet<Collectible>;

impl<T: Entity> EntitySet<T> {
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
        }
    }

    /// Brings the local set in line with `incoming` and reports what changed.
    /// Applying the same input twice yields no operations the second time.
    pub fn reconcile<'a, I>(&mut self, incoming: I) -> Vec<EntityOp<T>>
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        let mut ops = Vec::new();
        let mut seen = BTreeSet::new();

        for entity in incoming {
            let id = entity.id();
            seen.insert(id);
            match self.entities.get_mut(&id) {
                None => {
                    self.entities.insert(id, entity.clone());
                    ops.push(EntityOp::Create(entity.clone()));
                }
                Some(existing) if existing != entity => {
                    *existing = entity.clone();
                    ops.push(EntityOp::Update(entity.clone()));
                }
                Some(_) => {}
            }
        }

        let gone: Vec<u64> = self
            .entities
            .keys()
            .filter(|id| !seen.contains(id))
            .copied()
            .collect();
        for id in gone {
            self.entities.remove(&id);
            ops.push(EntityOp::Destroy(id));
        }

        ops
    }

    pub fn get(&self, id: u64) -> Option<&T> {
        self.entities.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl<T: Entity> Default for EntitySet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Collect requests that are in flight.
///
/// An id stays pending until a snapshot no longer lists it, so standing next
/// to a pickup sends one request, not one per frame.
#[derive(Debug, Default, Clone)]
pub struct CollectTracker {
    pending: BTreeSet<CollectibleId>,
}

impl CollectTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `id` as requested. False if a request is already in flight.
    pub fn try_request(&mut self, id: CollectibleId) -> bool {
        self.pending.insert(id)
    }

    pub fn confirm(&mut self, snapshot: &WorldSnapshot) {
        self.pending.retain(|id| snapshot.contains_collectible(*id));
    }

    pub fn is_pending(&self, id: CollectibleId) -> bool {
        self.pending.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn distance(a: (f32, f32, f32), b: (f32, f32, f32)) -> f32 {
    let (dx, dy, dz) = (a.0 - b.0, a.1 - b.1, a.2 - b.2);
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Ids of the collectibles strictly closer than `radius` to `position`.
pub fn collectibles_in_reach<'a>(
    position: (f32, f32, f32),
    collectibles: impl IntoIterator<Item = &'a Collectible>,
    radius: f32,
) -> Vec<CollectibleId> {
    collectibles
        .into_iter()
        .filter(|c| distance(position, c.position()) < radius)
        .map(|c| c.id)
        .collect()
}

/// Moves `from` toward `to` by at most `max_step`, never overshooting.
pub fn step_towards(from: (f32, f32, f32), to: (f32, f32, f32), max_step: f32) -> (f32, f32, f32) {
    let d = distance(from, to);
    if d <= max_step || d == 0.0 {
        return to;
    }
    let t = max_step / d;
    (
        from.0 + (to.0 - from.0) * t,
        from.1 + (to.1 - from.1) * t,
        from.2 + (to.2 - from.2) * t,
    )
}

/// Leaderboard text, one line per player, best first.
pub fn leaderboard_lines(snapshot: &WorldSnapshot, local_id: Option<PlayerId>, limit: usize) -> Vec<String> {
    if snapshot.leaderboard.is_empty() {
        return vec![EMPTY_LEADERBOARD.to_string()];
    }
    snapshot
        .leaderboard
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, entry)| {
            let you = if Some(entry.id) == local_id { " (you)" } else { "" };
            format!("{}. {}{}: {}", i + 1, entry.name, you, entry.score)
        })
        .collect()
}

/// Operations produced by one snapshot
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameUpdate {
    pub players: Vec<EntityOp<PlayerState>>,
    pub collectibles: Vec<EntityOp<Collectible>>,
}

impl FrameUpdate {
    pub fn is_empty(&self) -> bool {
        self.players.is_empty() && self.collectibles.is_empty()
    }
}

/// Everything the presentation loop needs between snapshots.
pub struct ClientGameState {
    local_id: PlayerId,
    position: (f32, f32, f32),
    players: RemotePlayers,
    collectibles: RemoteCollectibles,
    tracker: CollectTracker,
    snapshot: Option<Arc<WorldSnapshot>>,
}

impl ClientGameState {
    pub fn new(local_id: PlayerId) -> Self {
        Self {
            local_id,
            position: (0.0, 0.0, 0.0),
            players: RemotePlayers::new(),
            collectibles: RemoteCollectibles::new(),
            tracker: CollectTracker::new(),
            snapshot: None,
        }
    }

    pub fn local_id(&self) -> PlayerId {
        self.local_id
    }

    pub fn position(&self) -> (f32, f32, f32) {
        self.position
    }

    pub fn set_position(&mut self, position: (f32, f32, f32)) {
        self.position = position;
    }

    pub fn remote_players(&self) -> &RemotePlayers {
        &self.players
    }

    pub fn collectibles(&self) -> &RemoteCollectibles {
        &self.collectibles
    }

    pub fn snapshot(&self) -> Option<&WorldSnapshot> {
        self.snapshot.as_deref()
    }

    /// Reconciles remote players (all but the local one) and collectibles.
    pub fn apply_snapshot(&mut self, snapshot: Arc<WorldSnapshot>) -> FrameUpdate {
        let local_id = self.local_id;
        let update = FrameUpdate {
            players: self
                .players
                .reconcile(snapshot.players.values().filter(|p| p.id != local_id)),
            collectibles: self.collectibles.reconcile(snapshot.collectibles.iter()),
        };
        self.tracker.confirm(&snapshot);
        self.snapshot = Some(snapshot);
        update
    }

    /// Collectibles in reach that have no request in flight. Each returned id
    /// is marked pending, so the caller must send a request for it.
    pub fn collect_requests(&mut self) -> Vec<CollectibleId> {
        let in_reach = collectibles_in_reach(self.position, self.collectibles.iter(), COLLECT_RADIUS);
        in_reach
            .into_iter()
            .filter(|id| self.tracker.try_request(*id))
            .collect()
    }

    pub fn nearest_collectible(&self) -> Option<&Collectible> {
        self.collectibles
            .iter()
            .filter(|c| !self.tracker.is_pending(c.id))
            .min_by(|a, b| {
                distance(self.position, a.position()).total_cmp(&distance(self.position, b.position()))
            })
    }

    pub fn score(&self) -> Option<u32> {
        self.snapshot.as_ref().and_then(|s| s.score_of(self.local_id))
    }

    pub fn leaderboard(&self) -> Vec<String> {
        match &self.snapshot {
            Some(snapshot) => leaderboard_lines(snapshot, Some(self.local_id), LEADERBOARD_LIMIT),
            None => vec![EMPTY_LEADERBOARD.to_string()],
        }
    }
}
