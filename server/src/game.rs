//! Canonical world state: player records, the collectible pool and the
//! leaderboard view derived from them.
//!
//! `GameState` is plain data with no locking of its own. The server keeps it
//! behind the single world lock together with the session registry, which is
//! what makes every snapshot taken from it internally consistent.

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    rank_players, resolve_color, sanitize_name, Collectible, CollectibleId, LeaderboardEntry,
    PlayerId, PlayerState, WorldSnapshot, COLLECTIBLE_HEIGHT, DEFAULT_ARENA_HALF_EXTENT,
    DEFAULT_POOL_SIZE,
};
use std::collections::BTreeMap;

/// Area in which collectibles are spawned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnBounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_z: f32,
    pub max_z: f32,
    pub y: f32,
}

impl SpawnBounds {
    pub fn square(half_extent: f32) -> Self {
        let half_extent = half_extent.abs();
        Self {
            min_x: -half_extent,
            max_x: half_extent,
            min_z: -half_extent,
            max_z: half_extent,
            y: COLLECTIBLE_HEIGHT,
        }
    }
}

/// Parses a spawn half extent, rejecting values the spawner cannot sample from.
pub fn parse_half_extent(value: &str) -> Result<f32, String> {
    let half_extent: f32 = value
        .trim()
        .parse()
        .map_err(|e| format!("`{}` is not a number: {}", value, e))?;
    if half_extent.is_finite() {
        Ok(half_extent.abs())
    } else {
        Err(format!("`{}` is not a finite extent", value))
    }
}

impl Default for SpawnBounds {
    fn default() -> Self {
        Self::square(DEFAULT_ARENA_HALF_EXTENT)
    }
}

/// Result of a collect request.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectOutcome {
    /// The pickup was removed, the player credited and a replacement spawned.
    Collected { score: u32, replacement: Collectible },
    /// Someone got there first. Nothing changed.
    AlreadyGone,
    UnknownPlayer,
}

#[derive(Debug)]
pub struct GameState {
    players: BTreeMap<PlayerId, PlayerState>,
    collectibles: Vec<Collectible>,
    next_collectible_id: CollectibleId,
    pool_size: usize,
    bounds: SpawnBounds,
    rng: StdRng,
}

impl GameState {
    pub fn new(pool_size: usize, bounds: SpawnBounds) -> Self {
        Self::with_rng(pool_size, bounds, StdRng::from_entropy())
    }

    pub fn with_seed(pool_size: usize, bounds: SpawnBounds, seed: u64) -> Self {
        Self::with_rng(pool_size, bounds, StdRng::seed_from_u64(seed))
    }

    fn with_rng(pool_size: usize, bounds: SpawnBounds, rng: StdRng) -> Self {
        let mut state = Self {
            players: BTreeMap::new(),
            collectibles: Vec::with_capacity(pool_size),
            next_collectible_id: 0,
            pool_size,
            bounds,
            rng,
        };
        while state.collectibles.len() < pool_size {
            let collectible = state.spawn_collectible();
            state.collectibles.push(collectible);
        }
        info!("Spawned {} collectibles", state.collectibles.len());
        state
    }

    fn spawn_collectible(&mut self) -> Collectible {
        let id = self.next_collectible_id;
        self.next_collectible_id += 1;
        Collectible {
            id,
            x: self.rng.gen_range(self.bounds.min_x..=self.bounds.max_x),
            y: self.bounds.y,
            z: self.rng.gen_range(self.bounds.min_z..=self.bounds.max_z),
        }
    }

    /// Creates the player record for a session entering the active state.
    pub fn add_player(
        &mut self,
        id: PlayerId,
        name: Option<&str>,
        color: Option<&str>,
    ) -> &PlayerState {
        let player = PlayerState::new(
            id,
            sanitize_name(name, id),
            resolve_color(color, id).to_string(),
        );
        debug!("Adding player {} ({}, {})", id, player.name, player.color);
        self.players.entry(id).or_insert(player)
    }

    pub fn remove_player(&mut self, id: PlayerId) -> Option<PlayerState> {
        let removed = self.players.remove(&id);
        if removed.is_some() {
            info!("Removed player {}", id);
        }
        removed
    }

    pub fn has_player(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerState> {
        self.players.get(&id)
    }

    /// Overwrites a player's position. Client positions are trusted as-is.
    pub fn update_position(&mut self, id: PlayerId, x: f32, y: f32, z: f32) -> bool {
        match self.players.get_mut(&id) {
            Some(player) => {
                player.x = x;
                player.y = y;
                player.z = z;
                true
            }
            None => false,
        }
    }

    /// Removal, credit and replacement happen in one call so the pool size is
    /// never observed below `pool_size`.
    pub fn collect(&mut self, player_id: PlayerId, collectible_id: CollectibleId) -> CollectOutcome {
        if !self.players.contains_key(&player_id) {
            return CollectOutcome::UnknownPlayer;
        }
        let Some(index) = self
            .collectibles
            .iter()
            .position(|c| c.id == collectible_id)
        else {
            debug!(
                "Player {} asked for collectible {} which is already gone",
                player_id, collectible_id
            );
            return CollectOutcome::AlreadyGone;
        };

        self.collectibles.remove(index);
        let replacement = self.spawn_collectible();
        self.collectibles.push(replacement);

        let score = match self.players.get_mut(&player_id) {
            Some(player) => {
                player.score += 1;
                player.score
            }
            None => 0,
        };
        debug!(
            "Player {} collected {} (score {}), spawned {}",
            player_id, collectible_id, score, replacement.id
        );
        CollectOutcome::Collected { score, replacement }
    }

    pub fn collectibles(&self) -> &[Collectible] {
        &self.collectibles
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        rank_players(self.players.values())
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            players: self.players.clone(),
            collectibles: self.collectibles.clone(),
            leaderboard: self.leaderboard(),
        }
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE, SpawnBounds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::collections::HashSet;

    fn seeded() -> GameState {
        GameState::with_seed(DEFAULT_POOL_SIZE, SpawnBounds::default(), 7)
    }

    fn ids(state: &GameState) -> Vec<CollectibleId> {
        state.collectibles().iter().map(|c| c.id).collect()
    }

    #[test]
    fn test_parse_half_extent() {
        assert_approx_eq!(parse_half_extent("40").unwrap(), 40.0);
        assert_approx_eq!(parse_half_extent("-12.5").unwrap(), 12.5);
        assert_approx_eq!(parse_half_extent("0").unwrap(), 0.0);
        assert!(parse_half_extent("NaN").is_err());
        assert!(parse_half_extent("inf").is_err());
        assert!(parse_half_extent("1e39").is_err());
        assert!(parse_half_extent("wide").is_err());
    }

    #[test]
    fn test_pool_is_filled_on_creation() {
        let state = seeded();
        assert_eq!(state.collectibles().len(), 30);
        assert_eq!(ids(&state), (0..30).collect::<Vec<_>>());
        let bounds = SpawnBounds::default();
        for c in state.collectibles() {
            assert!((bounds.min_x..=bounds.max_x).contains(&c.x));
            assert!((bounds.min_z..=bounds.max_z).contains(&c.z));
            assert_approx_eq!(c.y, COLLECTIBLE_HEIGHT);
        }
    }

    #[test]
    fn test_add_player_starts_at_origin() {
        let mut state = seeded();
        let player = state.add_player(4, Some("Mia"), Some("blue"));
        assert_eq!(player.position(), (0.0, 0.0, 0.0));
        assert_eq!(player.color, "blue");
        assert_eq!(player.score, 0);
        assert_eq!(state.player_count(), 1);
    }

    #[test]
    fn test_invalid_color_falls_back_by_id() {
        let mut state = seeded();
        assert_eq!(state.add_player(10, None, Some("mauve")).color, "yellow");
        assert_eq!(state.add_player(11, Some("x"), None).color, "green");
    }

    #[test]
    fn test_collect_replaces_pickup() {
        let mut state = seeded();
        state.add_player(0, Some("A"), None);

        let outcome = state.collect(0, 5);
        match outcome {
            CollectOutcome::Collected { score, replacement } => {
                assert_eq!(score, 1);
                assert_eq!(replacement.id, 30);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let after: HashSet<CollectibleId> = ids(&state).into_iter().collect();
        assert_eq!(after.len(), 30);
        assert!(!after.contains(&5));
        assert!(after.contains(&30));
        assert_eq!(state.player(0).unwrap().score, 1);
    }

    #[test]
    fn test_stale_collect_is_a_noop() {
        let mut state = seeded();
        state.add_player(0, None, None);
        state.add_player(1, None, None);

        assert!(matches!(state.collect(0, 5), CollectOutcome::Collected { .. }));
        let before = ids(&state);
        assert_eq!(state.collect(1, 5), CollectOutcome::AlreadyGone);

        assert_eq!(ids(&state), before);
        assert_eq!(state.player(1).unwrap().score, 0);
        assert_eq!(state.player(0).unwrap().score, 1);
    }

    #[test]
    fn test_collect_for_unknown_player_changes_nothing() {
        let mut state = seeded();
        assert_eq!(state.collect(42, 0), CollectOutcome::UnknownPlayer);
        assert_eq!(ids(&state), (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn test_pool_size_is_invariant_across_many_collects() {
        let mut state = seeded();
        state.add_player(0, None, None);
        for target in 0..200 {
            state.collect(0, target);
            assert_eq!(state.collectibles().len(), state.pool_size());
        }
        let unique: HashSet<CollectibleId> = ids(&state).into_iter().collect();
        assert_eq!(unique.len(), 30);
    }

    #[test]
    fn test_update_position() {
        let mut state = seeded();
        state.add_player(2, None, None);
        assert!(state.update_position(2, 1.0, 2.5, -3.0));
        assert!(!state.update_position(3, 1.0, 1.0, 1.0));
        assert_eq!(state.player(2).unwrap().position(), (1.0, 2.5, -3.0));
    }

    #[test]
    fn test_leaderboard_order() {
        let mut state = seeded();
        for id in 0..4 {
            state.add_player(id, None, None);
        }
        state.collect(3, 0);
        state.collect(3, 1);
        state.collect(1, 2);
        state.collect(2, 3);

        let order: Vec<PlayerId> = state.leaderboard().iter().map(|e| e.id).collect();
        assert_eq!(order, vec![3, 1, 2, 0]);
    }

    #[test]
    fn test_snapshot_is_consistent() {
        let mut state = seeded();
        state.add_player(0, Some("A"), None);
        state.collect(0, 7);
        let snapshot = state.snapshot();

        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(snapshot.collectibles.len(), 30);
        assert!(!snapshot.contains_collectible(7));
        assert_eq!(snapshot.leaderboard[0].score, snapshot.score_of(0).unwrap());
    }

    #[test]
    fn test_remove_player() {
        let mut state = seeded();
        state.add_player(0, None, None);
        assert!(state.remove_player(0).is_some());
        assert!(state.remove_player(0).is_none());
        assert!(!state.has_player(0));
    }
}
