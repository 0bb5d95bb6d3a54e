use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

pub mod codec;
pub mod error;

pub use codec::{encode, write_message, MessageReader, MAX_MESSAGE_SIZE};
pub use error::ProtocolError;

pub const DEFAULT_PORT: u16 = 9999;
pub const DEFAULT_POOL_SIZE: usize = 30;
pub const DEFAULT_ARENA_HALF_EXTENT: f32 = 40.0;
pub const COLLECTIBLE_HEIGHT: f32 = 0.5;
pub const COLLECT_RADIUS: f32 = 1.5;

pub const MAP_CHUNK_SIZE: usize = 8192;
pub const MAP_READY_TOKEN: &[u8; 2] = b"OK";

pub const MAX_NAME_LEN: usize = 24;

pub const COLOR_POOL: [&str; 8] = [
    "red", "orange", "yellow", "green", "cyan", "blue", "violet", "pink",
];

pub type PlayerId = u64;
pub type CollectibleId = u64;

/// Server -> client messages that carry a `type` discriminator.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    MapInfo {
        filename: Option<String>,
        size: u64,
    },
    MapComplete,
    #[serde(rename = "players")]
    Snapshot(WorldSnapshot),
}

/// Client -> server steady-state messages.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Position {
        #[serde(deserialize_with = "finite::deserialize")]
        x: f32,
        #[serde(deserialize_with = "finite::deserialize")]
        y: f32,
        #[serde(deserialize_with = "finite::deserialize")]
        z: f32,
    },
    Collect { collectible_id: CollectibleId },
}

/// First message of every connection: the assigned player id.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Welcome {
    pub id: PlayerId,
}

/// The single message a client sends once the map transfer is over.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ClientInit {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerState {
    pub id: PlayerId,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub name: String,
    pub color: String,
    pub score: u32,
}

impl PlayerState {
    pub fn new(id: PlayerId, name: String, color: String) -> Self {
        Self {
            id,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            name,
            color,
            score: 0,
        }
    }

    pub fn position(&self) -> (f32, f32, f32) {
        (self.x, self.y, self.z)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Collectible {
    pub id: CollectibleId,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Collectible {
    pub fn position(&self) -> (f32, f32, f32) {
        (self.x, self.y, self.z)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub id: PlayerId,
    pub name: String,
    pub score: u32,
}

/// Complete world state at one instant. Every field is taken under the same lock.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct WorldSnapshot {
    #[serde(deserialize_with = "player_map::deserialize")]
    pub players: BTreeMap<PlayerId, PlayerState>,
    pub collectibles: Vec<Collectible>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

impl WorldSnapshot {
    pub fn contains_collectible(&self, id: CollectibleId) -> bool {
        self.collectibles.iter().any(|c| c.id == id)
    }

    pub fn score_of(&self, id: PlayerId) -> Option<u32> {
        self.players.get(&id).map(|p| p.score)
    }
}

// JSON object keys are strings, and tagged enums buffer their content before the
// key type is known, so the numeric keys have to be parsed by hand.
mod player_map {
    use super::{PlayerId, PlayerState};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use std::collections::BTreeMap;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<PlayerId, PlayerState>, D::Error>
    where
        D: Deserializer<'de>,
    {
        BTreeMap::<String, PlayerState>::deserialize(deserializer)?
            .into_iter()
            .map(|(key, player)| {
                key.parse::<PlayerId>()
                    .map(|id| (id, player))
                    .map_err(|_| D::Error::custom(format!("invalid player id key {:?}", key)))
            })
            .collect()
    }
}

// Numbers beyond the f32 range parse as infinity, which JSON can only write
// back as null.
mod finite {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<f32, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f32::deserialize(deserializer)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(D::Error::custom(format!("coordinate out of range: {}", value)))
        }
    }
}

/// Orders players by score descending, ties broken by ascending id.
pub fn rank_players<'a>(players: impl IntoIterator<Item = &'a PlayerState>) -> Vec<LeaderboardEntry> {
    let mut entries: Vec<LeaderboardEntry> = players
        .into_iter()
        .map(|p| LeaderboardEntry {
            id: p.id,
            name: p.name.clone(),
            score: p.score,
        })
        .collect();
    entries.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));
    entries
}

pub fn is_valid_color(color: &str) -> bool {
    COLOR_POOL.iter().any(|c| c.eq_ignore_ascii_case(color))
}

/// Accepts a requested color if it is in the pool, otherwise picks one by id.
pub fn resolve_color(requested: Option<&str>, id: PlayerId) -> &'static str {
    requested
        .map(str::trim)
        .filter(|wanted| is_valid_color(wanted))
        .and_then(|wanted| COLOR_POOL.iter().copied().find(|c| c.eq_ignore_ascii_case(wanted)))
        .unwrap_or(COLOR_POOL[(id % COLOR_POOL.len() as u64) as usize])
}

pub fn sanitize_name(requested: Option<&str>, id: PlayerId) -> String {
    let trimmed = requested.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        format!("Player{}", id)
    } else {
        trimmed.chars().take(MAX_NAME_LEN).collect()
    }
}

// Connecting a UDP socket sends nothing; it only makes the OS pick a route.
pub fn local_ip() -> IpAddr {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn player(id: PlayerId, score: u32) -> PlayerState {
        let mut p = PlayerState::new(id, format!("p{}", id), "red".to_string());
        p.score = score;
        p
    }

    #[test]
    fn test_player_creation() {
        let player = PlayerState::new(3, "ana".to_string(), "cyan".to_string());
        assert_eq!(player.id, 3);
        assert_eq!(player.position(), (0.0, 0.0, 0.0));
        assert_eq!(player.score, 0);
    }

    #[test]
    fn test_snapshot_serializes_with_players_tag() {
        let mut snapshot = WorldSnapshot::default();
        snapshot.players.insert(7, player(7, 2));
        snapshot.collectibles.push(Collectible {
            id: 4,
            x: 1.0,
            y: 0.5,
            z: -2.0,
        });
        snapshot.leaderboard = rank_players(snapshot.players.values());

        let value = serde_json::to_value(ServerMessage::Snapshot(snapshot)).unwrap();
        assert_eq!(value["type"], "players");
        assert_eq!(value["players"]["7"]["name"], "p7");
        assert_eq!(value["collectibles"][0]["id"], 4);
        assert_eq!(value["leaderboard"][0]["score"], 2);
    }

    #[test]
    fn test_snapshot_survives_round_trip_through_tagged_enum() {
        let mut snapshot = WorldSnapshot::default();
        snapshot.players.insert(12, player(12, 1));
        let json = serde_json::to_string(&ServerMessage::Snapshot(snapshot.clone())).unwrap();
        let decoded: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, ServerMessage::Snapshot(snapshot));

        let bad = r#"{"type":"players","players":{"abc":{}},"collectibles":[],"leaderboard":[]}"#;
        assert!(serde_json::from_str::<ServerMessage>(bad).is_err());
    }

    #[test]
    fn test_client_messages_use_type_field() {
        let collect: ClientMessage =
            serde_json::from_str(r#"{"type": "collect", "collectible_id": 5}"#).unwrap();
        assert_eq!(collect, ClientMessage::Collect { collectible_id: 5 });

        let position: ClientMessage =
            serde_json::from_str(r#"{"type":"position","x":1.5,"y":2,"z":-3.25}"#).unwrap();
        match position {
            ClientMessage::Position { x, y, z } => {
                assert_approx_eq!(x, 1.5);
                assert_approx_eq!(y, 2.0);
                assert_approx_eq!(z, -3.25);
            }
            _ => panic!("Wrong message type after deserialization"),
        }
    }

    #[test]
    fn test_out_of_range_position_is_rejected() {
        let result: Result<ClientMessage, _> =
            serde_json::from_str(r#"{"type":"position","x":1e39,"y":0,"z":0}"#);
        assert!(result.is_err());

        let result: Result<ClientMessage, _> =
            serde_json::from_str(r#"{"type":"position","x":0,"y":0,"z":-1e300}"#);
        assert!(result.is_err());

        let edge = format!(r#"{{"type":"position","x":{},"y":0,"z":0}}"#, f32::MAX);
        assert!(serde_json::from_str::<ClientMessage>(&edge).is_ok());
    }

    #[test]
    fn test_map_messages() {
        let info = serde_json::to_value(ServerMessage::MapInfo {
            filename: None,
            size: 0,
        })
        .unwrap();
        assert_eq!(info["type"], "map_info");
        assert!(info["filename"].is_null());

        let complete: ServerMessage = serde_json::from_str(r#"{"type":"map_complete"}"#).unwrap();
        assert_eq!(complete, ServerMessage::MapComplete);
    }

    #[test]
    fn test_init_fields_are_optional() {
        let init: ClientInit = serde_json::from_str(r#"{"name":"Jo"}"#).unwrap();
        assert_eq!(init.name.as_deref(), Some("Jo"));
        assert!(init.color.is_none());
    }

    #[test]
    fn test_rank_players_breaks_ties_by_id() {
        let players = [player(5, 1), player(2, 3), player(9, 3), player(1, 1)];
        let ids: Vec<PlayerId> = rank_players(players.iter()).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 9, 1, 5]);
    }

    #[test]
    fn test_resolve_color() {
        assert_eq!(resolve_color(Some("Blue"), 0), "blue");
        assert_eq!(resolve_color(Some("magenta"), 3), "green");
        assert_eq!(resolve_color(None, 9), "orange");
        assert!(is_valid_color("PINK"));
        assert!(!is_valid_color("black"));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name(None, 4), "Player4");
        assert_eq!(sanitize_name(Some("   "), 1), "Player1");
        assert_eq!(sanitize_name(Some(" Eva "), 1), "Eva");
        assert_eq!(sanitize_name(Some("x".repeat(40).as_str()), 1).len(), MAX_NAME_LEN);
    }
}
