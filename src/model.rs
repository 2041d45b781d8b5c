//! Core data model: rooms, connections, items, puzzles, maze groups, turns.
//!
//! Rooms and puzzles deliberately do not own collections of `Item` — they
//! hold ids only, and the owning `ItemRegistry` is asked for the live view.
//! This breaks the ownership cycle between rooms, items and puzzles.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalizes a display name into a stable id: lowercase, strip leading
/// articles, drop punctuation, collapse whitespace to underscores.
pub fn normalize_name(name: &str) -> String {
    let lower = name.to_lowercase();
    let no_punct: String = lower
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    let mut words: Vec<&str> = no_punct.split_whitespace().collect();
    if let Some(first) = words.first() {
        if matches!(*first, "a" | "an" | "the") && words.len() > 1 {
            words.remove(0);
        }
    }
    words.join("_")
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn from_name(name: &str) -> Self {
        Self(normalize_name(name))
    }
    pub fn maze(group: &str, seq: usize) -> Self {
        Self(format!("maze_{group}_{seq}"))
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn from_name(name: &str) -> Self {
        Self(normalize_name(name))
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PuzzleId(pub u64);

impl std::fmt::Display for PuzzleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MazeGroupId(pub String);

impl std::fmt::Display for MazeGroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameId(pub String);

impl GameId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for GameId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Open string-keyed "any" map, modelled as a tagged sum rather than a
/// dynamically-typed value for strict serde (de)serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

pub type Properties = BTreeMap<String, PropertyValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: RoomId,
    pub name: String,
    pub description: String,
    pub visited: bool,
    pub visit_count: u32,
    pub is_dark: bool,
    pub maze_group: Option<MazeGroupId>,
    pub maze_marker_item: Option<ItemId>,
    /// Exit directions mentioned in prose but not yet resolved to a concrete
    /// destination room. Promoted to a `Connection` only once traversed.
    pub pending_exits: Vec<String>,
    pub last_observed_turn: u64,
}

impl Room {
    pub fn new(room_id: RoomId, name: String, description: String, turn: u64) -> Self {
        Self {
            room_id,
            name,
            description,
            visited: true,
            visit_count: 1,
            is_dark: false,
            maze_group: None,
            maze_marker_item: None,
            pending_exits: Vec::new(),
            last_observed_turn: turn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub from_room: RoomId,
    pub to_room: RoomId,
    pub direction: String,
    pub bidirectional: bool,
    pub blocked: Option<String>,
    pub teleport: bool,
    pub random: bool,
    pub observed_destinations: Vec<RoomId>,
}

impl Connection {
    pub fn new(from_room: RoomId, to_room: RoomId, direction: String) -> Self {
        Self {
            from_room,
            to_room,
            direction,
            bidirectional: true,
            blocked: None,
            teleport: false,
            random: false,
            observed_destinations: Vec::new(),
        }
    }

    pub fn is_traversable(&self) -> bool {
        self.blocked.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Portability {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemLocation {
    Room(RoomId),
    Inventory,
    Unknown,
}

impl ItemLocation {
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            ItemLocation::Room(id) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub item_id: ItemId,
    pub name: String,
    pub description: String,
    pub location: ItemLocation,
    pub portable: Portability,
    pub properties: Properties,
    pub first_seen_turn: u64,
    pub last_seen_turn: u64,
}

impl Item {
    pub fn new(item_id: ItemId, name: String, description: String, location: ItemLocation, turn: u64) -> Self {
        Self {
            item_id,
            name,
            description,
            location,
            portable: Portability::Unknown,
            properties: Properties::new(),
            first_seen_turn: turn,
            last_seen_turn: turn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PuzzleStatus {
    Open,
    InProgress,
    Solved,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub action: String,
    pub result: String,
    pub turn: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Puzzle {
    pub puzzle_id: PuzzleId,
    pub description: String,
    pub status: PuzzleStatus,
    pub location: Option<RoomId>,
    pub related_items: Vec<ItemId>,
    pub attempts: Vec<Attempt>,
    pub created_turn: u64,
    pub solved_turn: Option<u64>,
}

impl Puzzle {
    pub fn is_open(&self) -> bool {
        matches!(self.status, PuzzleStatus::Open | PuzzleStatus::InProgress)
    }
}

impl MazeGroup {
    pub fn new(group_id: MazeGroupId, entry_room_id: Option<RoomId>, turn: u64) -> Self {
        Self {
            group_id,
            entry_room_id,
            room_ids: Vec::new(),
            exit_room_ids: Vec::new(),
            markers: BTreeMap::new(),
            fully_mapped: false,
            created_turn: turn,
            completed_turn: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MazeGroup {
    pub group_id: MazeGroupId,
    pub entry_room_id: Option<RoomId>,
    pub room_ids: Vec<RoomId>,
    pub exit_room_ids: Vec<RoomId>,
    pub markers: BTreeMap<RoomId, ItemId>,
    pub fully_mapped: bool,
    pub created_turn: u64,
    pub completed_turn: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub game_id: GameId,
    pub turn_number: u64,
    pub timestamp: u64,
    pub command_sent: String,
    pub game_output: String,
    pub current_room: RoomId,
    pub inventory_snapshot: Vec<ItemId>,
    pub agent_reasoning: String,
}

/// Seconds since the Unix epoch. Plain `SystemTime` rather than pulling in a
/// calendar-aware time crate the orchestrator core does not otherwise need.
pub fn now_epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
