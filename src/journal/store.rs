//! The durable, append-only journal.
//!
//! A single process-wide handle, opened once and shared by every writer as
//! `Arc<Mutex<rusqlite::Connection>>`: the journal backs one local agent
//! process, not a multi-client server, so a plain mutexed connection in
//! write-ahead journaling mode is enough. Every blocking rusqlite call is
//! wrapped in `tokio::task::spawn_blocking` so the async turn loop never
//! stalls on it.

use crate::error::{AutofrotzError, Result};
use crate::model::{
    Attempt, Connection, GameId, Item, ItemId, ItemLocation, MazeGroup, MazeGroupId, Portability, Properties,
    Puzzle, PuzzleId, PuzzleStatus, Room, RoomId, TurnRecord,
};
use rusqlite::{params, OptionalExtension};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct Journal {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl Journal {
    /// Opens (creating if absent) the SQLite file at `path` and runs the
    /// fixed migration set: connect once, run every table's DDL, hand back
    /// a shared handle.
    pub async fn open(path: std::path::PathBuf) -> Result<Self> {
        log::info!("opening journal at {}", path.display());
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(path).map_err(|e| AutofrotzError::JournalWrite(e.into()))?;
            super::schema::migrate(&conn).map_err(|e| AutofrotzError::JournalWrite(e.into()))?;
            Ok(Self { conn: Arc::new(Mutex::new(conn)) })
        })
        .await
        .map_err(|e| AutofrotzError::JournalWrite(e.into()))?
    }

    pub async fn create_game(&self, story_file: &str) -> Result<GameId> {
        let game_id = GameId::new();
        let story_file = story_file.to_string();
        let created_at = crate::model::now_epoch_secs();
        let gid = game_id.0.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO games (game_id, story_file, status, created_at) VALUES (?1, ?2, 'in_progress', ?3)",
                params![gid, story_file, created_at as i64],
            )?;
            Ok(())
        })
        .await?;
        Ok(game_id)
    }

    pub async fn set_game_status(&self, game_id: &GameId, status: &str) -> Result<()> {
        let gid = game_id.0.clone();
        let status = status.to_string();
        self.run(move |conn| {
            conn.execute("UPDATE games SET status = ?1 WHERE game_id = ?2", params![status, gid])?;
            Ok(())
        })
        .await
    }

    pub async fn save_turn(&self, record: TurnRecord) -> Result<()> {
        let gid = record.game_id.0.clone();
        let inventory = serde_json::to_string(&record.inventory_snapshot).unwrap_or_default();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO turns (game_id, turn_number, timestamp, command_sent, game_output, current_room, inventory_snapshot, agent_reasoning)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(game_id, turn_number) DO UPDATE SET
                   timestamp = excluded.timestamp,
                   command_sent = excluded.command_sent,
                   game_output = excluded.game_output,
                   current_room = excluded.current_room,
                   inventory_snapshot = excluded.inventory_snapshot,
                   agent_reasoning = excluded.agent_reasoning",
                params![
                    gid,
                    record.turn_number as i64,
                    record.timestamp as i64,
                    record.command_sent,
                    record.game_output,
                    record.current_room.0,
                    inventory,
                    record.agent_reasoning,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn save_room(&self, game_id: &GameId, room: Room) -> Result<()> {
        let gid = game_id.0.clone();
        let pending_exits = serde_json::to_string(&room.pending_exits).unwrap_or_default();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO rooms (game_id, room_id, name, description, visited, visit_count, is_dark, maze_group, maze_marker_item, pending_exits, last_observed_turn)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(game_id, room_id) DO UPDATE SET
                   name = excluded.name,
                   description = excluded.description,
                   visited = excluded.visited,
                   visit_count = excluded.visit_count,
                   is_dark = excluded.is_dark,
                   maze_group = excluded.maze_group,
                   maze_marker_item = excluded.maze_marker_item,
                   pending_exits = excluded.pending_exits,
                   last_observed_turn = excluded.last_observed_turn",
                params![
                    gid,
                    room.room_id.0,
                    room.name,
                    room.description,
                    room.visited as i64,
                    room.visit_count as i64,
                    room.is_dark as i64,
                    room.maze_group.map(|g| g.0),
                    room.maze_marker_item.map(|i| i.0),
                    pending_exits,
                    room.last_observed_turn as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn save_connection(&self, game_id: &GameId, connection: Connection) -> Result<()> {
        let gid = game_id.0.clone();
        let observed: Vec<String> = connection.observed_destinations.iter().map(|r| r.0.clone()).collect();
        let observed = serde_json::to_string(&observed).unwrap_or_default();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO connections (game_id, from_room, to_room, direction, bidirectional, blocked, teleport, random, observed_destinations)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(game_id, from_room, direction) DO UPDATE SET
                   to_room = excluded.to_room,
                   bidirectional = excluded.bidirectional,
                   blocked = excluded.blocked,
                   teleport = excluded.teleport,
                   random = excluded.random,
                   observed_destinations = excluded.observed_destinations",
                params![
                    gid,
                    connection.from_room.0,
                    connection.to_room.0,
                    connection.direction,
                    connection.bidirectional as i64,
                    connection.blocked,
                    connection.teleport as i64,
                    connection.random as i64,
                    observed,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn save_item(&self, game_id: &GameId, item: Item) -> Result<()> {
        let gid = game_id.0.clone();
        let location = serde_json::to_string(&item.location).unwrap_or_default();
        let portable = serde_json::to_string(&item.portable).unwrap_or_default();
        let properties = serde_json::to_string(&item.properties).unwrap_or_default();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO items (game_id, item_id, name, description, location, portable, properties, first_seen_turn, last_seen_turn)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(game_id, item_id) DO UPDATE SET
                   name = excluded.name,
                   description = excluded.description,
                   location = excluded.location,
                   portable = excluded.portable,
                   properties = excluded.properties,
                   last_seen_turn = excluded.last_seen_turn",
                params![
                    gid,
                    item.item_id.0,
                    item.name,
                    item.description,
                    location,
                    portable,
                    properties,
                    item.first_seen_turn as i64,
                    item.last_seen_turn as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn save_puzzle(&self, game_id: &GameId, puzzle: Puzzle) -> Result<()> {
        let gid = game_id.0.clone();
        let status = serde_json::to_string(&puzzle.status).unwrap_or_default();
        let related: Vec<String> = puzzle.related_items.iter().map(|i| i.0.clone()).collect();
        let related = serde_json::to_string(&related).unwrap_or_default();
        let attempts = serde_json::to_string(&puzzle.attempts).unwrap_or_default();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO puzzles (game_id, puzzle_id, description, status, location, related_items, attempts, created_turn, solved_turn)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(game_id, puzzle_id) DO UPDATE SET
                   description = excluded.description,
                   status = excluded.status,
                   location = excluded.location,
                   related_items = excluded.related_items,
                   attempts = excluded.attempts,
                   solved_turn = excluded.solved_turn",
                params![
                    gid,
                    puzzle.puzzle_id.0 as i64,
                    puzzle.description,
                    status,
                    puzzle.location.map(|r| r.0),
                    related,
                    attempts,
                    puzzle.created_turn as i64,
                    puzzle.solved_turn.map(|t| t as i64),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn save_maze_group(&self, game_id: &GameId, group: MazeGroup) -> Result<()> {
        let gid = game_id.0.clone();
        let room_ids: Vec<String> = group.room_ids.iter().map(|r| r.0.clone()).collect();
        let room_ids = serde_json::to_string(&room_ids).unwrap_or_default();
        let exit_ids: Vec<String> = group.exit_room_ids.iter().map(|r| r.0.clone()).collect();
        let exit_ids = serde_json::to_string(&exit_ids).unwrap_or_default();
        let markers: std::collections::BTreeMap<String, String> =
            group.markers.iter().map(|(r, i)| (r.0.clone(), i.0.clone())).collect();
        let markers = serde_json::to_string(&markers).unwrap_or_default();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO maze_groups (game_id, group_id, entry_room_id, room_ids, exit_room_ids, markers, fully_mapped, created_turn, completed_turn)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(game_id, group_id) DO UPDATE SET
                   entry_room_id = excluded.entry_room_id,
                   room_ids = excluded.room_ids,
                   exit_room_ids = excluded.exit_room_ids,
                   markers = excluded.markers,
                   fully_mapped = excluded.fully_mapped,
                   completed_turn = excluded.completed_turn",
                params![
                    gid,
                    group.group_id.0,
                    group.entry_room_id.map(|r| r.0),
                    room_ids,
                    exit_ids,
                    markers,
                    group.fully_mapped as i64,
                    group.created_turn as i64,
                    group.completed_turn.map(|t| t as i64),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn save_metric(&self, game_id: &GameId, turn_number: u64, name: &str, value: f64) -> Result<()> {
        let gid = game_id.0.clone();
        let name = name.to_string();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO metrics (game_id, turn_number, name, value) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(game_id, turn_number, name) DO UPDATE SET value = excluded.value",
                params![gid, turn_number as i64, name, value],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_latest_turn(&self, game_id: &GameId) -> Result<Option<u64>> {
        let gid = game_id.0.clone();
        self.run(move |conn| {
            conn.query_row(
                "SELECT MAX(turn_number) FROM turns WHERE game_id = ?1",
                params![gid],
                |row| row.get::<_, Option<i64>>(0),
            )
            .map(|v| v.map(|n| n as u64))
        })
        .await
    }

    /// Returns the most recently created game whose status is still
    /// `in_progress`, for crash-resume at startup.
    pub async fn get_active_game(&self) -> Result<Option<(GameId, String)>> {
        self.run(move |conn| {
            conn.query_row(
                "SELECT game_id, story_file FROM games WHERE status = 'in_progress' ORDER BY created_at DESC LIMIT 1",
                [],
                |row| Ok((GameId(row.get(0)?), row.get::<_, String>(1)?)),
            )
            .optional()
        })
        .await
    }

    pub async fn get_turns(&self, game_id: &GameId) -> Result<Vec<TurnRecord>> {
        let gid = game_id.0.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT game_id, turn_number, timestamp, command_sent, game_output, current_room, inventory_snapshot, agent_reasoning
                 FROM turns WHERE game_id = ?1 ORDER BY turn_number ASC",
            )?;
            let rows = stmt.query_map(params![gid], |row| {
                let inventory_raw: String = row.get(6)?;
                let inventory_snapshot: Vec<ItemId> = serde_json::from_str(&inventory_raw).unwrap_or_default();
                Ok(TurnRecord {
                    game_id: GameId(row.get(0)?),
                    turn_number: row.get::<_, i64>(1)? as u64,
                    timestamp: row.get::<_, i64>(2)? as u64,
                    command_sent: row.get(3)?,
                    game_output: row.get(4)?,
                    current_room: RoomId(row.get(5)?),
                    inventory_snapshot,
                    agent_reasoning: row.get(7)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    pub async fn get_puzzles(&self, game_id: &GameId, status: Option<PuzzleStatus>) -> Result<Vec<Puzzle>> {
        let gid = game_id.0.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT puzzle_id, description, status, location, related_items, attempts, created_turn, solved_turn
                 FROM puzzles WHERE game_id = ?1",
            )?;
            let rows = stmt.query_map(params![gid], |row| {
                let status_raw: String = row.get(2)?;
                let status: PuzzleStatus = serde_json::from_str(&status_raw).unwrap_or(PuzzleStatus::Open);
                let related_raw: String = row.get(4)?;
                let related_items: Vec<String> = serde_json::from_str(&related_raw).unwrap_or_default();
                let attempts_raw: String = row.get(5)?;
                let attempts: Vec<Attempt> = serde_json::from_str(&attempts_raw).unwrap_or_default();
                Ok(Puzzle {
                    puzzle_id: PuzzleId(row.get::<_, i64>(0)? as u64),
                    description: row.get(1)?,
                    status,
                    location: row.get::<_, Option<String>>(3)?.map(RoomId),
                    related_items: related_items.into_iter().map(ItemId).collect(),
                    attempts,
                    created_turn: row.get::<_, i64>(6)? as u64,
                    solved_turn: row.get::<_, Option<i64>>(7)?.map(|t| t as u64),
                })
            })?;
            let all: rusqlite::Result<Vec<Puzzle>> = rows.collect();
            let all = all?;
            Ok(match status {
                None => all,
                Some(wanted) => all.into_iter().filter(|p| p.status == wanted).collect(),
            })
        })
        .await
    }

    pub async fn get_metrics(&self, game_id: &GameId) -> Result<Vec<(u64, String, f64)>> {
        let gid = game_id.0.clone();
        self.run(move |conn| {
            let mut stmt =
                conn.prepare("SELECT turn_number, name, value FROM metrics WHERE game_id = ?1 ORDER BY turn_number")?;
            let rows = stmt.query_map(params![gid], |row| {
                Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?, row.get::<_, f64>(2)?))
            })?;
            rows.collect()
        })
        .await
    }

    /// Loads every room and its most recent `(maze_group, maze_marker_item)`
    /// for crash resume; the orchestrator always resumes in normal mode and
    /// lets the triggers re-fire if the maze isn't actually resolved.
    pub async fn load_rooms(&self, game_id: &GameId) -> Result<Vec<Room>> {
        let gid = game_id.0.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT room_id, name, description, visited, visit_count, is_dark, maze_group, maze_marker_item, pending_exits, last_observed_turn
                 FROM rooms WHERE game_id = ?1",
            )?;
            let rows = stmt.query_map(params![gid], |row| {
                let pending_raw: String = row.get(8)?;
                let pending_exits: Vec<String> = serde_json::from_str(&pending_raw).unwrap_or_default();
                Ok(Room {
                    room_id: RoomId(row.get(0)?),
                    name: row.get(1)?,
                    description: row.get(2)?,
                    visited: row.get::<_, i64>(3)? != 0,
                    visit_count: row.get::<_, i64>(4)? as u32,
                    is_dark: row.get::<_, i64>(5)? != 0,
                    maze_group: row.get::<_, Option<String>>(6)?.map(MazeGroupId),
                    maze_marker_item: row.get::<_, Option<String>>(7)?.map(ItemId),
                    pending_exits,
                    last_observed_turn: row.get::<_, i64>(9)? as u64,
                })
            })?;
            rows.collect()
        })
        .await
    }

    pub async fn load_connections(&self, game_id: &GameId) -> Result<Vec<Connection>> {
        let gid = game_id.0.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT from_room, to_room, direction, bidirectional, blocked, teleport, random, observed_destinations
                 FROM connections WHERE game_id = ?1",
            )?;
            let rows = stmt.query_map(params![gid], |row| {
                let observed_raw: String = row.get(7)?;
                let observed: Vec<String> = serde_json::from_str(&observed_raw).unwrap_or_default();
                Ok(Connection {
                    from_room: RoomId(row.get(0)?),
                    to_room: RoomId(row.get(1)?),
                    direction: row.get(2)?,
                    bidirectional: row.get::<_, i64>(3)? != 0,
                    blocked: row.get(4)?,
                    teleport: row.get::<_, i64>(5)? != 0,
                    random: row.get::<_, i64>(6)? != 0,
                    observed_destinations: observed.into_iter().map(RoomId).collect(),
                })
            })?;
            rows.collect()
        })
        .await
    }

    pub async fn load_items(&self, game_id: &GameId) -> Result<Vec<Item>> {
        let gid = game_id.0.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT item_id, name, description, location, portable, properties, first_seen_turn, last_seen_turn
                 FROM items WHERE game_id = ?1",
            )?;
            let rows = stmt.query_map(params![gid], |row| {
                let location_raw: String = row.get(3)?;
                let location: ItemLocation = serde_json::from_str(&location_raw).unwrap_or(ItemLocation::Unknown);
                let portable_raw: String = row.get(4)?;
                let portable: Portability = serde_json::from_str(&portable_raw).unwrap_or(Portability::Unknown);
                let properties_raw: String = row.get(5)?;
                let properties: Properties = serde_json::from_str(&properties_raw).unwrap_or_default();
                Ok(Item {
                    item_id: ItemId(row.get(0)?),
                    name: row.get(1)?,
                    description: row.get(2)?,
                    location,
                    portable,
                    properties,
                    first_seen_turn: row.get::<_, i64>(6)? as u64,
                    last_seen_turn: row.get::<_, i64>(7)? as u64,
                })
            })?;
            rows.collect()
        })
        .await
    }

    /// Runs `f` against the shared connection on a blocking thread.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap();
            f(&guard).map_err(|e| AutofrotzError::JournalWrite(e.into()))
        })
        .await
        .map_err(|e| AutofrotzError::JournalWrite(e.into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Item, Room};

    async fn test_journal(dir: &tempfile::TempDir) -> Journal {
        Journal::open(dir.path().join("journal.db")).await.unwrap()
    }

    #[tokio::test]
    async fn create_game_and_fetch_active() {
        let dir = tempfile::tempdir().unwrap();
        let journal = test_journal(&dir).await;
        let game_id = journal.create_game("zork1.z5").await.unwrap();
        let active = journal.get_active_game().await.unwrap();
        assert_eq!(active, Some((game_id, "zork1.z5".to_string())));
    }

    #[tokio::test]
    async fn save_turn_is_idempotent_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let journal = test_journal(&dir).await;
        let game_id = journal.create_game("zork1.z5").await.unwrap();
        let record = TurnRecord {
            game_id: game_id.clone(),
            turn_number: 1,
            timestamp: 0,
            command_sent: "look".into(),
            game_output: "West of House".into(),
            current_room: RoomId::from_name("West of House"),
            inventory_snapshot: vec![],
            agent_reasoning: "starting".into(),
        };
        journal.save_turn(record.clone()).await.unwrap();
        let mut updated = record.clone();
        updated.game_output = "West of House (updated)".into();
        journal.save_turn(updated).await.unwrap();

        let turns = journal.get_turns(&game_id).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].game_output, "West of House (updated)");
    }

    #[tokio::test]
    async fn save_room_round_trips_through_reload() {
        let dir = tempfile::tempdir().unwrap();
        let journal = test_journal(&dir).await;
        let game_id = journal.create_game("zork1.z5").await.unwrap();
        let room = Room::new(RoomId::from_name("Kitchen"), "Kitchen".into(), "A kitchen.".into(), 1);
        journal.save_room(&game_id, room.clone()).await.unwrap();
        let loaded = journal.load_rooms(&game_id).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].room_id, room.room_id);
    }

    #[tokio::test]
    async fn save_item_round_trips_location_and_portability() {
        let dir = tempfile::tempdir().unwrap();
        let journal = test_journal(&dir).await;
        let game_id = journal.create_game("zork1.z5").await.unwrap();
        let mut item = Item::new(ItemId::from_name("leaflet"), "leaflet".into(), "A leaflet.".into(), ItemLocation::Inventory, 2);
        item.portable = Portability::True;
        journal.save_item(&game_id, item.clone()).await.unwrap();
        let loaded = journal.load_items(&game_id).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].location, ItemLocation::Inventory);
        assert_eq!(loaded[0].portable, Portability::True);
    }
}
