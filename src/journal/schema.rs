//! Pure schema definitions, one per table.
//!
//! Schema facts are returned as `&'static str` rather than built at call
//! time. DDL strings are assembled at compile time with
//! `const_format::concatcp!`. The journal is row-at-a-time upserts, not bulk
//! loads, so the trait only carries what SQLite upserts need: table name,
//! `CREATE TABLE`, and indices.

pub trait Schema {
    /// Table name.
    fn name() -> &'static str;
    /// `CREATE TABLE IF NOT EXISTS` statement, including the natural-key
    /// `UNIQUE` constraint each table upserts against.
    fn creates() -> &'static str;
    /// `CREATE INDEX IF NOT EXISTS` statements supporting the read paths.
    fn indices() -> &'static str;
}

pub struct Games;
impl Schema for Games {
    fn name() -> &'static str {
        "games"
    }
    fn creates() -> &'static str {
        const_format::concatcp!(
            "CREATE TABLE IF NOT EXISTS ",
            "games",
            " (",
            "game_id TEXT PRIMARY KEY, ",
            "story_file TEXT NOT NULL, ",
            "status TEXT NOT NULL, ",
            "created_at INTEGER NOT NULL",
            ")"
        )
    }
    fn indices() -> &'static str {
        "CREATE INDEX IF NOT EXISTS idx_games_status ON games(status)"
    }
}

pub struct Turns;
impl Schema for Turns {
    fn name() -> &'static str {
        "turns"
    }
    fn creates() -> &'static str {
        const_format::concatcp!(
            "CREATE TABLE IF NOT EXISTS ",
            "turns",
            " (",
            "game_id TEXT NOT NULL, ",
            "turn_number INTEGER NOT NULL, ",
            "timestamp INTEGER NOT NULL, ",
            "command_sent TEXT NOT NULL, ",
            "game_output TEXT NOT NULL, ",
            "current_room TEXT NOT NULL, ",
            "inventory_snapshot TEXT NOT NULL, ",
            "agent_reasoning TEXT NOT NULL, ",
            "UNIQUE(game_id, turn_number)",
            ")"
        )
    }
    fn indices() -> &'static str {
        "CREATE INDEX IF NOT EXISTS idx_turns_game ON turns(game_id, turn_number)"
    }
}

pub struct Rooms;
impl Schema for Rooms {
    fn name() -> &'static str {
        "rooms"
    }
    fn creates() -> &'static str {
        const_format::concatcp!(
            "CREATE TABLE IF NOT EXISTS ",
            "rooms",
            " (",
            "game_id TEXT NOT NULL, ",
            "room_id TEXT NOT NULL, ",
            "name TEXT NOT NULL, ",
            "description TEXT NOT NULL, ",
            "visited INTEGER NOT NULL, ",
            "visit_count INTEGER NOT NULL, ",
            "is_dark INTEGER NOT NULL, ",
            "maze_group TEXT, ",
            "maze_marker_item TEXT, ",
            "pending_exits TEXT NOT NULL, ",
            "last_observed_turn INTEGER NOT NULL, ",
            "UNIQUE(game_id, room_id)",
            ")"
        )
    }
    fn indices() -> &'static str {
        "CREATE INDEX IF NOT EXISTS idx_rooms_game ON rooms(game_id)"
    }
}

pub struct Connections;
impl Schema for Connections {
    fn name() -> &'static str {
        "connections"
    }
    fn creates() -> &'static str {
        const_format::concatcp!(
            "CREATE TABLE IF NOT EXISTS ",
            "connections",
            " (",
            "game_id TEXT NOT NULL, ",
            "from_room TEXT NOT NULL, ",
            "to_room TEXT NOT NULL, ",
            "direction TEXT NOT NULL, ",
            "bidirectional INTEGER NOT NULL, ",
            "blocked TEXT, ",
            "teleport INTEGER NOT NULL, ",
            "random INTEGER NOT NULL, ",
            "observed_destinations TEXT NOT NULL, ",
            "UNIQUE(game_id, from_room, direction)",
            ")"
        )
    }
    fn indices() -> &'static str {
        "CREATE INDEX IF NOT EXISTS idx_connections_game ON connections(game_id, from_room)"
    }
}

pub struct Items;
impl Schema for Items {
    fn name() -> &'static str {
        "items"
    }
    fn creates() -> &'static str {
        const_format::concatcp!(
            "CREATE TABLE IF NOT EXISTS ",
            "items",
            " (",
            "game_id TEXT NOT NULL, ",
            "item_id TEXT NOT NULL, ",
            "name TEXT NOT NULL, ",
            "description TEXT NOT NULL, ",
            "location TEXT NOT NULL, ",
            "portable TEXT NOT NULL, ",
            "properties TEXT NOT NULL, ",
            "first_seen_turn INTEGER NOT NULL, ",
            "last_seen_turn INTEGER NOT NULL, ",
            "UNIQUE(game_id, item_id)",
            ")"
        )
    }
    fn indices() -> &'static str {
        "CREATE INDEX IF NOT EXISTS idx_items_game ON items(game_id)"
    }
}

pub struct Puzzles;
impl Schema for Puzzles {
    fn name() -> &'static str {
        "puzzles"
    }
    fn creates() -> &'static str {
        const_format::concatcp!(
            "CREATE TABLE IF NOT EXISTS ",
            "puzzles",
            " (",
            "game_id TEXT NOT NULL, ",
            "puzzle_id INTEGER NOT NULL, ",
            "description TEXT NOT NULL, ",
            "status TEXT NOT NULL, ",
            "location TEXT, ",
            "related_items TEXT NOT NULL, ",
            "attempts TEXT NOT NULL, ",
            "created_turn INTEGER NOT NULL, ",
            "solved_turn INTEGER, ",
            "UNIQUE(game_id, puzzle_id)",
            ")"
        )
    }
    fn indices() -> &'static str {
        "CREATE INDEX IF NOT EXISTS idx_puzzles_status ON puzzles(game_id, status)"
    }
}

pub struct MazeGroups;
impl Schema for MazeGroups {
    fn name() -> &'static str {
        "maze_groups"
    }
    fn creates() -> &'static str {
        const_format::concatcp!(
            "CREATE TABLE IF NOT EXISTS ",
            "maze_groups",
            " (",
            "game_id TEXT NOT NULL, ",
            "group_id TEXT NOT NULL, ",
            "entry_room_id TEXT, ",
            "room_ids TEXT NOT NULL, ",
            "exit_room_ids TEXT NOT NULL, ",
            "markers TEXT NOT NULL, ",
            "fully_mapped INTEGER NOT NULL, ",
            "created_turn INTEGER NOT NULL, ",
            "completed_turn INTEGER, ",
            "UNIQUE(game_id, group_id)",
            ")"
        )
    }
    fn indices() -> &'static str {
        "CREATE INDEX IF NOT EXISTS idx_maze_groups_game ON maze_groups(game_id)"
    }
}

pub struct Metrics;
impl Schema for Metrics {
    fn name() -> &'static str {
        "metrics"
    }
    fn creates() -> &'static str {
        const_format::concatcp!(
            "CREATE TABLE IF NOT EXISTS ",
            "metrics",
            " (",
            "game_id TEXT NOT NULL, ",
            "turn_number INTEGER NOT NULL, ",
            "name TEXT NOT NULL, ",
            "value REAL NOT NULL, ",
            "UNIQUE(game_id, turn_number, name)",
            ")"
        )
    }
    fn indices() -> &'static str {
        "CREATE INDEX IF NOT EXISTS idx_metrics_game ON metrics(game_id)"
    }
}

/// Runs every table's `creates`/`indices` plus the WAL pragma, as a fixed
/// list of `execute_batch` calls.
pub fn migrate(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.execute_batch(Games::creates())?;
    conn.execute_batch(Games::indices())?;
    conn.execute_batch(Turns::creates())?;
    conn.execute_batch(Turns::indices())?;
    conn.execute_batch(Rooms::creates())?;
    conn.execute_batch(Rooms::indices())?;
    conn.execute_batch(Connections::creates())?;
    conn.execute_batch(Connections::indices())?;
    conn.execute_batch(Items::creates())?;
    conn.execute_batch(Items::indices())?;
    conn.execute_batch(Puzzles::creates())?;
    conn.execute_batch(Puzzles::indices())?;
    conn.execute_batch(MazeGroups::creates())?;
    conn.execute_batch(MazeGroups::indices())?;
    conn.execute_batch(Metrics::creates())?;
    conn.execute_batch(Metrics::indices())?;
    Ok(())
}
