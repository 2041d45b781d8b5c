//! The observer surface: a fan-out that calls every registered observer and
//! swallows whatever comes back rather than letting one observer's
//! misbehavior stall the turn loop. Every method here defaults to a no-op
//! so implementers only override what they care about, and every call site
//! wraps invocation so a panicking hook is logged and dropped rather than
//! propagated.

use crate::model::{Connection, Item, MazeGroup, Puzzle, Room, TurnRecord};

#[async_trait::async_trait]
pub trait Hook: Send + Sync {
    async fn on_game_start(&self, _game_id: &crate::model::GameId) {}
    async fn on_turn_start(&self, _turn: u32) {}
    async fn on_turn_end(&self, _record: &TurnRecord) {}
    async fn on_room_enter(&self, _room: &Room) {}
    async fn on_item_found(&self, _item: &Item) {}
    async fn on_item_taken(&self, _item: &Item) {}
    async fn on_puzzle_found(&self, _puzzle: &Puzzle) {}
    async fn on_puzzle_solved(&self, _puzzle: &Puzzle) {}
    async fn on_maze_detected(&self, _group: &MazeGroup) {}
    async fn on_maze_room_marked(&self, _room: &Room, _connection: &Connection) {}
    async fn on_maze_completed(&self, _group: &MazeGroup) {}
    async fn on_game_end(&self, _status: &str) {}
}

/// Runs one hook invocation, catching and logging a panic rather than
/// letting a misbehaving observer abort the turn loop. Hooks are infallible
/// by design (`notify`-shaped, not `Result`-returning), so a panic is the
/// only failure mode to guard.
async fn guarded<F>(method: &str, fut: F)
where
    F: std::future::Future<Output = ()>,
{
    let result = futures::FutureExt::catch_unwind(std::panic::AssertUnwindSafe(fut)).await;
    if result.is_err() {
        log::warn!("hook {method} panicked; swallowed");
    }
}

#[cfg(test)]
pub mod test_double {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingHook {
        pub events: Mutex<Vec<String>>,
    }

    impl RecordingHook {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait::async_trait]
    impl Hook for RecordingHook {
        async fn on_game_start(&self, game_id: &crate::model::GameId) {
            self.events.lock().unwrap().push(format!("game_start:{}", game_id.0));
        }
        async fn on_turn_start(&self, turn: u32) {
            self.events.lock().unwrap().push(format!("turn_start:{turn}"));
        }
        async fn on_turn_end(&self, record: &TurnRecord) {
            self.events.lock().unwrap().push(format!("turn_end:{}", record.turn_number));
        }
        async fn on_room_enter(&self, room: &Room) {
            self.events.lock().unwrap().push(format!("room_enter:{}", room.room_id.0));
        }
        async fn on_item_found(&self, item: &Item) {
            self.events.lock().unwrap().push(format!("item_found:{}", item.item_id.0));
        }
        async fn on_item_taken(&self, item: &Item) {
            self.events.lock().unwrap().push(format!("item_taken:{}", item.item_id.0));
        }
        async fn on_puzzle_found(&self, puzzle: &Puzzle) {
            self.events.lock().unwrap().push(format!("puzzle_found:{}", puzzle.puzzle_id));
        }
        async fn on_puzzle_solved(&self, puzzle: &Puzzle) {
            self.events.lock().unwrap().push(format!("puzzle_solved:{}", puzzle.puzzle_id));
        }
        async fn on_maze_detected(&self, group: &MazeGroup) {
            self.events.lock().unwrap().push(format!("maze_detected:{}", group.group_id.0));
        }
        async fn on_maze_room_marked(&self, room: &Room, _connection: &Connection) {
            self.events.lock().unwrap().push(format!("maze_room_marked:{}", room.room_id.0));
        }
        async fn on_maze_completed(&self, group: &MazeGroup) {
            self.events.lock().unwrap().push(format!("maze_completed:{}", group.group_id.0));
        }
        async fn on_game_end(&self, status: &str) {
            self.events.lock().unwrap().push(format!("game_end:{status}"));
        }
    }

    /// A hook whose every method panics, used to prove call sites survive a
    /// misbehaving observer.
    pub struct PanickingHook;

    #[async_trait::async_trait]
    impl Hook for PanickingHook {
        async fn on_turn_start(&self, _turn: u32) {
            panic!("boom");
        }
    }
}

/// Fans a single event out to every registered hook, in registration order,
/// guarding each call individually so one bad observer never stops the rest.
pub struct Hooks(pub Vec<std::sync::Arc<dyn Hook>>);

impl Hooks {
    pub async fn game_start(&self, game_id: &crate::model::GameId) {
        for h in &self.0 {
            guarded("on_game_start", h.on_game_start(game_id)).await;
        }
    }

    pub async fn turn_start(&self, turn: u32) {
        for h in &self.0 {
            guarded("on_turn_start", h.on_turn_start(turn)).await;
        }
    }

    pub async fn turn_end(&self, record: &TurnRecord) {
        for h in &self.0 {
            guarded("on_turn_end", h.on_turn_end(record)).await;
        }
    }

    pub async fn room_enter(&self, room: &Room) {
        for h in &self.0 {
            guarded("on_room_enter", h.on_room_enter(room)).await;
        }
    }

    pub async fn item_found(&self, item: &Item) {
        for h in &self.0 {
            guarded("on_item_found", h.on_item_found(item)).await;
        }
    }

    pub async fn item_taken(&self, item: &Item) {
        for h in &self.0 {
            guarded("on_item_taken", h.on_item_taken(item)).await;
        }
    }

    pub async fn puzzle_found(&self, puzzle: &Puzzle) {
        for h in &self.0 {
            guarded("on_puzzle_found", h.on_puzzle_found(puzzle)).await;
        }
    }

    pub async fn puzzle_solved(&self, puzzle: &Puzzle) {
        for h in &self.0 {
            guarded("on_puzzle_solved", h.on_puzzle_solved(puzzle)).await;
        }
    }

    pub async fn maze_detected(&self, group: &MazeGroup) {
        for h in &self.0 {
            guarded("on_maze_detected", h.on_maze_detected(group)).await;
        }
    }

    pub async fn maze_room_marked(&self, room: &Room, connection: &Connection) {
        for h in &self.0 {
            guarded("on_maze_room_marked", h.on_maze_room_marked(room, connection)).await;
        }
    }

    pub async fn maze_completed(&self, group: &MazeGroup) {
        for h in &self.0 {
            guarded("on_maze_completed", h.on_maze_completed(group)).await;
        }
    }

    pub async fn game_end(&self, status: &str) {
        for h in &self.0 {
            guarded("on_game_end", h.on_game_end(status)).await;
        }
    }
}
