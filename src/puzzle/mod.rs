//! PuzzleTracker: algorithmic stuck-detection every turn, plus a throttled
//! structured-extraction pass that detects and matches puzzles against
//! inventory items.
//!
//! Shares the "parser call returns deltas, manager applies them" shape with
//! [`crate::items::ItemRegistry`] and [`crate::map::MapGraph`]; the
//! stuck-detection half is a plain counter-and-flag idiom that needs no
//! scheduler.

use crate::external::{complete_json_validated, JsonRequest, LanguageModel, Message};
use crate::model::{Attempt, ItemId, Puzzle, PuzzleId, PuzzleStatus, RoomId};
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct Suggestion {
    pub puzzle_id: PuzzleId,
    pub action_text: String,
    pub confidence: Confidence,
    pub navigation: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct RawPuzzleExtraction {
    #[serde(default)]
    puzzles: Vec<RawPuzzle>,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct RawPuzzle {
    description: String,
    #[serde(default)]
    related_items: Vec<String>,
    #[serde(default)]
    suggested_action: Option<String>,
    #[serde(default)]
    confidence: Option<String>,
}

fn puzzle_extraction_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "puzzles": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "description": {"type": "string"},
                        "related_items": {"type": "array", "items": {"type": "string"}},
                        "suggested_action": {"type": "string"},
                        "confidence": {"type": "string", "enum": ["high", "medium", "low"]}
                    },
                    "required": ["description"]
                }
            }
        },
        "required": ["puzzles"]
    })
}

struct RecentCommand {
    command: String,
    room: RoomId,
    failure_text: Option<String>,
}

pub struct PuzzleTracker {
    puzzles: Vec<Puzzle>,
    next_id: u64,
    recent: VecDeque<RecentCommand>,
    turns_since_evaluation: u32,
    inventory_changed: bool,
    new_room: bool,
    failed_action: bool,
    throttle_turns: u32,
    attempt_threshold: u32,
}

impl PuzzleTracker {
    pub fn new(throttle_turns: u32, attempt_threshold: u32) -> Self {
        Self {
            puzzles: Vec::new(),
            next_id: 0,
            recent: VecDeque::new(),
            turns_since_evaluation: 0,
            inventory_changed: false,
            new_room: false,
            failed_action: false,
            throttle_turns,
            attempt_threshold,
        }
    }

    pub fn load_from_db(&mut self, puzzles: Vec<Puzzle>) {
        self.next_id = puzzles.iter().map(|p| p.puzzle_id.0 + 1).max().unwrap_or(0);
        self.puzzles = puzzles;
    }

    pub fn notify_new_room(&mut self) {
        self.new_room = true;
    }

    pub fn notify_inventory_changed(&mut self) {
        self.inventory_changed = true;
    }

    pub fn notify_failed_action(&mut self) {
        self.failed_action = true;
    }

    pub fn get_puzzles(&self, status: Option<PuzzleStatus>) -> Vec<&Puzzle> {
        match status {
            Some(s) => self.puzzles.iter().filter(|p| p.status == s).collect(),
            None => self.puzzles.iter().collect(),
        }
    }

    /// Every-turn algorithmic stuck detection, no model call. Fires at most
    /// one suggestion per call, so repeated calls over a stuck trace stay
    /// idempotent.
    pub fn detect_stuck(&mut self, command: &str, room: &RoomId, failure_text: Option<&str>) -> Option<String> {
        self.recent.push_back(RecentCommand {
            command: command.to_string(),
            room: room.clone(),
            failure_text: failure_text.map(|s| s.to_string()),
        });
        while self.recent.len() > 15 {
            self.recent.pop_front();
        }

        let last_10: Vec<&RecentCommand> = self.recent.iter().rev().take(10).collect();
        let repeats = last_10.iter().filter(|c| c.command == command).count();
        if repeats >= 3 {
            return Some(format!("stuck: '{command}' repeated {repeats} times in the last 10 turns"));
        }

        let last_15: Vec<&RecentCommand> = self.recent.iter().rev().take(15).collect();
        if last_15.len() >= 15 {
            let distinct_rooms: std::collections::HashSet<&RoomId> = last_15.iter().map(|c| &c.room).collect();
            if distinct_rooms.len() <= 3 && !self.inventory_changed && !self.new_room {
                return Some("stuck: fewer than 4 distinct rooms visited in the last 15 turns".to_string());
            }
        }

        if let Some(text) = failure_text {
            let normalized = crate::model::normalize_name(text);
            let repeats = last_10.iter().filter(|c| c.failure_text.as_deref().map(crate::model::normalize_name) == Some(normalized.clone())).count();
            if repeats >= 3 {
                return Some(format!("stuck: same failure response repeated {repeats} times"));
            }
        }

        None
    }

    /// Whether a throttled full evaluation pass should run this turn.
    pub fn should_evaluate(&mut self) -> bool {
        self.turns_since_evaluation += 1;
        let forced = self.new_room || self.inventory_changed || self.failed_action;
        let due = self.turns_since_evaluation >= self.throttle_turns;
        due || forced
    }

    fn clear_flags(&mut self) {
        self.turns_since_evaluation = 0;
        self.inventory_changed = false;
        self.new_room = false;
        self.failed_action = false;
    }

    /// Full cross-reference evaluation pass: detect new puzzles, then match
    /// each against the inventory and attach navigation steps to reach it.
    pub async fn evaluate(
        &mut self,
        lm: &dyn LanguageModel,
        text: &str,
        room: &RoomId,
        inventory: &[ItemId],
        turn: u64,
        map: &crate::map::MapGraph,
    ) -> Vec<Suggestion> {
        let req = JsonRequest {
            messages: vec![Message {
                role: "user".into(),
                content: format!("Room: {room}\nInventory: {inventory:?}\nGame output:\n{text}\n\nDetect puzzles (locked doors, blocked paths, cryptic inscriptions, NPC demands, conditional refusals)."),
            }],
            system_prompt: "Detect puzzles in interactive fiction output and propose matches against the given inventory.".into(),
            schema: puzzle_extraction_schema(),
            temperature: 0.0,
            max_tokens: 1024,
        };
        let extraction: RawPuzzleExtraction = complete_json_validated(lm, req, 3).await;

        let mut suggestions = Vec::new();
        for raw in extraction.puzzles {
            let puzzle_id = self.find_or_create(&raw, room, turn);
            let confidence = match raw.confidence.as_deref() {
                Some("high") => Confidence::High,
                Some("medium") => Confidence::Medium,
                _ => Confidence::Low,
            };
            if let Some(action) = raw.suggested_action {
                let navigation = self
                    .puzzles
                    .iter()
                    .find(|p| p.puzzle_id == puzzle_id)
                    .and_then(|p| p.location.as_ref())
                    .and_then(|loc| map.get_path(room, loc))
                    .unwrap_or_default();
                suggestions.push(Suggestion { puzzle_id, action_text: action, confidence, navigation });
            }
        }
        self.clear_flags();
        suggestions
    }

    fn find_or_create(&mut self, raw: &RawPuzzle, room: &RoomId, turn: u64) -> PuzzleId {
        let normalized = crate::model::normalize_name(&raw.description);
        if let Some(existing) = self.puzzles.iter().find(|p| {
            crate::model::normalize_name(&p.description) == normalized
                && matches!(p.status, PuzzleStatus::Open | PuzzleStatus::InProgress)
        }) {
            return existing.puzzle_id;
        }
        let puzzle_id = PuzzleId(self.next_id);
        self.next_id += 1;
        self.puzzles.push(Puzzle {
            puzzle_id,
            description: raw.description.clone(),
            status: PuzzleStatus::Open,
            location: Some(room.clone()),
            related_items: raw.related_items.iter().map(|n| ItemId::from_name(n)).collect(),
            attempts: Vec::new(),
            created_turn: turn,
            solved_turn: None,
        });
        puzzle_id
    }

    /// Creates a puzzle outside the structured-extraction pass, for
    /// algorithmically-detected conditions (e.g. "need light in maze",
    /// "wandering thief in maze"). Dedupes on normalized description like
    /// [`Self::find_or_create`], but only against puzzles still `open` or
    /// `in_progress`: returns `None` so the caller doesn't re-fire a
    /// found-hook every turn a condition persists, but a condition that
    /// recurs after its earlier instance was `solved`/`abandoned` (e.g. a
    /// second maze theft) raises a fresh puzzle rather than being silently
    /// swallowed forever.
    pub fn raise_puzzle(&mut self, description: String, room: Option<RoomId>, turn: u64) -> Option<PuzzleId> {
        let normalized = crate::model::normalize_name(&description);
        if self.puzzles.iter().any(|p| {
            crate::model::normalize_name(&p.description) == normalized
                && matches!(p.status, PuzzleStatus::Open | PuzzleStatus::InProgress)
        }) {
            return None;
        }
        let puzzle_id = PuzzleId(self.next_id);
        self.next_id += 1;
        self.puzzles.push(Puzzle {
            puzzle_id,
            description,
            status: PuzzleStatus::Open,
            location: room,
            related_items: Vec::new(),
            attempts: Vec::new(),
            created_turn: turn,
            solved_turn: None,
        });
        Some(puzzle_id)
    }

    pub fn record_attempt(&mut self, puzzle_id: PuzzleId, action: String, result: String, turn: u64) {
        if let Some(puzzle) = self.puzzles.iter_mut().find(|p| p.puzzle_id == puzzle_id) {
            puzzle.attempts.push(Attempt { action, result, turn });
            if puzzle.attempts.len() as u32 > self.attempt_threshold && puzzle.status == PuzzleStatus::Open {
                puzzle.status = PuzzleStatus::InProgress;
            }
        }
    }

    pub fn solve(&mut self, puzzle_id: PuzzleId, turn: u64) {
        if let Some(puzzle) = self.puzzles.iter_mut().find(|p| p.puzzle_id == puzzle_id) {
            puzzle.status = PuzzleStatus::Solved;
            puzzle.solved_turn = Some(turn);
        }
    }
}
