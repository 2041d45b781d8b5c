//! MazeSubsystem: detects "maze of twisty little passages" style rooms from
//! a sliding buffer of recent descriptions (or a streak of non-reciprocal
//! transitions), then drives a marker-drop depth-first exploration to
//! resolve it into a transparent subgraph the normal pathfinder can use.

use crate::model::{ItemId, MazeGroup, MazeGroupId, RoomId};
use std::collections::VecDeque;

fn normalize_for_similarity(text: &str) -> String {
    let lower = text.to_lowercase();
    let stripped: String = lower.chars().map(|c| if c.is_alphanumeric() { c } else { ' ' }).collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Jaccard similarity over whitespace-split tokens of the normalized text.
fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize_for_similarity(a);
    let b = normalize_for_similarity(b);
    if a == b {
        return 1.0;
    }
    let set_a: std::collections::HashSet<&str> = a.split(' ').collect();
    let set_b: std::collections::HashSet<&str> = b.split(' ').collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// One exit of a maze room still awaiting resolution.
#[derive(Debug, Clone)]
struct PendingExit {
    room_id: RoomId,
    direction: String,
}

/// The next primitive command the orchestrator should issue while in MAZE
/// mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MazeCommand {
    Drop(ItemId),
    Move(String),
    Look,
    PickUp(ItemId),
}

/// Where the current frontier exit is in its drop-move-look cycle.
#[derive(Debug, Clone)]
enum MazePhase {
    AwaitingDrop,
    AwaitingMove(String),
    AwaitingLook,
}

pub struct MazeSubsystem {
    config: MazeConfig,
    buffer: VecDeque<(RoomId, String)>,
    non_reciprocal_streak: usize,
    active_group: Option<MazeGroup>,
    /// Marker item dropped just before the in-flight move, so the result can
    /// be attributed once the next `look` comes back.
    pending_drop: Option<(RoomId, ItemId)>,
    /// Direction of the in-flight move, for random-connection bookkeeping
    /// once `resolve_exit` sees where it actually landed.
    last_direction: Option<String>,
    frontier: VecDeque<PendingExit>,
    phase: MazePhase,
    next_seq: usize,
    group_counter: usize,
    paused_for_markers: bool,
    needs_light: bool,
}

#[derive(Debug, Clone)]
pub struct MazeConfig {
    pub similarity_buffer: usize,
    pub similarity_threshold: f64,
    pub trigger_count: usize,
    pub min_markers: usize,
    /// Consecutive non-reciprocal transitions that trigger maze detection
    /// when the duplicate-description path hasn't already fired.
    pub reciprocity_trigger_count: usize,
}

impl MazeSubsystem {
    pub fn new(config: MazeConfig) -> Self {
        Self {
            config,
            buffer: VecDeque::new(),
            non_reciprocal_streak: 0,
            active_group: None,
            pending_drop: None,
            last_direction: None,
            frontier: VecDeque::new(),
            phase: MazePhase::AwaitingDrop,
            next_seq: 0,
            group_counter: 0,
            paused_for_markers: false,
            needs_light: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active_group.is_some()
    }

    pub fn active_group(&self) -> Option<&MazeGroup> {
        self.active_group.as_ref()
    }

    pub fn needs_light(&self) -> bool {
        self.needs_light
    }

    /// Feeds one room description into the sliding-window detector. Returns
    /// `Some(group_id)` the turn the trigger condition first fires.
    pub fn check_trigger(&mut self, room_id: &RoomId, description: &str, entry_room: Option<RoomId>, turn: u64) -> Option<MazeGroupId> {
        if self.active_group.is_some() {
            return None;
        }
        self.buffer.push_back((room_id.clone(), description.to_string()));
        if self.buffer.len() > self.config.similarity_buffer {
            self.buffer.pop_front();
        }

        let mut duplicate_count = 0usize;
        for i in 0..self.buffer.len() {
            for j in (i + 1)..self.buffer.len() {
                if similarity(&self.buffer[i].1, &self.buffer[j].1) >= self.config.similarity_threshold {
                    duplicate_count += 1;
                }
            }
        }
        if duplicate_count < self.config.trigger_count {
            return None;
        }
        Some(self.trigger_group(room_id, entry_room, turn))
    }

    /// Secondary trigger: feeds one transition's reciprocity-demotion signal
    /// into a consecutive-failure streak. Fires independently of the
    /// duplicate-description path, so a maze whose rooms all read distinctly
    /// but whose connections behave randomly is still caught.
    pub fn check_reciprocity_trigger(
        &mut self,
        room_id: &RoomId,
        demoted: bool,
        entry_room: Option<RoomId>,
        turn: u64,
    ) -> Option<MazeGroupId> {
        if self.active_group.is_some() {
            return None;
        }
        if !demoted {
            self.non_reciprocal_streak = 0;
            return None;
        }
        self.non_reciprocal_streak += 1;
        if self.non_reciprocal_streak < self.config.reciprocity_trigger_count {
            return None;
        }
        self.non_reciprocal_streak = 0;
        Some(self.trigger_group(room_id, entry_room, turn))
    }

    fn trigger_group(&mut self, room_id: &RoomId, entry_room: Option<RoomId>, turn: u64) -> MazeGroupId {
        self.group_counter += 1;
        let group_id = MazeGroupId(format!("g{}", self.group_counter - 1));
        let group = MazeGroup::new(group_id.clone(), entry_room, turn);
        self.active_group = Some(group);
        self.next_seq = 0;
        self.frontier.clear();
        self.phase = MazePhase::AwaitingDrop;
        self.frontier.push_back(PendingExit { room_id: room_id.clone(), direction: String::new() });
        group_id
    }

    /// Renames a room into the maze's namespace (`maze_<g>_<seq>`) the first
    /// time it is seen as part of the active group.
    pub fn assign_maze_room_id(&mut self) -> Option<RoomId> {
        let group = self.active_group.as_mut()?;
        let id = RoomId::maze(&group.group_id.0, self.next_seq);
        self.next_seq += 1;
        group.room_ids.push(id.clone());
        Some(id)
    }

    pub fn assign_maze_marker(&mut self, room_id: RoomId, item_id: ItemId) {
        if let Some(group) = self.active_group.as_mut() {
            group.markers.insert(room_id, item_id);
        }
    }

    /// Looks up which already-marked maze room, if any, `items_here` shows
    /// evidence of (one of its marker items is visible there).
    pub fn marker_room_for(&self, items_here: &[ItemId]) -> Option<RoomId> {
        let group = self.active_group.as_ref()?;
        group.markers.iter().find(|(_, item_id)| items_here.contains(item_id)).map(|(room_id, _)| room_id.clone())
    }

    /// True if `room_id` is a known maze room with an assigned marker that
    /// is not among `items_here`: the description matched but the marker
    /// itself is gone (e.g. a thief carried it off).
    pub fn marker_missing(&self, room_id: &RoomId, items_here: &[ItemId]) -> bool {
        self.active_group
            .as_ref()
            .and_then(|g| g.markers.get(room_id))
            .map(|expected| !items_here.contains(expected))
            .unwrap_or(false)
    }

    pub fn record_exit(&mut self, room_id: RoomId) {
        if let Some(group) = self.active_group.as_mut() {
            if !group.exit_room_ids.contains(&room_id) {
                group.exit_room_ids.push(room_id);
            }
        }
    }

    pub fn has_enough_markers(&self, distinct_portable_in_inventory: usize) -> bool {
        distinct_portable_in_inventory >= self.config.min_markers
    }

    pub fn pause_for_markers(&mut self) {
        self.paused_for_markers = true;
    }

    pub fn resume(&mut self) {
        self.paused_for_markers = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused_for_markers
    }

    pub fn flag_darkness(&mut self) {
        self.needs_light = true;
    }

    pub fn clear_darkness(&mut self) {
        self.needs_light = false;
    }

    /// All of this maze room's mentioned exits have a concrete destination.
    pub fn mark_room_fully_explored(&mut self, room_id: &RoomId) {
        self.frontier.retain(|p| &p.room_id != room_id);
    }

    pub fn push_pending_exit(&mut self, room_id: RoomId, direction: String) {
        self.frontier.push_back(PendingExit { room_id, direction });
    }

    pub fn has_pending_exits(&self) -> bool {
        !self.frontier.is_empty()
    }

    /// Pops the next unresolved exit to explore, for the orchestrator's
    /// marker-drop-then-move cycle.
    pub fn next_pending_exit(&mut self) -> Option<(RoomId, String)> {
        self.frontier.pop_front().map(|p| (p.room_id, p.direction))
    }

    pub fn complete_maze(&mut self, turn: u64) -> Option<MazeGroup> {
        let mut group = self.active_group.take()?;
        group.fully_mapped = true;
        group.completed_turn = Some(turn);
        Some(group)
    }

    /// Drives the drop-move-look cycle one primitive command at a time.
    /// `droppable` is `ItemRegistry::get_droppable_items` called by the
    /// orchestrator. Returns `None` when there is nothing left to explore,
    /// or when markers have run out — the caller distinguishes the two via
    /// [`Self::has_pending_exits`].
    pub fn next_command(&mut self, droppable: &[ItemId]) -> Option<MazeCommand> {
        if self.needs_light {
            return None;
        }
        match self.phase.clone() {
            MazePhase::AwaitingDrop => {
                let next = self.frontier.front()?.clone();
                let marker = droppable.first()?.clone();
                self.pending_drop = Some((next.room_id.clone(), marker.clone()));
                self.phase = MazePhase::AwaitingMove(next.direction.clone());
                Some(MazeCommand::Drop(marker))
            }
            MazePhase::AwaitingMove(direction) => {
                if direction.is_empty() {
                    // Entry exit placeholder pushed by check_trigger; treat the
                    // frontier entry as already resolved once we've marked it.
                    self.frontier.pop_front();
                    self.phase = MazePhase::AwaitingDrop;
                    return self.next_command(droppable);
                }
                self.last_direction = Some(direction.clone());
                self.phase = MazePhase::AwaitingLook;
                Some(MazeCommand::Move(direction))
            }
            MazePhase::AwaitingLook => {
                self.phase = MazePhase::AwaitingDrop;
                Some(MazeCommand::Look)
            }
        }
    }

    /// Called once the `look` from [`Self::next_command`]'s cycle has come
    /// back and been classified, to advance the frontier. `marker_room_here`
    /// is whichever already-marked maze room's marker item (if any) was
    /// seen in `new_room`, from [`Self::marker_room_for`].
    ///
    /// Returns `Some((from_room, direction, observed_to))` when the landing
    /// room's marker identity contradicts where this edge was already
    /// mapped to land, so the caller can upgrade the connection to
    /// `random` via `MapGraph::mark_random`.
    pub fn resolve_exit(
        &mut self,
        is_maze_room: bool,
        new_room: RoomId,
        exits: Vec<String>,
        marker_room_here: Option<RoomId>,
    ) -> Option<(RoomId, String, RoomId)> {
        let Some((dropped_room, marker)) = self.pending_drop.take() else {
            return None;
        };
        let direction = self.last_direction.take().unwrap_or_default();
        self.frontier.pop_front();
        if !is_maze_room {
            self.record_exit(new_room);
            return None;
        }
        if let Some(expected) = marker_room_here {
            if expected != new_room {
                return Some((dropped_room, direction, expected));
            }
            // Already-marked room re-identified by its marker; nothing new
            // to map, and the marker just dropped is simply along for the
            // ride until the next unexplored exit needs one.
            return None;
        }
        self.assign_maze_marker(dropped_room, marker);
        for exit in exits {
            self.push_pending_exit(new_room.clone(), exit);
        }
        None
    }

    pub fn set_pending_drop(&mut self, room_id: RoomId, item_id: ItemId) {
        self.pending_drop = Some((room_id, item_id));
    }

    pub fn take_pending_drop(&mut self) -> Option<(RoomId, ItemId)> {
        self.pending_drop.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maze_trigger_fires_on_three_duplicate_descriptions() {
        let mut maze = MazeSubsystem::new(MazeConfig {
            similarity_buffer: 30,
            similarity_threshold: 0.95,
            trigger_count: 3,
            min_markers: 8,
            reciprocity_trigger_count: 4,
        });
        let desc = "You are in a maze of twisty little passages, all alike.";
        let entry = RoomId::from_name("Forest Path");

        assert!(maze.check_trigger(&RoomId::maze("pre", 0), desc, Some(entry.clone()), 1).is_none());
        assert!(maze.check_trigger(&RoomId::maze("pre", 1), desc, Some(entry.clone()), 2).is_none());
        let triggered = maze.check_trigger(&RoomId::maze("pre", 2), desc, Some(entry.clone()), 3);
        assert!(triggered.is_some());
        assert!(maze.is_active());
        assert_eq!(maze.active_group().unwrap().entry_room_id, Some(entry));
    }

    #[test]
    fn maze_room_ids_are_sequential_and_namespaced() {
        let mut maze = MazeSubsystem::new(MazeConfig {
            similarity_buffer: 30,
            similarity_threshold: 0.95,
            trigger_count: 1,
            min_markers: 8,
            reciprocity_trigger_count: 4,
        });
        maze.check_trigger(&RoomId::from_name("x"), "maze of twisty passages", None, 1);
        let a = maze.assign_maze_room_id().unwrap();
        let b = maze.assign_maze_room_id().unwrap();
        assert_ne!(a, b);
        assert!(a.0.starts_with("maze_g0_"));
    }

    #[test]
    fn completion_requires_no_pending_exits_and_clears_active_group() {
        let mut maze = MazeSubsystem::new(MazeConfig {
            similarity_buffer: 30,
            similarity_threshold: 0.95,
            trigger_count: 1,
            min_markers: 8,
            reciprocity_trigger_count: 4,
        });
        maze.check_trigger(&RoomId::from_name("x"), "maze of twisty passages", None, 1);
        assert!(maze.has_pending_exits());
        maze.next_pending_exit();
        assert!(!maze.has_pending_exits());
        let completed = maze.complete_maze(10).unwrap();
        assert!(completed.fully_mapped);
        assert!(!maze.is_active());
    }

    #[test]
    fn similarity_ignores_punctuation_and_case() {
        let a = "You are in a maze of twisty passages, all alike!";
        let b = "you are in a maze of twisty passages all alike";
        assert!(similarity(a, b) > 0.95);
    }

    #[test]
    fn reciprocity_trigger_fires_after_consecutive_demotions_and_resets_on_success() {
        let mut maze = MazeSubsystem::new(MazeConfig {
            similarity_buffer: 30,
            similarity_threshold: 0.95,
            trigger_count: 3,
            min_markers: 8,
            reciprocity_trigger_count: 4,
        });
        let room = RoomId::from_name("Twisty Passage");
        assert!(maze.check_reciprocity_trigger(&room, true, None, 1).is_none());
        assert!(maze.check_reciprocity_trigger(&room, false, None, 2).is_none());
        // A reciprocal transition resets the streak; three more demotions
        // starting from zero should not yet trigger.
        assert!(maze.check_reciprocity_trigger(&room, true, None, 3).is_none());
        assert!(maze.check_reciprocity_trigger(&room, true, None, 4).is_none());
        assert!(maze.check_reciprocity_trigger(&room, true, None, 5).is_none());
        let triggered = maze.check_reciprocity_trigger(&room, true, None, 6);
        assert!(triggered.is_some());
        assert!(maze.is_active());
    }

    fn active_maze(min_markers: usize) -> MazeSubsystem {
        let mut maze = MazeSubsystem::new(MazeConfig {
            similarity_buffer: 30,
            similarity_threshold: 0.95,
            trigger_count: 1,
            min_markers,
            reciprocity_trigger_count: 4,
        });
        maze.check_trigger(&RoomId::from_name("entry"), "maze of twisty passages", None, 1);
        maze
    }

    #[test]
    fn resolve_exit_assigns_marker_to_a_genuinely_new_room() {
        let mut maze = active_maze(1);
        let room_a = maze.assign_maze_room_id().unwrap();
        let marker = ItemId("leaflet".to_string());
        maze.set_pending_drop(room_a.clone(), marker.clone());
        maze.last_direction = Some("east".to_string());

        let room_b = RoomId::maze("g0", 1);
        let result = maze.resolve_exit(true, room_b.clone(), vec!["north".to_string()], None);

        assert!(result.is_none());
        assert_eq!(maze.active_group().unwrap().markers.get(&room_a), Some(&marker));
        assert!(maze.has_pending_exits());
    }

    #[test]
    fn resolve_exit_recognizes_a_known_marked_room_without_redropping() {
        let mut maze = active_maze(1);
        let room_a = maze.assign_maze_room_id().unwrap();
        let marker = ItemId("leaflet".to_string());
        maze.assign_maze_marker(room_a.clone(), marker.clone());

        let room_b = maze.assign_maze_room_id().unwrap();
        let second_marker = ItemId("garlic".to_string());
        maze.set_pending_drop(room_b, second_marker);
        maze.last_direction = Some("west".to_string());

        // The move landed back in room_a, identified by its marker being
        // visible there; marker_room_for would report room_a.
        let result = maze.resolve_exit(true, room_a.clone(), Vec::new(), Some(room_a.clone()));
        assert!(result.is_none());
    }

    #[test]
    fn resolve_exit_flags_random_connection_on_marker_mismatch() {
        let mut maze = active_maze(1);
        let room_a = maze.assign_maze_room_id().unwrap();
        let marker = ItemId("leaflet".to_string());
        maze.set_pending_drop(room_a.clone(), marker);
        maze.last_direction = Some("east".to_string());

        let landed = RoomId::maze("g0", 99);
        let expected = RoomId::maze("g0", 1);
        let result = maze.resolve_exit(true, landed, Vec::new(), Some(expected.clone()));

        let (from_room, direction, observed_to) = result.expect("marker mismatch should flag a random connection");
        assert_eq!(from_room, room_a);
        assert_eq!(direction, "east");
        assert_eq!(observed_to, expected);
    }

    #[test]
    fn marker_missing_detects_a_stolen_marker() {
        let mut maze = active_maze(1);
        let room_a = maze.assign_maze_room_id().unwrap();
        let marker = ItemId("leaflet".to_string());
        maze.assign_maze_marker(room_a.clone(), marker.clone());

        assert!(maze.marker_missing(&room_a, &[]));
        assert!(!maze.marker_missing(&room_a, &[marker]));
    }
}
