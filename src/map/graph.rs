//! MapGraph: a directed graph of rooms and connections.
//!
//! A `petgraph::DiGraph` node/edge store plus a satellite `HashMap` from a
//! stable id to `NodeIndex`, rather than re-deriving indices by linear scan.
//! Unlike an append-only tree built once via DFS, this graph is mutated turn
//! by turn as the agent explores, so edges are upserted and occasionally
//! rewritten (reciprocity demotion).

use crate::external::{complete_json_validated, JsonRequest, LanguageModel, Message};
use crate::model::{Connection, Room, RoomId};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct RawRoomExtraction {
    #[serde(default)]
    room_changed: bool,
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    exits: Vec<String>,
}

fn room_extraction_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "room_changed": {"type": "boolean"},
            "name": {"type": ["string", "null"]},
            "description": {"type": ["string", "null"]},
            "exits": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["room_changed"]
    })
}

#[derive(Debug, Clone)]
pub struct RoomUpdate {
    pub room_id: RoomId,
    pub room_changed: bool,
    pub created: bool,
    /// True when this transition's direction already had an assumed
    /// (bidirectional-mirror) destination that turned out wrong: the
    /// reverse of the command just issued did not lead back to the
    /// previous room. Feeds the maze detector's secondary trigger.
    pub reciprocity_demoted: bool,
}

const COMPASS_OPPOSITES: &[(&str, &str)] = &[
    ("north", "south"),
    ("east", "west"),
    ("up", "down"),
    ("in", "out"),
    ("northeast", "southwest"),
    ("northwest", "southeast"),
];

fn opposite_direction(dir: &str) -> Option<&'static str> {
    let dir = dir.trim().to_lowercase();
    for (a, b) in COMPASS_OPPOSITES {
        if dir == *a {
            return Some(b);
        }
        if dir == *b {
            return Some(a);
        }
    }
    None
}

pub struct MapGraph {
    graph: DiGraph<Room, Connection>,
    index: HashMap<RoomId, NodeIndex>,
    last_room: Option<RoomId>,
    /// Directions whose destination was established by an actual traversal
    /// rather than the bidirectional mirror guess; only these resist
    /// reciprocity demotion.
    confirmed: HashSet<(RoomId, String)>,
}

impl MapGraph {
    pub fn new() -> Self {
        Self { graph: DiGraph::new(), index: HashMap::new(), last_room: None, confirmed: HashSet::new() }
    }

    /// Rehydrates the graph from journal rows at crash resume.
    pub fn load_from_db(&mut self, rooms: Vec<Room>, connections: Vec<Connection>) {
        self.graph = DiGraph::new();
        self.index.clear();
        self.confirmed.clear();
        for room in rooms {
            let room_id = room.room_id.clone();
            let idx = self.graph.add_node(room);
            self.index.insert(room_id, idx);
        }
        for conn in connections {
            if let (Some(&from), Some(&to)) = (self.index.get(&conn.from_room), self.index.get(&conn.to_room)) {
                self.confirmed.insert((conn.from_room.clone(), conn.direction.clone()));
                self.graph.add_edge(from, to, conn);
            }
        }
    }

    pub fn current_room(&self) -> Option<&RoomId> {
        self.last_room.as_ref()
    }

    /// Rehydrates the player's last known position at crash resume, from
    /// the latest journaled turn's `current_room`. `load_from_db` alone
    /// leaves `last_room` unset since rooms/connections carry no notion of
    /// "current".
    pub fn set_current_room(&mut self, room_id: RoomId) {
        self.last_room = Some(room_id);
    }

    /// Seeds the graph with a starting room without going through a parser
    /// call, for the very first turn before any command has been issued.
    pub fn enter_room(&mut self, room_id: RoomId, name: String, description: String, turn: u64) {
        if let Some(&idx) = self.index.get(&room_id) {
            let room = &mut self.graph[idx];
            room.visited = true;
            room.visit_count += 1;
            room.last_observed_turn = turn;
        } else {
            let room = Room::new(room_id.clone(), name, description, turn);
            let idx = self.graph.add_node(room);
            self.index.insert(room_id.clone(), idx);
        }
        self.last_room = Some(room_id);
    }

    pub async fn update_from_game_output(
        &mut self,
        lm: &dyn LanguageModel,
        text: &str,
        command: &str,
        turn: u64,
    ) -> RoomUpdate {
        let req = JsonRequest {
            messages: vec![Message {
                role: "user".into(),
                content: format!("Command issued: {command}\nGame output:\n{text}\n\nDid the room change? If so, what is its name, description, and exit list?"),
            }],
            system_prompt: "Extract room-transition facts from interactive fiction output. Never fabricate a room name.".into(),
            schema: room_extraction_schema(),
            temperature: 0.0,
            max_tokens: 512,
        };
        let extraction: RawRoomExtraction = complete_json_validated(lm, req, 3).await;

        let previous_room = self.last_room.clone();

        if !extraction.room_changed {
            if let Some(room_id) = previous_room {
                if let Some(&idx) = self.index.get(&room_id) {
                    let room = &mut self.graph[idx];
                    room.last_observed_turn = turn;
                    if let Some(desc) = &extraction.description {
                        if desc != &room.description {
                            room.description = desc.clone();
                        }
                    }
                }
                return RoomUpdate { room_id, room_changed: false, created: false, reciprocity_demoted: false };
            }
        }

        let name = extraction.name.clone().unwrap_or_else(|| "unknown room".to_string());
        let room_id = RoomId::from_name(&name);

        let created = if let Some(&idx) = self.index.get(&room_id) {
            let room = &mut self.graph[idx];
            room.visited = true;
            room.visit_count += 1;
            room.last_observed_turn = turn;
            if let Some(desc) = &extraction.description {
                room.description = desc.clone();
            }
            for exit in &extraction.exits {
                if !room.pending_exits.contains(exit) {
                    room.pending_exits.push(exit.clone());
                }
            }
            false
        } else {
            let mut room = Room::new(room_id.clone(), name, extraction.description.clone().unwrap_or_default(), turn);
            room.pending_exits = extraction.exits.clone();
            let idx = self.graph.add_node(room);
            self.index.insert(room_id.clone(), idx);
            true
        };

        let mut reciprocity_demoted = false;
        if let Some(prev) = &previous_room {
            if prev != &room_id {
                reciprocity_demoted = self.record_transition(prev, &room_id, command);
            }
        }

        self.last_room = Some(room_id.clone());
        RoomUpdate { room_id, room_changed: extraction.room_changed, created, reciprocity_demoted }
    }

    /// Returns true if this transition's direction already had an assumed
    /// mirror edge pointing somewhere else (reciprocity demotion).
    fn record_transition(&mut self, from: &RoomId, to: &RoomId, command: &str) -> bool {
        let dir = command.trim().to_lowercase();
        let demoted = self.upsert_edge(from, to, &dir);
        self.confirmed.insert((from.clone(), dir.clone()));

        // Resolve a pending-exit label into a concrete edge now that it has
        // a destination.
        if let Some(&idx) = self.index.get(from) {
            self.graph[idx].pending_exits.retain(|e| e.to_lowercase() != dir);
        }

        if let Some(opposite) = opposite_direction(&dir) {
            let key = (to.clone(), opposite.to_string());
            if !self.confirmed.contains(&key) {
                self.upsert_edge(to, from, opposite);
            }
        }
        demoted
    }

    fn find_outgoing_edge(&self, from: NodeIndex, dir: &str) -> Option<petgraph::graph::EdgeIndex> {
        self.graph.edges(from).find(|e| e.weight().direction == dir).map(|e| e.id())
    }

    /// Returns true if an edge already existed in this direction pointing to
    /// a different room than `to` (a reciprocity demotion).
    fn upsert_edge(&mut self, from: &RoomId, to: &RoomId, dir: &str) -> bool {
        let (Some(&from_idx), Some(&to_idx)) = (self.index.get(from), self.index.get(to)) else {
            return false;
        };
        let mut demoted = false;
        if let Some(edge_idx) = self.find_outgoing_edge(from_idx, dir) {
            let (_, existing_target) = self.graph.edge_endpoints(edge_idx).unwrap();
            if existing_target == to_idx {
                return false;
            }
            // Reciprocity demotion: the implicit mirror pointed somewhere
            // else; replace it with the newly observed destination.
            self.graph.remove_edge(edge_idx);
            demoted = true;
        }
        self.graph.add_edge(from_idx, to_idx, Connection::new(from.clone(), to.clone(), dir.to_string()));
        demoted
    }

    /// Upgrades a directed connection to `random`: the same command from
    /// `from` has now been observed landing in two different rooms.
    /// Reassigns the edge to `observed_to` and records both the prior and
    /// newly observed destinations in `observed_destinations`.
    pub fn mark_random(&mut self, from: &RoomId, dir: &str, observed_to: &RoomId) {
        let (Some(&from_idx), Some(&to_idx)) = (self.index.get(from), self.index.get(observed_to)) else {
            return;
        };
        let mut conn = match self.find_outgoing_edge(from_idx, dir) {
            Some(edge_idx) => self.graph.remove_edge(edge_idx).unwrap(),
            None => Connection::new(from.clone(), observed_to.clone(), dir.to_string()),
        };
        conn.random = true;
        if conn.to_room != *observed_to && !conn.observed_destinations.contains(&conn.to_room) {
            let prior = conn.to_room.clone();
            conn.observed_destinations.push(prior);
        }
        if !conn.observed_destinations.contains(observed_to) {
            conn.observed_destinations.push(observed_to.clone());
        }
        conn.to_room = observed_to.clone();
        self.graph.add_edge(from_idx, to_idx, conn);
    }

    pub fn mark_blocked(&mut self, from: &RoomId, dir: &str, reason: &str) {
        if let Some(&idx) = self.index.get(from) {
            if let Some(edge_idx) = self.find_outgoing_edge(idx, dir) {
                self.graph[edge_idx].blocked = Some(reason.to_string());
            }
        }
    }

    pub fn unblock(&mut self, from: &RoomId, dir: &str) {
        if let Some(&idx) = self.index.get(from) {
            if let Some(edge_idx) = self.find_outgoing_edge(idx, dir) {
                self.graph[edge_idx].blocked = None;
            }
        }
    }

    pub fn get_room(&self, room_id: &RoomId) -> Option<&Room> {
        self.index.get(room_id).map(|&idx| &self.graph[idx])
    }

    pub fn get_path(&self, from: &RoomId, to: &RoomId) -> Option<Vec<String>> {
        let &start = self.index.get(from)?;
        let &target = self.index.get(to)?;
        if start == target {
            return Some(Vec::new());
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(start);
        queue.push_back((start, Vec::<String>::new()));
        while let Some((node, path)) = queue.pop_front() {
            for edge in self.graph.edges(node) {
                let conn = edge.weight();
                if !conn.is_traversable() {
                    continue;
                }
                let next = edge.target();
                if !visited.insert(next) {
                    continue;
                }
                let mut extended = path.clone();
                extended.push(conn.direction.clone());
                if next == target {
                    return Some(extended);
                }
                queue.push_back((next, extended));
            }
        }
        None
    }

    pub fn get_next_step(&self, from: &RoomId, to: &RoomId) -> Option<String> {
        self.get_path(from, to)?.into_iter().next()
    }

    pub fn get_unexplored_exits(&self, room: Option<&RoomId>) -> Vec<(RoomId, String)> {
        match room {
            Some(room_id) => self
                .get_room(room_id)
                .map(|r| r.pending_exits.iter().map(|e| (room_id.clone(), e.clone())).collect())
                .unwrap_or_default(),
            None => self
                .index
                .keys()
                .flat_map(|room_id| {
                    self.get_room(room_id)
                        .map(|r| r.pending_exits.iter().map(|e| (room_id.clone(), e.clone())).collect::<Vec<_>>())
                        .unwrap_or_default()
                })
                .collect(),
        }
    }

    pub fn get_nearest_unexplored(&self, from: &RoomId) -> Option<(RoomId, Vec<String>)> {
        let &start = self.index.get(from)?;
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(start);
        queue.push_back((start, Vec::<String>::new()));
        while let Some((node, path)) = queue.pop_front() {
            let room = &self.graph[node];
            if !room.pending_exits.is_empty() {
                return Some((room.room_id.clone(), path));
            }
            for edge in self.graph.edges(node) {
                let conn = edge.weight();
                if !conn.is_traversable() {
                    continue;
                }
                let next = edge.target();
                if !visited.insert(next) {
                    continue;
                }
                let mut extended = path.clone();
                extended.push(conn.direction.clone());
                queue.push_back((next, extended));
            }
        }
        None
    }

    pub fn rooms_visited(&self) -> usize {
        self.graph.node_weights().filter(|r| r.visited).count()
    }

    pub fn rooms_total(&self) -> usize {
        self.graph.node_count()
    }

    pub fn all_rooms(&self) -> Vec<&Room> {
        self.graph.node_weights().collect()
    }

    pub fn all_connections(&self) -> Vec<&Connection> {
        self.graph.edge_weights().collect()
    }
}

impl Default for MapGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::test_double::RecordingLanguageModel;

    #[tokio::test]
    async fn two_room_round_trip() {
        let mut map = MapGraph::new();
        map.enter_room(RoomId::from_name("Room A"), "Room A".into(), "desc".into(), 0);
        // Seed room A with a pending "north" exit as the parser would.
        if let Some(&idx) = map.index.get(&RoomId::from_name("Room A")) {
            map.graph[idx].pending_exits.push("north".into());
        }

        let lm = RecordingLanguageModel::new();
        lm.push_json(serde_json::json!({"room_changed": true, "name": "Room B", "description": "b", "exits": ["south"]}));
        map.update_from_game_output(&lm, "You are in room B", "north", 1).await;

        lm.push_json(serde_json::json!({"room_changed": true, "name": "Room A", "description": "desc", "exits": ["north"]}));
        map.update_from_game_output(&lm, "You are back in room A", "south", 2).await;

        let a = RoomId::from_name("Room A");
        let b = RoomId::from_name("Room B");
        assert_eq!(map.rooms_total(), 2);
        assert_eq!(map.get_path(&a, &b), Some(vec!["north".to_string()]));
        assert_eq!(map.get_unexplored_exits(None), Vec::new());
    }

    #[tokio::test]
    async fn reciprocity_demotion_does_not_leave_stale_mirror() {
        let mut map = MapGraph::new();
        map.enter_room(RoomId::from_name("A"), "A".into(), "a".into(), 0);

        let lm = RecordingLanguageModel::new();
        lm.push_json(serde_json::json!({"room_changed": true, "name": "B", "description": "b", "exits": []}));
        map.update_from_game_output(&lm, "in B", "north", 1).await;

        lm.push_json(serde_json::json!({"room_changed": true, "name": "C", "description": "c", "exits": []}));
        map.update_from_game_output(&lm, "in C", "south", 2).await;

        let a = RoomId::from_name("A");
        let b = RoomId::from_name("B");
        let c = RoomId::from_name("C");

        assert_eq!(map.get_next_step(&a, &b), Some("north".to_string()));
        assert_eq!(map.get_next_step(&b, &c), Some("south".to_string()));
        assert_eq!(map.get_next_step(&b, &a), None);
    }

    #[test]
    fn mark_random_reassigns_edge_and_records_both_destinations() {
        let mut map = MapGraph::new();
        map.enter_room(RoomId::from_name("A"), "A".into(), "a".into(), 0);
        map.enter_room(RoomId::from_name("B"), "B".into(), "b".into(), 1);
        map.enter_room(RoomId::from_name("C"), "C".into(), "c".into(), 2);
        let a = RoomId::from_name("A");
        let b = RoomId::from_name("B");
        let c = RoomId::from_name("C");

        map.upsert_edge(&a, &b, "north");
        map.mark_random(&a, "north", &c);

        assert_eq!(map.get_next_step(&a, &c), Some("north".to_string()));
        let conn = map.all_connections().into_iter().find(|c| c.from_room == a && c.direction == "north").unwrap();
        assert!(conn.random);
        assert!(conn.observed_destinations.contains(&b));
        assert!(conn.observed_destinations.contains(&c));
        assert_eq!(conn.observed_destinations.len(), 2);
    }
}
