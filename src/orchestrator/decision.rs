//! Decision-phase context assembly and response parsing.

use crate::model::{ItemId, RoomId};

#[derive(Debug, Clone)]
pub struct MapSummary {
    pub rooms_visited: usize,
    pub rooms_total: usize,
    pub unexplored_count: usize,
    pub current: RoomId,
}

#[derive(Debug, Clone)]
pub struct OpenPuzzleSummary {
    pub description: String,
    pub top_suggestion: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub latest_output: String,
    pub current_room: RoomId,
    pub inventory: Vec<ItemId>,
    pub items_here: Vec<ItemId>,
    pub map_summary: MapSummary,
    pub open_puzzles: Vec<OpenPuzzleSummary>,
    pub recent_exchanges: Vec<(String, String)>,
}

impl DecisionContext {
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Current room: {}\n", self.current_room));
        out.push_str(&format!("Latest output:\n{}\n", self.latest_output));
        out.push_str(&format!(
            "Inventory: {}\n",
            self.inventory.iter().map(|i| i.0.as_str()).collect::<Vec<_>>().join(", ")
        ));
        out.push_str(&format!(
            "Items here: {}\n",
            self.items_here.iter().map(|i| i.0.as_str()).collect::<Vec<_>>().join(", ")
        ));
        out.push_str(&format!(
            "Map: {}/{} rooms visited, {} unexplored exits\n",
            self.map_summary.rooms_visited, self.map_summary.rooms_total, self.map_summary.unexplored_count
        ));
        for puzzle in &self.open_puzzles {
            out.push_str(&format!(
                "Open puzzle: {} (suggestion: {})\n",
                puzzle.description,
                puzzle.top_suggestion.as_deref().unwrap_or("none")
            ));
        }
        for (command, outcome) in &self.recent_exchanges {
            out.push_str(&format!("> {command}\n{outcome}\n"));
        }
        out.push_str("\nRespond with your reasoning, then a line starting with `ACTION: <command>`.");
        out
    }
}

/// Extracts the reasoning and the single command token from a game-agent
/// response. The command is the text following the literal `ACTION:` marker;
/// everything before it is reasoning.
pub fn parse_action(response: &str) -> Option<(String, String)> {
    let marker = "ACTION:";
    let idx = response.find(marker)?;
    let reasoning = response[..idx].trim().to_string();
    let command = response[idx + marker.len()..].lines().next().unwrap_or("").trim().to_string();
    if command.is_empty() {
        return None;
    }
    Some((reasoning, command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reasoning_and_command() {
        let response = "I should look around first.\nACTION: look";
        let (reasoning, command) = parse_action(response).unwrap();
        assert_eq!(reasoning, "I should look around first.");
        assert_eq!(command, "look");
    }

    #[test]
    fn missing_marker_is_none() {
        assert!(parse_action("I think I'll go north.").is_none());
    }

    #[test]
    fn empty_command_after_marker_is_none() {
        assert!(parse_action("reasoning\nACTION: \n").is_none());
    }
}
