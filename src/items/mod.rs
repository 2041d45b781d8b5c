//! ItemRegistry: the single owner of item state, keyed by `item_id`.
//! `update_from_game_output` issues one structured-extraction call, turns
//! the result into a list of [`ItemUpdate`] deltas, applies them to the
//! in-memory map, and returns the deltas so the orchestrator can journal and
//! replay them without re-asking the model.

use crate::external::{complete_json_validated, JsonRequest, LanguageModel, Message};
use crate::model::{Item, ItemId, ItemLocation, Portability, Properties, RoomId};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    New,
    Taken,
    Dropped,
    StateChange,
    Moved,
    Gone,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ItemUpdate {
    pub item_id: ItemId,
    pub change_type: ChangeType,
    pub name: String,
    pub description: Option<String>,
    pub properties: Option<Properties>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ItemExtraction {
    #[serde(default)]
    items: Vec<RawItemDelta>,
}

#[derive(Debug, serde::Deserialize)]
struct RawItemDelta {
    name: String,
    change_type: ChangeType,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    properties: Option<Properties>,
}

fn item_extraction_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "change_type": {"type": "string", "enum": ["new", "taken", "dropped", "state_change", "moved", "gone"]},
                        "description": {"type": "string"},
                        "properties": {"type": "object"}
                    },
                    "required": ["name", "change_type"]
                }
            }
        },
        "required": ["items"]
    })
}

pub struct ItemRegistry {
    items: HashMap<ItemId, Item>,
    carry_limit: Option<usize>,
}

impl ItemRegistry {
    pub fn new() -> Self {
        Self { items: HashMap::new(), carry_limit: None }
    }

    /// Rehydrates from journal rows at crash resume.
    pub fn load_from_db(&mut self, items: Vec<Item>) {
        self.items = items.into_iter().map(|i| (i.item_id.clone(), i)).collect();
    }

    pub async fn update_from_game_output(
        &mut self,
        lm: &dyn LanguageModel,
        text: &str,
        current_room: &RoomId,
        command: &str,
        turn: u64,
    ) -> Vec<ItemUpdate> {
        let req = JsonRequest {
            messages: vec![Message {
                role: "user".into(),
                content: format!(
                    "Room: {current_room}\nCommand issued: {command}\nGame output:\n{text}\n\nList only items the text actually mentions. Never invent items."
                ),
            }],
            system_prompt: "Extract item-state deltas from interactive fiction output.".into(),
            schema: item_extraction_schema(),
            temperature: 0.0,
            max_tokens: 1024,
        };
        let extraction: ItemExtraction = complete_json_validated(lm, req, 3).await;

        let mut updates = Vec::with_capacity(extraction.items.len());
        for raw in extraction.items {
            let item_id = ItemId::from_name(&raw.name);
            let update = ItemUpdate {
                item_id: item_id.clone(),
                change_type: raw.change_type,
                name: raw.name,
                description: raw.description,
                properties: raw.properties,
            };
            self.apply_delta(&update, current_room, turn);
            updates.push(update);
        }

        self.detect_carry_limit(text, turn);
        updates
    }

    fn apply_delta(&mut self, update: &ItemUpdate, current_room: &RoomId, turn: u64) {
        let entry = self.items.entry(update.item_id.clone()).or_insert_with(|| {
            Item::new(
                update.item_id.clone(),
                update.name.clone(),
                update.description.clone().unwrap_or_default(),
                ItemLocation::Room(current_room.clone()),
                turn,
            )
        });
        entry.last_seen_turn = turn;
        if let Some(desc) = &update.description {
            entry.description = desc.clone();
        }
        if let Some(props) = &update.properties {
            entry.properties.extend(props.clone());
        }
        match update.change_type {
            ChangeType::New => {
                entry.location = ItemLocation::Room(current_room.clone());
            }
            ChangeType::Taken => {
                entry.location = ItemLocation::Inventory;
                self.set_portable(&update.item_id, true);
                return;
            }
            ChangeType::Dropped => {
                entry.location = ItemLocation::Room(current_room.clone());
            }
            ChangeType::Moved => {
                entry.location = ItemLocation::Room(current_room.clone());
            }
            ChangeType::StateChange => {}
            ChangeType::Gone => {
                entry.location = ItemLocation::Unknown;
            }
        }
    }

    /// Never downgrade from definite to unknown.
    fn set_portable(&mut self, item_id: &ItemId, portable: bool) {
        if let Some(item) = self.items.get_mut(item_id) {
            item.portable = if portable { Portability::True } else { Portability::False };
        }
    }

    pub fn take_item(&mut self, item_id: &ItemId) {
        if let Some(item) = self.items.get_mut(item_id) {
            item.location = ItemLocation::Inventory;
            item.portable = Portability::True;
        }
    }

    pub fn drop_item(&mut self, item_id: &ItemId, room: RoomId) {
        if let Some(item) = self.items.get_mut(item_id) {
            item.location = ItemLocation::Room(room);
        }
    }

    pub fn get_inventory(&self) -> Vec<&Item> {
        self.items.values().filter(|i| i.location == ItemLocation::Inventory).collect()
    }

    pub fn get_items_in_room(&self, room: &RoomId) -> Vec<&Item> {
        self.items.values().filter(|i| i.location.room_id() == Some(room)).collect()
    }

    pub fn find_items_by_property(&self, key: &str, value: &crate::model::PropertyValue) -> Vec<&Item> {
        self.items.values().filter(|i| i.properties.get(key) == Some(value)).collect()
    }

    pub fn get_item(&self, item_id: &ItemId) -> Option<&Item> {
        self.items.get(item_id)
    }

    pub fn get_all_items(&self) -> Vec<&Item> {
        self.items.values().collect()
    }

    pub fn carry_limit(&self) -> Option<usize> {
        self.carry_limit
    }

    /// Marker-selection primitive for the maze subsystem. Returns droppable
    /// inventory items with puzzle-related / excluded ids
    /// sorted last, so the maze solver reaches for "spare" items first.
    pub fn get_droppable_items(&self, exclude: &[ItemId]) -> Vec<&Item> {
        let mut droppable: Vec<&Item> = self
            .items
            .values()
            .filter(|i| i.location == ItemLocation::Inventory && i.portable == Portability::True)
            .collect();
        droppable.sort_by_key(|i| exclude.contains(&i.item_id));
        droppable
    }

    fn detect_carry_limit(&mut self, text: &str, _turn: u64) {
        let lower = text.to_lowercase();
        if lower.contains("too heavy") || lower.contains("can't carry") || lower.contains("cannot carry") {
            self.carry_limit = Some(self.get_inventory().len());
        }
    }
}

impl Default for ItemRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::test_double::RecordingLanguageModel;
    use crate::model::PropertyValue;

    #[tokio::test]
    async fn take_drop_cycle_updates_location_and_portability() {
        let mut registry = ItemRegistry::new();
        let lm = RecordingLanguageModel::new();
        lm.push_json(serde_json::json!({"items": [{"name": "leaflet", "change_type": "new"}]}));
        let room_x = RoomId::from_name("X");
        registry.update_from_game_output(&lm, "A leaflet is here.", &room_x, "look", 1).await;

        let leaflet = ItemId::from_name("leaflet");
        registry.take_item(&leaflet);
        assert_eq!(registry.get_item(&leaflet).unwrap().location, ItemLocation::Inventory);
        assert_eq!(registry.get_item(&leaflet).unwrap().portable, Portability::True);

        let room_y = RoomId::from_name("Y");
        registry.drop_item(&leaflet, room_y.clone());
        assert_eq!(registry.get_item(&leaflet).unwrap().location, ItemLocation::Room(room_y.clone()));
        let in_room = registry.get_items_in_room(&room_y);
        assert_eq!(in_room.len(), 1);
        assert_eq!(in_room[0].item_id, leaflet);
    }

    #[tokio::test]
    async fn parser_never_invents_items_on_empty_extraction() {
        let mut registry = ItemRegistry::new();
        let lm = RecordingLanguageModel::new();
        lm.push_json(serde_json::json!({"items": []}));
        let updates = registry
            .update_from_game_output(&lm, "You are in a forest.", &RoomId::from_name("Forest"), "look", 1)
            .await;
        assert!(updates.is_empty());
        assert!(registry.get_all_items().is_empty());
    }

    #[test]
    fn droppable_items_sort_excluded_last() {
        let mut registry = ItemRegistry::new();
        let keep = ItemId::from_name("sword");
        let spare = ItemId::from_name("garlic");
        for id in [&keep, &spare] {
            let mut item = Item::new(id.clone(), id.0.clone(), String::new(), ItemLocation::Inventory, 1);
            item.portable = Portability::True;
            registry.items.insert(id.clone(), item);
        }
        let droppable = registry.get_droppable_items(&[keep.clone()]);
        assert_eq!(droppable.last().unwrap().item_id, keep);
    }

    #[test]
    fn find_by_property_matches_tagged_value() {
        let mut registry = ItemRegistry::new();
        let id = ItemId::from_name("lamp");
        let mut item = Item::new(id.clone(), "lamp".into(), String::new(), ItemLocation::Inventory, 1);
        item.properties.insert("lit".into(), PropertyValue::Bool(true));
        registry.items.insert(id.clone(), item);
        let found = registry.find_items_by_property("lit", &PropertyValue::Bool(true));
        assert_eq!(found.len(), 1);
    }
}
