//! The turn orchestrator: owns every subsystem and drives one game turn at a
//! time through the NORMAL or MAZE pipeline.
//!
//! An infinite loop that receives an external event, matches on a small
//! state tag ([`mode::Mode`]), dispatches to the matching step sequence, and
//! `.inspect_err(|e| log::warn!(...))`s anything non-fatal rather than
//! aborting. The crash-recovery constructor loads rows back out of the
//! journal instead of rebuilding state from scratch.

mod decision;
mod mode;

pub use decision::{parse_action, DecisionContext, MapSummary, OpenPuzzleSummary};
pub use mode::{GameStatus, Mode};

use crate::config::Config;
use crate::error::{AutofrotzError, Result};
use crate::external::{classify_output, Hooks, Interpreter, LanguageModel, OutputClass};
use crate::items::ItemRegistry;
use crate::journal::Journal;
use crate::map::{MapGraph, MazeSubsystem};
use crate::model::{now_epoch_secs, GameId, ItemId, PuzzleStatus, RoomId, TurnRecord};
use crate::puzzle::PuzzleTracker;

/// Everything the orchestrator needs to run a game end to end. Each
/// collaborator is injected as a trait object so a caller can swap the real
/// frotz process and LM backends for test doubles.
pub struct Orchestrator {
    config: Config,
    journal: Journal,
    game_id: GameId,
    story_file: String,

    map: MapGraph,
    items: ItemRegistry,
    puzzles: PuzzleTracker,
    maze: MazeSubsystem,
    mode: Mode,

    interpreter: Box<dyn Interpreter>,
    game_agent: Box<dyn LanguageModel>,
    puzzle_agent: Box<dyn LanguageModel>,
    map_parser: Box<dyn LanguageModel>,
    item_parser: Box<dyn LanguageModel>,
    hooks: Hooks,

    turn_number: u64,
    recent_exchanges: std::collections::VecDeque<(String, String)>,
    save_slot: usize,
    /// The slot `maybe_autosave` last wrote successfully, if any. `None`
    /// until the first autosave completes, so death before turn 1's
    /// autosave doesn't restore from a slot that was never written.
    last_written_slot: Option<usize>,
    status: GameStatus,
    latest_output: String,
    last_command: String,
    /// Set when a known maze room's marker was found missing (thief); the
    /// next command drops a replacement instead of following the normal
    /// drop-move-look cycle.
    marker_replacement_pending: Option<RoomId>,
}

/// Collaborators the constructor needs; bundled so the two bootstrap paths
/// (fresh game vs crash resume) don't each take a dozen parameters.
pub struct Collaborators {
    pub interpreter: Box<dyn Interpreter>,
    pub game_agent: Box<dyn LanguageModel>,
    pub puzzle_agent: Box<dyn LanguageModel>,
    pub map_parser: Box<dyn LanguageModel>,
    pub item_parser: Box<dyn LanguageModel>,
    pub hooks: Hooks,
}

const RECENT_EXCHANGES_LIMIT: usize = 5;
const SAVE_SLOT_COUNT: usize = 3;

impl Orchestrator {
    /// Crash-resume-aware bootstrap: if the journal has an `in_progress`
    /// game, rehydrate every manager from its rows and continue from
    /// `latest_turn + 1`. Otherwise start fresh, seeding the first room from
    /// an initial `look`.
    pub async fn start(
        config: Config,
        journal: Journal,
        story_file: String,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let Collaborators { mut interpreter, game_agent, puzzle_agent, map_parser, item_parser, hooks } =
            collaborators;

        if let Some((game_id, saved_story_file)) = journal.get_active_game().await? {
            log::info!("resuming in-progress game {game_id} ({saved_story_file})");

            let mut map = MapGraph::new();
            map.load_from_db(journal.load_rooms(&game_id).await?, journal.load_connections(&game_id).await?);

            let mut items = ItemRegistry::new();
            items.load_from_db(journal.load_items(&game_id).await?);

            let mut puzzles = PuzzleTracker::new(config.puzzle_throttle_turns, config.puzzle_attempt_deprioritize_threshold);
            puzzles.load_from_db(journal.get_puzzles(&game_id, None).await?);

            let maze = MazeSubsystem::new(crate::map::MazeConfig {
                similarity_buffer: config.maze_similarity_buffer,
                similarity_threshold: config.maze_similarity_threshold,
                trigger_count: config.maze_trigger_count,
                min_markers: config.maze_min_markers,
                reciprocity_trigger_count: config.maze_reciprocity_trigger_count,
            });

            let turns = journal.get_turns(&game_id).await?;
            let turn_number = journal.get_latest_turn(&game_id).await?.unwrap_or(0);
            let latest_output = turns.last().map(|t| t.game_output.clone()).unwrap_or_default();
            if let Some(last_turn) = turns.last() {
                map.set_current_room(last_turn.current_room.clone());
            }
            let mode = match map.current_room().and_then(|id| map.get_room(id)) {
                Some(room) if room.maze_group.is_some() => Mode::Maze,
                _ => Mode::Normal,
            };

            Ok(Self {
                config,
                journal,
                game_id,
                story_file: saved_story_file,
                map,
                items,
                puzzles,
                maze,
                mode,
                interpreter,
                game_agent,
                puzzle_agent,
                map_parser,
                item_parser,
                hooks,
                turn_number,
                recent_exchanges: std::collections::VecDeque::new(),
                save_slot: 0,
                last_written_slot: None,
                status: GameStatus::InProgress,
                latest_output,
                last_command: turns.last().map(|t| t.command_sent.clone()).unwrap_or_default(),
                marker_replacement_pending: None,
            })
        } else {
            log::info!("starting new game for {story_file}");
            let game_id = journal.create_game(&story_file).await?;
            hooks.game_start(&game_id).await;

            let initial_output = interpreter.do_command("look").await.map_err(AutofrotzError::InterpreterIo)?;

            let mut orchestrator = Self {
                config,
                journal,
                game_id,
                story_file,
                map: MapGraph::new(),
                items: ItemRegistry::new(),
                puzzles: PuzzleTracker::new(0, 0),
                maze: MazeSubsystem::new(crate::map::MazeConfig {
                    similarity_buffer: 0,
                    similarity_threshold: 0.0,
                    trigger_count: 0,
                    min_markers: 0,
                    reciprocity_trigger_count: 0,
                }),
                mode: Mode::Normal,
                interpreter,
                game_agent,
                puzzle_agent,
                map_parser,
                item_parser,
                hooks,
                turn_number: 0,
                recent_exchanges: std::collections::VecDeque::new(),
                save_slot: 0,
                last_written_slot: None,
                status: GameStatus::InProgress,
                latest_output: initial_output,
                last_command: "look".to_string(),
                marker_replacement_pending: None,
            };
            orchestrator.puzzles = PuzzleTracker::new(
                orchestrator.config.puzzle_throttle_turns,
                orchestrator.config.puzzle_attempt_deprioritize_threshold,
            );
            orchestrator.maze = MazeSubsystem::new(crate::map::MazeConfig {
                similarity_buffer: orchestrator.config.maze_similarity_buffer,
                similarity_threshold: orchestrator.config.maze_similarity_threshold,
                trigger_count: orchestrator.config.maze_trigger_count,
                min_markers: orchestrator.config.maze_min_markers,
                reciprocity_trigger_count: orchestrator.config.maze_reciprocity_trigger_count,
            });

            let room_id = RoomId::from_name("starting room");
            orchestrator.map.enter_room(room_id, "starting room".into(), orchestrator.latest_output.clone(), 0);
            Ok(orchestrator)
        }
    }

    /// Runs turns until the game reaches a terminal state, returning the
    /// final status.
    pub async fn run(&mut self) -> Result<GameStatus> {
        loop {
            let outcome = match self.mode {
                Mode::Normal => self.run_normal_turn().await,
                Mode::Maze => self.run_maze_turn().await,
            };

            match outcome {
                Ok(Some(status)) => {
                    self.status = status;
                    self.journal.set_game_status(&self.game_id, status.as_str()).await?;
                    self.hooks.game_end(status.as_str()).await;
                    return Ok(status);
                }
                Ok(None) => continue,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log::warn!("turn {} failed non-fatally: {e}", self.turn_number);
                    continue;
                }
            }
        }
    }

    /// One NORMAL-mode turn: Receive -> Parse -> Maze check -> Puzzle pass ->
    /// Decide -> Execute -> Persist -> Notify -> Terminal check. Returns
    /// `Some(status)` once the game reaches a terminal state.
    async fn run_normal_turn(&mut self) -> Result<Option<GameStatus>> {
        self.turn_number += 1;
        self.hooks.turn_start(self.turn_number as u32).await;

        // Receive: `self.latest_output` already holds the previous turn's
        // Execute result (or the initial `look`, on turn 1). The room and
        // inventory the TurnRecord journals for *this* turn are the ones
        // this output describes, i.e. the state *before* the command this
        // turn decides on is issued.
        let pre_command_room = self.map.current_room().cloned().unwrap_or_else(|| RoomId::from_name("unknown"));
        let pre_command_inventory: Vec<ItemId> = self.items.get_inventory().iter().map(|i| i.item_id.clone()).collect();

        let class = classify_output(&self.latest_output);
        if class == OutputClass::Death {
            return self.handle_death().await;
        }
        if class == OutputClass::Victory {
            return Ok(Some(GameStatus::Won));
        }

        // Parse: map and item parsers run over the same output independently.
        let (room_update, item_updates) = tokio::join!(
            self.map.update_from_game_output(self.map_parser.as_ref(), &self.latest_output, &self.last_command(), self.turn_number),
            self.items.update_from_game_output(
                self.item_parser.as_ref(),
                &self.latest_output,
                &pre_command_room,
                &self.last_command(),
                self.turn_number
            )
        );

        if room_update.created {
            if let Some(room) = self.map.get_room(&room_update.room_id) {
                self.hooks.room_enter(room).await;
            }
            self.puzzles.notify_new_room();
        }
        for update in &item_updates {
            if update.change_type == crate::items::ChangeType::New {
                if let Some(item) = self.items.get_item(&update.item_id) {
                    self.hooks.item_found(item).await;
                }
            }
            if update.change_type == crate::items::ChangeType::Taken {
                self.puzzles.notify_inventory_changed();
                if let Some(item) = self.items.get_item(&update.item_id) {
                    self.hooks.item_taken(item).await;
                }
            }
        }

        // Maze check: sliding-window duplicate-description trigger, or the
        // secondary non-reciprocal-transition streak.
        let maze_trigger = self
            .maze
            .check_trigger(&room_update.room_id, &self.latest_output, Some(pre_command_room.clone()), self.turn_number)
            .or_else(|| {
                self.maze.check_reciprocity_trigger(
                    &room_update.room_id,
                    room_update.reciprocity_demoted,
                    Some(pre_command_room.clone()),
                    self.turn_number,
                )
            });
        if let Some(group_id) = maze_trigger {
            log::info!("maze detected: group {group_id}");
            self.mode = Mode::Maze;
            if let Some(group) = self.maze.active_group() {
                self.hooks.maze_detected(group).await;
            }
        }

        let failure_text = if class == OutputClass::Normal && looks_like_failure(&self.latest_output) {
            Some(self.latest_output.clone())
        } else {
            None
        };
        let stuck_reason = self.puzzles.detect_stuck(&self.last_command(), &room_update.room_id, failure_text.as_deref());
        if stuck_reason.is_some() {
            self.puzzles.notify_failed_action();
        }

        let mut suggestions = Vec::new();
        if self.puzzles.should_evaluate() {
            let inventory: Vec<ItemId> = self.items.get_inventory().iter().map(|i| i.item_id.clone()).collect();
            suggestions = self
                .puzzles
                .evaluate(self.puzzle_agent.as_ref(), &self.latest_output, &room_update.room_id, &inventory, self.turn_number, &self.map)
                .await;
            for suggestion in &suggestions {
                if let Some(puzzle) = self.puzzles.get_puzzles(None).into_iter().find(|p| p.puzzle_id == suggestion.puzzle_id) {
                    if puzzle.attempts.is_empty() {
                        self.hooks.puzzle_found(puzzle).await;
                    }
                }
            }
        }

        if self.mode == Mode::Maze {
            // Mode flipped mid-parse this turn; don't also run a NORMAL
            // decide step. The next loop iteration drives MAZE.
            let record = self.persist_turn(pre_command_room, pre_command_inventory, String::new()).await?;
            self.hooks.turn_end(&record).await;
            return Ok(None);
        }

        // Assemble decision context + Decide.
        let context = self.build_decision_context(&room_update.room_id, &suggestions);
        let (reasoning, command) = self.decide(&context).await?;

        // Execute.
        self.maybe_autosave(&command).await;
        let output = self.interpreter.do_command(&command).await.map_err(AutofrotzError::InterpreterIo)?;
        self.push_recent_exchange(&command, &output);
        self.latest_output = output;
        self.last_command = command.clone();

        let record = self.persist_turn(pre_command_room, pre_command_inventory, reasoning).await?;
        self.hooks.turn_end(&record).await;

        if self.turn_number >= self.config.turn_limit {
            return Ok(Some(GameStatus::Abandoned));
        }
        Ok(None)
    }

    /// One MAZE-mode turn: all phases except Decide run exactly as in NORMAL
    /// mode; Decide is replaced by asking [`MazeSubsystem`] for the next
    /// drop/move/look primitive.
    async fn run_maze_turn(&mut self) -> Result<Option<GameStatus>> {
        self.turn_number += 1;
        self.hooks.turn_start(self.turn_number as u32).await;

        let pre_command_room = self.map.current_room().cloned().unwrap_or_else(|| RoomId::from_name("unknown"));
        let pre_command_inventory: Vec<ItemId> = self.items.get_inventory().iter().map(|i| i.item_id.clone()).collect();

        let class = classify_output(&self.latest_output);
        if class == OutputClass::Death {
            return self.handle_death().await;
        }

        if darkness_mentioned(&self.latest_output) {
            self.maze.flag_darkness();
            log::warn!("maze exploration aborted: room is dark, no light source");
        } else {
            self.maze.clear_darkness();
        }

        let (room_update, item_updates) = tokio::join!(
            self.map.update_from_game_output(self.map_parser.as_ref(), &self.latest_output, &self.last_command(), self.turn_number),
            self.items.update_from_game_output(
                self.item_parser.as_ref(),
                &self.latest_output,
                &pre_command_room,
                &self.last_command(),
                self.turn_number
            )
        );
        let _ = item_updates;

        let items_in_new_room: Vec<ItemId> =
            self.items.get_items_in_room(&room_update.room_id).iter().map(|i| i.item_id.clone()).collect();

        if self.maze.take_pending_drop().is_some() {
            // A `look` just resolved the result of the previous drop+move;
            // reconcile it against whatever the map parser recorded.
            let still_maze = self.maze.is_active() && looks_like_maze_room(&self.latest_output);
            let exits = self.map.get_room(&room_update.room_id).map(|r| r.pending_exits.clone()).unwrap_or_default();
            let marker_room_here = self.maze.marker_room_for(&items_in_new_room);
            if let Some((from_room, direction, observed_to)) =
                self.maze.resolve_exit(still_maze, room_update.room_id.clone(), exits, marker_room_here)
            {
                self.map.mark_random(&from_room, &direction, &observed_to);
                log::info!("maze exit {from_room}/{direction} is non-deterministic; upgraded to random");
            }
            if let Some(room) = self.map.get_room(&room_update.room_id) {
                if let Some(conn) = self.map.all_connections().into_iter().find(|c| c.from_room == pre_command_room) {
                    self.hooks.maze_room_marked(room, conn).await;
                }
            }
        }

        if self.maze.is_active() && !room_update.created && self.maze.marker_missing(&room_update.room_id, &items_in_new_room) {
            if let Some(puzzle_id) =
                self.puzzles.raise_puzzle("wandering thief in maze".to_string(), Some(room_update.room_id.clone()), self.turn_number)
            {
                if let Some(puzzle) = self.puzzles.get_puzzles(None).into_iter().find(|p| p.puzzle_id == puzzle_id) {
                    self.hooks.puzzle_found(puzzle).await;
                }
                self.marker_replacement_pending = Some(room_update.room_id.clone());
            }
        }

        if !self.maze.has_pending_exits() && self.maze.is_active() {
            if let Some(group) = self.maze.complete_maze(self.turn_number) {
                log::info!("maze group {} fully mapped", group.group_id);
                self.hooks.maze_completed(&group).await;
                self.journal.save_maze_group(&self.game_id, group).await?;
                self.mode = Mode::Normal;
            }
        }

        if self.maze.needs_light() {
            if let Some(puzzle_id) = self.puzzles.raise_puzzle("need light in maze".to_string(), Some(pre_command_room.clone()), self.turn_number) {
                if let Some(puzzle) = self.puzzles.get_puzzles(None).into_iter().find(|p| p.puzzle_id == puzzle_id) {
                    self.hooks.puzzle_found(puzzle).await;
                }
            }
        }

        let droppable: Vec<ItemId> = self
            .items
            .get_droppable_items(&self.puzzle_related_item_ids())
            .into_iter()
            .map(|i| i.item_id.clone())
            .collect();

        let command = if let Some(room_id) = self.marker_replacement_pending.take() {
            match droppable.first().cloned() {
                Some(marker) => {
                    self.maze.assign_maze_marker(room_id, marker.clone());
                    format!("drop {}", marker.0)
                }
                None => {
                    // No replacement available; leave the puzzle open and
                    // fall back to whatever the DFS cycle wants next.
                    self.maze_next_command_or_fallback(&droppable)
                }
            }
        } else {
            self.maze_next_command_or_fallback(&droppable)
        };

        let output = self.interpreter.do_command(&command).await.map_err(AutofrotzError::InterpreterIo)?;
        self.push_recent_exchange(&command, &output);
        self.latest_output = output;
        self.last_command = command;

        let record = self.persist_turn(pre_command_room, pre_command_inventory, "maze exploration".to_string()).await?;
        self.hooks.turn_end(&record).await;

        if self.turn_number >= self.config.turn_limit {
            return Ok(Some(GameStatus::Abandoned));
        }
        Ok(None)
    }

    /// The normal drop-move-look cycle, used both as the default command
    /// source and as the fallback when a marker-replacement drop isn't
    /// possible this turn.
    fn maze_next_command_or_fallback(&mut self, droppable: &[ItemId]) -> String {
        match self.maze.next_command(droppable) {
            Some(crate::map::MazeCommand::Drop(item)) => {
                self.maze.set_pending_drop(self.map.current_room().cloned().unwrap_or_else(|| RoomId::from_name("unknown")), item.clone());
                format!("drop {}", item.0)
            }
            Some(crate::map::MazeCommand::Move(dir)) => dir,
            Some(crate::map::MazeCommand::Look) => "look".to_string(),
            Some(crate::map::MazeCommand::PickUp(item)) => format!("take {}", item.0),
            None => {
                // Either the room is dark (no light source to resolve it)
                // or markers ran out: fall back to algorithmic pathfinding
                // out of the maze entirely rather than stalling the turn
                // loop. Darkness already raised its puzzle above; the maze
                // re-triggers its own detection later if resumed and still
                // unresolved.
                self.mode = Mode::Normal;
                "look".to_string()
            }
        }
    }

    async fn handle_death(&mut self) -> Result<Option<GameStatus>> {
        if self.config.save_on_death {
            match self.last_written_slot {
                Some(slot) => {
                    let label = self.save_label(slot);
                    log::warn!("died; restoring from {label}");
                    if self.interpreter.restore(&label).await.map_err(AutofrotzError::InterpreterIo)? {
                        self.latest_output = self.interpreter.do_command("look").await.map_err(AutofrotzError::InterpreterIo)?;
                        return Ok(None);
                    }
                    log::warn!("restore from {label} failed after death");
                }
                None => log::warn!("died before any autosave was written; nothing to restore from"),
            }
        }
        Ok(Some(GameStatus::Lost))
    }

    async fn decide(&mut self, context: &DecisionContext) -> Result<(String, String)> {
        let req = crate::external::CompletionRequest {
            messages: vec![crate::external::Message { role: "user".into(), content: context.render() }],
            system_prompt: "You are playing an interactive fiction game turn by turn. Decide the single next command.".into(),
            temperature: 0.2,
            max_tokens: 512,
        };
        let response = match self.game_agent.complete(req.clone()).await {
            Ok(response) => {
                if let Some(parsed) = parse_action(&response.text) {
                    return Ok(parsed);
                }
                log::warn!("decision response missing ACTION: marker, retrying once");
                Some(response.text)
            }
            Err(e) => {
                log::warn!("decision call failed, retrying once: {e}");
                None
            }
        };

        let retry_req = crate::external::CompletionRequest {
            messages: match response {
                Some(text) => vec![
                    crate::external::Message { role: "assistant".into(), content: text },
                    crate::external::Message {
                        role: "user".into(),
                        content: "Your response must end with a line `ACTION: <command>`. Try again.".into(),
                    },
                ],
                None => req.messages.clone(),
            },
            ..req
        };
        if let Ok(retry) = self.game_agent.complete(retry_req).await {
            if let Some(parsed) = parse_action(&retry.text) {
                return Ok(parsed);
            }
        }

        // §7 "Decision-parse failure": fall back to the top open-puzzle
        // suggestion, then to a bare `look`.
        if let Some(puzzle) = context.open_puzzles.first() {
            if let Some(suggestion) = &puzzle.top_suggestion {
                return Ok(("decision-parse failure; falling back to puzzle suggestion".to_string(), suggestion.clone()));
            }
        }
        Ok(("decision-parse failure; falling back to look".to_string(), "look".to_string()))
    }

    fn build_decision_context(&self, current_room: &RoomId, suggestions: &[crate::puzzle::Suggestion]) -> DecisionContext {
        let inventory: Vec<ItemId> = self.items.get_inventory().iter().map(|i| i.item_id.clone()).collect();
        let items_here: Vec<ItemId> = self.items.get_items_in_room(current_room).iter().map(|i| i.item_id.clone()).collect();

        let open_puzzles = self
            .puzzles
            .get_puzzles(Some(PuzzleStatus::Open))
            .into_iter()
            .chain(self.puzzles.get_puzzles(Some(PuzzleStatus::InProgress)))
            .map(|p| {
                let top = suggestions.iter().find(|s| s.puzzle_id == p.puzzle_id).map(|s| s.action_text.clone());
                OpenPuzzleSummary { description: p.description.clone(), top_suggestion: top }
            })
            .collect();

        let unexplored_count = self.map.get_unexplored_exits(None).len();
        DecisionContext {
            latest_output: self.latest_output.clone(),
            current_room: current_room.clone(),
            inventory,
            items_here,
            map_summary: MapSummary {
                rooms_visited: self.map.rooms_visited(),
                rooms_total: self.map.rooms_total(),
                unexplored_count,
                current: current_room.clone(),
            },
            open_puzzles,
            recent_exchanges: self.recent_exchanges.iter().cloned().collect(),
        }
    }

    async fn persist_turn(&self, current_room: RoomId, inventory_snapshot: Vec<ItemId>, reasoning: String) -> Result<TurnRecord> {
        let record = TurnRecord {
            game_id: self.game_id.clone(),
            turn_number: self.turn_number,
            timestamp: now_epoch_secs(),
            command_sent: self.last_command(),
            game_output: self.latest_output.clone(),
            current_room,
            inventory_snapshot,
            agent_reasoning: reasoning,
        };
        self.journal.save_turn(record.clone()).await?;
        for room in self.map.all_rooms() {
            self.journal.save_room(&self.game_id, room.clone()).await?;
        }
        for connection in self.map.all_connections() {
            self.journal.save_connection(&self.game_id, connection.clone()).await?;
        }
        for item in self.items.get_all_items() {
            self.journal.save_item(&self.game_id, item.clone()).await?;
        }
        for puzzle in self.puzzles.get_puzzles(None) {
            self.journal.save_puzzle(&self.game_id, puzzle.clone()).await?;
        }
        Ok(record)
    }

    async fn maybe_autosave(&mut self, command: &str) {
        let periodic = self.turn_number % self.config.autosave_every as u64 == 0;
        let risky = self.config.risky_action_autosave && looks_risky(command);
        if !periodic && !risky {
            return;
        }
        let label = self.save_label(self.save_slot);
        match self.interpreter.save(&label).await {
            Ok(true) => {
                log::debug!("autosaved to {label}");
                self.last_written_slot = Some(self.save_slot);
                self.save_slot = (self.save_slot + 1) % SAVE_SLOT_COUNT;
            }
            Ok(false) => log::warn!("autosave to {label} was rejected by the interpreter"),
            Err(e) => log::warn!("autosave to {label} failed: {e}"),
        }
    }

    fn save_label(&self, slot: usize) -> String {
        format!("{}.save{slot}", self.game_id)
    }

    fn push_recent_exchange(&mut self, command: &str, output: &str) {
        self.recent_exchanges.push_back((command.to_string(), output.to_string()));
        while self.recent_exchanges.len() > RECENT_EXCHANGES_LIMIT {
            self.recent_exchanges.pop_front();
        }
    }

    /// Puzzle-related item ids to push to the back of the maze's marker
    /// selection, so markers are preferentially items unrelated to open
    /// puzzles.
    fn puzzle_related_item_ids(&self) -> Vec<ItemId> {
        self.puzzles.get_puzzles(None).into_iter().flat_map(|p| p.related_items.iter().cloned()).collect()
    }

    fn last_command(&self) -> String {
        self.last_command.clone()
    }
}

fn looks_like_failure(output: &str) -> bool {
    let lower = output.to_lowercase();
    ["you can't", "nothing happens", "i don't understand", "that's not possible", "you don't see", "locked"]
        .iter()
        .any(|phrase| lower.contains(phrase))
}

fn looks_like_maze_room(output: &str) -> bool {
    output.to_lowercase().contains("twisty little passages")
}

fn darkness_mentioned(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("pitch black") || lower.contains("too dark to see") || lower.contains("grue")
}

fn looks_risky(command: &str) -> bool {
    let lower = command.to_lowercase();
    ["attack", "kill", "fight", "jump", "dive", "eat", "drink", "enter"].iter().any(|v| lower.starts_with(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::test_double::{RecordingHook, RecordingLanguageModel, ScriptedInterpreter};
    use std::sync::Arc;

    fn test_config(journal_path: std::path::PathBuf) -> Config {
        Config {
            journal_path,
            autosave_every: 1000,
            turn_limit: 2,
            ..Config::default()
        }
    }

    fn empty_lm() -> Box<RecordingLanguageModel> {
        Box::new(RecordingLanguageModel::new())
    }

    /// A two-turn game is driven entirely through [`Orchestrator::run`],
    /// journals a `TurnRecord` per turn, fires hooks in order, and reaches
    /// the terminal state once `turn_limit` is hit.
    #[tokio::test]
    async fn normal_turn_loop_journals_turns_and_fires_hooks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path().join("j.db")).await.unwrap();
        let config = test_config(dir.path().join("j.db"));

        let interpreter = Box::new(ScriptedInterpreter::new(vec![
            "West of House. There is a small mailbox here. Exits: north.".into(),
            "North of House. You can see the house.".into(),
            "Still north of the house.".into(),
        ]));

        let game_agent = RecordingLanguageModel::new();
        game_agent.push_completion("I should explore.\nACTION: north");
        game_agent.push_completion("Let's take another look.\nACTION: look");

        let map_parser = RecordingLanguageModel::new();
        map_parser.push_json(serde_json::json!({
            "room_changed": true, "name": "West of House", "description": "an open field", "exits": ["north"]
        }));
        map_parser.push_json(serde_json::json!({
            "room_changed": true, "name": "North of House", "description": "the house", "exits": []
        }));

        let item_parser = RecordingLanguageModel::new();
        item_parser.push_json(serde_json::json!({"items": [{"name": "mailbox", "change_type": "new"}]}));
        item_parser.push_json(serde_json::json!({"items": []}));

        let hook = Arc::new(RecordingHook::new());
        let hooks = Hooks(vec![hook.clone()]);

        let collaborators = Collaborators {
            interpreter,
            game_agent: Box::new(game_agent),
            puzzle_agent: empty_lm(),
            map_parser: Box::new(map_parser),
            item_parser: Box::new(item_parser),
            hooks,
        };

        let mut orchestrator = Orchestrator::start(config, journal, "zork1.z5".to_string(), collaborators).await.unwrap();
        let status = orchestrator.run().await.unwrap();
        assert_eq!(status, GameStatus::Abandoned);
        assert_eq!(orchestrator.turn_number, 2);

        let journal = Journal::open(dir.path().join("j.db")).await.unwrap();
        let turns = journal.get_turns(&orchestrator.game_id).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].command_sent, "north");
        assert_eq!(turns[1].command_sent, "look");

        let events = hook.events.lock().unwrap().clone();
        assert_eq!(events.first().unwrap(), &format!("game_start:{}", orchestrator.game_id.0));
        assert_eq!(events[events.len() - 1], "game_end:abandoned");
        let turn_start_1 = events.iter().position(|e| e == "turn_start:1").unwrap();
        let turn_end_1 = events.iter().position(|e| e == "turn_end:1").unwrap();
        let turn_start_2 = events.iter().position(|e| e == "turn_start:2").unwrap();
        assert!(turn_start_1 < turn_end_1);
        assert!(turn_end_1 < turn_start_2);
        assert!(events.iter().any(|e| e.starts_with("room_enter:")));
    }

    /// A crash mid-game (journal row left `in_progress`) is rehydrated by a
    /// fresh [`Orchestrator::start`] call against the same journal file,
    /// continuing turn numbering and the explored map rather than replaying
    /// from scratch.
    #[tokio::test]
    async fn start_resumes_an_in_progress_game_from_the_journal() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("j.db");

        let first_game_id = {
            let journal = Journal::open(db_path.clone()).await.unwrap();
            let config = test_config(db_path.clone());

            let interpreter = Box::new(ScriptedInterpreter::new(vec!["West of House. Exits: north.".into(), "North of House.".into()]));
            let game_agent = RecordingLanguageModel::new();
            game_agent.push_completion("Heading north.\nACTION: north");
            let map_parser = RecordingLanguageModel::new();
            map_parser.push_json(serde_json::json!({
                "room_changed": true, "name": "West of House", "description": "an open field", "exits": ["north"]
            }));
            let item_parser = RecordingLanguageModel::new();
            item_parser.push_json(serde_json::json!({"items": []}));

            let collaborators = Collaborators {
                interpreter,
                game_agent: Box::new(game_agent),
                puzzle_agent: empty_lm(),
                map_parser: Box::new(map_parser),
                item_parser: Box::new(item_parser),
                hooks: Hooks(vec![]),
            };

            let mut orchestrator = Orchestrator::start(config, journal, "zork1.z5".to_string(), collaborators).await.unwrap();
            // Run exactly one turn by hand, without letting the terminal
            // check finalize the game, to simulate a process crash mid-game.
            orchestrator.run_normal_turn().await.unwrap();
            assert_eq!(orchestrator.turn_number, 1);
            orchestrator.game_id.clone()
        };

        let journal = Journal::open(db_path.clone()).await.unwrap();
        let config = test_config(db_path);
        let collaborators = Collaborators {
            interpreter: Box::new(ScriptedInterpreter::new(vec![])),
            game_agent: empty_lm(),
            puzzle_agent: empty_lm(),
            map_parser: empty_lm(),
            item_parser: empty_lm(),
            hooks: Hooks(vec![]),
        };
        let resumed = Orchestrator::start(config, journal, "ignored.z5".to_string(), collaborators).await.unwrap();

        assert_eq!(resumed.game_id, first_game_id);
        assert_eq!(resumed.story_file, "zork1.z5");
        assert_eq!(resumed.turn_number, 1);
        assert_eq!(resumed.status, GameStatus::InProgress);
        assert!(resumed.map.rooms_total() >= 1);
    }

    /// A trigger firing mid-turn flips the mode to `Maze` without ending
    /// that turn's processing, and the following turn drives the
    /// marker-drop cycle through [`MazeSubsystem`] instead of calling the
    /// decision agent.
    #[tokio::test]
    async fn maze_trigger_flips_mode_and_drives_marker_drop() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path().join("j.db")).await.unwrap();
        let config = Config {
            journal_path: dir.path().join("j.db"),
            autosave_every: 1000,
            maze_trigger_count: 1,
            maze_min_markers: 1,
            turn_limit: 4,
            ..Config::default()
        };

        let interpreter = Box::new(ScriptedInterpreter::new(vec![
            "The Forest. Exits: east.".into(),
            "You are in a maze of twisty little passages, all alike.".into(),
            "You are in a maze of twisty little passages, all alike.".into(),
            "Dropped.".into(),
        ]));

        let game_agent = RecordingLanguageModel::new();
        game_agent.push_completion("Heading east.\nACTION: east");
        game_agent.push_completion("Heading east again.\nACTION: east");

        let map_parser = RecordingLanguageModel::new();
        map_parser.push_json(serde_json::json!({"room_changed": true, "name": "Forest", "description": "the forest", "exits": ["east"]}));
        map_parser.push_json(serde_json::json!({"room_changed": true, "name": "Maze A", "description": "twisty passages", "exits": ["east"]}));
        map_parser.push_json(serde_json::json!({"room_changed": true, "name": "Maze B", "description": "twisty passages", "exits": ["east"]}));
        map_parser.push_json(serde_json::json!({"room_changed": false}));

        let item_parser = RecordingLanguageModel::new();
        item_parser.push_json(serde_json::json!({"items": [{"name": "leaflet", "change_type": "taken"}]}));
        item_parser.push_json(serde_json::json!({"items": []}));
        item_parser.push_json(serde_json::json!({"items": []}));
        item_parser.push_json(serde_json::json!({"items": []}));

        let collaborators = Collaborators {
            interpreter,
            game_agent: Box::new(game_agent),
            puzzle_agent: empty_lm(),
            map_parser: Box::new(map_parser),
            item_parser: Box::new(item_parser),
            hooks: Hooks(vec![]),
        };

        let mut orchestrator = Orchestrator::start(config, journal, "zork1.z5".to_string(), collaborators).await.unwrap();
        let status = orchestrator.run().await.unwrap();

        assert_eq!(status, GameStatus::Abandoned);
        assert_eq!(orchestrator.turn_number, 4);
        assert_eq!(orchestrator.mode, Mode::Maze);
        assert!(orchestrator.maze.is_active());
        assert_eq!(orchestrator.last_command(), "drop leaflet");
    }

    /// A `look` reporting darkness while the maze is active raises a
    /// high-priority puzzle and drops the orchestrator back to NORMAL mode
    /// rather than continuing to drive drop/move/look primitives blind.
    #[tokio::test]
    async fn darkness_in_maze_raises_puzzle_and_exits_maze_mode() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path().join("j.db")).await.unwrap();
        let config = Config {
            journal_path: dir.path().join("j.db"),
            autosave_every: 1000,
            maze_trigger_count: 1,
            turn_limit: 2,
            ..Config::default()
        };

        let interpreter = Box::new(ScriptedInterpreter::new(vec!["It is pitch black. You are likely to be eaten by a grue.".into()]));
        let map_parser = RecordingLanguageModel::new();
        map_parser.push_json(serde_json::json!({"room_changed": false}));
        let item_parser = RecordingLanguageModel::new();
        item_parser.push_json(serde_json::json!({"items": []}));
        let hook = Arc::new(RecordingHook::new());
        let hooks = Hooks(vec![hook.clone()]);

        let collaborators = Collaborators {
            interpreter,
            game_agent: empty_lm(),
            puzzle_agent: empty_lm(),
            map_parser: Box::new(map_parser),
            item_parser: Box::new(item_parser),
            hooks,
        };

        let mut orchestrator = Orchestrator::start(config, journal, "zork1.z5".to_string(), collaborators).await.unwrap();
        // Activate the maze directly, bypassing the turn loop's own
        // similarity-trigger bookkeeping, to isolate the darkness-abort path.
        let room = RoomId::from_name("maze room");
        orchestrator.maze.check_trigger(&room, "twisty passages", None, 1);
        let triggered = orchestrator.maze.check_trigger(&room, "twisty passages", None, 2);
        assert!(triggered.is_some());
        orchestrator.mode = Mode::Maze;
        orchestrator.latest_output = "It is pitch black. You are likely to be eaten by a grue.".to_string();

        orchestrator.run_maze_turn().await.unwrap();

        assert_eq!(orchestrator.mode, Mode::Normal);
        assert!(orchestrator.puzzles.get_puzzles(None).iter().any(|p| p.description == "need light in maze"));
        let events = hook.events.lock().unwrap().clone();
        assert!(events.iter().any(|e| e.starts_with("puzzle_found:")));
    }

    /// A death classification restores from the last save slot rather than
    /// ending the game, when `save_on_death` is set.
    #[tokio::test]
    async fn death_restores_from_save_slot_instead_of_ending_the_game() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path().join("j.db")).await.unwrap();
        let config = Config {
            journal_path: dir.path().join("j.db"),
            autosave_every: 1000,
            save_on_death: true,
            turn_limit: 1,
            ..Config::default()
        };

        let interpreter = Box::new(ScriptedInterpreter::new(vec!["*** You have died ***".into(), "West of House.".into()]));

        let collaborators = Collaborators {
            interpreter,
            game_agent: empty_lm(),
            puzzle_agent: empty_lm(),
            map_parser: empty_lm(),
            item_parser: empty_lm(),
            hooks: Hooks(vec![]),
        };

        let mut orchestrator = Orchestrator::start(config, journal, "zork1.z5".to_string(), collaborators).await.unwrap();
        // Simulate a prior autosave having already landed in slot 0, as if
        // `maybe_autosave` had run on an earlier turn.
        orchestrator.last_written_slot = Some(0);
        // `start()`'s seeding `look` is itself the text reporting death here,
        // so the very first `run_normal_turn` call restores immediately
        // (issuing its own `look`) rather than reaching Parse/Decide at all.
        let outcome = orchestrator.run_normal_turn().await.unwrap();
        assert_eq!(outcome, None);
        assert_eq!(orchestrator.latest_output, "West of House.");
    }

    /// Death before any autosave has landed has nothing to restore from, and
    /// the game ends as `Lost` rather than attempting a restore on a save
    /// slot that was never written.
    #[tokio::test]
    async fn death_before_any_autosave_ends_the_game_as_lost() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path().join("j.db")).await.unwrap();
        let config = Config {
            journal_path: dir.path().join("j.db"),
            autosave_every: 1000,
            save_on_death: true,
            turn_limit: 1,
            ..Config::default()
        };

        let interpreter = Box::new(ScriptedInterpreter::new(vec!["*** You have died ***".into()]));

        let collaborators = Collaborators {
            interpreter,
            game_agent: empty_lm(),
            puzzle_agent: empty_lm(),
            map_parser: empty_lm(),
            item_parser: empty_lm(),
            hooks: Hooks(vec![]),
        };

        let mut orchestrator = Orchestrator::start(config, journal, "zork1.z5".to_string(), collaborators).await.unwrap();
        let outcome = orchestrator.run_normal_turn().await.unwrap();
        assert_eq!(outcome, Some(GameStatus::Lost));
    }
}
