//! Orchestrator tunables.
//!
//! Explicitly *not* a config-file loader — this is a plain struct with
//! defaults, optionally overridden from the environment. Every numeric knob
//! that is implementer-defined behavior lives here rather than being
//! hardcoded.

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the journal's SQLite file.
    pub journal_path: std::path::PathBuf,
    /// Autosave cadence in turns.
    pub autosave_every: u32,
    /// Autosave immediately before an agent-flagged risky action.
    pub risky_action_autosave: bool,
    /// Terminal check: restore from save on death rather than ending the game.
    pub save_on_death: bool,
    /// Full cross-reference evaluation cadence in turns.
    pub puzzle_throttle_turns: u32,
    /// Attempts beyond which a puzzle is de-prioritised.
    pub puzzle_attempt_deprioritize_threshold: u32,
    /// Minimum distinct portable items required before maze DFS starts.
    pub maze_min_markers: usize,
    /// Sliding buffer size of recent room descriptions for duplicate detection.
    pub maze_similarity_buffer: usize,
    /// Pairwise similarity threshold that counts as "duplicate description".
    pub maze_similarity_threshold: f64,
    /// Minimum duplicate rooms in the buffer to trigger maze detection.
    pub maze_trigger_count: usize,
    /// Consecutive non-reciprocal transitions (secondary maze trigger).
    pub maze_reciprocity_trigger_count: usize,
    /// External-call timeouts.
    pub parser_call_timeout: std::time::Duration,
    pub decision_call_timeout: std::time::Duration,
    pub interpreter_call_timeout: std::time::Duration,
    /// Terminal check: abandon the game after this many turns.
    pub turn_limit: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            journal_path: std::path::PathBuf::from("autofrotz.db"),
            autosave_every: 25,
            risky_action_autosave: true,
            save_on_death: true,
            puzzle_throttle_turns: 3,
            puzzle_attempt_deprioritize_threshold: 5,
            maze_min_markers: 8,
            maze_similarity_buffer: 30,
            maze_similarity_threshold: 0.95,
            maze_trigger_count: 3,
            maze_reciprocity_trigger_count: 4,
            parser_call_timeout: std::time::Duration::from_secs(20),
            decision_call_timeout: std::time::Duration::from_secs(30),
            interpreter_call_timeout: std::time::Duration::from_secs(10),
            turn_limit: 2000,
        }
    }
}

impl Config {
    /// Overrides individual fields from the environment when present,
    /// falling back to the struct default instead of panicking: these are
    /// tunables, not a required connection string.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(path) = std::env::var("AUTOFROTZ_JOURNAL_PATH") {
            cfg.journal_path = std::path::PathBuf::from(path);
        }
        if let Some(n) = std::env::var("AUTOFROTZ_AUTOSAVE_EVERY").ok().and_then(|s| s.parse().ok()) {
            cfg.autosave_every = n;
        }
        if let Some(n) = std::env::var("AUTOFROTZ_MAZE_MIN_MARKERS").ok().and_then(|s| s.parse().ok()) {
            cfg.maze_min_markers = n;
        }
        cfg
    }
}
