//! AutoFrotz CLI entrypoint.
//!
//! A few lines of `clap`-driven dispatch into library code, with all the
//! real logic living in `autofrotz::*`. Driving an actual game turn
//! requires a concrete `Interpreter` and `LanguageModel`, both out of scope
//! for this crate — this binary's subcommands are therefore the
//! journal-backed operations the core alone can perform: opening/inspecting
//! the durable store that a real frotz-plus-provider wrapper would drive
//! turns into.

use autofrotz::config::Config;
use autofrotz::journal::Journal;
use autofrotz::model::PuzzleStatus;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "autofrotz", about = "Turn orchestrator core for an autonomous Z-Machine agent")]
struct Cli {
    /// Path to the journal's SQLite file; falls back to `Config::from_env`.
    #[arg(long, global = true)]
    journal: Option<std::path::PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Opens (creating if absent) the journal and registers a new game row.
    NewGame {
        /// Story file path, e.g. `zork1.z5`. Recorded, not loaded — spawning
        /// the interpreter process is the caller's job.
        story_file: String,
    },
    /// Prints the journal's currently active (`in_progress`) game, if any.
    Status,
    /// Lists journaled turns for a game.
    Turns { game_id: String },
    /// Lists journaled puzzles for a game, optionally filtered by status.
    Puzzles {
        game_id: String,
        #[arg(long)]
        status: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    autofrotz::logging::init(cli.verbose);

    let mut config = Config::from_env();
    if let Some(path) = cli.journal {
        config.journal_path = path;
    }
    let journal = Journal::open(config.journal_path.clone()).await?;

    match cli.command {
        Command::NewGame { story_file } => {
            let game_id = journal.create_game(&story_file).await?;
            println!("created game {game_id} for {story_file}");
        }
        Command::Status => match journal.get_active_game().await? {
            Some((game_id, story_file)) => {
                let latest = journal.get_latest_turn(&game_id).await?.unwrap_or(0);
                println!("active game {game_id} ({story_file}), latest turn {latest}");
            }
            None => println!("no active game"),
        },
        Command::Turns { game_id } => {
            let game_id = autofrotz::model::GameId(game_id);
            for turn in journal.get_turns(&game_id).await? {
                println!("[{}] {} -> {}", turn.turn_number, turn.command_sent, turn.current_room);
            }
        }
        Command::Puzzles { game_id, status } => {
            let game_id = autofrotz::model::GameId(game_id);
            let status = status.as_deref().map(parse_status).transpose()?;
            for puzzle in journal.get_puzzles(&game_id, status).await? {
                println!("#{} [{:?}] {}", puzzle.puzzle_id, puzzle.status, puzzle.description);
            }
        }
    }

    Ok(())
}

fn parse_status(raw: &str) -> anyhow::Result<PuzzleStatus> {
    match raw {
        "open" => Ok(PuzzleStatus::Open),
        "in_progress" => Ok(PuzzleStatus::InProgress),
        "solved" => Ok(PuzzleStatus::Solved),
        "abandoned" => Ok(PuzzleStatus::Abandoned),
        other => anyhow::bail!("unknown puzzle status: {other}"),
    }
}
