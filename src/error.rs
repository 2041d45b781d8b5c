//! Error kinds for the turn orchestrator. Only `InterpreterIo` and
//! `JournalWrite` are meant to escape the turn loop as fatal; everything
//! else is caught, logged with `log::warn!`, and folded into the turn's
//! outcome rather than propagated.

#[derive(Debug, thiserror::Error)]
pub enum AutofrotzError {
    #[error("parser extraction failed after retries: {0}")]
    ParserExtraction(String),

    #[error("decision response had no ACTION: marker after retry")]
    DecisionParse,

    #[error("interpreter i/o failed: {0}")]
    InterpreterIo(#[source] anyhow::Error),

    #[error("player died in-game")]
    Death,

    #[error("journal write failed: {0}")]
    JournalWrite(#[source] anyhow::Error),

    #[error("hook raised an exception (swallowed): {0}")]
    HookException(String),

    #[error("turn limit reached")]
    TurnLimit,
}

impl AutofrotzError {
    /// Only these two kinds abort the turn loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AutofrotzError::InterpreterIo(_) | AutofrotzError::JournalWrite(_))
    }
}

pub type Result<T> = std::result::Result<T, AutofrotzError>;
