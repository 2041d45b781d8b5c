//! AutoFrotz: the turn orchestrator that drives an autonomous agent through
//! a Z-Machine interactive fiction game.
//!
//! This crate is the core: the durable [`journal`], the [`items`] registry,
//! the room/maze [`map`], the [`puzzle`] tracker, and the [`orchestrator`]
//! state machine that mediates all four. The HTTP/WebSocket dashboard,
//! per-provider language-model clients, the interpreter process wrapper, and
//! config-file loading are out of scope — [`external`] gives only the trait
//! seams a real implementation of those would plug into.

pub mod config;
pub mod error;
pub mod external;
pub mod items;
pub mod journal;
pub mod logging;
pub mod map;
pub mod model;
pub mod orchestrator;
pub mod puzzle;

pub use error::{AutofrotzError, Result};
