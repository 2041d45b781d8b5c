//! MapGraph and MazeSubsystem.

mod graph;
mod maze;

pub use graph::{MapGraph, RoomUpdate};
pub use maze::{MazeCommand, MazeConfig, MazeSubsystem};
